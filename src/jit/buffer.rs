//! Executable code page lifecycle (§4.6).
//!
//! Pages are obtained from the host as anonymous, page-aligned, read/write
//! memory; once an emitter has finished writing a segment's translation the
//! page is reprotected read/execute before it is ever run. This two-phase
//! write-then-reprotect-execute discipline is required on W^X hosts (notably
//! Apple Silicon) and is harmless on hosts that allow simultaneous
//! write+execute mappings, so the crate treats it as the only path.

use std::ptr::NonNull;

use tracing::trace;

use crate::error::VmFatalError;

/// An owned, page-aligned block of host memory that can be written, then
/// switched to executable, and is unmapped on drop.
pub struct CodeBuffer {
    ptr: NonNull<u8>,
    len: usize,
    executable: bool,
}

// SAFETY: `CodeBuffer` owns its mapping exclusively; no other part of the
// process holds a pointer into it while it's live.
unsafe impl Send for CodeBuffer {}

impl CodeBuffer {
    /// Maps `len` bytes (rounded up to a whole number of pages), writable and
    /// not yet executable.
    pub fn new(len: usize) -> Result<Self, VmFatalError> {
        let len = round_up_to_page(len.max(1));

        // SAFETY: `mmap` with `MAP_ANON | MAP_PRIVATE` and a null address
        // hint is always safe to call; we check the sentinel return value.
        let raw = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_ANON | libc::MAP_PRIVATE,
                -1,
                0,
            )
        };

        if raw == libc::MAP_FAILED {
            return Err(VmFatalError::CodePage {
                operation: "mmap",
                source: std::io::Error::last_os_error(),
            });
        }

        trace!(len, "mapped writable code page");

        Ok(Self {
            // SAFETY: we just checked `raw != MAP_FAILED`, and mmap never
            // returns a null pointer on success.
            ptr: unsafe { NonNull::new_unchecked(raw.cast()) },
            len,
            executable: false,
        })
    }

    /// The buffer's writable byte view. Panics if the buffer has already
    /// been switched to executable — code pages are write-then-execute, not
    /// read-modify-write.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        assert!(!self.executable, "code page is already executable");
        // SAFETY: `ptr` is valid for `len` bytes for the lifetime of `self`.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Reprotects the page read+execute. After this call `as_mut_slice`
    /// panics; call [`CodeBuffer::entry`] to get a callable pointer instead.
    pub fn make_executable(&mut self) -> Result<(), VmFatalError> {
        // SAFETY: `ptr`/`len` describe a live mapping owned by `self`.
        let result = unsafe {
            libc::mprotect(
                self.ptr.as_ptr().cast(),
                self.len,
                libc::PROT_READ | libc::PROT_EXEC,
            )
        };

        if result != 0 {
            return Err(VmFatalError::CodePage {
                operation: "mprotect",
                source: std::io::Error::last_os_error(),
            });
        }

        self.executable = true;
        trace!(len = self.len, "reprotected code page executable");
        Ok(())
    }

    /// A pointer to the start of the page, valid to jump to once
    /// [`CodeBuffer::make_executable`] has succeeded.
    pub fn entry(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }
}

impl Drop for CodeBuffer {
    fn drop(&mut self) {
        // SAFETY: `ptr`/`len` describe a mapping this buffer exclusively
        // owns; nothing else can be holding the entry pointer past drop
        // because the driver releases all code buffers together on halt
        // (§5).
        unsafe {
            libc::munmap(self.ptr.as_ptr().cast(), self.len);
        }
    }
}

fn round_up_to_page(len: usize) -> usize {
    let page = page_size();
    (len + page - 1) / page * page
}

fn page_size() -> usize {
    // SAFETY: `sysconf` with `_SC_PAGESIZE` has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        4096
    }
}
