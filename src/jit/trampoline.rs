//! Runtime helper functions emitted code calls out to for anything that
//! isn't a pure register-to-register operation (§4.5).
//!
//! Translated code calls these directly by absolute address — the simpler of
//! the two dispatch options spec.md §4.5 allows, at the cost of one
//! indirection-free call per Map/Unmap/Out/In/Load-Program. Seg-Load and
//! Seg-Store are *not* here: spec.md §4.4 calls for those two to be inlined
//! as a pair of pointer indirections directly in the emitted code instead
//! (see `jit/emit/{x86_64,aarch64}.rs`), so they never cross this boundary.
//! The VM context pointer travels in a host register reserved at JIT entry
//! and never reassigned by emitted code (spec.md §9, "Global state").

use tracing::{error, trace};

use crate::io::HostIo;
use crate::segment::SegmentTable;
use crate::word::Word;

/// The non-generic core of [`JitContext`]: the segment table, whose
/// `slots_base` pointer the emitters read directly off the context pointer
/// at offset 0 (since `core` is `JitContext`'s first field too), and
/// `next_pc`, the shared PC-handoff channel written either by the
/// [`load_program`] trampoline (the slow path, r[B] != 0) or inline by the
/// Load-Program emitter's fast path (r[B] == 0). Kept separate from `io`
/// so `NEXT_PC_OFFSET` is a plain constant, independent of the concrete
/// `IO` type — no `IO: Sized`-flavored layout surprises to account for.
#[repr(C)]
pub(crate) struct JitCore {
    pub segments: SegmentTable,
    pub next_pc: Word,
}

/// The byte offset of `next_pc` within [`JitCore`] — and, because `core` is
/// `JitContext`'s first `#[repr(C)]` field, within `JitContext<IO>` too,
/// for any `IO`. The Load-Program fast path hardcodes this as a store
/// displacement; the slow path's trampoline writes the same field from
/// ordinary Rust.
pub(crate) const NEXT_PC_OFFSET: usize = std::mem::offset_of!(JitCore, next_pc);

/// Everything translated code needs to reach through the context pointer:
/// the non-generic [`JitCore`] (segment table, next-pc handoff) and the host
/// I/O collaborator. Registers are not part of this context — they live
/// pinned in host registers for the whole run and are passed as explicit
/// call arguments instead. `#[repr(C)]` and `core` first guarantees `core`
/// — and therefore `core.segments.slots_base` — sits at offset 0 regardless
/// of `IO`'s layout.
#[repr(C)]
pub(crate) struct JitContext<IO> {
    pub core: JitCore,
    pub io: IO,
}

impl<IO> JitContext<IO>
where
    IO: HostIo,
{
    pub fn new(segments: SegmentTable, io: IO) -> Self {
        Self {
            core: JitCore { segments, next_pc: 0 },
            io,
        }
    }
}

/// `extern "C" fn(ctx, c) -> word`: maps a fresh segment of `c` words and
/// returns its identifier.
///
/// Host allocation failure here is fatal (§7) but this call can't return a
/// `Result` across the emitted-code boundary; the only Rust-side recourse
/// is to report it and stop the process, matching §7's "fatal: print
/// diagnostic, exit non-zero" for the one trampoline that can actually fail.
pub(crate) extern "C" fn map<IO: HostIo>(ctx: *mut JitContext<IO>, c: Word) -> Word {
    let ctx = unsafe { &mut *ctx };
    match ctx.core.segments.map(c as usize) {
        Ok(id) => id,
        Err(err) => {
            error!("{err}");
            std::process::exit(1);
        }
    }
}

/// `extern "C" fn(ctx, c)`: unmaps segment `c`.
pub(crate) extern "C" fn unmap<IO: HostIo>(ctx: *mut JitContext<IO>, c: Word) {
    let ctx = unsafe { &mut *ctx };
    ctx.core.segments.unmap(c);
}

/// `extern "C" fn(ctx, c)`: writes the low byte of `c` to host output.
pub(crate) extern "C" fn out<IO: HostIo>(ctx: *mut JitContext<IO>, c: Word) {
    let ctx = unsafe { &mut *ctx };
    ctx.io
        .write_byte(c as u8)
        .expect("host output stream failure");
}

/// `extern "C" fn(ctx) -> word`: reads one byte from host input, or
/// [`crate::consts::END_OF_STREAM`].
pub(crate) extern "C" fn input<IO: HostIo>(ctx: *mut JitContext<IO>) -> Word {
    let ctx = unsafe { &mut *ctx };
    ctx.io.read_byte().expect("host input stream failure")
}

/// `extern "C" fn(ctx, b, c)`: Load-Program's slow-path memory half, taken
/// only when r[B] != 0. Copies segment `b` into segment 0 and records `c`
/// as the target program counter; the slot that called this returns
/// [`crate::jit::SlotOutcome::Reload`] to the driver loop, which
/// re-translates the new segment 0 and resumes at `ctx.core.next_pc`
/// (§4.4's "Translation of segment 0 ... on Load-Program"). The r[B] == 0
/// case — a pure jump — never reaches this trampoline; the emitter handles
/// it inline (§9's "Load-Program fast path").
pub(crate) extern "C" fn load_program<IO: HostIo>(ctx: *mut JitContext<IO>, b: Word, c: Word) {
    let ctx = unsafe { &mut *ctx };
    trace!(segment = b, pc = c, "load-program trampoline");
    ctx.core.segments.load(b);
    ctx.core.next_pc = c;
}
