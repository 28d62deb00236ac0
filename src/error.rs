//! Process-level error taxonomy.
//!
//! The VM's instruction semantics (§4.1) never produce a recoverable error at
//! runtime — opcodes 14/15 halt, division by zero traps at the host level,
//! and an `In` past end-of-stream simply yields [`crate::consts::END_OF_STREAM`].
//! The two error families below are the only ways the process driver exits
//! non-zero: a malformed invocation or program image, and exhaustion of a
//! host resource the VM has no recourse for.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while parsing arguments or loading a program image.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// The process was not invoked with exactly one positional argument.
    #[error("usage: regvm <program.bin>")]
    BadUsage,

    /// The program image could not be opened or read.
    #[error("could not read program image {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The image's length is not a positive multiple of four bytes.
    #[error("program image {path:?} has length {len}, which is not a positive multiple of {word_size}")]
    MisalignedImage {
        path: PathBuf,
        len: u64,
        word_size: usize,
    },
}

/// Fatal failures of a host resource the VM depends on.
///
/// These are never expected in ordinary operation; they surface an
/// out-of-memory condition or a host mapping failure that the VM has no way
/// to recover from.
#[derive(Debug, Error)]
pub enum VmFatalError {
    /// A segment could not be allocated or grown.
    #[error("failed to allocate segment of {requested_words} words")]
    SegmentAllocation { requested_words: usize },

    /// The host refused to map or reprotect an executable code page.
    #[error("failed to {operation} executable code page: {source}")]
    CodePage {
        operation: &'static str,
        #[source]
        source: io::Error,
    },
}
