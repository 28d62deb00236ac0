//! `regvm` — a runtime for a minimal 32-bit register virtual machine.
//!
//! The VM has eight general-purpose 32-bit registers, a segmented word-addressed
//! memory model, and sixteen opcodes (two of which are reserved and behave as a
//! halt). Two execution strategies share the same semantics: [`interpreter`]
//! walks the decoded instruction stream directly, and [`jit`] translates a
//! segment into native machine code ahead of running it. Both are driven
//! through [`driver::run`].

pub mod consts;
pub mod driver;
pub mod error;
pub mod instruction;
pub mod interpreter;
pub mod io;
pub mod loader;
pub mod registers;
pub mod segment;
pub mod word;

#[cfg(feature = "jit")]
pub mod jit;

pub mod prelude {
    pub use crate::consts::*;
    pub use crate::driver::{ExecutionStrategy, ExitCode};
    pub use crate::error::{LoaderError, VmFatalError};
    pub use crate::instruction::{Instruction, Opcode};
    pub use crate::interpreter::Interpreter;
    pub use crate::io::{HostIo, StdIo};
    pub use crate::registers::RegisterFile;
    pub use crate::segment::{SegmentId, SegmentTable};
    pub use crate::word::Word;
}
