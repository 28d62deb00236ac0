//! Wires the loader, segment table, and an execution strategy together into
//! a runnable process, and maps the outcome to an exit code (§4.8, §6, §7).

use std::path::PathBuf;

use tracing::{error, info};

use crate::error::{LoaderError, VmFatalError};
use crate::interpreter::Interpreter;
use crate::io::{HostIo, StdIo};
use crate::loader;
use crate::word::Word;

#[cfg(feature = "jit")]
use crate::jit::JitExecutor;

/// Which backend actually executes the decoded program. Both implement the
/// same observable semantics (§3, §4.1); this is an embedding-time choice,
/// not a CLI flag (§4.8's "interchangeable" resolution) — the binary always
/// calls [`ExecutionStrategy::native`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStrategy {
    Interpreter,
    #[cfg(feature = "jit")]
    Jit,
}

impl ExecutionStrategy {
    /// The strategy the binary uses on this host: the JIT on the two
    /// architectures it targets, the interpreter everywhere else.
    pub fn native() -> Self {
        #[cfg(all(feature = "jit", any(target_arch = "x86_64", target_arch = "aarch64")))]
        {
            ExecutionStrategy::Jit
        }
        #[cfg(not(all(feature = "jit", any(target_arch = "x86_64", target_arch = "aarch64"))))]
        {
            ExecutionStrategy::Interpreter
        }
    }
}

/// The process's exit status: `0` on a clean halt, non-zero otherwise (§7).
pub type ExitCode = i32;

const EXIT_OK: ExitCode = 0;
const EXIT_FAILURE: ExitCode = 1;

/// Errors that can end the process before a single VM instruction runs.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error(transparent)]
    Loader(#[from] LoaderError),
    #[error(transparent)]
    VmFatal(#[from] VmFatalError),
}

/// Runs `argv` end to end: parses the single positional argument, loads the
/// image, drives it to completion with [`ExecutionStrategy::native`], and
/// returns the process exit code. Diagnostics go to `tracing`'s `error`
/// target; the binary's `main` is responsible for initializing a subscriber.
pub fn run<I: IntoIterator<Item = String>>(argv: I) -> ExitCode {
    match run_inner(argv) {
        Ok(()) => EXIT_OK,
        Err(err) => {
            error!("{err}");
            EXIT_FAILURE
        }
    }
}

fn run_inner<I: IntoIterator<Item = String>>(argv: I) -> Result<(), DriverError> {
    let path = loader::parse_args(argv)?;
    let code = loader::load_image(&path)?;
    info!(path = %path.display(), words = code.len(), "loaded program image");

    run_image(code, path, StdIo)
}

fn run_image(code: Vec<Word>, path: PathBuf, io: impl HostIo) -> Result<(), DriverError> {
    match ExecutionStrategy::native() {
        ExecutionStrategy::Interpreter => {
            info!(strategy = "interpreter", path = %path.display(), "starting run");
            let mut vm = Interpreter::new(code, io);
            vm.run()?;
            Ok(())
        }
        #[cfg(feature = "jit")]
        ExecutionStrategy::Jit => {
            info!(strategy = "jit", path = %path.display(), "starting run");
            let mut vm = JitExecutor::new(code, io)?;
            vm.run()?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::test_support::BufferIo;

    #[test]
    fn run_image_halts_cleanly() {
        let result = run_image(vec![0x7000_0000], PathBuf::from("<test>"), BufferIo::default());
        assert!(result.is_ok());
    }

    #[test]
    fn run_image_runs_a_multi_instruction_program_to_completion() {
        // Imm r2='H'; Out r2; Halt
        let code = vec![0xD400_0048, 0xA000_0002, 0x7000_0000];
        run_image(code, PathBuf::from("<test>"), BufferIo::default()).expect("run");
    }
}
