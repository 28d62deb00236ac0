//! The `regvm` command-line entry point (§6): one positional argument, no
//! flags, exit 0 on halt, non-zero with a one-line diagnostic otherwise.

use std::process::ExitCode;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let code = regvm::driver::run(std::env::args());
    ExitCode::from(code as u8)
}
