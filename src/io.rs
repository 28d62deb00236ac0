//! Host I/O collaborators for the `Out`/`In` opcodes (§4.1, §6).
//!
//! The VM performs unbuffered single-byte operations; this trait exists so
//! the interpreter and the JIT trampoline can share one implementation and
//! so tests can substitute an in-memory double instead of real stdio.

use std::io::{self, Read, Write};

use crate::consts::END_OF_STREAM;
use crate::word::Word;

/// A host byte stream collaborator for `Out`/`In`.
pub trait HostIo {
    /// Writes one byte to the output stream.
    fn write_byte(&mut self, byte: u8) -> io::Result<()>;

    /// Reads one byte from the input stream, zero-extended to a `Word`, or
    /// [`END_OF_STREAM`] once the stream is exhausted.
    fn read_byte(&mut self) -> io::Result<Word>;
}

/// The real host standard streams.
#[derive(Debug, Default)]
pub struct StdIo;

impl HostIo for StdIo {
    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        let mut stdout = io::stdout();
        stdout.write_all(&[byte])?;
        stdout.flush()
    }

    fn read_byte(&mut self) -> io::Result<Word> {
        let mut buf = [0u8; 1];
        match io::stdin().read(&mut buf)? {
            1 => Ok(buf[0] as Word),
            _ => Ok(END_OF_STREAM),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::VecDeque;

    /// An in-memory stand-in for stdio, used by unit and integration tests.
    #[derive(Debug, Default)]
    pub struct BufferIo {
        pub output: Vec<u8>,
        input: VecDeque<u8>,
    }

    impl BufferIo {
        pub fn with_input(input: impl Into<VecDeque<u8>>) -> Self {
            Self {
                output: Vec::new(),
                input: input.into(),
            }
        }
    }

    impl HostIo for BufferIo {
        fn write_byte(&mut self, byte: u8) -> io::Result<()> {
            self.output.push(byte);
            Ok(())
        }

        fn read_byte(&mut self) -> io::Result<Word> {
            Ok(self.input.pop_front().map(|b| b as Word).unwrap_or(END_OF_STREAM))
        }
    }
}
