//! Direct-threaded interpreter: fetch, decode, dispatch, advance PC (§4.3).

mod alu;
mod dispatch;

use tracing::trace;

use crate::consts::{vm_debug_assert, CODE_SEGMENT};
use crate::error::VmFatalError;
use crate::io::HostIo;
use crate::registers::RegisterFile;
use crate::segment::SegmentTable;
use crate::word::Word;

/// What happened after executing one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExecuteState {
    /// Keep running; PC has already been advanced appropriately.
    Proceed,
    /// A halt instruction (7, or the reserved 14/15) retired.
    Halt,
}

/// The interpreter's view of VM state: registers, segment table, program
/// counter, and the host I/O collaborator for `Out`/`In`.
pub struct Interpreter<IO> {
    registers: RegisterFile,
    segments: SegmentTable,
    pc: Word,
    io: IO,
}

impl<IO> Interpreter<IO>
where
    IO: HostIo,
{
    /// Builds an interpreter whose segment 0 is `code`, PC at 0.
    pub fn new(code: Vec<Word>, io: IO) -> Self {
        Self {
            registers: RegisterFile::new(),
            segments: SegmentTable::new(code),
            pc: 0,
            io,
        }
    }

    /// Runs until a halt instruction retires.
    ///
    /// # Errors
    ///
    /// Returns [`VmFatalError`] if a `Map` can't grow the segment table
    /// because the host refused the allocation (§7).
    pub fn run(&mut self) -> Result<(), VmFatalError> {
        loop {
            vm_debug_assert!(
                (self.pc as usize) < self.segments.len(CODE_SEGMENT),
                "program counter ran off the end of segment 0"
            );

            let word = self.segments.read(CODE_SEGMENT, self.pc as usize);
            let instruction = crate::instruction::Instruction::decode(word);

            match self.dispatch(instruction)? {
                ExecuteState::Proceed => {}
                ExecuteState::Halt => {
                    trace!(pc = self.pc, "halt");
                    return Ok(());
                }
            }
        }
    }

    pub fn registers(&self) -> &[Word] {
        self.registers.as_slice()
    }

    pub fn pc(&self) -> Word {
        self.pc
    }

    pub fn io(&self) -> &IO {
        &self.io
    }

    pub fn io_mut(&mut self) -> &mut IO {
        &mut self.io
    }

    fn inc_pc(&mut self) {
        self.pc = self.pc.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::test_support::BufferIo;

    fn run(code: Vec<Word>) -> Interpreter<BufferIo> {
        let mut vm = Interpreter::new(code, BufferIo::default());
        vm.run().expect("run");
        vm
    }

    #[test]
    fn halt_exits_immediately() {
        let vm = run(vec![0x7000_0000]);
        assert_eq!(vm.pc(), 0);
    }

    #[test]
    fn hello_byte() {
        // Imm r2 = 'H' (0x48); Out r2; Halt
        let vm = run(vec![0xD400_0048, 0xA000_0002, 0x7000_0000]);
        assert_eq!(vm.io().output, b"H");
    }

    #[test]
    fn add_and_print() {
        // Imm r0=65; Imm r2=1; Add r1 = r0 + r2; Out r1; Halt
        let vm = run(vec![
            0xD000_0041,
            0xD400_0001,
            0x3000_0042,
            0xA000_0001,
            0x7000_0000,
        ]);
        assert_eq!(vm.io().output, b"B");
    }

    #[test]
    fn map_and_store() {
        // Imm r1=1; Map r2<-map(r1); Imm r0=65; SegStore seg[r2][r3]=r0 (r3 still 0);
        // SegLoad r4<-seg[r2][r3]; Out r4; Halt
        let vm = run(vec![
            0xD200_0001,
            0x8000_0011,
            0xD000_0041,
            0x2000_0098,
            0x1000_0113,
            0xA000_0004,
            0x7000_0000,
        ]);
        assert_eq!(vm.io().output, b"A");
    }
}
