//! The opcode dispatch table (§4.1).
//!
//! One `match` arm per opcode. Every arm but `Halt`, the two reserved
//! opcodes, and `LoadProg` ends by advancing the program counter by one;
//! `LoadProg` assigns it directly and `Halt`/reserved stop the loop.

use tracing::trace;

use super::{ExecuteState, Interpreter};
use crate::error::VmFatalError;
use crate::instruction::{Instruction, Opcode};
use crate::io::HostIo;

impl<IO> Interpreter<IO>
where
    IO: HostIo,
{
    pub(super) fn dispatch(&mut self, instruction: Instruction) -> Result<ExecuteState, VmFatalError> {
        let Instruction {
            opcode,
            a,
            b,
            c,
            immediate,
        } = instruction;

        match opcode {
            Opcode::CMov => {
                if self.registers[c] != 0 {
                    self.registers[a] = self.registers[b];
                }
                self.inc_pc();
                Ok(ExecuteState::Proceed)
            }
            Opcode::SegLoad => {
                let word = self
                    .segments
                    .read(self.registers[b], self.registers[c] as usize);
                self.registers[a] = word;
                self.inc_pc();
                Ok(ExecuteState::Proceed)
            }
            Opcode::SegStore => {
                self.segments.write(
                    self.registers[a],
                    self.registers[b] as usize,
                    self.registers[c],
                );
                self.inc_pc();
                Ok(ExecuteState::Proceed)
            }
            Opcode::Add => {
                self.registers[a] = Self::alu_add(self.registers[b], self.registers[c]);
                self.inc_pc();
                Ok(ExecuteState::Proceed)
            }
            Opcode::Mul => {
                self.registers[a] = Self::alu_mul(self.registers[b], self.registers[c]);
                self.inc_pc();
                Ok(ExecuteState::Proceed)
            }
            Opcode::Div => {
                self.registers[a] = Self::alu_div(self.registers[b], self.registers[c]);
                self.inc_pc();
                Ok(ExecuteState::Proceed)
            }
            Opcode::Nand => {
                self.registers[a] = Self::alu_nand(self.registers[b], self.registers[c]);
                self.inc_pc();
                Ok(ExecuteState::Proceed)
            }
            Opcode::Halt => Ok(ExecuteState::Halt),
            Opcode::Map => {
                let id = self.segments.map(self.registers[c] as usize)?;
                self.registers[b] = id;
                self.inc_pc();
                Ok(ExecuteState::Proceed)
            }
            Opcode::Unmap => {
                self.segments.unmap(self.registers[c]);
                self.inc_pc();
                Ok(ExecuteState::Proceed)
            }
            Opcode::Out => {
                let byte = self.registers[c] as u8;
                self.io
                    .write_byte(byte)
                    .expect("host output stream failure");
                self.inc_pc();
                Ok(ExecuteState::Proceed)
            }
            Opcode::In => {
                let word = self.io.read_byte().expect("host input stream failure");
                self.registers[c] = word;
                self.inc_pc();
                Ok(ExecuteState::Proceed)
            }
            Opcode::LoadProg => {
                self.segments.load(self.registers[b]);
                self.pc = self.registers[c];
                trace!(pc = self.pc, "load-program jump");
                Ok(ExecuteState::Proceed)
            }
            Opcode::Imm => {
                self.registers[a] = immediate;
                self.inc_pc();
                Ok(ExecuteState::Proceed)
            }
            Opcode::Reserved14 | Opcode::Reserved15 => Ok(ExecuteState::Halt),
        }
    }
}
