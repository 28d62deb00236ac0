//! Arithmetic and logic helpers for the interpreter's dispatch table.
//!
//! Kept separate from `dispatch` so the wrapping/truncating semantics for
//! each opcode are named and testable on their own (§4.1).

use super::Interpreter;
use crate::io::HostIo;
use crate::word::Word;

impl<IO> Interpreter<IO>
where
    IO: HostIo,
{
    /// `Add`: 32-bit addition, wrapping on overflow.
    pub(super) fn alu_add(b: Word, c: Word) -> Word {
        b.wrapping_add(c)
    }

    /// `Mul`: 32-bit multiplication, wrapping on overflow.
    pub(super) fn alu_mul(b: Word, c: Word) -> Word {
        b.wrapping_mul(c)
    }

    /// `Div`: truncating unsigned division.
    ///
    /// Division by zero is a host trap, not a VM-level condition (§4.1,
    /// §9's "division by zero" open question) — we let Rust's own panic
    /// on integer division by zero serve as that trap rather than encoding
    /// a VM-visible error path for it.
    pub(super) fn alu_div(b: Word, c: Word) -> Word {
        b / c
    }

    /// `Nand`: bitwise NAND.
    pub(super) fn alu_nand(b: Word, c: Word) -> Word {
        !(b & c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::test_support::BufferIo;

    type Vm = Interpreter<BufferIo>;

    #[test]
    fn add_wraps() {
        assert_eq!(Vm::alu_add(u32::MAX, 1), 0);
    }

    #[test]
    fn mul_wraps() {
        assert_eq!(Vm::alu_mul(u32::MAX, 2), u32::MAX.wrapping_mul(2));
    }

    #[test]
    fn div_truncates() {
        assert_eq!(Vm::alu_div(7, 2), 3);
    }

    #[test]
    #[should_panic]
    fn div_by_zero_traps() {
        Vm::alu_div(1, 0);
    }

    #[test]
    fn nand_is_bitwise() {
        assert_eq!(Vm::alu_nand(0b1100, 0b1010), !(0b1100 & 0b1010));
    }
}
