//! End-to-end coverage of the JIT execution pipeline through the public
//! `regvm::jit::JitExecutor` API. `CodeBuffer`'s own write/reprotect/unmap
//! lifecycle is unit-tested alongside its implementation; these tests check
//! that a translated segment actually produces the same observable results
//! as the interpreter for the same scenarios (§4.4's "interchangeable"
//! requirement).

#![cfg(feature = "jit")]

use std::collections::VecDeque;

use regvm::jit::JitExecutor;
use regvm::prelude::*;

#[derive(Default)]
struct RecordingIo {
    output: Vec<u8>,
    input: VecDeque<u8>,
}

impl HostIo for RecordingIo {
    fn write_byte(&mut self, byte: u8) -> std::io::Result<()> {
        self.output.push(byte);
        Ok(())
    }

    fn read_byte(&mut self) -> std::io::Result<Word> {
        Ok(self
            .input
            .pop_front()
            .map(|b| b as Word)
            .unwrap_or(regvm::consts::END_OF_STREAM))
    }
}

fn generic(op: u32, a: u32, b: u32, c: u32) -> Word {
    (op << 28) | (a << 6) | (b << 3) | c
}

fn imm(a: u32, value: u32) -> Word {
    (13 << 28) | (a << 25) | (value & 0x01FF_FFFF)
}

#[test]
fn jit_runs_a_halt_only_program() {
    let mut vm = JitExecutor::new(vec![generic(7, 0, 0, 0)], RecordingIo::default()).expect("new");
    vm.run().expect("run");
}

#[test]
fn jit_translates_arithmetic_and_output_correctly() {
    let code = vec![
        imm(0, 65),           // r0 = 65
        imm(2, 1),            // r2 = 1
        generic(3, 1, 0, 2),  // r1 = r0 + r2
        generic(10, 0, 0, 1), // Out r1
        generic(7, 0, 0, 0),  // Halt
    ];
    let mut vm = JitExecutor::new(code, RecordingIo::default()).expect("new");
    vm.run().expect("run");
    assert_eq!(vm.io().output, b"B");
}

#[test]
fn jit_reserved_opcode_is_treated_as_halt() {
    // Opcode 14 is reserved; dispatch treats it as an unconditional halt in
    // both execution strategies (§4.1).
    let reserved = 14u32 << 28;
    let mut vm = JitExecutor::new(vec![reserved], RecordingIo::default()).expect("new");
    vm.run().expect("run");
}

#[test]
fn jit_cmov_copies_only_when_condition_register_is_nonzero() {
    let code = vec![
        imm(0, 1),             // r0 = 1 (destination, pre-seeded with a marker)
        imm(1, 2),             // r1 = 2 (source)
        imm(2, 0),             // r2 = 0 (condition: false)
        generic(0, 0, 1, 2),   // CMov r0 <- r1 if r2 != 0 (should not fire)
        generic(10, 0, 0, 0),  // Out r0
        imm(2, 9),             // r2 = 9 (condition: true)
        generic(0, 0, 1, 2),   // CMov r0 <- r1 if r2 != 0 (should fire)
        generic(10, 0, 0, 0),  // Out r0
        generic(7, 0, 0, 0),   // Halt
    ];
    let mut vm = JitExecutor::new(code, RecordingIo::default()).expect("new");
    vm.run().expect("run");
    assert_eq!(vm.io().output, vec![1, 2]);
}

#[test]
fn jit_cmov_is_correct_when_destination_equals_condition_register() {
    // CMov r3 <- r1 if r3 != 0, with A == C. Per spec.md §8's boundary
    // behavior this must still leave r[A] untouched when the (pre-move)
    // condition is zero, and must not let the trampoline-free emitter
    // clobber the condition register before it's tested.
    let code = vec![
        imm(1, 0x41),         // r1 = 'A' (source)
        imm(3, 0),            // r3 = 0 (condition/destination, false)
        generic(0, 3, 1, 3),  // CMov r3 <- r1 if r3 != 0 (no-op)
        generic(10, 0, 0, 3), // Out r3 (still 0)
        imm(3, 5),            // r3 = 5 (condition/destination, true)
        generic(0, 3, 1, 3),  // CMov r3 <- r1 if r3 != 0 (fires)
        generic(10, 0, 0, 3), // Out r3 (now 'A')
        generic(7, 0, 0, 0),  // Halt
    ];
    let mut vm = JitExecutor::new(code, RecordingIo::default()).expect("new");
    vm.run().expect("run");
    assert_eq!(vm.io().output, vec![0, 0x41]);
}

#[test]
fn jit_segment_table_trampolines_round_trip() {
    let code = vec![
        imm(1, 1),            // r1 = 1 (segment size)
        generic(8, 0, 2, 1),  // r2 = map(r1)
        imm(0, b'A' as u32),  // r0 = 'A'
        generic(2, 2, 3, 0),  // seg[r2][r3=0] = r0
        generic(1, 4, 2, 3),  // r4 = seg[r2][r3=0]
        generic(10, 0, 0, 4), // Out r4
        generic(9, 0, 0, 2),  // unmap(r2)
        generic(7, 0, 0, 0),  // Halt
    ];
    let mut vm = JitExecutor::new(code, RecordingIo::default()).expect("new");
    vm.run().expect("run");
    assert_eq!(vm.io().output, b"A");
}

#[test]
fn jit_load_program_fast_path_jumps_without_retranslating() {
    // r[B] == 0 ("stay in segment 0") takes the fast path: the PC moves to
    // r[C] without a trampoline call or re-translation (§9's "Load-Program
    // fast path"). A trap `Halt` sits right after the `LoadProg`, so this
    // only passes if the jump actually skips it rather than falling through.
    let code = vec![
        imm(0, b'Z' as u32),  // r0 = 'Z' (value the jumped-to Out will print)
        imm(6, 0),            // r6 = 0 (segment operand: stay in segment 0)
        imm(7, 5),            // r7 = 5 (jump target: the Out instruction below)
        generic(12, 0, 6, 7), // LoadProg segment=r6(=0), pc=r7(=5)
        generic(7, 0, 0, 0),  // Halt (trap: only reached if the jump misfires)
        generic(10, 0, 0, 0), // Out r0
        generic(7, 0, 0, 0),  // Halt
    ];
    let mut vm = JitExecutor::new(code, RecordingIo::default()).expect("new");
    vm.run().expect("run");
    assert_eq!(vm.io().output, b"Z");
}

#[test]
fn jit_load_program_retranslates_and_resumes_at_the_target_pc() {
    // Builds a 2-word replacement segment — [Out r0, Halt] — writes it into
    // a fresh segment, then Load-Programs into it at index 0, exercising
    // the re-translation path (§4.4 "Translation on Load-Program").
    let code = vec![
        imm(5, 2),             // r5 = 2 (replacement segment size)
        generic(8, 0, 6, 5),   // r6 = map(r5)
        imm(7, 0),             // r7 = 0 (write offset)
        imm(0, 0xA000_0000),   // r0 = "Out r0" word
        generic(2, 6, 7, 0),   // seg[r6][0] = r0
        imm(7, 1),             // r7 = 1
        imm(0, 0x7000_0000),   // r0 = Halt word
        generic(2, 6, 7, 0),   // seg[r6][1] = r0
        imm(0, b'!' as u32),   // r0 = '!' (the value the jumped-to Out will print)
        imm(7, 0),             // r7 = 0 (jump target: the Out instruction)
        generic(12, 0, 6, 7),  // LoadProg segment=r6, pc=r7
    ];
    let mut vm = JitExecutor::new(code, RecordingIo::default()).expect("new");
    vm.run().expect("run");
    assert_eq!(vm.io().output, b"!");
}

#[test]
fn jit_add_wraps_at_2_pow_32() {
    // Nand(0, 0) = !0 = 0xFFFF_FFFF without needing a 32-bit-wide Imm.
    // r0 + 1 must then wrap to 0, not carry into bits a later op could
    // observe as still set (§3's "modulo 2^32" wrap rule).
    let code = vec![
        imm(0, 0),            // r0 = 0
        generic(6, 0, 0, 0),  // r0 = Nand(r0, r0) = 0xFFFF_FFFF
        generic(10, 0, 0, 0), // Out r0's low byte: 0xFF
        imm(1, 1),            // r1 = 1
        generic(3, 0, 0, 1),  // r0 = r0 + r1 -> wraps to 0
        generic(10, 0, 0, 0), // Out r0's low byte: 0x00
        generic(7, 0, 0, 0),  // Halt
    ];
    let mut vm = JitExecutor::new(code, RecordingIo::default()).expect("new");
    vm.run().expect("run");
    assert_eq!(vm.io().output, vec![0xFF, 0x00]);
}

#[test]
fn jit_nand_result_is_treated_as_zero_by_a_later_cmov() {
    // Nand(0xFFFF_FFFF, 0xFFFF_FFFF) = 0 exactly; a later CMov gated on
    // that result must treat it as falsy. A 64-bit-width `test`/`cmp`
    // would get this wrong if Nand left garbage set above bit 31.
    let code = vec![
        imm(0, 0),            // r0 = 0
        generic(6, 0, 0, 0),  // r0 = Nand(r0, r0) = 0xFFFF_FFFF
        generic(6, 0, 0, 0),  // r0 = Nand(r0, r0) = 0
        imm(1, 9),            // r1 = 9 (destination, pre-seeded with a marker)
        imm(2, 1),            // r2 = 1 (source CMov would copy on a false positive)
        generic(0, 1, 2, 0),  // CMov r1 <- r2 if r0 != 0 (must not fire: r0 == 0)
        generic(10, 0, 0, 1), // Out r1 (expect 9, unchanged)
        generic(7, 0, 0, 0),  // Halt
    ];
    let mut vm = JitExecutor::new(code, RecordingIo::default()).expect("new");
    vm.run().expect("run");
    assert_eq!(vm.io().output, vec![9]);
}

#[test]
fn jit_in_returns_end_of_stream_low_byte_when_exhausted() {
    // `RecordingIo` starts with no queued input, so `In` immediately hits
    // end-of-stream; the low byte of `u32::MAX` is `0xFF` (§4.1, §7).
    let code = vec![
        generic(11, 0, 0, 0), // In -> r0
        generic(10, 0, 0, 0), // Out r0
        generic(7, 0, 0, 0),  // Halt
    ];
    let mut vm = JitExecutor::new(code, RecordingIo::default()).expect("new");
    vm.run().expect("run");
    assert_eq!(vm.io().output, vec![0xFF]);
}
