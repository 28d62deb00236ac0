//! AArch64 instruction selection.
//!
//! VM registers 0..7 are pinned to `x19..x26` (`w19..w26` for 32-bit views);
//! the VM context pointer lives in `x27`. All of `x19..x28` are callee-saved
//! under AAPCS64, so — unlike x86-64 — a trampoline call preserves every
//! pinned register without this crate having to spill anything by hand.
//!
//! Every instruction that writes a VM-pinned register is encoded with
//! `sf = 0` (the 32-bit `Wn` form), never the 64-bit `Xn` form: VM words are
//! 32 bits wide, and a 32-bit write on AArch64 always zeroes the upper 32
//! bits of the underlying 64-bit register for free, same as x86-64. That
//! keeps every pinned register holding a "clean" zero-extended word between
//! instructions — load-bearing since `Add`/`Mul` wrap at 2^32 and `CMov`
//! branches on whether r[C] is exactly zero. The one deliberate exception is
//! the VM context pointer, a real 64-bit address moved with the `Xn` form.

use crate::consts::CHUNK;
use crate::jit::trampoline::NEXT_PC_OFFSET;
use crate::word::Word;

use super::{Emitter, Operands, SlotOutcome, TrampolineTable};

/// `x19..x26` (`w19..w26` in 32-bit views), as raw register numbers.
const VM_REG: [u32; 8] = [19, 20, 21, 22, 23, 24, 25, 26];
const CTX_REG: u32 = 27;
const LINK_SCRATCH: u32 = 16; // x16/ip0: intra-procedure-call scratch.
const ADDR_SCRATCH: u32 = 17; // x17/ip1: intra-procedure-call scratch.
const ZERO_REG: u32 = 31; // xzr/wzr in most encodings at this position.

fn push_word(out: &mut Vec<u8>, word: u32) {
    out.extend_from_slice(&word.to_le_bytes());
}

fn fill_nop(slot: &mut [u8; CHUNK], used: usize) {
    debug_assert!(used <= CHUNK, "emitter overran its CHUNK-byte slot");
    debug_assert_eq!(used % 4, 0, "AArch64 instructions are 4 bytes wide");
    const NOP: u32 = 0xD503201F;
    let mut offset = used;
    while offset < CHUNK {
        slot[offset..offset + 4].copy_from_slice(&NOP.to_le_bytes());
        offset += 4;
    }
}

/// `ADD Wd, Wn, Wm` (32-bit, no shift) — wraps mod 2^32, zero-extends `Xd`.
fn add32(out: &mut Vec<u8>, d: u32, n: u32, m: u32) {
    push_word(out, 0x0B00_0000 | (m << 16) | (n << 5) | d);
}

/// `MADD Wd, Wn, Wm, WZR` i.e. `MUL Wd, Wn, Wm` (32-bit).
fn mul32(out: &mut Vec<u8>, d: u32, n: u32, m: u32) {
    push_word(out, 0x1B00_7C00 | (m << 16) | (n << 5) | d);
}

/// `UDIV Wd, Wn, Wm` (32-bit).
fn udiv32(out: &mut Vec<u8>, d: u32, n: u32, m: u32) {
    push_word(out, 0x1AC0_0800 | (m << 16) | (n << 5) | d);
}

/// `AND Wd, Wn, Wm` (32-bit).
fn and32(out: &mut Vec<u8>, d: u32, n: u32, m: u32) {
    push_word(out, 0x0A00_0000 | (m << 16) | (n << 5) | d);
}

/// `ORN Wd, WZR, Wm` i.e. `MVN Wd, Wm` (32-bit, bitwise NOT).
fn mvn32(out: &mut Vec<u8>, d: u32, m: u32) {
    push_word(out, 0x2A20_03E0 | (m << 16) | d);
}

/// `ORR Xd, XZR, Xm` i.e. `MOV Xd, Xm` (64-bit) — used only to shuttle the
/// real 64-bit VM context pointer into an argument register.
fn mov_reg64(out: &mut Vec<u8>, d: u32, m: u32) {
    push_word(out, 0xAA00_03E0 | (m << 16) | d);
}

/// `ORR Wd, WZR, Wm` i.e. `MOV Wd, Wm` (32-bit, zero-extending). Used for
/// every VM-register-to-register copy.
fn mov_reg32(out: &mut Vec<u8>, d: u32, m: u32) {
    push_word(out, 0x2A00_03E0 | (m << 16) | d);
}

/// `SUBS WZR, Wn, #0` i.e. `CMP Wn, #0` (32-bit) — sets flags from `Wn`'s
/// low 32 bits without writing a result register.
fn cmp_zero32(out: &mut Vec<u8>, n: u32) {
    push_word(out, 0x7100_0000 | (n << 5) | ZERO_REG);
}

/// `CSEL Wd, Wn, Wm, cond` (32-bit) — `Wd <- cond ? Wn : Wm`, zero-extending.
fn csel32(out: &mut Vec<u8>, d: u32, n_true: u32, m_false: u32, cond: u32) {
    push_word(out, 0x1A80_0000 | (m_false << 16) | (cond << 12) | (n_true << 5) | d);
}

/// `NE` condition code, for `CSEL`.
const COND_NE: u32 = 0b0001;

/// `MOVZ Xd, #imm16`, then `MOVK Xd, #imm16, LSL #16` for values needing the
/// upper half. Both already zero the bits they don't set on a 64-bit
/// destination, so a pinned register seeded this way starts out clean.
fn mov_imm32(out: &mut Vec<u8>, d: u32, imm: u32) {
    let lo = imm & 0xFFFF;
    let hi = imm >> 16;
    push_word(out, 0xD280_0000 | (lo << 5) | d); // MOVZ Xd, #lo
    if hi != 0 {
        push_word(out, 0xF2A0_0000 | (hi << 5) | d); // MOVK Xd, #hi, LSL #16
    }
}

/// `RET`.
fn ret(out: &mut Vec<u8>) {
    push_word(out, 0xD65F_03C0);
}

/// `LDR Xt, [Xn]` (64-bit, unsigned offset #0).
fn ldr64_imm0(out: &mut Vec<u8>, t: u32, n: u32) {
    push_word(out, 0xF940_0000 | (n << 5) | t);
}

/// `LDR Wt, [Xn]` (32-bit, zero-extending, unsigned offset #0).
fn ldr32_imm0(out: &mut Vec<u8>, t: u32, n: u32) {
    push_word(out, 0xB940_0000 | (n << 5) | t);
}

/// `STR Wt, [Xn]` (32-bit, unsigned offset #0).
fn str32_imm0(out: &mut Vec<u8>, n: u32, t: u32) {
    push_word(out, 0xB900_0000 | (n << 5) | t);
}

/// `STR Wt, [Xn, #imm]` (32-bit, unsigned offset scaled by 4).
fn str32_imm(out: &mut Vec<u8>, n: u32, imm_bytes: usize, t: u32) {
    debug_assert_eq!(imm_bytes % 4, 0, "STR (unsigned offset) needs a 4-byte-aligned displacement");
    let imm12 = (imm_bytes / 4) as u32;
    push_word(out, 0xB900_0000 | (imm12 << 10) | (n << 5) | t);
}

/// `ADD Xd, Xn, Xm, LSL #shift` (64-bit shifted register) — combines a
/// register index's word/pointer-size scaling with the base-pointer add in
/// one instruction.
fn add64_shifted(out: &mut Vec<u8>, d: u32, n: u32, m: u32, shift: u32) {
    push_word(out, 0x8B00_0000 | (m << 16) | (shift << 10) | (n << 5) | d);
}

/// `CBNZ Wt, label` (32-bit) — branches if `Wt != 0`. `imm19` is the
/// displacement in instructions (words), from this instruction to the
/// target, as AArch64's PC-relative immediates always are.
fn cbnz32(out: &mut Vec<u8>, t: u32, imm19: u32) {
    push_word(out, 0x3500_0000 | (imm19 << 5) | t);
}

/// Loads a 64-bit absolute address into `x16` (four `MOVZ`/`MOVK`s) and
/// branches with link.
fn call_absolute(out: &mut Vec<u8>, target: usize) {
    let target = target as u64;
    push_word(out, 0xD280_0000 | (((target & 0xFFFF) as u32) << 5) | LINK_SCRATCH);
    push_word(out, 0xF2A0_0000 | ((((target >> 16) & 0xFFFF) as u32) << 5) | LINK_SCRATCH);
    push_word(out, 0xF2C0_0000 | ((((target >> 32) & 0xFFFF) as u32) << 5) | LINK_SCRATCH);
    push_word(out, 0xF2E0_0000 | ((((target >> 48) & 0xFFFF) as u32) << 5) | LINK_SCRATCH);
    push_word(out, 0xD63F_0000 | (LINK_SCRATCH << 5)); // blr x16
}

/// Argument registers under AAPCS64, in order: x0, x1, x2. Three is the
/// most any trampoline call needs: the context pointer plus `Load-Program`'s
/// two register operands (`b`, `c`) — `Seg-Load`/`Seg-Store` never reach a
/// trampoline at all, they're inlined.
const ARG_REGS: [u32; 3] = [0, 1, 2];

pub(crate) struct Aarch64;

impl Aarch64 {
    fn emit_trampoline_call(out: &mut Vec<u8>, target: usize, arg_vm_regs: &[usize], dest: Option<usize>) {
        mov_reg64(out, ARG_REGS[0], CTX_REG);
        for (slot, &vm_reg) in arg_vm_regs.iter().enumerate() {
            mov_reg32(out, ARG_REGS[slot + 1], VM_REG[vm_reg]);
        }
        call_absolute(out, target);
        if let Some(dest) = dest {
            mov_reg32(out, VM_REG[dest], 0 /* x0 */);
        }
    }
}

impl Emitter for Aarch64 {
    fn emit_cmov(slot: &mut [u8; CHUNK], ops: Operands) {
        let mut out = Vec::with_capacity(CHUNK);
        // `cmp c, #0; csel a, b, a, ne` — branch-free conditional move.
        // Both CSEL operands are read before `Wa` is written, so this is
        // correct even when `a == c`.
        cmp_zero32(&mut out, VM_REG[ops.c]);
        csel32(&mut out, VM_REG[ops.a], VM_REG[ops.b], VM_REG[ops.a], COND_NE);
        slot[..out.len()].copy_from_slice(&out);
        fill_nop(slot, out.len());
    }

    fn emit_add(slot: &mut [u8; CHUNK], ops: Operands) {
        let mut out = Vec::with_capacity(CHUNK);
        add32(&mut out, VM_REG[ops.a], VM_REG[ops.b], VM_REG[ops.c]);
        slot[..out.len()].copy_from_slice(&out);
        fill_nop(slot, out.len());
    }

    fn emit_mul(slot: &mut [u8; CHUNK], ops: Operands) {
        let mut out = Vec::with_capacity(CHUNK);
        mul32(&mut out, VM_REG[ops.a], VM_REG[ops.b], VM_REG[ops.c]);
        slot[..out.len()].copy_from_slice(&out);
        fill_nop(slot, out.len());
    }

    fn emit_div(slot: &mut [u8; CHUNK], ops: Operands) {
        let mut out = Vec::with_capacity(CHUNK);
        udiv32(&mut out, VM_REG[ops.a], VM_REG[ops.b], VM_REG[ops.c]);
        slot[..out.len()].copy_from_slice(&out);
        fill_nop(slot, out.len());
    }

    fn emit_nand(slot: &mut [u8; CHUNK], ops: Operands) {
        let mut out = Vec::with_capacity(CHUNK);
        and32(&mut out, VM_REG[ops.a], VM_REG[ops.b], VM_REG[ops.c]);
        mvn32(&mut out, VM_REG[ops.a], VM_REG[ops.a]);
        slot[..out.len()].copy_from_slice(&out);
        fill_nop(slot, out.len());
    }

    fn emit_imm(slot: &mut [u8; CHUNK], ops: Operands) {
        let mut out = Vec::with_capacity(CHUNK);
        mov_imm32(&mut out, VM_REG[ops.a], ops.immediate);
        slot[..out.len()].copy_from_slice(&out);
        fill_nop(slot, out.len());
    }

    fn emit_halt(slot: &mut [u8; CHUNK]) {
        let mut out = Vec::with_capacity(CHUNK);
        mov_imm32(&mut out, 0 /* x0 */, 0); // SlotOutcome::Halt
        ret(&mut out);
        slot[..out.len()].copy_from_slice(&out);
        fill_nop(slot, out.len());
    }

    fn emit_seg_load(slot: &mut [u8; CHUNK], ops: Operands) {
        // Two pointer indirections off `x27`, the context pointer: first to
        // the segment table's flat `slots_base` array (indexed by r[B]),
        // then to the indexed segment's own word array (indexed by r[C]).
        let mut out = Vec::with_capacity(CHUNK);
        ldr64_imm0(&mut out, ADDR_SCRATCH, CTX_REG); // x17 = slots_base
        add64_shifted(&mut out, ADDR_SCRATCH, ADDR_SCRATCH, VM_REG[ops.b], 3); // &slots_base[r[B]]
        ldr64_imm0(&mut out, ADDR_SCRATCH, ADDR_SCRATCH); // x17 = slots_base[r[B]] (segment base)
        add64_shifted(&mut out, ADDR_SCRATCH, ADDR_SCRATCH, VM_REG[ops.c], 2); // &segment_base[r[C]]
        ldr32_imm0(&mut out, VM_REG[ops.a], ADDR_SCRATCH);
        slot[..out.len()].copy_from_slice(&out);
        fill_nop(slot, out.len());
    }

    fn emit_seg_store(slot: &mut [u8; CHUNK], ops: Operands) {
        let mut out = Vec::with_capacity(CHUNK);
        ldr64_imm0(&mut out, ADDR_SCRATCH, CTX_REG); // x17 = slots_base
        add64_shifted(&mut out, ADDR_SCRATCH, ADDR_SCRATCH, VM_REG[ops.a], 3); // &slots_base[r[A]]
        ldr64_imm0(&mut out, ADDR_SCRATCH, ADDR_SCRATCH); // x17 = slots_base[r[A]] (segment base)
        add64_shifted(&mut out, ADDR_SCRATCH, ADDR_SCRATCH, VM_REG[ops.b], 2); // &segment_base[r[B]]
        str32_imm0(&mut out, ADDR_SCRATCH, VM_REG[ops.c]);
        slot[..out.len()].copy_from_slice(&out);
        fill_nop(slot, out.len());
    }

    fn emit_map(slot: &mut [u8; CHUNK], ops: Operands, trampolines: &TrampolineTable) {
        let mut out = Vec::with_capacity(CHUNK);
        Aarch64::emit_trampoline_call(&mut out, trampolines.map, &[ops.c], Some(ops.b));
        slot[..out.len()].copy_from_slice(&out);
        fill_nop(slot, out.len());
    }

    fn emit_unmap(slot: &mut [u8; CHUNK], ops: Operands, trampolines: &TrampolineTable) {
        let mut out = Vec::with_capacity(CHUNK);
        Aarch64::emit_trampoline_call(&mut out, trampolines.unmap, &[ops.c], None);
        slot[..out.len()].copy_from_slice(&out);
        fill_nop(slot, out.len());
    }

    fn emit_out(slot: &mut [u8; CHUNK], ops: Operands, trampolines: &TrampolineTable) {
        let mut out = Vec::with_capacity(CHUNK);
        Aarch64::emit_trampoline_call(&mut out, trampolines.out, &[ops.c], None);
        slot[..out.len()].copy_from_slice(&out);
        fill_nop(slot, out.len());
    }

    fn emit_in(slot: &mut [u8; CHUNK], ops: Operands, trampolines: &TrampolineTable) {
        let mut out = Vec::with_capacity(CHUNK);
        Aarch64::emit_trampoline_call(&mut out, trampolines.input, &[], Some(ops.c));
        slot[..out.len()].copy_from_slice(&out);
        fill_nop(slot, out.len());
    }

    fn emit_load_program(slot: &mut [u8; CHUNK], ops: Operands, trampolines: &TrampolineTable) {
        // r[B] == 0 is a pure jump within segment 0 (§9's fast path): the
        // target PC is computed and returned without a trampoline call or
        // re-translation. r[B] != 0 needs the trampoline to copy the new
        // segment into segment 0 first, so the driver loop re-translates.
        let mut out = Vec::with_capacity(CHUNK);
        let cbnz_at = out.len();
        cbnz32(&mut out, VM_REG[ops.b], 0); // patched below once the slow path's offset is known

        // Fast path: ctx.core.next_pc = r[C]; return SlotOutcome::Jump.
        str32_imm(&mut out, CTX_REG, NEXT_PC_OFFSET, VM_REG[ops.c]);
        mov_imm32(&mut out, 0 /* x0 */, SlotOutcome::Jump as u32);
        ret(&mut out);

        let slow_path_at = out.len();
        let imm19 = ((slow_path_at - cbnz_at) / 4) as u32;
        let patched = 0x3500_0000 | (imm19 << 5) | VM_REG[ops.b];
        out[cbnz_at..cbnz_at + 4].copy_from_slice(&patched.to_le_bytes());

        // Slow path: trampoline copies segment r[B] into segment 0 and sets
        // next_pc = r[C]; return SlotOutcome::Reload.
        Aarch64::emit_trampoline_call(&mut out, trampolines.load_program, &[ops.b, ops.c], None);
        mov_imm32(&mut out, 0 /* x0 */, SlotOutcome::Reload as u32);
        ret(&mut out);

        slot[..out.len()].copy_from_slice(&out);
        fill_nop(slot, out.len());
    }
}
