//! x86-64 instruction selection.
//!
//! VM registers 0..7 are pinned to `r8..r15`; the VM context pointer lives
//! in `rbx` for the whole translated segment (both are System V callee-saved,
//! chosen so a trampoline call never has to spill them across the call
//! boundary on our own account). `r8..r11` are caller-saved under the System
//! V ABI, so any trampoline call first pushes the ones still needed after
//! the call and pops them back before falling through to the next slot.
//!
//! Every instruction that writes a VM-pinned register uses 32-bit operand
//! width (no `REX.W`), never 64-bit: VM words are 32 bits wide, and writing
//! a 32-bit destination on x86-64 always zero-extends the upper 32 bits of
//! the underlying 64-bit register for free. That keeps every pinned register
//! holding a "clean" zero-extended word between instructions, which matters
//! because `Add`/`Mul` are specified to wrap at 2^32 and `CMov` branches on
//! whether r[C] is exactly zero — a stray set bit above bit 31, left behind
//! by a 64-bit-width op, would silently break both. The one deliberate
//! exception is the VM context pointer, which is a real 64-bit address and
//! is moved with full 64-bit width.

use crate::consts::CHUNK;
use crate::jit::trampoline::NEXT_PC_OFFSET;
use crate::word::Word;

use super::{Emitter, Operands, SlotOutcome, TrampolineTable};

/// Host register encodings for VM registers 0..7 (`r8..r15`), as raw
/// physical register numbers. Every helper below masks to the low 3 bits
/// for the ModRM/SIB field and tests `>= 8` to decide whether the REX.B/
/// REX.R extension bit these all require (being `r8`+) needs to be set.
const VM_REG: [u8; 8] = [8, 9, 10, 11, 12, 13, 14, 15];

const RBX: u8 = 3; // VM context pointer.
const RAX: u8 = 0; // Scratch, also the return-value register.
const RCX: u8 = 1; // Scratch.
const NOP: u8 = 0x90;
const RET: u8 = 0xC3;

fn fill_nop(slot: &mut [u8; CHUNK], used: usize) {
    debug_assert!(used <= CHUNK, "emitter overran its CHUNK-byte slot");
    slot[used..].fill(NOP);
}

/// `REX.W` (64-bit operand) with optional R/X/B extension bits for regs
/// `>= r8`. Reserved for the handful of genuinely pointer-width operations
/// (moving the context pointer, `movabs` for a call target).
fn rex_w(r_ext: bool, x_ext: bool, b_ext: bool) -> u8 {
    0x48 | (r_ext as u8) << 2 | (x_ext as u8) << 1 | (b_ext as u8)
}

/// `REX` with no `W` bit (32-bit operand), emitted only when an extension
/// bit is actually needed — a bare `0x40` prefix is legal but pointless.
fn push_rex32(out: &mut Vec<u8>, r_ext: bool, x_ext: bool, b_ext: bool) {
    if r_ext || x_ext || b_ext {
        out.push(0x40 | (r_ext as u8) << 2 | (x_ext as u8) << 1 | (b_ext as u8));
    }
}

fn modrm(mod_bits: u8, reg: u8, rm: u8) -> u8 {
    (mod_bits << 6) | ((reg & 0b111) << 3) | (rm & 0b111)
}

/// `mov dst, src` (64-bit GPR to GPR) — used only to shuttle the real
/// 64-bit VM context pointer into an argument register.
fn mov_reg_reg64(out: &mut Vec<u8>, dst: u8, src: u8) {
    out.push(rex_w(src >= 8, false, dst >= 8));
    out.push(0x89);
    out.push(modrm(0b11, src & 0b111, dst & 0b111));
}

/// `mov dst, src` (32-bit GPR to GPR, zero-extending into the full
/// 64-bit register). Used for every VM-register-to-register copy.
fn mov_reg_reg32(out: &mut Vec<u8>, dst: u8, src: u8) {
    push_rex32(out, src >= 8, false, dst >= 8);
    out.push(0x89);
    out.push(modrm(0b11, src & 0b111, dst & 0b111));
}

/// `add dst, src` (32-bit, wraps mod 2^32 and zero-extends the result).
fn add_reg_reg32(out: &mut Vec<u8>, dst: u8, src: u8) {
    push_rex32(out, src >= 8, false, dst >= 8);
    out.push(0x01);
    out.push(modrm(0b11, src & 0b111, dst & 0b111));
}

/// `imul dst, src` (32-bit, wraps mod 2^32 and zero-extends the result).
fn imul_reg_reg32(out: &mut Vec<u8>, dst: u8, src: u8) {
    push_rex32(out, dst >= 8, false, src >= 8);
    out.push(0x0F);
    out.push(0xAF);
    out.push(modrm(0b11, dst & 0b111, src & 0b111));
}

/// `and dst, src` (32-bit).
fn and_reg_reg32(out: &mut Vec<u8>, dst: u8, src: u8) {
    push_rex32(out, src >= 8, false, dst >= 8);
    out.push(0x21);
    out.push(modrm(0b11, src & 0b111, dst & 0b111));
}

/// `not dst` (32-bit, one's complement, in place).
fn not_reg32(out: &mut Vec<u8>, dst: u8) {
    push_rex32(out, false, false, dst >= 8);
    out.push(0xF7);
    out.push(modrm(0b11, 2, dst & 0b111));
}

/// `test reg, reg` (32-bit) — sets ZF from `reg`'s low 32 bits without
/// modifying it.
fn test_reg_reg32(out: &mut Vec<u8>, reg: u8) {
    push_rex32(out, reg >= 8, false, reg >= 8);
    out.push(0x85);
    out.push(modrm(0b11, reg & 0b111, reg & 0b111));
}

/// `cmovne dst, src` (32-bit) — `dst <- src` iff `ZF == 0`, zero-extending.
fn cmovne_reg_reg32(out: &mut Vec<u8>, dst: u8, src: u8) {
    push_rex32(out, dst >= 8, false, src >= 8);
    out.push(0x0F);
    out.push(0x45);
    out.push(modrm(0b11, dst & 0b111, src & 0b111));
}

/// `mov dst, imm32` (zero-extended into the low 32 bits; VM words are 32-bit).
fn mov_reg_imm32(out: &mut Vec<u8>, dst: u8, imm: u32) {
    if dst >= 8 {
        out.push(0x41);
    }
    out.push(0xB8 + (dst & 0b111));
    out.extend_from_slice(&imm.to_le_bytes());
}

/// `mov dst, [RBX + disp]` (64-bit load) — `RBX` holds the VM context
/// pointer for the whole translated segment. Used to read the segment
/// table's `slots_base` pointer (disp 0) and to follow a segment's own
/// base pointer (disp 0, off whatever register now holds it).
fn load_mem64(out: &mut Vec<u8>, dst: u8, base: u8, disp: i32) {
    out.push(rex_w(dst >= 8, false, base >= 8));
    out.push(0x8B);
    if disp == 0 {
        out.push(modrm(0b00, dst & 0b111, base & 0b111));
    } else {
        out.push(modrm(0b10, dst & 0b111, base & 0b111));
        out.extend_from_slice(&disp.to_le_bytes());
    }
}

/// `mov [RBX + disp], src` (32-bit store) — used to write `core.next_pc`.
fn store_mem32(out: &mut Vec<u8>, base: u8, disp: i32, src: u8) {
    push_rex32(out, src >= 8, false, base >= 8);
    out.push(0x89);
    if disp == 0 {
        out.push(modrm(0b00, src & 0b111, base & 0b111));
    } else {
        out.push(modrm(0b10, src & 0b111, base & 0b111));
        out.extend_from_slice(&disp.to_le_bytes());
    }
}

/// `mov dst32, [base]` (zero-extending 32-bit load, no displacement).
fn load_mem32(out: &mut Vec<u8>, dst: u8, base: u8) {
    push_rex32(out, dst >= 8, false, base >= 8);
    out.push(0x8B);
    out.push(modrm(0b00, dst & 0b111, base & 0b111));
}

/// `mov [base], src32` (32-bit store, no displacement).
fn store_mem32_nodisp(out: &mut Vec<u8>, base: u8, src: u8) {
    push_rex32(out, src >= 8, false, base >= 8);
    out.push(0x89);
    out.push(modrm(0b00, src & 0b111, base & 0b111));
}

/// `shl reg, imm8` (64-bit).
fn shl_reg64_imm8(out: &mut Vec<u8>, reg: u8, imm: u8) {
    out.push(rex_w(false, false, reg >= 8));
    out.push(0xC1);
    out.push(modrm(0b11, 4, reg & 0b111)); // /4 = SHL
    out.push(imm);
}

/// `add dst, src` (64-bit, GPR to GPR).
fn add_reg_reg64(out: &mut Vec<u8>, dst: u8, src: u8) {
    out.push(rex_w(src >= 8, false, dst >= 8));
    out.push(0x01);
    out.push(modrm(0b11, src & 0b111, dst & 0b111));
}

/// `push reg`.
fn push_reg(out: &mut Vec<u8>, reg: u8) {
    if reg >= 8 {
        out.push(0x41);
    }
    out.push(0x50 + (reg & 0b111));
}

/// `pop reg`.
fn pop_reg(out: &mut Vec<u8>, reg: u8) {
    if reg >= 8 {
        out.push(0x41);
    }
    out.push(0x58 + (reg & 0b111));
}

/// `call` through an absolute 64-bit address held in `rax`: loads the
/// address with `movabs rax, imm64` then `call rax`.
fn call_absolute(out: &mut Vec<u8>, target: usize) {
    out.push(0x48);
    out.push(0xB8); // movabs rax, imm64
    out.extend_from_slice(&(target as u64).to_le_bytes());
    out.push(0xFF);
    out.push(0xD0); // call rax
}

/// Argument registers for the System V ABI, in order: rdi, rsi, rdx. Three
/// is the most any trampoline call needs: the context pointer plus
/// `Load-Program`'s two register operands (`b`, `c`) — `Seg-Load`/
/// `Seg-Store` never reach a trampoline at all, they're inlined.
const ARG_REGS: [u8; 3] = [7, 6, 2];

pub(crate) struct X86_64;

impl X86_64 {
    /// Caller-saved pinned registers (`r8..r11`) that must be preserved by
    /// hand across a trampoline call.
    const VOLATILE_PINNED: [u8; 4] = [VM_REG[0], VM_REG[1], VM_REG[2], VM_REG[3]];

    fn emit_trampoline_call(out: &mut Vec<u8>, target: usize, arg_vm_regs: &[usize], dest: Option<usize>) {
        for &reg in &Self::VOLATILE_PINNED {
            push_reg(out, reg);
        }

        mov_reg_reg64(out, ARG_REGS[0], RBX);
        for (slot, &vm_reg) in arg_vm_regs.iter().enumerate() {
            mov_reg_reg32(out, ARG_REGS[slot + 1], VM_REG[vm_reg]);
        }

        call_absolute(out, target);

        for &reg in Self::VOLATILE_PINNED.iter().rev() {
            pop_reg(out, reg);
        }

        if let Some(dest) = dest {
            mov_reg_reg32(out, VM_REG[dest], 0 /* rax */);
        }
    }
}

impl Emitter for X86_64 {
    fn emit_cmov(slot: &mut [u8; CHUNK], ops: Operands) {
        let mut out = Vec::with_capacity(CHUNK);
        // `test c, c` sets ZF from r[C] without touching it; `cmovne a, b`
        // then only writes r[A] when r[C] != 0, reading both operands
        // before the (possible) write so `a == c` is handled correctly.
        test_reg_reg32(&mut out, VM_REG[ops.c]);
        cmovne_reg_reg32(&mut out, VM_REG[ops.a], VM_REG[ops.b]);
        slot[..out.len()].copy_from_slice(&out);
        fill_nop(slot, out.len());
    }

    fn emit_add(slot: &mut [u8; CHUNK], ops: Operands) {
        let mut out = Vec::with_capacity(CHUNK);
        mov_reg_reg32(&mut out, VM_REG[ops.a], VM_REG[ops.b]);
        add_reg_reg32(&mut out, VM_REG[ops.a], VM_REG[ops.c]);
        slot[..out.len()].copy_from_slice(&out);
        fill_nop(slot, out.len());
    }

    fn emit_mul(slot: &mut [u8; CHUNK], ops: Operands) {
        let mut out = Vec::with_capacity(CHUNK);
        mov_reg_reg32(&mut out, VM_REG[ops.a], VM_REG[ops.b]);
        imul_reg_reg32(&mut out, VM_REG[ops.a], VM_REG[ops.c]);
        slot[..out.len()].copy_from_slice(&out);
        fill_nop(slot, out.len());
    }

    fn emit_div(slot: &mut [u8; CHUNK], ops: Operands) {
        // Truncating unsigned 32-bit division needs eax/edx; shuttle
        // through them and back into the pinned destination register.
        let mut out = Vec::with_capacity(CHUNK);
        mov_reg_reg32(&mut out, 0 /* rax */, VM_REG[ops.b]);
        out.push(0x31);
        out.push(modrm(0b11, 2, 2)); // xor edx, edx
        push_rex32(&mut out, false, false, VM_REG[ops.c] >= 8);
        out.push(0xF7);
        out.push(modrm(0b11, 6, VM_REG[ops.c] & 0b111)); // div r/m32
        mov_reg_reg32(&mut out, VM_REG[ops.a], 0 /* rax */);
        slot[..out.len()].copy_from_slice(&out);
        fill_nop(slot, out.len());
    }

    fn emit_nand(slot: &mut [u8; CHUNK], ops: Operands) {
        let mut out = Vec::with_capacity(CHUNK);
        mov_reg_reg32(&mut out, VM_REG[ops.a], VM_REG[ops.b]);
        and_reg_reg32(&mut out, VM_REG[ops.a], VM_REG[ops.c]);
        not_reg32(&mut out, VM_REG[ops.a]);
        slot[..out.len()].copy_from_slice(&out);
        fill_nop(slot, out.len());
    }

    fn emit_imm(slot: &mut [u8; CHUNK], ops: Operands) {
        let mut out = Vec::with_capacity(CHUNK);
        mov_reg_imm32(&mut out, VM_REG[ops.a], ops.immediate);
        slot[..out.len()].copy_from_slice(&out);
        fill_nop(slot, out.len());
    }

    fn emit_halt(slot: &mut [u8; CHUNK]) {
        let mut out = Vec::with_capacity(CHUNK);
        mov_reg_imm32(&mut out, 0 /* rax */, 0); // SlotOutcome::Halt
        out.push(RET);
        slot[..out.len()].copy_from_slice(&out);
        fill_nop(slot, out.len());
    }

    fn emit_seg_load(slot: &mut [u8; CHUNK], ops: Operands) {
        // Two pointer indirections off `rbx`, the context pointer: first to
        // the segment table's flat `slots_base` array (indexed by r[B]),
        // then to the indexed segment's own word array (indexed by r[C]).
        let mut out = Vec::with_capacity(CHUNK);
        load_mem64(&mut out, RAX, RBX, 0); // rax = slots_base
        mov_reg_reg32(&mut out, RCX, VM_REG[ops.b]);
        shl_reg64_imm8(&mut out, RCX, 3); // rcx = r[B] * size_of::<*mut Word>()
        add_reg_reg64(&mut out, RAX, RCX); // rax = &slots_base[r[B]]
        load_mem64(&mut out, RAX, RAX, 0); // rax = slots_base[r[B]] (segment base)
        mov_reg_reg32(&mut out, RCX, VM_REG[ops.c]);
        shl_reg64_imm8(&mut out, RCX, 2); // rcx = r[C] * size_of::<Word>()
        add_reg_reg64(&mut out, RAX, RCX); // rax = &segment_base[r[C]]
        load_mem32(&mut out, VM_REG[ops.a], RAX);
        slot[..out.len()].copy_from_slice(&out);
        fill_nop(slot, out.len());
    }

    fn emit_seg_store(slot: &mut [u8; CHUNK], ops: Operands) {
        let mut out = Vec::with_capacity(CHUNK);
        load_mem64(&mut out, RAX, RBX, 0); // rax = slots_base
        mov_reg_reg32(&mut out, RCX, VM_REG[ops.a]);
        shl_reg64_imm8(&mut out, RCX, 3);
        add_reg_reg64(&mut out, RAX, RCX); // rax = &slots_base[r[A]]
        load_mem64(&mut out, RAX, RAX, 0); // rax = slots_base[r[A]] (segment base)
        mov_reg_reg32(&mut out, RCX, VM_REG[ops.b]);
        shl_reg64_imm8(&mut out, RCX, 2);
        add_reg_reg64(&mut out, RAX, RCX); // rax = &segment_base[r[B]]
        store_mem32_nodisp(&mut out, RAX, VM_REG[ops.c]);
        slot[..out.len()].copy_from_slice(&out);
        fill_nop(slot, out.len());
    }

    fn emit_map(slot: &mut [u8; CHUNK], ops: Operands, trampolines: &TrampolineTable) {
        let mut out = Vec::with_capacity(CHUNK);
        X86_64::emit_trampoline_call(&mut out, trampolines.map, &[ops.c], Some(ops.b));
        slot[..out.len()].copy_from_slice(&out);
        fill_nop(slot, out.len());
    }

    fn emit_unmap(slot: &mut [u8; CHUNK], ops: Operands, trampolines: &TrampolineTable) {
        let mut out = Vec::with_capacity(CHUNK);
        X86_64::emit_trampoline_call(&mut out, trampolines.unmap, &[ops.c], None);
        slot[..out.len()].copy_from_slice(&out);
        fill_nop(slot, out.len());
    }

    fn emit_out(slot: &mut [u8; CHUNK], ops: Operands, trampolines: &TrampolineTable) {
        let mut out = Vec::with_capacity(CHUNK);
        X86_64::emit_trampoline_call(&mut out, trampolines.out, &[ops.c], None);
        slot[..out.len()].copy_from_slice(&out);
        fill_nop(slot, out.len());
    }

    fn emit_in(slot: &mut [u8; CHUNK], ops: Operands, trampolines: &TrampolineTable) {
        let mut out = Vec::with_capacity(CHUNK);
        X86_64::emit_trampoline_call(&mut out, trampolines.input, &[], Some(ops.c));
        slot[..out.len()].copy_from_slice(&out);
        fill_nop(slot, out.len());
    }

    fn emit_load_program(slot: &mut [u8; CHUNK], ops: Operands, trampolines: &TrampolineTable) {
        // r[B] == 0 is a pure jump within segment 0 (§9's fast path): the
        // target PC is computed and returned without a trampoline call or
        // re-translation. r[B] != 0 needs the trampoline to copy the new
        // segment into segment 0 first, so the driver loop re-translates.
        let mut out = Vec::with_capacity(CHUNK);
        test_reg_reg32(&mut out, VM_REG[ops.b]);

        out.push(0x0F);
        out.push(0x85); // jnz rel32, to the slow path
        let disp_at = out.len();
        out.extend_from_slice(&0i32.to_le_bytes());

        // Fast path: ctx.core.next_pc = r[C]; return SlotOutcome::Jump.
        store_mem32(&mut out, RBX, NEXT_PC_OFFSET as i32, VM_REG[ops.c]);
        mov_reg_imm32(&mut out, RAX, SlotOutcome::Jump as u32);
        out.push(RET);

        let slow_path_start = out.len();
        let disp = (slow_path_start - (disp_at + 4)) as i32;
        out[disp_at..disp_at + 4].copy_from_slice(&disp.to_le_bytes());

        // Slow path: trampoline copies segment r[B] into segment 0 and sets
        // next_pc = r[C]; return SlotOutcome::Reload.
        X86_64::emit_trampoline_call(&mut out, trampolines.load_program, &[ops.b, ops.c], None);
        mov_reg_imm32(&mut out, RAX, SlotOutcome::Reload as u32);
        out.push(RET);

        slot[..out.len()].copy_from_slice(&out);
        fill_nop(slot, out.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halt_slot_ends_in_ret() {
        let mut slot = [0u8; CHUNK];
        X86_64::emit_halt(&mut slot);
        assert_eq!(*slot.iter().rev().find(|&&b| b != NOP).unwrap(), RET);
    }

    #[test]
    fn imm_slot_encodes_movabs_style_mov_reg_imm() {
        let mut slot = [0u8; CHUNK];
        X86_64::emit_imm(
            &mut slot,
            Operands {
                a: 2,
                b: 0,
                c: 0,
                immediate: 0x48,
            },
        );
        // mov r10d, imm32: REX.B (0x41) + (0xB8 + 2) + little-endian imm32.
        assert_eq!(&slot[..2], &[0x41, 0xBA]);
        assert_eq!(&slot[2..6], &0x48u32.to_le_bytes());
    }

    #[test]
    fn cmov_emits_test_then_cmovne() {
        let mut slot = [0u8; CHUNK];
        X86_64::emit_cmov(
            &mut slot,
            Operands {
                a: 1,
                b: 2,
                c: 3,
                immediate: 0,
            },
        );
        // test r11d, r11d: REX.RB (0x45) + 0x85 + modrm(11, r11&7, r11&7).
        assert_eq!(&slot[..3], &[0x45, 0x85, modrm(0b11, 3, 3)]);
        // cmovne r9d, r10d: REX.RB (0x45) + 0F 45 + modrm(11, r9&7, r10&7).
        assert_eq!(&slot[3..7], &[0x45, 0x0F, 0x45, modrm(0b11, 1, 2)]);
    }

    #[test]
    fn add_wraps_mod_2_32_by_using_32_bit_operand_width() {
        // Encoding-level check that `add` never carries REX.W: the pinned
        // register must be written with 32-bit width so the result is
        // zero-extended and any carry past bit 31 is dropped, matching
        // wraparound at 2^32 rather than 2^64.
        let mut slot = [0u8; CHUNK];
        X86_64::emit_add(&mut slot, Operands { a: 0, b: 1, c: 2, immediate: 0 });
        assert!(slot[..8].iter().all(|&b| b & 0xF8 != 0x48), "emit_add must not set REX.W");
    }

    #[test]
    fn no_emitter_overruns_chunk() {
        let ops = Operands {
            a: 1,
            b: 2,
            c: 3,
            immediate: 0xFF,
        };
        let trampolines = TrampolineTable {
            map: 3,
            unmap: 4,
            out: 5,
            input: 6,
            load_program: 7,
        };

        let mut slot = [0u8; CHUNK];
        X86_64::emit_seg_load(&mut slot, ops);
        X86_64::emit_seg_store(&mut slot, ops);
        X86_64::emit_load_program(&mut slot, ops, &trampolines); // widest emitter
    }
}
