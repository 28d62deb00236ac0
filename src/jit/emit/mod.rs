//! Per-architecture instruction selection (§4.4).
//!
//! Each VM instruction lowers to exactly [`crate::consts::CHUNK`] bytes of
//! host machine code. Arithmetic, `CMov`, `Imm`, `Halt`, and — per §4.4's
//! "indirections are inlined" rule — `Seg-Load`/`Seg-Store` are emitted
//! entirely inline against the pinned host registers and the context
//! pointer; host I/O, segment map/unmap, and Load-Program's slow path go out
//! through a trampoline call (§4.5). A slot never needs more than one call,
//! so there's no variable-length call sequence to fit — just the fixed
//! marshaling/call/unmarshal bytes for that one call, plus (for
//! Load-Program alone) a runtime branch choosing between its fast and slow
//! paths.

#[cfg(target_arch = "x86_64")]
pub(crate) mod x86_64;

#[cfg(target_arch = "aarch64")]
pub(crate) mod aarch64;

use crate::consts::CHUNK;
use crate::word::Word;

/// What a slot reports back to the driver loop when it doesn't simply fall
/// through into the next slot's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub(crate) enum SlotOutcome {
    Halt = 0,
    Reload = 1,
    /// Load-Program's fast path (r[B] == 0, a pure jump): `ctx.core.next_pc`
    /// already holds the new PC, and segment 0's translation is unchanged,
    /// so the driver loop should resume there without re-translating
    /// (§9's "Load-Program fast path").
    Jump = 2,
}

/// A decoded instruction's operands, reduced to what an emitter needs.
/// Mirrors [`crate::instruction::Instruction`] but is independent of it so
/// the emit layer doesn't need to depend on the interpreter's decode types.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Operands {
    pub a: usize,
    pub b: usize,
    pub c: usize,
    pub immediate: Word,
}

/// Addresses of the trampoline helpers a translated segment may call,
/// monomorphized for one concrete `IO` type by the translator. Seg-Load and
/// Seg-Store have no entry here — they're inlined, never trampolined.
pub(crate) struct TrampolineTable {
    pub map: usize,
    pub unmap: usize,
    pub out: usize,
    pub input: usize,
    pub load_program: usize,
}

/// Lowers one VM instruction into exactly `CHUNK` bytes of host code.
///
/// Implementors pin VM registers 0..7 to a fixed set of host callee-saved
/// registers (spec.md §4.4) and assume the VM context pointer lives in one
/// further reserved host register for the whole translated segment.
pub(crate) trait Emitter {
    /// `if r[C] != 0 { r[A] = r[B] }`; falls through.
    fn emit_cmov(slot: &mut [u8; CHUNK], ops: Operands);
    /// `r[A] = r[B] + r[C]` (wrapping); falls through.
    fn emit_add(slot: &mut [u8; CHUNK], ops: Operands);
    /// `r[A] = r[B] * r[C]` (wrapping); falls through.
    fn emit_mul(slot: &mut [u8; CHUNK], ops: Operands);
    /// `r[A] = r[B] / r[C]` (host traps on zero divisor); falls through.
    fn emit_div(slot: &mut [u8; CHUNK], ops: Operands);
    /// `r[A] = !(r[B] & r[C])`; falls through.
    fn emit_nand(slot: &mut [u8; CHUNK], ops: Operands);
    /// `r[A] = immediate`; falls through.
    fn emit_imm(slot: &mut [u8; CHUNK], ops: Operands);
    /// Returns [`SlotOutcome::Halt`] to the driver loop. Used for both the
    /// real `Halt` opcode and the two reserved opcodes (§4.1).
    fn emit_halt(slot: &mut [u8; CHUNK]);
    /// `r[A] <- seg[r[B]][r[C]]`, inlined as two pointer indirections off
    /// the context pointer (segment-table pointer, then the segment's own
    /// base) with no trampoline call (§4.4); falls through.
    fn emit_seg_load(slot: &mut [u8; CHUNK], ops: Operands);
    /// `seg[r[A]][r[B]] <- r[C]`, inlined the same way as
    /// [`Self::emit_seg_load`]; falls through.
    fn emit_seg_store(slot: &mut [u8; CHUNK], ops: Operands);
    /// `r[B] <- map(r[C])` via [`crate::jit::trampoline::map`]; falls
    /// through.
    fn emit_map(slot: &mut [u8; CHUNK], ops: Operands, trampolines: &TrampolineTable);
    /// `unmap(r[C])` via [`crate::jit::trampoline::unmap`]; falls through.
    fn emit_unmap(slot: &mut [u8; CHUNK], ops: Operands, trampolines: &TrampolineTable);
    /// `out(r[C])` via [`crate::jit::trampoline::out`]; falls through.
    fn emit_out(slot: &mut [u8; CHUNK], ops: Operands, trampolines: &TrampolineTable);
    /// `r[C] <- in()` via [`crate::jit::trampoline::input`]; falls through.
    fn emit_in(slot: &mut [u8; CHUNK], ops: Operands, trampolines: &TrampolineTable);
    /// Load-Program: when r[B] == 0 (a pure jump), computes the target PC
    /// inline and returns [`SlotOutcome::Jump`] without a trampoline call or
    /// re-translation; otherwise calls
    /// [`crate::jit::trampoline::load_program`] and returns
    /// [`SlotOutcome::Reload`] so the driver loop re-translates segment 0
    /// (§4.4, §9's "Load-Program fast path").
    fn emit_load_program(slot: &mut [u8; CHUNK], ops: Operands, trampolines: &TrampolineTable);
}
