//! The native-code JIT translator (§4.4–§4.6).
//!
//! A single pass over a segment's words, instruction by instruction, no
//! basic-block analysis: [`translate`] lowers each word into a fixed
//! [`crate::consts::CHUNK`]-byte slot of host machine code and the slots for
//! opcodes other than `Halt`/reserved/`Load-Program` simply fall through
//! into the next slot's bytes, mirroring the interpreter's own fetch-decode-
//! dispatch-advance loop but realized as straight-line native code instead
//! of a Rust `match`.

mod buffer;
mod emit;
mod trampoline;

use tracing::{debug, trace};

use crate::consts::CHUNK;
use crate::instruction::{Instruction, Opcode};
use crate::io::HostIo;
use crate::segment::SegmentTable;
use crate::word::Word;

pub(crate) use buffer::CodeBuffer;
pub(crate) use emit::{Emitter, Operands, SlotOutcome, TrampolineTable};
pub(crate) use trampoline::JitContext;

#[cfg(target_arch = "x86_64")]
type Arch = emit::x86_64::X86_64;
#[cfg(target_arch = "aarch64")]
type Arch = emit::aarch64::Aarch64;

use crate::error::VmFatalError;

/// The function signature every translated slot exposes to the driver loop:
/// takes the VM context pointer, falls through any number of subsequent
/// slots internally, and returns once a `Halt`, reserved opcode, or
/// `Load-Program` is reached.
type SlotFn<IO> = extern "C" fn(*mut JitContext<IO>) -> i64;

fn operands(instruction: &Instruction) -> Operands {
    Operands {
        a: instruction.a,
        b: instruction.b,
        c: instruction.c,
        immediate: instruction.immediate,
    }
}

fn emit_one(slot: &mut [u8; CHUNK], instruction: Instruction, trampolines: &TrampolineTable) {
    let ops = operands(&instruction);
    match instruction.opcode {
        Opcode::CMov => Arch::emit_cmov(slot, ops),
        Opcode::SegLoad => Arch::emit_seg_load(slot, ops),
        Opcode::SegStore => Arch::emit_seg_store(slot, ops),
        Opcode::Add => Arch::emit_add(slot, ops),
        Opcode::Mul => Arch::emit_mul(slot, ops),
        Opcode::Div => Arch::emit_div(slot, ops),
        Opcode::Nand => Arch::emit_nand(slot, ops),
        Opcode::Halt => Arch::emit_halt(slot),
        Opcode::Map => Arch::emit_map(slot, ops, trampolines),
        Opcode::Unmap => Arch::emit_unmap(slot, ops, trampolines),
        Opcode::Out => Arch::emit_out(slot, ops, trampolines),
        Opcode::In => Arch::emit_in(slot, ops, trampolines),
        Opcode::LoadProg => Arch::emit_load_program(slot, ops, trampolines),
        Opcode::Imm => Arch::emit_imm(slot, ops),
        Opcode::Reserved14 | Opcode::Reserved15 => Arch::emit_halt(slot),
    }
}

/// Translates `words` into a freshly mapped, executable [`CodeBuffer`].
fn translate(words: &[Word], trampolines: &TrampolineTable) -> Result<CodeBuffer, VmFatalError> {
    let mut buffer = CodeBuffer::new(words.len().max(1) * CHUNK)?;

    {
        let bytes = buffer.as_mut_slice();
        for (pc, &word) in words.iter().enumerate() {
            let instruction = Instruction::decode(word);
            let start = pc * CHUNK;
            let slot: &mut [u8; CHUNK] = (&mut bytes[start..start + CHUNK])
                .try_into()
                .expect("slot is exactly CHUNK bytes");
            emit_one(slot, instruction, trampolines);
        }
    }

    buffer.make_executable()?;
    trace!(words = words.len(), bytes = buffer.len(), "translated segment");
    Ok(buffer)
}

fn trampoline_table<IO: HostIo>() -> TrampolineTable {
    TrampolineTable {
        map: trampoline::map::<IO> as usize,
        unmap: trampoline::unmap::<IO> as usize,
        out: trampoline::out::<IO> as usize,
        input: trampoline::input::<IO> as usize,
        load_program: trampoline::load_program::<IO> as usize,
    }
}

/// Drives a program to completion by running JIT-translated native code
/// instead of decoding and dispatching each instruction in Rust.
///
/// Re-translates segment 0 whenever a slot reports [`SlotOutcome::Reload`]
/// (i.e. a `Load-Program` retired), per the self-modification baseline: a
/// `SegStore` into segment 0 never triggers re-translation, only
/// `Load-Program` does (§4.4, §9 Open Questions).
pub struct JitExecutor<IO: HostIo> {
    buffer: CodeBuffer,
    context: Box<JitContext<IO>>,
    trampolines: TrampolineTable,
    pc: Word,
}

impl<IO> JitExecutor<IO>
where
    IO: HostIo,
{
    /// Builds an executor whose segment 0 is `code`, translating it ahead
    /// of the first run (§4.7's "first-pass translation").
    pub fn new(code: Vec<Word>, io: IO) -> Result<Self, VmFatalError> {
        let segments = SegmentTable::new(code);
        let trampolines = trampoline_table::<IO>();
        let buffer = translate(segments.code(), &trampolines)?;
        let context = Box::new(JitContext::new(segments, io));

        Ok(Self {
            buffer,
            context,
            trampolines,
            pc: 0,
        })
    }

    /// Runs until a `Halt` (or reserved opcode) retires, re-translating on
    /// every `Load-Program`.
    pub fn run(&mut self) -> Result<(), VmFatalError> {
        loop {
            // SAFETY: `entry` points `CHUNK * pc` bytes into a page this
            // `JitExecutor` made executable in `translate`, and the page
            // outlives the call because `self.buffer` isn't replaced until
            // after the call returns.
            let entry: SlotFn<IO> = unsafe {
                std::mem::transmute(self.buffer.entry().add(self.pc as usize * CHUNK))
            };

            let outcome = entry(self.context.as_mut() as *mut JitContext<IO>);

            match outcome {
                code if code == SlotOutcome::Halt as i64 => {
                    trace!(pc = self.pc, "jit halt");
                    return Ok(());
                }
                code if code == SlotOutcome::Jump as i64 => {
                    // Load-Program's fast path: segment 0's translation is
                    // unchanged, only the PC moved.
                    self.pc = self.context.core.next_pc;
                }
                code if code == SlotOutcome::Reload as i64 => {
                    let code_words = self.context.core.segments.code().to_vec();
                    debug!(words = code_words.len(), "re-translating after load-program");
                    self.buffer = translate(&code_words, &self.trampolines)?;
                    self.pc = self.context.core.next_pc;
                }
                other => unreachable!("slot returned an unrecognized outcome code {other}"),
            }
        }
    }

    pub fn io(&self) -> &IO {
        &self.context.io
    }

    pub fn io_mut(&mut self) -> &mut IO {
        &mut self.context.io
    }
}
