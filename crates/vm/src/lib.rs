//! # cairo-vm-core
//!
//! The execution core of a Cairo virtual machine.
//!
//! # Documentation
//!
//! - [The Cairo Whitepaper](https://www.cairo-lang.org/cairo-whitepaper/).
//!
//! # Field
//!
//! Technically, the Cairo language allows any prime field to be used as the
//! underlying field for the virtual machine. In practice, the only field this
//! crate is meant to be used with is the Starknet field element [`Felt`],
//! whose modulus is `2^251 + 17 * 2^192 + 1`. For this reason, it is not
//! possible to change the underlying field of the virtual machine.
//!
//! # Components
//!
//! The [`CairoVM`] is composed of two main components:
//!
//! - [`Cpu`]: holds the three registers (program counter, allocation pointer
//!   and frame pointer) of the machine.
//!
//! - [`Memory`]: the segmented, write-once memory associated with the
//!   virtual machine. Instructions and working memory are stored here.
//!
//! Advancing the machine by one instruction is done with [`CairoVM::step`],
//! which fetches and decodes the word under the program counter, resolves the
//! three operands (deducing and writing back the ones memory does not know
//! yet), enforces the OP code assertions and finally commits the register
//! update.

#![warn(missing_docs, missing_debug_implementations)]
#![deny(unsafe_op_in_unsafe_fn)]

use bitflags::bitflags;
use num_traits::ToPrimitive;
use starknet_types_core::felt::Felt;

use cpu::Cpu;
use error::Error;
use instr::{ApUpdate, Instruction, OpCode, Op1Source, PcUpdate, ResultLogic};
use memory::{Memory, Pointer, Value};
use trace::Trace;

pub mod cpu;
pub mod error;
pub mod instr;
pub mod memory;
pub mod trace;

/// Contains the full state of a Cairo virtual machine.
///
/// This includes the memory, the registers and the number of executed steps.
/// It can be used to execute a Cairo program and gather execution statistics
/// and other related information.
///
/// The program and its initial state are installed through the loading
/// surface ([`CairoVM::add_segment`], [`CairoVM::load_data`],
/// [`CairoVM::insert`] and [`CairoVM::set_registers`]); the machine is then
/// advanced one instruction at a time with [`CairoVM::step`].
#[derive(Debug, Clone)]
pub struct CairoVM {
    /// The central processing unit of the virtual machine, responsible for
    /// holding the registers.
    cpu: Cpu,
    /// The memory associated with the virtual machine.
    ///
    /// Instructions and working memory are stored here.
    memory: Memory,
    /// The number of instructions executed so far.
    current_step: u64,
}

impl Default for CairoVM {
    #[inline(always)]
    fn default() -> Self {
        Self::new()
    }
}

impl CairoVM {
    /// Creates a new [`CairoVM`] with no allocated segments and all registers
    /// pointing at offset 0 of segment 0.
    pub fn new() -> Self {
        let null = Pointer::new(0, 0);

        Self {
            cpu: Cpu::new(null, null, null),
            memory: Memory::new(),
            current_step: 0,
        }
    }

    /// Returns the current state of the [`Cpu`].
    #[inline(always)]
    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    /// Returns the current state of the [`Memory`].
    #[inline(always)]
    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Returns the number of instructions executed so far.
    #[inline(always)]
    pub fn current_step(&self) -> u64 {
        self.current_step
    }

    /// Allocates a fresh memory segment and returns a pointer to its first
    /// cell.
    pub fn add_segment(&mut self) -> Pointer {
        self.memory.add_segment()
    }

    /// Asserts the memory cell at `address` to the given value.
    ///
    /// See [`Memory::insert`] for the write-once rules.
    pub fn insert(&mut self, address: Pointer, value: Value) -> Result<(), Error> {
        self.memory.insert(address, value)
    }

    /// Writes a block of values at consecutive addresses starting at `base`
    /// and returns the first address past the block.
    pub fn load_data(&mut self, base: Pointer, data: &[Value]) -> Result<Pointer, Error> {
        self.memory.load_data(base, data)
    }

    /// Installs the initial register state of a run.
    ///
    /// The loader is expected to point `pc` into the program segment and both
    /// `ap` and `fp` into the execution segment.
    pub fn set_registers(&mut self, pc: Pointer, ap: Pointer, fp: Pointer) {
        self.cpu = Cpu::new(pc, ap, fp);
    }

    /// Advances the virtual machine by a single instruction, reporting events
    /// to the provided [`Trace`] implementation.
    ///
    /// On failure the register update is abandoned and the registers keep
    /// their previous values. Memory cells asserted by the deduction cascade
    /// before the failure may persist; the write-once discipline keeps them
    /// consistent with any later attempt.
    pub fn step<T>(&mut self, trace: &mut T) -> Result<(), Error>
    where
        T: ?Sized + Trace,
    {
        let instruction = fetch_instruction(&self.cpu, &self.memory)?;

        if instruction.is_last_bit_set() {
            return Err(Error::HighBitSet);
        }

        let mut ctx = StepContext::initial(instruction);
        compute_dst(&mut ctx, self)?;
        compute_op0(&mut ctx, self)?;
        compute_op1(&mut ctx, self)?;
        resolve_operands(&mut ctx, self)?;
        assert_op_code(&ctx, self)?;
        compute_next_registers(&mut ctx, self)?;

        trace.on_step(&self.cpu, &instruction);

        self.cpu.pc = ctx.next_pc;
        self.cpu.ap = ctx.next_ap;
        self.cpu.fp = ctx.next_fp;
        self.current_step += 1;

        Ok(())
    }
}

/// Attempts to fetch an instruction from the provided [`Memory`].
///
/// The returned instruction is the one directly referenced by the **Program
/// Counter** of the [`Cpu`] instance. Note that the instruction is not
/// decoded in any way, meaning that it might be missing an eventual
/// associated immediate value.
fn fetch_instruction(cpu: &Cpu, memory: &Memory) -> Result<Instruction, Error> {
    let cell = memory.get(&cpu.pc).ok_or(Error::EndOfInstructions)?;
    let word = cell
        .scalar()
        .ok_or(Error::InstructionEncodingError)?
        .to_u64()
        .ok_or(Error::InstructionEncodingError)?;

    Ok(Instruction(word))
}

/// Determines the address of the destination operand of an instruction, and
/// reads it from memory when it is already known.
fn compute_dst(ctx: &mut StepContext, vm: &CairoVM) -> Result<(), Error> {
    ctx.dst_addr = vm
        .cpu
        .compute_address(ctx.instruction.dst_register(), ctx.instruction.dst_offset())?;

    if let Some(value) = vm.memory.get(&ctx.dst_addr) {
        ctx.dst = value.copied();
        ctx.flags.insert(StepContextFlags::DST_ASSERTED);
    }

    Ok(())
}

/// Determines the address of the first operand of an instruction, and reads
/// it from memory when it is already known.
fn compute_op0(ctx: &mut StepContext, vm: &CairoVM) -> Result<(), Error> {
    ctx.op0_addr = vm
        .cpu
        .compute_address(ctx.instruction.op0_register(), ctx.instruction.op0_offset())?;

    if let Some(value) = vm.memory.get(&ctx.op0_addr) {
        ctx.op0 = value.copied();
        ctx.flags.insert(StepContextFlags::OP0_ASSERTED);
    }

    Ok(())
}

/// Determines the address of the second operand of an instruction, and reads
/// it from memory when it is already known.
///
/// This function also records in the context whether the instruction carries
/// an immediate value, which makes it span two memory cells.
fn compute_op1(ctx: &mut StepContext, vm: &CairoVM) -> Result<(), Error> {
    let base = match ctx.instruction.op1_source()? {
        Op1Source::Op0 => {
            // The base is the pointer *stored* at the first operand's
            // address, not the address itself. It cannot be deduced later,
            // so it has to be known now.
            if !ctx.flags.has_op0() {
                return Err(Error::UnknownOp0);
            }

            *ctx.op0.pointer().ok_or(Error::TypeMismatch)?
        }
        Op1Source::Immediate => {
            if ctx.instruction.op1_offset() != 1 {
                return Err(Error::InvalidImmediateOffset);
            }

            ctx.flags.insert(StepContextFlags::SIZE_TWO);
            vm.cpu.pc
        }
        Op1Source::FP => vm.cpu.fp,
        Op1Source::AP => vm.cpu.ap,
    };

    ctx.op1_addr = base.offset_by(ctx.instruction.op1_offset())?;

    if let Some(value) = vm.memory.get(&ctx.op1_addr) {
        ctx.op1 = value.copied();
        ctx.flags.insert(StepContextFlags::OP1_ASSERTED);
    }

    Ok(())
}

/// Runs the deduction cascade over the operands that memory does not know.
///
/// Operands are deduced in a fixed order: op0 first, then op1, then the
/// result, then the destination. Every deduced operand is written back to its
/// memory address through the write-once [`Memory::insert`], so re-deriving a
/// value that is already present succeeds while a contradiction fails the
/// step.
fn resolve_operands(ctx: &mut StepContext, vm: &mut CairoVM) -> Result<(), Error> {
    if !ctx.flags.has_op0() {
        let (op0, res) = deduce_op0(ctx, &vm.cpu)?;

        if let Some(op0) = op0 {
            vm.memory.insert(ctx.op0_addr, op0)?;
            ctx.op0 = op0;
            ctx.flags.insert(StepContextFlags::OP0_DEDUCED);
        }

        if let Some(res) = res {
            ctx.res = res;
            ctx.flags.insert(StepContextFlags::RES_KNOWN);
        }
    }

    if !ctx.flags.has_op1() {
        let (op1, res) = deduce_op1(ctx)?;

        if let Some(op1) = op1 {
            vm.memory.insert(ctx.op1_addr, op1)?;
            ctx.op1 = op1;
            ctx.flags.insert(StepContextFlags::OP1_DEDUCED);
        }

        if !ctx.flags.has_res() {
            if let Some(res) = res {
                ctx.res = res;
                ctx.flags.insert(StepContextFlags::RES_KNOWN);
            }
        }
    }

    if !ctx.flags.has_res() {
        if let Some(res) = compute_res(ctx)? {
            ctx.res = res;
            ctx.flags.insert(StepContextFlags::RES_KNOWN);
        }
    }

    if !ctx.flags.has_dst() {
        if let Some(dst) = deduce_dst(ctx, &vm.cpu)? {
            vm.memory.insert(ctx.dst_addr, dst)?;
            ctx.dst = dst;
            ctx.flags.insert(StepContextFlags::DST_DEDUCED);
        }
    }

    Ok(())
}

/// Attempts to deduce the first operand of an instruction from its OP code,
/// destination and second operand.
///
/// Returns the deduced operand and, when the deduction also fixes it, the
/// result of the instruction.
fn deduce_op0(ctx: &StepContext, cpu: &Cpu) -> Result<(Option<Value>, Option<Value>), Error> {
    match ctx.instruction.op_code()? {
        OpCode::Call => {
            // In a `Call` instruction, op0 holds the return address.
            let return_pc = cpu.pc.add_offset(ctx.flags.instruction_size())?;
            Ok((Some(return_pc.into()), None))
        }
        OpCode::AssertEq => match ctx.instruction.result_logic()? {
            ResultLogic::Add if ctx.flags.has_dst() && ctx.flags.has_op1() => {
                //     dst = op0 + op1
                // =>  op0 = dst - op1
                let op0 = ctx.dst.subtract(&ctx.op1)?;
                Ok((Some(op0), Some(ctx.dst)))
            }
            ResultLogic::Mul if ctx.flags.has_dst() && ctx.flags.has_op1() => {
                //     dst = op0 * op1
                // =>  op0 = dst / op1
                //
                // A division that cannot be performed is not an error at this
                // point: the operand may still be resolved by a later stage.
                match ctx.dst.divide(&ctx.op1) {
                    Ok(op0) => Ok((Some(op0), Some(ctx.dst))),
                    Err(_) => Ok((None, None)),
                }
            }
            _ => Ok((None, None)),
        },
        _ => Ok((None, None)),
    }
}

/// Attempts to deduce the second operand of an instruction from its OP code,
/// destination and first operand.
///
/// Returns the deduced operand and, when the deduction also fixes it, the
/// result of the instruction.
fn deduce_op1(ctx: &StepContext) -> Result<(Option<Value>, Option<Value>), Error> {
    if ctx.instruction.op_code()? != OpCode::AssertEq {
        return Ok((None, None));
    }

    match ctx.instruction.result_logic()? {
        ResultLogic::Op1 if ctx.flags.has_dst() => {
            //    dst = op1
            Ok((Some(ctx.dst), Some(ctx.dst)))
        }
        ResultLogic::Add if ctx.flags.has_dst() && ctx.flags.has_op0() => {
            //     dst = op0 + op1
            // =>  op1 = dst - op0
            let op1 = ctx.dst.subtract(&ctx.op0)?;
            Ok((Some(op1), Some(ctx.dst)))
        }
        ResultLogic::Mul if ctx.flags.has_dst() && ctx.flags.has_op0() => {
            //     dst = op0 * op1
            // =>  op1 = dst / op0
            //
            // Same swallowed-failure rule as when deducing op0.
            match ctx.dst.divide(&ctx.op0) {
                Ok(op1) => Ok((Some(op1), Some(ctx.dst))),
                Err(_) => Ok((None, None)),
            }
        }
        _ => Ok((None, None)),
    }
}

/// Computes the result of an instruction from the operands that are known.
///
/// Each result logic consumes only the operands it names: the value of op1
/// alone is enough for [`ResultLogic::Op1`], while the additive and
/// multiplicative logics need both operands. An unconstrained instruction has
/// no result.
fn compute_res(ctx: &StepContext) -> Result<Option<Value>, Error> {
    match ctx.instruction.result_logic()? {
        ResultLogic::Op1 if ctx.flags.has_op1() => Ok(Some(ctx.op1)),
        ResultLogic::Add if ctx.flags.has_op0() && ctx.flags.has_op1() => {
            ctx.op0.add(&ctx.op1).map(Some)
        }
        ResultLogic::Mul if ctx.flags.has_op0() && ctx.flags.has_op1() => {
            ctx.op0.multiply(&ctx.op1).map(Some)
        }
        _ => Ok(None),
    }
}

/// Attempts to deduce the destination operand of an instruction from its OP
/// code and result.
fn deduce_dst(ctx: &StepContext, cpu: &Cpu) -> Result<Option<Value>, Error> {
    match ctx.instruction.op_code()? {
        // An `AssertEq` instruction pins its destination to its result.
        OpCode::AssertEq if ctx.flags.has_res() => Ok(Some(ctx.res)),
        // A `Call` instruction saves the current frame pointer in dst.
        OpCode::Call => Ok(Some(cpu.fp.into())),
        _ => Ok(None),
    }
}

/// Enforces the assertions tied to the OP code of an instruction, once all
/// operands have been resolved.
fn assert_op_code(ctx: &StepContext, vm: &CairoVM) -> Result<(), Error> {
    match ctx.instruction.op_code()? {
        OpCode::AssertEq => {
            if !ctx.flags.has_res() {
                return Err(Error::UnconstrainedRes);
            }

            if !ctx.flags.has_dst() || ctx.dst != ctx.res {
                return Err(Error::DiffAssertValues);
            }
        }
        OpCode::Call => {
            let return_pc = vm.cpu.pc.add_offset(ctx.flags.instruction_size())?;

            if !ctx.flags.has_op0() || ctx.op0 != return_pc {
                return Err(Error::InvalidOp0ForCall);
            }

            if !ctx.flags.has_dst() || ctx.dst != vm.cpu.fp {
                return Err(Error::InvalidDstForCall);
            }
        }
        _ => (),
    }

    Ok(())
}

/// Computes the next values of the three registers from the *current*
/// registers and the resolved operands.
///
/// The computed values are stored in the context and committed by the caller
/// only once all three rules have succeeded.
fn compute_next_registers(ctx: &mut StepContext, vm: &CairoVM) -> Result<(), Error> {
    let size = ctx.flags.instruction_size();

    ctx.next_pc = match ctx.instruction.pc_update()? {
        PcUpdate::Regular => vm.cpu.pc.add_offset(size)?,
        PcUpdate::AbsoluteJump => {
            if !ctx.flags.has_res() {
                return Err(Error::InvalidJumpTarget);
            }

            *ctx.res.pointer().ok_or(Error::InvalidJumpTarget)?
        }
        PcUpdate::RelativeJump => {
            if !ctx.flags.has_res() {
                return Err(Error::InvalidJumpRelTarget);
            }

            let offset = ctx.res.scalar().ok_or(Error::InvalidJumpRelTarget)?;
            vm.cpu.pc.add_felt(offset)?
        }
        PcUpdate::ConditionalJump => {
            if !ctx.flags.has_dst() {
                return Err(Error::UnconstrainedJnzDst);
            }

            if ctx.dst.is_zero() {
                vm.cpu.pc.add_offset(size)?
            } else {
                if !ctx.flags.has_op1() {
                    return Err(Error::InvalidJnzOp1);
                }

                let offset = ctx.op1.scalar().ok_or(Error::InvalidJnzOp1)?;
                vm.cpu.pc.add_felt(offset)?
            }
        }
    };

    ctx.next_ap = match ctx.instruction.ap_update()? {
        ApUpdate::Regular => vm.cpu.ap,
        ApUpdate::AddResult => {
            if !ctx.flags.has_res() {
                return Err(Error::UnconstrainedRes);
            }

            let amount = ctx.res.scalar().ok_or(Error::TypeMismatch)?;
            vm.cpu.ap.add_felt(amount)?
        }
        ApUpdate::Increment => vm.cpu.ap.add_offset(1)?,
        ApUpdate::Increment2 => vm.cpu.ap.add_offset(2)?,
    };

    ctx.next_fp = match ctx.instruction.op_code()? {
        // The callee's frame starts right after the two cells the call
        // allocated for the saved frame.
        OpCode::Call => vm.cpu.ap.add_offset(2)?,
        OpCode::Ret => {
            if !ctx.flags.has_dst() {
                return Err(Error::InvalidFpUpdate);
            }

            *ctx.dst.pointer().ok_or(Error::InvalidFpUpdate)?
        }
        _ => vm.cpu.fp,
    };

    Ok(())
}

bitflags! {
    /// Some flags associated with a [`StepContext`].
    #[derive(Debug, Clone, Copy)]
    struct StepContextFlags: u8 {
        /// The destination operand was deduced from the other operands.
        const DST_DEDUCED = 1 << 0;
        /// The destination operand was asserted by an existing memory cell.
        const DST_ASSERTED = 1 << 1;
        /// The first operand was deduced from the other operands.
        const OP0_DEDUCED = 1 << 2;
        /// The first operand was asserted by an existing memory cell.
        const OP0_ASSERTED = 1 << 3;
        /// The second operand was deduced from the other operands.
        const OP1_DEDUCED = 1 << 4;
        /// The second operand was asserted by an existing memory cell.
        const OP1_ASSERTED = 1 << 5;
        /// The result of the instruction has been computed.
        const RES_KNOWN = 1 << 6;
        /// The instruction has a size of two cells instead of one.
        const SIZE_TWO = 1 << 7;
    }
}

impl StepContextFlags {
    /// Returns whether the destination operand of the instruction is known.
    #[inline(always)]
    const fn has_dst(self) -> bool {
        self.intersects(Self::DST_ASSERTED.union(Self::DST_DEDUCED))
    }

    /// Returns whether the first operand of the instruction is known.
    #[inline(always)]
    const fn has_op0(self) -> bool {
        self.intersects(Self::OP0_ASSERTED.union(Self::OP0_DEDUCED))
    }

    /// Returns whether the second operand of the instruction is known.
    #[inline(always)]
    const fn has_op1(self) -> bool {
        self.intersects(Self::OP1_ASSERTED.union(Self::OP1_DEDUCED))
    }

    /// Returns whether the result of the instruction is known.
    #[inline(always)]
    const fn has_res(self) -> bool {
        self.contains(Self::RES_KNOWN)
    }

    /// Returns the size of the instruction in memory cells.
    #[inline(always)]
    const fn instruction_size(self) -> usize {
        if self.contains(Self::SIZE_TWO) {
            2
        } else {
            1
        }
    }
}

/// Stores the state that must be kept around while executing a single
/// instruction.
struct StepContext {
    /// The instruction being executed.
    instruction: Instruction,
    /// The address of the destination operand.
    dst_addr: Pointer,
    /// The value of the destination operand.
    ///
    /// Only holds a meaningful value if the `DST_ASSERTED` flag or the
    /// `DST_DEDUCED` flag is set.
    dst: Value,
    /// The address of the first operand.
    op0_addr: Pointer,
    /// The value of the first operand.
    ///
    /// Only holds a meaningful value if the `OP0_ASSERTED` flag or the
    /// `OP0_DEDUCED` flag is set.
    op0: Value,
    /// The address of the second operand.
    op1_addr: Pointer,
    /// The value of the second operand.
    ///
    /// Only holds a meaningful value if the `OP1_ASSERTED` flag or the
    /// `OP1_DEDUCED` flag is set.
    op1: Value,
    /// The result of the instruction.
    ///
    /// Only holds a meaningful value if the `RES_KNOWN` flag is set.
    res: Value,
    /// Some flags associated with the context.
    flags: StepContextFlags,
    /// The next value of the **Program Counter**.
    next_pc: Pointer,
    /// The next value of the **Allocation Pointer**.
    next_ap: Pointer,
    /// The next value of the **Frame Pointer**.
    next_fp: Pointer,
}

impl StepContext {
    /// Creates a new [`StepContext`] for the provided instruction.
    ///
    /// All other fields are initialized to dummy values; the flags track
    /// which of them have been given a meaningful value.
    const fn initial(instruction: Instruction) -> Self {
        const NULL: Pointer = Pointer::new(0, 0);
        const UNKNOWN: Value = Value::Scalar(Felt::ZERO);

        Self {
            instruction,
            dst_addr: NULL,
            dst: UNKNOWN,
            op0_addr: NULL,
            op0: UNKNOWN,
            op1_addr: NULL,
            op1: UNKNOWN,
            res: UNKNOWN,
            flags: StepContextFlags::empty(),
            next_pc: NULL,
            next_ap: NULL,
            next_fp: NULL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::instr::tests::Encoding;
    use crate::trace::NoopTrace;

    fn felt(value: u64) -> Value {
        Value::Scalar(Felt::from(value))
    }

    fn ptr(segment: usize, offset: usize) -> Value {
        Value::Pointer(Pointer::new(segment, offset))
    }

    /// Creates a machine with the given words loaded in a program segment
    /// (segment 0) and an empty execution segment (segment 1), with `pc` at
    /// the start of the program and `ap`/`fp` at the given offsets of the
    /// execution segment.
    fn machine(program: &[Value], ap: usize, fp: usize) -> CairoVM {
        let mut vm = CairoVM::new();
        let program_base = vm.add_segment();
        let execution_base = vm.add_segment();

        vm.load_data(program_base, program).unwrap();
        vm.set_registers(
            program_base,
            Pointer::new(execution_base.segment, ap),
            Pointer::new(execution_base.segment, fp),
        );

        vm
    }

    fn registers(vm: &CairoVM) -> (Pointer, Pointer, Pointer) {
        (vm.cpu().pc, vm.cpu().ap, vm.cpu().fp)
    }

    #[test]
    fn assert_eq_deduces_and_writes_back_dst() {
        // [fp + 0] = [ap + 0], with [ap + 0] known and [fp + 0] empty.
        let word = Encoding {
            off_dst: 0,
            off_op0: 1,
            off_op1: 0,
            dst_fp: true,
            op1_src: 4,
            res_logic: 0,
            op_code: 4,
            ..Encoding::default()
        }
        .word();

        let mut vm = machine(&[felt(word)], 1, 0);
        vm.insert(Pointer::new(1, 1), felt(7)).unwrap();

        vm.step(&mut NoopTrace).unwrap();

        let dst = vm.memory().get(&Pointer::new(1, 0)).unwrap().copied();
        assert_eq!(dst, felt(7));
        assert_eq!(registers(&vm), (
            Pointer::new(0, 1),
            Pointer::new(1, 1),
            Pointer::new(1, 0),
        ));
    }

    #[test]
    fn assert_eq_deduces_and_writes_back_op0() {
        // [fp + 0] = [ap + 1] + [ap + 0], with op0 at [ap + 1] empty.
        let word = Encoding {
            off_dst: 0,
            off_op0: 1,
            off_op1: 0,
            dst_fp: true,
            op1_src: 4,
            res_logic: 1,
            op_code: 4,
            ..Encoding::default()
        }
        .word();

        let mut vm = machine(&[felt(word)], 1, 0);
        vm.insert(Pointer::new(1, 0), felt(10)).unwrap(); // dst
        vm.insert(Pointer::new(1, 1), felt(4)).unwrap(); // op1

        vm.step(&mut NoopTrace).unwrap();

        let op0 = vm.memory().get(&Pointer::new(1, 2)).unwrap().copied();
        assert_eq!(op0, felt(6));
    }

    #[test]
    fn assert_eq_rejects_contradicting_values() {
        let word = Encoding {
            off_dst: 0,
            off_op0: 1,
            off_op1: 0,
            dst_fp: true,
            op1_src: 4,
            res_logic: 0,
            op_code: 4,
            ..Encoding::default()
        }
        .word();

        let mut vm = machine(&[felt(word)], 1, 0);
        vm.insert(Pointer::new(1, 0), felt(8)).unwrap(); // dst
        vm.insert(Pointer::new(1, 1), felt(7)).unwrap(); // op1

        let before = registers(&vm);
        assert_eq!(vm.step(&mut NoopTrace), Err(Error::DiffAssertValues));
        assert_eq!(registers(&vm), before);
        assert_eq!(vm.current_step(), 0);
    }

    #[test]
    fn assert_eq_with_unresolvable_result_fails() {
        // [fp + 0] = [ap + 1] + [ap + 0], with dst and op0 both empty: the
        // cascade has no route to a result.
        let word = Encoding {
            off_dst: 0,
            off_op0: 1,
            off_op1: 0,
            dst_fp: true,
            op1_src: 4,
            res_logic: 1,
            op_code: 4,
            ..Encoding::default()
        }
        .word();

        let mut vm = machine(&[felt(word)], 1, 0);
        vm.insert(Pointer::new(1, 1), felt(4)).unwrap(); // op1 only

        assert_eq!(vm.step(&mut NoopTrace), Err(Error::UnconstrainedRes));
    }

    #[test]
    fn call_saves_the_frame_and_jumps() {
        // call abs [target], with the target pointer stored as the
        // instruction's immediate value.
        let word = Encoding {
            off_dst: 0,
            off_op0: 1,
            off_op1: 1,
            op1_src: 1,
            res_logic: 0,
            pc_update: 1,
            op_code: 1,
            ..Encoding::default()
        }
        .word();

        let mut vm = machine(&[felt(word), ptr(0, 5)], 0, 0);

        vm.step(&mut NoopTrace).unwrap();

        // The two cells allocated by the call hold the saved frame pointer
        // and the return address.
        let saved_fp = vm.memory().get(&Pointer::new(1, 0)).unwrap().copied();
        let return_pc = vm.memory().get(&Pointer::new(1, 1)).unwrap().copied();
        assert_eq!(saved_fp, ptr(1, 0));
        assert_eq!(return_pc, ptr(0, 2));

        assert_eq!(registers(&vm), (
            Pointer::new(0, 5),
            Pointer::new(1, 2),
            Pointer::new(1, 2),
        ));
    }

    #[test]
    fn call_rejects_a_poisoned_return_cell() {
        let word = Encoding {
            off_dst: 0,
            off_op0: 1,
            off_op1: 1,
            op1_src: 1,
            res_logic: 0,
            pc_update: 1,
            op_code: 1,
            ..Encoding::default()
        }
        .word();

        let mut vm = machine(&[felt(word), ptr(0, 5)], 0, 0);
        // The cell that should receive the return address already holds an
        // unrelated scalar.
        vm.insert(Pointer::new(1, 1), felt(99)).unwrap();

        assert_eq!(vm.step(&mut NoopTrace), Err(Error::InvalidOp0ForCall));
    }

    #[test]
    fn aliased_deduction_targets_conflict() {
        // A call whose dst and op0 addresses alias: the cascade first writes
        // the return address, then tries to write the saved frame pointer to
        // the same cell.
        let word = Encoding {
            off_dst: 1,
            off_op0: 1,
            off_op1: 1,
            op1_src: 1,
            res_logic: 0,
            pc_update: 1,
            op_code: 1,
            ..Encoding::default()
        }
        .word();

        let mut vm = machine(&[felt(word), ptr(0, 5)], 0, 0);

        let before = registers(&vm);
        assert_eq!(vm.step(&mut NoopTrace), Err(Error::WriteOnce));
        assert_eq!(registers(&vm), before);

        // The first write of the cascade persists.
        let cell = vm.memory().get(&Pointer::new(1, 1)).unwrap().copied();
        assert_eq!(cell, ptr(0, 2));
    }

    #[test]
    fn ret_restores_the_frame() {
        // ret: jump to [fp - 1], restore fp from [fp - 2].
        let word = Encoding {
            off_dst: -2,
            off_op0: -1,
            off_op1: -1,
            dst_fp: true,
            op0_fp: true,
            op1_src: 2,
            res_logic: 0,
            pc_update: 1,
            op_code: 2,
            ..Encoding::default()
        }
        .word();

        let mut vm = machine(&[felt(word)], 5, 2);
        vm.insert(Pointer::new(1, 0), ptr(1, 0)).unwrap(); // saved fp
        vm.insert(Pointer::new(1, 1), ptr(0, 7)).unwrap(); // return pc

        vm.step(&mut NoopTrace).unwrap();

        assert_eq!(registers(&vm), (
            Pointer::new(0, 7),
            Pointer::new(1, 5),
            Pointer::new(1, 0),
        ));
    }

    #[test]
    fn jnz_takes_the_branch_on_a_non_zero_dst() {
        let word = Encoding {
            off_dst: 0,
            off_op0: 0,
            off_op1: 1,
            op1_src: 1,
            res_logic: 0,
            pc_update: 4,
            ..Encoding::default()
        }
        .word();

        let mut vm = machine(&[felt(word), felt(10)], 0, 0);
        vm.insert(Pointer::new(1, 0), felt(5)).unwrap(); // dst

        vm.step(&mut NoopTrace).unwrap();

        assert_eq!(registers(&vm), (
            Pointer::new(0, 10),
            Pointer::new(1, 0),
            Pointer::new(1, 0),
        ));
    }

    #[test]
    fn jnz_falls_through_on_a_zero_dst() {
        let word = Encoding {
            off_dst: 0,
            off_op0: 0,
            off_op1: 1,
            op1_src: 1,
            res_logic: 0,
            pc_update: 4,
            ..Encoding::default()
        }
        .word();

        let mut vm = machine(&[felt(word), felt(10)], 0, 0);
        vm.insert(Pointer::new(1, 0), felt(0)).unwrap();

        vm.step(&mut NoopTrace).unwrap();

        // The immediate makes the instruction span two cells.
        assert_eq!(vm.cpu().pc, Pointer::new(0, 2));
    }

    #[test]
    fn jnz_treats_the_null_pointer_as_zero() {
        let word = Encoding {
            off_dst: 0,
            off_op0: 0,
            off_op1: 1,
            op1_src: 1,
            res_logic: 0,
            pc_update: 4,
            ..Encoding::default()
        }
        .word();

        let mut vm = machine(&[felt(word), felt(10)], 0, 0);
        vm.insert(Pointer::new(1, 0), ptr(0, 0)).unwrap();

        vm.step(&mut NoopTrace).unwrap();

        assert_eq!(vm.cpu().pc, Pointer::new(0, 2));
    }

    #[test]
    fn jnz_requires_a_known_dst() {
        let word = Encoding {
            off_dst: 0,
            off_op0: 0,
            off_op1: 1,
            op1_src: 1,
            res_logic: 0,
            pc_update: 4,
            ..Encoding::default()
        }
        .word();

        let mut vm = machine(&[felt(word), felt(10)], 0, 0);

        assert_eq!(vm.step(&mut NoopTrace), Err(Error::UnconstrainedJnzDst));
    }

    #[test]
    fn absolute_jumps_require_a_pointer_result() {
        let word = Encoding {
            off_op1: 1,
            op1_src: 1,
            res_logic: 0,
            pc_update: 1,
            ..Encoding::default()
        }
        .word();

        let mut vm = machine(&[felt(word), felt(5)], 0, 0);

        assert_eq!(vm.step(&mut NoopTrace), Err(Error::InvalidJumpTarget));
    }

    #[test]
    fn relative_jumps_require_a_scalar_result() {
        let word = Encoding {
            off_op1: 1,
            op1_src: 1,
            res_logic: 0,
            pc_update: 2,
            ..Encoding::default()
        }
        .word();

        let mut vm = machine(&[felt(word), ptr(0, 5)], 0, 0);

        assert_eq!(vm.step(&mut NoopTrace), Err(Error::InvalidJumpRelTarget));
    }

    #[test]
    fn relative_jumps_add_the_result_to_pc() {
        let word = Encoding {
            off_op1: 1,
            op1_src: 1,
            res_logic: 0,
            pc_update: 2,
            ..Encoding::default()
        }
        .word();

        let mut vm = machine(&[felt(word), felt(40)], 0, 0);

        vm.step(&mut NoopTrace).unwrap();

        assert_eq!(vm.cpu().pc, Pointer::new(0, 40));
    }

    #[test]
    fn high_bit_set_fails_the_step_without_mutation() {
        let mut vm = machine(&[Value::Scalar(Felt::from(1u64 << 63))], 0, 0);

        let before = registers(&vm);
        assert_eq!(vm.step(&mut NoopTrace), Err(Error::HighBitSet));
        assert_eq!(registers(&vm), before);
        assert_eq!(vm.current_step(), 0);
        assert!(vm.memory().get(&Pointer::new(1, 0)).is_none());
    }

    #[test]
    fn fetching_an_empty_cell_ends_the_run() {
        let mut vm = machine(&[], 0, 0);

        assert_eq!(vm.step(&mut NoopTrace), Err(Error::EndOfInstructions));
    }

    #[test]
    fn fetching_a_pointer_is_not_an_instruction() {
        let mut vm = machine(&[ptr(0, 1)], 0, 0);

        assert_eq!(
            vm.step(&mut NoopTrace),
            Err(Error::InstructionEncodingError)
        );
    }

    #[test]
    fn fetching_an_oversized_scalar_is_not_an_instruction() {
        let mut vm = machine(&[Value::Scalar(Felt::MAX)], 0, 0);

        assert_eq!(
            vm.step(&mut NoopTrace),
            Err(Error::InstructionEncodingError)
        );
    }

    #[test]
    fn op1_through_an_unknown_op0_fails() {
        // op1_src = Op0 with an empty op0 cell: the base pointer of the
        // second operand cannot be resolved.
        let word = Encoding {
            op_code: 4,
            res_logic: 0,
            ..Encoding::default()
        }
        .word();

        let mut vm = machine(&[felt(word)], 0, 0);

        assert_eq!(vm.step(&mut NoopTrace), Err(Error::UnknownOp0));
    }

    #[test]
    fn immediates_must_sit_right_after_the_instruction() {
        let word = Encoding {
            off_op1: 0,
            op1_src: 1,
            ..Encoding::default()
        }
        .word();

        let mut vm = machine(&[felt(word)], 0, 0);

        assert_eq!(
            vm.step(&mut NoopTrace),
            Err(Error::InvalidImmediateOffset)
        );
    }

    #[test]
    fn ap_can_advance_by_the_result() {
        // Two instructions in a row, each bumping ap by its immediate.
        let first = Encoding {
            off_op1: 1,
            op1_src: 1,
            res_logic: 0,
            ap_update: 1,
            ..Encoding::default()
        }
        .word();

        let mut vm = machine(&[felt(first), felt(3), felt(first), felt(2)], 0, 0);

        vm.step(&mut NoopTrace).unwrap();
        assert_eq!(vm.cpu().ap, Pointer::new(1, 3));

        vm.step(&mut NoopTrace).unwrap();
        assert_eq!(vm.cpu().ap, Pointer::new(1, 5));
        assert_eq!(vm.cpu().pc, Pointer::new(0, 4));
        assert_eq!(vm.current_step(), 2);
    }

    #[test]
    fn the_trace_sees_the_registers_before_the_update() {
        struct Recorder {
            steps: Vec<(Pointer, u64)>,
        }

        impl Trace for Recorder {
            fn on_step(&mut self, cpu: &Cpu, instruction: &Instruction) {
                self.steps.push((cpu.pc, instruction.0));
            }
        }

        let word = Encoding {
            off_op1: 1,
            op1_src: 1,
            res_logic: 0,
            ap_update: 1,
            ..Encoding::default()
        }
        .word();

        let mut vm = machine(&[felt(word), felt(0), felt(word), felt(0)], 0, 0);
        let mut recorder = Recorder { steps: Vec::new() };

        vm.step(&mut recorder).unwrap();
        vm.step(&mut recorder).unwrap();

        assert_eq!(recorder.steps, vec![
            (Pointer::new(0, 0), word),
            (Pointer::new(0, 2), word),
        ]);
    }

    #[test]
    fn mul_deduction_swallows_division_by_zero() {
        // [fp + 0] = [ap + 1] * [ap + 0] with op1 = 0 and dst known: op0
        // cannot be deduced, so the result stays unconstrained and the
        // assertion fails rather than the division.
        let word = Encoding {
            off_dst: 0,
            off_op0: 1,
            off_op1: 0,
            dst_fp: true,
            op1_src: 4,
            res_logic: 2,
            op_code: 4,
            ..Encoding::default()
        }
        .word();

        let mut vm = machine(&[felt(word)], 1, 0);
        vm.insert(Pointer::new(1, 0), felt(10)).unwrap(); // dst
        vm.insert(Pointer::new(1, 1), felt(0)).unwrap(); // op1

        assert_eq!(vm.step(&mut NoopTrace), Err(Error::UnconstrainedRes));
    }

    #[test]
    fn mul_deduction_divides_when_it_can() {
        let word = Encoding {
            off_dst: 0,
            off_op0: 1,
            off_op1: 0,
            dst_fp: true,
            op1_src: 4,
            res_logic: 2,
            op_code: 4,
            ..Encoding::default()
        }
        .word();

        let mut vm = machine(&[felt(word)], 1, 0);
        vm.insert(Pointer::new(1, 0), felt(42)).unwrap(); // dst
        vm.insert(Pointer::new(1, 1), felt(6)).unwrap(); // op1

        vm.step(&mut NoopTrace).unwrap();

        let op0 = vm.memory().get(&Pointer::new(1, 2)).unwrap().copied();
        assert_eq!(op0, felt(7));
    }
}
