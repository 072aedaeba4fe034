//! Defines the [`Error`] type of the crate.

use thiserror::Error;

/// An error that might occur when executing a Cairo program.
///
/// Every variant is fatal to the step that produced it: the step's register
/// update is abandoned and the error is surfaced to the caller. Memory writes
/// performed earlier in the same step may persist; the write-once discipline
/// keeps them consistent with any later attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// The program counter points to a memory cell that holds no value.
    #[error("the program counter points past the known instructions")]
    EndOfInstructions,
    /// The memory cell referenced by the program counter did not contain a
    /// scalar fitting a 64-bit unsigned integer.
    #[error("the fetched memory cell does not encode an instruction")]
    InstructionEncodingError,
    /// The highest bit of an instruction word was set.
    ///
    /// Instruction words are 63 bits wide; bit 63 must always be clear.
    #[error("the high bit of the instruction word is set")]
    HighBitSet,

    /// The source of the second operand of an instruction was invalid.
    #[error("the op1 source of the instruction is invalid")]
    InvalidOp1Src,
    /// The result logic of an instruction was invalid.
    #[error("the result logic of the instruction is invalid")]
    InvalidResLogic,
    /// The update rule for the **Program Counter** of an instruction was
    /// invalid.
    #[error("the pc update rule of the instruction is invalid")]
    InvalidPcUpdate,
    /// The update rule for the **Allocation Pointer** of an instruction was
    /// invalid.
    #[error("the ap update rule of the instruction is invalid")]
    InvalidApUpdate,
    /// The OP code of an instruction was invalid.
    #[error("the op code of the instruction is invalid")]
    InvalidOpcode,
    /// In a `Call` instruction, the only allowed encoded ap update is the
    /// regular one.
    #[error("a call instruction must use the regular ap update rule")]
    InvalidApUpdateInCall,
    /// An immediate instruction must find its immediate value directly after
    /// the instruction word, i.e. its op1 offset must be 1.
    #[error("an immediate instruction requires an op1 offset of 1")]
    InvalidImmediateOffset,

    /// A pointer operation produced a negative offset.
    #[error("pointer arithmetic produced a negative offset")]
    OffsetUnderflow,
    /// Tried to take the distance between two pointers with different
    /// segments.
    #[error("cannot operate on two pointers with different segments")]
    SegmentMismatch,
    /// An arithmetic operation was attempted on value variants that do not
    /// support it, such as multiplying by a pointer.
    #[error("the operation is not defined for these value types")]
    TypeMismatch,
    /// A scalar used in pointer arithmetic cannot be represented within the
    /// physical memory of the machine.
    #[error("the value is too large to be used as a pointer offset")]
    PointerTooLarge,
    /// The second operand is addressed through the first one, but the first
    /// operand's memory cell holds no value.
    #[error("op1 is addressed through op0, but op0 is unknown")]
    UnknownOp0,

    /// Attempted to write to a segment that has not been allocated.
    #[error("the address lies outside the allocated segments")]
    SegmentOutOfBounds,
    /// Attempted to overwrite a memory cell with a different value.
    ///
    /// A cell may be written only while it is empty, or re-written with a
    /// value equal to the one it already holds.
    #[error("the memory cell already holds a different value")]
    WriteOnce,

    /// The instruction requires a result value, but none could be computed.
    #[error("the result of the instruction is unconstrained")]
    UnconstrainedRes,
    /// An `AssertEq` instruction found its destination and result unequal.
    #[error("assertion failed: dst does not equal the computed result")]
    DiffAssertValues,
    /// A `Call` instruction found op0 different from the return address.
    #[error("op0 of a call instruction must hold the return pc")]
    InvalidOp0ForCall,
    /// A `Call` instruction found dst different from the frame pointer.
    #[error("dst of a call instruction must hold the caller's fp")]
    InvalidDstForCall,
    /// A conditional jump requires its destination operand to be known.
    #[error("the destination of a conditional jump is unknown")]
    UnconstrainedJnzDst,
    /// An absolute jump requires a pointer result.
    #[error("the target of an absolute jump must be a pointer")]
    InvalidJumpTarget,
    /// A relative jump requires a scalar result.
    #[error("the offset of a relative jump must be a scalar")]
    InvalidJumpRelTarget,
    /// A taken conditional jump requires a scalar second operand.
    #[error("the offset of a conditional jump must be a scalar")]
    InvalidJnzOp1,
    /// A `Ret` instruction requires a pointer destination to restore the
    /// frame pointer from.
    #[error("the frame pointer can only be restored from a pointer")]
    InvalidFpUpdate,

    /// Attempted to divide by zero.
    #[error("division by zero")]
    DivisionByZero,
}
