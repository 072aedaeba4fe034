//! Defines the [`Instruction`] type, responsible for representing a single
//! Cairo bytecode instruction.
//!
//! An instruction word is 63 bits wide (the high bit of the 64-bit encoding
//! must be clear). From the least significant bit upward it packs three
//! biased 16-bit offsets (dst, op0, op1), two register selectors, the op1
//! source, the result logic, the pc and ap update rules and the OP code.

use std::fmt;

use crate::error::Error;

/// The bias applied to the three 16-bit offsets of an instruction word.
///
/// An encoded offset `b` represents the signed integer `b - 2^15`.
const OFFSET_BIAS: u16 = 1 << 15;

/// Decodes a biased 16-bit offset into its signed value.
#[inline(always)]
const fn from_biased(raw: u16) -> i16 {
    raw.wrapping_sub(OFFSET_BIAS) as i16
}

/// A register an operand of an instruction can be relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Register {
    /// The **Allocation Pointer**.
    AP = 0,
    /// The **Frame Pointer**.
    FP = 1,
}

/// A register/object the second operand of an instruction can be relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Op1Source {
    /// The pointer stored at the address of the first operand.
    Op0 = 0,
    /// The **Program Counter**; the operand is an immediate value stored
    /// directly after the instruction word.
    Immediate = 1,
    /// The **Frame Pointer**.
    FP = 2,
    /// The **Allocation Pointer**.
    AP = 4,
}

/// A possible result logic to be applied to the first and second operands of
/// an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResultLogic {
    /// The result is simply the value of the second operand.
    Op1 = 0,
    /// The result is the addition of the first and second operands.
    Add = 1,
    /// The result is the multiplication of the first and second operands.
    Mul = 2,
    /// The instruction constrains no result.
    ///
    /// This is the reading of an encoded `Op1` logic under a conditional
    /// jump, which bases its decision on the destination operand instead.
    Unconstrained = 3,
}

/// A possible way to update the **Program Counter** after an instruction has
/// been executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PcUpdate {
    /// The size of the instruction is added to the **Program Counter**.
    Regular = 0,
    /// The **Program Counter** is set to the result of the instruction.
    AbsoluteJump = 1,
    /// The result of the instruction is added to the **Program Counter**.
    RelativeJump = 2,
    /// If the destination operand of the instruction is zero, the **Program
    /// Counter** is updated according to the [`PcUpdate::Regular`] rule.
    /// Otherwise, the second operand is added to it.
    ConditionalJump = 4,
}

/// A possible way to update the **Allocation Pointer** after an instruction
/// has been executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ApUpdate {
    /// The **Allocation Pointer** remains unchanged.
    Regular = 0,
    /// The result of the instruction is added to the **Allocation Pointer**.
    AddResult = 1,
    /// The **Allocation Pointer** is incremented by one.
    Increment = 2,
    /// The **Allocation Pointer** is incremented by two.
    ///
    /// This is the reading of an encoded regular update in a `Call`
    /// instruction, which always allocates two cells for the saved frame.
    Increment2 = 3,
}

/// The OP code of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// The instruction does nothing specific.
    NoOp = 0,
    /// The instruction is calling into a subroutine.
    Call = 1,
    /// The instruction is returning from a subroutine.
    Ret = 2,
    /// The instruction is asserting a specific memory cell to a specific
    /// value.
    AssertEq = 4,
}

/// A single Cairo bytecode instruction.
///
/// The raw word is kept as-is; every field is extracted on demand through a
/// mask-and-shift accessor. Selector combinations outside the documented
/// layout surface as decode errors from the corresponding accessor.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Instruction(pub u64);

impl Instruction {
    /// Returns the offset applied to the destination operand of the
    /// instruction.
    #[inline(always)]
    pub const fn dst_offset(&self) -> i16 {
        from_biased(self.0 as u16)
    }

    /// Returns the offset applied to the first operand of the instruction.
    #[inline(always)]
    pub const fn op0_offset(&self) -> i16 {
        from_biased((self.0 >> 16) as u16)
    }

    /// Returns the offset applied to the second operand of the instruction.
    #[inline(always)]
    pub const fn op1_offset(&self) -> i16 {
        from_biased((self.0 >> 32) as u16)
    }

    /// The register that the destination operand of the instruction is
    /// relative to.
    #[inline(always)]
    pub fn dst_register(&self) -> Register {
        if self.0 & 0x0001_0000_0000_0000 != 0 {
            Register::FP
        } else {
            Register::AP
        }
    }

    /// The register that the first operand of the instruction is relative to.
    #[inline(always)]
    pub fn op0_register(&self) -> Register {
        if self.0 & 0x0002_0000_0000_0000 != 0 {
            Register::FP
        } else {
            Register::AP
        }
    }

    /// The source of the second operand of the instruction.
    #[inline(always)]
    pub fn op1_source(&self) -> Result<Op1Source, Error> {
        match self.0 & 0x001C_0000_0000_0000 {
            0x0000_0000_0000_0000 => Ok(Op1Source::Op0),
            0x0004_0000_0000_0000 => Ok(Op1Source::Immediate),
            0x0008_0000_0000_0000 => Ok(Op1Source::FP),
            0x0010_0000_0000_0000 => Ok(Op1Source::AP),
            _ => Err(Error::InvalidOp1Src),
        }
    }

    /// The result logic to be applied to the first and second operands of the
    /// instruction.
    ///
    /// An encoded [`ResultLogic::Op1`] reads as
    /// [`ResultLogic::Unconstrained`] when the instruction performs a
    /// conditional jump.
    #[inline(always)]
    pub fn result_logic(&self) -> Result<ResultLogic, Error> {
        match self.0 & 0x0060_0000_0000_0000 {
            0x0000_0000_0000_0000 => {
                if self.0 & 0x0380_0000_0000_0000 == 0x0200_0000_0000_0000 {
                    Ok(ResultLogic::Unconstrained)
                } else {
                    Ok(ResultLogic::Op1)
                }
            }
            0x0020_0000_0000_0000 => Ok(ResultLogic::Add),
            0x0040_0000_0000_0000 => Ok(ResultLogic::Mul),
            _ => Err(Error::InvalidResLogic),
        }
    }

    /// Returns the update rule to be applied to the **Program Counter** after
    /// the instruction has been executed.
    #[inline(always)]
    pub fn pc_update(&self) -> Result<PcUpdate, Error> {
        match self.0 & 0x0380_0000_0000_0000 {
            0x0000_0000_0000_0000 => Ok(PcUpdate::Regular),
            0x0080_0000_0000_0000 => Ok(PcUpdate::AbsoluteJump),
            0x0100_0000_0000_0000 => Ok(PcUpdate::RelativeJump),
            0x0200_0000_0000_0000 => Ok(PcUpdate::ConditionalJump),
            _ => Err(Error::InvalidPcUpdate),
        }
    }

    /// Returns the update rule to be applied to the **Allocation Pointer**
    /// after the instruction has been executed.
    ///
    /// A `Call` instruction always allocates two cells for the saved frame:
    /// its encoded regular update reads as [`ApUpdate::Increment2`], and any
    /// other encoded update is rejected.
    #[inline(always)]
    pub fn ap_update(&self) -> Result<ApUpdate, Error> {
        let call = self.0 & 0x7000_0000_0000_0000 == 0x1000_0000_0000_0000;

        match self.0 & 0x0C00_0000_0000_0000 {
            0x0000_0000_0000_0000 if call => Ok(ApUpdate::Increment2),
            0x0000_0000_0000_0000 => Ok(ApUpdate::Regular),
            0x0400_0000_0000_0000 if call => Err(Error::InvalidApUpdateInCall),
            0x0400_0000_0000_0000 => Ok(ApUpdate::AddResult),
            0x0800_0000_0000_0000 if call => Err(Error::InvalidApUpdateInCall),
            0x0800_0000_0000_0000 => Ok(ApUpdate::Increment),
            _ => Err(Error::InvalidApUpdate),
        }
    }

    /// Returns the OP code of the instruction.
    #[inline(always)]
    pub fn op_code(&self) -> Result<OpCode, Error> {
        match self.0 & 0x7000_0000_0000_0000 {
            0x0000_0000_0000_0000 => Ok(OpCode::NoOp),
            0x1000_0000_0000_0000 => Ok(OpCode::Call),
            0x2000_0000_0000_0000 => Ok(OpCode::Ret),
            0x4000_0000_0000_0000 => Ok(OpCode::AssertEq),
            _ => Err(Error::InvalidOpcode),
        }
    }

    /// Returns the size of the instruction in memory cells.
    ///
    /// Immediate instructions occupy two cells, all others one.
    #[inline(always)]
    pub fn size(&self) -> Result<usize, Error> {
        match self.op1_source()? {
            Op1Source::Immediate => Ok(2),
            _ => Ok(1),
        }
    }

    /// Returns whether the last bit of the instruction representation is set.
    ///
    /// A properly encoded instruction has this bit clear.
    #[inline(always)]
    pub const fn is_last_bit_set(&self) -> bool {
        self.0 & 0x8000_0000_0000_0000 != 0
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instruction")
            .field("dst_offset", &self.dst_offset())
            .field("op0_offset", &self.op0_offset())
            .field("op1_offset", &self.op1_offset())
            .field("dst_register", &self.dst_register())
            .field("op0_register", &self.op0_register())
            .field("op1_source", &self.op1_source())
            .field("result_logic", &self.result_logic())
            .field("pc_update", &self.pc_update())
            .field("ap_update", &self.ap_update())
            .field("op_code", &self.op_code())
            .finish()
    }
}
