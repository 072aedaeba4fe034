//! Defines the [`Pointer`] type.

use std::fmt;

use num_traits::ToPrimitive;
use starknet_types_core::felt::Felt;

use crate::error::Error;

/// A pointer within a [`Memory`](super::Memory) segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pointer {
    /// The index of the segment in the memory.
    ///
    /// This can be thought of as the provenance of the pointer.
    pub segment: usize,
    /// The offset within the segment.
    pub offset: usize,
}

impl Pointer {
    /// Creates a new [`Pointer`] from a segment index and an offset within
    /// that segment.
    #[inline(always)]
    pub const fn new(segment: usize, offset: usize) -> Self {
        Self { segment, offset }
    }

    /// Applies a signed 16-bit offset to `self`, as found in an instruction
    /// word.
    ///
    /// Fails with [`Error::OffsetUnderflow`] if the resulting offset would be
    /// negative.
    pub fn offset_by(self, offset: i16) -> Result<Self, Error> {
        let offset = self
            .offset
            .checked_add_signed(offset as isize)
            .ok_or(Error::OffsetUnderflow)?;

        Ok(Self {
            segment: self.segment,
            offset,
        })
    }

    /// Adds an unsigned offset to `self`.
    pub fn add_offset(self, offset: usize) -> Result<Self, Error> {
        let offset = self
            .offset
            .checked_add(offset)
            .ok_or(Error::PointerTooLarge)?;

        Ok(Self {
            segment: self.segment,
            offset,
        })
    }

    /// Subtracts an unsigned offset from `self`.
    ///
    /// Fails with [`Error::OffsetUnderflow`] if the resulting offset would be
    /// negative.
    pub fn sub_offset(self, offset: usize) -> Result<Self, Error> {
        let offset = self
            .offset
            .checked_sub(offset)
            .ok_or(Error::OffsetUnderflow)?;

        Ok(Self {
            segment: self.segment,
            offset,
        })
    }

    /// Adds a scalar to the offset of `self`.
    ///
    /// The scalar must fit within the physical address space of the machine,
    /// otherwise [`Error::PointerTooLarge`] is returned.
    pub fn add_felt(self, value: &Felt) -> Result<Self, Error> {
        let offset = value.to_usize().ok_or(Error::PointerTooLarge)?;
        self.add_offset(offset)
    }

    /// Subtracts a scalar from the offset of `self`.
    pub fn sub_felt(self, value: &Felt) -> Result<Self, Error> {
        let offset = value.to_usize().ok_or(Error::PointerTooLarge)?;
        self.sub_offset(offset)
    }

    /// Returns the distance between `self` and `other`, given that both refer
    /// to the same segment.
    ///
    /// Fails with [`Error::SegmentMismatch`] when the segments differ, and
    /// with [`Error::OffsetUnderflow`] when `other` lies past `self`.
    pub fn subtract(&self, other: &Self) -> Result<usize, Error> {
        if self.segment != other.segment {
            return Err(Error::SegmentMismatch);
        }

        self.offset
            .checked_sub(other.offset)
            .ok_or(Error::OffsetUnderflow)
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.segment, self.offset)
    }
}
