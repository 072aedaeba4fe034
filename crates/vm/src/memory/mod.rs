//! Defines the [`Memory`] type, responsible for representing the memory of a
//! Cairo virtual machine.
//!
//! # Immutable Memory
//!
//! The memory of a Cairo virtual machine does not work the way regular
//! computer memory does. It is mathematically immutable: every operation that
//! would normally mutate memory instead *asserts* a memory cell to a specific
//! value. The value was previously unknown, and now it is defined. Any later
//! write to that cell must confirm the value is the same as the one it was
//! asserted to; conflicting writes fail.
//!
//! # Segments
//!
//! The total size of the memory is the size of the underlying field, which
//! cannot be represented directly. Programs therefore split their memory into
//! *segments*, contiguous blocks located *somewhere* in the machine's address
//! space, and every address is a [`Pointer`] made of a segment index and an
//! offset within that segment.

mod pointer;
mod segment;
mod value;

pub use self::pointer::*;
pub use self::segment::*;
pub use self::value::*;

use crate::error::Error;

/// Represents the memory of the Cairo virtual machine.
///
/// More information on the memory model can be found in the
/// [module-level documentation](self).
#[derive(Default, Debug, Clone)]
pub struct Memory {
    /// The segments that have been allocated in the memory.
    segments: Vec<Segment>,
}

impl Memory {
    /// Creates a new empty [`Memory`] with no allocated segments.
    pub const fn new() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Returns the number of segments that have been allocated so far.
    #[inline(always)]
    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    /// Allocates a fresh segment and returns a [`Pointer`] to its first cell.
    pub fn add_segment(&mut self) -> Pointer {
        let segment = self.segments.len();
        self.segments.push(Segment::new());
        Pointer::new(segment, 0)
    }

    /// Returns the value stored at `address`, if any.
    ///
    /// Addresses referencing unallocated segments or unknown cells read as
    /// `None` rather than an error; it is up to the caller to decide whether
    /// an undefined cell is a problem.
    pub fn get(&self, address: &Pointer) -> Option<ValueRef> {
        self.segments.get(address.segment)?.get(address.offset)
    }

    /// Asserts the cell at `address` to the given value.
    ///
    /// Fails with [`Error::SegmentOutOfBounds`] when the address references a
    /// segment that has not been allocated, and with [`Error::WriteOnce`]
    /// when the cell already holds a different value. Re-asserting a cell to
    /// the value it already holds succeeds.
    pub fn insert(&mut self, address: Pointer, value: Value) -> Result<(), Error> {
        let segment = self
            .segments
            .get_mut(address.segment)
            .ok_or(Error::SegmentOutOfBounds)?;

        segment.assert_eq(address.offset, value.as_ref())
    }

    /// Writes a block of values at consecutive addresses starting at `base`.
    ///
    /// Returns the first address past the written block.
    pub fn load_data(&mut self, base: Pointer, data: &[Value]) -> Result<Pointer, Error> {
        for (index, value) in data.iter().enumerate() {
            self.insert(base.add_offset(index)?, *value)?;
        }

        base.add_offset(data.len())
    }
}
