//! Defines the [`Segment`] type.

use std::fmt;

use starknet_types_core::felt::Felt;

use crate::error::Error;

use super::{Pointer, ValueRef};

/// A relocatable segment of memory accessible by the Cairo virtual machine.
///
/// # Representation
///
/// A program running in the Cairo virtual machine is technically allowed to
/// access any value within the address space of the machine, which has the
/// size of the underlying field. Because an address space of that size is not
/// realistically representable, programs split their memory into *segments*:
/// contiguous blocks whose final location in the address space is not decided
/// until the program has finished running. A program can therefore never rely
/// on the absolute location of a segment, which keeps fragmentation within a
/// segment small and lets us back each segment with flat arrays. Gaps may
/// still appear within a segment; they are stored as unknown cells.
///
/// Cell payloads and their discriminants are kept in two parallel arrays. A
/// [`Felt`] has an alignment of 8 bytes while the discriminant only needs a
/// single byte; storing them together would pad every cell by 7 bytes.
#[derive(Clone, Default)]
pub struct Segment {
    /// The discriminant of every cell allocated so far.
    ///
    /// Always exactly as long as `cells`.
    metadata: Vec<Metadata>,
    /// The payloads of the cells.
    ///
    /// An entry is initialized if and only if the corresponding `metadata`
    /// entry is not [`Metadata::Unknown`].
    cells: Vec<RawValue>,
}

impl Segment {
    /// Creates a new empty [`Segment`].
    ///
    /// No memory is allocated by this function.
    pub const fn new() -> Self {
        Self {
            metadata: Vec::new(),
            cells: Vec::new(),
        }
    }

    /// Returns the offset of the first cell past the highest known cell in
    /// the segment.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    /// Returns whether no cell of the segment has ever been written.
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    /// Returns the memory cell at offset `index` in the segment, if it has
    /// been asserted to a specific value.
    pub fn get(&self, index: usize) -> Option<ValueRef> {
        match self.metadata.get(index)? {
            Metadata::Unknown => None,
            // SAFETY:
            //  The metadata and its associated cell are guaranteed to be
            //  synchronized: a `Pointer` or `Scalar` discriminant implies the
            //  matching union field was initialized by `assert_eq`.
            Metadata::Pointer => Some(ValueRef::Pointer(unsafe { &self.cells[index].pointer })),
            Metadata::Scalar => Some(ValueRef::Scalar(unsafe { &self.cells[index].scalar })),
        }
    }

    /// Attempts to assert that a memory cell in the segment has a given
    /// value.
    ///
    /// # Returns
    ///
    /// - If the cell is unknown, it is asserted to the given value and the
    ///   function succeeds.
    ///
    /// - If the cell already holds a value equal to `value`, the function
    ///   succeeds without modifying anything.
    ///
    /// - Otherwise the function fails with [`Error::WriteOnce`].
    pub fn assert_eq(&mut self, index: usize, value: ValueRef) -> Result<(), Error> {
        // Writes past the current length extend the segment with unknown
        // cells, keeping the two arrays synchronized.
        if index >= self.metadata.len() {
            self.metadata.resize(index + 1, Metadata::Unknown);
            self.cells.resize_with(index + 1, || RawValue { _unknown: () });
        }

        let known = match self.metadata[index] {
            Metadata::Unknown => {
                self.metadata[index] = Metadata::from_value_ref(value);
                self.cells[index].write(value);
                return Ok(());
            }
            // SAFETY:
            //  Same synchronization invariant as in `get`.
            Metadata::Pointer => ValueRef::Pointer(unsafe { &self.cells[index].pointer }),
            Metadata::Scalar => ValueRef::Scalar(unsafe { &self.cells[index].scalar }),
        };

        if known == value {
            Ok(())
        } else {
            Err(Error::WriteOnce)
        }
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

/// A cell payload that does not know its discriminant.
#[derive(Clone, Copy)]
union RawValue {
    /// A scalar with no provenance information.
    scalar: Felt,
    /// A pointer with an associated segment.
    pointer: Pointer,
    /// The value is not known yet.
    _unknown: (),
}

impl RawValue {
    /// Overwrites `self` with a copy of the referenced value.
    fn write(&mut self, r: ValueRef) {
        match r {
            ValueRef::Scalar(s) => self.scalar = *s,
            ValueRef::Pointer(p) => self.pointer = *p,
        }
    }
}

/// The discriminant kept alongside every cell payload.
#[derive(Debug, Clone, Copy)]
enum Metadata {
    /// The value of the memory cell is not yet known to the virtual machine.
    Unknown,
    /// The memory cell is known to hold a pointer.
    Pointer,
    /// The memory cell is known to hold a [`Felt`].
    Scalar,
}

impl Metadata {
    /// Creates a new [`Metadata`] matching the provided [`ValueRef`].
    fn from_value_ref(v: ValueRef) -> Self {
        match v {
            ValueRef::Scalar(_) => Self::Scalar,
            ValueRef::Pointer(_) => Self::Pointer,
        }
    }
}
