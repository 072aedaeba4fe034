//! Defines the [`Value`] type.

use num_traits::Zero;
use starknet_types_core::felt::{Felt, NonZeroFelt};

use crate::error::Error;

use super::Pointer;

/// A value that may be stored in a [`Memory`](super::Memory) segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    /// A scalar with no provenance information.
    Scalar(Felt),
    /// A pointer within a specific segment.
    Pointer(Pointer),
}

impl Value {
    /// Attempts to add two [`Value`]s.
    ///
    /// Scalars add in the field; adding a scalar to a pointer offsets the
    /// pointer within its segment. The reversed form (scalar plus pointer)
    /// and the sum of two pointers are not defined.
    pub fn add(&self, other: &Self) -> Result<Self, Error> {
        match (self, other) {
            (Self::Scalar(left), Self::Scalar(right)) => Ok(Self::Scalar(left + right)),
            (Self::Pointer(left), Self::Scalar(right)) => left.add_felt(right).map(Self::Pointer),
            _ => Err(Error::TypeMismatch),
        }
    }

    /// Attempts to subtract two [`Value`]s.
    ///
    /// Subtracting two pointers of the same segment yields the scalar
    /// distance between them.
    pub fn subtract(&self, other: &Self) -> Result<Self, Error> {
        match (self, other) {
            (Self::Scalar(left), Self::Scalar(right)) => Ok(Self::Scalar(left - right)),
            (Self::Pointer(left), Self::Scalar(right)) => left.sub_felt(right).map(Self::Pointer),
            (Self::Pointer(left), Self::Pointer(right)) => {
                let distance = left.subtract(right)?;
                Ok(Self::Scalar(Felt::from(distance)))
            }
            (Self::Scalar(_), Self::Pointer(_)) => Err(Error::TypeMismatch),
        }
    }

    /// Attempts to multiply two [`Value`]s.
    ///
    /// Only scalars can be multiplied.
    pub fn multiply(&self, other: &Self) -> Result<Self, Error> {
        match (self, other) {
            (Self::Scalar(left), Self::Scalar(right)) => Ok(Self::Scalar(left * right)),
            _ => Err(Error::TypeMismatch),
        }
    }

    /// Attempts to divide two [`Value`]s.
    ///
    /// Only scalars can be divided; division is multiplication by the modular
    /// inverse of the divisor.
    pub fn divide(&self, other: &Self) -> Result<Self, Error> {
        match (self, other) {
            (Self::Scalar(left), Self::Scalar(right)) => {
                let divisor =
                    NonZeroFelt::try_from(right).map_err(|_| Error::DivisionByZero)?;
                Ok(Self::Scalar(left.field_div(&divisor)))
            }
            _ => Err(Error::TypeMismatch),
        }
    }

    /// Returns whether this [`Value`] counts as zero.
    ///
    /// A scalar is zero when it is the zero field element. A pointer counts
    /// as zero when it points at offset 0 of segment 0, which is how a
    /// conditional jump treats an untaken branch on a pointer destination.
    pub fn is_zero(&self) -> bool {
        match self {
            Self::Scalar(value) => value.is_zero(),
            Self::Pointer(pointer) => pointer.segment == 0 && pointer.offset == 0,
        }
    }

    /// Attempts to view this [`Value`] as a scalar.
    #[inline(always)]
    pub const fn scalar(&self) -> Option<&Felt> {
        match self {
            Self::Scalar(value) => Some(value),
            Self::Pointer(_) => None,
        }
    }

    /// Attempts to view this [`Value`] as a pointer.
    #[inline(always)]
    pub const fn pointer(&self) -> Option<&Pointer> {
        match self {
            Self::Scalar(_) => None,
            Self::Pointer(pointer) => Some(pointer),
        }
    }

    /// Creates a [`ValueRef`] from this [`Value`].
    #[inline(always)]
    pub const fn as_ref(&self) -> ValueRef {
        match self {
            Self::Scalar(value) => ValueRef::Scalar(value),
            Self::Pointer(pointer) => ValueRef::Pointer(pointer),
        }
    }
}

impl From<Felt> for Value {
    #[inline(always)]
    fn from(value: Felt) -> Self {
        Self::Scalar(value)
    }
}

impl From<Pointer> for Value {
    #[inline(always)]
    fn from(value: Pointer) -> Self {
        Self::Pointer(value)
    }
}

impl PartialEq<Felt> for Value {
    fn eq(&self, other: &Felt) -> bool {
        match self {
            Self::Scalar(value) => value == other,
            Self::Pointer(_) => false,
        }
    }
}

impl PartialEq<Pointer> for Value {
    fn eq(&self, other: &Pointer) -> bool {
        match self {
            Self::Scalar(_) => false,
            Self::Pointer(pointer) => pointer == other,
        }
    }
}

/// A reference to a [`Value`] that holds the discriminant inline.
///
/// # Notes
///
/// Using a custom reference type is required because:
///
/// 1. We don't want to have to copy a whole `Felt` value every time a memory
///    cell is accessed.
///
/// 2. The memory doesn't directly store `Value`s for layout efficiency
///    reasons, preventing us from creating a plain reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueRef<'a> {
    /// A scalar with no provenance information.
    Scalar(&'a Felt),
    /// A pointer within a specific segment.
    Pointer(&'a Pointer),
}

impl<'a> ValueRef<'a> {
    /// Copies the referenced value into a concrete [`Value`] instance.
    #[inline(always)]
    pub const fn copied(self) -> Value {
        match self {
            Self::Scalar(value) => Value::Scalar(*value),
            Self::Pointer(pointer) => Value::Pointer(*pointer),
        }
    }

    /// Attempts to view the referenced value as a scalar.
    #[inline(always)]
    pub const fn scalar(self) -> Option<&'a Felt> {
        match self {
            Self::Scalar(value) => Some(value),
            Self::Pointer(_) => None,
        }
    }

    /// Attempts to view the referenced value as a pointer.
    #[inline(always)]
    pub const fn pointer(self) -> Option<&'a Pointer> {
        match self {
            Self::Scalar(_) => None,
            Self::Pointer(pointer) => Some(pointer),
        }
    }
}

#[cfg(test)]
mod tests {
    use test_strategy::proptest;

    use super::*;

    fn scalar(value: u64) -> Value {
        Value::Scalar(Felt::from(value))
    }

    fn pointer(segment: usize, offset: usize) -> Value {
        Value::Pointer(Pointer::new(segment, offset))
    }

    #[test]
    fn scalar_arithmetic_wraps_in_the_field() {
        assert_eq!(scalar(3).add(&scalar(4)).unwrap(), scalar(7));
        assert_eq!(scalar(10).subtract(&scalar(4)).unwrap(), scalar(6));
        assert_eq!(scalar(6).multiply(&scalar(7)).unwrap(), scalar(42));

        // 0 - 1 wraps to p - 1.
        assert_eq!(
            scalar(0).subtract(&scalar(1)).unwrap(),
            Value::Scalar(Felt::MAX)
        );
    }

    #[test]
    fn division_is_multiplication_by_the_inverse() {
        let quotient = scalar(42).divide(&scalar(6)).unwrap();
        assert_eq!(quotient, scalar(7));

        let third = scalar(1).divide(&scalar(3)).unwrap();
        assert_eq!(third.multiply(&scalar(3)).unwrap(), scalar(1));

        assert_eq!(scalar(1).divide(&scalar(0)), Err(Error::DivisionByZero));
    }

    #[test]
    fn pointer_offsets_stay_within_their_segment() {
        assert_eq!(pointer(2, 5).add(&scalar(3)).unwrap(), pointer(2, 8));
        assert_eq!(pointer(2, 5).subtract(&scalar(5)).unwrap(), pointer(2, 0));
        assert_eq!(
            pointer(2, 5).subtract(&scalar(6)),
            Err(Error::OffsetUnderflow)
        );
    }

    #[test]
    fn pointer_difference_is_a_scalar_distance() {
        assert_eq!(pointer(2, 9).subtract(&pointer(2, 4)).unwrap(), scalar(5));
        assert_eq!(
            pointer(2, 9).subtract(&pointer(1, 4)),
            Err(Error::SegmentMismatch)
        );
    }

    #[test]
    fn undefined_combinations_are_rejected() {
        assert_eq!(scalar(1).add(&pointer(0, 1)), Err(Error::TypeMismatch));
        assert_eq!(pointer(0, 1).add(&pointer(0, 2)), Err(Error::TypeMismatch));
        assert_eq!(scalar(1).subtract(&pointer(0, 1)), Err(Error::TypeMismatch));
        assert_eq!(pointer(0, 1).multiply(&scalar(2)), Err(Error::TypeMismatch));
        assert_eq!(scalar(2).multiply(&pointer(0, 1)), Err(Error::TypeMismatch));
        assert_eq!(pointer(0, 1).divide(&scalar(2)), Err(Error::TypeMismatch));
        assert_eq!(scalar(2).divide(&pointer(0, 1)), Err(Error::TypeMismatch));
    }

    #[proptest]
    fn adding_the_modulus_is_the_identity(x: u128) {
        let x = Felt::from(x);

        // The modulus is MAX + 1.
        assert_eq!(x + Felt::MAX + Felt::ONE, x);
        assert_eq!(x - x, Felt::ZERO);
    }

    #[proptest]
    fn nonzero_scalars_have_a_multiplicative_inverse(#[strategy(1u128..)] x: u128) {
        let x = Value::Scalar(Felt::from(x));
        let inverse = scalar(1).divide(&x).unwrap();

        assert_eq!(x.multiply(&inverse).unwrap(), scalar(1));
    }

    #[test]
    fn zero_values_include_the_null_pointer() {
        assert!(scalar(0).is_zero());
        assert!(!scalar(1).is_zero());
        assert!(pointer(0, 0).is_zero());
        assert!(!pointer(0, 1).is_zero());
        assert!(!pointer(1, 0).is_zero());
    }
}
