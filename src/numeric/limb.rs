//! Fixed-width packed-tryte limbs.

use super::carry::{add_via_prefix, add_via_schoolbook};
use super::trit::{is_tryte, Tryte};
use crate::consts::{TRITS_PER_LIMB48, TRITS_PER_LIMB54, TRITS_PER_TRYTE};

/// A fixed-width balanced-ternary integer packed as `N` trytes, LSB-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Limb<const N: usize> {
    trytes: [Tryte; N],
}

/// The 48-trit (16-tryte) limb.
pub type Limb48 = Limb<{ TRITS_PER_LIMB48 / TRITS_PER_TRYTE }>;

/// The 54-trit (18-tryte) limb.
pub type Limb54 = Limb<{ TRITS_PER_LIMB54 / TRITS_PER_TRYTE }>;

impl<const N: usize> Limb<N> {
    /// Number of trytes packed into this limb.
    pub const TRYTE_COUNT: usize = N;

    /// The all-zero limb.
    pub const ZERO: Self = Self { trytes: [0; N] };

    /// Builds a limb from an array of canonical trytes. Panics in debug
    /// builds if any tryte is out of the canonical `[-13,13]` range.
    pub fn from_trytes(trytes: [Tryte; N]) -> Self {
        debug_assert!(trytes.iter().all(|&t| is_tryte(t)));
        Self { trytes }
    }

    /// Returns the packed trytes, LSB-first.
    pub fn trytes(&self) -> &[Tryte; N] {
        &self.trytes
    }

    /// Adds two limbs via the Kogge-Stone parallel-prefix carry
    /// composition, returning `(sum, carry_out)`.
    pub fn add_via_prefix(&self, other: &Self) -> (Self, Tryte) {
        let (digits, carry) = add_via_prefix(&self.trytes, &other.trytes);
        (Self::from_trytes(digits.try_into().expect("length preserved")), carry)
    }

    /// Adds two limbs with a sequential ripple carry. The reference
    /// implementation that `add_via_prefix` must match bitwise.
    pub fn add_via_schoolbook(&self, other: &Self) -> (Self, Tryte) {
        let (digits, carry) = add_via_schoolbook(&self.trytes, &other.trytes);
        (Self::from_trytes(digits.try_into().expect("length preserved")), carry)
    }

    /// Negates every trit (and therefore every tryte) of the limb.
    pub fn negate(&self) -> Self {
        let mut out = [0i8; N];
        for (o, &t) in out.iter_mut().zip(self.trytes.iter()) {
            *o = -t;
        }
        Self::from_trytes(out)
    }
}

impl<const N: usize> std::ops::Add for Limb<N> {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        self.add_via_prefix(&rhs).0
    }
}

impl<const N: usize> std::ops::Neg for Limb<N> {
    type Output = Self;
    fn neg(self) -> Self::Output {
        self.negate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_plus_zero_is_zero() {
        let (sum, carry) = Limb48::ZERO.add_via_prefix(&Limb48::ZERO);
        assert_eq!(sum, Limb48::ZERO);
        assert_eq!(carry, 0);
    }

    #[test]
    fn prefix_and_schoolbook_agree_on_max_value() {
        let max = Limb48::from_trytes([13; 16]);
        let (prefix_sum, prefix_carry) = max.add_via_prefix(&max);
        let (school_sum, school_carry) = max.add_via_schoolbook(&max);
        assert_eq!(prefix_sum, school_sum);
        assert_eq!(prefix_carry, school_carry);
    }

    #[test]
    fn negation_flips_every_tryte() {
        let limb = Limb48::from_trytes([1, -1, 0, 13, -13, 5, -5, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        let neg = limb.negate();
        for (a, b) in limb.trytes().iter().zip(neg.trytes().iter()) {
            assert_eq!(*a, -*b);
        }
    }
}
