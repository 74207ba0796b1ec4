//! Conversion between balanced-ternary digit sequences and signed binary
//! integers.

use super::trit::Trit;

/// Converts a signed binary integer into its (LSB-first) balanced-ternary
/// digit sequence via repeated division by 3 with balanced remainder: a
/// remainder of `2` becomes digit `-1` and carries `+1` into the quotient,
/// a remainder of `-2` becomes digit `1` and carries `-1`.
pub fn from_binary(mut value: i128) -> Vec<Trit> {
    if value == 0 {
        return vec![0];
    }
    let mut digits = Vec::new();
    while value != 0 {
        let mut r = value % 3;
        let mut q = value / 3;
        if r == 2 {
            r = -1;
            q += 1;
        } else if r == -2 {
            r = 1;
            q -= 1;
        }
        digits.push(r as Trit);
        value = q;
    }
    digits
}

/// Error returned by [`to_binary`] when the digit sequence's magnitude
/// exceeds the target range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("balanced-ternary value overflows the target binary range")]
pub struct Overflow;

/// Reconstructs a signed binary integer from an LSB-first balanced-ternary
/// digit sequence by place-value accumulation in a 128-bit-wide
/// accumulator, then checks the result against `i64`'s range before
/// truncating. Returns [`Overflow`] for exactly the inputs outside that
/// range.
pub fn to_binary(digits: &[Trit]) -> Result<i64, Overflow> {
    let mut acc: i128 = 0;
    let mut place: i128 = 1;
    for &d in digits {
        acc += d as i128 * place;
        place = place.saturating_mul(3);
    }
    i64::try_from(acc).map_err(|_| Overflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[quickcheck]
    fn round_trips_through_i64(n: i64) -> bool {
        let digits = from_binary(n as i128);
        to_binary(&digits) == Ok(n)
    }

    #[test]
    fn overflow_is_reported_for_out_of_range_magnitudes() {
        let digits = from_binary(i64::MAX as i128 + 1);
        assert_eq!(to_binary(&digits), Err(Overflow));
    }

    #[test]
    fn zero_round_trips() {
        assert_eq!(from_binary(0), vec![0]);
        assert_eq!(to_binary(&[0]), Ok(0));
    }
}
