//! Per-tryte carry maps and their parallel-prefix composition.
//!
//! Adding two trytes `a + b` together with an incoming carry `cin in
//! {-1,0,1}` can overflow the canonical `[-13,13]` range by at most one
//! tryte in either direction, so the carry *out* is itself a trit. A
//! "carry map" is the function `cin -> cout` for a fixed `(a, b)` pair;
//! there are exactly `3^3 = 27` such functions, so each one is encoded as
//! one integer id in `[0, 26]`. Composing two carry maps along the limb
//! (in the Kogge-Stone sense) is itself one of those 27 functions, which
//! is what makes the `COMPOSE` table square.

use super::trit::{Tryte, TRYTE_MAX, TRYTE_MIN};

/// Identifier for one of the 27 possible `cin -> cout` carry maps.
pub type CarryMapId = u8;

const CIN_VALUES: [i8; 3] = [-1, 0, 1];

/// Adds two trytes and an incoming carry, returning `(digit, carry_out)`
/// with `digit` canonical and `carry_out in {-1,0,1}`.
pub const fn add_with_carry(a: Tryte, b: Tryte, cin: i8) -> (Tryte, i8) {
    let sum = a as i16 + b as i16 + cin as i16;
    if sum > TRYTE_MAX as i16 {
        ((sum - 27) as Tryte, 1)
    } else if sum < TRYTE_MIN as i16 {
        ((sum + 27) as Tryte, -1)
    } else {
        (sum as Tryte, 0)
    }
}

/// Encodes a `cin -> cout` map, given as `[f(-1), f(0), f(1)]`, as an id.
pub const fn encode_map(f: [i8; 3]) -> CarryMapId {
    ((f[0] + 1) as u8) * 9 + ((f[1] + 1) as u8) * 3 + (f[2] + 1) as u8
}

/// Decodes a carry map id back into `[f(-1), f(0), f(1)]`.
pub const fn decode_map(id: CarryMapId) -> [i8; 3] {
    let f2 = (id % 3) as i8 - 1;
    let f1 = ((id / 3) % 3) as i8 - 1;
    let f0 = ((id / 9) % 3) as i8 - 1;
    [f0, f1, f2]
}

/// Applies a carry map to an incoming carry.
pub const fn apply_map(id: CarryMapId, cin: i8) -> i8 {
    decode_map(id)[(cin + 1) as usize]
}

/// `ADD_TABLE[a+13][b+13]`: the three candidate sum trytes (indexed by
/// `cin+1`) and the carry map id for a given `(a, b)` pair.
pub fn add_table_entry(a: Tryte, b: Tryte) -> ([Tryte; 3], CarryMapId) {
    let mut sums = [0i8; 3];
    let mut map = [0i8; 3];
    for (i, cin) in CIN_VALUES.into_iter().enumerate() {
        let (digit, cout) = add_with_carry(a, b, cin);
        sums[i] = digit;
        map[i] = cout;
    }
    (sums, encode_map(map))
}

/// `COMPOSE[id1][id2]`: the carry map of applying `id1`'s carry map first
/// (lower tryte position) and feeding its output into `id2` (higher
/// position). Function composition is associative, which is what lets the
/// Kogge-Stone stride doubling below work.
pub const fn compose(id1: CarryMapId, id2: CarryMapId) -> CarryMapId {
    let mut out = [0i8; 3];
    let mut i = 0;
    while i < 3 {
        let cin = CIN_VALUES[i];
        let mid = apply_map(id1, cin);
        out[i] = apply_map(id2, mid);
        i += 1;
    }
    encode_map(out)
}

/// The carry actually arriving at a position whose prefix carry map is
/// `id`, given that the carry into the very first position is always 0.
pub const fn carry_from_zero(id: CarryMapId) -> i8 {
    apply_map(id, 0)
}

/// Computes the per-tryte sums and carry-map ids for every position of two
/// equal-length tryte sequences (LSB-first).
pub fn per_tryte_steps(a: &[Tryte], b: &[Tryte]) -> (Vec<[Tryte; 3]>, Vec<CarryMapId>) {
    debug_assert_eq!(a.len(), b.len());
    let mut sums = Vec::with_capacity(a.len());
    let mut maps = Vec::with_capacity(a.len());
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (s, m) = add_table_entry(x, y);
        sums.push(s);
        maps.push(m);
    }
    (sums, maps)
}

/// Kogge-Stone power-of-two unrolled prefix composition: `prefix[i]` ends
/// up holding the composition of `maps[0..=i]`, i.e. the map from the
/// carry into position 0 to the carry out of position `i`.
pub fn prefix_compose(maps: &[CarryMapId]) -> Vec<CarryMapId> {
    let n = maps.len();
    let mut prefix = maps.to_vec();
    let mut stride = 1;
    while stride < n {
        let snapshot = prefix.clone();
        for i in stride..n {
            prefix[i] = compose(snapshot[i - stride], snapshot[i]);
        }
        stride *= 2;
    }
    prefix
}

/// Finalizes a prefix-composed addition: selects the actual sum digit at
/// each position from its carry-in, and returns `(digits, carry_out)`.
pub fn finalize(sums: &[[Tryte; 3]], prefix: &[CarryMapId]) -> (Vec<Tryte>, i8) {
    let n = sums.len();
    let mut digits = Vec::with_capacity(n);
    for i in 0..n {
        let cin = if i == 0 { 0 } else { carry_from_zero(prefix[i - 1]) };
        digits.push(sums[i][(cin + 1) as usize]);
    }
    let carry_out = if n == 0 { 0 } else { carry_from_zero(prefix[n - 1]) };
    (digits, carry_out)
}

/// Adds two equal-length tryte sequences via the parallel-prefix carry
/// composition described in the module docs.
pub fn add_via_prefix(a: &[Tryte], b: &[Tryte]) -> (Vec<Tryte>, i8) {
    let (sums, maps) = per_tryte_steps(a, b);
    let prefix = prefix_compose(&maps);
    finalize(&sums, &prefix)
}

/// Adds two equal-length tryte sequences with a simple sequential ripple
/// carry. Used as the reference implementation that `add_via_prefix` must
/// match bitwise.
pub fn add_via_schoolbook(a: &[Tryte], b: &[Tryte]) -> (Vec<Tryte>, i8) {
    debug_assert_eq!(a.len(), b.len());
    let mut digits = Vec::with_capacity(a.len());
    let mut carry = 0i8;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (digit, cout) = add_with_carry(x, y, carry);
        digits.push(digit);
        carry = cout;
    }
    (digits, carry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn every_carry_map_round_trips_through_its_id() {
        for id in 0..27u8 {
            let f = decode_map(id);
            assert_eq!(encode_map(f), id);
        }
    }

    fn to_trytes(xs: &[i8], len: usize) -> Vec<Tryte> {
        xs.iter()
            .take(len)
            .map(|&x| ((x as i32).rem_euclid(27) - 13) as Tryte)
            .collect()
    }

    #[quickcheck]
    fn prefix_matches_schoolbook(a: Vec<i8>, b: Vec<i8>) -> bool {
        let len = a.len().min(b.len()).min(18).max(1);
        let a = to_trytes(&a, len);
        let b = to_trytes(&b, len);
        if a.len() != b.len() || a.is_empty() {
            return true;
        }
        add_via_prefix(&a, &b) == add_via_schoolbook(&a, &b)
    }

    #[quickcheck]
    fn addition_is_commutative(a: Vec<i8>, b: Vec<i8>) -> bool {
        let len = a.len().min(b.len()).min(18).max(1);
        let a = to_trytes(&a, len);
        let b = to_trytes(&b, len);
        if a.len() != b.len() || a.is_empty() {
            return true;
        }
        add_via_prefix(&a, &b) == add_via_prefix(&b, &a)
    }
}
