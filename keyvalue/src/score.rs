//! Order-preserving score encoding.
//!
//! Sorted-set scores are IEEE 754 doubles, but two of the backends can only
//! range-scan byte strings. This module maps a double to 8 bytes whose
//! unsigned big-endian order equals the numeric order of the input:
//!
//! - If the sign bit is set (negative), flip all bits: more negative values
//!   become smaller byte strings.
//! - Otherwise flip only the sign bit, moving positives above every negative.
//!
//! Negative and positive infinity encode and order correctly. NaN is not a
//! valid score.
//!
//! Sorted-set indexes append the member bytes to the encoded score
//! ([`member_key`]), making score the primary sort dimension with the member
//! bytes as the tie-break.
//!
//! The encoding is persisted in the wide-column backend's secondary range
//! attribute, so it must remain stable across library versions.

use bytes::{BufMut, Bytes, BytesMut};

/// Number of bytes in an encoded score.
pub const ENCODED_LEN: usize = 8;

const SIGN_BIT: u64 = 0x8000_0000_0000_0000;

/// Encodes a score as 8 big-endian bytes ordered like the score.
#[inline]
pub fn encode(score: f64) -> [u8; ENCODED_LEN] {
    let bits = score.to_bits();
    let encoded = if bits & SIGN_BIT != 0 {
        !bits
    } else {
        bits ^ SIGN_BIT
    };
    encoded.to_be_bytes()
}

/// Decodes the first 8 bytes of `key` back into a score.
///
/// Returns `0.0` when the input is shorter than an encoded score, mirroring
/// how index entries without a score component are treated.
#[inline]
pub fn decode(key: &[u8]) -> f64 {
    if key.len() < ENCODED_LEN {
        return 0.0;
    }
    let mut buf = [0u8; ENCODED_LEN];
    buf.copy_from_slice(&key[..ENCODED_LEN]);
    let encoded = u64::from_be_bytes(buf);
    let bits = if encoded & SIGN_BIT == 0 {
        !encoded
    } else {
        encoded ^ SIGN_BIT
    };
    f64::from_bits(bits)
}

/// Returns the byte successor of the encoded score, used to close half-open
/// ranges from above.
///
/// Returns `None` when the successor would wrap past positive infinity, in
/// which case the range is unbounded above.
#[inline]
pub fn successor(score: f64) -> Option<[u8; ENCODED_LEN]> {
    let bits = score.to_bits();
    let encoded = if bits & SIGN_BIT != 0 {
        !bits
    } else {
        bits ^ SIGN_BIT
    };
    encoded.checked_add(1).map(u64::to_be_bytes)
}

/// Builds a sorted-set index key: the encoded score followed by the member
/// bytes.
pub fn member_key(score: f64, member: &[u8]) -> Bytes {
    let mut key = BytesMut::with_capacity(ENCODED_LEN + member.len());
    key.put_slice(&encode(score));
    key.put_slice(member);
    key.freeze()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn should_roundtrip_boundary_scores() {
        let scores = [
            f64::NEG_INFINITY,
            f64::MIN,
            -1000.5,
            -1.0,
            -f64::MIN_POSITIVE,
            -0.0,
            0.0,
            f64::MIN_POSITIVE,
            1.0,
            1000.5,
            f64::MAX,
            f64::INFINITY,
        ];

        for score in scores {
            let decoded = decode(&encode(score));
            assert_eq!(decoded.to_bits(), score.to_bits(), "roundtrip failed for {}", score);
        }
    }

    #[test]
    fn should_order_boundary_scores() {
        let scores = [
            f64::NEG_INFINITY,
            f64::MIN,
            -1000.5,
            -1.0,
            -0.0,
            0.0,
            1.0,
            1000.5,
            f64::MAX,
            f64::INFINITY,
        ];

        for window in scores.windows(2) {
            let (a, b) = (window[0], window[1]);
            if a == b {
                continue;
            }
            assert!(encode(a) < encode(b), "{} should encode below {}", a, b);
        }
    }

    #[test]
    fn should_return_zero_for_short_input() {
        assert_eq!(decode(b"abc"), 0.0);
    }

    #[test]
    fn should_wrap_successor_past_positive_infinity() {
        assert!(successor(f64::INFINITY).is_none());
        assert!(successor(0.0).is_some());
    }

    #[test]
    fn should_break_score_ties_by_member_bytes() {
        // given
        let a = member_key(0.5, b"a");
        let b = member_key(0.5, b"b");
        let c = member_key(1.0, b"a");

        // then
        assert!(a < b);
        assert!(b < c);
    }

    proptest! {
        #[test]
        fn should_roundtrip_any_finite_score(score in proptest::num::f64::NORMAL | proptest::num::f64::SUBNORMAL | proptest::num::f64::ZERO) {
            prop_assert_eq!(decode(&encode(score)).to_bits(), score.to_bits());
        }

        #[test]
        fn should_preserve_ordering(
            a in proptest::num::f64::NORMAL | proptest::num::f64::ZERO,
            b in proptest::num::f64::NORMAL | proptest::num::f64::ZERO,
        ) {
            prop_assume!(a != b);
            let (lo, hi) = if a < b { (a, b) } else { (b, a) };
            prop_assert!(encode(lo) < encode(hi));
        }

        #[test]
        fn should_order_successor_strictly_above(score in proptest::num::f64::NORMAL | proptest::num::f64::ZERO) {
            if let Some(after) = successor(score) {
                prop_assert!(after > encode(score));
            }
        }
    }
}
