//! Sequence-number arithmetic.
//!
//! RUDP sequence numbers are `u32`s compared modulo 2^16: the distance
//! between two sequence numbers is taken as a signed 16-bit value, the same
//! trick the source used for its 32-bit TCP-style sequence space (there cast
//! to `i32` instead of `i16`). Keeping the cast width part of the wire
//! contract means two independently written peers agree on ordering even
//! across a wraparound.

/// Strictly-less-than, wrapping at 2^16.
pub fn seq_lt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i16) < 0
}

/// Less-than-or-equal, wrapping at 2^16.
pub fn seq_leq(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i16) <= 0
}

/// Strictly-greater-than, wrapping at 2^16.
pub fn seq_gt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i16) > 0
}

/// Greater-than-or-equal, wrapping at 2^16.
pub fn seq_geq(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i16) >= 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_ordering() {
        assert!(seq_lt(1, 2));
        assert!(!seq_lt(2, 1));
        assert!(seq_leq(2, 2));
        assert!(seq_gt(2, 1));
        assert!(seq_geq(2, 2));
    }

    #[test]
    fn wraparound_near_zero() {
        let near_max = u32::MAX - 1;
        assert!(seq_lt(near_max, 0));
        assert!(seq_gt(0, near_max));
    }

    #[test]
    fn matches_wire_contract_definition() {
        // SEQ_LT(a, b) <=> ((a - b) as i16) < 0, for a broad sample of pairs.
        for a in [0u32, 1, 100, 32767, 32768, 65535, 65536, u32::MAX] {
            for b in [0u32, 1, 100, 32767, 32768, 65535, 65536, u32::MAX] {
                let expected = (a.wrapping_sub(b) as i16) < 0;
                assert_eq!(seq_lt(a, b), expected, "a={a} b={b}");
            }
        }
    }

    proptest::proptest! {
        #[test]
        fn lt_and_gt_are_mirror_images(a: u32, b: u32) {
            proptest::prop_assert_eq!(seq_lt(a, b), seq_gt(b, a));
            proptest::prop_assert_eq!(seq_leq(a, b), seq_geq(b, a));
        }

        #[test]
        fn leq_is_lt_or_equal(a: u32, b: u32) {
            proptest::prop_assert_eq!(seq_leq(a, b), seq_lt(a, b) || a == b);
        }

        #[test]
        fn a_is_never_strictly_less_than_itself(a: u32) {
            proptest::prop_assert!(!seq_lt(a, a));
            proptest::prop_assert!(seq_leq(a, a));
        }
    }
}
