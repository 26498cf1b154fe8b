use std::fmt::{Display, Formatter};
use rand::Rng;

/// A packet sequence number in the 31-bit circular space `[0, 0x7FFF_FFFF]`.
///
/// Sequence numbers wrap around, so they can not be compared or subtracted naively. All
///  arithmetic goes through the methods here: two numbers less than [SeqNo::THRESHOLD] apart
///  are compared directly, otherwise the shorter way around the circle is taken.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct SeqNo(u32);

impl Display for SeqNo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl SeqNo {
    pub const MAX_RAW: u32 = 0x7FFF_FFFF;
    pub const THRESHOLD: u32 = 0x3FFF_FFFF;
    const SPACE: i64 = Self::MAX_RAW as i64 + 1;

    pub const ZERO: SeqNo = SeqNo(0);
    pub const MAX: SeqNo = SeqNo(Self::MAX_RAW);

    /// The high bit is not part of the sequence space (it is the data / control flag on the
    ///  wire) and is masked away.
    pub const fn new(raw: u32) -> SeqNo {
        SeqNo(raw & Self::MAX_RAW)
    }

    pub fn to_raw(self) -> u32 {
        self.0
    }

    /// Signed distance `self - other`, taking the shorter direction around the circle.
    pub fn compare(self, other: SeqNo) -> i32 {
        let diff = self.0 as i64 - other.0 as i64;
        let distance = if diff.abs() < Self::THRESHOLD as i64 {
            diff
        }
        else if diff > 0 {
            diff - Self::SPACE
        }
        else {
            diff + Self::SPACE
        };
        distance as i32
    }

    /// position of `self` relative to `base`, i.e. how many increments lead from `base` to
    ///  `self`. Negative if `self` lies before `base`.
    pub fn offset_from(self, base: SeqNo) -> i32 {
        self.compare(base)
    }

    /// number of sequence numbers from `first` to `last`, both inclusive, going forward and
    ///  wrapping if `last` lies numerically below `first`
    pub fn length(first: SeqNo, last: SeqNo) -> u32 {
        if first.0 <= last.0 {
            last.0 - first.0 + 1
        }
        else {
            last.0 + (Self::MAX_RAW - first.0) + 2
        }
    }

    pub fn next(self) -> SeqNo {
        if self.0 == Self::MAX_RAW {
            SeqNo::ZERO
        }
        else {
            SeqNo(self.0 + 1)
        }
    }

    pub fn prev(self) -> SeqNo {
        if self.0 == 0 {
            SeqNo::MAX
        }
        else {
            SeqNo(self.0 - 1)
        }
    }

    pub fn add(self, delta: u32) -> SeqNo {
        SeqNo::new(self.0.wrapping_add(delta))
    }

    /// a random, non-zero initial sequence number below the comparison threshold
    pub fn random() -> SeqNo {
        SeqNo(rand::thread_rng().gen_range(1..=Self::THRESHOLD))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::equal(5, 5, 0)]
    #[case::forward(10, 3, 7)]
    #[case::backward(3, 10, -7)]
    #[case::just_below_threshold(SeqNo::THRESHOLD - 1, 0, (SeqNo::THRESHOLD - 1) as i32)]
    #[case::just_below_threshold_neg(0, SeqNo::THRESHOLD - 1, -((SeqNo::THRESHOLD - 1) as i32))]
    fn test_compare_direct(#[case] a: u32, #[case] b: u32, #[case] expected: i32) {
        let result = SeqNo::new(a).compare(SeqNo::new(b));
        assert_eq!(result, expected);
        assert_eq!(result as i64, a as i64 - b as i64);
    }

    #[rstest]
    #[case::at_threshold(SeqNo::THRESHOLD, 0)]
    #[case::at_threshold_neg(0, SeqNo::THRESHOLD)]
    #[case::wrap_forward(2, SeqNo::MAX_RAW)]
    #[case::wrap_backward(SeqNo::MAX_RAW, 2)]
    #[case::far_apart(SeqNo::MAX_RAW - 10, 100)]
    fn test_compare_wraps(#[case] a: u32, #[case] b: u32) {
        let naive = a as i64 - b as i64;
        let result = SeqNo::new(a).compare(SeqNo::new(b)) as i64;
        assert!(naive.signum() == -result.signum(), "naive {} vs wrapped {}", naive, result);
    }

    #[test]
    fn test_compare_wrap_distance() {
        assert_eq!(SeqNo::ZERO.compare(SeqNo::MAX), 1);
        assert_eq!(SeqNo::MAX.compare(SeqNo::ZERO), -1);
        assert_eq!(SeqNo::new(2).offset_from(SeqNo::new(SeqNo::MAX_RAW - 1)), 4);
    }

    #[rstest]
    #[case::single(7, 7, 1)]
    #[case::forward(100, 108, 9)]
    #[case::wrapping(SeqNo::MAX_RAW, 0, 2)]
    #[case::wrapping_further(SeqNo::MAX_RAW - 1, 3, 6)]
    fn test_length(#[case] first: u32, #[case] last: u32, #[case] expected: u32) {
        assert_eq!(SeqNo::length(SeqNo::new(first), SeqNo::new(last)), expected);
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(12345)]
    #[case(SeqNo::THRESHOLD)]
    #[case(SeqNo::MAX_RAW - 1)]
    #[case(SeqNo::MAX_RAW)]
    fn test_next_prev_inverse(#[case] raw: u32) {
        let n = SeqNo::new(raw);
        assert_eq!(n.prev().next(), n);
        assert_eq!(n.next().prev(), n);
    }

    #[test]
    fn test_boundaries() {
        assert_eq!(SeqNo::MAX.next(), SeqNo::ZERO);
        assert_eq!(SeqNo::ZERO.prev(), SeqNo::MAX);
        assert_eq!(SeqNo::MAX.add(3), SeqNo::new(2));
        assert_eq!(SeqNo::new(0x8000_0005), SeqNo::new(5));
    }

    #[test]
    fn test_random() {
        for _ in 0..1000 {
            let n = SeqNo::random();
            assert!(n.to_raw() > 0);
            assert!(n.to_raw() <= SeqNo::THRESHOLD);
        }
    }
}
