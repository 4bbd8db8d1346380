//! Part planning.
//!
//! Decides how large each part of a file is so that a transport's part
//! ceiling is never exceeded, while keeping tiny files from being split
//! into many round trips.

use crate::{S3_MAX_PARTS, S3_MIN_PART_SIZE, STREAM_PART_SIZE};

/// Part-count ceiling and part-size floor of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartLimits {
    pub max_parts: u64,
    pub min_part_size: u64,
}

impl PartLimits {
    /// Limits of the S3 multipart upload API.
    pub const S3: PartLimits = PartLimits {
        max_parts: S3_MAX_PARTS,
        min_part_size: S3_MIN_PART_SIZE,
    };

    /// Limits for stream transports (SFTP, HTTP form POST).
    pub const STREAM: PartLimits = PartLimits {
        max_parts: u64::MAX,
        min_part_size: STREAM_PART_SIZE,
    };

    /// Plans `size_bytes` under these limits.
    pub fn plan(&self, size_bytes: u64) -> PartPlan {
        plan(size_bytes, self.max_parts, self.min_part_size)
    }
}

/// How a file of a given size is split into parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartPlan {
    pub size_bytes: u64,
    pub part_size_bytes: u64,
    pub num_parts: u64,
}

/// One contiguous byte range of a planned file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRange {
    /// Zero-based part index.
    pub index: u64,
    pub offset: u64,
    pub len: u64,
}

impl PartRange {
    /// One-based part number as used by S3.
    pub fn part_number(&self) -> u64 {
        self.index + 1
    }
}

/// Computes the part size and count for a file.
///
/// `part_size = max(ceil(size / max_parts), min_part_size)` and
/// `num_parts = max(1, ceil(size / part_size))`, so an empty file still
/// yields exactly one (empty) part.
///
/// # Panics
///
/// Panics if `max_parts` or `min_part_size_bytes` is zero.
pub fn plan(size_bytes: u64, max_parts: u64, min_part_size_bytes: u64) -> PartPlan {
    assert!(max_parts > 0, "max_parts must be at least 1");
    assert!(min_part_size_bytes > 0, "min_part_size_bytes must be at least 1");

    let part_size_bytes = size_bytes.div_ceil(max_parts).max(min_part_size_bytes);
    let num_parts = size_bytes.div_ceil(part_size_bytes).max(1);

    PartPlan {
        size_bytes,
        part_size_bytes,
        num_parts,
    }
}

impl PartPlan {
    /// Iterates the byte ranges of every part in order.
    pub fn parts(&self) -> impl Iterator<Item = PartRange> + '_ {
        (0..self.num_parts).map(move |index| self.range_at(index))
    }

    /// Byte range of part `index`, or `None` past the last part.
    pub fn part(&self, index: u64) -> Option<PartRange> {
        (index < self.num_parts).then(|| self.range_at(index))
    }

    fn range_at(&self, index: u64) -> PartRange {
        let offset = index * self.part_size_bytes;
        let len = self
            .part_size_bytes
            .min(self.size_bytes.saturating_sub(offset));
        PartRange { index, offset, len }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn small_file_uses_min_part_size() {
        let p = plan(1_000_000, 10_000, 5_242_880);
        assert_eq!(p.part_size_bytes, 5_242_880);
        assert_eq!(p.num_parts, 1);
    }

    #[test]
    fn huge_file_scales_part_size_to_ceiling() {
        let p = plan(100_000_000_000, 10_000, 5_242_880);
        assert_eq!(p.part_size_bytes, 10_000_000);
        assert_eq!(p.num_parts, 10_000);
    }

    #[test]
    fn empty_file_has_one_empty_part() {
        let p = plan(0, 10_000, 5_242_880);
        assert_eq!(p.num_parts, 1);
        let parts: Vec<_> = p.parts().collect();
        assert_eq!(
            parts,
            vec![PartRange {
                index: 0,
                offset: 0,
                len: 0
            }]
        );
    }

    #[test]
    fn last_part_is_short() {
        let p = plan(10, 100, 4);
        assert_eq!(p.part_size_bytes, 4);
        assert_eq!(p.num_parts, 3);
        let lens: Vec<u64> = p.parts().map(|r| r.len).collect();
        assert_eq!(lens, vec![4, 4, 2]);
        assert_eq!(p.part(2).unwrap().offset, 8);
        assert!(p.part(3).is_none());
    }

    #[test]
    fn exact_multiple_has_no_trailing_empty_part() {
        let p = plan(12, 100, 4);
        assert_eq!(p.num_parts, 3);
        assert_eq!(p.parts().last().unwrap().len, 4);
    }

    #[test]
    fn part_number_is_one_based() {
        let p = plan(10, 100, 4);
        assert_eq!(p.part(0).unwrap().part_number(), 1);
    }

    #[test]
    fn stream_limits_never_exceed_part_size() {
        let p = PartLimits::STREAM.plan(9 * 1024 * 1024);
        assert_eq!(p.part_size_bytes, STREAM_PART_SIZE);
        assert_eq!(p.num_parts, 3);
    }

    #[test]
    #[should_panic(expected = "max_parts")]
    fn zero_max_parts_panics() {
        plan(10, 0, 1);
    }

    #[test]
    #[should_panic(expected = "min_part_size_bytes")]
    fn zero_min_part_size_panics() {
        plan(10, 1, 0);
    }

    proptest! {
        #[test]
        fn part_count_within_ceiling(
            size in 0u64..=1u64 << 44,
            max_parts in 1u64..=20_000,
            min_size in 1u64..=1u64 << 24,
        ) {
            let p = plan(size, max_parts, min_size);
            prop_assert!(p.num_parts <= max_parts);
            prop_assert!(p.num_parts >= 1);
        }

        #[test]
        fn part_size_respects_floor(
            size in 0u64..=1u64 << 44,
            max_parts in 1u64..=20_000,
            min_size in 1u64..=1u64 << 24,
        ) {
            let p = plan(size, max_parts, min_size);
            prop_assert!(p.part_size_bytes >= min_size);
        }

        #[test]
        fn parts_cover_file_without_gaps(
            size in 0u64..=1u64 << 20,
            max_parts in 1u64..=64,
            min_size in 1u64..=4096,
        ) {
            let p = plan(size, max_parts, min_size);
            let mut expected_offset = 0;
            for range in p.parts() {
                prop_assert_eq!(range.offset, expected_offset);
                prop_assert!(range.len <= p.part_size_bytes);
                expected_offset += range.len;
            }
            prop_assert_eq!(expected_offset, size);
        }
    }
}
