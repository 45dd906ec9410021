use crate::core::error::DownloadError;
use crate::core::model::{ByteRange, DownloadPlan};

/// Split `total` bytes into `num_chunks` contiguous ranges; the last range absorbs
/// the division remainder. More chunks than bytes are clamped to one byte per chunk.
pub fn plan_ranges(total: u64, num_chunks: u32) -> Result<DownloadPlan, DownloadError> {
    if num_chunks == 0 {
        return Err(DownloadError::InvalidInput("chunk count must be at least 1".to_string()));
    }
    if total == 0 {
        return Err(DownloadError::InvalidInput("content length must be greater than 0".to_string()));
    }

    let n = u64::from(num_chunks).min(total);
    let base = total / n;

    let mut ranges = Vec::with_capacity(n as usize);
    for i in 0..n {
        let start = i * base;
        let end = if i == n - 1 { total - 1 } else { start + base - 1 };
        ranges.push(ByteRange::new(start, end));
    }

    Ok(DownloadPlan { total_length: total, ranges })
}

/// Subdivide one range into pieces of at most `max_len` bytes.
pub fn split_range(range: ByteRange, max_len: u64) -> Vec<ByteRange> {
    let max_len = max_len.max(1);
    let mut out = Vec::new();
    let mut offset = range.start;
    loop {
        let end = offset.saturating_add(max_len - 1).min(range.end);
        out.push(ByteRange::new(offset, end));
        if end == range.end {
            break;
        }
        offset = end + 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn assert_tiles(ranges: &[ByteRange], start: u64, end: u64) {
        assert_eq!(ranges.first().map(|r| r.start), Some(start));
        assert_eq!(ranges.last().map(|r| r.end), Some(end));
        for w in ranges.windows(2) {
            assert_eq!(w[1].start, w[0].end + 1);
        }
    }

    #[test]
    fn ten_chunks_last_absorbs_remainder() {
        let plan = plan_ranges(1005, 10).unwrap();
        assert_eq!(plan.len(), 10);
        assert_eq!(plan.ranges[0], ByteRange::new(0, 99));
        assert_eq!(plan.ranges[8], ByteRange::new(800, 899));
        assert_eq!(plan.ranges[9], ByteRange::new(900, 1004));
        assert_tiles(&plan.ranges, 0, 1004);
    }

    #[test]
    fn single_chunk_is_whole_file() {
        let plan = plan_ranges(42, 1).unwrap();
        assert_eq!(plan.ranges, vec![ByteRange::new(0, 41)]);
    }

    #[test]
    fn more_chunks_than_bytes_clamps() {
        let plan = plan_ranges(3, 10).unwrap();
        assert_eq!(
            plan.ranges,
            vec![ByteRange::new(0, 0), ByteRange::new(1, 1), ByteRange::new(2, 2)]
        );
    }

    #[test]
    fn rejects_zero_inputs() {
        assert!(matches!(plan_ranges(100, 0), Err(DownloadError::InvalidInput(_))));
        assert!(matches!(plan_ranges(0, 4), Err(DownloadError::InvalidInput(_))));
    }

    #[test]
    fn split_range_bounds_piece_size() {
        let pieces = split_range(ByteRange::new(100, 349), 100);
        assert_eq!(
            pieces,
            vec![ByteRange::new(100, 199), ByteRange::new(200, 299), ByteRange::new(300, 349)]
        );
        assert_eq!(split_range(ByteRange::new(5, 5), 100), vec![ByteRange::new(5, 5)]);
    }

    #[test]
    fn split_range_near_u64_max() {
        let r = ByteRange::new(u64::MAX - 10, u64::MAX);
        let pieces = split_range(r, 8);
        assert_tiles(&pieces, r.start, r.end);
    }

    proptest! {
        #[test]
        fn plan_covers_exactly(total in 1u64..2_000_000, n in 1u32..512) {
            let plan = plan_ranges(total, n).unwrap();
            let expected = u64::from(n).min(total) as usize;
            prop_assert_eq!(plan.len(), expected);
            prop_assert_eq!(plan.ranges[0].start, 0);
            prop_assert_eq!(plan.ranges[expected - 1].end, total - 1);
            for w in plan.ranges.windows(2) {
                prop_assert_eq!(w[1].start, w[0].end + 1);
            }
            let sum: u64 = plan.ranges.iter().map(|r| r.len()).sum();
            prop_assert_eq!(sum, total);
        }

        #[test]
        fn split_preserves_tiling(start in 0u64..10_000, len in 1u64..50_000, max in 1u64..4096) {
            let r = ByteRange::new(start, start + len - 1);
            let pieces = split_range(r, max);
            prop_assert_eq!(pieces[0].start, r.start);
            prop_assert_eq!(pieces[pieces.len() - 1].end, r.end);
            for w in pieces.windows(2) {
                prop_assert_eq!(w[1].start, w[0].end + 1);
            }
            prop_assert!(pieces.iter().all(|p| p.len() <= max));
        }
    }
}
