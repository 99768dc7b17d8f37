//! Splitting extraction results into bounded sink writes

use std::slice::Chunks;

use crate::error::{Result, SyncError};

/// Partition `records` into ordered chunks of at most `max_chunk_size`.
///
/// Yields `ceil(N / M)` chunks; only the last one may be shorter.
pub fn split<T>(records: &[T], max_chunk_size: usize) -> Result<Chunks<'_, T>> {
    if max_chunk_size == 0 {
        return Err(SyncError::InvalidChunkSize(max_chunk_size));
    }
    Ok(records.chunks(max_chunk_size))
}

/// Number of chunks `split` yields for `len` records
pub fn chunk_count(len: usize, max_chunk_size: usize) -> usize {
    if max_chunk_size == 0 {
        0
    } else {
        len.div_ceil(max_chunk_size)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn records(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("cpu value={i} {i}")).collect()
    }

    #[test]
    fn test_exact_multiple_has_no_trailing_chunk() {
        let records = records(6);
        let sizes: Vec<usize> = split(&records, 2).unwrap().map(<[String]>::len).collect();
        assert_eq!(sizes, vec![2, 2, 2]);
    }

    #[test]
    fn test_short_input_is_one_chunk() {
        let records = records(3);
        let chunks: Vec<&[String]> = split(&records, 100).unwrap().collect();
        assert_eq!(chunks, vec![records.as_slice()]);
    }

    #[test]
    fn test_empty_input_has_no_chunks() {
        let records = records(0);
        assert_eq!(split(&records, 10).unwrap().count(), 0);
        assert_eq!(chunk_count(0, 10), 0);
    }

    #[test]
    fn test_zero_chunk_size_is_rejected() {
        let records = records(1);
        assert!(matches!(
            split(&records, 0),
            Err(SyncError::InvalidChunkSize(0))
        ));
    }

    proptest! {
        #[test]
        fn prop_split_covers_every_record_in_order(n in 0usize..500, m in 1usize..64) {
            let records = records(n);
            let chunks: Vec<&[String]> = split(&records, m).unwrap().collect();

            prop_assert_eq!(chunks.len(), chunk_count(n, m));
            prop_assert!(chunks.iter().all(|c| !c.is_empty() && c.len() <= m));
            if let Some((last, full)) = chunks.split_last() {
                prop_assert!(full.iter().all(|c| c.len() == m));
                prop_assert!(last.len() <= m);
            }
            prop_assert_eq!(chunks.concat(), records);
        }
    }
}
