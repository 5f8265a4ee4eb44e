//! Splits an archive into block-aligned segments.

use tracing::warn;

use crate::{LEAF_SIZE, Segment, TransferError};

/// Checks that `block_size` is a positive multiple of the leaf size.
///
/// Sizes that are not a power of two are accepted with a warning; the
/// service expects power-of-two parts so that segment tree hashes nest
/// inside the archive tree.
pub fn validate_block_size(block_size: u64) -> Result<(), TransferError> {
    let leaf = LEAF_SIZE as u64;
    if block_size == 0 || block_size % leaf != 0 {
        return Err(TransferError::InvalidConfiguration(format!(
            "block size {block_size} is not a positive multiple of {leaf} bytes"
        )));
    }
    if !(block_size / leaf).is_power_of_two() {
        warn!(block_size, "block size is not a power-of-two number of leaves");
    }
    Ok(())
}

/// Number of segments needed to cover `total_size`. Never zero.
pub fn segment_count(total_size: u64, block_size: u64) -> u64 {
    if block_size == 0 {
        return 1;
    }
    total_size.div_ceil(block_size).max(1)
}

/// Plans the segments covering blocks `start_block..=end_block`.
///
/// `end_block` defaults to the last block and is clamped to it. An empty
/// archive yields exactly one empty segment.
pub fn plan(
    total_size: u64,
    block_size: u64,
    start_block: u64,
    end_block: Option<u64>,
) -> Result<Vec<Segment>, TransferError> {
    validate_block_size(block_size)?;

    if let Some(end) = end_block
        && end < start_block
    {
        return Err(TransferError::InvalidConfiguration(format!(
            "end block {end} is before start block {start_block}"
        )));
    }

    let count = segment_count(total_size, block_size);
    if start_block >= count {
        return Err(TransferError::InvalidConfiguration(format!(
            "start block {start_block} is past the last block {}",
            count - 1
        )));
    }
    let last = end_block.unwrap_or(u64::MAX).min(count - 1);

    let segments = (start_block..=last)
        .map(|index| {
            let start = index * block_size;
            Segment {
                index,
                start,
                len: block_size.min(total_size - start),
            }
        })
        .collect();
    Ok(segments)
}
