//! Partition arithmetic.
//!
//! Voxels are fitted in bounded batches ("partitions"). The default cap of
//! 12,800 voxels keeps the padded working buffers within a few hundred
//! megabytes for typical measurement counts, regardless of dataset size.
//! The last partition may be smaller; every partition is padded up to a
//! multiple of the lane width with inert placeholder voxels that are computed
//! but never written back.

use crate::error::AppError;

/// Default maximum voxels per partition.
pub const SIZE_PART: usize = 12_800;

/// Lane width: padded partition sizes are a multiple of this.
pub const VOXELS_BLOCK: usize = 8;

/// Splits `nvox` voxels into fixed-size partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionLayout {
    nvox: usize,
    size_part: usize,
    npartitions: usize,
    size_last: usize,
}

impl PartitionLayout {
    /// Layout with the default partition cap.
    pub fn new(nvox: usize) -> Result<Self, AppError> {
        Self::with_size_part(nvox, SIZE_PART)
    }

    /// Layout with an explicit partition cap (smaller caps bound memory
    /// tighter at the cost of more partition round-trips).
    pub fn with_size_part(nvox: usize, size_part: usize) -> Result<Self, AppError> {
        if nvox == 0 {
            return Err(AppError::data("Dataset has no voxels to fit."));
        }
        if size_part == 0 {
            return Err(AppError::config("Partition size must be > 0."));
        }
        let npartitions = nvox.div_ceil(size_part);
        let remainder = nvox % size_part;
        let size_last = if remainder == 0 { size_part } else { remainder };
        Ok(Self {
            nvox,
            size_part,
            npartitions,
            size_last,
        })
    }

    /// Total voxels in the dataset.
    pub fn nvox(&self) -> usize {
        self.nvox
    }

    /// Number of partitions.
    pub fn npartitions(&self) -> usize {
        self.npartitions
    }

    /// Real (unpadded) voxel count of a partition.
    pub fn partition_size(&self, part: usize) -> usize {
        if part + 1 == self.npartitions {
            self.size_last
        } else {
            self.size_part
        }
    }

    /// Padded voxel count of a partition: the real count rounded up to a
    /// multiple of [`VOXELS_BLOCK`].
    pub fn padded_size(&self, part: usize) -> usize {
        self.partition_size(part).div_ceil(VOXELS_BLOCK) * VOXELS_BLOCK
    }

    /// Index of the first voxel of a partition within the full dataset.
    pub fn offset(&self, part: usize) -> usize {
        part * self.size_part
    }

    /// Largest padded partition size; working buffers are allocated once at
    /// this capacity.
    pub fn max_padded_size(&self) -> usize {
        self.size_part.min(self.nvox).div_ceil(VOXELS_BLOCK) * VOXELS_BLOCK
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_multiple_has_no_short_tail() {
        let layout = PartitionLayout::with_size_part(100, 25).unwrap();
        assert_eq!(layout.npartitions(), 4);
        assert_eq!(layout.partition_size(3), 25);
        assert_eq!(layout.offset(2), 50);
    }

    #[test]
    fn last_partition_is_smaller_and_padded_to_lane_width() {
        let layout = PartitionLayout::with_size_part(103, 25).unwrap();
        assert_eq!(layout.npartitions(), 5);
        assert_eq!(layout.partition_size(4), 3);
        assert_eq!(layout.padded_size(4), VOXELS_BLOCK);
        assert_eq!(layout.offset(4), 100);
    }

    #[test]
    fn default_cap_bounds_every_partition() {
        let layout = PartitionLayout::new(100_000).unwrap();
        assert_eq!(layout.partition_size(0), SIZE_PART);
        assert_eq!(layout.npartitions(), 100_000usize.div_ceil(SIZE_PART));
    }

    #[test]
    fn empty_dataset_is_a_data_error() {
        let err = PartitionLayout::new(0).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }
}
