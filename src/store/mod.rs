//! Per-voxel parameter and sample storage.
//!
//! The dataset is processed one bounded partition at a time to keep the peak
//! memory footprint fixed regardless of dataset size:
//!
//! - `partition` holds the pure batch arithmetic (sizes, offsets, padding)
//! - `parameters` owns the buffers and the partition load/write-back cycle

pub mod parameters;
pub mod partition;

pub use parameters::*;
pub use partition::*;
