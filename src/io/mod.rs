//! Input/output helpers.
//!
//! Only the per-partition binary sample archives live here; volumetric image
//! reading/writing belongs to out-of-scope collaborators.

pub mod samples;

pub use samples::*;
