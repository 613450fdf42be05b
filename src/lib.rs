//! `voxfit` library crate.
//!
//! Voxel-wise parametric model fitting: every spatial sample ("voxel") of a
//! measurement dataset gets an independent fit of a pluggable signal model,
//! via bounded Levenberg-Marquardt refinement and, optionally, a
//! Metropolis-Hastings posterior sampler.
//!
//! The crate is the fitting *engine* only. Collaborators outside this crate
//! handle command-line parsing, image formats, dataset splitting and merging;
//! the engine consumes plain numeric buffers and produces plain numeric
//! buffers plus per-partition binary sample archives.

pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod model;
pub mod store;
