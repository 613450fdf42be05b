//! Domain types shared by the whole engine.
//!
//! This module defines:
//!
//! - the immutable run-level configuration (`RunConfig`)
//! - per-parameter bound and prior descriptions (`Bound`, `Prior`)
//! - the declarative model specification (`ModelSpec`, `GridSpec`)

pub mod types;

pub use types::*;
