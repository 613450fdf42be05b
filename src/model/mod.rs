//! Pluggable signal-model abstraction.
//!
//! A model is supplied by a "designer" as a capability implementation
//! ([`SignalModel`]) plus a declarative specification (bounds, priors, grid)
//! validated into an immutable [`ModelDescriptor`]. The engine never knows
//! which concrete model it is running.

pub mod capability;
pub mod descriptor;
pub mod toy;

pub use capability::*;
pub use descriptor::*;
pub use toy::*;
