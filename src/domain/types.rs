//! Shared domain types.
//!
//! These types are intentionally lightweight and serializable so they can be:
//!
//! - constructed in-memory by embedding applications
//! - deserialized from a model-configuration file by out-of-scope front-ends
//! - echoed into run logs for reproducibility

use serde::{Deserialize, Serialize};

/// Box bound attached to a single model parameter.
///
/// Bounds are enforced in two places:
///
/// - Levenberg-Marquardt clamps every candidate step into the bound
/// - MCMC rejects out-of-bound proposals before any likelihood evaluation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bound {
    /// Unbounded parameter.
    Free,
    /// Lower bound only.
    Min { min: f64 },
    /// Upper bound only.
    Max { max: f64 },
    /// Two-sided bound.
    MinMax { min: f64, max: f64 },
}

impl Bound {
    /// Clamp a value into the bound.
    pub fn clamp(self, v: f64) -> f64 {
        match self {
            Bound::Free => v,
            Bound::Min { min } => v.max(min),
            Bound::Max { max } => v.min(max),
            Bound::MinMax { min, max } => v.clamp(min, max),
        }
    }

    /// Whether a value satisfies the bound.
    pub fn contains(self, v: f64) -> bool {
        match self {
            Bound::Free => true,
            Bound::Min { min } => v >= min,
            Bound::Max { max } => v <= max,
            Bound::MinMax { min, max } => v >= min && v <= max,
        }
    }
}

/// Prior attached to a single model parameter (MCMC only).
///
/// Log-prior contributions are evaluated per parameter; a value outside the
/// prior's support rejects the proposal outright.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Prior {
    /// Flat prior (no contribution).
    None,
    /// Gaussian prior.
    Gaussian { mean: f64, sd: f64 },
    /// Gamma prior with shape `alpha` and rate `beta` (support: v > 0).
    Gamma { alpha: f64, beta: f64 },
    /// Automatic relevance determination: a sparsity prior favoring zero,
    /// `log p(v) = -fudge * ln(v)` (support: v > 0). The fudge factor is a
    /// run-level setting (`RunConfig::fudge`).
    Ard,
    /// `log p(v) = ln|sin v|`, for angular parameters.
    Sin,
    /// Delegates to the model capability's `custom_prior`.
    Custom,
}

/// Grid-search specification: a subset of parameter indices, each with a
/// candidate value list. The search enumerates the cartesian product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    /// Parameter indices included in the search.
    pub params: Vec<usize>,
    /// Candidate values, one list per entry of `params`.
    pub values: Vec<Vec<f64>>,
}

/// Declarative model specification, as parsed from a model-configuration
/// file by an out-of-scope front-end.
///
/// Validation happens in [`crate::model::ModelDescriptor::from_spec`]; a
/// `ModelSpec` itself makes no guarantees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Number of parameters to estimate.
    pub nparams: usize,

    /// Optional default initialization values (length `nparams`).
    #[serde(default)]
    pub init: Option<Vec<f64>>,

    /// Sizes of the per-voxel fixed-parameter fields (e.g. a T1 volume).
    #[serde(default)]
    pub fp_sizes: Vec<usize>,

    /// Sizes of the common fixed-parameter fields, per measurement
    /// (e.g. gradient directions and strengths).
    #[serde(default)]
    pub cfp_sizes: Vec<usize>,

    /// Per-parameter bounds (empty means all free).
    #[serde(default)]
    pub bounds: Vec<Bound>,

    /// Per-parameter priors (empty means all flat).
    #[serde(default)]
    pub priors: Vec<Prior>,

    /// Per-parameter frozen flags. Frozen parameters keep their initial value
    /// and are excluded from optimization and sampling, but still feed the
    /// predicted signal.
    #[serde(default)]
    pub frozen: Vec<bool>,

    /// Optional grid-search initializer specification.
    #[serde(default)]
    pub grid: Option<GridSpec>,
}

/// Immutable run-level configuration.
///
/// Constructed once at startup from already-parsed values (the engine does not
/// parse a command line) and passed down through component constructors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Global seed for per-voxel generators.
    pub seed: u64,
    /// MCMC jumps after burn-in.
    pub njumps: usize,
    /// MCMC jumps discarded at the start.
    pub nburnin: usize,
    /// Burn-in jumps executed before the ARD prior is imposed.
    pub nburnin_noard: usize,
    /// Jumps between recorded samples.
    pub sampleevery: usize,
    /// Jumps between proposal standard-deviation updates.
    pub updateproposalevery: usize,
    /// ARD fudge factor.
    pub fudge: f64,
    /// Run the Levenberg(-Marquardt) refinement.
    pub run_levmar: bool,
    /// Use the Marquardt diagonal scaling in the damping term.
    pub use_marquardt: bool,
    /// Maximum Levenberg-Marquardt iterations.
    pub max_lm_iterations: usize,
    /// Run MCMC after the point estimate.
    pub run_mcmc: bool,
    /// Use the Rician noise likelihood instead of Gaussian.
    pub rician: bool,
    /// Disable the ARD prior everywhere.
    pub no_ard: bool,
    /// Apply the ARD prior to every free parameter.
    pub all_ard: bool,
    /// Noise scale: the Gaussian likelihood is `-SSR / (2 * noise_scale)`;
    /// the Rician likelihood reuses it as sigma^2.
    pub noise_scale: f64,
    /// Index of the dataset partition this process handles (0-based).
    pub part_id: usize,
    /// Total number of dataset partitions across processes.
    pub nparts: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            seed: 8219,
            njumps: 1250,
            nburnin: 5000,
            nburnin_noard: 0,
            sampleevery: 25,
            updateproposalevery: 40,
            fudge: 1.0,
            run_levmar: true,
            use_marquardt: true,
            max_lm_iterations: 200,
            run_mcmc: false,
            rician: false,
            no_ard: false,
            all_ard: false,
            noise_scale: 1.0,
            part_id: 0,
            nparts: 1,
        }
    }
}

impl RunConfig {
    /// Number of samples recorded per parameter and voxel.
    ///
    /// Without MCMC there is a single "sample" slot holding the point
    /// estimate.
    pub fn nsamples(&self) -> usize {
        if self.run_mcmc {
            self.njumps / self.sampleevery.max(1)
        } else {
            1
        }
    }
}
