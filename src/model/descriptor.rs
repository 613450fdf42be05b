//! Validated, immutable model metadata.
//!
//! A [`ModelDescriptor`] is built once from a declarative [`ModelSpec`] and a
//! capability implementation, then only read. All configuration errors are
//! raised here, before any solver work begins.

use crate::domain::{Bound, GridSpec, ModelSpec, Prior};
use crate::error::AppError;
use crate::model::capability::SignalModel;

/// Upper limit on grid-search combinations; the cartesian product grows
/// multiplicatively with candidate-list lengths.
pub const MAX_GRID_COMBINATIONS: usize = 65_536;

/// Immutable, validated model metadata.
///
/// All per-parameter vectors have length `nparams` and share indexing.
#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    nparams: usize,
    init: Vec<f64>,
    fp_sizes: Vec<usize>,
    fp_tsize: usize,
    cfp_sizes: Vec<usize>,
    cfp_tsize: usize,
    bounds: Vec<Bound>,
    priors: Vec<Prior>,
    frozen: Vec<bool>,
    grid: Option<GridSpec>,
}

impl ModelDescriptor {
    /// Validate a declarative spec against a capability implementation.
    pub fn from_spec<M: SignalModel>(spec: &ModelSpec, model: &M) -> Result<Self, AppError> {
        let nparams = spec.nparams;
        if nparams == 0 {
            return Err(AppError::config("Model must have at least one parameter."));
        }
        if nparams != model.nparams() {
            return Err(AppError::config(format!(
                "Model spec declares {nparams} parameters but the linked capability has {}.",
                model.nparams()
            )));
        }

        let init = match &spec.init {
            Some(v) => {
                if v.len() != nparams {
                    return Err(AppError::config(format!(
                        "Initialization vector has {} values, expected {nparams}.",
                        v.len()
                    )));
                }
                if v.iter().any(|x| !x.is_finite()) {
                    return Err(AppError::config("Initialization values must be finite."));
                }
                v.clone()
            }
            None => vec![0.0; nparams],
        };

        let bounds = expand_per_param(&spec.bounds, nparams, Bound::Free, "bounds")?;
        for (i, b) in bounds.iter().enumerate() {
            if let Bound::MinMax { min, max } = b {
                if min > max {
                    return Err(AppError::config(format!(
                        "Inverted bound for parameter {i}: min={min} > max={max}."
                    )));
                }
            }
        }

        let priors = expand_per_param(&spec.priors, nparams, Prior::None, "priors")?;
        for (i, prior) in priors.iter().enumerate() {
            match prior {
                Prior::Gaussian { sd, .. } if *sd <= 0.0 => {
                    return Err(AppError::config(format!(
                        "Gaussian prior for parameter {i} needs sd > 0 (got {sd})."
                    )));
                }
                Prior::Gamma { alpha, beta } if *alpha <= 0.0 || *beta <= 0.0 => {
                    return Err(AppError::config(format!(
                        "Gamma prior for parameter {i} needs alpha > 0 and beta > 0 \
                         (got alpha={alpha}, beta={beta})."
                    )));
                }
                _ => {}
            }
        }

        let frozen = expand_per_param(&spec.frozen, nparams, false, "frozen flags")?;

        if let Some(grid) = &spec.grid {
            validate_grid(grid, nparams, &frozen)?;
        }

        Ok(Self {
            nparams,
            init,
            fp_tsize: spec.fp_sizes.iter().sum(),
            fp_sizes: spec.fp_sizes.clone(),
            cfp_tsize: spec.cfp_sizes.iter().sum(),
            cfp_sizes: spec.cfp_sizes.clone(),
            bounds,
            priors,
            frozen,
            grid: spec.grid.clone(),
        })
    }

    /// Number of parameters to estimate.
    pub fn nparams(&self) -> usize {
        self.nparams
    }

    /// Default initialization values (zeros when the designer gave none).
    pub fn init(&self) -> &[f64] {
        &self.init
    }

    /// Sizes of the per-voxel fixed-parameter fields.
    pub fn fp_sizes(&self) -> &[usize] {
        &self.fp_sizes
    }

    /// Total per-voxel fixed-parameter block size.
    pub fn fp_tsize(&self) -> usize {
        self.fp_tsize
    }

    /// Sizes of the common fixed-parameter fields.
    pub fn cfp_sizes(&self) -> &[usize] {
        &self.cfp_sizes
    }

    /// Total common-fixed-parameter size per measurement.
    pub fn cfp_tsize(&self) -> usize {
        self.cfp_tsize
    }

    /// Per-parameter bounds.
    pub fn bounds(&self) -> &[Bound] {
        &self.bounds
    }

    /// Per-parameter priors.
    pub fn priors(&self) -> &[Prior] {
        &self.priors
    }

    /// Per-parameter frozen flags.
    pub fn frozen(&self) -> &[bool] {
        &self.frozen
    }

    /// Indices of the parameters that are actually optimized.
    pub fn free_params(&self) -> Vec<usize> {
        (0..self.nparams).filter(|&i| !self.frozen[i]).collect()
    }

    /// Grid-search specification, if the designer provided one.
    pub fn grid(&self) -> Option<&GridSpec> {
        self.grid.as_ref()
    }
}

/// Expand an optionally-empty per-parameter vector to full length.
fn expand_per_param<T: Clone>(
    values: &[T],
    nparams: usize,
    default: T,
    what: &str,
) -> Result<Vec<T>, AppError> {
    if values.is_empty() {
        Ok(vec![default; nparams])
    } else if values.len() == nparams {
        Ok(values.to_vec())
    } else {
        Err(AppError::config(format!(
            "Model spec has {} {what}, expected 0 or {nparams}.",
            values.len()
        )))
    }
}

fn validate_grid(grid: &GridSpec, nparams: usize, frozen: &[bool]) -> Result<(), AppError> {
    if grid.params.is_empty() {
        return Err(AppError::config("Grid spec lists no parameters."));
    }
    if grid.params.len() != grid.values.len() {
        return Err(AppError::config(format!(
            "Grid spec has {} parameter indices but {} value lists.",
            grid.params.len(),
            grid.values.len()
        )));
    }
    let mut combinations: usize = 1;
    for (&idx, values) in grid.params.iter().zip(&grid.values) {
        if idx >= nparams {
            return Err(AppError::config(format!(
                "Grid parameter index {idx} out of range (nparams = {nparams})."
            )));
        }
        if frozen[idx] {
            return Err(AppError::config(format!(
                "Grid parameter {idx} is frozen; it cannot be searched."
            )));
        }
        if values.is_empty() {
            return Err(AppError::config(format!(
                "Grid parameter {idx} has an empty candidate list."
            )));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(AppError::config(format!(
                "Grid parameter {idx} has non-finite candidate values."
            )));
        }
        combinations = combinations.saturating_mul(values.len());
    }
    if combinations > MAX_GRID_COMBINATIONS {
        return Err(AppError::config(format!(
            "Grid search would enumerate {combinations} combinations \
             (limit is {MAX_GRID_COMBINATIONS})."
        )));
    }
    Ok(())
}
