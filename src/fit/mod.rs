//! Fitting orchestration.
//!
//! Responsibilities:
//!
//! - walk the dataset one partition at a time (strictly sequential, so the
//!   memory footprint stays bounded)
//! - seed initial estimates via grid search when the model configures one
//! - refine every voxel with Levenberg-Marquardt
//! - run MCMC from the refined estimates, or copy the point estimate into
//!   the single sample slot when sampling is disabled

pub mod grid;
pub mod levmar;
pub mod mcmc;
pub mod prior;

pub use grid::*;
pub use levmar::*;
pub use mcmc::*;

use crate::domain::RunConfig;
use crate::error::AppError;
use crate::model::capability::SignalModel;
use crate::model::descriptor::ModelDescriptor;
use crate::store::parameters::ParameterStore;

/// Aggregate outcome of a full fitting run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunSummary {
    /// Real voxels processed.
    pub nvox: usize,
    /// Voxels whose LM refinement met the convergence criteria.
    pub lm_converged: usize,
    /// Mean MCMC acceptance rate across voxels, when sampling ran.
    pub mean_acceptance: Option<f64>,
}

/// Drives one dataset partition set through grid search, LM and MCMC.
pub struct FitEngine<'a, M: SignalModel> {
    model: &'a M,
    descriptor: &'a ModelDescriptor,
    config: &'a RunConfig,
}

impl<'a, M: SignalModel> FitEngine<'a, M> {
    pub fn new(model: &'a M, descriptor: &'a ModelDescriptor, config: &'a RunConfig) -> Self {
        Self {
            model,
            descriptor,
            config,
        }
    }

    /// Fit every voxel of the store, partition by partition.
    pub fn run(&self, store: &mut ParameterStore) -> Result<RunSummary, AppError> {
        let grid = GridSearch::new(self.model, self.descriptor);
        let lm = LevenbergMarquardt::new(self.model, self.descriptor, self.config);
        let sampler = McmcSampler::new(self.model, self.descriptor, self.config);

        let mut summary = RunSummary::default();
        let mut acceptance_sum = 0.0;
        let mut acceptance_voxels = 0usize;

        for part in 0..store.layout().npartitions() {
            store.load_partition(part)?;
            {
                let mut active = store.active_partition()?;
                summary.nvox += active.nvox;

                if self.descriptor.grid().is_some() {
                    grid.run(&mut active);
                }
                if self.config.run_levmar {
                    let reports = lm.run(&mut active);
                    summary.lm_converged += reports.iter().filter(|r| r.converged).count();
                }
                if self.config.run_mcmc {
                    let stats = sampler.run(&mut active);
                    acceptance_voxels += stats.len();
                    acceptance_sum += stats.iter().map(|s| s.acceptance_rate()).sum::<f64>();
                }
            }
            store.copy_params_back()?;
            if self.config.run_mcmc {
                store.copy_samples_back()?;
            }
            log::debug!(
                "partition {part}/{} processed ({} voxels)",
                store.layout().npartitions(),
                store.layout().partition_size(part)
            );
        }

        if !self.config.run_mcmc {
            store.copy_params_to_samples()?;
        }
        if acceptance_voxels > 0 {
            summary.mean_acceptance = Some(acceptance_sum / acceptance_voxels as f64);
        }
        Ok(summary)
    }
}
