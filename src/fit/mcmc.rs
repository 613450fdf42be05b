//! Metropolis-Hastings posterior sampling, one independent chain per voxel.
//!
//! Schedule (all counts fixed by configuration, never data-dependent):
//!
//! - `nburnin` discarded jumps, the first `nburnin_noard` of them with the
//!   ARD prior suppressed so sparsification cannot kick in prematurely
//! - `njumps` sampling jumps, recording the state every `sampleevery` jumps
//!   (`nsamples = njumps / sampleevery` exactly)
//! - every `updateproposalevery` jumps, in both phases, each parameter's
//!   proposal standard deviation is rescaled from its observed acceptance
//!   counts and the counters reset
//!
//! Each jump proposes every free parameter in turn from a Gaussian centered
//! on the current value. Out-of-bound values and model constraint violations
//! reject before any likelihood evaluation. Reproducibility: each voxel owns
//! a generator seeded from (global seed, lane index), so no cross-lane
//! ordering can affect a chain.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::StandardNormal;
use rayon::prelude::*;

use crate::domain::{Prior, RunConfig};
use crate::fit::prior::{gaussian_log_likelihood, log_prior, rician_log_term};
use crate::model::capability::{SignalModel, cfp_block, sum_squared_residuals};
use crate::model::descriptor::ModelDescriptor;
use crate::store::parameters::ActivePartition;

/// Initial proposal sd as a fraction of the starting parameter value.
const INITIAL_PROPOSAL_FRACTION: f64 = 0.1;
/// Floor for the initial proposal sd (parameters starting at zero still move).
const INITIAL_PROPOSAL_FLOOR: f64 = 0.01;
/// Clamp range for adapted proposal sds.
const MIN_PROPOSAL_SD: f64 = 1e-8;
const MAX_PROPOSAL_SD: f64 = 1e3;

/// Per-voxel chain bookkeeping returned for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct McmcVoxelStats {
    pub proposed: usize,
    pub accepted: usize,
    pub samples_recorded: usize,
    pub sampling_adaptations: usize,
}

impl McmcVoxelStats {
    pub fn acceptance_rate(&self) -> f64 {
        if self.proposed == 0 {
            0.0
        } else {
            self.accepted as f64 / self.proposed as f64
        }
    }
}

/// Per-voxel Metropolis-Hastings sampler.
pub struct McmcSampler<'a, M: SignalModel> {
    model: &'a M,
    descriptor: &'a ModelDescriptor,
    config: &'a RunConfig,
    /// Priors after resolving the run-level ARD flags.
    priors: Vec<Prior>,
}

impl<'a, M: SignalModel> McmcSampler<'a, M> {
    pub fn new(model: &'a M, descriptor: &'a ModelDescriptor, config: &'a RunConfig) -> Self {
        let mut priors = descriptor.priors().to_vec();
        if config.all_ard {
            for (i, prior) in priors.iter_mut().enumerate() {
                if !descriptor.frozen()[i] {
                    *prior = Prior::Ard;
                }
            }
        }
        if config.no_ard {
            for prior in priors.iter_mut() {
                if *prior == Prior::Ard {
                    *prior = Prior::None;
                }
            }
        }
        Self {
            model,
            descriptor,
            config,
            priors,
        }
    }

    /// Run one full chain per voxel lane of the partition, in parallel,
    /// starting from the current parameter estimates.
    ///
    /// Returns stats for the *real* voxels; padding lanes are computed and
    /// discarded.
    pub fn run(&self, part: &mut ActivePartition<'_>) -> Vec<McmcVoxelStats> {
        let nparams = part.nparams;
        let nsamples = part.nsamples;
        let nmeas = part.nmeas;
        let fp_stride = part.fp_stride;
        let cfp_stride = part.cfp_stride;
        let meas = part.meas;
        let fp = part.fp;
        let cfp = part.cfp;
        let free = self.descriptor.free_params();

        let mut stats: Vec<McmcVoxelStats> = part
            .params
            .par_chunks_mut(nparams)
            .zip(part.samples.par_chunks_mut(nsamples * nparams))
            .enumerate()
            .map(|(lane, (p, sample_slot))| {
                let meas_row = &meas[lane * nmeas..(lane + 1) * nmeas];
                let fp_row = &fp[lane * fp_stride..(lane + 1) * fp_stride];
                self.sample_voxel(lane, p, sample_slot, meas_row, cfp, cfp_stride, fp_row, &free)
            })
            .collect();
        stats.truncate(part.nvox);
        stats
    }

    fn sample_voxel(
        &self,
        lane: usize,
        p: &mut [f64],
        sample_slot: &mut [f64],
        meas: &[f64],
        cfp: &[f64],
        cfp_stride: usize,
        fp: &[f64],
        free: &[usize],
    ) -> McmcVoxelStats {
        let config = self.config;
        let mut rng = StdRng::seed_from_u64(voxel_seed(config.seed, lane as u64));
        let mut stats = McmcVoxelStats::default();

        let mut sd: Vec<f64> = free
            .iter()
            .map(|&idx| (INITIAL_PROPOSAL_FRACTION * p[idx].abs()).max(INITIAL_PROPOSAL_FLOOR))
            .collect();
        let mut accepted = vec![0usize; free.len()];
        let mut rejected = vec![0usize; free.len()];

        let mut loglik = self.log_likelihood(p, meas, cfp, cfp_stride, fp);

        // Burn-in: discarded jumps, ARD possibly suppressed at the start.
        for j in 1..=config.nburnin {
            let ard_enabled = j > config.nburnin_noard;
            self.jump(
                p, meas, cfp, cfp_stride, fp, free, &sd, &mut accepted, &mut rejected,
                &mut loglik, ard_enabled, &mut rng, &mut stats,
            );
            if config.updateproposalevery > 0 && j % config.updateproposalevery == 0 {
                adapt_proposals(&mut sd, &mut accepted, &mut rejected);
            }
        }

        // Sampling phase.
        let mut next_sample = 0usize;
        for j in 1..=config.njumps {
            self.jump(
                p, meas, cfp, cfp_stride, fp, free, &sd, &mut accepted, &mut rejected,
                &mut loglik, true, &mut rng, &mut stats,
            );
            if config.updateproposalevery > 0 && j % config.updateproposalevery == 0 {
                adapt_proposals(&mut sd, &mut accepted, &mut rejected);
                stats.sampling_adaptations += 1;
            }
            if config.sampleevery > 0
                && j % config.sampleevery == 0
                && next_sample < sample_slot.len() / p.len()
            {
                let start = next_sample * p.len();
                sample_slot[start..start + p.len()].copy_from_slice(p);
                next_sample += 1;
                stats.samples_recorded += 1;
            }
        }

        stats
    }

    fn jump(
        &self,
        p: &mut [f64],
        meas: &[f64],
        cfp: &[f64],
        cfp_stride: usize,
        fp: &[f64],
        free: &[usize],
        sd: &[f64],
        accepted: &mut [usize],
        rejected: &mut [usize],
        loglik: &mut f64,
        ard_enabled: bool,
        rng: &mut StdRng,
        stats: &mut McmcVoxelStats,
    ) {
        let bounds = self.descriptor.bounds();
        for (k, &idx) in free.iter().enumerate() {
            stats.proposed += 1;
            let noise: f64 = rng.sample(StandardNormal);
            let proposal = p[idx] + sd[k] * noise;

            // Hard rejections first: no likelihood evaluation needed.
            if !bounds[idx].contains(proposal) {
                rejected[k] += 1;
                continue;
            }
            let current = p[idx];
            p[idx] = proposal;
            if !self.model.mcmc_constraints(p) {
                p[idx] = current;
                rejected[k] += 1;
                continue;
            }

            let new_loglik = self.log_likelihood(p, meas, cfp, cfp_stride, fp);
            let prior = self.priors[idx];
            let new_logprior = log_prior(
                self.model, prior, idx, p, cfp, fp, self.config.fudge, ard_enabled,
            );
            p[idx] = current;
            let old_logprior = log_prior(
                self.model, prior, idx, p, cfp, fp, self.config.fudge, ard_enabled,
            );

            let delta = (new_loglik - *loglik) + (new_logprior - old_logprior);
            let accept =
                delta >= 0.0 || (delta.is_finite() && rng.gen_range(0.0..1.0) < delta.exp());
            if accept {
                p[idx] = proposal;
                *loglik = new_loglik;
                accepted[k] += 1;
                stats.accepted += 1;
            } else {
                rejected[k] += 1;
            }
        }
    }

    fn log_likelihood(
        &self,
        p: &[f64],
        meas: &[f64],
        cfp: &[f64],
        cfp_stride: usize,
        fp: &[f64],
    ) -> f64 {
        if self.config.rician {
            let mut total = 0.0;
            for (m, &obs) in meas.iter().enumerate() {
                let pred = self.model.signal(p, cfp_block(cfp, cfp_stride, m), fp);
                total += rician_log_term(obs, pred, self.config.noise_scale);
            }
            total
        } else {
            let ssr = sum_squared_residuals(self.model, p, meas, cfp, cfp_stride, fp);
            gaussian_log_likelihood(ssr, self.config.noise_scale)
        }
    }
}

/// Rescale each proposal sd from its acceptance counts and reset them.
///
/// `sqrt((accepted + 1) / (rejected + 1))` grows the step when everything is
/// accepted and shrinks it when everything is rejected, settling near a 50%
/// acceptance rate.
fn adapt_proposals(sd: &mut [f64], accepted: &mut [usize], rejected: &mut [usize]) {
    for k in 0..sd.len() {
        let factor = ((accepted[k] + 1) as f64 / (rejected[k] + 1) as f64).sqrt();
        sd[k] = (sd[k] * factor).clamp(MIN_PROPOSAL_SD, MAX_PROPOSAL_SD);
        accepted[k] = 0;
        rejected[k] = 0;
    }
}

/// Deterministic per-voxel seed from the global seed and the lane index.
fn voxel_seed(seed: u64, lane: u64) -> u64 {
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    lane.hash(&mut hasher);
    hasher.finish()
}
