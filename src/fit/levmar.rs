//! Bounded Levenberg-Marquardt refinement, one independent fit per voxel.
//!
//! Each voxel minimizes the sum of squared residuals via damped Gauss-Newton:
//! solve `(J'J + lambda * D) delta = J' r`, with `D = diag(J'J)` when the
//! Marquardt scaling is enabled and `D = I` otherwise. Candidate steps are
//! clamped into the configured box bounds before evaluation.
//!
//! Numeric degeneracy is handled locally: a singular normal-equation solve or
//! a non-finite candidate residual is a rejected step, and a voxel whose
//! damping factor runs away is abandoned with its best-so-far parameters.

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use crate::domain::RunConfig;
use crate::model::capability::{SignalModel, cfp_block, sum_squared_residuals};
use crate::model::descriptor::ModelDescriptor;
use crate::store::parameters::ActivePartition;

/// Initial damping factor.
const LAMBDA_INIT: f64 = 0.1;
/// Damping shrink on an accepted step.
const LAMBDA_DOWN: f64 = 0.8;
/// Damping growth on a rejected step.
const LAMBDA_UP: f64 = 3.0;
/// Damping ceiling; beyond this the voxel keeps its best-so-far parameters.
const LAMBDA_MAX: f64 = 1e10;
/// Relative SSR decrease below which an accepted step counts toward
/// convergence.
const RELATIVE_TOLERANCE: f64 = 1e-9;
/// Consecutive near-flat accepted steps required to declare convergence.
const CONVERGED_STREAK: usize = 2;

/// Per-voxel outcome of the refinement.
#[derive(Debug, Clone, Copy)]
pub struct LmVoxelReport {
    pub iterations: usize,
    pub converged: bool,
    pub ssr: f64,
}

/// Per-voxel bounded nonlinear least squares.
pub struct LevenbergMarquardt<'a, M: SignalModel> {
    model: &'a M,
    descriptor: &'a ModelDescriptor,
    max_iterations: usize,
    use_marquardt: bool,
}

impl<'a, M: SignalModel> LevenbergMarquardt<'a, M> {
    pub fn new(model: &'a M, descriptor: &'a ModelDescriptor, config: &RunConfig) -> Self {
        Self {
            model,
            descriptor,
            max_iterations: config.max_lm_iterations,
            use_marquardt: config.use_marquardt,
        }
    }

    /// Refine every voxel lane of the partition in parallel.
    ///
    /// Returns one report per *real* voxel; padding lanes are computed and
    /// discarded.
    pub fn run(&self, part: &mut ActivePartition<'_>) -> Vec<LmVoxelReport> {
        let nparams = part.nparams;
        let nmeas = part.nmeas;
        let fp_stride = part.fp_stride;
        let cfp_stride = part.cfp_stride;
        let meas = part.meas;
        let fp = part.fp;
        let cfp = part.cfp;
        let free = self.descriptor.free_params();

        let mut reports: Vec<LmVoxelReport> = part
            .params
            .par_chunks_mut(nparams)
            .enumerate()
            .map(|(v, p)| {
                let meas_row = &meas[v * nmeas..(v + 1) * nmeas];
                let fp_row = &fp[v * fp_stride..(v + 1) * fp_stride];
                self.fit_voxel(p, meas_row, cfp, cfp_stride, fp_row, &free)
            })
            .collect();
        reports.truncate(part.nvox);
        reports
    }

    fn fit_voxel(
        &self,
        p: &mut [f64],
        meas: &[f64],
        cfp: &[f64],
        cfp_stride: usize,
        fp: &[f64],
        free: &[usize],
    ) -> LmVoxelReport {
        let bounds = self.descriptor.bounds();
        for &idx in free {
            p[idx] = bounds[idx].clamp(p[idx]);
        }

        let mut ssr = sum_squared_residuals(self.model, p, meas, cfp, cfp_stride, fp);
        let nfree = free.len();
        if nfree == 0 {
            self.model.fix_constraints_after_lm(p);
            return LmVoxelReport {
                iterations: 0,
                converged: true,
                ssr,
            };
        }

        let nmeas = meas.len();
        let mut jacobian = DMatrix::<f64>::zeros(nmeas, nfree);
        let mut residuals = DVector::<f64>::zeros(nmeas);
        let mut deriv_row = vec![0.0; p.len()];
        let mut candidate = vec![0.0; p.len()];

        let mut lambda = LAMBDA_INIT;
        let mut streak = 0usize;
        let mut converged = false;
        let mut iterations = 0usize;

        for iter in 0..self.max_iterations {
            iterations = iter + 1;

            for m in 0..nmeas {
                let block = cfp_block(cfp, cfp_stride, m);
                residuals[m] = meas[m] - self.model.signal(p, block, fp);
                self.model.derivatives(p, block, fp, &mut deriv_row);
                for (j, &idx) in free.iter().enumerate() {
                    jacobian[(m, j)] = deriv_row[idx];
                }
            }

            let jt = jacobian.transpose();
            let mut normal = &jt * &jacobian;
            let gradient = &jt * &residuals;
            for j in 0..nfree {
                let d = if self.use_marquardt { normal[(j, j)] } else { 1.0 };
                normal[(j, j)] += lambda * d;
            }

            // A singular or non-finite system is a rejected step, never fatal.
            let step = match normal.cholesky() {
                Some(chol) => chol.solve(&gradient),
                None => {
                    lambda *= LAMBDA_UP;
                    if lambda > LAMBDA_MAX {
                        break;
                    }
                    continue;
                }
            };

            candidate.copy_from_slice(p);
            for (j, &idx) in free.iter().enumerate() {
                candidate[idx] = bounds[idx].clamp(candidate[idx] + step[j]);
            }
            let new_ssr =
                sum_squared_residuals(self.model, &candidate, meas, cfp, cfp_stride, fp);

            if new_ssr < ssr {
                let relative_drop = if ssr > 0.0 { (ssr - new_ssr) / ssr } else { 0.0 };
                p.copy_from_slice(&candidate);
                ssr = new_ssr;
                lambda *= LAMBDA_DOWN;
                if relative_drop < RELATIVE_TOLERANCE {
                    streak += 1;
                    if streak >= CONVERGED_STREAK {
                        converged = true;
                        break;
                    }
                } else {
                    streak = 0;
                }
            } else {
                lambda *= LAMBDA_UP;
                if lambda > LAMBDA_MAX {
                    log::debug!("LM damping ran away; keeping best-so-far parameters");
                    break;
                }
            }
        }

        self.model.fix_constraints_after_lm(p);
        for &idx in free {
            p[idx] = bounds[idx].clamp(p[idx]);
        }

        LmVoxelReport {
            iterations,
            converged,
            ssr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Bound, ModelSpec, RunConfig};
    use crate::model::toy::ExpDecay;

    fn descriptor(bounds: Vec<Bound>, frozen: Vec<bool>) -> ModelDescriptor {
        let spec = ModelSpec {
            nparams: 2,
            init: Some(vec![0.3, 1.0]),
            fp_sizes: vec![],
            cfp_sizes: vec![1],
            bounds,
            priors: vec![],
            frozen,
            grid: None,
        };
        ModelDescriptor::from_spec(&spec, &ExpDecay).unwrap()
    }

    fn fit_single(
        descriptor: &ModelDescriptor,
        init: [f64; 2],
        meas: &[f64],
        xs: &[f64],
    ) -> ([f64; 2], LmVoxelReport) {
        let model = ExpDecay;
        let config = RunConfig::default();
        let lm = LevenbergMarquardt::new(&model, descriptor, &config);
        let mut p = init;
        let free = descriptor.free_params();
        let report = lm.fit_voxel(&mut p, meas, xs, 1, &[], &free);
        (p, report)
    }

    fn exp_signal(p: [f64; 2], xs: &[f64]) -> Vec<f64> {
        xs.iter().map(|x| (-p[0] * x).exp() * p[1]).collect()
    }

    #[test]
    fn recovers_exact_parameters_from_noiseless_data() {
        let xs: Vec<f64> = (0..12).map(|i| 0.2 + 0.3 * i as f64).collect();
        let truth = [1.0, 2.0];
        let meas = exp_signal(truth, &xs);
        let d = descriptor(vec![], vec![]);
        let (p, report) = fit_single(&d, [0.3, 1.0], &meas, &xs);

        assert!((p[0] - truth[0]).abs() < 1e-6, "rate: {}", p[0]);
        assert!((p[1] - truth[1]).abs() < 1e-6, "amplitude: {}", p[1]);
        assert!(report.ssr < 1e-10);
    }

    #[test]
    fn never_leaves_configured_bounds() {
        let xs: Vec<f64> = (0..10).map(|i| 0.1 + 0.5 * i as f64).collect();
        // Data generated outside the allowed box: the fit must saturate at
        // the bound, not cross it.
        let meas = exp_signal([3.0, 5.0], &xs);
        let d = descriptor(
            vec![
                Bound::MinMax { min: 0.0, max: 1.5 },
                Bound::MinMax { min: 0.0, max: 2.0 },
            ],
            vec![],
        );
        let (p, _) = fit_single(&d, [0.5, 1.0], &meas, &xs);
        assert!((0.0..=1.5).contains(&p[0]), "rate out of bounds: {}", p[0]);
        assert!((0.0..=2.0).contains(&p[1]), "amplitude out of bounds: {}", p[1]);
    }

    #[test]
    fn frozen_parameter_keeps_its_value() {
        let xs: Vec<f64> = (0..10).map(|i| 0.1 + 0.5 * i as f64).collect();
        let meas = exp_signal([1.0, 2.0], &xs);
        let d = descriptor(vec![], vec![true, false]);
        // Rate frozen at the (true) value; only the amplitude may move.
        let (p, _) = fit_single(&d, [1.0, 0.5], &meas, &xs);
        assert_eq!(p[0], 1.0);
        assert!((p[1] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn nan_measurements_degrade_to_initial_parameters() {
        let xs = [0.5, 1.0, 1.5];
        let meas = [f64::NAN, f64::NAN, f64::NAN];
        let d = descriptor(vec![], vec![]);
        let (p, report) = fit_single(&d, [0.3, 1.0], &meas, &xs);
        // No candidate can beat an infinite SSR with NaN data; the voxel
        // keeps its initial parameters and reports no convergence.
        assert_eq!(p, [0.3, 1.0]);
        assert!(!report.converged);
    }

    #[test]
    fn parallel_run_fits_every_lane() {
        use crate::store::{ParameterStore, PartitionLayout};

        let model = ExpDecay;
        let d = descriptor(vec![], vec![]);
        let config = RunConfig::default();
        let xs = vec![0.2, 0.6, 1.0, 1.8, 2.4];
        let nvox = 11;
        let mut measurements = Vec::new();
        for v in 0..nvox {
            let amp = 1.0 + v as f64 * 0.1;
            measurements.extend(exp_signal([1.0, amp], &xs));
        }
        let layout = PartitionLayout::with_size_part(nvox, 16).unwrap();
        let mut store = ParameterStore::new(
            &d,
            &config,
            layout,
            measurements,
            xs.len(),
            vec![],
            xs.clone(),
            None,
        )
        .unwrap();
        store.load_partition(0).unwrap();
        let mut active = store.active_partition().unwrap();
        let lm = LevenbergMarquardt::new(&model, &d, &config);
        let reports = lm.run(&mut active);
        assert_eq!(reports.len(), nvox);
        for (v, chunk) in active.params.chunks(2).take(nvox).enumerate() {
            let amp = 1.0 + v as f64 * 0.1;
            assert!((chunk[1] - amp).abs() < 1e-5, "voxel {v}: {}", chunk[1]);
        }
    }
}
