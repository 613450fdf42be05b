//! The signal-model capability trait.
//!
//! Four operations are expected from a model designer, mirroring the classic
//! plugin surface of voxel-wise fitting tools:
//!
//! - the predicted signal for one measurement
//! - partial derivatives (analytic, or the numerical default)
//! - hard constraints checked during MCMC
//! - a constraint fix-up applied once after Levenberg-Marquardt
//!
//! plus an optional custom log-prior term. All operations must be pure: the
//! same inputs always give the same outputs, with no interior mutation, so a
//! single model instance can serve every voxel lane concurrently.

/// Relative step for central numerical differentiation.
const STEP_FRACTION: f64 = 1e-4;
/// Smallest absolute differentiation step.
const MIN_STEP: f64 = 1e-8;
/// Largest absolute differentiation step.
const MAX_STEP: f64 = 1e-2;

/// A parametric signal model, evaluated independently per measurement.
///
/// `p` is the full parameter vector, `cfp` the common-fixed-parameter slice
/// for one measurement, and `fp` the per-voxel fixed-parameter block.
pub trait SignalModel: Send + Sync {
    /// Number of parameters to estimate. Must match the descriptor.
    fn nparams(&self) -> usize;

    /// Predicted signal for one measurement.
    fn signal(&self, p: &[f64], cfp: &[f64], fp: &[f64]) -> f64;

    /// Partial derivatives of the predicted signal with respect to every
    /// parameter, for one measurement, written into `out` (length `nparams`).
    ///
    /// The default implementation uses central differences with a signed,
    /// magnitude-scaled step. Override with analytic derivatives when the
    /// model has them.
    fn derivatives(&self, p: &[f64], cfp: &[f64], fp: &[f64], out: &mut [f64]) {
        let mut work = p.to_vec();
        for (i, slot) in out.iter_mut().enumerate() {
            let step = diff_step(p[i]);
            work[i] = p[i] + step;
            let fwd = self.signal(&work, cfp, fp);
            work[i] = p[i] - step;
            let bwd = self.signal(&work, cfp, fp);
            work[i] = p[i];
            *slot = (fwd - bwd) / (2.0 * step);
        }
    }

    /// Hard rejection predicate evaluated before any Metropolis acceptance
    /// probability is computed. Useful for relations *between* parameters
    /// that box bounds cannot express.
    fn mcmc_constraints(&self, p: &[f64]) -> bool {
        let _ = p;
        true
    }

    /// Deterministic clamp/repair applied once after LM convergence.
    fn fix_constraints_after_lm(&self, p: &mut [f64]) {
        let _ = p;
    }

    /// Custom log-prior contribution for one parameter. Only consulted when
    /// that parameter's prior is [`crate::domain::Prior::Custom`].
    fn custom_prior(&self, param: usize, p: &[f64], cfp: &[f64], fp: &[f64]) -> f64 {
        let _ = (param, p, cfp, fp);
        0.0
    }
}

/// Differentiation step for a parameter value: magnitude-scaled, clamped, and
/// carrying the parameter's sign (sign of zero treated as positive).
fn diff_step(v: f64) -> f64 {
    let magnitude = (STEP_FRACTION * v.abs()).clamp(MIN_STEP, MAX_STEP);
    if v < 0.0 { -magnitude } else { magnitude }
}

/// Evaluate the predicted signal for all measurements of one voxel.
///
/// `cfp` holds `nmeas` consecutive blocks of `cfp_stride` values.
pub fn predict_all<M: SignalModel>(
    model: &M,
    p: &[f64],
    cfp: &[f64],
    cfp_stride: usize,
    fp: &[f64],
    out: &mut [f64],
) {
    for (m, slot) in out.iter_mut().enumerate() {
        let block = cfp_block(cfp, cfp_stride, m);
        *slot = model.signal(p, block, fp);
    }
}

/// Sum of squared residuals of one voxel's measurements against the model.
///
/// Any non-finite prediction poisons the sum to `+inf`, which callers treat
/// as a rejected candidate rather than an error.
pub fn sum_squared_residuals<M: SignalModel>(
    model: &M,
    p: &[f64],
    meas: &[f64],
    cfp: &[f64],
    cfp_stride: usize,
    fp: &[f64],
) -> f64 {
    let mut ssr = 0.0;
    for (m, &obs) in meas.iter().enumerate() {
        let pred = model.signal(p, cfp_block(cfp, cfp_stride, m), fp);
        let r = obs - pred;
        ssr += r * r;
    }
    if ssr.is_finite() { ssr } else { f64::INFINITY }
}

/// The common-fixed-parameter slice for measurement `m`.
pub fn cfp_block(cfp: &[f64], cfp_stride: usize, m: usize) -> &[f64] {
    if cfp_stride == 0 {
        &[]
    } else {
        &cfp[m * cfp_stride..(m + 1) * cfp_stride]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::toy::ExpDecay;

    #[test]
    fn numerical_derivatives_match_analytic_exp_decay() {
        // f = exp(-p0 * x) * p1; df/dp0 = -x f, df/dp1 = exp(-p0 x).
        let model = ExpDecay;
        let p = [0.7, 1.9];
        let x = 1.3;
        let mut d = [0.0; 2];
        model.derivatives(&p, &[x], &[], &mut d);

        let f = (-p[0] * x).exp() * p[1];
        assert!((d[0] - (-x * f)).abs() < 1e-6);
        assert!((d[1] - (-p[0] * x).exp()).abs() < 1e-6);
    }

    #[test]
    fn ssr_is_zero_at_true_parameters() {
        let model = ExpDecay;
        let p = [1.0, 2.0];
        let xs = [0.1, 0.5, 1.0, 2.0];
        let cfp: Vec<f64> = xs.to_vec();
        let mut meas = vec![0.0; xs.len()];
        predict_all(&model, &p, &cfp, 1, &[], &mut meas);
        let ssr = sum_squared_residuals(&model, &p, &meas, &cfp, 1, &[]);
        assert!(ssr.abs() < 1e-24);
    }

    #[test]
    fn non_finite_prediction_poisons_ssr() {
        let model = ExpDecay;
        // Huge negative rate overflows exp().
        let p = [-1e9, 1.0];
        let meas = [1.0];
        let ssr = sum_squared_residuals(&model, &p, &meas, &[1.0], 1, &[]);
        assert!(ssr.is_infinite());
    }
}
