//! A minimal example model: exponential decay.
//!
//! `f(P) = exp(-P0 * X) * P1`, with one common fixed parameter `X` per
//! measurement (e.g. an acquisition time or b-value). Shipped mainly for
//! tests and as a template for model designers; real models live outside the
//! engine.

use crate::model::capability::SignalModel;

/// Two-parameter exponential decay, `P0` = rate, `P1` = amplitude.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpDecay;

impl SignalModel for ExpDecay {
    fn nparams(&self) -> usize {
        2
    }

    fn signal(&self, p: &[f64], cfp: &[f64], _fp: &[f64]) -> f64 {
        (-p[0] * cfp[0]).exp() * p[1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_decays_with_x() {
        let model = ExpDecay;
        let p = [1.0, 2.0];
        let near = model.signal(&p, &[0.1], &[]);
        let far = model.signal(&p, &[5.0], &[]);
        assert!(near > far);
        assert!((model.signal(&p, &[0.0], &[]) - 2.0).abs() < 1e-15);
    }
}
