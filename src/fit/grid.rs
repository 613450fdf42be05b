//! Exhaustive grid-search initialization.
//!
//! For a designer-configured subset of parameters, every combination of the
//! candidate value lists is evaluated per voxel and the minimal-SSR
//! combination becomes the Levenberg-Marquardt starting point. Non-grid
//! parameters keep their current initialization value.
//!
//! Why grid search?
//! - it avoids the local minima a gradient refinement can fall into when the
//!   default initialization is far from the truth
//! - it is deterministic given the same candidate lists
//! - the combination count is bounded at descriptor build time, so the
//!   O(combinations x measurements) cost per voxel stays predictable

use rayon::prelude::*;

use crate::domain::GridSpec;
use crate::model::capability::{SignalModel, sum_squared_residuals};
use crate::model::descriptor::ModelDescriptor;
use crate::store::parameters::ActivePartition;

/// Number of combinations a grid spec enumerates.
pub fn combination_count(grid: &GridSpec) -> usize {
    grid.values.iter().map(|v| v.len()).product()
}

/// Write combination `index` into the grid parameters of `p`
/// (first listed parameter varies fastest).
pub fn set_combination(grid: &GridSpec, index: usize, p: &mut [f64]) {
    let mut rest = index;
    for (k, &idx) in grid.params.iter().enumerate() {
        let list = &grid.values[k];
        p[idx] = list[rest % list.len()];
        rest /= list.len();
    }
}

/// Optional coarse initializer producing LM starting points.
pub struct GridSearch<'a, M: SignalModel> {
    model: &'a M,
    descriptor: &'a ModelDescriptor,
}

impl<'a, M: SignalModel> GridSearch<'a, M> {
    pub fn new(model: &'a M, descriptor: &'a ModelDescriptor) -> Self {
        Self { model, descriptor }
    }

    /// Seed every voxel lane of the partition with its best grid combination.
    /// No-op when the descriptor has no grid spec.
    pub fn run(&self, part: &mut ActivePartition<'_>) {
        let Some(grid) = self.descriptor.grid() else {
            return;
        };
        let ncombos = combination_count(grid);
        let nparams = part.nparams;
        let nmeas = part.nmeas;
        let fp_stride = part.fp_stride;
        let cfp_stride = part.cfp_stride;
        let meas = part.meas;
        let fp = part.fp;
        let cfp = part.cfp;

        part.params
            .par_chunks_mut(nparams)
            .enumerate()
            .for_each(|(v, p)| {
                let meas_row = &meas[v * nmeas..(v + 1) * nmeas];
                let fp_row = &fp[v * fp_stride..(v + 1) * fp_stride];

                let mut candidate = p.to_vec();
                let mut best_ssr = f64::INFINITY;
                let mut best_index = 0usize;
                for c in 0..ncombos {
                    set_combination(grid, c, &mut candidate);
                    let ssr = sum_squared_residuals(
                        self.model, &candidate, meas_row, cfp, cfp_stride, fp_row,
                    );
                    // Strict < keeps the lowest combination index on ties.
                    if ssr < best_ssr {
                        best_ssr = ssr;
                        best_index = c;
                    }
                }
                if best_ssr.is_finite() {
                    set_combination(grid, best_index, p);
                }
            });
    }
}
