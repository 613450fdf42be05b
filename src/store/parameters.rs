//! Parameter and sample buffers, plus the partition load/write-back cycle.
//!
//! The store owns:
//!
//! - the full-dataset measurement matrix, per-voxel fixed parameters, and the
//!   single common-fixed-parameter block (loaded once, shared read-only)
//! - the full-dataset estimate and sample arrays that collaborators consume
//! - one set of padded working buffers, reused for every partition
//!
//! Solvers operate on an [`ActivePartition`] view over the working buffers;
//! write-back copies only the real (non-padding) voxels into the full arrays.

use std::path::{Path, PathBuf};

use crate::domain::RunConfig;
use crate::error::AppError;
use crate::io::samples::{partition_dir, write_sample_archives};
use crate::model::ModelDescriptor;
use crate::store::partition::PartitionLayout;

/// Borrowed view of the partition currently loaded into the working buffers.
///
/// `nvox` is the real voxel count; lanes `nvox..nvox_padded` are inert
/// placeholders that solvers compute but the store never writes back.
pub struct ActivePartition<'a> {
    pub nvox: usize,
    pub nvox_padded: usize,
    pub nmeas: usize,
    pub nparams: usize,
    pub nsamples: usize,
    pub fp_stride: usize,
    pub cfp_stride: usize,
    pub meas: &'a [f64],
    pub fp: &'a [f64],
    pub cfp: &'a [f64],
    pub params: &'a mut [f64],
    pub samples: &'a mut [f64],
}

/// Owns every buffer of the fitting run and the partition bookkeeping.
#[derive(Debug)]
pub struct ParameterStore {
    nparams: usize,
    nmeas: usize,
    nsamples: usize,
    fp_tsize: usize,
    cfp_tsize: usize,
    /// Which dataset part this process handles; names the output directory.
    part_id: usize,
    layout: PartitionLayout,

    measurements: Vec<f64>,
    fp: Vec<f64>,
    cfp: Vec<f64>,

    /// Point estimates for the whole dataset, voxel-major.
    estimates: Vec<f64>,
    /// Recorded samples for the whole dataset, `[voxel][sample][param]`.
    samples: Vec<f64>,

    // Working buffers for the active partition (padded lane count).
    part_meas: Vec<f64>,
    part_fp: Vec<f64>,
    part_params: Vec<f64>,
    part_samples: Vec<f64>,

    active: Option<usize>,
}

impl ParameterStore {
    /// Build the store from plain numeric buffers.
    ///
    /// `measurements` is voxel-major (`nvox * nmeas`), `fp` voxel-major
    /// (`nvox * fp_tsize`), `cfp` measurement-major (`nmeas * cfp_tsize`).
    /// `init_params` optionally seeds per-voxel initial estimates
    /// (`nvox * nparams`, e.g. from initialization volumes); otherwise the
    /// descriptor's default init vector is broadcast to every voxel.
    pub fn new(
        descriptor: &ModelDescriptor,
        config: &RunConfig,
        layout: PartitionLayout,
        measurements: Vec<f64>,
        nmeas: usize,
        fp: Vec<f64>,
        cfp: Vec<f64>,
        init_params: Option<Vec<f64>>,
    ) -> Result<Self, AppError> {
        let nvox = layout.nvox();
        let nparams = descriptor.nparams();
        if nmeas == 0 {
            return Err(AppError::data("Dataset has no measurements."));
        }
        if measurements.len() != nvox * nmeas {
            return Err(AppError::data(format!(
                "Measurement buffer has {} values, expected {} ({} voxels x {} measurements).",
                measurements.len(),
                nvox * nmeas,
                nvox,
                nmeas
            )));
        }
        if fp.len() != nvox * descriptor.fp_tsize() {
            return Err(AppError::data(format!(
                "Fixed-parameter buffer has {} values, expected {}.",
                fp.len(),
                nvox * descriptor.fp_tsize()
            )));
        }
        if cfp.len() != nmeas * descriptor.cfp_tsize() {
            return Err(AppError::data(format!(
                "Common-fixed-parameter buffer has {} values, expected {}.",
                cfp.len(),
                nmeas * descriptor.cfp_tsize()
            )));
        }
        let nsamples = config.nsamples();
        if nsamples == 0 {
            return Err(AppError::config(
                "njumps / sampleevery must yield at least one sample.",
            ));
        }
        if config.part_id >= config.nparts {
            return Err(AppError::config(format!(
                "Dataset part id {} out of range ({} parts).",
                config.part_id, config.nparts
            )));
        }

        let estimates = match init_params {
            Some(buf) => {
                if buf.len() != nvox * nparams {
                    return Err(AppError::data(format!(
                        "Initialization buffer has {} values, expected {}.",
                        buf.len(),
                        nvox * nparams
                    )));
                }
                buf
            }
            None => {
                let mut buf = vec![0.0; nvox * nparams];
                for chunk in buf.chunks_mut(nparams) {
                    chunk.copy_from_slice(descriptor.init());
                }
                buf
            }
        };

        let cap = layout.max_padded_size();
        Ok(Self {
            nparams,
            nmeas,
            nsamples,
            fp_tsize: descriptor.fp_tsize(),
            cfp_tsize: descriptor.cfp_tsize(),
            part_id: config.part_id,
            layout,
            measurements,
            fp,
            cfp,
            estimates,
            samples: vec![0.0; nvox * nsamples * nparams],
            part_meas: vec![0.0; cap * nmeas],
            part_fp: vec![0.0; cap * descriptor.fp_tsize()],
            part_params: vec![0.0; cap * nparams],
            part_samples: vec![0.0; cap * nsamples * nparams],
            active: None,
        })
    }

    pub fn layout(&self) -> &PartitionLayout {
        &self.layout
    }

    pub fn nsamples(&self) -> usize {
        self.nsamples
    }

    /// Full-dataset point estimates, voxel-major.
    pub fn estimates(&self) -> &[f64] {
        &self.estimates
    }

    /// Full-dataset samples, `[voxel][sample][param]`.
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Copy one partition's voxels into the working buffers. Padding lanes
    /// are zeroed; they take part in computation but never in write-back.
    pub fn load_partition(&mut self, part: usize) -> Result<(), AppError> {
        if part >= self.layout.npartitions() {
            return Err(AppError::data(format!(
                "Partition {part} out of range ({} partitions).",
                self.layout.npartitions()
            )));
        }
        let nvox = self.layout.partition_size(part);
        let padded = self.layout.padded_size(part);
        let offset = self.layout.offset(part);

        copy_rows(&self.measurements, &mut self.part_meas, offset, nvox, padded, self.nmeas);
        copy_rows(&self.fp, &mut self.part_fp, offset, nvox, padded, self.fp_tsize);
        copy_rows(&self.estimates, &mut self.part_params, offset, nvox, padded, self.nparams);
        self.part_samples[..padded * self.nsamples * self.nparams].fill(0.0);

        self.active = Some(part);
        Ok(())
    }

    /// Borrow the loaded partition for solver work.
    pub fn active_partition(&mut self) -> Result<ActivePartition<'_>, AppError> {
        let part = self.require_active()?;
        let nvox = self.layout.partition_size(part);
        let padded = self.layout.padded_size(part);
        Ok(ActivePartition {
            nvox,
            nvox_padded: padded,
            nmeas: self.nmeas,
            nparams: self.nparams,
            nsamples: self.nsamples,
            fp_stride: self.fp_tsize,
            cfp_stride: self.cfp_tsize,
            meas: &self.part_meas[..padded * self.nmeas],
            fp: &self.part_fp[..padded * self.fp_tsize],
            cfp: &self.cfp,
            params: &mut self.part_params[..padded * self.nparams],
            samples: &mut self.part_samples[..padded * self.nsamples * self.nparams],
        })
    }

    /// Copy the active partition's estimates back to their full-dataset
    /// positions (real voxels only).
    pub fn copy_params_back(&mut self) -> Result<(), AppError> {
        let part = self.require_active()?;
        let nvox = self.layout.partition_size(part);
        let offset = self.layout.offset(part);
        let width = self.nparams;
        self.estimates[offset * width..(offset + nvox) * width]
            .copy_from_slice(&self.part_params[..nvox * width]);
        Ok(())
    }

    /// Copy the active partition's samples back to their full-dataset
    /// positions (real voxels only).
    pub fn copy_samples_back(&mut self) -> Result<(), AppError> {
        let part = self.require_active()?;
        let nvox = self.layout.partition_size(part);
        let offset = self.layout.offset(part);
        let width = self.nsamples * self.nparams;
        self.samples[offset * width..(offset + nvox) * width]
            .copy_from_slice(&self.part_samples[..nvox * width]);
        Ok(())
    }

    /// Copy every voxel's point estimate into its single sample slot. Used
    /// when MCMC is skipped, so downstream consumers always read samples.
    pub fn copy_params_to_samples(&mut self) -> Result<(), AppError> {
        if self.nsamples != 1 {
            return Err(AppError::config(format!(
                "Point estimates map to a single sample slot, but nsamples = {}.",
                self.nsamples
            )));
        }
        self.samples.copy_from_slice(&self.estimates);
        Ok(())
    }

    /// Write one binary sample archive per estimated parameter into this
    /// dataset part's conventional directory under `base`
    /// (`<base>/part_<id>/Param_<k>_samples`).
    pub fn write_samples(&self, base: &Path) -> Result<Vec<PathBuf>, AppError> {
        write_sample_archives(
            &partition_dir(base, self.part_id),
            &self.samples,
            self.layout.nvox(),
            self.nsamples,
            self.nparams,
        )
    }

    fn require_active(&self) -> Result<usize, AppError> {
        self.active
            .ok_or_else(|| AppError::data("No partition loaded."))
    }
}

/// Copy `nvox` rows of `width` values starting at row `offset` into the
/// working buffer, zeroing the padding rows behind them.
fn copy_rows(
    full: &[f64],
    work: &mut [f64],
    offset: usize,
    nvox: usize,
    padded: usize,
    width: usize,
) {
    work[..nvox * width].copy_from_slice(&full[offset * width..(offset + nvox) * width]);
    work[nvox * width..padded * width].fill(0.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ModelSpec, RunConfig};
    use crate::model::{ExpDecay, ModelDescriptor};

    fn descriptor() -> ModelDescriptor {
        let spec = ModelSpec {
            nparams: 2,
            init: Some(vec![0.5, 1.5]),
            fp_sizes: vec![],
            cfp_sizes: vec![1],
            bounds: vec![],
            priors: vec![],
            frozen: vec![],
            grid: None,
        };
        ModelDescriptor::from_spec(&spec, &ExpDecay).unwrap()
    }

    fn store(nvox: usize, size_part: usize) -> ParameterStore {
        let d = descriptor();
        let config = RunConfig::default();
        let nmeas = 3;
        let measurements: Vec<f64> = (0..nvox * nmeas).map(|i| i as f64).collect();
        let cfp = vec![0.1, 0.2, 0.3];
        let layout = PartitionLayout::with_size_part(nvox, size_part).unwrap();
        ParameterStore::new(&d, &config, layout, measurements, nmeas, vec![], cfp, None).unwrap()
    }

    #[test]
    fn rejects_mismatched_measurement_buffer() {
        let d = descriptor();
        let config = RunConfig::default();
        let layout = PartitionLayout::new(10).unwrap();
        let err = ParameterStore::new(&d, &config, layout, vec![0.0; 7], 3, vec![], vec![0.0; 3], None)
            .unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn estimates_seeded_from_descriptor_init() {
        let s = store(5, 4);
        assert_eq!(&s.estimates()[..2], &[0.5, 1.5]);
        assert_eq!(&s.estimates()[8..10], &[0.5, 1.5]);
    }

    #[test]
    fn load_and_write_back_round_trips_real_voxels_only() {
        let mut s = store(5, 4);
        // Second partition holds one real voxel padded to the lane width.
        s.load_partition(1).unwrap();
        {
            let ap = s.active_partition().unwrap();
            assert_eq!(ap.nvox, 1);
            assert_eq!(ap.nvox_padded, crate::store::VOXELS_BLOCK);
            // Scribble over every lane, padding included.
            for v in ap.params.iter_mut() {
                *v = 9.0;
            }
        }
        s.copy_params_back().unwrap();
        // Real voxel 4 updated, earlier voxels untouched.
        assert_eq!(&s.estimates()[8..10], &[9.0, 9.0]);
        assert_eq!(&s.estimates()[6..8], &[0.5, 1.5]);
        // Padding lanes were computed but never written anywhere.
        assert_eq!(s.estimates().len(), 5 * 2);
    }

    #[test]
    fn params_copy_into_single_sample_slot() {
        let mut s = store(3, 4);
        s.load_partition(0).unwrap();
        {
            let ap = s.active_partition().unwrap();
            for (i, v) in ap.params.iter_mut().enumerate() {
                *v = i as f64;
            }
        }
        s.copy_params_back().unwrap();
        s.copy_params_to_samples().unwrap();
        assert_eq!(s.samples(), s.estimates());
    }

    #[test]
    fn samples_land_in_the_configured_part_directory() {
        let d = descriptor();
        let config = RunConfig {
            part_id: 3,
            nparts: 4,
            ..RunConfig::default()
        };
        let layout = PartitionLayout::with_size_part(2, 4).unwrap();
        let s = ParameterStore::new(
            &d,
            &config,
            layout,
            (0..6).map(|i| i as f64).collect(),
            3,
            vec![],
            vec![0.1, 0.2, 0.3],
            None,
        )
        .unwrap();

        let base = std::env::temp_dir().join(format!("voxfit_store_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&base);
        let paths = s.write_samples(&base).unwrap();
        assert_eq!(paths.len(), 2);
        for path in &paths {
            assert!(path.starts_with(base.join("part_3")), "{}", path.display());
        }
        let _ = std::fs::remove_dir_all(&base);
    }

    #[test]
    fn part_id_outside_nparts_is_a_config_error() {
        let d = descriptor();
        let config = RunConfig {
            part_id: 2,
            nparts: 2,
            ..RunConfig::default()
        };
        let layout = PartitionLayout::new(4).unwrap();
        let err =
            ParameterStore::new(&d, &config, layout, vec![0.0; 12], 3, vec![], vec![0.0; 3], None)
                .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn meas_rows_follow_partition_offset() {
        let mut s = store(5, 4);
        s.load_partition(1).unwrap();
        let ap = s.active_partition().unwrap();
        // Voxel 4's measurements are 12, 13, 14 in the synthetic ramp.
        assert_eq!(&ap.meas[..3], &[12.0, 13.0, 14.0]);
        // Padding rows are zeroed.
        assert_eq!(&ap.meas[3..6], &[0.0, 0.0, 0.0]);
    }
}
