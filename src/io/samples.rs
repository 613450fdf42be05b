//! Binary sample archives.
//!
//! One file per estimated parameter per dataset partition, with the fixed
//! layout the merge tool expects:
//!
//! ```text
//! i32  voxel count
//! i32  sample count
//! i64  payload byte length
//! ...  payload: little-endian f64, row-major samples x voxels
//! ```
//!
//! Sample `s` of voxel `v` sits at payload index `s * nvox + v`. The reader
//! validates the header and reports the offending file identity on mismatch.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::AppError;

/// Conventional archive file name for one parameter.
pub fn archive_file_name(param: usize) -> String {
    format!("Param_{param}_samples")
}

/// Conventional output directory for one dataset partition, where the merge
/// tool looks for the archives.
pub fn partition_dir(base: &Path, part: usize) -> PathBuf {
    base.join(format!("part_{part}"))
}

/// Write one archive per parameter from a `[voxel][sample][param]` buffer.
///
/// Returns the written paths in parameter order.
pub fn write_sample_archives(
    dir: &Path,
    samples: &[f64],
    nvox: usize,
    nsamples: usize,
    nparams: usize,
) -> Result<Vec<PathBuf>, AppError> {
    if samples.len() != nvox * nsamples * nparams {
        return Err(AppError::data(format!(
            "Sample buffer has {} values, expected {}.",
            samples.len(),
            nvox * nsamples * nparams
        )));
    }
    std::fs::create_dir_all(dir)
        .map_err(|e| AppError::io(format!("Failed to create '{}': {e}", dir.display())))?;

    let mut paths = Vec::with_capacity(nparams);
    for param in 0..nparams {
        let path = dir.join(archive_file_name(param));
        write_one_archive(&path, samples, nvox, nsamples, nparams, param)?;
        paths.push(path);
    }
    Ok(paths)
}

fn write_one_archive(
    path: &Path,
    samples: &[f64],
    nvox: usize,
    nsamples: usize,
    nparams: usize,
    param: usize,
) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::io(format!("Failed to create '{}': {e}", path.display())))?;
    let mut out = BufWriter::new(file);

    let nbytes = (nvox * nsamples * std::mem::size_of::<f64>()) as i64;
    let mut write = |bytes: &[u8]| {
        out.write_all(bytes)
            .map_err(|e| AppError::io(format!("Failed to write '{}': {e}", path.display())))
    };
    write(&(nvox as i32).to_le_bytes())?;
    write(&(nsamples as i32).to_le_bytes())?;
    write(&nbytes.to_le_bytes())?;

    // Payload is samples-major while the in-memory buffer is voxel-major.
    for s in 0..nsamples {
        for v in 0..nvox {
            let value = samples[(v * nsamples + s) * nparams + param];
            write(&value.to_le_bytes())?;
        }
    }
    Ok(())
}

/// Contents of one validated sample archive.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleArchive {
    pub nvox: usize,
    pub nsamples: usize,
    /// Payload in file order: samples-major, `values[s * nvox + v]`.
    pub values: Vec<f64>,
}

/// Read and validate one sample archive.
///
/// `expected_nsamples` comes from the run configuration; a mismatch means the
/// file was produced by a different run and is fatal.
pub fn read_sample_archive(path: &Path, expected_nsamples: usize) -> Result<SampleArchive, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::io(format!("Failed to open '{}': {e}", path.display())))?;
    let mut input = BufReader::new(file);

    let bad = |what: &str| {
        AppError::io(format!(
            "The amount of data in the intermediate output file '{}' is not correct: {what}.",
            path.display()
        ))
    };

    let mut i32_buf = [0u8; 4];
    let mut i64_buf = [0u8; 8];
    input
        .read_exact(&mut i32_buf)
        .map_err(|_| bad("missing voxel count"))?;
    let nvox = i32::from_le_bytes(i32_buf);
    input
        .read_exact(&mut i32_buf)
        .map_err(|_| bad("missing sample count"))?;
    let nsamples = i32::from_le_bytes(i32_buf);
    input
        .read_exact(&mut i64_buf)
        .map_err(|_| bad("missing byte length"))?;
    let nbytes = i64::from_le_bytes(i64_buf);

    if nvox <= 0 || nsamples <= 0 || nsamples as usize != expected_nsamples {
        return Err(bad("header counts out of range"));
    }
    let nvox = nvox as usize;
    let nsamples = nsamples as usize;
    if nbytes as usize != nvox * nsamples * std::mem::size_of::<f64>() {
        return Err(bad("byte length disagrees with header counts"));
    }

    let mut payload = vec![0u8; nbytes as usize];
    input
        .read_exact(&mut payload)
        .map_err(|_| bad("truncated payload"))?;

    let values = payload
        .chunks_exact(8)
        .map(|c| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(c);
            f64::from_le_bytes(bytes)
        })
        .collect();

    Ok(SampleArchive {
        nvox,
        nsamples,
        values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("voxfit_samples_{tag}_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn archives_round_trip() {
        let base = temp_dir("roundtrip");
        let dir = partition_dir(&base, 0);
        assert!(dir.ends_with("part_0"));
        let (nvox, nsamples, nparams) = (3, 2, 2);
        // samples[v][s][k] = 100*v + 10*s + k
        let mut samples = vec![0.0; nvox * nsamples * nparams];
        for v in 0..nvox {
            for s in 0..nsamples {
                for k in 0..nparams {
                    samples[(v * nsamples + s) * nparams + k] = (100 * v + 10 * s + k) as f64;
                }
            }
        }

        let paths = write_sample_archives(&dir, &samples, nvox, nsamples, nparams).unwrap();
        assert_eq!(paths.len(), nparams);

        let archive = read_sample_archive(&paths[1], nsamples).unwrap();
        assert_eq!(archive.nvox, nvox);
        assert_eq!(archive.nsamples, nsamples);
        // File order is samples-major: value(s=0, v=2, k=1) = 201.
        assert_eq!(archive.values[2], 201.0);
        assert_eq!(archive.values[nvox], 11.0);

        let _ = std::fs::remove_dir_all(&base);
    }

    #[test]
    fn reader_rejects_sample_count_mismatch() {
        let dir = temp_dir("mismatch");
        let samples = vec![1.0; 4];
        let paths = write_sample_archives(&dir, &samples, 2, 2, 1).unwrap();
        let err = read_sample_archive(&paths[0], 7).unwrap_err();
        assert_eq!(err.exit_code(), 4);
        assert!(format!("{err}").contains("Param_0_samples"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn reader_rejects_truncated_payload() {
        let dir = temp_dir("truncated");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(archive_file_name(0));
        let mut file = File::create(&path).unwrap();
        file.write_all(&2i32.to_le_bytes()).unwrap();
        file.write_all(&1i32.to_le_bytes()).unwrap();
        file.write_all(&16i64.to_le_bytes()).unwrap();
        file.write_all(&[0u8; 8]).unwrap(); // only half the payload
        drop(file);

        let err = read_sample_archive(&path, 1).unwrap_err();
        assert!(format!("{err}").contains("truncated"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
