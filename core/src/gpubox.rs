//! Correlator block ("gpubox") file handling: filename classification,
//! HDU decoding and the (timestep, coarse channel) visibility map.

use crate::fits;
use crate::prelude::{VisError, VisResult};
use crate::telemetry::MetricsRecorder;
use log::warn;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Floats per fine channel: four polarization pairs, real and imaginary.
pub const FLOATS_PER_FINE_CHAN: usize = 8;

/// A parsed gpubox filename: `{obsid}_{datetime}_gpubox{NN}_{BB}.fits`.
#[derive(Debug, Clone)]
pub struct GpuboxFile {
    pub path: PathBuf,
    pub obs_id: u64,
    pub gpubox_num: usize,
    pub batch: usize,
}

pub fn parse_gpubox_filename(path: &Path) -> VisResult<GpuboxFile> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| VisError::InvalidInputSet(format!("unreadable path {}", path.display())))?;
    let stem = name.strip_suffix(".fits").ok_or_else(|| {
        VisError::InvalidInputSet(format!("{name} does not end in .fits"))
    })?;

    let parts: Vec<&str> = stem.split('_').collect();
    if parts.len() != 4 || !parts[2].starts_with("gpubox") {
        return Err(VisError::InvalidInputSet(format!(
            "{name} is not an obsid_datetime_gpuboxNN_BB.fits filename"
        )));
    }
    let obs_id = parts[0]
        .parse::<u64>()
        .map_err(|_| VisError::InvalidInputSet(format!("{name} has a non-numeric obsid")))?;
    let gpubox_num = parts[2]["gpubox".len()..]
        .parse::<usize>()
        .map_err(|_| VisError::InvalidInputSet(format!("{name} has a bad gpubox number")))?;
    let batch = parts[3]
        .parse::<usize>()
        .map_err(|_| VisError::InvalidInputSet(format!("{name} has a bad batch number")))?;
    if gpubox_num == 0 {
        return Err(VisError::InvalidInputSet(format!(
            "{name}: gpubox numbers are 1-based"
        )));
    }
    Ok(GpuboxFile {
        path: path.to_path_buf(),
        obs_id,
        gpubox_num,
        batch,
    })
}

/// Splits a mixed path list into exactly one metafits plus one or more
/// gpubox files. Anything else is refused.
pub fn classify_inputs(paths: &[PathBuf]) -> VisResult<(PathBuf, Vec<GpuboxFile>)> {
    let mut metafits = Vec::new();
    let mut gpuboxes = Vec::new();
    for path in paths {
        let name = path.to_string_lossy();
        if name.ends_with(".metafits") {
            metafits.push(path.clone());
        } else if name.contains("gpubox") {
            gpuboxes.push(parse_gpubox_filename(path)?);
        } else {
            return Err(VisError::InvalidInputSet(format!(
                "{} is neither a metafits nor a gpubox file",
                path.display()
            )));
        }
    }
    let metafits = match metafits.len() {
        0 => return Err(VisError::InvalidInputSet("no metafits file supplied".into())),
        1 => metafits.remove(0),
        n => {
            return Err(VisError::InvalidInputSet(format!(
                "{n} metafits files supplied, expected exactly one"
            )))
        }
    };
    if gpuboxes.is_empty() {
        return Err(VisError::InvalidInputSet("no gpubox files supplied".into()));
    }
    Ok((metafits, gpuboxes))
}

/// All decoded visibility buffers, keyed by gpubox number and then by
/// integration timestamp in milliseconds since the unix epoch.
pub struct GpuboxSet {
    pub channels: BTreeMap<usize, BTreeMap<u64, Vec<f32>>>,
    pub times_ms: Vec<u64>,
}

/// Loads every provided gpubox file. Each image HDU must hold
/// `fine_chans_per_coarse` rows of `FLOATS_PER_FINE_CHAN * num_baselines`
/// floats, with `TIME`/`MILLITIM` in its header.
pub fn load_gpubox_files(
    files: &[GpuboxFile],
    expected_floats: usize,
    metrics: &MetricsRecorder,
) -> VisResult<GpuboxSet> {
    let mut channels: BTreeMap<usize, BTreeMap<u64, Vec<f32>>> = BTreeMap::new();

    for file in files {
        let mut fptr = fits::open(&file.path)?;
        let slot = channels.entry(file.gpubox_num).or_default();
        // Data HDUs follow the primary; cfitsio errors out past the end.
        for hdu_idx in 1.. {
            let hdu = match fptr.hdu(hdu_idx) {
                Ok(hdu) => hdu,
                Err(_) => break,
            };
            let time_s: u64 = fits::key(&mut fptr, &hdu, &file.path, "TIME")?;
            let milli: u64 = fits::key(&mut fptr, &hdu, &file.path, "MILLITIM")?;
            let time_ms = time_s * 1000 + milli;
            let buffer: Vec<f32> = hdu
                .read_image(&mut fptr)
                .map_err(|e| VisError::fits(&file.path, format!("HDU {hdu_idx}: {e}")))?;
            if buffer.len() != expected_floats {
                return Err(VisError::fits(
                    &file.path,
                    format!(
                        "HDU at {time_ms} ms holds {} floats, expected {expected_floats}",
                        buffer.len()
                    ),
                ));
            }
            if slot.insert(time_ms, buffer).is_some() {
                warn!(
                    "duplicate integration at {time_ms} ms in {}; keeping the later batch",
                    file.path.display()
                );
            }
            metrics.record_hdu();
        }
    }

    let mut times_ms: Vec<u64> = channels
        .values()
        .flat_map(|m| m.keys().copied())
        .collect();
    times_ms.sort_unstable();
    times_ms.dedup();
    if times_ms.is_empty() {
        return Err(VisError::InvalidInputSet(
            "gpubox files contain no integrations".into(),
        ));
    }
    Ok(GpuboxSet { channels, times_ms })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filenames_parse_into_parts() {
        let f = parse_gpubox_filename(Path::new(
            "/data/1196175296_20171201145440_gpubox02_00.fits",
        ))
        .unwrap();
        assert_eq!(f.obs_id, 1_196_175_296);
        assert_eq!(f.gpubox_num, 2);
        assert_eq!(f.batch, 0);
    }

    #[test]
    fn bad_filenames_are_refused() {
        assert!(parse_gpubox_filename(Path::new("vis_gpubox01_00.fits")).is_err());
        assert!(parse_gpubox_filename(Path::new("a_b_gpubox00_00.fits")).is_err());
        assert!(parse_gpubox_filename(Path::new("1196175296_x_gpubox01_00.dat")).is_err());
    }

    #[test]
    fn classification_requires_one_metafits() {
        let gpubox = PathBuf::from("1196175296_20171201145440_gpubox01_00.fits");
        let metafits = PathBuf::from("1196175296.metafits");

        let err = classify_inputs(&[gpubox.clone()]).unwrap_err();
        assert!(err.to_string().contains("no metafits"));

        let err = classify_inputs(&[metafits.clone(), metafits.clone()]).unwrap_err();
        assert!(err.to_string().contains("expected exactly one"));

        let err = classify_inputs(&[metafits.clone(), PathBuf::from("notes.txt")]).unwrap_err();
        assert!(err.to_string().contains("neither"));

        let (m, g) = classify_inputs(&[metafits, gpubox]).unwrap();
        assert!(m.to_string_lossy().ends_with(".metafits"));
        assert_eq!(g.len(), 1);
    }
}
