use anyhow::Context;
use mwaviscore::{ReadOptions, WriteOptions};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

fn default_output() -> PathBuf {
    PathBuf::from("tutorial.uvfits")
}

fn default_true() -> bool {
    true
}

/// One conversion run: which files to read, where to write, and which
/// library options to pass on either side.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversionConfig {
    pub metafits: PathBuf,
    pub gpubox_files: Vec<PathBuf>,
    #[serde(default = "default_output")]
    pub output: PathBuf,
    #[serde(default)]
    pub correct_cable_len: bool,
    #[serde(default)]
    pub phase_to_pointing_center: bool,
    #[serde(default)]
    pub flag_init: bool,
    #[serde(default = "default_true")]
    pub spoof_nonessential: bool,
    #[serde(default = "default_true")]
    pub force_phase: bool,
}

impl ConversionConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading conversion config {}", path_ref.display()))?;
        let config: ConversionConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing conversion config {}", path_ref.display()))?;
        Ok(config)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn from_args(
        metafits: PathBuf,
        gpubox_files: Vec<PathBuf>,
        output: PathBuf,
        correct_cable_len: bool,
        phase_to_pointing_center: bool,
        flag_init: bool,
        spoof_nonessential: bool,
        force_phase: bool,
    ) -> Self {
        Self {
            metafits,
            gpubox_files,
            output,
            correct_cable_len,
            phase_to_pointing_center,
            flag_init,
            spoof_nonessential,
            force_phase,
        }
    }

    /// The combined path list handed to the read entry point, metafits
    /// first.
    pub fn input_paths(&self) -> Vec<PathBuf> {
        let mut paths = Vec::with_capacity(1 + self.gpubox_files.len());
        paths.push(self.metafits.clone());
        paths.extend(self.gpubox_files.iter().cloned());
        paths
    }

    pub fn to_read_options(&self) -> ReadOptions {
        ReadOptions {
            correct_cable_len: self.correct_cable_len,
            phase_to_pointing_center: self.phase_to_pointing_center,
            flag_init: self.flag_init,
            ..Default::default()
        }
    }

    pub fn to_write_options(&self) -> WriteOptions {
        WriteOptions {
            spoof_nonessential: self.spoof_nonessential,
            force_phase: self.force_phase,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn config_from_args_maps_onto_library_options() {
        let cfg = ConversionConfig::from_args(
            PathBuf::from("1196175296.metafits"),
            vec![PathBuf::from("1196175296_20171201145440_gpubox01_00.fits")],
            PathBuf::from("tutorial.uvfits"),
            false,
            false,
            false,
            true,
            true,
        );
        let read = cfg.to_read_options();
        assert!(!read.correct_cable_len);
        assert!(!read.phase_to_pointing_center);
        assert!(!read.flag_init);
        let write = cfg.to_write_options();
        assert!(write.spoof_nonessential);
        assert!(write.force_phase);
        assert_eq!(cfg.input_paths().len(), 2);
        assert!(cfg.input_paths()[0].to_string_lossy().ends_with(".metafits"));
    }

    #[test]
    fn config_load_reads_yaml_with_defaults() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(
            b"metafits: obs.metafits\ngpubox_files:\n  - obs_20171201145440_gpubox01_00.fits\n",
        )
        .unwrap();
        let path = temp.into_temp_path();
        let cfg = ConversionConfig::load(&path).unwrap();
        assert_eq!(cfg.output, PathBuf::from("tutorial.uvfits"));
        assert!(!cfg.flag_init);
        assert!(cfg.spoof_nonessential);
        assert!(cfg.force_phase);
    }
}
