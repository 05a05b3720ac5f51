use crate::workflow::config::ConversionConfig;
use anyhow::Context;
use log::info;
use mwaviscore::UvData;
use serde::Serialize;
use std::path::PathBuf;

/// Summary of one completed conversion.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionResult {
    pub output_path: PathBuf,
    pub bytes_written: u64,
    pub num_times: usize,
    pub num_baselines: usize,
    pub num_chans: usize,
    pub hdus_decoded: usize,
    pub samples_flagged: usize,
}

#[derive(Clone)]
pub struct Runner {
    config: ConversionConfig,
}

impl Runner {
    pub fn new(config: ConversionConfig) -> Self {
        Self { config }
    }

    /// Reads the correlator file set into a locally scoped dataset handle
    /// and writes it back out as uvfits.
    pub fn execute(&self) -> anyhow::Result<ConversionResult> {
        let inputs = self.config.input_paths();
        info!("converting {} input files", inputs.len());
        let mut dataset = UvData::new();
        dataset
            .read_mwa_corr_fits(&inputs, &self.config.to_read_options())
            .context("reading correlator file set")?;
        let bytes_written = dataset
            .write_uvfits(&self.config.output, &self.config.to_write_options())
            .context("writing uvfits output")?;
        info!(
            "wrote {bytes_written} bytes of uvfits to {}",
            self.config.output.display()
        );

        let metrics = dataset.metrics();
        Ok(ConversionResult {
            output_path: self.config.output.clone(),
            bytes_written,
            num_times: dataset.num_times(),
            num_baselines: dataset.num_baselines(),
            num_chans: dataset.num_chans(),
            hdus_decoded: metrics.hdus_decoded,
            samples_flagged: metrics.samples_flagged,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{write_synthetic_observation, SyntheticConfig};
    use std::path::Path;

    fn config_for(dir: &Path, synth: &SyntheticConfig) -> ConversionConfig {
        let paths = write_synthetic_observation(dir, synth).unwrap();
        ConversionConfig::from_args(
            paths[0].clone(),
            paths[1..].to_vec(),
            dir.join("tutorial.uvfits"),
            false,
            false,
            false,
            true,
            true,
        )
    }

    #[test]
    fn read_then_write_produces_a_nonempty_output() {
        let dir = tempfile::tempdir().unwrap();
        let synth = SyntheticConfig::default();
        let cfg = config_for(dir.path(), &synth);
        let runner = Runner::new(cfg.clone());

        let result = runner.execute().unwrap();
        assert_eq!(result.output_path, cfg.output);
        assert!(result.bytes_written > 0);
        assert_eq!(result.num_times, synth.num_times);
        assert_eq!(result.num_baselines, 10);
        assert_eq!(
            result.num_chans,
            synth.num_coarse_chans * synth.fine_per_coarse
        );
        assert_eq!(
            result.hdus_decoded,
            synth.num_coarse_chans * synth.num_times
        );
        assert_eq!(result.samples_flagged, 0);

        let written = std::fs::metadata(&cfg.output).unwrap();
        assert_eq!(written.len(), result.bytes_written);

        // The output parses back as a random-groups file with an AIPS AN
        // antenna table.
        let mut fptr = mwaviscore::fitsio::FitsFile::open(&cfg.output).unwrap();
        let vis_hdu = fptr.hdu(0).unwrap();
        let gcount: i64 = vis_hdu.read_key(&mut fptr, "GCOUNT").unwrap();
        assert_eq!(gcount as usize, result.num_times * result.num_baselines);
        let ant_hdu = fptr.hdu(1).unwrap();
        let extname: String = ant_hdu.read_key(&mut fptr, "EXTNAME").unwrap();
        assert_eq!(extname, "AIPS AN");
        let num_rows: i64 = ant_hdu.read_key(&mut fptr, "NAXIS2").unwrap();
        assert_eq!(num_rows, 4);
        assert!(fptr.hdu(2).is_err());
    }

    #[test]
    fn rerunning_overwrites_the_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_for(dir.path(), &SyntheticConfig::default());
        let runner = Runner::new(cfg.clone());

        let first = runner.execute().unwrap();
        let second = runner.execute().unwrap();
        assert_eq!(first.bytes_written, second.bytes_written);
        assert_eq!(
            std::fs::metadata(&cfg.output).unwrap().len(),
            second.bytes_written
        );
    }

    #[test]
    fn missing_input_fails_and_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config_for(dir.path(), &SyntheticConfig::default());
        cfg.gpubox_files
            .push(dir.path().join("1196175296_20171201145440_gpubox02_01.fits"));

        let err = Runner::new(cfg.clone()).execute().unwrap_err();
        assert!(err.to_string().contains("reading correlator file set"));
        assert!(!cfg.output.exists());
    }

    #[test]
    fn drift_data_is_refused_without_force_phase() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config_for(dir.path(), &SyntheticConfig::default());
        cfg.force_phase = false;

        let err = Runner::new(cfg.clone()).execute().unwrap_err();
        assert!(format!("{err:#}").contains("not phased"));
        assert!(!cfg.output.exists());
    }

    #[test]
    fn flag_init_reports_flagged_samples() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config_for(dir.path(), &SyntheticConfig::default());
        cfg.flag_init = true;

        let result = Runner::new(cfg).execute().unwrap();
        assert!(result.samples_flagged > 0);
    }
}
