use anyhow::{bail, Context};
use clap::Parser;
use generator::SyntheticConfig;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use workflow::config::ConversionConfig;
use workflow::runner::Runner;

mod generator;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "MWA correlator to uvfits conversion driver")]
struct Args {
    /// Load a conversion config from YAML instead of assembling one from
    /// the arguments below
    #[arg(long)]
    workflow: Option<PathBuf>,
    /// Path to the observation metafits file
    #[arg(long)]
    metafits: Option<PathBuf>,
    /// Paths to the observation's gpubox files
    #[arg(value_name = "GPUBOX FILE")]
    files: Vec<PathBuf>,
    /// Output uvfits path (overwritten if present)
    #[arg(long, default_value = "tutorial.uvfits")]
    output: PathBuf,
    /// Apply the cable length correction while reading
    #[arg(long, default_value_t = false)]
    correct_cable_len: bool,
    /// Phase the data to the pointing centre while reading
    #[arg(long, default_value_t = false)]
    phase_to_pointing_center: bool,
    /// Apply MWA initial flagging while reading
    #[arg(long, default_value_t = false)]
    flag_init: bool,
    /// Spoof non-essential uvfits metadata while writing
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    spoof_nonessential: bool,
    /// Phase drift data to the first-timestep zenith while writing
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    force_phase: bool,
    /// Generate a synthetic observation in a temp directory and convert
    /// that instead of reading real files (smoke-test mode)
    #[arg(long, default_value_t = false)]
    synthetic: bool,
    /// Append a JSON summary of the run to this file
    #[arg(long)]
    report: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    // Kept alive until the run finishes so synthetic inputs survive.
    let mut synthetic_dir = None;

    let config = if let Some(path) = args.workflow {
        ConversionConfig::load(path)?
    } else if args.synthetic {
        let dir = tempfile::tempdir().context("creating synthetic observation directory")?;
        let paths = generator::write_synthetic_observation(dir.path(), &SyntheticConfig::default())
            .context("generating synthetic observation")?;
        synthetic_dir = Some(dir);
        ConversionConfig::from_args(
            paths[0].clone(),
            paths[1..].to_vec(),
            args.output,
            args.correct_cable_len,
            args.phase_to_pointing_center,
            args.flag_init,
            args.spoof_nonessential,
            args.force_phase,
        )
    } else {
        let metafits = match args.metafits {
            Some(path) => path,
            None => bail!("--metafits is required unless --workflow or --synthetic is used"),
        };
        ConversionConfig::from_args(
            metafits,
            args.files,
            args.output,
            args.correct_cable_len,
            args.phase_to_pointing_center,
            args.flag_init,
            args.spoof_nonessential,
            args.force_phase,
        )
    };

    let runner = Runner::new(config);
    let result = runner.execute()?;

    println!(
        "Conversion -> {} ({} bytes): {} timesteps x {} baselines x {} channels, {} HDUs decoded, {} samples flagged",
        result.output_path.display(),
        result.bytes_written,
        result.num_times,
        result.num_baselines,
        result.num_chans,
        result.hdus_decoded,
        result.samples_flagged
    );

    if let Some(report_path) = args.report {
        let line = serde_json::to_string(&result).context("serializing run summary")?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&report_path)
            .with_context(|| format!("opening report file {}", report_path.display()))?;
        writeln!(file, "{line}")?;
    }

    drop(synthetic_dir);
    Ok(())
}
