use anyhow::Context;
use mwaviscore::fits;
use mwaviscore::fitsio::images::{ImageDescription, ImageType};
use mwaviscore::fitsio::tables::{ColumnDataType, ColumnDescription};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for generating a small, internally consistent synthetic
/// observation (metafits plus gpubox files).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub obs_id: u64,
    pub num_antennas: usize,
    pub num_coarse_chans: usize,
    pub fine_per_coarse: usize,
    pub num_times: usize,
    pub int_time_s: f64,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            obs_id: 1_196_175_296,
            num_antennas: 4,
            num_coarse_chans: 2,
            fine_per_coarse: 8,
            num_times: 2,
            int_time_s: 2.0,
            seed: 0,
        }
    }
}

impl SyntheticConfig {
    fn num_baselines(&self) -> usize {
        self.num_antennas * (self.num_antennas + 1) / 2
    }

    fn coarse_bandwidth_mhz(&self) -> f64 {
        1.28
    }

    fn start_unix_s(&self) -> u64 {
        1_512_140_080
    }

    const DATETIME: &'static str = "20171201145440";
}

/// Writes a metafits plus one gpubox file per coarse channel into `dir`.
/// Returns the full input path list, metafits first.
pub fn write_synthetic_observation(
    dir: &Path,
    config: &SyntheticConfig,
) -> anyhow::Result<Vec<PathBuf>> {
    let mut paths = vec![write_metafits(dir, config).context("writing synthetic metafits")?];
    for gpubox_num in 1..=config.num_coarse_chans {
        paths.push(
            write_gpubox(dir, config, gpubox_num)
                .with_context(|| format!("writing synthetic gpubox {gpubox_num:02}"))?,
        );
    }
    Ok(paths)
}

fn write_metafits(dir: &Path, config: &SyntheticConfig) -> anyhow::Result<PathBuf> {
    let path = dir.join(format!("{}.metafits", config.obs_id));
    let num_inputs = 2 * config.num_antennas;
    let coarse_bw = config.coarse_bandwidth_mhz();
    let bandwidth_mhz = coarse_bw * config.num_coarse_chans as f64;
    let fine_chan_khz = coarse_bw * 1e3 / config.fine_per_coarse as f64;
    let channels = (131..131 + config.num_coarse_chans)
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(",");

    let mut file = fits::create(&path)?;
    let primary = file.hdu(0)?;
    primary.write_key(&mut file, "GPSTIME", config.obs_id as f64)?;
    primary.write_key(&mut file, "DATE-OBS", "2017-12-01T14:54:38")?;
    primary.write_key(&mut file, "INTTIME", config.int_time_s)?;
    primary.write_key(&mut file, "FINECHAN", fine_chan_khz)?;
    primary.write_key(&mut file, "BANDWDTH", bandwidth_mhz)?;
    primary.write_key(&mut file, "FREQCENT", 154.88)?;
    primary.write_key(
        &mut file,
        "NCHANS",
        (config.num_coarse_chans * config.fine_per_coarse) as i64,
    )?;
    primary.write_key(&mut file, "NINPUTS", num_inputs as i64)?;
    primary.write_key(&mut file, "RA", 50.67)?;
    primary.write_key(&mut file, "DEC", -37.2)?;
    primary.write_key(&mut file, "OBJECT", "synthetic")?;
    // The channel list overflows a single card once all 24 receiver
    // channels are in play.
    fits::write_long_string_key(&mut file, &path, "CHANNELS", &channels)?;

    // TILEDATA: two rows per antenna (X then Y), matching the legacy
    // metafits column set the reader cares about.
    let columns = [
        ("Input", ColumnDataType::Int, 1),
        ("Antenna", ColumnDataType::Int, 1),
        ("TileName", ColumnDataType::String, 8),
        ("Pol", ColumnDataType::String, 1),
        ("Length", ColumnDataType::String, 14),
        ("North", ColumnDataType::Float, 1),
        ("East", ColumnDataType::Float, 1),
        ("Height", ColumnDataType::Float, 1),
        ("Flag", ColumnDataType::Int, 1),
    ]
    .iter()
    .map(|&(name, typ, repeat)| {
        ColumnDescription::new(name)
            .with_type(typ)
            .that_repeats(repeat)
            .create()
    })
    .collect::<Result<Vec<_>, _>>()?;
    let table = file.create_table("TILEDATA", &columns)?;

    let inputs: Vec<i32> = (0..num_inputs as i32).collect();
    let antennas: Vec<i32> = inputs.iter().map(|i| i / 2).collect();
    let norths: Vec<f32> = antennas.iter().map(|&a| a as f32 * 5.0).collect();
    let easts: Vec<f32> = antennas.iter().map(|&a| a as f32 * 10.0).collect();
    table.write_col(&mut file, "Input", &inputs)?;
    table.write_col(&mut file, "Antenna", &antennas)?;
    table.write_col(&mut file, "North", &norths)?;
    table.write_col(&mut file, "East", &easts)?;
    table.write_col(&mut file, "Height", &vec![375.0f32; num_inputs])?;
    table.write_col(&mut file, "Flag", &vec![0i32; num_inputs])?;
    for input in 0..num_inputs {
        let antenna = input / 2;
        let pol = if input % 2 == 0 { "X" } else { "Y" };
        let name = format!("Tile{:03}", antenna + 11);
        let length = format!("EL_{:.2}", 90.0 + antenna as f64 * 3.0);
        fits::write_col_str(&mut file, &path, 3, input + 1, &name)?;
        fits::write_col_str(&mut file, &path, 4, input + 1, pol)?;
        fits::write_col_str(&mut file, &path, 5, input + 1, &length)?;
    }
    Ok(path)
}

fn write_gpubox(
    dir: &Path,
    config: &SyntheticConfig,
    gpubox_num: usize,
) -> anyhow::Result<PathBuf> {
    let path = dir.join(format!(
        "{}_{}_gpubox{:02}_00.fits",
        config.obs_id,
        SyntheticConfig::DATETIME,
        gpubox_num
    ));
    let num_baselines = config.num_baselines();
    let row_floats = 8 * num_baselines;

    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(gpubox_num as u64));
    let mut file = fits::create(&path)?;

    for time_idx in 0..config.num_times {
        let unix_s = config.start_unix_s() + (time_idx as f64 * config.int_time_s) as u64;
        let description = ImageDescription {
            data_type: ImageType::Float,
            dimensions: &[config.fine_per_coarse, row_floats],
        };
        let hdu = file.create_image("", &description)?;
        hdu.write_key(&mut file, "TIME", unix_s as i64)?;
        hdu.write_key(&mut file, "MILLITIM", 0i64)?;

        let mut data = Vec::with_capacity(config.fine_per_coarse * row_floats);
        for _fine in 0..config.fine_per_coarse {
            for bl in 0..num_baselines {
                let auto = is_auto(bl, config.num_antennas);
                for pol in 0..4 {
                    if auto && (pol == 0 || pol == 3) {
                        // Autocorrelation powers are real and positive.
                        data.push(rng.gen_range(50.0f32..100.0));
                        data.push(0.0f32);
                    } else {
                        data.push(rng.gen_range(-10.0f32..10.0));
                        data.push(rng.gen_range(-10.0f32..10.0));
                    }
                }
            }
        }
        hdu.write_image(&mut file, &data)?;
    }
    Ok(path)
}

/// Whether a baseline index in the ant1 <= ant2 upper triangle is an
/// autocorrelation.
fn is_auto(baseline_idx: usize, num_antennas: usize) -> bool {
    let mut idx = baseline_idx;
    for ant1 in 0..num_antennas {
        let row_len = num_antennas - ant1;
        if idx == 0 {
            return true;
        }
        if idx < row_len {
            return false;
        }
        idx -= row_len;
    }
    false
}
