//! Observation metadata parsed from an MWA metafits file.

use crate::fits;
use crate::prelude::{VisError, VisResult};
use std::path::Path;

/// Ratio of the speed of light in coax to free space; physical cable
/// lengths in the metafits are scaled by this to electrical lengths.
const COAX_V_FACTOR: f64 = 1.204;

/// One tile of the array, assembled from its X and Y RF input rows.
#[derive(Debug, Clone)]
pub struct Antenna {
    pub index: usize,
    pub tile_name: String,
    pub east_m: f64,
    pub north_m: f64,
    pub height_m: f64,
    pub cable_length_x_m: f64,
    pub cable_length_y_m: f64,
    pub flagged: bool,
}

/// Everything the read path needs from the metafits primary header and
/// the TILEDATA table.
#[derive(Debug, Clone)]
pub struct ObsMetadata {
    pub obs_id: u64,
    pub date_obs: String,
    pub int_time_s: f64,
    pub fine_chan_width_hz: f64,
    pub total_bandwidth_hz: f64,
    pub centre_freq_hz: f64,
    pub num_fine_chans: usize,
    pub receiver_channels: Vec<usize>,
    pub pointing_ra_deg: f64,
    pub pointing_dec_deg: f64,
    pub phase_ra_deg: Option<f64>,
    pub phase_dec_deg: Option<f64>,
    pub source_name: String,
    pub antennas: Vec<Antenna>,
}

impl ObsMetadata {
    pub fn num_antennas(&self) -> usize {
        self.antennas.len()
    }

    /// Baselines form the upper triangle including autocorrelations.
    pub fn num_baselines(&self) -> usize {
        let n = self.num_antennas();
        n * (n + 1) / 2
    }

    pub fn num_coarse_chans(&self) -> usize {
        self.receiver_channels.len()
    }

    pub fn fine_chans_per_coarse(&self) -> usize {
        self.num_fine_chans / self.num_coarse_chans()
    }

    pub fn coarse_bandwidth_hz(&self) -> f64 {
        self.total_bandwidth_hz / self.num_coarse_chans() as f64
    }

    fn band_start_hz(&self) -> f64 {
        self.centre_freq_hz - self.total_bandwidth_hz / 2.0
    }

    /// Centre frequency of one fine channel, indexed by coarse-channel
    /// position in the band (ascending sky frequency) and fine-channel
    /// position within it.
    pub fn fine_chan_freq_hz(&self, coarse_idx: usize, fine_idx: usize) -> f64 {
        self.band_start_hz()
            + coarse_idx as f64 * self.coarse_bandwidth_hz()
            + (fine_idx as f64 + 0.5) * self.fine_chan_width_hz
    }

    /// Sky-frequency band position of each gpubox file (index 0 is
    /// gpubox 1). Legacy gpubox numbers follow the receiver channels
    /// sorted ascending, except that receiver channels above 128 are
    /// delivered in descending sky-frequency order.
    pub fn coarse_chan_sky_indices(&self) -> Vec<usize> {
        let mut sorted = self.receiver_channels.clone();
        sorted.sort_unstable();
        let num_low = sorted.iter().filter(|&&c| c <= 128).count();
        let n = sorted.len();
        (0..n)
            .map(|g| if g < num_low { g } else { n - 1 - (g - num_low) })
            .collect()
    }

    /// The target used by phase-to-pointing-centre: the dedicated phase
    /// centre when the metafits carries one, the pointing centre otherwise.
    pub fn phase_target_deg(&self) -> (f64, f64) {
        match (self.phase_ra_deg, self.phase_dec_deg) {
            (Some(ra), Some(dec)) => (ra, dec),
            _ => (self.pointing_ra_deg, self.pointing_dec_deg),
        }
    }
}

/// Electrical length in metres from a TILEDATA `Length` value. Values
/// prefixed `EL_` are already electrical; bare values are physical.
pub(crate) fn parse_cable_length(raw: &str) -> VisResult<f64> {
    if let Some(rest) = raw.strip_prefix("EL_") {
        rest.trim()
            .parse::<f64>()
            .map_err(|_| VisError::MissingMetadata(format!("bad electrical length {raw}")))
    } else {
        raw.trim()
            .parse::<f64>()
            .map(|v| v * COAX_V_FACTOR)
            .map_err(|_| VisError::MissingMetadata(format!("bad cable length {raw}")))
    }
}

pub fn parse_metafits(path: &Path) -> VisResult<ObsMetadata> {
    let mut file = fits::open(path)?;
    let primary = fits::hdu(&mut file, path, 0)?;

    let num_inputs: usize = fits::key(&mut file, &primary, path, "NINPUTS")?;
    if num_inputs == 0 || num_inputs % 2 != 0 {
        return Err(VisError::fits(
            path,
            format!("NINPUTS = {num_inputs} is not an even tile-input count"),
        ));
    }

    // A full 24-channel list overflows a single card, so this key must
    // be read with long-string support.
    let receiver_channels = fits::long_string_key(&mut file, path, "CHANNELS")?
        .split(',')
        .map(|s| {
            s.trim()
                .parse::<usize>()
                .map_err(|_| VisError::fits(path, format!("bad CHANNELS entry {s}")))
        })
        .collect::<VisResult<Vec<_>>>()?;
    if receiver_channels.is_empty() {
        return Err(VisError::fits(path, "CHANNELS is empty"));
    }

    let num_fine_chans: usize = fits::key(&mut file, &primary, path, "NCHANS")?;
    if num_fine_chans == 0 {
        return Err(VisError::fits(path, "NCHANS = 0: no fine channels"));
    }
    if num_fine_chans % receiver_channels.len() != 0 {
        return Err(VisError::fits(
            path,
            format!(
                "NCHANS = {num_fine_chans} does not divide into {} coarse channels",
                receiver_channels.len()
            ),
        ));
    }

    let source_name = fits::opt_key::<String>(&mut file, &primary, path, "OBJECT")?
        .unwrap_or_else(|| "Undefined".to_string());

    let meta = ObsMetadata {
        obs_id: fits::key::<f64>(&mut file, &primary, path, "GPSTIME")? as u64,
        date_obs: fits::key(&mut file, &primary, path, "DATE-OBS")?,
        int_time_s: fits::key(&mut file, &primary, path, "INTTIME")?,
        fine_chan_width_hz: fits::key::<f64>(&mut file, &primary, path, "FINECHAN")? * 1e3,
        total_bandwidth_hz: fits::key::<f64>(&mut file, &primary, path, "BANDWDTH")? * 1e6,
        centre_freq_hz: fits::key::<f64>(&mut file, &primary, path, "FREQCENT")? * 1e6,
        num_fine_chans,
        receiver_channels,
        pointing_ra_deg: fits::key(&mut file, &primary, path, "RA")?,
        pointing_dec_deg: fits::key(&mut file, &primary, path, "DEC")?,
        phase_ra_deg: fits::opt_key(&mut file, &primary, path, "RAPHASE")?,
        phase_dec_deg: fits::opt_key(&mut file, &primary, path, "DECPHASE")?,
        source_name,
        antennas: parse_tiledata(&mut file, path, num_inputs)?,
    };
    Ok(meta)
}

fn parse_tiledata(
    file: &mut fitsio::FitsFile,
    path: &Path,
    num_inputs: usize,
) -> VisResult<Vec<Antenna>> {
    let table = fits::hdu(file, path, "TILEDATA")?;

    let antenna_col: Vec<i32> = read_col(file, &table, path, "Antenna")?;
    let name_col: Vec<String> = read_col(file, &table, path, "TileName")?;
    let pol_col: Vec<String> = read_col(file, &table, path, "Pol")?;
    let length_col: Vec<String> = read_col(file, &table, path, "Length")?;
    let north_col: Vec<f32> = read_col(file, &table, path, "North")?;
    let east_col: Vec<f32> = read_col(file, &table, path, "East")?;
    let height_col: Vec<f32> = read_col(file, &table, path, "Height")?;
    let flag_col: Vec<i32> = read_col(file, &table, path, "Flag")?;

    if antenna_col.len() != num_inputs {
        return Err(VisError::fits(
            path,
            format!(
                "TILEDATA has {} rows, NINPUTS says {num_inputs}",
                antenna_col.len()
            ),
        ));
    }

    let num_antennas = num_inputs / 2;
    let mut antennas: Vec<Option<Antenna>> = vec![None; num_antennas];
    for row in 0..num_inputs {
        let ant = antenna_col[row] as usize;
        if ant >= num_antennas {
            return Err(VisError::fits(
                path,
                format!("TILEDATA row {row} has out-of-range Antenna {ant}"),
            ));
        }
        let cable_m = parse_cable_length(length_col[row].trim())?;
        let entry = antennas[ant].get_or_insert_with(|| Antenna {
            index: ant,
            tile_name: name_col[row].trim().to_string(),
            east_m: east_col[row] as f64,
            north_m: north_col[row] as f64,
            height_m: height_col[row] as f64,
            cable_length_x_m: 0.0,
            cable_length_y_m: 0.0,
            flagged: false,
        });
        match pol_col[row].trim() {
            "X" => entry.cable_length_x_m = cable_m,
            "Y" => entry.cable_length_y_m = cable_m,
            other => {
                return Err(VisError::fits(
                    path,
                    format!("TILEDATA row {row} has unknown Pol {other}"),
                ))
            }
        }
        entry.flagged |= flag_col[row] != 0;
    }

    antennas
        .into_iter()
        .enumerate()
        .map(|(i, a)| {
            a.ok_or_else(|| VisError::fits(path, format!("no TILEDATA rows for antenna {i}")))
        })
        .collect()
}

fn read_col<T: fitsio::tables::ReadsCol>(
    file: &mut fitsio::FitsFile,
    table: &fitsio::hdu::FitsHdu,
    path: &Path,
    name: &str,
) -> VisResult<Vec<T>> {
    table
        .read_col(file, name)
        .map_err(|e| VisError::fits(path, format!("TILEDATA {name}: {e}")))
}
