//! The in-memory visibility dataset handle.
//!
//! A [`UvData`] starts empty, is populated once by
//! [`UvData::read_mwa_corr_fits`], and is serialized by
//! [`UvData::write_uvfits`]. The visibility cube is indexed
//! `[baseline-time, channel, polarization]` with times varying slowest
//! and polarizations ordered XX, XY, YX, YY.

use crate::corrections::{self, FlagLayout};
use crate::geometry::{self, Uvw, XyzGeodetic, MWA_LAT_RAD};
use crate::gpubox::{self, FLOATS_PER_FINE_CHAN};
use crate::metafits::{self, ObsMetadata};
use crate::prelude::{ReadOptions, VisError, VisResult, WriteOptions};
use crate::telemetry::{LogManager, MetricsRecorder, MetricsSnapshot};
use crate::uvfits::{self, SpoofValues};
use ndarray::Array3;
use num_complex::Complex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Whether the visibilities have been rotated to a fixed sky position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PhaseState {
    Drift,
    Phased { ra_rad: f64, dec_rad: f64 },
}

pub struct UvData {
    pub(crate) meta: Option<ObsMetadata>,
    pub(crate) data: Array3<Complex<f32>>,
    pub(crate) flags: Array3<bool>,
    /// Centroid JD of each timestep (one entry per unique time).
    pub(crate) times_jd: Vec<f64>,
    pub(crate) baselines: Vec<(usize, usize)>,
    /// One UVW per baseline-time, ordered like the data rows.
    pub(crate) uvws: Vec<Uvw>,
    pub(crate) freqs_hz: Vec<f64>,
    pub(crate) phase: PhaseState,
    pub(crate) tile_xyz: Vec<XyzGeodetic>,
    metrics: MetricsRecorder,
    logger: LogManager,
}

impl UvData {
    pub fn new() -> Self {
        Self {
            meta: None,
            data: Array3::zeros((0, 0, 0)),
            flags: Array3::from_elem((0, 0, 0), false),
            times_jd: Vec::new(),
            baselines: Vec::new(),
            uvws: Vec::new(),
            freqs_hz: Vec::new(),
            phase: PhaseState::Drift,
            tile_xyz: Vec::new(),
            metrics: MetricsRecorder::new(),
            logger: LogManager::new("uvdata"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.meta.is_none()
    }

    pub fn num_times(&self) -> usize {
        self.times_jd.len()
    }

    pub fn num_baselines(&self) -> usize {
        self.baselines.len()
    }

    pub fn num_chans(&self) -> usize {
        self.freqs_hz.len()
    }

    pub fn num_blts(&self) -> usize {
        self.times_jd.len() * self.baselines.len()
    }

    pub fn phase_state(&self) -> PhaseState {
        self.phase
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Populates the handle from one metafits plus one or more gpubox
    /// files, applying the corrections selected in `options`.
    pub fn read_mwa_corr_fits<P: AsRef<Path>>(
        &mut self,
        paths: &[P],
        options: &ReadOptions,
    ) -> VisResult<()> {
        if self.meta.is_some() {
            return Err(VisError::AlreadyPopulated);
        }
        let paths: Vec<PathBuf> = paths.iter().map(|p| p.as_ref().to_path_buf()).collect();
        let (metafits_path, gpubox_files) = gpubox::classify_inputs(&paths)?;
        let meta = metafits::parse_metafits(&metafits_path)?;

        for file in &gpubox_files {
            if file.obs_id != meta.obs_id {
                return Err(VisError::InvalidInputSet(format!(
                    "{} belongs to obsid {}, metafits says {}",
                    file.path.display(),
                    file.obs_id,
                    meta.obs_id
                )));
            }
            if file.gpubox_num > meta.num_coarse_chans() {
                return Err(VisError::InvalidInputSet(format!(
                    "{} exceeds the {} coarse channels of this observation",
                    file.path.display(),
                    meta.num_coarse_chans()
                )));
            }
        }

        let num_antennas = meta.num_antennas();
        let num_baselines = meta.num_baselines();
        let fine_per_coarse = meta.fine_chans_per_coarse();
        let expected_floats = fine_per_coarse * FLOATS_PER_FINE_CHAN * num_baselines;

        let set = gpubox::load_gpubox_files(&gpubox_files, expected_floats, &self.metrics)?;

        let mut baselines = Vec::with_capacity(num_baselines);
        for ant1 in 0..num_antennas {
            for ant2 in ant1..num_antennas {
                baselines.push((ant1, ant2));
            }
        }
        let tile_xyz: Vec<XyzGeodetic> = meta
            .antennas
            .iter()
            .map(|a| geometry::enh_to_xyz(a.east_m, a.north_m, a.height_m, MWA_LAT_RAD))
            .collect();

        // gpubox numbers do not land in band order: receiver channels
        // above 128 arrive in descending sky frequency. Sort the supplied
        // files by their band position so the channel axis stays ascending.
        let sky_indices = meta.coarse_chan_sky_indices();
        let mut supplied: Vec<(usize, usize)> = set
            .channels
            .keys()
            .map(|&gpubox_num| (sky_indices[gpubox_num - 1], gpubox_num))
            .collect();
        supplied.sort_unstable();
        let slot_of_gpubox: BTreeMap<usize, usize> = supplied
            .iter()
            .enumerate()
            .map(|(slot, &(_, gpubox_num))| (gpubox_num, slot))
            .collect();

        let mut freqs_hz = Vec::new();
        for &(sky_idx, _) in &supplied {
            for fine in 0..fine_per_coarse {
                freqs_hz.push(meta.fine_chan_freq_hz(sky_idx, fine));
            }
        }

        let times_jd: Vec<f64> = set
            .times_ms
            .iter()
            .map(|&ms| geometry::unix_to_jd(ms as f64 / 1000.0 + meta.int_time_s / 2.0))
            .collect();

        let num_blts = times_jd.len() * num_baselines;
        let num_chans = freqs_hz.len();
        let mut data = Array3::from_elem((num_blts, num_chans, 4), Complex::new(0.0f32, 0.0));
        // Cells with no gpubox HDU stay flagged.
        let mut flags = Array3::from_elem((num_blts, num_chans, 4), true);

        for (&gpubox_num, time_map) in &set.channels {
            let coarse_slot = slot_of_gpubox[&gpubox_num];
            for (time_idx, time_ms) in set.times_ms.iter().enumerate() {
                let buffer = match time_map.get(time_ms) {
                    Some(b) => b,
                    None => continue,
                };
                for fine in 0..fine_per_coarse {
                    let chan = coarse_slot * fine_per_coarse + fine;
                    for bl in 0..num_baselines {
                        let base = (fine * num_baselines + bl) * FLOATS_PER_FINE_CHAN;
                        let blt = time_idx * num_baselines + bl;
                        for pol in 0..4 {
                            data[[blt, chan, pol]] =
                                Complex::new(buffer[base + 2 * pol], buffer[base + 2 * pol + 1]);
                            flags[[blt, chan, pol]] = false;
                        }
                    }
                }
            }
        }

        if options.correct_cable_len {
            corrections::correct_cable_lengths(&mut data, &baselines, &meta.antennas, &freqs_hz);
            self.logger.record("applied cable length correction");
        }

        let (phase, uvws) = if options.phase_to_pointing_center {
            let (ra_deg, dec_deg) = meta.phase_target_deg();
            let (ra, dec) = (ra_deg.to_radians(), dec_deg.to_radians());
            let uvws = compute_uvws(&times_jd, &baselines, &tile_xyz, ra, dec);
            let ws: Vec<f64> = uvws.iter().map(|uvw| uvw.w).collect();
            corrections::phase_visibilities(&mut data, &ws, &freqs_hz);
            self.logger.record(&format!(
                "phased to pointing centre ra {ra_deg:.4} dec {dec_deg:.4} deg"
            ));
            (PhaseState::Phased { ra_rad: ra, dec_rad: dec }, uvws)
        } else {
            (PhaseState::Drift, zenith_uvws(&times_jd, &baselines, &tile_xyz))
        };

        if options.flag_init {
            let layout = FlagLayout {
                num_coarse: set.channels.len(),
                fine_per_coarse,
                fine_chan_width_hz: meta.fine_chan_width_hz,
                num_baselines,
                int_time_s: meta.int_time_s,
            };
            let count = corrections::flag_init(&mut flags, &times_jd, &layout, options);
            self.metrics.record_flagged(count);
            self.logger
                .record(&format!("initial flagging marked {count} samples"));
        }

        self.logger.record(&format!(
            "read {} timesteps x {} baselines x {} channels from obsid {}",
            times_jd.len(),
            num_baselines,
            num_chans,
            meta.obs_id
        ));

        self.meta = Some(meta);
        self.data = data;
        self.flags = flags;
        self.times_jd = times_jd;
        self.baselines = baselines;
        self.uvws = uvws;
        self.freqs_hz = freqs_hz;
        self.phase = phase;
        self.tile_xyz = tile_xyz;
        Ok(())
    }

    /// Serializes the dataset as a uvfits file, overwriting `path`.
    /// Returns the number of bytes written.
    pub fn write_uvfits<P: AsRef<Path>>(
        &mut self,
        path: P,
        options: &WriteOptions,
    ) -> VisResult<u64> {
        if self.is_empty() {
            return Err(VisError::EmptyDataset);
        }

        if let PhaseState::Drift = self.phase {
            if !options.force_phase {
                return Err(VisError::NotPhased);
            }
            self.phase_to_first_timestep_zenith();
        }

        if !options.spoof_nonessential {
            // The correlator read path never supplies these antenna-table
            // bookkeeping values, so without spoofing there is nothing
            // valid to write.
            return Err(VisError::MissingMetadata(
                "GST0/RDATE/UT1UTC are unset; enable spoof_nonessential".into(),
            ));
        }
        let first_jd = self.times_jd.first().copied().unwrap_or(2_440_587.5);
        let midnight_jd = (first_jd - 0.5).floor() + 0.5;
        let (year, month, day) = geometry::jd_to_ymd(first_jd);
        let spoof = SpoofValues {
            gst0_deg: geometry::gmst_rad(midnight_jd).to_degrees(),
            degpdy: 360.985,
            rdate: format!("{year}-{month:02}-{day:02}T00:00:00.0"),
            ut1utc: 0.0,
            datutc: 0.0,
            iatutc: 33.0,
        };

        let bytes = uvfits::write(path.as_ref(), self, &spoof)?;
        self.logger.record(&format!(
            "wrote {bytes} bytes of uvfits to {}",
            path.as_ref().display()
        ));
        Ok(bytes)
    }

    /// Phases drift data to the zenith of the first timestep.
    fn phase_to_first_timestep_zenith(&mut self) {
        let first_jd = self.times_jd.first().copied().unwrap_or(2_440_587.5);
        let ra = geometry::lst_rad(first_jd);
        let dec = MWA_LAT_RAD;
        let uvws = compute_uvws(&self.times_jd, &self.baselines, &self.tile_xyz, ra, dec);
        let ws: Vec<f64> = uvws.iter().map(|uvw| uvw.w).collect();
        corrections::phase_visibilities(&mut self.data, &ws, &self.freqs_hz);
        self.uvws = uvws;
        self.phase = PhaseState::Phased { ra_rad: ra, dec_rad: dec };
        self.logger.record(&format!(
            "force-phased to first-timestep zenith ra {:.4} dec {:.4} deg",
            ra.to_degrees(),
            dec.to_degrees()
        ));
    }
}

impl Default for UvData {
    fn default() -> Self {
        Self::new()
    }
}

/// UVWs for every baseline-time towards a fixed (ra, dec).
fn compute_uvws(
    times_jd: &[f64],
    baselines: &[(usize, usize)],
    tile_xyz: &[XyzGeodetic],
    ra_rad: f64,
    dec_rad: f64,
) -> Vec<Uvw> {
    let mut uvws = Vec::with_capacity(times_jd.len() * baselines.len());
    for &jd in times_jd {
        let ha = geometry::lst_rad(jd) - ra_rad;
        for &(ant1, ant2) in baselines {
            let b = tile_xyz[ant1] - tile_xyz[ant2];
            uvws.push(geometry::baseline_uvw(b, ha, dec_rad));
        }
    }
    uvws
}

/// Drift-scan UVWs point at the instantaneous zenith (hour angle zero,
/// declination of the array latitude), so they are time-independent.
fn zenith_uvws(
    times_jd: &[f64],
    baselines: &[(usize, usize)],
    tile_xyz: &[XyzGeodetic],
) -> Vec<Uvw> {
    let mut uvws = Vec::with_capacity(times_jd.len() * baselines.len());
    for _ in times_jd {
        for &(ant1, ant2) in baselines {
            let b = tile_xyz[ant1] - tile_xyz[ant2];
            uvws.push(geometry::baseline_uvw(b, 0.0, MWA_LAT_RAD));
        }
    }
    uvws
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fits;
    use fitsio::images::{ImageDescription, ImageType};
    use fitsio::tables::{ColumnDataType, ColumnDescription};

    #[test]
    fn writing_an_unread_handle_fails() {
        let mut uv = UvData::new();
        let err = uv
            .write_uvfits("never-written.uvfits", &WriteOptions::default())
            .unwrap_err();
        assert!(matches!(err, VisError::EmptyDataset));
        assert!(!std::path::Path::new("never-written.uvfits").exists());
    }

    #[test]
    fn reading_nonexistent_files_fails() {
        let mut uv = UvData::new();
        let err = uv
            .read_mwa_corr_fits(
                &[
                    "/no/such/dir/1196175296.metafits",
                    "/no/such/dir/1196175296_20171201145440_gpubox01_00.fits",
                ],
                &ReadOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, VisError::Fits { .. }));
        assert!(uv.is_empty());
    }

    #[test]
    fn mixed_input_sets_are_refused_before_any_io() {
        let mut uv = UvData::new();
        let err = uv
            .read_mwa_corr_fits(&["flags.mwaf"], &ReadOptions::default())
            .unwrap_err();
        assert!(matches!(err, VisError::InvalidInputSet(_)));
    }

    /// Two antennas, receiver channels 131 and 132, two fine channels
    /// per coarse.
    fn write_two_channel_metafits(dir: &Path) -> PathBuf {
        let path = dir.join("1196175296.metafits");
        let mut file = fits::create(&path).unwrap();
        let primary = fits::hdu(&mut file, &path, 0).unwrap();
        primary
            .write_key(&mut file, "GPSTIME", 1_196_175_296.0)
            .unwrap();
        primary
            .write_key(&mut file, "DATE-OBS", "2017-12-01T14:54:38")
            .unwrap();
        primary.write_key(&mut file, "INTTIME", 2.0).unwrap();
        primary.write_key(&mut file, "FINECHAN", 640.0).unwrap();
        primary.write_key(&mut file, "BANDWDTH", 2.56).unwrap();
        primary.write_key(&mut file, "FREQCENT", 154.88).unwrap();
        primary.write_key(&mut file, "NCHANS", 4i64).unwrap();
        primary.write_key(&mut file, "NINPUTS", 4i64).unwrap();
        primary.write_key(&mut file, "RA", 50.67).unwrap();
        primary.write_key(&mut file, "DEC", -37.2).unwrap();
        fits::write_long_string_key(&mut file, &path, "CHANNELS", "131,132").unwrap();

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
                .unwrap()
        })
        .collect::<Vec<_>>();
        let table = file.create_table("TILEDATA", &columns).unwrap();
        table
            .write_col(&mut file, "Input", &[0i32, 1, 2, 3])
            .unwrap();
        table
            .write_col(&mut file, "Antenna", &[0i32, 0, 1, 1])
            .unwrap();
        table
            .write_col(&mut file, "North", &[0.0f32, 0.0, 5.0, 5.0])
            .unwrap();
        table
            .write_col(&mut file, "East", &[0.0f32, 0.0, 10.0, 10.0])
            .unwrap();
        table
            .write_col(&mut file, "Height", &[375.0f32; 4])
            .unwrap();
        table.write_col(&mut file, "Flag", &[0i32; 4]).unwrap();
        for (row, pol) in ["X", "Y", "X", "Y"].iter().enumerate() {
            let tile = if row < 2 { "Tile011" } else { "Tile012" };
            fits::write_col_str(&mut file, &path, 3, row + 1, tile).unwrap();
            fits::write_col_str(&mut file, &path, 4, row + 1, pol).unwrap();
            fits::write_col_str(&mut file, &path, 5, row + 1, "EL_90.00").unwrap();
        }
        path
    }

    /// One image HDU of constant visibilities: three baselines, two fine
    /// channels, all polarizations set to `value`.
    fn write_constant_gpubox(dir: &Path, gpubox_num: usize, value: f32) -> PathBuf {
        let path = dir.join(format!(
            "1196175296_20171201145440_gpubox{gpubox_num:02}_00.fits"
        ));
        let mut file = fits::create(&path).unwrap();
        let description = ImageDescription {
            data_type: ImageType::Float,
            dimensions: &[2, 24],
        };
        let hdu = file.create_image("", &description).unwrap();
        hdu.write_key(&mut file, "TIME", 1_512_140_080i64).unwrap();
        hdu.write_key(&mut file, "MILLITIM", 0i64).unwrap();
        let image: Vec<f32> = (0..48)
            .map(|i| if i % 2 == 0 { value } else { 0.0 })
            .collect();
        hdu.write_image(&mut file, &image).unwrap();
        path
    }

    #[test]
    fn gpubox_numbers_above_128_fill_reversed_band_slots() {
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![
            write_two_channel_metafits(dir.path()),
            write_constant_gpubox(dir.path(), 1, 1.0),
            write_constant_gpubox(dir.path(), 2, 2.0),
        ];

        let mut uv = UvData::new();
        let options = ReadOptions {
            correct_cable_len: false,
            phase_to_pointing_center: false,
            flag_init: false,
            ..Default::default()
        };
        uv.read_mwa_corr_fits(&paths, &options).unwrap();

        assert_eq!(uv.num_chans(), 4);
        assert!(uv.freqs_hz.windows(2).all(|w| w[0] < w[1]));
        // Both receiver channels sit above 128, so gpubox 2 carries the
        // lower half of the band and gpubox 1 the upper half.
        assert_eq!(uv.data[[0, 0, 0]], Complex::new(2.0, 0.0));
        assert_eq!(uv.data[[0, 1, 0]], Complex::new(2.0, 0.0));
        assert_eq!(uv.data[[0, 2, 0]], Complex::new(1.0, 0.0));
        assert_eq!(uv.data[[0, 3, 0]], Complex::new(1.0, 0.0));
        assert!(!uv.flags[[0, 0, 0]]);
    }
}
