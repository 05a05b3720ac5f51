//! Visibility corrections and pre-flagging applied at read time.
//!
//! Polarization axis order throughout is XX, XY, YX, YY, with the first
//! antenna of a baseline contributing the unconjugated signal.

use crate::geometry::VEL_C;
use crate::metafits::Antenna;
use crate::prelude::ReadOptions;
use ndarray::{Array3, Axis};
use num_complex::Complex;
use std::f64::consts::TAU;

fn rotate(vis: &mut Complex<f32>, angle_rad: f64) {
    let (sin_a, cos_a) = angle_rad.sin_cos();
    let rotor = Complex::new(cos_a as f32, sin_a as f32);
    *vis *= rotor;
}

/// Phase-rotates every visibility by its baseline's electrical length
/// difference: `-2 pi * dL * f / c`, per polarization pair.
pub fn correct_cable_lengths(
    data: &mut Array3<Complex<f32>>,
    baselines: &[(usize, usize)],
    antennas: &[Antenna],
    freqs_hz: &[f64],
) {
    let num_baselines = baselines.len();
    for (blt_idx, mut blt) in data.axis_iter_mut(Axis(0)).enumerate() {
        // Autocorrelations are not skipped: their cross pols still pick
        // up an X-Y length difference.
        let (ant1, ant2) = baselines[blt_idx % num_baselines];
        let a1 = &antennas[ant1];
        let a2 = &antennas[ant2];
        let pol_lengths = [
            a2.cable_length_x_m - a1.cable_length_x_m,
            a2.cable_length_y_m - a1.cable_length_x_m,
            a2.cable_length_x_m - a1.cable_length_y_m,
            a2.cable_length_y_m - a1.cable_length_y_m,
        ];
        for (chan_idx, mut chan) in blt.axis_iter_mut(Axis(0)).enumerate() {
            let freq = freqs_hz[chan_idx];
            for (pol_idx, vis) in chan.iter_mut().enumerate() {
                let angle = -TAU * pol_lengths[pol_idx] * freq / VEL_C;
                if angle != 0.0 {
                    rotate(vis, angle);
                }
            }
        }
    }
}

/// Phase-rotates every visibility towards a phase centre given the
/// per-baseline-time w coordinate in metres: `-2 pi * w * f / c`.
pub fn phase_visibilities(data: &mut Array3<Complex<f32>>, ws_m: &[f64], freqs_hz: &[f64]) {
    for (blt_idx, mut blt) in data.axis_iter_mut(Axis(0)).enumerate() {
        let w = ws_m[blt_idx];
        if w == 0.0 {
            continue;
        }
        for (chan_idx, mut chan) in blt.axis_iter_mut(Axis(0)).enumerate() {
            let angle = -TAU * w * freqs_hz[chan_idx] / VEL_C;
            for vis in chan.iter_mut() {
                rotate(vis, angle);
            }
        }
    }
}

/// Channel-axis geometry needed by [`flag_init`].
pub struct FlagLayout {
    pub num_coarse: usize,
    pub fine_per_coarse: usize,
    pub fine_chan_width_hz: f64,
    pub num_baselines: usize,
    pub int_time_s: f64,
}

/// Standard MWA pre-flagging: coarse-channel edges, the centre fine
/// channel of each coarse channel, and quack time at the observation
/// boundaries. Returns the number of newly flagged samples.
pub fn flag_init(
    flags: &mut Array3<bool>,
    times_jd: &[f64],
    layout: &FlagLayout,
    options: &ReadOptions,
) -> usize {
    let mut newly_flagged = 0;

    let num_edge = (options.edge_width_hz / layout.fine_chan_width_hz).round() as usize;
    let centre = layout.fine_per_coarse / 2;
    let mut chan_flagged = vec![false; layout.num_coarse * layout.fine_per_coarse];
    for coarse in 0..layout.num_coarse {
        let base = coarse * layout.fine_per_coarse;
        for fine in 0..layout.fine_per_coarse {
            let edge = fine < num_edge || fine >= layout.fine_per_coarse - num_edge;
            if edge || fine == centre {
                chan_flagged[base + fine] = true;
            }
        }
    }

    // Integration timestamps are centroids; a sample is quacked when any
    // part of its integration overlaps the flagged window. Differences of
    // JDs near 2.4e6 carry tens of microseconds of float rounding, so the
    // window comparison gets a millisecond of slack.
    const QUACK_SLACK_S: f64 = 1e-3;
    let start_jd = times_jd.first().copied().unwrap_or(0.0) - layout.int_time_s / 86_400.0 / 2.0;
    let end_jd = times_jd.last().copied().unwrap_or(0.0) + layout.int_time_s / 86_400.0 / 2.0;
    let time_flagged: Vec<bool> = times_jd
        .iter()
        .map(|&jd| {
            let from_start = (jd - start_jd) * 86_400.0 - layout.int_time_s / 2.0;
            let from_end = (end_jd - jd) * 86_400.0 - layout.int_time_s / 2.0;
            from_start < options.start_flag_s - QUACK_SLACK_S
                || from_end < options.end_flag_s - QUACK_SLACK_S
        })
        .collect();

    for (blt_idx, mut blt) in flags.axis_iter_mut(Axis(0)).enumerate() {
        let time_idx = blt_idx / layout.num_baselines;
        let quack = time_flagged[time_idx];
        for (chan_idx, mut chan) in blt.axis_iter_mut(Axis(0)).enumerate() {
            if !quack && !chan_flagged[chan_idx] {
                continue;
            }
            for flag in chan.iter_mut() {
                if !*flag {
                    *flag = true;
                    newly_flagged += 1;
                }
            }
        }
    }
    newly_flagged
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn one_antenna_pair() -> Vec<Antenna> {
        let mut ants = Vec::new();
        for (i, cable_x) in [(0usize, 100.0), (1usize, 130.0)] {
            ants.push(Antenna {
                index: i,
                tile_name: format!("Tile{i:03}"),
                east_m: i as f64 * 10.0,
                north_m: 0.0,
                height_m: 0.0,
                cable_length_x_m: cable_x,
                cable_length_y_m: cable_x,
                flagged: false,
            });
        }
        ants
    }

    #[test]
    fn cable_correction_leaves_autos_untouched() {
        let antennas = one_antenna_pair();
        let baselines = vec![(0, 0), (0, 1), (1, 1)];
        let freqs = vec![150.0e6];
        let mut data = Array3::from_elem((3, 1, 4), Complex::new(1.0f32, 0.0));

        correct_cable_lengths(&mut data, &baselines, &antennas, &freqs);

        // Equal X and Y cables per antenna: autos keep zero phase.
        for pol in 0..4 {
            assert!((data[[0, 0, pol]].arg()).abs() < 1e-6);
            assert!((data[[2, 0, pol]].arg()).abs() < 1e-6);
        }
        // The cross baseline is rotated by -2 pi * 30 m * f / c.
        let expected = -TAU * 30.0 * 150.0e6 / VEL_C;
        let got = data[[1, 0, 0]].arg() as f64;
        let diff = (got - expected).rem_euclid(TAU);
        assert!(diff < 1e-4 || (TAU - diff) < 1e-4);
    }

    #[test]
    fn phasing_rotates_by_w() {
        let freqs = vec![VEL_C]; // one-metre wavelength keeps the math visible
        let ws = vec![0.25];
        let mut data = Array3::from_elem((1, 1, 4), Complex::new(1.0f32, 0.0));
        phase_visibilities(&mut data, &ws, &freqs);
        // A quarter wavelength of w is a -90 degree rotation.
        assert!((data[[0, 0, 0]].re).abs() < 1e-5);
        assert!((data[[0, 0, 0]].im + 1.0).abs() < 1e-5);
    }

    #[test]
    fn flag_init_marks_edges_centre_and_quack_time() {
        let layout = FlagLayout {
            num_coarse: 1,
            fine_per_coarse: 8,
            fine_chan_width_hz: 40_000.0,
            num_baselines: 1,
            int_time_s: 2.0,
        };
        let options = ReadOptions {
            edge_width_hz: 80_000.0, // two fine channels per edge
            start_flag_s: 2.0,       // first integration only
            end_flag_s: 0.0,
            ..Default::default()
        };
        // Two timesteps, one baseline, eight channels.
        let times_jd = vec![2_458_089.0, 2_458_089.0 + 2.0 / 86_400.0];
        let mut flags = Array3::from_elem((2, 8, 4), false);

        let count = flag_init(&mut flags, &times_jd, &layout, &options);

        // First timestep fully quacked.
        assert!(flags.index_axis(Axis(0), 0).iter().all(|&f| f));
        // Second timestep: edges (0, 1, 6, 7) and centre (4) flagged.
        let second = flags.index_axis(Axis(0), 1);
        for chan in [0, 1, 4, 6, 7] {
            assert!(second[[chan, 0]]);
        }
        for chan in [2, 3, 5] {
            assert!(!second[[chan, 0]]);
        }
        assert_eq!(count, 8 * 4 + 5 * 4);
    }
}
