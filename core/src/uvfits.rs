//! UVFITS serialization: a random-groups primary HDU followed by an
//! `AIPS AN` antenna table.
//!
//! rust-fitsio has no surface for random groups or row-wise table
//! writes, so those parts go through `fitsio_sys` directly; everything
//! else uses the safe API.

use crate::fits;
use crate::geometry::{self, VEL_C};
use crate::prelude::{VisError, VisResult};
use crate::uvdata::{PhaseState, UvData};
use std::os::raw::{c_char, c_long};
use std::path::Path;

/// Bookkeeping values the MWA read path does not supply; filled in by
/// the writer when spoofing is enabled.
pub(crate) struct SpoofValues {
    pub gst0_deg: f64,
    pub degpdy: f64,
    pub rdate: String,
    pub ut1utc: f64,
    pub datutc: f64,
    pub iatutc: f64,
}

/// Output polarization order XX, YY, XY, YX (STOKES -5 step -1) mapped
/// from the internal XX, XY, YX, YY axis.
const POL_MAP: [usize; 4] = [0, 3, 1, 2];

pub(crate) fn write(path: &Path, uv: &UvData, spoof: &SpoofValues) -> VisResult<u64> {
    let meta = uv.meta.as_ref().ok_or(VisError::EmptyDataset)?;
    let (ra_deg, dec_deg) = match uv.phase {
        PhaseState::Phased { ra_rad, dec_rad } => (ra_rad.to_degrees(), dec_rad.to_degrees()),
        PhaseState::Drift => return Err(VisError::NotPhased),
    };

    let num_chans = uv.num_chans();
    let num_blts = uv.num_blts();
    let num_baselines = uv.num_baselines();
    let first_jd = uv.times_jd.first().copied().ok_or(VisError::EmptyDataset)?;
    let jd_zero = first_jd.floor();
    let centre_chan = num_chans / 2;
    let centre_freq_hz = uv.freqs_hz[centre_chan];
    let (year, month, day) = geometry::jd_to_ymd(first_jd);

    if path.exists() {
        std::fs::remove_file(path).map_err(|e| VisError::io(path, e))?;
    }

    // The random-groups structure must exist before the file is usable,
    // so it is laid down with ffphpr first.
    let c_path = fits::c_string(path, &path.to_string_lossy())?;
    let mut status = 0;
    let mut fptr = std::ptr::null_mut();
    unsafe {
        fitsio_sys::ffinit(&mut fptr, c_path.as_ptr(), &mut status);
    }
    fits::check(status, path, "creating uvfits file")?;
    let mut naxes: [c_long; 6] = [0, 3, 4, num_chans as c_long, 1, 1];
    unsafe {
        fitsio_sys::ffphpr(
            fptr,
            1,
            -32,
            naxes.len() as i32,
            naxes.as_mut_ptr(),
            5,
            num_blts as c_long,
            1,
            &mut status,
        );
    }
    fits::check(status, path, "writing group header")?;
    unsafe {
        fitsio_sys::ffclos(fptr, &mut status);
    }
    fits::check(status, path, "closing new uvfits file")?;

    let mut uvfits = fits::edit(path)?;
    let hdu = fits::hdu(&mut uvfits, path, 0)?;

    macro_rules! write_key {
        ($name:expr, $value:expr) => {
            hdu.write_key(&mut uvfits, $name, $value)
                .map_err(|e| VisError::fits(path, format!("{}: {e}", $name)))?
        };
    }

    write_key!("BSCALE", 1.0);
    for (i, ptype) in ["UU", "VV", "WW", "BASELINE", "DATE"].iter().enumerate() {
        let n = i + 1;
        write_key!(&format!("PTYPE{n}"), *ptype);
        write_key!(&format!("PSCAL{n}"), 1.0);
        write_key!(
            &format!("PZERO{n}"),
            if *ptype == "DATE" { jd_zero } else { 0.0 }
        );
    }
    write_key!(
        "DATE-OBS",
        format!("{year}-{month:02}-{day:02}T00:00:00.0")
    );

    write_key!("CTYPE2", "COMPLEX");
    write_key!("CRVAL2", 1.0);
    write_key!("CRPIX2", 1.0);
    write_key!("CDELT2", 1.0);

    write_key!("CTYPE3", "STOKES");
    write_key!("CRVAL3", -5);
    write_key!("CDELT3", -1);
    write_key!("CRPIX3", 1.0);

    write_key!("CTYPE4", "FREQ");
    write_key!("CRVAL4", centre_freq_hz);
    write_key!("CDELT4", meta.fine_chan_width_hz);
    write_key!("CRPIX4", centre_chan as u64 + 1);

    write_key!("CTYPE5", "RA");
    write_key!("CRVAL5", ra_deg);
    write_key!("CDELT5", 1);
    write_key!("CRPIX5", 1);

    write_key!("CTYPE6", "DEC");
    write_key!("CRVAL6", dec_deg);
    write_key!("CDELT6", 1);
    write_key!("CRPIX6", 1);

    write_key!("OBSRA", ra_deg);
    write_key!("OBSDEC", dec_deg);
    write_key!("EPOCH", 2000.0);
    write_key!("OBJECT", meta.source_name.as_str());
    write_key!("TELESCOP", "MWA");
    write_key!("INSTRUME", "MWA");

    // AIPS refuses the file without this history card.
    let history = fits::c_string(path, "AIPS WTSCAL =  1.0")?;
    unsafe {
        fitsio_sys::ffphis(uvfits.as_raw(), history.as_ptr(), &mut status);
    }
    fits::check(status, path, "writing history card")?;

    // One group per baseline-time: five parameters then the regular
    // COMPLEX x STOKES x FREQ array, COMPLEX varying fastest.
    let floats_per_group = 5 + num_chans * 4 * 3;
    let mut group = Vec::with_capacity(floats_per_group);
    let weight = meta.int_time_s as f32;
    for (time_idx, &jd) in uv.times_jd.iter().enumerate() {
        for (bl_idx, &(ant1, ant2)) in uv.baselines.iter().enumerate() {
            let blt = time_idx * num_baselines + bl_idx;
            let uvw = uv.uvws[blt];
            group.clear();
            group.push((uvw.u / VEL_C) as f32);
            group.push((uvw.v / VEL_C) as f32);
            group.push((uvw.w / VEL_C) as f32);
            group.push((256 * (ant1 + 1) + ant2 + 1) as f32);
            group.push((jd - jd_zero) as f32);
            for chan in 0..num_chans {
                for &pol in &POL_MAP {
                    let vis = uv.data[[blt, chan, pol]];
                    group.push(vis.re);
                    group.push(vis.im);
                    group.push(if uv.flags[[blt, chan, pol]] {
                        -weight
                    } else {
                        weight
                    });
                }
            }
            unsafe {
                fitsio_sys::ffpgpe(
                    uvfits.as_raw(),
                    blt as c_long + 1,
                    1,
                    group.len() as c_long,
                    group.as_mut_ptr(),
                    &mut status,
                );
            }
            fits::check(status, path, "writing visibility group")?;
        }
    }

    write_antenna_table(&mut uvfits, path, uv, spoof, centre_freq_hz)?;

    drop(uvfits);
    let bytes = std::fs::metadata(path)
        .map_err(|e| VisError::io(path, e))?
        .len();
    Ok(bytes)
}

/// Column layout of the `AIPS AN` table.
const AN_COLUMNS: [(&str, &str); 11] = [
    ("ANNAME", "8A"),
    ("STABXYZ", "3D"),
    ("NOSTA", "1J"),
    ("MNTSTA", "1J"),
    ("STAXOF", "1E"),
    ("POLTYA", "1A"),
    ("POLAA", "1E"),
    ("POLCALA", "1E"),
    ("POLTYB", "1A"),
    ("POLAB", "1E"),
    ("POLCALB", "1E"),
];

fn write_antenna_table(
    uvfits: &mut fitsio::FitsFile,
    path: &Path,
    uv: &UvData,
    spoof: &SpoofValues,
    centre_freq_hz: f64,
) -> VisResult<()> {
    let meta = uv.meta.as_ref().ok_or(VisError::EmptyDataset)?;
    let (array_x, array_y, array_z) = geometry::geocentric_array_centre();

    let names = AN_COLUMNS
        .iter()
        .map(|(name, _)| fits::c_string(path, name))
        .collect::<VisResult<Vec<_>>>()?;
    let formats = AN_COLUMNS
        .iter()
        .map(|(_, form)| fits::c_string(path, form))
        .collect::<VisResult<Vec<_>>>()?;
    let unit = fits::c_string(path, "")?;
    let mut name_ptrs: Vec<*mut c_char> =
        names.iter().map(|s| s.as_ptr() as *mut c_char).collect();
    let mut format_ptrs: Vec<*mut c_char> =
        formats.iter().map(|s| s.as_ptr() as *mut c_char).collect();
    let mut unit_ptrs: Vec<*mut c_char> = AN_COLUMNS
        .iter()
        .map(|_| unit.as_ptr() as *mut c_char)
        .collect();
    let extname = fits::c_string(path, "AIPS AN")?;

    let mut status = 0;
    unsafe {
        // 2 selects a binary table.
        fitsio_sys::ffcrtb(
            uvfits.as_raw(),
            2,
            0,
            AN_COLUMNS.len() as i32,
            name_ptrs.as_mut_ptr(),
            format_ptrs.as_mut_ptr(),
            unit_ptrs.as_mut_ptr(),
            extname.as_ptr(),
            &mut status,
        );
    }
    fits::check(status, path, "creating antenna table")?;
    let hdu = fits::hdu(uvfits, path, 1)?;

    macro_rules! write_key {
        ($name:expr, $value:expr) => {
            hdu.write_key(uvfits, $name, $value)
                .map_err(|e| VisError::fits(path, format!("{}: {e}", $name)))?
        };
    }

    write_key!("ARRAYX", array_x);
    write_key!("ARRAYY", array_y);
    write_key!("ARRAYZ", array_z);
    write_key!("FREQ", centre_freq_hz);
    write_key!("GSTIA0", spoof.gst0_deg);
    write_key!("DEGPDY", spoof.degpdy);
    write_key!("RDATE", spoof.rdate.as_str());
    write_key!("POLARX", 0.0);
    write_key!("POLARY", 0.0);
    write_key!("UT1UTC", spoof.ut1utc);
    write_key!("DATUTC", spoof.datutc);
    write_key!("TIMSYS", "UTC");
    write_key!("ARRNAM", "MWA");
    write_key!("NUMORB", 0);
    write_key!("NOPCAL", 0);
    write_key!("FREQID", -1);
    write_key!("IATUTC", spoof.iatutc);

    for (antenna, xyz) in meta.antennas.iter().zip(&uv.tile_xyz) {
        let row = antenna.index as i64 + 1;
        fits::write_col_str(uvfits, path, 1, row as usize, &antenna.tile_name)?;
        unsafe {
            let mut stabxyz = [xyz.x, xyz.y, xyz.z];
            fitsio_sys::ffpcld(
                uvfits.as_raw(),
                2,
                row,
                1,
                3,
                stabxyz.as_mut_ptr(),
                &mut status,
            );
            fits::check(status, path, "writing STABXYZ")?;

            fitsio_sys::ffpclk(
                uvfits.as_raw(),
                3,
                row,
                1,
                1,
                [row as i32].as_mut_ptr(),
                &mut status,
            );
            fits::check(status, path, "writing NOSTA")?;

            // MNTSTA 0 means alt-az.
            fitsio_sys::ffpclk(uvfits.as_raw(), 4, row, 1, 1, [0].as_mut_ptr(), &mut status);
            fits::check(status, path, "writing MNTSTA")?;

            fitsio_sys::ffpcle(
                uvfits.as_raw(),
                5,
                row,
                1,
                1,
                [0.0f32].as_mut_ptr(),
                &mut status,
            );
            fits::check(status, path, "writing STAXOF")?;
        }
        fits::write_col_str(uvfits, path, 6, row as usize, "X")?;
        unsafe {
            fitsio_sys::ffpcle(
                uvfits.as_raw(),
                7,
                row,
                1,
                1,
                [0.0f32].as_mut_ptr(),
                &mut status,
            );
            fits::check(status, path, "writing POLAA")?;
            fitsio_sys::ffpcle(
                uvfits.as_raw(),
                8,
                row,
                1,
                1,
                [0.0f32].as_mut_ptr(),
                &mut status,
            );
            fits::check(status, path, "writing POLCALA")?;
        }
        fits::write_col_str(uvfits, path, 9, row as usize, "Y")?;
        unsafe {
            fitsio_sys::ffpcle(
                uvfits.as_raw(),
                10,
                row,
                1,
                1,
                [90.0f32].as_mut_ptr(),
                &mut status,
            );
            fits::check(status, path, "writing POLAB")?;
            fitsio_sys::ffpcle(
                uvfits.as_raw(),
                11,
                row,
                1,
                1,
                [0.0f32].as_mut_ptr(),
                &mut status,
            );
            fits::check(status, path, "writing POLCALB")?;
        }
    }

    Ok(())
}
