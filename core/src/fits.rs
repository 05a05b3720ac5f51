//! Thin error-mapping wrappers around `fitsio`.
//!
//! cfitsio reports every key as a string, so the typed accessors here
//! read the raw value and parse it. Keys longer than a single card
//! (OGIP long strings, e.g. a 24-entry `CHANNELS` list) go through the
//! dedicated long-string calls that cfitsio splits over CONTINUE cards.

use crate::prelude::{VisError, VisResult};
use fitsio::errors::check_status;
use fitsio::hdu::{DescribesHdu, FitsHdu};
use fitsio::FitsFile;
use std::ffi::{CStr, CString};
use std::fmt::Display;
use std::os::raw::c_char;
use std::path::Path;
use std::ptr;
use std::str::FromStr;

/// cfitsio status for a key that is not present in the header.
const KEY_NO_EXIST: i32 = 202;

pub fn open(path: &Path) -> VisResult<FitsFile> {
    FitsFile::open(path).map_err(|e| VisError::fits(path, e.to_string()))
}

pub fn edit(path: &Path) -> VisResult<FitsFile> {
    FitsFile::edit(path).map_err(|e| VisError::fits(path, e.to_string()))
}

/// Creates a new file with an empty primary HDU, replacing any existing
/// file at `path`.
pub fn create(path: &Path) -> VisResult<FitsFile> {
    FitsFile::create(path)
        .overwrite()
        .open()
        .map_err(|e| VisError::fits(path, e.to_string()))
}

pub fn hdu<D>(file: &mut FitsFile, path: &Path, desc: D) -> VisResult<FitsHdu>
where
    D: DescribesHdu + Display,
{
    let which = desc.to_string();
    file.hdu(desc)
        .map_err(|e| VisError::fits(path, format!("cannot open HDU {which}: {e}")))
}

/// A required header key, parsed from cfitsio's string representation.
pub fn key<T: FromStr>(
    file: &mut FitsFile,
    hdu: &FitsHdu,
    path: &Path,
    name: &str,
) -> VisResult<T> {
    let raw: String = hdu
        .read_key(file, name)
        .map_err(|e| VisError::fits(path, format!("{name}: {e}")))?;
    parse_key_value(&raw, path, name)
}

/// An optional header key; a missing key is `None`, anything else that
/// fails is an error.
pub fn opt_key<T: FromStr>(
    file: &mut FitsFile,
    hdu: &FitsHdu,
    path: &Path,
    name: &str,
) -> VisResult<Option<T>> {
    match hdu.read_key::<String>(file, name) {
        Ok(raw) => parse_key_value(&raw, path, name).map(Some),
        Err(fitsio::errors::Error::Fits(e)) if e.status == KEY_NO_EXIST => Ok(None),
        Err(e) => Err(VisError::fits(path, format!("{name}: {e}"))),
    }
}

fn parse_key_value<T: FromStr>(raw: &str, path: &Path, name: &str) -> VisResult<T> {
    raw.trim()
        .trim_matches('\'')
        .trim()
        .parse()
        .map_err(|_| VisError::fits(path, format!("{name} has unparsable value {raw:?}")))
}

/// Reads a string key from the current HDU with CONTINUE-card support.
pub fn long_string_key(file: &mut FitsFile, path: &Path, name: &str) -> VisResult<String> {
    let c_name = c_string(path, name)?;
    let mut value: *mut c_char = ptr::null_mut();
    let mut status = 0;
    unsafe {
        fitsio_sys::ffgkls(
            file.as_raw(),
            c_name.as_ptr(),
            &mut value,
            ptr::null_mut(),
            &mut status,
        );
    }
    check(status, path, name)?;
    let out = unsafe { CStr::from_ptr(value) }
        .to_string_lossy()
        .into_owned();
    unsafe {
        fitsio_sys::fffree(value.cast(), &mut status);
    }
    check(status, path, name)?;
    Ok(out)
}

/// Writes a string key to the current HDU, splitting long values over
/// CONTINUE cards.
pub fn write_long_string_key(
    file: &mut FitsFile,
    path: &Path,
    name: &str,
    value: &str,
) -> VisResult<()> {
    let c_name = c_string(path, name)?;
    let c_value = c_string(path, value)?;
    let mut status = 0;
    unsafe {
        fitsio_sys::ffpkls(
            file.as_raw(),
            c_name.as_ptr(),
            c_value.as_ptr(),
            ptr::null(),
            &mut status,
        );
    }
    check(status, path, name)
}

/// Writes one string cell into a table column of the current HDU.
/// Columns and rows are 1-based, as cfitsio counts them.
pub fn write_col_str(
    file: &mut FitsFile,
    path: &Path,
    col: usize,
    row: usize,
    value: &str,
) -> VisResult<()> {
    let c_value = c_string(path, value)?;
    let mut ptr_array = [c_value.as_ptr() as *mut c_char];
    let mut status = 0;
    unsafe {
        fitsio_sys::ffpcls(
            file.as_raw(),
            col as i32,
            row as i64,
            1,
            1,
            ptr_array.as_mut_ptr(),
            &mut status,
        );
    }
    check(status, path, "writing string column")
}

pub(crate) fn c_string(path: &Path, value: &str) -> VisResult<CString> {
    CString::new(value).map_err(|_| VisError::fits(path, format!("embedded NUL in {value:?}")))
}

pub(crate) fn check(status: i32, path: &Path, what: &str) -> VisResult<()> {
    check_status(status).map_err(|e| VisError::fits(path, format!("{what}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_keys_survive_continue_cards() {
        // A full 24-channel receiver list does not fit one 80-byte card.
        let channels: Vec<String> = (131..155).map(|c| c.to_string()).collect();
        let channels = channels.join(",");
        assert!(channels.len() > 68);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long.fits");
        {
            let mut file = create(&path).unwrap();
            let primary = hdu(&mut file, &path, 0).unwrap();
            primary.write_key(&mut file, "NCHANS", 768i64).unwrap();
            write_long_string_key(&mut file, &path, "CHANNELS", &channels).unwrap();
        }

        let mut file = open(&path).unwrap();
        let primary = hdu(&mut file, &path, 0).unwrap();
        assert_eq!(key::<i64>(&mut file, &primary, &path, "NCHANS").unwrap(), 768);
        assert_eq!(long_string_key(&mut file, &path, "CHANNELS").unwrap(), channels);
    }

    #[test]
    fn missing_keys_are_none_for_opt_and_err_for_required() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.fits");
        {
            let mut file = create(&path).unwrap();
            let primary = hdu(&mut file, &path, 0).unwrap();
            primary.write_key(&mut file, "INTTIME", 2.0f64).unwrap();
        }

        let mut file = open(&path).unwrap();
        let primary = hdu(&mut file, &path, 0).unwrap();
        let t: f64 = key(&mut file, &primary, &path, "INTTIME").unwrap();
        assert!((t - 2.0).abs() < 1e-12);
        assert_eq!(
            opt_key::<f64>(&mut file, &primary, &path, "RAPHASE").unwrap(),
            None
        );
        assert!(matches!(
            key::<f64>(&mut file, &primary, &path, "RAPHASE"),
            Err(VisError::Fits { .. })
        ));
    }
}
