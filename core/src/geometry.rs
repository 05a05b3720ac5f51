//! Array geometry: antenna coordinate frames, sidereal time and UVW.

use std::f64::consts::TAU;

/// Speed of light [m/s].
pub const VEL_C: f64 = 299_792_458.0;

/// MWA array latitude [rad].
pub const MWA_LAT_RAD: f64 = -0.466_060_83;
/// MWA array longitude [rad].
pub const MWA_LONG_RAD: f64 = 2.036_289_87;
/// MWA array height above the WGS84 ellipsoid [m].
pub const MWA_HEIGHT_M: f64 = 377.827;

/// Local geodetic coordinates: X towards the meridian at the equator,
/// Y east, Z towards the north celestial pole.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct XyzGeodetic {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl std::ops::Sub for XyzGeodetic {
    type Output = XyzGeodetic;

    fn sub(self, rhs: Self) -> Self {
        Self {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
            z: self.z - rhs.z,
        }
    }
}

/// Baseline coordinates towards a phase centre [m].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Uvw {
    pub u: f64,
    pub v: f64,
    pub w: f64,
}

/// Converts local East/North/Height antenna offsets to [`XyzGeodetic`].
pub fn enh_to_xyz(east_m: f64, north_m: f64, height_m: f64, lat_rad: f64) -> XyzGeodetic {
    let (sin_lat, cos_lat) = lat_rad.sin_cos();
    XyzGeodetic {
        x: -north_m * sin_lat + height_m * cos_lat,
        y: east_m,
        z: north_m * cos_lat + height_m * sin_lat,
    }
}

/// Geocentric coordinates of the array centre on the WGS84 ellipsoid [m].
pub fn geocentric_array_centre() -> (f64, f64, f64) {
    let a = 6_378_137.0;
    let f = 1.0 / 298.257_223_563;
    let e2 = f * (2.0 - f);
    let (sin_lat, cos_lat) = MWA_LAT_RAD.sin_cos();
    let (sin_long, cos_long) = MWA_LONG_RAD.sin_cos();
    let n = a / (1.0 - e2 * sin_lat * sin_lat).sqrt();
    (
        (n + MWA_HEIGHT_M) * cos_lat * cos_long,
        (n + MWA_HEIGHT_M) * cos_lat * sin_long,
        (n * (1.0 - e2) + MWA_HEIGHT_M) * sin_lat,
    )
}

/// Unix seconds to Julian date.
pub fn unix_to_jd(unix_s: f64) -> f64 {
    unix_s / 86_400.0 + 2_440_587.5
}

/// Julian date to a (year, month, day) civil date, Fliegel-Van Flandern.
pub fn jd_to_ymd(jd: f64) -> (i64, u32, u32) {
    let jdn = (jd + 0.5).floor() as i64;
    let a = jdn + 32_044;
    let b = (4 * a + 3) / 146_097;
    let c = a - 146_097 * b / 4;
    let d = (4 * c + 3) / 1_461;
    let e = c - 1_461 * d / 4;
    let m = (5 * e + 2) / 153;
    let day = (e - (153 * m + 2) / 5 + 1) as u32;
    let month = (m + 3 - 12 * (m / 10)) as u32;
    let year = 100 * b + d - 4_800 + m / 10;
    (year, month, day)
}

/// Greenwich mean sidereal time, IAU 1982 polynomial [rad].
///
/// Accurate to well under a second over the MWA's lifetime, which is
/// enough for zenith phasing and antenna-table bookkeeping.
pub fn gmst_rad(jd_ut1: f64) -> f64 {
    let t = (jd_ut1 - 2_451_545.0) / 36_525.0;
    let gmst_s = 67_310.548_41
        + (876_600.0 * 3_600.0 + 8_640_184.812_866) * t
        + 0.093_104 * t * t
        - 6.2e-6 * t * t * t;
    (gmst_s.rem_euclid(86_400.0) / 86_400.0) * TAU
}

/// Local sidereal time at the MWA [rad].
pub fn lst_rad(jd_ut1: f64) -> f64 {
    (gmst_rad(jd_ut1) + MWA_LONG_RAD).rem_euclid(TAU)
}

/// Projects a baseline onto the (u, v, w) frame of a phase centre given
/// its hour angle and declination.
pub fn baseline_uvw(baseline: XyzGeodetic, ha_rad: f64, dec_rad: f64) -> Uvw {
    let (sin_ha, cos_ha) = ha_rad.sin_cos();
    let (sin_dec, cos_dec) = dec_rad.sin_cos();
    Uvw {
        u: sin_ha * baseline.x + cos_ha * baseline.y,
        v: -sin_dec * cos_ha * baseline.x + sin_dec * sin_ha * baseline.y
            + cos_dec * baseline.z,
        w: cos_dec * cos_ha * baseline.x - cos_dec * sin_ha * baseline.y
            + sin_dec * baseline.z,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_epoch_maps_to_known_jd() {
        assert_eq!(unix_to_jd(0.0), 2_440_587.5);
        assert!((unix_to_jd(86_400.0) - 2_440_588.5).abs() < 1e-9);
    }

    #[test]
    fn enh_identity_at_the_pole() {
        // At latitude +90 the north axis maps onto -X and height onto +Z.
        let xyz = enh_to_xyz(0.0, 10.0, 2.0, std::f64::consts::FRAC_PI_2);
        assert!((xyz.x - -10.0).abs() < 1e-9);
        assert!((xyz.z - 2.0).abs() < 1e-9);
    }

    #[test]
    fn jd_maps_to_civil_date() {
        assert_eq!(jd_to_ymd(2_451_545.0), (2000, 1, 1));
        assert_eq!(jd_to_ymd(2_440_587.5), (1970, 1, 1));
    }

    #[test]
    fn gmst_matches_reference_value() {
        // 2000-01-01T12:00:00 UT1 (J2000.0): GMST ~ 18.697374558 h.
        let gmst_h = gmst_rad(2_451_545.0) * 24.0 / TAU;
        assert!((gmst_h - 18.697_374_558).abs() < 1e-4);
    }

    #[test]
    fn zenith_w_equals_baseline_projection() {
        let b = XyzGeodetic {
            x: 0.0,
            y: 100.0,
            z: 0.0,
        };
        // An east-west baseline has no w towards the zenith.
        let uvw = baseline_uvw(b, 0.0, MWA_LAT_RAD);
        assert!((uvw.u - 100.0).abs() < 1e-9);
        assert!(uvw.w.abs() < 1e-9);
    }
}
