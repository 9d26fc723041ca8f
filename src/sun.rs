//! Low-precision solar ephemeris.
//!
//! Mean-longitude / mean-anomaly model of the apparent sun, good to roughly
//! 0.1° over several decades around J2000.0. Distance is fixed at 1 AU.

use chrono::{DateTime, Datelike, Timelike, Utc};
use glam::DVec3;
use serde::{Deserialize, Serialize};

const J2000: f64 = 2_451_545.0;
const DAYS_PER_CENTURY: f64 = 36_525.0;

/// Sun position in horizontal coordinates as seen by an observer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SunPosition {
    /// Degrees clockwise from north (0 = N, 90 = E, 180 = S, 270 = W).
    pub azimuth: f64,
    /// Degrees above the horizon; negative below it.
    pub elevation: f64,
    /// Astronomical units.
    pub distance: f64,
}

impl SunPosition {
    pub fn is_above_horizon(&self) -> bool {
        self.elevation > 0.0
    }

    /// Light direction, pointing from the sun toward the ground.
    pub fn direction(&self) -> DVec3 {
        sun_direction_vector(self.azimuth, self.elevation)
    }

    /// Unit vector from a ground point toward the sun.
    pub fn toward_sun(&self) -> DVec3 {
        -self.direction()
    }
}

/// Julian Date of a UTC instant (Fliegel–Van Flandern day number plus day fraction).
pub fn julian_date(instant: &DateTime<Utc>) -> f64 {
    let month = instant.month() as i64;
    let a = (14 - month) / 12;
    let y = instant.year() as i64 + 4800 - a;
    let m = month + 12 * a - 3;

    let jdn = instant.day() as i64 + (153 * m + 2) / 5 + 365 * y + y / 4 - y / 100 + y / 400
        - 32045;

    let seconds = instant.second() as f64 + instant.nanosecond() as f64 * 1e-9;
    jdn as f64
        + (instant.hour() as f64 - 12.0) / 24.0
        + instant.minute() as f64 / 1440.0
        + seconds / 86_400.0
}

/// Greenwich mean sidereal time in degrees, [0, 360).
fn greenwich_sidereal_deg(jd: f64) -> f64 {
    let t = (jd - J2000) / DAYS_PER_CENTURY;
    (280.460_618_37 + 360.985_647_366_29 * (jd - J2000) + 0.000_387_933 * t * t
        - t * t * t / 38_710_000.0)
        .rem_euclid(360.0)
}

/// Sun azimuth/elevation for an observer at (`latitude`, `longitude`) degrees.
///
/// Total over its domain; range checking of the coordinates is left to the caller.
pub fn sun_position(latitude: f64, longitude: f64, instant: &DateTime<Utc>) -> SunPosition {
    let jd = julian_date(instant);
    let t = (jd - J2000) / DAYS_PER_CENTURY;

    let mean_longitude = (280.460 + 36_000.771 * t).rem_euclid(360.0);
    let mean_anomaly = (357.528 + 35_999.050 * t).rem_euclid(360.0).to_radians();

    let ecliptic_longitude = (mean_longitude
        + 1.915 * mean_anomaly.sin()
        + 0.020 * (2.0 * mean_anomaly).sin())
    .rem_euclid(360.0)
    .to_radians();
    let obliquity = (23.439 - 0.013 * t).to_radians();

    let right_ascension = f64::atan2(
        obliquity.cos() * ecliptic_longitude.sin(),
        ecliptic_longitude.cos(),
    );
    let declination = (obliquity.sin() * ecliptic_longitude.sin())
        .clamp(-1.0, 1.0)
        .asin();

    let local_sidereal = (greenwich_sidereal_deg(jd) + longitude)
        .rem_euclid(360.0)
        .to_radians();
    let hour_angle = local_sidereal - right_ascension;

    let lat = latitude.to_radians();
    let sin_elevation = (lat.sin() * declination.sin()
        + lat.cos() * declination.cos() * hour_angle.cos())
    .clamp(-1.0, 1.0);
    let elevation = sin_elevation.asin();

    let denom = lat.cos() * elevation.cos();
    let cos_azimuth = if denom.abs() < 1e-12 {
        // Sun at the zenith or observer at a pole: azimuth is undefined, report north.
        1.0
    } else {
        ((declination.sin() - lat.sin() * sin_elevation) / denom).clamp(-1.0, 1.0)
    };
    let mut azimuth = cos_azimuth.acos().to_degrees();
    if hour_angle.sin() > 0.0 {
        azimuth = 360.0 - azimuth;
    }

    log::debug!(
        "sun at ({latitude:.5}, {longitude:.5}) {instant}: az={azimuth:.2}°, el={:.2}°",
        elevation.to_degrees()
    );

    SunPosition {
        azimuth,
        elevation: elevation.to_degrees(),
        distance: 1.0,
    }
}

/// Unit vector pointing FROM the sun TOWARD the ground, in the local frame
/// (y up, z north, x west).
pub fn sun_direction_vector(azimuth_deg: f64, elevation_deg: f64) -> DVec3 {
    let az = azimuth_deg.to_radians();
    let el = elevation_deg.to_radians();
    DVec3::new(el.cos() * az.sin(), -el.sin(), -el.cos() * az.cos())
}

// ── PyO3 wrappers ──────────────────────────────────────────────────────────

#[cfg(feature = "python")]
pub(crate) mod py {
    use chrono::{DateTime, Utc};
    use pyo3::exceptions::PyValueError;
    use pyo3::prelude::*;

    pub(crate) fn parse_instant(timestamp: Option<&str>) -> PyResult<DateTime<Utc>> {
        match timestamp {
            None => Ok(Utc::now()),
            Some(ts) => DateTime::parse_from_rfc3339(ts)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| PyValueError::new_err(format!("invalid timestamp {ts:?}: {e}"))),
        }
    }

    /// Sun position for a location and ISO 8601 timestamp (defaults to now).
    ///
    /// Returns:
    ///     (azimuth_deg, elevation_deg, distance_au)
    #[pyfunction]
    #[pyo3(signature = (latitude, longitude, timestamp=None))]
    pub fn sun_position(
        latitude: f64,
        longitude: f64,
        timestamp: Option<&str>,
    ) -> PyResult<(f64, f64, f64)> {
        let instant = parse_instant(timestamp)?;
        let pos = super::sun_position(latitude, longitude, &instant);
        Ok((pos.azimuth, pos.elevation, pos.distance))
    }

    /// Light direction (sun → ground) for an azimuth/elevation pair in degrees.
    #[pyfunction]
    pub fn sun_direction_vector(azimuth: f64, elevation: f64) -> (f64, f64, f64) {
        let d = super::sun_direction_vector(azimuth, elevation);
        (d.x, d.y, d.z)
    }
}
