//! GPS ↔ local tangent-plane projection.
//!
//! The local frame is a flat-earth approximation around one reference point:
//! `z` grows northward, `x` grows westward (east is negative) and `y` is up.
//! Good for a few kilometres around the reference, no curvature correction.

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::config::METERS_PER_DEGREE;
use crate::error::{Result, ShadowError};

/// Point in the local tangent-plane frame, meters.
pub type LocalPoint = DVec3;

/// Latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Checked constructor; rejects coordinates outside [-90,90]×[-180,180].
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(ShadowError::InvalidCoordinate {
                latitude,
                longitude,
            });
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }
}

impl std::fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.6}, {:.6})", self.latitude, self.longitude)
    }
}

/// Holds the session reference point and converts between frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateProjector {
    reference: Option<GeoPoint>,
    meters_per_degree: f64,
}

impl Default for CoordinateProjector {
    fn default() -> Self {
        Self::new()
    }
}

impl CoordinateProjector {
    pub fn new() -> Self {
        Self::with_meters_per_degree(METERS_PER_DEGREE)
    }

    pub fn with_meters_per_degree(meters_per_degree: f64) -> Self {
        Self {
            reference: None,
            meters_per_degree,
        }
    }

    pub fn with_reference(reference: GeoPoint) -> Self {
        let mut projector = Self::new();
        projector.set_reference(reference);
        projector
    }

    pub fn set_reference(&mut self, reference: GeoPoint) {
        log::info!("reference point set to {reference}");
        self.reference = Some(reference);
    }

    pub fn reference(&self) -> Option<GeoPoint> {
        self.reference
    }

    pub fn meters_per_degree(&self) -> f64 {
        self.meters_per_degree
    }

    /// Meters per degree of latitude and of longitude at the reference.
    fn scales(&self) -> Result<(GeoPoint, f64, f64)> {
        let reference = self.reference.ok_or(ShadowError::ReferenceNotSet)?;
        let per_lat = self.meters_per_degree;
        let per_lon = self.meters_per_degree * reference.latitude.to_radians().cos();
        Ok((reference, per_lat, per_lon))
    }

    /// Horizontal local coordinates `(x, z)` of a GPS point.
    pub fn to_local(&self, point: GeoPoint) -> Result<(f64, f64)> {
        let (reference, per_lat, per_lon) = self.scales()?;
        let z = (point.latitude - reference.latitude) * per_lat;
        let x = -(point.longitude - reference.longitude) * per_lon;
        Ok((x, z))
    }

    /// Local point at height `y` above the datum.
    pub fn to_local_point(&self, point: GeoPoint, y: f64) -> Result<LocalPoint> {
        let (x, z) = self.to_local(point)?;
        Ok(DVec3::new(x, y, z))
    }

    /// Inverse of [`to_local`](Self::to_local).
    pub fn to_geo(&self, x: f64, z: f64) -> Result<GeoPoint> {
        let (reference, per_lat, per_lon) = self.scales()?;
        Ok(GeoPoint {
            latitude: reference.latitude + z / per_lat,
            longitude: reference.longitude - x / per_lon,
        })
    }
}

/// Geographic box around a center, for area requests to map services.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_latitude: f64,
    pub min_longitude: f64,
    pub max_latitude: f64,
    pub max_longitude: f64,
}

impl BoundingBox {
    pub fn around(center: GeoPoint, radius_m: f64, meters_per_degree: f64) -> Self {
        let lat_delta = radius_m / meters_per_degree;
        let lon_delta = radius_m / (meters_per_degree * center.latitude.to_radians().cos());
        Self {
            min_latitude: center.latitude - lat_delta,
            min_longitude: center.longitude - lon_delta,
            max_latitude: center.latitude + lat_delta,
            max_longitude: center.longitude + lon_delta,
        }
    }

    pub fn contains(&self, point: GeoPoint) -> bool {
        (self.min_latitude..=self.max_latitude).contains(&point.latitude)
            && (self.min_longitude..=self.max_longitude).contains(&point.longitude)
    }
}

// ── PyO3 wrappers ──────────────────────────────────────────────────────────

#[cfg(feature = "python")]
pub(crate) mod py {
    use pyo3::prelude::*;

    use super::{CoordinateProjector, GeoPoint};

    /// Local `(x, z)` meters of a GPS point relative to a reference point.
    #[pyfunction]
    pub fn to_local(
        latitude: f64,
        longitude: f64,
        reference_latitude: f64,
        reference_longitude: f64,
    ) -> PyResult<(f64, f64)> {
        let reference = GeoPoint::new(reference_latitude, reference_longitude)?;
        let point = GeoPoint::new(latitude, longitude)?;
        Ok(CoordinateProjector::with_reference(reference).to_local(point)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_projecting_without_reference_fails() {
        let projector = CoordinateProjector::new();
        let err = projector
            .to_local(GeoPoint {
                latitude: 1.0,
                longitude: 2.0,
            })
            .unwrap_err();
        assert_eq!(err, ShadowError::ReferenceNotSet);
        assert!(projector.to_geo(0.0, 0.0).is_err());
    }

    #[test]
    fn test_axes_orientation() {
        let reference = GeoPoint::new(48.0, 11.0).unwrap();
        let projector = CoordinateProjector::with_reference(reference);

        let (x, z) = projector.to_local(reference).unwrap();
        assert_eq!((x, z), (0.0, 0.0));

        let north = GeoPoint::new(48.001, 11.0).unwrap();
        let (x, z) = projector.to_local(north).unwrap();
        assert!(x.abs() < 1e-9);
        assert!((z - 111.0).abs() < 1e-6, "z = {z}");

        let east = GeoPoint::new(48.0, 11.001).unwrap();
        let (x, z) = projector.to_local(east).unwrap();
        assert!(z.abs() < 1e-9);
        let expected = -111.0 * 48f64.to_radians().cos();
        assert!((x - expected).abs() < 1e-6, "x = {x}");
    }

    #[test]
    fn test_round_trip_within_a_centimetre() {
        let reference = GeoPoint::new(45.0, 7.5).unwrap();
        let projector = CoordinateProjector::with_reference(reference);
        for &(dlat, dlon) in &[(0.015, 0.02), (-0.012, 0.005), (0.0, -0.025), (0.017, -0.017)] {
            let point = GeoPoint::new(45.0 + dlat, 7.5 + dlon).unwrap();
            let (x, z) = projector.to_local(point).unwrap();
            assert!(x.hypot(z) < 2_500.0);
            let back = projector.to_geo(x, z).unwrap();
            let err_north = (back.latitude - point.latitude) * METERS_PER_DEGREE;
            let err_east = (back.longitude - point.longitude) * METERS_PER_DEGREE;
            assert!(err_north.abs() < 0.01 && err_east.abs() < 0.01);
        }
    }

    #[test]
    fn test_checked_constructor_rejects_out_of_range() {
        assert!(GeoPoint::new(90.5, 0.0).is_err());
        assert!(GeoPoint::new(0.0, -180.5).is_err());
        assert!(GeoPoint::new(-90.0, 180.0).is_ok());
    }

    #[test]
    fn test_bounding_box_around_center() {
        let center = GeoPoint::new(60.0, 10.0).unwrap();
        let bbox = BoundingBox::around(center, 1_110.0, METERS_PER_DEGREE);
        assert!((bbox.max_latitude - 60.01).abs() < 1e-9);
        // Longitude degrees are half as long at 60°, so the box is twice as wide.
        assert!((bbox.max_longitude - 10.02).abs() < 1e-9);
        assert!(bbox.contains(center));
        assert!(!bbox.contains(GeoPoint::new(60.02, 10.0).unwrap()));
    }
}
