//! Shadow engine session: reference point, terrain, buildings and the
//! frozen mesh set behind one handle.
//!
//! Loads rebuild the mesh set off to the side and swap the `Arc` in one
//! step; queries clone the current `Arc` and run without holding any lock,
//! so an in-flight query always finishes against the set it started with.

use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::building::Building;
use crate::config::EngineConfig;
use crate::error::{Result, ShadowError};
use crate::geo::{BoundingBox, CoordinateProjector, GeoPoint, LocalPoint};
use crate::mesh::{build_mesh_set_with, MeshSet};
use crate::shadowing::{analyse_points, grid_points, GridAnalysis, ShadowQuery, ShadowResult};
use crate::sun::{sun_position, SunPosition};
use crate::terrain::{TerrainGrid, TerrainSampler, TerrainToken};

const NIGHT_MESSAGE: &str = "Sun is below horizon (nighttime)";
const NO_BUILDINGS_MESSAGE: &str = "No buildings found in area";

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Outcome of a GPS + time shadow query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowReport {
    pub is_shadowed: bool,
    pub sun: SunPosition,
    pub blocking_building: Option<String>,
    pub location: GeoPoint,
    pub instant: DateTime<Utc>,
    /// Set when the answer did not come from ray casting.
    pub message: Option<String>,
}

pub struct ShadowEngine {
    config: EngineConfig,
    projector: RwLock<CoordinateProjector>,
    terrain: RwLock<TerrainSampler>,
    buildings: RwLock<Arc<Vec<Building>>>,
    meshes: RwLock<Arc<MeshSet>>,
    // Serialises rebuilds so swaps land in load order.
    rebuild_lock: Mutex<()>,
}

impl Default for ShadowEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl ShadowEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            projector: RwLock::new(CoordinateProjector::with_meters_per_degree(
                config.meters_per_degree,
            )),
            terrain: RwLock::new(TerrainSampler::with_config(&config)),
            buildings: RwLock::new(Arc::new(Vec::new())),
            meshes: RwLock::new(Arc::new(MeshSet::empty())),
            rebuild_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Moves the local frame. Terrain lookups follow and loaded buildings
    /// are re-extruded in the new frame.
    pub fn set_reference(&self, reference: GeoPoint) {
        write(&self.projector).set_reference(reference);
        write(&self.terrain).rebind(reference);
        if !read(&self.buildings).is_empty() {
            self.rebuild();
        }
    }

    pub fn reference(&self) -> Option<GeoPoint> {
        read(&self.projector).reference()
    }

    pub fn projector(&self) -> CoordinateProjector {
        *read(&self.projector)
    }

    /// Replaces the terrain grid and rebuilds the mesh set on it. Without a
    /// reference point the grid center becomes the reference.
    pub fn load_terrain(&self, grid: TerrainGrid) -> TerrainToken {
        if self.reference().is_none() {
            let center = grid.center;
            write(&self.projector).set_reference(center);
            write(&self.terrain).rebind(center);
        }
        let token = write(&self.terrain).load(grid);
        if !read(&self.buildings).is_empty() {
            self.rebuild();
        }
        token
    }

    pub fn clear_terrain(&self) {
        write(&self.terrain).clear();
        if !read(&self.buildings).is_empty() {
            self.rebuild();
        }
    }

    /// Map-data request box of `radius_m` around the reference.
    pub fn bounding_box(&self, radius_m: f64) -> Result<BoundingBox> {
        let reference = self.reference().ok_or(ShadowError::ReferenceNotSet)?;
        Ok(BoundingBox::around(
            reference,
            radius_m,
            self.config.meters_per_degree,
        ))
    }

    /// Locations to request from an elevation service for a square grid
    /// around the reference, row-major from the south-west corner.
    pub fn terrain_sample_locations(
        &self,
        radius_m: f64,
        resolution: usize,
    ) -> Result<Vec<GeoPoint>> {
        let reference = self.reference().ok_or(ShadowError::ReferenceNotSet)?;
        Ok(TerrainGrid::sample_locations(
            reference,
            radius_m,
            resolution,
            self.config.meters_per_degree,
        ))
    }

    /// Loads elevations fetched for [`terrain_sample_locations`](Self::terrain_sample_locations).
    pub fn load_terrain_samples(
        &self,
        radius_m: f64,
        resolution: usize,
        samples: Vec<f64>,
    ) -> Result<TerrainToken> {
        let reference = self.reference().ok_or(ShadowError::ReferenceNotSet)?;
        let grid = TerrainGrid::around(
            reference,
            radius_m,
            resolution,
            self.config.meters_per_degree,
            samples,
        )?;
        Ok(self.load_terrain(grid))
    }

    pub fn terrain_token(&self) -> TerrainToken {
        read(&self.terrain).token()
    }

    /// Terrain elevation at local `(x, z)`, 0 m where no grid covers it.
    pub fn elevation_at(&self, x: f64, z: f64) -> f64 {
        read(&self.terrain).elevation_at(x, z)
    }

    pub fn elevation_at_checked(&self, token: TerrainToken, x: f64, z: f64) -> Result<f64> {
        read(&self.terrain).elevation_at_checked(token, x, z)
    }

    /// Replaces the building list and swaps in its mesh set.
    pub fn load_buildings(&self, buildings: Vec<Building>) -> Result<Arc<MeshSet>> {
        if self.reference().is_none() {
            return Err(ShadowError::ReferenceNotSet);
        }
        *write(&self.buildings) = Arc::new(buildings);
        Ok(self.rebuild())
    }

    pub fn buildings(&self) -> Arc<Vec<Building>> {
        Arc::clone(&read(&self.buildings))
    }

    /// Snapshot of the current mesh set.
    pub fn mesh_set(&self) -> Arc<MeshSet> {
        Arc::clone(&read(&self.meshes))
    }

    /// True when the mesh set was built on the terrain currently loaded.
    pub fn is_current(&self) -> bool {
        let terrain = read(&self.terrain);
        let built_on = self.mesh_set().terrain_generation();
        if terrain.is_loaded() {
            built_on == Some(terrain.generation())
        } else {
            built_on.is_none()
        }
    }

    fn rebuild(&self) -> Arc<MeshSet> {
        let _guard = self
            .rebuild_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let projector = self.projector();
        let buildings = self.buildings();
        let set = {
            let terrain = read(&self.terrain);
            let terrain = terrain.is_loaded().then_some(&*terrain);
            Arc::new(build_mesh_set_with(&buildings, &projector, terrain))
        };
        *write(&self.meshes) = Arc::clone(&set);
        set
    }

    fn query_template(
        &self,
        origin: LocalPoint,
        sun_direction: DVec3,
        max_distance: f64,
    ) -> ShadowQuery {
        ShadowQuery::new(origin, sun_direction, max_distance)
            .with_origin_offset(self.config.ray_origin_offset)
    }

    /// Shadow test of a local point; `max_distance` defaults to the configured bound.
    pub fn query_local(
        &self,
        point: LocalPoint,
        sun_direction: DVec3,
        max_distance: Option<f64>,
    ) -> ShadowResult {
        let meshes = self.mesh_set();
        let max_distance = max_distance.unwrap_or(self.config.max_ray_distance);
        self.query_template(point, sun_direction, max_distance)
            .run(&meshes)
    }

    pub fn query_grid(
        &self,
        center: LocalPoint,
        grid_size: usize,
        spacing: f64,
        sun_direction: DVec3,
    ) -> GridAnalysis {
        let meshes = self.mesh_set();
        let template = self.query_template(center, sun_direction, self.config.max_ray_distance);
        analyse_points(grid_points(center, grid_size, spacing), &template, &meshes)
    }

    /// Is a person standing at `location` in shadow at `instant`?
    pub fn query_at(&self, location: GeoPoint, instant: DateTime<Utc>) -> Result<ShadowReport> {
        let sun = sun_position(location.latitude, location.longitude, &instant);
        let report = |is_shadowed: bool,
                      blocking_building: Option<String>,
                      message: Option<&str>| ShadowReport {
            is_shadowed,
            sun,
            blocking_building,
            location,
            instant,
            message: message.map(str::to_string),
        };

        if sun.elevation < 0.0 {
            return Ok(report(true, None, Some(NIGHT_MESSAGE)));
        }
        let meshes = self.mesh_set();
        if meshes.is_empty() {
            return Ok(report(false, None, Some(NO_BUILDINGS_MESSAGE)));
        }

        let (x, z) = self.projector().to_local(location)?;
        let y = read(&self.terrain).elevation_at_geo(location) + self.config.observer_height;
        let result = self
            .query_template(DVec3::new(x, y, z), sun.direction(), self.config.max_ray_distance)
            .run(&meshes);
        log::info!(
            "shadow query at {location}: sun az {:.1}° el {:.1}°, shadowed = {}",
            sun.azimuth,
            sun.elevation,
            result.is_shadowed
        );
        Ok(report(result.is_shadowed, result.blocking_building, None))
    }
}

// ── PyO3 wrappers ──────────────────────────────────────────────────────────

#[cfg(feature = "python")]
pub(crate) mod py {
    use std::sync::Arc;

    use numpy::PyReadonlyArray2;
    use pyo3::prelude::*;
    use pyo3::types::PyDict;

    use super::ShadowEngine;
    use crate::building::Building;
    use crate::config::EngineConfig;
    use crate::geo::GeoPoint;
    use crate::sun::py::parse_instant;
    use crate::terrain::TerrainGrid;

    /// Stateful shadow session: reference point, terrain and buildings.
    #[pyclass(name = "ShadowEngine")]
    pub struct PyShadowEngine {
        pub(crate) inner: Arc<ShadowEngine>,
    }

    #[pymethods]
    impl PyShadowEngine {
        #[new]
        #[pyo3(signature = (observer_height=None, max_ray_distance=None, ray_origin_offset=None))]
        pub fn new(
            observer_height: Option<f64>,
            max_ray_distance: Option<f64>,
            ray_origin_offset: Option<f64>,
        ) -> Self {
            let defaults = EngineConfig::default();
            let config = EngineConfig {
                observer_height: observer_height.unwrap_or(defaults.observer_height),
                max_ray_distance: max_ray_distance.unwrap_or(defaults.max_ray_distance),
                ray_origin_offset: ray_origin_offset.unwrap_or(defaults.ray_origin_offset),
                ..defaults
            };
            Self {
                inner: Arc::new(ShadowEngine::new(config)),
            }
        }

        pub fn set_reference(&self, latitude: f64, longitude: f64) -> PyResult<()> {
            self.inner.set_reference(GeoPoint::new(latitude, longitude)?);
            Ok(())
        }

        pub fn reference(&self) -> Option<(f64, f64)> {
            self.inner
                .reference()
                .map(|r| (r.latitude, r.longitude))
        }

        /// Loads buildings as `(id, [(lat, lon), ...], height_m)` tuples.
        ///
        /// Returns the number of meshes built.
        pub fn load_buildings(
            &self,
            py: Python<'_>,
            buildings: Vec<(String, Vec<(f64, f64)>, f64)>,
        ) -> PyResult<usize> {
            let records = buildings
                .into_iter()
                .map(|(id, ring, height)| {
                    let footprint = ring
                        .into_iter()
                        .map(|(lat, lon)| GeoPoint::new(lat, lon))
                        .collect::<crate::error::Result<Vec<_>>>()?;
                    Ok(Building::new(id, footprint, height))
                })
                .collect::<PyResult<Vec<_>>>()?;
            let engine = Arc::clone(&self.inner);
            let set = py.allow_threads(move || engine.load_buildings(records))?;
            Ok(set.len())
        }

        /// Loads an elevation grid (rows south→north, cols west→east).
        pub fn load_terrain(
            &self,
            center_latitude: f64,
            center_longitude: f64,
            lat_spacing: f64,
            lon_spacing: f64,
            elevations: PyReadonlyArray2<'_, f64>,
        ) -> PyResult<u64> {
            let center = GeoPoint::new(center_latitude, center_longitude)?;
            let grid = TerrainGrid::new(
                center,
                lat_spacing,
                lon_spacing,
                elevations.as_array().to_owned(),
            )?;
            Ok(self.inner.load_terrain(grid).generation())
        }

        pub fn elevation_at(&self, x: f64, z: f64) -> f64 {
            self.inner.elevation_at(x, z)
        }

        pub fn mesh_count(&self) -> usize {
            self.inner.mesh_set().len()
        }

        /// Shadow status at a GPS location and ISO 8601 time (defaults to now).
        #[pyo3(signature = (latitude, longitude, timestamp=None))]
        pub fn query_at<'py>(
            &self,
            py: Python<'py>,
            latitude: f64,
            longitude: f64,
            timestamp: Option<&str>,
        ) -> PyResult<Bound<'py, PyDict>> {
            let location = GeoPoint::new(latitude, longitude)?;
            let instant = parse_instant(timestamp)?;
            let report = self.inner.query_at(location, instant)?;

            let out = PyDict::new(py);
            out.set_item("is_shadowed", report.is_shadowed)?;
            out.set_item("sun_azimuth", report.sun.azimuth)?;
            out.set_item("sun_elevation", report.sun.elevation)?;
            out.set_item("blocking_building", report.blocking_building)?;
            out.set_item("latitude", report.location.latitude)?;
            out.set_item("longitude", report.location.longitude)?;
            out.set_item("timestamp", report.instant.to_rfc3339())?;
            out.set_item("message", report.message)?;
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sun::sun_direction_vector;
    use chrono::TimeZone;
    use ndarray::Array2;

    fn reference() -> GeoPoint {
        GeoPoint::new(48.0, 0.0).unwrap()
    }

    /// 10 m × 10 m footprint centered on the reference point.
    fn tower(id: &str, height: f64) -> Building {
        let r = reference();
        let half_lat = 5.0 / 111_000.0;
        let half_lon = 5.0 / (111_000.0 * r.latitude.to_radians().cos());
        Building::new(
            id,
            vec![
                GeoPoint::new(r.latitude - half_lat, r.longitude - half_lon).unwrap(),
                GeoPoint::new(r.latitude - half_lat, r.longitude + half_lon).unwrap(),
                GeoPoint::new(r.latitude + half_lat, r.longitude + half_lon).unwrap(),
                GeoPoint::new(r.latitude + half_lat, r.longitude - half_lon).unwrap(),
            ],
            height,
        )
    }

    fn engine_with_tower() -> ShadowEngine {
        let engine = ShadowEngine::default();
        engine.set_reference(reference());
        engine.load_buildings(vec![tower("way/1", 20.0)]).unwrap();
        engine
    }

    fn north_of_reference(meters: f64) -> GeoPoint {
        GeoPoint::new(reference().latitude + meters / 111_000.0, 0.0).unwrap()
    }

    #[test]
    fn test_point_north_of_building_is_shadowed() {
        let engine = engine_with_tower();
        let sun = sun_direction_vector(180.0, 30.0);
        // 5 m north of the north wall, at ground level.
        let result = engine.query_local(DVec3::new(0.0, 0.0, 10.0), sun, None);
        assert!(result.is_shadowed);
        assert_eq!(result.blocking_building.as_deref(), Some("way/1"));
    }

    #[test]
    fn test_search_bound_stops_short_of_building() {
        let engine = engine_with_tower();
        let sun = sun_direction_vector(180.0, 30.0);
        let result = engine.query_local(DVec3::new(0.0, 0.0, 205.0), sun, Some(50.0));
        assert!(!result.is_shadowed);
        assert_eq!(result.blocking_building, None);
    }

    #[test]
    fn test_loading_buildings_needs_reference() {
        let engine = ShadowEngine::default();
        let err = engine.load_buildings(vec![tower("way/1", 20.0)]).unwrap_err();
        assert_eq!(err, ShadowError::ReferenceNotSet);
        assert!(engine.mesh_set().is_empty());
    }

    #[test]
    fn test_query_at_night() {
        let engine = engine_with_tower();
        let midnight = Utc.with_ymd_and_hms(2021, 12, 21, 0, 0, 0).unwrap();
        let report = engine.query_at(north_of_reference(10.0), midnight).unwrap();
        assert!(report.is_shadowed);
        assert_eq!(report.blocking_building, None);
        assert_eq!(report.message.as_deref(), Some(NIGHT_MESSAGE));
        assert!(report.sun.elevation < 0.0);
    }

    #[test]
    fn test_query_at_without_buildings() {
        let engine = ShadowEngine::default();
        let noon = Utc.with_ymd_and_hms(2021, 12, 21, 12, 0, 0).unwrap();
        let report = engine.query_at(reference(), noon).unwrap();
        assert!(!report.is_shadowed);
        assert_eq!(report.message.as_deref(), Some(NO_BUILDINGS_MESSAGE));
    }

    #[test]
    fn test_query_at_winter_noon() {
        // Sun due south at about 18.6°; the tower's shadow reaches ~60 m north.
        let engine = engine_with_tower();
        let noon = Utc.with_ymd_and_hms(2021, 12, 21, 12, 0, 0).unwrap();

        let near = engine.query_at(north_of_reference(10.0), noon).unwrap();
        assert!(near.is_shadowed);
        assert_eq!(near.blocking_building.as_deref(), Some("way/1"));
        assert_eq!(near.message, None);

        let far = engine.query_at(north_of_reference(100.0), noon).unwrap();
        assert!(!far.is_shadowed);

        let south = engine.query_at(north_of_reference(-10.0), noon).unwrap();
        assert!(!south.is_shadowed);
    }

    #[test]
    fn test_terrain_load_rebuilds_mesh_set() {
        let engine = engine_with_tower();
        let before = engine.mesh_set();
        assert!(engine.is_current());

        let grid = TerrainGrid::new(
            reference(),
            0.0001,
            0.0001,
            Array2::from_elem((21, 21), 50.0),
        )
        .unwrap();
        let token = engine.load_terrain(grid);
        let after = engine.mesh_set();

        // The old snapshot is untouched.
        assert_eq!(before.meshes()[0].base_elevation, 0.0);
        assert!((after.meshes()[0].base_elevation - 50.0).abs() < 1e-9);
        assert_eq!(after.terrain_generation(), Some(token.generation()));
        assert!(engine.is_current());
        assert_eq!(engine.elevation_at_checked(token, 0.0, 0.0), Ok(50.0));

        // Observer stands on the terrain, so the tower still shades it.
        let noon = Utc.with_ymd_and_hms(2021, 12, 21, 12, 0, 0).unwrap();
        let report = engine.query_at(north_of_reference(10.0), noon).unwrap();
        assert!(report.is_shadowed);

        engine.clear_terrain();
        assert!(engine.elevation_at_checked(token, 0.0, 0.0).is_err());
        assert_eq!(engine.mesh_set().meshes()[0].base_elevation, 0.0);
    }

    #[test]
    fn test_terrain_without_reference_adopts_grid_center() {
        let engine = ShadowEngine::default();
        let center = GeoPoint::new(46.5, 7.0).unwrap();
        let grid = TerrainGrid::new(center, 0.001, 0.001, Array2::zeros((3, 3))).unwrap();
        engine.load_terrain(grid);
        assert_eq!(engine.reference(), Some(center));
    }

    #[test]
    fn test_grid_uses_current_mesh_set() {
        let engine = engine_with_tower();
        let sun = sun_direction_vector(180.0, 30.0);
        let grid = engine.query_grid(DVec3::new(0.0, 0.0, 20.0), 5, 10.0, sun);
        assert_eq!(grid.samples.len(), 25);
        let expected = grid.shadowed_count as f64 / 25.0 * 100.0;
        assert!((grid.coverage_percent - expected).abs() < 1e-9);
        assert!(grid.shadowed_count > 0);
    }

    #[test]
    fn test_queries_run_while_reloading() {
        let engine = engine_with_tower();
        let sun = sun_direction_vector(180.0, 30.0);
        std::thread::scope(|s| {
            s.spawn(|| {
                for i in 0..10 {
                    engine
                        .load_buildings(vec![tower(&format!("way/{i}"), 20.0)])
                        .unwrap();
                }
            });
            for _ in 0..50 {
                let result = engine.query_local(DVec3::new(0.0, 0.0, 10.0), sun, None);
                // Every snapshot holds exactly one tower.
                assert!(result.is_shadowed);
                assert!(result.blocking_building.is_some());
            }
        });
        assert_eq!(engine.mesh_set().meshes()[0].building_id, "way/9");
    }

    #[test]
    fn test_configured_degree_length_reaches_terrain() {
        let config = EngineConfig {
            meters_per_degree: 100_000.0,
            ..EngineConfig::default()
        };
        let engine = ShadowEngine::new(config);
        engine.set_reference(reference());
        // Rows every 0.0005°, each sample holding its row index.
        let samples = Array2::from_shape_fn((41, 3), |(row, _)| row as f64);
        engine.load_terrain(TerrainGrid::new(reference(), 0.0005, 0.001, samples).unwrap());

        let target = GeoPoint::new(48.008, 0.0).unwrap();
        let (x, z) = engine.projector().to_local(target).unwrap();
        assert!((z - 800.0).abs() < 1e-6, "z = {z}");
        assert_eq!(engine.elevation_at(x, z), 36.0);
    }

    #[test]
    fn test_area_requests_use_configured_scale() {
        let config = EngineConfig {
            meters_per_degree: 100_000.0,
            ..EngineConfig::default()
        };
        let engine = ShadowEngine::new(config);
        assert_eq!(engine.bounding_box(500.0), Err(ShadowError::ReferenceNotSet));
        engine.set_reference(reference());

        let bbox = engine.bounding_box(500.0).unwrap();
        assert!((bbox.max_latitude - 48.005).abs() < 1e-9);

        let locations = engine.terrain_sample_locations(500.0, 3).unwrap();
        assert_eq!(locations.len(), 9);
        assert!((locations[0].latitude - 47.995).abs() < 1e-9);
        assert!((locations[8].latitude - 48.005).abs() < 1e-9);

        let samples = (0..9).map(|v| v as f64).collect();
        let token = engine.load_terrain_samples(500.0, 3, samples).unwrap();
        // Sample 5 is the middle row, east column; east is -x.
        let east = engine.projector().to_local(locations[5]).unwrap();
        assert_eq!(engine.elevation_at_checked(token, east.0, east.1), Ok(5.0));
    }

    #[test]
    fn test_report_serialises() {
        let engine = engine_with_tower();
        let noon = Utc.with_ymd_and_hms(2021, 12, 21, 12, 0, 0).unwrap();
        let report = engine.query_at(north_of_reference(10.0), noon).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["is_shadowed"], true);
        assert_eq!(json["blocking_building"], "way/1");
        assert_eq!(json["instant"], "2021-12-21T12:00:00Z");
    }
}
