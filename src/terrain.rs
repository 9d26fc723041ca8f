//! Terrain elevation grid and nearest-sample lookup.
//!
//! The grid is a regular lattice in latitude/longitude: row `i` runs south to
//! north, column `j` west to east, and the lattice is centered on
//! `TerrainGrid::center`. Lookups take local `(x, z)` meters, reverse-project
//! them to GPS with the sampler's own reference, and return the nearest
//! stored sample. Queries off the grid answer 0 m with a rate-limited warning.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ndarray::Array2;
use ndarray_stats::QuantileExt;

use crate::config::{EngineConfig, TERRAIN_WARNING_LIMIT};
use crate::error::{Result, ShadowError};
use crate::geo::{CoordinateProjector, GeoPoint};

/// Elevation samples (meters) plus their georeferencing.
#[derive(Debug, Clone, PartialEq)]
pub struct TerrainGrid {
    pub center: GeoPoint,
    /// Degrees of latitude between rows.
    pub lat_spacing: f64,
    /// Degrees of longitude between columns.
    pub lon_spacing: f64,
    pub elevations: Array2<f64>,
}

impl TerrainGrid {
    pub fn new(
        center: GeoPoint,
        lat_spacing: f64,
        lon_spacing: f64,
        elevations: Array2<f64>,
    ) -> Result<Self> {
        if !(lat_spacing.is_finite() && lat_spacing > 0.0)
            || !(lon_spacing.is_finite() && lon_spacing > 0.0)
        {
            return Err(ShadowError::InvalidTerrainGrid(format!(
                "spacing must be positive, got ({lat_spacing}, {lon_spacing})"
            )));
        }
        if elevations.is_empty() {
            return Err(ShadowError::InvalidTerrainGrid("grid has no samples".into()));
        }
        Ok(Self {
            center,
            lat_spacing,
            lon_spacing,
            elevations,
        })
    }

    /// Builds a grid from a row-major sample vector of `rows × cols` values.
    pub fn from_samples(
        center: GeoPoint,
        lat_spacing: f64,
        lon_spacing: f64,
        rows: usize,
        cols: usize,
        samples: Vec<f64>,
    ) -> Result<Self> {
        let len = samples.len();
        let elevations = Array2::from_shape_vec((rows, cols), samples).map_err(|_| {
            ShadowError::InvalidTerrainGrid(format!(
                "{len} samples do not fill a {rows}x{cols} grid"
            ))
        })?;
        Self::new(center, lat_spacing, lon_spacing, elevations)
    }

    /// Angular spacing of a `resolution × resolution` lattice spanning `radius_m` each way.
    pub fn spacing_for_radius(
        center: GeoPoint,
        radius_m: f64,
        resolution: usize,
        meters_per_degree: f64,
    ) -> (f64, f64) {
        let steps = resolution.saturating_sub(1).max(1) as f64;
        let lat_extent = radius_m / meters_per_degree;
        let lon_extent = radius_m / (meters_per_degree * center.latitude.to_radians().cos());
        (2.0 * lat_extent / steps, 2.0 * lon_extent / steps)
    }

    /// Square grid covering `radius_m` around `center`, filled from row-major samples.
    pub fn around(
        center: GeoPoint,
        radius_m: f64,
        resolution: usize,
        meters_per_degree: f64,
        samples: Vec<f64>,
    ) -> Result<Self> {
        if resolution < 2 {
            return Err(ShadowError::InvalidTerrainGrid(format!(
                "resolution must be at least 2, got {resolution}"
            )));
        }
        let (lat_spacing, lon_spacing) =
            Self::spacing_for_radius(center, radius_m, resolution, meters_per_degree);
        Self::from_samples(center, lat_spacing, lon_spacing, resolution, resolution, samples)
    }

    /// Points an elevation service must be asked for to fill [`around`](Self::around),
    /// row-major from the south-west corner.
    pub fn sample_locations(
        center: GeoPoint,
        radius_m: f64,
        resolution: usize,
        meters_per_degree: f64,
    ) -> Vec<GeoPoint> {
        let (lat_spacing, lon_spacing) =
            Self::spacing_for_radius(center, radius_m, resolution, meters_per_degree);
        let half = resolution.saturating_sub(1) as f64 / 2.0;
        let lat_min = center.latitude - lat_spacing * half;
        let lon_min = center.longitude - lon_spacing * half;
        (0..resolution)
            .flat_map(|i| {
                (0..resolution).map(move |j| GeoPoint {
                    latitude: lat_min + i as f64 * lat_spacing,
                    longitude: lon_min + j as f64 * lon_spacing,
                })
            })
            .collect()
    }

    pub fn dim(&self) -> (usize, usize) {
        self.elevations.dim()
    }

    /// GPS position of sample `[0, 0]`.
    pub fn south_west_corner(&self) -> GeoPoint {
        let (rows, cols) = self.dim();
        GeoPoint {
            latitude: self.center.latitude - self.lat_spacing * (rows - 1) as f64 / 2.0,
            longitude: self.center.longitude - self.lon_spacing * (cols - 1) as f64 / 2.0,
        }
    }

    /// Nearest sample index for a GPS point, or `None` off the grid.
    pub fn nearest_index(&self, point: GeoPoint) -> Option<(usize, usize)> {
        let corner = self.south_west_corner();
        let row = ((point.latitude - corner.latitude) / self.lat_spacing).round();
        let col = ((point.longitude - corner.longitude) / self.lon_spacing).round();
        let (rows, cols) = self.dim();
        if !row.is_finite() || !col.is_finite() {
            return None;
        }
        if row < 0.0 || col < 0.0 || row >= rows as f64 || col >= cols as f64 {
            return None;
        }
        Some((row as usize, col as usize))
    }
}

/// Identifies one load of a [`TerrainSampler`]; invalidated by the next load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TerrainToken {
    generation: u64,
}

impl TerrainToken {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug)]
pub struct TerrainSampler {
    grid: Option<Arc<TerrainGrid>>,
    projector: CoordinateProjector,
    generation: u64,
    warning_limit: usize,
    out_of_range: AtomicUsize,
}

impl Default for TerrainSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl TerrainSampler {
    pub fn new() -> Self {
        Self::with_warning_limit(TERRAIN_WARNING_LIMIT)
    }

    pub fn with_warning_limit(warning_limit: usize) -> Self {
        Self::with_projector(CoordinateProjector::new(), warning_limit)
    }

    /// Sampler whose reverse projection uses the configured degree length.
    pub fn with_config(config: &EngineConfig) -> Self {
        Self::with_projector(
            CoordinateProjector::with_meters_per_degree(config.meters_per_degree),
            config.terrain_warning_limit,
        )
    }

    fn with_projector(projector: CoordinateProjector, warning_limit: usize) -> Self {
        Self {
            grid: None,
            projector,
            generation: 0,
            warning_limit,
            out_of_range: AtomicUsize::new(0),
        }
    }

    /// Replaces the grid wholesale. The local frame defaults to the grid
    /// center unless a reference was bound with [`rebind`](Self::rebind).
    pub fn load(&mut self, grid: TerrainGrid) -> TerrainToken {
        if self.projector.reference().is_none() {
            self.projector.set_reference(grid.center);
        }
        let (rows, cols) = grid.dim();
        match self.range_of(&grid) {
            Some((min, max)) => log::info!(
                "terrain grid {rows}x{cols} loaded, elevation {min:.1} m to {max:.1} m"
            ),
            None => log::warn!("terrain grid {rows}x{cols} loaded with undefined elevation range"),
        }
        self.grid = Some(Arc::new(grid));
        self.generation += 1;
        self.out_of_range.store(0, Ordering::Relaxed);
        self.token()
    }

    pub fn clear(&mut self) {
        self.grid = None;
        self.generation += 1;
        self.out_of_range.store(0, Ordering::Relaxed);
    }

    /// Binds the local frame the `(x, z)` queries are expressed in.
    pub fn rebind(&mut self, reference: GeoPoint) {
        self.projector.set_reference(reference);
    }

    pub fn reference(&self) -> Option<GeoPoint> {
        self.projector.reference()
    }

    pub fn token(&self) -> TerrainToken {
        TerrainToken {
            generation: self.generation,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn grid(&self) -> Option<&Arc<TerrainGrid>> {
        self.grid.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.grid.is_some()
    }

    /// Elevation at local `(x, z)`; 0 m with no grid or off the grid.
    pub fn elevation_at(&self, x: f64, z: f64) -> f64 {
        if self.grid.is_none() {
            return 0.0;
        }
        match self.projector.to_geo(x, z) {
            Ok(point) => self.elevation_at_geo(point),
            Err(_) => 0.0,
        }
    }

    /// Elevation at a GPS point. Independent of the local frame.
    pub fn elevation_at_geo(&self, point: GeoPoint) -> f64 {
        let Some(grid) = &self.grid else {
            return 0.0;
        };
        match grid.nearest_index(point) {
            Some(idx) => grid.elevations[idx],
            None => {
                self.warn_out_of_range(point);
                0.0
            }
        }
    }

    /// Like [`elevation_at`](Self::elevation_at) but rejects tokens from an earlier load.
    pub fn elevation_at_checked(&self, token: TerrainToken, x: f64, z: f64) -> Result<f64> {
        if token.generation != self.generation {
            return Err(ShadowError::StaleTerrain {
                held: token.generation,
                current: self.generation,
            });
        }
        Ok(self.elevation_at(x, z))
    }

    pub fn average_elevation(&self) -> f64 {
        self.grid
            .as_ref()
            .and_then(|g| g.elevations.mean())
            .unwrap_or(0.0)
    }

    /// `(min, max)` of the loaded grid.
    pub fn elevation_range(&self) -> Option<(f64, f64)> {
        self.grid.as_ref().and_then(|g| self.range_of(g))
    }

    /// Number of off-grid queries since the last load.
    pub fn out_of_range_queries(&self) -> usize {
        self.out_of_range.load(Ordering::Relaxed)
    }

    fn range_of(&self, grid: &TerrainGrid) -> Option<(f64, f64)> {
        let min = grid.elevations.min().ok()?;
        let max = grid.elevations.max().ok()?;
        Some((*min, *max))
    }

    fn warn_out_of_range(&self, point: GeoPoint) {
        let seen = self.out_of_range.fetch_add(1, Ordering::Relaxed);
        if seen < self.warning_limit {
            log::warn!(
                "terrain query at {point} is outside the grid, using 0 m"
            );
            if seen + 1 == self.warning_limit {
                log::warn!("further out-of-range terrain warnings suppressed until next load");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::METERS_PER_DEGREE;
    use ndarray::array;

    fn center() -> GeoPoint {
        GeoPoint::new(46.0, 8.0).unwrap()
    }

    /// 3x3 grid, one sample every ~111 m north and every ~111 m east.
    fn sampler() -> TerrainSampler {
        let c = center();
        let lon_spacing = 0.001 / c.latitude.to_radians().cos();
        let grid = TerrainGrid::new(
            c,
            0.001,
            lon_spacing,
            array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]],
        )
        .unwrap();
        let mut sampler = TerrainSampler::new();
        sampler.load(grid);
        sampler
    }

    #[test]
    fn test_no_grid_reads_zero() {
        let sampler = TerrainSampler::new();
        assert_eq!(sampler.elevation_at(10.0, 10.0), 0.0);
        assert_eq!(sampler.average_elevation(), 0.0);
        assert!(sampler.elevation_range().is_none());
    }

    #[test]
    fn test_nearest_sample_lookup() {
        let sampler = sampler();
        assert_eq!(sampler.elevation_at(0.0, 0.0), 5.0);
        // North is +z, one row up.
        assert_eq!(sampler.elevation_at(0.0, 111.0), 8.0);
        // East is -x, one column right.
        assert_eq!(sampler.elevation_at(-111.0, 0.0), 6.0);
        // South-west corner.
        assert_eq!(sampler.elevation_at(111.0, -111.0), 1.0);
        // Rounds to the nearer sample.
        assert_eq!(sampler.elevation_at(0.0, 40.0), 5.0);
        assert_eq!(sampler.elevation_at(0.0, 70.0), 8.0);
    }

    #[test]
    fn test_out_of_range_reads_zero_and_counts() {
        let sampler = sampler();
        for _ in 0..25 {
            assert_eq!(sampler.elevation_at(0.0, 5_000.0), 0.0);
        }
        assert_eq!(sampler.out_of_range_queries(), 25);
    }

    #[test]
    fn test_nan_query_is_out_of_range() {
        let sampler = sampler();
        assert_eq!(sampler.elevation_at(f64::NAN, 0.0), 0.0);
        assert_eq!(sampler.elevation_at(0.0, f64::NAN), 0.0);
        assert_eq!(sampler.out_of_range_queries(), 2);

        let grid = sampler.grid().unwrap();
        let nan = GeoPoint {
            latitude: f64::NAN,
            longitude: 8.0,
        };
        assert_eq!(grid.nearest_index(nan), None);
    }

    #[test]
    fn test_configured_degree_length() {
        let config = EngineConfig {
            meters_per_degree: 100_000.0,
            ..EngineConfig::default()
        };
        let c = GeoPoint::new(48.0, 0.0).unwrap();
        let samples = Array2::from_shape_fn((41, 3), |(row, _)| row as f64);
        let grid = TerrainGrid::new(c, 0.0005, 0.001, samples).unwrap();
        let mut sampler = TerrainSampler::with_config(&config);
        sampler.load(grid);

        // 800 m north is 0.008° at this scale: 16 rows above the center row.
        let mut projector = CoordinateProjector::with_meters_per_degree(config.meters_per_degree);
        projector.set_reference(c);
        let (x, z) = projector.to_local(GeoPoint::new(48.008, 0.0).unwrap()).unwrap();
        assert!((z - 800.0).abs() < 1e-6, "z = {z}");
        assert_eq!(sampler.elevation_at(x, z), 36.0);
    }

    #[test]
    fn test_statistics() {
        let sampler = sampler();
        assert!((sampler.average_elevation() - 5.0).abs() < 1e-12);
        assert_eq!(sampler.elevation_range(), Some((1.0, 9.0)));
    }

    #[test]
    fn test_reload_invalidates_token() {
        let mut sampler = sampler();
        let old = sampler.token();
        assert_eq!(sampler.elevation_at_checked(old, 0.0, 0.0), Ok(5.0));

        let grid = TerrainGrid::new(center(), 0.001, 0.001, array![[42.0]]).unwrap();
        let new = sampler.load(grid);
        assert!(matches!(
            sampler.elevation_at_checked(old, 0.0, 0.0),
            Err(ShadowError::StaleTerrain { .. })
        ));
        assert_eq!(sampler.elevation_at_checked(new, 0.0, 0.0), Ok(42.0));
        assert_eq!(sampler.out_of_range_queries(), 0);
    }

    #[test]
    fn test_rebind_shifts_local_frame() {
        let mut sampler = sampler();
        // Reference one row north of the grid center: local origin is now the top middle sample.
        sampler.rebind(GeoPoint::new(46.001, 8.0).unwrap());
        assert_eq!(sampler.elevation_at(0.0, 0.0), 8.0);
    }

    #[test]
    fn test_invalid_grids_rejected() {
        assert!(TerrainGrid::new(center(), 0.0, 0.001, array![[1.0]]).is_err());
        assert!(TerrainGrid::from_samples(center(), 0.001, 0.001, 2, 2, vec![1.0; 3]).is_err());
        assert!(TerrainGrid::around(center(), 500.0, 1, METERS_PER_DEGREE, vec![1.0]).is_err());
    }

    #[test]
    fn test_sample_locations_match_grid_layout() {
        let c = center();
        let resolution = 5;
        let locations = TerrainGrid::sample_locations(c, 500.0, resolution, METERS_PER_DEGREE);
        assert_eq!(locations.len(), resolution * resolution);

        let samples: Vec<f64> = (0..resolution * resolution).map(|v| v as f64).collect();
        let grid = TerrainGrid::around(c, 500.0, resolution, METERS_PER_DEGREE, samples).unwrap();
        let corner = grid.south_west_corner();
        assert!((locations[0].latitude - corner.latitude).abs() < 1e-12);
        assert!((locations[0].longitude - corner.longitude).abs() < 1e-12);
        // Middle sample is the center.
        let mid = locations[resolution * resolution / 2];
        assert!((mid.latitude - c.latitude).abs() < 1e-12);
        assert!((mid.longitude - c.longitude).abs() < 1e-12);
        // Every listed location maps back onto its own sample.
        for (idx, loc) in locations.iter().enumerate() {
            assert_eq!(
                grid.nearest_index(*loc),
                Some((idx / resolution, idx % resolution))
            );
        }
    }
}
