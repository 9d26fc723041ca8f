//! Shadow analysis by ray casting against building meshes.
//!
//! A point is shadowed when the ray from it toward the sun hits any building
//! triangle within `max_distance`. Each query only reads the frozen
//! [`MeshSet`], so grid batches run in parallel without synchronisation.

use glam::DVec3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::RAY_ORIGIN_OFFSET;
use crate::geo::LocalPoint;
use crate::mesh::MeshSet;

const EPSILON: f64 = 1e-6; // parallel-ray and forward-hit tolerance

/// Möller–Trumbore ray/triangle test. Returns the hit distance along `dir`.
///
/// Two-sided: back faces count. Rays within `EPSILON` of the triangle plane
/// are rejected instead of producing unbounded distances.
pub fn ray_triangle_intersect(
    origin: DVec3,
    dir: DVec3,
    v0: DVec3,
    v1: DVec3,
    v2: DVec3,
) -> Option<f64> {
    let edge1 = v1 - v0;
    let edge2 = v2 - v0;

    let h = dir.cross(edge2);
    let a = edge1.dot(h);
    if a.abs() < EPSILON {
        return None;
    }

    let f = 1.0 / a;
    let s = origin - v0;
    let u = f * s.dot(h);
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(edge1);
    let v = f * dir.dot(q);
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = f * edge2.dot(q);
    (t > EPSILON).then_some(t)
}

/// Closest building hit along a ray.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RayHit {
    pub distance: f64,
    pub building_id: String,
}

/// Nearest hit in `(EPSILON, max_distance)`. Equal distances keep the first
/// mesh encountered.
pub fn cast_ray(
    origin: DVec3,
    dir: DVec3,
    mesh_set: &MeshSet,
    max_distance: f64,
) -> Option<RayHit> {
    let mut closest: Option<(f64, usize)> = None;

    for (mesh_index, mesh) in mesh_set.iter().enumerate() {
        let bound = closest.map_or(max_distance, |(t, _)| t);
        if !mesh.bounds.hit_by_ray(origin, dir, bound) {
            continue;
        }
        for [v0, v1, v2] in mesh.triangle_vertices() {
            if let Some(t) = ray_triangle_intersect(origin, dir, v0, v1, v2) {
                let best = closest.map_or(max_distance, |(t, _)| t);
                if t < best {
                    closest = Some((t, mesh_index));
                }
            }
        }
    }

    closest.map(|(distance, mesh_index)| RayHit {
        distance,
        building_id: mesh_set.meshes()[mesh_index].building_id.clone(),
    })
}

/// One occlusion test: a point, the light direction and a search bound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowQuery {
    pub origin: LocalPoint,
    /// Unit vector pointing from the sun toward the ground.
    pub sun_direction: DVec3,
    pub max_distance: f64,
    /// Lift applied to `origin` before casting.
    pub origin_offset: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowResult {
    pub is_shadowed: bool,
    pub blocking_building: Option<String>,
    pub hit_distance: Option<f64>,
}

impl ShadowResult {
    fn night() -> Self {
        Self {
            is_shadowed: true,
            blocking_building: None,
            hit_distance: None,
        }
    }
}

impl ShadowQuery {
    pub fn new(origin: LocalPoint, sun_direction: DVec3, max_distance: f64) -> Self {
        Self {
            origin,
            sun_direction,
            max_distance,
            origin_offset: RAY_ORIGIN_OFFSET,
        }
    }

    pub fn with_origin_offset(mut self, origin_offset: f64) -> Self {
        self.origin_offset = origin_offset;
        self
    }

    pub fn run(&self, mesh_set: &MeshSet) -> ShadowResult {
        let toward_sun = -self.sun_direction;
        // Sun on or below the horizon: nothing is lit.
        if toward_sun.y <= 0.0 || toward_sun.length_squared() < EPSILON * EPSILON {
            return ShadowResult::night();
        }
        let ray_dir = toward_sun.normalize();
        let ray_origin = self.origin + DVec3::new(0.0, self.origin_offset, 0.0);

        match cast_ray(ray_origin, ray_dir, mesh_set, self.max_distance) {
            Some(hit) => {
                log::debug!(
                    "ray from {ray_origin} hit {} at {:.2} m",
                    hit.building_id,
                    hit.distance
                );
                ShadowResult {
                    is_shadowed: true,
                    blocking_building: Some(hit.building_id),
                    hit_distance: Some(hit.distance),
                }
            }
            None => ShadowResult {
                is_shadowed: false,
                blocking_building: None,
                hit_distance: None,
            },
        }
    }
}

/// Is `origin` shadowed for light travelling along `sun_direction`?
pub fn query_shadow(
    origin: LocalPoint,
    sun_direction: DVec3,
    mesh_set: &MeshSet,
    max_distance: f64,
) -> ShadowResult {
    ShadowQuery::new(origin, sun_direction, max_distance).run(mesh_set)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSample {
    pub point: LocalPoint,
    pub is_shadowed: bool,
}

/// Shadow coverage over a square lattice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridAnalysis {
    pub samples: Vec<GridSample>,
    pub shadowed_count: usize,
    /// Shadowed share of the lattice, 0–100.
    pub coverage_percent: f64,
}

/// Lattice of `grid_size × grid_size` points, `spacing` meters apart in x and
/// z, centered on `center` and at `center.y`. Samples are ordered x-major.
pub fn grid_points(center: LocalPoint, grid_size: usize, spacing: f64) -> Vec<LocalPoint> {
    let half_extent = grid_size.saturating_sub(1) as f64 * spacing / 2.0;
    (0..grid_size * grid_size)
        .map(|k| {
            let (i, j) = (k / grid_size, k % grid_size);
            DVec3::new(
                center.x - half_extent + i as f64 * spacing,
                center.y,
                center.z - half_extent + j as f64 * spacing,
            )
        })
        .collect()
}

/// Runs [`query_shadow`] over a lattice in parallel and aggregates coverage.
pub fn query_grid(
    center: LocalPoint,
    grid_size: usize,
    spacing: f64,
    sun_direction: DVec3,
    mesh_set: &MeshSet,
    max_distance: f64,
) -> GridAnalysis {
    let template = ShadowQuery::new(center, sun_direction, max_distance);
    analyse_points(grid_points(center, grid_size, spacing), &template, mesh_set)
}

/// Shadow test of every point with the direction, bound and offset of
/// `template`. Sample order follows `points`.
pub fn analyse_points(
    points: Vec<LocalPoint>,
    template: &ShadowQuery,
    mesh_set: &MeshSet,
) -> GridAnalysis {
    let samples: Vec<GridSample> = points
        .into_par_iter()
        .map(|point| GridSample {
            point,
            is_shadowed: ShadowQuery {
                origin: point,
                ..*template
            }
            .run(mesh_set)
            .is_shadowed,
        })
        .collect();

    let shadowed_count = samples.iter().filter(|s| s.is_shadowed).count();
    let coverage_percent = if samples.is_empty() {
        0.0
    } else {
        shadowed_count as f64 / samples.len() as f64 * 100.0
    };
    log::info!(
        "grid analysis: {shadowed_count}/{} points in shadow ({coverage_percent:.1}%)",
        samples.len()
    );

    GridAnalysis {
        samples,
        shadowed_count,
        coverage_percent,
    }
}

// ── PyO3 wrappers ──────────────────────────────────────────────────────────

#[cfg(feature = "python")]
pub(crate) mod py {
    use std::sync::Arc;

    use glam::DVec3;
    use ndarray::Array2;
    use numpy::{IntoPyArray, PyArray2};
    use pyo3::prelude::*;

    use crate::engine::py::PyShadowEngine;

    fn vec3(p: (f64, f64, f64)) -> DVec3 {
        DVec3::new(p.0, p.1, p.2)
    }

    /// Möller–Trumbore hit distance, or None.
    #[pyfunction]
    pub fn ray_triangle_intersect(
        origin: (f64, f64, f64),
        direction: (f64, f64, f64),
        v0: (f64, f64, f64),
        v1: (f64, f64, f64),
        v2: (f64, f64, f64),
    ) -> Option<f64> {
        super::ray_triangle_intersect(vec3(origin), vec3(direction), vec3(v0), vec3(v1), vec3(v2))
    }

    /// Shadow status of a local point against the engine's buildings.
    ///
    /// Returns:
    ///     (is_shadowed, blocking_building_id or None)
    #[pyfunction]
    #[pyo3(signature = (engine, point, sun_direction, max_distance=None))]
    pub fn query_shadow(
        engine: PyRef<'_, PyShadowEngine>,
        point: (f64, f64, f64),
        sun_direction: (f64, f64, f64),
        max_distance: Option<f64>,
    ) -> (bool, Option<String>) {
        let result = engine
            .inner
            .query_local(vec3(point), vec3(sun_direction), max_distance);
        (result.is_shadowed, result.blocking_building)
    }

    /// Shadow coverage over a `grid_size × grid_size` lattice around `center`.
    ///
    /// Returns:
    ///     (points: float64 array (N², 3), shadowed: list[bool], coverage_percent)
    #[pyfunction]
    pub fn query_grid<'py>(
        py: Python<'py>,
        engine: PyRef<'py, PyShadowEngine>,
        center: (f64, f64, f64),
        grid_size: usize,
        spacing: f64,
        sun_direction: (f64, f64, f64),
    ) -> (Bound<'py, PyArray2<f64>>, Vec<bool>, f64) {
        let inner = Arc::clone(&engine.inner);
        let analysis = py.allow_threads(move || {
            inner.query_grid(vec3(center), grid_size, spacing, vec3(sun_direction))
        });

        let points = Array2::from_shape_fn((analysis.samples.len(), 3), |(row, axis)| {
            analysis.samples[row].point[axis]
        });
        let shadowed = analysis.samples.iter().map(|s| s.is_shadowed).collect();
        (points.into_pyarray(py), shadowed, analysis.coverage_percent)
    }
}
