//! Extruded building solids.
//!
//! Each valid footprint becomes a flat-bottomed prism: a bottom ring at the
//! mean terrain elevation under the footprint and a top ring `height` meters
//! above it, capped with triangle fans and closed with quad side walls split
//! into two triangles each. A [`MeshSet`] is immutable once built; rebuilds
//! produce a new set.

use glam::DVec3;
use rayon::prelude::*;

use crate::building::Building;
use crate::geo::{CoordinateProjector, GeoPoint};
use crate::terrain::TerrainSampler;

const BOUNDS_PADDING: f64 = 1e-6;

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: DVec3,
    pub max: DVec3,
}

impl Aabb {
    pub fn from_points(points: &[DVec3]) -> Self {
        let init = Aabb {
            min: DVec3::splat(f64::INFINITY),
            max: DVec3::splat(f64::NEG_INFINITY),
        };
        points.iter().fold(init, |acc, p| Aabb {
            min: acc.min.min(*p),
            max: acc.max.max(*p),
        })
    }

    /// Slab test: does the segment `origin + t·dir`, `t ∈ [0, max_distance]`, touch the box?
    pub fn hit_by_ray(&self, origin: DVec3, dir: DVec3, max_distance: f64) -> bool {
        let min = self.min - DVec3::splat(BOUNDS_PADDING);
        let max = self.max + DVec3::splat(BOUNDS_PADDING);
        let mut t_enter = 0.0_f64;
        let mut t_exit = max_distance;

        for axis in 0..3 {
            let (o, d, lo, hi) = (origin[axis], dir[axis], min[axis], max[axis]);
            if d.abs() < 1e-12 {
                if o < lo || o > hi {
                    return false;
                }
                continue;
            }
            let inv = 1.0 / d;
            let (t0, t1) = {
                let a = (lo - o) * inv;
                let b = (hi - o) * inv;
                if a <= b {
                    (a, b)
                } else {
                    (b, a)
                }
            };
            t_enter = t_enter.max(t0);
            t_exit = t_exit.min(t1);
            if t_enter > t_exit {
                return false;
            }
        }
        true
    }
}

/// Triangulated solid of one building.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    /// Id of the building this solid was extruded from.
    pub building_id: String,
    pub category: String,
    pub vertices: Vec<DVec3>,
    pub triangles: Vec<[usize; 3]>,
    pub bounds: Aabb,
    pub base_elevation: f64,
    pub height: f64,
}

impl Mesh {
    /// Extrudes a ring of local `(x, z)` points from `base` to `base + height`.
    pub fn extrude(
        building_id: impl Into<String>,
        category: impl Into<String>,
        ring: &[(f64, f64)],
        base: f64,
        height: f64,
    ) -> Self {
        let n = ring.len();
        let top = base + height;

        let mut vertices = Vec::with_capacity(2 * n);
        vertices.extend(ring.iter().map(|&(x, z)| DVec3::new(x, base, z)));
        vertices.extend(ring.iter().map(|&(x, z)| DVec3::new(x, top, z)));

        let mut triangles = Vec::with_capacity(4 * n.saturating_sub(1));
        // Bottom cap, reversed winding so its normal faces down.
        for i in 1..n.saturating_sub(1) {
            triangles.push([n - 1, n - 1 - i, n - 2 - i]);
        }
        // Top cap.
        for i in 1..n.saturating_sub(1) {
            triangles.push([n, n + i, n + i + 1]);
        }
        // Side walls.
        for i in 0..n {
            let next = (i + 1) % n;
            triangles.push([i, next, next + n]);
            triangles.push([i, next + n, i + n]);
        }

        let bounds = Aabb::from_points(&vertices);
        Self {
            building_id: building_id.into(),
            category: category.into(),
            vertices,
            triangles,
            bounds,
            base_elevation: base,
            height,
        }
    }

    pub fn triangle(&self, index: usize) -> [DVec3; 3] {
        let [a, b, c] = self.triangles[index];
        [self.vertices[a], self.vertices[b], self.vertices[c]]
    }

    pub fn triangle_vertices(&self) -> impl Iterator<Item = [DVec3; 3]> + '_ {
        (0..self.triangles.len()).map(|i| self.triangle(i))
    }
}

/// Every building solid of the current scene.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshSet {
    meshes: Vec<Mesh>,
    skipped: Vec<String>,
    terrain_generation: Option<u64>,
}

impl MeshSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_meshes(meshes: Vec<Mesh>) -> Self {
        Self {
            meshes,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Mesh> {
        self.meshes.iter()
    }

    pub fn meshes(&self) -> &[Mesh] {
        &self.meshes
    }

    pub fn get(&self, building_id: &str) -> Option<&Mesh> {
        self.meshes.iter().find(|m| m.building_id == building_id)
    }

    pub fn triangle_count(&self) -> usize {
        self.meshes.iter().map(|m| m.triangles.len()).sum()
    }

    /// Ids of buildings left out because their footprint was degenerate.
    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    /// Terrain load the base elevations were sampled from, if any.
    pub fn terrain_generation(&self) -> Option<u64> {
        self.terrain_generation
    }
}

impl<'a> IntoIterator for &'a MeshSet {
    type Item = &'a Mesh;
    type IntoIter = std::slice::Iter<'a, Mesh>;

    fn into_iter(self) -> Self::IntoIter {
        self.meshes.iter()
    }
}

/// Mesh for one building, or `None` when the footprint is degenerate.
///
/// `projector` must carry a reference point; buildings are projected with it.
/// Terrain is sampled at the footprint's GPS vertices.
pub fn build_mesh(
    building: &Building,
    projector: &CoordinateProjector,
    terrain: Option<&TerrainSampler>,
) -> Option<Mesh> {
    if !building.is_valid() {
        log::warn!(
            "building {} skipped: {} distinct footprint points, height {}",
            building.id,
            building.distinct_points(),
            building.height
        );
        return None;
    }

    let ring: Vec<(f64, f64)> = building
        .open_ring()
        .iter()
        .filter_map(|p| projector.to_local(*p).ok())
        .collect();
    if ring.len() != building.open_ring().len() {
        log::warn!("building {} skipped: footprint could not be projected", building.id);
        return None;
    }

    // Sampled by GPS position, so the sampler's own frame does not matter.
    let base = match terrain {
        Some(sampler) => {
            let footprint = building.open_ring();
            footprint
                .iter()
                .map(|p| sampler.elevation_at_geo(*p))
                .sum::<f64>()
                / footprint.len() as f64
        }
        None => 0.0,
    };

    Some(Mesh::extrude(
        building.id.clone(),
        building.category.clone(),
        &ring,
        base,
        building.height,
    ))
}

/// Builds the full mesh set for a scene around `reference`.
///
/// Degenerate footprints are skipped with a warning and recorded in
/// [`MeshSet::skipped`]; they never abort the batch. Mesh order follows input order.
pub fn build_mesh_set(
    buildings: &[Building],
    reference: GeoPoint,
    terrain: Option<&TerrainSampler>,
) -> MeshSet {
    let projector = CoordinateProjector::with_reference(reference);
    build_mesh_set_with(buildings, &projector, terrain)
}

pub(crate) fn build_mesh_set_with(
    buildings: &[Building],
    projector: &CoordinateProjector,
    terrain: Option<&TerrainSampler>,
) -> MeshSet {
    let built: Vec<(String, Option<Mesh>)> = buildings
        .par_iter()
        .map(|b| (b.id.clone(), build_mesh(b, projector, terrain)))
        .collect();

    let mut meshes = Vec::with_capacity(built.len());
    let mut skipped = Vec::new();
    for (id, mesh) in built {
        match mesh {
            Some(mesh) => meshes.push(mesh),
            None => skipped.push(id),
        }
    }

    let set = MeshSet {
        meshes,
        skipped,
        terrain_generation: terrain.filter(|t| t.is_loaded()).map(|t| t.generation()),
    };
    log::info!(
        "built {} building meshes ({} triangles), skipped {}",
        set.len(),
        set.triangle_count(),
        set.skipped.len()
    );
    set
}
