//! Engine configuration scalars (constant for the lifetime of a session).

use serde::{Deserialize, Serialize};

pub const METERS_PER_DEGREE: f64 = 111_000.0;
pub const RAY_ORIGIN_OFFSET: f64 = 0.1;
pub const MAX_RAY_DISTANCE: f64 = 10_000.0;
pub const OBSERVER_HEIGHT: f64 = 1.5;
pub const TERRAIN_WARNING_LIMIT: usize = 10;
pub const DEFAULT_BUILDING_HEIGHT: f64 = 10.0;
pub const METERS_PER_LEVEL: f64 = 3.0;

/// Tunables shared by projection, ingestion and ray casting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Length of one degree of latitude in meters.
    pub meters_per_degree: f64,
    /// Vertical lift applied to a ray origin to avoid hitting the ground it stands on.
    pub ray_origin_offset: f64,
    pub max_ray_distance: f64,
    /// Eye height above terrain used for GPS queries.
    pub observer_height: f64,
    /// Out-of-range terrain warnings emitted per loaded grid.
    pub terrain_warning_limit: usize,
    pub default_building_height: f64,
    pub meters_per_level: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            meters_per_degree: METERS_PER_DEGREE,
            ray_origin_offset: RAY_ORIGIN_OFFSET,
            max_ray_distance: MAX_RAY_DISTANCE,
            observer_height: OBSERVER_HEIGHT,
            terrain_warning_limit: TERRAIN_WARNING_LIMIT,
            default_building_height: DEFAULT_BUILDING_HEIGHT,
            meters_per_level: METERS_PER_LEVEL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_falls_back_to_defaults() {
        let cfg: EngineConfig =
            serde_json::from_str(r#"{"observer_height": 2.0, "terrain_warning_limit": 3}"#)
                .unwrap();
        assert_eq!(cfg.observer_height, 2.0);
        assert_eq!(cfg.terrain_warning_limit, 3);
        assert_eq!(cfg.meters_per_degree, METERS_PER_DEGREE);
        assert_eq!(cfg.max_ray_distance, MAX_RAY_DISTANCE);
    }
}
