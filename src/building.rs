//! Building records as delivered by map-data fetchers.
//!
//! Height is resolved once, at ingestion: explicit `height` / `building:height`
//! tag, then `building:levels` × meters-per-level, then a fixed default.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::geo::GeoPoint;

/// Which rule produced a building's height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeightSource {
    Tag,
    Levels,
    Default,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Building {
    pub id: String,
    /// Outline ring; closing the ring explicitly is optional.
    pub footprint: Vec<GeoPoint>,
    /// Meters above the terrain base.
    pub height: f64,
    /// Free-form kind (`residential`, `office`, ...). Informational only.
    pub category: String,
    #[serde(default = "HeightSource::default_source")]
    pub height_source: HeightSource,
}

impl HeightSource {
    fn default_source() -> Self {
        HeightSource::Tag
    }
}

/// Parses `"12"`, `"12.5 m"`, `"8M"`; rejects non-positive and non-finite values.
fn parse_meters(raw: &str) -> Option<f64> {
    let trimmed = raw.trim().trim_end_matches(['m', 'M']).trim();
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v > 0.0)
}

/// Applies the height policy to a tag map.
pub fn resolve_height(
    tags: &HashMap<String, String>,
    config: &EngineConfig,
) -> (f64, HeightSource) {
    let explicit = ["height", "building:height"]
        .iter()
        .filter_map(|key| tags.get(*key))
        .find_map(|raw| parse_meters(raw));
    if let Some(height) = explicit {
        return (height, HeightSource::Tag);
    }

    let levels = tags
        .get("building:levels")
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v > 0.0);
    if let Some(levels) = levels {
        return (levels * config.meters_per_level, HeightSource::Levels);
    }

    (config.default_building_height, HeightSource::Default)
}

impl Building {
    pub fn new(id: impl Into<String>, footprint: Vec<GeoPoint>, height: f64) -> Self {
        Self {
            id: id.into(),
            footprint,
            height,
            category: "yes".to_string(),
            height_source: HeightSource::Tag,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Builds a record from raw map tags, resolving height and category.
    pub fn from_tags(
        id: impl Into<String>,
        footprint: Vec<GeoPoint>,
        tags: &HashMap<String, String>,
        config: &EngineConfig,
    ) -> Self {
        let (height, height_source) = resolve_height(tags, config);
        let category = tags
            .get("building")
            .cloned()
            .unwrap_or_else(|| "yes".to_string());
        Self {
            id: id.into(),
            footprint,
            height,
            category,
            height_source,
        }
    }

    /// Footprint ring without an explicit closing vertex.
    pub fn open_ring(&self) -> &[GeoPoint] {
        match self.footprint.as_slice() {
            [first, .., last] if first == last => {
                &self.footprint[..self.footprint.len() - 1]
            }
            ring => ring,
        }
    }

    pub fn distinct_points(&self) -> usize {
        let ring = self.open_ring();
        ring.iter()
            .enumerate()
            .filter(|(i, p)| !ring[..*i].contains(p))
            .count()
    }

    /// At least three distinct vertices and a usable height.
    pub fn is_valid(&self) -> bool {
        self.distinct_points() >= 3 && self.height.is_finite() && self.height > 0.0
    }

    /// Display color for the category, RGB in [0, 1].
    pub fn color(&self) -> [f32; 3] {
        match self.category.as_str() {
            "residential" => [0.8, 0.7, 0.6],
            "commercial" => [0.6, 0.7, 0.8],
            "industrial" => [0.5, 0.5, 0.5],
            "office" => [0.7, 0.8, 0.9],
            "retail" => [0.9, 0.8, 0.7],
            "house" => [0.85, 0.75, 0.65],
            "apartments" => [0.75, 0.65, 0.55],
            _ => [0.7, 0.7, 0.7],
        }
    }
}
