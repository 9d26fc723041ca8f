//! Error kinds raised by the shadow engine.
//!
//! Only caller mistakes are errors. Degenerate footprints and terrain
//! lookups outside the loaded grid degrade with a logged warning instead.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ShadowError {
    /// Coordinates were projected before a reference point was set.
    #[error("reference point not set; call set_reference() before projecting coordinates")]
    ReferenceNotSet,

    #[error("coordinate out of range: latitude {latitude}, longitude {longitude}")]
    InvalidCoordinate { latitude: f64, longitude: f64 },

    #[error("invalid terrain grid: {0}")]
    InvalidTerrainGrid(String),

    /// A terrain token from an earlier load was used after the grid was replaced.
    #[error("stale terrain grid: token generation {held}, current generation {current}")]
    StaleTerrain { held: u64, current: u64 },
}

pub type Result<T> = std::result::Result<T, ShadowError>;

#[cfg(feature = "python")]
impl From<ShadowError> for pyo3::PyErr {
    fn from(err: ShadowError) -> Self {
        pyo3::exceptions::PyValueError::new_err(err.to_string())
    }
}
