//! Geospatial shadow engine: sun position, GPS ↔ local projection, terrain
//! sampling, extruded building meshes and ray-cast shadow queries.
//!
//! With the `python` feature the crate also builds as a Python extension
//! module exposing one submodule per concern.

#[cfg(feature = "python")]
use pyo3::prelude::*;

pub mod building;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod geo;
pub mod mesh;
pub mod shadowing;
pub mod sun;
pub mod terrain;

pub use building::{Building, HeightSource};
pub use cache::{AreaCache, AreaKey};
pub use config::EngineConfig;
pub use engine::{ShadowEngine, ShadowReport};
pub use error::{Result, ShadowError};
pub use geo::{BoundingBox, CoordinateProjector, GeoPoint, LocalPoint};
pub use mesh::{build_mesh, build_mesh_set, Mesh, MeshSet};
pub use shadowing::{
    cast_ray, query_grid, query_shadow, ray_triangle_intersect, GridAnalysis, GridSample,
    RayHit, ShadowQuery, ShadowResult,
};
pub use sun::{sun_direction_vector, sun_position, SunPosition};
pub use terrain::{TerrainGrid, TerrainSampler, TerrainToken};

#[cfg(feature = "python")]
#[pymodule]
fn sunshadow(py_module: &Bound<'_, PyModule>) -> PyResult<()> {
    register_sun_module(py_module)?;
    register_geo_module(py_module)?;
    register_shadowing_module(py_module)?;

    py_module.add_class::<engine::py::PyShadowEngine>()?;
    py_module.add("__doc__", "Building shadow analysis implemented in Rust.")?;

    Ok(())
}

#[cfg(feature = "python")]
fn register_sun_module(py_module: &Bound<'_, PyModule>) -> PyResult<()> {
    let submodule = PyModule::new(py_module.py(), "sun")?;
    submodule.add("__doc__", "Solar position.")?;
    submodule.add_function(wrap_pyfunction!(sun::py::sun_position, &submodule)?)?;
    submodule.add_function(wrap_pyfunction!(sun::py::sun_direction_vector, &submodule)?)?;
    py_module.add_submodule(&submodule)?;
    Ok(())
}

#[cfg(feature = "python")]
fn register_geo_module(py_module: &Bound<'_, PyModule>) -> PyResult<()> {
    let submodule = PyModule::new(py_module.py(), "geo")?;
    submodule.add("__doc__", "GPS to local tangent-plane projection.")?;
    submodule.add_function(wrap_pyfunction!(geo::py::to_local, &submodule)?)?;
    py_module.add_submodule(&submodule)?;
    Ok(())
}

#[cfg(feature = "python")]
fn register_shadowing_module(py_module: &Bound<'_, PyModule>) -> PyResult<()> {
    let submodule = PyModule::new(py_module.py(), "shadowing")?;
    submodule.add("__doc__", "Ray-cast shadow queries.")?;
    submodule.add_function(wrap_pyfunction!(shadowing::py::query_shadow, &submodule)?)?;
    submodule.add_function(wrap_pyfunction!(shadowing::py::query_grid, &submodule)?)?;
    submodule.add_function(wrap_pyfunction!(
        shadowing::py::ray_triangle_intersect,
        &submodule
    )?)?;
    py_module.add_submodule(&submodule)?;
    Ok(())
}
