//! WASM bindings for Canopy.
//!
//! A simulation is described by a `SimulationConfig` object on the JS side and
//! resolved against the standard and test module libraries.

mod registry;
mod simulation;

pub use registry::{library_quantities, module_catalog};
pub use simulation::{build_simulator, WasmSimulation};
