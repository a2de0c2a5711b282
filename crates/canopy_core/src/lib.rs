pub mod config;
pub mod dynamical_system;
pub mod error;
pub mod expression;
pub mod module;
pub mod quantity;
pub mod registry;
pub mod simulator;
pub mod solvers;
/// The `canopy_core` crate provides the module resolution and integration engine for Canopy.
/// A simulation is assembled from named quantities, pluggable computation units ("modules")
/// and time-indexed drivers, then integrated over the driver time axis.
///
/// Key components:
/// - **Quantity**: `QuantityStore` (name -> value), `QuantitySeries` (name -> column), `SimulationResult`.
/// - **Module**: steady-state and differential module traits, descriptors and creators.
/// - **Registry**: `ModuleLibrary`, a named collection of module creators.
/// - **Expression**: modules defined from `output = expression` strings, compiled to bytecode.
/// - **Dynamical System**: the validated, ordered assembly of modules and its live namespace.
/// - **Solvers**: Euler, RK4, Cash-Karp, Tsit5 and Rosenbrock strategies behind `OdeSolver`.
/// - **Simulator**: resolver + solver convenience wrappers.
pub mod traits;

pub use config::{ExpressionModuleConfig, SimulationConfig, SolverSettings};
pub use dynamical_system::DynamicalSystem;
pub use error::{Error, Result};
pub use expression::ExpressionModuleCreator;
pub use module::{Module, ModuleCreator, ModuleDescriptor, ModuleFactory, ModuleKind};
pub use quantity::{QuantitySeries, QuantityStore, SimulationResult};
pub use registry::ModuleLibrary;
pub use simulator::{IdempotentSimulator, Simulator};
pub use solvers::{IntegrationReport, Method, OdeSolver};
