//! Computation units ("modules") and the creators that describe and instantiate them.
//!
//! Modules never keep references into a quantity namespace. Each call to
//! [`Module::run`] hands the module a read-only [`Inputs`] view and a write
//! view whose type fixes the write discipline: steady-state modules receive
//! [`Outputs`] (overwrite), differential modules receive [`Derivatives`]
//! (accumulate).

use crate::error::{Error, Result};
use crate::quantity::QuantityStore;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    SteadyState,
    Differential,
}

impl ModuleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ModuleKind::SteadyState => "steady-state",
            ModuleKind::Differential => "differential",
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static metadata describing a module's interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub name: String,
    pub kind: ModuleKind,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    /// Set for modules whose formulas are only meaningful under fixed-step Euler integration.
    #[serde(default)]
    pub requires_euler: bool,
}

impl ModuleDescriptor {
    pub fn new(name: &str, kind: ModuleKind, inputs: &[&str], outputs: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            kind,
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            requires_euler: false,
        }
    }

    pub fn steady_state(name: &str, inputs: &[&str], outputs: &[&str]) -> Self {
        Self::new(name, ModuleKind::SteadyState, inputs, outputs)
    }

    pub fn differential(name: &str, inputs: &[&str], outputs: &[&str]) -> Self {
        Self::new(name, ModuleKind::Differential, inputs, outputs)
    }

    /// Marks the module as usable only with Euler-family solvers.
    pub fn euler_only(mut self) -> Self {
        self.requires_euler = true;
        self
    }
}

/// Read-only view of the quantities a module may consume.
pub struct Inputs<'a> {
    module: &'a str,
    store: &'a QuantityStore,
}

impl<'a> Inputs<'a> {
    pub fn new(module: &'a str, store: &'a QuantityStore) -> Self {
        Self { module, store }
    }

    /// Looks up `name`, failing with [`Error::MissingQuantity`] if it is absent.
    pub fn get(&self, name: &str) -> Result<f64> {
        self.store.get(name).ok_or_else(|| Error::MissingQuantity {
            module: self.module.to_string(),
            quantity: name.to_string(),
        })
    }
}

/// Overwriting view used by steady-state modules.
///
/// Like [`Derivatives`], only pre-seeded quantities can be written.
pub struct Outputs<'a> {
    module: &'a str,
    store: &'a mut QuantityStore,
}

impl<'a> Outputs<'a> {
    pub fn new(module: &'a str, store: &'a mut QuantityStore) -> Self {
        Self { module, store }
    }

    pub fn set(&mut self, name: &str, value: f64) -> Result<()> {
        match self.store.get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(Error::MissingQuantity {
                module: self.module.to_string(),
                quantity: name.to_string(),
            }),
        }
    }
}

/// Accumulating view used by differential modules.
///
/// Every output must be pre-seeded in the underlying store; adding to an
/// absent quantity is an error rather than an implicit insert.
pub struct Derivatives<'a> {
    module: &'a str,
    store: &'a mut QuantityStore,
}

impl<'a> Derivatives<'a> {
    pub fn new(module: &'a str, store: &'a mut QuantityStore) -> Self {
        Self { module, store }
    }

    pub fn add(&mut self, name: &str, value: f64) -> Result<()> {
        match self.store.get_mut(name) {
            Some(slot) => {
                *slot += value;
                Ok(())
            }
            None => Err(Error::MissingQuantity {
                module: self.module.to_string(),
                quantity: name.to_string(),
            }),
        }
    }
}

/// A module that computes its outputs directly from its inputs.
pub trait SteadyStateModule: Send + Sync {
    fn run(&self, inputs: &Inputs<'_>, outputs: &mut Outputs<'_>) -> Result<()>;
}

/// A module that contributes additive rate-of-change terms to its outputs.
pub trait DifferentialModule: Send + Sync {
    fn run(&self, inputs: &Inputs<'_>, derivatives: &mut Derivatives<'_>) -> Result<()>;
}

/// A runnable module instance.
pub enum Module {
    SteadyState {
        name: String,
        module: Box<dyn SteadyStateModule>,
    },
    Differential {
        name: String,
        module: Box<dyn DifferentialModule>,
    },
}

impl Module {
    pub fn steady_state(name: &str, module: impl SteadyStateModule + 'static) -> Self {
        Module::SteadyState {
            name: name.to_string(),
            module: Box::new(module),
        }
    }

    pub fn differential(name: &str, module: impl DifferentialModule + 'static) -> Self {
        Module::Differential {
            name: name.to_string(),
            module: Box::new(module),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Module::SteadyState { name, .. } | Module::Differential { name, .. } => name,
        }
    }

    pub fn kind(&self) -> ModuleKind {
        match self {
            Module::SteadyState { .. } => ModuleKind::SteadyState,
            Module::Differential { .. } => ModuleKind::Differential,
        }
    }

    /// Runs the module once against `inputs`, writing into `outputs`.
    ///
    /// Steady-state modules overwrite their outputs; differential modules add to them.
    pub fn run(&self, inputs: &QuantityStore, outputs: &mut QuantityStore) -> Result<()> {
        match self {
            Module::SteadyState { name, module } => {
                module.run(&Inputs::new(name, inputs), &mut Outputs::new(name, outputs))
            }
            Module::Differential { name, module } => {
                module.run(&Inputs::new(name, inputs), &mut Derivatives::new(name, outputs))
            }
        }
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .finish()
    }
}

/// Describes a module without instantiating it, and instantiates it on demand.
pub trait ModuleCreator: Send + Sync {
    fn descriptor(&self) -> &ModuleDescriptor;

    /// Creates a fresh instance. No computation happens here.
    fn create_module(&self) -> Module;

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    fn inputs(&self) -> &[String] {
        &self.descriptor().inputs
    }

    fn outputs(&self) -> &[String] {
        &self.descriptor().outputs
    }

    fn kind(&self) -> ModuleKind {
        self.descriptor().kind
    }

    fn requires_euler(&self) -> bool {
        self.descriptor().requires_euler
    }
}

/// A creator backed by a plain constructor function.
pub struct ModuleFactory {
    descriptor: ModuleDescriptor,
    build: fn() -> Module,
}

impl ModuleFactory {
    pub fn new(descriptor: ModuleDescriptor, build: fn() -> Module) -> Self {
        Self { descriptor, build }
    }
}

impl ModuleCreator for ModuleFactory {
    fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    fn create_module(&self) -> Module {
        let module = (self.build)();
        debug_assert_eq!(module.kind(), self.descriptor.kind);
        module
    }
}


#[cfg(test)]
mod tests {
    use super::test_modules::*;
    use super::*;

    fn oscillator_inputs() -> QuantityStore {
        QuantityStore::from([
            ("position", 2.0),
            ("velocity", -3.0),
            ("mass", 4.0),
            ("spring_constant", 0.5),
        ])
    }

    #[test]
    fn creator_describes_without_instantiating() {
        let creator = oscillator();
        assert_eq!(creator.name(), "oscillator");
        assert_eq!(creator.inputs().len(), 4);
        assert_eq!(creator.outputs(), &["position".to_string(), "velocity".to_string()]);
        assert_eq!(creator.kind(), ModuleKind::Differential);
        assert!(!creator.requires_euler());
        assert!(euler_ramp().requires_euler());
    }

    #[test]
    fn differential_module_accumulates() {
        let inputs = oscillator_inputs();
        let creator = oscillator();
        let mut outputs = QuantityStore::zeroed(creator.outputs().iter().map(String::as_str));
        let module = creator.create_module();

        module.run(&inputs, &mut outputs).expect("run");
        assert_eq!(outputs.get("position"), Some(-3.0));
        assert_eq!(outputs.get("velocity"), Some(-0.5 * 2.0 / 4.0));

        module.run(&inputs, &mut outputs).expect("second run");
        assert_eq!(outputs.get("position"), Some(-6.0));
        assert_eq!(outputs.get("velocity"), Some(-0.5));
    }

    #[test]
    fn steady_state_module_overwrites() {
        let inputs = oscillator_inputs();
        let module = energy().create_module();
        let mut outputs = QuantityStore::from([("total_energy", 100.0)]);

        module.run(&inputs, &mut outputs).expect("run");
        module.run(&inputs, &mut outputs).expect("second run");
        assert_eq!(outputs.get("total_energy"), Some(0.5 * 4.0 * 9.0 + 0.5 * 0.5 * 4.0));
    }

    #[test]
    fn inputs_are_read_at_run_time() {
        let mut inputs = QuantityStore::from([("rate", 1.0)]);
        let module = ramp().create_module();
        inputs.set("rate", 5.0);
        let mut outputs = QuantityStore::zeroed(["y"]);
        module.run(&inputs, &mut outputs).expect("run");
        assert_eq!(outputs.get("y"), Some(5.0));
    }

    #[test]
    fn missing_input_and_unseeded_output_are_errors() {
        let module = ramp().create_module();
        let mut outputs = QuantityStore::zeroed(["y"]);
        let err = module.run(&QuantityStore::new(), &mut outputs).unwrap_err();
        assert!(matches!(err, Error::MissingQuantity { ref quantity, .. } if quantity == "rate"));

        let mut unseeded = QuantityStore::new();
        let err = module
            .run(&QuantityStore::from([("rate", 1.0)]), &mut unseeded)
            .unwrap_err();
        assert!(matches!(err, Error::MissingQuantity { ref quantity, .. } if quantity == "y"));
    }

    /// Writes its declared output and one it never declared.
    struct Overreaching;

    impl SteadyStateModule for Overreaching {
        fn run(&self, _inputs: &Inputs<'_>, outputs: &mut Outputs<'_>) -> Result<()> {
            outputs.set("declared", 1.0)?;
            outputs.set("undeclared", 2.0)
        }
    }

    #[test]
    fn steady_state_writes_are_limited_to_seeded_outputs() {
        let module = Module::steady_state("overreaching", Overreaching);
        let mut outputs = QuantityStore::zeroed(["declared"]);
        let err = module.run(&QuantityStore::new(), &mut outputs).unwrap_err();
        assert!(matches!(
            err,
            Error::MissingQuantity { ref module, ref quantity }
                if module == "overreaching" && quantity == "undeclared"
        ));
        assert_eq!(outputs.get("undeclared"), None);
        assert_eq!(outputs.len(), 1);
    }
}
