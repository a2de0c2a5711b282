//! Validation and evaluation of a set of modules as one system of equations.
//!
//! A [`DynamicalSystem`] owns a single live namespace holding the initial
//! state, the parameters, the current driver row and every steady-state
//! output. Evaluating the system at a state vector writes that state into the
//! namespace, runs the steady-state modules in order, then runs the
//! differential modules against a zeroed derivative buffer.

use crate::error::{DuplicatedQuantity, Error, Result};
use crate::module::{Module, ModuleCreator, ModuleKind};
use crate::quantity::{QuantitySeries, QuantityStore};
use crate::traits::OdeSystem;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

const INITIAL_STATE: &str = "initial state";
const PARAMETERS: &str = "parameters";
const DRIVERS: &str = "drivers";

/// A steady-state module together with the scratch store it writes into.
#[derive(Debug)]
struct SteadyStep {
    module: Module,
    outputs: QuantityStore,
}

#[derive(Debug)]
pub struct DynamicalSystem {
    quantities: QuantityStore,
    drivers: QuantitySeries,
    ntimes: usize,
    differential_names: Vec<String>,
    initial_values: Vec<f64>,
    derivatives: QuantityStore,
    steady_modules: Vec<SteadyStep>,
    differential_modules: Vec<Module>,
    steady_output_names: Vec<String>,
    reported_names: Vec<String>,
    requires_euler: bool,
}

impl DynamicalSystem {
    /// Validates the inputs and assembles the system.
    ///
    /// Fails with [`Error::MissingInput`], [`Error::DuplicateOutput`] or
    /// [`Error::MissingInitialCondition`] when the modules do not form a
    /// consistent system; no partially built system is ever returned.
    pub fn new(
        initial_state: &QuantityStore,
        parameters: &QuantityStore,
        drivers: &QuantitySeries,
        steady_state_modules: &[Arc<dyn ModuleCreator>],
        differential_modules: &[Arc<dyn ModuleCreator>],
    ) -> Result<Self> {
        let ntimes = drivers.series_len()?;
        check_kinds(steady_state_modules, ModuleKind::SteadyState)?;
        check_kinds(differential_modules, ModuleKind::Differential)?;
        check_inputs_available(
            initial_state,
            parameters,
            drivers,
            steady_state_modules.iter().chain(differential_modules),
        )?;
        check_unique_definitions(
            initial_state,
            parameters,
            drivers,
            steady_state_modules,
            differential_modules,
        )?;

        let mut differential_names = Vec::new();
        let mut initial_values = Vec::new();
        for creator in differential_modules {
            for output in creator.outputs() {
                let value =
                    initial_state
                        .get(output)
                        .ok_or_else(|| Error::MissingInitialCondition {
                            module: creator.name().to_string(),
                            quantity: output.clone(),
                        })?;
                differential_names.push(output.clone());
                initial_values.push(value);
            }
        }

        let steady_output_names: Vec<String> = steady_state_modules
            .iter()
            .flat_map(|c| c.outputs().iter().cloned())
            .collect();

        let mut quantities = initial_state.clone();
        for (name, value) in parameters.iter() {
            quantities.set(name, value);
        }
        for (name, column) in drivers.iter() {
            quantities.set(name, column[0]);
        }
        for name in &steady_output_names {
            quantities.set(name.as_str(), 0.0);
        }

        let mut reported_names: Vec<String> = drivers
            .names()
            .chain(initial_state.names())
            .map(str::to_string)
            .collect();
        reported_names.extend(steady_output_names.iter().cloned());

        let steady_modules = steady_state_modules
            .iter()
            .map(|creator| SteadyStep {
                module: creator.create_module(),
                outputs: QuantityStore::zeroed(creator.outputs().iter().map(String::as_str)),
            })
            .collect();
        let differential_instances = differential_modules
            .iter()
            .map(|creator| creator.create_module())
            .collect();

        let requires_euler = steady_state_modules
            .iter()
            .chain(differential_modules)
            .any(|c| c.requires_euler());

        log::debug!(
            "resolved dynamical system: {} steady-state modules, {} differential modules, {} differential quantities, {} time points",
            steady_state_modules.len(),
            differential_modules.len(),
            differential_names.len(),
            ntimes
        );

        Ok(Self {
            derivatives: QuantityStore::zeroed(differential_names.iter().map(String::as_str)),
            quantities,
            drivers: drivers.clone(),
            ntimes,
            differential_names,
            initial_values,
            steady_modules,
            differential_modules: differential_instances,
            steady_output_names,
            reported_names,
            requires_euler,
        })
    }

    /// Restores every differential quantity to its initial value.
    pub fn reset(&mut self) {
        for (name, &value) in self.differential_names.iter().zip(&self.initial_values) {
            if let Some(slot) = self.quantities.get_mut(name) {
                *slot = value;
            }
        }
    }

    pub fn get_differential_quantity_names(&self) -> &[String] {
        &self.differential_names
    }

    /// Copies the current differential-quantity values into `out`.
    pub fn get_differential_quantities(&self, out: &mut [f64]) -> Result<()> {
        check_len(self.differential_names.len(), out.len())?;
        for (slot, name) in out.iter_mut().zip(&self.differential_names) {
            *slot = self.quantities.get(name).unwrap_or(f64::NAN);
        }
        Ok(())
    }

    /// Number of time points in the driver series.
    pub fn get_ntimes(&self) -> usize {
        self.ntimes
    }

    /// True when some module may only be integrated with a fixed-step Euler method.
    pub fn requires_euler_ode_solver(&self) -> bool {
        self.requires_euler
    }

    /// The live namespace, as left by the most recent evaluation.
    pub fn quantities(&self) -> &QuantityStore {
        &self.quantities
    }

    pub fn driver_names(&self) -> impl Iterator<Item = &str> {
        self.drivers.names()
    }

    pub fn steady_state_output_names(&self) -> &[String] {
        &self.steady_output_names
    }

    /// Names sampled into a simulation result: drivers, initial-state
    /// quantities and steady-state outputs.
    pub fn result_quantity_names(&self) -> &[String] {
        &self.reported_names
    }

    /// Sets the state and drivers for time `t`, then runs the steady-state modules.
    pub fn calculate_steady_state_outputs(&mut self, x: &[f64], t: f64) -> Result<()> {
        check_len(self.differential_names.len(), x.len())?;
        self.set_state(x);
        self.update_drivers(t);
        self.run_steady_state_modules()
    }

    /// Computes dx/dt at state `x` and (fractional) time index `t`.
    pub fn calculate_derivative(&mut self, x: &[f64], t: f64, dxdt: &mut [f64]) -> Result<()> {
        check_len(self.differential_names.len(), dxdt.len())?;
        self.calculate_steady_state_outputs(x, t)?;

        self.derivatives.fill(0.0);
        for module in &self.differential_modules {
            module.run(&self.quantities, &mut self.derivatives)?;
        }

        for (slot, name) in dxdt.iter_mut().zip(&self.differential_names) {
            *slot = self.derivatives.get(name).unwrap_or(f64::NAN);
        }
        Ok(())
    }

    fn set_state(&mut self, x: &[f64]) {
        for (name, &value) in self.differential_names.iter().zip(x) {
            if let Some(slot) = self.quantities.get_mut(name) {
                *slot = value;
            }
        }
    }

    /// Loads the driver row for `t`, interpolating linearly between rows.
    fn update_drivers(&mut self, t: f64) {
        let last = (self.ntimes - 1) as f64;
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, last) };
        let lower = t.floor() as usize;
        let fraction = t - lower as f64;

        for (name, column) in self.drivers.iter() {
            let value = if fraction > 0.0 && lower + 1 < column.len() {
                column[lower] + fraction * (column[lower + 1] - column[lower])
            } else {
                column[lower]
            };
            if let Some(slot) = self.quantities.get_mut(name) {
                *slot = value;
            }
        }
    }

    fn run_steady_state_modules(&mut self) -> Result<()> {
        for step in &mut self.steady_modules {
            step.module.run(&self.quantities, &mut step.outputs)?;
            for (name, value) in step.outputs.iter() {
                if let Some(slot) = self.quantities.get_mut(name) {
                    *slot = value;
                }
            }
        }
        Ok(())
    }
}

impl OdeSystem for DynamicalSystem {
    fn dimension(&self) -> usize {
        self.differential_names.len()
    }

    fn apply(&mut self, t: f64, x: &[f64], out: &mut [f64]) -> Result<()> {
        self.calculate_derivative(x, t, out)
    }
}

fn check_len(expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::DimensionMismatch { expected, actual })
    }
}

fn check_kinds(creators: &[Arc<dyn ModuleCreator>], expected: ModuleKind) -> Result<()> {
    match creators.iter().find(|c| c.kind() != expected) {
        Some(creator) => Err(Error::WrongModuleKind {
            module: creator.name().to_string(),
            expected: expected.as_str(),
            actual: creator.kind().as_str(),
        }),
        None => Ok(()),
    }
}

/// Walks the modules in order; each may only read quantities supplied
/// externally or produced by a module earlier in the walk.
fn check_inputs_available<'a>(
    initial_state: &'a QuantityStore,
    parameters: &'a QuantityStore,
    drivers: &'a QuantitySeries,
    creators: impl Iterator<Item = &'a Arc<dyn ModuleCreator>>,
) -> Result<()> {
    let mut available: HashSet<&str> = initial_state
        .names()
        .chain(parameters.names())
        .chain(drivers.names())
        .collect();

    for creator in creators {
        if let Some(missing) = creator
            .inputs()
            .iter()
            .find(|input| !available.contains(input.as_str()))
        {
            return Err(Error::MissingInput {
                module: creator.name().to_string(),
                quantity: missing.clone(),
            });
        }
        available.extend(creator.outputs().iter().map(String::as_str));
    }
    Ok(())
}

/// Every quantity must have exactly one source. A differential output is
/// expected to also appear in the initial state, which supplies its initial
/// condition, so that pairing does not count as a second definition.
fn check_unique_definitions(
    initial_state: &QuantityStore,
    parameters: &QuantityStore,
    drivers: &QuantitySeries,
    steady_state_modules: &[Arc<dyn ModuleCreator>],
    differential_modules: &[Arc<dyn ModuleCreator>],
) -> Result<()> {
    let mut sources: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for name in initial_state.names() {
        sources.entry(name).or_default().push(INITIAL_STATE);
    }
    for name in parameters.names() {
        sources.entry(name).or_default().push(PARAMETERS);
    }
    for name in drivers.names() {
        sources.entry(name).or_default().push(DRIVERS);
    }
    for creator in steady_state_modules.iter().chain(differential_modules) {
        for output in creator.outputs() {
            sources.entry(output.as_str()).or_default().push(creator.name());
        }
    }

    let differential_outputs: HashSet<&str> = differential_modules
        .iter()
        .flat_map(|c| c.outputs().iter().map(String::as_str))
        .collect();

    let duplicates: Vec<DuplicatedQuantity> = sources
        .into_iter()
        .filter(|(name, from)| {
            let initial_condition =
                differential_outputs.contains(name) && from.contains(&INITIAL_STATE);
            from.len() - usize::from(initial_condition) > 1
        })
        .map(|(name, from)| DuplicatedQuantity {
            name: name.to_string(),
            sources: from.into_iter().map(str::to_string).collect(),
        })
        .collect();

    if duplicates.is_empty() {
        Ok(())
    } else {
        Err(Error::DuplicateOutput(duplicates))
    }
}
