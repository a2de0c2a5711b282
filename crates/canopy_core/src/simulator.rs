use crate::config::{SimulationConfig, SolverSettings};
use crate::dynamical_system::DynamicalSystem;
use crate::error::{Error, Result};
use crate::module::ModuleCreator;
use crate::quantity::{QuantitySeries, QuantityStore, SimulationResult};
use crate::registry::ModuleLibrary;
use crate::solvers::OdeSolver;
use std::sync::Arc;

/// A resolved system paired with the solver that integrates it.
///
/// Each call to [`Simulator::run_simulation`] continues from wherever the previous
/// one left the differential quantities. Use [`IdempotentSimulator`] to start from
/// the initial state every time.
#[derive(Debug)]
pub struct Simulator {
    system: DynamicalSystem,
    solver: OdeSolver,
}

impl Simulator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        initial_state: &QuantityStore,
        parameters: &QuantityStore,
        drivers: &QuantitySeries,
        steady_state_modules: &[Arc<dyn ModuleCreator>],
        differential_modules: &[Arc<dyn ModuleCreator>],
        ode_solver_name: &str,
        output_step_size: f64,
        adaptive_rel_error_tol: f64,
        adaptive_abs_error_tol: f64,
        adaptive_max_steps: usize,
    ) -> Result<Self> {
        let system = DynamicalSystem::new(
            initial_state,
            parameters,
            drivers,
            steady_state_modules,
            differential_modules,
        )?;
        let solver = OdeSolver::new(
            ode_solver_name,
            output_step_size,
            adaptive_rel_error_tol,
            adaptive_abs_error_tol,
            adaptive_max_steps,
        )?;
        Ok(Self { system, solver })
    }

    pub fn from_parts(system: DynamicalSystem, solver: OdeSolver) -> Self {
        Self { system, solver }
    }

    /// Builds a simulator from a configuration, resolving module names against
    /// the config's own expression modules first, then `libraries` in order.
    pub fn from_config(config: &SimulationConfig, libraries: &[&ModuleLibrary]) -> Result<Self> {
        let mut inline = ModuleLibrary::new("expression modules");
        for module in &config.expression_modules {
            inline.register(Arc::new(module.build()?));
        }

        let lookup = |name: &String| -> Result<Arc<dyn ModuleCreator>> {
            std::iter::once(&inline)
                .chain(libraries.iter().copied())
                .find(|library| library.contains(name))
                .ok_or_else(|| Error::NotFound {
                    library: std::iter::once(inline.name())
                        .chain(libraries.iter().map(|library| library.name()))
                        .collect::<Vec<_>>()
                        .join(", "),
                    name: name.clone(),
                })?
                .retrieve(name)
        };
        let steady = config
            .steady_state_modules
            .iter()
            .map(lookup)
            .collect::<Result<Vec<_>>>()?;
        let differential = config
            .differential_modules
            .iter()
            .map(lookup)
            .collect::<Result<Vec<_>>>()?;

        let system = DynamicalSystem::new(
            &config.initial_state,
            &config.parameters,
            &config.drivers,
            &steady,
            &differential,
        )?;
        let solver = OdeSolver::from_settings(config.solver.clone())?;
        Ok(Self { system, solver })
    }

    pub fn run_simulation(&mut self) -> Result<SimulationResult> {
        self.solver.integrate(&mut self.system)
    }

    pub fn system(&self) -> &DynamicalSystem {
        &self.system
    }

    pub fn system_mut(&mut self) -> &mut DynamicalSystem {
        &mut self.system
    }

    pub fn solver_settings(&self) -> &SolverSettings {
        self.solver.settings()
    }

    pub fn generate_integrate_report(&self) -> String {
        self.solver.generate_integrate_report()
    }
}

/// A [`Simulator`] that resets its system before every run, so repeated runs
/// give identical results.
#[derive(Debug)]
pub struct IdempotentSimulator {
    inner: Simulator,
}

impl IdempotentSimulator {
    pub fn new(inner: Simulator) -> Self {
        Self { inner }
    }

    pub fn run_simulation(&mut self) -> Result<SimulationResult> {
        self.inner.system.reset();
        self.inner.run_simulation()
    }

    pub fn system(&self) -> &DynamicalSystem {
        self.inner.system()
    }

    pub fn generate_integrate_report(&self) -> String {
        self.inner.generate_integrate_report()
    }

    pub fn into_inner(self) -> Simulator {
        self.inner
    }
}

impl From<Simulator> for IdempotentSimulator {
    fn from(inner: Simulator) -> Self {
        Self::new(inner)
    }
}
