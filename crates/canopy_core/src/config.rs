use crate::error::{Error, Result};
use crate::expression::ExpressionModuleCreator;
use crate::module::ModuleKind;
use crate::quantity::{QuantitySeries, QuantityStore};
use serde::{Deserialize, Serialize};

/// Solver selection and tolerances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    pub ode_solver_name: String,
    pub output_step_size: f64,
    pub adaptive_rel_error_tol: f64,
    pub adaptive_abs_error_tol: f64,
    pub adaptive_max_steps: usize,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            ode_solver_name: "auto".to_string(),
            output_step_size: 1.0,
            adaptive_rel_error_tol: 1e-4,
            adaptive_abs_error_tol: 1e-4,
            adaptive_max_steps: 200,
        }
    }
}

impl SolverSettings {
    pub fn validate(&self) -> Result<()> {
        let positive = |value: f64, what: &str| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(Error::InvalidSettings(format!(
                    "{what} must be positive and finite, got {value}"
                )))
            }
        };
        positive(self.output_step_size, "output step size")?;
        positive(self.adaptive_rel_error_tol, "relative error tolerance")?;
        positive(self.adaptive_abs_error_tol, "absolute error tolerance")?;
        if self.adaptive_max_steps == 0 {
            return Err(Error::InvalidSettings(
                "max steps must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// A module defined inline from `output = expression` lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionModuleConfig {
    pub name: String,
    pub kind: ModuleKind,
    pub equations: Vec<String>,
    #[serde(default)]
    pub euler_only: bool,
}

impl ExpressionModuleConfig {
    pub fn build(&self) -> Result<ExpressionModuleCreator> {
        let lines: Vec<&str> = self.equations.iter().map(String::as_str).collect();
        let creator = ExpressionModuleCreator::from_definitions(&self.name, self.kind, &lines)?;
        Ok(if self.euler_only {
            creator.euler_only()
        } else {
            creator
        })
    }
}

/// Everything needed to assemble and run one simulation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub initial_state: QuantityStore,
    pub parameters: QuantityStore,
    pub drivers: QuantitySeries,
    pub steady_state_modules: Vec<String>,
    pub differential_modules: Vec<String>,
    pub expression_modules: Vec<ExpressionModuleConfig>,
    pub solver: SolverSettings,
}
