use anyhow::Context;
use canopy_core::{SimulationConfig, SimulationResult, Simulator};
use canopy_modules::all_libraries;
use js_sys::Float64Array;
use serde::Serialize;
use serde_wasm_bindgen::{from_value, to_value};
use wasm_bindgen::prelude::*;

/// Resolves `config` against every bundled library, standard first.
pub fn build_simulator(config: &SimulationConfig) -> anyhow::Result<Simulator> {
    let libraries = all_libraries();
    let libraries: Vec<_> = libraries.iter().collect();
    Simulator::from_config(config, &libraries).context("Failed to build simulation")
}

#[derive(Serialize)]
struct SimulationSummary<'a> {
    differential_quantity_names: &'a [String],
    requires_euler_ode_solver: bool,
    ntimes: usize,
    report: String,
}

#[wasm_bindgen]
pub struct WasmSimulation {
    simulator: Simulator,
    last_result: Option<SimulationResult>,
}

#[wasm_bindgen]
impl WasmSimulation {
    #[wasm_bindgen(constructor)]
    pub fn new(config: JsValue) -> Result<WasmSimulation, JsValue> {
        console_error_panic_hook::set_once();

        let config: SimulationConfig = from_value(config)
            .map_err(|e| JsValue::from_str(&format!("Invalid simulation config: {}", e)))?;
        let simulator = build_simulator(&config).map_err(|e| JsValue::from_str(&format!("{:#}", e)))?;
        Ok(WasmSimulation {
            simulator,
            last_result: None,
        })
    }

    /// Integrates from the current state and returns every column keyed by name.
    pub fn run(&mut self) -> Result<JsValue, JsValue> {
        let result = self
            .simulator
            .run_simulation()
            .map_err(|e| JsValue::from_str(&format!("Simulation failed: {}", e)))?;
        let payload = to_value(&result)
            .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))?;
        self.last_result = Some(result);
        Ok(payload)
    }

    /// One column of the most recent run.
    pub fn column(&self, name: &str) -> Result<Float64Array, JsValue> {
        let result = self
            .last_result
            .as_ref()
            .ok_or_else(|| JsValue::from_str("Simulation has not been run."))?;
        let column = result
            .get(name)
            .ok_or_else(|| JsValue::from_str(&format!("No column named {}.", name)))?;
        Ok(Float64Array::from(column))
    }

    /// Restores the differential quantities to their initial values.
    pub fn reset(&mut self) {
        self.simulator.system_mut().reset();
    }

    pub fn report(&self) -> String {
        self.simulator.generate_integrate_report()
    }

    pub fn differential_quantity_names(&self) -> Vec<String> {
        self.simulator.system().get_differential_quantity_names().to_vec()
    }

    pub fn requires_euler_ode_solver(&self) -> bool {
        self.simulator.system().requires_euler_ode_solver()
    }

    pub fn ntimes(&self) -> usize {
        self.simulator.system().get_ntimes()
    }

    pub fn summary(&self) -> Result<JsValue, JsValue> {
        let system = self.simulator.system();
        let summary = SimulationSummary {
            differential_quantity_names: system.get_differential_quantity_names(),
            requires_euler_ode_solver: system.requires_euler_ode_solver(),
            ntimes: system.get_ntimes(),
            report: self.simulator.generate_integrate_report(),
        };
        to_value(&summary).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(differential: &[&str]) -> SimulationConfig {
        let json = serde_json::json!({
            "initial_state": {"position": 0.0, "velocity": 1.0, "TTc": 0.0},
            "parameters": {"mass": 10.0, "spring_constant": 0.1, "sowing_time": 0.0, "tbase": 10.0},
            "drivers": {
                "time": [0.0, 1.0, 2.0, 3.0],
                "temp": [12.0, 14.0, 16.0, 18.0]
            },
            "steady_state_modules": ["harmonic_energy"],
            "differential_modules": differential,
            "solver": {"ode_solver_name": "homemade_euler"}
        });
        serde_json::from_value(json).expect("valid config")
    }

    #[test]
    fn builds_against_bundled_libraries() {
        let mut simulator =
            build_simulator(&config(&["harmonic_oscillator", "thermal_time_linear"])).expect("builds");
        assert_eq!(
            simulator.system().get_differential_quantity_names(),
            &["position".to_string(), "velocity".to_string(), "TTc".to_string()]
        );
        assert!(!simulator.system().requires_euler_ode_solver());

        let result = simulator.run_simulation().expect("runs");
        assert_eq!(result.ntimes(), 4);
        // (2 + 4 + 6) / 24
        assert!((result["TTc"][3] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn unknown_module_is_reported_with_context() {
        let err = build_simulator(&config(&["no_such_module"])).err().expect("fails");
        let message = format!("{:#}", err);
        assert!(message.starts_with("Failed to build simulation"));
        assert!(message.contains("no_such_module"));
    }
}
