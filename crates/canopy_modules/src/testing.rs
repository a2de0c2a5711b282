use crate::standard::{thermal_time_rate, THERMAL_TIME_INPUTS};
use canopy_core::module::{Derivatives, DifferentialModule, Inputs, Outputs, SteadyStateModule};
use canopy_core::{Module, ModuleDescriptor, ModuleFactory, ModuleLibrary, Result};
use std::sync::Arc;

pub const LIBRARY_NAME: &str = "test";

/// d(elapsed_time)/dt = timestep
pub struct ElapsedTime;

impl DifferentialModule for ElapsedTime {
    fn run(&self, inputs: &Inputs<'_>, derivatives: &mut Derivatives<'_>) -> Result<()> {
        derivatives.add("elapsed_time", inputs.get("timestep")?)
    }
}

/// Degrees of `temp` above `tbase`, floored at zero.
pub struct TemperatureAnomaly;

impl SteadyStateModule for TemperatureAnomaly {
    fn run(&self, inputs: &Inputs<'_>, outputs: &mut Outputs<'_>) -> Result<()> {
        let anomaly = (inputs.get("temp")? - inputs.get("tbase")?).max(0.0);
        outputs.set("degrees_above_base", anomaly)
    }
}

/// Same interface as the standard `thermal_time_linear`.
pub struct ThermalTimeLinear;

impl DifferentialModule for ThermalTimeLinear {
    fn run(&self, inputs: &Inputs<'_>, derivatives: &mut Derivatives<'_>) -> Result<()> {
        let rate = thermal_time_rate(
            inputs.get("time")?,
            inputs.get("sowing_time")?,
            inputs.get("temp")?,
            inputs.get("tbase")?,
        );
        derivatives.add("TTc", rate)
    }
}

/// Accumulates `ttc_rate` until `TTc` reaches `ttc_threshold`, then stops.
///
/// The switch makes the derivative discontinuous in the state, so adaptive
/// solvers chase the corner; only Euler gives a predictable result.
pub struct ThermalTimeSwitch;

impl DifferentialModule for ThermalTimeSwitch {
    fn run(&self, inputs: &Inputs<'_>, derivatives: &mut Derivatives<'_>) -> Result<()> {
        let ttc = inputs.get("TTc")?;
        let rate = if ttc < inputs.get("ttc_threshold")? {
            inputs.get("ttc_rate")?
        } else {
            0.0
        };
        derivatives.add("TTc", rate)
    }
}

pub fn test_library() -> ModuleLibrary {
    ModuleLibrary::new(LIBRARY_NAME)
        .with(Arc::new(ModuleFactory::new(
            ModuleDescriptor::differential("elapsed_time_module", &["timestep"], &["elapsed_time"]),
            || Module::differential("elapsed_time_module", ElapsedTime),
        )))
        .with(Arc::new(ModuleFactory::new(
            ModuleDescriptor::steady_state(
                "temperature_anomaly",
                &["temp", "tbase"],
                &["degrees_above_base"],
            ),
            || Module::steady_state("temperature_anomaly", TemperatureAnomaly),
        )))
        .with(Arc::new(ModuleFactory::new(
            ModuleDescriptor::differential("thermal_time_linear", &THERMAL_TIME_INPUTS, &["TTc"]),
            || Module::differential("thermal_time_linear", ThermalTimeLinear),
        )))
        .with(Arc::new(ModuleFactory::new(
            ModuleDescriptor::differential(
                "thermal_time_switch",
                &["TTc", "ttc_threshold", "ttc_rate"],
                &["TTc"],
            )
            .euler_only(),
            || Module::differential("thermal_time_switch", ThermalTimeSwitch),
        )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_core::{ModuleCreator, QuantityStore};

    #[test]
    fn switch_stops_at_threshold() {
        let library = test_library();
        let creator = library.retrieve("thermal_time_switch").expect("registered");
        assert!(creator.requires_euler());

        let module = creator.create_module();
        let mut inputs = QuantityStore::from([("TTc", 1.0), ("ttc_threshold", 2.0), ("ttc_rate", 0.5)]);
        let mut derivative = QuantityStore::from([("TTc", 0.0)]);
        module.run(&inputs, &mut derivative).expect("run");
        assert_eq!(derivative.get("TTc"), Some(0.5));

        inputs.set("TTc", 2.0);
        let mut derivative = QuantityStore::from([("TTc", 0.0)]);
        module.run(&inputs, &mut derivative).expect("run");
        assert_eq!(derivative.get("TTc"), Some(0.0));
    }

    #[test]
    fn anomaly_overwrites_and_floors_at_zero() {
        let module = test_library()
            .retrieve("temperature_anomaly")
            .expect("registered")
            .create_module();
        let mut output = QuantityStore::from([("degrees_above_base", 7.0)]);
        module
            .run(&QuantityStore::from([("temp", 25.0), ("tbase", 10.0)]), &mut output)
            .expect("run");
        assert_eq!(output.get("degrees_above_base"), Some(15.0));

        module
            .run(&QuantityStore::from([("temp", 4.0), ("tbase", 10.0)]), &mut output)
            .expect("run");
        assert_eq!(output.get("degrees_above_base"), Some(0.0));
    }

    #[test]
    fn elapsed_time_adds_timestep() {
        let module = test_library()
            .retrieve("elapsed_time_module")
            .expect("registered")
            .create_module();
        let mut derivative = QuantityStore::from([("elapsed_time", 0.0)]);
        module
            .run(&QuantityStore::from([("timestep", 1.0)]), &mut derivative)
            .expect("run");
        assert_eq!(derivative.get("elapsed_time"), Some(1.0));
    }
}
