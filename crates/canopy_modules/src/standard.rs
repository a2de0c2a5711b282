use canopy_core::module::{
    Derivatives, DifferentialModule, Inputs, Outputs, SteadyStateModule,
};
use canopy_core::{Module, ModuleDescriptor, ModuleFactory, ModuleLibrary, Result};
use std::sync::Arc;

pub const LIBRARY_NAME: &str = "standard";

/// Mass on a spring: dx/dt = v, dv/dt = -k x / m.
pub struct HarmonicOscillator;

impl DifferentialModule for HarmonicOscillator {
    fn run(&self, inputs: &Inputs<'_>, derivatives: &mut Derivatives<'_>) -> Result<()> {
        let position = inputs.get("position")?;
        let velocity = inputs.get("velocity")?;
        let mass = inputs.get("mass")?;
        let spring_constant = inputs.get("spring_constant")?;

        derivatives.add("position", velocity)?;
        derivatives.add("velocity", -spring_constant * position / mass)
    }
}

/// Kinetic, spring and total energy of the oscillator.
pub struct HarmonicEnergy;

impl SteadyStateModule for HarmonicEnergy {
    fn run(&self, inputs: &Inputs<'_>, outputs: &mut Outputs<'_>) -> Result<()> {
        let position = inputs.get("position")?;
        let velocity = inputs.get("velocity")?;
        let mass = inputs.get("mass")?;
        let spring_constant = inputs.get("spring_constant")?;

        let kinetic_energy = 0.5 * mass * velocity * velocity;
        let spring_energy = 0.5 * spring_constant * position * position;
        outputs.set("kinetic_energy", kinetic_energy)?;
        outputs.set("spring_energy", spring_energy)?;
        outputs.set("total_energy", kinetic_energy + spring_energy)
    }
}

/// Thermal time accumulated linearly above a base temperature once the crop is sown.
pub struct ThermalTimeLinear;

/// Degree-days per time unit. Zero before sowing or at or below `tbase`.
pub fn thermal_time_rate(time: f64, sowing_time: f64, temp: f64, tbase: f64) -> f64 {
    if time < sowing_time || temp <= tbase {
        0.0
    } else {
        (temp - tbase) / 24.0
    }
}

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

pub(crate) const THERMAL_TIME_INPUTS: [&str; 4] = ["time", "sowing_time", "temp", "tbase"];

pub fn standard_library() -> ModuleLibrary {
    ModuleLibrary::new(LIBRARY_NAME)
        .with(Arc::new(ModuleFactory::new(
            ModuleDescriptor::differential(
                "harmonic_oscillator",
                &["position", "velocity", "mass", "spring_constant"],
                &["position", "velocity"],
            ),
            || Module::differential("harmonic_oscillator", HarmonicOscillator),
        )))
        .with(Arc::new(ModuleFactory::new(
            ModuleDescriptor::steady_state(
                "harmonic_energy",
                &["position", "velocity", "mass", "spring_constant"],
                &["kinetic_energy", "spring_energy", "total_energy"],
            ),
            || Module::steady_state("harmonic_energy", HarmonicEnergy),
        )))
        .with(Arc::new(ModuleFactory::new(
            ModuleDescriptor::differential("thermal_time_linear", &THERMAL_TIME_INPUTS, &["TTc"]),
            || Module::differential("thermal_time_linear", ThermalTimeLinear),
        )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use canopy_core::{ModuleCreator, ModuleKind, QuantityStore};

    #[test]
    fn rate_follows_sowing_and_base_temperature() {
        assert_relative_eq!(thermal_time_rate(200.0, 100.0, 25.0, 1.0), 1.0);
        assert_eq!(thermal_time_rate(50.0, 100.0, 25.0, 1.0), 0.0);
        assert_eq!(thermal_time_rate(200.0, 100.0, 1.0, 1.0), 0.0);
    }

    #[test]
    fn thermal_time_module_accumulates_rate() {
        let library = standard_library();
        let module = library
            .retrieve("thermal_time_linear")
            .expect("registered")
            .create_module();
        let inputs = QuantityStore::from([
            ("time", 200.0),
            ("sowing_time", 100.0),
            ("temp", 25.0),
            ("tbase", 1.0),
        ]);
        let mut output = QuantityStore::from([("TTc", 0.0)]);
        module.run(&inputs, &mut output).expect("run");
        assert_relative_eq!(output.get("TTc").expect("TTc"), 1.0);
    }

    #[test]
    fn energy_module_splits_energy() {
        let module = standard_library()
            .retrieve("harmonic_energy")
            .expect("registered")
            .create_module();
        let inputs = QuantityStore::from([
            ("position", 2.0),
            ("velocity", 1.0),
            ("mass", 10.0),
            ("spring_constant", 0.5),
        ]);
        let mut outputs = QuantityStore::zeroed(["kinetic_energy", "spring_energy", "total_energy"]);
        module.run(&inputs, &mut outputs).expect("run");
        assert_relative_eq!(outputs.get("kinetic_energy").expect("kinetic"), 5.0);
        assert_relative_eq!(outputs.get("spring_energy").expect("spring"), 1.0);
        assert_relative_eq!(outputs.get("total_energy").expect("total"), 6.0);
    }

    #[test]
    fn library_contents() {
        let library = standard_library();
        assert_eq!(library.name(), "standard");
        assert_eq!(
            library.get_all_modules(),
            vec!["harmonic_energy", "harmonic_oscillator", "thermal_time_linear"]
        );
        let oscillator = library.retrieve("harmonic_oscillator").expect("registered");
        assert_eq!(oscillator.kind(), ModuleKind::Differential);
    }
}
