use approx::assert_abs_diff_eq;
use canopy_core::{QuantitySeries, QuantityStore, SimulationResult, Simulator};
use canopy_modules::standard_library;
use std::f64::consts::PI;

const MASS: f64 = 10.0;
const SPRING_CONSTANT: f64 = 0.1;
const POSITION: f64 = 0.0;
const VELOCITY: f64 = 1.0;

fn omega() -> f64 {
    (SPRING_CONSTANT / MASS).sqrt()
}

fn period() -> f64 {
    2.0 * PI / omega()
}

/// x(t) = A sin(wt + phi) with A and phi fixed by the initial position and velocity.
fn analytic_position(t: f64) -> f64 {
    let phase = (omega() * POSITION).atan2(VELOCITY);
    let amplitude = (POSITION.powi(2) + (VELOCITY / omega()).powi(2)).sqrt();
    amplitude * (omega() * t + phase).sin()
}

fn simulate(solver: &str, ntimes: usize) -> SimulationResult {
    let library = standard_library();
    let mut simulator = Simulator::new(
        &QuantityStore::from([("position", POSITION), ("velocity", VELOCITY)]),
        &QuantityStore::from([("mass", MASS), ("spring_constant", SPRING_CONSTANT), ("timestep", 1.0)]),
        &QuantitySeries::from([("time", (0..ntimes).map(|i| i as f64).collect())]),
        &[library.retrieve("harmonic_energy").expect("registered")],
        &[library.retrieve("harmonic_oscillator").expect("registered")],
        solver,
        1.0,
        1e-4,
        1e-4,
        200,
    )
    .expect("valid simulator");
    simulator.run_simulation().expect("integration")
}

#[test]
fn rk4_follows_the_analytic_solution() {
    let ntimes = (period() * 2.0).round() as usize + 1;
    let result = simulate("boost_rk4", ntimes);

    assert_eq!(result.ntimes(), ntimes);
    for (i, t) in result["time"].iter().enumerate() {
        assert_eq!(*t, i as f64);
        assert_abs_diff_eq!(result["position"][i], analytic_position(*t), epsilon = 1e-3);
    }

    // position changes sign across every half period
    let mut t = period() / 2.0;
    while t < (ntimes - 1) as f64 {
        let before = result["position"][t.floor() as usize];
        let after = result["position"][t.floor() as usize + 1];
        assert!(before.signum() != after.signum(), "no sign change at t = {t}");
        t += period() / 2.0;
    }
}

#[test]
fn total_energy_is_conserved() {
    let ntimes = (period() * 2.0).round() as usize + 1;
    let result = simulate("boost_rk4", ntimes);
    let energy = &result["total_energy"];
    for e in energy {
        assert_abs_diff_eq!(*e, energy[0], epsilon = 0.00075);
    }
    for i in 0..ntimes {
        assert_abs_diff_eq!(
            result["kinetic_energy"][i] + result["spring_energy"][i],
            energy[i],
            epsilon = 1e-12
        );
    }
}

#[test]
fn short_run_with_auto_solver() {
    let result = simulate("auto", 2);
    assert_eq!(&result["time"], &[0.0, 1.0]);
    assert_abs_diff_eq!(result["position"][1], analytic_position(1.0), epsilon = 1e-3);
}

#[test]
fn result_table_prints_every_row() {
    let result = simulate("homemade_euler", 4);
    let table = result.to_string();
    assert_eq!(table.lines().count(), 5);
    let header = table.lines().next().expect("header");
    for name in ["position", "velocity", "time", "total_energy"] {
        assert!(header.contains(name));
    }
    assert!(!header.contains("mass"));
}
