use approx::assert_relative_eq;
use canopy_core::{IdempotentSimulator, QuantitySeries, QuantityStore, Simulator};
use canopy_modules::{standard_library, test_library};

fn thermal_time_simulator(solver: &str) -> Simulator {
    let library = standard_library();
    Simulator::new(
        &QuantityStore::from([("TTc", 0.0)]),
        &QuantityStore::from([
            ("sowing_time", 0.0),
            ("tbase", 5.0),
            ("temp", 11.0),
            ("timestep", 1.0),
        ]),
        &QuantitySeries::from([("time", (0..6).map(|i| i as f64).collect())]),
        &[],
        &[library.retrieve("thermal_time_linear").expect("registered")],
        solver,
        1.0,
        1e-4,
        1e-4,
        200,
    )
    .expect("valid simulator")
}

#[test]
fn plain_runs_continue_from_previous_state() {
    let mut simulator = thermal_time_simulator("homemade_euler");
    let first = simulator.run_simulation().expect("first run");
    let second = simulator.run_simulation().expect("second run");

    for i in 0..6 {
        assert_relative_eq!(first["TTc"][i], 0.25 * i as f64);
        assert_relative_eq!(second["TTc"][i], 1.25 + 0.25 * i as f64);
    }
    assert_eq!(first["time"], second["time"]);
}

#[test]
fn reset_restores_initial_conditions() {
    let mut simulator = thermal_time_simulator("boost_rkck54");
    let first = simulator.run_simulation().expect("first run");
    simulator.system_mut().reset();
    let second = simulator.run_simulation().expect("second run");
    assert_eq!(first, second);
}

#[test]
fn idempotent_simulator_repeats_exactly() {
    let mut simulator = IdempotentSimulator::new(thermal_time_simulator("boost_rosenbrock"));
    let first = simulator.run_simulation().expect("first run");
    let second = simulator.run_simulation().expect("second run");
    assert_eq!(first, second);
    assert!(simulator
        .generate_integrate_report()
        .starts_with("boost_rosenbrock:"));
}

#[test]
fn euler_only_module_selects_euler_under_auto() {
    let library = test_library();
    let mut simulator = Simulator::new(
        &QuantityStore::from([("TTc", 0.0)]),
        &QuantityStore::from([("ttc_threshold", 1.0), ("ttc_rate", 0.4)]),
        &QuantitySeries::from([("time", (0..5).map(|i| i as f64).collect())]),
        &[],
        &[library.retrieve("thermal_time_switch").expect("registered")],
        "auto",
        1.0,
        1e-4,
        1e-4,
        200,
    )
    .expect("valid simulator");
    assert!(simulator.system().requires_euler_ode_solver());

    let result = simulator.run_simulation().expect("integration");
    let expected = [0.0, 0.4, 0.8, 1.2, 1.2];
    for (value, expected) in result["TTc"].iter().zip(expected) {
        assert_relative_eq!(*value, expected, epsilon = 1e-12);
    }
    assert!(simulator
        .generate_integrate_report()
        .starts_with("auto (homemade_euler): 4 steps accepted"));
}
