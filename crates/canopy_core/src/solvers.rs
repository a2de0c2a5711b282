use crate::config::SolverSettings;
use crate::dynamical_system::DynamicalSystem;
use crate::error::{Error, Result};
use crate::quantity::SimulationResult;
use crate::traits::{EmbeddedStep, OdeSystem, Steppable};
use nalgebra::{DMatrix, DVector};
use serde::Serialize;
use std::fmt;

/// Explicit (forward) Euler Solver
pub struct Euler {
    k1: Vec<f64>,
}

impl Euler {
    pub fn new(dim: usize) -> Self {
        Self { k1: vec![0.0; dim] }
    }
}

impl Steppable for Euler {
    fn step(
        &mut self,
        system: &mut impl OdeSystem,
        t: &mut f64,
        state: &mut [f64],
        dt: f64,
    ) -> Result<()> {
        system.apply(*t, state, &mut self.k1)?;
        for i in 0..state.len() {
            state[i] += dt * self.k1[i];
        }
        *t += dt;
        Ok(())
    }
}

/// Classic Runge-Kutta 4th Order Solver
pub struct RK4 {
    k1: Vec<f64>,
    k2: Vec<f64>,
    k3: Vec<f64>,
    k4: Vec<f64>,
    tmp: Vec<f64>,
}

impl RK4 {
    pub fn new(dim: usize) -> Self {
        Self {
            k1: vec![0.0; dim],
            k2: vec![0.0; dim],
            k3: vec![0.0; dim],
            k4: vec![0.0; dim],
            tmp: vec![0.0; dim],
        }
    }
}

impl Steppable for RK4 {
    fn step(
        &mut self,
        system: &mut impl OdeSystem,
        t: &mut f64,
        state: &mut [f64],
        dt: f64,
    ) -> Result<()> {
        let t0 = *t;

        // k1 = f(t, y)
        system.apply(t0, state, &mut self.k1)?;

        // k2 = f(t + dt/2, y + dt*k1/2)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k1[i] * 0.5;
        }
        system.apply(t0 + dt * 0.5, &self.tmp, &mut self.k2)?;

        // k3 = f(t + dt/2, y + dt*k2/2)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k2[i] * 0.5;
        }
        system.apply(t0 + dt * 0.5, &self.tmp, &mut self.k3)?;

        // k4 = f(t + dt, y + dt*k3)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k3[i];
        }
        system.apply(t0 + dt, &self.tmp, &mut self.k4)?;

        // y_next = y + dt/6 * (k1 + 2k2 + 2k3 + k4)
        for i in 0..state.len() {
            state[i] += dt / 6.0 * (self.k1[i] + 2.0 * self.k2[i] + 2.0 * self.k3[i] + self.k4[i]);
        }

        *t = t0 + dt;
        Ok(())
    }
}

/// Cash-Karp 5(4) Solver
pub struct CashKarp54 {
    k: [Vec<f64>; 6],
    tmp: Vec<f64>,
}

impl CashKarp54 {
    pub fn new(dim: usize) -> Self {
        Self {
            k: std::array::from_fn(|_| vec![0.0; dim]),
            tmp: vec![0.0; dim],
        }
    }
}

impl EmbeddedStep for CashKarp54 {
    const ERROR_ORDER: u32 = 4;

    fn try_step(
        &mut self,
        system: &mut impl OdeSystem,
        t: f64,
        state: &[f64],
        dt: f64,
        next: &mut [f64],
        error: &mut [f64],
    ) -> Result<()> {
        const C: [f64; 6] = [0.0, 1.0 / 5.0, 3.0 / 10.0, 3.0 / 5.0, 1.0, 7.0 / 8.0];
        const A: [[f64; 5]; 6] = [
            [0.0, 0.0, 0.0, 0.0, 0.0],
            [1.0 / 5.0, 0.0, 0.0, 0.0, 0.0],
            [3.0 / 40.0, 9.0 / 40.0, 0.0, 0.0, 0.0],
            [3.0 / 10.0, -9.0 / 10.0, 6.0 / 5.0, 0.0, 0.0],
            [-11.0 / 54.0, 5.0 / 2.0, -70.0 / 27.0, 35.0 / 27.0, 0.0],
            [
                1631.0 / 55296.0,
                175.0 / 512.0,
                575.0 / 13824.0,
                44275.0 / 110592.0,
                253.0 / 4096.0,
            ],
        ];
        // 5th order weights
        const B: [f64; 6] = [37.0 / 378.0, 0.0, 250.0 / 621.0, 125.0 / 594.0, 0.0, 512.0 / 1771.0];
        // embedded 4th order weights
        const B_HAT: [f64; 6] = [
            2825.0 / 27648.0,
            0.0,
            18575.0 / 48384.0,
            13525.0 / 55296.0,
            277.0 / 14336.0,
            1.0 / 4.0,
        ];

        let n = state.len();
        for stage in 0..6 {
            for i in 0..n {
                let mut acc = 0.0;
                for (j, a) in A[stage].iter().enumerate().take(stage) {
                    acc += a * self.k[j][i];
                }
                self.tmp[i] = state[i] + dt * acc;
            }
            system.apply(t + C[stage] * dt, &self.tmp, &mut self.k[stage])?;
        }

        for i in 0..n {
            let mut high = 0.0;
            let mut diff = 0.0;
            for s in 0..6 {
                high += B[s] * self.k[s][i];
                diff += (B[s] - B_HAT[s]) * self.k[s][i];
            }
            next[i] = state[i] + dt * high;
            error[i] = dt * diff;
        }
        Ok(())
    }
}

/// Tsitouras 5/4 Solver
pub struct Tsit5 {
    k1: Vec<f64>,
    k2: Vec<f64>,
    k3: Vec<f64>,
    k4: Vec<f64>,
    k5: Vec<f64>,
    k6: Vec<f64>,
    k7: Vec<f64>,
    tmp: Vec<f64>,
}

impl Tsit5 {
    pub fn new(dim: usize) -> Self {
        Self {
            k1: vec![0.0; dim],
            k2: vec![0.0; dim],
            k3: vec![0.0; dim],
            k4: vec![0.0; dim],
            k5: vec![0.0; dim],
            k6: vec![0.0; dim],
            k7: vec![0.0; dim],
            tmp: vec![0.0; dim],
        }
    }
}

impl EmbeddedStep for Tsit5 {
    const ERROR_ORDER: u32 = 4;

    fn try_step(
        &mut self,
        system: &mut impl OdeSystem,
        t0: f64,
        state: &[f64],
        dt: f64,
        next: &mut [f64],
        error: &mut [f64],
    ) -> Result<()> {
        // Tsit5 Coefficients
        let c2 = 0.161;
        let c3 = 0.327;
        let c4 = 0.9;
        let c5 = 0.9800255409045097;

        let a21 = 0.161;

        let a31 = -0.008480655492356989;
        let a32 = 0.335480655492357;

        let a41 = 2.897153057105493;
        let a42 = -6.359448489975075;
        let a43 = 4.3622954328695815;

        let a51 = 5.325864828439257;
        let a52 = -11.748883564062828;
        let a53 = 7.4955393428898365;
        let a54 = -0.09249506636175525;

        let a61 = 5.86145544294642;
        let a62 = -12.92096931784711;
        let a63 = 8.159367898576159;
        let a64 = -0.071584973281401;
        let a65 = -0.028269050394068383;

        // b coefficients (5th order)
        let b1 = 0.09646076681806523;
        let b2 = 0.01;
        let b3 = 0.4798896504144996;
        let b4 = 1.379008574103742;
        let b5 = -3.290069515436081;
        let b6 = 2.324710524099774;

        // error weights: difference between the 5th and embedded 4th order solutions
        let e1 = -0.00178001105222577714;
        let e2 = -0.0008164344596567469;
        let e3 = 0.007880878010261995;
        let e4 = -0.1447110071732629;
        let e5 = 0.5823571654525552;
        let e6 = -0.45808210592918697;
        let e7 = 0.015151515151515152;

        let n = state.len();

        // k1
        system.apply(t0, state, &mut self.k1)?;

        // k2
        for i in 0..n {
            self.tmp[i] = state[i] + dt * (a21 * self.k1[i]);
        }
        system.apply(t0 + c2 * dt, &self.tmp, &mut self.k2)?;

        // k3
        for i in 0..n {
            self.tmp[i] = state[i] + dt * (a31 * self.k1[i] + a32 * self.k2[i]);
        }
        system.apply(t0 + c3 * dt, &self.tmp, &mut self.k3)?;

        // k4
        for i in 0..n {
            self.tmp[i] = state[i] + dt * (a41 * self.k1[i] + a42 * self.k2[i] + a43 * self.k3[i]);
        }
        system.apply(t0 + c4 * dt, &self.tmp, &mut self.k4)?;

        // k5
        for i in 0..n {
            self.tmp[i] = state[i]
                + dt * (a51 * self.k1[i] + a52 * self.k2[i] + a53 * self.k3[i] + a54 * self.k4[i]);
        }
        system.apply(t0 + c5 * dt, &self.tmp, &mut self.k5)?;

        // k6
        for i in 0..n {
            self.tmp[i] = state[i]
                + dt * (a61 * self.k1[i]
                    + a62 * self.k2[i]
                    + a63 * self.k3[i]
                    + a64 * self.k4[i]
                    + a65 * self.k5[i]);
        }
        system.apply(t0 + dt, &self.tmp, &mut self.k6)?;

        // Proposed state
        for i in 0..n {
            next[i] = state[i]
                + dt * (b1 * self.k1[i]
                    + b2 * self.k2[i]
                    + b3 * self.k3[i]
                    + b4 * self.k4[i]
                    + b5 * self.k5[i]
                    + b6 * self.k6[i]);
        }

        // k7 at the proposed state feeds the error estimate
        system.apply(t0 + dt, next, &mut self.k7)?;
        for i in 0..n {
            error[i] = dt
                * (e1 * self.k1[i]
                    + e2 * self.k2[i]
                    + e3 * self.k3[i]
                    + e4 * self.k4[i]
                    + e5 * self.k5[i]
                    + e6 * self.k6[i]
                    + e7 * self.k7[i]);
        }
        Ok(())
    }
}

/// Two-stage linearly implicit Rosenbrock Solver (ROS2) for stiff systems.
///
/// The Jacobian is approximated by forward differences at the start of each step.
/// The difference between the 2nd order solution and the embedded linearly
/// implicit Euler solution serves as the error estimate.
pub struct Rosenbrock2 {
    f0: Vec<f64>,
    f1: Vec<f64>,
    tmp: Vec<f64>,
    jacobian: DMatrix<f64>,
}

impl Rosenbrock2 {
    const GAMMA: f64 = 1.0 + std::f64::consts::FRAC_1_SQRT_2;

    pub fn new(dim: usize) -> Self {
        Self {
            f0: vec![0.0; dim],
            f1: vec![0.0; dim],
            tmp: vec![0.0; dim],
            jacobian: DMatrix::zeros(dim, dim),
        }
    }
}

impl EmbeddedStep for Rosenbrock2 {
    const ERROR_ORDER: u32 = 1;

    fn try_step(
        &mut self,
        system: &mut impl OdeSystem,
        t: f64,
        state: &[f64],
        dt: f64,
        next: &mut [f64],
        error: &mut [f64],
    ) -> Result<()> {
        let n = state.len();
        if n == 0 {
            return Ok(());
        }

        system.apply(t, state, &mut self.f0)?;

        self.tmp.copy_from_slice(state);
        for j in 0..n {
            let delta = f64::EPSILON.sqrt() * state[j].abs().max(1.0);
            self.tmp[j] = state[j] + delta;
            system.apply(t, &self.tmp, &mut self.f1)?;
            self.tmp[j] = state[j];
            for i in 0..n {
                self.jacobian[(i, j)] = (self.f1[i] - self.f0[i]) / delta;
            }
        }

        // W = I - gamma * dt * J
        let w = DMatrix::identity(n, n) - &self.jacobian * (Self::GAMMA * dt);
        let lu = w.lu();

        let k1 = lu
            .solve(&DVector::from_column_slice(&self.f0))
            .ok_or(Error::SingularMatrix(t))?;

        for i in 0..n {
            self.tmp[i] = state[i] + dt * k1[i];
        }
        system.apply(t + dt, &self.tmp, &mut self.f1)?;

        let rhs = DVector::from_iterator(n, (0..n).map(|i| self.f1[i] - 2.0 * k1[i]));
        let k2 = lu.solve(&rhs).ok_or(Error::SingularMatrix(t))?;

        for i in 0..n {
            next[i] = state[i] + dt * (1.5 * k1[i] + 0.5 * k2[i]);
            error[i] = dt * 0.5 * (k1[i] + k2[i]);
        }
        Ok(())
    }
}

/// The stepping method behind a solver name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Euler,
    Rk4,
    CashKarp54,
    Tsit5,
    Rosenbrock,
}

impl Method {
    /// Canonical solver name for this method.
    pub fn name(self) -> &'static str {
        match self {
            Method::Euler => "homemade_euler",
            Method::Rk4 => "boost_rk4",
            Method::CashKarp54 => "boost_rkck54",
            Method::Tsit5 => "tsit5",
            Method::Rosenbrock => "boost_rosenbrock",
        }
    }

    pub fn is_euler(self) -> bool {
        matches!(self, Method::Euler)
    }

    pub fn is_adaptive(self) -> bool {
        matches!(self, Method::CashKarp54 | Method::Tsit5 | Method::Rosenbrock)
    }
}

/// `None` stands for "auto": chosen per system at integration time.
fn lookup_method(name: &str) -> Result<Option<Method>> {
    match name {
        "homemade_euler" | "boost_euler" => Ok(Some(Method::Euler)),
        "boost_rk4" => Ok(Some(Method::Rk4)),
        "boost_rkck54" => Ok(Some(Method::CashKarp54)),
        "tsit5" => Ok(Some(Method::Tsit5)),
        "boost_rosenbrock" => Ok(Some(Method::Rosenbrock)),
        "auto" => Ok(None),
        other => Err(Error::UnknownSolver(other.to_string())),
    }
}

/// Statistics from the most recent call to [`OdeSolver::integrate`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntegrationReport {
    pub solver_name: String,
    pub method: Method,
    pub accepted_steps: usize,
    pub rejected_steps: usize,
    pub derivative_evaluations: usize,
}

impl fmt::Display for IntegrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.solver_name == "auto" {
            write!(f, "auto ({})", self.method.name())?;
        } else {
            f.write_str(&self.solver_name)?;
        }
        write!(
            f,
            ": {} steps accepted, {} steps rejected, {} derivative evaluations",
            self.accepted_steps, self.rejected_steps, self.derivative_evaluations
        )
    }
}

#[derive(Debug, Default)]
struct StepStats {
    accepted: usize,
    rejected: usize,
}

/// Counts derivative evaluations on the way through to the wrapped system.
struct Counted<'a, S> {
    inner: &'a mut S,
    evaluations: usize,
}

impl<S: OdeSystem> OdeSystem for Counted<'_, S> {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn apply(&mut self, t: f64, x: &[f64], out: &mut [f64]) -> Result<()> {
        self.evaluations += 1;
        self.inner.apply(t, x, out)
    }
}

/// Advances the state across one output interval [i, i + 1].
trait IntervalAdvance {
    fn advance(
        &mut self,
        system: &mut impl OdeSystem,
        state: &mut [f64],
        interval: usize,
        stats: &mut StepStats,
    ) -> Result<()>;
}

struct FixedSteps<'s, S> {
    stepper: S,
    settings: &'s SolverSettings,
    substeps: usize,
}

impl<S: Steppable> IntervalAdvance for FixedSteps<'_, S> {
    fn advance(
        &mut self,
        system: &mut impl OdeSystem,
        state: &mut [f64],
        interval: usize,
        stats: &mut StepStats,
    ) -> Result<()> {
        if self.substeps > self.settings.adaptive_max_steps {
            return Err(Error::StepBudgetExceeded {
                solver: self.settings.ode_solver_name.clone(),
                start: interval,
                end: interval + 1,
                max_steps: self.settings.adaptive_max_steps,
            });
        }
        let dt = 1.0 / self.substeps as f64;
        let mut t = interval as f64;
        for _ in 0..self.substeps {
            self.stepper.step(system, &mut t, state, dt)?;
            stats.accepted += 1;
        }
        Ok(())
    }
}

struct AdaptiveSteps<'s, S> {
    stepper: S,
    settings: &'s SolverSettings,
    solver_name: &'s str,
    dt: f64,
    next: Vec<f64>,
    error: Vec<f64>,
}

impl<S: EmbeddedStep> AdaptiveSteps<'_, S> {
    const SAFETY: f64 = 0.9;
    const MIN_FACTOR: f64 = 0.2;
    const MAX_FACTOR: f64 = 5.0;

    /// Scaled max-norm of the error estimate; at most 1 means the step is accepted.
    fn error_norm(&self, state: &[f64]) -> f64 {
        state
            .iter()
            .zip(&self.next)
            .zip(&self.error)
            .map(|((y, y_next), e)| {
                let scale = self.settings.adaptive_abs_error_tol
                    + self.settings.adaptive_rel_error_tol * y.abs().max(y_next.abs());
                (e / scale).abs()
            })
            .fold(0.0, |acc: f64, v| {
                if acc.is_nan() || v.is_nan() {
                    f64::NAN
                } else {
                    acc.max(v)
                }
            })
    }
}

impl<S: EmbeddedStep> IntervalAdvance for AdaptiveSteps<'_, S> {
    fn advance(
        &mut self,
        system: &mut impl OdeSystem,
        state: &mut [f64],
        interval: usize,
        stats: &mut StepStats,
    ) -> Result<()> {
        let exponent = -1.0 / (S::ERROR_ORDER as f64 + 1.0);
        let end = (interval + 1) as f64;
        let mut t = interval as f64;
        let mut attempts = 0;

        while end - t > 1e-12 {
            if attempts >= self.settings.adaptive_max_steps {
                return Err(Error::StepBudgetExceeded {
                    solver: self.solver_name.to_string(),
                    start: interval,
                    end: interval + 1,
                    max_steps: self.settings.adaptive_max_steps,
                });
            }
            attempts += 1;

            let truncated = self.dt > end - t;
            let h = if truncated { end - t } else { self.dt };
            self.stepper
                .try_step(system, t, state, h, &mut self.next, &mut self.error)?;
            let err = self.error_norm(state);

            if err <= 1.0 {
                t = if truncated { end } else { t + h };
                state.copy_from_slice(&self.next);
                stats.accepted += 1;

                let factor = if err == 0.0 {
                    Self::MAX_FACTOR
                } else {
                    (Self::SAFETY * err.powf(exponent)).clamp(Self::MIN_FACTOR, Self::MAX_FACTOR)
                };
                self.dt = if truncated {
                    self.dt.max(h * factor)
                } else {
                    h * factor
                };
            } else {
                stats.rejected += 1;
                let factor = if err.is_finite() {
                    (Self::SAFETY * err.powf(exponent)).clamp(Self::MIN_FACTOR, 1.0)
                } else {
                    Self::MIN_FACTOR
                };
                self.dt = h * factor;
            }
        }
        Ok(())
    }
}

/// Integrates a [`DynamicalSystem`] over its driver time axis.
#[derive(Debug, Clone)]
pub struct OdeSolver {
    settings: SolverSettings,
    method: Option<Method>,
    report: Option<IntegrationReport>,
}

impl OdeSolver {
    pub const NOT_YET_CALLED: &'static str = "not yet called";

    pub fn new(
        ode_solver_name: &str,
        output_step_size: f64,
        adaptive_rel_error_tol: f64,
        adaptive_abs_error_tol: f64,
        adaptive_max_steps: usize,
    ) -> Result<Self> {
        Self::from_settings(SolverSettings {
            ode_solver_name: ode_solver_name.to_string(),
            output_step_size,
            adaptive_rel_error_tol,
            adaptive_abs_error_tol,
            adaptive_max_steps,
        })
    }

    pub fn from_settings(settings: SolverSettings) -> Result<Self> {
        let method = lookup_method(&settings.ode_solver_name)?;
        settings.validate()?;
        log::debug!("created ODE solver {:?}", settings);
        Ok(Self {
            settings,
            method,
            report: None,
        })
    }

    pub fn settings(&self) -> &SolverSettings {
        &self.settings
    }

    /// The method that will be used for `system`.
    pub fn method_for(&self, system: &DynamicalSystem) -> Method {
        self.method.unwrap_or(if system.requires_euler_ode_solver() {
            Method::Euler
        } else {
            Method::Rosenbrock
        })
    }

    /// Integrates from the system's current differential state across the whole time axis.
    ///
    /// The system is not reset first; call [`DynamicalSystem::reset`] to start
    /// from the initial conditions again.
    pub fn integrate(&mut self, system: &mut DynamicalSystem) -> Result<SimulationResult> {
        let method = self.method_for(system);
        if method.is_adaptive() && system.requires_euler_ode_solver() {
            log::warn!(
                "system requires an Euler solver but {} was selected; results may be unreliable",
                self.settings.ode_solver_name
            );
        }

        let dim = system.dimension();
        let settings = &self.settings;
        let name = settings.ode_solver_name.as_str();
        let mut stats = StepStats::default();

        let (result, evaluations) = match method {
            Method::Euler => drive(system, fixed(Euler::new(dim), settings), &mut stats)?,
            Method::Rk4 => drive(system, fixed(RK4::new(dim), settings), &mut stats)?,
            Method::CashKarp54 => drive(
                system,
                adaptive(CashKarp54::new(dim), settings, name, dim),
                &mut stats,
            )?,
            Method::Tsit5 => drive(
                system,
                adaptive(Tsit5::new(dim), settings, name, dim),
                &mut stats,
            )?,
            Method::Rosenbrock => drive(
                system,
                adaptive(Rosenbrock2::new(dim), settings, name, dim),
                &mut stats,
            )?,
        };

        let report = IntegrationReport {
            solver_name: settings.ode_solver_name.clone(),
            method,
            accepted_steps: stats.accepted,
            rejected_steps: stats.rejected,
            derivative_evaluations: evaluations,
        };
        log::info!("integration finished: {report}");
        self.report = Some(report);
        Ok(result)
    }

    pub fn last_report(&self) -> Option<&IntegrationReport> {
        self.report.as_ref()
    }

    pub fn generate_integrate_report(&self) -> String {
        match &self.report {
            Some(report) => report.to_string(),
            None => Self::NOT_YET_CALLED.to_string(),
        }
    }
}

fn fixed<S: Steppable>(stepper: S, settings: &SolverSettings) -> FixedSteps<'_, S> {
    // Tolerate rounding in 1 / step so that e.g. a step of 0.1 gives 10 sub-steps.
    let substeps = ((1.0 / settings.output_step_size) - 1e-9).ceil().max(1.0) as usize;
    FixedSteps {
        stepper,
        settings,
        substeps,
    }
}

fn adaptive<'s, S: EmbeddedStep>(
    stepper: S,
    settings: &'s SolverSettings,
    solver_name: &'s str,
    dim: usize,
) -> AdaptiveSteps<'s, S> {
    AdaptiveSteps {
        stepper,
        settings,
        solver_name,
        dt: settings.output_step_size,
        next: vec![0.0; dim],
        error: vec![0.0; dim],
    }
}

/// Runs `advancer` over every output interval, sampling all quantities after each one.
fn drive(
    system: &mut DynamicalSystem,
    mut advancer: impl IntervalAdvance,
    stats: &mut StepStats,
) -> Result<(SimulationResult, usize)> {
    let ntimes = system.get_ntimes();
    let mut state = vec![0.0; system.dimension()];
    system.get_differential_quantities(&mut state)?;

    let mut result = SimulationResult::with_columns(
        system.result_quantity_names().iter().map(String::as_str),
        ntimes,
    );
    system.calculate_steady_state_outputs(&state, 0.0)?;
    result.record(system.quantities());

    let mut counted = Counted {
        inner: system,
        evaluations: 0,
    };
    for interval in 0..ntimes.saturating_sub(1) {
        advancer.advance(&mut counted, &mut state, interval, stats)?;
        counted
            .inner
            .calculate_steady_state_outputs(&state, (interval + 1) as f64)?;
        result.record(counted.inner.quantities());
        log::trace!(
            "interval {} -> {}: {} steps accepted so far",
            interval,
            interval + 1,
            stats.accepted
        );
    }
    Ok((result, counted.evaluations))
}
