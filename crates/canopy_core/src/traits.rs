use crate::error::Result;

/// A system of first-order ODEs, dx/dt = f(t, x).
///
/// Evaluation takes `&mut self` because implementors may keep a live namespace
/// that every evaluation overwrites.
pub trait OdeSystem {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field.
    /// t: current time (a fractional index into the driver rows)
    /// x: current state
    /// out: buffer to write dx/dt into
    fn apply(&mut self, t: f64, x: &[f64], out: &mut [f64]) -> Result<()>;
}

/// A solver that advances a system by exactly one step of size dt.
pub trait Steppable {
    /// t: current time (updated after step)
    /// state: current state (updated after step)
    fn step(&mut self, system: &mut impl OdeSystem, t: &mut f64, state: &mut [f64], dt: f64)
        -> Result<()>;
}

/// A solver step with an embedded error estimate, for adaptive step-size control.
pub trait EmbeddedStep {
    /// Order of the lower-order solution used for the error estimate.
    const ERROR_ORDER: u32;

    /// Computes a trial step from (t, state) without modifying `state`.
    /// The proposed new state is written to `next`, the local error estimate to `error`.
    fn try_step(
        &mut self,
        system: &mut impl OdeSystem,
        t: f64,
        state: &[f64],
        dt: f64,
        next: &mut [f64],
        error: &mut [f64],
    ) -> Result<()>;
}
