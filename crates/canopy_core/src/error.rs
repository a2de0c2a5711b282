use std::fmt;

use thiserror::Error;

/// A quantity that is defined by more than one source, together with every source defining it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicatedQuantity {
    pub name: String,
    pub sources: Vec<String>,
}

impl fmt::Display for DuplicatedQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.sources.join(", "))
    }
}

/// Errors raised while assembling or integrating a system.
#[derive(Debug, Error)]
pub enum Error {
    #[error("module `{name}` is not registered in library `{library}`")]
    NotFound { library: String, name: String },

    #[error("module `{module}` requires input `{quantity}`, which is not available at this point in the module order")]
    MissingInput { module: String, quantity: String },

    #[error("the following quantities are defined more than once: {}", join_duplicates(.0))]
    DuplicateOutput(Vec<DuplicatedQuantity>),

    #[error("differential quantity `{quantity}` (produced by module `{module}`) has no initial value")]
    MissingInitialCondition { module: String, quantity: String },

    #[error(
        "the {solver} solver exceeded its budget of {max_steps} steps between time indices {start} and {end}"
    )]
    StepBudgetExceeded {
        solver: String,
        start: usize,
        end: usize,
        max_steps: usize,
    },

    #[error("invalid drivers: {0}")]
    InvalidDrivers(String),

    #[error("module `{module}` is a {actual} module but was supplied in the {expected} module list")]
    WrongModuleKind {
        module: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("module `{module}` accessed quantity `{quantity}`, which is not present in its quantity view")]
    MissingQuantity { module: String, quantity: String },

    #[error("unknown ODE solver `{0}`")]
    UnknownSolver(String),

    #[error("invalid solver settings: {0}")]
    InvalidSettings(String),

    #[error("expression error in module `{module}`: {message}")]
    Expression { module: String, message: String },

    #[error("singular iteration matrix at time index {0}")]
    SingularMatrix(f64),

    #[error("buffer length mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

fn join_duplicates(duplicates: &[DuplicatedQuantity]) -> String {
    duplicates
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, Error>;
