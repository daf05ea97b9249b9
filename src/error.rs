use std::fmt::{self, Display};
use std::io;

/// Provides `SimError` and maps other errors to
/// convert to a `SimError`.
///
/// None of these are recoverable inside the simulation core. They propagate to whoever drives
/// the run, which decides how to report them.
#[derive(Debug)]
#[allow(clippy::module_name_repetitions)]
pub enum SimError {
    IoError(io::Error),
    JsonError(serde_json::Error),
    CsvError(csv::Error),
    /// A configuration or policy entry refers to something that does not exist (an unknown
    /// venue type, a missing coefficient) or holds an invalid value.
    ConfigurationError(String),
    /// Tensor or index lengths disagree with the recorded agent/venue counts.
    ShapeMismatch(String),
    /// NaN or infinity detected in a computed hazard or probability.
    NumericalInstability(String),
    /// A probability handed to a sampler lies outside `[0, 1]`.
    InvalidProbability(String),
    ReportError(String),
    SimError(String),
}

impl From<io::Error> for SimError {
    fn from(error: io::Error) -> Self {
        SimError::IoError(error)
    }
}

impl From<serde_json::Error> for SimError {
    fn from(error: serde_json::Error) -> Self {
        SimError::JsonError(error)
    }
}

impl From<csv::Error> for SimError {
    fn from(error: csv::Error) -> Self {
        SimError::CsvError(error)
    }
}

impl From<String> for SimError {
    fn from(error: String) -> Self {
        SimError::SimError(error)
    }
}

impl From<&str> for SimError {
    fn from(error: &str) -> Self {
        SimError::SimError(error.to_string())
    }
}

impl std::error::Error for SimError {}

impl Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Error: {self:?}")?;
        Ok(())
    }
}
