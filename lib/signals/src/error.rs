//! Error types for confound numerics.

use std::fmt;

/// Errors from signal computations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalError {
    /// Array shapes do not line up.
    ShapeMismatch {
        what: String,
        expected: usize,
        found: usize,
    },
    /// An input that must hold data is empty.
    Empty { what: String },
    /// A parameter is outside its valid range.
    InvalidParameter { name: String, reason: String },
    /// A table could not be read or written.
    Table { reason: String },
}

impl fmt::Display for SignalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShapeMismatch {
                what,
                expected,
                found,
            } => write!(f, "{what}: expected {expected} entries, found {found}"),
            Self::Empty { what } => write!(f, "{what} is empty"),
            Self::InvalidParameter { name, reason } => {
                write!(f, "invalid parameter '{name}': {reason}")
            }
            Self::Table { reason } => write!(f, "confounds table: {reason}"),
        }
    }
}

impl std::error::Error for SignalError {}

impl From<csv::Error> for SignalError {
    fn from(err: csv::Error) -> Self {
        Self::Table {
            reason: err.to_string(),
        }
    }
}

/// Errors from the CompCor decomposition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompCorError {
    /// The eigen-decomposition did not converge.
    NotConverged { sweeps: usize },
    /// The confound design matrix is singular.
    Singular,
    /// The data contain NaN or infinite values.
    NonFinite,
    /// The inputs are malformed.
    Signal(SignalError),
}

impl CompCorError {
    /// Whether the failure is a numerical instability worth retrying.
    #[must_use]
    pub fn is_unstable(&self) -> bool {
        !matches!(self, Self::Signal(_))
    }
}

impl fmt::Display for CompCorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConverged { sweeps } => {
                write!(f, "eigen-decomposition did not converge after {sweeps} sweeps")
            }
            Self::Singular => write!(f, "singular design matrix"),
            Self::NonFinite => write!(f, "data contain non-finite values"),
            Self::Signal(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for CompCorError {}

impl From<SignalError> for CompCorError {
    fn from(err: SignalError) -> Self {
        Self::Signal(err)
    }
}
