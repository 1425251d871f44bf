use std::fmt;

/// Failure kinds raised by the clustered rank tests.
///
/// Errors travel as `anyhow::Error`; use `err.downcast_ref::<ClusWilcoxError>()`
/// to recover the kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ClusWilcoxError {
    /// Empty, misaligned or otherwise malformed input
    InvalidInput { argument: &'static str, message: String },
    /// Method/mode/group-count combination that is not statistically defined
    UnsupportedDesign { argument: &'static str, message: String },
    /// Zero or negative null variance, or too few clusters
    DegenerateDistribution { argument: &'static str, message: String },
    /// Options that contradict each other
    ConfigurationConflict { argument: &'static str, message: String },
}

impl ClusWilcoxError {
    pub fn invalid_input(argument: &'static str, message: impl Into<String>) -> anyhow::Error {
        ClusWilcoxError::InvalidInput {
            argument,
            message: message.into(),
        }
        .into()
    }

    pub fn unsupported_design(argument: &'static str, message: impl Into<String>) -> anyhow::Error {
        ClusWilcoxError::UnsupportedDesign {
            argument,
            message: message.into(),
        }
        .into()
    }

    pub fn degenerate(argument: &'static str, message: impl Into<String>) -> anyhow::Error {
        ClusWilcoxError::DegenerateDistribution {
            argument,
            message: message.into(),
        }
        .into()
    }

    pub fn conflict(argument: &'static str, message: impl Into<String>) -> anyhow::Error {
        ClusWilcoxError::ConfigurationConflict {
            argument,
            message: message.into(),
        }
        .into()
    }

    /// Name of the argument the failure concerns.
    pub fn argument(&self) -> &'static str {
        match self {
            ClusWilcoxError::InvalidInput { argument, .. }
            | ClusWilcoxError::UnsupportedDesign { argument, .. }
            | ClusWilcoxError::DegenerateDistribution { argument, .. }
            | ClusWilcoxError::ConfigurationConflict { argument, .. } => argument,
        }
    }
}

impl fmt::Display for ClusWilcoxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusWilcoxError::InvalidInput { argument, message } => {
                write!(f, "Invalid input `{}`: {}", argument, message)
            }
            ClusWilcoxError::UnsupportedDesign { argument, message } => {
                write!(f, "Unsupported design (`{}`): {}", argument, message)
            }
            ClusWilcoxError::DegenerateDistribution { argument, message } => {
                write!(f, "Degenerate null distribution (`{}`): {}", argument, message)
            }
            ClusWilcoxError::ConfigurationConflict { argument, message } => {
                write!(f, "Conflicting configuration (`{}`): {}", argument, message)
            }
        }
    }
}

impl std::error::Error for ClusWilcoxError {}
