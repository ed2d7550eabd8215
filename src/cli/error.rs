//! CLI-level errors (wraps infrastructure errors)

use thiserror::Error;

use crate::application::ApplicationError;
use crate::domain::DomainError;
use crate::exitcode;
use crate::infrastructure::InfraError;

/// CLI errors are the top-level error type.
/// These are what get displayed to the user.
#[derive(Error, Debug)]
pub enum CliError {
    #[error("{0}")]
    Infra(#[from] InfraError),

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("{0}")]
    Usage(String),
}

impl From<ApplicationError> for CliError {
    fn from(e: ApplicationError) -> Self {
        CliError::Infra(InfraError::Application(e))
    }
}

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

impl CliError {
    /// Get the appropriate exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::InvalidArgs(_) | CliError::Usage(_) => exitcode::USAGE,
            CliError::Infra(InfraError::Application(e)) => match e {
                ApplicationError::MissingCalibration => exitcode::USAGE,
                ApplicationError::Config { .. } => exitcode::CONFIG,
                ApplicationError::Estimator { .. } => exitcode::UNAVAILABLE,
                ApplicationError::Domain(DomainError::InvalidParameter(_)) => exitcode::USAGE,
                ApplicationError::Domain(_) => exitcode::DATAERR,
                ApplicationError::OperationFailed { source, .. } => {
                    match source.downcast_ref::<std::io::Error>().map(|e| e.kind()) {
                        Some(std::io::ErrorKind::NotFound) => exitcode::NOINPUT,
                        Some(_) => exitcode::IOERR,
                        None => exitcode::SOFTWARE,
                    }
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn given_missing_input_when_mapping_then_noinput() {
        let err: CliError = ApplicationError::OperationFailed {
            context: "read tree file: t.nwk".into(),
            source: Box::new(io::Error::from(io::ErrorKind::NotFound)),
        }
        .into();
        assert_eq!(err.exit_code(), exitcode::NOINPUT);
    }

    #[test]
    fn given_domain_error_when_mapping_then_dataerr() {
        let err: CliError = ApplicationError::Domain(DomainError::NodeNotFound("B".into())).into();
        assert_eq!(err.exit_code(), exitcode::DATAERR);
        assert_eq!(err.to_string(), "cannot find the haplogroup node in tree: B");
    }

    #[test]
    fn given_estimator_failure_when_mapping_then_unavailable() {
        let err: CliError = ApplicationError::Estimator {
            message: "exited with 1".into(),
            exit_code: Some(1),
        }
        .into();
        assert_eq!(err.exit_code(), exitcode::UNAVAILABLE);
    }

    #[test]
    fn given_missing_calibration_when_mapping_then_usage() {
        let err: CliError = ApplicationError::MissingCalibration.into();
        assert_eq!(err.exit_code(), exitcode::USAGE);
    }
}
