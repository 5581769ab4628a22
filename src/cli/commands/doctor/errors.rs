use crate::deployment::DeploymentError;
use crate::external::EngineError;
use thiserror::Error;

/// Exit code of runs that end before any check ran
pub const FATAL_EXIT_CODE: i32 = 100;

/// Run-level failures that stop a diagnostic pass
#[derive(Debug, Error)]
pub enum DoctorError {
    #[error("Deployment configuration is not available: {source}")]
    ConfigurationMissing {
        #[from]
        source: DeploymentError,
    },
    #[error("Container engine is not available: {source}")]
    EngineUnavailable {
        #[source]
        source: EngineError,
    },
    #[error("Stack '{stack}' is not running and auto-start is disabled")]
    StackNotRunning { stack: String },
    #[error("Failed to start stack '{stack}': {source}")]
    StartFailed {
        stack: String,
        #[source]
        source: EngineError,
    },
}

impl DoctorError {
    /// The concrete command the operator should run next
    pub fn next_action(&self) -> &'static str {
        match self {
            DoctorError::ConfigurationMissing { .. } => {
                "Run setup first to write the deployment configuration, then re-run `stackctl diagnose`"
            }
            DoctorError::EngineUnavailable { .. } => {
                "Start the container engine (e.g. `sudo systemctl start docker`), then run setup first if the stack was never created"
            }
            DoctorError::StackNotRunning { .. } => "Run `stackctl up` to start the stack, then re-run `stackctl diagnose`",
            DoctorError::StartFailed { .. } => "Inspect the engine output with `stackctl status`, then retry `stackctl up`",
        }
    }

    pub fn exit_code(&self) -> i32 {
        FATAL_EXIT_CODE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_missing_configuration_points_at_setup() {
        let error: DoctorError = DeploymentError::Missing {
            path: PathBuf::from("config.json"),
        }
        .into();
        assert!(error.to_string().contains("config.json"));
        assert!(error.next_action().contains("setup"));
        assert_eq!(error.exit_code(), FATAL_EXIT_CODE);
    }
}
