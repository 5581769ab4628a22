// stackctl library - stack lifecycle and health diagnostics
// Exposes the command layer and its seams for testing and integration

pub mod cli;
pub mod config;
pub mod deployment;
pub mod external;
pub mod telemetry;

// Re-export key types for easy access
pub use cli::commands::doctor::{DoctorCommand, DoctorOptions, FATAL_EXIT_CODE};
pub use cli::commands::lifecycle::{ComposeLifecycle, LifecycleAction, LifecycleCommand, StackLifecycle};
pub use config::{config, StackctlConfig};
pub use deployment::{DeploymentConfig, DeploymentError};
pub use telemetry::init_telemetry;
