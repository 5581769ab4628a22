use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for stackctl
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StackctlConfig {
    /// Locations of the artifacts the diagnostics read
    pub paths: PathsConfig,
    /// Compose service names and internal ports of the stack
    pub services: ServiceConfig,
    /// Probe timeouts
    pub probes: ProbeConfig,
    /// Polling behavior for checks that wait on starting services
    pub retry: RetryConfig,
    /// Classification policies
    pub policy: PolicyConfig,
    /// Logging settings
    pub observability: ObservabilityConfig,
    /// Pause after auto-starting the stack before checks begin
    pub startup_grace_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathsConfig {
    /// Deployment configuration written by the setup wizard
    pub deployment_config: PathBuf,
    /// Generated compose file
    pub compose_file: PathBuf,
    /// OS identity file
    pub os_release: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    pub application: String,
    pub database: String,
    pub proxy: String,
    pub certificate_manager: String,
    /// Compute workers not declared in the deployment still match this prefix
    pub worker_prefix: String,
    pub application_port: u16,
    pub database_port: u16,
    pub worker_port: u16,
    /// Path probed in addition to `/` by the endpoint check
    pub api_path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProbeConfig {
    pub command_timeout_secs: u64,
    pub detection_timeout_secs: u64,
    pub metadata_timeout_secs: u64,
    pub tcp_timeout_secs: u64,
    /// Timeout of the connect attempt inside a container
    pub exec_connect_timeout_secs: u64,
    /// Timeout of the whole `exec` round trip
    pub exec_timeout_secs: u64,
    pub tls_timeout_secs: u64,
    pub http_timeout_secs: u64,
    pub fix_timeout_secs: u64,
    pub start_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    pub max_wait_secs: u64,
    pub interval_secs: u64,
}

/// Status assigned to a TLS chain-verification failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFailurePolicy {
    Warn,
    Fail,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PolicyConfig {
    pub chain_verification_failure: ChainFailurePolicy,
    /// Certificates expiring within this many days are reported as warnings
    pub cert_expiry_warning_days: i64,
    pub rate_limit_burst: u32,
    pub rate_limit_delay_ms: u64,
    /// Body fragments identifying the application's own "resource not found" 404
    pub not_found_signatures: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level used when RUST_LOG is not set
    pub log_level: String,
    /// Emit logs as JSON lines
    pub json_logs: bool,
}

impl Default for StackctlConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig {
                deployment_config: PathBuf::from("config.json"),
                compose_file: PathBuf::from("docker-compose.yml"),
                os_release: PathBuf::from("/etc/os-release"),
            },
            services: ServiceConfig {
                application: "opal".to_string(),
                database: "mongo".to_string(),
                proxy: "nginx".to_string(),
                certificate_manager: "certbot".to_string(),
                worker_prefix: "rock".to_string(),
                application_port: 8080,
                database_port: 27017,
                worker_port: 8085,
                api_path: "/ws".to_string(),
            },
            probes: ProbeConfig {
                command_timeout_secs: 30,
                detection_timeout_secs: 5,
                metadata_timeout_secs: 3,
                tcp_timeout_secs: 5,
                exec_connect_timeout_secs: 5,
                exec_timeout_secs: 15,
                tls_timeout_secs: 10,
                http_timeout_secs: 10,
                fix_timeout_secs: 300,
                start_timeout_secs: 600,
            },
            retry: RetryConfig {
                max_wait_secs: 120,
                interval_secs: 10,
            },
            policy: PolicyConfig {
                chain_verification_failure: ChainFailurePolicy::Warn,
                cert_expiry_warning_days: 14,
                rate_limit_burst: 3,
                rate_limit_delay_ms: 500,
                not_found_signatures: vec![
                    "RESTEASY003210".to_string(),
                    "Could not find resource for full path".to_string(),
                ],
            },
            observability: ObservabilityConfig {
                log_level: "warn".to_string(),
                json_logs: false,
            },
            startup_grace_secs: 3,
        }
    }
}

impl ProbeConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn detection_timeout(&self) -> Duration {
        Duration::from_secs(self.detection_timeout_secs)
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }

    pub fn tcp_timeout(&self) -> Duration {
        Duration::from_secs(self.tcp_timeout_secs)
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }

    pub fn tls_timeout(&self) -> Duration {
        Duration::from_secs(self.tls_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn fix_timeout(&self) -> Duration {
        Duration::from_secs(self.fix_timeout_secs)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }
}

impl StackctlConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration file (stackctl.toml)
    /// 3. Environment variables (prefixed with STACKCTL__)
    pub fn load() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if Path::new("stackctl.toml").exists() {
            builder = builder.add_source(File::with_name("stackctl"));
        }

        // Nested keys use a double underscore: STACKCTL__RETRY__MAX_WAIT_SECS=60
        builder = builder.add_source(
            Environment::with_prefix("STACKCTL")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<Result<StackctlConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        // Load .env file first
        let _ = StackctlConfig::load_env_file();
        StackctlConfig::load()
    });

/// Get the global configuration
pub fn config() -> Result<&'static StackctlConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_retry_window() {
        let config = StackctlConfig::default();
        assert_eq!(config.retry.max_wait_secs, 120);
        assert_eq!(config.retry.interval_secs, 10);
        assert_eq!(config.policy.chain_verification_failure, ChainFailurePolicy::Warn);
    }

    #[test]
    fn test_every_probe_timeout_is_finite_and_non_zero() {
        let probes = StackctlConfig::default().probes;
        for timeout in [
            probes.command_timeout(),
            probes.detection_timeout(),
            probes.metadata_timeout(),
            probes.tcp_timeout(),
            probes.exec_timeout(),
            probes.tls_timeout(),
            probes.http_timeout(),
            probes.fix_timeout(),
            probes.start_timeout(),
        ] {
            assert!(timeout > Duration::ZERO);
        }
    }

    #[test]
    fn test_defaults_round_trip_through_config_builder() {
        let built = Config::builder()
            .add_source(Config::try_from(&StackctlConfig::default()).unwrap())
            .build()
            .unwrap();
        let config: StackctlConfig = built.try_deserialize().unwrap();
        assert_eq!(config.services.application, "opal");
        assert_eq!(config.paths.compose_file, PathBuf::from("docker-compose.yml"));
    }
}
