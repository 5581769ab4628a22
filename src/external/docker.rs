//! Container engine abstractions
//!
//! Wraps the `docker` / compose CLI behind the [`CommandExecutor`] seam. Output
//! is parsed from JSON where the engine offers it.

use super::command::{CommandExecutor, CommandOutput, OutputMode};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\.(\d+)(?:\.(\d+))?").expect("static regex"));

/// First engine release with the compose v2 plugin (`docker compose`)
pub const COMPOSE_V2_MIN_VERSION: u32 = 2010;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Container engine CLI is not installed")]
    NotInstalled,
    #[error("Neither `docker compose` nor `docker-compose` is available")]
    ComposeUnavailable,
    #[error("Container engine command failed: {message}")]
    CommandFailed { message: String },
}

/// Which compose binary drives the stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComposeFlavor {
    /// `docker compose` plugin
    V2,
    /// standalone `docker-compose`
    V1,
}

impl ComposeFlavor {
    fn base(self) -> &'static [&'static str] {
        match self {
            ComposeFlavor::V2 => &["docker", "compose"],
            ComposeFlavor::V1 => &["docker-compose"],
        }
    }
}

/// One row of `compose ps --format json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSummary {
    #[serde(rename = "Service", default)]
    pub service: String,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "State", default)]
    pub state: String,
    #[serde(rename = "Status", default)]
    pub status: String,
}

impl ContainerSummary {
    pub fn is_running(&self) -> bool {
        self.state.eq_ignore_ascii_case("running")
    }
}

/// Parse an engine version string such as `Docker version 24.0.7, build afdd53b`
/// into a comparable `major * 100 + minor` code.
pub fn parse_version_code(version: &str) -> Option<u32> {
    let captures = VERSION_RE.captures(version)?;
    let major: u32 = captures.get(1)?.as_str().parse().ok()?;
    let minor: u32 = captures.get(2)?.as_str().parse().ok()?;
    Some(major * 100 + minor)
}

/// Parse `compose ps` output, which is JSON lines on recent compose releases
/// and a JSON array on older ones.
pub fn parse_containers(records: &[serde_json::Value]) -> Vec<ContainerSummary> {
    records
        .iter()
        .filter_map(|record| serde_json::from_value(record.clone()).ok())
        .collect()
}

/// Adapter over the container engine CLI
#[derive(Clone)]
pub struct ContainerEngine {
    executor: Arc<dyn CommandExecutor>,
    flavor: Option<ComposeFlavor>,
    compose_file: Option<PathBuf>,
    timeout: Duration,
}

impl ContainerEngine {
    pub fn new(executor: Arc<dyn CommandExecutor>, timeout: Duration) -> Self {
        Self {
            executor,
            flavor: None,
            compose_file: None,
            timeout,
        }
    }

    pub fn with_compose_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.compose_file = Some(path.into());
        self
    }

    pub fn with_flavor(mut self, flavor: Option<ComposeFlavor>) -> Self {
        self.flavor = flavor;
        self
    }

    pub fn flavor(&self) -> Option<ComposeFlavor> {
        self.flavor
    }

    /// Detect the compose flavor. v2 is only attempted when the engine version
    /// supports it (or is unknown).
    pub async fn detect_compose(&self, version_code: Option<u32>) -> Option<ComposeFlavor> {
        if version_code.map_or(true, |code| code >= COMPOSE_V2_MIN_VERSION) {
            let v2 = self
                .executor
                .run(&["docker", "compose", "version"], self.timeout, OutputMode::Discard)
                .await;
            if v2.success() {
                return Some(ComposeFlavor::V2);
            }
        }
        let v1 = self
            .executor
            .run(&["docker-compose", "--version"], self.timeout, OutputMode::Discard)
            .await;
        v1.success().then_some(ComposeFlavor::V1)
    }

    /// Check that the engine daemon answers, returning its server version
    pub async fn ping(&self) -> Result<String, EngineError> {
        let output = self
            .executor
            .run(&["docker", "info", "--format", "{{.ServerVersion}}"], self.timeout, OutputMode::Text)
            .await;
        if output.is_not_installed() {
            return Err(EngineError::NotInstalled);
        }
        if !output.success() {
            return Err(EngineError::CommandFailed {
                message: output.failure_reason(),
            });
        }
        Ok(output.stdout.trim().to_string())
    }

    fn compose_argv(&self, project: &str, args: &[&str]) -> Result<Vec<String>, EngineError> {
        let flavor = self.flavor.ok_or(EngineError::ComposeUnavailable)?;
        let mut argv: Vec<String> = flavor.base().iter().map(|s| s.to_string()).collect();
        if let Some(file) = &self.compose_file {
            argv.push("--file".to_string());
            argv.push(file.display().to_string());
        }
        argv.push("--project-name".to_string());
        argv.push(project.to_string());
        argv.extend(args.iter().map(|s| s.to_string()));
        Ok(argv)
    }

    async fn run_compose(&self, argv: &[String], timeout: Duration, mode: OutputMode) -> CommandOutput {
        let argv: Vec<&str> = argv.iter().map(String::as_str).collect();
        self.executor.run(&argv, timeout, mode).await
    }

    /// List all containers of the stack, running or not
    pub async fn list_containers(&self, project: &str) -> Result<Vec<ContainerSummary>, EngineError> {
        let argv = self.compose_argv(project, &["ps", "--all", "--format", "json"])?;
        let output = self.run_compose(&argv, self.timeout, OutputMode::JsonLines).await;
        if !output.success() {
            return Err(EngineError::CommandFailed {
                message: output.failure_reason(),
            });
        }
        let containers = parse_containers(&output.records);
        debug!(project, count = containers.len(), "listed stack containers");
        Ok(containers)
    }

    /// Open a TCP connection to `target:port` from inside the `source` service
    pub async fn exec_tcp_check(
        &self,
        project: &str,
        source: &str,
        target: &str,
        port: u16,
        connect_timeout_secs: u64,
        exec_timeout: Duration,
    ) -> CommandOutput {
        let script = format!("timeout {connect_timeout_secs} bash -c '</dev/tcp/{target}/{port}' 2>/dev/null");
        let argv = match self.compose_argv(project, &["exec", "-T", source, "bash", "-c", &script]) {
            Ok(argv) => argv,
            Err(e) => return CommandOutput::completed(1, "", e.to_string()),
        };
        self.run_compose(&argv, exec_timeout, OutputMode::Discard).await
    }

    /// Start the stack in detached mode
    pub async fn compose_up(&self, project: &str, timeout: Duration) -> Result<(), EngineError> {
        self.compose_simple(project, &["up", "-d"], timeout).await
    }

    /// Stop and remove the stack's containers
    pub async fn compose_down(&self, project: &str, timeout: Duration) -> Result<(), EngineError> {
        self.compose_simple(project, &["down"], timeout).await
    }

    async fn compose_simple(&self, project: &str, args: &[&str], timeout: Duration) -> Result<(), EngineError> {
        let argv = self.compose_argv(project, args)?;
        let output = self.run_compose(&argv, timeout, OutputMode::Text).await;
        if output.success() {
            Ok(())
        } else {
            warn!(project, ?args, reason = %output.failure_reason(), "compose command failed");
            Err(EngineError::CommandFailed {
                message: output.failure_reason(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::command::parse_json_records;

    #[test]
    fn test_version_code() {
        assert_eq!(parse_version_code("Docker version 24.0.7, build afdd53b"), Some(2400));
        assert_eq!(parse_version_code("Docker version 20.10.8, build 3967b7d"), Some(2010));
        assert_eq!(parse_version_code("Docker version 1.13.1"), Some(113));
        assert_eq!(parse_version_code("no digits here"), None);
    }

    #[test]
    fn test_parse_containers_from_both_ps_formats() {
        let lines = r#"{"Service":"mongo","Name":"lab-mongo-1","State":"running","Status":"Up 2 minutes"}
{"Service":"opal","Name":"lab-opal-1","State":"exited","Status":"Exited (1)"}"#;
        let containers = parse_containers(&parse_json_records(lines));
        assert_eq!(containers.len(), 2);
        assert!(containers[0].is_running());
        assert!(!containers[1].is_running());

        let array = r#"[{"Service":"nginx","Name":"lab-nginx-1","State":"running","Status":"Up"}]"#;
        let containers = parse_containers(&parse_json_records(array));
        assert_eq!(containers[0].service, "nginx");
    }

    #[test]
    fn test_compose_argv_requires_detected_flavor() {
        let engine = ContainerEngine::new(
            Arc::new(crate::external::command::ProcessCommandExecutor),
            Duration::from_secs(1),
        );
        assert!(matches!(
            engine.compose_argv("lab", &["ps"]),
            Err(EngineError::ComposeUnavailable)
        ));

        let engine = engine.with_flavor(Some(ComposeFlavor::V1));
        assert_eq!(
            engine.compose_argv("lab", &["ps"]).unwrap(),
            vec!["docker-compose", "--project-name", "lab", "ps"]
        );

        let engine = engine
            .with_flavor(Some(ComposeFlavor::V2))
            .with_compose_file("docker-compose.yml");
        assert_eq!(
            engine.compose_argv("lab", &["up", "-d"]).unwrap(),
            vec!["docker", "compose", "--file", "docker-compose.yml", "--project-name", "lab", "up", "-d"]
        );
    }
}
