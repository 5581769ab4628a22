//! `stackctl up`, `down` and `status`: thin wrappers over the compose CLI

use super::doctor::console::Console;
use crate::config::StackctlConfig;
use crate::deployment::DeploymentConfig;
use crate::external::docker::parse_version_code;
use crate::external::{CommandExecutor, ContainerEngine, ContainerSummary, EngineError, OutputMode, ProcessCommandExecutor};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Start, stop and inspect one stack
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StackLifecycle: Send + Sync {
    async fn up(&self, project: &str) -> Result<(), EngineError>;
    async fn down(&self, project: &str) -> Result<(), EngineError>;
    async fn status(&self, project: &str) -> Result<Vec<ContainerSummary>, EngineError>;
}

/// [`StackLifecycle`] driven through the compose CLI
pub struct ComposeLifecycle {
    engine: ContainerEngine,
    timeout: Duration,
}

impl ComposeLifecycle {
    pub fn new(engine: ContainerEngine, timeout: Duration) -> Self {
        Self { engine, timeout }
    }

    /// Build the lifecycle for the configured compose file, detecting the
    /// compose flavor from the installed engine
    pub async fn detect(executor: Arc<dyn CommandExecutor>, settings: &StackctlConfig) -> Self {
        let probes = &settings.probes;
        let version = executor
            .run(&["docker", "--version"], probes.detection_timeout(), OutputMode::Text)
            .await;
        let version_code = version.success().then(|| parse_version_code(&version.stdout)).flatten();
        let engine = ContainerEngine::new(executor, probes.command_timeout())
            .with_compose_file(&settings.paths.compose_file);
        let flavor = engine.detect_compose(version_code).await;
        Self::new(engine.with_flavor(flavor), probes.start_timeout())
    }
}

#[async_trait]
impl StackLifecycle for ComposeLifecycle {
    async fn up(&self, project: &str) -> Result<(), EngineError> {
        info!(project, "starting stack");
        self.engine.compose_up(project, self.timeout).await
    }

    async fn down(&self, project: &str) -> Result<(), EngineError> {
        info!(project, "stopping stack");
        self.engine.compose_down(project, self.timeout).await
    }

    async fn status(&self, project: &str) -> Result<Vec<ContainerSummary>, EngineError> {
        self.engine.list_containers(project).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    Up,
    Down,
    Status,
}

pub struct LifecycleCommand {
    action: LifecycleAction,
    settings: StackctlConfig,
    lifecycle: Option<Arc<dyn StackLifecycle>>,
    console: Console,
}

impl LifecycleCommand {
    pub fn new(action: LifecycleAction, settings: StackctlConfig) -> Self {
        Self {
            action,
            settings,
            lifecycle: None,
            console: Console::stdio(),
        }
    }

    pub fn with_lifecycle(mut self, lifecycle: Arc<dyn StackLifecycle>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    pub fn with_console(mut self, console: Console) -> Self {
        self.console = console;
        self
    }

    /// Run the action and return the process exit code. `status` exits 1
    /// when the stack is not fully running.
    pub async fn execute(&self) -> Result<i32> {
        let deployment = DeploymentConfig::load(&self.settings.paths.deployment_config)
            .context("Run setup first to write the deployment configuration")?;
        let project = deployment.stack_name;
        let lifecycle = match &self.lifecycle {
            Some(lifecycle) => lifecycle.clone(),
            None => Arc::new(ComposeLifecycle::detect(Arc::new(ProcessCommandExecutor), &self.settings).await),
        };

        match self.action {
            LifecycleAction::Up => {
                self.console.line(&format!("🚀 Starting stack '{project}'..."));
                lifecycle.up(&project).await?;
                self.console.line(&format!("✅ Stack '{project}' is up"));
                Ok(0)
            }
            LifecycleAction::Down => {
                self.console.line(&format!("🛑 Stopping stack '{project}'..."));
                lifecycle.down(&project).await?;
                self.console.line(&format!("✅ Stack '{project}' is down"));
                Ok(0)
            }
            LifecycleAction::Status => {
                let containers = lifecycle.status(&project).await?;
                Ok(self.print_status(&project, &containers))
            }
        }
    }

    fn print_status(&self, project: &str, containers: &[ContainerSummary]) -> i32 {
        if containers.is_empty() {
            self.console.line(&format!("⚪ Stack '{project}' has no containers"));
            self.console.line("   Run 'stackctl up' to start it");
            return 1;
        }

        self.console.line(&format!("📦 STACK '{project}':"));
        for container in containers {
            let marker = if container.is_running() { "🟢" } else { "🔴" };
            let service = if container.service.is_empty() {
                &container.name
            } else {
                &container.service
            };
            self.console
                .line(&format!("{marker} {service:<16} {:<10} {}", container.state, container.status));
        }

        let running = containers.iter().filter(|c| c.is_running()).count();
        self.console
            .line(&format!("{running}/{} containers running", containers.len()));
        if running == containers.len() {
            0
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn settings_with_deployment(dir: &TempDir) -> StackctlConfig {
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"stack_name": "lab"}"#).unwrap();
        let mut settings = StackctlConfig::default();
        settings.paths.deployment_config = path;
        settings
    }

    fn container(service: &str, state: &str) -> ContainerSummary {
        ContainerSummary {
            service: service.to_string(),
            name: format!("lab-{service}-1"),
            state: state.to_string(),
            status: String::new(),
        }
    }

    #[tokio::test]
    async fn test_up_starts_the_deployment_stack() {
        let dir = TempDir::new().unwrap();
        let mut lifecycle = MockStackLifecycle::new();
        lifecycle.expect_up().withf(|project| project == "lab").times(1).returning(|_| Ok(()));
        let (console, buffer) = Console::capture();

        let code = LifecycleCommand::new(LifecycleAction::Up, settings_with_deployment(&dir))
            .with_lifecycle(Arc::new(lifecycle))
            .with_console(console)
            .execute()
            .await
            .unwrap();

        assert_eq!(code, 0);
        assert!(buffer.contents().contains("Stack 'lab' is up"));
    }

    #[tokio::test]
    async fn test_down_failure_is_an_error() {
        let dir = TempDir::new().unwrap();
        let mut lifecycle = MockStackLifecycle::new();
        lifecycle.expect_down().returning(|_| {
            Err(EngineError::CommandFailed {
                message: "no such project".to_string(),
            })
        });

        let result = LifecycleCommand::new(LifecycleAction::Down, settings_with_deployment(&dir))
            .with_lifecycle(Arc::new(lifecycle))
            .with_console(Console::capture().0)
            .execute()
            .await;

        assert!(result.unwrap_err().to_string().contains("no such project"));
    }

    #[tokio::test]
    async fn test_status_exit_code_reflects_running_containers() {
        let dir = TempDir::new().unwrap();
        let mut lifecycle = MockStackLifecycle::new();
        lifecycle
            .expect_status()
            .returning(|_| Ok(vec![container("opal", "running"), container("mongo", "exited")]));
        let (console, buffer) = Console::capture();

        let code = LifecycleCommand::new(LifecycleAction::Status, settings_with_deployment(&dir))
            .with_lifecycle(Arc::new(lifecycle))
            .with_console(console)
            .execute()
            .await
            .unwrap();

        assert_eq!(code, 1);
        let text = buffer.contents();
        assert!(text.contains("1/2 containers running"));
        assert!(text.contains("🔴 mongo"));
    }

    #[tokio::test]
    async fn test_missing_deployment_never_touches_the_engine() {
        let dir = TempDir::new().unwrap();
        let mut settings = StackctlConfig::default();
        settings.paths.deployment_config = dir.path().join("missing.json");
        let mut lifecycle = MockStackLifecycle::new();
        lifecycle.expect_up().never();

        let result = LifecycleCommand::new(LifecycleAction::Up, settings)
            .with_lifecycle(Arc::new(lifecycle))
            .with_console(Console::capture().0)
            .execute()
            .await;

        assert!(result.unwrap_err().to_string().contains("setup"));
    }
}
