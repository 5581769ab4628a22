use super::{CheckContext, DiagnosticCheck};
use crate::cli::commands::doctor::types::{
    Check, CheckDetails, CheckName, CheckReport, Issue, IssueCategory, Severity, Solution,
};
use crate::external::EngineError;
use async_trait::async_trait;

/// `engine-connectivity`: the engine daemon must answer `docker info`
pub struct EngineConnectivityCheck;

#[async_trait]
impl DiagnosticCheck for EngineConnectivityCheck {
    fn name(&self) -> CheckName {
        CheckName::EngineConnectivity
    }

    async fn run(&self, ctx: &CheckContext) -> anyhow::Result<CheckReport> {
        let check = Check::new(self.name());
        let report = match ctx.engine.ping().await {
            Ok(server) => {
                let message = if server.is_empty() {
                    "Container engine is responding".to_string()
                } else {
                    format!("Container engine {server} is responding")
                };
                CheckReport::new(
                    check
                        .with_details(CheckDetails::Engine { server: Some(server) })
                        .pass(message),
                )
            }
            Err(e) => {
                let solution = match e {
                    EngineError::NotInstalled => Solution::text("Install Docker Engine and the compose plugin"),
                    _ => Solution::commands(["sudo systemctl start docker"]),
                };
                CheckReport::new(
                    check
                        .with_details(CheckDetails::Engine { server: None })
                        .fail(format!("Container engine is not reachable: {e}")),
                )
                .with_issue(Issue::new(
                    IssueCategory::Docker,
                    Severity::Critical,
                    "Container engine is not reachable",
                    e.to_string(),
                    solution,
                ))
            }
        };
        Ok(report)
    }
}

/// `docker-compose-file`: the generated compose artifact must exist
pub struct ComposeFileCheck;

#[async_trait]
impl DiagnosticCheck for ComposeFileCheck {
    fn name(&self) -> CheckName {
        CheckName::ComposeFile
    }

    async fn run(&self, ctx: &CheckContext) -> anyhow::Result<CheckReport> {
        let path = &ctx.settings.paths.compose_file;
        let details = CheckDetails::ComposeFile {
            path: path.display().to_string(),
        };
        let check = Check::new(self.name()).with_details(details);

        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(check.pass(format!("{} found", path.display())).into());
        }

        Ok(CheckReport::new(check.fail(format!(
            "{} not found. Run setup to generate the stack configuration",
            path.display()
        )))
        .with_issue(Issue::new(
            IssueCategory::Setup,
            Severity::Critical,
            "Compose file missing",
            format!("{} does not exist, the stack has not been set up", path.display()),
            Solution::text("Run setup to generate the compose file and configuration"),
        )))
    }
}

/// `container-status`: every container of the stack should be running
pub struct ContainerStatusCheck;

#[async_trait]
impl DiagnosticCheck for ContainerStatusCheck {
    fn name(&self) -> CheckName {
        CheckName::ContainerStatus
    }

    async fn run(&self, ctx: &CheckContext) -> anyhow::Result<CheckReport> {
        let check = Check::new(self.name());
        let containers = match ctx.containers().await {
            Ok(containers) => containers,
            Err(EngineError::ComposeUnavailable) => {
                return Ok(CheckReport::new(check.fail("No compose command is available to list containers"))
                    .with_issue(Issue::new(
                        IssueCategory::Docker,
                        Severity::Critical,
                        "Compose is not installed",
                        "Neither `docker compose` nor `docker-compose` could be found",
                        Solution::text("Install the Docker compose plugin"),
                    )));
            }
            Err(e) => return Err(e.into()),
        };

        let total = containers.len();
        let running = containers.iter().filter(|c| c.is_running()).count();
        let stopped: Vec<String> = containers
            .iter()
            .filter(|c| !c.is_running())
            .map(|c| format!("{} ({})", c.service, c.role.label()))
            .collect();
        let check = check.with_details(CheckDetails::Containers { containers });

        let report = if total == 0 {
            CheckReport::new(check.fail(format!("Stack '{}' is not started, no containers found", ctx.project())))
                .with_issue(Issue::new(
                    IssueCategory::Containers,
                    Severity::Critical,
                    "Stack not started",
                    format!("No containers exist for stack '{}'", ctx.project()),
                    Solution::commands(["stackctl up"]),
                ))
        } else if running < total {
            CheckReport::new(check.warn(format!("{running}/{total} containers running")))
                .with_issue(Issue::new(
                    IssueCategory::Containers,
                    Severity::High,
                    "Some containers are not running",
                    format!("Stopped: {}", stopped.join(", ")),
                    Solution::commands(["stackctl up"]),
                ))
        } else {
            CheckReport::new(check.pass(format!("All {total} containers running")))
        };
        Ok(report)
    }
}
