//! Fixes and troubleshooting tips derived from a run's findings

use super::types::{CheckName, Fix, Issue, IssueCategory, Solution};
use crate::external::CommandExecutor;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// The command that stopped a fix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixFailure {
    pub command: String,
    pub exit_code: Option<i32>,
    pub stderr: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixOutcome {
    pub name: String,
    /// Commands that completed, in order
    pub completed: Vec<String>,
    pub failure: Option<FixFailure>,
}

impl FixOutcome {
    pub fn applied(&self) -> bool {
        self.failure.is_none()
    }
}

pub struct RemediationAdvisor {
    executor: Arc<dyn CommandExecutor>,
    timeout: Duration,
}

impl RemediationAdvisor {
    pub fn new(executor: Arc<dyn CommandExecutor>, timeout: Duration) -> Self {
        Self { executor, timeout }
    }

    /// Categories whose command fixes may be offered for execution
    fn is_automatic(category: IssueCategory) -> bool {
        matches!(
            category,
            IssueCategory::Selinux | IssueCategory::Firewall | IssueCategory::Docker
        )
    }

    /// One fix per issue with a command solution. A command sequence
    /// already proposed by an earlier issue is not repeated.
    pub fn for_issues(issues: &[Issue]) -> Vec<Fix> {
        let mut seen: HashSet<Vec<String>> = HashSet::new();
        issues
            .iter()
            .filter_map(|issue| match &issue.solution {
                Solution::Commands(commands) if !commands.is_empty() => Some((issue, commands)),
                _ => None,
            })
            .filter(|(_, commands)| seen.insert((*commands).clone()))
            .map(|(issue, commands)| Fix {
                name: issue.title.clone(),
                description: issue.description.clone(),
                commands: commands.clone(),
                automatic: Self::is_automatic(issue.category),
            })
            .collect()
    }

    pub fn tips_for(check: CheckName) -> &'static [&'static str] {
        match check {
            CheckName::EngineConnectivity => &[
                "Start the engine with 'sudo systemctl start docker'",
                "Make sure your user is in the 'docker' group, or run with sudo",
                "Run 'docker info' to see why the daemon does not answer",
            ],
            CheckName::ComposeFile => &[
                "Run setup to regenerate the compose configuration",
                "Check that the deployment directory is writable",
                "Verify you're running the command from the deployment directory",
            ],
            CheckName::ContainerStatus => &[
                "Run 'stackctl up' to start all containers",
                "Check that the container engine is running and accessible",
                "Run 'stackctl status' to see current container status",
                "Check container logs with 'docker logs <container-name>'",
            ],
            CheckName::ContainerConnectivity => &[
                "Restart the stack with 'stackctl down' then 'stackctl up'",
                "Check that the containers are on the same network",
                "Verify firewall settings aren't blocking internal communication",
                "Check container logs for networking errors",
            ],
            CheckName::ExternalPorts => &[
                "Check if another service is using the same port",
                "Verify firewall settings allow the configured port",
                "Ensure the engine's port forwarding is working",
                "Try accessing the service with 'curl -k https://localhost:<port>'",
            ],
            CheckName::SslCertificates => &[
                "Regenerate or renew the certificate for the affected hosts",
                "Check that the certificate files referenced by the proxy exist",
                "For Let's Encrypt: verify the domain's DNS records point at this host",
                "For self-signed: regenerate the certificate with setup",
            ],
            CheckName::ServiceEndpoints => &[
                "Wait a few minutes for services to fully start up",
                "Check container logs for startup errors",
                "Verify the reverse proxy configuration (unless TLS is handled externally)",
                "With an external proxy: ensure it is running and forwards to the HTTP port",
                "Remember: the application requires HTTPS in production",
            ],
            CheckName::FirewallConfig => &[
                "Check UFW status: sudo ufw status verbose",
                "Allow required ports: sudo ufw allow <port>",
                "Check iptables rules: sudo iptables -L -n",
                "Verify the engine's iptables integration is enabled",
                "Check the engine daemon configuration for iptables options",
            ],
            CheckName::WafDetection => &[
                "Check the WAF/CDN configuration allows the application's traffic",
                "Allow-list your server's IP address in the WAF settings",
                "Review rate limiting settings and increase limits if needed",
                "For Cloudflare: check firewall rules and security level",
                "Check WAF logs for blocked requests",
            ],
        }
    }

    /// Tips for every listed check, each shown once
    pub fn tips_for_checks(checks: impl IntoIterator<Item = CheckName>) -> Vec<&'static str> {
        let mut seen = HashSet::new();
        checks
            .into_iter()
            .flat_map(Self::tips_for)
            .copied()
            .filter(|tip| seen.insert(*tip))
            .collect()
    }

    /// Run a fix's commands in order, stopping at the first failure
    pub async fn apply(&self, fix: &Fix) -> FixOutcome {
        let mut outcome = FixOutcome {
            name: fix.name.clone(),
            completed: Vec::new(),
            failure: None,
        };
        for command in &fix.commands {
            let output = self.executor.run_shell(command, self.timeout).await;
            if !output.success() {
                warn!(fix = %fix.name, command, reason = %output.failure_reason(), "fix command failed");
                outcome.failure = Some(FixFailure {
                    command: command.clone(),
                    exit_code: output.status_code,
                    stderr: output.failure_reason(),
                });
                return outcome;
            }
            info!(fix = %fix.name, command, "fix command completed");
            outcome.completed.push(command.clone());
        }
        outcome
    }
}
