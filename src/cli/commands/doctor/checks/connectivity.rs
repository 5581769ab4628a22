//! In-container TCP reachability between the stack's services
//!
//! The edge list is derived from the current topology: the deployment
//! configuration says which services are expected, `compose ps` says which
//! are running. Edges whose endpoints are down fail without being probed.

use super::{CheckContext, DiagnosticCheck};
use crate::cli::commands::doctor::types::{
    Check, CheckDetails, CheckName, CheckReport, CheckStatus, ContainerRecord, ContainerRole, Issue, IssueCategory,
    Severity, Solution, SubResult,
};
use async_trait::async_trait;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Edge {
    source: String,
    target: String,
    port: u16,
    label: String,
    /// Why the edge cannot be probed right now
    blocked: Option<String>,
}

impl Edge {
    fn result(&self, passed: bool, message: impl Into<String>) -> SubResult {
        let result = if passed {
            SubResult::pass(&self.label, message)
        } else {
            SubResult::fail(&self.label, message)
        };
        result.with_edge(&self.source, &self.target).with_port(self.port)
    }
}

/// The architecturally required edges of the current topology
fn plan_edges(ctx: &CheckContext, containers: &[ContainerRecord]) -> Vec<Edge> {
    let services = &ctx.settings.services;
    let running = |service: &str| containers.iter().any(|c| c.service == service && c.is_running());

    let mut edges = Vec::new();
    let mut add = |source: &str, source_role: ContainerRole, target: &str, target_role: ContainerRole, port: u16| {
        let blocked = [source, target]
            .into_iter()
            .find(|service| !running(*service))
            .map(|service| format!("{service} is not running"));
        edges.push(Edge {
            source: source.to_string(),
            target: target.to_string(),
            port,
            label: format!("{} → {} ({target}:{port})", source_role.label(), target_role.label()),
            blocked,
        });
    };

    add(
        &services.application,
        ContainerRole::Application,
        &services.database,
        ContainerRole::Database,
        services.database_port,
    );

    if ctx.strategy().uses_bundled_proxy() {
        add(
            &services.proxy,
            ContainerRole::Proxy,
            &services.application,
            ContainerRole::Application,
            services.application_port,
        );
    }

    let mut workers: Vec<&str> = ctx.deployment.profiles.iter().map(|p| p.name.as_str()).collect();
    for container in containers {
        if container.role == ContainerRole::ComputeWorker
            && container.is_running()
            && !workers.contains(&container.service.as_str())
        {
            workers.push(container.service.as_str());
        }
    }
    for worker in workers {
        add(
            &services.application,
            ContainerRole::Application,
            worker,
            ContainerRole::ComputeWorker,
            services.worker_port,
        );
    }

    edges
}

async fn probe_edge(ctx: &CheckContext, edge: &Edge) -> SubResult {
    let output = ctx
        .engine
        .exec_tcp_check(
            ctx.project(),
            &edge.source,
            &edge.target,
            edge.port,
            ctx.settings.probes.exec_connect_timeout_secs,
            ctx.settings.probes.exec_timeout(),
        )
        .await;
    debug!(source = %edge.source, target = %edge.target, port = edge.port, exit = output.status_code, "edge probed");

    if output.success() {
        edge.result(true, "TCP connection verified")
    } else if output.timed_out {
        edge.result(false, "Connection timed out")
    } else {
        edge.result(false, "TCP connection failed")
    }
}

/// `container-connectivity`
pub struct ContainerConnectivityCheck;

#[async_trait]
impl DiagnosticCheck for ContainerConnectivityCheck {
    fn name(&self) -> CheckName {
        CheckName::ContainerConnectivity
    }

    async fn run(&self, ctx: &CheckContext) -> anyhow::Result<CheckReport> {
        let check = Check::new(self.name());
        let containers = ctx.containers().await?;

        if !containers.iter().any(ContainerRecord::is_running) {
            return Ok(CheckReport::new(check.fail("No containers running to test connectivity"))
                .with_issue(Issue::new(
                    IssueCategory::Connectivity,
                    Severity::High,
                    "No running containers",
                    format!("Stack '{}' has no running containers", ctx.project()),
                    Solution::commands(["stackctl up"]),
                )));
        }

        let edges = plan_edges(ctx, &containers);
        let runnable: Vec<Edge> = edges.iter().filter(|e| e.blocked.is_none()).cloned().collect();
        let probed = ctx
            .retry()
            .with_partial_retry("Container connectivity", &runnable, |edge| probe_edge(ctx, edge))
            .await;

        let mut probed = probed.into_iter();
        let tests: Vec<SubResult> = edges
            .iter()
            .filter_map(|edge| match &edge.blocked {
                Some(reason) => Some(edge.result(false, reason.clone())),
                None => probed.next(),
            })
            .collect();

        let failing: Vec<String> = tests.iter().filter(|t| t.is_fail()).map(|t| t.label.clone()).collect();
        let check = check
            .with_details(CheckDetails::Connectivity { tests })
            .conclude_from_details(|status, passed, total| match status {
                CheckStatus::Pass => format!("All {total} inter-container connections verified"),
                CheckStatus::Fail => "All inter-container connections failed".to_string(),
                _ => format!("{passed}/{total} inter-container connections verified"),
            });

        if failing.is_empty() {
            return Ok(check.into());
        }
        let severity = if check.status == CheckStatus::Fail {
            Severity::High
        } else {
            Severity::Medium
        };
        Ok(CheckReport::new(check).with_issue(Issue::new(
            IssueCategory::Connectivity,
            severity,
            "Inter-container connections failing",
            format!("Unreachable: {}", failing.join(", ")),
            Solution::commands(["stackctl up"]),
        )))
    }
}
