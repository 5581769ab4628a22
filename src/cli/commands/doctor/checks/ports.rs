use super::{CheckContext, DiagnosticCheck};
use crate::cli::commands::doctor::types::{
    Check, CheckDetails, CheckName, CheckReport, CheckStatus, Issue, IssueCategory, Severity, Solution, SubResult,
};
use crate::deployment::ExposedPort;
use crate::external::TcpProbeError;
use async_trait::async_trait;

const PROBE_HOST: &str = "localhost";

async fn probe_port(ctx: &CheckContext, exposed: &ExposedPort) -> SubResult {
    let result = match ctx
        .network
        .tcp_connect(PROBE_HOST, exposed.port, ctx.settings.probes.tcp_timeout())
        .await
    {
        Ok(()) => SubResult::pass(&exposed.label, format!("Port {} accessible", exposed.port)),
        Err(TcpProbeError::Refused) => SubResult::fail(&exposed.label, format!("Port {} refused the connection", exposed.port)),
        Err(TcpProbeError::TimedOut) => SubResult::fail(&exposed.label, format!("Port {} timed out", exposed.port)),
        Err(e) => SubResult::fail(&exposed.label, format!("Port {} not accessible", exposed.port)).with_detail(e.to_string()),
    };
    result.with_host(PROBE_HOST).with_port(exposed.port)
}

/// `external-ports`: every port the configuration publishes must accept connections
pub struct ExternalPortsCheck;

#[async_trait]
impl DiagnosticCheck for ExternalPortsCheck {
    fn name(&self) -> CheckName {
        CheckName::ExternalPorts
    }

    async fn run(&self, ctx: &CheckContext) -> anyhow::Result<CheckReport> {
        let ports = ctx.deployment.exposed_ports();
        let tests = ctx
            .retry()
            .with_partial_retry("External ports", &ports, |exposed| probe_port(ctx, exposed))
            .await;

        let closed: Vec<String> = tests
            .iter()
            .filter(|t| t.is_fail())
            .filter_map(|t| t.context.port.map(|p| p.to_string()))
            .collect();

        let check = Check::new(self.name())
            .with_details(CheckDetails::Ports { tests })
            .conclude_from_details(|status, passed, total| match status {
                CheckStatus::Pass => format!("All {total} ports accessible"),
                CheckStatus::Fail => "No ports accessible".to_string(),
                CheckStatus::Skip => "No exposed ports configured".to_string(),
                _ => format!("{passed}/{total} ports accessible"),
            });

        if closed.is_empty() {
            return Ok(check.into());
        }
        Ok(CheckReport::new(check).with_issue(Issue::new(
            IssueCategory::Ports,
            Severity::High,
            "Published ports not accessible",
            format!("No service answers on port(s) {}", closed.join(", ")),
            Solution::text(format!(
                "Make sure the stack is running (`stackctl up`) and that nothing else is bound to port(s) {}",
                closed.join(", ")
            )),
        )))
    }
}
