//! Host firewall inspection
//!
//! Each probe runs only when its tool is available. Probes that cannot
//! execute contribute nothing, and a host where none could run skips the
//! check.

use super::{CheckContext, DiagnosticCheck};
use crate::cli::commands::doctor::types::{
    Check, CheckDetails, CheckName, CheckReport, CheckStatus, Issue, IssueCategory, ProbeStatus, Severity, Solution,
    SubResult,
};
use crate::deployment::ExposedPort;
use crate::external::{CommandOutput, OutputMode, TcpProbeError};
use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

const ENGINE_CHAINS: &[&str] = &["DOCKER", "DOCKER-USER", "DOCKER-ISOLATION"];

/// An unconditional DROP/REJECT of all traffic from anywhere
fn is_blanket_block(rule: &str) -> bool {
    let fields: Vec<&str> = rule.split_whitespace().collect();
    match fields.as_slice() {
        [target, "all", _, "0.0.0.0/0", "0.0.0.0/0", rest @ ..] => {
            (target.eq_ignore_ascii_case("drop") || target.eq_ignore_ascii_case("reject"))
                && rest.first().map_or(true, |extra| extra.starts_with("reject-with"))
        }
        _ => false,
    }
}

/// Run `argv` through passwordless sudo first, then as the current user
async fn run_privileged(ctx: &CheckContext, argv: &[&str]) -> Option<CommandOutput> {
    let timeout = ctx.settings.probes.detection_timeout();
    let mut with_sudo = vec!["sudo", "-n"];
    with_sudo.extend_from_slice(argv);

    let output = ctx.executor.run(&with_sudo, timeout, OutputMode::Text).await;
    if output.success() {
        return Some(output);
    }
    let output = ctx.executor.run(argv, timeout, OutputMode::Text).await;
    if output.success() {
        Some(output)
    } else {
        debug!(command = argv.join(" "), reason = %output.failure_reason(), "firewall probe unavailable");
        None
    }
}

/// Whether a `ufw status` dump mentions `port` as a rule target
fn ufw_allows(rules: &str, port: u16) -> anyhow::Result<bool> {
    let pattern = Regex::new(&format!(r"(?m)(^|[\s:,]){port}(/(tcp|udp))?([\s,]|$)"))?;
    Ok(pattern.is_match(rules))
}

struct UfwFinding {
    result: SubResult,
    missing_ports: Vec<u16>,
}

async fn check_ufw(ctx: &CheckContext) -> anyhow::Result<Option<UfwFinding>> {
    if ctx.executor.locate("ufw").is_none() {
        return Ok(None);
    }
    let Some(output) = run_privileged(ctx, &["ufw", "status", "verbose"]).await else {
        return Ok(None);
    };
    let status = output.stdout.to_lowercase();

    if status.contains("status: inactive") {
        return Ok(Some(UfwFinding {
            result: SubResult::pass("UFW firewall", "UFW is inactive (not blocking traffic)"),
            missing_ports: Vec::new(),
        }));
    }
    if !status.contains("status: active") {
        return Ok(None);
    }

    let mut missing_ports = Vec::new();
    for exposed in ctx.deployment.exposed_ports() {
        if !ufw_allows(&status, exposed.port)? && !missing_ports.contains(&exposed.port) {
            missing_ports.push(exposed.port);
        }
    }

    let result = if missing_ports.is_empty() {
        SubResult::pass("UFW firewall", "UFW is active and the published ports are allowed")
    } else {
        let list: Vec<String> = missing_ports.iter().map(u16::to_string).collect();
        SubResult::warn("UFW firewall", format!("UFW is active, port(s) without an allow rule: {}", list.join(", ")))
            .with_detail(format!("Consider: sudo ufw allow {}", missing_ports[0]))
    };
    Ok(Some(UfwFinding { result, missing_ports }))
}

async fn check_input_chain(ctx: &CheckContext) -> Option<SubResult> {
    ctx.executor.locate("iptables")?;
    let output = run_privileged(ctx, &["iptables", "-L", "INPUT", "-n"]).await?;
    let found: Vec<String> = output
        .stdout
        .lines()
        .filter(|rule| is_blanket_block(rule))
        .map(|rule| rule.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect();
    Some(if found.is_empty() {
        SubResult::pass("iptables rules", "No blanket DROP/REJECT rules in the INPUT chain")
    } else {
        SubResult::warn("iptables rules", "Potentially blocking iptables rules found")
            .with_detail(format!("Rules: {}. Check that the published ports are allowed", found.join("; ")))
    })
}

async fn check_engine_chains(ctx: &CheckContext) -> Option<SubResult> {
    ctx.executor.locate("iptables")?;
    let output = run_privileged(ctx, &["iptables", "-L", "-n"]).await?;

    let found: Vec<&str> = ENGINE_CHAINS
        .iter()
        .copied()
        .filter(|chain| output.stdout.contains(chain))
        .collect();
    Some(if found.is_empty() {
        SubResult::warn("Engine iptables", "Container engine iptables chains not found")
            .with_detail("The engine may not be managing iptables, published ports will not be forwarded")
    } else {
        SubResult::pass(
            "Engine iptables",
            format!("Engine iptables integration active ({})", found.join(", ")),
        )
    })
}

async fn check_loopback(ctx: &CheckContext, exposed: &ExposedPort) -> Option<SubResult> {
    let port = exposed.port;
    let label = format!("Loopback connection to {}", exposed.label);
    let result = match ctx
        .network
        .tcp_connect("127.0.0.1", port, ctx.settings.probes.tcp_timeout())
        .await
    {
        Ok(()) => SubResult::pass(label, format!("Port {port} accepts local connections")),
        // A refusal comes from the kernel, nothing dropped the packet
        Err(TcpProbeError::Refused) => SubResult::pass(label, format!("Port {port} is not filtered locally")),
        Err(TcpProbeError::TimedOut) => SubResult::warn(label, format!("Connections to port {port} are silently dropped"))
            .with_detail("A firewall DROP rule is the usual cause"),
        Err(TcpProbeError::Unreachable(reason)) => {
            debug!(port, %reason, "loopback probe could not run");
            return None;
        }
    };
    Some(result.with_host("127.0.0.1").with_port(port))
}

/// `firewall-config`
pub struct FirewallCheck;

#[async_trait]
impl DiagnosticCheck for FirewallCheck {
    fn name(&self) -> CheckName {
        CheckName::FirewallConfig
    }

    async fn run(&self, ctx: &CheckContext) -> anyhow::Result<CheckReport> {
        let mut tests = Vec::new();
        let mut issues = Vec::new();

        if let Some(finding) = check_ufw(ctx).await? {
            if !finding.missing_ports.is_empty() {
                issues.push(Issue::new(
                    IssueCategory::Firewall,
                    Severity::Medium,
                    "UFW may block published ports",
                    finding.result.message.clone(),
                    Solution::commands(finding.missing_ports.iter().map(|port| format!("sudo ufw allow {port}"))),
                ));
            }
            tests.push(finding.result);
        }
        if let Some(result) = check_input_chain(ctx).await {
            tests.push(result);
        }
        if let Some(result) = check_engine_chains(ctx).await {
            if result.status == ProbeStatus::Warn {
                issues.push(Issue::new(
                    IssueCategory::Docker,
                    Severity::Medium,
                    "Engine is not managing iptables",
                    "No DOCKER chains exist, so published ports may not be forwarded",
                    Solution::text("Make sure `\"iptables\": false` is not set in /etc/docker/daemon.json, then restart the engine"),
                ));
            }
            tests.push(result);
        }
        for exposed in ctx.deployment.exposed_ports() {
            if let Some(result) = check_loopback(ctx, &exposed).await {
                tests.push(result);
            }
        }

        let check = Check::new(self.name())
            .with_details(CheckDetails::Firewall { tests })
            .conclude_from_details(|status, passed, total| match status {
                CheckStatus::Skip => "No firewall checks could be performed on this system".to_string(),
                CheckStatus::Pass => format!("Firewall configuration appears correct ({total} checks passed)"),
                CheckStatus::Fail => "Firewall is blocking the stack's traffic".to_string(),
                _ => format!("Potential firewall issues ({passed}/{total} checks passed)"),
            });
        let mut report = CheckReport::new(check);
        report.issues = issues;
        Ok(report)
    }
}
