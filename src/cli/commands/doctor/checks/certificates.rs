use super::{CheckContext, DiagnosticCheck};
use crate::cli::commands::doctor::types::{
    Check, CheckDetails, CheckName, CheckReport, CheckStatus, Issue, IssueCategory, ProbeStatus, Severity, Solution,
    SubResult,
};
use crate::config::ChainFailurePolicy;
use crate::deployment::SslStrategy;
use crate::external::{CertificateInfo, TlsProbeError};
use async_trait::async_trait;
use tracing::debug;

fn describe_certificate(strategy: SslStrategy, info: &CertificateInfo) -> String {
    format!(
        "{} for {} (expires: {})",
        strategy.describe(),
        info.common_name.as_deref().unwrap_or("unknown subject"),
        info.not_after
    )
}

/// Classify a fetched certificate by its remaining validity
fn classify_expiry(host: &str, strategy: SslStrategy, info: &CertificateInfo, warning_days: i64) -> SubResult {
    let described = describe_certificate(strategy, info);
    if info.expires_in_days < 0 {
        SubResult::fail(host, format!("{described} has expired"))
    } else if info.expires_in_days <= warning_days {
        SubResult::warn(host, format!("{described} expires in {} days", info.expires_in_days))
    } else {
        SubResult::pass(host, format!("{described} is valid"))
    }
}

async fn probe_host(ctx: &CheckContext, host: &String) -> SubResult {
    let strategy = ctx.strategy();
    let port = ctx.deployment.external_https_port;
    let timeout = ctx.settings.probes.tls_timeout();
    let warning_days = ctx.settings.policy.cert_expiry_warning_days;
    // Self-signed chains never verify
    let verify = strategy != SslStrategy::SelfSigned;

    let result = match ctx.network.peer_certificate(host, port, verify, timeout).await {
        Ok(info) => classify_expiry(host, strategy, &info, warning_days),
        Err(TlsProbeError::Verification(reason)) => {
            debug!(host, %reason, "certificate chain verification failed");
            let status = match ctx.chain_failure_policy() {
                ChainFailurePolicy::Warn => ProbeStatus::Warn,
                ChainFailurePolicy::Fail => ProbeStatus::Fail,
            };
            let subject = match ctx.network.peer_certificate(host, port, false, timeout).await {
                Ok(info) => {
                    let expiry = classify_expiry(host, strategy, &info, warning_days);
                    match expiry.status {
                        ProbeStatus::Fail => {
                            return expiry.with_detail(reason).with_host(host).with_port(port);
                        }
                        ProbeStatus::Warn => format!(": {}", expiry.message),
                        _ => format!(": {}", describe_certificate(strategy, &info)),
                    }
                }
                Err(_) => String::new(),
            };
            SubResult::new(host, status, format!("Certificate chain not trusted{subject}")).with_detail(reason)
        }
        Err(e) => SubResult::fail(host, format!("TLS connection failed for {host}")).with_detail(e.to_string()),
    };
    result.with_host(host).with_port(port)
}

/// `ssl-certificates`: the served certificate of every declared host
pub struct SslCertificatesCheck;

#[async_trait]
impl DiagnosticCheck for SslCertificatesCheck {
    fn name(&self) -> CheckName {
        CheckName::SslCertificates
    }

    async fn run(&self, ctx: &CheckContext) -> anyhow::Result<CheckReport> {
        let check = Check::new(self.name());
        if ctx.strategy() == SslStrategy::None {
            return Ok(check
                .skip("TLS is handled by an external reverse proxy, not managed by this stack")
                .into());
        }

        let hosts = ctx.deployment.hosts_or_localhost();
        let tests = ctx
            .retry()
            .with_partial_retry("SSL certificates", &hosts, |host| probe_host(ctx, host))
            .await;

        let problems: Vec<String> = tests
            .iter()
            .filter(|t| t.status != ProbeStatus::Pass)
            .map(|t| format!("{}: {}", t.label, t.message))
            .collect();

        let check = check
            .with_details(CheckDetails::Certificates { tests })
            .conclude_from_details(|status, passed, total| match status {
                CheckStatus::Pass => format!("All {total} certificates valid"),
                CheckStatus::Fail => "Certificate validation failed".to_string(),
                _ => format!("{passed}/{total} certificates valid"),
            });

        if problems.is_empty() {
            return Ok(check.into());
        }
        let severity = if check.status == CheckStatus::Fail || check.failing_sub_results() > 0 {
            Severity::High
        } else {
            Severity::Low
        };
        let solution = match ctx.strategy() {
            SslStrategy::LetsEncrypt => Solution::text(
                "Check that port 80 is reachable from the internet for ACME challenges, then restart the stack with `stackctl down && stackctl up`",
            ),
            SslStrategy::Manual => Solution::text("Replace the certificate files with a valid, unexpired certificate and restart the stack"),
            _ => Solution::text("Regenerate the self-signed certificate with setup and restart the stack"),
        };
        Ok(CheckReport::new(check).with_issue(Issue::new(
            IssueCategory::Certificates,
            severity,
            "Certificate problems",
            problems.join("; "),
            solution,
        )))
    }
}
