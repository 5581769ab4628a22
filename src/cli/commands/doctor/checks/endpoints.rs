use super::{CheckContext, DiagnosticCheck};
use crate::cli::commands::doctor::types::{
    Check, CheckDetails, CheckName, CheckReport, CheckStatus, Issue, IssueCategory, ProbeStatus, Severity, Solution,
    SubResult,
};
use crate::config::ChainFailurePolicy;
use crate::deployment::SslStrategy;
use crate::external::{HttpProbeError, HttpRequest, HttpResponse};
use async_trait::async_trait;

#[derive(Debug, Clone)]
struct Endpoint {
    url: String,
    label: String,
}

/// Statuses showing the application answered, whatever the page
fn is_healthy_status(status: u16) -> bool {
    (200..400).contains(&status) || status == 401 || status == 403
}

fn classify_response(label: &str, response: &HttpResponse, not_found_signatures: &[String]) -> SubResult {
    let status = response.status;
    if is_healthy_status(status) {
        return SubResult::pass(label, format!("Accessible (HTTP {status})"));
    }
    if status == 404 && not_found_signatures.iter().any(|sig| response.body.contains(sig.as_str())) {
        return SubResult::pass(label, "Responding (HTTP 404 from the application itself)");
    }
    SubResult::warn(label, format!("Returned HTTP {status}"))
}

async fn probe_endpoint(ctx: &CheckContext, endpoint: &Endpoint) -> SubResult {
    let request = HttpRequest::get(&endpoint.url, ctx.settings.probes.http_timeout())
        .accept_invalid_certs(ctx.strategy() == SslStrategy::SelfSigned);

    let result = match ctx.network.http_get(&request).await {
        Ok(response) => classify_response(&endpoint.label, &response, &ctx.settings.policy.not_found_signatures),
        Err(HttpProbeError::Tls(reason)) => {
            let message = "TLS verification failed";
            match ctx.chain_failure_policy() {
                ChainFailurePolicy::Warn => SubResult::warn(&endpoint.label, message),
                ChainFailurePolicy::Fail => SubResult::fail(&endpoint.label, message),
            }
            .with_detail(reason)
        }
        Err(HttpProbeError::TimedOut) => SubResult::fail(&endpoint.label, "Request timed out"),
        Err(e) => SubResult::fail(&endpoint.label, "Connection failed").with_detail(e.to_string()),
    };
    result.with_url(&endpoint.url)
}

/// `service-endpoints`: the web interface and the API answer over HTTP(S)
pub struct ServiceEndpointsCheck;

impl ServiceEndpointsCheck {
    fn endpoints(ctx: &CheckContext) -> Vec<Endpoint> {
        let scheme = match ctx.strategy() {
            SslStrategy::None => "HTTP",
            _ => "HTTPS",
        };
        let api_path = &ctx.settings.services.api_path;
        ctx.deployment
            .base_urls()
            .into_iter()
            .flat_map(|base| {
                [
                    Endpoint {
                        url: format!("{base}/"),
                        label: format!("Web interface ({scheme}) {base}/"),
                    },
                    Endpoint {
                        url: format!("{base}{api_path}"),
                        label: format!("API endpoint ({scheme}) {base}{api_path}"),
                    },
                ]
            })
            .collect()
    }
}

#[async_trait]
impl DiagnosticCheck for ServiceEndpointsCheck {
    fn name(&self) -> CheckName {
        CheckName::ServiceEndpoints
    }

    async fn run(&self, ctx: &CheckContext) -> anyhow::Result<CheckReport> {
        let endpoints = Self::endpoints(ctx);
        let tests = ctx
            .retry()
            .with_partial_retry("Service endpoints", &endpoints, |endpoint| probe_endpoint(ctx, endpoint))
            .await;

        let unreachable: Vec<String> = tests
            .iter()
            .filter(|t| t.is_fail())
            .filter_map(|t| t.context.url.clone())
            .collect();
        let degraded: Vec<String> = tests
            .iter()
            .filter(|t| t.status == ProbeStatus::Warn)
            .filter_map(|t| t.context.url.as_ref().map(|url| format!("{url} ({})", t.message)))
            .collect();

        let check = Check::new(self.name())
            .with_details(CheckDetails::Endpoints { tests })
            .conclude_from_details(|status, passed, total| match status {
                CheckStatus::Pass => format!("All {total} endpoints accessible"),
                CheckStatus::Fail => "No endpoints accessible".to_string(),
                _ => format!("{passed}/{total} endpoints accessible"),
            });
        let severity = if check.status == CheckStatus::Fail {
            Severity::High
        } else {
            Severity::Medium
        };

        let mut report = CheckReport::new(check);
        if !unreachable.is_empty() {
            report = report.with_issue(Issue::new(
                IssueCategory::Endpoints,
                severity,
                "Service endpoints unreachable",
                format!("No response from {}", unreachable.join(", ")),
                Solution::text("Check the application logs with `docker compose logs` and confirm the stack is up with `stackctl status`"),
            ));
        }
        if !degraded.is_empty() {
            report = report.with_issue(Issue::new(
                IssueCategory::Endpoints,
                Severity::Medium,
                "Service endpoints answering with errors",
                format!("Unexpected responses from {}", degraded.join(", ")),
                Solution::text("Inspect the proxy and application logs with `docker compose logs opal nginx` for upstream or routing errors"),
            ));
        }
        Ok(report)
    }
}
