//! WAF/CDN and rate-limit detection
//!
//! Best effort: only the first base URL is probed, and connection failures
//! degrade to a warning since the endpoint check already reports them.

use super::{CheckContext, DiagnosticCheck};
use crate::cli::commands::doctor::types::{
    Check, CheckDetails, CheckName, CheckReport, CheckStatus, Issue, IssueCategory, ProbeStatus, Severity, Solution,
    SubResult,
};
use crate::external::{HttpRequest, HttpResponse};
use async_trait::async_trait;
use std::time::Duration;

/// Response headers identifying a WAF or CDN in front of the application
const WAF_SIGNATURES: &[(&str, &[&str])] = &[
    ("cloudflare", &["cf-ray", "cf-cache-status"]),
    ("aws_waf", &["x-amzn-requestid", "x-amz-cf-id"]),
    ("azure_waf", &["x-azure-ref", "x-msedge-ref"]),
    ("sucuri", &["x-sucuri-id", "x-sucuri-cache"]),
    ("incapsula", &["x-iinfo", "x-cdn"]),
    ("akamai", &["x-akamai-request-id", "x-cache"]),
    ("nginx_waf", &["x-nginx-cache"]),
    ("mod_security", &["x-mod-security-message"]),
];

const BLOCKING_STATUSES: &[u16] = &[403, 406, 429, 503];
const BLOCKING_KEYWORDS: &[&str] = &["blocked", "forbidden", "security", "firewall", "protection", "rate limit"];
const RATE_LIMIT_HEADERS: &[&str] = &["x-ratelimit-remaining", "x-rate-limit-remaining", "retry-after", "x-ratelimit-limit"];

fn detect_wafs(response: &HttpResponse) -> Vec<&'static str> {
    let mut detected: Vec<&'static str> = WAF_SIGNATURES
        .iter()
        .filter(|(_, headers)| headers.iter().any(|h| response.header(h).is_some()))
        .map(|(name, _)| *name)
        .collect();
    let served_by_cloudflare = response
        .header("server")
        .is_some_and(|server| server.to_ascii_lowercase().contains("cloudflare"));
    if served_by_cloudflare && !detected.contains(&"cloudflare") {
        detected.insert(0, "cloudflare");
    }
    detected
}

fn blocking_keywords(response: &HttpResponse) -> Vec<&'static str> {
    if !BLOCKING_STATUSES.contains(&response.status) {
        return Vec::new();
    }
    let body = response.body.to_lowercase();
    BLOCKING_KEYWORDS.iter().copied().filter(|kw| body.contains(kw)).collect()
}

fn classify_headers(label: &str, response: &HttpResponse) -> SubResult {
    let keywords = blocking_keywords(response);
    if !keywords.is_empty() {
        return SubResult::fail(label, format!("Request appears to be blocked (HTTP {})", response.status))
            .with_detail(format!("Blocking keywords found: {}", keywords.join(", ")));
    }
    let wafs = detect_wafs(response);
    if wafs.is_empty() {
        SubResult::pass(label, "No WAF blocking detected")
            .with_detail(format!("HTTP {} response, no WAF signatures", response.status))
    } else {
        SubResult::warn(label, format!("WAF/CDN detected: {}", wafs.join(", ")))
            .with_detail("Make sure the WAF/CDN forwards API requests to the application unchanged")
    }
}

/// `waf-detection`
pub struct WafDetectionCheck;

impl WafDetectionCheck {
    async fn rate_limit_burst(ctx: &CheckContext, url: &str) -> SubResult {
        let label = format!("Rate limiting ({url})");
        let policy = &ctx.settings.policy;
        let request = HttpRequest::get(url, ctx.settings.probes.http_timeout()).accept_invalid_certs(true);
        let mut statuses = Vec::new();

        for attempt in 0..policy.rate_limit_burst {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(policy.rate_limit_delay_ms)).await;
            }
            let response = match ctx.network.http_get(&request).await {
                Ok(response) => response,
                Err(e) => {
                    return SubResult::warn(&label, "Rate limiting test could not complete")
                        .with_detail(e.to_string())
                        .with_url(url)
                }
            };
            let headers: Vec<&str> = RATE_LIMIT_HEADERS
                .iter()
                .copied()
                .filter(|h| response.header(h).is_some())
                .collect();

            if response.status == 429 {
                return SubResult::fail(&label, "Rate limiting detected (HTTP 429)")
                    .with_detail(format!("Server answered Too Many Requests after {} request(s)", attempt + 1))
                    .with_url(url);
            }
            if !headers.is_empty() {
                return SubResult::warn(&label, format!("Rate limiting headers detected: {}", headers.join(", ")))
                    .with_url(url);
            }
            statuses.push(response.status.to_string());
        }

        SubResult::pass(&label, "No rate limiting detected")
            .with_detail(format!("Responses: {}", statuses.join(", ")))
            .with_url(url)
    }
}

#[async_trait]
impl DiagnosticCheck for WafDetectionCheck {
    fn name(&self) -> CheckName {
        CheckName::WafDetection
    }

    async fn run(&self, ctx: &CheckContext) -> anyhow::Result<CheckReport> {
        let check = Check::new(self.name());
        // One URL only, a probe burst per host could trip a real WAF
        let Some(url) = ctx.deployment.base_urls().into_iter().next() else {
            return Ok(check.skip("No URL to probe").into());
        };

        let label = format!("WAF headers ({url})");
        let request = HttpRequest::get(&url, ctx.settings.probes.http_timeout()).accept_invalid_certs(true);
        let mut tests = Vec::new();
        match ctx.network.http_get(&request).await {
            Ok(response) => {
                tests.push(classify_headers(&label, &response).with_url(&url));
                tests.push(Self::rate_limit_burst(ctx, &url).await);
            }
            Err(e) => tests.push(
                SubResult::warn(&label, "Connection failed, WAF detection not possible")
                    .with_detail(e.to_string())
                    .with_url(&url),
            ),
        }

        let findings: Vec<String> = tests
            .iter()
            .filter(|t| t.status != ProbeStatus::Pass)
            .map(|t| t.message.clone())
            .collect();
        let blocked = tests.iter().any(SubResult::is_fail);

        let check = check
            .with_details(CheckDetails::Waf { tests })
            .conclude_from_details(|status, passed, total| match status {
                CheckStatus::Pass => format!("No WAF blocking detected ({total} checks passed)"),
                CheckStatus::Fail => "WAF blocking detected".to_string(),
                _ => format!("Potential WAF/protection detected ({passed}/{total} checks passed)"),
            });

        if findings.is_empty() {
            return Ok(check.into());
        }
        let (severity, solution) = if blocked {
            (
                Severity::High,
                Solution::text("Allow-list the operators' and API clients' addresses in the WAF, or raise its rate limits"),
            )
        } else {
            (
                Severity::Low,
                Solution::text("Make sure the WAF/CDN does not rate-limit or rewrite API requests"),
            )
        };
        Ok(CheckReport::new(check).with_issue(Issue::new(
            IssueCategory::Waf,
            severity,
            "WAF or rate limiting in front of the application",
            findings.join("; "),
            solution,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::Harness;
    use super::*;
    use crate::external::HttpProbeError;
    use std::collections::BTreeMap;

    fn response(status: u16, headers: &[(&str, &str)], body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            body: body.to_string(),
        }
    }

    #[test]
    fn test_header_signatures() {
        let cf = response(200, &[("cf-ray", "8a1b"), ("server", "cloudflare")], "");
        assert_eq!(detect_wafs(&cf), vec!["cloudflare"]);

        let nginx = response(200, &[("server", "nginx/1.25")], "");
        assert!(detect_wafs(&nginx).is_empty());

        let server_only = response(200, &[("server", "cloudflare")], "");
        assert_eq!(detect_wafs(&server_only), vec!["cloudflare"]);

        let cdn = response(200, &[("x-cache", "HIT"), ("x-amz-cf-id", "abc")], "");
        assert_eq!(detect_wafs(&cdn), vec!["aws_waf", "akamai"]);
    }

    #[test]
    fn test_blocking_needs_status_and_keyword() {
        assert_eq!(
            blocking_keywords(&response(403, &[], "Request blocked by security policy")),
            vec!["blocked", "security"]
        );
        assert!(blocking_keywords(&response(200, &[], "security")).is_empty());
        assert_eq!(blocking_keywords(&response(403, &[], "<h1>Forbidden</h1>")), vec!["forbidden"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_response_passes() {
        let harness = Harness::new(r#"{"hosts": ["lab.test"]}"#);
        harness.network.http_status("https://lab.test", 200);

        let report = WafDetectionCheck.run(&harness.context()).await.unwrap();

        assert_eq!(report.check.status, CheckStatus::Pass);
        assert_eq!(harness.network.http_calls().len(), 4);
        assert!(report.issues.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_response_fails_its_probe() {
        let harness = Harness::new(r#"{"hosts": ["lab.test", "other.test"]}"#);
        harness
            .network
            .http("https://lab.test", Ok(response(429, &[("retry-after", "30")], "Rate limit exceeded")));

        let report = WafDetectionCheck.run(&harness.context()).await.unwrap();

        let subs = report.check.sub_results();
        assert_eq!(subs.len(), 2);
        assert!(subs.iter().all(|s| s.is_fail()));
        assert_eq!(report.check.status, CheckStatus::Fail);
        assert_eq!(report.issues[0].severity, Severity::High);
        assert!(harness.network.http_calls().iter().all(|url| url == "https://lab.test"));
    }

    #[tokio::test]
    async fn test_connection_failure_degrades_to_warning() {
        let harness = Harness::new(r#"{"hosts": ["lab.test"]}"#);
        harness
            .network
            .http("https://lab.test", Err(HttpProbeError::Connect("connection refused".into())));

        let report = WafDetectionCheck.run(&harness.context()).await.unwrap();

        assert_eq!(report.check.status, CheckStatus::Warn);
        assert_eq!(report.check.sub_results().len(), 1);
        assert_eq!(harness.network.http_calls().len(), 1);
        assert_eq!(report.issues[0].severity, Severity::Low);
    }
}
