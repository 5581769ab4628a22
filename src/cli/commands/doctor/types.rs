use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifiers of the diagnostic checks, in catalog order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckName {
    EngineConnectivity,
    #[serde(rename = "docker-compose-file")]
    ComposeFile,
    ContainerStatus,
    ContainerConnectivity,
    ExternalPorts,
    SslCertificates,
    ServiceEndpoints,
    FirewallConfig,
    WafDetection,
}

impl CheckName {
    pub fn id(self) -> &'static str {
        match self {
            CheckName::EngineConnectivity => "engine-connectivity",
            CheckName::ComposeFile => "docker-compose-file",
            CheckName::ContainerStatus => "container-status",
            CheckName::ContainerConnectivity => "container-connectivity",
            CheckName::ExternalPorts => "external-ports",
            CheckName::SslCertificates => "ssl-certificates",
            CheckName::ServiceEndpoints => "service-endpoints",
            CheckName::FirewallConfig => "firewall-config",
            CheckName::WafDetection => "waf-detection",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            CheckName::EngineConnectivity => "Container engine connectivity",
            CheckName::ComposeFile => "Compose configuration file",
            CheckName::ContainerStatus => "Container status",
            CheckName::ContainerConnectivity => "Inter-container connectivity",
            CheckName::ExternalPorts => "External port accessibility",
            CheckName::SslCertificates => "SSL certificate validation",
            CheckName::ServiceEndpoints => "Service endpoint health",
            CheckName::FirewallConfig => "Firewall configuration",
            CheckName::WafDetection => "WAF/rate-limit detection",
        }
    }

    pub fn category(self) -> CheckCategory {
        match self {
            CheckName::EngineConnectivity | CheckName::ComposeFile | CheckName::ContainerStatus => {
                CheckCategory::Infrastructure
            }
            CheckName::ContainerConnectivity | CheckName::ExternalPorts => CheckCategory::Network,
            CheckName::SslCertificates | CheckName::FirewallConfig | CheckName::WafDetection => {
                CheckCategory::Security
            }
            CheckName::ServiceEndpoints => CheckCategory::Services,
        }
    }

    /// What the check verifies, in operator terms
    pub fn explanation(self) -> &'static str {
        match self {
            CheckName::EngineConnectivity => "Verifies that the container engine daemon answers",
            CheckName::ComposeFile => "Verifies that the generated compose file exists and is readable",
            CheckName::ContainerStatus => "Checks that every container of the stack is running",
            CheckName::ContainerConnectivity => {
                "Tests TCP connectivity between containers from inside the source container"
            }
            CheckName::ExternalPorts => "Verifies that the published ports are reachable from the host",
            CheckName::SslCertificates => "Validates the served certificate and its expiry date",
            CheckName::ServiceEndpoints => "Requests the application over HTTP(S) and classifies the responses",
            CheckName::FirewallConfig => "Looks for host firewall rules that could block the stack's traffic",
            CheckName::WafDetection => "Detects WAF/CDN layers and rate limiting in front of the application",
        }
    }
}

impl fmt::Display for CheckName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Display grouping of checks, fixed per check at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckCategory {
    Infrastructure,
    Network,
    Security,
    Services,
}

impl CheckCategory {
    pub fn label(self) -> &'static str {
        match self {
            CheckCategory::Infrastructure => "Infrastructure",
            CheckCategory::Network => "Network",
            CheckCategory::Security => "Security",
            CheckCategory::Services => "Services",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pending,
    Pass,
    Warn,
    Fail,
    Skip,
}

impl CheckStatus {
    pub fn icon(self) -> &'static str {
        match self {
            CheckStatus::Pending => "⏳",
            CheckStatus::Pass => "✅",
            CheckStatus::Warn => "⚠️",
            CheckStatus::Fail => "❌",
            CheckStatus::Skip => "⏭️",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, CheckStatus::Pending)
    }
}

/// Outcome of a single probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Pass,
    Warn,
    Fail,
}

impl ProbeStatus {
    pub fn icon(self) -> &'static str {
        match self {
            ProbeStatus::Pass => "✅",
            ProbeStatus::Warn => "⚠️",
            ProbeStatus::Fail => "❌",
        }
    }
}

impl From<ProbeStatus> for CheckStatus {
    fn from(status: ProbeStatus) -> Self {
        match status {
            ProbeStatus::Pass => CheckStatus::Pass,
            ProbeStatus::Warn => CheckStatus::Warn,
            ProbeStatus::Fail => CheckStatus::Fail,
        }
    }
}

/// Contextual fields of a sub-result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// One probe outcome nested in a check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubResult {
    pub label: String,
    pub status: ProbeStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default)]
    pub context: SubContext,
}

impl SubResult {
    pub fn new(label: impl Into<String>, status: ProbeStatus, message: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            status,
            message: message.into(),
            detail: None,
            context: SubContext::default(),
        }
    }

    pub fn pass(label: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(label, ProbeStatus::Pass, message)
    }

    pub fn warn(label: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(label, ProbeStatus::Warn, message)
    }

    pub fn fail(label: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(label, ProbeStatus::Fail, message)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.context.host = Some(host.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.context.port = Some(port);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.context.url = Some(url.into());
        self
    }

    pub fn with_edge(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.context.source = Some(source.into());
        self.context.target = Some(target.into());
        self
    }

    pub fn is_fail(&self) -> bool {
        self.status == ProbeStatus::Fail
    }
}

/// Derive a check status from its sub-results.
///
/// All pass gives pass. No pass with at least one failure gives fail.
/// Anything else, including warnings without failures, gives warn.
pub fn aggregate_status(results: &[SubResult]) -> Option<CheckStatus> {
    if results.is_empty() {
        return None;
    }
    let passed = results.iter().filter(|r| r.status == ProbeStatus::Pass).count();
    let failed = results.iter().filter(|r| r.status == ProbeStatus::Fail).count();
    Some(if passed == results.len() {
        CheckStatus::Pass
    } else if passed == 0 && failed > 0 {
        CheckStatus::Fail
    } else {
        CheckStatus::Warn
    })
}

/// Architectural role of a container, derived from its service name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContainerRole {
    Database,
    Application,
    Proxy,
    CertificateManager,
    ComputeWorker,
    Other,
}

impl ContainerRole {
    pub fn label(self) -> &'static str {
        match self {
            ContainerRole::Database => "Database",
            ContainerRole::Application => "Application",
            ContainerRole::Proxy => "Reverse Proxy",
            ContainerRole::CertificateManager => "Certificate Manager",
            ContainerRole::ComputeWorker => "Compute Worker",
            ContainerRole::Other => "Other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub service: String,
    pub name: String,
    pub role: ContainerRole,
    pub state: String,
    pub status: String,
}

impl ContainerRecord {
    pub fn is_running(&self) -> bool {
        self.state.eq_ignore_ascii_case("running")
    }
}

/// Typed details of a check, one shape per kind of check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckDetails {
    Engine { server: Option<String> },
    ComposeFile { path: String },
    Containers { containers: Vec<ContainerRecord> },
    Connectivity { tests: Vec<SubResult> },
    Ports { tests: Vec<SubResult> },
    Certificates { tests: Vec<SubResult> },
    Endpoints { tests: Vec<SubResult> },
    Firewall { tests: Vec<SubResult> },
    Waf { tests: Vec<SubResult> },
}

impl CheckDetails {
    pub fn sub_results(&self) -> &[SubResult] {
        match self {
            CheckDetails::Connectivity { tests }
            | CheckDetails::Ports { tests }
            | CheckDetails::Certificates { tests }
            | CheckDetails::Endpoints { tests }
            | CheckDetails::Firewall { tests }
            | CheckDetails::Waf { tests } => tests,
            CheckDetails::Engine { .. } | CheckDetails::ComposeFile { .. } | CheckDetails::Containers { .. } => &[],
        }
    }

    /// Whether the narrative report always expands these sub-results
    pub fn always_expanded(&self) -> bool {
        matches!(
            self,
            CheckDetails::Connectivity { .. }
                | CheckDetails::Endpoints { .. }
                | CheckDetails::Firewall { .. }
                | CheckDetails::Waf { .. }
        )
    }
}

/// A named unit of verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    pub name: CheckName,
    pub category: CheckCategory,
    pub description: String,
    pub status: CheckStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<CheckDetails>,
}

impl Check {
    pub fn new(name: CheckName) -> Self {
        Self {
            name,
            category: name.category(),
            description: name.description().to_string(),
            status: CheckStatus::Pending,
            message: String::new(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: CheckDetails) -> Self {
        self.details = Some(details);
        self
    }

    /// Move the check to its terminal status
    pub fn conclude(mut self, status: CheckStatus, message: impl Into<String>) -> Self {
        debug_assert!(!self.status.is_terminal(), "{} concluded twice", self.name);
        debug_assert!(status.is_terminal());
        self.status = status;
        self.message = message.into();
        self
    }

    pub fn pass(self, message: impl Into<String>) -> Self {
        self.conclude(CheckStatus::Pass, message)
    }

    pub fn warn(self, message: impl Into<String>) -> Self {
        self.conclude(CheckStatus::Warn, message)
    }

    pub fn fail(self, message: impl Into<String>) -> Self {
        self.conclude(CheckStatus::Fail, message)
    }

    pub fn skip(self, message: impl Into<String>) -> Self {
        self.conclude(CheckStatus::Skip, message)
    }

    /// Conclude from the sub-results held in `details`, with `message` built
    /// from the (passed, total) counts
    pub fn conclude_from_details(self, message: impl FnOnce(CheckStatus, usize, usize) -> String) -> Self {
        let results = self.sub_results();
        let total = results.len();
        let passed = results.iter().filter(|r| r.status == ProbeStatus::Pass).count();
        match aggregate_status(results) {
            Some(status) => {
                let text = message(status, passed, total);
                self.conclude(status, text)
            }
            None => {
                let text = message(CheckStatus::Skip, 0, 0);
                self.conclude(CheckStatus::Skip, text)
            }
        }
    }

    pub fn sub_results(&self) -> &[SubResult] {
        self.details.as_ref().map(CheckDetails::sub_results).unwrap_or(&[])
    }

    pub fn failing_sub_results(&self) -> usize {
        self.sub_results().iter().filter(|r| r.is_fail()).count()
    }
}

/// Stable issue category tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Setup,
    Docker,
    Containers,
    Connectivity,
    Ports,
    Certificates,
    Endpoints,
    Firewall,
    Waf,
    Selinux,
    AwsSecurityGroups,
    AwsNacl,
    AwsVolumes,
}

impl IssueCategory {
    pub fn tag(self) -> &'static str {
        match self {
            IssueCategory::Setup => "setup",
            IssueCategory::Docker => "docker",
            IssueCategory::Containers => "containers",
            IssueCategory::Connectivity => "connectivity",
            IssueCategory::Ports => "ports",
            IssueCategory::Certificates => "certificates",
            IssueCategory::Endpoints => "endpoints",
            IssueCategory::Firewall => "firewall",
            IssueCategory::Waf => "waf",
            IssueCategory::Selinux => "selinux",
            IssueCategory::AwsSecurityGroups => "aws_security_groups",
            IssueCategory::AwsNacl => "aws_nacl",
            IssueCategory::AwsVolumes => "aws_volumes",
        }
    }
}

impl fmt::Display for IssueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Severity, ordered from most to least severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn badge(self) -> &'static str {
        match self {
            Severity::Critical => "🔴 CRITICAL",
            Severity::High => "🟠 HIGH",
            Severity::Medium => "🟡 MEDIUM",
            Severity::Low => "🟢 LOW",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Solution {
    Text(String),
    Commands(Vec<String>),
}

impl Solution {
    pub fn text(text: impl Into<String>) -> Self {
        Solution::Text(text.into())
    }

    pub fn commands<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Solution::Commands(commands.into_iter().map(Into::into).collect())
    }

    /// Single-line rendering
    pub fn summary(&self) -> String {
        match self {
            Solution::Text(text) => text.clone(),
            Solution::Commands(commands) => commands.join(" && "),
        }
    }
}

/// A reported problem, independent of the check that found it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub category: IssueCategory,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub solution: Solution,
}

impl Issue {
    pub fn new(
        category: IssueCategory,
        severity: Severity,
        title: impl Into<String>,
        description: impl Into<String>,
        solution: Solution,
    ) -> Self {
        Self {
            category,
            severity,
            title: title.into(),
            description: description.into(),
            solution,
        }
    }
}

/// An actionable remediation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fix {
    pub name: String,
    pub description: String,
    pub commands: Vec<String>,
    /// May be offered for execution after an overall go-ahead
    pub automatic: bool,
}

/// A check together with the issues derived from its final outcome
#[derive(Debug, Clone)]
pub struct CheckReport {
    pub check: Check,
    pub issues: Vec<Issue>,
}

impl CheckReport {
    pub fn new(check: Check) -> Self {
        Self {
            check,
            issues: Vec::new(),
        }
    }

    pub fn with_issue(mut self, issue: Issue) -> Self {
        self.issues.push(issue);
        self
    }
}

impl From<Check> for CheckReport {
    fn from(check: Check) -> Self {
        Self::new(check)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subs(statuses: &[ProbeStatus]) -> Vec<SubResult> {
        statuses
            .iter()
            .enumerate()
            .map(|(i, s)| SubResult::new(format!("probe {i}"), *s, "msg"))
            .collect()
    }

    #[test]
    fn test_aggregate_status_rules() {
        use ProbeStatus::*;
        assert_eq!(aggregate_status(&[]), None);
        assert_eq!(aggregate_status(&subs(&[Pass, Pass])), Some(CheckStatus::Pass));
        assert_eq!(aggregate_status(&subs(&[Pass, Fail])), Some(CheckStatus::Warn));
        assert_eq!(aggregate_status(&subs(&[Fail, Fail])), Some(CheckStatus::Fail));
        assert_eq!(aggregate_status(&subs(&[Warn, Fail])), Some(CheckStatus::Fail));
        assert_eq!(aggregate_status(&subs(&[Pass, Warn])), Some(CheckStatus::Warn));
        assert_eq!(aggregate_status(&subs(&[Warn])), Some(CheckStatus::Warn));
    }

    #[test]
    fn test_pass_iff_all_pass_and_fail_iff_no_pass() {
        use ProbeStatus::*;
        let all = [Pass, Warn, Fail];
        for a in all {
            for b in all {
                for c in all {
                    let results = subs(&[a, b, c]);
                    let status = aggregate_status(&results).unwrap();
                    let all_pass = results.iter().all(|r| r.status == Pass);
                    let none_pass = results.iter().all(|r| r.status != Pass);
                    let any_fail = results.iter().any(|r| r.status == Fail);
                    assert_eq!(status == CheckStatus::Pass, all_pass);
                    assert_eq!(status == CheckStatus::Fail, none_pass && any_fail);
                }
            }
        }
    }

    #[test]
    fn test_check_concludes_from_details() {
        let check = Check::new(CheckName::ExternalPorts)
            .with_details(CheckDetails::Ports {
                tests: subs(&[ProbeStatus::Pass, ProbeStatus::Fail]),
            })
            .conclude_from_details(|_, passed, total| format!("{passed}/{total} ports accessible"));
        assert_eq!(check.status, CheckStatus::Warn);
        assert_eq!(check.message, "1/2 ports accessible");
        assert_eq!(check.failing_sub_results(), 1);
        assert_eq!(check.category, CheckCategory::Network);
    }

    #[test]
    fn test_check_serializes_with_stable_ids() {
        let check = Check::new(CheckName::ComposeFile).fail("missing");
        let json = serde_json::to_value(&check).unwrap();
        assert_eq!(json["name"], "docker-compose-file");
        assert_eq!(json["status"], "fail");

        let issue = Issue::new(
            IssueCategory::AwsVolumes,
            Severity::Medium,
            "t",
            "d",
            Solution::text("grow it"),
        );
        assert_eq!(serde_json::to_value(&issue).unwrap()["category"], "aws_volumes");
    }
}
