use super::environment::EnvironmentSnapshot;
use super::issues::IssueAggregator;
use super::remediation::RemediationAdvisor;
use super::types::{Check, CheckCategory, CheckDetails, CheckStatus, Fix, Issue, Solution};
use crate::deployment::SslStrategy;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write;

/// How the report is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportMode {
    /// Narrative, sub-results expanded where they matter
    Full,
    /// Narrative with every sub-result expanded
    Verbose,
    /// Counts and verdict only
    Quiet,
    /// Structured report for automation
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Healthy,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub total_checks: usize,
    pub passed: usize,
    pub warnings: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl ReportSummary {
    pub fn from_checks(checks: &[Check]) -> Self {
        let count = |status: CheckStatus| checks.iter().filter(|c| c.status == status).count();
        Self {
            total_checks: checks.len(),
            passed: count(CheckStatus::Pass),
            warnings: count(CheckStatus::Warn),
            failed: count(CheckStatus::Fail),
            skipped: count(CheckStatus::Skip),
        }
    }

    pub fn verdict(&self) -> Verdict {
        match (self.failed, self.warnings) {
            (0, 0) => Verdict::Healthy,
            (0, _) => Verdict::Warning,
            _ => Verdict::Critical,
        }
    }

    /// Failing-check count, the exit code of a completed run
    pub fn exit_code(&self) -> i32 {
        i32::try_from(self.failed).unwrap_or(i32::MAX)
    }
}

/// Everything one diagnostic run produced
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticReport {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub stack_name: String,
    pub strategy: SslStrategy,
    pub summary: ReportSummary,
    pub verdict: Verdict,
    pub environment: EnvironmentSnapshot,
    pub checks: Vec<Check>,
    pub issues: Vec<Issue>,
    pub fixes: Vec<Fix>,
}

impl DiagnosticReport {
    pub fn new(
        run_id: impl Into<String>,
        stack_name: impl Into<String>,
        strategy: SslStrategy,
        environment: EnvironmentSnapshot,
        checks: Vec<Check>,
        issues: Vec<Issue>,
        fixes: Vec<Fix>,
    ) -> Self {
        let summary = ReportSummary::from_checks(&checks);
        Self {
            run_id: run_id.into(),
            generated_at: Utc::now(),
            stack_name: stack_name.into(),
            strategy,
            verdict: summary.verdict(),
            summary,
            environment,
            checks,
            issues,
            fixes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedReport {
    pub text: String,
    pub exit_code: i32,
}

pub struct ReportRenderer {
    mode: ReportMode,
}

impl ReportRenderer {
    pub fn new(mode: ReportMode) -> Self {
        Self { mode }
    }

    pub fn render(&self, report: &DiagnosticReport) -> Result<RenderedReport> {
        let text = match self.mode {
            ReportMode::Json => format!("{}\n", serde_json::to_string_pretty(report)?),
            ReportMode::Quiet => self.render_quiet(report)?,
            ReportMode::Full | ReportMode::Verbose => self.render_narrative(report)?,
        };
        Ok(RenderedReport {
            text,
            exit_code: report.summary.exit_code(),
        })
    }

    fn render_quiet(&self, report: &DiagnosticReport) -> Result<String> {
        let s = &report.summary;
        let mut out = String::new();
        writeln!(
            out,
            "{} checks: {} passed, {} warnings, {} failed, {} skipped ({})",
            s.total_checks,
            s.passed,
            s.warnings,
            s.failed,
            s.skipped,
            verdict_label(report.verdict)
        )?;
        Ok(out)
    }

    fn expands(&self, check: &Check) -> bool {
        self.mode == ReportMode::Verbose
            || matches!(check.status, CheckStatus::Warn | CheckStatus::Fail)
            || check.details.as_ref().is_some_and(CheckDetails::always_expanded)
    }

    fn render_narrative(&self, report: &DiagnosticReport) -> Result<String> {
        let mut out = String::new();

        writeln!(out, "🩺 STACKCTL DIAGNOSE - Stack '{}'", report.stack_name)?;
        writeln!(out, "=============================================")?;
        writeln!(out, "SSL strategy: {}", report.strategy.describe())?;
        let mut host = report.environment.os_name().to_string();
        if let Some(cloud) = &report.environment.cloud {
            write!(host, " on {:?} ({})", cloud.provider, cloud.instance_id)?;
        }
        writeln!(out, "Host: {host}")?;
        writeln!(out)?;

        let s = &report.summary;
        writeln!(out, "📊 DIAGNOSTIC SUMMARY:")?;
        writeln!(out, "─────────────────────")?;
        writeln!(out, "Total checks: {}", s.total_checks)?;
        if s.passed > 0 {
            writeln!(out, "✅ Passed: {}", s.passed)?;
        }
        if s.failed > 0 {
            writeln!(out, "❌ Failed: {}", s.failed)?;
        }
        if s.warnings > 0 {
            writeln!(out, "⚠️  Warnings: {}", s.warnings)?;
        }
        if s.skipped > 0 {
            writeln!(out, "⏭️  Skipped: {}", s.skipped)?;
        }
        writeln!(out)?;

        for category in [
            CheckCategory::Infrastructure,
            CheckCategory::Network,
            CheckCategory::Services,
            CheckCategory::Security,
        ] {
            let checks: Vec<&Check> = report.checks.iter().filter(|c| c.category == category).collect();
            if checks.is_empty() {
                continue;
            }
            let title = format!("🔍 {}:", category.label().to_uppercase());
            writeln!(out, "{title}")?;
            writeln!(out, "{}", "─".repeat(title.chars().count()))?;
            for check in checks {
                self.render_check(&mut out, check)?;
            }
        }

        self.render_issues(&mut out, &report.issues)?;
        self.render_fixes(&mut out, &report.fixes)?;

        let troubled = report
            .checks
            .iter()
            .filter(|c| matches!(c.status, CheckStatus::Warn | CheckStatus::Fail))
            .map(|c| c.name);
        let tips = RemediationAdvisor::tips_for_checks(troubled);
        if !tips.is_empty() {
            writeln!(out, "💡 TROUBLESHOOTING TIPS:")?;
            writeln!(out, "───────────────────────")?;
            for tip in tips {
                writeln!(out, "   • {tip}")?;
            }
            writeln!(out)?;
        }

        match report.verdict {
            Verdict::Healthy => writeln!(out, "✅ Stack is healthy!")?,
            Verdict::Warning => writeln!(
                out,
                "⚠️  Stack is functional but has {} warning(s) that should be addressed.",
                s.warnings
            )?,
            Verdict::Critical => writeln!(
                out,
                "❌ Stack has {} failing check(s) that must be resolved.",
                s.failed
            )?,
        }

        if report.strategy == SslStrategy::None {
            writeln!(out)?;
            writeln!(
                out,
                "🔒 Reminder: TLS is handled outside the stack. An external HTTPS proxy must forward to the HTTP port."
            )?;
        }
        Ok(out)
    }

    fn render_check(&self, out: &mut String, check: &Check) -> Result<()> {
        writeln!(out, "{} {}: {}", check.status.icon(), check.description, check.message)?;
        if !self.expands(check) {
            return Ok(());
        }
        if self.mode == ReportMode::Verbose || check.status == CheckStatus::Fail {
            writeln!(out, "   {}", check.name.explanation())?;
        }
        match &check.details {
            Some(CheckDetails::Containers { containers }) => {
                for container in containers {
                    let icon = if container.is_running() { "✅" } else { "❌" };
                    writeln!(
                        out,
                        "   {icon} {} ({}): {}",
                        container.service,
                        container.role.label(),
                        container.status
                    )?;
                }
            }
            Some(CheckDetails::Engine { server: Some(server) }) => {
                writeln!(out, "   Server version: {server}")?;
            }
            Some(CheckDetails::ComposeFile { path }) => {
                writeln!(out, "   Path: {path}")?;
            }
            Some(details) => {
                for sub in details.sub_results() {
                    writeln!(out, "   {} {}: {}", sub.status.icon(), sub.label, sub.message)?;
                    if let Some(detail) = &sub.detail {
                        writeln!(out, "      {detail}")?;
                    }
                }
            }
            None => {}
        }
        writeln!(out)?;
        Ok(())
    }

    fn render_issues(&self, out: &mut String, issues: &[Issue]) -> Result<()> {
        if issues.is_empty() {
            return Ok(());
        }
        writeln!(out)?;
        writeln!(out, "🚨 ISSUES FOUND:")?;
        writeln!(out, "───────────────")?;
        let aggregator: IssueAggregator = issues.iter().cloned().collect();
        let mut number = 0;
        for (category, group) in aggregator.by_category() {
            writeln!(out, "📂 {} ({}):", category.tag().to_uppercase(), group.len())?;
            for issue in group {
                number += 1;
                writeln!(out, "{number}. {} [{}]", issue.title, issue.severity.badge())?;
                writeln!(out, "   Description: {}", issue.description)?;
                match &issue.solution {
                    Solution::Text(text) => writeln!(out, "   Solution: {text}")?,
                    Solution::Commands(commands) => {
                        writeln!(out, "   Solution:")?;
                        for command in commands {
                            writeln!(out, "     $ {command}")?;
                        }
                    }
                }
            }
            writeln!(out)?;
        }
        Ok(())
    }

    fn render_fixes(&self, out: &mut String, fixes: &[Fix]) -> Result<()> {
        if fixes.is_empty() {
            return Ok(());
        }
        writeln!(out, "🔧 SUGGESTED FIXES:")?;
        writeln!(out, "──────────────────")?;
        for (i, fix) in fixes.iter().enumerate() {
            let mode = if fix.automatic { "can be applied with --fix" } else { "manual" };
            writeln!(out, "{}. {} ({mode})", i + 1, fix.name)?;
            for command in &fix.commands {
                writeln!(out, "     $ {command}")?;
            }
        }
        writeln!(out)?;
        Ok(())
    }
}

fn verdict_label(verdict: Verdict) -> &'static str {
    match verdict {
        Verdict::Healthy => "healthy",
        Verdict::Warning => "warning",
        Verdict::Critical => "critical",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands::doctor::types::{CheckName, IssueCategory, Severity, SubResult};

    fn report(checks: Vec<Check>, strategy: SslStrategy) -> DiagnosticReport {
        DiagnosticReport::new(
            "run-1",
            "lab",
            strategy,
            EnvironmentSnapshot::default(),
            checks,
            Vec::new(),
            Vec::new(),
        )
    }

    fn endpoints_with_one_pass() -> Check {
        Check::new(CheckName::ServiceEndpoints)
            .with_details(CheckDetails::Endpoints {
                tests: vec![SubResult::pass("Web interface (HTTPS) https://lab.test/", "Accessible (HTTP 200)")],
            })
            .pass("All 1 endpoints accessible")
    }

    #[test]
    fn test_exit_code_and_verdict_follow_check_statuses() {
        let healthy = report(vec![Check::new(CheckName::ComposeFile).pass("ok")], SslStrategy::SelfSigned);
        assert_eq!(healthy.verdict, Verdict::Healthy);
        assert_eq!(healthy.summary.exit_code(), 0);

        let warning = report(
            vec![
                Check::new(CheckName::ComposeFile).pass("ok"),
                Check::new(CheckName::FirewallConfig).warn("ufw"),
                Check::new(CheckName::SslCertificates).skip("none"),
            ],
            SslStrategy::SelfSigned,
        );
        assert_eq!(warning.verdict, Verdict::Warning);
        assert_eq!(warning.summary.exit_code(), 0);

        let critical = report(
            vec![
                Check::new(CheckName::ComposeFile).fail("missing"),
                Check::new(CheckName::ContainerStatus).fail("not started"),
                Check::new(CheckName::FirewallConfig).warn("ufw"),
            ],
            SslStrategy::SelfSigned,
        );
        assert_eq!(critical.verdict, Verdict::Critical);
        let rendered = ReportRenderer::new(ReportMode::Full).render(&critical).unwrap();
        assert_eq!(rendered.exit_code, 2);
    }

    #[test]
    fn test_quiet_mode_prints_counts_only() {
        let report = report(
            vec![Check::new(CheckName::ComposeFile).pass("ok"), endpoints_with_one_pass()],
            SslStrategy::SelfSigned,
        );
        let rendered = ReportRenderer::new(ReportMode::Quiet).render(&report).unwrap();
        assert_eq!(rendered.text, "2 checks: 2 passed, 0 warnings, 0 failed, 0 skipped (healthy)\n");
    }

    #[test]
    fn test_narrative_expands_endpoint_results_even_when_passing() {
        let report = report(
            vec![Check::new(CheckName::ComposeFile).pass("found"), endpoints_with_one_pass()],
            SslStrategy::None,
        );
        let text = ReportRenderer::new(ReportMode::Full).render(&report).unwrap().text;
        assert!(text.contains("Web interface (HTTPS) https://lab.test/"));
        assert!(text.contains("🔍 INFRASTRUCTURE:"));
        assert!(text.contains("✅ Stack is healthy!"));
        assert!(text.contains("external HTTPS proxy"));
        assert!(!text.contains("TROUBLESHOOTING TIPS"));
    }

    #[test]
    fn test_narrative_lists_issues_and_tips_for_failing_checks() {
        let mut report = report(
            vec![Check::new(CheckName::FirewallConfig)
                .with_details(CheckDetails::Firewall {
                    tests: vec![SubResult::warn("UFW rules", "Port 443 not allowed")],
                })
                .warn("1 potential firewall issue")],
            SslStrategy::SelfSigned,
        );
        report.issues.push(Issue::new(
            IssueCategory::Firewall,
            Severity::Medium,
            "Firewall rules may block the stack",
            "Port 443 not allowed",
            Solution::commands(["sudo ufw allow 443"]),
        ));

        let text = ReportRenderer::new(ReportMode::Full).render(&report).unwrap().text;

        assert!(text.contains("🚨 ISSUES FOUND:"));
        assert!(text.contains("$ sudo ufw allow 443"));
        assert!(text.contains("[🟡 MEDIUM]"));
        assert!(text.contains("Check UFW status: sudo ufw status verbose"));
        assert!(!text.contains("Reminder"));
    }

    #[test]
    fn test_issues_are_grouped_by_category_most_severe_first() {
        let mut report = report(vec![Check::new(CheckName::FirewallConfig).warn("2 issues")], SslStrategy::None);
        report.issues.extend([
            Issue::new(IssueCategory::Firewall, Severity::Low, "iptables logging", "", Solution::text("ignore")),
            Issue::new(IssueCategory::Docker, Severity::Critical, "Engine down", "", Solution::text("start it")),
            Issue::new(IssueCategory::Firewall, Severity::High, "UFW blocks 443", "", Solution::text("allow it")),
        ]);

        let text = ReportRenderer::new(ReportMode::Full).render(&report).unwrap().text;

        let docker = text.find("📂 DOCKER (1):").unwrap();
        let firewall = text.find("📂 FIREWALL (2):").unwrap();
        assert!(docker < firewall);
        let high = text.find("UFW blocks 443").unwrap();
        let low = text.find("iptables logging").unwrap();
        assert!(firewall < high && high < low);
        assert!(text.contains("1. Engine down"));
        assert!(text.contains("2. UFW blocks 443"));
        assert!(text.contains("3. iptables logging"));
    }

    #[test]
    fn test_json_mode_serializes_environment_and_issues() {
        let report = report(vec![Check::new(CheckName::ComposeFile).fail("missing")], SslStrategy::LetsEncrypt);
        let rendered = ReportRenderer::new(ReportMode::Json).render(&report).unwrap();
        let value: serde_json::Value = serde_json::from_str(&rendered.text).unwrap();
        assert_eq!(value["verdict"], "critical");
        assert_eq!(value["strategy"], "letsencrypt");
        assert_eq!(value["checks"][0]["name"], "docker-compose-file");
        assert!(value["environment"]["os"].is_object());
        assert!(value["issues"].is_array());
        assert_eq!(rendered.exit_code, 1);
    }
}
