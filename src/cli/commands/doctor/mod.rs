//! `stackctl diagnose`: health diagnostics and environment remediation
//!
//! One run loads the deployment configuration, collects host facts, makes
//! sure the stack is up (offering to start it), runs the check catalog in
//! order and renders a report whose exit code is the failing-check count.

pub mod checks;
pub mod console;
pub mod environment;
pub mod errors;
pub mod issues;
pub mod output;
pub mod remediation;
pub mod retry;
pub mod run_state;
pub mod types;

#[cfg(test)]
mod mocks;

use super::lifecycle::{ComposeLifecycle, StackLifecycle};
use crate::config::StackctlConfig;
use crate::deployment::DeploymentConfig;
use crate::external::{
    CommandExecutor, ContainerEngine, ContainerSummary, LiveNetworkProbe, NetworkProbe, ProcessCommandExecutor,
};
use anyhow::Result;
use checks::{full_catalog, quick_catalog, run_catalog, CheckContext};
use console::{Console, Prompt, Reporter, StdinPrompt};
use environment::EnvironmentDetector;
use errors::DoctorError;
use issues::IssueAggregator;
use output::{DiagnosticReport, ReportMode, ReportRenderer};
use remediation::{FixOutcome, RemediationAdvisor};
use run_state::{DiagnosticRun, RunEvent};
use statig::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, info_span, warn, Instrument};
use types::Fix;

pub use errors::FATAL_EXIT_CODE;

#[derive(Debug, Clone, Copy, Default)]
pub struct DoctorOptions {
    pub verbose: bool,
    pub quiet: bool,
    pub no_auto_start: bool,
    pub quick: bool,
    pub json: bool,
    pub fix: bool,
}

impl DoctorOptions {
    fn report_mode(&self) -> ReportMode {
        if self.json {
            ReportMode::Json
        } else if self.quiet {
            ReportMode::Quiet
        } else if self.verbose {
            ReportMode::Verbose
        } else {
            ReportMode::Full
        }
    }

    /// Runs that must not stop for a question
    fn non_interactive(&self) -> bool {
        self.no_auto_start || self.quiet || self.json
    }
}

/// How a run that did not hit a fatal error ended
#[derive(Debug)]
pub(crate) enum RunOutcome {
    /// The operator declined to start the stack
    Cancelled,
    Reported { report: Box<DiagnosticReport>, exit_code: i32 },
}

/// Doctor command for stack diagnostics and health checks
pub struct DoctorCommand {
    options: DoctorOptions,
    settings: StackctlConfig,
    executor: Arc<dyn CommandExecutor>,
    network: Arc<dyn NetworkProbe>,
    console: Console,
    prompt: Arc<dyn Prompt>,
}

impl DoctorCommand {
    pub fn new(options: DoctorOptions, settings: StackctlConfig) -> Self {
        Self {
            options,
            settings,
            executor: Arc::new(ProcessCommandExecutor),
            network: Arc::new(LiveNetworkProbe),
            console: Console::stdio(),
            prompt: Arc::new(StdinPrompt),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_network(mut self, network: Arc<dyn NetworkProbe>) -> Self {
        self.network = network;
        self
    }

    pub fn with_console(mut self, console: Console) -> Self {
        self.console = console;
        self
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn Prompt>) -> Self {
        self.prompt = prompt;
        self
    }

    /// Run the diagnostics and return the process exit code
    pub async fn execute(&self) -> Result<i32> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let span = info_span!("diagnostic_run", run_id = %run_id, quick = self.options.quick);

        match self.diagnose(&run_id).instrument(span).await {
            Ok(RunOutcome::Cancelled) => Ok(0),
            Ok(RunOutcome::Reported { exit_code, .. }) => Ok(exit_code),
            Err(e) => match e.downcast::<DoctorError>() {
                Ok(fatal) => {
                    warn!(error = %fatal, "diagnostic run aborted");
                    self.console.error_line(&format!("❌ {fatal}"));
                    self.console.error_line(&format!("👉 {}", fatal.next_action()));
                    Ok(fatal.exit_code())
                }
                Err(other) => Err(other),
            },
        }
    }

    fn notice(&self, message: &str) {
        if !self.options.quiet && !self.options.json {
            self.console.notice(message);
        }
    }

    pub(crate) async fn diagnose(&self, run_id: &str) -> Result<RunOutcome> {
        let settings = &self.settings;
        let deployment = DeploymentConfig::load(&settings.paths.deployment_config).map_err(DoctorError::from)?;
        let project = deployment.stack_name.clone();
        let mut run = DiagnosticRun::new().state_machine();

        self.notice("🔍 Collecting environment facts...");
        let detector = EnvironmentDetector::new(
            self.executor.clone(),
            self.network.clone(),
            settings.probes.clone(),
            &settings.paths.os_release,
        );
        let environment = detector.detect().await;
        run.handle(&RunEvent::EnvironmentCollected);

        let compose_file = &settings.paths.compose_file;
        let compose_present = tokio::fs::try_exists(compose_file).await.unwrap_or(false);
        let mut engine = ContainerEngine::new(self.executor.clone(), settings.probes.command_timeout())
            .with_flavor(environment.engine.compose);
        if compose_present {
            engine = engine.with_compose_file(compose_file);
        }

        if !compose_present {
            // Nothing to start, the compose-file check reports it
            info!(path = %compose_file.display(), "compose file missing, skipping liveness check");
            run.handle(&RunEvent::LivenessChecked { running: false });
        } else {
            let containers = engine
                .list_containers(&project)
                .await
                .map_err(|source| DoctorError::EngineUnavailable { source })?;
            let running = !containers.is_empty() && containers.iter().all(ContainerSummary::is_running);
            info!(project = %project, containers = containers.len(), running, "stack liveness checked");
            run.handle(&RunEvent::LivenessChecked { running });

            if !running {
                if self.options.non_interactive() {
                    run.handle(&RunEvent::Abort {
                        reason: "auto-start disabled".to_string(),
                    });
                    return Err(DoctorError::StackNotRunning { stack: project }.into());
                }

                run.handle(&RunEvent::OfferStart);
                let question = format!("Stack '{project}' is not running. Start it now?");
                if !self.prompt.confirm(&question, true) {
                    run.handle(&RunEvent::Abort {
                        reason: "cancelled".to_string(),
                    });
                    self.console.line("Diagnostics cancelled.");
                    return Ok(RunOutcome::Cancelled);
                }

                self.notice(&format!("🚀 Starting stack '{project}'..."));
                let lifecycle = ComposeLifecycle::new(engine.clone(), settings.probes.start_timeout());
                if let Err(source) = lifecycle.up(&project).await {
                    run.handle(&RunEvent::Abort {
                        reason: source.to_string(),
                    });
                    return Err(DoctorError::StartFailed { stack: project, source }.into());
                }
                run.handle(&RunEvent::StackStarted);
                self.notice(&format!(
                    "⏳ Waiting {}s for services to initialize...",
                    settings.startup_grace_secs
                ));
                tokio::time::sleep(Duration::from_secs(settings.startup_grace_secs)).await;
            }
        }

        run.handle(&RunEvent::ChecksStarted);
        let catalog = if self.options.quick {
            quick_catalog()
        } else {
            full_catalog()
        };
        let reporter: Arc<dyn Reporter> = Arc::new(self.console.clone());
        let ctx = CheckContext {
            settings: settings.clone(),
            deployment: deployment.clone(),
            environment: environment.clone(),
            engine,
            executor: self.executor.clone(),
            network: self.network.clone(),
            reporter,
        };
        self.notice(&format!("🩺 Running {} checks...", catalog.len()));
        let reports = run_catalog(&catalog, &ctx).await;

        let mut issues = IssueAggregator::new();
        let mut checks = Vec::with_capacity(reports.len());
        for report in reports {
            issues.extend(report.issues);
            checks.push(report.check);
        }
        if !self.options.quick {
            issues.extend(detector.assess(&environment, &deployment).await);
        }
        let fixes = RemediationAdvisor::for_issues(issues.all());

        let report = DiagnosticReport::new(
            run_id,
            project,
            deployment.strategy(),
            environment,
            checks,
            issues.into_vec(),
            fixes,
        );
        let rendered = ReportRenderer::new(self.options.report_mode()).render(&report)?;
        self.console.print(&rendered.text);
        run.handle(&RunEvent::Reported {
            exit_code: rendered.exit_code,
        });

        if self.options.fix {
            if self.options.json || self.options.quiet {
                warn!("fix phase skipped in non-interactive output mode");
                self.console
                    .error_line("⏭️  Fixes are not offered with --json or --quiet. Re-run with --fix alone to apply them.");
            } else {
                self.offer_fixes(&report.fixes).await;
            }
        }

        Ok(RunOutcome::Reported {
            report: Box::new(report),
            exit_code: rendered.exit_code,
        })
    }

    /// Offer each automatic fix for confirmed execution
    async fn offer_fixes(&self, fixes: &[Fix]) -> Vec<FixOutcome> {
        let automatic: Vec<&Fix> = fixes.iter().filter(|f| f.automatic).collect();
        if automatic.is_empty() {
            self.console.notice("No automatic fixes available.");
            return Vec::new();
        }

        let advisor = RemediationAdvisor::new(self.executor.clone(), self.settings.probes.fix_timeout());
        let mut outcomes = Vec::new();
        for fix in automatic {
            let question = format!("Apply fix '{}' ({})?", fix.name, fix.commands.join(" && "));
            if !self.prompt.confirm(&question, false) {
                self.console.notice(&format!("⏭️  Skipped: {}", fix.name));
                continue;
            }
            let outcome = advisor.apply(fix).await;
            match &outcome.failure {
                None => self.console.notice(&format!("✅ Applied: {}", fix.name)),
                Some(failure) => {
                    self.console.notice(&format!(
                        "❌ Fix '{}' failed at `{}` ({} of {} commands completed)",
                        fix.name,
                        failure.command,
                        outcome.completed.len(),
                        fix.commands.len()
                    ));
                    if !failure.stderr.is_empty() {
                        self.console.notice(&format!("   {}", failure.stderr));
                    }
                }
            }
            outcomes.push(outcome);
        }
        outcomes
    }
}
