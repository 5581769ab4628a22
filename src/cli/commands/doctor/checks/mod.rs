//! The diagnostic catalog
//!
//! Checks run sequentially in a fixed order. A check that returns an error is
//! converted into a failed check at this boundary and the catalog moves on.

pub mod certificates;
pub mod connectivity;
pub mod endpoints;
pub mod firewall;
pub mod infrastructure;
pub mod ports;
pub mod waf;

use super::console::Reporter;
use super::environment::EnvironmentSnapshot;
use super::retry::{RetryPolicy, RetryScheduler};
use super::types::{Check, CheckName, CheckReport, ContainerRecord, ContainerRole};
use crate::config::{ChainFailurePolicy, StackctlConfig};
use crate::deployment::{DeploymentConfig, SslStrategy};
use crate::external::{CommandExecutor, ContainerEngine, EngineError, NetworkProbe};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};

pub use certificates::SslCertificatesCheck;
pub use connectivity::ContainerConnectivityCheck;
pub use endpoints::ServiceEndpointsCheck;
pub use firewall::FirewallCheck;
pub use infrastructure::{ComposeFileCheck, ContainerStatusCheck, EngineConnectivityCheck};
pub use ports::ExternalPortsCheck;
pub use waf::WafDetectionCheck;

/// Everything a check may read while it runs
pub struct CheckContext {
    pub settings: StackctlConfig,
    pub deployment: DeploymentConfig,
    pub environment: EnvironmentSnapshot,
    pub engine: ContainerEngine,
    pub executor: Arc<dyn CommandExecutor>,
    pub network: Arc<dyn NetworkProbe>,
    pub reporter: Arc<dyn Reporter>,
}

impl CheckContext {
    pub fn project(&self) -> &str {
        &self.deployment.stack_name
    }

    pub fn strategy(&self) -> SslStrategy {
        self.deployment.strategy()
    }

    pub fn chain_failure_policy(&self) -> ChainFailurePolicy {
        self.settings.policy.chain_verification_failure
    }

    pub fn retry(&self) -> RetryScheduler<'_> {
        RetryScheduler::new(RetryPolicy::from(&self.settings.retry), self.reporter.as_ref())
    }

    /// Derive a container's role from its compose service name
    pub fn role_of(&self, service: &str) -> ContainerRole {
        let services = &self.settings.services;
        if service.starts_with(&services.database) || self.deployment.databases.iter().any(|db| db.name == service) {
            ContainerRole::Database
        } else if service.starts_with(&services.application) {
            ContainerRole::Application
        } else if service.starts_with(&services.proxy) {
            ContainerRole::Proxy
        } else if service.starts_with(&services.certificate_manager) {
            ContainerRole::CertificateManager
        } else if service.starts_with(&services.worker_prefix)
            || self.deployment.profiles.iter().any(|p| p.name == service)
        {
            ContainerRole::ComputeWorker
        } else {
            ContainerRole::Other
        }
    }

    /// The stack's containers tagged with their roles
    pub async fn containers(&self) -> Result<Vec<ContainerRecord>, EngineError> {
        let containers = self.engine.list_containers(self.project()).await?;
        Ok(containers
            .into_iter()
            .map(|c| ContainerRecord {
                role: self.role_of(&c.service),
                service: c.service,
                name: c.name,
                state: c.state,
                status: c.status,
            })
            .collect())
    }
}

/// One named unit of verification
#[async_trait]
pub trait DiagnosticCheck: Send + Sync {
    fn name(&self) -> CheckName;

    async fn run(&self, ctx: &CheckContext) -> anyhow::Result<CheckReport>;
}

/// All checks, in narrative order
pub fn full_catalog() -> Vec<Box<dyn DiagnosticCheck>> {
    vec![
        Box::new(ComposeFileCheck),
        Box::new(ContainerStatusCheck),
        Box::new(ContainerConnectivityCheck),
        Box::new(ExternalPortsCheck),
        Box::new(SslCertificatesCheck),
        Box::new(ServiceEndpointsCheck),
        Box::new(FirewallCheck),
        Box::new(WafDetectionCheck),
    ]
}

/// The reduced set run by `--quick`
pub fn quick_catalog() -> Vec<Box<dyn DiagnosticCheck>> {
    vec![
        Box::new(EngineConnectivityCheck),
        Box::new(ContainerStatusCheck),
        Box::new(ContainerConnectivityCheck),
    ]
}

pub async fn run_catalog(catalog: &[Box<dyn DiagnosticCheck>], ctx: &CheckContext) -> Vec<CheckReport> {
    let mut reports = Vec::with_capacity(catalog.len());
    for check in catalog {
        let name = check.name();
        let span = info_span!("check", check = name.id());
        let report = match check.run(ctx).instrument(span).await {
            Ok(report) => report,
            Err(e) => {
                warn!(check = name.id(), error = %e, "check aborted");
                CheckReport::new(Check::new(name).fail(format!("Check could not complete: {e:#}")))
            }
        };
        info!(check = name.id(), status = ?report.check.status, "check finished");
        reports.push(report);
    }
    reports
}
