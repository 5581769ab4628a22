//! Host environment detection
//!
//! Collects facts once per run: OS identity, cloud provider, security
//! systems, container engine and network configuration. Every sub-detection
//! is independent. A missing tool, a permission error or a timeout leaves
//! that fact as [`NOT_AVAILABLE`] (or absent) and collection continues.

use super::types::{Issue, IssueCategory, Severity, Solution};
use crate::config::ProbeConfig;
use crate::deployment::DeploymentConfig;
use crate::external::docker::parse_version_code;
use crate::external::{CommandExecutor, ComposeFlavor, ContainerEngine, HttpRequest, NetworkProbe, OutputMode};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const NOT_AVAILABLE: &str = "Not available";

/// Engine release below which an upgrade is recommended
pub const MIN_RECOMMENDED_ENGINE: u32 = 2010;
/// First engine release with the `docker image` management commands
pub const IMAGE_SUBCOMMANDS_SINCE: u32 = 113;
/// Free space below which the engine data volume is flagged on AWS
pub const MIN_ENGINE_VOLUME_GIB: u64 = 20;

const AWS_METADATA: &str = "http://169.254.169.254/latest/meta-data";
const GCP_INSTANCE_ID: &str = "http://metadata.google.internal/computeMetadata/v1/instance/id";
const AZURE_VM_ID: &str = "http://169.254.169.254/metadata/instance/compute/vmId?api-version=2017-08-01&format=text";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    Aws,
    Gcp,
    Azure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloudInfo {
    pub provider: CloudProvider,
    pub instance_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub security_groups: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityState {
    pub selinux: String,
    pub apparmor: String,
    pub ufw: String,
    pub firewalld: String,
}

impl Default for SecurityState {
    fn default() -> Self {
        Self {
            selinux: NOT_AVAILABLE.to_string(),
            apparmor: NOT_AVAILABLE.to_string(),
            ufw: NOT_AVAILABLE.to_string(),
            firewalld: NOT_AVAILABLE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineInfo {
    pub version: Option<String>,
    /// `major * 100 + minor`
    pub version_code: Option<u32>,
    pub storage_driver: Option<String>,
    pub root_dir: Option<String>,
    pub compose: Option<ComposeFlavor>,
    pub image_subcommands: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NetworkInfo {
    pub interfaces: Option<String>,
    pub routes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Facts gathered once per run, read-only afterwards
#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentSnapshot {
    pub os: BTreeMap<String, String>,
    pub hostname: Option<String>,
    pub cloud: Option<CloudInfo>,
    pub security: SecurityState,
    pub engine: EngineInfo,
    pub network: NetworkInfo,
}

impl Default for EnvironmentSnapshot {
    fn default() -> Self {
        Self {
            os: unknown_os(),
            hostname: None,
            cloud: None,
            security: SecurityState::default(),
            engine: EngineInfo::default(),
            network: NetworkInfo::default(),
        }
    }
}

impl EnvironmentSnapshot {
    pub fn os_id(&self) -> &str {
        self.os.get("ID").map(String::as_str).unwrap_or("unknown")
    }

    pub fn os_name(&self) -> &str {
        self.os.get("PRETTY_NAME").map(String::as_str).unwrap_or("unknown")
    }

    pub fn is_aws(&self) -> bool {
        matches!(&self.cloud, Some(cloud) if cloud.provider == CloudProvider::Aws)
    }

    pub fn ufw_active(&self) -> bool {
        self.security.ufw.to_lowercase().contains("status: active")
    }

    pub fn selinux_enforcing(&self) -> bool {
        self.security.selinux.eq_ignore_ascii_case("enforcing")
    }
}

fn unknown_os() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("ID".to_string(), "unknown".to_string()),
        ("VERSION_ID".to_string(), "unknown".to_string()),
        (
            "PRETTY_NAME".to_string(),
            format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
        ),
    ])
}

/// Parse `KEY=value` lines of an os-release file
pub fn parse_os_release(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .filter_map(|line| line.trim().split_once('='))
        .map(|(key, value)| (key.to_string(), value.trim_matches('"').to_string()))
        .collect()
}

/// Parse the available space, in GiB, from `df -BG --output=avail`
pub fn parse_df_available_gib(output: &str) -> Option<u64> {
    output
        .lines()
        .skip(1)
        .find_map(|line| line.trim().trim_end_matches('G').parse().ok())
}

pub struct EnvironmentDetector {
    executor: Arc<dyn CommandExecutor>,
    network: Arc<dyn NetworkProbe>,
    probes: ProbeConfig,
    os_release: PathBuf,
}

impl EnvironmentDetector {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        network: Arc<dyn NetworkProbe>,
        probes: ProbeConfig,
        os_release: impl AsRef<Path>,
    ) -> Self {
        Self {
            executor,
            network,
            probes,
            os_release: os_release.as_ref().to_path_buf(),
        }
    }

    pub async fn detect(&self) -> EnvironmentSnapshot {
        info!("Detecting host environment");
        let snapshot = EnvironmentSnapshot {
            os: self.detect_os().await,
            hostname: hostname::get().ok().map(|h| h.to_string_lossy().into_owned()),
            cloud: self.detect_cloud().await,
            security: self.detect_security().await,
            engine: self.detect_engine().await,
            network: self.detect_network().await,
        };
        debug!(
            os = snapshot.os_id(),
            cloud = ?snapshot.cloud.as_ref().map(|c| c.provider),
            engine = ?snapshot.engine.version_code,
            compose = ?snapshot.engine.compose,
            "environment detected"
        );
        snapshot
    }

    async fn detect_os(&self) -> BTreeMap<String, String> {
        match tokio::fs::read_to_string(&self.os_release).await {
            Ok(content) => {
                let mut os = parse_os_release(&content);
                for (key, value) in unknown_os() {
                    os.entry(key).or_insert(value);
                }
                os
            }
            Err(e) => {
                debug!(path = %self.os_release.display(), error = %e, "os-release not readable");
                unknown_os()
            }
        }
    }

    async fn metadata(&self, url: &str, header: Option<(&str, &str)>) -> Option<String> {
        let mut request = HttpRequest::get(url, self.probes.metadata_timeout());
        if let Some((name, value)) = header {
            request = request.header(name, value);
        }
        match self.network.http_get(&request).await {
            Ok(response) if response.status == 200 && !response.body.trim().is_empty() => {
                Some(response.body.trim().to_string())
            }
            Ok(response) => {
                debug!(url, status = response.status, "metadata endpoint answered without data");
                None
            }
            Err(e) => {
                debug!(url, error = %e, "metadata endpoint unreachable");
                None
            }
        }
    }

    /// Probe AWS, GCP then Azure. The first provider to answer wins.
    async fn detect_cloud(&self) -> Option<CloudInfo> {
        if let Some(instance_id) = self.metadata(&format!("{AWS_METADATA}/instance-id"), None).await {
            let security_groups = self
                .metadata(&format!("{AWS_METADATA}/security-groups"), None)
                .await
                .map(|groups| groups.lines().map(str::to_string).collect())
                .unwrap_or_default();
            return Some(CloudInfo {
                provider: CloudProvider::Aws,
                instance_id,
                availability_zone: self
                    .metadata(&format!("{AWS_METADATA}/placement/availability-zone"), None)
                    .await,
                security_groups,
                instance_type: self.metadata(&format!("{AWS_METADATA}/instance-type"), None).await,
            });
        }

        if let Some(instance_id) = self.metadata(GCP_INSTANCE_ID, Some(("Metadata-Flavor", "Google"))).await {
            return Some(CloudInfo {
                provider: CloudProvider::Gcp,
                instance_id,
                availability_zone: None,
                security_groups: Vec::new(),
                instance_type: None,
            });
        }

        self.metadata(AZURE_VM_ID, Some(("Metadata", "true")))
            .await
            .map(|instance_id| CloudInfo {
                provider: CloudProvider::Azure,
                instance_id,
                availability_zone: None,
                security_groups: Vec::new(),
                instance_type: None,
            })
    }

    /// Trimmed stdout of a successful command, or [`NOT_AVAILABLE`]
    async fn tool_output(&self, argv: &[&str]) -> String {
        let output = self
            .executor
            .run(argv, self.probes.detection_timeout(), OutputMode::Text)
            .await;
        if output.success() {
            output.stdout.trim().to_string()
        } else {
            debug!(command = argv.join(" "), reason = %output.failure_reason(), "security tool unavailable");
            NOT_AVAILABLE.to_string()
        }
    }

    async fn detect_security(&self) -> SecurityState {
        let selinux = if std::env::consts::OS == "linux" {
            self.tool_output(&["getenforce"]).await
        } else {
            NOT_AVAILABLE.to_string()
        };
        let apparmor = match self.tool_output(&["aa-status", "--enabled"]).await.as_str() {
            NOT_AVAILABLE => NOT_AVAILABLE.to_string(),
            _ => "enabled".to_string(),
        };
        SecurityState {
            selinux,
            apparmor,
            ufw: self.tool_output(&["ufw", "status"]).await,
            firewalld: self.tool_output(&["firewall-cmd", "--state"]).await,
        }
    }

    async fn detect_engine(&self) -> EngineInfo {
        let timeout = self.probes.detection_timeout();
        let mut engine = EngineInfo::default();

        let version = self.executor.run(&["docker", "--version"], timeout, OutputMode::Text).await;
        if !version.success() {
            engine.error = Some(version.failure_reason());
            return engine;
        }
        let version_text = version.stdout.trim().to_string();
        engine.version_code = parse_version_code(&version_text);
        engine.image_subcommands = engine.version_code.is_some_and(|code| code >= IMAGE_SUBCOMMANDS_SINCE);
        engine.version = Some(version_text);

        let info = self
            .executor
            .run(&["docker", "info", "--format", "{{json .}}"], timeout, OutputMode::Text)
            .await;
        if info.success() {
            match serde_json::from_str::<serde_json::Value>(info.stdout.trim()) {
                Ok(value) => {
                    engine.storage_driver = value["Driver"].as_str().map(str::to_string);
                    engine.root_dir = value["DockerRootDir"].as_str().map(str::to_string);
                    engine.info = Some(value);
                }
                Err(e) => engine.error = Some(format!("unparseable engine info: {e}")),
            }
        } else {
            engine.error = Some(info.failure_reason());
        }

        engine.compose = ContainerEngine::new(self.executor.clone(), timeout)
            .detect_compose(engine.version_code)
            .await;
        engine
    }

    async fn detect_network(&self) -> NetworkInfo {
        let timeout = self.probes.detection_timeout();
        let addr = self.executor.run(&["ip", "addr", "show"], timeout, OutputMode::Text).await;
        if addr.success() {
            let routes = self.executor.run(&["ip", "route"], timeout, OutputMode::Text).await;
            return NetworkInfo {
                interfaces: Some(addr.stdout),
                routes: routes.success().then_some(routes.stdout),
                error: None,
            };
        }

        let ifconfig = self.executor.run(&["ifconfig"], timeout, OutputMode::Text).await;
        if ifconfig.success() {
            NetworkInfo {
                interfaces: Some(ifconfig.stdout),
                routes: None,
                error: None,
            }
        } else {
            NetworkInfo {
                interfaces: None,
                routes: None,
                error: Some("Cannot detect network configuration".to_string()),
            }
        }
    }

    /// Environment-derived issues, independent of any check
    pub async fn assess(&self, snapshot: &EnvironmentSnapshot, deployment: &DeploymentConfig) -> Vec<Issue> {
        let mut issues = Vec::new();

        if let Some(cloud) = snapshot.cloud.as_ref().filter(|c| c.provider == CloudProvider::Aws) {
            issues.extend(self.assess_aws(cloud, snapshot, deployment).await);
        }

        if snapshot.selinux_enforcing() {
            issues.push(Issue::new(
                IssueCategory::Selinux,
                Severity::High,
                "Configure SELinux for containers",
                "SELinux is enforcing and may block container networking and volume access",
                Solution::commands([
                    "sudo setsebool -P container_manage_cgroup on",
                    "sudo setsebool -P container_connect_any on",
                    "sudo setsebool -P container_use_cephfs on",
                ]),
            ));
        }

        if snapshot.ufw_active() {
            issues.push(Issue::new(
                IssueCategory::Firewall,
                Severity::High,
                "Allow container traffic through UFW",
                "UFW is active and can drop traffic between containers and the host",
                Solution::commands([
                    "sudo ufw allow from 172.16.0.0/12",
                    "sudo ufw allow in on docker0",
                    "sudo ufw allow out on docker0",
                ]),
            ));
        }

        if let (Some(code), Some(version)) = (snapshot.engine.version_code, &snapshot.engine.version) {
            if code < MIN_RECOMMENDED_ENGINE {
                issues.push(Issue::new(
                    IssueCategory::Docker,
                    Severity::Medium,
                    "Upgrade the container engine",
                    format!("Current engine ({version}) is older than the recommended 20.10"),
                    Solution::text(
                        "Update the engine with your package manager (e.g. `sudo apt-get install docker-ce`), then restart it",
                    ),
                ));
            }
        }

        if snapshot.engine.storage_driver.as_deref() == Some("devicemapper") {
            issues.push(Issue::new(
                IssueCategory::Docker,
                Severity::Low,
                "Consider changing the storage driver",
                "devicemapper is not recommended for production",
                Solution::text(
                    "Stop the engine, set \"storage-driver\": \"overlay2\" in /etc/docker/daemon.json, back up and recreate containers",
                ),
            ));
        }

        issues
    }

    async fn assess_aws(
        &self,
        cloud: &CloudInfo,
        snapshot: &EnvironmentSnapshot,
        deployment: &DeploymentConfig,
    ) -> Vec<Issue> {
        let ports = deployment
            .exposed_ports()
            .iter()
            .map(|p| p.port.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let groups = if cloud.security_groups.is_empty() {
            "the instance's security group".to_string()
        } else {
            cloud.security_groups.join(", ")
        };

        let mut issues = vec![
            Issue::new(
                IssueCategory::AwsSecurityGroups,
                Severity::High,
                "Configure AWS security groups",
                format!("Inbound rules of {groups} must allow the stack's ports ({ports})"),
                Solution::text(format!(
                    "AWS Console → EC2 → Security Groups: add inbound rules for ports {ports} from your client range"
                )),
            ),
            Issue::new(
                IssueCategory::AwsNacl,
                Severity::Medium,
                "Check network ACLs",
                format!("The subnet's network ACL must allow inbound {ports} and outbound response traffic"),
                Solution::text("AWS Console → VPC → Network ACLs: review inbound and outbound rules of the instance subnet"),
            ),
        ];

        let root = snapshot.engine.root_dir.as_deref().unwrap_or("/");
        let df = self
            .executor
            .run(&["df", "-BG", "--output=avail", root], self.probes.detection_timeout(), OutputMode::Text)
            .await;
        match df.success().then(|| parse_df_available_gib(&df.stdout)).flatten() {
            Some(available) if available < MIN_ENGINE_VOLUME_GIB => issues.push(Issue::new(
                IssueCategory::AwsVolumes,
                Severity::Medium,
                "Engine data volume is low on space",
                format!("{root} has {available} GiB free, at least {MIN_ENGINE_VOLUME_GIB} GiB is recommended"),
                Solution::text("Grow the EBS volume in the AWS Console, then extend the filesystem (growpart, resize2fs/xfs_growfs)"),
            )),
            Some(_) => {}
            None => debug!(root, reason = %df.failure_reason(), "free space of engine volume unknown"),
        }

        issues
    }
}
