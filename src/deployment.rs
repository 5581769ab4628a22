//! Deployment configuration artifact
//!
//! `config.json` is written and maintained by the setup wizard. The
//! diagnostics only read it: they never write it back.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error("Deployment configuration not found at {path}")]
    Missing { path: PathBuf },
    #[error("Could not read deployment configuration {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Deployment configuration {path} is malformed: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// How TLS is terminated for the stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SslStrategy {
    #[default]
    #[serde(rename = "self-signed")]
    SelfSigned,
    #[serde(rename = "letsencrypt")]
    LetsEncrypt,
    #[serde(rename = "manual")]
    Manual,
    /// TLS delegated to an external reverse proxy, the application is served over HTTP
    #[serde(rename = "none", alias = "reverse-proxy")]
    None,
}

impl SslStrategy {
    /// Whether the stack runs its own reverse proxy container
    pub fn uses_bundled_proxy(self) -> bool {
        !matches!(self, SslStrategy::None)
    }

    pub fn describe(self) -> &'static str {
        match self {
            SslStrategy::SelfSigned => "Self-signed certificate",
            SslStrategy::LetsEncrypt => "Let's Encrypt certificate",
            SslStrategy::Manual => "Manual certificate",
            SslStrategy::None => "External proxy",
        }
    }
}

impl fmt::Display for SslStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SslStrategy::SelfSigned => "self-signed",
            SslStrategy::LetsEncrypt => "letsencrypt",
            SslStrategy::Manual => "manual",
            SslStrategy::None => "none",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SslConfig {
    #[serde(default)]
    pub strategy: SslStrategy,
}

/// An additional relational database deployed as a data source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInstance {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
}

impl DatabaseInstance {
    pub fn display_kind(&self) -> String {
        match self.kind.as_str() {
            "postgres" => "PostgreSQL".to_string(),
            "mysql" => "MySQL".to_string(),
            "mariadb" => "MariaDB".to_string(),
            other => {
                let mut chars = other.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => "Database".to_string(),
                }
            }
        }
    }
}

/// A compute worker container profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeProfile {
    pub name: String,
    pub image: String,
    #[serde(default = "default_tag")]
    pub tag: String,
}

fn default_tag() -> String {
    "latest".to_string()
}

fn default_stack_name() -> String {
    "easy-opal".to_string()
}

fn default_https_port() -> u16 {
    443
}

fn default_http_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    #[serde(default = "default_stack_name")]
    pub stack_name: String,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub ssl: SslConfig,
    #[serde(default = "default_https_port", alias = "opal_external_port")]
    pub external_https_port: u16,
    #[serde(default = "default_http_port", alias = "opal_http_port")]
    pub local_http_port: u16,
    #[serde(default)]
    pub databases: Vec<DatabaseInstance>,
    #[serde(default)]
    pub profiles: Vec<ComputeProfile>,
}

/// A port the stack publishes on the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExposedPort {
    pub port: u16,
    pub label: String,
}

impl DeploymentConfig {
    pub fn load(path: &Path) -> Result<Self, DeploymentError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DeploymentError::Missing {
                    path: path.to_path_buf(),
                })
            }
            Err(source) => {
                return Err(DeploymentError::Unreadable {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&content).map_err(|source| DeploymentError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn strategy(&self) -> SslStrategy {
        self.ssl.strategy
    }

    /// Declared hostnames, falling back to localhost when none are declared
    pub fn hosts_or_localhost(&self) -> Vec<String> {
        if self.hosts.is_empty() {
            vec!["localhost".to_string()]
        } else {
            self.hosts.clone()
        }
    }

    /// The port the application is reached on from outside the stack
    pub fn primary_port(&self) -> u16 {
        match self.strategy() {
            SslStrategy::None => self.local_http_port,
            _ => self.external_https_port,
        }
    }

    /// Every port published on the host, derived from the configuration only
    pub fn exposed_ports(&self) -> Vec<ExposedPort> {
        let mut ports = Vec::new();
        match self.strategy() {
            SslStrategy::None => ports.push(ExposedPort {
                port: self.local_http_port,
                label: format!("Application HTTP (external proxy mode, port {})", self.local_http_port),
            }),
            strategy => {
                ports.push(ExposedPort {
                    port: self.external_https_port,
                    label: format!("Application HTTPS (via proxy, port {})", self.external_https_port),
                });
                if strategy == SslStrategy::LetsEncrypt {
                    ports.push(ExposedPort {
                        port: 80,
                        label: "HTTP port 80 (ACME HTTP-01 challenges)".to_string(),
                    });
                }
            }
        }
        for db in &self.databases {
            ports.push(ExposedPort {
                port: db.port,
                label: format!("{} database \"{}\" (port {})", db.display_kind(), db.name, db.port),
            });
        }
        ports
    }

    /// Base URLs the application is served on, one per declared host
    pub fn base_urls(&self) -> Vec<String> {
        let port = self.primary_port();
        self.hosts_or_localhost()
            .iter()
            .map(|host| match self.strategy() {
                SslStrategy::None => format!("http://{host}:{port}"),
                _ if port == 443 => format!("https://{host}"),
                _ => format!("https://{host}:{port}"),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(json: &str) -> DeploymentConfig {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_accepts_collaborator_key_names() {
        let config = parse(
            r#"{
                "stack_name": "lab",
                "hosts": ["lab.example.org"],
                "opal_external_port": 8443,
                "opal_http_port": 9090,
                "ssl": {"strategy": "letsencrypt"},
                "profiles": [{"name": "rock", "image": "datashield/rock-base"}]
            }"#,
        );
        assert_eq!(config.external_https_port, 8443);
        assert_eq!(config.local_http_port, 9090);
        assert_eq!(config.strategy(), SslStrategy::LetsEncrypt);
        assert_eq!(config.profiles[0].tag, "latest");
    }

    #[test]
    fn test_reverse_proxy_is_an_alias_of_none() {
        let config = parse(r#"{"ssl": {"strategy": "reverse-proxy"}}"#);
        assert_eq!(config.strategy(), SslStrategy::None);
        assert!(!config.strategy().uses_bundled_proxy());
    }

    #[test]
    fn test_exposed_ports_follow_strategy_and_databases() {
        let config = parse(
            r#"{
                "ssl": {"strategy": "letsencrypt"},
                "opal_external_port": 443,
                "databases": [{"type": "postgres", "name": "pg1", "port": 5432, "user": "opal"}]
            }"#,
        );
        let ports: Vec<u16> = config.exposed_ports().iter().map(|p| p.port).collect();
        assert_eq!(ports, vec![443, 80, 5432]);
        assert!(config.exposed_ports()[2].label.contains("PostgreSQL"));

        let http_only = parse(r#"{"ssl": {"strategy": "none"}, "opal_http_port": 8081}"#);
        let ports: Vec<u16> = http_only.exposed_ports().iter().map(|p| p.port).collect();
        assert_eq!(ports, vec![8081]);
    }

    #[test]
    fn test_base_urls() {
        let https = parse(r#"{"hosts": ["a.test", "b.test"], "opal_external_port": 443}"#);
        assert_eq!(https.base_urls(), vec!["https://a.test", "https://b.test"]);

        let custom = parse(r#"{"hosts": ["a.test"], "opal_external_port": 8443}"#);
        assert_eq!(custom.base_urls(), vec!["https://a.test:8443"]);

        let http = parse(r#"{"ssl": {"strategy": "none"}}"#);
        assert_eq!(http.base_urls(), vec!["http://localhost:8080"]);
    }

    #[test]
    fn test_load_reports_missing_and_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("config.json");
        assert!(matches!(
            DeploymentConfig::load(&missing),
            Err(DeploymentError::Missing { .. })
        ));

        let mut file = std::fs::File::create(&missing).unwrap();
        file.write_all(b"{ not json").unwrap();
        assert!(matches!(
            DeploymentConfig::load(&missing),
            Err(DeploymentError::Malformed { .. })
        ));
    }
}
