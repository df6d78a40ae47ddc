//! Lease workload description consumed by the default builders.

use serde::{Deserialize, Serialize};

use crate::error::BuilderError;
use crate::object::{Protocol, ServiceType};

/// One workload group of a tenant manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestGroup {
    pub name: String,
    pub services: Vec<ManifestService>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestService {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    pub count: u32,
    pub resources: ServiceResources,
    #[serde(default)]
    pub expose: Vec<ServiceExpose>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceResources {
    pub cpu_millis: u64,
    pub memory_bytes: u64,
    #[serde(default)]
    pub storage: Vec<StorageVolume>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageVolume {
    pub name: String,
    pub bytes: u64,
    /// Persistent volumes turn the service into a stateful workload.
    #[serde(default)]
    pub persistent: bool,
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub mount: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceExpose {
    pub port: u16,
    #[serde(default)]
    pub external_port: Option<u16>,
    #[serde(default)]
    pub proto: Protocol,
    /// Reachable from outside the cluster.
    #[serde(default)]
    pub global: bool,
    #[serde(default)]
    pub hosts: Vec<String>,
}

impl ManifestService {
    pub fn is_stateful(&self) -> bool {
        self.resources.storage.iter().any(|s| s.persistent)
    }

    /// Environment entries as `KEY=value` pairs.
    pub fn env_pairs(&self) -> Result<Vec<(String, String)>, BuilderError> {
        self.env
            .iter()
            .map(|entry| {
                entry
                    .split_once('=')
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .ok_or_else(|| {
                        BuilderError::invalid(
                            format!("service {} env", self.name),
                            format!("'{entry}' is not KEY=value"),
                        )
                    })
            })
            .collect()
    }
}

/// Cluster-wide settings for the default builders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub deployment_service_type: ServiceType,
    pub deployment_ingress_domain: String,
    pub deployment_ingress_static_hosts: bool,
    /// Namespace holding manifest records.
    pub manifest_namespace: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            deployment_service_type: ServiceType::ClusterIP,
            deployment_ingress_domain: String::new(),
            deployment_ingress_static_hosts: false,
            manifest_namespace: "lease".to_string(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), BuilderError> {
        if self.deployment_ingress_static_hosts && self.deployment_ingress_domain.is_empty() {
            return Err(BuilderError::invalid(
                "deployment_ingress_domain",
                "required when static hosts are enabled",
            ));
        }
        if !is_dns_label(&self.manifest_namespace) {
            return Err(BuilderError::invalid(
                "manifest_namespace",
                format!("'{}' is not a DNS-1123 label", self.manifest_namespace),
            ));
        }
        Ok(())
    }
}

/// Lowercase alphanumerics and `-`, starting and ending alphanumeric, at
/// most 63 characters.
pub fn is_dns_label(s: &str) -> bool {
    let valid_char = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    !s.is_empty()
        && s.len() <= 63
        && s.chars().all(|c| valid_char(c) || c == '-')
        && s.starts_with(valid_char)
        && s.ends_with(valid_char)
}
