//! Orchestration-platform object model.
//!
//! These are the in-memory mirrors of the six resource kinds the provider
//! writes for a lease. They exist only for the duration of an apply call; the
//! platform owns the durable copy.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The six resource kinds composing a lease workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Namespace,
    NetworkPolicy,
    Deployment,
    StatefulSet,
    Service,
    Manifest,
}

impl ResourceKind {
    /// Prefix used for the `operation` metric label (`{prefix}-{verb}`).
    pub fn metric_prefix(&self) -> &'static str {
        match self {
            Self::Namespace => "namespaces",
            Self::NetworkPolicy => "networking-policies",
            Self::Deployment => "deployments",
            Self::StatefulSet => "statefulsets",
            Self::Service => "services",
            Self::Manifest => "manifests",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Namespace => "namespace",
            Self::NetworkPolicy => "network policy",
            Self::Deployment => "deployment",
            Self::StatefulSet => "stateful set",
            Self::Service => "service",
            Self::Manifest => "manifest",
        };
        f.write_str(s)
    }
}

/// Metadata common to every object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,

    /// Empty for cluster-scoped kinds.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Assigned by the platform on every write; zero on objects that were
    /// never stored.
    #[serde(default)]
    pub resource_version: u64,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }
}

/// An object of one resource kind.
pub trait Resource: Clone + std::fmt::Debug + Send + Sync + 'static {
    const KIND: ResourceKind;

    /// Whether objects of this kind live inside a namespace.
    const NAMESPACED: bool = true;

    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;
}

macro_rules! resource {
    ($ty:ident, $kind:ident) => {
        resource!($ty, $kind, true);
    };
    ($ty:ident, $kind:ident, $namespaced:expr) => {
        impl Resource for $ty {
            const KIND: ResourceKind = ResourceKind::$kind;
            const NAMESPACED: bool = $namespaced;

            fn meta(&self) -> &ObjectMeta {
                &self.meta
            }

            fn meta_mut(&mut self) -> &mut ObjectMeta {
                &mut self.meta
            }
        }
    };
}

// =============================================================================
// Namespace
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub meta: ObjectMeta,
}

resource!(Namespace, Namespace, false);

// =============================================================================
// Network Policy
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum PolicyType {
    Ingress,
    Egress,
}

/// A single allow rule. Empty selectors and no CIDR match nothing; a rule
/// list that is empty denies all traffic in that direction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Peers selected by namespace labels.
    #[serde(default)]
    pub namespace_selector: BTreeMap<String, String>,

    /// Peers selected by address block.
    #[serde(default)]
    pub cidr: Option<String>,

    #[serde(default)]
    pub except: Vec<String>,

    #[serde(default)]
    pub ports: Vec<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPolicySpec {
    /// Pods the policy applies to; empty selects every pod in the namespace.
    pub pod_selector: BTreeMap<String, String>,
    pub policy_types: Vec<PolicyType>,
    pub ingress: Vec<PolicyRule>,
    pub egress: Vec<PolicyRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPolicy {
    pub meta: ObjectMeta,
    pub spec: NetworkPolicySpec,
}

resource!(NetworkPolicy, NetworkPolicy);

// =============================================================================
// Workloads
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub cpu_millis: u64,
    pub memory_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub resources: ResourceLimits,
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(default)]
    pub volume_mounts: Vec<VolumeMount>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    pub replicas: u32,
    pub selector: BTreeMap<String, String>,
    pub container: Container,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub meta: ObjectMeta,
    pub spec: WorkloadSpec,
}

resource!(Deployment, Deployment);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeClaim {
    pub name: String,
    pub storage_bytes: u64,
    #[serde(default)]
    pub storage_class: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatefulSet {
    pub meta: ObjectMeta,
    pub spec: WorkloadSpec,
    pub volume_claims: Vec<VolumeClaim>,
}

resource!(StatefulSet, StatefulSet);

// =============================================================================
// Service
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceType {
    #[default]
    ClusterIP,
    NodePort,
    LoadBalancer,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    pub name: String,
    pub port: u16,
    pub target_port: u16,
    pub protocol: Protocol,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub meta: ObjectMeta,
    pub service_type: ServiceType,
    pub selector: BTreeMap<String, String>,
    pub ports: Vec<ServicePort>,
}

resource!(Service, Service);

// =============================================================================
// Manifest Record
// =============================================================================

/// Provider-owned record of the manifest deployed for a lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSpec {
    pub lease_id: String,
    pub group: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub meta: ObjectMeta,
    pub spec: ManifestSpec,
}

resource!(Manifest, Manifest);
