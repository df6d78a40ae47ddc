//! Default builders for lease workloads.
//!
//! Each builder is constructed from a lease ID, the manifest group (or one of
//! its services) and the cluster [`Settings`]. All objects carry the standard
//! label set so that the provider can find what it owns.

use std::collections::BTreeMap;

use bidplane_id::LeaseId;

use crate::apply::{Builder, NetworkPolicyBuilder};
use crate::error::BuilderError;
use crate::object::{
    Container, Deployment, Manifest, ManifestSpec, Namespace, NetworkPolicy, NetworkPolicySpec,
    ObjectMeta, PolicyRule, PolicyType, ResourceLimits, Service, ServicePort, StatefulSet,
    VolumeClaim, VolumeMount, WorkloadSpec,
};
use crate::workload::{is_dns_label, ManifestGroup, ManifestService, Settings};

pub const LABEL_MANAGED: &str = "bidplane.io";
pub const LABEL_LEASE_NAMESPACE: &str = "bidplane.io/lease.namespace";
pub const LABEL_LEASE_OWNER: &str = "bidplane.io/lease.id.owner";
pub const LABEL_LEASE_DSEQ: &str = "bidplane.io/lease.id.dseq";
pub const LABEL_LEASE_GSEQ: &str = "bidplane.io/lease.id.gseq";
pub const LABEL_LEASE_OSEQ: &str = "bidplane.io/lease.id.oseq";
pub const LABEL_LEASE_PROVIDER: &str = "bidplane.io/lease.id.provider";
pub const LABEL_SERVICE: &str = "bidplane.io/manifest-service";

/// Labels identifying the lease that owns an object.
pub fn lease_labels(lid: &LeaseId) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_MANAGED.to_string(), "true".to_string()),
        (LABEL_LEASE_NAMESPACE.to_string(), lid.namespace()),
        (LABEL_LEASE_OWNER.to_string(), lid.owner.to_string()),
        (LABEL_LEASE_DSEQ.to_string(), lid.dseq.to_string()),
        (LABEL_LEASE_GSEQ.to_string(), lid.gseq.to_string()),
        (LABEL_LEASE_OSEQ.to_string(), lid.oseq.to_string()),
        (LABEL_LEASE_PROVIDER.to_string(), lid.provider.to_string()),
    ])
}

/// Ours win over whatever is on the current object; foreign labels survive.
fn merge_labels(current: &mut BTreeMap<String, String>, desired: &BTreeMap<String, String>) {
    for (k, v) in desired {
        current.insert(k.clone(), v.clone());
    }
}

// =============================================================================
// Namespace
// =============================================================================

pub struct NamespaceBuilder {
    ns: String,
    labels: BTreeMap<String, String>,
}

impl NamespaceBuilder {
    pub fn new(lid: &LeaseId) -> Self {
        Self {
            ns: lid.namespace(),
            labels: lease_labels(lid),
        }
    }
}

impl Builder for NamespaceBuilder {
    type Object = Namespace;

    fn name(&self) -> &str {
        &self.ns
    }

    fn ns(&self) -> &str {
        &self.ns
    }

    fn create(&self) -> Result<Namespace, BuilderError> {
        Ok(Namespace {
            meta: ObjectMeta::new("", &self.ns).with_labels(self.labels.clone()),
        })
    }

    fn update(&self, mut current: Namespace) -> Result<Namespace, BuilderError> {
        merge_labels(&mut current.meta.labels, &self.labels);
        Ok(current)
    }
}

// =============================================================================
// Network Policies
// =============================================================================

pub const POLICY_DENY_ALL: &str = "bidplane-deny-all";
pub const POLICY_ALLOW_NAMESPACE: &str = "bidplane-allow-namespace";
pub const POLICY_ALLOW_EGRESS: &str = "bidplane-allow-internet-egress";

/// Private ranges a lease must not reach.
const PRIVATE_RANGES: [&str; 3] = ["10.0.0.0/8", "172.16.0.0/12", "192.168.0.0/16"];

/// Isolates a lease namespace: deny everything, then allow traffic within the
/// namespace, egress to the internet and ingress to globally exposed ports.
pub struct NetPolBuilder {
    ns: String,
    labels: BTreeMap<String, String>,
    group: ManifestGroup,
}

impl NetPolBuilder {
    pub fn new(lid: &LeaseId, group: &ManifestGroup) -> Self {
        Self {
            ns: lid.namespace(),
            labels: lease_labels(lid),
            group: group.clone(),
        }
    }

    fn policy(&self, name: &str, spec: NetworkPolicySpec) -> NetworkPolicy {
        NetworkPolicy {
            meta: ObjectMeta::new(&self.ns, name).with_labels(self.labels.clone()),
            spec,
        }
    }
}

impl NetworkPolicyBuilder for NetPolBuilder {
    fn ns(&self) -> &str {
        &self.ns
    }

    fn create(&self) -> Result<Vec<NetworkPolicy>, BuilderError> {
        let same_namespace = PolicyRule {
            namespace_selector: BTreeMap::from([(
                LABEL_LEASE_NAMESPACE.to_string(),
                self.ns.clone(),
            )]),
            ..Default::default()
        };

        let mut policies = vec![
            self.policy(
                POLICY_DENY_ALL,
                NetworkPolicySpec {
                    policy_types: vec![PolicyType::Ingress, PolicyType::Egress],
                    ..Default::default()
                },
            ),
            self.policy(
                POLICY_ALLOW_NAMESPACE,
                NetworkPolicySpec {
                    policy_types: vec![PolicyType::Ingress, PolicyType::Egress],
                    ingress: vec![same_namespace.clone()],
                    egress: vec![same_namespace],
                    ..Default::default()
                },
            ),
            self.policy(
                POLICY_ALLOW_EGRESS,
                NetworkPolicySpec {
                    policy_types: vec![PolicyType::Egress],
                    egress: vec![PolicyRule {
                        cidr: Some("0.0.0.0/0".to_string()),
                        except: PRIVATE_RANGES.iter().map(|r| r.to_string()).collect(),
                        ..Default::default()
                    }],
                    ..Default::default()
                },
            ),
        ];

        for svc in &self.group.services {
            let ports: Vec<u16> = svc
                .expose
                .iter()
                .filter(|e| e.global)
                .map(|e| e.port)
                .collect();
            if ports.is_empty() {
                continue;
            }

            policies.push(self.policy(
                &format!("bidplane-ingress-{}", svc.name),
                NetworkPolicySpec {
                    pod_selector: BTreeMap::from([(LABEL_SERVICE.to_string(), svc.name.clone())]),
                    policy_types: vec![PolicyType::Ingress],
                    ingress: vec![PolicyRule {
                        cidr: Some("0.0.0.0/0".to_string()),
                        ports,
                        ..Default::default()
                    }],
                    ..Default::default()
                },
            ));
        }

        Ok(policies)
    }

    fn update(
        &self,
        current: NetworkPolicy,
        desired: &NetworkPolicy,
    ) -> Result<NetworkPolicy, BuilderError> {
        let mut obj = desired.clone();
        obj.meta.resource_version = current.meta.resource_version;
        Ok(obj)
    }
}

// =============================================================================
// Workloads
// =============================================================================

/// Shared by the deployment and stateful set builders.
struct WorkloadBase {
    ns: String,
    labels: BTreeMap<String, String>,
    service: ManifestService,
}

impl WorkloadBase {
    fn new(lid: &LeaseId, service: &ManifestService) -> Self {
        let mut labels = lease_labels(lid);
        labels.insert(LABEL_SERVICE.to_string(), service.name.clone());
        Self {
            ns: lid.namespace(),
            labels,
            service: service.clone(),
        }
    }

    fn validate(&self) -> Result<(), BuilderError> {
        let svc = &self.service;
        if !is_dns_label(&svc.name) {
            return Err(BuilderError::invalid(
                "service name",
                format!("'{}' is not a DNS-1123 label", svc.name),
            ));
        }
        if svc.image.is_empty() {
            return Err(BuilderError::invalid(
                format!("service {} image", svc.name),
                "empty",
            ));
        }
        if svc.resources.cpu_millis == 0 || svc.resources.memory_bytes == 0 {
            return Err(BuilderError::invalid(
                format!("service {} resources", svc.name),
                "cpu and memory must be non-zero",
            ));
        }
        Ok(())
    }

    fn selector(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_LEASE_NAMESPACE.to_string(), self.ns.clone()),
            (LABEL_SERVICE.to_string(), self.service.name.clone()),
        ])
    }

    fn spec(&self) -> Result<WorkloadSpec, BuilderError> {
        self.validate()?;
        let svc = &self.service;

        let volume_mounts = svc
            .resources
            .storage
            .iter()
            .filter(|s| s.persistent)
            .map(|s| VolumeMount {
                name: s.name.clone(),
                mount_path: s.mount.clone().unwrap_or_else(|| format!("/{}", s.name)),
            })
            .collect();

        Ok(WorkloadSpec {
            replicas: svc.count,
            selector: self.selector(),
            container: Container {
                name: svc.name.clone(),
                image: svc.image.clone(),
                command: svc.command.clone(),
                args: svc.args.clone(),
                env: svc.env_pairs()?.into_iter().collect(),
                resources: ResourceLimits {
                    cpu_millis: svc.resources.cpu_millis,
                    memory_bytes: svc.resources.memory_bytes,
                },
                ports: svc.expose.iter().map(|e| e.port).collect(),
                volume_mounts,
            },
        })
    }

    fn meta(&self) -> ObjectMeta {
        ObjectMeta::new(&self.ns, &self.service.name).with_labels(self.labels.clone())
    }
}

pub struct DeploymentBuilder(WorkloadBase);

impl DeploymentBuilder {
    pub fn new(lid: &LeaseId, service: &ManifestService) -> Self {
        Self(WorkloadBase::new(lid, service))
    }
}

impl Builder for DeploymentBuilder {
    type Object = Deployment;

    fn name(&self) -> &str {
        &self.0.service.name
    }

    fn ns(&self) -> &str {
        &self.0.ns
    }

    fn create(&self) -> Result<Deployment, BuilderError> {
        Ok(Deployment {
            meta: self.0.meta(),
            spec: self.0.spec()?,
        })
    }

    fn update(&self, mut current: Deployment) -> Result<Deployment, BuilderError> {
        current.spec = self.0.spec()?;
        merge_labels(&mut current.meta.labels, &self.0.labels);
        Ok(current)
    }
}

pub struct StatefulSetBuilder(WorkloadBase);

impl StatefulSetBuilder {
    pub fn new(lid: &LeaseId, service: &ManifestService) -> Self {
        Self(WorkloadBase::new(lid, service))
    }

    fn claims(&self) -> Vec<VolumeClaim> {
        self.0
            .service
            .resources
            .storage
            .iter()
            .filter(|s| s.persistent)
            .map(|s| VolumeClaim {
                name: s.name.clone(),
                storage_bytes: s.bytes,
                storage_class: s.class.clone(),
            })
            .collect()
    }
}

impl Builder for StatefulSetBuilder {
    type Object = StatefulSet;

    fn name(&self) -> &str {
        &self.0.service.name
    }

    fn ns(&self) -> &str {
        &self.0.ns
    }

    fn create(&self) -> Result<StatefulSet, BuilderError> {
        Ok(StatefulSet {
            meta: self.0.meta(),
            spec: self.0.spec()?,
            volume_claims: self.claims(),
        })
    }

    fn update(&self, mut current: StatefulSet) -> Result<StatefulSet, BuilderError> {
        // Volume claim templates cannot change once the set exists.
        current.spec = self.0.spec()?;
        merge_labels(&mut current.meta.labels, &self.0.labels);
        Ok(current)
    }
}

// =============================================================================
// Service
// =============================================================================

pub struct ServiceBuilder {
    base: WorkloadBase,
    settings: Settings,
}

impl ServiceBuilder {
    /// `None` when the service exposes no ports.
    pub fn new(lid: &LeaseId, service: &ManifestService, settings: &Settings) -> Option<Self> {
        if service.expose.is_empty() {
            return None;
        }
        Some(Self {
            base: WorkloadBase::new(lid, service),
            settings: settings.clone(),
        })
    }

    fn ports(&self) -> Vec<ServicePort> {
        self.base
            .service
            .expose
            .iter()
            .map(|e| ServicePort {
                name: format!("{}-{}", e.port, e.proto.as_str()),
                port: e.external_port.unwrap_or(e.port),
                target_port: e.port,
                protocol: e.proto,
            })
            .collect()
    }
}

impl Builder for ServiceBuilder {
    type Object = Service;

    fn name(&self) -> &str {
        &self.base.service.name
    }

    fn ns(&self) -> &str {
        &self.base.ns
    }

    fn create(&self) -> Result<Service, BuilderError> {
        self.base.validate()?;
        Ok(Service {
            meta: self.base.meta(),
            service_type: self.settings.deployment_service_type,
            selector: self.base.selector(),
            ports: self.ports(),
        })
    }

    fn update(&self, mut current: Service) -> Result<Service, BuilderError> {
        self.base.validate()?;
        current.service_type = self.settings.deployment_service_type;
        current.selector = self.base.selector();
        current.ports = self.ports();
        merge_labels(&mut current.meta.labels, &self.base.labels);
        Ok(current)
    }
}

// =============================================================================
// Manifest Record
// =============================================================================

pub struct ManifestBuilder {
    ns: String,
    name: String,
    lease_id: String,
    labels: BTreeMap<String, String>,
    group: ManifestGroup,
}

impl ManifestBuilder {
    pub fn new(lid: &LeaseId, group: &ManifestGroup, settings: &Settings) -> Self {
        Self {
            ns: settings.manifest_namespace.clone(),
            name: lid.namespace(),
            lease_id: lid.to_string(),
            labels: lease_labels(lid),
            group: group.clone(),
        }
    }

    fn spec(&self) -> Result<ManifestSpec, BuilderError> {
        let group =
            serde_json::to_value(&self.group).map_err(|e| BuilderError::Encode(e.to_string()))?;
        Ok(ManifestSpec {
            lease_id: self.lease_id.clone(),
            group,
        })
    }
}

impl Builder for ManifestBuilder {
    type Object = Manifest;

    fn name(&self) -> &str {
        &self.name
    }

    fn ns(&self) -> &str {
        &self.ns
    }

    fn create(&self) -> Result<Manifest, BuilderError> {
        Ok(Manifest {
            meta: ObjectMeta::new(&self.ns, &self.name).with_labels(self.labels.clone()),
            spec: self.spec()?,
        })
    }

    fn update(&self, mut current: Manifest) -> Result<Manifest, BuilderError> {
        current.spec = self.spec()?;
        merge_labels(&mut current.meta.labels, &self.labels);
        Ok(current)
    }
}
