//! Lease deployment: applies every object of a lease in dependency order.

use bidplane_id::LeaseId;
use tracing::{debug, info, instrument};

use crate::api::OrchestrationApi;
use crate::apply::{
    apply_deployment, apply_manifest, apply_namespace, apply_network_policies, apply_service,
    apply_stateful_set, Builder, NetworkPolicyBuilder,
};
use crate::builder::{
    DeploymentBuilder, ManifestBuilder, NamespaceBuilder, NetPolBuilder, ServiceBuilder,
    StatefulSetBuilder,
};
use crate::context::ApplyContext;
use crate::error::{ApplyError, BuilderError};
use crate::object::{Deployment, Manifest, Namespace, Service, StatefulSet};
use crate::workload::{ManifestGroup, Settings};

/// The compute object backing one manifest service.
pub enum Workload {
    Deployment(Box<dyn Builder<Object = Deployment>>),
    StatefulSet(Box<dyn Builder<Object = StatefulSet>>),
}

pub struct ServiceWorkload {
    pub workload: Workload,
    /// Absent when the service exposes nothing.
    pub service: Option<Box<dyn Builder<Object = Service>>>,
}

/// Builders for every object of one lease.
pub struct LeaseWorkload {
    pub lease_id: LeaseId,
    pub namespace: Box<dyn Builder<Object = Namespace>>,
    pub network_policies: Box<dyn NetworkPolicyBuilder>,
    pub manifest: Box<dyn Builder<Object = Manifest>>,
    pub services: Vec<ServiceWorkload>,
}

impl LeaseWorkload {
    /// Default builders for a manifest group.
    pub fn new(
        lid: &LeaseId,
        group: &ManifestGroup,
        settings: &Settings,
    ) -> Result<Self, BuilderError> {
        settings.validate()?;

        let services = group
            .services
            .iter()
            .map(|svc| {
                let workload = if svc.is_stateful() {
                    Workload::StatefulSet(Box::new(StatefulSetBuilder::new(lid, svc)))
                } else {
                    Workload::Deployment(Box::new(DeploymentBuilder::new(lid, svc)))
                };
                ServiceWorkload {
                    workload,
                    service: ServiceBuilder::new(lid, svc, settings)
                        .map(|b| Box::new(b) as Box<dyn Builder<Object = Service>>),
                }
            })
            .collect();

        Ok(Self {
            lease_id: lid.clone(),
            namespace: Box::new(NamespaceBuilder::new(lid)),
            network_policies: Box::new(NetPolBuilder::new(lid, group)),
            manifest: Box::new(ManifestBuilder::new(lid, group, settings)),
            services,
        })
    }
}

/// Applies namespace, network policies, manifest record, then each service's
/// workload followed by its service object. Stops at the first failure;
/// objects already applied stay applied.
#[instrument(skip_all, fields(lease = %workload.lease_id))]
pub async fn deploy(
    ctx: &ApplyContext,
    api: &dyn OrchestrationApi,
    workload: &LeaseWorkload,
) -> Result<(), ApplyError> {
    apply_namespace(ctx, api.namespaces(), workload.namespace.as_ref()).await?;
    apply_network_policies(ctx, api.network_policies(), workload.network_policies.as_ref())
        .await?;
    apply_manifest(ctx, api.manifests(), workload.manifest.as_ref()).await?;

    for svc in &workload.services {
        match &svc.workload {
            Workload::Deployment(b) => {
                apply_deployment(ctx, api.deployments(), b.as_ref()).await?;
            }
            Workload::StatefulSet(b) => {
                apply_stateful_set(ctx, api.stateful_sets(), b.as_ref()).await?;
            }
        }

        if let Some(b) = &svc.service {
            apply_service(ctx, api.services(), b.as_ref()).await?;
        } else {
            debug!("service exposes no ports, skipping service object");
        }
    }

    info!(
        namespace = %workload.namespace.name(),
        services = workload.services.len(),
        "lease workload applied"
    );
    Ok(())
}
