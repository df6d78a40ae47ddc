//! Idempotent appliers.
//!
//! Every kind follows the same protocol:
//!
//! 1. Get the current object by `(namespace, name)`.
//! 2. Found: ask the builder for the updated object and submit an update.
//! 3. Not found: ask the builder for a fresh object and submit a create.
//! 4. Any other get error is returned as is. Nothing here retries; the
//!    caller's reconciliation loop owns retry policy.
//!
//! Network policies are applied as an ordered list, one member at a time,
//! stopping at the first failure. Members already written stay written.
//!
//! Callers must serialize applies that target the same object. No
//! compare-and-swap is performed beyond what the remote API enforces.

use tracing::debug;

use crate::api::ResourceApi;
use crate::context::ApplyContext;
use crate::error::{ApplyError, BuilderError};
use crate::metrics::{record_call, Outcome, Verb};
use crate::object::{
    Deployment, Manifest, Namespace, NetworkPolicy, Resource, Service, StatefulSet,
};

/// Translates domain intent into one platform object.
///
/// Implementations must be deterministic and free of side effects; all
/// remote I/O happens in the applier.
pub trait Builder: Send + Sync {
    type Object: Resource;

    fn name(&self) -> &str;

    fn ns(&self) -> &str;

    /// The object to create when none exists.
    fn create(&self) -> Result<Self::Object, BuilderError>;

    /// The object to write over `current`.
    fn update(&self, current: Self::Object) -> Result<Self::Object, BuilderError>;
}

/// Translates domain intent into an ordered list of network policies.
pub trait NetworkPolicyBuilder: Send + Sync {
    fn ns(&self) -> &str;

    /// Every policy the namespace should carry, in apply order.
    fn create(&self) -> Result<Vec<NetworkPolicy>, BuilderError>;

    /// The policy to write over `current`, given the member of the desired
    /// list with the same name.
    fn update(
        &self,
        current: NetworkPolicy,
        desired: &NetworkPolicy,
    ) -> Result<NetworkPolicy, BuilderError>;
}

/// Get-or-create-or-update of a single object.
///
/// Returns the object as stored by the remote API.
pub async fn apply<B>(
    ctx: &ApplyContext,
    api: &dyn ResourceApi<B::Object>,
    builder: &B,
) -> Result<B::Object, ApplyError>
where
    B: Builder + ?Sized,
{
    apply_object(
        ctx,
        api,
        builder.ns(),
        builder.name(),
        || builder.create(),
        |current| builder.update(current),
    )
    .await
}

async fn apply_object<O, C, U>(
    ctx: &ApplyContext,
    api: &dyn ResourceApi<O>,
    namespace: &str,
    name: &str,
    create: C,
    update: U,
) -> Result<O, ApplyError>
where
    O: Resource,
    C: FnOnce() -> Result<O, BuilderError>,
    U: FnOnce(O) -> Result<O, BuilderError>,
{
    let kind = O::KIND;
    let builder_err = |source| ApplyError::Builder {
        kind,
        name: name.to_string(),
        source,
    };

    // Calls skipped by an expired context are not counted.
    ctx.check()?;
    let current = ctx.call(api.get(namespace, name)).await;
    record_call(kind, Verb::Get, Outcome::of_get(&current));

    match current {
        Ok(current) => {
            debug!(%kind, namespace, name, "updating");
            let obj = update(current).map_err(builder_err)?;
            ctx.check()?;
            let res = ctx.call(api.update(obj)).await;
            record_call(kind, Verb::Update, Outcome::of_write(&res));
            res
        }
        Err(e) if e.is_not_found() => {
            debug!(%kind, namespace, name, "creating");
            let obj = create().map_err(builder_err)?;
            ctx.check()?;
            let res = ctx.call(api.create(obj)).await;
            record_call(kind, Verb::Create, Outcome::of_write(&res));
            res
        }
        Err(e) => Err(e),
    }
}

pub async fn apply_namespace<B>(
    ctx: &ApplyContext,
    api: &dyn ResourceApi<Namespace>,
    builder: &B,
) -> Result<Namespace, ApplyError>
where
    B: Builder<Object = Namespace> + ?Sized,
{
    apply(ctx, api, builder).await
}

/// Applies every policy of the builder's list in order.
///
/// On failure at member `k` the first `k` members (zero based) have been
/// written and the rest untouched; the error is
/// [`ApplyError::PartialApply`] naming member `k`. Nothing is rolled back,
/// re-applying converges.
pub async fn apply_network_policies<B>(
    ctx: &ApplyContext,
    api: &dyn ResourceApi<NetworkPolicy>,
    builder: &B,
) -> Result<Vec<NetworkPolicy>, ApplyError>
where
    B: NetworkPolicyBuilder + ?Sized,
{
    let policies = builder.create().map_err(|source| ApplyError::Builder {
        kind: NetworkPolicy::KIND,
        name: builder.ns().to_string(),
        source,
    })?;

    let mut applied = Vec::with_capacity(policies.len());
    for (index, desired) in policies.iter().enumerate() {
        let res = apply_object(
            ctx,
            api,
            builder.ns(),
            &desired.meta.name,
            || Ok(desired.clone()),
            |current| builder.update(current, desired),
        )
        .await;

        match res {
            Ok(obj) => applied.push(obj),
            Err(source) => {
                return Err(ApplyError::PartialApply {
                    index,
                    name: desired.meta.name.clone(),
                    applied: applied.len(),
                    source: Box::new(source),
                })
            }
        }
    }

    Ok(applied)
}

pub async fn apply_deployment<B>(
    ctx: &ApplyContext,
    api: &dyn ResourceApi<Deployment>,
    builder: &B,
) -> Result<Deployment, ApplyError>
where
    B: Builder<Object = Deployment> + ?Sized,
{
    apply(ctx, api, builder).await
}

pub async fn apply_stateful_set<B>(
    ctx: &ApplyContext,
    api: &dyn ResourceApi<StatefulSet>,
    builder: &B,
) -> Result<StatefulSet, ApplyError>
where
    B: Builder<Object = StatefulSet> + ?Sized,
{
    apply(ctx, api, builder).await
}

pub async fn apply_service<B>(
    ctx: &ApplyContext,
    api: &dyn ResourceApi<Service>,
    builder: &B,
) -> Result<Service, ApplyError>
where
    B: Builder<Object = Service> + ?Sized,
{
    apply(ctx, api, builder).await
}

/// Applies the manifest record.
///
/// An existing record is always rewritten, even when the builder produces an
/// identical object.
pub async fn apply_manifest<B>(
    ctx: &ApplyContext,
    api: &dyn ResourceApi<Manifest>,
    builder: &B,
) -> Result<Manifest, ApplyError>
where
    B: Builder<Object = Manifest> + ?Sized,
{
    apply(ctx, api, builder).await
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use rstest::rstest;
    use tokio::sync::watch;

    use super::*;
    use crate::error::ApiError;
    use crate::memory::{MemoryCluster, MemoryStore};
    use crate::object::{ManifestSpec, NetworkPolicySpec, ObjectMeta, ServiceType, WorkloadSpec};

    /// Builder that stamps a generation label so updates are observable.
    struct Stamp<O> {
        ns: String,
        name: String,
        make: fn(ObjectMeta) -> O,
        fail: Option<BuilderError>,
    }

    impl<O: Resource> Stamp<O> {
        fn new(ns: &str, name: &str, make: fn(ObjectMeta) -> O) -> Self {
            Self {
                ns: ns.to_string(),
                name: name.to_string(),
                make,
                fail: None,
            }
        }
    }

    impl<O: Resource> Builder for Stamp<O> {
        type Object = O;

        fn name(&self) -> &str {
            &self.name
        }

        fn ns(&self) -> &str {
            &self.ns
        }

        fn create(&self) -> Result<O, BuilderError> {
            if let Some(e) = &self.fail {
                return Err(e.clone());
            }
            let ns = if O::NAMESPACED { self.ns.as_str() } else { "" };
            Ok((self.make)(ObjectMeta::new(ns, &self.name)))
        }

        fn update(&self, mut current: O) -> Result<O, BuilderError> {
            if let Some(e) = &self.fail {
                return Err(e.clone());
            }
            current
                .meta_mut()
                .labels
                .insert("generation".into(), "updated".into());
            Ok(current)
        }
    }

    fn namespace(meta: ObjectMeta) -> Namespace {
        Namespace { meta }
    }

    fn deployment(meta: ObjectMeta) -> Deployment {
        Deployment {
            meta,
            spec: WorkloadSpec::default(),
        }
    }

    fn stateful_set(meta: ObjectMeta) -> StatefulSet {
        StatefulSet {
            meta,
            spec: WorkloadSpec::default(),
            volume_claims: vec![],
        }
    }

    fn service(meta: ObjectMeta) -> Service {
        Service {
            meta,
            service_type: ServiceType::ClusterIP,
            selector: BTreeMap::new(),
            ports: vec![],
        }
    }

    fn manifest(meta: ObjectMeta) -> Manifest {
        Manifest {
            meta,
            spec: ManifestSpec {
                lease_id: "akash1owner/1/1/1/akash1provider".into(),
                group: serde_json::json!({"name": "web"}),
            },
        }
    }

    /// Create on first apply, get+update on the second, for one kind.
    async fn create_then_update<O: Resource>(store: &MemoryStore<O>, make: fn(ObjectMeta) -> O) {
        let ctx = ApplyContext::background();
        let builder = Stamp::new("lease-ns", "web", make);

        let created = apply(&ctx, store, &builder).await.unwrap();
        assert_eq!(created.meta().name, "web");
        assert_eq!(store.count(Verb::Get).await, 1);
        assert_eq!(store.count(Verb::Create).await, 1);
        assert_eq!(store.count(Verb::Update).await, 0);

        store.reset_calls().await;
        let updated = apply(&ctx, store, &builder).await.unwrap();
        assert_eq!(updated.meta().labels["generation"], "updated");
        assert_eq!(store.count(Verb::Get).await, 1);
        assert_eq!(store.count(Verb::Create).await, 0);
        assert_eq!(store.count(Verb::Update).await, 1);
    }

    /// A non-not-found get error stops the apply before any write.
    async fn get_error_stops<O: Resource>(store: &MemoryStore<O>, make: fn(ObjectMeta) -> O) {
        let ctx = ApplyContext::background();
        let builder = Stamp::new("lease-ns", "web", make);
        let injected = ApiError::Status {
            code: 500,
            message: "etcd unavailable".into(),
        };
        store.fail_next(Verb::Get, None, injected.clone()).await;

        let err = apply(&ctx, store, &builder).await.unwrap_err();
        assert_eq!(err.api_error(), Some(&injected));
        assert_eq!(store.count(Verb::Create).await, 0);
        assert_eq!(store.count(Verb::Update).await, 0);
    }

    #[tokio::test]
    async fn test_every_kind_creates_then_updates() {
        let cluster = MemoryCluster::new();
        create_then_update(&cluster.namespaces, namespace).await;
        create_then_update(&cluster.deployments, deployment).await;
        create_then_update(&cluster.stateful_sets, stateful_set).await;
        create_then_update(&cluster.services, service).await;
        create_then_update(&cluster.manifests, manifest).await;
    }

    #[tokio::test]
    async fn test_every_kind_returns_get_error() {
        let cluster = MemoryCluster::new();
        get_error_stops(&cluster.namespaces, namespace).await;
        get_error_stops(&cluster.deployments, deployment).await;
        get_error_stops(&cluster.stateful_sets, stateful_set).await;
        get_error_stops(&cluster.services, service).await;
        get_error_stops(&cluster.manifests, manifest).await;
    }

    #[tokio::test]
    async fn test_namespace_lease_scenario() {
        let cluster = MemoryCluster::new();
        let ctx = ApplyContext::background();
        let builder = Stamp::new("lease-123", "lease-123", namespace);

        let ns = apply_namespace(&ctx, &cluster.namespaces, &builder)
            .await
            .unwrap();
        assert_eq!(ns.meta.name, "lease-123");
        assert_eq!(cluster.namespaces.count(Verb::Create).await, 1);

        cluster.namespaces.reset_calls().await;
        apply_namespace(&ctx, &cluster.namespaces, &builder)
            .await
            .unwrap();
        assert_eq!(cluster.namespaces.count(Verb::Get).await, 1);
        assert_eq!(cluster.namespaces.count(Verb::Update).await, 1);
        assert_eq!(cluster.namespaces.count(Verb::Create).await, 0);
    }

    #[tokio::test]
    async fn test_manifest_update_is_unconditional() {
        let cluster = MemoryCluster::new();
        let ctx = ApplyContext::background();

        struct Same;
        impl Builder for Same {
            type Object = Manifest;
            fn name(&self) -> &str {
                "m"
            }
            fn ns(&self) -> &str {
                "lease"
            }
            fn create(&self) -> Result<Manifest, BuilderError> {
                Ok(manifest(ObjectMeta::new("lease", "m")))
            }
            fn update(&self, current: Manifest) -> Result<Manifest, BuilderError> {
                Ok(current)
            }
        }

        apply_manifest(&ctx, &cluster.manifests, &Same).await.unwrap();
        apply_manifest(&ctx, &cluster.manifests, &Same).await.unwrap();
        apply_manifest(&ctx, &cluster.manifests, &Same).await.unwrap();
        assert_eq!(cluster.manifests.count(Verb::Update).await, 2);
    }

    #[rstest]
    #[case::on_create(false)]
    #[case::on_update(true)]
    #[tokio::test]
    async fn test_builder_error_is_fatal(#[case] existing: bool) {
        let cluster = MemoryCluster::new();
        let ctx = ApplyContext::background();
        if existing {
            cluster
                .deployments
                .seed(deployment(ObjectMeta::new("lease-ns", "web")))
                .await;
        }

        let mut builder = Stamp::new("lease-ns", "web", deployment);
        builder.fail = Some(BuilderError::invalid("image", "empty"));

        let err = apply_deployment(&ctx, &cluster.deployments, &builder)
            .await
            .unwrap_err();
        assert!(matches!(err, ApplyError::Builder { .. }));
        assert_eq!(cluster.deployments.count(Verb::Create).await, 0);
        assert_eq!(cluster.deployments.count(Verb::Update).await, 0);
    }

    #[tokio::test]
    async fn test_cancel_aborts_apply() {
        let cluster = MemoryCluster::new();
        cluster.services.set_latency(Duration::from_secs(30));
        let (tx, rx) = watch::channel(false);
        let ctx = ApplyContext::new(rx);
        let builder = Stamp::new("lease-ns", "web", service);

        let apply = apply_service(&ctx, &cluster.services, &builder);
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            tx.send(true).unwrap();
        };
        let (res, _) = tokio::join!(apply, cancel);

        assert!(matches!(res, Err(ApplyError::Cancelled)));
        assert_eq!(cluster.services.count(Verb::Create).await, 0);
    }

    // -------------------------------------------------------------------------
    // Network policies
    // -------------------------------------------------------------------------

    struct Policies {
        names: Vec<&'static str>,
    }

    impl NetworkPolicyBuilder for Policies {
        fn ns(&self) -> &str {
            "lease-ns"
        }

        fn create(&self) -> Result<Vec<NetworkPolicy>, BuilderError> {
            Ok(self
                .names
                .iter()
                .map(|n| NetworkPolicy {
                    meta: ObjectMeta::new("lease-ns", *n),
                    spec: NetworkPolicySpec::default(),
                })
                .collect())
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

    #[tokio::test]
    async fn test_network_policies_apply_in_order() {
        let cluster = MemoryCluster::new();
        let ctx = ApplyContext::background();
        let builder = Policies {
            names: vec!["deny-all", "allow-ns", "allow-egress"],
        };

        let applied = apply_network_policies(&ctx, &cluster.network_policies, &builder)
            .await
            .unwrap();
        assert_eq!(applied.len(), 3);
        let order: Vec<_> = cluster
            .network_policies
            .calls()
            .await
            .into_iter()
            .filter(|c| c.verb == Verb::Create)
            .map(|c| c.name)
            .collect();
        assert_eq!(order, vec!["deny-all", "allow-ns", "allow-egress"]);

        cluster.network_policies.reset_calls().await;
        apply_network_policies(&ctx, &cluster.network_policies, &builder)
            .await
            .unwrap();
        assert_eq!(cluster.network_policies.count(Verb::Update).await, 3);
        assert_eq!(cluster.network_policies.count(Verb::Create).await, 0);
    }

    #[rstest]
    #[case::first(0)]
    #[case::middle(2)]
    #[case::last(4)]
    #[tokio::test]
    async fn test_network_policies_stop_at_failure(#[case] failing: usize) {
        let names = vec!["p0", "p1", "p2", "p3", "p4"];
        let cluster = MemoryCluster::new();
        let ctx = ApplyContext::background();
        cluster
            .network_policies
            .fail_next(
                Verb::Create,
                Some(names[failing]),
                ApiError::Status {
                    code: 422,
                    message: "invalid".into(),
                },
            )
            .await;

        let builder = Policies {
            names: names.clone(),
        };
        let err = apply_network_policies(&ctx, &cluster.network_policies, &builder)
            .await
            .unwrap_err();

        match err {
            ApplyError::PartialApply {
                index,
                name,
                applied,
                ..
            } => {
                assert_eq!(index, failing);
                assert_eq!(name, names[failing]);
                assert_eq!(applied, failing);
            }
            other => panic!("unexpected error: {other}"),
        }

        for (i, name) in names.iter().enumerate() {
            let stored = cluster.network_policies.object("lease-ns", name).await;
            assert_eq!(stored.is_some(), i < failing, "member {i}");
            if i > failing {
                assert_eq!(cluster.network_policies.count_for(name).await, 0);
            }
        }
    }

    #[tokio::test]
    async fn test_network_policies_converge_on_reapply() {
        let cluster = MemoryCluster::new();
        let ctx = ApplyContext::background();
        let builder = Policies {
            names: vec!["p0", "p1", "p2"],
        };
        cluster
            .network_policies
            .fail_next(Verb::Get, Some("p1"), ApiError::Transport("reset".into()))
            .await;

        assert!(apply_network_policies(&ctx, &cluster.network_policies, &builder)
            .await
            .is_err());
        assert_eq!(cluster.network_policies.len().await, 1);

        apply_network_policies(&ctx, &cluster.network_policies, &builder)
            .await
            .unwrap();
        assert_eq!(cluster.network_policies.len().await, 3);
    }
}
