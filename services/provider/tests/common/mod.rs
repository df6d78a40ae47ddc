//! Shared fixtures for provider integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bidplane_id::{Address, LeaseId};
use bidplane_provider::config::Config;
use bidplane_provider::dev::{DevSubsystems, FixedPricing};
use bidplane_provider::{
    Capacity, GroupSpec, Node, NodeInventory, PlatformClient, Price, ProviderError, ResourceUnit,
    Resources, Service,
};
use bidplane_reconcile::memory::MemoryCluster;
use bidplane_reconcile::{
    ManifestGroup, ManifestService, Protocol, ServiceExpose, ServiceResources,
};
use tokio::sync::watch;

pub const GIB: u64 = 1 << 30;

/// Upper bound for anything that should finish promptly.
pub const PROMPT: Duration = Duration::from_secs(2);

pub struct Harness {
    pub client: Arc<PlatformClient<MemoryCluster>>,
    pub factory: DevSubsystems,
    pub pricing: Arc<FixedPricing>,
    pub parent: watch::Sender<bool>,
    pub config: Config,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_factory(|f| f)
    }

    pub fn with_factory(customize: impl FnOnce(DevSubsystems) -> DevSubsystems) -> Self {
        let config = Config {
            cluster_public_hostname: "provider.example.com".into(),
            blocked_hostnames: vec!["blocked.example.com".into()],
            ..Config::default()
        };
        let inventory = NodeInventory::new(vec![
            Node::new("node-a", capacity(4_000)),
            Node::new("node-b", capacity(4_000)),
        ]);
        let client = Arc::new(PlatformClient::new(Arc::new(MemoryCluster::new()), inventory));
        let factory = customize(DevSubsystems::new(config.clone(), client.clone()));
        let (parent, _) = watch::channel(false);

        Self {
            client,
            factory,
            pricing: Arc::new(FixedPricing::new(Price::new(1_000, "uakt"))),
            parent,
            config,
        }
    }

    pub fn with_pricing(mut self, pricing: FixedPricing) -> Self {
        self.pricing = Arc::new(pricing);
        self
    }

    pub async fn start(&self) -> Result<Service, ProviderError> {
        Service::new(
            self.parent.subscribe(),
            &self.factory,
            self.client.clone(),
            self.pricing.clone(),
            self.config.clone(),
        )
        .await
    }

    pub fn api(&self) -> &MemoryCluster {
        self.client.api().as_ref()
    }
}

pub fn capacity(cpu_millis: u64) -> Capacity {
    Capacity {
        cpu_millis,
        memory_bytes: 16 * GIB,
        storage_bytes: 200 * GIB,
    }
}

pub fn owner() -> Address {
    Address::parse("akash1tenant").unwrap()
}

pub fn lease() -> LeaseId {
    LeaseId::parse("akash1tenant/7/1/1/akash1provider").unwrap()
}

pub fn gspec(cpu_millis: u64, count: u32) -> GroupSpec {
    GroupSpec {
        name: "westcoast".into(),
        requirements: Default::default(),
        resources: vec![ResourceUnit {
            resources: Resources {
                cpu_millis,
                memory_bytes: GIB,
                storage: vec![],
                endpoints: 1,
            },
            count,
            price: Price::new(500, "uakt"),
        }],
    }
}

pub fn manifest_group(hosts: &[&str]) -> ManifestGroup {
    ManifestGroup {
        name: "westcoast".into(),
        services: vec![ManifestService {
            name: "web".into(),
            image: "nginx:1.27".into(),
            command: vec![],
            args: vec![],
            env: vec![],
            count: 1,
            resources: ServiceResources {
                cpu_millis: 500,
                memory_bytes: 512 << 20,
                storage: vec![],
            },
            expose: vec![ServiceExpose {
                port: 80,
                external_port: None,
                proto: Protocol::Tcp,
                global: true,
                hosts: hosts.iter().map(|h| h.to_string()).collect(),
            }],
        }],
    }
}
