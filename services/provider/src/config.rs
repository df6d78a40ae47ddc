//! Configuration for the provider.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use bidplane_reconcile::{ServiceType, Settings};

use crate::inventory::CommitLevels;
use crate::types::Price;

/// Provider configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Hostname tenants use to reach leases on this cluster.
    pub cluster_public_hostname: String,

    /// How often the cluster refreshes its inventory.
    pub inventory_resource_poll_period: Duration,

    /// Log inventory every N polls; zero disables.
    pub inventory_resource_debug_frequency: u32,

    /// Overcommit ratios applied to node capacity.
    pub commit_levels: CommitLevels,

    /// Hostnames no lease may claim.
    pub blocked_hostnames: Vec<String>,

    pub deployment_ingress_static_hosts: bool,
    pub deployment_ingress_domain: String,

    /// Service type used for exposed lease ports.
    pub deployment_service_type: ServiceType,

    /// Namespace holding manifest records.
    pub manifest_namespace: String,

    pub bid_deposit: Price,
    pub bid_timeout: Duration,
    pub manifest_timeout: Duration,
    pub rpc_query_timeout: Duration,
    pub cached_result_max_age: Duration,
    pub balance_check_period: Duration,

    /// Attributes advertised for placement matching.
    pub attributes: BTreeMap<String, String>,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cluster_public_hostname: "localhost".to_string(),
            inventory_resource_poll_period: Duration::from_secs(5),
            inventory_resource_debug_frequency: 10,
            commit_levels: CommitLevels::default(),
            blocked_hostnames: Vec::new(),
            deployment_ingress_static_hosts: false,
            deployment_ingress_domain: String::new(),
            deployment_service_type: ServiceType::NodePort,
            manifest_namespace: "lease".to_string(),
            bid_deposit: Price::new(5_000_000, "uakt"),
            bid_timeout: Duration::from_secs(5 * 60),
            manifest_timeout: Duration::from_secs(5 * 60),
            rpc_query_timeout: Duration::from_secs(60),
            cached_result_max_age: Duration::from_secs(5),
            balance_check_period: Duration::from_secs(10 * 60),
            attributes: BTreeMap::new(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup. Unset keys take their
    /// defaults; set keys that fail to parse are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let env = Env(&lookup);

        let bid_deposit = match env.get("PROVIDER_BID_DEPOSIT") {
            Some(s) => Price::parse(&s)
                .ok_or_else(|| anyhow!("PROVIDER_BID_DEPOSIT: invalid price {s:?}"))?,
            None => defaults.bid_deposit,
        };

        let deployment_service_type = match env.get("PROVIDER_DEPLOYMENT_SERVICE_TYPE").as_deref() {
            None => defaults.deployment_service_type,
            Some("cluster_ip") => ServiceType::ClusterIP,
            Some("node_port") => ServiceType::NodePort,
            Some("load_balancer") => ServiceType::LoadBalancer,
            Some(other) => {
                return Err(anyhow!(
                    "PROVIDER_DEPLOYMENT_SERVICE_TYPE: unknown service type {other:?}"
                ))
            }
        };

        let config = Self {
            cluster_public_hostname: env
                .get("PROVIDER_CLUSTER_PUBLIC_HOSTNAME")
                .unwrap_or(defaults.cluster_public_hostname),
            inventory_resource_poll_period: env.secs(
                "PROVIDER_INVENTORY_POLL_PERIOD_SECS",
                defaults.inventory_resource_poll_period,
            )?,
            inventory_resource_debug_frequency: env.parse(
                "PROVIDER_INVENTORY_DEBUG_FREQUENCY",
                defaults.inventory_resource_debug_frequency,
            )?,
            commit_levels: CommitLevels {
                cpu: env.ratio("PROVIDER_CPU_COMMIT_LEVEL", defaults.commit_levels.cpu)?,
                memory: env.ratio("PROVIDER_MEMORY_COMMIT_LEVEL", defaults.commit_levels.memory)?,
                storage: env.ratio(
                    "PROVIDER_STORAGE_COMMIT_LEVEL",
                    defaults.commit_levels.storage,
                )?,
            },
            blocked_hostnames: env
                .get("PROVIDER_BLOCKED_HOSTNAMES")
                .map(|s| split_list(&s))
                .unwrap_or(defaults.blocked_hostnames),
            deployment_ingress_static_hosts: env.parse(
                "PROVIDER_DEPLOYMENT_INGRESS_STATIC_HOSTS",
                defaults.deployment_ingress_static_hosts,
            )?,
            deployment_ingress_domain: env
                .get("PROVIDER_DEPLOYMENT_INGRESS_DOMAIN")
                .unwrap_or(defaults.deployment_ingress_domain),
            deployment_service_type,
            manifest_namespace: env
                .get("PROVIDER_MANIFEST_NAMESPACE")
                .unwrap_or(defaults.manifest_namespace),
            bid_deposit,
            bid_timeout: env.secs("PROVIDER_BID_TIMEOUT_SECS", defaults.bid_timeout)?,
            manifest_timeout: env.secs("PROVIDER_MANIFEST_TIMEOUT_SECS", defaults.manifest_timeout)?,
            rpc_query_timeout: env.secs(
                "PROVIDER_RPC_QUERY_TIMEOUT_SECS",
                defaults.rpc_query_timeout,
            )?,
            cached_result_max_age: env.secs(
                "PROVIDER_CACHED_RESULT_MAX_AGE_SECS",
                defaults.cached_result_max_age,
            )?,
            balance_check_period: env.secs(
                "PROVIDER_BALANCE_CHECK_PERIOD_SECS",
                defaults.balance_check_period,
            )?,
            attributes: match env.get("PROVIDER_ATTRIBUTES") {
                Some(s) => parse_attributes(&s)?,
                None => defaults.attributes,
            },
            log_level: env
                .get("PROVIDER_LOG_LEVEL")
                .unwrap_or(defaults.log_level),
        };

        config.deployment_settings().validate()?;
        Ok(config)
    }

    /// Settings handed to the lease workload builders.
    pub fn deployment_settings(&self) -> Settings {
        Settings {
            deployment_service_type: self.deployment_service_type,
            deployment_ingress_domain: self.deployment_ingress_domain.clone(),
            deployment_ingress_static_hosts: self.deployment_ingress_static_hosts,
            manifest_namespace: self.manifest_namespace.clone(),
        }
    }
}

struct Env<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: std::str::FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.get(key) {
            Some(s) => s.parse().with_context(|| format!("{key}: invalid value {s:?}")),
            None => Ok(default),
        }
    }

    /// A finite, strictly positive ratio.
    fn ratio(&self, key: &str, default: f64) -> Result<f64> {
        let value: f64 = self.parse(key, default)?;
        if !value.is_finite() || value <= 0.0 {
            return Err(anyhow!("{key}: must be a finite positive ratio, got {value}"));
        }
        Ok(value)
    }

    fn secs(&self, key: &str, default: Duration) -> Result<Duration> {
        self.parse(key, default.as_secs()).map(Duration::from_secs)
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses `key=value,key=value`.
fn parse_attributes(s: &str) -> Result<BTreeMap<String, String>> {
    split_list(s)
        .into_iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .ok_or_else(|| anyhow!("PROVIDER_ATTRIBUTES: expected key=value, got {pair:?}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rstest::rstest;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.cluster_public_hostname, "localhost");
        assert_eq!(config.bid_timeout, Duration::from_secs(300));
        assert_eq!(config.bid_deposit, Price::new(5_000_000, "uakt"));
        assert_eq!(config.manifest_namespace, "lease");
        assert_eq!(config.log_level, "info");
        assert!(config.blocked_hostnames.is_empty());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("PROVIDER_CLUSTER_PUBLIC_HOSTNAME", "provider.example.com"),
            ("PROVIDER_BID_TIMEOUT_SECS", "30"),
            ("PROVIDER_BID_DEPOSIT", "100uakt"),
            ("PROVIDER_BLOCKED_HOSTNAMES", "a.example.com, b.example.com,"),
            ("PROVIDER_CPU_COMMIT_LEVEL", "1.5"),
            ("PROVIDER_ATTRIBUTES", "region=us-west,tier=community"),
            ("PROVIDER_DEPLOYMENT_SERVICE_TYPE", "load_balancer"),
        ])
        .unwrap();

        assert_eq!(config.cluster_public_hostname, "provider.example.com");
        assert_eq!(config.bid_timeout, Duration::from_secs(30));
        assert_eq!(config.bid_deposit, Price::new(100, "uakt"));
        assert_eq!(config.blocked_hostnames, vec!["a.example.com", "b.example.com"]);
        assert_eq!(config.commit_levels.cpu, 1.5);
        assert_eq!(config.attributes["region"], "us-west");
        assert_eq!(config.deployment_service_type, ServiceType::LoadBalancer);
    }

    #[test]
    fn test_empty_value_uses_default() {
        let config = load(&[("PROVIDER_BID_TIMEOUT_SECS", "")]).unwrap();
        assert_eq!(config.bid_timeout, Duration::from_secs(300));
    }

    #[rstest]
    #[case::timeout("PROVIDER_BID_TIMEOUT_SECS", "soon")]
    #[case::deposit("PROVIDER_BID_DEPOSIT", "lots")]
    #[case::service_type("PROVIDER_DEPLOYMENT_SERVICE_TYPE", "mesh")]
    #[case::attributes("PROVIDER_ATTRIBUTES", "region")]
    #[case::static_hosts("PROVIDER_DEPLOYMENT_INGRESS_STATIC_HOSTS", "yes")]
    #[case::negative_commit_level("PROVIDER_CPU_COMMIT_LEVEL", "-1.5")]
    #[case::zero_commit_level("PROVIDER_MEMORY_COMMIT_LEVEL", "0")]
    #[case::nan_commit_level("PROVIDER_STORAGE_COMMIT_LEVEL", "NaN")]
    #[case::infinite_commit_level("PROVIDER_CPU_COMMIT_LEVEL", "inf")]
    fn test_invalid_values_rejected(#[case] key: &str, #[case] value: &str) {
        let err = load(&[(key, value)]).unwrap_err();
        assert!(err.to_string().contains(key), "{err}");
    }

    #[test]
    fn test_deployment_settings() {
        let config = load(&[("PROVIDER_MANIFEST_NAMESPACE", "manifests")]).unwrap();
        let settings = config.deployment_settings();
        assert_eq!(settings.manifest_namespace, "manifests");
        assert_eq!(settings.deployment_service_type, ServiceType::NodePort);
    }
}
