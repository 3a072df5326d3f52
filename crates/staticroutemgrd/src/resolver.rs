//! Cluster service to gateway address resolution.

use std::collections::HashMap;
use std::io;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Errors raised while resolving a cluster service.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid service name '{service}'")]
    InvalidName { service: String },

    #[error("unknown service '{service}'")]
    UnknownService { service: String },

    #[error("lookup of {fqdn} failed: {source}")]
    Lookup {
        fqdn: String,
        #[source]
        source: io::Error,
    },

    #[error("{fqdn} resolved to no addresses")]
    NoAddress { fqdn: String },

    #[error("no gateway address was resolved for {service}")]
    Unresolved { service: String },
}

impl ResolveError {
    pub fn unknown(service: impl Into<String>) -> Self {
        Self::UnknownService {
            service: service.into(),
        }
    }

    /// DNS failures may clear up; a malformed or unknown name will not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ResolveError::Lookup { .. } | ResolveError::NoAddress { .. })
    }
}

/// Maps a cluster service name to a gateway address.
#[async_trait]
pub trait ServiceResolver: Send + Sync {
    async fn resolve(&self, service: &str) -> Result<String, ResolveError>;
}

/// Resolves services from a fixed table.
#[derive(Debug, Clone, Default)]
pub struct StaticServiceResolver {
    services: HashMap<String, String>,
}

impl StaticServiceResolver {
    pub fn new(services: HashMap<String, String>) -> Self {
        Self { services }
    }

    pub fn with_service(mut self, service: impl Into<String>, address: impl Into<String>) -> Self {
        self.services.insert(service.into(), address.into());
        self
    }

    fn lookup(&self, service: &str) -> Option<&String> {
        self.services.get(service)
    }
}

#[async_trait]
impl ServiceResolver for StaticServiceResolver {
    async fn resolve(&self, service: &str) -> Result<String, ResolveError> {
        self.lookup(service)
            .cloned()
            .ok_or_else(|| ResolveError::unknown(service))
    }
}

/// Resolves `<name>[.<namespace>]` through cluster DNS, after checking a
/// table of static overrides.
#[derive(Debug, Clone)]
pub struct ClusterDnsResolver {
    cluster_domain: String,
    default_namespace: String,
    overrides: StaticServiceResolver,
}

impl ClusterDnsResolver {
    pub fn new(cluster_domain: impl Into<String>, default_namespace: impl Into<String>) -> Self {
        Self {
            cluster_domain: cluster_domain.into(),
            default_namespace: default_namespace.into(),
            overrides: StaticServiceResolver::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: StaticServiceResolver) -> Self {
        self.overrides = overrides;
        self
    }

    /// Fully qualified service name, e.g. `gw.kube-system.svc.cluster.local`.
    pub fn fqdn(&self, service: &str) -> Result<String, ResolveError> {
        let service = service.trim();
        let valid = !service.is_empty()
            && service
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
        if !valid {
            return Err(ResolveError::InvalidName {
                service: service.to_string(),
            });
        }

        let (name, namespace) = match service.split_once('.') {
            Some((name, ns)) if !name.is_empty() && !ns.is_empty() && !ns.contains('.') => {
                (name, ns)
            }
            Some(_) => {
                return Err(ResolveError::InvalidName {
                    service: service.to_string(),
                })
            }
            None => (service, self.default_namespace.as_str()),
        };
        Ok(format!("{}.{}.svc.{}", name, namespace, self.cluster_domain))
    }
}

#[async_trait]
impl ServiceResolver for ClusterDnsResolver {
    #[instrument(skip(self))]
    async fn resolve(&self, service: &str) -> Result<String, ResolveError> {
        if let Some(address) = self.overrides.lookup(service) {
            debug!("Service {} resolved from overrides to {}", service, address);
            return Ok(address.clone());
        }

        let fqdn = self.fqdn(service)?;
        let mut addrs = tokio::net::lookup_host((fqdn.as_str(), 0))
            .await
            .map_err(|source| {
                warn!("DNS lookup of {} failed: {}", fqdn, source);
                ResolveError::Lookup {
                    fqdn: fqdn.clone(),
                    source,
                }
            })?;

        match addrs.next() {
            Some(addr) => {
                debug!("Service {} resolved to {}", service, addr.ip());
                Ok(addr.ip().to_string())
            }
            None => Err(ResolveError::NoAddress { fqdn: fqdn.clone() }),
        }
    }
}
