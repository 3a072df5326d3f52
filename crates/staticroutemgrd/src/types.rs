//! Type definitions for staticroutemgrd

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SpecError;

/// Identity of a route resource (cluster scoped, so the name is unique).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceRef {
    pub name: String,
}

impl ResourceRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Where the next hop of a route comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GatewaySource {
    /// Literal gateway address
    Address(String),
    /// Cluster service resolved to an address at reconcile time
    ClusterService(String),
}

impl fmt::Display for GatewaySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewaySource::Address(addr) => f.write_str(addr),
            GatewaySource::ClusterService(svc) => write!(f, "service/{}", svc),
        }
    }
}

/// Spec as it appears in a resource, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRouteSpec {
    #[serde(default)]
    pub destinations: Vec<String>,

    /// Single-destination form used by older resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_service: Option<String>,
}

/// One resource generation's desired state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredRouteSpec {
    pub gateway: GatewaySource,
    pub destinations: BTreeSet<String>,
}

impl DesiredRouteSpec {
    /// Spec routing `destinations` through a literal gateway.
    pub fn via_gateway<I, S>(gateway: impl Into<String>, destinations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            gateway: GatewaySource::Address(gateway.into()),
            destinations: destinations.into_iter().map(Into::into).collect(),
        }
    }

    /// Spec routing `destinations` through a cluster service.
    pub fn via_service<I, S>(service: impl Into<String>, destinations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            gateway: GatewaySource::ClusterService(service.into()),
            destinations: destinations.into_iter().map(Into::into).collect(),
        }
    }
}

impl TryFrom<RawRouteSpec> for DesiredRouteSpec {
    type Error = SpecError;

    fn try_from(raw: RawRouteSpec) -> Result<Self, Self::Error> {
        let gateway = non_blank(raw.gateway);
        let service = non_blank(raw.cluster_service);

        let gateway = match (gateway, service) {
            (Some(gw), None) => GatewaySource::Address(gw),
            (None, Some(svc)) => GatewaySource::ClusterService(svc),
            (Some(_), Some(_)) => return Err(SpecError::ConflictingGateway),
            (None, None) => return Err(SpecError::MissingGateway),
        };

        let destinations: BTreeSet<String> = raw
            .destinations
            .into_iter()
            .chain(raw.destination)
            .map(|d| d.trim().to_string())
            .collect();

        if destinations.is_empty() {
            return Err(SpecError::NoDestinations);
        }
        if destinations.contains("") {
            return Err(SpecError::EmptyDestination);
        }

        Ok(Self {
            gateway,
            destinations,
        })
    }
}

impl From<&DesiredRouteSpec> for RawRouteSpec {
    fn from(spec: &DesiredRouteSpec) -> Self {
        let (gateway, cluster_service) = match &spec.gateway {
            GatewaySource::Address(gw) => (Some(gw.clone()), None),
            GatewaySource::ClusterService(svc) => (None, Some(svc.clone())),
        };
        Self {
            destinations: spec.destinations.iter().cloned().collect(),
            destination: None,
            gateway,
            cluster_service,
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Event that caused a reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerKind {
    Create,
    Update,
    Delete,
    /// Controller restart; handled exactly like Create
    Resume,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TriggerKind::Create => "create",
            TriggerKind::Update => "update",
            TriggerKind::Delete => "delete",
            TriggerKind::Resume => "resume",
        };
        f.write_str(s)
    }
}

/// A single kernel routing table rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteEntry {
    pub destination: String,
    pub gateway: String,
}

impl RouteEntry {
    pub fn new(destination: impl Into<String>, gateway: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            gateway: gateway.into(),
        }
    }
}

impl fmt::Display for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} via {}", self.destination, self.gateway)
    }
}

/// What was done to a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RouteAction {
    Add,
    Delete,
}

/// Ready/NotReady verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Readiness {
    Ready,
    NotReady,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }

    /// Ready only if every item is Ready; an empty set is Ready.
    pub fn all<'a>(items: impl IntoIterator<Item = &'a Readiness>) -> Readiness {
        if items.into_iter().all(Readiness::is_ready) {
            Readiness::Ready
        } else {
            Readiness::NotReady
        }
    }
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Readiness::Ready => f.write_str("Ready"),
            Readiness::NotReady => f.write_str("NotReady"),
        }
    }
}

/// Outcome for one destination touched during a reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationStatus {
    pub destination: String,
    pub gateway: String,
    pub action: RouteAction,
    pub outcome: Readiness,
    /// Event reason code (e.g. `RouteCreateSucceeded`)
    pub reason: String,
    pub message: String,
    /// Failed, but the same step may succeed if tried again
    #[serde(default)]
    pub retryable: bool,
}

impl DestinationStatus {
    pub fn is_ready(&self) -> bool {
        self.outcome.is_ready()
    }

    /// True if this status describes the same step for the same route.
    pub fn same_step(&self, action: RouteAction, destination: &str, gateway: &str) -> bool {
        self.action == action && self.destination == destination && self.gateway == gateway
    }
}

/// Overall result of one reconciliation invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationOutcome {
    pub overall: Readiness,
    pub statuses: Vec<DestinationStatus>,
    /// Portion of the new spec this pass left installed; `None` after a
    /// delete or when nothing could be applied
    pub applied: Option<DesiredRouteSpec>,
    /// Routes that may still be installed but that `applied` does not
    /// describe, such as old-gateway routes whose delete failed. The next
    /// reconciliation of the resource deletes them.
    pub stale: BTreeSet<RouteEntry>,
}

impl ReconciliationOutcome {
    pub fn is_ready(&self) -> bool {
        self.overall.is_ready()
    }

    /// Statuses that ended NotReady.
    pub fn failures(&self) -> impl Iterator<Item = &DestinationStatus> {
        self.statuses.iter().filter(|s| !s.is_ready())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn raw(json: &str) -> RawRouteSpec {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_spec_with_gateway() {
        let spec = DesiredRouteSpec::try_from(raw(
            r#"{"destinations": ["10.42.10.0/24", "10.42.11.0/24"], "gateway": "10.0.2.100"}"#,
        ))
        .unwrap();

        assert_eq!(spec.gateway, GatewaySource::Address("10.0.2.100".to_string()));
        assert_eq!(spec.destinations.len(), 2);
    }

    #[test]
    fn test_spec_with_cluster_service() {
        let spec = DesiredRouteSpec::try_from(raw(
            r#"{"destinations": ["10.1.0.0/16"], "clusterService": "egress.kube-system"}"#,
        ))
        .unwrap();

        assert_eq!(
            spec.gateway,
            GatewaySource::ClusterService("egress.kube-system".to_string())
        );
    }

    #[test]
    fn test_spec_requires_exactly_one_gateway() {
        let both = raw(r#"{"destinations": ["10.1.0.0/16"], "gateway": "10.0.0.1", "clusterService": "x"}"#);
        assert_eq!(
            DesiredRouteSpec::try_from(both),
            Err(SpecError::ConflictingGateway)
        );

        let neither = raw(r#"{"destinations": ["10.1.0.0/16"], "gateway": "  "}"#);
        assert_eq!(
            DesiredRouteSpec::try_from(neither),
            Err(SpecError::MissingGateway)
        );
    }

    #[test]
    fn test_spec_destinations_are_a_set() {
        let spec = DesiredRouteSpec::try_from(raw(
            r#"{"destinations": ["10.2.0.0/24", "10.1.0.0/24", "10.2.0.0/24"], "gateway": "10.0.2.1"}"#,
        ))
        .unwrap();

        let dests: Vec<_> = spec.destinations.iter().map(String::as_str).collect();
        assert_eq!(dests, vec!["10.1.0.0/24", "10.2.0.0/24"]);
    }

    #[test]
    fn test_legacy_single_destination() {
        let spec = DesiredRouteSpec::try_from(raw(
            r#"{"destination": "10.42.10.0", "gateway": "10.0.2.100"}"#,
        ))
        .unwrap();

        assert!(spec.destinations.contains("10.42.10.0"));
    }

    #[test]
    fn test_spec_without_destinations() {
        let empty = raw(r#"{"gateway": "10.0.2.1"}"#);
        assert_eq!(
            DesiredRouteSpec::try_from(empty),
            Err(SpecError::NoDestinations)
        );

        let blank = raw(r#"{"destinations": [""], "gateway": "10.0.2.1"}"#);
        assert_eq!(
            DesiredRouteSpec::try_from(blank),
            Err(SpecError::EmptyDestination)
        );
    }

    #[test]
    fn test_raw_spec_round_trip_shape() {
        let spec = DesiredRouteSpec::via_service("egress", ["10.1.0.0/16"]);
        let json = serde_json::to_value(RawRouteSpec::from(&spec)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"destinations": ["10.1.0.0/16"], "clusterService": "egress"})
        );
    }

    #[test]
    fn test_readiness_all() {
        assert_eq!(Readiness::all(&[] as &[Readiness]), Readiness::Ready);
        assert_eq!(
            Readiness::all(&[Readiness::Ready, Readiness::NotReady]),
            Readiness::NotReady
        );
        assert_eq!(Readiness::NotReady.to_string(), "NotReady");
    }
}
