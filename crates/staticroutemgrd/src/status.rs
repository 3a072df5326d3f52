//! Status reporting: events and per-resource route status.

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::Result;
use crate::types::{DestinationStatus, Readiness, ResourceRef};

/// Event reason codes.
pub mod reasons {
    pub const ROUTE_CREATE_SUCCEEDED: &str = "RouteCreateSucceeded";
    pub const ROUTE_CREATE_FAILED: &str = "RouteCreateFailed";
    pub const ROUTE_DELETE_SUCCEEDED: &str = "RouteDeleteSucceeded";
    pub const ROUTE_DELETE_FAILED: &str = "RouteDeleteFailed";
    pub const INVALID_ADDRESS: &str = "InvalidAddress";
    pub const DENIED_DESTINATION: &str = "DeniedDestination";
    pub const GATEWAY_RESOLUTION_FAILED: &str = "GatewayResolutionFailed";
}

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    Success,
    Failure,
}

/// Sink for reconciliation results.
pub trait StatusReporter: Send + Sync {
    /// Emits one human-readable event for `resource`.
    fn record_event(&self, resource: &ResourceRef, kind: EventKind, reason: &str, message: &str);

    /// Replaces the route status of `resource`.
    fn set_status(&self, resource: &ResourceRef, statuses: &[DestinationStatus], overall: Readiness);

    /// Drops the status of a resource whose routes are all gone.
    fn clear(&self, resource: &ResourceRef);
}

/// An event as kept by [`StatusStore`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedEvent {
    pub timestamp: DateTime<Utc>,
    pub resource: String,
    pub kind: EventKind,
    pub reason: String,
    pub message: String,
}

/// Latest status of one resource.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    pub overall: Readiness,
    pub route_status: Vec<DestinationStatus>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct Snapshot<'a> {
    resources: &'a BTreeMap<String, ResourceStatus>,
    events: &'a VecDeque<RecordedEvent>,
}

/// Default number of events retained.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// In-memory [`StatusReporter`] that logs every event and can write a JSON
/// snapshot.
pub struct StatusStore {
    resources: RwLock<BTreeMap<String, ResourceStatus>>,
    events: RwLock<VecDeque<RecordedEvent>>,
    event_capacity: usize,
}

impl Default for StatusStore {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl StatusStore {
    pub fn new(event_capacity: usize) -> Self {
        Self {
            resources: RwLock::new(BTreeMap::new()),
            events: RwLock::new(VecDeque::new()),
            event_capacity: event_capacity.max(1),
        }
    }

    pub fn status(&self, resource: &str) -> Option<ResourceStatus> {
        self.resources.read().get(resource).cloned()
    }

    /// Events for `resource`, oldest first.
    pub fn events_for(&self, resource: &str) -> Vec<RecordedEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.resource == resource)
            .cloned()
            .collect()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.read().iter().cloned().collect()
    }

    pub fn snapshot(&self) -> serde_json::Value {
        let resources = self.resources.read();
        let events = self.events.read();
        serde_json::to_value(Snapshot {
            resources: &resources,
            events: &events,
        })
        .unwrap_or(serde_json::Value::Null)
    }

    /// Writes the snapshot to `path`, replacing it atomically.
    pub fn write_snapshot(&self, path: &Path) -> Result<()> {
        let body = serde_json::to_string_pretty(&self.snapshot())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, body)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl StatusReporter for StatusStore {
    fn record_event(&self, resource: &ResourceRef, kind: EventKind, reason: &str, message: &str) {
        match kind {
            EventKind::Success => info!(resource = %resource, reason, "{}", message),
            EventKind::Failure => warn!(resource = %resource, reason, "{}", message),
        }

        let mut events = self.events.write();
        if events.len() >= self.event_capacity {
            events.pop_front();
        }
        events.push_back(RecordedEvent {
            timestamp: Utc::now(),
            resource: resource.to_string(),
            kind,
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }

    fn set_status(&self, resource: &ResourceRef, statuses: &[DestinationStatus], overall: Readiness) {
        info!(resource = %resource, %overall, routes = statuses.len(), "Status updated");
        self.resources.write().insert(
            resource.to_string(),
            ResourceStatus {
                overall,
                route_status: statuses.to_vec(),
                updated_at: Utc::now(),
            },
        );
    }

    fn clear(&self, resource: &ResourceRef) {
        if self.resources.write().remove(&resource.name).is_some() {
            info!(resource = %resource, "Status cleared");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RouteAction;
    use pretty_assertions::assert_eq;

    fn status(dest: &str) -> DestinationStatus {
        DestinationStatus {
            destination: dest.to_string(),
            gateway: "10.0.2.100".to_string(),
            action: RouteAction::Add,
            outcome: Readiness::Ready,
            reason: reasons::ROUTE_CREATE_SUCCEEDED.to_string(),
            message: format!("route {} via 10.0.2.100 created", dest),
            retryable: false,
        }
    }

    #[test]
    fn test_event_capacity() {
        let store = StatusStore::new(2);
        let res = ResourceRef::new("sr-1");
        for reason in ["a", "b", "c"] {
            store.record_event(&res, EventKind::Success, reason, "msg");
        }
        let reasons: Vec<String> = store.events().into_iter().map(|e| e.reason).collect();
        assert_eq!(reasons, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_set_status_replaces() {
        let store = StatusStore::default();
        let res = ResourceRef::new("sr-1");
        store.set_status(&res, &[status("10.1.0.0/24")], Readiness::Ready);
        store.set_status(&res, &[status("10.2.0.0/24")], Readiness::NotReady);

        let current = store.status("sr-1").unwrap();
        assert_eq!(current.overall, Readiness::NotReady);
        assert_eq!(current.route_status.len(), 1);
        assert_eq!(current.route_status[0].destination, "10.2.0.0/24");

        store.clear(&res);
        assert!(store.status("sr-1").is_none());
        assert!(store.snapshot()["resources"].get("sr-1").is_none());
    }

    #[test]
    fn test_snapshot_shape() {
        let store = StatusStore::default();
        let res = ResourceRef::new("static-route-test");
        store.set_status(&res, &[status("10.42.10.0/24")], Readiness::Ready);

        let snap = store.snapshot();
        let entry = &snap["resources"]["static-route-test"];
        assert_eq!(entry["overall"], "Ready");
        assert_eq!(entry["routeStatus"][0]["destination"], "10.42.10.0/24");
    }

    #[test]
    fn test_write_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        let store = StatusStore::default();
        store.record_event(
            &ResourceRef::new("sr-1"),
            EventKind::Failure,
            reasons::ROUTE_CREATE_FAILED,
            "boom",
        );
        store.write_snapshot(&path).unwrap();

        let body: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(body["events"][0]["reason"], "RouteCreateFailed");
    }
}
