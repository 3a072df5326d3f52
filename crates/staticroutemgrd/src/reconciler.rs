//! Route reconciliation.
//!
//! One [`RouteReconciler::reconcile`] call moves the kernel table from the
//! previous generation of a resource to the next one:
//!
//! 1. plan deletions and additions from the two destination sets
//! 2. resolve the gateways the plan needs (failure here fails every step)
//! 3. validate and apply each step, deletions first
//! 4. report one event per step, then the aggregate status

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use staticroute_types::IpAddress;
use tracing::{debug, error, info, instrument, warn};

use crate::diff::{diff, DiffResult};
use crate::error::RouteError;
use crate::resolver::{ResolveError, ServiceResolver};
use crate::status::{reasons, EventKind, StatusReporter};
use crate::table::{RouteTable, TableError};
use crate::types::{
    DesiredRouteSpec, DestinationStatus, GatewaySource, Readiness, ReconciliationOutcome,
    ResourceRef, RouteAction, RouteEntry, TriggerKind,
};
use crate::validator::AddressValidator;

/// Default bound on a single table call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Input of one reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileRequest {
    pub resource: ResourceRef,
    pub trigger: TriggerKind,
    pub old: Option<DesiredRouteSpec>,
    pub new: Option<DesiredRouteSpec>,
    /// Statuses of a previous attempt of the same old/new pair
    pub prior: Option<Vec<DestinationStatus>>,
    /// Routes left behind by earlier passes, deleted by this one
    pub stale: BTreeSet<RouteEntry>,
}

impl ReconcileRequest {
    pub fn create(resource: ResourceRef, new: DesiredRouteSpec) -> Self {
        Self::build(resource, TriggerKind::Create, None, Some(new))
    }

    pub fn resume(resource: ResourceRef, new: DesiredRouteSpec) -> Self {
        Self::build(resource, TriggerKind::Resume, None, Some(new))
    }

    pub fn update(resource: ResourceRef, old: DesiredRouteSpec, new: DesiredRouteSpec) -> Self {
        Self::build(resource, TriggerKind::Update, Some(old), Some(new))
    }

    pub fn delete(resource: ResourceRef, old: DesiredRouteSpec) -> Self {
        Self::build(resource, TriggerKind::Delete, Some(old), None)
    }

    /// Deletion of a resource whose only remaining routes are stale ones.
    pub fn cleanup(resource: ResourceRef) -> Self {
        Self::build(resource, TriggerKind::Delete, None, None)
    }

    fn build(
        resource: ResourceRef,
        trigger: TriggerKind,
        old: Option<DesiredRouteSpec>,
        new: Option<DesiredRouteSpec>,
    ) -> Self {
        Self {
            resource,
            trigger,
            old,
            new,
            prior: None,
            stale: BTreeSet::new(),
        }
    }

    /// Marks this request as a retry of an attempt that produced `prior`.
    pub fn with_prior(mut self, prior: Vec<DestinationStatus>) -> Self {
        self.prior = Some(prior);
        self
    }

    pub fn with_stale(mut self, stale: BTreeSet<RouteEntry>) -> Self {
        self.stale = stale;
        self
    }

    /// The (old, new) pair the trigger actually means.
    fn slots(&self) -> (Option<&DesiredRouteSpec>, Option<&DesiredRouteSpec>) {
        match self.trigger {
            TriggerKind::Create | TriggerKind::Resume => (None, self.new.as_ref()),
            TriggerKind::Update => (self.old.as_ref(), self.new.as_ref()),
            TriggerKind::Delete => (self.old.as_ref().or(self.new.as_ref()), None),
        }
    }
}

/// Where a step takes its gateway from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    Old,
    New,
    /// Gateway recorded when a stale route was installed
    Stale(String),
}

impl Slot {
    fn label(&self, old: Option<&DesiredRouteSpec>, new: Option<&DesiredRouteSpec>) -> String {
        let spec = match self {
            Slot::Old => old,
            Slot::New => new,
            Slot::Stale(gateway) => return gateway.clone(),
        };
        spec.map(|s| s.gateway.to_string()).unwrap_or_default()
    }
}

#[derive(Debug)]
struct Step {
    action: RouteAction,
    destination: String,
    slot: Slot,
}

impl Step {
    fn status(&self, gateway: &str, outcome: Readiness, reason: &str, message: String) -> DestinationStatus {
        DestinationStatus {
            destination: self.destination.clone(),
            gateway: gateway.to_string(),
            action: self.action,
            outcome,
            reason: reason.to_string(),
            message,
            retryable: false,
        }
    }

    fn failed(&self, gateway: &str, err: &RouteError) -> DestinationStatus {
        let verb = match self.action {
            RouteAction::Add => "create",
            RouteAction::Delete => "delete",
        };
        DestinationStatus {
            retryable: err.is_retryable(),
            ..self.status(
                gateway,
                Readiness::NotReady,
                err.reason(),
                format!("Route {} failed: {}", verb, err),
            )
        }
    }
}

/// Gateways resolved for the slots the plan uses.
#[derive(Debug, Default)]
struct Gateways {
    old: Option<String>,
    new: Option<String>,
}

impl Gateways {
    fn get<'a>(&'a self, slot: &'a Slot) -> Option<&'a str> {
        match slot {
            Slot::Old => self.old.as_deref(),
            Slot::New => self.new.as_deref(),
            Slot::Stale(gateway) => Some(gateway.as_str()),
        }
    }
}

fn plan(
    old: Option<&DesiredRouteSpec>,
    new: Option<&DesiredRouteSpec>,
    stale: &BTreeSet<RouteEntry>,
) -> Vec<Step> {
    let empty = BTreeSet::new();
    let old_set = old.map_or(&empty, |s| &s.destinations);
    let new_set = new.map_or(&empty, |s| &s.destinations);

    let rerouted = matches!((old, new), (Some(o), Some(n)) if o.gateway != n.gateway);
    let DiffResult { to_add, to_delete } = if rerouted {
        DiffResult {
            to_add: new_set.clone(),
            to_delete: old_set.clone(),
        }
    } else {
        diff(old_set, new_set)
    };

    let leftovers = stale.iter().map(|entry| Step {
        action: RouteAction::Delete,
        destination: entry.destination.clone(),
        slot: Slot::Stale(entry.gateway.clone()),
    });
    let deletes = to_delete.into_iter().map(|destination| Step {
        action: RouteAction::Delete,
        destination,
        slot: Slot::Old,
    });
    let adds = to_add.into_iter().map(|destination| Step {
        action: RouteAction::Add,
        destination,
        slot: Slot::New,
    });
    leftovers.chain(deletes).chain(adds).collect()
}

/// Drops stale deletions the plan already covers: the same route deleted
/// through the old spec, or a route the new spec wants. Returns the latter.
fn prune_stale(
    steps: &mut Vec<Step>,
    gateways: &Gateways,
    new: Option<&DesiredRouteSpec>,
) -> Vec<RouteEntry> {
    let old_deletes: BTreeSet<String> = steps
        .iter()
        .filter(|s| s.slot == Slot::Old)
        .map(|s| s.destination.clone())
        .collect();
    let mut wanted = Vec::new();

    steps.retain(|step| {
        let Slot::Stale(gateway) = &step.slot else {
            return true;
        };
        if gateways.old.as_ref() == Some(gateway) && old_deletes.contains(&step.destination) {
            return false;
        }
        let desired = new.is_some_and(|n| n.destinations.contains(&step.destination));
        if desired && gateways.new.as_ref() == Some(gateway) {
            wanted.push(RouteEntry::new(step.destination.clone(), gateway.clone()));
            return false;
        }
        true
    });
    wanted
}

/// True if two gateway strings name the same address.
fn same_gateway(a: &str, b: &str) -> bool {
    match (a.parse::<IpAddress>(), b.parse::<IpAddress>()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

fn add_failed(source: TableError) -> RouteError {
    RouteError::TableOperationFailed {
        action: RouteAction::Add,
        source,
    }
}

/// Drives one resource toward its desired state.
pub struct RouteReconciler {
    table: Arc<dyn RouteTable>,
    resolver: Arc<dyn ServiceResolver>,
    reporter: Arc<dyn StatusReporter>,
    validator: AddressValidator,
    call_timeout: Duration,
}

impl RouteReconciler {
    pub fn new(
        table: Arc<dyn RouteTable>,
        resolver: Arc<dyn ServiceResolver>,
        reporter: Arc<dyn StatusReporter>,
    ) -> Self {
        Self {
            table,
            resolver,
            reporter,
            validator: AddressValidator::new(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Runs one reconciliation to completion and reports its outcome.
    ///
    /// Never fails as a whole: every problem ends up as a NotReady status.
    #[instrument(skip(self, request), fields(resource = %request.resource, trigger = %request.trigger))]
    pub async fn reconcile(&self, request: &ReconcileRequest) -> ReconciliationOutcome {
        let (old, new) = request.slots();
        let mut steps = plan(old, new, &request.stale);
        let prior = request.prior.as_deref().unwrap_or_default();
        debug!("Planned {} route operations", steps.len());

        let resolved = self.resolve_gateways(&steps, old, new).await;
        let (statuses, applied, stale) = match resolved {
            Ok(gateways) => {
                let wanted = prune_stale(&mut steps, &gateways, new);
                let mut statuses = Vec::with_capacity(steps.len());
                for step in &steps {
                    let status = match gateways.get(&step.slot) {
                        Some(gateway) => self.apply_step(step, gateway, prior).await,
                        None => {
                            let label = step.slot.label(old, new);
                            let err = RouteError::GatewayResolutionFailed {
                                source_ref: label.clone(),
                                source: ResolveError::Unresolved {
                                    service: label.clone(),
                                },
                            };
                            step.failed(&label, &err)
                        }
                    };
                    statuses.push(status);
                }
                let applied = applied_spec(old, new, &statuses);
                let stale = leftovers(old, new, &steps, &statuses, wanted, applied.as_ref());
                (statuses, applied, stale)
            }
            Err(err) => {
                error!("Gateway unavailable, skipping all routes: {}", err);
                let statuses: Vec<DestinationStatus> = steps
                    .iter()
                    .map(|step| step.failed(&step.slot.label(old, new), &err))
                    .collect();
                // nothing was touched
                (statuses, old.cloned(), request.stale.clone())
            }
        };

        let overall = Readiness::all(statuses.iter().map(|s| &s.outcome));
        let gone = request.trigger == TriggerKind::Delete && overall.is_ready() && stale.is_empty();
        self.report(&request.resource, &statuses, overall, gone);
        if !stale.is_empty() {
            warn!("{} stale routes left for {}", stale.len(), request.resource);
        }

        info!(
            "Reconciled {}: {} ({} routes, {} failed)",
            request.resource,
            overall,
            statuses.len(),
            statuses.iter().filter(|s| !s.is_ready()).count()
        );

        ReconciliationOutcome {
            overall,
            statuses,
            applied,
            stale,
        }
    }

    async fn resolve_gateways(
        &self,
        steps: &[Step],
        old: Option<&DesiredRouteSpec>,
        new: Option<&DesiredRouteSpec>,
    ) -> Result<Gateways, RouteError> {
        let needs = |slot: &Slot| steps.iter().any(|s| &s.slot == slot);
        // stale routes are only pruned against a known new gateway
        let has_stale = steps.iter().any(|s| matches!(s.slot, Slot::Stale(_)));
        let mut gateways = Gateways::default();

        if let Some(spec) = new.filter(|_| needs(&Slot::New) || has_stale) {
            gateways.new = Some(self.resolve_gateway(&spec.gateway).await?);
        }
        if let Some(spec) = old.filter(|_| needs(&Slot::Old)) {
            let shared = new
                .filter(|n| n.gateway == spec.gateway)
                .and(gateways.new.clone());
            gateways.old = match shared {
                Some(gw) => Some(gw),
                None => Some(self.resolve_gateway(&spec.gateway).await?),
            };
        }
        Ok(gateways)
    }

    async fn resolve_gateway(&self, source: &GatewaySource) -> Result<String, RouteError> {
        let address = match source {
            GatewaySource::Address(address) => address.clone(),
            GatewaySource::ClusterService(service) => self
                .resolver
                .resolve(service)
                .await
                .map_err(|e| RouteError::GatewayResolutionFailed {
                    source_ref: source.to_string(),
                    source: e,
                })?,
        };
        self.validator.check_gateway(&address)?;
        Ok(address)
    }

    async fn apply_step(&self, step: &Step, gateway: &str, prior: &[DestinationStatus]) -> DestinationStatus {
        // an add is only as good as the delete that had to clear its prefix
        let blocked = step.action == RouteAction::Add
            && prior.iter().any(|s| {
                s.action == RouteAction::Delete && s.destination == step.destination && !s.is_ready()
            });
        if let Some(done) = prior
            .iter()
            .filter(|_| !blocked)
            .find(|s| s.is_ready() && s.same_step(step.action, &step.destination, gateway))
        {
            debug!(destination = %step.destination, "Already converged in previous attempt");
            return done.clone();
        }

        if let Err(err) = self.validator.check_destination(&step.destination) {
            return step.failed(gateway, &err);
        }

        let entry = RouteEntry::new(step.destination.clone(), gateway);
        match self.call_table(step.action, &entry).await {
            Ok(message) => {
                let reason = match step.action {
                    RouteAction::Add => reasons::ROUTE_CREATE_SUCCEEDED,
                    RouteAction::Delete => reasons::ROUTE_DELETE_SUCCEEDED,
                };
                step.status(gateway, Readiness::Ready, reason, message)
            }
            Err(err) => step.failed(gateway, &err),
        }
    }

    /// One bounded table call. "Not found" on delete counts as success, and
    /// so does "exists" on add once the installed route is confirmed to use
    /// the same gateway.
    async fn call_table(&self, action: RouteAction, entry: &RouteEntry) -> Result<String, RouteError> {
        let call = async {
            match action {
                RouteAction::Add => self.table.add(entry).await,
                RouteAction::Delete => self.table.delete(entry).await,
            }
        };
        let result = tokio::time::timeout(self.call_timeout, call)
            .await
            .unwrap_or_else(|_| Err(TableError::timeout(entry, self.call_timeout)));

        match (action, result) {
            (RouteAction::Add, Ok(())) => Ok(format!("Route {} created", entry)),
            (RouteAction::Delete, Ok(())) => Ok(format!("Route {} deleted", entry)),
            (RouteAction::Add, Err(TableError::Exists { .. })) => self.confirm_existing(entry).await,
            (RouteAction::Delete, Err(TableError::NotFound { .. })) => {
                Ok(format!("Route {} already absent", entry))
            }
            (action, Err(source)) => Err(RouteError::TableOperationFailed { action, source }),
        }
    }

    async fn confirm_existing(&self, entry: &RouteEntry) -> Result<String, RouteError> {
        let installed = tokio::time::timeout(self.call_timeout, self.table.lookup(&entry.destination))
            .await
            .unwrap_or_else(|_| Err(TableError::timeout(entry, self.call_timeout)))
            .map_err(add_failed)?;

        match installed {
            Some(hop) if same_gateway(&hop, &entry.gateway) => {
                Ok(format!("Route {} already present", entry))
            }
            Some(hop) => Err(add_failed(TableError::conflict(entry, hop))),
            None => Err(add_failed(TableError::rejected(
                entry,
                "reported as existing but no route is installed",
            ))),
        }
    }

    fn report(&self, resource: &ResourceRef, statuses: &[DestinationStatus], overall: Readiness, gone: bool) {
        for status in statuses {
            let kind = if status.is_ready() {
                EventKind::Success
            } else {
                EventKind::Failure
            };
            self.reporter
                .record_event(resource, kind, &status.reason, &status.message);
        }
        if gone {
            self.reporter.clear(resource);
        } else {
            self.reporter.set_status(resource, statuses, overall);
        }
    }
}

/// The part of `new` left installed after a pass that produced `statuses`.
fn applied_spec(
    old: Option<&DesiredRouteSpec>,
    new: Option<&DesiredRouteSpec>,
    statuses: &[DestinationStatus],
) -> Option<DesiredRouteSpec> {
    let new = new?;
    let ready = |action: RouteAction| {
        statuses
            .iter()
            .filter(move |s| s.action == action && s.is_ready())
            .map(|s| s.destination.clone())
    };

    let mut destinations = match old {
        Some(old) if old.gateway == new.gateway => {
            let deleted: BTreeSet<String> = ready(RouteAction::Delete).collect();
            old.destinations
                .iter()
                .filter(|d| !deleted.contains(*d))
                .cloned()
                .collect()
        }
        _ => BTreeSet::new(),
    };
    destinations.extend(ready(RouteAction::Add));

    Some(DesiredRouteSpec {
        gateway: new.gateway.clone(),
        destinations,
    })
}

/// Routes that may still be installed but that the applied spec does not
/// describe: failed deletes of stale routes, failed deletes of an old spec
/// the applied one does not continue, and wanted stale routes the applied
/// spec did not pick up.
fn leftovers(
    old: Option<&DesiredRouteSpec>,
    new: Option<&DesiredRouteSpec>,
    steps: &[Step],
    statuses: &[DestinationStatus],
    wanted: Vec<RouteEntry>,
    applied: Option<&DesiredRouteSpec>,
) -> BTreeSet<RouteEntry> {
    let old_continues = matches!((old, new), (Some(o), Some(n)) if o.gateway == n.gateway);
    let mut stale: BTreeSet<RouteEntry> = steps
        .iter()
        .zip(statuses)
        .filter(|(step, status)| {
            let tracked = match step.slot {
                Slot::Stale(_) => true,
                Slot::Old => !old_continues,
                Slot::New => false,
            };
            // only a table failure can leave the route installed
            tracked && status.reason == reasons::ROUTE_DELETE_FAILED
        })
        .map(|(_, status)| RouteEntry::new(status.destination.clone(), status.gateway.clone()))
        .collect();

    stale.extend(
        wanted
            .into_iter()
            .filter(|e| !applied.is_some_and(|a| a.destinations.contains(&e.destination))),
    );
    stale
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRouteTable;
    use crate::resolver::StaticServiceResolver;
    use crate::status::StatusStore;
    use pretty_assertions::assert_eq;

    struct Harness {
        table: Arc<MemoryRouteTable>,
        store: Arc<StatusStore>,
        reconciler: RouteReconciler,
    }

    fn harness(table: MemoryRouteTable) -> Harness {
        let table = Arc::new(table);
        let store = Arc::new(StatusStore::default());
        let resolver = StaticServiceResolver::default().with_service("egress-gw", "10.0.2.50");
        let reconciler = RouteReconciler::new(table.clone(), Arc::new(resolver), store.clone())
            .with_call_timeout(Duration::from_millis(200));
        Harness {
            table,
            store,
            reconciler,
        }
    }

    fn res() -> ResourceRef {
        ResourceRef::new("sr-1")
    }

    #[test]
    fn test_plan_reroute() {
        let old = DesiredRouteSpec::via_gateway("10.0.2.1", ["10.1.0.0/24", "10.2.0.0/24"]);
        let new = DesiredRouteSpec::via_gateway("10.0.2.9", ["10.2.0.0/24"]);
        let steps = plan(Some(&old), Some(&new), &BTreeSet::new());
        let summary: Vec<(RouteAction, &str)> = steps
            .iter()
            .map(|s| (s.action, s.destination.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (RouteAction::Delete, "10.1.0.0/24"),
                (RouteAction::Delete, "10.2.0.0/24"),
                (RouteAction::Add, "10.2.0.0/24"),
            ]
        );
    }

    #[test]
    fn test_delete_accepts_spec_in_new_slot() {
        let spec = DesiredRouteSpec::via_gateway("10.0.2.1", ["10.3.0.0/24"]);
        let request = ReconcileRequest {
            resource: res(),
            trigger: TriggerKind::Delete,
            old: None,
            new: Some(spec.clone()),
            prior: None,
            stale: BTreeSet::new(),
        };
        assert_eq!(request.slots(), (Some(&spec), None));
    }

    #[tokio::test]
    async fn test_no_op_update() {
        let h = harness(MemoryRouteTable::new());
        let spec = DesiredRouteSpec::via_gateway("10.0.2.1", ["10.1.0.0/24"]);
        let outcome = h
            .reconciler
            .reconcile(&ReconcileRequest::update(res(), spec.clone(), spec.clone()))
            .await;

        assert!(outcome.is_ready());
        assert!(outcome.statuses.is_empty());
        assert_eq!(outcome.applied, Some(spec));
        assert_eq!(h.table.call_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_gateway_is_fatal() {
        let h = harness(MemoryRouteTable::new());
        let spec = DesiredRouteSpec::via_gateway("10.0.2.0/24", ["10.1.0.0/24", "10.2.0.0/24"]);
        let outcome = h.reconciler.reconcile(&ReconcileRequest::create(res(), spec)).await;

        assert_eq!(outcome.overall, Readiness::NotReady);
        assert_eq!(outcome.statuses.len(), 2);
        assert!(outcome
            .statuses
            .iter()
            .all(|s| s.reason == reasons::INVALID_ADDRESS));
        assert_eq!(outcome.applied, None);
        assert_eq!(h.table.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cluster_service_gateway() {
        let h = harness(MemoryRouteTable::new());
        let spec = DesiredRouteSpec::via_service("egress-gw", ["10.7.0.0/16"]);
        let outcome = h.reconciler.reconcile(&ReconcileRequest::create(res(), spec)).await;

        assert!(outcome.is_ready());
        assert!(h.table.contains(&RouteEntry::new("10.7.0.0/16", "10.0.2.50")));
    }

    #[tokio::test]
    async fn test_events_match_statuses() {
        let h = harness(MemoryRouteTable::new());
        let spec = DesiredRouteSpec::via_gateway("10.0.2.1", ["10.1.0.0/24", "0.0.0.0/0"]);
        let outcome = h.reconciler.reconcile(&ReconcileRequest::create(res(), spec)).await;

        let events = h.store.events_for("sr-1");
        assert_eq!(events.len(), outcome.statuses.len());
        let reasons: Vec<&str> = events.iter().map(|e| e.reason.as_str()).collect();
        assert_eq!(reasons, vec!["DeniedDestination", "RouteCreateSucceeded"]);

        let status = h.store.status("sr-1").unwrap();
        assert_eq!(status.overall, Readiness::NotReady);
    }

    #[tokio::test]
    async fn test_applied_keeps_failed_deletes() {
        let h = harness(MemoryRouteTable::with_routes([
            RouteEntry::new("10.1.0.0/24", "10.0.2.1"),
            RouteEntry::new("10.2.0.0/24", "10.0.2.1"),
        ]));
        h.table.fail_destination("10.1.0.0/24", "Operation not permitted");

        let old = DesiredRouteSpec::via_gateway("10.0.2.1", ["10.1.0.0/24", "10.2.0.0/24"]);
        let new = DesiredRouteSpec::via_gateway("10.0.2.1", ["10.4.0.0/24"]);
        let outcome = h
            .reconciler
            .reconcile(&ReconcileRequest::update(res(), old, new))
            .await;

        assert_eq!(outcome.overall, Readiness::NotReady);
        assert_eq!(
            outcome.applied,
            Some(DesiredRouteSpec::via_gateway(
                "10.0.2.1",
                ["10.1.0.0/24", "10.4.0.0/24"]
            ))
        );
        assert!(outcome.stale.is_empty());
    }

    #[test]
    fn test_plan_deletes_stale_routes_first() {
        let new = DesiredRouteSpec::via_gateway("10.0.2.9", ["10.2.0.0/24"]);
        let stale = BTreeSet::from([RouteEntry::new("10.1.0.0/24", "10.0.2.1")]);
        let steps = plan(None, Some(&new), &stale);

        assert_eq!(steps[0].action, RouteAction::Delete);
        assert_eq!(steps[0].slot, Slot::Stale("10.0.2.1".to_string()));
        assert_eq!(steps[1].slot, Slot::New);
    }

    #[test]
    fn test_prune_keeps_wanted_stale_route() {
        let new = DesiredRouteSpec::via_gateway("10.0.2.9", ["10.2.0.0/24"]);
        let stale = BTreeSet::from([
            RouteEntry::new("10.1.0.0/24", "10.0.2.1"),
            RouteEntry::new("10.2.0.0/24", "10.0.2.9"),
        ]);
        let mut steps = plan(None, Some(&new), &stale);
        let gateways = Gateways {
            old: None,
            new: Some("10.0.2.9".to_string()),
        };

        let wanted = prune_stale(&mut steps, &gateways, Some(&new));
        assert_eq!(wanted, vec![RouteEntry::new("10.2.0.0/24", "10.0.2.9")]);
        let remaining: Vec<(RouteAction, &str)> = steps
            .iter()
            .map(|s| (s.action, s.destination.as_str()))
            .collect();
        assert_eq!(
            remaining,
            vec![
                (RouteAction::Delete, "10.1.0.0/24"),
                (RouteAction::Add, "10.2.0.0/24"),
            ]
        );
    }

    #[test]
    fn test_unresolved_slot_has_no_gateway() {
        let gateways = Gateways::default();
        assert_eq!(gateways.get(&Slot::Old), None);
        assert_eq!(gateways.get(&Slot::Stale("10.0.2.1".to_string())), Some("10.0.2.1"));
    }

    #[test]
    fn test_same_gateway_compares_addresses() {
        assert!(same_gateway("2001:db8::1", "2001:0db8:0::1"));
        assert!(same_gateway("10.0.2.1", "10.0.2.1"));
        assert!(!same_gateway("10.0.2.1", "10.0.2.77"));
        assert!(!same_gateway("dev eth0", "10.0.2.1"));
    }

    #[tokio::test]
    async fn test_existing_route_via_other_gateway_is_a_conflict() {
        let h = harness(MemoryRouteTable::with_routes([RouteEntry::new(
            "10.1.0.0/24",
            "10.0.2.77",
        )]));
        let spec = DesiredRouteSpec::via_gateway("10.0.2.1", ["10.1.0.0/24"]);
        let outcome = h.reconciler.reconcile(&ReconcileRequest::create(res(), spec)).await;

        assert_eq!(outcome.overall, Readiness::NotReady);
        assert_eq!(outcome.statuses[0].reason, reasons::ROUTE_CREATE_FAILED);
        assert!(outcome.statuses[0].message.contains("next hop 10.0.2.77"));
        assert!(outcome.statuses[0].retryable);
        assert_eq!(
            h.table.routes(),
            vec![RouteEntry::new("10.1.0.0/24", "10.0.2.77")]
        );
    }

    #[tokio::test]
    async fn test_failure_message_has_single_prefix() {
        let h = harness(MemoryRouteTable::new());
        h.table.fail_destination("10.2.0.0/24", "Operation not permitted");
        let spec = DesiredRouteSpec::via_gateway("10.0.2.1", ["10.2.0.0/24"]);
        let outcome = h.reconciler.reconcile(&ReconcileRequest::create(res(), spec)).await;

        assert_eq!(
            outcome.statuses[0].message,
            "Route create failed: route 10.2.0.0/24 via 10.0.2.1 rejected: Operation not permitted"
        );
    }

    #[tokio::test]
    async fn test_denied_destination_is_not_retryable() {
        let h = harness(MemoryRouteTable::new());
        let spec = DesiredRouteSpec::via_gateway("10.0.2.1", ["0.0.0.0/0"]);
        let outcome = h.reconciler.reconcile(&ReconcileRequest::create(res(), spec)).await;

        assert_eq!(outcome.overall, Readiness::NotReady);
        assert!(!outcome.statuses[0].retryable);
    }
}
