//! In-memory routing table.
//!
//! Backs `--dry-run` and the test suites. Failures and latency can be
//! injected per destination.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

use crate::table::{RouteTable, TableError};
use crate::types::{RouteAction, RouteEntry};

/// Injected failure; `only` limits it to one kind of call.
struct Failure {
    only: Option<RouteAction>,
    message: String,
}

#[derive(Default)]
struct Inner {
    /// destination -> gateway; one route per prefix, like the kernel
    routes: BTreeMap<String, String>,
    calls: Vec<(RouteAction, RouteEntry)>,
    failures: HashMap<String, Failure>,
    delays: HashMap<String, Duration>,
    in_flight: usize,
    max_in_flight: usize,
}

impl Inner {
    fn mutate(&mut self, action: RouteAction, entry: &RouteEntry) -> Result<(), TableError> {
        if let Some(failure) = self
            .failures
            .get(&entry.destination)
            .filter(|f| f.only.map_or(true, |only| only == action))
        {
            return Err(TableError::rejected(entry, failure.message.clone()));
        }

        match action {
            RouteAction::Add => {
                if self.routes.contains_key(&entry.destination) {
                    return Err(TableError::exists(entry));
                }
                self.routes
                    .insert(entry.destination.clone(), entry.gateway.clone());
                info!("[memory] route add {}", entry);
            }
            RouteAction::Delete => {
                if self.routes.get(&entry.destination) != Some(&entry.gateway) {
                    return Err(TableError::not_found(entry));
                }
                self.routes.remove(&entry.destination);
                info!("[memory] route del {}", entry);
            }
        }
        Ok(())
    }
}

/// Decrements the in-flight counter even if the call is dropped mid-way.
struct InFlight<'a>(&'a Mutex<Inner>);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.lock().in_flight -= 1;
    }
}

/// Routing table kept in process memory.
#[derive(Default)]
pub struct MemoryRouteTable {
    inner: Mutex<Inner>,
}

impl MemoryRouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populates the table, as if routes had been installed earlier.
    pub fn with_routes(routes: impl IntoIterator<Item = RouteEntry>) -> Self {
        let table = Self::new();
        table.inner.lock().routes.extend(
            routes
                .into_iter()
                .map(|entry| (entry.destination, entry.gateway)),
        );
        table
    }

    /// Every call to `destination` fails with `message` until cleared.
    pub fn fail_destination(&self, destination: impl Into<String>, message: impl Into<String>) {
        self.inject(None, destination.into(), message.into());
    }

    /// Only `action` calls to `destination` fail until cleared.
    pub fn fail_action(
        &self,
        action: RouteAction,
        destination: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.inject(Some(action), destination.into(), message.into());
    }

    fn inject(&self, only: Option<RouteAction>, destination: String, message: String) {
        self.inner
            .lock()
            .failures
            .insert(destination, Failure { only, message });
    }

    pub fn clear_failure(&self, destination: &str) {
        self.inner.lock().failures.remove(destination);
    }

    /// Calls touching `destination` sleep for `delay` first.
    pub fn delay_destination(&self, destination: impl Into<String>, delay: Duration) {
        self.inner.lock().delays.insert(destination.into(), delay);
    }

    /// Currently installed routes, sorted by destination.
    pub fn routes(&self) -> Vec<RouteEntry> {
        self.inner
            .lock()
            .routes
            .iter()
            .map(|(destination, gateway)| RouteEntry::new(destination.clone(), gateway.clone()))
            .collect()
    }

    pub fn contains(&self, entry: &RouteEntry) -> bool {
        self.inner.lock().routes.get(&entry.destination) == Some(&entry.gateway)
    }

    /// Every add and delete received, in order, including failed ones.
    pub fn calls(&self) -> Vec<(RouteAction, RouteEntry)> {
        self.inner.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.inner.lock().calls.len()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().calls.clear();
    }

    /// Highest number of add/delete calls that were running at once.
    pub fn max_in_flight(&self) -> usize {
        self.inner.lock().max_in_flight
    }

    async fn apply(&self, action: RouteAction, entry: &RouteEntry) -> Result<(), TableError> {
        let delay = {
            let mut inner = self.inner.lock();
            inner.calls.push((action, entry.clone()));
            inner.in_flight += 1;
            inner.max_in_flight = inner.max_in_flight.max(inner.in_flight);
            inner.delays.get(&entry.destination).copied()
        };
        let _in_flight = InFlight(&self.inner);

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        // the lock guard has to go before `_in_flight` takes the lock again
        let result = self.inner.lock().mutate(action, entry);
        result
    }
}

#[async_trait]
impl RouteTable for MemoryRouteTable {
    async fn add(&self, entry: &RouteEntry) -> Result<(), TableError> {
        self.apply(RouteAction::Add, entry).await
    }

    async fn delete(&self, entry: &RouteEntry) -> Result<(), TableError> {
        self.apply(RouteAction::Delete, entry).await
    }

    async fn lookup(&self, destination: &str) -> Result<Option<String>, TableError> {
        Ok(self.inner.lock().routes.get(destination).cloned())
    }
}
