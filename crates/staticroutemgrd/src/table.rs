//! Routing table capability and the `ip route` implementation.

use std::time::Duration;

use async_trait::async_trait;
use staticroute_common::{shell, ShellError};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::commands::{build_add_route_cmd, build_del_route_cmd, build_show_route_cmd};
use crate::types::RouteEntry;

/// Errors returned by a [`RouteTable`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    /// A route for the destination prefix is already installed, whatever
    /// its gateway
    #[error("route {entry} already exists")]
    Exists { entry: String },

    /// The prefix is routed through another next hop
    #[error("route {entry} conflicts with the installed route (next hop {installed})")]
    Conflict { entry: String, installed: String },

    /// The route is not installed
    #[error("route {entry} not found")]
    NotFound { entry: String },

    /// The kernel (or the adapter) refused the change
    #[error("route {entry} rejected: {message}")]
    Rejected { entry: String, message: String },

    /// The call did not return in time
    #[error("route {entry} timed out after {}ms", timeout.as_millis())]
    Timeout { entry: String, timeout: Duration },

    /// The table itself could not be reached (e.g. `ip` failed to start)
    #[error("route {entry} not applied, table unavailable: {message}")]
    Unavailable { entry: String, message: String },
}

impl TableError {
    pub fn exists(entry: &RouteEntry) -> Self {
        Self::Exists {
            entry: entry.to_string(),
        }
    }

    pub fn not_found(entry: &RouteEntry) -> Self {
        Self::NotFound {
            entry: entry.to_string(),
        }
    }

    pub fn conflict(entry: &RouteEntry, installed: impl Into<String>) -> Self {
        Self::Conflict {
            entry: entry.to_string(),
            installed: installed.into(),
        }
    }

    pub fn rejected(entry: impl ToString, message: impl Into<String>) -> Self {
        Self::Rejected {
            entry: entry.to_string(),
            message: message.into(),
        }
    }

    pub fn timeout(entry: &RouteEntry, timeout: Duration) -> Self {
        Self::Timeout {
            entry: entry.to_string(),
            timeout,
        }
    }

    /// Maps a failed `ip route` invocation onto the table error taxonomy.
    pub fn from_shell(entry: &RouteEntry, err: ShellError) -> Self {
        let output = err.output();
        match &err {
            ShellError::Timeout { timeout, .. } => Self::timeout(entry, *timeout),
            ShellError::CommandFailed { .. } if output.contains("File exists") => Self::exists(entry),
            ShellError::CommandFailed { .. } if output.contains("No such process") => {
                Self::not_found(entry)
            }
            ShellError::CommandFailed { .. } => Self::rejected(entry, output),
            ShellError::Spawn { .. } => Self::Unavailable {
                entry: entry.to_string(),
                message: err.to_string(),
            },
        }
    }

    /// True if retrying the same call could succeed.
    ///
    /// A conflict clears once the other route goes away, which is what a
    /// failed delete under the previous gateway looks like.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TableError::Timeout { .. } | TableError::Rejected { .. } | TableError::Conflict { .. }
        )
    }
}

/// The kernel routing table, as seen by the reconciler.
///
/// The table holds at most one route per destination prefix. Each call is
/// independently atomic. Adding a prefix that is already routed returns
/// [`TableError::Exists`] even when the installed gateway differs; deleting
/// a route that is not installed with that gateway returns
/// [`TableError::NotFound`].
#[async_trait]
pub trait RouteTable: Send + Sync {
    /// Installs `entry`.
    async fn add(&self, entry: &RouteEntry) -> Result<(), TableError>;

    /// Removes `entry`.
    async fn delete(&self, entry: &RouteEntry) -> Result<(), TableError>;

    /// Next hop of the route installed for `destination`, if any.
    async fn lookup(&self, destination: &str) -> Result<Option<String>, TableError>;
}

/// Routing table driven through `/sbin/ip route`.
///
/// Every call spawns its own `ip` process, killed if the call is dropped.
#[derive(Debug, Clone)]
pub struct IpRouteTable {
    command_timeout: Duration,
}

impl IpRouteTable {
    pub fn new(command_timeout: Duration) -> Self {
        Self { command_timeout }
    }

    async fn run(&self, entry: &RouteEntry, cmd: &str) -> Result<String, TableError> {
        shell::exec_with_timeout(cmd, self.command_timeout)
            .await
            .map_err(|e| TableError::from_shell(entry, e))
    }
}

/// Next hop of the first route in `ip route show` output: the `via` address,
/// or `dev <name>` for a directly connected route.
fn next_hop(output: &str) -> Option<String> {
    let line = output.lines().map(str::trim).find(|l| !l.is_empty())?;
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let after = |key: &str| {
        tokens
            .iter()
            .position(|t| *t == key)
            .and_then(|i| tokens.get(i + 1))
    };

    let hop = match (after("via"), after("dev")) {
        (Some(gateway), _) => gateway.to_string(),
        (None, Some(dev)) => format!("dev {}", dev),
        (None, None) => line.to_string(),
    };
    Some(hop)
}

#[async_trait]
impl RouteTable for IpRouteTable {
    #[instrument(skip(self), fields(route = %entry))]
    async fn add(&self, entry: &RouteEntry) -> Result<(), TableError> {
        let cmd = build_add_route_cmd(entry);
        self.run(entry, &cmd).await?;
        debug!("Installed route {}", entry);
        Ok(())
    }

    #[instrument(skip(self), fields(route = %entry))]
    async fn delete(&self, entry: &RouteEntry) -> Result<(), TableError> {
        let cmd = build_del_route_cmd(entry);
        self.run(entry, &cmd).await?;
        debug!("Removed route {}", entry);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn lookup(&self, destination: &str) -> Result<Option<String>, TableError> {
        let cmd = build_show_route_cmd(destination);
        let entry = RouteEntry::new(destination, "");
        let output = self.run(&entry, &cmd).await?;
        Ok(next_hop(&output))
    }
}
