//! Static route controller
//!
//! Reconciles declarative `StaticRoute` resources (destination subnets plus a
//! gateway or a cluster service) against the Linux kernel routing table.
//!
//! The reconciler diffs the previous and the new generation of a resource,
//! applies the minimal set of `ip route` additions and deletions and reports
//! a Ready/NotReady status per destination.

pub mod commands;
pub mod config;
pub mod diff;
pub mod dispatcher;
pub mod error;
pub mod memory;
pub mod reconciler;
pub mod resolver;
pub mod source;
pub mod status;
pub mod table;
pub mod types;
pub mod validator;

pub use config::StaticRouteConfig;
pub use diff::{diff, DiffResult};
pub use dispatcher::{Dispatcher, DispatcherConfig, Observation, RouteEvent};
pub use error::{MgrError, Result, RouteError, SpecError};
pub use memory::MemoryRouteTable;
pub use reconciler::{ReconcileRequest, RouteReconciler};
pub use resolver::{ClusterDnsResolver, ResolveError, ServiceResolver, StaticServiceResolver};
pub use source::ManifestSource;
pub use status::{EventKind, StatusReporter, StatusStore};
pub use table::{IpRouteTable, RouteTable, TableError};
pub use types::*;
pub use validator::AddressValidator;
