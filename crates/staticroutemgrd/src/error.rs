//! Error types for staticroutemgrd

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::resolver::ResolveError;
use crate::status::reasons;
use crate::table::TableError;
use crate::types::RouteAction;

/// Result type for daemon-level operations
pub type Result<T> = std::result::Result<T, MgrError>;

/// Rejections raised while ingesting a resource spec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecError {
    #[error("exactly one of gateway or clusterService must be set, got both")]
    ConflictingGateway,

    #[error("exactly one of gateway or clusterService must be set, got neither")]
    MissingGateway,

    #[error("spec lists no destinations")]
    NoDestinations,

    #[error("spec contains an empty destination")]
    EmptyDestination,
}

/// Per-destination failure taxonomy.
///
/// Every variant is local to the destination it concerns, except
/// `GatewayResolutionFailed`, which fails the whole invocation.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("invalid address '{address}': {message}")]
    InvalidAddress { address: String, message: String },

    #[error("destination '{destination}' is denied by policy")]
    DeniedDestination { destination: String },

    #[error("failed to resolve gateway from {source_ref}: {source}")]
    GatewayResolutionFailed {
        source_ref: String,
        #[source]
        source: ResolveError,
    },

    #[error("{source}")]
    TableOperationFailed {
        action: RouteAction,
        #[source]
        source: TableError,
    },
}

impl RouteError {
    pub fn invalid_address(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
            message: message.into(),
        }
    }

    pub fn denied(destination: impl Into<String>) -> Self {
        Self::DeniedDestination {
            destination: destination.into(),
        }
    }

    /// Event reason code for this failure.
    pub fn reason(&self) -> &'static str {
        match self {
            RouteError::InvalidAddress { .. } => reasons::INVALID_ADDRESS,
            RouteError::DeniedDestination { .. } => reasons::DENIED_DESTINATION,
            RouteError::GatewayResolutionFailed { .. } => reasons::GATEWAY_RESOLUTION_FAILED,
            RouteError::TableOperationFailed { action, .. } => match action {
                RouteAction::Add => reasons::ROUTE_CREATE_FAILED,
                RouteAction::Delete => reasons::ROUTE_DELETE_FAILED,
            },
        }
    }

    /// True if retrying the same input could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            RouteError::InvalidAddress { .. } | RouteError::DeniedDestination { .. } => false,
            RouteError::GatewayResolutionFailed { source, .. } => source.is_retryable(),
            RouteError::TableOperationFailed { source, .. } => source.is_retryable(),
        }
    }
}

/// Daemon-level errors (configuration, manifests, IO).
#[derive(Debug, Error)]
pub enum MgrError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse manifest {path}: {message}")]
    Manifest { path: PathBuf, message: String },

    #[error("Invalid spec for {resource}: {source}")]
    Spec {
        resource: String,
        #[source]
        source: SpecError,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl MgrError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn manifest(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Manifest {
            path: path.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_error_reasons() {
        assert_eq!(
            RouteError::invalid_address("999.0.0.1", "bad octet").reason(),
            "InvalidAddress"
        );
        assert_eq!(RouteError::denied("0.0.0.0/0").reason(), "DeniedDestination");

        let failed = RouteError::TableOperationFailed {
            action: RouteAction::Delete,
            source: TableError::rejected("10.1.0.0/24 via 10.0.2.1", "Operation not permitted"),
        };
        assert_eq!(failed.reason(), "RouteDeleteFailed");
        assert_eq!(
            failed.to_string(),
            "route 10.1.0.0/24 via 10.0.2.1 rejected: Operation not permitted"
        );
        assert!(failed.is_retryable());
    }

    #[test]
    fn test_resolution_failure_retryability() {
        let unknown = RouteError::GatewayResolutionFailed {
            source_ref: "service/egress".to_string(),
            source: ResolveError::unknown("egress"),
        };
        assert!(!unknown.is_retryable());

        let no_address = RouteError::GatewayResolutionFailed {
            source_ref: "service/egress".to_string(),
            source: ResolveError::NoAddress {
                fqdn: "egress.default.svc.cluster.local".to_string(),
            },
        };
        assert!(no_address.is_retryable());
    }

    #[test]
    fn test_route_error_display() {
        let err = RouteError::denied("0.0.0.0");
        assert_eq!(err.to_string(), "destination '0.0.0.0' is denied by policy");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_mgr_error_display() {
        let err = MgrError::config("poll_interval_secs must be > 0");
        assert_eq!(
            err.to_string(),
            "Configuration error: poll_interval_secs must be > 0"
        );

        let err = MgrError::Spec {
            resource: "sr-1".to_string(),
            source: SpecError::MissingGateway,
        };
        assert!(err.to_string().starts_with("Invalid spec for sr-1"));
    }
}
