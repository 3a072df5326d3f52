//! Common network types for the static route controller.
//!
//! This crate provides type-safe representations of the addresses a route
//! is built from:
//!
//! - [`IpAddress`]: IPv4 and IPv6 addresses
//! - [`IpPrefix`]: IP prefixes (CIDR notation), host bits allowed
//! - [`IpNetwork`]: strictly parsed networks (bare host or aligned CIDR)

mod ip;

pub use ip::{IpAddress, IpNetwork, IpPrefix};

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid IP address format: {0}")]
    InvalidIpAddress(String),

    #[error("invalid IP prefix format: {0}")]
    InvalidIpPrefix(String),

    #[error("network {0} has host bits set")]
    HostBitsSet(String),
}
