//! Address validation and destination denial policy.

use staticroute_types::{IpAddress, IpNetwork};

use crate::error::RouteError;

/// Default-route CIDR; never managed by this controller.
pub const DEFAULT_ROUTE_CIDR: &str = "0.0.0.0/0";

/// Unspecified address; never a usable destination.
pub const UNSPECIFIED_ADDRESS: &str = "0.0.0.0";

/// Literal destination values refused regardless of syntax.
pub const DENIED_DESTINATIONS: [&str; 2] = [DEFAULT_ROUTE_CIDR, UNSPECIFIED_ADDRESS];

/// Validates destinations and gateways before they reach the routing table.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddressValidator;

impl AddressValidator {
    pub fn new() -> Self {
        Self
    }

    /// Returns true if `address` is a single IP address or a CIDR network.
    pub fn validate(&self, address: &str) -> bool {
        address.parse::<IpNetwork>().is_ok()
    }

    /// Returns true if `destination` is one of the denied sentinels, either
    /// literally or after parsing (`0.0.0.0/32`, `::/0`, ...).
    pub fn is_denied(&self, destination: &str) -> bool {
        let trimmed = destination.trim();
        if DENIED_DESTINATIONS.contains(&trimmed) {
            return true;
        }
        match trimmed.parse::<IpNetwork>() {
            Ok(network) => network.is_default() || network.is_unspecified_host(),
            Err(_) => false,
        }
    }

    /// Full destination check: denial policy, then syntax.
    pub fn check_destination(&self, destination: &str) -> Result<IpNetwork, RouteError> {
        if self.is_denied(destination) {
            return Err(RouteError::denied(destination));
        }
        destination
            .parse::<IpNetwork>()
            .map_err(|e| RouteError::invalid_address(destination, e.to_string()))
    }

    /// Gateways must be a single, specified host address.
    pub fn check_gateway(&self, gateway: &str) -> Result<IpAddress, RouteError> {
        let address: IpAddress = gateway
            .parse()
            .map_err(|e: staticroute_types::ParseError| {
                RouteError::invalid_address(gateway, e.to_string())
            })?;
        if address.is_unspecified() {
            return Err(RouteError::invalid_address(
                gateway,
                "unspecified address cannot be a gateway",
            ));
        }
        Ok(address)
    }
}
