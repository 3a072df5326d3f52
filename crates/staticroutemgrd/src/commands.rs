//! Shell command builders for route operations

use staticroute_common::shell;

use crate::types::RouteEntry;

/// Build route creation command
pub fn build_add_route_cmd(entry: &RouteEntry) -> String {
    format!(
        "{} {}route add {} via {}",
        shell::IP_CMD,
        family_flag(&entry.destination),
        shell::shellquote(&entry.destination),
        shell::shellquote(&entry.gateway)
    )
}

/// Build route deletion command
pub fn build_del_route_cmd(entry: &RouteEntry) -> String {
    format!(
        "{} {}route del {} via {}",
        shell::IP_CMD,
        family_flag(&entry.destination),
        shell::shellquote(&entry.destination),
        shell::shellquote(&entry.gateway)
    )
}

/// Build the command listing the route installed for exactly `destination`
pub fn build_show_route_cmd(destination: &str) -> String {
    format!(
        "{} {}route show exact {}",
        shell::IP_CMD,
        family_flag(destination),
        shell::shellquote(destination)
    )
}

fn family_flag(destination: &str) -> &'static str {
    if destination.contains(':') {
        "-6 "
    } else {
        ""
    }
}
