// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Shared validation utilities for configuration and control commands.

use std::net::Ipv4Addr;

use crate::protocols::msdp::is_valid_source;

/// Result type for validation functions
pub type ValidationResult = Result<(), String>;

/// Check if an IPv4 address is a valid unicast address.
///
/// Returns `false` for multicast, broadcast, and unspecified (0.0.0.0) addresses.
#[inline]
pub fn is_valid_unicast(addr: Ipv4Addr) -> bool {
    !addr.is_multicast() && !addr.is_broadcast() && !addr.is_unspecified()
}

/// Validate that an IPv4 address is a valid unicast address.
///
/// `context` names what the address is (e.g. "router_id", "peer address").
pub fn validate_unicast_address(addr: Ipv4Addr, context: &str) -> ValidationResult {
    if is_valid_unicast(addr) {
        Ok(())
    } else {
        Err(format!(
            "{} must be a valid unicast address, got {}",
            context, addr
        ))
    }
}

/// Validate a multicast group address.
///
/// Link-local groups (224.0.0.0/24) are never announced and are rejected.
pub fn validate_multicast_group(group: Ipv4Addr, context: &str) -> ValidationResult {
    if !group.is_multicast() {
        return Err(format!(
            "{} must be a multicast address, got {}",
            context, group
        ));
    }
    if group.octets()[..3] == [224, 0, 0] {
        return Err(format!(
            "{} {} is link-local and cannot be announced",
            context, group
        ));
    }
    Ok(())
}

/// Validate a (source, group) pair before it enters the SA database.
pub fn validate_source_group(source: Ipv4Addr, group: Ipv4Addr) -> ValidationResult {
    if !is_valid_source(source) {
        return Err(format!("{} is not a valid multicast source", source));
    }
    validate_multicast_group(group, "group")
}

/// Validate a port number.
///
/// Port 0 is rejected as it typically indicates a configuration error.
pub fn validate_port(port: u16, context: &str) -> ValidationResult {
    if port == 0 {
        return Err(format!(
            "{} cannot be 0; valid port range is 1-65535",
            context
        ));
    }
    Ok(())
}
