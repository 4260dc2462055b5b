//! Next-hop selection with a single default route.

use super::netstack::IfaceConfig;
use super::types::{IfaceId, Ipv4Addr, NetError};

/// The one route the stack knows besides the directly attached subnets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DefaultRoute {
    pub iface: IfaceId,
    pub gateway: Ipv4Addr,
}

/// Pick the link-layer target for `dst` leaving through `iface`.
///
/// On-link destinations (same subnet as the interface address) and
/// broadcasts are reached directly; everything else goes through the default
/// gateway.
pub fn next_hop(
    iface: &IfaceConfig,
    route: Option<&DefaultRoute>,
    dst: Ipv4Addr,
) -> Result<Ipv4Addr, NetError> {
    if dst.is_broadcast() || iface.is_on_link(dst) {
        return Ok(dst);
    }
    match route {
        Some(route) if !route.gateway.is_unspecified() => Ok(route.gateway),
        _ => Err(NetError::NoRoute),
    }
}
