//! Node identity derivation
//!
//! The crawler joins the network with an identifier bound to its /24
//! subnet and the current hour, so restarts within the same hour reuse
//! the same identity while a host cannot mint arbitrary identifiers.

use dhtscope_core::{unix_now, NodeId, ID_SIZE};
use sha1_smol::Sha1;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// Derive the node identity for this host and the current hour
pub fn derive_node_id() -> NodeId {
    let ip = local_ipv4();
    let hour = unix_now() / 3_600;
    let id = derive_node_id_for(ip, hour);
    tracing::debug!("Derived node id {} from {} (hour bucket {})", id, ip, hour);
    id
}

/// Deterministic core of [`derive_node_id`]
pub fn derive_node_id_for(ip: Ipv4Addr, hour_bucket: u64) -> NodeId {
    let octets = ip.octets();
    let salt = Sha1::from(ip.to_string()).digest().bytes();

    let mut input = Vec::with_capacity(11);
    input.extend_from_slice(&octets[..3]);
    input.extend_from_slice(&(hour_bucket as u32).to_be_bytes());
    input.extend_from_slice(&salt[..4]);

    let digest = Sha1::from(&input).digest().bytes();

    // Marker position embedded by the first digest byte
    let rand = (digest[0] as usize) % ID_SIZE;
    let mut id = [0u8; ID_SIZE];
    id[..rand].copy_from_slice(&digest[..rand]);
    id[rand..].copy_from_slice(&digest[rand..]);

    NodeId(id)
}

/// Outbound IPv4 address of this host, or 127.0.0.1
///
/// Prefers the source address of the default route. Hosts without one
/// fall back to the first non-loopback interface address.
pub fn local_ipv4() -> Ipv4Addr {
    route_source_ipv4()
        .or_else(first_interface_ipv4)
        .unwrap_or_else(|| {
            tracing::debug!("No routable IPv4 address, using loopback");
            Ipv4Addr::LOCALHOST
        })
}

/// Connecting a UDP socket only selects a route; nothing is sent.
fn route_source_ipv4() -> Option<Ipv4Addr> {
    let probe = UdpSocket::bind("0.0.0.0:0").and_then(|socket| {
        socket.connect("8.8.8.8:53")?;
        socket.local_addr()
    });

    match probe {
        Ok(addr) => first_routable([addr.ip()]),
        Err(e) => {
            tracing::debug!("No default route: {}", e);
            None
        }
    }
}

fn first_interface_ipv4() -> Option<Ipv4Addr> {
    match if_addrs::get_if_addrs() {
        Ok(interfaces) => first_routable(interfaces.iter().map(|iface| iface.ip())),
        Err(e) => {
            tracing::debug!("Failed to list network interfaces: {}", e);
            None
        }
    }
}

fn first_routable(addrs: impl IntoIterator<Item = IpAddr>) -> Option<Ipv4Addr> {
    addrs.into_iter().find_map(|ip| match ip {
        IpAddr::V4(ip) if !ip.is_loopback() && !ip.is_unspecified() => Some(ip),
        _ => None,
    })
}
