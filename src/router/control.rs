//! Control-plane packet payloads.
//!
//! Route and service state travel inside the `data` field of packets whose
//! `net_state` discriminator is set. The layouts are part of the wire
//! contract:
//!
//! ```text
//! NET_ROUTE   src_addr = advertiser, data = [len][address][cost:u16]
//! NET_SERVICE data = [len][host address][len][service][capacity:u16]
//! NET_QUERY   no payload
//! ```
//!
//! A route's next hop is implicit: it is the advertiser named in
//! `src_addr`, since the advertiser is the neighbor the packet came from.

use bytes::BufMut;

use crate::core::packet::{Address, NetState, Packet};
use crate::error::{MeshError, Result};

/// Request a neighbor's full route and service tables.
pub fn net_query_packet() -> Packet {
    Packet {
        net_state: Some(NetState::Query),
        ..Default::default()
    }
}

/// Advertise (or with `cost == 0`, withdraw) a route to `address`.
pub fn route_share_packet(advertiser: &Address, address: &Address, cost: u16) -> Packet {
    let mut data = Vec::with_capacity(address.len() + 3);
    data.put_u8(address.len() as u8);
    data.put_slice(address.as_bytes());
    data.put_u16(cost);
    Packet {
        net_state: Some(NetState::Route),
        src_addr: advertiser.clone(),
        data,
        ..Default::default()
    }
}

/// Extract `(remote_address, next_hop, cost)` from a NET_ROUTE packet.
pub fn parse_route_share(packet: &Packet) -> Result<(Address, Address, u16)> {
    if packet.net_state != Some(NetState::Route) {
        return Err(MeshError::InvalidPacket("not a route share packet"));
    }
    let data = &packet.data;
    let Some(&len) = data.first() else {
        return Err(MeshError::InvalidPacket("route share payload is empty"));
    };
    let len = len as usize;
    if data.len() != len + 3 {
        return Err(MeshError::InvalidPacket("route share length mismatch"));
    }
    let address = std::str::from_utf8(&data[1..1 + len])
        .map_err(|_| MeshError::InvalidPacket("route share address is not utf-8"))?
        .to_string();
    let cost = u16::from_be_bytes([data[1 + len], data[2 + len]]);
    Ok((address, packet.src_addr.clone(), cost))
}

/// Advertise (or with `capacity == 0`, retract) `service` at `host`.
pub fn service_share_packet(host: &Address, service: &str, capacity: u16) -> Packet {
    let mut data = Vec::with_capacity(host.len() + service.len() + 4);
    data.put_u8(host.len() as u8);
    data.put_slice(host.as_bytes());
    data.put_u8(service.len() as u8);
    data.put_slice(service.as_bytes());
    data.put_u16(capacity);
    Packet {
        net_state: Some(NetState::Service),
        data,
        ..Default::default()
    }
}

/// Extract `(host_address, service, capacity)` from a NET_SERVICE packet.
pub fn parse_service_share(packet: &Packet) -> Result<(Address, String, u16)> {
    if packet.net_state != Some(NetState::Service) {
        return Err(MeshError::InvalidPacket("not a service share packet"));
    }
    let data = &packet.data;
    if data.len() < 4 {
        return Err(MeshError::InvalidPacket("service share payload too small"));
    }
    let addr_len = data[0] as usize;
    let service_at = 1 + addr_len;
    let Some(&service_len) = data.get(service_at) else {
        return Err(MeshError::InvalidPacket("service share truncated"));
    };
    let service_len = service_len as usize;
    if data.len() != service_at + 1 + service_len + 2 {
        return Err(MeshError::InvalidPacket("service share length mismatch"));
    }
    let host = std::str::from_utf8(&data[1..service_at])
        .map_err(|_| MeshError::InvalidPacket("service share host is not utf-8"))?
        .to_string();
    let service = std::str::from_utf8(&data[service_at + 1..service_at + 1 + service_len])
        .map_err(|_| MeshError::InvalidPacket("service share name is not utf-8"))?
        .to_string();
    let at = service_at + 1 + service_len;
    let capacity = u16::from_be_bytes([data[at], data[at + 1]]);
    Ok((host, service, capacity))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_share_roundtrip() {
        let packet = route_share_packet(&"advertiser".to_string(), &"far-node".to_string(), 4);
        let (address, next_hop, cost) = parse_route_share(&packet).unwrap();
        assert_eq!(address, "far-node");
        assert_eq!(next_hop, "advertiser");
        assert_eq!(cost, 4);
    }

    #[test]
    fn route_share_survives_the_wire() {
        let packet = route_share_packet(&"a".to_string(), &"b".to_string(), 0);
        let decoded = Packet::decode(&packet.encode().unwrap()).unwrap();
        let (address, next_hop, cost) = parse_route_share(&decoded).unwrap();
        assert_eq!((address.as_str(), next_hop.as_str(), cost), ("b", "a", 0));
    }

    #[test]
    fn service_share_roundtrip() {
        let packet = service_share_packet(&"host-1".to_string(), "ping", 7);
        let (host, service, capacity) = parse_service_share(&packet).unwrap();
        assert_eq!(host, "host-1");
        assert_eq!(service, "ping");
        assert_eq!(capacity, 7);
    }

    #[test]
    fn malformed_payloads_rejected() {
        let mut packet = route_share_packet(&"a".to_string(), &"b".to_string(), 1);
        packet.data.truncate(2);
        assert!(parse_route_share(&packet).is_err());

        let mut packet = service_share_packet(&"h".to_string(), "svc", 1);
        packet.data[0] = 200; // host length pointing past the payload
        assert!(parse_service_share(&packet).is_err());

        assert!(parse_route_share(&net_query_packet()).is_err());
        assert!(parse_service_share(&net_query_packet()).is_err());
    }
}
