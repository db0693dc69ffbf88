use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Parse an IP literal, ignoring any `%zone` suffix.
pub fn parse_addr(addr: &str) -> Option<IpAddr> {
    let bare = addr.split('%').next().unwrap_or(addr);
    bare.parse().ok()
}

/// Whether `addr` is in a private, loopback, link-local or otherwise
/// reserved range. Strings that are not IP literals are never private.
pub fn is_private(addr: &str) -> bool {
    parse_addr(addr).map_or(false, is_private_ip)
}

pub fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_private_v4(v4),
            None => is_private_v6(v6),
        },
    }
}

fn is_private_v4(ip: Ipv4Addr) -> bool {
    let [a, b, _, _] = ip.octets();
    a == 10
        || (a == 172 && (16..=31).contains(&b))
        || (a == 192 && b == 168)
        || a == 127
        || (a == 169 && b == 254)
        || ip.is_unspecified()
}

fn is_private_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || first & 0xffc0 == 0xfe80 // fe80::/10
        || first & 0xfe00 == 0xfc00 // fc00::/7, includes fd00::/8
        || first & 0xff00 == 0xff00 // ff00::/8
}
