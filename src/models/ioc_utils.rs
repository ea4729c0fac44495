//! Helpers for classifying and filtering IOC values

use std::net::{IpAddr, Ipv4Addr};

use crate::models::IocKind;

/// Determine the kind of an IOC from its format: a valid IPv4 literal is
/// an IP, everything else is treated as a domain.
pub fn ioc_kind_of(value: &str) -> IocKind {
    if value.trim().parse::<Ipv4Addr>().is_ok() {
        IocKind::Ip
    } else {
        IocKind::Domain
    }
}

/// Check whether an address is globally routable.
///
/// Loopback, private, multicast, link-local, broadcast, documentation and
/// reserved ranges are all rejected; honeypot traffic from those is noise
/// from the local network, not an attacker.
pub fn is_global_address(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => is_global_ipv4(v4),
        IpAddr::V6(v6) => {
            !(v6.is_loopback() || v6.is_multicast() || v6.is_unspecified() || is_unique_local(v6))
        }
    }
}

fn is_global_ipv4(addr: &Ipv4Addr) -> bool {
    let octets = addr.octets();
    !(addr.is_loopback()
        || addr.is_private()
        || addr.is_multicast()
        || addr.is_link_local()
        || addr.is_broadcast()
        || addr.is_documentation()
        || addr.is_unspecified()
        // 100.64.0.0/10 shared address space
        || (octets[0] == 100 && (octets[1] & 0xc0) == 64)
        // 240.0.0.0/4 reserved
        || octets[0] >= 240)
}

fn is_unique_local(addr: &std::net::Ipv6Addr) -> bool {
    (addr.segments()[0] & 0xfe00) == 0xfc00
}

/// Parse and validate a source address, returning it only if it is a
/// globally routable IP.
pub fn parse_global_ip(value: &str) -> Option<IpAddr> {
    let addr: IpAddr = value.trim().parse().ok()?;
    is_global_address(&addr).then_some(addr)
}

/// Correct an IP reputation against the mass-scanner reference set.
///
/// Honeypot feeds occasionally flag well-known mass scanners as
/// "known attacker"; the reference set overrides that label.
pub fn correct_ip_reputation(
    ip: &str,
    reputation: &str,
    mass_scanners: &std::collections::HashSet<String>,
) -> String {
    if (reputation.is_empty() || reputation == "known attacker") && mass_scanners.contains(ip) {
        return "mass scanner".to_string();
    }
    reputation.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn kind_detection() {
        assert_eq!(ioc_kind_of("8.8.8.8"), IocKind::Ip);
        assert_eq!(ioc_kind_of(" 1.2.3.4 "), IocKind::Ip);
        assert_eq!(ioc_kind_of("evil.example.com"), IocKind::Domain);
        assert_eq!(ioc_kind_of("999.1.1.1"), IocKind::Domain);
    }

    #[test]
    fn non_global_addresses_are_rejected() {
        for bad in [
            "127.0.0.1",
            "10.0.0.5",
            "172.16.3.4",
            "192.168.1.1",
            "224.0.0.1",
            "169.254.0.9",
            "255.255.255.255",
            "0.0.0.0",
            "100.64.0.1",
            "240.0.0.1",
            "::1",
            "fc00::1",
        ] {
            assert!(parse_global_ip(bad).is_none(), "{bad} should be rejected");
        }
    }

    #[test]
    fn global_addresses_pass() {
        for good in ["8.8.8.8", "185.220.101.4", "2001:4860:4860::8888"] {
            assert!(parse_global_ip(good).is_some(), "{good} should pass");
        }
    }

    #[test]
    fn reputation_correction() {
        let scanners: HashSet<String> = ["71.6.135.131".to_string()].into_iter().collect();
        assert_eq!(
            correct_ip_reputation("71.6.135.131", "known attacker", &scanners),
            "mass scanner"
        );
        assert_eq!(
            correct_ip_reputation("71.6.135.131", "", &scanners),
            "mass scanner"
        );
        // already labeled with something else: keep it
        assert_eq!(
            correct_ip_reputation("71.6.135.131", "tor exit node", &scanners),
            "tor exit node"
        );
        // not in the reference set: keep the original label
        assert_eq!(
            correct_ip_reputation("9.9.9.9", "known attacker", &scanners),
            "known attacker"
        );
    }
}
