//! Selection of a usable guest address from agent-reported interfaces.

use std::net::Ipv4Addr;

use crate::control_plane::GuestInterface;

/// Returns the first IPv4 address that is neither loopback, link-local, nor
/// unspecified.
pub(crate) fn routable_ipv4(interfaces: &[GuestInterface]) -> Option<Ipv4Addr> {
    interfaces
        .iter()
        .flat_map(|interface| interface.ip_addresses.iter())
        .filter(|address| address.ip_address_type.eq_ignore_ascii_case("ipv4"))
        .filter_map(|address| address.ip_address.parse::<Ipv4Addr>().ok())
        .find(|ip| !ip.is_loopback() && !ip.is_link_local() && !ip.is_unspecified())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_plane::GuestIpAddress;
    use rstest::rstest;

    fn interface(name: &str, addresses: &[(&str, &str)]) -> GuestInterface {
        GuestInterface {
            name: name.to_owned(),
            hardware_address: None,
            ip_addresses: addresses
                .iter()
                .map(|(ip, family)| GuestIpAddress {
                    ip_address: (*ip).to_owned(),
                    ip_address_type: (*family).to_owned(),
                    prefix: None,
                })
                .collect(),
        }
    }

    #[rstest]
    #[case::skips_loopback(&[("127.0.0.1", "ipv4"), ("10.0.0.5", "ipv4")], Some("10.0.0.5"))]
    #[case::skips_link_local(&[("169.254.10.2", "ipv4"), ("192.168.1.20", "ipv4")], Some("192.168.1.20"))]
    #[case::skips_ipv6(&[("fe80::1", "ipv6"), ("2001:db8::5", "ipv6")], None)]
    #[case::accepts_uppercase_family(&[("10.1.2.3", "IPv4")], Some("10.1.2.3"))]
    #[case::nothing(&[], None)]
    fn picks_first_routable_ipv4(#[case] addresses: &[(&str, &str)], #[case] expected: Option<&str>) {
        let interfaces = vec![interface("lo", &[]), interface("eth0", addresses)];
        let found = routable_ipv4(&interfaces).map(|ip| ip.to_string());
        assert_eq!(found.as_deref(), expected);
    }
}
