/// > TYPE fields are used in resource records.  Note that these types are a subset of QTYPEs.
///
/// <https://datatracker.ietf.org/doc/html/rfc1035#section-3.2.2>
///
/// > A record type is defined to store a host's IPv6 address.  A host that has more than one
/// > IPv6 address must have more than one such record.
///
/// <https://datatracker.ietf.org/doc/html/rfc3596#section-2>
///
/// > SRV is a DNS RR that specifies the location of the server(s) for a specific protocol and
/// > domain.
///
/// <https://datatracker.ietf.org/doc/html/rfc2782>
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DnsType {
    /// IPv4 address
    A,
    /// IPv6 address
    AAAA,
    /// The canonical name for an alias
    CNAME,
    /// Server selection: priority, weight, port and target
    SRV,
    /// EDNS pseudo-record advertising the accepted UDP payload size
    OPT,
    Unknown(u16),
}
impl DnsType {
    #[must_use]
    pub fn new(value: u16) -> Self {
        match value {
            1 => DnsType::A,
            28 => DnsType::AAAA,
            5 => DnsType::CNAME,
            33 => DnsType::SRV,
            41 => DnsType::OPT,
            other => DnsType::Unknown(other),
        }
    }

    #[must_use]
    pub fn num(&self) -> u16 {
        match self {
            DnsType::A => 1,
            DnsType::AAAA => 28,
            DnsType::CNAME => 5,
            DnsType::SRV => 33,
            DnsType::OPT => 41,
            DnsType::Unknown(other) => *other,
        }
    }
}

#[cfg(test)]
#[test]
fn test_dns_type() {
    for num in [1_u16, 5, 28, 33, 41, 999] {
        assert_eq!(num, DnsType::new(num).num());
    }
    assert_eq!(DnsType::A, DnsType::new(1));
    assert_eq!(DnsType::AAAA, DnsType::new(28));
    assert_eq!(DnsType::CNAME, DnsType::new(5));
    assert_eq!(DnsType::SRV, DnsType::new(33));
    assert_eq!(DnsType::OPT, DnsType::new(41));
    assert_eq!(DnsType::Unknown(999), DnsType::new(999));
}
