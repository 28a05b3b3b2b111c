use crate::{DnsName, DnsType};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::{Duration, Instant};

/// Typed RDATA of an answer record the resolver keeps.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AnswerData {
    A(Ipv4Addr),
    AAAA(Ipv6Addr),
    CNAME(DnsName),
    SRV {
        priority: u16,
        weight: u16,
        port: u16,
        target: DnsName,
    },
}

/// One deduplicated answer record, kept across responses.
///
/// `last_seen` is refreshed by every response carrying an equivalent record;
/// the obsolescence sweep evicts items that stop being refreshed.  `ar_item`
/// holds the A/AAAA glue record a nameserver sent along with an SRV answer;
/// it is owned exclusively by its parent and dropped with it.
#[derive(Clone, Debug)]
pub struct AnswerItem {
    pub name: DnsName,
    pub class: u16,
    pub ttl: u32,
    pub last_seen: Instant,
    pub data: AnswerData,
    pub ar_item: Option<Box<AnswerItem>>,
}
impl AnswerItem {
    #[must_use]
    pub fn new(name: DnsName, class: u16, ttl: u32, data: AnswerData, last_seen: Instant) -> Self {
        Self {
            name,
            class,
            ttl,
            last_seen,
            data,
            ar_item: None,
        }
    }

    #[must_use]
    pub fn rtype(&self) -> DnsType {
        match &self.data {
            AnswerData::A(_) => DnsType::A,
            AnswerData::AAAA(_) => DnsType::AAAA,
            AnswerData::CNAME(_) => DnsType::CNAME,
            AnswerData::SRV { .. } => DnsType::SRV,
        }
    }

    /// The record's address, for A and AAAA records.
    #[must_use]
    pub fn address(&self) -> Option<IpAddr> {
        match &self.data {
            AnswerData::A(addr) => Some(IpAddr::V4(*addr)),
            AnswerData::AAAA(addr) => Some(IpAddr::V6(*addr)),
            AnswerData::CNAME(_) | AnswerData::SRV { .. } => None,
        }
    }

    /// The deduplication rule: two A/AAAA records are equivalent when they
    /// carry the same address, two SRV records when they aim the same
    /// `(target, port)`.  CNAME records are never deduplicated.
    #[must_use]
    pub fn equivalent(&self, other: &AnswerItem) -> bool {
        match (&self.data, &other.data) {
            (AnswerData::A(a), AnswerData::A(b)) => a == b,
            (AnswerData::AAAA(a), AnswerData::AAAA(b)) => a == b,
            (
                AnswerData::SRV { port: a_port, target: a_target, .. },
                AnswerData::SRV { port: b_port, target: b_target, .. },
            ) => a_port == b_port && a_target.eq_ignore_case(b_target),
            _ => false,
        }
    }

    /// Whether the record has outlived `hold` without being refreshed.
    #[must_use]
    pub fn is_obsolete(&self, hold: Duration, now: Instant) -> bool {
        self.last_seen + hold < now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn a(name: &str, addr: [u8; 4]) -> AnswerItem {
        AnswerItem::new(
            DnsName::new(name).unwrap(),
            crate::INTERNET_CLASS,
            300,
            AnswerData::A(Ipv4Addr::from(addr)),
            Instant::now(),
        )
    }

    fn srv(target: &str, port: u16, weight: u16) -> AnswerItem {
        AnswerItem::new(
            DnsName::new("_http._tcp.example").unwrap(),
            crate::INTERNET_CLASS,
            300,
            AnswerData::SRV {
                priority: 10,
                weight,
                port,
                target: DnsName::new(target).unwrap(),
            },
            Instant::now(),
        )
    }

    #[test]
    fn test_equivalent_addresses() {
        assert!(a("x.example", [1, 2, 3, 4]).equivalent(&a("y.example", [1, 2, 3, 4])));
        assert!(!a("x.example", [1, 2, 3, 4]).equivalent(&a("x.example", [1, 2, 3, 5])));
        let aaaa = AnswerItem::new(
            DnsName::new("x.example").unwrap(),
            crate::INTERNET_CLASS,
            300,
            AnswerData::AAAA(Ipv6Addr::LOCALHOST),
            Instant::now(),
        );
        assert!(!a("x.example", [0, 0, 0, 1]).equivalent(&aaaa));
        assert!(aaaa.equivalent(&aaaa.clone()));
    }

    #[test]
    fn test_equivalent_srv() {
        assert!(srv("b1.example", 80, 5).equivalent(&srv("B1.EXAMPLE", 80, 9)));
        assert!(!srv("b1.example", 80, 5).equivalent(&srv("b1.example", 81, 5)));
        assert!(!srv("b1.example", 80, 5).equivalent(&srv("b2.example", 80, 5)));
    }

    #[test]
    fn test_cname_never_deduplicated() {
        let cname = AnswerItem::new(
            DnsName::new("alias.example").unwrap(),
            crate::INTERNET_CLASS,
            300,
            AnswerData::CNAME(DnsName::new("real.example").unwrap()),
            Instant::now(),
        );
        assert!(!cname.equivalent(&cname.clone()));
    }

    #[test]
    fn test_obsolete() {
        let item = a("x.example", [1, 2, 3, 4]);
        let hold = Duration::from_secs(5);
        assert!(!item.is_obsolete(hold, item.last_seen + Duration::from_secs(5)));
        assert!(item.is_obsolete(hold, item.last_seen + Duration::from_secs(6)));
    }
}
