use crate::{DnsName, DnsResponse, DnsType, RequesterOwner};
use std::collections::BTreeMap;
use std::time::Instant;

/// Where a resolution currently sits: idle or cached on the wait list, or
/// with a query in flight on the active list.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResolutionStep {
    None,
    Running,
}

/// Last known outcome of a resolution.  `Valid` means the answer set is
/// usable; the error variants reflect the final classification of the last
/// attempt.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ResolutionStatus {
    None,
    Valid,
    Invalid,
    Nx,
    Refused,
    Timeout,
    Other,
}

/// One logical hostname lookup, shared by every requester that asked for the
/// same `(name, query type)` pair.
///
/// A resolution always sits on exactly one of its section's two lists: it is
/// `Running` with its query id indexed while on the active list, and back to
/// `None` on the wait list after every terminal outcome.
#[derive(Debug)]
pub struct Resolution {
    pub uuid: u32,
    /// The queried name, adopted from the requester currently driving the
    /// resolution.  A resolution without a name never runs.
    pub hostname_dn: Option<DnsName>,
    pub prefered_query_type: DnsType,
    /// Type of the current attempt; differs from the preferred type while a
    /// family fallback is in flight.
    pub query_type: DnsType,
    pub step: ResolutionStep,
    pub status: ResolutionStatus,
    /// Remaining attempts in the current run.
    pub try_count: u8,
    pub query_id: Option<u16>,
    pub last_query: Option<Instant>,
    pub last_resolution: Option<Instant>,
    pub last_valid: Instant,
    /// Queries sent and responses received for the current attempt.
    pub nb_queries: usize,
    pub nb_responses: usize,
    pub requesters: Vec<RequesterOwner>,
    pub response: DnsResponse,
}
impl Resolution {
    #[must_use]
    pub fn new(uuid: u32, hostname_dn: Option<DnsName>, query_type: DnsType, now: Instant) -> Self {
        Self {
            uuid,
            hostname_dn,
            prefered_query_type: query_type,
            query_type,
            step: ResolutionStep::None,
            status: ResolutionStatus::None,
            try_count: 0,
            query_id: None,
            last_query: None,
            last_resolution: None,
            last_valid: now,
            nb_queries: 0,
            nb_responses: 0,
            requesters: Vec::new(),
            response: DnsResponse::new(),
        }
    }

    /// Returns the resolution to its idle state and withdraws its query id
    /// from the section index.
    pub fn reset(&mut self, query_ids: &mut BTreeMap<u16, u32>, now: Instant) {
        self.step = ResolutionStep::None;
        self.try_count = 0;
        self.last_resolution = Some(now);
        self.nb_queries = 0;
        self.nb_responses = 0;
        self.query_type = self.prefered_query_type;
        if let Some(id) = self.query_id.take() {
            query_ids.remove(&id);
        }
    }

    /// Drops the whole accumulated answer set.
    pub fn purge_answers(&mut self) {
        self.response.answers.clear();
    }

    /// Whether this resolution can serve `(name, query_type)` from its
    /// current binding.
    #[must_use]
    pub fn matches(&self, name: &DnsName, query_type: DnsType) -> bool {
        match &self.hostname_dn {
            Some(own) => {
                self.prefered_query_type == query_type
                    && own.label_len() == name.label_len()
                    && own.eq_ignore_case(name)
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_clears_attempt_state() {
        let now = Instant::now();
        let name = DnsName::new("example.org").unwrap();
        let mut res = Resolution::new(1, Some(name), DnsType::A, now);
        let mut query_ids = BTreeMap::new();
        res.step = ResolutionStep::Running;
        res.query_type = DnsType::AAAA;
        res.try_count = 2;
        res.query_id = Some(77);
        res.nb_queries = 3;
        res.nb_responses = 1;
        query_ids.insert(77, res.uuid);

        res.reset(&mut query_ids, now);
        assert_eq!(ResolutionStep::None, res.step);
        assert_eq!(DnsType::A, res.query_type);
        assert_eq!(0, res.try_count);
        assert_eq!(None, res.query_id);
        assert_eq!(Some(now), res.last_resolution);
        assert_eq!(0, res.nb_queries);
        assert_eq!(0, res.nb_responses);
        assert!(query_ids.is_empty());
    }

    #[test]
    fn test_matches() {
        let now = Instant::now();
        let name = DnsName::new("example.org").unwrap();
        let res = Resolution::new(1, Some(name.clone()), DnsType::A, now);
        assert!(res.matches(&DnsName::new("EXAMPLE.org").unwrap(), DnsType::A));
        assert!(!res.matches(&name, DnsType::AAAA));
        assert!(!res.matches(&DnsName::new("example.com").unwrap(), DnsType::A));

        let nameless = Resolution::new(2, None, DnsType::A, now);
        assert!(!nameless.matches(&name, DnsType::A));
    }
}
