use crate::server_slot::SlotState;
use crate::{lock_ignore_poison, DnsError, DnsName, ServerSlot};
use log::debug;
use std::sync::{Arc, Mutex};

/// A standing SRV lookup: one resolution of an `_service._proto.name` record
/// whose answers populate a pool of backend server slots with hostnames,
/// ports, weights and — when glue is present — addresses.
pub struct SrvRequest {
    /// The queried FQDN as configured.
    pub name: String,
    pub hostname_dn: DnsName,
    slots: Mutex<Vec<Arc<ServerSlot>>>,
    pub(crate) linked: Mutex<Option<u32>>,
}
impl SrvRequest {
    /// Creates the SRV request and adopts `slots` as its pool.
    ///
    /// # Errors
    /// Returns an error when `fqdn` is not a valid hostname.
    pub fn new(fqdn: &str, slots: Vec<Arc<ServerSlot>>) -> Result<Arc<Self>, DnsError> {
        let hostname_dn = DnsName::new(fqdn)?;
        let srvrq = Arc::new(Self {
            name: fqdn.strip_suffix('.').unwrap_or(fqdn).to_string(),
            hostname_dn,
            slots: Mutex::new(slots),
            linked: Mutex::new(None),
        });
        for slot in srvrq.slots() {
            *lock_ignore_poison(&slot.srvrq) = Some(Arc::downgrade(&srvrq));
        }
        Ok(srvrq)
    }

    #[must_use]
    pub fn slots(&self) -> Vec<Arc<ServerSlot>> {
        lock_ignore_poison(&self.slots).clone()
    }

    /// The slot already serving `(target, port)`, if any.
    pub(crate) fn find_bound_slot(&self, port: u16, target: &DnsName) -> Option<Arc<ServerSlot>> {
        self.slots().into_iter().find(|slot| {
            let state = slot.lock();
            state.svc_port == port
                && state.hostname_dn.as_ref().map_or(false, |name| {
                    name.label_len() == target.label_len() && name.eq_ignore_case(target)
                })
        })
    }

    /// The first slot of the pool with no hostname yet.
    pub(crate) fn find_free_slot(&self) -> Option<Arc<ServerSlot>> {
        self.slots()
            .into_iter()
            .find(|slot| slot.lock().hostname_dn.is_none())
    }
}
impl core::fmt::Debug for SrvRequest {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> Result<(), core::fmt::Error> {
        write!(f, "SrvRequest({})", self.name)
    }
}

/// Detaches a slot from the SRV record it was serving: hostname cleared,
/// port and address zeroed, slot marked down.
pub(crate) fn unbind_slot(state: &mut SlotState) {
    debug!(
        "unbinding slot from {}",
        state.hostname.as_deref().unwrap_or("-")
    );
    state.hostname = None;
    state.hostname_dn = None;
    state.addr = None;
    state.svc_port = 0;
    state.no_resolution = false;
    state.down = true;
}

/// Maps a DNS SRV weight (0..=65535) onto the proxy's 0..=256 range so that
/// any non-zero DNS weight stays non-zero.
pub(crate) fn srv_weight(dns_weight: u16) -> u16 {
    u16::try_from((u32::from(dns_weight) + 255) / 256).unwrap_or(256)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ResolvOptions;

    #[test]
    fn test_weight_mapping() {
        assert_eq!(0, srv_weight(0));
        assert_eq!(1, srv_weight(1));
        assert_eq!(1, srv_weight(5));
        assert_eq!(1, srv_weight(255));
        assert_eq!(1, srv_weight(256));
        assert_eq!(2, srv_weight(257));
        assert_eq!(2, srv_weight(512));
        assert_eq!(256, srv_weight(65535));
    }

    #[test]
    fn test_slot_lookup() {
        let free = ServerSlot::new("free", ResolvOptions::default());
        let bound = ServerSlot::new("bound", ResolvOptions::default());
        {
            let mut state = bound.lock();
            state.hostname_dn = Some(DnsName::new("backend.example").unwrap());
            state.svc_port = 80;
        }
        let srvrq =
            SrvRequest::new("_http._tcp.example", vec![bound.clone(), free.clone()]).unwrap();
        let target = DnsName::new("BACKEND.EXAMPLE").unwrap();
        let found = srvrq.find_bound_slot(80, &target).unwrap();
        assert!(Arc::ptr_eq(&found, &bound));
        assert!(srvrq.find_bound_slot(81, &target).is_none());
        let found = srvrq.find_free_slot().unwrap();
        assert!(Arc::ptr_eq(&found, &free));
        assert!(bound.srvrq().is_some());
    }

    #[test]
    fn test_unbind() {
        let slot = ServerSlot::new("s", ResolvOptions::default());
        {
            let mut state = slot.lock();
            state.hostname = Some("backend.example".to_string());
            state.hostname_dn = Some(DnsName::new("backend.example").unwrap());
            state.addr = Some("10.0.0.1".parse().unwrap());
            state.svc_port = 80;
            state.down = false;
        }
        unbind_slot(&mut slot.lock());
        let snapshot = slot.snapshot();
        assert_eq!(None, snapshot.hostname);
        assert_eq!(None, snapshot.addr);
        assert_eq!(0, snapshot.svc_port);
        assert!(snapshot.down);
    }

    #[test]
    fn test_rejects_bad_fqdn() {
        SrvRequest::new("bad name", Vec::new()).unwrap_err();
    }
}
