use crate::resolvers::HoldDurations;
use crate::{
    get_ip_from_response, lock_ignore_poison, DnsError, DnsName, DnsResponse, ResolutionStatus,
    ResolvOptions, SrvRequest, UpdateCode,
};
use log::debug;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Instant;

/// Mutable side of a server slot, guarded by the slot lock.  The slot lock
/// always nests inside the section lock, never the other way around.
#[derive(Debug)]
pub struct SlotState {
    /// FQDN in text form, present once the slot is bound.
    pub hostname: Option<String>,
    pub hostname_dn: Option<DnsName>,
    pub addr: Option<IpAddr>,
    pub svc_port: u16,
    /// Effective weight in the proxy's 0..=256 range.
    pub weight: u16,
    /// Set when glue already provides the address, making a per-slot
    /// A/AAAA resolution pointless.
    pub no_resolution: bool,
    pub map_ports: bool,
    pub down: bool,
    pub(crate) linked: Option<u32>,
}

/// A read-only copy of a slot's state, for callers outside the core.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SlotSnapshot {
    pub hostname: Option<String>,
    pub addr: Option<IpAddr>,
    pub svc_port: u16,
    pub weight: u16,
    pub no_resolution: bool,
    pub map_ports: bool,
    pub down: bool,
}

/// The resolver core's view of one backend server slot: the fields DNS
/// results flow into, plus the per-slot resolve preferences.
pub struct ServerSlot {
    pub id: String,
    pub opts: ResolvOptions,
    pub(crate) srvrq: Mutex<Option<Weak<SrvRequest>>>,
    state: Mutex<SlotState>,
}
impl ServerSlot {
    /// An empty slot, ready to be populated by an SRV request.
    #[must_use]
    pub fn new(id: impl Into<String>, opts: ResolvOptions) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            opts,
            srvrq: Mutex::new(None),
            state: Mutex::new(SlotState {
                hostname: None,
                hostname_dn: None,
                addr: None,
                svc_port: 0,
                weight: 1,
                no_resolution: false,
                map_ports: false,
                down: true,
                linked: None,
            }),
        })
    }

    /// A slot with a configured FQDN, resolved on its own.
    ///
    /// # Errors
    /// Returns an error when `fqdn` is not a valid hostname.
    pub fn with_fqdn(
        id: impl Into<String>,
        fqdn: &str,
        opts: ResolvOptions,
    ) -> Result<Arc<Self>, DnsError> {
        let hostname_dn = DnsName::new(fqdn)?;
        let slot = Self::new(id, opts);
        {
            let mut state = slot.lock();
            state.hostname = Some(fqdn.strip_suffix('.').unwrap_or(fqdn).to_string());
            state.hostname_dn = Some(hostname_dn);
        }
        Ok(slot)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SlotState> {
        lock_ignore_poison(&self.state)
    }

    /// The SRV request owning this slot, if any.
    #[must_use]
    pub fn srvrq(&self) -> Option<Arc<SrvRequest>> {
        lock_ignore_poison(&self.srvrq).as_ref().and_then(Weak::upgrade)
    }

    #[must_use]
    pub fn snapshot(&self) -> SlotSnapshot {
        let state = self.lock();
        SlotSnapshot {
            hostname: state.hostname.clone(),
            addr: state.addr,
            svc_port: state.svc_port,
            weight: state.weight,
            no_resolution: state.no_resolution,
            map_ports: state.map_ports,
            down: state.down,
        }
    }
}
impl core::fmt::Debug for ServerSlot {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> Result<(), core::fmt::Error> {
        write!(f, "ServerSlot({})", self.id)
    }
}

/// What a fresh VALID response did to a slot.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum SlotUpdate {
    Updated(IpAddr),
    NoChange,
    NoIp,
}

/// Runs the address selector for a slot against a fresh answer set and
/// adopts the address it returns.  Sibling slots of the same SRV request
/// feed the duplicate-address probe.
pub(crate) fn resolution_success(slot: &Arc<ServerSlot>, response: &mut DnsResponse) -> SlotUpdate {
    let sibling_addrs: Vec<IpAddr> = match slot.srvrq() {
        Some(srvrq) => srvrq
            .slots()
            .iter()
            .filter(|other| !Arc::ptr_eq(other, slot))
            .filter_map(|other| other.lock().addr)
            .collect(),
        None => Vec::new(),
    };
    let probe = |ip: IpAddr| sibling_addrs.contains(&ip);
    let current_ip = slot.lock().addr;
    let (new_ip, code) = get_ip_from_response(response, &slot.opts, current_ip, Some(&probe));
    match (code, new_ip) {
        (UpdateCode::SrvIpNotFound, Some(ip)) => {
            debug!("server {} uses address {} from resolution", slot.id, ip);
            let mut state = slot.lock();
            state.addr = Some(ip);
            state.down = false;
            SlotUpdate::Updated(ip)
        }
        (UpdateCode::No, _) => {
            let mut state = slot.lock();
            state.down = state.addr.is_none();
            SlotUpdate::NoChange
        }
        _ => SlotUpdate::NoIp,
    }
}

/// Applies a terminal resolution failure to a slot: the address is retained
/// through the hold period for the final status, then cleared.
pub(crate) fn resolution_error(
    slot: &Arc<ServerSlot>,
    status: ResolutionStatus,
    hold: &HoldDurations,
    last_valid: Instant,
    now: Instant,
) {
    if now <= last_valid + hold.for_status(status) {
        return;
    }
    let mut state = slot.lock();
    if state.addr.take().is_some() {
        debug!("server {} lost its address after {:?}", slot.id, status);
    }
    state.down = true;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AnswerData, AnswerItem, FamilyPrio};
    use core::time::Duration;
    use std::net::Ipv4Addr;

    fn v4_opts() -> ResolvOptions {
        ResolvOptions {
            family_prio: FamilyPrio::V4,
            ..ResolvOptions::default()
        }
    }

    fn response_with(addr: Ipv4Addr) -> DnsResponse {
        let mut response = DnsResponse::new();
        response.answers.push(AnswerItem::new(
            DnsName::new("example.org").unwrap(),
            crate::INTERNET_CLASS,
            300,
            AnswerData::A(addr),
            Instant::now(),
        ));
        response
    }

    #[test]
    fn test_success_adopts_address() {
        let slot = ServerSlot::with_fqdn("s1", "example.org", v4_opts()).unwrap();
        let mut response = response_with(Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(
            SlotUpdate::Updated("10.0.0.1".parse().unwrap()),
            resolution_success(&slot, &mut response)
        );
        let snapshot = slot.snapshot();
        assert_eq!(Some("10.0.0.1".parse().unwrap()), snapshot.addr);
        assert!(!snapshot.down);

        // The same answer again is a no-op.
        assert_eq!(SlotUpdate::NoChange, resolution_success(&slot, &mut response));
    }

    #[test]
    fn test_error_respects_hold() {
        let slot = ServerSlot::with_fqdn("s1", "example.org", v4_opts()).unwrap();
        slot.lock().addr = Some("10.0.0.1".parse().unwrap());
        slot.lock().down = false;
        let hold = HoldDurations::default();
        let last_valid = Instant::now();

        resolution_error(
            &slot,
            ResolutionStatus::Nx,
            &hold,
            last_valid,
            last_valid + Duration::from_secs(10),
        );
        assert_eq!(Some("10.0.0.1".parse().unwrap()), slot.snapshot().addr);

        resolution_error(
            &slot,
            ResolutionStatus::Nx,
            &hold,
            last_valid,
            last_valid + hold.nx + Duration::from_secs(1),
        );
        let snapshot = slot.snapshot();
        assert_eq!(None, snapshot.addr);
        assert!(snapshot.down);
    }
}
