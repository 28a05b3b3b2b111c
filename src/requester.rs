use crate::{lock_ignore_poison, DnsName, DnsType, FamilyPrio, ServerSlot, SrvRequest, StreamCtx};
use std::sync::Arc;

/// The consumer behind a requester.  Each owner kind decides the preferred
/// query type, supplies the hostname driving the resolution, and receives
/// the success or error notification in its own way.
///
/// Owner identity is pointer identity: the same `Arc` clones compare equal,
/// two distinct slots with identical contents do not.
#[derive(Clone)]
pub enum RequesterOwner {
    /// A backend server slot wanting its address kept fresh.
    Server(Arc<ServerSlot>),
    /// A standing SRV lookup populating a pool of slots.
    SrvRequest(Arc<SrvRequest>),
    /// A request-time resolution held by an in-flight stream.
    Stream(Arc<StreamCtx>),
}
impl RequesterOwner {
    /// The hostname this owner currently wants resolved.
    #[must_use]
    pub fn hostname_dn(&self) -> Option<DnsName> {
        match self {
            RequesterOwner::Server(slot) => slot.lock().hostname_dn.clone(),
            RequesterOwner::SrvRequest(srvrq) => Some(srvrq.hostname_dn.clone()),
            RequesterOwner::Stream(ctx) => lock_ignore_poison(&ctx.hostname_dn).clone(),
        }
    }

    /// Query type this owner asks for: SRV for an SRV request, otherwise the
    /// address family the owner prefers.
    #[must_use]
    pub fn prefered_query_type(&self) -> DnsType {
        match self {
            RequesterOwner::Server(slot) => family_query_type(slot.opts.family_prio),
            RequesterOwner::SrvRequest(_) => DnsType::SRV,
            RequesterOwner::Stream(ctx) => family_query_type(ctx.opts.family_prio),
        }
    }

    #[must_use]
    pub fn same_owner(&self, other: &RequesterOwner) -> bool {
        match (self, other) {
            (RequesterOwner::Server(a), RequesterOwner::Server(b)) => Arc::ptr_eq(a, b),
            (RequesterOwner::SrvRequest(a), RequesterOwner::SrvRequest(b)) => Arc::ptr_eq(a, b),
            (RequesterOwner::Stream(a), RequesterOwner::Stream(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// The resolution this owner is linked to, if any.
    pub(crate) fn linked_uuid(&self) -> Option<u32> {
        match self {
            RequesterOwner::Server(slot) => slot.lock().linked,
            RequesterOwner::SrvRequest(srvrq) => *lock_ignore_poison(&srvrq.linked),
            RequesterOwner::Stream(ctx) => *lock_ignore_poison(&ctx.linked),
        }
    }

    pub(crate) fn set_linked(&self, uuid: Option<u32>) {
        match self {
            RequesterOwner::Server(slot) => slot.lock().linked = uuid,
            RequesterOwner::SrvRequest(srvrq) => *lock_ignore_poison(&srvrq.linked) = uuid,
            RequesterOwner::Stream(ctx) => *lock_ignore_poison(&ctx.linked) = uuid,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            RequesterOwner::Server(_) => "server",
            RequesterOwner::SrvRequest(_) => "srvrq",
            RequesterOwner::Stream(_) => "stream",
        }
    }
}
impl core::fmt::Debug for RequesterOwner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> Result<(), core::fmt::Error> {
        match self.hostname_dn() {
            Some(name) => write!(f, "RequesterOwner::{}({})", self.kind(), name),
            None => write!(f, "RequesterOwner::{}", self.kind()),
        }
    }
}

fn family_query_type(family_prio: FamilyPrio) -> DnsType {
    if family_prio == FamilyPrio::V4 {
        DnsType::A
    } else {
        DnsType::AAAA
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ResolvOptions;

    #[test]
    fn test_owner_identity_and_query_type() {
        let v4_opts = ResolvOptions {
            family_prio: FamilyPrio::V4,
            ..ResolvOptions::default()
        };
        let slot_a = ServerSlot::new("a", v4_opts);
        let slot_b = ServerSlot::new("b", ResolvOptions::default());
        let owner_a = RequesterOwner::Server(slot_a.clone());
        assert!(owner_a.same_owner(&RequesterOwner::Server(slot_a)));
        assert!(!owner_a.same_owner(&RequesterOwner::Server(slot_b.clone())));
        assert_eq!(DnsType::A, owner_a.prefered_query_type());
        assert_eq!(
            DnsType::AAAA,
            RequesterOwner::Server(slot_b).prefered_query_type()
        );

        let srvrq = SrvRequest::new("_http._tcp.example", Vec::new()).unwrap();
        let owner = RequesterOwner::SrvRequest(srvrq);
        assert_eq!(DnsType::SRV, owner.prefered_query_type());
        assert_eq!(
            Some(DnsName::new("_http._tcp.example").unwrap()),
            owner.hostname_dn()
        );
        assert!(!owner.same_owner(&owner_a));
    }

    #[test]
    fn test_linked_state() {
        let slot = ServerSlot::new("a", ResolvOptions::default());
        let owner = RequesterOwner::Server(slot);
        assert_eq!(None, owner.linked_uuid());
        owner.set_linked(Some(7));
        assert_eq!(Some(7), owner.linked_uuid());
        owner.set_linked(None);
        assert_eq!(None, owner.linked_uuid());
    }
}
