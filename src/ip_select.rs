use crate::DnsResponse;
use std::net::IpAddr;

/// Which address family a requester prefers.  `Unspec` expresses no
/// preference, in which case IPv6 wins ties.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FamilyPrio {
    V4,
    V6,
    Unspec,
}

/// A network a requester would rather pick addresses from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PreferredNetwork {
    pub addr: IpAddr,
    pub mask: IpAddr,
}
impl PreferredNetwork {
    /// Whether `ip` lies in this network.  Families must match.
    #[must_use]
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, self.mask, ip) {
            (IpAddr::V4(net), IpAddr::V4(mask), IpAddr::V4(ip)) => {
                let mask = u32::from(mask);
                u32::from(ip) & mask == u32::from(net) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(mask), IpAddr::V6(ip)) => {
                let mask = u128::from(mask);
                u128::from(ip) & mask == u128::from(net) & mask
            }
            _ => false,
        }
    }
}

/// Per-requester address selection preferences.
#[derive(Clone, Debug)]
pub struct ResolvOptions {
    pub family_prio: FamilyPrio,
    pub pref_net: Vec<PreferredNetwork>,
    /// When false, a candidate already used by a sibling is skipped outright.
    pub accept_duplicate_ip: bool,
    /// When true, SRV weights are not applied to the bound slot.
    pub ignore_weight: bool,
}
impl Default for ResolvOptions {
    fn default() -> Self {
        Self {
            family_prio: FamilyPrio::V6,
            pref_net: Vec::new(),
            accept_duplicate_ip: false,
            ignore_weight: false,
        }
    }
}

/// What the caller should do with the selected address.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UpdateCode {
    /// The current address is already the best pick.
    No,
    /// The answer set holds no usable address.
    NoIpFound,
    /// A different address was selected; the caller should adopt it.
    SrvIpNotFound,
}

fn family_matches(prio: FamilyPrio, ip: IpAddr) -> bool {
    match prio {
        FamilyPrio::V4 => ip.is_ipv4(),
        FamilyPrio::V6 => ip.is_ipv6(),
        FamilyPrio::Unspec => false,
    }
}

/// Scores every A/AAAA record in `response` and picks the best address.
///
/// The weights are:
///  * 8 - preferred address family,
///  * 4 - preferred network (first matching network wins),
///  * 2 - no sibling already uses the address (`check_ip` reports a
///        conflict; a conflicting candidate is skipped entirely unless
///        duplicates are accepted),
///  * 1 - the current address.
///
/// A full score of 15 can only be the current address and returns
/// [`UpdateCode::No`] immediately.  When the selected address differs from
/// `current_ip`, the answer list head rotates to its tail so equally-scored
/// candidates round-robin, and the caller is told to adopt the new address.
#[must_use]
pub fn get_ip_from_response(
    response: &mut DnsResponse,
    opts: &ResolvOptions,
    current_ip: Option<IpAddr>,
    check_ip: Option<&dyn Fn(IpAddr) -> bool>,
) -> (Option<IpAddr>, UpdateCode) {
    let mut best_v4 = None;
    let mut best_v6 = None;
    let mut current_found = false;
    let mut max_score = -1_i32;

    for record in &response.answers {
        let Some(ip) = record.address() else { continue };
        let mut score = 0;
        if family_matches(opts.family_prio, ip) {
            score += 8;
        }
        for net in &opts.pref_net {
            if net.contains(ip) {
                score += 4;
                break;
            }
        }
        let conflict = check_ip.is_some_and(|probe| probe(ip));
        if conflict {
            if !opts.accept_duplicate_ip {
                continue;
            }
        } else {
            score += 2;
        }
        let is_current = current_ip == Some(ip);
        if is_current {
            score += 1;
        }
        if score > max_score {
            match ip {
                IpAddr::V4(addr) => best_v4 = Some(addr),
                IpAddr::V6(addr) => best_v6 = Some(addr),
            }
            current_found = is_current;
            // A full score is only reachable by the current address.
            if score == 15 {
                return (Some(ip), UpdateCode::No);
            }
            max_score = score;
        }
    }

    let selected = match opts.family_prio {
        FamilyPrio::V4 => match (best_v4, best_v6) {
            (Some(v4), _) => IpAddr::V4(v4),
            (None, Some(v6)) => IpAddr::V6(v6),
            (None, None) => return (None, UpdateCode::NoIpFound),
        },
        FamilyPrio::V6 | FamilyPrio::Unspec => match (best_v6, best_v4) {
            (Some(v6), _) => IpAddr::V6(v6),
            (None, Some(v4)) => IpAddr::V4(v4),
            (None, None) => return (None, UpdateCode::NoIpFound),
        },
    };
    if current_found {
        return (Some(selected), UpdateCode::No);
    }
    if !response.answers.is_empty() {
        let first = response.answers.remove(0);
        response.answers.push(first);
    }
    (Some(selected), UpdateCode::SrvIpNotFound)
}
