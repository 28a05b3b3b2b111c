//! stub-resolver
//! ========
//! [![crates.io version](https://img.shields.io/crates/v/stub-resolver.svg)](https://crates.io/crates/stub-resolver)
//! [![license: Apache 2.0](https://gitlab.com/leonhard-llc/ops/-/raw/main/license-apache-2.0.svg)](https://gitlab.com/leonhard-llc/ops/-/raw/main/stub-resolver/LICENSE)
//! [![unsafe forbidden](https://gitlab.com/leonhard-llc/ops/-/raw/main/unsafe-forbidden.svg)](https://github.com/rust-secure-code/safety-dance/)
//! [![pipeline status](https://gitlab.com/leonhard-llc/ops/badges/main/pipeline.svg)](https://gitlab.com/leonhard-llc/ops/-/pipelines)
//!
//! A threaded DNS stub resolver library for proxies.
//!
//! # Use Cases
//! - Keep backend addresses fresh by re-resolving their hostnames in the
//!   background, on a schedule.
//! - Populate a pool of backend slots from SRV records, including glue
//!   addresses, ports and weights.
//! - Resolve a hostname once at request time and park the request until the
//!   answer lands.
//!
//! # Features
//! - Coalesces identical lookups into one in-flight query
//! - Retries, A⇄AAAA fallback and per-outcome hold periods
//! - Deduplicated answer sets with obsolescence sweeping
//! - `forbid(unsafe_code)`
//!
//! # Limitations
//! - UDP only; a truncated response is an error unless it answers an SRV
//!   query
//! - No DNSSEC validation
//! - Sends queries without name compression (decoding is supported)
//!
//! # Example
//! ```
//! use stub_resolver::{
//!     FamilyPrio, Nameserver, RequesterOwner, ResolvOptions, ResolverConfig, Resolvers,
//!     ServerSlot, UdpNameserver,
//! };
//!
//! let io = UdpNameserver::connect("127.0.0.1:53".parse().unwrap()).unwrap();
//! let section = Resolvers::new(
//!     "dns",
//!     ResolverConfig::default(),
//!     vec![Nameserver::new("ns1", Box::new(io))],
//! )
//! .unwrap();
//! let opts = ResolvOptions { family_prio: FamilyPrio::V4, ..ResolvOptions::default() };
//! let slot = ServerSlot::with_fqdn("s1", "example.org", opts).unwrap();
//! section.link(RequesterOwner::Server(slot.clone()));
//! let permit = permit::Permit::new();
//! let dispatcher = section.spawn_dispatcher(permit.new_sub());
//! // ... feed section.process_responses(0) from the I/O layer ...
//! drop(permit);
//! dispatcher.join().unwrap();
//! ```
//!
//! # Related Crates
//! - [`permit`](https://crates.io/crates/permit) stops the dispatcher thread
//! - [`fixed-buffer`](https://crates.io/crates/fixed-buffer) backs the query
//!   encoder
//!
//! # Changelog
//! - v0.1.0 - Initial version
#![forbid(unsafe_code)]

mod action;
mod dns_answer;
mod dns_message_header;
mod dns_name;
mod dns_query;
mod dns_question;
mod dns_response;
mod dns_response_code;
mod dns_type;
mod ip_select;
mod nameserver;
mod requester;
mod resolution;
mod resolvers;
mod server_slot;
mod srvrq;

pub use action::{ActReturn, StreamCtx};
pub use dns_answer::{AnswerData, AnswerItem};
pub use dns_message_header::DnsMessageHeader;
pub use dns_name::{labels_eq_ignore_case, read_name, DnsName, MAX_LABEL_SIZE, MAX_NAME_SIZE};
pub use dns_query::{query_size, write_query};
pub use dns_question::DnsQuestion;
pub use dns_response::{
    find_srv_answer, validate_dns_response, DnsResponse, ResponseError, MIN_RECORD_SIZE,
};
pub use dns_response_code::DnsResponseCode;
pub use dns_type::DnsType;
pub use ip_select::{
    get_ip_from_response, FamilyPrio, PreferredNetwork, ResolvOptions, UpdateCode,
};
pub use nameserver::{Nameserver, NameserverCounters, NameserverIo, UdpNameserver};
pub use requester::RequesterOwner;
pub use resolution::{Resolution, ResolutionStatus, ResolutionStep};
pub use resolvers::{
    HoldDurations, ResolverConfig, Resolvers, MAX_UDP_MESSAGE, MIN_UDP_MESSAGE,
};
pub use server_slot::{ServerSlot, SlotSnapshot};
pub use srvrq::SrvRequest;

use fixed_buffer::FixedBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const INTERNET_CLASS: u16 = 1;

/// Errors from encoding and decoding wire data and hostnames.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DnsError {
    BufferFull,
    EmptyLabel,
    EmptyName,
    InvalidLabel,
    InvalidPointer,
    LabelTooLong,
    NameTooLong,
    PointerLoop,
    Truncated,
}
impl core::fmt::Display for DnsError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> Result<(), core::fmt::Error> {
        write!(f, "{:?}", self)
    }
}
impl std::error::Error for DnsError {}

fn write_u16_be<const N: usize>(out: &mut FixedBuf<N>, value: u16) -> Result<(), DnsError> {
    out.write_bytes(&value.to_be_bytes())
        .map_err(|_| DnsError::BufferFull)?;
    Ok(())
}

fn write_u32_be<const N: usize>(out: &mut FixedBuf<N>, value: u32) -> Result<(), DnsError> {
    out.write_bytes(&value.to_be_bytes())
        .map_err(|_| DnsError::BufferFull)?;
    Ok(())
}

/// A poisoned lock only means another thread panicked mid-update; the
/// resolver state stays usable, so the guard is taken over instead of
/// propagating the panic.
pub(crate) fn lock_ignore_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
