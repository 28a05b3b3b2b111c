use crate::dns_query::write_query;
use crate::dns_response::{find_srv_answer, validate_dns_response, MIN_RECORD_SIZE};
use crate::server_slot::{self, SlotUpdate};
use crate::srvrq;
use crate::{
    lock_ignore_poison, AnswerData, AnswerItem, DnsMessageHeader, DnsName, DnsType, Nameserver,
    NameserverCounters, RequesterOwner, Resolution, ResolutionStatus, ResolutionStep,
    ResponseError, ServerSlot, SrvRequest,
};
use fixed_buffer::FixedBuf;
use log::{debug, warn};
use oorandom::Rand32;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

/// Largest UDP payload a section can be configured to accept.
pub const MAX_UDP_MESSAGE: usize = 8192;
/// Smallest configurable payload size: a bare header.
pub const MIN_UDP_MESSAGE: usize = 12;

/// How long the dispatcher sleeps at most before re-checking its permit.
const DISPATCHER_POLL: Duration = Duration::from_millis(500);

/// How long previous outcomes are served from cache before a name is
/// re-resolved, per outcome kind.  `obsolete` bounds the age of individual
/// answer records instead; `None` disables that sweep.
#[derive(Clone, Debug)]
pub struct HoldDurations {
    pub valid: Duration,
    pub nx: Duration,
    pub refused: Duration,
    pub timeout: Duration,
    pub other: Duration,
    pub obsolete: Option<Duration>,
}
impl Default for HoldDurations {
    fn default() -> Self {
        Self {
            valid: Duration::from_secs(10),
            nx: Duration::from_secs(30),
            refused: Duration::from_secs(30),
            timeout: Duration::from_secs(30),
            other: Duration::from_secs(30),
            obsolete: None,
        }
    }
}
impl HoldDurations {
    pub(crate) fn for_status(&self, status: ResolutionStatus) -> Duration {
        match status {
            ResolutionStatus::Valid => self.valid,
            ResolutionStatus::Nx => self.nx,
            ResolutionStatus::Refused => self.refused,
            ResolutionStatus::Timeout => self.timeout,
            ResolutionStatus::None | ResolutionStatus::Invalid | ResolutionStatus::Other => {
                self.other
            }
        }
    }
}

/// Validated parameters of one resolvers section.
#[derive(Clone, Debug)]
pub struct ResolverConfig {
    /// UDP payload size advertised through EDNS, 12..=8192.
    pub accepted_payload_size: u16,
    /// Attempts per resolution run, at least 1.
    pub resolve_retries: u8,
    /// How long a cached outcome satisfies the wait list before re-running.
    pub timeout_resolve: Duration,
    /// How long an unanswered query stays in flight before the retry logic
    /// kicks in.
    pub timeout_retry: Duration,
    pub hold: HoldDurations,
}
impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            accepted_payload_size: 512,
            resolve_retries: 3,
            timeout_resolve: Duration::from_secs(1),
            timeout_retry: Duration::from_secs(1),
            hold: HoldDurations::default(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct SectionInner {
    nameservers: Vec<Nameserver>,
    /// Every live resolution, keyed by uuid.  The `curr` and `wait` lists
    /// order those uuids; a uuid present in a list but absent here is a
    /// resolution temporarily detached for processing and is skipped.
    resolutions: HashMap<u32, Resolution>,
    /// In-flight resolutions, FIFO by `last_query`.
    curr: VecDeque<u32>,
    /// Idle and cached resolutions.
    wait: VecDeque<u32>,
    /// Query id index for response demultiplexing.
    query_ids: BTreeMap<u16, u32>,
    next_uuid: u32,
    next_wake: Option<Instant>,
}
impl SectionInner {
    pub(crate) fn resolution_state(
        &self,
        uuid: u32,
    ) -> Option<(ResolutionStatus, ResolutionStep, Option<Instant>)> {
        self.resolutions
            .get(&uuid)
            .map(|res| (res.status, res.step, res.last_resolution))
    }

    pub(crate) fn response_of_mut(&mut self, uuid: u32) -> Option<&mut crate::DnsResponse> {
        self.resolutions.get_mut(&uuid).map(|res| &mut res.response)
    }
}

/// A named pool of nameservers sharing one dispatcher, one lock and one
/// configuration, together with every resolution running against them.
#[derive(Debug)]
pub struct Resolvers {
    pub id: String,
    pub config: ResolverConfig,
    inner: Mutex<SectionInner>,
    wake: Condvar,
}

thread_local! {
    static QUERY_ID_RNG: RefCell<Rand32> = RefCell::new(Rand32::new(clock_seed()));
}

fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0x853C_49E6_748F_EA9B, |d| d.as_nanos() as u64)
}

fn random_query_id() -> u16 {
    QUERY_ID_RNG.with(|rng| rng.borrow_mut().rand_u32() as u16)
}

/// Detaches `uuid` from whichever list holds it and re-queues it on the
/// wait list.
fn move_to_wait(curr: &mut VecDeque<u32>, wait: &mut VecDeque<u32>, uuid: u32) {
    curr.retain(|u| *u != uuid);
    wait.retain(|u| *u != uuid);
    wait.push_back(uuid);
}

fn free_resolution(
    resolutions: &mut HashMap<u32, Resolution>,
    query_ids: &mut BTreeMap<u16, u32>,
    curr: &mut VecDeque<u32>,
    wait: &mut VecDeque<u32>,
    uuid: u32,
) {
    if let Some(mut res) = resolutions.remove(&uuid) {
        if let Some(id) = res.query_id.take() {
            query_ids.remove(&id);
        }
        for owner in res.requesters.drain(..) {
            owner.set_linked(None);
        }
    }
    curr.retain(|u| *u != uuid);
    wait.retain(|u| *u != uuid);
}

/// Builds the query for `res` once and writes it to every nameserver.  A
/// nameserver that fails to take the whole datagram only gets its error
/// counter bumped; `nb_queries` counts successful sends.  The resolution is
/// re-queued at the tail of the active list either way.
fn send_query(
    config: &ResolverConfig,
    nameservers: &mut [Nameserver],
    curr: &mut VecDeque<u32>,
    wait: &mut VecDeque<u32>,
    res: &mut Resolution,
    now: Instant,
) {
    res.nb_queries = 0;
    res.nb_responses = 0;
    res.last_query = Some(now);

    let mut buf: FixedBuf<512> = FixedBuf::new();
    let encoded = match (&res.hostname_dn, res.query_id) {
        (Some(name), Some(id)) => write_query(
            &mut buf,
            id,
            res.query_type,
            config.accepted_payload_size,
            name,
        )
        .ok(),
        _ => None,
    };
    for ns in nameservers.iter_mut() {
        let Some(len) = encoded else {
            ns.counters.snd_error += 1;
            continue;
        };
        match ns.io.send(buf.readable()) {
            Ok(sent) if sent == len => {
                ns.counters.sent += 1;
                res.nb_queries += 1;
            }
            Ok(_) | Err(_) => {
                ns.counters.snd_error += 1;
            }
        }
    }
    move_to_curr(curr, wait, res.uuid);
}

fn move_to_curr(curr: &mut VecDeque<u32>, wait: &mut VecDeque<u32>, uuid: u32) {
    curr.retain(|u| *u != uuid);
    wait.retain(|u| *u != uuid);
    curr.push_back(uuid);
}

enum RunResult {
    Sent,
    Skipped,
    Failed,
}

impl Resolvers {
    /// Builds a section over validated parameters.
    ///
    /// # Errors
    /// Returns an error when the payload size is outside 12..=8192, no retry
    /// is allowed, or no nameserver is configured.
    pub fn new(
        id: impl Into<String>,
        config: ResolverConfig,
        nameservers: Vec<Nameserver>,
    ) -> Result<Arc<Self>, String> {
        let id = id.into();
        let payload = usize::from(config.accepted_payload_size);
        if !(MIN_UDP_MESSAGE..=MAX_UDP_MESSAGE).contains(&payload) {
            return Err(format!(
                "resolvers {:?}: accepted_payload_size {} is outside <12;8192>",
                id, payload
            ));
        }
        if config.resolve_retries == 0 {
            return Err(format!("resolvers {:?}: resolve_retries must be at least 1", id));
        }
        if nameservers.is_empty() {
            return Err(format!("resolvers {:?}: no nameserver configured", id));
        }
        Ok(Arc::new(Self {
            id,
            config,
            inner: Mutex::new(SectionInner {
                nameservers,
                resolutions: HashMap::new(),
                curr: VecDeque::new(),
                wait: VecDeque::new(),
                query_ids: BTreeMap::new(),
                next_uuid: 0,
                next_wake: None,
            }),
            wake: Condvar::new(),
        }))
    }

    pub(crate) fn lock_inner(&self) -> MutexGuard<'_, SectionInner> {
        lock_ignore_poison(&self.inner)
    }

    pub(crate) fn wake_dispatcher(&self) {
        self.wake.notify_all();
    }

    /// Runs the dispatcher on its own thread until `permit` is revoked.
    pub fn spawn_dispatcher(self: &Arc<Self>, permit: permit::Permit) -> JoinHandle<()> {
        let section = Arc::clone(self);
        std::thread::spawn(move || {
            while !permit.is_revoked() {
                let now = Instant::now();
                let mut inner = section.lock_inner();
                section.process_dispatch_locked(&mut inner, now);
                let sleep = inner
                    .next_wake
                    .map_or(DISPATCHER_POLL, |wake| wake.saturating_duration_since(now))
                    .min(DISPATCHER_POLL);
                drop(section.wake.wait_timeout(inner, sleep));
            }
        })
    }

    /// One dispatcher pass at `now`: expire and retry in-flight resolutions,
    /// then launch the due ones from the wait list.
    pub fn process_once(&self, now: Instant) {
        let mut inner = self.lock_inner();
        self.process_dispatch_locked(&mut inner, now);
    }

    /// Binds `owner` to the resolution for its hostname and preferred query
    /// type, creating or coalescing as needed.  A no-op when already linked.
    pub fn link(&self, owner: RequesterOwner) {
        let now = Instant::now();
        let mut inner = self.lock_inner();
        self.link_locked(&mut inner, owner, now);
    }

    /// Detaches `owner`; the resolution is freed with its last requester.
    pub fn unlink(&self, owner: &RequesterOwner) {
        let now = Instant::now();
        let mut inner = self.lock_inner();
        self.unlink_locked(&mut inner, owner, false, now);
    }

    /// Detaches `owner` but keeps an emptied resolution object around, for
    /// callers that may relink while a notification is still walking the
    /// requester list.
    pub fn unlink_safe(&self, owner: &RequesterOwner) {
        let now = Instant::now();
        let mut inner = self.lock_inner();
        self.unlink_locked(&mut inner, owner, true, now);
    }

    /// Wakes the dispatcher unless the owner's resolution still holds a
    /// fresh valid outcome.
    pub fn trigger(&self, owner: &RequesterOwner) {
        let now = Instant::now();
        let inner = self.lock_inner();
        let Some(uuid) = owner.linked_uuid() else { return };
        let Some(res) = inner.resolutions.get(&uuid) else {
            return;
        };
        let fresh = res.status == ResolutionStatus::Valid
            && res
                .last_resolution
                .map_or(false, |t| now < t + self.config.hold.valid);
        if !fresh {
            self.wake.notify_all();
        }
    }

    /// Drains and processes every response pending on one nameserver.
    pub fn process_responses(&self, ns_index: usize) {
        self.process_responses_at(ns_index, Instant::now());
    }

    /// Status and step of the resolution `owner` is linked to.
    #[must_use]
    pub fn resolution_status(
        &self,
        owner: &RequesterOwner,
    ) -> Option<(ResolutionStatus, ResolutionStep)> {
        let inner = self.lock_inner();
        let uuid = owner.linked_uuid()?;
        inner.resolutions.get(&uuid).map(|res| (res.status, res.step))
    }

    /// A copy of the answer set accumulated for `owner`'s resolution.
    #[must_use]
    pub fn answer_records(&self, owner: &RequesterOwner) -> Vec<AnswerItem> {
        let inner = self.lock_inner();
        match owner.linked_uuid().and_then(|uuid| inner.resolutions.get(&uuid)) {
            Some(res) => res.response.answers.clone(),
            None => Vec::new(),
        }
    }

    /// Counters of one nameserver.
    #[must_use]
    pub fn counters(&self, ns_index: usize) -> Option<NameserverCounters> {
        self.lock_inner()
            .nameservers
            .get(ns_index)
            .map(|ns| ns.counters)
    }

    /// The SRV answer a slot is bound to: the record of its SRV request's
    /// resolution matching the slot's `(hostname, port)` pair.
    #[must_use]
    pub fn find_srvrq_answer_record(&self, slot: &Arc<ServerSlot>) -> Option<AnswerItem> {
        let inner = self.lock_inner();
        let srvrq = slot.srvrq()?;
        let uuid = (*lock_ignore_poison(&srvrq.linked))?;
        let res = inner.resolutions.get(&uuid)?;
        let (target, port) = {
            let state = slot.lock();
            (state.hostname_dn.clone()?, state.svc_port)
        };
        find_srv_answer(&res.response, &target, port).cloned()
    }

    pub(crate) fn link_locked(
        &self,
        inner: &mut SectionInner,
        owner: RequesterOwner,
        now: Instant,
    ) {
        if owner.linked_uuid().is_some() {
            return;
        }
        let hostname = owner.hostname_dn();
        let query_type = owner.prefered_query_type();
        let uuid = pick_resolution(inner, hostname.as_ref(), query_type, now);
        owner.set_linked(Some(uuid));
        if let Some(res) = inner.resolutions.get_mut(&uuid) {
            res.requesters.push(owner);
        }
    }

    pub(crate) fn unlink_locked(
        &self,
        inner: &mut SectionInner,
        owner: &RequesterOwner,
        safe: bool,
        now: Instant,
    ) {
        let Some(uuid) = owner.linked_uuid() else { return };
        owner.set_linked(None);
        let SectionInner {
            resolutions,
            query_ids,
            curr,
            wait,
            ..
        } = inner;
        let empty = {
            let Some(res) = resolutions.get_mut(&uuid) else {
                return;
            };
            res.requesters.retain(|r| !r.same_owner(owner));
            let survivor = res.requesters.first().cloned();
            match survivor {
                Some(survivor) => {
                    // The name buffer follows whichever requester now
                    // drives the resolution.
                    res.hostname_dn = survivor.hostname_dn();
                    false
                }
                None if safe => {
                    res.reset(query_ids, now);
                    res.hostname_dn = None;
                    res.purge_answers();
                    false
                }
                None => true,
            }
        };
        if empty {
            free_resolution(resolutions, query_ids, curr, wait, uuid);
        }
    }

    /// Starts a run for an idle resolution: fresh query id, full retry
    /// budget, preferred query type, first send.
    fn run_resolution(&self, inner: &mut SectionInner, uuid: u32, now: Instant) -> RunResult {
        let SectionInner {
            resolutions,
            query_ids,
            curr,
            wait,
            nameservers,
            ..
        } = inner;
        let Some(res) = resolutions.get_mut(&uuid) else {
            return RunResult::Skipped;
        };
        // A resolution without a hostname, or one already running, must not
        // pile up extra queries.
        if res.hostname_dn.is_none() || res.step != ResolutionStep::None {
            return RunResult::Skipped;
        }
        let mut query_id = None;
        for _ in 0..100 {
            let candidate = random_query_id();
            if !query_ids.contains_key(&candidate) {
                query_id = Some(candidate);
                break;
            }
        }
        let Some(query_id) = query_id else {
            warn!(
                "could not generate a query id for {} in resolvers {}",
                res.hostname_dn.as_ref().map_or_else(String::new, |n| n.to_string()),
                self.id
            );
            return RunResult::Failed;
        };
        res.query_id = Some(query_id);
        res.step = ResolutionStep::Running;
        res.query_type = res.prefered_query_type;
        res.try_count = self.config.resolve_retries;
        query_ids.insert(query_id, uuid);

        res.try_count -= 1;
        send_query(&self.config, nameservers, curr, wait, res, now);
        RunResult::Sent
    }

    fn process_dispatch_locked(&self, inner: &mut SectionInner, now: Instant) {
        enum Active {
            Free,
            Stop,
            Terminal,
            Resend,
        }
        let active: Vec<u32> = inner.curr.iter().copied().collect();
        for uuid in active {
            let action = match inner.resolutions.get(&uuid) {
                None => continue,
                Some(res) if res.requesters.is_empty() => Active::Free,
                Some(res)
                    if res
                        .last_query
                        .map_or(false, |t| now < t + self.config.timeout_retry) =>
                {
                    // The list is FIFO by last_query: the first in-flight
                    // resolution still in the future ends the sweep.
                    Active::Stop
                }
                Some(res) if res.try_count == 0 => Active::Terminal,
                Some(_) => Active::Resend,
            };
            match action {
                Active::Stop => break,
                Active::Free => {
                    let SectionInner {
                        resolutions,
                        query_ids,
                        curr,
                        wait,
                        ..
                    } = inner;
                    free_resolution(resolutions, query_ids, curr, wait, uuid);
                }
                Active::Terminal => {
                    let Some(mut res) = inner.resolutions.remove(&uuid) else {
                        continue;
                    };
                    if res.nb_responses == 0 {
                        res.status = ResolutionStatus::Timeout;
                    }
                    self.notify_error(inner, &mut res, now);
                    res.reset(&mut inner.query_ids, now);
                    inner.resolutions.insert(uuid, res);
                    move_to_wait(&mut inner.curr, &mut inner.wait, uuid);
                }
                Active::Resend => {
                    let SectionInner {
                        resolutions,
                        curr,
                        wait,
                        nameservers,
                        ..
                    } = inner;
                    let Some(res) = resolutions.get_mut(&uuid) else {
                        continue;
                    };
                    if res.nb_responses == 0 || res.prefered_query_type != res.query_type {
                        // A real timeout, or the family fallback already
                        // ran for this attempt.
                        res.query_type = res.prefered_query_type;
                        res.try_count -= 1;
                    } else if res.prefered_query_type == DnsType::A {
                        res.query_type = DnsType::AAAA;
                    } else if res.prefered_query_type == DnsType::AAAA {
                        res.query_type = DnsType::A;
                    } else {
                        res.try_count -= 1;
                    }
                    send_query(&self.config, nameservers, curr, wait, res, now);
                }
            }
        }

        enum Waiting {
            Free,
            Cached,
            Run,
        }
        let waiting: Vec<u32> = inner.wait.iter().copied().collect();
        for uuid in waiting {
            let action = match inner.resolutions.get(&uuid) {
                None => continue,
                Some(res) if res.requesters.is_empty() => Waiting::Free,
                Some(res)
                    if res
                        .last_resolution
                        .map_or(false, |t| now < t + self.config.timeout_resolve) =>
                {
                    Waiting::Cached
                }
                Some(_) => Waiting::Run,
            };
            match action {
                Waiting::Cached => {}
                Waiting::Free => {
                    let SectionInner {
                        resolutions,
                        query_ids,
                        curr,
                        wait,
                        ..
                    } = inner;
                    free_resolution(resolutions, query_ids, curr, wait, uuid);
                }
                Waiting::Run => match self.run_resolution(inner, uuid, now) {
                    RunResult::Sent => {}
                    RunResult::Skipped | RunResult::Failed => {
                        if let Some(res) = inner.resolutions.get_mut(&uuid) {
                            res.last_resolution = Some(now);
                        }
                        move_to_wait(&mut inner.curr, &mut inner.wait, uuid);
                    }
                },
            }
        }

        self.update_timeout_locked(inner, now);
    }

    /// Next wake-up: the global refresh period, the retry deadline of the
    /// oldest in-flight query, and every cached expiry on the wait list.
    fn update_timeout_locked(&self, inner: &mut SectionInner, now: Instant) {
        let mut next = now + self.config.timeout_resolve;
        if let Some(res) = inner.curr.front().and_then(|uuid| inner.resolutions.get(uuid)) {
            if let Some(last_query) = res.last_query {
                next = next.min(last_query + self.config.timeout_retry);
            }
        }
        for uuid in &inner.wait {
            if let Some(res) = inner.resolutions.get(uuid) {
                if let Some(last_resolution) = res.last_resolution {
                    next = next.min(last_resolution + self.config.timeout_resolve);
                }
            }
        }
        inner.next_wake = Some(next);
    }

    /// Drains one nameserver at an explicit instant.  Splitting the clock
    /// out keeps retry, cache and obsolescence behavior reproducible.
    pub fn process_responses_at(&self, ns_index: usize, now: Instant) {
        let mut inner = self.lock_inner();
        let max_payload = usize::from(self.config.accepted_payload_size);
        let max_answer_records =
            max_payload.saturating_sub(DnsMessageHeader::LEN) / MIN_RECORD_SIZE;
        let mut buf = [0_u8; MAX_UDP_MESSAGE + 1];
        loop {
            let Some(ns) = inner.nameservers.get_mut(ns_index) else {
                break;
            };
            let buflen = match ns.io.recv(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            if buflen > max_payload {
                ns.counters.too_big += 1;
                continue;
            }
            if buflen < 2 {
                ns.counters.invalid += 1;
                continue;
            }
            let query_id = u16::from_be_bytes([buf[0], buf[1]]);
            let Some(&uuid) = inner.query_ids.get(&query_id) else {
                // An unknown id is an outdated response, dropped quietly.
                inner.nameservers[ns_index].counters.outdated += 1;
                continue;
            };
            let Some(mut res) = inner.resolutions.remove(&uuid) else {
                continue;
            };
            res.nb_responses += 1;

            let outcome =
                validate_dns_response(&buf[..buflen], max_answer_records, &mut res.response, now);
            {
                let counters = &mut inner.nameservers[ns_index].counters;
                match outcome {
                    Ok(()) => {}
                    Err(
                        ResponseError::Invalid
                        | ResponseError::QueryCountError
                        | ResponseError::WrongName,
                    ) => {
                        res.status = ResolutionStatus::Invalid;
                        counters.invalid += 1;
                    }
                    Err(ResponseError::NxDomain) => {
                        res.status = ResolutionStatus::Nx;
                        counters.nx += 1;
                    }
                    Err(ResponseError::Refused) => {
                        res.status = ResolutionStatus::Refused;
                        counters.refused += 1;
                    }
                    Err(ResponseError::AncountZero) => {
                        res.status = ResolutionStatus::Other;
                        counters.any_err += 1;
                    }
                    Err(ResponseError::CnameError) => {
                        res.status = ResolutionStatus::Other;
                        counters.cname_error += 1;
                    }
                    Err(ResponseError::Truncated) => {
                        res.status = ResolutionStatus::Other;
                        counters.truncated += 1;
                    }
                    Err(
                        ResponseError::NoExpectedRecord
                        | ResponseError::Error
                        | ResponseError::Internal,
                    ) => {
                        res.status = ResolutionStatus::Other;
                        counters.other += 1;
                    }
                }
            }

            if outcome.is_ok() {
                self.check_response(&mut inner, &mut res, now);
            }

            if let Err(_code) = outcome {
                // Errors wait until every queried nameserver answered.
                if res.nb_responses < res.nb_queries {
                    inner.resolutions.insert(uuid, res);
                    continue;
                }
                if res.prefered_query_type != res.query_type {
                    // The fallback already ran; report once the retry
                    // budget is gone, else leave the retry timer to it.
                    if res.try_count == 0 {
                        self.finish_error(&mut inner, res, uuid, now);
                        continue;
                    }
                } else if res.prefered_query_type == DnsType::A {
                    res.query_type = DnsType::AAAA;
                    self.resend_detached(&mut inner, &mut res, now);
                } else if res.prefered_query_type == DnsType::AAAA {
                    res.query_type = DnsType::A;
                    self.resend_detached(&mut inner, &mut res, now);
                }
                inner.resolutions.insert(uuid, res);
                continue;
            }

            // The echoed question must name what we asked for.
            let wrong_name = match (res.response.questions.first(), &res.hostname_dn) {
                (Some(query), Some(name)) => {
                    query.name.label_len() != name.label_len()
                        || !query.name.eq_ignore_case(name)
                }
                _ => false,
            };
            if wrong_name {
                inner.nameservers[ns_index].counters.other += 1;
                res.status = ResolutionStatus::Other;
                self.finish_error(&mut inner, res, uuid, now);
                continue;
            }

            res.status = ResolutionStatus::Valid;
            res.last_valid = now;
            inner.nameservers[ns_index].counters.valid += 1;
            self.notify_success(&mut inner, &mut res, ns_index);
            res.reset(&mut inner.query_ids, now);
            inner.resolutions.insert(uuid, res);
            let SectionInner { curr, wait, .. } = &mut *inner;
            move_to_wait(curr, wait, uuid);
        }
        self.update_timeout_locked(&mut inner, now);
    }

    fn resend_detached(&self, inner: &mut SectionInner, res: &mut Resolution, now: Instant) {
        let SectionInner {
            curr,
            wait,
            nameservers,
            ..
        } = inner;
        send_query(&self.config, nameservers, curr, wait, res, now);
    }

    fn finish_error(
        &self,
        inner: &mut SectionInner,
        mut res: Resolution,
        uuid: u32,
        now: Instant,
    ) {
        self.notify_error(inner, &mut res, now);
        res.reset(&mut inner.query_ids, now);
        inner.resolutions.insert(uuid, res);
        move_to_wait(&mut inner.curr, &mut inner.wait, uuid);
    }

    /// Success notifications, in requester insertion order.  The first
    /// requester accounts counter updates; the rest are served from the
    /// same answer set.
    fn notify_success(&self, inner: &mut SectionInner, res: &mut Resolution, ns_index: usize) {
        let owners = res.requesters.clone();
        let mut first = true;
        for owner in owners {
            match owner {
                RequesterOwner::Server(slot) => {
                    match server_slot::resolution_success(&slot, &mut res.response) {
                        SlotUpdate::Updated(_) => {
                            if first {
                                inner.nameservers[ns_index].counters.update += 1;
                            }
                        }
                        SlotUpdate::NoChange => {}
                        SlotUpdate::NoIp => {
                            // A valid answer set with nothing this slot can
                            // use: keep the address but stop serving.
                            slot.lock().down = true;
                        }
                    }
                }
                RequesterOwner::SrvRequest(_) | RequesterOwner::Stream(_) => {}
            }
            first = false;
        }
    }

    fn notify_error(&self, inner: &mut SectionInner, res: &mut Resolution, now: Instant) {
        let owners = res.requesters.clone();
        for owner in owners {
            match owner {
                RequesterOwner::Server(slot) => {
                    server_slot::resolution_error(
                        &slot,
                        res.status,
                        &self.config.hold,
                        res.last_valid,
                        now,
                    );
                }
                RequesterOwner::SrvRequest(srvrq) => {
                    self.srvrq_resolution_error(inner, &srvrq, res.status, res.last_valid, now);
                }
                RequesterOwner::Stream(_) => {}
            }
        }
    }

    /// A terminal error on an SRV request tears its pool down once the hold
    /// period for the final status has passed.
    fn srvrq_resolution_error(
        &self,
        inner: &mut SectionInner,
        srvrq: &Arc<SrvRequest>,
        status: ResolutionStatus,
        last_valid: Instant,
        now: Instant,
    ) {
        if now <= last_valid + self.config.hold.for_status(status) {
            return;
        }
        debug!("srvrq {}: tearing down slots after {:?}", srvrq.name, status);
        for slot in srvrq.slots() {
            self.unlink_locked(inner, &RequesterOwner::Server(slot.clone()), false, now);
            srvrq::unbind_slot(&mut slot.lock());
        }
    }

    /// Post-merge bookkeeping on a fresh response: evict answers that
    /// outlived `hold.obsolete` (unbinding the slots they fed), then map
    /// every live SRV answer onto a slot of each interested SRV request.
    fn check_response(&self, inner: &mut SectionInner, res: &mut Resolution, now: Instant) {
        let srvrqs: Vec<Arc<SrvRequest>> = res
            .requesters
            .iter()
            .filter_map(|owner| match owner {
                RequesterOwner::SrvRequest(srvrq) => Some(srvrq.clone()),
                _ => None,
            })
            .collect();

        if let Some(hold_obsolete) = self.config.hold.obsolete {
            let mut i = 0;
            while i < res.response.answers.len() {
                // Stale glue goes first; losing it re-enables the per-slot
                // resolution on the next SRV pass.
                if res.response.answers[i]
                    .ar_item
                    .as_ref()
                    .map_or(false, |glue| glue.is_obsolete(hold_obsolete, now))
                {
                    res.response.answers[i].ar_item = None;
                }
                if !res.response.answers[i].is_obsolete(hold_obsolete, now) {
                    i += 1;
                    continue;
                }
                let item = res.response.answers.remove(i);
                if let AnswerData::SRV { port, target, .. } = &item.data {
                    self.unbind_obsolete_srv(inner, &srvrqs, *port, target, now);
                }
            }
        }

        for i in 0..res.response.answers.len() {
            let (weight, port, target, glue_addr) = {
                let item = &res.response.answers[i];
                let AnswerData::SRV {
                    weight,
                    port,
                    target,
                    ..
                } = &item.data
                else {
                    continue;
                };
                (
                    *weight,
                    *port,
                    target.clone(),
                    item.ar_item.as_ref().and_then(|glue| glue.address()),
                )
            };
            for srvrq in &srvrqs {
                self.materialize_srv(inner, srvrq, weight, port, &target, glue_addr, now);
            }
        }
    }

    fn unbind_obsolete_srv(
        &self,
        inner: &mut SectionInner,
        srvrqs: &[Arc<SrvRequest>],
        port: u16,
        target: &DnsName,
        now: Instant,
    ) {
        for srvrq in srvrqs {
            while let Some(slot) = srvrq.find_bound_slot(port, target) {
                debug!(
                    "srvrq {}: SRV record for {}:{} went obsolete",
                    srvrq.name, target, port
                );
                self.unlink_locked(inner, &RequesterOwner::Server(slot.clone()), false, now);
                srvrq::unbind_slot(&mut slot.lock());
            }
        }
    }

    /// Binds one SRV answer to a slot: the slot already serving the
    /// `(target, port)` pair, or the first slot without a hostname.  Glue
    /// supplies the address directly and turns the per-slot resolution off;
    /// otherwise the slot gets the target as FQDN and its own A/AAAA
    /// resolution.
    fn materialize_srv(
        &self,
        inner: &mut SectionInner,
        srvrq: &Arc<SrvRequest>,
        weight: u16,
        port: u16,
        target: &DnsName,
        glue_addr: Option<std::net::IpAddr>,
        now: Instant,
    ) {
        let slot = srvrq
            .find_bound_slot(port, target)
            .or_else(|| srvrq.find_free_slot());
        let Some(slot) = slot else { return };

        slot.lock().no_resolution = false;
        if let Some(addr) = glue_addr {
            {
                let mut state = slot.lock();
                state.addr = Some(addr);
                state.no_resolution = true;
            }
            // Glue already answered; an extra per-slot resolution would be
            // a wasted query.
            self.unlink_locked(inner, &RequesterOwner::Server(slot.clone()), false, now);
        }
        {
            let mut state = slot.lock();
            if state.hostname_dn.is_none() {
                debug!("srvrq {}: slot {} now serves {}:{}", srvrq.name, slot.id, target, port);
                state.hostname = Some(target.to_string());
                state.hostname_dn = Some(target.clone());
            }
        }
        let needs_link = {
            let state = slot.lock();
            !state.no_resolution && state.linked.is_none()
        };
        if needs_link {
            self.link_locked(inner, RequesterOwner::Server(slot.clone()), now);
        }
        let mut state = slot.lock();
        state.down = state.addr.is_none();
        state.svc_port = port;
        state.map_ports = false;
        if !slot.opts.ignore_weight {
            state.weight = srvrq::srv_weight(weight);
        }
    }
}

/// Finds a live resolution already serving `(name, query_type)` on either
/// list, or creates an idle one on the wait list.
fn pick_resolution(
    inner: &mut SectionInner,
    hostname_dn: Option<&DnsName>,
    query_type: DnsType,
    now: Instant,
) -> u32 {
    if let Some(name) = hostname_dn {
        for uuid in inner.curr.iter().chain(inner.wait.iter()) {
            if let Some(res) = inner.resolutions.get(uuid) {
                if res.matches(name, query_type) {
                    return *uuid;
                }
            }
        }
    }
    let uuid = inner.next_uuid;
    inner.next_uuid = inner.next_uuid.wrapping_add(1);
    inner
        .resolutions
        .insert(uuid, Resolution::new(uuid, hostname_dn.cloned(), query_type, now));
    inner.wait.push_back(uuid);
    uuid
}
