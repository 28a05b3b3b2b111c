use crate::{
    get_ip_from_response, lock_ignore_poison, DnsName, RequesterOwner, ResolutionStatus,
    ResolutionStep, ResolvOptions, Resolvers,
};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Whether a request-time resolution finished or wants to be called again.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ActReturn {
    /// Done: either an address was stored in the context, or the action was
    /// abandoned.
    Continue,
    /// A resolution is in flight; re-run the action on the next wake-up.
    Yield,
}

/// The resolver-side context of one in-flight request running a
/// `do-resolve` action.  The selected address lands in `result`; argument
/// parsing and variable binding stay with the caller.
pub struct StreamCtx {
    pub opts: ResolvOptions,
    pub(crate) hostname_dn: Mutex<Option<DnsName>>,
    pub(crate) linked: Mutex<Option<u32>>,
    result: Mutex<Option<IpAddr>>,
}
impl StreamCtx {
    #[must_use]
    pub fn new(opts: ResolvOptions) -> Arc<Self> {
        Arc::new(Self {
            opts,
            hostname_dn: Mutex::new(None),
            linked: Mutex::new(None),
            result: Mutex::new(None),
        })
    }

    /// The address the last completed resolution selected, if any.
    #[must_use]
    pub fn result(&self) -> Option<IpAddr> {
        *lock_ignore_poison(&self.result)
    }

    fn set_result(&self, ip: Option<IpAddr>) {
        *lock_ignore_poison(&self.result) = ip;
    }
}
impl core::fmt::Debug for StreamCtx {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> Result<(), core::fmt::Error> {
        write!(f, "StreamCtx(result={:?})", self.result())
    }
}

impl Resolvers {
    /// Executes one pass of the request-time `do-resolve` action.
    ///
    /// The first call links the context to a resolution for `fqdn`; a fresh
    /// cached answer is consumed immediately, otherwise the dispatcher is
    /// woken and the action yields.  Later calls consume the outcome once
    /// the resolution left the running state.  When `final_call` is set the
    /// requester is always released before returning, whatever the state.
    pub fn do_resolve(&self, ctx: &Arc<StreamCtx>, fqdn: &str, final_call: bool) -> ActReturn {
        let now = Instant::now();
        let mut inner = self.lock_inner();

        if ctx_linked(ctx) {
            return self.consume_resolution(&mut inner, ctx, final_call, now);
        }

        let Ok(hostname_dn) = DnsName::new(fqdn) else {
            // A bad hostname silently disables the action.
            return ActReturn::Continue;
        };
        *lock_ignore_poison(&ctx.hostname_dn) = Some(hostname_dn);
        self.link_locked(&mut inner, RequesterOwner::Stream(ctx.clone()), now);
        if !ctx_linked(ctx) {
            self.release_stream(&mut inner, ctx, now);
            return ActReturn::Continue;
        }

        let cached = {
            let owner = RequesterOwner::Stream(ctx.clone());
            match owner
                .linked_uuid()
                .and_then(|uuid| inner.resolution_state(uuid))
            {
                Some((status, _step, last_resolution)) => {
                    status == ResolutionStatus::Valid
                        && last_resolution.map_or(false, |t| now < t + self.config.hold.valid)
                }
                None => false,
            }
        };
        if cached {
            return self.consume_resolution(&mut inner, ctx, final_call, now);
        }

        self.wake_dispatcher();
        if final_call {
            self.release_stream(&mut inner, ctx, now);
            return ActReturn::Continue;
        }
        ActReturn::Yield
    }
}

fn ctx_linked(ctx: &Arc<StreamCtx>) -> bool {
    lock_ignore_poison(&ctx.linked).is_some()
}

impl Resolvers {
    fn consume_resolution(
        &self,
        inner: &mut crate::resolvers::SectionInner,
        ctx: &Arc<StreamCtx>,
        final_call: bool,
        now: Instant,
    ) -> ActReturn {
        let uuid = *lock_ignore_poison(&ctx.linked);
        let Some(uuid) = uuid else {
            return ActReturn::Continue;
        };
        match inner.resolution_state(uuid) {
            Some((_, ResolutionStep::Running, _)) => {
                if final_call {
                    self.release_stream(inner, ctx, now);
                    return ActReturn::Continue;
                }
                return ActReturn::Yield;
            }
            Some((status, ResolutionStep::None, _)) => {
                if status == ResolutionStatus::Valid {
                    if let Some(response) = inner.response_of_mut(uuid) {
                        let (ip, _code) = get_ip_from_response(response, &ctx.opts, None, None);
                        ctx.set_result(ip);
                    }
                }
            }
            None => {}
        }
        self.release_stream(inner, ctx, now);
        ActReturn::Continue
    }

    fn release_stream(
        &self,
        inner: &mut crate::resolvers::SectionInner,
        ctx: &Arc<StreamCtx>,
        now: Instant,
    ) {
        *lock_ignore_poison(&ctx.hostname_dn) = None;
        self.unlink_locked(inner, &RequesterOwner::Stream(ctx.clone()), false, now);
    }
}
