use std::time::Duration;

use b2bua_types::{CallState, MonoTime, Route, TimerId};
use b2bua_reactor::TimerService;
use tracing::{info, warn};

use crate::accounting::{Accounting, FakeAccounting};
use crate::error::CallControlViolation;
use crate::sdp::{SdpBody, SdpFilterOutcome, apply_nat_tag, filter_codecs};
use crate::translate::TranslationChain;
use crate::ua::{CallEvent, Leg, UaState, UserAgent};

/// Static per-call configuration `CallController` needs but does not own
/// — the slice of `Config` relevant to one call, passed in at
/// construction rather than a shared global, so tests don't need a full
/// `Config`.
#[derive(Clone, Debug)]
pub struct ControllerOptions {
    pub auth_enable: bool,
    pub acct_enable: bool,
    pub hide_call_id: bool,
    pub allowed_payload_types: Option<Vec<u8>>,
    pub static_tr_in: Option<String>,
    pub static_tr_out: Option<String>,
    pub keepalive_ans: Option<Duration>,
    pub keepalive_orig: Option<Duration>,
    pub max_credit_time: Option<u32>,
    pub group_expires: Option<Duration>,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            auth_enable: false,
            acct_enable: false,
            hide_call_id: false,
            allowed_payload_types: None,
            static_tr_in: None,
            static_tr_out: None,
            keepalive_ans: None,
            keepalive_orig: None,
            max_credit_time: None,
            group_expires: None,
        }
    }
}

/// SIP's own default when an inbound request carries no `Max-Forwards`
/// header at all (RFC 3261 §8.1.1.6).
const DEFAULT_MAX_FORWARDS: u32 = 70;

/// Mangle a Call-ID for presentation to the O leg when `hide_call_id` is
/// set: the original hex-encodes an MD5 digest of the original Call-ID so
/// the two legs cannot be correlated by a party that only sees one side.
pub fn mangle_call_id(call_id: &str) -> String {
    format!("{:x}", md5::compute(call_id.as_bytes()))
}

/// Couples an inbound (A, answering/UAS) leg to an outbound (O,
/// originating/UAC) leg and drives both through the shared state machine
/// described by `CallState`, after `b2bua_radius.py::CallController`.
pub struct CallController {
    pub id: u64,
    pub call_id: String,
    pub state: CallState,
    pub remote_ip: String,
    pub ua_a: Box<dyn UserAgent>,
    pub ua_o: Option<Box<dyn UserAgent>>,
    pub routes: Vec<Route>,
    pub huntstop_scodes: Vec<u16>,
    pub proxied: bool,
    pub username: Option<String>,
    pub cli: Option<String>,
    pub cld: Option<String>,
    pub caller_name: Option<String>,
    /// Hop count remaining before this call must be rejected with 483
    /// rather than originated onward. Decremented by one at each
    /// `place_originate`.
    pub max_forwards: u32,
    pub acct_a: Option<Box<dyn Accounting>>,
    pub acct_o: Option<Box<dyn Accounting>>,
    /// `WWW-Authenticate` value queued by the caller (e.g. the RADIUS/
    /// digest-auth layer) before calling `auth_done(false, ..)`. When
    /// set, an auth failure is reported to the A leg as 401 + challenge
    /// rather than a plain 403.
    pub challenge: Option<String>,
    /// Call-ID presented to the O leg on the most recent `place_originate`
    /// (mangled + `-b2b_<rnum>`-suffixed per `hide_call_id`), kept for
    /// inspection/logging since building the actual outbound dialog is
    /// left to the caller.
    pub outbound_call_id: Option<String>,
    options: ControllerOptions,
    timers: TimerService,
    group_timer: Option<TimerId>,
    keepalive_timer_a: Option<TimerId>,
    keepalive_timer_o: Option<TimerId>,
}

impl CallController {
    pub fn new(
        id: u64,
        remote_ip: impl Into<String>,
        ua_a: Box<dyn UserAgent>,
        options: ControllerOptions,
        timers: TimerService,
    ) -> Self {
        Self {
            id,
            call_id: String::new(),
            state: CallState::Idle,
            remote_ip: remote_ip.into(),
            ua_a,
            ua_o: None,
            routes: Vec::new(),
            huntstop_scodes: Vec::new(),
            proxied: false,
            username: None,
            cli: None,
            cld: None,
            caller_name: None,
            max_forwards: DEFAULT_MAX_FORWARDS,
            acct_a: None,
            acct_o: None,
            challenge: None,
            outbound_call_id: None,
            options,
            timers,
            group_timer: None,
            keepalive_timer_a: None,
            keepalive_timer_o: None,
        }
    }

    /// Handle an event from the A leg while still `Idle` — the only state
    /// in which a new dialog can be established. Mirrors `recvEvent`'s
    /// first branch.
    pub fn recv_try(&mut self, event: CallEvent) -> Result<(), CallControlViolation> {
        if self.state != CallState::Idle {
            return Err(CallControlViolation::UnexpectedEventWhileIdle {
                call_id: self.call_id.clone(),
                event: event.name(),
            });
        }
        let CallEvent::Try {
            call_id,
            cli,
            cld,
            caller_name,
            mut sdp,
            auth: _auth,
            max_forwards,
        } = event
        else {
            self.ua_a.recv_event(CallEvent::Disconnect { rtime: None });
            self.state = CallState::Dead;
            return Ok(());
        };

        self.call_id = call_id;
        self.cli = cli;
        self.caller_name = caller_name;
        self.max_forwards = max_forwards.unwrap_or(DEFAULT_MAX_FORWARDS);

        let mut cld = cld;
        if let Some(allowed) = &self.options.allowed_payload_types {
            if let Some(body) = sdp.as_mut() {
                if filter_codecs(body, allowed) == SdpFilterOutcome::NoAcceptableCodecs {
                    self.ua_a.recv_event(CallEvent::Fail {
                        code: 488,
                        reason: "Not Acceptable Here".to_string(),
                        challenge: None,
                    });
                    self.state = CallState::Dead;
                    return Ok(());
                }
            }
        }
        cld = apply_nat_tag(&cld, &mut sdp);
        if let Some(spec) = &self.options.static_tr_in {
            if let Ok(chain) = TranslationChain::parse(spec) {
                cld = chain.apply(&cld);
            }
        }
        self.cld = Some(cld);
        self.state = CallState::WaitRoute;
        info!(call_id = %self.call_id, cld = ?self.cld, "call entering WaitRoute");
        Ok(())
    }

    /// Authorization completed (successfully or not). `routes` is the
    /// caller-resolved hunt list (static config or RADIUS `Routing:`
    /// entries already turned into concrete `Route`s) — this crate has no
    /// RADIUS wire client, so resolution happens upstream of this call.
    pub fn auth_done(&mut self, accepted: bool, mut routes: Vec<Route>) {
        if !accepted {
            let challenge = self.challenge.take();
            let (code, reason) = match &challenge {
                Some(_) => (401, "Unauthorized".to_string()),
                None => (403, "Auth Failed".to_string()),
            };
            self.ua_a.recv_event(CallEvent::Fail {
                code,
                reason,
                challenge,
            });
            self.state = CallState::Dead;
            return;
        }
        if self.options.acct_enable {
            let mut acct = FakeAccounting::new();
            acct.set_params(
                self.username.as_deref().unwrap_or(&self.remote_ip),
                self.cli.as_deref(),
                self.cld.as_deref().unwrap_or(""),
                &self.call_id,
                &self.remote_ip,
            );
            self.acct_a = Some(Box::new(acct));
        }
        routes.retain(Route::is_viable);
        self.routes = routes;
        self.state = CallState::ARComplete;
        if self.routes.is_empty() {
            self.ua_a.recv_event(CallEvent::Fail {
                code: 480,
                reason: "Temporarily Unavailable".to_string(),
                challenge: None,
            });
            self.state = CallState::Dead;
            return;
        }
        if let Err(violation) = self.place_originate() {
            warn!(%violation, "place_originate precondition violated");
            self.ua_a.recv_event(CallEvent::Fail {
                code: 500,
                reason: "Internal Server Error".to_string(),
                challenge: None,
            });
            self.state = CallState::Dead;
        }
    }

    /// Dial the next route in the hunt list. Arms the group-expiry timer
    /// if the route carries one, and applies `hide_call_id`/static
    /// outbound translation before handing off to the O leg.
    ///
    /// Also enforces the hop-count budget: a call whose `Max-Forwards`
    /// would reach zero on this hop is rejected with 483 rather than
    /// originated, matching a forwarding loop guard rather than an
    /// internal-invariant violation (`Err` is reserved for preconditions
    /// a caller should never be able to trigger).
    fn place_originate(&mut self) -> Result<(), CallControlViolation> {
        let mut route = match self.routes.first() {
            None => {
                return Err(CallControlViolation::NoRoutesRemaining {
                    call_id: self.call_id.clone(),
                });
            }
            Some(_) => self.routes.remove(0),
        };
        if !route.is_viable() {
            return Err(CallControlViolation::NonViableRouteSelected {
                call_id: self.call_id.clone(),
                index: route.rnum as usize,
            });
        }

        if self.max_forwards <= 1 {
            self.ua_a.recv_event(CallEvent::Fail {
                code: 483,
                reason: "Too Many Hops".to_string(),
                challenge: None,
            });
            self.state = CallState::Dead;
            return Ok(());
        }
        self.max_forwards -= 1;

        self.huntstop_scodes = route.huntstop_scodes();
        if let Some(spec) = &self.options.static_tr_out {
            if let Ok(chain) = TranslationChain::parse(spec) {
                route.cld = chain.apply(&route.cld);
            }
        }
        let base = if self.options.hide_call_id {
            mangle_call_id(&self.call_id)
        } else {
            self.call_id.clone()
        };
        let outbound_call_id = format!("{}-b2b_{}", base, route.rnum);
        info!(call_id = %outbound_call_id, dest = %route.destination, "placing originate");
        self.outbound_call_id = Some(outbound_call_id);

        if let Some(expires) = self.options.group_expires {
            let group = route.group;
            let call_id = self.call_id.clone();
            // Stored so a future `group_expires` call can recognize a
            // stale firing after routes moved on without cancelling this
            // exact timer (lazy tombstone, same policy as `TimerHeap`).
            self.group_timer = Some(self.timers.schedule_once(expires, move |_| {
                warn!(call_id = %call_id, group, "group_expires fired (stale-check happens in caller)");
            }));
        }

        self.proxied = true;
        self.state = CallState::ARComplete;
        // Wiring `route` onto a concrete `UserAgent::send_event(Try{..})`
        // is left to the caller that owns `self.ua_o` construction, since
        // building a UAC requires a transport this crate does not
        // implement (see `ua::UserAgent`).
        Ok(())
    }

    /// A route in the hunt list failed or disconnected before connecting.
    /// If the failure code is not in `huntstop_scodes`, try the next
    /// route; otherwise give up and fail the A leg. Mirrors `recvEvent`'s
    /// O-leg branch exactly, including the `code == None` (e.g. a plain
    /// disconnect, not a SIP failure response) always-hunt case.
    pub fn recv_o_leg_fail(&mut self, code: Option<u16>) -> Result<(), CallControlViolation> {
        if self.state != CallState::ARComplete {
            return Ok(());
        }
        let a_trying_or_ringing = self.ua_a.state().is_trying_or_ringing();
        if !a_trying_or_ringing || self.routes.is_empty() {
            self.ua_a.recv_event(CallEvent::Fail {
                code: code.unwrap_or(500),
                reason: "Internal Server Error".to_string(),
                challenge: None,
            });
            self.state = CallState::Dead;
            return Ok(());
        }
        let should_hunt = match code {
            None => true,
            Some(c) => !self.huntstop_scodes.contains(&c),
        };
        if should_hunt {
            if let Err(violation) = self.place_originate() {
                warn!(%violation, "place_originate precondition violated");
                self.ua_a.recv_event(CallEvent::Fail {
                    code: 500,
                    reason: "Internal Server Error".to_string(),
                    challenge: None,
                });
                self.state = CallState::Dead;
            }
        } else {
            self.ua_a.recv_event(CallEvent::Fail {
                code: code.unwrap_or(500),
                reason: "Call Rejected".to_string(),
                challenge: None,
            });
            self.state = CallState::Dead;
        }
        Ok(())
    }

    /// Route an event arriving after the initial `Try`/`auth_done`
    /// exchange, from whichever leg produced it. `recv_try` covers `Idle`
    /// and `auth_done`/`place_originate` cover the routing transitions
    /// into `ARComplete`; this covers what happens once a route is in
    /// flight or the call is up: ARComplete forwards the A leg's traffic
    /// to O and reacts specially to an A-leg Connect and an O-leg
    /// failure, Connected forwards either leg's events to its peer and
    /// tears down on an A-leg Disconnect, and an event received after
    /// Dead is rejected outright.
    pub fn recv_event(&mut self, from: Leg, event: CallEvent) -> Result<(), CallControlViolation> {
        if self.state == CallState::Dead {
            return Err(CallControlViolation::EventAfterDead {
                call_id: self.call_id.clone(),
                event: event.name(),
            });
        }
        match (from, self.state) {
            (Leg::A, CallState::WaitRoute) => {
                if matches!(event, CallEvent::Disconnect { .. }) {
                    self.state = CallState::Dead;
                }
            }
            (Leg::A, CallState::ARComplete) => {
                if matches!(event, CallEvent::Connect { .. }) {
                    if let Some(acct_a) = &mut self.acct_a {
                        acct_a.start(MonoTime::now());
                    }
                    self.state = CallState::Connected;
                }
                if let Some(ua_o) = &mut self.ua_o {
                    ua_o.send_event(event);
                }
            }
            (Leg::O, CallState::ARComplete) => match event {
                CallEvent::Fail { code, .. } => self.recv_o_leg_fail(Some(code))?,
                CallEvent::Disconnect { .. } => self.recv_o_leg_fail(None)?,
                other => self.ua_a.send_event(other),
            },
            (Leg::A, CallState::Connected) => {
                if let CallEvent::Disconnect { rtime } = event {
                    if let Some(acct_a) = &mut self.acct_a {
                        acct_a.disc(rtime.unwrap_or_else(MonoTime::now), "caller");
                    }
                    self.state = CallState::Disconnecting;
                    if let Some(ua_o) = &mut self.ua_o {
                        ua_o.send_event(CallEvent::Disconnect { rtime });
                    }
                } else if let Some(ua_o) = &mut self.ua_o {
                    ua_o.send_event(event);
                }
            }
            (Leg::O, CallState::Connected) | (Leg::O, CallState::Disconnecting) => {
                self.ua_a.send_event(event);
            }
            _ => {}
        }
        Ok(())
    }

    /// One leg's user agent reached `Dead`, after the original's
    /// `aDead`/`oDead` callbacks (kept separate from `recv_event` since
    /// neither callback corresponds to a `CallEvent` the peer leg should
    /// ever see). Once the other leg is also gone, the call itself moves
    /// to `Dead`.
    pub fn leg_dead(&mut self, leg: Leg) {
        if self.state == CallState::Dead {
            return;
        }
        let other_dead = match leg {
            Leg::A => self.ua_o.as_ref().is_none_or(|o| o.state() == UaState::Dead),
            Leg::O => self.ua_a.state() == UaState::Dead,
        };
        if other_dead {
            self.state = CallState::Dead;
        }
    }

    /// A hunt-group-wide timeout fired: skip every route belonging to
    /// groups at or before `skipto`, per `group_expires`. If the last
    /// group in the list timed out, clear the route list (forward-on-fail
    /// semantics stop, but the in-flight attempt is left alone) rather
    /// than forcefully disconnecting it.
    pub fn group_expires(&mut self, skipto: u32) -> Result<(), CallControlViolation> {
        if self.state != CallState::ARComplete
            || self.routes.is_empty()
            || self.routes[0].group > skipto
            || !self.ua_a.state().is_trying_or_ringing()
        {
            return Ok(());
        }
        if let Some(last) = self.routes.last() {
            if skipto == last.group + 1 {
                self.routes.clear();
                return Ok(());
            }
        }
        while self.routes.first().map(|r| r.group) != Some(skipto) {
            if self.routes.is_empty() {
                return Err(CallControlViolation::StaleGroupExpiry {
                    call_id: self.call_id.clone(),
                    group: skipto,
                });
            }
            self.routes.remove(0);
        }
        if let Some(ua_o) = &mut self.ua_o {
            ua_o.recv_event(CallEvent::Disconnect { rtime: None });
        }
        Ok(())
    }

    /// Schedule each connected leg's periodic keepalive ping, per
    /// `kaInterval`. A no-op for a leg with no configured interval.
    pub fn schedule_keepalives(&mut self) {
        if let Some(interval) = self.options.keepalive_ans {
            self.keepalive_timer_a = Some(self.timers.schedule_periodic(interval, None, |_| {}));
        }
        if let Some(interval) = self.options.keepalive_orig {
            self.keepalive_timer_o = Some(self.timers.schedule_periodic(interval, None, |_| {}));
        }
    }

    pub fn disconnect(&mut self, rtime: Option<MonoTime>) {
        if let Some(id) = self.group_timer.take() {
            self.timers.cancel(id);
        }
        if let Some(id) = self.keepalive_timer_a.take() {
            self.timers.cancel(id);
        }
        if let Some(id) = self.keepalive_timer_o.take() {
            self.timers.cancel(id);
        }
        self.state = CallState::Disconnecting;
        self.ua_a.recv_event(CallEvent::Disconnect { rtime });
        if let Some(ua_o) = &mut self.ua_o {
            ua_o.recv_event(CallEvent::Disconnect { rtime });
        }
        self.state = CallState::Dead;
    }
}
