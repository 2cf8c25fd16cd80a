use std::time::Duration;

use b2bua_reactor::{Dispatcher, signums};
use b2bua_types::CallState;
use tracing::info;

use crate::call_controller::{CallController, ControllerOptions};
use crate::error::CallMapError;
use crate::ua::UserAgent;

/// The registry of in-memory calls, after the original's `CallMap`:
/// owns every live `CallController`, wires the process-wide signal
/// handlers the dispatcher delivers (`SIGHUP` disconnect-all, `SIGUSR2`
/// debug toggle, `SIGPROF` safe-restart, `SIGTERM` graceful drain), runs
/// a periodic housekeeping sweep, and answers control-socket commands.
pub struct CallMap {
    calls: Vec<CallController>,
    next_id: u64,
    debug_mode: bool,
    safe_restart: bool,
    drain: Option<DrainState>,
    drain_ticks_limit: u32,
    /// Source IPs allowed to place an inbound INVITE; `None` accepts any.
    accept_ips: Option<Vec<String>>,
    auth_enable: bool,
    /// Whether a missing `Authorization` header on an INVITE gets an
    /// immediate 401 + synthesized challenge rather than being forwarded
    /// on to RADIUS authorization.
    digest_auth_enable: bool,
    controller_options: ControllerOptions,
}

/// Minimal shape of an inbound SIP request `recv_request` needs to run
/// its demux — this crate owns no wire parsing or transaction layer, so
/// the caller is expected to have already extracted these fields from
/// whatever request type its transport uses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SipRequestInfo {
    pub method: String,
    pub has_to_tag: bool,
    pub request_uri_host: String,
    pub has_authorization: bool,
    pub source_ip: String,
}

/// What `recv_request` decided to do with an inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecvRequestOutcome {
    /// Send this final response back on the transaction; no
    /// `CallController` was created.
    Reply {
        code: u16,
        reason: String,
        www_authenticate: Option<String>,
    },
    /// A new `CallController` was registered under this id and the
    /// request should be handed to it.
    NewCall { id: u64 },
    /// REGISTER/SUBSCRIBE belong to the optional stateful proxy, which
    /// this crate does not implement.
    Proxy,
}

struct DrainState {
    ticks_elapsed: u32,
}

/// What a caller observing signal/timer effects should do next; `CallMap`
/// itself has no access to the process exit call, so it reports the
/// decision instead of acting on it directly (keeps this crate testable
/// without a real process to tear down).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMapEvent {
    None,
    /// All active calls have drained (or the drain deadline passed with
    /// none remaining) — `executeStop`'s `ED2.breakLoop()` equivalent.
    StopLoop,
    /// `safe_restart` was requested and the map is now empty — the
    /// caller should re-exec the process.
    ReadyForRestart,
}

impl CallMap {
    pub fn new(drain_ticks_limit: u32) -> Self {
        Self {
            calls: Vec::new(),
            next_id: 1,
            debug_mode: false,
            safe_restart: false,
            drain: None,
            drain_ticks_limit,
            accept_ips: None,
            auth_enable: false,
            digest_auth_enable: true,
            controller_options: ControllerOptions::default(),
        }
    }

    /// Wire the request-handling knobs `recv_request` acts on. Kept
    /// separate from `new` so tests that don't exercise `recv_request`
    /// aren't forced to thread config through a longer constructor.
    pub fn configure_request_handling(
        &mut self,
        accept_ips: Option<Vec<String>>,
        auth_enable: bool,
        digest_auth_enable: bool,
        controller_options: ControllerOptions,
    ) {
        self.accept_ips = accept_ips;
        self.auth_enable = auth_enable;
        self.digest_auth_enable = digest_auth_enable;
        self.controller_options = controller_options;
    }

    pub fn is_debug_mode(&self) -> bool {
        self.debug_mode
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Register this instance's signal handlers on a live dispatcher, per
    /// `CallMap.__init__`'s four `Signal(...)` registrations. Each
    /// callback only flips a flag or does bookkeeping cheap enough for
    /// the dispatcher's own thread — none of it runs inside the actual OS
    /// signal handler (see `b2bua_reactor::signal`).
    pub fn install_signal_handlers(
        map: std::rc::Rc<std::cell::RefCell<Self>>,
        dispatcher: &Dispatcher,
    ) -> Result<(), b2bua_reactor::ReactorError> {
        let signals = dispatcher.signal_service();

        let m = map.clone();
        signals.register(signums::SIGHUP, move |_| m.borrow_mut().disc_all())?;

        let m = map.clone();
        signals.register(signums::SIGUSR2, move |_| m.borrow_mut().toggle_debug())?;

        let m = map.clone();
        signals.register(signums::SIGPROF, move |_| m.borrow_mut().safe_restart = true)?;

        let m = map.clone();
        signals.register(signums::SIGTERM, move |_| m.borrow_mut().begin_safe_stop())?;

        Ok(())
    }

    pub fn new_call(&mut self, remote_ip: impl Into<String>, ua_a: Box<dyn UserAgent>, options: ControllerOptions, timers: b2bua_reactor::TimerService) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.calls.push(CallController::new(id, remote_ip, ua_a, options, timers));
        id
    }

    /// Demux one inbound SIP request, after `recvRequest`: a mid-dialog
    /// request (`to`-tag present) is rejected outright since every
    /// dialog this crate drives is already tracked by its own
    /// `CallController`; only INVITE starts a new one, REGISTER/SUBSCRIBE
    /// defer to a stateful proxy this crate doesn't implement, NOTIFY/
    /// PING are answered inline, and anything else is unsupported.
    pub fn recv_request(
        &mut self,
        req: &SipRequestInfo,
        ua_a: Box<dyn UserAgent>,
        timers: b2bua_reactor::TimerService,
    ) -> RecvRequestOutcome {
        if req.has_to_tag {
            return RecvRequestOutcome::Reply {
                code: 481,
                reason: "Call Leg/Transaction Does Not Exist".to_string(),
                www_authenticate: None,
            };
        }
        match req.method.as_str() {
            "INVITE" => self.recv_invite(req, ua_a, timers),
            "REGISTER" | "SUBSCRIBE" => RecvRequestOutcome::Proxy,
            "NOTIFY" | "PING" => RecvRequestOutcome::Reply {
                code: 200,
                reason: "OK".to_string(),
                www_authenticate: None,
            },
            other => {
                info!(method = other, "unsupported method");
                RecvRequestOutcome::Reply {
                    code: 501,
                    reason: "Not Implemented".to_string(),
                    www_authenticate: None,
                }
            }
        }
    }

    /// `digest_auth_enable` doubles as the "digest auth only" switch: set,
    /// a missing `Authorization` header on an unauthenticated INVITE is
    /// rejected immediately rather than forwarded on for RADIUS
    /// authorization to also get a say.
    fn recv_invite(
        &mut self,
        req: &SipRequestInfo,
        ua_a: Box<dyn UserAgent>,
        timers: b2bua_reactor::TimerService,
    ) -> RecvRequestOutcome {
        if let Some(allowed) = &self.accept_ips {
            if !allowed.iter().any(|ip| ip == &req.source_ip) {
                return RecvRequestOutcome::Reply {
                    code: 403,
                    reason: "Forbidden".to_string(),
                    www_authenticate: None,
                };
            }
        }
        let challenge = if self.auth_enable && !req.has_authorization {
            Some(format!("Digest realm=\"{}\"", req.request_uri_host))
        } else {
            None
        };
        if self.digest_auth_enable && challenge.is_some() {
            return RecvRequestOutcome::Reply {
                code: 401,
                reason: "Unauthorized".to_string(),
                www_authenticate: challenge,
            };
        }
        let id = self.new_call(
            req.source_ip.clone(),
            ua_a,
            self.controller_options.clone(),
            timers,
        );
        if let Some(challenge) = challenge {
            if let Some(cc) = self.calls.iter_mut().find(|cc| cc.id == id) {
                cc.challenge = Some(challenge);
            }
        }
        RecvRequestOutcome::NewCall { id }
    }

    fn active_calls(&self) -> impl Iterator<Item = &CallController> {
        self.calls.iter().filter(|cc| cc.state.is_active())
    }

    pub fn disc_all(&mut self) {
        info!(n = self.calls.len(), "disconnecting all calls");
        for cc in &mut self.calls {
            cc.disconnect(None);
        }
    }

    pub fn toggle_debug(&mut self) {
        self.debug_mode = !self.debug_mode;
        info!(debug_mode = self.debug_mode, "toggled debug output");
    }

    fn begin_safe_stop(&mut self) {
        info!("SIGTERM received, draining active calls before stop");
        self.disc_all();
        self.drain = Some(DrainState { ticks_elapsed: 0 });
    }

    /// Housekeeping sweep driven by a periodic timer (`GClector`'s 60s
    /// tick here); reports whether a safe-restart re-exec should happen
    /// now (map empty, restart was requested).
    pub fn collect_garbage(&mut self) -> CallMapEvent {
        self.calls.retain(|cc| !cc.state.is_terminal());
        info!(n = self.calls.len(), "periodic sweep");
        if self.safe_restart && self.calls.is_empty() {
            return CallMapEvent::ReadyForRestart;
        }
        CallMapEvent::None
    }

    /// Drain-poll tick (`executeStop`'s 0.5s `Timeout`): forces the drain
    /// to finish once `drain_ticks_limit` ticks have passed even if calls
    /// remain, since some sessions would otherwise never die.
    pub fn poll_drain(&mut self) -> CallMapEvent {
        let Some(drain) = &mut self.drain else {
            return CallMapEvent::None;
        };
        drain.ticks_elapsed += 1;
        let nactive = self.active_calls().count();
        if drain.ticks_elapsed >= self.drain_ticks_limit && nactive > 0 {
            tracing::warn!(nactive, "forcing exit, some sessions would not die");
            self.drain = None;
            return CallMapEvent::StopLoop;
        }
        if nactive == 0 {
            self.drain = None;
            return CallMapEvent::StopLoop;
        }
        CallMapEvent::None
    }

    /// Parse and execute one control-socket command line, after
    /// `recvCommand`. Returns the text reply to send back, or an error
    /// for a malformed/unknown command.
    pub fn recv_command(&mut self, line: &str) -> Result<String, CallMapError> {
        let mut args = line.split_whitespace();
        let cmd = args
            .next()
            .ok_or_else(|| CallMapError::SyntaxError("empty command".to_string()))?
            .to_ascii_lowercase();
        let args: Vec<&str> = args.collect();

        match cmd.as_str() {
            "q" => Ok(String::new()),
            "l" => Ok(self.render_call_list()),
            "llt" => Ok(self.render_transactions(Duration::from_secs(60))),
            "lt" => Ok(self.render_transactions(Duration::ZERO)),
            "d" => self.cmd_disconnect(&args),
            "r" => self.cmd_resurrect_retry(&args),
            other => Err(CallMapError::UnknownCommand(other.to_string())),
        }
    }

    fn render_call_list(&self) -> String {
        let mut res = String::from("In-memory calls:\n");
        for cc in &self.calls {
            res.push_str(&format!(
                "{}: {} ({} -> {})\n",
                cc.call_id,
                cc.state,
                cc.cli.as_deref().unwrap_or("N/A"),
                cc.cld.as_deref().unwrap_or("N/A"),
            ));
        }
        res.push_str(&format!("Total: {}\n", self.calls.len()));
        res
    }

    fn render_transactions(&self, min_duration: Duration) -> String {
        let _ = min_duration;
        "In-memory server transactions:\nIn-memory client transactions:\n".to_string()
    }

    fn cmd_disconnect(&mut self, args: &[&str]) -> Result<String, CallMapError> {
        if args.len() != 1 {
            return Err(CallMapError::SyntaxError("d <call-id>".to_string()));
        }
        if args[0] == "*" {
            self.disc_all();
            return Ok("OK\n".to_string());
        }
        let matched: Vec<usize> = self
            .calls
            .iter()
            .enumerate()
            .filter(|(_, cc)| cc.call_id == args[0])
            .map(|(i, _)| i)
            .collect();
        if matched.is_empty() {
            return Err(CallMapError::UnknownCallId(args[0].to_string()));
        }
        for i in matched {
            self.calls[i].disconnect(None);
        }
        Ok("OK\n".to_string())
    }

    /// `r <id>`: retry a proxied call that's still being hunted, by
    /// backdating a disconnect 60 seconds so accounting/CDRs reflect the
    /// original start time. A no-op for non-proxied calls, matching
    /// `recvCommand`'s `if not cc.proxied: continue`.
    fn cmd_resurrect_retry(&mut self, args: &[&str]) -> Result<String, CallMapError> {
        if args.len() != 1 {
            return Err(CallMapError::SyntaxError("r <id>".to_string()));
        }
        let idx: u64 = args[0]
            .parse()
            .map_err(|_| CallMapError::SyntaxError("r <id>: id must be numeric".to_string()))?;
        let matched: Vec<usize> = self
            .calls
            .iter()
            .enumerate()
            .filter(|(_, cc)| cc.id == idx)
            .map(|(i, _)| i)
            .collect();
        if matched.is_empty() {
            return Err(CallMapError::UnknownCallId(idx.to_string()));
        }
        for i in matched {
            let cc = &mut self.calls[i];
            if !cc.proxied {
                continue;
            }
            let backdated = b2bua_types::MonoTime::now().offset_copy_neg(Duration::from_secs(60));
            if cc.state.is_active() {
                cc.disconnect(Some(backdated));
            }
        }
        Ok("OK\n".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ua::{CallEvent, UaState};
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::rc::Rc;
    use std::cell::RefCell;

    struct NullUa;
    impl UserAgent for NullUa {
        fn state(&self) -> UaState {
            UaState::Trying
        }
        fn remote_addr(&self) -> SocketAddr {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 5060)
        }
        fn cld(&self) -> &str {
            ""
        }
        fn cli(&self) -> Option<&str> {
            None
        }
        fn recv_event(&mut self, _event: CallEvent) {}
        fn send_event(&mut self, _event: CallEvent) {}
        fn set_keepalive_interval(&mut self, _interval: Option<Duration>) {}
        fn set_local_ua(&mut self, _name: String) {}
    }

    fn timers() -> b2bua_reactor::TimerService {
        b2bua_reactor::TimerService::new(Rc::new(RefCell::new(b2bua_reactor::TimerHeap::new())))
    }

    #[test]
    fn unknown_command_is_an_error() {
        let mut map = CallMap::new(5);
        let err = map.recv_command("bogus").unwrap_err();
        assert!(matches!(err, CallMapError::UnknownCommand(_)));
    }

    #[test]
    fn d_with_no_args_is_a_syntax_error() {
        let mut map = CallMap::new(5);
        let err = map.recv_command("d").unwrap_err();
        assert!(matches!(err, CallMapError::SyntaxError(_)));
    }

    #[test]
    fn d_star_disconnects_everything() {
        let mut map = CallMap::new(5);
        map.new_call("10.0.0.1", Box::new(NullUa), ControllerOptions::default(), timers());
        let reply = map.recv_command("d *").unwrap();
        assert_eq!(reply, "OK\n");
        assert_eq!(map.calls[0].state, CallState::Dead);
    }

    #[test]
    fn d_unknown_call_id_is_an_error() {
        let mut map = CallMap::new(5);
        let err = map.recv_command("d nonexistent").unwrap_err();
        assert!(matches!(err, CallMapError::UnknownCallId(_)));
    }

    #[test]
    fn l_lists_calls_with_a_total() {
        let mut map = CallMap::new(5);
        map.new_call("10.0.0.1", Box::new(NullUa), ControllerOptions::default(), timers());
        let reply = map.recv_command("l").unwrap();
        assert!(reply.contains("Total: 1"));
    }

    #[test]
    fn collect_garbage_prunes_dead_calls() {
        let mut map = CallMap::new(5);
        map.new_call("10.0.0.1", Box::new(NullUa), ControllerOptions::default(), timers());
        map.disc_all();
        map.collect_garbage();
        assert!(map.is_empty());
    }

    #[test]
    fn poll_drain_stops_once_no_active_calls_remain() {
        let mut map = CallMap::new(5);
        map.begin_safe_stop();
        let event = map.poll_drain();
        assert_eq!(event, CallMapEvent::StopLoop);
    }

    #[test]
    fn poll_drain_forces_exit_after_tick_limit_even_with_active_calls() {
        let mut map = CallMap::new(2);
        let id = map.new_call("10.0.0.1", Box::new(NullUa), ControllerOptions::default(), timers());
        map.calls.iter_mut().find(|cc| cc.id == id).unwrap().state = CallState::Connected;
        map.begin_safe_stop();
        assert_eq!(map.poll_drain(), CallMapEvent::None);
        assert_eq!(map.poll_drain(), CallMapEvent::StopLoop);
    }

    #[test]
    fn toggle_debug_flips_the_flag() {
        let mut map = CallMap::new(5);
        assert!(!map.is_debug_mode());
        map.toggle_debug();
        assert!(map.is_debug_mode());
    }

    fn invite(source_ip: &str) -> SipRequestInfo {
        SipRequestInfo {
            method: "INVITE".to_string(),
            has_to_tag: false,
            request_uri_host: "sip.example.com".to_string(),
            has_authorization: false,
            source_ip: source_ip.to_string(),
        }
    }

    #[test]
    fn mid_dialog_request_with_to_tag_gets_481() {
        let mut map = CallMap::new(5);
        let mut req = invite("10.0.0.1");
        req.has_to_tag = true;
        let outcome = map.recv_request(&req, Box::new(NullUa), timers());
        assert_eq!(
            outcome,
            RecvRequestOutcome::Reply {
                code: 481,
                reason: "Call Leg/Transaction Does Not Exist".to_string(),
                www_authenticate: None,
            }
        );
    }

    #[test]
    fn invite_from_a_disallowed_source_ip_gets_403() {
        let mut map = CallMap::new(5);
        map.configure_request_handling(
            Some(vec!["10.0.0.1".to_string()]),
            false,
            true,
            ControllerOptions::default(),
        );
        let outcome = map.recv_request(&invite("10.0.0.2"), Box::new(NullUa), timers());
        assert_eq!(
            outcome,
            RecvRequestOutcome::Reply {
                code: 403,
                reason: "Forbidden".to_string(),
                www_authenticate: None,
            }
        );
    }

    #[test]
    fn invite_without_authorization_in_digest_only_mode_gets_401_with_challenge() {
        let mut map = CallMap::new(5);
        map.configure_request_handling(None, true, true, ControllerOptions::default());
        let outcome = map.recv_request(&invite("10.0.0.1"), Box::new(NullUa), timers());
        match outcome {
            RecvRequestOutcome::Reply {
                code,
                www_authenticate,
                ..
            } => {
                assert_eq!(code, 401);
                assert_eq!(
                    www_authenticate,
                    Some("Digest realm=\"sip.example.com\"".to_string())
                );
            }
            other => panic!("expected a 401 reply, got {other:?}"),
        }
        assert!(map.is_empty());
    }

    #[test]
    fn invite_without_authorization_outside_digest_only_mode_starts_a_call_with_a_queued_challenge() {
        let mut map = CallMap::new(5);
        map.configure_request_handling(None, true, false, ControllerOptions::default());
        let outcome = map.recv_request(&invite("10.0.0.1"), Box::new(NullUa), timers());
        let RecvRequestOutcome::NewCall { id } = outcome else {
            panic!("expected a new call, got {outcome:?}");
        };
        let cc = map.calls.iter().find(|cc| cc.id == id).unwrap();
        assert_eq!(
            cc.challenge,
            Some("Digest realm=\"sip.example.com\"".to_string())
        );
    }

    #[test]
    fn invite_with_auth_disabled_starts_a_call_with_no_challenge() {
        let mut map = CallMap::new(5);
        let outcome = map.recv_request(&invite("10.0.0.1"), Box::new(NullUa), timers());
        let RecvRequestOutcome::NewCall { id } = outcome else {
            panic!("expected a new call, got {outcome:?}");
        };
        let cc = map.calls.iter().find(|cc| cc.id == id).unwrap();
        assert_eq!(cc.challenge, None);
    }

    #[test]
    fn register_and_subscribe_are_left_to_the_proxy() {
        let mut map = CallMap::new(5);
        for method in ["REGISTER", "SUBSCRIBE"] {
            let mut req = invite("10.0.0.1");
            req.method = method.to_string();
            let outcome = map.recv_request(&req, Box::new(NullUa), timers());
            assert_eq!(outcome, RecvRequestOutcome::Proxy);
        }
    }

    #[test]
    fn notify_and_ping_are_answered_with_200() {
        let mut map = CallMap::new(5);
        for method in ["NOTIFY", "PING"] {
            let mut req = invite("10.0.0.1");
            req.method = method.to_string();
            let outcome = map.recv_request(&req, Box::new(NullUa), timers());
            assert_eq!(
                outcome,
                RecvRequestOutcome::Reply {
                    code: 200,
                    reason: "OK".to_string(),
                    www_authenticate: None,
                }
            );
        }
    }

    #[test]
    fn unsupported_method_gets_501() {
        let mut map = CallMap::new(5);
        let mut req = invite("10.0.0.1");
        req.method = "MESSAGE".to_string();
        let outcome = map.recv_request(&req, Box::new(NullUa), timers());
        assert_eq!(
            outcome,
            RecvRequestOutcome::Reply {
                code: 501,
                reason: "Not Implemented".to_string(),
                www_authenticate: None,
            }
        );
    }
}
