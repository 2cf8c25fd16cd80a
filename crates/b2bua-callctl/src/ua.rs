use std::net::SocketAddr;
use std::time::Duration;

use b2bua_types::MonoTime;

use crate::sdp::SdpBody;

/// Coarse per-leg protocol state, named after the original's
/// `UasState*`/`UacState*` marker classes but collapsed into one enum
/// since `CallController` never needs to distinguish UAS from UAC state
/// by type, only by which field (`uaA`/`uaO`) it's stored in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UaState {
    Trying,
    Ringing,
    Connected,
    Disconnected,
    Dead,
}

impl UaState {
    pub fn is_trying_or_ringing(&self) -> bool {
        matches!(self, UaState::Trying | UaState::Ringing)
    }
}

/// Which leg of a call produced an event passed to
/// `CallController::recv_event`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Leg {
    A,
    O,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthInfo {
    pub username: Option<String>,
    pub realm: Option<String>,
    pub nonce: Option<String>,
    pub uri: Option<String>,
    pub response: Option<String>,
}

/// Events exchanged between `CallController` and each leg's `UserAgent`,
/// after the original's `CCEvent*` family.
#[derive(Clone, Debug, PartialEq)]
pub enum CallEvent {
    /// New dialog request: the A leg's very first event.
    Try {
        call_id: String,
        cli: Option<String>,
        cld: String,
        caller_name: Option<String>,
        sdp: Option<SdpBody>,
        auth: Option<AuthInfo>,
        /// Inbound request's `Max-Forwards`, if present. `None` lets the
        /// controller apply its own default rather than treating a
        /// missing header as zero.
        max_forwards: Option<u32>,
    },
    Ring,
    PreConnect { sdp: Option<SdpBody> },
    Connect { sdp: Option<SdpBody> },
    /// `challenge` carries the `WWW-Authenticate` header value when
    /// `code` is 401 — a digest challenge queued for the caller to retry
    /// with credentials, as opposed to an outright rejection.
    Fail {
        code: u16,
        reason: String,
        challenge: Option<String>,
    },
    Disconnect { rtime: Option<MonoTime> },
}

impl CallEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CallEvent::Try { .. } => "Try",
            CallEvent::Ring => "Ring",
            CallEvent::PreConnect { .. } => "PreConnect",
            CallEvent::Connect { .. } => "Connect",
            CallEvent::Fail { .. } => "Fail",
            CallEvent::Disconnect { .. } => "Disconnect",
        }
    }
}

/// The external contract a SIP transaction/dialog layer must satisfy for
/// `CallController` to drive it. No implementation of this trait ships in
/// this workspace — wiring it to a real SIP stack (transaction retransmit
/// timers, actual wire encode/decode) is explicitly out of scope; see
/// `FakeUa` in this crate's tests for the minimal contract a caller must
/// honor.
pub trait UserAgent {
    fn state(&self) -> UaState;
    fn remote_addr(&self) -> SocketAddr;
    fn cld(&self) -> &str;
    fn cli(&self) -> Option<&str>;

    /// Feed an event to this leg, e.g. an incoming response becoming a
    /// `Connect`/`Fail` the controller reacts to.
    fn recv_event(&mut self, event: CallEvent);

    /// Have this leg act on an event the controller decided to send it,
    /// e.g. forwarding the peer leg's `Connect` onward.
    fn send_event(&mut self, event: CallEvent);

    fn set_keepalive_interval(&mut self, interval: Option<Duration>);
    fn set_local_ua(&mut self, name: String);
}
