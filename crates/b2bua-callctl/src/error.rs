use thiserror::Error;

/// Violations `CallController` refuses to let happen, one variant per
/// named transition/precondition check (`T-*`). Distinct from
/// [`b2bua_types::DomainError`]: that one is the user-facing error
/// taxonomy returned over SIP/CLI; this one is an internal "the state
/// machine would otherwise do something undefined" guard, analogous to
/// the teacher's journal-invariant violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallControlViolation {
    /// T-1: an event arrived for a call that has already reached `Dead`.
    #[error("event {event} received after call {call_id} reached Dead")]
    EventAfterDead { call_id: String, event: &'static str },
    /// T-2: the A leg received something other than `Try` while `Idle`.
    #[error("call {call_id}: expected Try while Idle, got {event}")]
    UnexpectedEventWhileIdle { call_id: String, event: &'static str },
    /// T-3: `placeOriginate` invoked with an empty route list.
    #[error("call {call_id}: placeOriginate called with no routes remaining")]
    NoRoutesRemaining { call_id: String },
    /// T-4: a route was selected whose `credit_time`/`expires` resolved to
    /// zero — it must have been filtered out before hunting, not dialed.
    #[error("call {call_id}: route {index} is not viable (zero credit_time/expires)")]
    NonViableRouteSelected { call_id: String, index: usize },
    /// T-5: `group_expires` fired for a group that is no longer at the
    /// front of the route list, or while the A leg is not
    /// Trying/Ringing — a stale timer, not a bug, but illegal to act on.
    #[error("call {call_id}: stale group_expires for group {group}")]
    StaleGroupExpiry { call_id: String, group: u32 },
}

#[derive(Debug, Error)]
pub enum CallMapError {
    #[error("no call with id {0} found")]
    UnknownCallId(String),
    #[error("syntax error: {0}")]
    SyntaxError(String),
    #[error("unknown command: {0}")]
    UnknownCommand(String),
}
