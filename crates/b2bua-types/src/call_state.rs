use std::fmt;

/// `CallController`'s state machine, per the original `CCState*` marker
/// classes. Transition legality is enforced by `CallController`, not by
/// this enum — it is plain data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallState {
    Idle,
    WaitRoute,
    ARComplete,
    Connected,
    Disconnecting,
    Dead,
}

impl CallState {
    pub fn name(&self) -> &'static str {
        match self {
            CallState::Idle => "Idle",
            CallState::WaitRoute => "WaitRoute",
            CallState::ARComplete => "ARComplete",
            CallState::Connected => "Connected",
            CallState::Disconnecting => "Disconnecting",
            CallState::Dead => "Dead",
        }
    }

    /// Calls in these states still hold resources (RTP proxy session,
    /// accounting handles) worth reporting in `executeStop`'s drain poll.
    pub fn is_active(&self) -> bool {
        matches!(self, CallState::ARComplete | CallState::Connected)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Dead)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_and_ar_complete_are_active() {
        assert!(CallState::Connected.is_active());
        assert!(CallState::ARComplete.is_active());
        assert!(!CallState::Idle.is_active());
        assert!(!CallState::Dead.is_active());
    }

    #[test]
    fn only_dead_is_terminal() {
        assert!(CallState::Dead.is_terminal());
        assert!(!CallState::Disconnecting.is_terminal());
    }
}
