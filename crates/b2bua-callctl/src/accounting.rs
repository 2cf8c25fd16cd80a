use b2bua_types::MonoTime;

/// Accounting sink for one leg of a call, after `RadiusAccounting`/
/// `FakeAccounting`. Real RADIUS wire encoding is out of scope for this
/// workspace (see `Non-goals`); what's modeled here is the lifecycle
/// contract `CallController` drives regardless of which sink is behind
/// it.
pub trait Accounting {
    fn set_params(&mut self, username: &str, cli: Option<&str>, cld: &str, call_id: &str, remote_ip: &str);
    fn start(&mut self, rtime: MonoTime);
    fn disc(&mut self, rtime: MonoTime, origin: &str);
}

#[derive(Clone, Debug, Default, PartialEq)]
struct AcctParams {
    username: String,
    cli: Option<String>,
    cld: String,
    call_id: String,
    remote_ip: String,
}

/// A real implementation would emit RADIUS Accounting-Request packets;
/// this one records the lifecycle calls it received, which is all
/// `CallController`'s own tests need and all an operator without a
/// RADIUS server configured (`acct_enable = false`) should pay for.
#[derive(Debug, Default)]
pub struct FakeAccounting {
    params: Option<AcctParams>,
    started_at: Option<MonoTime>,
    disconnected: Option<(MonoTime, String)>,
}

impl FakeAccounting {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn was_started(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn disconnect_origin(&self) -> Option<&str> {
        self.disconnected.as_ref().map(|(_, origin)| origin.as_str())
    }
}

impl Accounting for FakeAccounting {
    fn set_params(&mut self, username: &str, cli: Option<&str>, cld: &str, call_id: &str, remote_ip: &str) {
        self.params = Some(AcctParams {
            username: username.to_string(),
            cli: cli.map(str::to_string),
            cld: cld.to_string(),
            call_id: call_id.to_string(),
            remote_ip: remote_ip.to_string(),
        });
    }

    fn start(&mut self, rtime: MonoTime) {
        self.started_at = Some(rtime);
    }

    fn disc(&mut self, rtime: MonoTime, origin: &str) {
        self.disconnected = Some((rtime, origin.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_accounting_records_start_and_disconnect() {
        let mut acct = FakeAccounting::new();
        acct.set_params("alice", Some("2125551212"), "18005551212", "call-1", "10.0.0.1");
        assert!(!acct.was_started());
        acct.start(MonoTime::now());
        assert!(acct.was_started());
        acct.disc(MonoTime::now(), "caller");
        assert_eq!(acct.disconnect_origin(), Some("caller"));
    }
}
