use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One candidate destination in a call's hunt list.
///
/// Built from either a statically configured route or a RADIUS
/// authorization response (`h323-ivr-in Routing:` attributes), then
/// clamped against server-wide defaults before it is ever dialed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub destination: SocketAddr,
    pub user: Option<String>,
    pub passw: Option<String>,
    /// Caller-ID to present on the outbound leg, if overridden.
    pub cli: Option<String>,
    /// Caller display name, if overridden.
    pub caller_name: Option<String>,
    /// Called number, after static translation.
    pub cld: String,
    /// Remaining prepaid time for this route, in seconds. `None` means
    /// unlimited. A route resolving to `Some(0)` is dropped before hunting.
    pub credit_time: Option<u32>,
    /// Overall per-leg expiration.
    pub expires: Option<Duration>,
    pub no_progress_expires: Option<Duration>,
    pub no_reply_expires: Option<Duration>,
    pub forward_on_fail: bool,
    pub extra_headers: Vec<(String, String)>,
    /// Free-form per-route parameters (`huntstop_scodes`, `bill-to`,
    /// `bill-cli`, ...), parsed from RADIUS reply-item pairs.
    pub params: HashMap<String, String>,
    /// Hunt-group number: routes sharing a group share a single
    /// `group_expires` timeout, and the group can skip ahead on timeout.
    pub group: u32,
    /// Position of this route in the original hunt list, assigned once
    /// when the list is built (RADIUS `Routing:` order or static config
    /// order) and never renumbered as routes are consumed. Distinct from
    /// `group`: several routes can share a group but each still needs its
    /// own `rnum` so two outbound attempts never collide on Call-ID.
    pub rnum: u32,
}

impl Route {
    pub fn new(destination: SocketAddr, cld: impl Into<String>, group: u32) -> Self {
        Self {
            destination,
            user: None,
            passw: None,
            cli: None,
            caller_name: None,
            cld: cld.into(),
            credit_time: None,
            expires: None,
            no_progress_expires: None,
            no_reply_expires: None,
            forward_on_fail: false,
            extra_headers: Vec::new(),
            params: HashMap::new(),
            group,
            rnum: 0,
        }
    }

    /// Apply a RADIUS-resolved `credit_time`, clamped against the server's
    /// `max_credit_time`, and parse `huntstop_scodes` out of `params` if
    /// present. Mirrors the original's `oroute.customize(...)`.
    pub fn customize(&mut self, credit_time: Option<u32>, max_credit_time: Option<u32>) {
        self.credit_time = match (credit_time, max_credit_time) {
            (Some(ct), Some(max)) => Some(ct.min(max)),
            (Some(ct), None) => Some(ct),
            (None, _) => self.credit_time,
        };
    }

    /// A route with `credit_time` or `expires` resolving to exactly zero is
    /// dead on arrival and must be skipped, not dialed.
    pub fn is_viable(&self) -> bool {
        if self.credit_time == Some(0) {
            return false;
        }
        if self.expires == Some(Duration::ZERO) {
            return false;
        }
        true
    }

    pub fn huntstop_scodes(&self) -> Vec<u16> {
        self.params
            .get("huntstop_scodes")
            .map(|raw| raw.split(',').filter_map(|s| s.trim().parse().ok()).collect())
            .unwrap_or_default()
    }
}
