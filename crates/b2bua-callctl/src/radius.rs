use std::net::SocketAddr;

use b2bua_types::Route;

/// One RADIUS reply-item attribute-value pair, as returned by a
/// (not-implemented-here) RADIUS client. Deliberately flat strings —
/// this crate only needs to parse the handful of attributes
/// `CallController` acts on, not a general RADIUS dictionary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RadiusAttribute {
    pub name: String,
    pub value: String,
}

/// Everything `CallController::rDone` extracts from an authorization
/// response before it ever touches routing: CLI/CNAM overrides plus the
/// raw `Routing:` strings, which still need a destination address
/// resolved against them by the caller (this crate has no DNS/SIP URI
/// resolver).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthResultFields {
    pub cli: Option<String>,
    pub caller_name: Option<String>,
    pub routing: Vec<String>,
    pub credit_time: Option<u32>,
}

/// Parse the subset of `h323-ivr-in` sub-fields this implementation acts
/// on (`CLI:`, `CNAM:`, `Routing:`) plus the standalone `h323-credit-time`
/// attribute. Mirrors `b2bua_radius.py`'s `rDone` attribute scan exactly:
/// both `CLI:` and `CNAM:` with an empty value after the prefix are
/// treated as "no override" (`self.cli = None` / `self.rname = None`),
/// matching the original's explicit `if len(...) == 0: ... = None` checks
/// for each sub-field.
pub fn parse_auth_result(attrs: &[RadiusAttribute]) -> AuthResultFields {
    let mut out = AuthResultFields::default();
    for attr in attrs {
        if attr.name == "h323-ivr-in" {
            if let Some(rest) = attr.value.strip_prefix("CLI:") {
                out.cli = if rest.is_empty() {
                    None
                } else {
                    Some(rest.to_string())
                };
            } else if let Some(rest) = attr.value.strip_prefix("CNAM:") {
                out.caller_name = if rest.is_empty() {
                    None
                } else {
                    Some(rest.to_string())
                };
            } else if let Some(rest) = attr.value.strip_prefix("Routing:") {
                out.routing.push(rest.to_string());
            }
        } else if attr.name == "h323-credit-time" {
            out.credit_time = attr.value.parse().ok();
        }
    }
    out
}

/// Build the hunt-list route for one `Routing:` entry resolved to a
/// concrete destination, applying the `max_credit_time` clamp and the
/// zero-viability drop in one place so no caller can forget either step.
pub fn build_route(
    destination: SocketAddr,
    cld: &str,
    group: u32,
    rnum: u32,
    credit_time: Option<u32>,
    max_credit_time: Option<u32>,
) -> Option<Route> {
    let mut route = Route::new(destination, cld, group);
    route.rnum = rnum;
    route.customize(credit_time, max_credit_time);
    if route.is_viable() { Some(route) } else { None }
}
