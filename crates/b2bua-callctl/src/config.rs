use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

/// Command-line surface, after the original's `getopt`-parsed option set
/// (`-f` config file, `-l`/`-P` bind address/port, `-d`/`-s` logging
/// destinations, `-u`/`-g` privilege drop). Every option here is also
/// settable from the config file; flags win when both are present.
#[derive(Parser, Debug)]
#[command(name = "b2bua", about = "SIP back-to-back user agent")]
pub struct Cli {
    /// Path to a TOML config file. Every field is optional there too;
    /// anything left unset falls back to `Config::default()`.
    #[arg(short = 'f', long = "config")]
    pub config_file: Option<PathBuf>,

    /// Address to accept inbound SIP requests on.
    #[arg(short = 'l', long = "listen")]
    pub listen: Option<SocketAddr>,

    /// Run attached to the controlling terminal instead of daemonizing.
    #[arg(short = 'F', long = "foreground")]
    pub foreground: bool,

    /// Path the control socket accepting `q`/`l`/`lt`/`llt`/`d`/`r`
    /// commands is bound to.
    #[arg(long = "control-socket")]
    pub control_socket: Option<PathBuf>,

    /// Hide the Call-ID presented to the O leg (MD5 + `-b2b_<rnum>`).
    #[arg(short = 'H')]
    pub hide_call_id: bool,

    /// Disable RADIUS/digest authorization entirely.
    #[arg(short = 'u')]
    pub disable_auth: bool,

    /// Disable digest challenges, keeping RADIUS authorization only.
    #[arg(short = 'D')]
    pub disable_digest_auth: bool,

    /// Clamp every route's credit time to this many seconds.
    #[arg(short = 'm')]
    pub max_credit_time: Option<u32>,

    /// Inbound `cld` translation chain, `/pattern/replacement/flags[/…]`.
    #[arg(short = 't')]
    pub static_tr_in: Option<String>,

    /// Outbound `cld` translation chain, same syntax as `-t`.
    #[arg(short = 'T')]
    pub static_tr_out: Option<String>,

    /// Keepalive bitmap: bit 0 enables the answering leg, bit 1 the
    /// originating leg, both pinned to a 32s interval.
    #[arg(short = 'k')]
    pub keepalive_bitmap: Option<u8>,

    /// Accounting level: 0 off, 1 stop-only, 2 start+stop.
    #[arg(short = 'A')]
    pub acct_level: Option<u8>,

    /// Comma-separated list of source IPs allowed to place calls.
    #[arg(short = 'a')]
    pub accept_ips: Option<String>,

    /// Sole static route to use instead of RADIUS-resolved hunting.
    #[arg(short = 's')]
    pub static_route: Option<String>,
}

/// Mirrors [`Config`] but with every field optional, so a TOML file only
/// needs to name the settings it wants to override. Parsed once at
/// startup, then folded onto [`Config::default()`].
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ConfigFile {
    pub listen: Option<SocketAddr>,
    pub control_socket: Option<PathBuf>,
    pub auth_enable: Option<bool>,
    pub acct_enable: Option<bool>,
    pub hide_call_id: Option<bool>,
    pub allowed_payload_types: Option<Vec<u8>>,
    pub static_tr_in: Option<String>,
    pub static_tr_out: Option<String>,
    pub keepalive_ans_secs: Option<u64>,
    pub keepalive_orig_secs: Option<u64>,
    pub max_credit_time: Option<u32>,
    pub group_expires_secs: Option<u64>,
    pub radius_server: Option<SocketAddr>,
    pub default_poll_freq_hz: Option<f64>,
    pub drain_ticks: Option<u32>,
    pub digest_auth_enable: Option<bool>,
    pub acct_level: Option<u8>,
    pub accept_ips: Option<Vec<String>>,
    pub static_route: Option<String>,
}

/// Fully resolved runtime configuration, merged from defaults, an
/// optional config file, and CLI flags, after `rtp_proxy`-era
/// B2BUA config objects that hold every tunable in one typed struct
/// rather than scattering `getattr(config, ...)` lookups through the
/// call path.
#[derive(Clone, Debug)]
pub struct Config {
    pub listen: SocketAddr,
    pub control_socket: Option<PathBuf>,

    pub auth_enable: bool,
    pub acct_enable: bool,
    pub hide_call_id: bool,

    pub allowed_payload_types: Option<Vec<u8>>,
    pub static_tr_in: Option<String>,
    pub static_tr_out: Option<String>,

    pub keepalive_ans_secs: Option<u64>,
    pub keepalive_orig_secs: Option<u64>,
    pub max_credit_time: Option<u32>,
    pub group_expires_secs: Option<u64>,

    /// RADIUS server to send Access-Request/Accounting-Request packets
    /// to, if `auth_enable`/`acct_enable`. `None` means both are
    /// effectively forced off regardless of their own flags.
    pub radius_server: Option<SocketAddr>,

    /// Reactor poll frequency outside any temporarily pushed band.
    pub default_poll_freq_hz: f64,

    /// Ticks (at `default_poll_freq_hz`) to wait for in-flight calls to
    /// drain after SIGTERM before forcing exit.
    pub drain_ticks: u32,

    /// Whether a missing `Authorization` header gets a digest challenge
    /// (`-D` disables this, keeping RADIUS-only authorization).
    pub digest_auth_enable: bool,
    /// 0 off, 1 stop-only, 2 start+stop; `acct_enable` tracks `level > 0`.
    pub acct_level: u8,
    /// Source IPs allowed to place an inbound call; `None` accepts all.
    pub accept_ips: Option<Vec<String>>,
    /// Sole static route, bypassing RADIUS-resolved hunting entirely.
    pub static_route: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:5060".parse().unwrap(),
            control_socket: None,
            auth_enable: false,
            acct_enable: false,
            hide_call_id: false,
            allowed_payload_types: None,
            static_tr_in: None,
            static_tr_out: None,
            keepalive_ans_secs: None,
            keepalive_orig_secs: None,
            max_credit_time: None,
            group_expires_secs: None,
            radius_server: None,
            default_poll_freq_hz: 10.0,
            drain_ticks: 5,
            digest_auth_enable: true,
            acct_level: 0,
            accept_ips: None,
            static_route: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl Config {
    /// Fold a parsed file onto the defaults, field by field — a key the
    /// file doesn't mention keeps its default.
    fn merge(mut self, file: ConfigFile) -> Self {
        if let Some(v) = file.listen {
            self.listen = v;
        }
        if file.control_socket.is_some() {
            self.control_socket = file.control_socket;
        }
        if let Some(v) = file.auth_enable {
            self.auth_enable = v;
        }
        if let Some(v) = file.acct_enable {
            self.acct_enable = v;
        }
        if let Some(v) = file.hide_call_id {
            self.hide_call_id = v;
        }
        if file.allowed_payload_types.is_some() {
            self.allowed_payload_types = file.allowed_payload_types;
        }
        if file.static_tr_in.is_some() {
            self.static_tr_in = file.static_tr_in;
        }
        if file.static_tr_out.is_some() {
            self.static_tr_out = file.static_tr_out;
        }
        if file.keepalive_ans_secs.is_some() {
            self.keepalive_ans_secs = file.keepalive_ans_secs;
        }
        if file.keepalive_orig_secs.is_some() {
            self.keepalive_orig_secs = file.keepalive_orig_secs;
        }
        if file.max_credit_time.is_some() {
            self.max_credit_time = file.max_credit_time;
        }
        if file.group_expires_secs.is_some() {
            self.group_expires_secs = file.group_expires_secs;
        }
        if file.radius_server.is_some() {
            self.radius_server = file.radius_server;
        }
        if let Some(v) = file.default_poll_freq_hz {
            self.default_poll_freq_hz = v;
        }
        if let Some(v) = file.drain_ticks {
            self.drain_ticks = v;
        }
        if let Some(v) = file.digest_auth_enable {
            self.digest_auth_enable = v;
        }
        if let Some(v) = file.acct_level {
            self.acct_level = v;
        }
        if file.accept_ips.is_some() {
            self.accept_ips = file.accept_ips;
        }
        if file.static_route.is_some() {
            self.static_route = file.static_route;
        }
        self
    }

    /// Build from an optional TOML config file plus CLI overrides; CLI
    /// flags always take precedence over the file, which in turn
    /// overrides [`Config::default()`].
    pub fn load(cli: &Cli) -> Result<Self, ConfigLoadError> {
        let mut cfg = Config::default();
        if let Some(path) = &cli.config_file {
            let contents = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
                path: path.clone(),
                source,
            })?;
            let file: ConfigFile =
                toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
                    path: path.clone(),
                    source,
                })?;
            cfg = cfg.merge(file);
        }
        if let Some(listen) = cli.listen {
            cfg.listen = listen;
        }
        if let Some(sock) = &cli.control_socket {
            cfg.control_socket = Some(sock.clone());
        }
        if cli.hide_call_id {
            cfg.hide_call_id = true;
        }
        if cli.disable_auth {
            cfg.auth_enable = false;
        }
        if cli.disable_digest_auth {
            cfg.digest_auth_enable = false;
        }
        if let Some(v) = cli.max_credit_time {
            cfg.max_credit_time = Some(v);
        }
        if let Some(v) = &cli.static_tr_in {
            cfg.static_tr_in = Some(v.clone());
        }
        if let Some(v) = &cli.static_tr_out {
            cfg.static_tr_out = Some(v.clone());
        }
        if let Some(bitmap) = cli.keepalive_bitmap {
            cfg.keepalive_ans_secs = if bitmap & 0b01 != 0 { Some(32) } else { None };
            cfg.keepalive_orig_secs = if bitmap & 0b10 != 0 { Some(32) } else { None };
        }
        if let Some(level) = cli.acct_level {
            cfg.acct_level = level;
            cfg.acct_enable = level > 0;
        }
        if let Some(list) = &cli.accept_ips {
            cfg.accept_ips = Some(list.split(',').map(str::to_string).collect());
        }
        if let Some(route) = &cli.static_route {
            cfg.static_route = Some(route.clone());
        }
        Ok(cfg)
    }

    pub fn keepalive_ans(&self) -> Option<Duration> {
        self.keepalive_ans_secs.map(Duration::from_secs)
    }

    pub fn keepalive_orig(&self) -> Option<Duration> {
        self.keepalive_orig_secs.map(Duration::from_secs)
    }

    pub fn group_expires(&self) -> Option<Duration> {
        self.group_expires_secs.map(Duration::from_secs)
    }

    pub fn to_controller_options(&self) -> crate::call_controller::ControllerOptions {
        crate::call_controller::ControllerOptions {
            auth_enable: self.auth_enable,
            acct_enable: self.acct_enable,
            hide_call_id: self.hide_call_id,
            allowed_payload_types: self.allowed_payload_types.clone(),
            static_tr_in: self.static_tr_in.clone(),
            static_tr_out: self.static_tr_out.clone(),
            keepalive_ans: self.keepalive_ans(),
            keepalive_orig: self.keepalive_orig(),
            max_credit_time: self.max_credit_time,
            group_expires: self.group_expires(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_radius_and_no_translation() {
        let cfg = Config::default();
        assert!(cfg.radius_server.is_none());
        assert!(cfg.static_tr_in.is_none());
        assert_eq!(cfg.drain_ticks, 5);
    }

    #[test]
    fn controller_options_carries_keepalive_durations() {
        let mut cfg = Config::default();
        cfg.keepalive_ans_secs = Some(30);
        let opts = cfg.to_controller_options();
        assert_eq!(opts.keepalive_ans, Some(Duration::from_secs(30)));
    }

    #[test]
    fn merge_overrides_only_fields_the_file_mentions() {
        let file: ConfigFile = toml::from_str("hide_call_id = true\nmax_credit_time = 600\n").unwrap();
        let cfg = Config::default().merge(file);
        assert!(cfg.hide_call_id);
        assert_eq!(cfg.max_credit_time, Some(600));
        assert_eq!(cfg.drain_ticks, 5);
    }

    #[test]
    fn cli_flags_override_defaults() {
        let cli = Cli::parse_from([
            "b2bua",
            "-H",
            "-u",
            "-D",
            "-m",
            "120",
            "-t",
            "/1/2/",
            "-k",
            "3",
            "-A",
            "2",
            "-a",
            "10.0.0.1,10.0.0.2",
            "-s",
            "sip:10.0.0.9:5060",
        ]);
        let cfg = Config::load(&cli).unwrap();
        assert!(cfg.hide_call_id);
        assert!(!cfg.auth_enable);
        assert!(!cfg.digest_auth_enable);
        assert_eq!(cfg.max_credit_time, Some(120));
        assert_eq!(cfg.static_tr_in.as_deref(), Some("/1/2/"));
        assert_eq!(cfg.keepalive_ans_secs, Some(32));
        assert_eq!(cfg.keepalive_orig_secs, Some(32));
        assert_eq!(cfg.acct_level, 2);
        assert!(cfg.acct_enable);
        assert_eq!(
            cfg.accept_ips,
            Some(vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()])
        );
        assert_eq!(cfg.static_route.as_deref(), Some("sip:10.0.0.9:5060"));
    }

    #[test]
    fn cli_flags_default_to_config_file_when_unset() {
        let cli = Cli::parse_from(["b2bua"]);
        let cfg = Config::load(&cli).unwrap();
        assert!(!cfg.hide_call_id);
        assert!(cfg.digest_auth_enable);
        assert!(cfg.accept_ips.is_none());
    }
}
