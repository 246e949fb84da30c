use std::env;
use std::ops::RangeInclusive;
use std::time::Duration;

/// Default per-query timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Fixed timeout used for every attempt made in discovery mode.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_millis(300);

/// How queries are performed. Built once, then only read.
///
/// ```
/// use std::time::Duration;
/// use gamequery::Options;
///
/// let opts = Options::default()
///     .with_timeout(Duration::from_secs(2))
///     .with_players(true);
/// assert!(opts.players());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    timeout: Duration,
    port: Option<u16>,
    players: bool,
    port_range: Option<Vec<u16>>,
    max_concurrency: usize,
    discovery_mode: bool,
    debug: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            port: None,
            players: false,
            port_range: None,
            max_concurrency: 0,
            discovery_mode: false,
            debug: false,
        }
    }
}

impl Options {
    /// Read options from `GAMEQUERY_*` environment variables, falling back
    /// to the defaults for anything missing or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            timeout: env::var("GAMEQUERY_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.timeout),

            port: env::var("GAMEQUERY_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|port: &u16| *port != 0),

            players: env::var("GAMEQUERY_PLAYERS")
                .ok()
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.players),

            max_concurrency: env::var("GAMEQUERY_MAX_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_concurrency),

            debug: env::var("GAMEQUERY_DEBUG")
                .ok()
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.debug),

            ..defaults
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Query this port instead of the game's registered one.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_players(mut self, players: bool) -> Self {
        self.players = players;
        self
    }

    /// Scan exactly these ports during discovery instead of expanding from
    /// the registered defaults.
    pub fn with_ports(mut self, ports: impl IntoIterator<Item = u16>) -> Self {
        self.port_range = Some(ports.into_iter().collect());
        self
    }

    pub fn with_port_range(self, range: RangeInclusive<u16>) -> Self {
        self.with_ports(range)
    }

    /// Cap the number of socket operations in flight. `0` means unbounded.
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn with_discovery_mode(mut self, discovery_mode: bool) -> Self {
        self.discovery_mode = discovery_mode;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn players(&self) -> bool {
        self.players
    }

    pub fn port_range(&self) -> Option<&[u16]> {
        self.port_range.as_deref()
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn discovery_mode(&self) -> bool {
        self.discovery_mode
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    /// The timeout a single protocol attempt gets.
    pub fn effective_timeout(&self) -> Duration {
        if self.discovery_mode {
            DISCOVERY_TIMEOUT
        } else {
            self.timeout
        }
    }

    /// Copy of these options with discovery mode switched on.
    pub fn for_discovery(&self) -> Self {
        self.clone().with_discovery_mode(true)
    }

    /// Level step-by-step tracing is emitted at.
    pub fn log_level(&self) -> log::Level {
        if self.debug {
            log::Level::Debug
        } else {
            log::Level::Trace
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Log a query step at the level selected by [Options::debug].
macro_rules! step {
    ($opts:expr, $($arg:tt)+) => {
        ::log::log!($opts.log_level(), $($arg)+)
    };
}
pub(crate) use step;
