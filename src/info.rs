use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

/// Status of a game server as returned by every query.
///
/// `online == false` is valid data: the protocol was understood but the
/// server says it is not accepting players. Failures to talk to the server
/// at all are reported as [crate::QueryError] instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServerInfo {
    /// Server hostname or MOTD
    pub name: String,
    /// Resolved game identifier, e.g. `counter-strike` or `minecraft`
    pub game: String,
    pub version: String,
    /// Host the query was sent to
    pub address: String,
    /// Port players connect to
    pub port: u16,
    /// Port that answered the query
    pub query_port: u16,
    pub players: PlayerInfo,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub map: String,
    /// Round trip in whole milliseconds, rounded up
    pub ping: u64,
    pub online: bool,
    /// Protocol specific facts such as `app_id` or `world`
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl ServerInfo {
    pub fn extra(&self, key: &str) -> Option<&str> {
        self.extra.get(key).map(String::as_str)
    }

    pub(crate) fn set_extra(&mut self, key: &str, value: impl ToString) {
        self.extra.insert(key.to_owned(), value.to_string());
    }
}

/// Player counts, plus the player list when it was asked for.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlayerInfo {
    pub current: u32,
    pub max: u32,
    /// `None` when players were not requested, `Some` (possibly empty) when
    /// they were.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list: Option<Vec<Player>>,
}

impl PlayerInfo {
    /// Counts with a list slot shaped by whether players were requested.
    pub fn new(current: u32, max: u32, requested: bool) -> Self {
        PlayerInfo {
            current,
            max,
            list: requested.then(Vec::new),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Player {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<i32>,
    /// Time connected, whole seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<Duration>,
}

impl Player {
    pub fn named(name: impl Into<String>) -> Self {
        Player {
            name: name.into(),
            score: None,
            duration: None,
        }
    }
}

/// Ports a specific game uses. The connect port and the query port are
/// often different (ARK connects on 7777 and answers queries on 27015).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GameConfig {
    pub name: &'static str,
    pub game_port: u16,
    pub query_port: u16,
}

impl GameConfig {
    pub const fn new(name: &'static str, game_port: u16, query_port: u16) -> Self {
        GameConfig {
            name,
            game_port,
            query_port,
        }
    }

    pub fn uses_port(&self, port: u16) -> bool {
        self.game_port == port || self.query_port == port
    }
}

/// Whole milliseconds in `elapsed`, rounded up.
pub(crate) fn ping_millis(elapsed: Duration) -> u64 {
    let nanos: u128 = elapsed.as_nanos();
    nanos.div_ceil(1_000_000) as u64
}
