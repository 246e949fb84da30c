//! Terraria: TShock's REST status API when present, otherwise a probe of
//! the native TCP protocol.
//!
//! The native protocol has no status request. Any framed answer to the
//! connect packet proves a Terraria server is listening; player counts are
//! only scraped from chat text when the server happens to send some.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;

use crate::context::QueryContext;
use crate::error::QueryError;
use crate::info::{ping_millis, GameConfig, Player, PlayerInfo, ServerInfo};
use crate::options::{step, Options};

use super::{connect_tcp, Protocol, Transport};

pub const DEFAULT_PORT: u16 = 7777;

/// Port TShock serves its REST API on.
pub const TSHOCK_REST_PORT: u16 = 7878;

/// Status endpoints, tried in order.
pub const TSHOCK_ENDPOINTS: &[&str] = &["/v2/server/status", "/status", "/v3/server/status"];

/// Length-prefixed native request: 5 byte frame, opcode 1.
pub const NATIVE_PROBE: [u8; 5] = [0x05, 0x00, 0x00, 0x00, 0x01];

/// Chat text opcode, the only one carrying anything readable.
const OPCODE_CHAT: u8 = 0x19;

/// Vanilla server player cap, reported when the server does not say.
const DEFAULT_MAX_PLAYERS: u32 = 8;

const GAMES: &[GameConfig] = &[GameConfig::new("terraria", DEFAULT_PORT, DEFAULT_PORT)];

/// Body of a TShock status response. Newer TShock builds use the
/// unseparated field names.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TShockStatus {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub world: String,
    #[serde(default)]
    pub playercount: i64,
    #[serde(default)]
    pub maxplayers: i64,
    #[serde(default, alias = "serverversion")]
    pub terraria_version: String,
    #[serde(default, alias = "tshockversion")]
    pub tshock_version: String,
    #[serde(default)]
    pub difficulty: i64,
}

impl TShockStatus {
    pub fn to_server_info(&self, ping: u64, players_requested: bool) -> ServerInfo {
        let mut result: ServerInfo = ServerInfo {
            name: self.name.clone(),
            version: self.terraria_version.clone(),
            online: true,
            ping,
            players: PlayerInfo::new(
                clamp_count(self.playercount),
                clamp_count(self.maxplayers),
                players_requested,
            ),
            ..Default::default()
        };
        result.set_extra("world", &self.world);
        result.set_extra("tshock", &self.tshock_version);
        result.set_extra("difficulty", self.difficulty);
        result.set_extra("source", "tshock");
        result
    }
}

fn clamp_count(value: i64) -> u32 {
    value.clamp(0, u32::MAX as i64) as u32
}

/// Framed chat text packet as a server sends it, text capped at 255 bytes.
pub fn chat_response(text: &str) -> Vec<u8> {
    let text: &[u8] = &text.as_bytes()[..text.len().min(u8::MAX as usize)];
    let mut data: Vec<u8> = vec![0x00, 0x00, 0x00, 0x00, OPCODE_CHAT, 0xFF, text.len() as u8];
    data.extend_from_slice(text);
    data
}

/// Interpret whatever the server sent back to [NATIVE_PROBE].
pub fn parse_native_response(data: &[u8], players_requested: bool) -> Result<ServerInfo, QueryError> {
    let opcode: u8 = *data.get(4).ok_or(QueryError::Truncated("terraria frame"))?;

    let mut result: ServerInfo = if opcode == OPCODE_CHAT {
        let _player_id: u8 = *data.get(5).ok_or(QueryError::Truncated("chat player id"))?;
        let len: usize = *data.get(6).ok_or(QueryError::Truncated("chat length"))? as usize;
        let text: &[u8] = data
            .get(7..7 + len)
            .ok_or(QueryError::Truncated("chat text"))?;
        from_chat_text(&String::from_utf8_lossy(text), players_requested)
    } else {
        ServerInfo {
            name: format!("Terraria Server (Type: 0x{:02x})", opcode),
            version: "Unknown".to_owned(),
            online: true,
            players: PlayerInfo::new(0, DEFAULT_MAX_PLAYERS, players_requested),
            ..Default::default()
        }
    };
    result.set_extra("source", "native");
    result.set_extra("confidence", "low");
    Ok(result)
}

/// Scrape player counts and names out of a chat line.
pub fn from_chat_text(text: &str, players_requested: bool) -> ServerInfo {
    let mut current: u32 = 0;
    let mut max: u32 = DEFAULT_MAX_PLAYERS;

    // "Online players: X/Y"
    if let Some(rest) = after_any(text, &["Online players:", "Online player:"]) {
        if let Some((count, rest)) = leading_number(rest.trim_start()) {
            current = count;
            let rest: &str = rest.strip_prefix('/').unwrap_or(rest);
            if let Some((cap, _)) = leading_number(rest) {
                max = cap;
            }
        }
    }
    // "Players online: X"
    if let Some(rest) = after_any(text, &["Players online:", "Player online:"]) {
        if let Some((count, _)) = leading_number(rest.trim_start()) {
            current = count;
        }
    }
    // "N players currently online"
    if let Some(count) = count_before_currently_online(text) {
        current = count;
    }

    let names: Vec<Player> = trailing_names(text);
    if !names.is_empty() {
        current = names.len() as u32;
    }

    let mut players: PlayerInfo = PlayerInfo::new(current, max, players_requested);
    if let Some(list) = players.list.as_mut() {
        list.extend(names);
    }
    ServerInfo {
        name: "Terraria Server".to_owned(),
        version: "Unknown".to_owned(),
        online: true,
        players,
        ..Default::default()
    }
}

/// Rest of `text` after the earliest occurrence of any needle.
fn after_any<'a>(text: &'a str, needles: &[&str]) -> Option<&'a str> {
    needles
        .iter()
        .filter_map(|needle| text.find(needle).map(|at| (at, at + needle.len())))
        .min()
        .map(|(_, end)| &text[end..])
}

fn leading_number(text: &str) -> Option<(u32, &str)> {
    let end: usize = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let value: u32 = text[..end].parse().ok()?;
    Some((value, &text[end..]))
}

fn count_before_currently_online(text: &str) -> Option<u32> {
    text.match_indices("currently online").find_map(|(at, _)| {
        let before: &str = &text[..at];
        let before: &str = before
            .strip_suffix("players ")
            .or_else(|| before.strip_suffix("player "))?;
        let trimmed: &str = before.trim_end();
        if trimmed.len() == before.len() {
            return None;
        }
        let start: usize = trimmed.trim_end_matches(|c: char| c.is_ascii_digit()).len();
        trimmed[start..].parse().ok()
    })
}

/// Comma separated names after the last colon, if that segment is not a
/// count like `3/8`.
fn trailing_names(text: &str) -> Vec<Player> {
    let Some((_, segment)) = text.rsplit_once(':') else {
        return Vec::new();
    };
    let segment: &str = segment.trim();
    if segment.is_empty()
        || segment == "None"
        || segment.contains("No players")
        || segment.chars().all(|c| c.is_ascii_digit() || c == '/' || c.is_whitespace())
    {
        return Vec::new();
    }
    segment
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(Player::named)
        .collect()
}

fn rest_host(host: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]", host)
    } else {
        host.to_owned()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TerrariaProtocol {
    rest_port: u16,
}

impl Default for TerrariaProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl TerrariaProtocol {
    pub fn new() -> Self {
        TerrariaProtocol {
            rest_port: TSHOCK_REST_PORT,
        }
    }

    /// Look for TShock on `port` instead of 7878.
    pub fn with_rest_port(port: u16) -> Self {
        TerrariaProtocol { rest_port: port }
    }

    async fn query_tshock(
        &self,
        ctx: &QueryContext,
        host: &str,
        opts: &Options,
    ) -> Result<TShockStatus, QueryError> {
        let timeout: Duration = ctx.remaining().unwrap_or_else(|| opts.effective_timeout());
        let client: reqwest::Client = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()?;
        let base: String = format!("http://{}:{}", rest_host(host), self.rest_port);

        let mut last_err: QueryError = QueryError::Malformed("no TShock endpoint answered".to_owned());
        for endpoint in TSHOCK_ENDPOINTS {
            let url: String = format!("{}{}", base, endpoint);
            let attempt = async {
                let response: reqwest::Response = client.get(&url).send().await?.error_for_status()?;
                response.json::<TShockStatus>().await
            };
            match ctx.run(attempt).await? {
                Ok(status) => {
                    step!(opts, "tshock answered at {}", url);
                    return Ok(status);
                }
                Err(err) => {
                    step!(opts, "tshock {} failed: {}", url, err);
                    last_err = err.into();
                }
            }
        }
        Err(last_err)
    }

    async fn query_native(
        &self,
        ctx: &QueryContext,
        stream: &mut TcpStream,
        opts: &Options,
    ) -> Result<ServerInfo, QueryError> {
        let start: Instant = Instant::now();
        ctx.run_io(stream.write_all(&NATIVE_PROBE), QueryError::SendError)
            .await?;

        let mut resp_buf: [u8; 1024] = [0u8; 1024];
        let len: usize = ctx
            .run_io(stream.read(&mut resp_buf), QueryError::ReceiveError)
            .await?;
        let ping: u64 = ping_millis(start.elapsed());
        step!(opts, "terraria native probe got {} bytes", len);

        let mut result: ServerInfo = parse_native_response(&resp_buf[..len], opts.players())?;
        result.ping = ping;
        Ok(result)
    }
}

#[async_trait]
impl Protocol for TerrariaProtocol {
    async fn query(
        &self,
        ctx: &QueryContext,
        host: &str,
        port: u16,
        opts: &Options,
    ) -> Result<ServerInfo, QueryError> {
        let ctx: QueryContext = ctx.with_timeout(opts.effective_timeout());
        // the REST API only counts when the game port itself is open
        let mut stream: TcpStream = connect_tcp(&ctx, host, port, opts).await?;

        let start: Instant = Instant::now();
        let mut result: ServerInfo = match self.query_tshock(&ctx, host, opts).await {
            Ok(status) => status.to_server_info(ping_millis(start.elapsed()), opts.players()),
            Err(QueryError::Cancelled) => return Err(QueryError::Cancelled),
            Err(err) => {
                step!(opts, "tshock unavailable on {}: {}, probing native protocol", host, err);
                self.query_native(&ctx, &mut stream, opts).await?
            }
        };

        result.address = host.to_owned();
        result.port = port;
        result.query_port = port;
        result.game = self.detect_game(&result);
        Ok(result)
    }

    fn name(&self) -> &'static str {
        "terraria"
    }

    fn default_port(&self) -> u16 {
        DEFAULT_PORT
    }

    fn default_query_port(&self) -> u16 {
        DEFAULT_PORT
    }

    fn games(&self) -> &'static [GameConfig] {
        GAMES
    }

    fn detect_game(&self, _info: &ServerInfo) -> String {
        "terraria".to_owned()
    }

    fn transport(&self) -> Transport {
        Transport::Tcp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn online_players_ratio() {
        let info = from_chat_text("Online players: 3/16", false);
        assert_eq!((info.players.current, info.players.max), (3, 16));
        assert_eq!(info.players.list, None);
    }

    #[test]
    fn players_online_and_currently_online() {
        assert_eq!(from_chat_text("Players online: 5", false).players.current, 5);
        let info = from_chat_text("There are 4 players currently online", false);
        assert_eq!((info.players.current, info.players.max), (4, 8));
        assert_eq!(from_chat_text("1 player currently online", false).players.current, 1);
        assert_eq!(from_chat_text("players currently online", false).players.current, 0);
    }

    #[test]
    fn non_ascii_chat_text_is_scraped() {
        assert_eq!(from_chat_text("Café players currently online", false).players.current, 0);
        assert_eq!(from_chat_text("é3 players currently online", false).players.current, 3);
        assert_eq!(from_chat_text("Spieler: Jürgen, Zoë", true).players.current, 2);

        let info = parse_native_response(&chat_response("é3 players currently online"), false).unwrap();
        assert_eq!(info.players.current, 3);

        // invalid UTF-8 becomes U+FFFD right before the count
        let mut packet = chat_response("x2 players currently online");
        packet[7] = 0xFF;
        let info = parse_native_response(&packet, false).unwrap();
        assert_eq!(info.players.current, 2);
    }

    #[test]
    fn chat_text_is_capped_at_length_byte() {
        let long = "a".repeat(300);
        let packet = chat_response(&long);
        assert_eq!(packet[6], 255);
        assert_eq!(packet.len(), 7 + 255);
        assert!(parse_native_response(&packet, false).is_ok());
    }

    #[test]
    fn trailing_name_list_sets_count() {
        let info = from_chat_text("Online players: 2/8: Guide, Nurse", true);
        let names: Vec<String> = info.players.list.unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, ["Guide", "Nurse"]);
        assert_eq!((info.players.current, info.players.max), (2, 8));

        let info = from_chat_text("Current players: None", true);
        assert_eq!(info.players.list, Some(Vec::new()));
        assert_eq!(info.players.current, 0);
    }

    #[test]
    fn chat_opcode_is_scraped() {
        let info = parse_native_response(&chat_response("Online players: 1/4"), false).unwrap();
        assert!(info.online);
        assert_eq!((info.players.current, info.players.max), (1, 4));
        assert_eq!(info.extra("source"), Some("native"));
        assert_eq!(info.extra("confidence"), Some("low"));
    }

    #[test]
    fn other_opcodes_are_online_with_defaults() {
        let info = parse_native_response(&[0x0B, 0x00, 0x00, 0x00, 0x02, 0x01], true).unwrap();
        assert!(info.online);
        assert_eq!(info.name, "Terraria Server (Type: 0x02)");
        assert_eq!((info.players.current, info.players.max), (0, 8));
        assert_eq!(info.players.list, Some(Vec::new()));
    }

    #[test]
    fn short_responses_fail() {
        assert!(parse_native_response(&[0x05, 0x00, 0x00, 0x00], false).is_err());
        let packet = chat_response("Players online: 2");
        for cut in 0..packet.len() {
            assert!(parse_native_response(&packet[..cut], false).is_err(), "truncation at {} parsed", cut);
        }
    }

    #[test]
    fn tshock_status_maps_fields() {
        let status: TShockStatus = serde_json::from_str(
            r#"{"status":"200","name":"Hardmode","serverversion":"v1.4.4.9",
                "tshockversion":"5.2.0","world":"Eden","playercount":3,
                "maxplayers":16,"difficulty":2}"#,
        )
        .unwrap();
        let info = status.to_server_info(7, true);
        assert_eq!(info.name, "Hardmode");
        assert_eq!(info.version, "v1.4.4.9");
        assert_eq!((info.players.current, info.players.max), (3, 16));
        assert_eq!(info.players.list, Some(Vec::new()));
        assert_eq!(info.extra("world"), Some("Eden"));
        assert_eq!(info.extra("tshock"), Some("5.2.0"));
        assert_eq!(info.extra("difficulty"), Some("2"));
        assert_eq!(info.extra("source"), Some("tshock"));
    }

    #[test]
    fn ipv6_hosts_are_bracketed_for_rest() {
        assert_eq!(rest_host("::1"), "[::1]");
        assert_eq!(rest_host("example.com"), "example.com");
    }
}
