//! Minecraft Server List Ping over TCP.
//!
//! Every packet is `[VarInt length][VarInt packet id][body]`. The status
//! exchange is a handshake with next state `1`, an empty status request
//! and a single JSON reply.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;

use crate::context::QueryContext;
use crate::error::QueryError;
use crate::info::{ping_millis, GameConfig, Player, PlayerInfo, ServerInfo};
use crate::options::{step, Options};

use super::{connect_tcp, Protocol, Transport};

pub const DEFAULT_PORT: u16 = 25565;

/// Protocol number announced in the handshake (1.20.4). Status works with
/// any value.
pub const HANDSHAKE_PROTOCOL: i32 = 765;

/// Frames above this are refused before allocating.
const MAX_FRAME: usize = 2 * 1024 * 1024;

/// A VarInt never spans more than five bytes.
const MAX_VARINT_BYTES: usize = 5;

const GAMES: &[GameConfig] = &[GameConfig::new("minecraft", DEFAULT_PORT, DEFAULT_PORT)];

/// Append `value` as a VarInt (LEB128 over the two's complement bits).
pub fn write_varint(buf: &mut Vec<u8>, value: i32) {
    let mut value: u32 = value as u32;
    loop {
        if value & !0x7F == 0 {
            buf.push(value as u8);
            return;
        }
        buf.push((value & 0x7F) as u8 | 0x80);
        value >>= 7;
    }
}

/// Read a VarInt at `offset`, advancing past it.
pub fn read_varint(data: &[u8], offset: &mut usize) -> Result<i32, QueryError> {
    let mut result: u32 = 0;
    for i in 0..MAX_VARINT_BYTES {
        let byte: u8 = *data.get(*offset + i).ok_or(QueryError::Truncated("varint"))?;
        result |= ((byte & 0x7F) as u32) << (7 * i);
        if byte & 0x80 == 0 {
            *offset += i + 1;
            return Ok(result as i32);
        }
    }
    Err(QueryError::VarIntTooLong)
}

fn write_string(buf: &mut Vec<u8>, value: &str) {
    write_varint(buf, value.len() as i32);
    buf.extend_from_slice(value.as_bytes());
}

/// Prefix `body` with its VarInt length.
pub fn frame(body: &[u8]) -> Vec<u8> {
    let mut out: Vec<u8> = Vec::with_capacity(body.len() + MAX_VARINT_BYTES);
    write_varint(&mut out, body.len() as i32);
    out.extend_from_slice(body);
    out
}

/// Framed handshake packet switching the connection to the status state.
pub fn handshake_packet(host: &str, port: u16) -> Vec<u8> {
    let mut body: Vec<u8> = Vec::with_capacity(host.len() + 16);
    write_varint(&mut body, 0x00);
    write_varint(&mut body, HANDSHAKE_PROTOCOL);
    write_string(&mut body, host);
    body.extend_from_slice(&port.to_be_bytes());
    write_varint(&mut body, 1);
    frame(&body)
}

/// Framed status request.
pub fn status_request() -> Vec<u8> {
    frame(&[0x00])
}

/// Framed status response carrying `json`, as a server would send it.
pub fn status_response(json: &str) -> Vec<u8> {
    let mut body: Vec<u8> = Vec::with_capacity(json.len() + 8);
    write_varint(&mut body, 0x00);
    write_string(&mut body, json);
    frame(&body)
}

async fn read_varint_from<R>(ctx: &QueryContext, reader: &mut R) -> Result<i32, QueryError>
where
    R: AsyncRead + Unpin,
{
    let mut result: u32 = 0;
    for i in 0..MAX_VARINT_BYTES {
        let byte: u8 = ctx
            .run_io(reader.read_u8(), QueryError::ReceiveError)
            .await?;
        result |= ((byte & 0x7F) as u32) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(result as i32);
        }
    }
    Err(QueryError::VarIntTooLong)
}

fn checked_len(len: i32) -> Result<usize, QueryError> {
    usize::try_from(len)
        .ok()
        .filter(|len| *len <= MAX_FRAME)
        .ok_or_else(|| QueryError::Malformed(format!("invalid length {}", len)))
}

/// Read one length-prefixed frame and return its body.
async fn read_frame<R>(ctx: &QueryContext, reader: &mut R) -> Result<Vec<u8>, QueryError>
where
    R: AsyncRead + Unpin,
{
    let len: usize = checked_len(read_varint_from(ctx, reader).await?)?;
    let mut body: Vec<u8> = vec![0u8; len];
    ctx.run_io(reader.read_exact(&mut body), QueryError::ReceiveError)
        .await?;
    Ok(body)
}

/// Decoded status JSON.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub version: Version,
    #[serde(default)]
    pub players: Players,
    #[serde(default)]
    pub description: Option<TextComponent>,
    #[serde(default)]
    pub favicon: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Version {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub protocol: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Players {
    #[serde(default)]
    pub max: i64,
    #[serde(default)]
    pub online: i64,
    #[serde(default)]
    pub sample: Option<Vec<SamplePlayer>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SamplePlayer {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub id: String,
}

/// The MOTD: either a plain string or a rich text object whose `extra`
/// fragments follow its own `text`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TextComponent {
    Plain(String),
    Rich {
        #[serde(default)]
        text: String,
        #[serde(default)]
        extra: Vec<TextComponent>,
    },
    Other(serde_json::Value),
}

impl TextComponent {
    /// Concatenated text, depth first.
    pub fn flatten(&self) -> String {
        let mut out: String = String::new();
        self.flatten_into(&mut out);
        out
    }

    fn flatten_into(&self, out: &mut String) {
        match self {
            TextComponent::Plain(text) => out.push_str(text),
            TextComponent::Rich { text, extra } => {
                out.push_str(text);
                for fragment in extra {
                    fragment.flatten_into(out);
                }
            }
            TextComponent::Other(_) => {}
        }
    }
}

/// One pass removing every `§` + ASCII alphanumeric pair.
fn strip_format_codes(text: &str) -> String {
    let mut out: String = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '§' && chars.peek().is_some_and(char::is_ascii_alphanumeric) {
            chars.next();
            continue;
        }
        out.push(c);
    }
    out
}

/// Strip `§` formatting codes until none remain, then trim.
pub fn clean_motd(raw: &str) -> String {
    let mut text: String = raw.to_owned();
    // removing one pair can join a `§` with the next code, e.g. `§§aa`
    loop {
        let stripped: String = strip_format_codes(&text);
        if stripped == text {
            break;
        }
        text = stripped;
    }
    text.trim().to_owned()
}

/// Decode a status response frame body (packet id, VarInt length, JSON).
pub fn parse_status_packet(body: &[u8]) -> Result<StatusResponse, QueryError> {
    let mut offset: usize = 0;
    let packet_id: i32 = read_varint(body, &mut offset)?;
    if packet_id != 0x00 {
        return Err(QueryError::Malformed(format!(
            "unexpected status packet id {:#x}",
            packet_id
        )));
    }
    let len: usize = checked_len(read_varint(body, &mut offset)?)?;
    let json: &[u8] = body
        .get(offset..offset + len)
        .ok_or(QueryError::Truncated("status json"))?;
    Ok(serde_json::from_slice(json)?)
}

impl StatusResponse {
    /// Map onto the shared result model.
    pub fn to_server_info(&self, ping: u64, players_requested: bool) -> ServerInfo {
        let motd: String = self
            .description
            .as_ref()
            .map(|description| clean_motd(&description.flatten()))
            .unwrap_or_default();

        let mut players: PlayerInfo = PlayerInfo::new(
            clamp_count(self.players.online),
            clamp_count(self.players.max),
            players_requested,
        );
        if let (Some(list), Some(sample)) = (players.list.as_mut(), &self.players.sample) {
            list.extend(sample.iter().map(|p| Player::named(p.name.clone())));
        }

        let mut result: ServerInfo = ServerInfo {
            name: motd,
            version: self.version.name.clone(),
            online: self.version.protocol >= 0,
            ping,
            players,
            ..Default::default()
        };
        result.set_extra("protocol", self.version.protocol);
        if self.favicon.as_deref().is_some_and(|icon| !icon.is_empty()) {
            result.set_extra("favicon", true);
        }
        result
    }
}

fn clamp_count(value: i64) -> u32 {
    value.clamp(0, u32::MAX as i64) as u32
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MinecraftProtocol;

impl MinecraftProtocol {
    pub fn new() -> Self {
        MinecraftProtocol
    }
}

#[async_trait]
impl Protocol for MinecraftProtocol {
    async fn query(
        &self,
        ctx: &QueryContext,
        host: &str,
        port: u16,
        opts: &Options,
    ) -> Result<ServerInfo, QueryError> {
        let ctx: QueryContext = ctx.with_timeout(opts.effective_timeout());
        let mut stream: TcpStream = connect_tcp(&ctx, host, port, opts).await?;

        step!(opts, "minecraft handshake to {}:{}", host, port);
        ctx.run_io(
            stream.write_all(&handshake_packet(host, port)),
            QueryError::SendError,
        )
        .await?;

        let start: Instant = Instant::now();
        ctx.run_io(stream.write_all(&status_request()), QueryError::SendError)
            .await?;
        let body: Vec<u8> = read_frame(&ctx, &mut stream).await?;
        let ping: u64 = ping_millis(start.elapsed());
        step!(opts, "minecraft status from {}:{}: {} bytes", host, port, body.len());

        let status: StatusResponse = parse_status_packet(&body)?;
        let mut result: ServerInfo = status.to_server_info(ping, opts.players());
        result.address = host.to_owned();
        result.port = port;
        result.query_port = port;
        result.game = self.detect_game(&result);
        step!(
            opts,
            "minecraft {:?} version {:?} ({} / {})",
            result.name,
            result.version,
            result.players.current,
            result.players.max
        );
        Ok(result)
    }

    fn name(&self) -> &'static str {
        "minecraft"
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
        "minecraft".to_owned()
    }

    fn transport(&self) -> Transport {
        Transport::Tcp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(value: i32) -> Vec<u8> {
        let mut buf = Vec::new();
        write_varint(&mut buf, value);
        buf
    }

    fn status_body(json: &str) -> Vec<u8> {
        let framed = status_response(json);
        let mut offset = 0;
        read_varint(&framed, &mut offset).unwrap();
        framed[offset..].to_vec()
    }

    #[test]
    fn varint_known_values() {
        assert_eq!(encoded(0), [0x00]);
        assert_eq!(encoded(127), [0x7F]);
        assert_eq!(encoded(128), [0x80, 0x01]);
        assert_eq!(encoded(255), [0xFF, 0x01]);
        assert_eq!(encoded(25565), [0xDD, 0xC7, 0x01]);
        assert_eq!(encoded(765), [0xFD, 0x05]);
        assert_eq!(encoded(-1), [0xFF, 0xFF, 0xFF, 0xFF, 0x0F]);

        let mut offset = 0;
        assert_eq!(read_varint(&[0xDD, 0xC7, 0x01], &mut offset).unwrap(), 25565);
        assert_eq!(offset, 3);
    }

    #[test]
    fn varint_too_long() {
        let mut offset = 0;
        assert!(matches!(
            read_varint(&[0xFF; 6], &mut offset),
            Err(QueryError::VarIntTooLong)
        ));
    }

    #[test]
    fn handshake_layout() {
        let packet = handshake_packet("localhost", 25565);
        let mut expected = vec![0x00, 0xFD, 0x05, 9];
        expected.extend_from_slice(b"localhost");
        expected.extend_from_slice(&[0x63, 0xDD, 0x01]);
        assert_eq!(packet[0] as usize, expected.len());
        assert_eq!(&packet[1..], &expected[..]);
        assert_eq!(status_request(), [0x01, 0x00]);
    }

    #[test]
    fn rich_motd_is_flattened_and_cleaned() {
        let json = r#"{"version":{"name":"1.20.1","protocol":763},
            "players":{"max":20,"online":1},
            "description":{"text":"Welcome!","extra":[{"text":"A "},
            {"text":"Multi-Line","color":"gold"},{"text":"\n"},
            {"text":"§cMOTD!","bold":true}]}}"#;
        let status = parse_status_packet(&status_body(json)).unwrap();
        let info = status.to_server_info(3, false);
        assert_eq!(info.name, "Welcome!A Multi-Line\nMOTD!");
        assert_eq!(info.version, "1.20.1");
        assert!(info.online);
        assert_eq!((info.players.current, info.players.max), (1, 20));
        assert_eq!(info.extra("protocol"), Some("763"));
    }

    #[test]
    fn plain_and_single_fragment_descriptions_match() {
        let plain: TextComponent = serde_json::from_str(r#""§aHello §lWorld ""#).unwrap();
        let rich: TextComponent =
            serde_json::from_str(r#"{"text":"","extra":["§aHello §lWorld "]}"#).unwrap();
        assert_eq!(clean_motd(&plain.flatten()), "Hello World");
        assert_eq!(clean_motd(&plain.flatten()), clean_motd(&rich.flatten()));
    }

    #[test]
    fn nested_extra_is_depth_first() {
        let rich: TextComponent =
            serde_json::from_str(r#"{"text":"a","extra":[{"text":"b","extra":["c"]},"d"]}"#)
                .unwrap();
        assert_eq!(rich.flatten(), "abcd");
    }

    #[test]
    fn cleaning_is_idempotent() {
        for raw in ["§§aa", "  §1x§k ", "§", "x§ ", "§§§bbb tail", "plain"] {
            let once = clean_motd(raw);
            assert_eq!(clean_motd(&once), once, "input {:?}", raw);
        }
        assert_eq!(clean_motd("§§aa"), "");
    }

    #[test]
    fn players_follow_request_flag() {
        let json = r#"{"version":{"name":"1.20","protocol":763},
            "players":{"max":10,"online":2,"sample":[{"name":"steve","id":"1"},{"name":"alex","id":"2"}]},
            "description":"hi"}"#;
        let status = parse_status_packet(&status_body(json)).unwrap();
        assert_eq!(status.to_server_info(1, false).players.list, None);
        let names: Vec<String> = status
            .to_server_info(1, true)
            .players
            .list
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, ["steve", "alex"]);

        let no_sample = r#"{"version":{"name":"1.20","protocol":763},"players":{"max":10,"online":0},"description":"x"}"#;
        let status = parse_status_packet(&status_body(no_sample)).unwrap();
        assert_eq!(status.to_server_info(1, true).players.list, Some(Vec::new()));
    }

    #[test]
    fn negative_protocol_is_offline() {
        let json = r#"{"version":{"name":"Sleeping","protocol":-1},"players":{"max":0,"online":0},"description":"zzz"}"#;
        let info = parse_status_packet(&status_body(json)).unwrap().to_server_info(1, false);
        assert!(!info.online);
        assert_eq!(info.name, "zzz");
    }

    #[test]
    fn every_truncation_is_an_error() {
        let body = status_body(r#"{"version":{"name":"1.20","protocol":763},"description":"x"}"#);
        assert!(parse_status_packet(&body).is_ok());
        for cut in 0..body.len() {
            assert!(parse_status_packet(&body[..cut]).is_err(), "truncation at {} parsed", cut);
        }
    }

    #[test]
    fn rejects_bad_packet_id_and_json() {
        assert!(parse_status_packet(&[0x01, 0x02, b'{', b'}']).is_err());
        assert!(matches!(
            parse_status_packet(&[0x00, 0x02, b'{', b'x']),
            Err(QueryError::Json(_))
        ));
    }
}
