//! Valve's A2S server query protocol over UDP.

pub mod info;
pub mod packet;
pub mod players;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::time::Instant;

use crate::classify::classify_a2s;
use crate::context::QueryContext;
use crate::error::QueryError;
use crate::info::{ping_millis, GameConfig, Player, ServerInfo};
use crate::options::{step, Options};

use self::info::A2sInfo;
use self::packet::{PacketType, RequestPacket, ResponsePacket, NO_CHALLENGE};
use self::players::parse_players;
use super::{connect_udp, Protocol, Transport};

/// Port Source engine servers listen on by default.
pub const DEFAULT_PORT: u16 = 27015;

/// Largest datagram we accept; split responses are rejected anyway.
const RECV_BUFFER: usize = 4096;

/// Servers may hand out a fresh challenge instead of answering; give up
/// after this many.
const MAX_CHALLENGES: usize = 3;

const GAMES: &[GameConfig] = &[
    GameConfig::new("counter-strike-2", 27015, 27015),
    GameConfig::new("counter-strike", 27015, 27015),
    GameConfig::new("counter-source", 27015, 27015),
    GameConfig::new("garrys-mod", 27015, 27015),
    GameConfig::new("team-fortress-2", 27015, 27015),
    GameConfig::new("left-4-dead", 27015, 27015),
    GameConfig::new("left-4-dead-2", 27015, 27015),
    GameConfig::new("half-life", 27015, 27015),
    GameConfig::new("insurgency", 27015, 27015),
    GameConfig::new("day-of-defeat", 27015, 27015),
    GameConfig::new("day-of-defeat-source", 27015, 27015),
    GameConfig::new("project-zomboid", 16261, 16261),
    GameConfig::new("satisfactory", 7777, 15777),
    GameConfig::new("7-days-to-die", 26900, 26900),
    GameConfig::new("arma-3", 2302, 2303),
    GameConfig::new("dayz", 2302, 27016),
    GameConfig::new("battalion-1944", 7777, 7777),
    GameConfig::new("rust", 28015, 28015),
    GameConfig::new("valheim", 2456, 2457),
    GameConfig::new("ark-survival-evolved", 7777, 27015),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct A2sProtocol;

impl A2sProtocol {
    pub fn new() -> Self {
        A2sProtocol
    }
}

async fn send_recv(
    ctx: &QueryContext,
    sock: &UdpSocket,
    packet: &RequestPacket,
) -> Result<ResponsePacket, QueryError> {
    // sending
    ctx.run_io(sock.send(&packet.pack()), QueryError::SendError)
        .await?;

    // receiving packet
    let mut resp_buf: [u8; RECV_BUFFER] = [0u8; RECV_BUFFER];
    let len: usize = ctx
        .run_io(sock.recv(&mut resp_buf), QueryError::ReceiveError)
        .await?;

    ResponsePacket::unpack(&resp_buf[..len])
}

/// Send `request`, answering challenges until the server replies with
/// `expected`. Returns the response and the time the first reply arrived.
async fn exchange(
    ctx: &QueryContext,
    sock: &UdpSocket,
    request: RequestPacket,
    expected: PacketType,
    opts: &Options,
) -> Result<(ResponsePacket, Instant), QueryError> {
    let mut packet: ResponsePacket = send_recv(ctx, sock, &request).await?;
    let first_reply: Instant = Instant::now();

    // absolving challenge
    let mut challenges: usize = 0;
    while packet.packet_type() == PacketType::Challenge {
        challenges += 1;
        if challenges > MAX_CHALLENGES {
            return Err(QueryError::Malformed(
                "server keeps issuing challenges".to_owned(),
            ));
        }
        let challenge: u32 = packet.challenge()?;
        step!(opts, "a2s challenge {:#010x} for {:?}", challenge, request.packet_type());
        packet = send_recv(ctx, sock, &request.with_challenge(challenge)).await?;
    }

    if packet.packet_type() != expected {
        return Err(QueryError::UnknownPacketType(packet.packet_type().to_byte()));
    }
    Ok((packet, first_reply))
}

async fn query_players(
    ctx: &QueryContext,
    sock: &UdpSocket,
    opts: &Options,
) -> Result<Vec<Player>, QueryError> {
    let request: RequestPacket = RequestPacket::players(NO_CHALLENGE);
    let (packet, _) = exchange(ctx, sock, request, PacketType::PlayerResponse, opts).await?;
    parse_players(packet.body())
}

#[async_trait]
impl Protocol for A2sProtocol {
    async fn query(
        &self,
        ctx: &QueryContext,
        host: &str,
        port: u16,
        opts: &Options,
    ) -> Result<ServerInfo, QueryError> {
        let ctx: QueryContext = ctx.with_timeout(opts.effective_timeout());
        let sock: UdpSocket = connect_udp(&ctx, host, port, opts).await?;

        let start: Instant = Instant::now();
        let (packet, first_reply) =
            exchange(&ctx, &sock, RequestPacket::info(None), PacketType::InfoResponse, opts)
                .await?;
        let ping: u64 = ping_millis(first_reply.duration_since(start));

        let info: A2sInfo = A2sInfo::parse(packet.body())?;
        step!(
            opts,
            "a2s info from {}:{}: {:?} app {} ({} / {})",
            host,
            port,
            info.name,
            info.app_id(),
            info.players,
            info.max_players
        );

        let mut result: ServerInfo = info.to_server_info(ping, opts.players());
        result.address = host.to_owned();
        result.query_port = port;
        result.port = info
            .extra_data
            .as_ref()
            .and_then(|edf| edf.port)
            .unwrap_or(port);
        result.game = self.detect_game(&result);

        if opts.players() {
            match query_players(&ctx, &sock, opts).await {
                Ok(players) => result.players.list = Some(players),
                // the info answer stands on its own
                Err(err) => step!(opts, "a2s player list from {}:{} failed: {}", host, port, err),
            }
        }
        Ok(result)
    }

    fn name(&self) -> &'static str {
        "a2s"
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

    fn detect_game(&self, info: &ServerInfo) -> String {
        classify_a2s(info)
    }

    fn transport(&self) -> Transport {
        Transport::Udp
    }
}
