//! Wire codecs, one per protocol family, behind the [Protocol] trait.

pub mod a2s;
pub mod minecraft;
pub mod terraria;

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::{TcpStream, UdpSocket};

use crate::context::QueryContext;
use crate::error::QueryError;
use crate::info::{GameConfig, ServerInfo};
use crate::options::{step, Options};

pub use a2s::A2sProtocol;
pub use minecraft::MinecraftProtocol;
pub use terraria::TerrariaProtocol;

/// Socket type a protocol speaks on its query port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
}

/// A game query protocol.
///
/// Implementations perform their own I/O and never know about each other;
/// the [crate::Registry] owns the mapping from game names to protocols.
#[async_trait]
pub trait Protocol: Send + Sync {
    /// Query `host:port`, binding every socket operation to `ctx`.
    async fn query(
        &self,
        ctx: &QueryContext,
        host: &str,
        port: u16,
        opts: &Options,
    ) -> Result<ServerInfo, QueryError>;

    /// Protocol name, e.g. `a2s`
    fn name(&self) -> &'static str;

    /// Port players connect to
    fn default_port(&self) -> u16;

    /// Port status queries are answered on
    fn default_query_port(&self) -> u16;

    /// Every game served by this protocol with its ports.
    fn games(&self) -> &'static [GameConfig];

    /// Resolve the specific game from a parsed response.
    fn detect_game(&self, info: &ServerInfo) -> String;

    fn transport(&self) -> Transport;

    /// Whether `port` is one of this protocol's registered ports.
    fn uses_port(&self, port: u16) -> bool {
        self.default_port() == port
            || self.default_query_port() == port
            || self.games().iter().any(|game| game.uses_port(port))
    }

    /// Distance from `port` to the nearest registered port.
    fn port_distance(&self, port: u16) -> u16 {
        self.games()
            .iter()
            .flat_map(|game| [game.game_port, game.query_port])
            .chain([self.default_port(), self.default_query_port()])
            .map(|known| known.abs_diff(port))
            .min()
            .unwrap_or(u16::MAX)
    }
}

/// Resolve `host:port` to the first socket address, within `ctx`.
pub(crate) async fn resolve(
    ctx: &QueryContext,
    host: &str,
    port: u16,
) -> Result<SocketAddr, QueryError> {
    let mut addrs = ctx
        .run(tokio::net::lookup_host((host, port)))
        .await?
        .map_err(|_| QueryError::UnresolvedHost(host.to_owned()))?;
    addrs
        .next()
        .ok_or_else(|| QueryError::UnresolvedHost(host.to_owned()))
}

/// Open a connected UDP socket to `host:port`.
pub(crate) async fn connect_udp(
    ctx: &QueryContext,
    host: &str,
    port: u16,
    opts: &Options,
) -> Result<UdpSocket, QueryError> {
    let addr: SocketAddr = resolve(ctx, host, port).await?;
    // just arbitrarily bind any port of the matching family
    let local: &str = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let sock: UdpSocket = UdpSocket::bind(local)
        .await
        .map_err(QueryError::FailedPortBind)?;
    ctx.run_io(sock.connect(addr), QueryError::UnreachableHost)
        .await?;
    step!(opts, "udp socket connected to {}", addr);
    Ok(sock)
}

/// Dial `host:port` over TCP.
pub(crate) async fn connect_tcp(
    ctx: &QueryContext,
    host: &str,
    port: u16,
    opts: &Options,
) -> Result<TcpStream, QueryError> {
    let addr: SocketAddr = resolve(ctx, host, port).await?;
    let stream: TcpStream = ctx
        .run_io(TcpStream::connect(addr), QueryError::UnreachableHost)
        .await
        .map_err(|err| {
            step!(opts, "tcp connect to {} failed: {}", addr, err);
            err
        })?;
    step!(opts, "tcp connected to {}", addr);
    Ok(stream)
}
