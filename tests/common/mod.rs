#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gamequery::protocol::a2s::info::A2sInfo;
use gamequery::protocol::a2s::packet::NO_CHALLENGE;
use gamequery::protocol::a2s::players::encode_players;
use gamequery::protocol::minecraft::status_response;
use gamequery::{GameConfig, Options, Player, Protocol, QueryContext, QueryError, ServerInfo, Transport};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};

pub const LOCALHOST: &str = "127.0.0.1";

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn options() -> Options {
    Options::default().with_timeout(Duration::from_secs(2))
}

/// A port nothing listens on, TCP or (almost certainly) UDP.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
    listener.local_addr().unwrap().port()
}

fn challenge_packet(challenge: u32) -> Vec<u8> {
    let mut packet = vec![0xFF, 0xFF, 0xFF, 0xFF, 0x41];
    packet.extend_from_slice(&challenge.to_le_bytes());
    packet
}

/// A2S server answering info and player requests, demanding `challenge`
/// on info requests when set.
pub async fn spawn_a2s(info: A2sInfo, players: Vec<Player>, challenge: Option<u32>) -> u16 {
    spawn_a2s_with(info, Some(players), challenge).await
}

/// A2S server that answers info requests and never answers player requests.
pub async fn spawn_a2s_without_players(info: A2sInfo) -> u16 {
    spawn_a2s_with(info, None, None).await
}

async fn spawn_a2s_with(info: A2sInfo, players: Option<Vec<Player>>, challenge: Option<u32>) -> u16 {
    let sock = UdpSocket::bind((LOCALHOST, 0)).await.unwrap();
    let port = sock.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut buf = [0u8; 1400];
        loop {
            let Ok((len, peer)) = sock.recv_from(&mut buf).await else {
                return;
            };
            let request = &buf[..len];
            if len < 5 || request[..4] != [0xFF; 4] {
                continue;
            }
            let reply = match request[4] {
                0x54 => {
                    let sent = (len >= 29).then(|| u32::from_le_bytes([request[25], request[26], request[27], request[28]]));
                    match challenge {
                        Some(expected) if sent != Some(expected) => challenge_packet(expected),
                        _ => info.encode(),
                    }
                }
                0x55 if len >= 9 => {
                    let Some(players) = &players else {
                        continue;
                    };
                    let sent = u32::from_le_bytes([request[5], request[6], request[7], request[8]]);
                    if sent == NO_CHALLENGE {
                        challenge_packet(0x0BAD_CAFE)
                    } else {
                        encode_players(players)
                    }
                }
                _ => continue,
            };
            let _ = sock.send_to(&reply, peer).await;
        }
    });
    port
}

async fn read_varint(stream: &mut TcpStream) -> std::io::Result<i32> {
    let mut result: u32 = 0;
    for i in 0..5 {
        let byte = stream.read_u8().await?;
        result |= ((byte & 0x7F) as u32) << (7 * i);
        if byte & 0x80 == 0 {
            break;
        }
    }
    Ok(result as i32)
}

async fn skip_frame(stream: &mut TcpStream) -> std::io::Result<()> {
    let len = read_varint(stream).await?;
    let mut body = vec![0u8; len as usize];
    stream.read_exact(&mut body).await?;
    Ok(())
}

/// Minecraft server replying to every status request with `json`.
pub async fn spawn_minecraft(json: String) -> u16 {
    let listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let json = Arc::new(json);
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let json = Arc::clone(&json);
            tokio::spawn(async move {
                // handshake, then status request
                if skip_frame(&mut stream).await.is_err() || skip_frame(&mut stream).await.is_err() {
                    return;
                }
                let _ = stream.write_all(&status_response(&json)).await;
            });
        }
    });
    port
}

/// Terraria game port answering the native probe with `reply`.
pub async fn spawn_terraria(reply: Vec<u8>) -> u16 {
    let listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let reply = Arc::new(reply);
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let reply = Arc::clone(&reply);
            tokio::spawn(async move {
                let mut probe = [0u8; 5];
                if stream.read_exact(&mut probe).await.is_ok() {
                    let _ = stream.write_all(&reply).await;
                }
            });
        }
    });
    port
}

/// Minimal HTTP server serving `body` at `path`, 404 elsewhere.
pub async fn spawn_tshock(path: &'static str, body: String) -> u16 {
    let listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let body = Arc::new(body);
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let body = Arc::clone(&body);
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut chunk = [0u8; 512];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&chunk[..n]),
                    }
                }
                let head = String::from_utf8_lossy(&request);
                let requested = head.split_whitespace().nth(1).unwrap_or("");
                let response = if requested == path {
                    format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    )
                } else {
                    "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_owned()
                };
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    port
}

pub fn sample_a2s() -> A2sInfo {
    A2sInfo {
        protocol: 17,
        name: "Mock Server".into(),
        map: "de_inferno".into(),
        folder: "csgo".into(),
        game: "Counter-Strike".into(),
        app_id: 730,
        players: 2,
        max_players: 24,
        bots: 0,
        server_type: b'd',
        environment: b'l',
        visibility: 0,
        vac: 1,
        version: "1.0.0".into(),
        extra_data: None,
    }
}

pub fn minecraft_json(motd: &str) -> String {
    format!(
        r#"{{"version":{{"name":"1.20.4","protocol":765}},"players":{{"max":20,"online":1,"sample":[{{"name":"steve","id":"0"}}]}},"description":{}}}"#,
        serde_json::to_string(motd).unwrap()
    )
}

/// Wraps a protocol so its default ports point at a mock server.
pub struct Rebased {
    pub inner: Arc<dyn Protocol>,
    pub port: u16,
}

#[async_trait]
impl Protocol for Rebased {
    async fn query(
        &self,
        ctx: &QueryContext,
        host: &str,
        port: u16,
        opts: &Options,
    ) -> Result<ServerInfo, QueryError> {
        self.inner.query(ctx, host, port, opts).await
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn default_port(&self) -> u16 {
        self.port
    }

    fn default_query_port(&self) -> u16 {
        self.port
    }

    fn games(&self) -> &'static [GameConfig] {
        &[]
    }

    fn detect_game(&self, info: &ServerInfo) -> String {
        self.inner.detect_game(info)
    }

    fn transport(&self) -> Transport {
        self.inner.transport()
    }
}

pub fn addr(port: u16) -> String {
    SocketAddr::from(([127, 0, 0, 1], port)).to_string()
}
