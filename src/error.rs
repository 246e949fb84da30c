use std::io;

use thiserror::Error;

/// Broad class of a [QueryError], used by the engine to decide whether
/// another candidate is worth trying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad address, bad port or unknown game. Never retried.
    Config,
    /// Socket bind/connect/send/receive, deadline or cancellation.
    Transport,
    /// The bytes on the wire were not what the protocol expects.
    Protocol,
    /// Every candidate port/protocol was tried without an answer.
    Exhausted,
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("invalid port: {0}")]
    InvalidPort(String),
    #[error("unsupported game: {0}")]
    UnsupportedGame(String),

    #[error("could not resolve host {0}")]
    UnresolvedHost(String),
    #[error("failed to bind local socket: {0}")]
    FailedPortBind(#[source] io::Error),
    #[error("connection failed: {0}")]
    UnreachableHost(#[source] io::Error),
    #[error("write failed: {0}")]
    SendError(#[source] io::Error),
    #[error("read failed: {0}")]
    ReceiveError(#[source] io::Error),
    #[error("operation timed out")]
    Timeout,
    #[error("operation cancelled")]
    Cancelled,

    #[error("unknown packet header {0:#x}")]
    UnknownPacketHeader(i32),
    #[error("unexpected response type {0:#04x}")]
    UnknownPacketType(u8),
    #[error("split responses are not supported")]
    SplitPacket,
    #[error("response truncated while reading {0}")]
    Truncated(&'static str),
    #[error("VarInt too long")]
    VarIntTooLong,
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("no responsive server found at {0}")]
    NoResponsiveServer(String),
}

impl QueryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueryError::InvalidAddress(_)
            | QueryError::InvalidPort(_)
            | QueryError::UnsupportedGame(_) => ErrorKind::Config,
            QueryError::UnresolvedHost(_)
            | QueryError::FailedPortBind(_)
            | QueryError::UnreachableHost(_)
            | QueryError::SendError(_)
            | QueryError::ReceiveError(_)
            | QueryError::Timeout
            | QueryError::Cancelled => ErrorKind::Transport,
            QueryError::UnknownPacketHeader(_)
            | QueryError::UnknownPacketType(_)
            | QueryError::SplitPacket
            | QueryError::Truncated(_)
            | QueryError::VarIntTooLong
            | QueryError::Malformed(_)
            | QueryError::Json(_)
            | QueryError::Http(_) => ErrorKind::Protocol,
            QueryError::NoResponsiveServer(_) => ErrorKind::Exhausted,
        }
    }
}
