//! Pure Rust async game server queries: [Valve A2S](https://developer.valvesoftware.com/wiki/Server_queries),
//! Minecraft Server List Ping and Terraria (TShock REST or a native probe),
//! plus auto-detection and host-wide discovery on top of them.
pub mod classify;
pub mod context;
pub mod engine;
pub mod error;
pub mod info;
pub mod options;
mod parse;
pub mod protocol;
pub mod registry;

pub use context::QueryContext;
pub use engine::{parse_address, QueryEngine, ScanProgress, Target};
pub use error::{ErrorKind, QueryError};
pub use info::{GameConfig, Player, PlayerInfo, ServerInfo};
pub use options::{Options, DEFAULT_TIMEOUT, DISCOVERY_TIMEOUT};
pub use protocol::{Protocol, Transport};
pub use registry::Registry;
