use byteorder::{LittleEndian, WriteBytesExt};

use crate::error::QueryError;
use crate::info::{PlayerInfo, ServerInfo};
use crate::parse::{get_string, get_u16, get_u64, get_u8};

use super::packet::{PacketHeader, PacketType};

const EDF_PORT: u8 = 0x80;
const EDF_STEAM_ID: u8 = 0x10;
const EDF_SOURCE_TV: u8 = 0x40;
const EDF_KEYWORDS: u8 = 0x20;
const EDF_GAME_ID: u8 = 0x01;

/// Server information carried by an A2S_INFO response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct A2sInfo {
    /// A2S_INFO protocol version
    pub protocol: u8,
    /// Server hostname
    pub name: String,
    /// Current map
    pub map: String,
    /// Location of server files
    pub folder: String,
    /// Free text game description
    pub game: String,
    /// Steam ID of game, truncated to 16 bits by the protocol
    pub app_id: u16,
    pub players: u8,
    pub max_players: u8,
    pub bots: u8,
    /// Server type:
    /// - `d`: Dedicated
    /// - `l`: Listen (non-dedicated)
    /// - `p`: SourceTV relay (proxy)
    pub server_type: u8,
    /// Server environment:
    /// - `l`: Linux
    /// - `w`: Windows
    /// - `m` or `o`: Mac
    pub environment: u8,
    /// `1` when password protected
    pub visibility: u8,
    /// `1` when VAC secured
    pub vac: u8,
    pub version: String,
    pub extra_data: Option<ExtraData>,
}

/// Optional trailer announced by the Extra Data Flag byte.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtraData {
    pub port: Option<u16>,
    pub steam_id: Option<u64>,
    pub source_tv: Option<(u16, String)>,
    pub keywords: Option<String>,
    /// 64-bit GameID; the low 24 bits are the full AppID
    pub game_id: Option<u64>,
}

impl ExtraData {
    fn flag(&self) -> u8 {
        let mut flag: u8 = 0;
        if self.port.is_some() {
            flag |= EDF_PORT;
        }
        if self.steam_id.is_some() {
            flag |= EDF_STEAM_ID;
        }
        if self.source_tv.is_some() {
            flag |= EDF_SOURCE_TV;
        }
        if self.keywords.is_some() {
            flag |= EDF_KEYWORDS;
        }
        if self.game_id.is_some() {
            flag |= EDF_GAME_ID;
        }
        flag
    }

    fn parse(data: &[u8], offset: &mut usize) -> Result<Self, QueryError> {
        let flag: u8 = get_u8(data, offset, "extra data flag")?;
        let mut edf: ExtraData = ExtraData::default();
        if flag & EDF_PORT != 0 {
            edf.port = Some(get_u16(data, offset, "game port")?);
        }
        if flag & EDF_STEAM_ID != 0 {
            edf.steam_id = Some(get_u64(data, offset, "steam id")?);
        }
        if flag & EDF_SOURCE_TV != 0 {
            let port: u16 = get_u16(data, offset, "sourcetv port")?;
            let name: String = get_string(data, offset, "sourcetv name")?;
            edf.source_tv = Some((port, name));
        }
        if flag & EDF_KEYWORDS != 0 {
            edf.keywords = Some(get_string(data, offset, "keywords")?);
        }
        if flag & EDF_GAME_ID != 0 {
            edf.game_id = Some(get_u64(data, offset, "game id")?);
        }
        Ok(edf)
    }

    /// The AppID encoded in the GameID, if any.
    pub fn full_app_id(&self) -> Option<u32> {
        self.game_id
            .map(|id| (id & 0x00FF_FFFF) as u32)
            .filter(|id| *id != 0)
    }
}

impl A2sInfo {
    /// Parse the body of an A2S_INFO response (everything after the type
    /// byte). Every field is bounds-checked.
    pub fn parse(data: &[u8]) -> Result<Self, QueryError> {
        let mut offset: usize = 0;
        let mut info: A2sInfo = A2sInfo {
            protocol: get_u8(data, &mut offset, "protocol version")?,
            name: get_string(data, &mut offset, "name")?,
            map: get_string(data, &mut offset, "map")?,
            folder: get_string(data, &mut offset, "folder")?,
            game: get_string(data, &mut offset, "game")?,
            app_id: get_u16(data, &mut offset, "app id")?,
            players: get_u8(data, &mut offset, "players")?,
            max_players: get_u8(data, &mut offset, "max players")?,
            bots: get_u8(data, &mut offset, "bots")?,
            server_type: get_u8(data, &mut offset, "server type")?,
            environment: get_u8(data, &mut offset, "environment")?,
            visibility: get_u8(data, &mut offset, "visibility")?,
            vac: get_u8(data, &mut offset, "vac")?,
            version: get_string(data, &mut offset, "version")?,
            extra_data: None,
        };

        if offset < data.len() {
            info.extra_data = Some(ExtraData::parse(data, &mut offset)?);
        }
        Ok(info)
    }

    /// Serialize into a complete A2S_INFO response datagram.
    pub fn encode(&self) -> Vec<u8> {
        let mut out: Vec<u8> = Vec::with_capacity(64);
        out.extend_from_slice(&PacketHeader::Single.to_le_bytes());
        out.push(PacketType::InfoResponse.to_byte());
        out.push(self.protocol);
        for text in [&self.name, &self.map, &self.folder, &self.game] {
            push_string(&mut out, text);
        }
        // writes into a Vec cannot fail
        let _ = out.write_u16::<LittleEndian>(self.app_id);
        out.extend_from_slice(&[
            self.players,
            self.max_players,
            self.bots,
            self.server_type,
            self.environment,
            self.visibility,
            self.vac,
        ]);
        push_string(&mut out, &self.version);

        if let Some(edf) = &self.extra_data {
            out.push(edf.flag());
            if let Some(port) = edf.port {
                let _ = out.write_u16::<LittleEndian>(port);
            }
            if let Some(steam_id) = edf.steam_id {
                let _ = out.write_u64::<LittleEndian>(steam_id);
            }
            if let Some((port, name)) = &edf.source_tv {
                let _ = out.write_u16::<LittleEndian>(*port);
                push_string(&mut out, name);
            }
            if let Some(keywords) = &edf.keywords {
                push_string(&mut out, keywords);
            }
            if let Some(game_id) = edf.game_id {
                let _ = out.write_u64::<LittleEndian>(game_id);
            }
        }
        out
    }

    /// AppID as reported, preferring the full one from the GameID.
    pub fn app_id(&self) -> u32 {
        self.extra_data
            .as_ref()
            .and_then(ExtraData::full_app_id)
            .unwrap_or(self.app_id as u32)
    }

    /// Map onto the shared result model. `game` is left for the classifier.
    pub fn to_server_info(&self, ping: u64, players_requested: bool) -> ServerInfo {
        let mut result: ServerInfo = ServerInfo {
            name: self.name.clone(),
            version: self.version.clone(),
            map: self.map.clone(),
            online: true,
            ping,
            players: PlayerInfo::new(
                self.players as u32,
                self.max_players as u32,
                players_requested,
            ),
            ..Default::default()
        };
        result.set_extra("game", &self.game);
        result.set_extra("app_id", self.app_id());
        result.set_extra("folder", &self.folder);
        result.set_extra("protocol", self.protocol);
        result.set_extra("bots", self.bots);
        result.set_extra("server_type", char::from(self.server_type));
        result.set_extra("environment", char::from(self.environment));
        result.set_extra("visibility", self.visibility);
        result.set_extra("vac", self.vac);

        if let Some(edf) = &self.extra_data {
            if let Some(port) = edf.port {
                result.set_extra("game_port", port);
            }
            if let Some(steam_id) = edf.steam_id {
                result.set_extra("steam_id", steam_id);
            }
            if let Some((port, name)) = &edf.source_tv {
                result.set_extra("sourcetv_port", port);
                result.set_extra("sourcetv_name", name);
            }
            if let Some(keywords) = &edf.keywords {
                result.set_extra("keywords", keywords);
            }
            if let Some(game_id) = edf.game_id {
                result.set_extra("game_id", game_id);
            }
        }
        result
    }
}

fn push_string(out: &mut Vec<u8>, text: &str) {
    out.extend_from_slice(text.as_bytes());
    out.push(0);
}
