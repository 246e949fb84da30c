use std::time::Duration;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::error::QueryError;
use crate::info::Player;
use crate::parse::{get_f32, get_i32, get_string, get_u8};

use super::packet::{PacketHeader, PacketType};

/// Parse the body of an A2S_PLAYER response.
///
/// Layout: a count byte, then per player an index byte, name, i32 score and
/// f32 seconds connected. Fewer entries than the count is a truncation.
pub fn parse_players(data: &[u8]) -> Result<Vec<Player>, QueryError> {
    let mut offset: usize = 0;
    let count: u8 = get_u8(data, &mut offset, "player count")?;
    let mut players: Vec<Player> = Vec::with_capacity(count as usize);

    for _ in 0..count {
        let _index: u8 = get_u8(data, &mut offset, "player index")?;
        let name: String = get_string(data, &mut offset, "player name")?;
        let score: i32 = get_i32(data, &mut offset, "player score")?;
        let seconds: f32 = get_f32(data, &mut offset, "player duration")?;
        players.push(Player {
            name,
            score: Some(score),
            duration: Some(whole_seconds(seconds)),
        });
    }
    Ok(players)
}

/// Serialize players into a complete A2S_PLAYER response datagram.
pub fn encode_players(players: &[Player]) -> Vec<u8> {
    let mut out: Vec<u8> = Vec::with_capacity(6 + players.len() * 16);
    out.extend_from_slice(&PacketHeader::Single.to_le_bytes());
    out.push(PacketType::PlayerResponse.to_byte());
    out.push(players.len().min(u8::MAX as usize) as u8);
    for (index, player) in players.iter().take(u8::MAX as usize).enumerate() {
        out.push(index as u8);
        out.extend_from_slice(player.name.as_bytes());
        out.push(0);
        // writes into a Vec cannot fail
        let _ = out.write_i32::<LittleEndian>(player.score.unwrap_or(0));
        let seconds: f32 = player.duration.map(|d| d.as_secs_f32()).unwrap_or(0.0);
        let _ = out.write_f32::<LittleEndian>(seconds);
    }
    out
}

fn whole_seconds(seconds: f32) -> Duration {
    if seconds.is_finite() && seconds > 0.0 {
        Duration::from_secs(seconds.round() as u64)
    } else {
        Duration::ZERO
    }
}
