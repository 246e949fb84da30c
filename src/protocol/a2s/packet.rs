use byteorder::{LittleEndian, WriteBytesExt};

use crate::error::QueryError;
use crate::parse::{get_i32, get_u32, get_u8};

/// Payload of every A2S_INFO request.
pub const INFO_PAYLOAD: &str = "Source Engine Query";

/// Challenge sent with the first A2S_PLAYER request to ask for a real one.
pub const NO_CHALLENGE: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketHeader {
    Single,
    Split,
}

/// Convert an i32 into a [PacketHeader].
impl TryFrom<i32> for PacketHeader {
    type Error = QueryError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(PacketHeader::Single),
            -2 => Ok(PacketHeader::Split),
            n => Err(QueryError::UnknownPacketHeader(n)),
        }
    }
}

impl PacketHeader {
    pub fn to_le_bytes(self) -> [u8; 4] {
        let value: i32 = match self {
            PacketHeader::Single => -1,
            PacketHeader::Split => -2,
        };
        value.to_le_bytes()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// A2S_INFO request -- https://developer.valvesoftware.com/wiki/Server_queries#A2S_INFO
    InfoRequest,
    /// A2S_PLAYER request
    PlayerRequest,
    /// S2C_CHALLENGE
    ///
    /// The server may reply with a challenge ('A' or 0x41). In that case the
    /// client repeats the request with the challenge number appended.
    Challenge,
    /// A2S_INFO response, parsed by [super::info::A2sInfo::parse]
    InfoResponse,
    /// A2S_PLAYER response, parsed by [super::players::parse_players]
    PlayerResponse,
}

/// Convert a u8 into a [PacketType].
impl TryFrom<u8> for PacketType {
    type Error = QueryError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x54 => Ok(PacketType::InfoRequest),
            0x55 => Ok(PacketType::PlayerRequest),
            0x41 => Ok(PacketType::Challenge),
            0x49 => Ok(PacketType::InfoResponse),
            0x44 => Ok(PacketType::PlayerResponse),
            n => Err(QueryError::UnknownPacketType(n)),
        }
    }
}

impl PacketType {
    pub fn to_byte(self) -> u8 {
        match self {
            PacketType::InfoRequest => 0x54,
            PacketType::PlayerRequest => 0x55,
            PacketType::Challenge => 0x41,
            PacketType::InfoResponse => 0x49,
            PacketType::PlayerResponse => 0x44,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPacket {
    packet_type: PacketType,
    challenge: Option<u32>,
}

impl RequestPacket {
    /// A2S_INFO, optionally answering a challenge.
    pub fn info(challenge: Option<u32>) -> Self {
        RequestPacket {
            packet_type: PacketType::InfoRequest,
            challenge,
        }
    }

    /// A2S_PLAYER; pass [NO_CHALLENGE] on the first attempt.
    pub fn players(challenge: u32) -> Self {
        RequestPacket {
            packet_type: PacketType::PlayerRequest,
            challenge: Some(challenge),
        }
    }

    /// Same request, carrying `challenge`.
    pub fn with_challenge(&self, challenge: u32) -> Self {
        RequestPacket {
            packet_type: self.packet_type,
            challenge: Some(challenge),
        }
    }

    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    /// Serializes a request packet into an array of bytes.
    pub fn pack(&self) -> Vec<u8> {
        // header, type, body (info only), challenge
        let mut payload: Vec<u8> = Vec::with_capacity(29);
        payload.extend_from_slice(&PacketHeader::Single.to_le_bytes());
        payload.push(self.packet_type.to_byte());
        if self.packet_type == PacketType::InfoRequest {
            payload.extend_from_slice(INFO_PAYLOAD.as_bytes());
            payload.push(0);
        }
        if let Some(challenge) = self.challenge {
            // writing into a Vec cannot fail
            let _ = payload.write_u32::<LittleEndian>(challenge);
        }
        payload
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePacket {
    packet_type: PacketType,
    body: Vec<u8>,
}

impl ResponsePacket {
    /// Deserializes an incoming datagram, splitting it into type and body.
    pub fn unpack(incoming: &[u8]) -> Result<Self, QueryError> {
        let mut offset: usize = 0;
        let header: PacketHeader = get_i32(incoming, &mut offset, "packet header")?.try_into()?;
        if header == PacketHeader::Split {
            return Err(QueryError::SplitPacket);
        }

        let packet_type: PacketType = get_u8(incoming, &mut offset, "packet type")?.try_into()?;
        Ok(ResponsePacket {
            packet_type,
            body: incoming[offset..].to_vec(),
        })
    }

    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The challenge number carried by an S2C_CHALLENGE packet.
    pub fn challenge(&self) -> Result<u32, QueryError> {
        get_u32(&self.body, &mut 0, "challenge")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_request_is_bit_exact() {
        let mut expected = vec![0xFF, 0xFF, 0xFF, 0xFF, 0x54];
        expected.extend_from_slice(b"Source Engine Query\0");
        assert_eq!(RequestPacket::info(None).pack(), expected);

        expected.extend_from_slice(&[0x78, 0x56, 0x34, 0x12]);
        assert_eq!(RequestPacket::info(Some(0x1234_5678)).pack(), expected);
    }

    #[test]
    fn player_request_is_bit_exact() {
        assert_eq!(
            RequestPacket::players(NO_CHALLENGE).pack(),
            vec![0xFF, 0xFF, 0xFF, 0xFF, 0x55, 0xFF, 0xFF, 0xFF, 0xFF]
        );
        assert_eq!(
            RequestPacket::players(NO_CHALLENGE).with_challenge(7).pack(),
            vec![0xFF, 0xFF, 0xFF, 0xFF, 0x55, 7, 0, 0, 0]
        );
    }

    #[test]
    fn unpacks_challenge() {
        let packet = ResponsePacket::unpack(&[0xFF, 0xFF, 0xFF, 0xFF, 0x41, 1, 2, 3, 4]).unwrap();
        assert_eq!(packet.packet_type(), PacketType::Challenge);
        assert_eq!(packet.challenge().unwrap(), 0x0403_0201);
    }

    #[test]
    fn rejects_unknown_and_split_packets() {
        assert!(matches!(
            ResponsePacket::unpack(&[0xFF, 0xFF, 0xFF, 0xFF, 0x6A]),
            Err(QueryError::UnknownPacketType(0x6A))
        ));
        assert!(matches!(
            ResponsePacket::unpack(&[0xFE, 0xFF, 0xFF, 0xFF, 0x49]),
            Err(QueryError::SplitPacket)
        ));
        assert!(matches!(
            ResponsePacket::unpack(&[0x00, 0x00, 0x00, 0x00, 0x49]),
            Err(QueryError::UnknownPacketHeader(0))
        ));
        assert!(ResponsePacket::unpack(&[0xFF, 0xFF]).is_err());
    }

    #[test]
    fn short_challenge_is_an_error() {
        let packet = ResponsePacket::unpack(&[0xFF, 0xFF, 0xFF, 0xFF, 0x41, 1, 2]).unwrap();
        assert!(matches!(packet.challenge(), Err(QueryError::Truncated("challenge"))));
    }
}
