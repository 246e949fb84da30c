use byteorder::{ByteOrder, LittleEndian};

use crate::error::QueryError;

/// Borrow `len` bytes at `offset`, advancing `offset` past them.
fn take<'a>(
    data: &'a [u8],
    offset: &mut usize,
    len: usize,
    field: &'static str,
) -> Result<&'a [u8], QueryError> {
    let end: usize = offset
        .checked_add(len)
        .ok_or(QueryError::Truncated(field))?;
    let bytes: &[u8] = data.get(*offset..end).ok_or(QueryError::Truncated(field))?;
    *offset = end;
    Ok(bytes)
}

/// Get the value of a null-terminated string
/// with index 0 at `offset` in an array of bytes.
///
/// Mutates `offset` to the index after the null-termination byte.
/// A string without a terminator is a truncated packet.
pub fn get_string(data: &[u8], offset: &mut usize, field: &'static str) -> Result<String, QueryError> {
    let rest: &[u8] = data.get(*offset..).ok_or(QueryError::Truncated(field))?;
    let len: usize = rest
        .iter()
        .position(|c| *c == 0)
        .ok_or(QueryError::Truncated(field))?;
    let value: String = String::from_utf8_lossy(&rest[..len]).into_owned();
    *offset += len + 1;
    Ok(value)
}

/// Get the [u8] at index `offset` from `data`.
///
/// Mutates `offset` to the index after the byte.
pub fn get_u8(data: &[u8], offset: &mut usize, field: &'static str) -> Result<u8, QueryError> {
    Ok(take(data, offset, 1, field)?[0])
}

/// Get 2 little-endian bytes (as a [u16]) at index `offset` from `data`.
pub fn get_u16(data: &[u8], offset: &mut usize, field: &'static str) -> Result<u16, QueryError> {
    Ok(LittleEndian::read_u16(take(data, offset, 2, field)?))
}

/// Get 4 little-endian bytes (as a [u32]) at index `offset` from `data`.
pub fn get_u32(data: &[u8], offset: &mut usize, field: &'static str) -> Result<u32, QueryError> {
    Ok(LittleEndian::read_u32(take(data, offset, 4, field)?))
}

/// Get 4 little-endian bytes (as an [i32]) at index `offset` from `data`.
pub fn get_i32(data: &[u8], offset: &mut usize, field: &'static str) -> Result<i32, QueryError> {
    Ok(LittleEndian::read_i32(take(data, offset, 4, field)?))
}

/// Get 4 little-endian bytes (as an [f32]) at index `offset` from `data`.
pub fn get_f32(data: &[u8], offset: &mut usize, field: &'static str) -> Result<f32, QueryError> {
    Ok(LittleEndian::read_f32(take(data, offset, 4, field)?))
}

/// Get 8 little-endian bytes (as a [u64]) at index `offset` from `data`.
pub fn get_u64(data: &[u8], offset: &mut usize, field: &'static str) -> Result<u64, QueryError> {
    Ok(LittleEndian::read_u64(take(data, offset, 8, field)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_strings_and_advances() {
        let data = b"de_dust2\0cstrike\0";
        let mut offset = 0;
        assert_eq!(get_string(data, &mut offset, "map").unwrap(), "de_dust2");
        assert_eq!(offset, 9);
        assert_eq!(get_string(data, &mut offset, "folder").unwrap(), "cstrike");
        assert_eq!(offset, data.len());
    }

    #[test]
    fn unterminated_string_is_truncated() {
        let mut offset = 0;
        let err = get_string(b"abc", &mut offset, "name").unwrap_err();
        assert!(matches!(err, QueryError::Truncated("name")));
        assert_eq!(offset, 0);
    }

    #[test]
    fn integers_are_little_endian() {
        let data = [0xDA, 0x02, 0x78, 0x56, 0x34, 0x12];
        let mut offset = 0;
        assert_eq!(get_u16(&data, &mut offset, "app id").unwrap(), 730);
        assert_eq!(get_u32(&data, &mut offset, "challenge").unwrap(), 0x1234_5678);
    }

    #[test]
    fn short_reads_fail_without_moving() {
        let data = [0x01, 0x02, 0x03];
        let mut offset = 1;
        assert!(get_u32(&data, &mut offset, "score").is_err());
        assert!(get_u64(&data, &mut offset, "steam id").is_err());
        assert_eq!(offset, 1);
        assert!(get_u8(&data, &mut 3, "bots").is_err());
        assert!(get_string(&data, &mut 7, "name").is_err());
    }
}
