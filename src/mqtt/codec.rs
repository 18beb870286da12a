//! # MQTT Wire Primitives
//!
//! Readers and writers for the MQTT encodings shared by every packet:
//! variable-byte integers, length-prefixed UTF-8 strings and the fixed header
//! with its back-patched remaining length.

use crate::error::{CodecError, ProtocolError};

/// Largest value a four byte variable-byte integer can carry.
pub const MAX_REMAINING_LEN: usize = 268_435_455;

/// Reads a variable-byte integer from the buffer, advancing the cursor.
///
/// Returns `Ok(None)` when the buffer ends before the integer does.
pub fn read_variable_byte_integer(
    cursor: &mut usize,
    buf: &[u8],
) -> Result<Option<usize>, CodecError> {
    let mut multiplier = 1;
    let mut value = 0;
    let mut i = 0;
    loop {
        let Some(encoded_byte) = buf.get(*cursor + i) else {
            return Ok(None);
        };
        value += (encoded_byte & 127) as usize * multiplier;
        if (encoded_byte & 128) == 0 {
            break;
        }
        multiplier *= 128;
        i += 1;
        if i >= 4 {
            return Err(ProtocolError::MalformedPacket.into());
        }
    }
    *cursor += i + 1;
    Ok(Some(value))
}

/// Writes a variable-byte integer at the start of `buf`, returning the
/// number of bytes used.
pub fn write_variable_byte_integer(buf: &mut [u8], mut val: usize) -> Result<usize, CodecError> {
    if val > MAX_REMAINING_LEN {
        return Err(ProtocolError::PayloadTooLarge.into());
    }
    let mut i = 0;
    loop {
        let mut encoded_byte = (val % 128) as u8;
        val /= 128;
        if val > 0 {
            encoded_byte |= 128;
        }
        *buf.get_mut(i).ok_or(CodecError::BufferTooSmall)? = encoded_byte;
        i += 1;
        if val == 0 {
            break;
        }
    }
    Ok(i)
}

/// Reads a big-endian `u16`, advancing the cursor.
pub fn read_u16(cursor: &mut usize, buf: &[u8]) -> Result<u16, CodecError> {
    let bytes = buf
        .get(*cursor..*cursor + 2)
        .ok_or(ProtocolError::MalformedPacket)?;
    *cursor += 2;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Writes a big-endian `u16` at the cursor, advancing it.
pub fn write_u16(cursor: &mut usize, buf: &mut [u8], val: u16) -> Result<(), CodecError> {
    buf.get_mut(*cursor..*cursor + 2)
        .ok_or(CodecError::BufferTooSmall)?
        .copy_from_slice(&val.to_be_bytes());
    *cursor += 2;
    Ok(())
}

/// Reads a length-prefixed binary field, advancing the cursor.
pub fn read_binary<'a>(cursor: &mut usize, buf: &'a [u8]) -> Result<&'a [u8], CodecError> {
    let len = read_u16(cursor, buf)? as usize;
    let data = buf
        .get(*cursor..*cursor + len)
        .ok_or(ProtocolError::MalformedPacket)?;
    *cursor += len;
    Ok(data)
}

/// Reads a UTF-8 encoded string (prefixed with a 2-byte length), advancing
/// the cursor.
pub fn read_utf8_string<'a>(cursor: &mut usize, buf: &'a [u8]) -> Result<&'a str, CodecError> {
    let data = read_binary(cursor, buf)?;
    core::str::from_utf8(data).map_err(|_| ProtocolError::InvalidUtf8String.into())
}

/// Writes a length-prefixed binary field at the cursor, advancing it.
pub fn write_binary(cursor: &mut usize, buf: &mut [u8], data: &[u8]) -> Result<(), CodecError> {
    let len = u16::try_from(data.len()).map_err(|_| ProtocolError::PayloadTooLarge)?;
    write_u16(cursor, buf, len)?;
    buf.get_mut(*cursor..*cursor + data.len())
        .ok_or(CodecError::BufferTooSmall)?
        .copy_from_slice(data);
    *cursor += data.len();
    Ok(())
}

/// Writes a UTF-8 encoded string (prefixed with a 2-byte length) at the
/// cursor, advancing it.
pub fn write_utf8_string(cursor: &mut usize, buf: &mut [u8], s: &str) -> Result<(), CodecError> {
    write_binary(cursor, buf, s.as_bytes())
}

/// Copies raw bytes at the cursor, advancing it.
pub fn write_bytes(cursor: &mut usize, buf: &mut [u8], data: &[u8]) -> Result<(), CodecError> {
    buf.get_mut(*cursor..*cursor + data.len())
        .ok_or(CodecError::BufferTooSmall)?
        .copy_from_slice(data);
    *cursor += data.len();
    Ok(())
}

/// Offset where packet content starts while the fixed header is still open:
/// one header byte plus the widest remaining length.
pub const CONTENT_START: usize = 5;

/// Closes a packet whose content was written from [`CONTENT_START`] to
/// `end`: writes the header byte and remaining length, then moves the content
/// up against them. Returns the total packet length.
pub fn finish_packet(buf: &mut [u8], header: u8, end: usize) -> Result<usize, CodecError> {
    let remaining_len = end - CONTENT_START;
    let mut len_bytes = [0u8; 4];
    let len_size = write_variable_byte_integer(&mut len_bytes, remaining_len)?;
    let header_len = 1 + len_size;
    *buf.first_mut().ok_or(CodecError::BufferTooSmall)? = header;
    buf[1..header_len].copy_from_slice(&len_bytes[..len_size]);
    buf.copy_within(CONTENT_START..end, header_len);
    Ok(header_len + remaining_len)
}

/// Length of the complete packet at the start of `buf`, or `None` while
/// more bytes are needed.
pub fn packet_len(buf: &[u8]) -> Result<Option<usize>, CodecError> {
    if buf.is_empty() {
        return Ok(None);
    }
    let mut cursor = 1;
    let Some(remaining_len) = read_variable_byte_integer(&mut cursor, buf)? else {
        return Ok(None);
    };
    let total = cursor + remaining_len;
    Ok((buf.len() >= total).then_some(total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_byte_integer_boundaries() {
        let mut buf = [0u8; 4];
        for (value, encoded) in [
            (0usize, &[0x00][..]),
            (127, &[0x7F]),
            (128, &[0x80, 0x01]),
            (16_383, &[0xFF, 0x7F]),
            (16_384, &[0x80, 0x80, 0x01]),
            (MAX_REMAINING_LEN, &[0xFF, 0xFF, 0xFF, 0x7F]),
        ] {
            let n = write_variable_byte_integer(&mut buf, value).unwrap();
            assert_eq!(&buf[..n], encoded);
            let mut cursor = 0;
            assert_eq!(
                read_variable_byte_integer(&mut cursor, encoded).unwrap(),
                Some(value)
            );
            assert_eq!(cursor, n);
        }
        assert!(write_variable_byte_integer(&mut buf, MAX_REMAINING_LEN + 1).is_err());
    }

    #[test]
    fn test_variable_byte_integer_needs_more() {
        let mut cursor = 0;
        assert_eq!(read_variable_byte_integer(&mut cursor, &[0x80]).unwrap(), None);
        assert_eq!(cursor, 0);
        let mut cursor = 0;
        assert!(read_variable_byte_integer(&mut cursor, &[0xFF, 0xFF, 0xFF, 0xFF, 0x01]).is_err());
    }

    #[test]
    fn test_utf8_string() {
        let mut buf = [0u8; 8];
        let mut cursor = 0;
        write_utf8_string(&mut cursor, &mut buf, "MQTT").unwrap();
        assert_eq!(&buf[..6], &[0, 4, b'M', b'Q', b'T', b'T']);

        let mut cursor = 0;
        assert_eq!(read_utf8_string(&mut cursor, &buf).unwrap(), "MQTT");
        assert_eq!(cursor, 6);

        let mut cursor = 0;
        assert_eq!(
            write_utf8_string(&mut cursor, &mut buf, "too long for this"),
            Err(CodecError::BufferTooSmall)
        );
        let mut cursor = 0;
        assert_eq!(
            read_utf8_string(&mut cursor, &[0, 2, 0xC3, 0x28]),
            Err(CodecError::Protocol(ProtocolError::InvalidUtf8String))
        );
    }

    #[test]
    fn test_packet_len() {
        assert_eq!(packet_len(&[]).unwrap(), None);
        assert_eq!(packet_len(&[0xD0]).unwrap(), None);
        assert_eq!(packet_len(&[0xD0, 0x00]).unwrap(), Some(2));
        assert_eq!(packet_len(&[0x40, 0x02, 0x00]).unwrap(), None);
        assert_eq!(packet_len(&[0x40, 0x02, 0x00, 0x01, 0xFF]).unwrap(), Some(4));
    }
}
