//! Primitive notation of the native protocol.
//!
//! Readers take a `&mut &[u8]` cursor and advance it past what they consume.
//! Every read is bounds-checked; running off the end of the body is a protocol
//! error, never a panic.

use std::collections::{BTreeMap, HashMap};

use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

use crate::protocol::error::{CqlError, Result};

/// A `[value]` as it appears on the wire, before any type is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawValue {
    Null,
    /// Protocol v4 "not set" marker (length -2).
    Unset,
    Bytes(Bytes),
}

fn truncated(what: &str, needed: usize, available: usize) -> CqlError {
    CqlError::protocol(format!(
        "truncated {}: needed {} bytes, {} available",
        what, needed, available
    ))
}

fn take<'a>(buf: &mut &'a [u8], n: usize, what: &str) -> Result<&'a [u8]> {
    if buf.len() < n {
        return Err(truncated(what, n, buf.len()));
    }
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

pub fn read_u8(buf: &mut &[u8]) -> Result<u8> {
    Ok(take(buf, 1, "byte")?[0])
}

pub fn read_short(buf: &mut &[u8]) -> Result<u16> {
    let b = take(buf, 2, "short")?;
    Ok(u16::from_be_bytes([b[0], b[1]]))
}

pub fn read_int(buf: &mut &[u8]) -> Result<i32> {
    let b = take(buf, 4, "int")?;
    Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

pub fn read_long(buf: &mut &[u8]) -> Result<i64> {
    let b = take(buf, 8, "long")?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(b);
    Ok(i64::from_be_bytes(raw))
}

fn utf8(bytes: &[u8], what: &str) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| CqlError::protocol(format!("invalid UTF-8 in {}: {}", what, e)))
}

pub fn read_string(buf: &mut &[u8]) -> Result<String> {
    let len = read_short(buf)? as usize;
    utf8(take(buf, len, "string")?, "string")
}

pub fn read_long_string(buf: &mut &[u8]) -> Result<String> {
    let len = read_int(buf)?;
    if len < 0 {
        return Err(CqlError::protocol(format!(
            "negative long string length {}",
            len
        )));
    }
    utf8(take(buf, len as usize, "long string")?, "long string")
}

/// Reads `[bytes]`; a negative length means null.
pub fn read_bytes<'a>(buf: &mut &'a [u8]) -> Result<Option<&'a [u8]>> {
    let len = read_int(buf)?;
    if len < 0 {
        return Ok(None);
    }
    Ok(Some(take(buf, len as usize, "bytes")?))
}

pub fn read_short_bytes<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8]> {
    let len = read_short(buf)? as usize;
    take(buf, len, "short bytes")
}

pub fn read_value(buf: &mut &[u8]) -> Result<RawValue> {
    let len = read_int(buf)?;
    match len {
        -1 => Ok(RawValue::Null),
        -2 => Ok(RawValue::Unset),
        n if n < 0 => Err(CqlError::protocol(format!("invalid value length {}", n))),
        n => Ok(RawValue::Bytes(Bytes::copy_from_slice(take(
            buf,
            n as usize,
            "value",
        )?))),
    }
}

pub fn read_string_list(buf: &mut &[u8]) -> Result<Vec<String>> {
    let n = read_short(buf)?;
    (0..n).map(|_| read_string(buf)).collect()
}

pub fn read_string_map(buf: &mut &[u8]) -> Result<BTreeMap<String, String>> {
    let n = read_short(buf)?;
    let mut map = BTreeMap::new();
    for _ in 0..n {
        let key = read_string(buf)?;
        let value = read_string(buf)?;
        map.insert(key, value);
    }
    Ok(map)
}

pub fn read_string_multimap(buf: &mut &[u8]) -> Result<BTreeMap<String, Vec<String>>> {
    let n = read_short(buf)?;
    let mut map = BTreeMap::new();
    for _ in 0..n {
        let key = read_string(buf)?;
        let values = read_string_list(buf)?;
        map.insert(key, values);
    }
    Ok(map)
}

/// Reads a `[bytes map]`; only used to skip custom payloads.
pub fn read_bytes_map(buf: &mut &[u8]) -> Result<HashMap<String, Option<Bytes>>> {
    let n = read_short(buf)?;
    let mut map = HashMap::with_capacity(n as usize);
    for _ in 0..n {
        let key = read_string(buf)?;
        let value = read_bytes(buf)?.map(Bytes::copy_from_slice);
        map.insert(key, value);
    }
    Ok(map)
}

pub fn read_uuid(buf: &mut &[u8]) -> Result<Uuid> {
    let b = take(buf, 16, "uuid")?;
    Uuid::from_slice(b).map_err(|e| CqlError::protocol(format!("invalid uuid: {}", e)))
}

pub fn write_short(buf: &mut BytesMut, value: u16) {
    buf.put_u16(value);
}

pub fn write_int(buf: &mut BytesMut, value: i32) {
    buf.put_i32(value);
}

fn short_len(len: usize, what: &str) -> Result<u16> {
    u16::try_from(len).map_err(|_| {
        CqlError::InvalidRequest(format!("{} too long: {} bytes", what, len))
    })
}

fn int_len(len: usize, what: &str) -> Result<i32> {
    i32::try_from(len).map_err(|_| {
        CqlError::InvalidRequest(format!("{} too long: {} bytes", what, len))
    })
}

pub fn write_string(buf: &mut BytesMut, value: &str) -> Result<()> {
    buf.put_u16(short_len(value.len(), "string")?);
    buf.extend_from_slice(value.as_bytes());
    Ok(())
}

pub fn write_long_string(buf: &mut BytesMut, value: &str) -> Result<()> {
    buf.put_i32(int_len(value.len(), "long string")?);
    buf.extend_from_slice(value.as_bytes());
    Ok(())
}

pub fn write_bytes(buf: &mut BytesMut, value: Option<&[u8]>) -> Result<()> {
    match value {
        Some(bytes) => {
            buf.put_i32(int_len(bytes.len(), "bytes")?);
            buf.extend_from_slice(bytes);
        }
        None => buf.put_i32(-1),
    }
    Ok(())
}

pub fn write_short_bytes(buf: &mut BytesMut, value: &[u8]) -> Result<()> {
    buf.put_u16(short_len(value.len(), "short bytes")?);
    buf.extend_from_slice(value);
    Ok(())
}

pub fn write_value(buf: &mut BytesMut, value: &RawValue) -> Result<()> {
    match value {
        RawValue::Null => buf.put_i32(-1),
        RawValue::Unset => buf.put_i32(-2),
        RawValue::Bytes(bytes) => write_bytes(buf, Some(bytes))?,
    }
    Ok(())
}

pub fn write_string_list(buf: &mut BytesMut, values: &[String]) -> Result<()> {
    buf.put_u16(short_len(values.len(), "string list")?);
    for value in values {
        write_string(buf, value)?;
    }
    Ok(())
}

pub fn write_string_map(buf: &mut BytesMut, map: &BTreeMap<String, String>) -> Result<()> {
    buf.put_u16(short_len(map.len(), "string map")?);
    for (key, value) in map {
        write_string(buf, key)?;
        write_string(buf, value)?;
    }
    Ok(())
}

pub fn write_string_multimap(
    buf: &mut BytesMut,
    map: &BTreeMap<String, Vec<String>>,
) -> Result<()> {
    buf.put_u16(short_len(map.len(), "string multimap")?);
    for (key, values) in map {
        write_string(buf, key)?;
        write_string_list(buf, values)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_advances() {
        let data = [0x00, 0x02, b'h', b'i', 0x00, 0x00, 0x00, 0x2A];
        let mut cursor = &data[..];
        assert_eq!(read_string(&mut cursor).unwrap(), "hi");
        assert_eq!(read_int(&mut cursor).unwrap(), 42);
        assert!(cursor.is_empty());
    }

    #[test]
    fn test_truncated_reads_fail() {
        let data = [0x00, 0x05, b'h', b'i'];
        let mut cursor = &data[..];
        assert!(matches!(read_string(&mut cursor), Err(CqlError::Protocol(_))));

        let mut cursor = &[0x00, 0x00][..];
        assert!(read_int(&mut cursor).is_err());
    }

    #[test]
    fn test_value_markers() {
        let mut buf = BytesMut::new();
        write_value(&mut buf, &RawValue::Null).unwrap();
        write_value(&mut buf, &RawValue::Unset).unwrap();
        write_value(&mut buf, &RawValue::Bytes(Bytes::new())).unwrap();
        let mut cursor = &buf[..];
        assert_eq!(read_value(&mut cursor).unwrap(), RawValue::Null);
        assert_eq!(read_value(&mut cursor).unwrap(), RawValue::Unset);
        assert_eq!(read_value(&mut cursor).unwrap(), RawValue::Bytes(Bytes::new()));
        assert!(cursor.is_empty());
    }

    #[test]
    fn test_invalid_value_length() {
        let mut cursor = &(-3i32).to_be_bytes()[..];
        assert!(read_value(&mut cursor).is_err());
    }

    #[test]
    fn test_string_multimap() {
        let mut map = BTreeMap::new();
        map.insert("CQL_VERSION".to_string(), vec!["3.0.0".to_string()]);
        map.insert(
            "COMPRESSION".to_string(),
            vec!["lz4".to_string(), "snappy".to_string()],
        );
        let mut buf = BytesMut::new();
        write_string_multimap(&mut buf, &map).unwrap();
        let mut cursor = &buf[..];
        assert_eq!(read_string_multimap(&mut cursor).unwrap(), map);
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let data = [0x00, 0x02, 0xC3, 0x28];
        let mut cursor = &data[..];
        assert!(read_string(&mut cursor).is_err());
    }
}
