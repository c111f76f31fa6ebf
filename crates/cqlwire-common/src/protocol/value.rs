//! Column types and cell values.

use std::fmt;
use std::net::IpAddr;

use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

use crate::protocol::error::{CqlError, Result};
use crate::protocol::types::{
    read_bytes, read_int, read_short, read_string, write_bytes, write_string, RawValue,
};

/// Nested collection/tuple/UDT types deeper than this are rejected.
const MAX_TYPE_DEPTH: usize = 32;

/// Type of a result column, as described by the `[option]` in rows metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    Custom(String),
    Ascii,
    Bigint,
    Blob,
    Boolean,
    Counter,
    Decimal,
    Double,
    Float,
    Int,
    Timestamp,
    Uuid,
    Text,
    Varint,
    Timeuuid,
    Inet,
    Date,
    Time,
    Smallint,
    Tinyint,
    List(Box<ColumnType>),
    Map(Box<ColumnType>, Box<ColumnType>),
    Set(Box<ColumnType>),
    Udt {
        keyspace: String,
        name: String,
        fields: Vec<(String, ColumnType)>,
    },
    Tuple(Vec<ColumnType>),
}

impl ColumnType {
    pub fn read(buf: &mut &[u8]) -> Result<Self> {
        Self::read_nested(buf, 0)
    }

    fn read_nested(buf: &mut &[u8], depth: usize) -> Result<Self> {
        if depth > MAX_TYPE_DEPTH {
            return Err(CqlError::protocol("column type nested too deeply"));
        }
        let id = read_short(buf)?;
        let next = depth + 1;
        Ok(match id {
            0x0000 => ColumnType::Custom(read_string(buf)?),
            0x0001 => ColumnType::Ascii,
            0x0002 => ColumnType::Bigint,
            0x0003 => ColumnType::Blob,
            0x0004 => ColumnType::Boolean,
            0x0005 => ColumnType::Counter,
            0x0006 => ColumnType::Decimal,
            0x0007 => ColumnType::Double,
            0x0008 => ColumnType::Float,
            0x0009 => ColumnType::Int,
            0x000B => ColumnType::Timestamp,
            0x000C => ColumnType::Uuid,
            0x000D => ColumnType::Text,
            0x000E => ColumnType::Varint,
            0x000F => ColumnType::Timeuuid,
            0x0010 => ColumnType::Inet,
            0x0011 => ColumnType::Date,
            0x0012 => ColumnType::Time,
            0x0013 => ColumnType::Smallint,
            0x0014 => ColumnType::Tinyint,
            0x0020 => ColumnType::List(Box::new(Self::read_nested(buf, next)?)),
            0x0021 => {
                let key = Self::read_nested(buf, next)?;
                let value = Self::read_nested(buf, next)?;
                ColumnType::Map(Box::new(key), Box::new(value))
            }
            0x0022 => ColumnType::Set(Box::new(Self::read_nested(buf, next)?)),
            0x0030 => {
                let keyspace = read_string(buf)?;
                let name = read_string(buf)?;
                let n = read_short(buf)?;
                let mut fields = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    let field = read_string(buf)?;
                    fields.push((field, Self::read_nested(buf, next)?));
                }
                ColumnType::Udt {
                    keyspace,
                    name,
                    fields,
                }
            }
            0x0031 => {
                let n = read_short(buf)?;
                let mut types = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    types.push(Self::read_nested(buf, next)?);
                }
                ColumnType::Tuple(types)
            }
            other => {
                return Err(CqlError::protocol(format!(
                    "unknown column type id 0x{:04X}",
                    other
                )))
            }
        })
    }

    pub fn write(&self, buf: &mut BytesMut) -> Result<()> {
        let id: u16 = match self {
            ColumnType::Custom(class) => {
                buf.put_u16(0x0000);
                return write_string(buf, class);
            }
            ColumnType::Ascii => 0x0001,
            ColumnType::Bigint => 0x0002,
            ColumnType::Blob => 0x0003,
            ColumnType::Boolean => 0x0004,
            ColumnType::Counter => 0x0005,
            ColumnType::Decimal => 0x0006,
            ColumnType::Double => 0x0007,
            ColumnType::Float => 0x0008,
            ColumnType::Int => 0x0009,
            ColumnType::Timestamp => 0x000B,
            ColumnType::Uuid => 0x000C,
            ColumnType::Text => 0x000D,
            ColumnType::Varint => 0x000E,
            ColumnType::Timeuuid => 0x000F,
            ColumnType::Inet => 0x0010,
            ColumnType::Date => 0x0011,
            ColumnType::Time => 0x0012,
            ColumnType::Smallint => 0x0013,
            ColumnType::Tinyint => 0x0014,
            ColumnType::List(elem) => {
                buf.put_u16(0x0020);
                return elem.write(buf);
            }
            ColumnType::Map(key, value) => {
                buf.put_u16(0x0021);
                key.write(buf)?;
                return value.write(buf);
            }
            ColumnType::Set(elem) => {
                buf.put_u16(0x0022);
                return elem.write(buf);
            }
            ColumnType::Udt {
                keyspace,
                name,
                fields,
            } => {
                buf.put_u16(0x0030);
                write_string(buf, keyspace)?;
                write_string(buf, name)?;
                buf.put_u16(fields.len() as u16);
                for (field, typ) in fields {
                    write_string(buf, field)?;
                    typ.write(buf)?;
                }
                return Ok(());
            }
            ColumnType::Tuple(types) => {
                buf.put_u16(0x0031);
                buf.put_u16(types.len() as u16);
                for typ in types {
                    typ.write(buf)?;
                }
                return Ok(());
            }
        };
        buf.put_u16(id);
        Ok(())
    }

    /// Types whose zero-length encoding is a legitimate value rather than "empty".
    fn allows_zero_length(&self) -> bool {
        matches!(
            self,
            ColumnType::Ascii | ColumnType::Text | ColumnType::Blob | ColumnType::Custom(_)
        )
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Custom(class) => write!(f, "'{}'", class),
            ColumnType::Ascii => write!(f, "ascii"),
            ColumnType::Bigint => write!(f, "bigint"),
            ColumnType::Blob => write!(f, "blob"),
            ColumnType::Boolean => write!(f, "boolean"),
            ColumnType::Counter => write!(f, "counter"),
            ColumnType::Decimal => write!(f, "decimal"),
            ColumnType::Double => write!(f, "double"),
            ColumnType::Float => write!(f, "float"),
            ColumnType::Int => write!(f, "int"),
            ColumnType::Timestamp => write!(f, "timestamp"),
            ColumnType::Uuid => write!(f, "uuid"),
            ColumnType::Text => write!(f, "text"),
            ColumnType::Varint => write!(f, "varint"),
            ColumnType::Timeuuid => write!(f, "timeuuid"),
            ColumnType::Inet => write!(f, "inet"),
            ColumnType::Date => write!(f, "date"),
            ColumnType::Time => write!(f, "time"),
            ColumnType::Smallint => write!(f, "smallint"),
            ColumnType::Tinyint => write!(f, "tinyint"),
            ColumnType::List(elem) => write!(f, "list<{}>", elem),
            ColumnType::Map(key, value) => write!(f, "map<{}, {}>", key, value),
            ColumnType::Set(elem) => write!(f, "set<{}>", elem),
            ColumnType::Udt { keyspace, name, .. } => write!(f, "{}.{}", keyspace, name),
            ColumnType::Tuple(types) => {
                write!(f, "tuple<")?;
                for (i, typ) in types.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", typ)?;
                }
                write!(f, ">")
            }
        }
    }
}

/// A decoded, non-null cell.
///
/// Null cells never become a `CqlValue`; rows carry them as `None`. A
/// zero-length cell of a type that has no empty form decodes to
/// [`CqlValue::Empty`].
#[derive(Debug, Clone, PartialEq)]
pub enum CqlValue {
    Ascii(String),
    Bigint(i64),
    Blob(Bytes),
    Boolean(bool),
    Counter(i64),
    Decimal { scale: i32, unscaled: Bytes },
    Double(f64),
    Float(f32),
    Int(i32),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
    Uuid(Uuid),
    Text(String),
    /// Big-endian two's complement.
    Varint(Bytes),
    Timeuuid(Uuid),
    Inet(IpAddr),
    /// Days since the Unix epoch, centered at 2^31.
    Date(u32),
    /// Nanoseconds since midnight.
    Time(i64),
    Smallint(i16),
    Tinyint(i8),
    List(Vec<CqlValue>),
    Set(Vec<CqlValue>),
    Map(Vec<(CqlValue, CqlValue)>),
    Tuple(Vec<Option<CqlValue>>),
    Udt {
        keyspace: String,
        name: String,
        fields: Vec<(String, Option<CqlValue>)>,
    },
    Custom(Bytes),
    Empty,
}

fn malformed(typ: &ColumnType, reason: impl fmt::Display) -> CqlError {
    CqlError::protocol(format!("malformed {} value: {}", typ, reason))
}

fn fixed<const N: usize>(typ: &ColumnType, bytes: &[u8]) -> Result<[u8; N]> {
    <[u8; N]>::try_from(bytes)
        .map_err(|_| malformed(typ, format!("expected {} bytes, got {}", N, bytes.len())))
}

fn utf8(typ: &ColumnType, bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|e| malformed(typ, e))
}

fn read_count(typ: &ColumnType, buf: &mut &[u8]) -> Result<usize> {
    let n = read_int(buf)?;
    usize::try_from(n).map_err(|_| malformed(typ, format!("negative element count {}", n)))
}

impl CqlValue {
    /// Decodes the content of a non-null cell of the given type.
    pub fn deserialize(typ: &ColumnType, bytes: &[u8]) -> Result<CqlValue> {
        if bytes.is_empty() && !typ.allows_zero_length() {
            return Ok(CqlValue::Empty);
        }

        Ok(match typ {
            ColumnType::Custom(_) => CqlValue::Custom(Bytes::copy_from_slice(bytes)),
            ColumnType::Ascii => {
                if !bytes.is_ascii() {
                    return Err(malformed(typ, "non-ASCII byte"));
                }
                CqlValue::Ascii(utf8(typ, bytes)?)
            }
            ColumnType::Text => CqlValue::Text(utf8(typ, bytes)?),
            ColumnType::Blob => CqlValue::Blob(Bytes::copy_from_slice(bytes)),
            ColumnType::Bigint => CqlValue::Bigint(i64::from_be_bytes(fixed(typ, bytes)?)),
            ColumnType::Counter => CqlValue::Counter(i64::from_be_bytes(fixed(typ, bytes)?)),
            ColumnType::Timestamp => {
                CqlValue::Timestamp(i64::from_be_bytes(fixed(typ, bytes)?))
            }
            ColumnType::Time => CqlValue::Time(i64::from_be_bytes(fixed(typ, bytes)?)),
            ColumnType::Boolean => CqlValue::Boolean(fixed::<1>(typ, bytes)?[0] != 0),
            ColumnType::Double => CqlValue::Double(f64::from_be_bytes(fixed(typ, bytes)?)),
            ColumnType::Float => CqlValue::Float(f32::from_be_bytes(fixed(typ, bytes)?)),
            ColumnType::Int => CqlValue::Int(i32::from_be_bytes(fixed(typ, bytes)?)),
            ColumnType::Date => CqlValue::Date(u32::from_be_bytes(fixed(typ, bytes)?)),
            ColumnType::Smallint => CqlValue::Smallint(i16::from_be_bytes(fixed(typ, bytes)?)),
            ColumnType::Tinyint => CqlValue::Tinyint(i8::from_be_bytes(fixed(typ, bytes)?)),
            ColumnType::Uuid => CqlValue::Uuid(Uuid::from_bytes(fixed(typ, bytes)?)),
            ColumnType::Timeuuid => CqlValue::Timeuuid(Uuid::from_bytes(fixed(typ, bytes)?)),
            ColumnType::Varint => CqlValue::Varint(Bytes::copy_from_slice(bytes)),
            ColumnType::Decimal => {
                let mut cursor = bytes;
                let scale = read_int(&mut cursor)?;
                CqlValue::Decimal {
                    scale,
                    unscaled: Bytes::copy_from_slice(cursor),
                }
            }
            ColumnType::Inet => match bytes.len() {
                4 => CqlValue::Inet(IpAddr::from(fixed::<4>(typ, bytes)?)),
                16 => CqlValue::Inet(IpAddr::from(fixed::<16>(typ, bytes)?)),
                n => return Err(malformed(typ, format!("address of {} bytes", n))),
            },
            ColumnType::List(elem) | ColumnType::Set(elem) => {
                let mut cursor = bytes;
                let n = read_count(typ, &mut cursor)?;
                let mut items = Vec::with_capacity(n.min(cursor.len()));
                for _ in 0..n {
                    items.push(Self::collection_element(typ, elem, &mut cursor)?);
                }
                Self::ensure_consumed(typ, cursor)?;
                if matches!(typ, ColumnType::List(_)) {
                    CqlValue::List(items)
                } else {
                    CqlValue::Set(items)
                }
            }
            ColumnType::Map(key_type, value_type) => {
                let mut cursor = bytes;
                let n = read_count(typ, &mut cursor)?;
                let mut entries = Vec::with_capacity(n.min(cursor.len()));
                for _ in 0..n {
                    let key = Self::collection_element(typ, key_type, &mut cursor)?;
                    let value = Self::collection_element(typ, value_type, &mut cursor)?;
                    entries.push((key, value));
                }
                Self::ensure_consumed(typ, cursor)?;
                CqlValue::Map(entries)
            }
            ColumnType::Tuple(types) => {
                let mut cursor = bytes;
                let mut items = Vec::with_capacity(types.len());
                for elem in types {
                    items.push(Self::nullable_element(elem, &mut cursor)?);
                }
                Self::ensure_consumed(typ, cursor)?;
                CqlValue::Tuple(items)
            }
            ColumnType::Udt {
                keyspace,
                name,
                fields,
            } => {
                let mut cursor = bytes;
                let mut values = Vec::with_capacity(fields.len());
                for (field, field_type) in fields {
                    // Fields added to the type after the value was written are absent.
                    let value = if cursor.is_empty() {
                        None
                    } else {
                        Self::nullable_element(field_type, &mut cursor)?
                    };
                    values.push((field.clone(), value));
                }
                Self::ensure_consumed(typ, cursor)?;
                CqlValue::Udt {
                    keyspace: keyspace.clone(),
                    name: name.clone(),
                    fields: values,
                }
            }
        })
    }

    fn collection_element(
        typ: &ColumnType,
        elem: &ColumnType,
        cursor: &mut &[u8],
    ) -> Result<CqlValue> {
        match read_bytes(cursor)? {
            Some(bytes) => Self::deserialize(elem, bytes),
            None => Err(malformed(typ, "null collection element")),
        }
    }

    fn nullable_element(elem: &ColumnType, cursor: &mut &[u8]) -> Result<Option<CqlValue>> {
        read_bytes(cursor)?
            .map(|bytes| Self::deserialize(elem, bytes))
            .transpose()
    }

    fn ensure_consumed(typ: &ColumnType, rest: &[u8]) -> Result<()> {
        if rest.is_empty() {
            Ok(())
        } else {
            Err(malformed(typ, format!("{} trailing bytes", rest.len())))
        }
    }

    /// Encodes the cell content (without the `[bytes]` length prefix).
    pub fn serialize(&self, buf: &mut BytesMut) -> Result<()> {
        match self {
            CqlValue::Ascii(s) | CqlValue::Text(s) => buf.extend_from_slice(s.as_bytes()),
            CqlValue::Blob(b) | CqlValue::Varint(b) | CqlValue::Custom(b) => {
                buf.extend_from_slice(b)
            }
            CqlValue::Bigint(v) | CqlValue::Counter(v) | CqlValue::Timestamp(v) => {
                buf.put_i64(*v)
            }
            CqlValue::Time(v) => buf.put_i64(*v),
            CqlValue::Boolean(v) => buf.put_u8(u8::from(*v)),
            CqlValue::Decimal { scale, unscaled } => {
                buf.put_i32(*scale);
                buf.extend_from_slice(unscaled);
            }
            CqlValue::Double(v) => buf.put_f64(*v),
            CqlValue::Float(v) => buf.put_f32(*v),
            CqlValue::Int(v) => buf.put_i32(*v),
            CqlValue::Uuid(v) | CqlValue::Timeuuid(v) => buf.extend_from_slice(v.as_bytes()),
            CqlValue::Inet(IpAddr::V4(addr)) => buf.extend_from_slice(&addr.octets()),
            CqlValue::Inet(IpAddr::V6(addr)) => buf.extend_from_slice(&addr.octets()),
            CqlValue::Date(v) => buf.put_u32(*v),
            CqlValue::Smallint(v) => buf.put_i16(*v),
            CqlValue::Tinyint(v) => buf.put_i8(*v),
            CqlValue::List(items) | CqlValue::Set(items) => {
                buf.put_i32(element_count(items.len())?);
                for item in items {
                    write_bytes(buf, Some(&item.to_bytes()?))?;
                }
            }
            CqlValue::Map(entries) => {
                buf.put_i32(element_count(entries.len())?);
                for (key, value) in entries {
                    write_bytes(buf, Some(&key.to_bytes()?))?;
                    write_bytes(buf, Some(&value.to_bytes()?))?;
                }
            }
            CqlValue::Tuple(items) => {
                for item in items {
                    write_nullable(buf, item.as_ref())?;
                }
            }
            CqlValue::Udt { fields, .. } => {
                for (_, value) in fields {
                    write_nullable(buf, value.as_ref())?;
                }
            }
            CqlValue::Empty => {}
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        self.serialize(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Short CQL name of the value's type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            CqlValue::Ascii(_) => "ascii",
            CqlValue::Bigint(_) => "bigint",
            CqlValue::Blob(_) => "blob",
            CqlValue::Boolean(_) => "boolean",
            CqlValue::Counter(_) => "counter",
            CqlValue::Decimal { .. } => "decimal",
            CqlValue::Double(_) => "double",
            CqlValue::Float(_) => "float",
            CqlValue::Int(_) => "int",
            CqlValue::Timestamp(_) => "timestamp",
            CqlValue::Uuid(_) => "uuid",
            CqlValue::Text(_) => "text",
            CqlValue::Varint(_) => "varint",
            CqlValue::Timeuuid(_) => "timeuuid",
            CqlValue::Inet(_) => "inet",
            CqlValue::Date(_) => "date",
            CqlValue::Time(_) => "time",
            CqlValue::Smallint(_) => "smallint",
            CqlValue::Tinyint(_) => "tinyint",
            CqlValue::List(_) => "list",
            CqlValue::Set(_) => "set",
            CqlValue::Map(_) => "map",
            CqlValue::Tuple(_) => "tuple",
            CqlValue::Udt { .. } => "udt",
            CqlValue::Custom(_) => "custom",
            CqlValue::Empty => "empty",
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CqlValue::Ascii(s) | CqlValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

fn element_count(len: usize) -> Result<i32> {
    i32::try_from(len)
        .map_err(|_| CqlError::InvalidRequest(format!("collection too large: {} elements", len)))
}

fn write_nullable(buf: &mut BytesMut, value: Option<&CqlValue>) -> Result<()> {
    match value {
        Some(value) => write_bytes(buf, Some(&value.to_bytes()?)),
        None => write_bytes(buf, None),
    }
}

macro_rules! cql_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for CqlValue {
                fn from(value: $ty) -> Self {
                    CqlValue::$variant(value.into())
                }
            }
        )*
    };
}

cql_value_from! {
    bool => Boolean,
    i8 => Tinyint,
    i16 => Smallint,
    i32 => Int,
    i64 => Bigint,
    f32 => Float,
    f64 => Double,
    String => Text,
    &str => Text,
    Uuid => Uuid,
    IpAddr => Inet,
    Bytes => Blob,
}

impl<T: Into<CqlValue>> From<Vec<T>> for CqlValue {
    fn from(items: Vec<T>) -> Self {
        CqlValue::List(items.into_iter().map(Into::into).collect())
    }
}

/// A bound query parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundValue {
    Null,
    /// Leaves the column untouched (protocol v4 "not set").
    Unset,
    Value(CqlValue),
}

impl BoundValue {
    pub fn to_raw(&self) -> Result<RawValue> {
        Ok(match self {
            BoundValue::Null => RawValue::Null,
            BoundValue::Unset => RawValue::Unset,
            BoundValue::Value(value) => RawValue::Bytes(value.to_bytes()?),
        })
    }
}

impl From<CqlValue> for BoundValue {
    fn from(value: CqlValue) -> Self {
        BoundValue::Value(value)
    }
}

impl<T: Into<CqlValue>> From<Option<T>> for BoundValue {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => BoundValue::Value(value.into()),
            None => BoundValue::Null,
        }
    }
}

impl<T: Into<CqlValue>> From<Vec<T>> for BoundValue {
    fn from(items: Vec<T>) -> Self {
        BoundValue::Value(CqlValue::from(items))
    }
}

macro_rules! bound_value_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for BoundValue {
                fn from(value: $ty) -> Self {
                    BoundValue::Value(CqlValue::from(value))
                }
            }
        )*
    };
}

bound_value_from!(bool, i8, i16, i32, i64, f32, f64, String, &str, Uuid, IpAddr, Bytes);

/// Builds a `Vec<BoundValue>` from heterogeneous expressions.
///
/// ```
/// use cqlwire_common::values;
///
/// let params = values!["alice", 42, None::<i32>];
/// assert_eq!(params.len(), 3);
/// ```
#[macro_export]
macro_rules! values {
    ($($value:expr),* $(,)?) => {
        vec![$($crate::protocol::BoundValue::from($value)),*]
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn round_trip(typ: &ColumnType, value: CqlValue) {
        let bytes = value.to_bytes().unwrap();
        assert_eq!(CqlValue::deserialize(typ, &bytes).unwrap(), value);
    }

    #[test]
    fn test_native_values() {
        round_trip(&ColumnType::Int, CqlValue::Int(-7));
        round_trip(&ColumnType::Bigint, CqlValue::Bigint(i64::MAX));
        round_trip(&ColumnType::Boolean, CqlValue::Boolean(true));
        round_trip(&ColumnType::Text, CqlValue::Text("héllo".into()));
        round_trip(&ColumnType::Double, CqlValue::Double(1.5));
        round_trip(
            &ColumnType::Inet,
            CqlValue::Inet(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))),
        );
        round_trip(&ColumnType::Uuid, CqlValue::Uuid(Uuid::new_v4()));
    }

    #[test]
    fn test_nested_collections() {
        let typ = ColumnType::Map(
            Box::new(ColumnType::Text),
            Box::new(ColumnType::List(Box::new(ColumnType::Int))),
        );
        round_trip(
            &typ,
            CqlValue::Map(vec![(
                CqlValue::Text("a".into()),
                CqlValue::List(vec![CqlValue::Int(1), CqlValue::Int(2)]),
            )]),
        );
    }

    #[test]
    fn test_empty_is_distinct_from_empty_string() {
        assert_eq!(
            CqlValue::deserialize(&ColumnType::Int, &[]).unwrap(),
            CqlValue::Empty
        );
        assert_eq!(
            CqlValue::deserialize(&ColumnType::Text, &[]).unwrap(),
            CqlValue::Text(String::new())
        );
    }

    #[test]
    fn test_wrong_width_rejected() {
        assert!(matches!(
            CqlValue::deserialize(&ColumnType::Int, &[0, 1]),
            Err(CqlError::Protocol(_))
        ));
        assert!(CqlValue::deserialize(&ColumnType::Inet, &[1, 2, 3]).is_err());
    }

    #[test]
    fn test_collection_trailing_bytes_rejected() {
        let mut bytes = CqlValue::List(vec![CqlValue::Int(1)])
            .to_bytes()
            .unwrap()
            .to_vec();
        bytes.push(0);
        let typ = ColumnType::List(Box::new(ColumnType::Int));
        assert!(CqlValue::deserialize(&typ, &bytes).is_err());
    }

    #[test]
    fn test_udt_missing_trailing_fields() {
        let typ = ColumnType::Udt {
            keyspace: "ks".into(),
            name: "address".into(),
            fields: vec![
                ("street".into(), ColumnType::Text),
                ("zip".into(), ColumnType::Int),
            ],
        };
        let mut buf = BytesMut::new();
        write_bytes(&mut buf, Some(&b"main st"[..])).unwrap();
        let value = CqlValue::deserialize(&typ, &buf).unwrap();
        assert_eq!(
            value,
            CqlValue::Udt {
                keyspace: "ks".into(),
                name: "address".into(),
                fields: vec![
                    ("street".into(), Some(CqlValue::Text("main st".into()))),
                    ("zip".into(), None),
                ],
            }
        );
    }

    #[test]
    fn test_column_type_round_trip() {
        let typ = ColumnType::Tuple(vec![
            ColumnType::Set(Box::new(ColumnType::Timeuuid)),
            ColumnType::Custom("org.example.Type".into()),
        ]);
        let mut buf = BytesMut::new();
        typ.write(&mut buf).unwrap();
        let mut cursor = &buf[..];
        assert_eq!(ColumnType::read(&mut cursor).unwrap(), typ);
        assert!(cursor.is_empty());
        assert_eq!(typ.to_string(), "tuple<set<timeuuid>, 'org.example.Type'>");
    }

    #[test]
    fn test_deeply_nested_type_rejected() {
        let mut buf = BytesMut::new();
        for _ in 0..(MAX_TYPE_DEPTH + 2) {
            buf.put_u16(0x0020);
        }
        buf.put_u16(0x0009);
        let mut cursor = &buf[..];
        assert!(ColumnType::read(&mut cursor).is_err());
    }

    #[test]
    fn test_bound_values() {
        let params = crate::values!["alice", 3, None::<i64>, BoundValue::Unset];
        assert_eq!(params[0], BoundValue::Value(CqlValue::Text("alice".into())));
        assert_eq!(params[1], BoundValue::Value(CqlValue::Int(3)));
        assert_eq!(params[2], BoundValue::Null);
        assert_eq!(params[3].to_raw().unwrap(), RawValue::Unset);
    }
}
