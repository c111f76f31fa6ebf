use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::protocol::error::{CqlError, Result};
use crate::protocol::frame::Opcode;
use crate::protocol::types::{
    read_bytes, read_int, read_long, read_long_string, read_short, read_string_map, read_u8,
    read_value, write_bytes, write_long_string, write_string_map, write_value, RawValue,
};
use crate::protocol::value::BoundValue;

pub const CQL_VERSION: &str = "3.0.0";
pub const DRIVER_NAME: &str = "cqlwire";
pub const DRIVER_VERSION: &str = env!("CARGO_PKG_VERSION");

const QUERY_FLAG_VALUES: u8 = 0x01;
const QUERY_FLAG_PAGE_SIZE: u8 = 0x04;
const QUERY_FLAG_PAGING_STATE: u8 = 0x08;
const QUERY_FLAG_SERIAL_CONSISTENCY: u8 = 0x10;
const QUERY_FLAG_TIMESTAMP: u8 = 0x20;
const QUERY_FLAG_NAMED_VALUES: u8 = 0x40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Consistency {
    Any,
    One,
    Two,
    Three,
    Quorum,
    All,
    #[default]
    LocalQuorum,
    EachQuorum,
    Serial,
    LocalSerial,
    LocalOne,
}

impl Consistency {
    pub fn from_code(code: u16) -> Result<Self> {
        Ok(match code {
            0x0000 => Consistency::Any,
            0x0001 => Consistency::One,
            0x0002 => Consistency::Two,
            0x0003 => Consistency::Three,
            0x0004 => Consistency::Quorum,
            0x0005 => Consistency::All,
            0x0006 => Consistency::LocalQuorum,
            0x0007 => Consistency::EachQuorum,
            0x0008 => Consistency::Serial,
            0x0009 => Consistency::LocalSerial,
            0x000A => Consistency::LocalOne,
            other => {
                return Err(CqlError::protocol(format!(
                    "unknown consistency 0x{:04X}",
                    other
                )))
            }
        })
    }

    pub fn code(self) -> u16 {
        match self {
            Consistency::Any => 0x0000,
            Consistency::One => 0x0001,
            Consistency::Two => 0x0002,
            Consistency::Three => 0x0003,
            Consistency::Quorum => 0x0004,
            Consistency::All => 0x0005,
            Consistency::LocalQuorum => 0x0006,
            Consistency::EachQuorum => 0x0007,
            Consistency::Serial => 0x0008,
            Consistency::LocalSerial => 0x0009,
            Consistency::LocalOne => 0x000A,
        }
    }

    pub fn is_serial(self) -> bool {
        matches!(self, Consistency::Serial | Consistency::LocalSerial)
    }
}

impl fmt::Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Consistency::Any => "ANY",
            Consistency::One => "ONE",
            Consistency::Two => "TWO",
            Consistency::Three => "THREE",
            Consistency::Quorum => "QUORUM",
            Consistency::All => "ALL",
            Consistency::LocalQuorum => "LOCAL_QUORUM",
            Consistency::EachQuorum => "EACH_QUORUM",
            Consistency::Serial => "SERIAL",
            Consistency::LocalSerial => "LOCAL_SERIAL",
            Consistency::LocalOne => "LOCAL_ONE",
        };
        f.write_str(name)
    }
}

impl FromStr for Consistency {
    type Err = CqlError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "any" => Consistency::Any,
            "one" => Consistency::One,
            "two" => Consistency::Two,
            "three" => Consistency::Three,
            "quorum" => Consistency::Quorum,
            "all" => Consistency::All,
            "local_quorum" => Consistency::LocalQuorum,
            "each_quorum" => Consistency::EachQuorum,
            "serial" => Consistency::Serial,
            "local_serial" => Consistency::LocalSerial,
            "local_one" => Consistency::LocalOne,
            _ => {
                return Err(CqlError::InvalidConfig(format!(
                    "unknown consistency level '{}'",
                    s
                )))
            }
        })
    }
}

/// The `<query_parameters>` block of a QUERY request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParameters {
    pub consistency: Consistency,
    pub values: Vec<RawValue>,
    pub page_size: Option<i32>,
    pub paging_state: Option<Bytes>,
    pub serial_consistency: Option<Consistency>,
    pub default_timestamp: Option<i64>,
}

impl QueryParameters {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u16(self.consistency.code());

        let mut flags = 0u8;
        if !self.values.is_empty() {
            flags |= QUERY_FLAG_VALUES;
        }
        if self.page_size.is_some() {
            flags |= QUERY_FLAG_PAGE_SIZE;
        }
        if self.paging_state.is_some() {
            flags |= QUERY_FLAG_PAGING_STATE;
        }
        if self.serial_consistency.is_some() {
            flags |= QUERY_FLAG_SERIAL_CONSISTENCY;
        }
        if self.default_timestamp.is_some() {
            flags |= QUERY_FLAG_TIMESTAMP;
        }
        buf.put_u8(flags);

        if !self.values.is_empty() {
            let count = u16::try_from(self.values.len()).map_err(|_| {
                CqlError::InvalidRequest(format!("too many bound values: {}", self.values.len()))
            })?;
            buf.put_u16(count);
            for value in &self.values {
                write_value(buf, value)?;
            }
        }
        if let Some(page_size) = self.page_size {
            buf.put_i32(page_size);
        }
        if let Some(state) = &self.paging_state {
            write_bytes(buf, Some(state))?;
        }
        if let Some(serial) = self.serial_consistency {
            buf.put_u16(serial.code());
        }
        if let Some(timestamp) = self.default_timestamp {
            buf.put_i64(timestamp);
        }
        Ok(())
    }

    fn decode(buf: &mut &[u8]) -> Result<Self> {
        let consistency = Consistency::from_code(read_short(buf)?)?;
        let flags = read_u8(buf)?;
        if flags & QUERY_FLAG_NAMED_VALUES != 0 {
            return Err(CqlError::protocol("named values are not supported"));
        }

        let mut params = QueryParameters {
            consistency,
            ..Default::default()
        };
        if flags & QUERY_FLAG_VALUES != 0 {
            let n = read_short(buf)?;
            params.values = (0..n)
                .map(|_| read_value(buf))
                .collect::<Result<Vec<_>>>()?;
        }
        if flags & QUERY_FLAG_PAGE_SIZE != 0 {
            params.page_size = Some(read_int(buf)?);
        }
        if flags & QUERY_FLAG_PAGING_STATE != 0 {
            params.paging_state = read_bytes(buf)?.map(Bytes::copy_from_slice);
        }
        if flags & QUERY_FLAG_SERIAL_CONSISTENCY != 0 {
            params.serial_consistency = Some(Consistency::from_code(read_short(buf)?)?);
        }
        if flags & QUERY_FLAG_TIMESTAMP != 0 {
            params.default_timestamp = Some(read_long(buf)?);
        }
        Ok(params)
    }
}

/// A QUERY request: CQL text plus its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub query: String,
    pub params: QueryParameters,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            params: QueryParameters::default(),
        }
    }

    pub fn with_consistency(mut self, consistency: Consistency) -> Self {
        self.params.consistency = consistency;
        self
    }

    /// Serializes and attaches bound values.
    pub fn with_values(mut self, values: &[BoundValue]) -> Result<Self> {
        self.params.values = values
            .iter()
            .map(BoundValue::to_raw)
            .collect::<Result<Vec<_>>>()?;
        Ok(self)
    }

    pub fn with_page_size(mut self, page_size: Option<i32>) -> Self {
        self.params.page_size = page_size;
        self
    }

    pub fn with_paging_state(mut self, paging_state: Option<Bytes>) -> Self {
        self.params.paging_state = paging_state;
        self
    }

    pub fn with_serial_consistency(mut self, serial: Option<Consistency>) -> Self {
        self.params.serial_consistency = serial;
        self
    }
}

/// Client-to-server messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Startup(BTreeMap<String, String>),
    /// SASL token; `None` encodes a null `[bytes]`.
    AuthResponse(Option<Bytes>),
    Options,
    Query(QueryRequest),
}

impl Request {
    /// The STARTUP options this driver sends.
    pub fn startup() -> Self {
        let mut options = BTreeMap::new();
        options.insert("CQL_VERSION".to_string(), CQL_VERSION.to_string());
        options.insert("DRIVER_NAME".to_string(), DRIVER_NAME.to_string());
        options.insert("DRIVER_VERSION".to_string(), DRIVER_VERSION.to_string());
        Request::Startup(options)
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            Request::Startup(_) => Opcode::Startup,
            Request::AuthResponse(_) => Opcode::AuthResponse,
            Request::Options => Opcode::Options,
            Request::Query(_) => Opcode::Query,
        }
    }

    pub fn encode_body(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        match self {
            Request::Startup(options) => write_string_map(&mut buf, options)?,
            Request::AuthResponse(token) => write_bytes(&mut buf, token.as_deref())?,
            Request::Options => {}
            Request::Query(query) => {
                write_long_string(&mut buf, &query.query)?;
                query.params.encode(&mut buf)?;
            }
        }
        Ok(buf.freeze())
    }

    pub fn decode_body(opcode: Opcode, body: &[u8]) -> Result<Self> {
        let mut cursor = body;
        let request = match opcode {
            Opcode::Startup => Request::Startup(read_string_map(&mut cursor)?),
            Opcode::AuthResponse => {
                Request::AuthResponse(read_bytes(&mut cursor)?.map(Bytes::copy_from_slice))
            }
            Opcode::Options => Request::Options,
            Opcode::Query => {
                let query = read_long_string(&mut cursor)?;
                let params = QueryParameters::decode(&mut cursor)?;
                Request::Query(QueryRequest { query, params })
            }
            other => {
                return Err(CqlError::protocol(format!(
                    "{:?} is not a request opcode",
                    other
                )))
            }
        };
        if !cursor.is_empty() {
            return Err(CqlError::protocol(format!(
                "{} trailing bytes after {:?} body",
                cursor.len(),
                opcode
            )));
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consistency_parsing() {
        assert_eq!("quorum".parse::<Consistency>().unwrap(), Consistency::Quorum);
        assert_eq!(
            "LOCAL-QUORUM".parse::<Consistency>().unwrap(),
            Consistency::LocalQuorum
        );
        assert!("sometimes".parse::<Consistency>().is_err());
        assert_eq!(Consistency::default(), Consistency::LocalQuorum);
        assert_eq!(Consistency::LocalOne.to_string(), "LOCAL_ONE");
    }

    #[test]
    fn test_consistency_codes() {
        for code in 0..=0x000A {
            assert_eq!(Consistency::from_code(code).unwrap().code(), code);
        }
        assert!(Consistency::from_code(0x000B).is_err());
    }

    #[test]
    fn test_query_flags_follow_parameters() {
        let request = Request::Query(QueryRequest::new("SELECT * FROM t").with_page_size(Some(100)));
        let body = request.encode_body().unwrap();
        // long string (4 + 15), consistency (2), flags (1), page size (4)
        assert_eq!(body.len(), 4 + 15 + 2 + 1 + 4);
        assert_eq!(body[4 + 15 + 2], QUERY_FLAG_PAGE_SIZE);
    }

    #[test]
    fn test_named_values_rejected() {
        let mut buf = BytesMut::new();
        write_long_string(&mut buf, "SELECT 1").unwrap();
        buf.put_u16(Consistency::One.code());
        buf.put_u8(QUERY_FLAG_NAMED_VALUES);
        assert!(Request::decode_body(Opcode::Query, &buf).is_err());
    }

    #[test]
    fn test_response_opcode_is_not_a_request() {
        assert!(Request::decode_body(Opcode::Ready, &[]).is_err());
    }
}
