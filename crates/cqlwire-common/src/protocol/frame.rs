use bytes::{BufMut, Bytes, BytesMut};

use crate::protocol::error::{CqlError, Result};

/// Native protocol version spoken by this crate.
pub const PROTOCOL_VERSION: u8 = 0x04;

/// Direction bit set on the version byte of every response frame.
pub const RESPONSE_DIRECTION: u8 = 0x80;

/// Size of the fixed frame header in bytes.
pub const HEADER_LEN: usize = 9;

/// Maximum body length accepted on the wire (256 MB).
pub const MAX_BODY_LEN: usize = 256 * 1024 * 1024;

pub const FLAG_COMPRESSION: u8 = 0x01;
pub const FLAG_TRACING: u8 = 0x02;
pub const FLAG_CUSTOM_PAYLOAD: u8 = 0x04;
pub const FLAG_WARNING: u8 = 0x08;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Error,
    Startup,
    Ready,
    Authenticate,
    Options,
    Supported,
    Query,
    Result,
    AuthChallenge,
    AuthResponse,
    AuthSuccess,
}

impl Opcode {
    pub fn from_byte(byte: u8) -> Result<Self> {
        Ok(match byte {
            0x00 => Opcode::Error,
            0x01 => Opcode::Startup,
            0x02 => Opcode::Ready,
            0x03 => Opcode::Authenticate,
            0x05 => Opcode::Options,
            0x06 => Opcode::Supported,
            0x07 => Opcode::Query,
            0x08 => Opcode::Result,
            0x0E => Opcode::AuthChallenge,
            0x0F => Opcode::AuthResponse,
            0x10 => Opcode::AuthSuccess,
            other => {
                return Err(CqlError::protocol(format!(
                    "unknown opcode 0x{:02X}",
                    other
                )))
            }
        })
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Opcode::Error => 0x00,
            Opcode::Startup => 0x01,
            Opcode::Ready => 0x02,
            Opcode::Authenticate => 0x03,
            Opcode::Options => 0x05,
            Opcode::Supported => 0x06,
            Opcode::Query => 0x07,
            Opcode::Result => 0x08,
            Opcode::AuthChallenge => 0x0E,
            Opcode::AuthResponse => 0x0F,
            Opcode::AuthSuccess => 0x10,
        }
    }

    /// Whether this opcode is sent by clients.
    pub fn is_request(self) -> bool {
        matches!(
            self,
            Opcode::Startup | Opcode::Options | Opcode::Query | Opcode::AuthResponse
        )
    }
}

/// The fixed 9-byte header preceding every frame body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u8,
    pub flags: u8,
    pub stream: i16,
    pub opcode: Opcode,
    pub length: usize,
}

impl FrameHeader {
    /// Parses and validates a header.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if:
    /// - The protocol version is not 4
    /// - The opcode is unknown
    /// - The body length is negative or exceeds [`MAX_BODY_LEN`]
    pub fn parse(buf: &[u8; HEADER_LEN]) -> Result<Self> {
        let version = buf[0];
        if version & !RESPONSE_DIRECTION != PROTOCOL_VERSION {
            return Err(CqlError::protocol(format!(
                "unsupported protocol version 0x{:02X}",
                version
            )));
        }
        let flags = buf[1];
        let stream = i16::from_be_bytes([buf[2], buf[3]]);
        let opcode = Opcode::from_byte(buf[4])?;
        let length = i32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]);
        if length < 0 || length as usize > MAX_BODY_LEN {
            return Err(CqlError::protocol(format!(
                "invalid body length {} (max {})",
                length, MAX_BODY_LEN
            )));
        }

        Ok(Self {
            version,
            flags,
            stream,
            opcode,
            length: length as usize,
        })
    }

    pub fn is_response(&self) -> bool {
        self.version & RESPONSE_DIRECTION != 0
    }
}

/// A complete frame: header fields plus the raw body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: u8,
    pub flags: u8,
    pub stream: i16,
    pub opcode: Opcode,
    pub body: Bytes,
}

impl Frame {
    pub fn request(stream: i16, opcode: Opcode, body: Bytes) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            flags: 0,
            stream,
            opcode,
            body,
        }
    }

    pub fn response(stream: i16, opcode: Opcode, body: Bytes) -> Self {
        Self {
            version: PROTOCOL_VERSION | RESPONSE_DIRECTION,
            flags: 0,
            stream,
            opcode,
            body,
        }
    }

    pub fn is_response(&self) -> bool {
        self.version & RESPONSE_DIRECTION != 0
    }

    /// Builds a frame from a parsed header and a body of exactly `header.length` bytes.
    pub fn from_parts(header: FrameHeader, body: Bytes) -> Result<Self> {
        if body.len() != header.length {
            return Err(CqlError::protocol(format!(
                "frame length mismatch: header says {}, got {}",
                header.length,
                body.len()
            )));
        }
        Ok(Self {
            version: header.version,
            flags: header.flags,
            stream: header.stream,
            opcode: header.opcode,
            body,
        })
    }

    /// Serializes the frame (header + body) into a single buffer.
    pub fn to_bytes(&self) -> Result<Bytes> {
        if self.body.len() > MAX_BODY_LEN {
            return Err(CqlError::protocol(format!(
                "frame body too large: {} bytes (max {})",
                self.body.len(),
                MAX_BODY_LEN
            )));
        }
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.body.len());
        buf.put_u8(self.version);
        buf.put_u8(self.flags);
        buf.put_i16(self.stream);
        buf.put_u8(self.opcode.as_byte());
        buf.put_i32(self.body.len() as i32);
        buf.extend_from_slice(&self.body);
        Ok(buf.freeze())
    }

    /// Parses a frame from a buffer that contains exactly one frame.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(CqlError::protocol(format!(
                "truncated frame header: {} bytes",
                data.len()
            )));
        }
        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&data[..HEADER_LEN]);
        let header = FrameHeader::parse(&header)?;
        Frame::from_parts(header, Bytes::copy_from_slice(&data[HEADER_LEN..]))
    }
}
