use bytes::BytesMut;
use tracing::warn;
use uuid::Uuid;

use crate::protocol::error::{CqlError, Result};
use crate::protocol::frame::{
    Frame, FLAG_COMPRESSION, FLAG_CUSTOM_PAYLOAD, FLAG_TRACING, FLAG_WARNING,
};
use crate::protocol::types::{read_bytes_map, read_string_list, read_uuid, write_string_list};
use crate::protocol::{Request, Response};

/// A decoded response together with the envelope data carried by frame flags.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseFrame {
    pub stream: i16,
    pub response: Response,
    pub warnings: Vec<String>,
    pub tracing_id: Option<Uuid>,
}

/// Maps requests and responses onto frames.
///
/// Both directions are implemented: the driver encodes requests and decodes
/// responses, while [`FrameServer`](crate::transport::FrameServer) does the
/// opposite.
///
/// # Example
///
/// ```
/// use cqlwire_common::transport::FrameCodec;
/// use cqlwire_common::protocol::{QueryRequest, Request, Response};
///
/// let request = Request::Query(QueryRequest::new("SELECT 1"));
/// let frame = FrameCodec::encode_request(3, &request).unwrap();
/// assert_eq!(FrameCodec::decode_request(&frame).unwrap(), request);
///
/// let frame = FrameCodec::encode_response(3, &Response::Void).unwrap();
/// let decoded = FrameCodec::decode_response(&frame).unwrap();
/// assert_eq!(decoded.stream, 3);
/// assert_eq!(decoded.response, Response::Void);
/// ```
pub struct FrameCodec;

impl FrameCodec {
    pub fn encode_request(stream: i16, request: &Request) -> Result<Frame> {
        Ok(Frame::request(stream, request.opcode(), request.encode_body()?))
    }

    /// Decodes a request frame.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the frame is a response, is compressed, or
    /// its body does not parse as the request named by its opcode.
    pub fn decode_request(frame: &Frame) -> Result<Request> {
        if frame.is_response() {
            return Err(CqlError::protocol("expected a request frame, got a response"));
        }
        if frame.flags & FLAG_COMPRESSION != 0 {
            return Err(CqlError::protocol("compressed frames were not negotiated"));
        }
        Request::decode_body(frame.opcode, &frame.body)
    }

    pub fn encode_response(stream: i16, response: &Response) -> Result<Frame> {
        Ok(Frame::response(stream, response.opcode(), response.encode_body()?))
    }

    /// Encodes a response with the warning flag set and `warnings` prepended to the body.
    pub fn encode_response_with_warnings(
        stream: i16,
        response: &Response,
        warnings: &[String],
    ) -> Result<Frame> {
        let mut body = BytesMut::new();
        write_string_list(&mut body, warnings)?;
        body.extend_from_slice(&response.encode_body()?);
        let mut frame = Frame::response(stream, response.opcode(), body.freeze());
        frame.flags |= FLAG_WARNING;
        Ok(frame)
    }

    /// Decodes a response frame, stripping the optional tracing id, warnings
    /// and custom payload that precede the body.
    ///
    /// Server warnings are logged at WARN and returned in the [`ResponseFrame`].
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the frame is a request, is compressed, or
    /// its body is malformed.
    pub fn decode_response(frame: &Frame) -> Result<ResponseFrame> {
        if !frame.is_response() {
            return Err(CqlError::protocol("expected a response frame, got a request"));
        }
        if frame.flags & FLAG_COMPRESSION != 0 {
            return Err(CqlError::protocol("compressed frames were not negotiated"));
        }

        let mut cursor: &[u8] = &frame.body;
        let tracing_id = if frame.flags & FLAG_TRACING != 0 {
            Some(read_uuid(&mut cursor)?)
        } else {
            None
        };
        let warnings = if frame.flags & FLAG_WARNING != 0 {
            read_string_list(&mut cursor)?
        } else {
            Vec::new()
        };
        if frame.flags & FLAG_CUSTOM_PAYLOAD != 0 {
            read_bytes_map(&mut cursor)?;
        }

        for warning in &warnings {
            warn!(stream = frame.stream, "Server warning: {}", warning);
        }

        let response = Response::decode_body(frame.opcode, cursor)?;
        Ok(ResponseFrame {
            stream: frame.stream,
            response,
            warnings,
            tracing_id,
        })
    }
}

