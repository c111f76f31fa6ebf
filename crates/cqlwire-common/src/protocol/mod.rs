pub mod error;
pub mod frame;
pub mod requests;
pub mod responses;
pub mod types;
pub mod value;

#[cfg(test)]
mod tests;

pub use error::{CqlError, DbErrorCode, Result};
pub use frame::{Frame, FrameHeader, Opcode, HEADER_LEN, MAX_BODY_LEN, PROTOCOL_VERSION};
pub use requests::{Consistency, QueryParameters, QueryRequest, Request};
pub use responses::{ColumnSpec, ResultMetadata, Response, Row, Rows, SchemaChange, ServerError};
pub use types::RawValue;
pub use value::{BoundValue, ColumnType, CqlValue};
