//! Server-to-client messages.
//!
//! A [`Response`] is a tagged union over every body the driver understands.
//! RESULT frames are flattened into their kinds (`Void`, `Rows`, `SetKeyspace`,
//! `SchemaChange`) so callers match on one enum instead of inspecting a
//! result kind field.

use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};

use crate::protocol::error::{CqlError, DbErrorCode, Result};
use crate::protocol::frame::Opcode;
use crate::protocol::types::{
    read_bytes, read_int, read_string, read_string_list, read_string_multimap, write_bytes,
    write_string, write_string_list, write_string_multimap,
};
use crate::protocol::value::{ColumnType, CqlValue};

const RESULT_VOID: i32 = 0x0001;
const RESULT_ROWS: i32 = 0x0002;
const RESULT_SET_KEYSPACE: i32 = 0x0003;
const RESULT_PREPARED: i32 = 0x0004;
const RESULT_SCHEMA_CHANGE: i32 = 0x0005;

const METADATA_GLOBAL_TABLE_SPEC: i32 = 0x0001;
const METADATA_HAS_MORE_PAGES: i32 = 0x0002;
const METADATA_NO_METADATA: i32 = 0x0004;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub keyspace: String,
    pub table: String,
    pub name: String,
    pub typ: ColumnType,
}

impl ColumnSpec {
    pub fn new(
        keyspace: impl Into<String>,
        table: impl Into<String>,
        name: impl Into<String>,
        typ: ColumnType,
    ) -> Self {
        Self {
            keyspace: keyspace.into(),
            table: table.into(),
            name: name.into(),
            typ,
        }
    }
}

/// Column metadata shared by every row of one page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultMetadata {
    pub columns: Vec<ColumnSpec>,
    /// Present when the server has more pages for this query.
    pub paging_state: Option<Bytes>,
}

impl ResultMetadata {
    pub fn new(columns: Vec<ColumnSpec>) -> Self {
        Self {
            columns,
            paging_state: None,
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    fn decode(buf: &mut &[u8]) -> Result<Self> {
        let flags = read_int(buf)?;
        let count = read_int(buf)?;
        if count < 0 {
            return Err(CqlError::protocol(format!("negative column count {}", count)));
        }
        if flags & METADATA_NO_METADATA != 0 {
            return Err(CqlError::protocol(
                "result without metadata; prepared statements are not supported",
            ));
        }

        let paging_state = if flags & METADATA_HAS_MORE_PAGES != 0 {
            read_bytes(buf)?.map(Bytes::copy_from_slice)
        } else {
            None
        };

        let global = if flags & METADATA_GLOBAL_TABLE_SPEC != 0 {
            Some((read_string(buf)?, read_string(buf)?))
        } else {
            None
        };

        let mut columns = Vec::with_capacity((count as usize).min(buf.len()));
        for _ in 0..count {
            let (keyspace, table) = match &global {
                Some((keyspace, table)) => (keyspace.clone(), table.clone()),
                None => (read_string(buf)?, read_string(buf)?),
            };
            let name = read_string(buf)?;
            let typ = ColumnType::read(buf)?;
            columns.push(ColumnSpec {
                keyspace,
                table,
                name,
                typ,
            });
        }

        Ok(Self {
            columns,
            paging_state,
        })
    }

    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let global = self.columns.first().and_then(|first| {
            self.columns
                .iter()
                .all(|c| c.keyspace == first.keyspace && c.table == first.table)
                .then(|| (first.keyspace.as_str(), first.table.as_str()))
        });

        let mut flags = 0;
        if global.is_some() {
            flags |= METADATA_GLOBAL_TABLE_SPEC;
        }
        if self.paging_state.is_some() {
            flags |= METADATA_HAS_MORE_PAGES;
        }
        buf.put_i32(flags);
        buf.put_i32(self.columns.len() as i32);
        if let Some(state) = &self.paging_state {
            write_bytes(buf, Some(state))?;
        }
        if let Some((keyspace, table)) = global {
            write_string(buf, keyspace)?;
            write_string(buf, table)?;
        }
        for column in &self.columns {
            if global.is_none() {
                write_string(buf, &column.keyspace)?;
                write_string(buf, &column.table)?;
            }
            write_string(buf, &column.name)?;
            column.typ.write(buf)?;
        }
        Ok(())
    }
}

/// One row; `None` cells are nulls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    pub cells: Vec<Option<CqlValue>>,
}

impl Row {
    pub fn new(cells: Vec<Option<CqlValue>>) -> Self {
        Self { cells }
    }
}

/// A page of rows with its metadata.
///
/// Every row has exactly one cell per column in `metadata.columns`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rows {
    pub metadata: ResultMetadata,
    pub rows: Vec<Row>,
}

impl Rows {
    /// Builds a page, checking that every row matches the column count.
    pub fn new(columns: Vec<ColumnSpec>, rows: Vec<Row>) -> Result<Self> {
        if let Some(bad) = rows.iter().find(|r| r.cells.len() != columns.len()) {
            return Err(CqlError::InvalidRequest(format!(
                "row has {} cells but {} columns are declared",
                bad.cells.len(),
                columns.len()
            )));
        }
        Ok(Self {
            metadata: ResultMetadata::new(columns),
            rows,
        })
    }

    pub fn with_paging_state(mut self, paging_state: Option<Bytes>) -> Self {
        self.metadata.paging_state = paging_state;
        self
    }

    fn decode(buf: &mut &[u8]) -> Result<Self> {
        let metadata = ResultMetadata::decode(buf)?;
        let count = read_int(buf)?;
        if count < 0 {
            return Err(CqlError::protocol(format!("negative row count {}", count)));
        }
        if metadata.columns.is_empty() && count > 0 {
            return Err(CqlError::protocol("rows without columns"));
        }

        let mut rows = Vec::with_capacity((count as usize).min(buf.len()));
        for _ in 0..count {
            let mut cells = Vec::with_capacity(metadata.columns.len());
            for column in &metadata.columns {
                let cell = match read_bytes(buf)? {
                    Some(bytes) => Some(
                        CqlValue::deserialize(&column.typ, bytes)
                            .map_err(|e| in_column(&column.name, e))?,
                    ),
                    None => None,
                };
                cells.push(cell);
            }
            rows.push(Row { cells });
        }

        Ok(Self { metadata, rows })
    }

    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        self.metadata.encode(buf)?;
        buf.put_i32(self.rows.len() as i32);
        for row in &self.rows {
            for cell in &row.cells {
                match cell {
                    Some(value) => write_bytes(buf, Some(&value.to_bytes()?))?,
                    None => write_bytes(buf, None)?,
                }
            }
        }
        Ok(())
    }
}

fn in_column(column: &str, err: CqlError) -> CqlError {
    match err {
        CqlError::Protocol(msg) => CqlError::Protocol(format!("column '{}': {}", column, msg)),
        other => other,
    }
}

/// Body of an ERROR frame. Code-specific trailing detail is not kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    pub code: DbErrorCode,
    pub message: String,
}

impl ServerError {
    pub fn new(code: DbErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<ServerError> for CqlError {
    fn from(err: ServerError) -> Self {
        CqlError::Query {
            code: err.code,
            message: err.message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaChange {
    pub change_type: String,
    pub target: String,
    pub keyspace: String,
    /// Table, type, function or aggregate name; absent for keyspace changes.
    pub name: Option<String>,
    /// Argument types, for function and aggregate changes.
    pub arguments: Vec<String>,
}

impl SchemaChange {
    fn decode(buf: &mut &[u8]) -> Result<Self> {
        let change_type = read_string(buf)?;
        let target = read_string(buf)?;
        let keyspace = read_string(buf)?;
        let (name, arguments) = match target.as_str() {
            "KEYSPACE" => (None, Vec::new()),
            "TABLE" | "TYPE" => (Some(read_string(buf)?), Vec::new()),
            "FUNCTION" | "AGGREGATE" => (Some(read_string(buf)?), read_string_list(buf)?),
            other => {
                return Err(CqlError::protocol(format!(
                    "unknown schema change target '{}'",
                    other
                )))
            }
        };
        Ok(Self {
            change_type,
            target,
            keyspace,
            name,
            arguments,
        })
    }

    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        write_string(buf, &self.change_type)?;
        write_string(buf, &self.target)?;
        write_string(buf, &self.keyspace)?;
        if let Some(name) = &self.name {
            write_string(buf, name)?;
        }
        if matches!(self.target.as_str(), "FUNCTION" | "AGGREGATE") {
            write_string_list(buf, &self.arguments)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Error(ServerError),
    Ready,
    /// Authenticator class name.
    Authenticate(String),
    Supported(BTreeMap<String, Vec<String>>),
    AuthChallenge(Option<Bytes>),
    AuthSuccess(Option<Bytes>),
    Void,
    Rows(Rows),
    SetKeyspace(String),
    SchemaChange(SchemaChange),
}

impl Response {
    pub fn error(code: DbErrorCode, message: impl Into<String>) -> Self {
        Response::Error(ServerError::new(code, message))
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            Response::Error(_) => Opcode::Error,
            Response::Ready => Opcode::Ready,
            Response::Authenticate(_) => Opcode::Authenticate,
            Response::Supported(_) => Opcode::Supported,
            Response::AuthChallenge(_) => Opcode::AuthChallenge,
            Response::AuthSuccess(_) => Opcode::AuthSuccess,
            Response::Void
            | Response::Rows(_)
            | Response::SetKeyspace(_)
            | Response::SchemaChange(_) => Opcode::Result,
        }
    }

    /// Short name of the variant, for log and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Response::Error(_) => "ERROR",
            Response::Ready => "READY",
            Response::Authenticate(_) => "AUTHENTICATE",
            Response::Supported(_) => "SUPPORTED",
            Response::AuthChallenge(_) => "AUTH_CHALLENGE",
            Response::AuthSuccess(_) => "AUTH_SUCCESS",
            Response::Void => "RESULT(Void)",
            Response::Rows(_) => "RESULT(Rows)",
            Response::SetKeyspace(_) => "RESULT(SetKeyspace)",
            Response::SchemaChange(_) => "RESULT(SchemaChange)",
        }
    }

    pub fn encode_body(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        match self {
            Response::Error(err) => {
                buf.put_i32(err.code.code());
                write_string(&mut buf, &err.message)?;
            }
            Response::Ready => {}
            Response::Authenticate(class) => write_string(&mut buf, class)?,
            Response::Supported(options) => write_string_multimap(&mut buf, options)?,
            Response::AuthChallenge(token) | Response::AuthSuccess(token) => {
                write_bytes(&mut buf, token.as_deref())?
            }
            Response::Void => buf.put_i32(RESULT_VOID),
            Response::Rows(rows) => {
                buf.put_i32(RESULT_ROWS);
                rows.encode(&mut buf)?;
            }
            Response::SetKeyspace(keyspace) => {
                buf.put_i32(RESULT_SET_KEYSPACE);
                write_string(&mut buf, keyspace)?;
            }
            Response::SchemaChange(change) => {
                buf.put_i32(RESULT_SCHEMA_CHANGE);
                change.encode(&mut buf)?;
            }
        }
        Ok(buf.freeze())
    }

    /// Decodes a response body.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the opcode is not a response opcode, the
    /// body is truncated, or bytes remain after the body was parsed (except
    /// for ERROR, whose code-specific tail is ignored).
    pub fn decode_body(opcode: Opcode, body: &[u8]) -> Result<Self> {
        let mut cursor = body;
        let response = match opcode {
            Opcode::Error => {
                let code = DbErrorCode::from_code(read_int(&mut cursor)?);
                let message = read_string(&mut cursor)?;
                return Ok(Response::Error(ServerError { code, message }));
            }
            Opcode::Ready => Response::Ready,
            Opcode::Authenticate => Response::Authenticate(read_string(&mut cursor)?),
            Opcode::Supported => Response::Supported(read_string_multimap(&mut cursor)?),
            Opcode::AuthChallenge => {
                Response::AuthChallenge(read_bytes(&mut cursor)?.map(Bytes::copy_from_slice))
            }
            Opcode::AuthSuccess => {
                Response::AuthSuccess(read_bytes(&mut cursor)?.map(Bytes::copy_from_slice))
            }
            Opcode::Result => match read_int(&mut cursor)? {
                RESULT_VOID => Response::Void,
                RESULT_ROWS => Response::Rows(Rows::decode(&mut cursor)?),
                RESULT_SET_KEYSPACE => Response::SetKeyspace(read_string(&mut cursor)?),
                RESULT_SCHEMA_CHANGE => Response::SchemaChange(SchemaChange::decode(&mut cursor)?),
                RESULT_PREPARED => {
                    return Err(CqlError::protocol("prepared results are not supported"))
                }
                other => {
                    return Err(CqlError::protocol(format!(
                        "unknown result kind 0x{:04X}",
                        other
                    )))
                }
            },
            other => {
                return Err(CqlError::protocol(format!(
                    "{:?} is not a response opcode",
                    other
                )))
            }
        };

        if !cursor.is_empty() {
            return Err(CqlError::protocol(format!(
                "{} trailing bytes after {} body",
                cursor.len(),
                response.kind()
            )));
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role_columns() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::new("system_auth", "roles", "role", ColumnType::Text),
            ColumnSpec::new("system_auth", "roles", "can_login", ColumnType::Boolean),
            ColumnSpec::new(
                "system_auth",
                "roles",
                "member_of",
                ColumnType::Set(Box::new(ColumnType::Text)),
            ),
        ]
    }

    #[test]
    fn test_rows_round_trip_with_nulls() {
        let rows = Rows::new(
            role_columns(),
            vec![
                Row::new(vec![
                    Some(CqlValue::Text("admin".into())),
                    Some(CqlValue::Boolean(true)),
                    None,
                ]),
                Row::new(vec![
                    Some(CqlValue::Text("reader".into())),
                    None,
                    Some(CqlValue::Set(vec![CqlValue::Text("admin".into())])),
                ]),
            ],
        )
        .unwrap();
        let response = Response::Rows(rows);
        let body = response.encode_body().unwrap();
        assert_eq!(Response::decode_body(Opcode::Result, &body).unwrap(), response);
    }

    #[test]
    fn test_per_column_table_spec() {
        let columns = vec![
            ColumnSpec::new("ks", "a", "x", ColumnType::Int),
            ColumnSpec::new("ks", "b", "y", ColumnType::Int),
        ];
        let response = Response::Rows(Rows::new(columns, vec![]).unwrap());
        let body = response.encode_body().unwrap();
        assert_eq!(Response::decode_body(Opcode::Result, &body).unwrap(), response);
    }

    #[test]
    fn test_paging_state_carried() {
        let rows = Rows::new(role_columns(), vec![])
            .unwrap()
            .with_paging_state(Some(Bytes::from_static(b"page-2")));
        let body = Response::Rows(rows).encode_body().unwrap();
        match Response::decode_body(Opcode::Result, &body).unwrap() {
            Response::Rows(rows) => {
                assert_eq!(
                    rows.metadata.paging_state,
                    Some(Bytes::from_static(b"page-2"))
                );
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_mismatched_row_rejected() {
        assert!(Rows::new(role_columns(), vec![Row::new(vec![None])]).is_err());
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut body = Response::Void.encode_body().unwrap().to_vec();
        body.push(0);
        assert!(matches!(
            Response::decode_body(Opcode::Result, &body),
            Err(CqlError::Protocol(_))
        ));
    }

    #[test]
    fn test_error_tail_ignored() {
        let mut body = Response::error(DbErrorCode::Unavailable, "not enough replicas")
            .encode_body()
            .unwrap()
            .to_vec();
        // consistency, required, alive
        body.extend_from_slice(&[0, 4, 0, 0, 0, 3, 0, 0, 0, 1]);
        assert_eq!(
            Response::decode_body(Opcode::Error, &body).unwrap(),
            Response::error(DbErrorCode::Unavailable, "not enough replicas")
        );
    }

    #[test]
    fn test_prepared_and_no_metadata_rejected() {
        let prepared = RESULT_PREPARED.to_be_bytes();
        assert!(Response::decode_body(Opcode::Result, &prepared).is_err());

        let mut body = BytesMut::new();
        body.put_i32(RESULT_ROWS);
        body.put_i32(METADATA_NO_METADATA);
        body.put_i32(1);
        body.put_i32(0);
        assert!(Response::decode_body(Opcode::Result, &body).is_err());
    }

    #[test]
    fn test_bad_cell_names_column() {
        let mut body = BytesMut::new();
        body.put_i32(RESULT_ROWS);
        ResultMetadata::new(vec![ColumnSpec::new("ks", "t", "age", ColumnType::Int)])
            .encode(&mut body)
            .unwrap();
        body.put_i32(1);
        write_bytes(&mut body, Some(&[1u8, 2][..])).unwrap();
        match Response::decode_body(Opcode::Result, &body) {
            Err(CqlError::Protocol(msg)) => assert!(msg.contains("'age'"), "{}", msg),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_schema_change_targets() {
        let change = SchemaChange {
            change_type: "CREATED".into(),
            target: "FUNCTION".into(),
            keyspace: "ks".into(),
            name: Some("f".into()),
            arguments: vec!["int".into()],
        };
        let body = Response::SchemaChange(change.clone()).encode_body().unwrap();
        assert_eq!(
            Response::decode_body(Opcode::Result, &body).unwrap(),
            Response::SchemaChange(change)
        );
    }
}
