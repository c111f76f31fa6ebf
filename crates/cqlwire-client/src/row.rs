//! Typed access to result rows
//!
//! A [`QueryResult`] holds the column metadata once and the rows that share
//! it. Rows are read through a [`RowView`], either cell by cell with
//! [`RowView::get`] or into a whole record implementing [`FromRow`].
//!
//! Null cells never decode to a zero value. A field must be `Option<T>` or
//! [`MaybeUnset<T>`] to accept a null; any other type fails with a decode
//! error naming the column.
//!
//! ```
//! use cqlwire_client::{impl_from_row, MaybeUnset, QueryResult};
//! use cqlwire_common::{ColumnSpec, ColumnType, CqlValue, Row};
//!
//! struct Role {
//!     role: String,
//!     can_login: bool,
//!     salted_hash: MaybeUnset<String>,
//! }
//! impl_from_row!(Role { role, can_login, salted_hash });
//!
//! let columns = vec![
//!     ColumnSpec::new("system", "roles", "role", ColumnType::Text),
//!     ColumnSpec::new("system", "roles", "can_login", ColumnType::Boolean),
//!     ColumnSpec::new("system", "roles", "salted_hash", ColumnType::Text),
//! ];
//! let rows = vec![Row::new(vec![
//!     Some(CqlValue::Text("cassandra".into())),
//!     Some(CqlValue::Boolean(true)),
//!     None,
//! ])];
//! let roles: Vec<Role> = QueryResult::new(columns, rows).rows_typed().unwrap();
//! assert_eq!(roles[0].role, "cassandra");
//! assert!(roles[0].salted_hash.is_unset());
//! ```

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::net::IpAddr;

use bytes::Bytes;
use cqlwire_common::{ColumnSpec, CqlError, CqlValue, Result, Row};
use uuid::Uuid;

/// Conversion from a single cell.
///
/// `None` is a null cell. Errors are a reason only; the caller attaches the
/// column name.
pub trait FromCqlValue: Sized {
    fn from_cql(value: Option<&CqlValue>) -> std::result::Result<Self, String>;
}

fn required(value: Option<&CqlValue>) -> std::result::Result<&CqlValue, String> {
    match value {
        None => Err("null value for a non-optional field".to_string()),
        Some(CqlValue::Empty) => Err("empty value".to_string()),
        Some(value) => Ok(value),
    }
}

fn mismatch(expected: &str, actual: &CqlValue) -> String {
    format!("cannot read {} as {}", actual.type_name(), expected)
}

macro_rules! from_cql {
    ($ty:ty, $expected:literal, $($pat:pat => $value:expr),+ $(,)?) => {
        impl FromCqlValue for $ty {
            fn from_cql(value: Option<&CqlValue>) -> std::result::Result<Self, String> {
                match required(value)? {
                    $($pat => Ok($value),)+
                    other => Err(mismatch($expected, other)),
                }
            }
        }
    };
}

from_cql!(String, "text", CqlValue::Text(s) | CqlValue::Ascii(s) => s.clone());
from_cql!(bool, "boolean", CqlValue::Boolean(b) => *b);
from_cql!(i8, "tinyint", CqlValue::Tinyint(v) => *v);
from_cql!(i16, "smallint",
    CqlValue::Smallint(v) => *v,
    CqlValue::Tinyint(v) => i16::from(*v),
);
from_cql!(i32, "int",
    CqlValue::Int(v) => *v,
    CqlValue::Smallint(v) => i32::from(*v),
    CqlValue::Tinyint(v) => i32::from(*v),
);
from_cql!(i64, "bigint",
    CqlValue::Bigint(v) | CqlValue::Counter(v) | CqlValue::Timestamp(v) | CqlValue::Time(v) => *v,
    CqlValue::Int(v) => i64::from(*v),
    CqlValue::Smallint(v) => i64::from(*v),
    CqlValue::Tinyint(v) => i64::from(*v),
);
from_cql!(u32, "date", CqlValue::Date(v) => *v);
from_cql!(f32, "float", CqlValue::Float(v) => *v);
from_cql!(f64, "double",
    CqlValue::Double(v) => *v,
    CqlValue::Float(v) => f64::from(*v),
);
from_cql!(Uuid, "uuid", CqlValue::Uuid(v) | CqlValue::Timeuuid(v) => *v);
from_cql!(IpAddr, "inet", CqlValue::Inet(v) => *v);
from_cql!(Bytes, "blob", CqlValue::Blob(v) | CqlValue::Custom(v) | CqlValue::Varint(v) => v.clone());

impl FromCqlValue for CqlValue {
    fn from_cql(value: Option<&CqlValue>) -> std::result::Result<Self, String> {
        value
            .cloned()
            .ok_or_else(|| "null value for a non-optional field".to_string())
    }
}

impl<T: FromCqlValue> FromCqlValue for Option<T> {
    fn from_cql(value: Option<&CqlValue>) -> std::result::Result<Self, String> {
        match value {
            None => Ok(None),
            Some(value) => T::from_cql(Some(value)).map(Some),
        }
    }
}

impl<T: FromCqlValue> FromCqlValue for Vec<T> {
    fn from_cql(value: Option<&CqlValue>) -> std::result::Result<Self, String> {
        match required(value)? {
            CqlValue::List(items) | CqlValue::Set(items) => items
                .iter()
                .map(|item| T::from_cql(Some(item)))
                .collect(),
            other => Err(mismatch("list", other)),
        }
    }
}

impl<K, V> FromCqlValue for HashMap<K, V>
where
    K: FromCqlValue + Eq + Hash,
    V: FromCqlValue,
{
    fn from_cql(value: Option<&CqlValue>) -> std::result::Result<Self, String> {
        match required(value)? {
            CqlValue::Map(entries) => entries
                .iter()
                .map(|(k, v)| Ok((K::from_cql(Some(k))?, V::from_cql(Some(v))?)))
                .collect(),
            other => Err(mismatch("map", other)),
        }
    }
}

impl<K, V> FromCqlValue for BTreeMap<K, V>
where
    K: FromCqlValue + Ord,
    V: FromCqlValue,
{
    fn from_cql(value: Option<&CqlValue>) -> std::result::Result<Self, String> {
        match required(value)? {
            CqlValue::Map(entries) => entries
                .iter()
                .map(|(k, v)| Ok((K::from_cql(Some(k))?, V::from_cql(Some(v))?)))
                .collect(),
            other => Err(mismatch("map", other)),
        }
    }
}

/// A field that may be absent from a row.
///
/// A null cell decodes to `Unset`; it is never confused with an empty
/// string, zero or an empty collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaybeUnset<T> {
    Unset,
    Set(T),
}

impl<T> Default for MaybeUnset<T> {
    fn default() -> Self {
        MaybeUnset::Unset
    }
}

impl<T> MaybeUnset<T> {
    pub fn is_unset(&self) -> bool {
        matches!(self, MaybeUnset::Unset)
    }

    pub fn as_ref(&self) -> Option<&T> {
        match self {
            MaybeUnset::Unset => None,
            MaybeUnset::Set(value) => Some(value),
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            MaybeUnset::Unset => None,
            MaybeUnset::Set(value) => Some(value),
        }
    }
}

impl<T: FromCqlValue> FromCqlValue for MaybeUnset<T> {
    fn from_cql(value: Option<&CqlValue>) -> std::result::Result<Self, String> {
        match value {
            None => Ok(MaybeUnset::Unset),
            Some(value) => T::from_cql(Some(value)).map(MaybeUnset::Set),
        }
    }
}

/// One row together with the column metadata of its result
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    columns: &'a [ColumnSpec],
    row: &'a Row,
}

impl<'a> RowView<'a> {
    pub fn new(columns: &'a [ColumnSpec], row: &'a Row) -> Self {
        Self { columns, row }
    }

    pub fn columns(&self) -> &'a [ColumnSpec] {
        self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// The raw cell of column `name`; `None` is a null cell.
    ///
    /// # Errors
    ///
    /// `SchemaMismatch` if the result has no such column.
    pub fn value(&self, name: &str) -> Result<Option<&'a CqlValue>> {
        let index = self
            .columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| CqlError::SchemaMismatch(name.to_string()))?;
        self.value_at(index)
    }

    pub fn value_at(&self, index: usize) -> Result<Option<&'a CqlValue>> {
        match (self.columns.get(index), self.row.cells.get(index)) {
            (Some(_), Some(cell)) => Ok(cell.as_ref()),
            _ => Err(CqlError::SchemaMismatch(format!("#{}", index))),
        }
    }

    /// Decodes column `name` as `T`.
    pub fn get<T: FromCqlValue>(&self, name: &str) -> Result<T> {
        let value = self.value(name)?;
        T::from_cql(value).map_err(|reason| CqlError::Decode {
            column: name.to_string(),
            reason,
        })
    }

    /// Decodes the column at `index` as `T`.
    pub fn get_by_index<T: FromCqlValue>(&self, index: usize) -> Result<T> {
        let value = self.value_at(index)?;
        T::from_cql(value).map_err(|reason| CqlError::Decode {
            column: self.columns[index].name.clone(),
            reason,
        })
    }
}

/// Conversion from a whole row.
///
/// Tuples map positionally; [`impl_from_row!`](crate::impl_from_row) maps
/// struct fields by column name.
pub trait FromRow: Sized {
    fn from_row(row: &RowView<'_>) -> Result<Self>;
}

macro_rules! tuple_from_row {
    ($($name:ident: $index:tt),+) => {
        impl<$($name: FromCqlValue),+> FromRow for ($($name,)+) {
            fn from_row(row: &RowView<'_>) -> Result<Self> {
                Ok(($(row.get_by_index::<$name>($index)?,)+))
            }
        }
    };
}

tuple_from_row!(A: 0);
tuple_from_row!(A: 0, B: 1);
tuple_from_row!(A: 0, B: 1, C: 2);
tuple_from_row!(A: 0, B: 1, C: 2, D: 3);
tuple_from_row!(A: 0, B: 1, C: 2, D: 3, E: 4);
tuple_from_row!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);

/// Implements [`FromRow`] for a struct whose fields are read by column name.
///
/// A field may name a different column with `field => "column"`. Columns
/// the struct does not mention are ignored.
///
/// ```
/// use cqlwire_client::impl_from_row;
///
/// struct Client {
///     address: std::net::IpAddr,
///     port: i32,
///     user: Option<String>,
/// }
/// impl_from_row!(Client { address, port, user => "username" });
/// ```
#[macro_export]
macro_rules! impl_from_row {
    ($ty:ident { $($field:ident $(=> $column:literal)?),* $(,)? }) => {
        impl $crate::row::FromRow for $ty {
            fn from_row(row: &$crate::row::RowView<'_>) -> $crate::Result<Self> {
                Ok(Self {
                    $($field: row.get($crate::impl_from_row!(@column $field $($column)?))?,)*
                })
            }
        }
    };
    (@column $field:ident $column:literal) => {
        $column
    };
    (@column $field:ident) => {
        stringify!($field)
    };
}

/// Rows returned by a query, all pages joined
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    columns: Vec<ColumnSpec>,
    rows: Vec<Row>,
    warnings: Vec<String>,
}

impl QueryResult {
    pub fn new(columns: Vec<ColumnSpec>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows,
            warnings: Vec::new(),
        }
    }

    /// A result with no columns, for statements that return nothing.
    pub fn void() -> Self {
        Self::default()
    }

    pub(crate) fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    /// Warnings the server attached to any page of this result
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = RowView<'_>> + '_ {
        self.rows.iter().map(|row| RowView::new(&self.columns, row))
    }

    /// Decodes every row as `T`, failing on the first row that does not fit.
    pub fn rows_typed<T: FromRow>(&self) -> Result<Vec<T>> {
        self.iter().map(|row| T::from_row(&row)).collect()
    }

    /// Decodes the first row, if any.
    pub fn first_row<T: FromRow>(&self) -> Result<Option<T>> {
        self.iter().next().map(|row| T::from_row(&row)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impl_from_row;
    use cqlwire_common::ColumnType;

    fn column(name: &str, typ: ColumnType) -> ColumnSpec {
        ColumnSpec::new("system", "roles", name, typ)
    }

    fn text(s: &str) -> Option<CqlValue> {
        Some(CqlValue::Text(s.to_string()))
    }

    #[derive(Debug, PartialEq)]
    struct Role {
        role: String,
        can_login: bool,
        is_superuser: Option<bool>,
        member_of: MaybeUnset<Vec<String>>,
        salted_hash: MaybeUnset<String>,
    }
    impl_from_row!(Role {
        role,
        can_login,
        is_superuser,
        member_of,
        salted_hash,
    });

    fn roles_result() -> QueryResult {
        let columns = vec![
            column("role", ColumnType::Text),
            column("can_login", ColumnType::Boolean),
            column("is_superuser", ColumnType::Boolean),
            column("member_of", ColumnType::Set(Box::new(ColumnType::Text))),
            column("salted_hash", ColumnType::Text),
            column("extra", ColumnType::Int),
        ];
        let rows = vec![
            Row::new(vec![
                text("cassandra"),
                Some(CqlValue::Boolean(true)),
                Some(CqlValue::Boolean(true)),
                None,
                text("$2a$10$abc"),
                Some(CqlValue::Int(7)),
            ]),
            Row::new(vec![
                text("reader"),
                Some(CqlValue::Boolean(false)),
                None,
                Some(CqlValue::Set(vec![CqlValue::Text("base".into())])),
                None,
                None,
            ]),
        ];
        QueryResult::new(columns, rows)
    }

    #[test]
    fn test_record_by_name_with_nulls() {
        let roles: Vec<Role> = roles_result().rows_typed().unwrap();
        assert_eq!(roles.len(), 2);
        assert_eq!(
            roles[0],
            Role {
                role: "cassandra".into(),
                can_login: true,
                is_superuser: Some(true),
                member_of: MaybeUnset::Unset,
                salted_hash: MaybeUnset::Set("$2a$10$abc".into()),
            }
        );
        assert_eq!(roles[1].is_superuser, None);
        assert_eq!(roles[1].member_of, MaybeUnset::Set(vec!["base".to_string()]));
        assert!(roles[1].salted_hash.is_unset());
    }

    #[test]
    fn test_null_into_required_field_names_column() {
        struct Strict {
            salted_hash: String,
        }
        impl_from_row!(Strict { salted_hash });

        let err = roles_result().rows_typed::<Strict>().err().unwrap();
        match err {
            CqlError::Decode { column, reason } => {
                assert_eq!(column, "salted_hash");
                assert!(reason.contains("null"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_type_mismatch_names_column() {
        struct Wrong {
            role: i32,
        }
        impl_from_row!(Wrong { role });

        match roles_result().rows_typed::<Wrong>() {
            Err(CqlError::Decode { column, reason }) => {
                assert_eq!(column, "role");
                assert_eq!(reason, "cannot read text as int");
            }
            other => panic!("unexpected result {:?}", other.map(|v| v.len())),
        }
    }

    #[test]
    fn test_missing_column_is_schema_mismatch() {
        struct Missing {
            #[allow(dead_code)]
            options: Option<String>,
        }
        impl_from_row!(Missing { options });

        assert!(matches!(
            roles_result().rows_typed::<Missing>(),
            Err(CqlError::SchemaMismatch(name)) if name == "options"
        ));
    }

    #[test]
    fn test_renamed_field() {
        struct Renamed {
            name: String,
        }
        impl_from_row!(Renamed { name => "role" });

        let first: Renamed = roles_result().first_row().unwrap().unwrap();
        assert_eq!(first.name, "cassandra");
    }

    #[test]
    fn test_positional_tuples() {
        let result = roles_result();
        let rows: Vec<(String, bool)> = result.rows_typed().unwrap();
        assert_eq!(rows[1], ("reader".to_string(), false));

        let too_wide = QueryResult::new(vec![column("a", ColumnType::Int)], vec![Row::new(vec![
            Some(CqlValue::Int(1)),
        ])]);
        assert!(matches!(
            too_wide.rows_typed::<(i32, i32)>(),
            Err(CqlError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_empty_is_not_null() {
        assert!(i32::from_cql(Some(&CqlValue::Empty)).is_err());
        assert!(Option::<i32>::from_cql(Some(&CqlValue::Empty)).is_err());
        assert_eq!(
            CqlValue::from_cql(Some(&CqlValue::Empty)).unwrap(),
            CqlValue::Empty
        );
        assert_eq!(Option::<i32>::from_cql(None).unwrap(), None);
        assert_eq!(MaybeUnset::<i32>::from_cql(None).unwrap(), MaybeUnset::Unset);
    }

    #[test]
    fn test_integer_widening() {
        assert_eq!(i64::from_cql(Some(&CqlValue::Int(5))).unwrap(), 5);
        assert_eq!(i32::from_cql(Some(&CqlValue::Tinyint(-3))).unwrap(), -3);
        assert!(i32::from_cql(Some(&CqlValue::Bigint(5))).is_err());
        assert_eq!(f64::from_cql(Some(&CqlValue::Float(1.5))).unwrap(), 1.5);
    }

    #[test]
    fn test_collections() {
        let map = CqlValue::Map(vec![
            (CqlValue::Text("a".into()), CqlValue::Int(1)),
            (CqlValue::Text("b".into()), CqlValue::Int(2)),
        ]);
        let decoded: BTreeMap<String, i32> = BTreeMap::from_cql(Some(&map)).unwrap();
        assert_eq!(decoded["b"], 2);
        let decoded: HashMap<String, i64> = HashMap::from_cql(Some(&map)).unwrap();
        assert_eq!(decoded.len(), 2);

        let list = CqlValue::List(vec![CqlValue::Text("x".into()), CqlValue::Int(1)]);
        assert_eq!(
            Vec::<String>::from_cql(Some(&list)).unwrap_err(),
            "cannot read int as text"
        );
    }

    #[test]
    fn test_row_count_matches() {
        let result = roles_result();
        assert_eq!(result.len(), 2);
        assert_eq!(result.iter().count(), 2);
        assert!(QueryResult::void().is_empty());
        assert!(QueryResult::void().first_row::<(i32,)>().unwrap().is_none());
    }
}
