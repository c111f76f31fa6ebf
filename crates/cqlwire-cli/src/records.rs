//! Typed records for the system tables the CLI lists.

use std::net::IpAddr;

use cqlwire_client::impl_from_row;
use serde::Serialize;

pub const ROLES_QUERY: &str =
    "SELECT role, can_login, is_superuser, member_of, salted_hash FROM system.roles";

pub const CLIENTS_QUERY: &str =
    "SELECT address, port, username, driver_name, driver_version FROM system.clients";

/// A row of `system.roles`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Role {
    pub role: String,
    pub can_login: bool,
    pub is_superuser: bool,
    pub member_of: Option<Vec<String>>,
    pub salted_hash: Option<String>,
}
impl_from_row!(Role {
    role,
    can_login,
    is_superuser,
    member_of,
    salted_hash,
});

/// A row of `system.clients`.
///
/// Connections that have not authenticated yet report no username, and
/// drivers are free to leave out their name and version.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectedClient {
    pub address: IpAddr,
    pub port: i32,
    pub username: Option<String>,
    pub driver_name: Option<String>,
    pub driver_version: Option<String>,
}
impl_from_row!(ConnectedClient {
    address,
    port,
    username,
    driver_name,
    driver_version,
});

#[cfg(test)]
mod tests {
    use super::*;
    use cqlwire_client::{FromRow, RowView};
    use cqlwire_common::{ColumnSpec, ColumnType, CqlError, CqlValue, Row};

    fn text(value: &str) -> Option<CqlValue> {
        Some(CqlValue::Text(value.to_string()))
    }

    fn role_columns() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::new("system", "roles", "role", ColumnType::Text),
            ColumnSpec::new("system", "roles", "can_login", ColumnType::Boolean),
            ColumnSpec::new("system", "roles", "is_superuser", ColumnType::Boolean),
            ColumnSpec::new("system", "roles", "member_of", ColumnType::Set(Box::new(ColumnType::Text))),
            ColumnSpec::new("system", "roles", "salted_hash", ColumnType::Text),
        ]
    }

    #[test]
    fn test_role_from_row() {
        let columns = role_columns();
        let row = Row::new(vec![
            text("app"),
            Some(CqlValue::Boolean(true)),
            Some(CqlValue::Boolean(false)),
            Some(CqlValue::Set(vec![CqlValue::Text("reader".to_string())])),
            None,
        ]);
        let role = Role::from_row(&RowView::new(&columns, &row)).unwrap();
        assert_eq!(
            role,
            Role {
                role: "app".to_string(),
                can_login: true,
                is_superuser: false,
                member_of: Some(vec!["reader".to_string()]),
                salted_hash: None,
            }
        );
    }

    #[test]
    fn test_role_null_flag_is_decode_error() {
        let columns = role_columns();
        let row = Row::new(vec![text("app"), None, Some(CqlValue::Boolean(false)), None, None]);
        match Role::from_row(&RowView::new(&columns, &row)) {
            Err(CqlError::Decode { column, .. }) => assert_eq!(column, "can_login"),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_connected_client_from_row() {
        let columns = vec![
            ColumnSpec::new("system", "clients", "address", ColumnType::Inet),
            ColumnSpec::new("system", "clients", "port", ColumnType::Int),
            ColumnSpec::new("system", "clients", "username", ColumnType::Text),
            ColumnSpec::new("system", "clients", "driver_name", ColumnType::Text),
            ColumnSpec::new("system", "clients", "driver_version", ColumnType::Text),
        ];
        let row = Row::new(vec![
            Some(CqlValue::Inet("10.0.0.7".parse().unwrap())),
            Some(CqlValue::Int(50122)),
            text("cassandra"),
            text("cqlwire"),
            None,
        ]);
        let client = ConnectedClient::from_row(&RowView::new(&columns, &row)).unwrap();
        assert_eq!(client.address, "10.0.0.7".parse::<IpAddr>().unwrap());
        assert_eq!(client.port, 50122);
        assert_eq!(client.driver_name.as_deref(), Some("cqlwire"));
        assert!(client.driver_version.is_none());
    }
}
