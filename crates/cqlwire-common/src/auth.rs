//! Authentication for the connection handshake
//!
//! When a node answers STARTUP with AUTHENTICATE, the driver must reply with
//! an AUTH_RESPONSE before the connection can carry queries.
//!
//! # Supported Mechanisms
//!
//! - **Password**: SASL PLAIN token `\0username\0password`, accepted by
//!   `PasswordAuthenticator` and compatible authenticators
//! - **TLS identity**: an empty token, for authenticators that derive the
//!   user from the client certificate presented during the TLS handshake
//!
//! PLAIN is single-step; an AUTH_CHALLENGE after the first response is
//! treated as a failure.
//!
//! # Example
//!
//! ```
//! use cqlwire_common::auth::{AuthConfig, Credentials, PASSWORD_AUTHENTICATOR};
//!
//! let auth = AuthConfig::with_credentials(Credentials::new("cassandra", "cassandra"));
//! let token = auth.initial_response(PASSWORD_AUTHENTICATOR).unwrap();
//! assert_eq!(&token[..], b"\0cassandra\0cassandra");
//!
//! assert!(AuthConfig::disabled().initial_response(PASSWORD_AUTHENTICATOR).is_err());
//! ```

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::protocol::error::{CqlError, Result};

pub const PASSWORD_AUTHENTICATOR: &str = "org.apache.cassandra.auth.PasswordAuthenticator";

/// Username and password for PLAIN authentication.
///
/// The password never appears in `Debug` or `Display` output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Encodes the SASL PLAIN token (empty authorization id).
    pub fn plain_token(&self) -> Bytes {
        let mut token = BytesMut::with_capacity(2 + self.username.len() + self.password.len());
        token.put_u8(0);
        token.extend_from_slice(self.username.as_bytes());
        token.put_u8(0);
        token.extend_from_slice(self.password.as_bytes());
        token.freeze()
    }

    /// Checks a PLAIN token against these credentials.
    ///
    /// The password comparison runs in constant time.
    pub fn matches_plain_token(&self, token: &[u8]) -> bool {
        let mut parts = token.splitn(3, |b| *b == 0);
        let (Some(_authzid), Some(user), Some(pass)) = (parts.next(), parts.next(), parts.next())
        else {
            return false;
        };
        let user_ok = user == self.username.as_bytes();
        let pass_ok = constant_time_eq(pass, self.password.as_bytes());
        user_ok & pass_ok
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"*****")
            .finish()
    }
}

impl fmt::Display for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:*****", self.username)
    }
}

/// How a connection answers an AUTHENTICATE challenge.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthConfig {
    credentials: Option<Credentials>,
    tls_identity: bool,
}

impl AuthConfig {
    pub fn with_credentials(credentials: Credentials) -> Self {
        Self {
            credentials: Some(credentials),
            tls_identity: false,
        }
    }

    /// No password; identity comes from the TLS client certificate.
    pub fn tls_identity() -> Self {
        Self {
            credentials: None,
            tls_identity: true,
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    /// Combines optional credentials with whether a client certificate is presented.
    pub fn from_parts(credentials: Option<Credentials>, tls_identity: bool) -> Self {
        Self {
            credentials,
            tls_identity,
        }
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn can_authenticate(&self) -> bool {
        self.credentials.is_some() || self.tls_identity
    }

    /// Builds the first AUTH_RESPONSE token for the named authenticator.
    ///
    /// Credentials take precedence over TLS identity.
    ///
    /// # Errors
    ///
    /// Returns `Authentication` if neither credentials nor a TLS client
    /// identity are configured.
    pub fn initial_response(&self, authenticator: &str) -> Result<Bytes> {
        match (&self.credentials, self.tls_identity) {
            (Some(credentials), _) => Ok(credentials.plain_token()),
            (None, true) => Ok(Bytes::new()),
            (None, false) => Err(CqlError::Authentication(format!(
                "server requires authentication ({}) but no credentials are configured",
                authenticator
            ))),
        }
    }
}

impl fmt::Display for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.credentials, self.tls_identity) {
            (Some(credentials), _) => write!(f, "Password({})", credentials),
            (None, true) => write!(f, "TlsIdentity"),
            (None, false) => write!(f, "Disabled"),
        }
    }
}

/// Compares two byte strings without short-circuiting on the first difference.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (byte_a, byte_b) in a.iter().zip(b.iter()) {
        result |= byte_a ^ byte_b;
    }

    result == 0
}
