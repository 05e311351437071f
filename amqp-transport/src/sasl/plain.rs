//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! The `PLAIN` mechanism (RFC 4616).
//!
//! The initial response is `authzid NUL authcid NUL passwd`. The acceptor
//! checks the shape of the message itself and hands well-formed credentials
//! to a [`PlainAuthenticator`].
//!
//! # Example
//!
//! ```rust
//! use amqp_transport::sasl::{PlainHandler, StaticCredentials};
//! use std::sync::Arc;
//!
//! // Initiator side
//! let client = PlainHandler::client("alice", "secret");
//!
//! // Acceptor side
//! let users = StaticCredentials::new().with_user("alice", "secret");
//! let server = PlainHandler::server(Arc::new(users));
//! ```

use super::handler::{SaslContext, SaslHandler, SaslStep};
use super::performative::{SaslCode, SaslInit};
use crate::error::AmqpError;
use crate::transport::Principal;
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Verifies `PLAIN` credentials on the acceptor.
#[async_trait]
pub trait PlainAuthenticator: Send + Sync {
    /// Returns the authenticated principal, or
    /// [`AmqpError::Unauthorized`] if the credentials are rejected.
    async fn authenticate(&self, username: &str, password: &str) -> Result<Principal, AmqpError>;
}

/// An in-memory username/password table.
#[derive(Clone, Default)]
pub struct StaticCredentials {
    users: HashMap<String, String>,
}

impl StaticCredentials {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a user.
    pub fn with_user(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.users.insert(username.into(), password.into());
        self
    }
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("users", &self.users.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl PlainAuthenticator for StaticCredentials {
    async fn authenticate(&self, username: &str, password: &str) -> Result<Principal, AmqpError> {
        match self.users.get(username) {
            Some(expected) if expected == password => {
                Ok(Principal::new(username, PlainHandler::MECHANISM))
            }
            _ => Err(AmqpError::unauthorized(format!(
                "invalid credentials for {username}"
            ))),
        }
    }
}

#[derive(Clone)]
enum Role {
    Client {
        authzid: String,
        username: String,
        password: String,
    },
    Server {
        authenticator: Arc<dyn PlainAuthenticator>,
    },
}

/// `PLAIN`: username and password in the clear.
///
/// Only use it over an encrypted transport.
#[derive(Clone)]
pub struct PlainHandler {
    role: Role,
    principal: Option<Principal>,
}

impl PlainHandler {
    /// Mechanism name.
    pub const MECHANISM: &'static str = "PLAIN";

    /// Creates an initiator handler.
    pub fn client(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::client_with_authzid("", username, password)
    }

    /// Creates an initiator handler that also asks to act as `authzid`.
    pub fn client_with_authzid(
        authzid: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Client {
                authzid: authzid.into(),
                username: username.into(),
                password: password.into(),
            },
            principal: None,
        }
    }

    /// Creates an acceptor handler backed by `authenticator`.
    pub fn server(authenticator: Arc<dyn PlainAuthenticator>) -> Self {
        Self {
            role: Role::Server { authenticator },
            principal: None,
        }
    }

    fn encode_response(authzid: &str, username: &str, password: &str) -> Bytes {
        let mut buf = BytesMut::with_capacity(authzid.len() + username.len() + password.len() + 2);
        buf.put_slice(authzid.as_bytes());
        buf.put_u8(0);
        buf.put_slice(username.as_bytes());
        buf.put_u8(0);
        buf.put_slice(password.as_bytes());
        buf.freeze()
    }
}

/// Splits `authzid NUL authcid NUL passwd`.
fn parse_response(response: &[u8]) -> Result<(&str, &str, &str), AmqpError> {
    let fields: Vec<&[u8]> = response.split(|b| *b == 0).collect();
    let [authzid, authcid, password] = fields.as_slice() else {
        return Err(AmqpError::unauthorized(format!(
            "PLAIN response has {} fields, expected 3",
            fields.len()
        )));
    };
    if authcid.is_empty() {
        return Err(AmqpError::unauthorized("PLAIN response has an empty username"));
    }

    Ok((utf8(*authzid)?, utf8(*authcid)?, utf8(*password)?))
}

fn utf8(bytes: &[u8]) -> Result<&str, AmqpError> {
    std::str::from_utf8(bytes).map_err(|_| AmqpError::unauthorized("PLAIN response is not valid UTF-8"))
}

#[async_trait]
impl SaslHandler for PlainHandler {
    fn mechanism(&self) -> &str {
        Self::MECHANISM
    }

    fn clone_handler(&self) -> Box<dyn SaslHandler> {
        Box::new(Self {
            role: self.role.clone(),
            principal: None,
        })
    }

    async fn on_start(
        &mut self,
        context: &SaslContext,
        init: Option<&SaslInit>,
    ) -> Result<SaslStep, AmqpError> {
        match (&self.role, context.is_initiator) {
            (
                Role::Client {
                    authzid,
                    username,
                    password,
                },
                true,
            ) => Ok(SaslStep::Init {
                initial_response: Some(Self::encode_response(authzid, username, password)),
            }),
            (Role::Server { authenticator }, false) => {
                let response = init
                    .and_then(|i| i.initial_response.as_deref())
                    .ok_or_else(|| AmqpError::unauthorized("PLAIN requires an initial response"))?;
                let (authzid, username, password) = parse_response(response)?;
                if !authzid.is_empty() && authzid != username {
                    return Err(AmqpError::unauthorized(format!(
                        "{username} may not act as {authzid}"
                    )));
                }

                let principal = authenticator.authenticate(username, password).await?;
                debug!(%principal, "PLAIN authentication succeeded");
                self.principal = Some(principal);
                Ok(SaslStep::Complete(SaslCode::Ok))
            }
            (Role::Client { .. }, false) => Err(AmqpError::invalid_operation(
                "PLAIN client handler registered on an acceptor",
            )),
            (Role::Server { .. }, true) => Err(AmqpError::invalid_operation(
                "PLAIN server handler registered on an initiator",
            )),
        }
    }

    fn principal(&self) -> Option<Principal> {
        self.principal.clone()
    }
}

impl fmt::Debug for PlainHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = match &self.role {
            Role::Client { username, .. } => format!("client({username})"),
            Role::Server { .. } => "server".to_string(),
        };
        f.debug_struct("PlainHandler")
            .field("role", &role)
            .field("principal", &self.principal)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        inner: StaticCredentials,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PlainAuthenticator for Counting {
        async fn authenticate(&self, username: &str, password: &str) -> Result<Principal, AmqpError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.authenticate(username, password).await
        }
    }

    fn server() -> (PlainHandler, Arc<Counting>) {
        let counting = Arc::new(Counting {
            inner: StaticCredentials::new().with_user("alice", "alice"),
            calls: AtomicUsize::new(0),
        });
        (PlainHandler::server(counting.clone()), counting)
    }

    fn init(response: &'static [u8]) -> SaslInit {
        SaslInit {
            mechanism: "PLAIN".to_string(),
            initial_response: Some(Bytes::from_static(response)),
            hostname: None,
        }
    }

    #[tokio::test]
    async fn test_client_encodes_response() {
        let mut handler = PlainHandler::client("alice", "secret");
        let context = SaslContext {
            is_initiator: true,
            ..SaslContext::default()
        };
        let step = handler.on_start(&context, None).await.unwrap();
        assert_eq!(
            step,
            SaslStep::Init {
                initial_response: Some(Bytes::from_static(b"\0alice\0secret"))
            }
        );
    }

    #[tokio::test]
    async fn test_valid_credentials() {
        let (handler, counting) = server();
        let mut handler = handler.clone_handler();
        let step = handler
            .on_start(&SaslContext::default(), Some(&init(b"\0alice\0alice")))
            .await
            .unwrap();
        assert_eq!(step, SaslStep::Complete(SaslCode::Ok));
        assert_eq!(handler.principal().unwrap().name(), "alice");
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wrong_password() {
        let (mut handler, counting) = server();
        let error = handler
            .on_start(&SaslContext::default(), Some(&init(b"\0alice\0bob")))
            .await
            .unwrap_err();
        assert!(error.is_unauthorized());
        assert!(handler.principal().is_none());
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_malformed_response_skips_authenticator() {
        for response in [&b"\0onlytwo"[..], b"alice\0alice", b"\0\0pw", b"a\0b\0c\0d"] {
            let (mut handler, counting) = server();
            let init = SaslInit {
                mechanism: "PLAIN".to_string(),
                initial_response: Some(Bytes::copy_from_slice(response)),
                hostname: None,
            };
            let error = handler
                .on_start(&SaslContext::default(), Some(&init))
                .await
                .unwrap_err();
            assert!(error.is_unauthorized(), "{response:?}");
            assert_eq!(counting.calls.load(Ordering::SeqCst), 0, "{response:?}");
        }
    }

    #[tokio::test]
    async fn test_foreign_authzid_rejected() {
        let (mut handler, counting) = server();
        let error = handler
            .on_start(&SaslContext::default(), Some(&init(b"root\0alice\0alice")))
            .await
            .unwrap_err();
        assert!(error.is_unauthorized());
        assert_eq!(counting.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_role_mismatch() {
        let mut handler = PlainHandler::client("alice", "secret");
        let error = handler
            .on_start(&SaslContext::default(), Some(&init(b"\0alice\0alice")))
            .await
            .unwrap_err();
        assert!(matches!(error, AmqpError::InvalidOperation { .. }));
    }
}
