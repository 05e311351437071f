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

//! The `EXTERNAL` mechanism (RFC 4422 appendix A).

use super::handler::{SaslContext, SaslHandler, SaslStep};
use super::performative::{SaslCode, SaslInit};
use crate::error::AmqpError;
use crate::transport::Principal;
use async_trait::async_trait;
use tracing::debug;

/// `EXTERNAL`: identity established outside SASL, usually by a TLS client
/// certificate.
///
/// The acceptor completes with [`SaslCode::Ok`] unconditionally. It does not
/// check that the transport underneath actually authenticated the peer, so
/// only register it where the listener's TLS configuration requires client
/// certificates.
///
/// The resulting principal takes its name from the transport underneath
/// when it has one, otherwise from the authorization identity the initiator
/// sent, otherwise it is empty.
#[derive(Debug, Clone, Default)]
pub struct ExternalHandler {
    authzid: Option<String>,
    principal: Option<Principal>,
}

impl ExternalHandler {
    /// Mechanism name.
    pub const MECHANISM: &'static str = "EXTERNAL";

    /// Creates a handler with no authorization identity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an initiator handler that asks to act as `authzid`.
    pub fn with_authzid(authzid: impl Into<String>) -> Self {
        Self {
            authzid: Some(authzid.into()),
            principal: None,
        }
    }
}

#[async_trait]
impl SaslHandler for ExternalHandler {
    fn mechanism(&self) -> &str {
        Self::MECHANISM
    }

    fn clone_handler(&self) -> Box<dyn SaslHandler> {
        Box::new(Self {
            authzid: self.authzid.clone(),
            principal: None,
        })
    }

    async fn on_start(
        &mut self,
        context: &SaslContext,
        init: Option<&SaslInit>,
    ) -> Result<SaslStep, AmqpError> {
        if context.is_initiator {
            return Ok(SaslStep::Init {
                initial_response: self.authzid.clone().map(Into::into),
            });
        }

        let requested = init
            .and_then(|i| i.initial_response.as_deref())
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
            .filter(|authzid| !authzid.is_empty());
        let name = match (&context.inner_principal, requested) {
            (Some(inner), _) => inner.name().to_string(),
            (None, Some(authzid)) => authzid.to_string(),
            (None, None) => String::new(),
        };
        debug!(principal = %name, secure = context.inner_secure, "EXTERNAL login accepted");

        self.principal = Some(Principal::new(name, Self::MECHANISM));
        Ok(SaslStep::Complete(SaslCode::Ok))
    }

    fn principal(&self) -> Option<Principal> {
        self.principal.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn init(response: Option<&'static [u8]>) -> SaslInit {
        SaslInit {
            mechanism: ExternalHandler::MECHANISM.to_string(),
            initial_response: response.map(Bytes::from_static),
            hostname: None,
        }
    }

    #[tokio::test]
    async fn test_inner_principal_wins() {
        let mut handler = ExternalHandler::new();
        let context = SaslContext {
            inner_secure: true,
            inner_principal: Some(Principal::new("CN=client", "TLS")),
            ..SaslContext::default()
        };
        let step = handler
            .on_start(&context, Some(&init(Some(b"other"))))
            .await
            .unwrap();
        assert_eq!(step, SaslStep::Complete(SaslCode::Ok));

        let principal = handler.principal().unwrap();
        assert_eq!(principal.name(), "CN=client");
        assert_eq!(principal.mechanism(), "EXTERNAL");
    }

    #[tokio::test]
    async fn test_accepts_unconditionally() {
        let mut handler = ExternalHandler::new();
        let step = handler
            .on_start(&SaslContext::default(), Some(&init(None)))
            .await
            .unwrap();
        assert_eq!(step, SaslStep::Complete(SaslCode::Ok));
        assert_eq!(handler.principal().unwrap().name(), "");
    }

    #[tokio::test]
    async fn test_requested_authzid() {
        let mut handler = ExternalHandler::new();
        handler
            .on_start(&SaslContext::default(), Some(&init(Some(b"svc-ingest"))))
            .await
            .unwrap();
        assert_eq!(handler.principal().unwrap().name(), "svc-ingest");
    }

    #[test]
    fn test_clone_drops_principal() {
        let handler = ExternalHandler {
            authzid: None,
            principal: Some(Principal::new("x", "EXTERNAL")),
        };
        assert!(handler.clone_handler().principal().is_none());
    }
}
