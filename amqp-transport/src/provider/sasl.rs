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

use super::{TransportProvider, Upgrade, UpgradeContext, refuse};
use crate::error::AmqpError;
use crate::protocol::{ProtocolId, ProtocolVersion};
use crate::sasl::{MechanismRegistry, SaslHandler, SaslNegotiator};
use crate::transport::{BoxedTransport, TransportKind};
use async_trait::async_trait;
use std::sync::Arc;

/// Adds a SASL layer by running a full SASL exchange.
///
/// Mechanisms are added while building the provider and are fixed once it
/// is shared. Registration order is preference order.
///
/// # Example
///
/// ```rust
/// use amqp_transport::provider::SaslTransportProvider;
/// use amqp_transport::sasl::{AnonymousHandler, ExternalHandler};
///
/// let provider = SaslTransportProvider::new()
///     .with_handler(ExternalHandler::new())
///     .with_handler(AnonymousHandler::new());
/// assert_eq!(provider.mechanisms().names(), vec!["EXTERNAL", "ANONYMOUS"]);
/// ```
#[derive(Debug, Clone)]
pub struct SaslTransportProvider {
    mechanisms: Arc<MechanismRegistry>,
    versions: Vec<ProtocolVersion>,
}

impl SaslTransportProvider {
    /// Creates a provider with no mechanisms.
    pub fn new() -> Self {
        Self {
            mechanisms: Arc::new(MechanismRegistry::new()),
            versions: vec![ProtocolVersion::V1_0_0],
        }
    }

    /// Adds a mechanism.
    pub fn with_handler(mut self, handler: impl SaslHandler + 'static) -> Self {
        self.add_handler(Box::new(handler));
        self
    }

    /// Adds a mechanism, replacing any handler with the same name.
    pub fn add_handler(&mut self, handler: Box<dyn SaslHandler>) {
        Arc::make_mut(&mut self.mechanisms).add(handler);
    }

    /// Replaces the supported versions; the first is the default.
    pub fn with_versions(mut self, versions: Vec<ProtocolVersion>) -> Self {
        self.versions = versions;
        self
    }

    /// The registered mechanisms.
    pub fn mechanisms(&self) -> &MechanismRegistry {
        &self.mechanisms
    }
}

impl Default for SaslTransportProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportProvider for SaslTransportProvider {
    fn protocol_id(&self) -> ProtocolId {
        ProtocolId::Sasl
    }

    fn versions(&self) -> &[ProtocolVersion] {
        &self.versions
    }

    async fn upgrade(
        &self,
        transport: BoxedTransport,
        context: &UpgradeContext,
    ) -> Result<Upgrade, AmqpError> {
        if transport.kind() == TransportKind::Sasl {
            return Err(refuse(transport, "transport is already SASL authenticated".to_string()));
        }

        let hostname = if context.is_initiator() {
            context.sasl_hostname.clone()
        } else {
            None
        };
        let negotiator = SaslNegotiator::new(context.role, Arc::clone(&self.mechanisms))
            .with_hostname(hostname)
            .with_max_frame_size(context.max_sasl_frame_size)
            .with_buffer_pool(Arc::clone(&context.buffer_pool))
            .with_observer(Arc::clone(&context.observer));

        let sasl = negotiator.negotiate(transport).await?;
        Ok(Upgrade::Wrapped(Box::new(sasl)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::{NegotiationMetrics, NegotiationRole};
    use crate::sasl::{AnonymousHandler, PlainHandler, SaslTransport, StaticCredentials};
    use crate::transport::{MemoryTransport, Transport};

    #[tokio::test]
    async fn test_upgrade_wraps_in_sasl() {
        let client = SaslTransportProvider::new().with_handler(PlainHandler::client("alice", "pw"));
        let server = SaslTransportProvider::new().with_handler(PlainHandler::server(Arc::new(
            StaticCredentials::new().with_user("alice", "pw"),
        )));
        let metrics = Arc::new(NegotiationMetrics::new());
        let acceptor = UpgradeContext {
            observer: metrics.clone(),
            ..UpgradeContext::new(NegotiationRole::Acceptor)
        };
        let initiator = UpgradeContext::new(NegotiationRole::Initiator);

        let (a, b) = MemoryTransport::pair_default();
        let (client_result, server_result) = tokio::join!(
            client.upgrade(Box::new(a), &initiator),
            server.upgrade(Box::new(b), &acceptor),
        );

        assert!(client_result.unwrap().is_wrapped());
        let server = server_result.unwrap().into_transport();
        assert_eq!(server.kind(), TransportKind::Sasl);
        assert_eq!(server.principal().unwrap().name(), "alice");
        assert_eq!(metrics.sasl_ok(), 1);
    }

    #[tokio::test]
    async fn test_refuses_double_wrap() {
        let provider = SaslTransportProvider::new().with_handler(AnonymousHandler::new());
        let (a, _b) = MemoryTransport::pair_default();
        let already = SaslTransport::new(Box::new(a), "ANONYMOUS", None);

        let error = provider
            .upgrade(
                Box::new(already),
                &UpgradeContext::new(NegotiationRole::Initiator),
            )
            .await
            .unwrap_err();
        assert!(matches!(error, AmqpError::InvalidOperation { .. }));
    }

    #[test]
    fn test_clone_keeps_mechanisms_independent() {
        let base = SaslTransportProvider::new().with_handler(AnonymousHandler::new());
        let mut extended = base.clone();
        extended.add_handler(Box::new(PlainHandler::client("a", "b")));

        assert_eq!(base.mechanisms().len(), 1);
        assert_eq!(extended.mechanisms().len(), 2);
    }
}
