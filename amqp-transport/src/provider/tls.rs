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
use crate::transport::{BoxedTransport, TlsConfig, TlsTransport, TransportKind};
use async_trait::async_trait;
use tracing::debug;

/// Adds a TLS layer.
///
/// Only wraps transports of the expected kind (TCP unless configured
/// otherwise) and never wraps a TLS transport a second time. The handshake
/// role follows the side: initiators need a client [`TlsConfig`], acceptors
/// a server one.
///
/// # Example
///
/// ```rust,no_run
/// use amqp_transport::provider::TlsTransportProvider;
/// use amqp_transport::transport::TlsConfig;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let provider = TlsTransportProvider::new(TlsConfig::client_default("broker.example.com")?);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TlsTransportProvider {
    config: TlsConfig,
    expected_inner: TransportKind,
    versions: Vec<ProtocolVersion>,
}

impl TlsTransportProvider {
    /// Creates a provider that wraps TCP transports.
    pub fn new(config: TlsConfig) -> Self {
        Self {
            config,
            expected_inner: TransportKind::Tcp,
            versions: vec![ProtocolVersion::V1_0_0],
        }
    }

    /// Wraps transports of `kind` instead of TCP.
    pub fn with_expected_inner(mut self, kind: TransportKind) -> Self {
        self.expected_inner = kind;
        self
    }

    /// Replaces the supported versions; the first is the default.
    pub fn with_versions(mut self, versions: Vec<ProtocolVersion>) -> Self {
        self.versions = versions;
        self
    }

    /// The TLS configuration.
    pub fn config(&self) -> &TlsConfig {
        &self.config
    }
}

#[async_trait]
impl TransportProvider for TlsTransportProvider {
    fn protocol_id(&self) -> ProtocolId {
        ProtocolId::Tls
    }

    fn versions(&self) -> &[ProtocolVersion] {
        &self.versions
    }

    async fn upgrade(
        &self,
        transport: BoxedTransport,
        context: &UpgradeContext,
    ) -> Result<Upgrade, AmqpError> {
        let kind = transport.kind();
        if kind == TransportKind::Tls {
            return Err(refuse(transport, "transport is already TLS".to_string()));
        }
        if kind != self.expected_inner {
            return Err(refuse(
                transport,
                format!("TLS expects a {} transport, got {kind}", self.expected_inner),
            ));
        }
        if self.config.is_client() != context.is_initiator() {
            return Err(refuse(
                transport,
                format!("TLS configuration does not match the {} role", context.role),
            ));
        }

        debug!(transport_id = %transport.metadata().id, role = %context.role, "starting TLS handshake");
        let tls = if context.is_initiator() {
            TlsTransport::connect(transport, &self.config).await?
        } else {
            TlsTransport::accept(transport, &self.config).await?
        };
        Ok(Upgrade::Wrapped(Box::new(tls)))
    }
}
