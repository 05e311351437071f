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

//! Transport providers: one per layer of the upgrade chain.
//!
//! A provider owns a protocol id and the versions of it this side speaks,
//! and knows how to wrap a transport in its layer once both peers agreed on
//! its header. The ordered provider list on
//! [`AmqpSettings`](crate::negotiation::AmqpSettings) is the upgrade chain:
//! for `[Tls, Sasl, Amqp]` the initiator exchanges a TLS header and
//! handshakes, exchanges a SASL header and authenticates, then hands the
//! transport to the AMQP connection layer.
//!
//! | Provider                   | Protocol id | Upgrade                         |
//! |----------------------------|-------------|---------------------------------|
//! | [`TlsTransportProvider`]   | 2           | TLS handshake, [`Upgrade::Wrapped`] |
//! | [`SaslTransportProvider`]  | 3           | SASL exchange, [`Upgrade::Wrapped`] |
//! | [`AmqpTransportProvider`]  | 0           | none, [`Upgrade::Unchanged`]    |

mod amqp;
mod sasl;
#[cfg(feature = "tls")]
mod tls;

pub use amqp::AmqpTransportProvider;
pub use sasl::SaslTransportProvider;
#[cfg(feature = "tls")]
pub use tls::TlsTransportProvider;

use crate::buffer::{NoPool, SharedBufferPool};
use crate::error::AmqpError;
use crate::observability::{NegotiationRole, NoopObserver, SharedObserver};
use crate::protocol::{ProtocolHeader, ProtocolId, ProtocolVersion};
use crate::sasl::MAX_SASL_FRAME_SIZE;
use crate::transport::BoxedTransport;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Result of a provider's upgrade step.
pub enum Upgrade {
    /// The transport is final; negotiation ends here.
    Unchanged(BoxedTransport),
    /// The transport gained a layer; negotiation continues on it.
    Wrapped(BoxedTransport),
}

impl Upgrade {
    /// Returns the transport.
    pub fn into_transport(self) -> BoxedTransport {
        match self {
            Upgrade::Unchanged(transport) | Upgrade::Wrapped(transport) => transport,
        }
    }

    /// Returns `true` for [`Upgrade::Wrapped`].
    pub fn is_wrapped(&self) -> bool {
        matches!(self, Upgrade::Wrapped(_))
    }
}

impl fmt::Debug for Upgrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Upgrade::Unchanged(t) => write!(f, "Unchanged({})", t.kind()),
            Upgrade::Wrapped(t) => write!(f, "Wrapped({})", t.kind()),
        }
    }
}

/// Per-attempt settings a provider may need during its upgrade.
#[derive(Clone)]
pub struct UpgradeContext {
    /// Which side is upgrading
    pub role: NegotiationRole,
    /// Host name announced in `sasl-init`
    pub sasl_hostname: Option<String>,
    /// Largest SASL frame accepted from the peer
    pub max_sasl_frame_size: usize,
    /// Pool for scratch buffers
    pub buffer_pool: SharedBufferPool,
    /// Receives negotiation events
    pub observer: SharedObserver,
}

impl UpgradeContext {
    /// Creates a context for `role` with default settings.
    pub fn new(role: NegotiationRole) -> Self {
        Self {
            role,
            sasl_hostname: None,
            max_sasl_frame_size: MAX_SASL_FRAME_SIZE,
            buffer_pool: Arc::new(NoPool),
            observer: Arc::new(NoopObserver),
        }
    }

    /// Returns `true` on the initiator.
    pub fn is_initiator(&self) -> bool {
        self.role.is_initiator()
    }
}

impl fmt::Debug for UpgradeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpgradeContext")
            .field("role", &self.role)
            .field("sasl_hostname", &self.sasl_hostname)
            .field("max_sasl_frame_size", &self.max_sasl_frame_size)
            .finish()
    }
}

/// One layer of the upgrade chain.
///
/// Providers are immutable once placed in the settings and are shared by
/// every concurrent negotiation.
#[async_trait]
pub trait TransportProvider: Send + Sync + fmt::Debug {
    /// Protocol id this provider answers to.
    fn protocol_id(&self) -> ProtocolId;

    /// Supported versions, most preferred first. Never empty.
    fn versions(&self) -> &[ProtocolVersion];

    /// The version this side proposes.
    fn default_version(&self) -> ProtocolVersion {
        self.versions()
            .first()
            .copied()
            .unwrap_or(ProtocolVersion::V1_0_0)
    }

    /// The header this side proposes.
    fn default_header(&self) -> ProtocolHeader {
        ProtocolHeader::new(self.protocol_id(), self.default_version())
    }

    /// Returns `true` if `version` is supported.
    fn supports(&self, version: ProtocolVersion) -> bool {
        self.versions().contains(&version)
    }

    /// The version to answer a peer that asked for `requested`: the highest
    /// supported version not above it, else the default.
    fn closest_version(&self, requested: ProtocolVersion) -> ProtocolVersion {
        self.versions()
            .iter()
            .copied()
            .filter(|v| *v <= requested)
            .max()
            .unwrap_or_else(|| self.default_version())
    }

    /// Returns `true` for the provider that ends the chain.
    fn is_terminal(&self) -> bool {
        false
    }

    /// Adds this provider's layer to `transport`.
    ///
    /// On failure the provider has already aborted `transport`.
    async fn upgrade(
        &self,
        transport: BoxedTransport,
        context: &UpgradeContext,
    ) -> Result<Upgrade, AmqpError>;
}

/// Shared handle to a provider.
pub type SharedProvider = Arc<dyn TransportProvider>;

/// Aborts `transport` and returns an [`AmqpError::InvalidOperation`].
pub(crate) fn refuse(transport: BoxedTransport, reason: String) -> AmqpError {
    transport.abort();
    AmqpError::invalid_operation(reason)
}
