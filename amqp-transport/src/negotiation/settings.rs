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

//! Negotiation settings.

use crate::buffer::{NoPool, SharedBufferPool};
use crate::error::AmqpError;
use crate::observability::{NegotiationRole, SharedObserver, TracingObserver};
use crate::protocol::ProtocolId;
use crate::provider::{SharedProvider, TransportProvider, UpgradeContext};
use crate::sasl::MAX_SASL_FRAME_SIZE;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Smallest SASL frame size a peer is allowed to negotiate down to.
const MIN_SASL_FRAME_SIZE: usize = 512;

/// Serializable negotiation options.
///
/// # Examples
///
/// ```rust
/// use amqp_transport::negotiation::NegotiationOptions;
/// use std::time::Duration;
///
/// let options = NegotiationOptions::default()
///     .with_require_secure_transport(true)
///     .with_negotiation_timeout(Some(Duration::from_secs(10)));
/// assert!(!options.allow_anonymous_connection);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationOptions {
    /// Acceptor: reject connections that did not end up encrypted.
    ///
    /// Default: false
    pub require_secure_transport: bool,

    /// Acceptor: accept connections whose peer did not authenticate.
    ///
    /// Default: false
    pub allow_anonymous_connection: bool,

    /// Bound on the whole negotiation, from the first header to the
    /// negotiated transport. `None` disables it.
    ///
    /// Default: 60 seconds
    pub negotiation_timeout: Option<Duration>,

    /// Initiator: host name announced in `sasl-init`.
    ///
    /// Default: None
    pub sasl_hostname: Option<String>,

    /// Largest SASL frame accepted from the peer.
    ///
    /// Default: 64 KiB
    pub max_sasl_frame_size: usize,
}

impl Default for NegotiationOptions {
    fn default() -> Self {
        Self {
            require_secure_transport: false,
            allow_anonymous_connection: false,
            negotiation_timeout: Some(Duration::from_secs(60)),
            sasl_hostname: None,
            max_sasl_frame_size: MAX_SASL_FRAME_SIZE,
        }
    }
}

impl NegotiationOptions {
    /// Sets [`require_secure_transport`](Self::require_secure_transport).
    pub fn with_require_secure_transport(mut self, require: bool) -> Self {
        self.require_secure_transport = require;
        self
    }

    /// Sets [`allow_anonymous_connection`](Self::allow_anonymous_connection).
    pub fn with_allow_anonymous_connection(mut self, allow: bool) -> Self {
        self.allow_anonymous_connection = allow;
        self
    }

    /// Sets [`negotiation_timeout`](Self::negotiation_timeout).
    pub fn with_negotiation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.negotiation_timeout = timeout;
        self
    }

    /// Sets [`sasl_hostname`](Self::sasl_hostname).
    pub fn with_sasl_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.sasl_hostname = Some(hostname.into());
        self
    }

    /// Sets [`max_sasl_frame_size`](Self::max_sasl_frame_size).
    pub fn with_max_sasl_frame_size(mut self, size: usize) -> Self {
        self.max_sasl_frame_size = size;
        self
    }
}

/// Everything a negotiation needs: the upgrade chain plus its options and
/// injected services.
///
/// Providers are listed in upgrade order and the list must end with the
/// terminal AMQP provider. Settings are shared read-only by every
/// negotiation started from them.
///
/// # Examples
///
/// ```rust
/// use amqp_transport::negotiation::AmqpSettings;
/// use amqp_transport::provider::{AmqpTransportProvider, SaslTransportProvider};
/// use amqp_transport::sasl::AnonymousHandler;
///
/// let settings = AmqpSettings::new()
///     .with_provider(SaslTransportProvider::new().with_handler(AnonymousHandler::new()))
///     .with_provider(AmqpTransportProvider::new());
/// assert!(settings.validate().is_ok());
/// ```
#[derive(Clone)]
pub struct AmqpSettings {
    /// Upgrade chain, in order
    pub providers: Vec<SharedProvider>,
    /// Policy and limits
    pub options: NegotiationOptions,
    /// Pool for scratch buffers
    pub buffer_pool: SharedBufferPool,
    /// Receives negotiation events
    pub observer: SharedObserver,
}

impl Default for AmqpSettings {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            options: NegotiationOptions::default(),
            buffer_pool: Arc::new(NoPool),
            observer: Arc::new(TracingObserver),
        }
    }
}

impl AmqpSettings {
    /// Creates settings with no providers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a provider to the chain.
    pub fn with_provider(self, provider: impl TransportProvider + 'static) -> Self {
        self.with_shared_provider(Arc::new(provider))
    }

    /// Appends an already shared provider to the chain.
    pub fn with_shared_provider(mut self, provider: SharedProvider) -> Self {
        self.providers.push(provider);
        self
    }

    /// Replaces the options.
    pub fn with_options(mut self, options: NegotiationOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the buffer pool.
    pub fn with_buffer_pool(mut self, pool: SharedBufferPool) -> Self {
        self.buffer_pool = pool;
        self
    }

    /// Sets the observer.
    pub fn with_observer(mut self, observer: SharedObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Checks that the chain is usable.
    ///
    /// Rejects an empty chain, a chain that does not end with exactly one
    /// terminal provider, a provider without versions, and two providers for
    /// the same protocol id.
    pub fn validate(&self) -> Result<(), AmqpError> {
        let Some(last) = self.providers.last() else {
            return Err(invalid("no transport providers configured"));
        };
        if !last.is_terminal() {
            return Err(invalid(format!(
                "the last provider must be terminal, found {:?}",
                last.protocol_id()
            )));
        }

        let mut seen = HashSet::new();
        for (idx, provider) in self.providers.iter().enumerate() {
            if provider.versions().is_empty() {
                return Err(invalid(format!(
                    "provider {:?} has no versions",
                    provider.protocol_id()
                )));
            }
            if provider.is_terminal() && idx + 1 != self.providers.len() {
                return Err(invalid(format!(
                    "terminal provider {:?} is not last",
                    provider.protocol_id()
                )));
            }
            if !seen.insert(provider.protocol_id()) {
                return Err(invalid(format!(
                    "protocol {:?} is configured twice",
                    provider.protocol_id()
                )));
            }
        }

        if self.options.max_sasl_frame_size < MIN_SASL_FRAME_SIZE {
            return Err(invalid(format!(
                "max SASL frame size {} is below {MIN_SASL_FRAME_SIZE}",
                self.options.max_sasl_frame_size
            )));
        }
        Ok(())
    }

    /// Finds the provider for `protocol_id`.
    pub fn find_provider(&self, protocol_id: ProtocolId) -> Option<&SharedProvider> {
        self.providers
            .iter()
            .find(|p| p.protocol_id() == protocol_id)
    }

    /// The highest-precedence provider.
    pub fn first_provider(&self) -> Option<&SharedProvider> {
        self.providers.first()
    }

    /// Context handed to providers during an upgrade.
    pub fn upgrade_context(&self, role: NegotiationRole) -> UpgradeContext {
        UpgradeContext {
            role,
            sasl_hostname: self.options.sasl_hostname.clone(),
            max_sasl_frame_size: self.options.max_sasl_frame_size,
            buffer_pool: Arc::clone(&self.buffer_pool),
            observer: Arc::clone(&self.observer),
        }
    }
}

impl fmt::Debug for AmqpSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmqpSettings")
            .field(
                "providers",
                &self
                    .providers
                    .iter()
                    .map(|p| p.protocol_id())
                    .collect::<Vec<_>>(),
            )
            .field("options", &self.options)
            .finish()
    }
}

fn invalid(reason: impl Into<String>) -> AmqpError {
    AmqpError::invalid_operation(format!("invalid settings: {}", reason.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ProtocolVersion;
    use crate::provider::{AmqpTransportProvider, SaslTransportProvider};

    #[test]
    fn test_validate_accepts_chain() {
        let settings = AmqpSettings::new()
            .with_provider(SaslTransportProvider::new())
            .with_provider(AmqpTransportProvider::new());
        assert!(settings.validate().is_ok());
        assert_eq!(
            settings.first_provider().map(|p| p.protocol_id()),
            Some(ProtocolId::Sasl)
        );
        assert!(settings.find_provider(ProtocolId::Tls).is_none());
    }

    #[test]
    fn test_validate_rejects_bad_chains() {
        assert!(AmqpSettings::new().validate().is_err());

        let not_terminal = AmqpSettings::new().with_provider(SaslTransportProvider::new());
        assert!(not_terminal.validate().is_err());

        let terminal_first = AmqpSettings::new()
            .with_provider(AmqpTransportProvider::new())
            .with_provider(SaslTransportProvider::new());
        assert!(terminal_first.validate().is_err());

        let duplicate = AmqpSettings::new()
            .with_provider(SaslTransportProvider::new())
            .with_provider(SaslTransportProvider::new())
            .with_provider(AmqpTransportProvider::new());
        assert!(duplicate.validate().is_err());

        let no_versions = AmqpSettings::new()
            .with_provider(AmqpTransportProvider::new().with_versions(Vec::<ProtocolVersion>::new()));
        assert!(no_versions.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_tiny_frames() {
        let settings = AmqpSettings::new()
            .with_provider(AmqpTransportProvider::new())
            .with_options(NegotiationOptions::default().with_max_sasl_frame_size(64));
        assert!(matches!(
            settings.validate(),
            Err(AmqpError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn test_options_serde_defaults() {
        let options: NegotiationOptions =
            serde_json::from_str(r#"{"require_secure_transport":true,"sasl_hostname":"broker"}"#)
                .unwrap();
        assert!(options.require_secure_transport);
        assert_eq!(options.sasl_hostname.as_deref(), Some("broker"));
        assert_eq!(options.max_sasl_frame_size, MAX_SASL_FRAME_SIZE);
        assert_eq!(options.negotiation_timeout, Some(Duration::from_secs(60)));

        let json = serde_json::to_string(&options).unwrap();
        let back: NegotiationOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, options);
    }

    #[test]
    fn test_upgrade_context_carries_options() {
        let settings = AmqpSettings::new()
            .with_options(NegotiationOptions::default().with_sasl_hostname("broker"));
        let context = settings.upgrade_context(NegotiationRole::Initiator);
        assert!(context.is_initiator());
        assert_eq!(context.sasl_hostname.as_deref(), Some("broker"));
    }
}
