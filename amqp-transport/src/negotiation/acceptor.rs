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

//! Acceptor side of header negotiation.

use super::{
    AmqpSettings, NegotiatedTransport, Tracker, abort_with, read_header_bytes, with_timeout,
    write_header,
};
use crate::error::AmqpError;
use crate::observability::NegotiationRole;
use crate::operation::{self, Completion, OperationStatus, TransportOperation};
use crate::protocol::{ProtocolHeader, ProtocolId, ProtocolVersion};
use crate::provider::Upgrade;
use crate::transport::{BoxedTransport, TransportId, TransportListener};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, instrument, warn};

const ROLE: NegotiationRole = NegotiationRole::Acceptor;

/// Capacity of the queue of negotiated transports awaiting [`ListenerHandle::recv`].
const ACCEPT_QUEUE_SIZE: usize = 64;

/// Negotiates the provider chain on accepted transports.
///
/// The listener answers each header the peer sends: a supported header is
/// echoed and its provider run, anything else is answered with the header
/// this side would accept before the transport is aborted. Once the peer
/// sends the AMQP header, the connection security policy is checked and
/// the transport is handed back together with that header.
///
/// # Examples
///
/// ```rust
/// use amqp_transport::negotiation::{AmqpSettings, AmqpTransportListener, NegotiationOptions};
/// use amqp_transport::provider::AmqpTransportProvider;
/// use amqp_transport::transport::MemoryTransport;
/// use tokio::io::AsyncWriteExt;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let settings = AmqpSettings::new()
///     .with_provider(AmqpTransportProvider::new())
///     .with_options(NegotiationOptions::default().with_allow_anonymous_connection(true));
/// let listener = AmqpTransportListener::new(settings)?;
///
/// let (mut client, server) = MemoryTransport::pair_default();
/// client.write_all(b"AMQP\x00\x01\x00\x00").await?;
///
/// let negotiated = listener.negotiate(Box::new(server)).await?;
/// assert_eq!(negotiated.amqp_header.to_string(), "AMQP(amqp 1.0.0)");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct AmqpTransportListener {
    settings: Arc<AmqpSettings>,
}

impl AmqpTransportListener {
    /// Creates a listener after validating `settings`.
    pub fn new(settings: AmqpSettings) -> Result<Self, AmqpError> {
        settings.validate()?;
        Ok(Self {
            settings: Arc::new(settings),
        })
    }

    /// The negotiation settings.
    pub fn settings(&self) -> &AmqpSettings {
        &self.settings
    }

    /// Negotiates the provider chain on an accepted transport.
    #[instrument(skip_all, fields(transport_id = %transport.metadata().id))]
    pub async fn negotiate(&self, transport: BoxedTransport) -> Result<NegotiatedTransport, AmqpError> {
        let mut tracker = Tracker::new(&self.settings, ROLE);
        tracker.start(transport.metadata().id);
        let result = with_timeout(
            self.settings.options.negotiation_timeout,
            accept(&self.settings, transport),
        )
        .await;
        tracker.finish(result)
    }

    /// Non-blocking [`negotiate`](Self::negotiate) over `op.transport`.
    ///
    /// On success `op.transport` holds the negotiated transport and
    /// `op.protocol_header` the AMQP header the peer sent.
    pub fn accept_async(&self, mut op: TransportOperation) -> OperationStatus {
        let settings = Arc::clone(&self.settings);
        let timeout = settings.options.negotiation_timeout;
        let transport = op.transport.take();
        let mut tracker = Tracker::new(&settings, ROLE);
        operation::drive(op, timeout, async move {
            let Some(transport) = transport else {
                let error = AmqpError::invalid_operation("accept operation has no transport");
                tracker.fail(&error);
                return Completion::failure(error);
            };
            tracker.start(transport.metadata().id);
            match tracker.finish(accept(&settings, transport).await) {
                Ok(negotiated) => Completion::success(negotiated.transport)
                    .with_protocol_header(negotiated.amqp_header),
                Err(error) => Completion::failure(error),
            }
        })
    }

    /// Accepts transports from `listener` and negotiates each one on its
    /// own task.
    ///
    /// Negotiated transports are queued on the returned handle. Failed
    /// negotiations are reported to the observer only. The accept loop
    /// stops when `listener` fails, when the handle is dropped, or on
    /// [`ListenerHandle::shutdown`].
    pub fn listen<L>(&self, listener: L) -> ListenerHandle
    where
        L: TransportListener + 'static,
    {
        let (sender, receiver) = mpsc::channel(ACCEPT_QUEUE_SIZE);
        let this = self.clone();
        let task = tokio::spawn(async move {
            let local_addr = listener.local_addr().unwrap_or_default();
            info!(%local_addr, "accepting AMQP transports");
            let mut negotiations = JoinSet::new();
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        let transport = match accepted {
                            Ok(transport) => transport,
                            Err(error) => {
                                warn!(%local_addr, %error, "accept failed; stopping listener");
                                break;
                            }
                        };
                        let this = this.clone();
                        let sender = sender.clone();
                        negotiations.spawn(async move {
                            if let Ok(negotiated) = this.negotiate(transport).await {
                                if let Err(rejected) = sender.send(negotiated).await {
                                    rejected.0.transport.abort();
                                }
                            }
                        });
                    }
                    Some(_) = negotiations.join_next(), if !negotiations.is_empty() => {}
                    _ = sender.closed() => {
                        debug!(%local_addr, "listener handle dropped");
                        break;
                    }
                }
            }
        });
        ListenerHandle { receiver, task }
    }
}

/// Receiving end of [`AmqpTransportListener::listen`].
///
/// Dropping the handle stops the accept loop and cancels negotiations in
/// flight.
#[derive(Debug)]
pub struct ListenerHandle {
    receiver: mpsc::Receiver<NegotiatedTransport>,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Waits for the next negotiated transport.
    ///
    /// Returns `None` once the accept loop has stopped and every queued
    /// transport was received.
    pub async fn recv(&mut self) -> Option<NegotiatedTransport> {
        self.receiver.recv().await
    }

    /// Stops accepting and cancels negotiations in flight.
    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Walks the provider chain from the acceptor side.
pub(crate) async fn accept(
    settings: &AmqpSettings,
    mut transport: BoxedTransport,
) -> Result<NegotiatedTransport, AmqpError> {
    let id = transport.metadata().id;
    let context = settings.upgrade_context(ROLE);

    loop {
        let bytes = match read_header_bytes(&mut transport).await {
            Ok(bytes) => bytes,
            Err(error) => return Err(abort_with(transport, error)),
        };
        let Ok(offered) = ProtocolHeader::decode(&bytes) else {
            let supported = preferred_header(settings);
            return Err(reject(settings, transport, id, supported, AmqpError::ProtocolMismatch {
                offered: None,
                supported,
            })
            .await);
        };
        settings.observer.on_header_received(ROLE, id, &offered);

        let Some(provider) = settings.find_provider(offered.protocol_id()) else {
            let supported = preferred_header(settings);
            return Err(reject(settings, transport, id, supported, AmqpError::ProtocolMismatch {
                offered: Some(offered),
                supported,
            })
            .await);
        };

        if !provider.supports(offered.version()) {
            let closest = provider.closest_version(offered.version());
            let reply = ProtocolHeader::new(offered.protocol_id(), closest);
            return Err(reject(settings, transport, id, reply, AmqpError::VersionMismatch {
                requested: offered,
                supported: closest,
            })
            .await);
        }

        if provider.is_terminal() {
            // The connection layer answers the AMQP header itself.
            let upgrade = provider.upgrade(transport, &context).await?;
            return hand_off(settings, upgrade.into_transport(), id, offered, false).await;
        }

        // Echo before upgrading: the peer waits for the echo before it
        // starts the handshake.
        if let Err(error) = write_header(&mut transport, &offered).await {
            return Err(abort_with(transport, error));
        }
        settings.observer.on_header_sent(ROLE, id, &offered);

        transport = match provider.upgrade(transport, &context).await? {
            Upgrade::Wrapped(wrapped) => {
                settings.observer.on_upgraded(ROLE, id, wrapped.kind());
                wrapped
            }
            Upgrade::Unchanged(transport) => {
                return hand_off(settings, transport, id, offered, true).await;
            }
        };
    }
}

/// Applies the connection policy to a transport whose negotiation ended
/// on `header`.
///
/// A rejected transport that has not answered `header` yet is told which
/// header this side would accept.
async fn hand_off(
    settings: &AmqpSettings,
    transport: BoxedTransport,
    id: TransportId,
    header: ProtocolHeader,
    answered: bool,
) -> Result<NegotiatedTransport, AmqpError> {
    let Some(reason) = policy_violation(settings, &transport) else {
        debug!(transport_id = %id, %header, "negotiation complete");
        return Ok(NegotiatedTransport {
            transport,
            amqp_header: header,
        });
    };
    let error = AmqpError::InsecureTransport {
        reason: reason.to_string(),
    };
    if answered {
        return Err(abort_with(transport, error));
    }
    let supported = preferred_header(settings);
    Err(reject(settings, transport, id, supported, error).await)
}

/// The header this side asks for first.
fn preferred_header(settings: &AmqpSettings) -> ProtocolHeader {
    settings
        .first_provider()
        .map(|provider| provider.default_header())
        .unwrap_or(ProtocolHeader::new(ProtocolId::Amqp, ProtocolVersion::V1_0_0))
}

fn policy_violation(settings: &AmqpSettings, transport: &BoxedTransport) -> Option<&'static str> {
    let options = &settings.options;
    if options.require_secure_transport && !transport.is_secure() {
        Some("transport is not encrypted")
    } else if !options.allow_anonymous_connection && !transport.is_authenticated() {
        Some("peer is not authenticated")
    } else {
        None
    }
}

/// Answers with `reply`, best effort, then aborts the transport.
async fn reject(
    settings: &AmqpSettings,
    mut transport: BoxedTransport,
    id: TransportId,
    reply: ProtocolHeader,
    error: AmqpError,
) -> AmqpError {
    match write_header(&mut transport, &reply).await {
        Ok(()) => settings.observer.on_header_sent(ROLE, id, &reply),
        Err(write_error) => debug!(transport_id = %id, error = %write_error, "could not answer rejected header"),
    }
    abort_with(transport, error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::NegotiationMetrics;
    use crate::provider::{AmqpTransportProvider, SaslTransportProvider};
    use crate::sasl::AnonymousHandler;
    use crate::transport::{MemoryTransport, Principal};
    use crate::negotiation::NegotiationOptions;
    use crate::provider::{TransportProvider, UpgradeContext};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Answers the TLS id but leaves the transport as it is.
    #[derive(Debug)]
    struct PassThrough;

    #[async_trait]
    impl TransportProvider for PassThrough {
        fn protocol_id(&self) -> ProtocolId {
            ProtocolId::Tls
        }

        fn versions(&self) -> &[ProtocolVersion] {
            &[ProtocolVersion::V1_0_0]
        }

        async fn upgrade(
            &self,
            transport: BoxedTransport,
            _context: &UpgradeContext,
        ) -> Result<Upgrade, AmqpError> {
            Ok(Upgrade::Unchanged(transport))
        }
    }

    fn pass_through_listener(options: NegotiationOptions) -> AmqpTransportListener {
        let settings = AmqpSettings::new()
            .with_provider(PassThrough)
            .with_provider(AmqpTransportProvider::new())
            .with_options(options.with_negotiation_timeout(Some(Duration::from_secs(2))));
        AmqpTransportListener::new(settings).unwrap()
    }

    fn listener(metrics: Arc<NegotiationMetrics>, options: NegotiationOptions) -> AmqpTransportListener {
        let settings = AmqpSettings::new()
            .with_provider(SaslTransportProvider::new().with_handler(AnonymousHandler::new()))
            .with_provider(AmqpTransportProvider::new())
            .with_options(options)
            .with_observer(metrics);
        AmqpTransportListener::new(settings).unwrap()
    }

    /// Sends `header` and returns what the acceptor answered, if anything.
    async fn offer(mut peer: MemoryTransport, header: &[u8]) -> Option<[u8; 8]> {
        peer.write_all(header).await.unwrap();
        let mut reply = [0u8; 8];
        peer.read_exact(&mut reply).await.ok().map(|_| reply)
    }

    #[tokio::test]
    async fn test_unsupported_version_answers_closest() {
        let metrics = Arc::new(NegotiationMetrics::new());
        let listener = listener(metrics.clone(), NegotiationOptions::default());
        let (client, server) = MemoryTransport::pair_default();

        let (result, reply) = tokio::join!(
            listener.negotiate(Box::new(server)),
            offer(client, b"AMQP\x03\x01\x01\x00"),
        );
        assert_eq!(reply.as_ref().map(|r| &r[..]), Some(&b"AMQP\x03\x01\x00\x00"[..]));
        match result {
            Err(AmqpError::VersionMismatch {
                requested,
                supported,
            }) => {
                assert_eq!(requested.version(), ProtocolVersion::new(1, 1, 0));
                assert_eq!(supported, ProtocolVersion::V1_0_0);
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert_eq!(metrics.failures("version_mismatch"), 1);
    }

    #[tokio::test]
    async fn test_unknown_protocol_answers_preferred_header() {
        let listener = listener(Arc::new(NegotiationMetrics::new()), NegotiationOptions::default());
        let (client, server) = MemoryTransport::pair_default();

        let (result, reply) = tokio::join!(
            listener.negotiate(Box::new(server)),
            offer(client, b"AMQP\x02\x01\x00\x00"),
        );
        assert_eq!(reply.as_ref().map(|r| &r[..]), Some(&b"AMQP\x03\x01\x00\x00"[..]));
        assert!(matches!(
            result,
            Err(AmqpError::ProtocolMismatch {
                offered: Some(_),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_garbage_answers_preferred_header() {
        let listener = listener(Arc::new(NegotiationMetrics::new()), NegotiationOptions::default());
        let (client, server) = MemoryTransport::pair_default();

        let (result, reply) = tokio::join!(
            listener.negotiate(Box::new(server)),
            offer(client, b"GET / HT"),
        );
        assert!(reply.is_some());
        assert!(matches!(
            result,
            Err(AmqpError::ProtocolMismatch { offered: None, .. })
        ));
    }

    #[tokio::test]
    async fn test_anonymous_amqp_rejected_by_default() {
        let listener = listener(Arc::new(NegotiationMetrics::new()), NegotiationOptions::default());
        let (client, server) = MemoryTransport::pair_default();

        let (result, reply) = tokio::join!(
            listener.negotiate(Box::new(server)),
            offer(client, b"AMQP\x00\x01\x00\x00"),
        );
        assert_eq!(reply.as_ref().map(|r| &r[..]), Some(&b"AMQP\x03\x01\x00\x00"[..]));
        assert!(matches!(result, Err(AmqpError::InsecureTransport { .. })));
    }

    #[tokio::test]
    async fn test_require_secure_transport() {
        let options = NegotiationOptions::default()
            .with_allow_anonymous_connection(true)
            .with_require_secure_transport(true);
        let listener = listener(Arc::new(NegotiationMetrics::new()), options);

        let (mut client, server) = MemoryTransport::pair_default();
        client.write_all(b"AMQP\x00\x01\x00\x00").await.unwrap();
        let result = listener.negotiate(Box::new(server)).await;
        assert!(matches!(result, Err(AmqpError::InsecureTransport { .. })));

        let (mut client, server) = MemoryTransport::pair_default();
        client.write_all(b"AMQP\x00\x01\x00\x00").await.unwrap();
        let server = server
            .with_secure(true)
            .with_principal(Principal::new("client", "TLS"));
        let negotiated = listener.negotiate(Box::new(server)).await.unwrap();
        assert_eq!(negotiated.amqp_header.protocol_id(), ProtocolId::Amqp);
    }

    #[tokio::test]
    async fn test_accept_async_sets_protocol_header() {
        let options = NegotiationOptions::default().with_allow_anonymous_connection(true);
        let listener = listener(Arc::new(NegotiationMetrics::new()), options);
        let (mut client, server) = MemoryTransport::pair_default();
        client.write_all(b"AMQP\x00\x01\x00\x00").await.unwrap();

        let op = TransportOperation::new(|_| panic!("callback must not run"))
            .with_transport(Box::new(server));
        let op = listener.accept_async(op).completed().unwrap();
        assert!(op.completed_synchronously);
        assert!(op.is_success());
        assert_eq!(
            op.protocol_header.map(|h| h.protocol_id()),
            Some(ProtocolId::Amqp)
        );
    }

    #[tokio::test]
    async fn test_accept_async_without_transport_fails() {
        let listener = listener(Arc::new(NegotiationMetrics::new()), NegotiationOptions::default());
        let op = TransportOperation::new(|_| panic!("callback must not run"));
        let op = listener.accept_async(op).completed().unwrap();
        assert!(matches!(op.error, Some(AmqpError::InvalidOperation { .. })));
    }

    #[tokio::test]
    async fn test_unchanged_upgrade_ends_negotiation() {
        let listener =
            pass_through_listener(NegotiationOptions::default().with_allow_anonymous_connection(true));
        let (client, server) = MemoryTransport::pair_default();

        let (result, reply) = tokio::join!(
            listener.negotiate(Box::new(server)),
            offer(client, b"AMQP\x02\x01\x00\x00"),
        );
        assert_eq!(reply.as_ref().map(|r| &r[..]), Some(&b"AMQP\x02\x01\x00\x00"[..]));
        let negotiated = result.unwrap();
        assert_eq!(negotiated.amqp_header.protocol_id(), ProtocolId::Tls);
        assert_eq!(negotiated.transport.kind(), crate::transport::TransportKind::Memory);
    }

    #[tokio::test]
    async fn test_unchanged_upgrade_applies_policy() {
        let listener = pass_through_listener(NegotiationOptions::default());
        let (mut client, server) = MemoryTransport::pair_default();
        client.write_all(b"AMQP\x02\x01\x00\x00").await.unwrap();

        let result = listener.negotiate(Box::new(server)).await;
        assert!(matches!(result, Err(AmqpError::InsecureTransport { .. })));

        // Only the echo; the header was already answered.
        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"AMQP\x02\x01\x00\x00");
    }
}
