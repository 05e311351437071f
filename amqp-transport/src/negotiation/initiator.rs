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

//! Initiator side of header negotiation.

use super::{AmqpSettings, Tracker, abort_with, read_header_bytes, with_timeout, write_header};
use crate::error::AmqpError;
use crate::observability::NegotiationRole;
use crate::operation::{self, Completion, OperationStatus, TransportOperation};
use crate::protocol::ProtocolHeader;
use crate::provider::Upgrade;
use crate::transport::{BoxedTransport, TransportId, TransportSettings};
use std::sync::Arc;
use tracing::{debug, instrument};

const ROLE: NegotiationRole = NegotiationRole::Initiator;

/// Opens transports to a peer and negotiates the provider chain on them.
///
/// # Examples
///
/// ```rust,no_run
/// use amqp_transport::negotiation::{AmqpSettings, AmqpTransportInitiator};
/// use amqp_transport::provider::{AmqpTransportProvider, SaslTransportProvider};
/// use amqp_transport::sasl::PlainHandler;
/// use amqp_transport::transport::TcpSettings;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let settings = AmqpSettings::new()
///     .with_provider(SaslTransportProvider::new().with_handler(PlainHandler::client("guest", "guest")))
///     .with_provider(AmqpTransportProvider::new());
/// let initiator = AmqpTransportInitiator::new(settings, TcpSettings::new("localhost", 5672).into())?;
///
/// let transport = initiator.connect().await?;
/// assert!(transport.is_authenticated());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct AmqpTransportInitiator {
    settings: Arc<AmqpSettings>,
    transport_settings: TransportSettings,
}

impl AmqpTransportInitiator {
    /// Creates an initiator after validating `settings`.
    pub fn new(
        settings: AmqpSettings,
        transport_settings: TransportSettings,
    ) -> Result<Self, AmqpError> {
        settings.validate()?;
        Ok(Self {
            settings: Arc::new(settings),
            transport_settings,
        })
    }

    /// The negotiation settings.
    pub fn settings(&self) -> &AmqpSettings {
        &self.settings
    }

    /// How the base transport is opened.
    pub fn transport_settings(&self) -> &TransportSettings {
        &self.transport_settings
    }

    /// Opens the base transport and negotiates every provider.
    #[instrument(skip(self), fields(endpoint = %self.transport_settings.endpoint()))]
    pub async fn connect(&self) -> Result<BoxedTransport, AmqpError> {
        let mut tracker = Tracker::new(&self.settings, ROLE);
        let result = with_timeout(
            self.settings.options.negotiation_timeout,
            connect_and_negotiate(&self.settings, &self.transport_settings, &mut tracker),
        )
        .await;
        tracker.finish(result)
    }

    /// Negotiates every provider over an already open transport.
    #[instrument(skip_all, fields(transport_id = %transport.metadata().id))]
    pub async fn negotiate(&self, transport: BoxedTransport) -> Result<BoxedTransport, AmqpError> {
        let mut tracker = Tracker::new(&self.settings, ROLE);
        tracker.start(transport.metadata().id);
        let result = with_timeout(
            self.settings.options.negotiation_timeout,
            initiate(&self.settings, transport),
        )
        .await;
        tracker.finish(result)
    }

    /// Non-blocking [`connect`](Self::connect).
    ///
    /// On success the negotiated transport is on `op.transport`.
    pub fn connect_async(&self, op: TransportOperation) -> OperationStatus {
        let settings = Arc::clone(&self.settings);
        let transport_settings = self.transport_settings.clone();
        let timeout = settings.options.negotiation_timeout;
        let mut tracker = Tracker::new(&settings, ROLE);
        operation::drive(op, timeout, async move {
            let result =
                connect_and_negotiate(&settings, &transport_settings, &mut tracker).await;
            into_completion(tracker.finish(result))
        })
    }

    /// Non-blocking [`negotiate`](Self::negotiate) over `op.transport`.
    pub fn negotiate_async(&self, mut op: TransportOperation) -> OperationStatus {
        let settings = Arc::clone(&self.settings);
        let timeout = settings.options.negotiation_timeout;
        let transport = op.transport.take();
        let mut tracker = Tracker::new(&settings, ROLE);
        operation::drive(op, timeout, async move {
            let Some(transport) = transport else {
                let error = AmqpError::invalid_operation("negotiate operation has no transport");
                tracker.fail(&error);
                return Completion::failure(error);
            };
            tracker.start(transport.metadata().id);
            let result = initiate(&settings, transport).await;
            into_completion(tracker.finish(result))
        })
    }
}

fn into_completion(result: Result<BoxedTransport, AmqpError>) -> Completion {
    match result {
        Ok(transport) => Completion::success(transport),
        Err(error) => Completion::failure(error),
    }
}

async fn connect_and_negotiate(
    settings: &AmqpSettings,
    transport_settings: &TransportSettings,
    tracker: &mut Tracker,
) -> Result<BoxedTransport, AmqpError> {
    let transport = transport_settings.connect().await?;
    tracker.start(transport.metadata().id);
    initiate(settings, transport).await
}

/// Walks the provider chain from the initiator side.
pub(crate) async fn initiate(
    settings: &AmqpSettings,
    mut transport: BoxedTransport,
) -> Result<BoxedTransport, AmqpError> {
    let id = transport.metadata().id;
    let context = settings.upgrade_context(ROLE);

    for provider in &settings.providers {
        if provider.is_terminal() {
            // The connection layer sends the AMQP header itself.
            return Ok(provider.upgrade(transport, &context).await?.into_transport());
        }

        let sent = provider.default_header();
        if let Err(error) = exchange(settings, &mut transport, id, sent).await {
            return Err(abort_with(transport, error));
        }

        transport = match provider.upgrade(transport, &context).await? {
            Upgrade::Wrapped(wrapped) => {
                settings.observer.on_upgraded(ROLE, id, wrapped.kind());
                wrapped
            }
            // The provider kept the transport as is; nothing follows it.
            Upgrade::Unchanged(transport) => return Ok(transport),
        };
    }

    Err(abort_with(
        transport,
        AmqpError::invalid_operation("provider chain has no terminal provider"),
    ))
}

/// Sends `sent` and checks that the peer echoes it.
async fn exchange(
    settings: &AmqpSettings,
    transport: &mut BoxedTransport,
    id: TransportId,
    sent: ProtocolHeader,
) -> Result<(), AmqpError> {
    write_header(transport, &sent).await?;
    settings.observer.on_header_sent(ROLE, id, &sent);

    let reply = ProtocolHeader::decode(&read_header_bytes(transport).await?)?;
    settings.observer.on_header_received(ROLE, id, &reply);

    if reply.protocol_id() != sent.protocol_id() {
        return Err(AmqpError::ProtocolMismatch {
            offered: Some(reply),
            supported: sent,
        });
    }
    if reply.version() != sent.version() {
        return Err(AmqpError::VersionMismatch {
            requested: sent,
            supported: reply.version(),
        });
    }
    debug!(transport_id = %id, header = %sent, "peer accepted protocol header");
    Ok(())
}
