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

//! Protocol header negotiation.
//!
//! Before AMQP frames flow, the two peers walk an ordered chain of
//! providers. For each non-terminal provider the initiator sends that
//! provider's 8-byte header, the acceptor echoes it, and both sides hand
//! the transport to the provider, which wraps it (TLS, SASL). The chain
//! ends with the terminal AMQP provider, whose header is exchanged by the
//! connection layer itself.
//!
//! ```text
//! initiator                                acceptor
//!     | --- AMQP(tls 1.0.0) ------------------> |
//!     | <-- AMQP(tls 1.0.0) ------------------- |
//!     | ====== TLS handshake ================== |
//!     | --- AMQP(sasl 1.0.0) -----------------> |
//!     | <-- AMQP(sasl 1.0.0) ------------------ |
//!     | ====== SASL exchange ================== |
//!     | --- AMQP(amqp 1.0.0) -----------------> |  negotiation done,
//!     |                                         |  connection layer answers
//! ```
//!
//! - [`AmqpTransportInitiator`] opens the base transport and drives the
//!   initiator side.
//! - [`AmqpTransportListener`] drives the acceptor side for each accepted
//!   transport and applies the connection security policy.
//!
//! Any failure aborts the transport; nothing half-negotiated is returned.

mod acceptor;
mod initiator;
mod settings;

pub use acceptor::{AmqpTransportListener, ListenerHandle};
pub use initiator::AmqpTransportInitiator;
pub use settings::{AmqpSettings, NegotiationOptions};

use crate::error::AmqpError;
use crate::observability::{NegotiationRole, SharedObserver};
use crate::protocol::ProtocolHeader;
use crate::transport::{BoxedTransport, TransportId};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

/// A transport that completed negotiation on the acceptor side.
pub struct NegotiatedTransport {
    /// The fully upgraded transport
    pub transport: BoxedTransport,
    /// The header that ended negotiation. For the terminal AMQP provider
    /// this is the AMQP header the peer sent, which the connection layer
    /// answers; a provider that kept the transport unchanged has already
    /// echoed its own.
    pub amqp_header: ProtocolHeader,
}

impl fmt::Debug for NegotiatedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NegotiatedTransport")
            .field("transport", &self.transport.metadata())
            .field("kind", &self.transport.kind())
            .field("amqp_header", &self.amqp_header)
            .finish()
    }
}

pub(crate) async fn write_header<T>(io: &mut T, header: &ProtocolHeader) -> Result<(), AmqpError>
where
    T: AsyncWrite + Unpin + ?Sized,
{
    io.write_all(&header.encode()).await?;
    io.flush().await?;
    Ok(())
}

pub(crate) async fn read_header_bytes<T>(io: &mut T) -> Result<[u8; ProtocolHeader::SIZE], AmqpError>
where
    T: AsyncRead + Unpin + ?Sized,
{
    let mut bytes = [0u8; ProtocolHeader::SIZE];
    io.read_exact(&mut bytes).await?;
    Ok(bytes)
}

/// Aborts `transport` and passes `error` through.
pub(crate) fn abort_with(transport: BoxedTransport, error: AmqpError) -> AmqpError {
    transport.abort();
    error
}

/// Reports the lifecycle of one negotiation to the observer.
///
/// A tracker dropped before [`complete`](Self::complete) or
/// [`fail`](Self::fail) is reported as [`AmqpError::Timeout`] once the
/// negotiation timeout has elapsed since [`new`](Self::new), and as
/// cancelled otherwise. Create it before arming the timer.
pub(crate) struct Tracker {
    observer: SharedObserver,
    role: NegotiationRole,
    id: Option<TransportId>,
    timeout: Option<Duration>,
    started: Instant,
    finished: bool,
}

impl Tracker {
    pub(crate) fn new(settings: &AmqpSettings, role: NegotiationRole) -> Self {
        Self {
            observer: Arc::clone(&settings.observer),
            role,
            id: None,
            timeout: settings.options.negotiation_timeout,
            started: Instant::now(),
            finished: false,
        }
    }

    pub(crate) fn start(&mut self, id: TransportId) {
        self.id = Some(id);
        self.observer.on_started(self.role, id);
    }

    pub(crate) fn complete(mut self) {
        self.finished = true;
        if let Some(id) = self.id {
            self.observer
                .on_completed(self.role, id, self.started.elapsed());
        }
    }

    pub(crate) fn fail(mut self, error: &AmqpError) {
        self.finished = true;
        self.observer.on_failed(self.role, self.id, error);
    }

    /// Reports `result` and passes it through.
    pub(crate) fn finish<T>(self, result: Result<T, AmqpError>) -> Result<T, AmqpError> {
        match &result {
            Ok(_) => self.complete(),
            Err(error) => self.fail(error),
        }
        result
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        match self.timeout {
            Some(duration) if self.started.elapsed() >= duration => {
                self.observer
                    .on_failed(self.role, self.id, &AmqpError::Timeout { duration });
            }
            _ => self.observer.on_cancelled(self.role, self.id),
        }
    }
}

/// Runs `future` under the optional negotiation timeout.
pub(crate) async fn with_timeout<F, T>(timeout: Option<Duration>, future: F) -> Result<T, AmqpError>
where
    F: Future<Output = Result<T, AmqpError>>,
{
    match timeout {
        Some(duration) => tokio::time::timeout(duration, future)
            .await
            .map_err(|_| AmqpError::Timeout { duration })?,
        None => future.await,
    }
}
