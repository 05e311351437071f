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

use crate::transport::{Principal, TransportError, TransportMetadata};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite};

/// A transport that has been type-erased for use in an upgrade chain.
///
/// Every provider consumes one of these and produces another, so the chain
/// never needs to know which concrete layers it has stacked.
pub type BoxedTransport = Box<dyn Transport>;

/// Boxed future returned by [`Transport::shutdown`].
pub type ShutdownFuture<'a> = Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>>;

/// The closed set of transport layers this crate knows how to stack.
///
/// Providers inspect the tag of the transport they are asked to wrap (the TLS
/// provider, for instance, only wraps the layer it was configured for) rather
/// than relying on runtime type inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Plain TCP socket.
    Tcp,
    /// TLS session over another transport.
    Tls,
    /// WebSocket binary-message stream.
    WebSocket,
    /// SASL-authenticated wrapper.
    Sasl,
    /// In-process memory pipe.
    Memory,
}

impl TransportKind {
    /// Returns the layer label used in metadata and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Tcp => "tcp",
            TransportKind::Tls => "tls",
            TransportKind::WebSocket => "websocket",
            TransportKind::Sasl => "sasl",
            TransportKind::Memory => "memory",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Core transport abstraction for bi-directional byte streams.
///
/// `Transport` combines Tokio's `AsyncRead` and `AsyncWrite` (the `read` and
/// `write` capabilities) with the lifecycle and security properties the
/// negotiation pipeline consults:
///
/// - [`kind`](Transport::kind): which layer this is
/// - [`is_secure`](Transport::is_secure): the byte stream is encrypted
/// - [`is_authenticated`](Transport::is_authenticated): the peer identity has
///   been verified by this layer or one below it
/// - [`shutdown`](Transport::shutdown) / [`abort`](Transport::abort): graceful
///   and immediate teardown
///
/// Opening a transport is a concern of whoever creates it:
/// [`TransportSettings::connect`](crate::transport::TransportSettings::connect)
/// on the initiating side and [`TransportListener::accept`] on the accepting
/// side.
///
/// # Implementing a custom transport
///
/// ```rust
/// use amqp_transport::transport::{
///     ShutdownFuture, Transport, TransportId, TransportKind, TransportMetadata,
/// };
/// use std::pin::Pin;
/// use std::task::{Context, Poll};
/// use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
///
/// struct LoopbackTransport {
///     metadata: TransportMetadata,
/// }
///
/// impl Transport for LoopbackTransport {
///     fn metadata(&self) -> &TransportMetadata {
///         &self.metadata
///     }
///
///     fn kind(&self) -> TransportKind {
///         TransportKind::Memory
///     }
///
///     fn shutdown(&mut self) -> ShutdownFuture<'_> {
///         Box::pin(async move { Ok(()) })
///     }
/// }
///
/// impl AsyncRead for LoopbackTransport {
///     fn poll_read(
///         self: Pin<&mut Self>,
///         _cx: &mut Context<'_>,
///         _buf: &mut ReadBuf<'_>,
///     ) -> Poll<std::io::Result<()>> {
///         Poll::Ready(Ok(()))
///     }
/// }
///
/// impl AsyncWrite for LoopbackTransport {
///     fn poll_write(
///         self: Pin<&mut Self>,
///         _cx: &mut Context<'_>,
///         buf: &[u8],
///     ) -> Poll<std::io::Result<usize>> {
///         Poll::Ready(Ok(buf.len()))
///     }
///
///     fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
///         Poll::Ready(Ok(()))
///     }
///
///     fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
///         Poll::Ready(Ok(()))
///     }
/// }
///
/// let transport = LoopbackTransport {
///     metadata: TransportMetadata::new(TransportId::next(), "loopback"),
/// };
/// assert!(!transport.is_secure());
/// ```
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Returns metadata about this transport (identifier and endpoints).
    fn metadata(&self) -> &TransportMetadata;

    /// Returns the layer tag of this transport.
    fn kind(&self) -> TransportKind;

    /// Returns `true` if bytes on this transport are encrypted.
    fn is_secure(&self) -> bool {
        false
    }

    /// Returns `true` if the peer identity has been verified.
    fn is_authenticated(&self) -> bool {
        false
    }

    /// Returns the identity established for the peer, if any.
    fn principal(&self) -> Option<&Principal> {
        None
    }

    /// Gracefully shuts down the transport.
    ///
    /// Flushes pending writes and signals end-of-stream to the peer. The
    /// transport must not be used for I/O afterwards.
    fn shutdown(&mut self) -> ShutdownFuture<'_>;

    /// Tears the transport down immediately, without flushing.
    ///
    /// Any operation still pending against the underlying socket observes an
    /// I/O fault. The default implementation drops the transport, which
    /// closes every layer beneath it.
    fn abort(self: Box<Self>) {
        drop(self);
    }
}

/// Trait for transport listeners (servers).
///
/// A transport listener accepts raw incoming connections; negotiation on top
/// of them is driven by
/// [`AmqpTransportListener`](crate::negotiation::AmqpTransportListener).
#[async_trait::async_trait]
pub trait TransportListener: Send + Sync {
    /// Accepts a new incoming connection.
    ///
    /// This waits until a new connection is available.
    async fn accept(&self) -> Result<BoxedTransport, TransportError>;

    /// Returns the local address this listener is bound to.
    fn local_addr(&self) -> Result<String, TransportError>;
}
