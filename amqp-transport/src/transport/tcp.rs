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

//! TCP transport implementation.
//!
//! The bottom-most transport for most deployments. Clients connect through
//! [`TcpSettings`]; servers accept through [`TcpTransportListener`].

use crate::transport::{
    BoxedTransport, ShutdownFuture, TcpSettings, Transport, TransportError, TransportId,
    TransportKind, TransportListener, TransportMetadata,
};
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::{debug, info, instrument, warn};

/// TCP transport implementation.
///
/// # Examples
///
/// ```rust,no_run
/// use amqp_transport::transport::{TcpSettings, TcpTransport};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let settings = TcpSettings::new("broker.example.com", 5672).with_nodelay(true);
/// let transport = TcpTransport::connect(&settings).await?;
/// # Ok(())
/// # }
/// ```
pub struct TcpTransport {
    stream: TcpStream,
    metadata: TransportMetadata,
}

impl TcpTransport {
    /// Wraps an already-connected stream.
    pub fn from_stream(stream: TcpStream) -> io::Result<Self> {
        let id = TransportId::next();
        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;

        debug!(transport_id = %id, %local_addr, %peer_addr, "created TCP transport");

        let metadata = TransportMetadata::new(id, TransportKind::Tcp.as_str())
            .with_local_addr(local_addr)
            .with_peer_addr(peer_addr);

        Ok(Self { stream, metadata })
    }

    /// Connects to the endpoint described by `settings`.
    ///
    /// Every address the host resolves to is tried in order; the error of the
    /// last attempt is reported if none succeed.
    #[instrument(skip(settings), fields(host = %settings.host, port = settings.port))]
    pub async fn connect(settings: &TcpSettings) -> Result<Self, TransportError> {
        let address = settings.address();
        info!("connecting to TCP endpoint");

        let addrs = tokio::net::lookup_host(&address).await.map_err(|source| {
            TransportError::ConnectionFailed {
                address: address.clone(),
                source,
            }
        })?;

        let mut last_error =
            io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses");
        for addr in addrs {
            match Self::connect_addr(addr, settings).await {
                Ok(stream) => {
                    stream
                        .set_nodelay(settings.nodelay)
                        .map_err(|source| TransportError::Io { source })?;
                    info!(%addr, "TCP connection established");
                    return Self::from_stream(stream).map_err(|source| TransportError::Io { source });
                }
                Err(e) => {
                    debug!(%addr, error = %e, "TCP connect attempt failed");
                    last_error = e;
                }
            }
        }

        warn!(error = %last_error, "failed to connect");
        Err(TransportError::ConnectionFailed {
            address,
            source: last_error,
        })
    }

    async fn connect_addr(addr: SocketAddr, settings: &TcpSettings) -> io::Result<TcpStream> {
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        if let Some(size) = settings.send_buffer_size {
            socket.set_send_buffer_size(size)?;
        }
        if let Some(size) = settings.receive_buffer_size {
            socket.set_recv_buffer_size(size)?;
        }
        socket.connect(addr).await
    }

    /// Returns the local address of this connection.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.stream.local_addr()
    }

    /// Returns the peer address of this connection.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    /// Returns whether `TCP_NODELAY` is set.
    pub fn nodelay(&self) -> io::Result<bool> {
        self.stream.nodelay()
    }
}

impl Transport for TcpTransport {
    fn metadata(&self) -> &TransportMetadata {
        &self.metadata
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    fn shutdown(&mut self) -> ShutdownFuture<'_> {
        Box::pin(async move {
            debug!(transport_id = %self.metadata.id, "shutting down TCP transport");
            self.stream.shutdown().await.map_err(TransportError::from_write)
        })
    }
}

impl AsyncRead for TcpTransport {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for TcpTransport {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

/// Accepts raw TCP connections.
pub struct TcpTransportListener {
    listener: TcpListener,
    nodelay: bool,
}

impl TcpTransportListener {
    /// Binds a listener to `addr` (e.g. `"0.0.0.0:5672"`).
    #[instrument(skip(addr), fields(address))]
    pub async fn bind(addr: impl Into<String>) -> Result<Self, TransportError> {
        let address = addr.into();
        tracing::Span::current().record("address", address.as_str());

        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| TransportError::BindFailed {
                address: address.clone(),
                source,
            })?;
        info!("TCP listener bound");
        Ok(Self {
            listener,
            nodelay: true,
        })
    }

    /// Sets `TCP_NODELAY` on accepted connections (default `true`).
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// The bound socket address.
    pub fn socket_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts one connection as a concrete [`TcpTransport`].
    pub async fn accept_tcp(&self) -> Result<TcpTransport, TransportError> {
        let (stream, peer_addr) = self.listener.accept().await?;
        stream.set_nodelay(self.nodelay)?;
        debug!(%peer_addr, "accepted TCP connection");
        Ok(TcpTransport::from_stream(stream)?)
    }
}

#[async_trait::async_trait]
impl TransportListener for TcpTransportListener {
    async fn accept(&self) -> Result<BoxedTransport, TransportError> {
        Ok(Box::new(self.accept_tcp().await?))
    }

    fn local_addr(&self) -> Result<String, TransportError> {
        Ok(self.socket_addr()?.to_string())
    }
}
