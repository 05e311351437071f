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

//! In-memory transport implementation for testing.
//!
//! A pair of [`MemoryTransport`]s is connected through a Tokio duplex pipe,
//! which makes it possible to run an initiator and an acceptor against each
//! other inside one test without touching the network stack.

use crate::transport::{
    Principal, ShutdownFuture, Transport, TransportId, TransportKind, TransportMetadata,
};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tracing::{debug, instrument};

/// Default buffer size for memory transport pipes.
const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// In-memory transport implementation.
///
/// Besides carrying bytes, a memory transport can be told to report itself as
/// secure or as carrying an authenticated principal, so the security policy
/// and the EXTERNAL mechanism can be exercised without a real TLS stack.
///
/// # Examples
///
/// ```rust
/// use amqp_transport::transport::MemoryTransport;
/// use tokio::io::{AsyncReadExt, AsyncWriteExt};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let (mut client, mut server) = MemoryTransport::pair(1024);
///
/// client.write_all(b"AMQP\x00\x01\x00\x00").await?;
///
/// let mut header = [0u8; 8];
/// server.read_exact(&mut header).await?;
/// assert_eq!(&header, b"AMQP\x00\x01\x00\x00");
/// # Ok(())
/// # }
/// ```
pub struct MemoryTransport {
    metadata: TransportMetadata,
    stream: DuplexStream,
    secure: bool,
    principal: Option<Principal>,
}

impl MemoryTransport {
    /// Creates a pair of connected memory transports.
    ///
    /// `buffer_size` bounds the bytes in flight in each direction; a writer
    /// that fills it waits until the peer reads.
    #[instrument(level = "debug")]
    pub fn pair(buffer_size: usize) -> (Self, Self) {
        let (a, b) = tokio::io::duplex(buffer_size);
        let first = Self::from_stream(a);
        let second = Self::from_stream(b);
        debug!(first = %first.metadata.id, second = %second.metadata.id, "created memory transport pair");
        (first, second)
    }

    /// Creates a pair of connected memory transports with the default buffer size.
    pub fn pair_default() -> (Self, Self) {
        Self::pair(DEFAULT_BUFFER_SIZE)
    }

    fn from_stream(stream: DuplexStream) -> Self {
        Self {
            metadata: TransportMetadata::new(TransportId::next(), TransportKind::Memory.as_str()),
            stream,
            secure: false,
            principal: None,
        }
    }

    /// Makes the transport report itself as encrypted.
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Makes the transport report an authenticated peer identity.
    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }
}

impl Transport for MemoryTransport {
    fn metadata(&self) -> &TransportMetadata {
        &self.metadata
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Memory
    }

    fn is_secure(&self) -> bool {
        self.secure
    }

    fn is_authenticated(&self) -> bool {
        self.principal.is_some()
    }

    fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    fn shutdown(&mut self) -> ShutdownFuture<'_> {
        Box::pin(async move {
            debug!(transport_id = %self.metadata.id, "shutting down memory transport");
            self.stream
                .shutdown()
                .await
                .map_err(crate::transport::TransportError::from_write)
        })
    }
}

impl AsyncRead for MemoryTransport {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for MemoryTransport {
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
