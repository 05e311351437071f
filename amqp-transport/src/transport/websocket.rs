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

//! WebSocket transport implementation.
//!
//! AMQP over WebSocket carries the ordinary AMQP byte stream inside binary
//! messages, negotiated under the `amqp` sub-protocol. Message boundaries
//! carry no meaning: reads drain messages as a continuous byte stream and
//! every write becomes one binary message.
//!
//! # Examples
//!
//! ```rust,no_run
//! use amqp_transport::transport::{WebSocketSettings, WebSocketTransport};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = WebSocketSettings::new("ws://localhost:5673/$amqp");
//! let transport = WebSocketTransport::connect(&settings).await?;
//! # Ok(())
//! # }
//! ```

use crate::transport::{
    BoxedTransport, ShutdownFuture, Transport, TransportError, TransportId, TransportKind,
    TransportListener, TransportMetadata, WebSocketSettings,
};
use futures_util::{Sink, Stream};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, instrument, warn};

const SUBPROTOCOL_HEADER: &str = "Sec-WebSocket-Protocol";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport implementation.
pub struct WebSocketTransport {
    stream: WsStream,
    metadata: TransportMetadata,
    read_buffer: Vec<u8>,
    read_pos: usize,
    closed: bool,
}

impl WebSocketTransport {
    /// Connects to `settings.url`, requesting `settings.subprotocol`.
    ///
    /// Fails with [`TransportError::WebSocketHandshakeFailed`] if the server
    /// does not agree to the sub-protocol.
    #[instrument(skip(settings), fields(url = %settings.url))]
    pub async fn connect(settings: &WebSocketSettings) -> Result<Self, TransportError> {
        let mut request = settings.url.as_str().into_client_request()?;
        let protocol = HeaderValue::from_str(&settings.subprotocol).map_err(|e| {
            TransportError::invalid_configuration(format!("invalid sub-protocol: {e}"))
        })?;
        request.headers_mut().insert(SUBPROTOCOL_HEADER, protocol);

        let (stream, response) = tokio_tungstenite::connect_async(request).await?;

        let agreed = response
            .headers()
            .get(SUBPROTOCOL_HEADER)
            .and_then(|value| value.to_str().ok());
        if agreed != Some(settings.subprotocol.as_str()) {
            return Err(TransportError::WebSocketHandshakeFailed {
                reason: format!(
                    "server did not accept sub-protocol {:?} (answered {:?})",
                    settings.subprotocol, agreed
                ),
            });
        }

        info!("WebSocket connection established");
        Ok(Self::from_ws(stream))
    }

    fn from_ws(stream: WsStream) -> Self {
        let (local_addr, peer_addr) = match stream.get_ref() {
            MaybeTlsStream::Plain(tcp) => (tcp.local_addr().ok(), tcp.peer_addr().ok()),
            _ => (None, None),
        };

        let mut metadata =
            TransportMetadata::new(TransportId::next(), TransportKind::WebSocket.as_str());
        if let Some(addr) = local_addr {
            metadata = metadata.with_local_addr(addr);
        }
        if let Some(addr) = peer_addr {
            metadata = metadata.with_peer_addr(addr);
        }

        Self {
            stream,
            metadata,
            read_buffer: Vec::new(),
            read_pos: 0,
            closed: false,
        }
    }

    /// Performs the server side of the handshake on an accepted TCP stream.
    ///
    /// The sub-protocol is echoed when the client offers it.
    pub async fn accept(stream: TcpStream, subprotocol: &str) -> Result<Self, TransportError> {
        let wanted = subprotocol.to_string();
        let callback = move |request: &Request, mut response: Response| {
            let offered = request
                .headers()
                .get(SUBPROTOCOL_HEADER)
                .and_then(|value| value.to_str().ok())
                .map(|list| list.split(',').any(|p| p.trim() == wanted))
                .unwrap_or(false);
            if offered {
                if let Ok(value) = HeaderValue::from_str(&wanted) {
                    response.headers_mut().insert(SUBPROTOCOL_HEADER, value);
                }
            } else {
                warn!(subprotocol = %wanted, "client did not offer the AMQP sub-protocol");
            }
            Ok::<Response, ErrorResponse>(response)
        };

        let ws = tokio_tungstenite::accept_hdr_async(MaybeTlsStream::Plain(stream), callback).await?;
        Ok(Self::from_ws(ws))
    }
}

impl Transport for WebSocketTransport {
    fn metadata(&self) -> &TransportMetadata {
        &self.metadata
    }

    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    fn shutdown(&mut self) -> ShutdownFuture<'_> {
        Box::pin(async move {
            debug!(transport_id = %self.metadata.id, "closing WebSocket transport");
            self.closed = true;
            self.stream.close(None).await?;
            Ok(())
        })
    }
}

impl AsyncRead for WebSocketTransport {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        loop {
            if this.read_pos < this.read_buffer.len() {
                let available = &this.read_buffer[this.read_pos..];
                let n = available.len().min(buf.remaining());
                buf.put_slice(&available[..n]);
                this.read_pos += n;
                return Poll::Ready(Ok(()));
            }
            if this.closed {
                return Poll::Ready(Ok(()));
            }

            match Pin::new(&mut this.stream).poll_next(cx) {
                Poll::Ready(Some(Ok(Message::Binary(data)))) => {
                    this.read_buffer = data;
                    this.read_pos = 0;
                }
                // Control frames are answered by tungstenite itself
                Poll::Ready(Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)))) => {}
                Poll::Ready(Some(Ok(Message::Text(_)))) => {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "received text message on AMQP WebSocket",
                    )));
                }
                Poll::Ready(Some(Ok(Message::Close(_)))) | Poll::Ready(None) => {
                    this.closed = true;
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Err(io::Error::other(e))),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl AsyncWrite for WebSocketTransport {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut stream = Pin::new(&mut self.stream);
        match stream.as_mut().poll_ready(cx) {
            Poll::Ready(Ok(())) => {}
            Poll::Ready(Err(e)) => return Poll::Ready(Err(io::Error::other(e))),
            Poll::Pending => return Poll::Pending,
        }
        stream
            .start_send(Message::Binary(buf.to_vec()))
            .map_err(io::Error::other)?;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream)
            .poll_flush(cx)
            .map_err(io::Error::other)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream)
            .poll_close(cx)
            .map_err(io::Error::other)
    }
}

/// Accepts WebSocket connections on a TCP port.
pub struct WebSocketTransportListener {
    listener: TcpListener,
    subprotocol: String,
    handshake_timeout: Duration,
}

impl WebSocketTransportListener {
    /// Binds a listener to `addr`.
    pub async fn bind(addr: impl Into<String>) -> Result<Self, TransportError> {
        let address = addr.into();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| TransportError::BindFailed {
                address: address.clone(),
                source,
            })?;
        info!(%address, "WebSocket listener bound");
        Ok(Self {
            listener,
            subprotocol: WebSocketSettings::AMQP_SUBPROTOCOL.to_string(),
            handshake_timeout: Duration::from_secs(10),
        })
    }

    /// Overrides the sub-protocol echoed to clients.
    pub fn with_subprotocol(mut self, subprotocol: impl Into<String>) -> Self {
        self.subprotocol = subprotocol.into();
        self
    }

    /// Bounds how long a client may take to complete the HTTP upgrade.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

#[async_trait::async_trait]
impl TransportListener for WebSocketTransportListener {
    async fn accept(&self) -> Result<BoxedTransport, TransportError> {
        let (stream, peer_addr) = self.listener.accept().await?;
        debug!(%peer_addr, "accepted TCP connection for WebSocket upgrade");
        let transport = tokio::time::timeout(
            self.handshake_timeout,
            WebSocketTransport::accept(stream, &self.subprotocol),
        )
        .await
        .map_err(|_| TransportError::WebSocketHandshakeFailed {
            reason: format!("handshake with {peer_addr} timed out"),
        })??;
        Ok(Box::new(transport))
    }

    fn local_addr(&self) -> Result<String, TransportError> {
        Ok(self.listener.local_addr()?.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_websocket_byte_stream() {
        let listener = WebSocketTransportListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let mut transport = listener.accept().await.unwrap();
            let mut header = [0u8; 8];
            transport.read_exact(&mut header).await.unwrap();
            transport.write_all(&header).await.unwrap();
            transport.flush().await.unwrap();
            assert_eq!(transport.kind(), TransportKind::WebSocket);
        });

        let settings = WebSocketSettings::new(format!("ws://{addr}/"));
        let mut client = WebSocketTransport::connect(&settings).await.unwrap();

        // Split across two messages to check they are read as one stream.
        client.write_all(b"AMQP").await.unwrap();
        client.write_all(b"\x03\x01\x00\x00").await.unwrap();
        client.flush().await.unwrap();

        let mut echoed = [0u8; 8];
        client.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"AMQP\x03\x01\x00\x00");
        assert!(client.metadata().peer_addr.is_some());

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_subprotocol_must_be_agreed() {
        let listener = WebSocketTransportListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .with_subprotocol("amqp");
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let settings = WebSocketSettings::new(format!("ws://{addr}/")).with_subprotocol("mqtt");
        assert!(WebSocketTransport::connect(&settings).await.is_err());
    }
}
