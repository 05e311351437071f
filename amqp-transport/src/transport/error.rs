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

//! Transport layer error types.
//!
//! Transport errors are the lowest level of the error hierarchy and describe
//! failures of the underlying byte stream: connecting, binding, reading,
//! writing, and the TLS and WebSocket handshakes layered on top. The
//! negotiation layer wraps them in [`AmqpError::Transport`](crate::AmqpError).
//!
//! # Recovery Strategy
//!
//! A transport error is always terminal for the negotiation attempt that saw
//! it; the transport is aborted and the error surfaces once. Whether to
//! reconnect is a decision for the caller, informed by
//! [`TransportError::is_recoverable`].

use std::io;
use thiserror::Error;

/// Errors that can occur in the transport layer.
///
/// # Examples
///
/// ```rust
/// use amqp_transport::transport::TransportError;
/// use std::io;
///
/// let error = TransportError::ConnectionFailed {
///     address: "127.0.0.1:5672".to_string(),
///     source: io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"),
/// };
///
/// if error.is_recoverable() {
///     println!("Can retry connection");
/// }
/// ```
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to establish a connection to the remote endpoint.
    #[error("failed to connect to {address}: {source}")]
    ConnectionFailed {
        /// The address that failed to connect
        address: String,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Connection was lost during operation.
    ///
    /// Raised when the peer closes the stream in the middle of a header or
    /// frame, or when the transport was aborted under a pending operation.
    #[error("connection lost: {reason}")]
    ConnectionLost {
        /// Description of why the connection was lost
        reason: String,
        /// The underlying I/O error, if available
        #[source]
        source: Option<io::Error>,
    },

    /// Failed to read from the transport.
    #[error("read failed: {source}")]
    ReadFailed {
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Failed to write to the transport.
    #[error("write failed: {source}")]
    WriteFailed {
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Invalid transport configuration.
    ///
    /// Not recoverable; indicates a programming or deployment error such as
    /// an unparsable certificate or an invalid server name.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Description of the configuration error
        reason: String,
    },

    /// Transport is already closed.
    #[error("transport is closed")]
    Closed,

    /// Failed to bind to the specified address.
    #[error("failed to bind to {address}: {source}")]
    BindFailed {
        /// The address that failed to bind
        address: String,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// An unexpected I/O error occurred.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The TLS handshake could not be completed.
    ///
    /// Covers certificate validation failures as well as I/O faults during
    /// the handshake itself.
    #[cfg(feature = "tls")]
    #[error("TLS handshake failed: {source}")]
    TlsHandshakeFailed {
        /// The underlying I/O error reported by the TLS stream
        #[source]
        source: io::Error,
    },

    /// WebSocket-specific error occurred.
    #[cfg(feature = "websocket")]
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// WebSocket handshake failed.
    ///
    /// Typically the server did not agree to the requested sub-protocol.
    #[cfg(feature = "websocket")]
    #[error("WebSocket handshake failed: {reason}")]
    WebSocketHandshakeFailed {
        /// Description of why the handshake failed
        reason: String,
    },
}

impl TransportError {
    /// Returns `true` if this error is potentially recoverable by reconnecting.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use amqp_transport::transport::TransportError;
    /// use std::io;
    ///
    /// let error = TransportError::ConnectionFailed {
    ///     address: "127.0.0.1:5672".to_string(),
    ///     source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
    /// };
    ///
    /// assert!(error.is_recoverable());
    /// ```
    pub fn is_recoverable(&self) -> bool {
        match self {
            TransportError::ConnectionFailed { .. } | TransportError::ConnectionLost { .. } => true,

            TransportError::ReadFailed { source }
            | TransportError::WriteFailed { source }
            | TransportError::Io { source } => matches!(
                source.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),

            // Certificate problems do not go away on retry
            #[cfg(feature = "tls")]
            TransportError::TlsHandshakeFailed { source } => {
                source.kind() != io::ErrorKind::InvalidData
            }

            #[cfg(feature = "websocket")]
            TransportError::WebSocket(e) => {
                use tokio_tungstenite::tungstenite::Error as WsError;
                matches!(
                    e,
                    WsError::Io(_) | WsError::ConnectionClosed | WsError::AlreadyClosed
                )
            }

            #[cfg(feature = "websocket")]
            TransportError::WebSocketHandshakeFailed { .. } => false,

            TransportError::InvalidConfiguration { .. }
            | TransportError::Closed
            | TransportError::BindFailed { .. } => false,
        }
    }

    /// Returns `true` if this error indicates the transport should be closed.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use amqp_transport::transport::TransportError;
    ///
    /// let error = TransportError::Closed;
    /// assert!(error.should_close_transport());
    /// ```
    pub fn should_close_transport(&self) -> bool {
        match self {
            TransportError::ConnectionLost { .. }
            | TransportError::Closed
            | TransportError::InvalidConfiguration { .. } => true,

            // Raised before a transport exists
            TransportError::ConnectionFailed { .. } | TransportError::BindFailed { .. } => false,

            TransportError::ReadFailed { source }
            | TransportError::WriteFailed { source }
            | TransportError::Io { source } => !matches!(
                source.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
            ),

            #[cfg(feature = "tls")]
            TransportError::TlsHandshakeFailed { .. } => true,

            #[cfg(feature = "websocket")]
            TransportError::WebSocket(_) | TransportError::WebSocketHandshakeFailed { .. } => true,
        }
    }

    /// Maps an I/O error from a read into the matching transport error.
    ///
    /// An unexpected end of stream means the peer went away mid-exchange.
    pub fn from_read(source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::UnexpectedEof {
            TransportError::ConnectionLost {
                reason: "peer closed the stream".to_string(),
                source: Some(source),
            }
        } else {
            TransportError::ReadFailed { source }
        }
    }

    /// Maps an I/O error from a write into the matching transport error.
    pub fn from_write(source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset => {
                TransportError::ConnectionLost {
                    reason: "peer reset the stream".to_string(),
                    source: Some(source),
                }
            }
            _ => TransportError::WriteFailed { source },
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_configuration(reason: impl Into<String>) -> Self {
        TransportError::InvalidConfiguration {
            reason: reason.into(),
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(error: io::Error) -> Self {
        TransportError::Io { source: error }
    }
}
