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

//! Top-level error type for transport negotiation.
//!
//! [`AmqpError`] is the single terminal outcome a caller of the upgrade chain
//! observes. It composes the lower-level errors:
//!
//! 1. **Transport layer**: byte-stream failures ([`TransportError`])
//! 2. **Header exchange**: malformed or mismatching protocol headers
//! 3. **SASL**: frame codec failures, state violations, rejected credentials
//!
//! Every variant is terminal for the negotiation attempt that raised it; the
//! layer that detected it has already aborted the transport it owned.
//!
//! # Examples
//!
//! ```rust
//! use amqp_transport::AmqpError;
//! use amqp_transport::transport::TransportError;
//!
//! let error: AmqpError = TransportError::Closed.into();
//! assert!(error.is_transport_error());
//! assert!(!error.is_unauthorized());
//! ```

use crate::protocol::{DecodeError, ProtocolHeader, ProtocolVersion};
use crate::sasl::{CodecError, SaslCode, SaslState};
use crate::transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Top-level error type for negotiation operations.
#[derive(Debug, Error)]
pub enum AmqpError {
    /// The underlying transport failed (connection reset, TLS or WebSocket
    /// handshake failure, abort under a pending operation).
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A protocol header could not be decoded.
    #[error("malformed protocol header: {0}")]
    Decode(#[from] DecodeError),

    /// A SASL frame could not be decoded or encoded.
    #[error("malformed SASL frame: {0}")]
    Codec(#[from] CodecError),

    /// The peer asked for, or answered with, a protocol id no provider handles.
    #[error("protocol mismatch: offered {}, supported {supported}", display_offered(.offered))]
    ProtocolMismatch {
        /// The header the peer sent, if it could be decoded
        offered: Option<ProtocolHeader>,
        /// The header this side answered with or expected
        supported: ProtocolHeader,
    },

    /// The protocol id matched but the version did not.
    #[error("protocol version {requested} not supported, peer supports {supported}")]
    VersionMismatch {
        /// The header that was requested
        requested: ProtocolHeader,
        /// The version the other side offered instead
        supported: ProtocolVersion,
    },

    /// The initiator shares no SASL mechanism with the server.
    #[error("no supported SASL mechanism among {offered:?}")]
    MechanismNotSupported {
        /// Mechanisms advertised by the server
        offered: Vec<String>,
    },

    /// The acceptor received `sasl-init` for a mechanism it has not registered.
    #[error("SASL mechanism {mechanism} not found")]
    MechanismNotFound {
        /// The mechanism the initiator selected
        mechanism: String,
    },

    /// Credentials were rejected or the authentication payload was malformed.
    #[error("unauthorized: {reason}")]
    Unauthorized {
        /// Description of the rejection
        reason: String,
        /// Outcome code reported by the server, when one was received
        code: Option<SaslCode>,
    },

    /// A SASL frame arrived in a state that does not accept it.
    #[error("illegal SASL state: received {performative} while in {state}")]
    IllegalState {
        /// Negotiator state at the time the frame arrived
        state: SaslState,
        /// Name of the unexpected performative
        performative: &'static str,
    },

    /// The connection-level security policy rejected the transport.
    #[error("transport rejected by security policy: {reason}")]
    InsecureTransport {
        /// Which policy was violated
        reason: String,
    },

    /// The negotiation did not finish within the configured timeout.
    #[error("negotiation timed out after {duration:?}")]
    Timeout {
        /// The timeout that elapsed
        duration: Duration,
    },

    /// A component was used in a way its contract does not allow.
    #[error("invalid operation: {reason}")]
    InvalidOperation {
        /// Description of the violated contract
        reason: String,
    },
}

fn display_offered(offered: &Option<ProtocolHeader>) -> String {
    match offered {
        Some(header) => header.to_string(),
        None => "<undecodable>".to_string(),
    }
}

impl AmqpError {
    /// Creates an [`AmqpError::Unauthorized`] without an outcome code.
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        AmqpError::Unauthorized {
            reason: reason.into(),
            code: None,
        }
    }

    /// Creates an [`AmqpError::InvalidOperation`].
    pub fn invalid_operation(reason: impl Into<String>) -> Self {
        AmqpError::InvalidOperation {
            reason: reason.into(),
        }
    }

    /// Returns `true` if this is a transport error.
    #[must_use]
    pub const fn is_transport_error(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns `true` if credentials were rejected.
    ///
    /// Lets callers tell "bad credentials" apart from "broken peer".
    ///
    /// ```rust
    /// use amqp_transport::AmqpError;
    ///
    /// assert!(AmqpError::unauthorized("bad password").is_unauthorized());
    /// ```
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// Returns `true` if the peer violated the negotiation protocol.
    #[must_use]
    pub const fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::ProtocolMismatch { .. }
                | Self::VersionMismatch { .. }
                | Self::IllegalState { .. }
                | Self::Decode(_)
                | Self::Codec(_)
        )
    }

    /// Returns `true` if the negotiation timed out.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Short, stable label for the error class, used in logs and metrics.
    pub fn class(&self) -> &'static str {
        match self {
            AmqpError::Transport(_) => "transport",
            AmqpError::Decode(_) | AmqpError::Codec(_) => "decode",
            AmqpError::ProtocolMismatch { .. } => "protocol_mismatch",
            AmqpError::VersionMismatch { .. } => "version_mismatch",
            AmqpError::MechanismNotSupported { .. } | AmqpError::MechanismNotFound { .. } => {
                "mechanism"
            }
            AmqpError::Unauthorized { .. } => "unauthorized",
            AmqpError::IllegalState { .. } => "illegal_state",
            AmqpError::InsecureTransport { .. } => "insecure_transport",
            AmqpError::Timeout { .. } => "timeout",
            AmqpError::InvalidOperation { .. } => "invalid_operation",
        }
    }
}

impl From<std::io::Error> for AmqpError {
    fn from(error: std::io::Error) -> Self {
        AmqpError::Transport(TransportError::from(error))
    }
}
