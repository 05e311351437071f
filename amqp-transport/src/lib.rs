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

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

//! # amqp-transport
//!
//! The transport negotiation layer of an AMQP 1.0 stack: everything that
//! happens on a byte stream before the first AMQP frame.
//!
//! - **Protocol headers**: the 8-byte `AMQP` + id + version preamble that
//!   selects the next layer ([`protocol`])
//! - **Provider chain**: TLS, SASL and the terminal AMQP layer, walked in
//!   order by both peers ([`provider`], [`negotiation`])
//! - **SASL**: frame codec, `ANONYMOUS`, `PLAIN` and `EXTERNAL`
//!   mechanisms, pluggable handlers ([`sasl`])
//! - **Transports**: TCP, TLS, WebSocket and in-memory byte streams
//!   ([`transport`])
//! - **Completion contract**: non-blocking operations that either finish
//!   inline or report exactly once through a callback ([`operation`])
//! - **Observability**: negotiation events, tracing and counters
//!   ([`observability`])
//!
//! ## Quick Start
//!
//! ```rust
//! use amqp_transport::negotiation::{AmqpSettings, AmqpTransportInitiator, AmqpTransportListener};
//! use amqp_transport::provider::{AmqpTransportProvider, SaslTransportProvider};
//! use amqp_transport::sasl::{PlainHandler, StaticCredentials};
//! use amqp_transport::transport::{MemoryTransport, TcpSettings};
//! use std::sync::Arc;
//! use tokio::io::AsyncWriteExt;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let server = AmqpTransportListener::new(
//!     AmqpSettings::new()
//!         .with_provider(SaslTransportProvider::new().with_handler(PlainHandler::server(
//!             Arc::new(StaticCredentials::new().with_user("guest", "secret")),
//!         )))
//!         .with_provider(AmqpTransportProvider::new()),
//! )?;
//! let client = AmqpTransportInitiator::new(
//!     AmqpSettings::new()
//!         .with_provider(SaslTransportProvider::new().with_handler(PlainHandler::client("guest", "secret")))
//!         .with_provider(AmqpTransportProvider::new()),
//!     TcpSettings::new("localhost", 5672).into(),
//! )?;
//!
//! let (a, b) = MemoryTransport::pair_default();
//! let (client_side, server_side) = tokio::join!(
//!     async {
//!         let mut transport = client.negotiate(Box::new(a)).await?;
//!         // The connection layer opens with the AMQP header.
//!         transport.write_all(b"AMQP\x00\x01\x00\x00").await?;
//!         Ok::<_, Box<dyn std::error::Error>>(transport)
//!     },
//!     server.negotiate(Box::new(b)),
//! );
//!
//! assert!(client_side?.is_authenticated());
//! let negotiated = server_side?;
//! assert_eq!(negotiated.transport.principal().map(|p| p.name()), Some("guest"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **`tls`** (default): TLS transport and [`provider::TlsTransportProvider`]
//! - **`websocket`** (default): WebSocket base transport
//!
//! ## Error Handling
//!
//! Every fallible operation returns [`AmqpError`]. Transport-level I/O
//! failures are wrapped as [`AmqpError::Transport`] around a
//! [`TransportError`]; classifiers such as
//! [`AmqpError::is_unauthorized`] separate rejected credentials from broken
//! peers.
//!
//! ## Safety
//!
//! This crate is written in 100% safe Rust with `#![deny(unsafe_code)]`.

pub mod buffer;
pub mod error;
pub mod negotiation;
pub mod observability;
pub mod operation;
pub mod protocol;
pub mod provider;
pub mod sasl;
pub mod transport;

pub use error::AmqpError;
pub use negotiation::{AmqpSettings, AmqpTransportInitiator, AmqpTransportListener, NegotiatedTransport};
pub use observability::{NegotiationMetrics, NegotiationObserver, NegotiationRole};
pub use operation::{OperationStatus, TransportOperation};
pub use protocol::{ProtocolHeader, ProtocolId, ProtocolVersion};
pub use provider::{TransportProvider, Upgrade};
pub use transport::{BoxedTransport, Transport, TransportError};
