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

//! Byte-stream transports.
//!
//! The [`Transport`] trait is the capability set every layer of an upgrade
//! chain implements: `AsyncRead + AsyncWrite` plus the security and
//! lifecycle properties negotiation consults. Concrete layers:
//!
//! - [`TcpTransport`]: TCP/IP networking
//! - [`TlsTransport`]: TLS session over another transport (requires `tls` feature)
//! - [`WebSocketTransport`]: binary WebSocket messages (requires `websocket` feature)
//! - [`SaslTransport`](crate::sasl::SaslTransport): a transport whose peer has
//!   been authenticated by SASL
//! - [`MemoryTransport`]: in-process pipe for tests
//!
//! Layers stack through [`BoxedTransport`]: TLS wraps a boxed TCP transport,
//! SASL wraps a boxed TLS transport, and so on. Each layer reports its
//! [`TransportKind`] so a provider can refuse to wrap the wrong layer.
//!
//! # Examples
//!
//! ## In-Memory Transport (for testing)
//!
//! ```rust
//! use amqp_transport::transport::MemoryTransport;
//! use tokio::io::{AsyncReadExt, AsyncWriteExt};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (mut client, mut server) = MemoryTransport::pair(1024);
//!
//! client.write_all(b"Hello").await?;
//!
//! let mut buffer = vec![0u8; 5];
//! server.read_exact(&mut buffer).await?;
//! assert_eq!(&buffer, b"Hello");
//! # Ok(())
//! # }
//! ```
//!
//! ## Opening a base transport
//!
//! ```rust,no_run
//! use amqp_transport::transport::{TcpSettings, TransportSettings};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = TransportSettings::Tcp(TcpSettings::new("broker.example.com", 5672));
//! let transport = settings.connect().await?;
//! println!("connected to {:?}", transport.metadata().peer_addr);
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod memory;
mod tcp;
#[cfg(feature = "tls")]
mod tls;
mod traits;
mod types;
#[cfg(feature = "websocket")]
mod websocket;

pub use config::{AMQP_PORT, AMQPS_PORT, TcpSettings, TransportSettings, WebSocketSettings};
pub use error::TransportError;
pub use memory::MemoryTransport;
pub use tcp::{TcpTransport, TcpTransportListener};
#[cfg(feature = "tls")]
pub use tls::{TlsConfig, TlsTransport};
pub use traits::{BoxedTransport, ShutdownFuture, Transport, TransportKind, TransportListener};
pub use types::{Principal, TransportId, TransportMetadata};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketTransport, WebSocketTransportListener};

#[cfg(all(test, feature = "tls"))]
pub(crate) use tls::test_certs;
