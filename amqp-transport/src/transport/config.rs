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

//! Settings for the bottom-most transport of an upgrade chain.
//!
//! A [`TransportSettings`] value describes how an initiator opens its base
//! byte stream; every layer above it is added by a provider.

use crate::transport::{BoxedTransport, TcpTransport, TransportError};
use serde::{Deserialize, Serialize};

/// Default AMQP port.
pub const AMQP_PORT: u16 = 5672;

/// Default AMQPS (TLS) port.
pub const AMQPS_PORT: u16 = 5671;

/// How to open a TCP connection.
///
/// # Examples
///
/// ```rust
/// use amqp_transport::transport::TcpSettings;
///
/// let settings = TcpSettings::new("localhost", 5672)
///     .with_send_buffer_size(256 * 1024)
///     .with_nodelay(true);
/// assert_eq!(settings.address(), "localhost:5672");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpSettings {
    /// Host name or IP address
    pub host: String,
    /// Port
    pub port: u16,
    /// `SO_SNDBUF` size, or the OS default
    pub send_buffer_size: Option<u32>,
    /// `SO_RCVBUF` size, or the OS default
    pub receive_buffer_size: Option<u32>,
    /// Whether to set `TCP_NODELAY`
    pub nodelay: bool,
}

impl TcpSettings {
    /// Creates settings for `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Sets the send buffer size.
    pub fn with_send_buffer_size(mut self, size: u32) -> Self {
        self.send_buffer_size = Some(size);
        self
    }

    /// Sets the receive buffer size.
    pub fn with_receive_buffer_size(mut self, size: u32) -> Self {
        self.receive_buffer_size = Some(size);
        self
    }

    /// Sets `TCP_NODELAY`.
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Returns `host:port`, bracketing IPv6 literals.
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl Default for TcpSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: AMQP_PORT,
            send_buffer_size: None,
            receive_buffer_size: None,
            nodelay: true,
        }
    }
}

/// How to open a WebSocket connection.
///
/// Proxies are not supported; the URL is connected to directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketSettings {
    /// `ws://` or `wss://` URL of the endpoint
    pub url: String,
    /// Value of the `Sec-WebSocket-Protocol` header
    pub subprotocol: String,
}

impl WebSocketSettings {
    /// Default AMQP WebSocket sub-protocol.
    pub const AMQP_SUBPROTOCOL: &'static str = "amqp";

    /// Creates settings for `url` with the `amqp` sub-protocol.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Overrides the sub-protocol.
    pub fn with_subprotocol(mut self, subprotocol: impl Into<String>) -> Self {
        self.subprotocol = subprotocol.into();
        self
    }
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            url: format!("ws://localhost:{AMQP_PORT}/"),
            subprotocol: Self::AMQP_SUBPROTOCOL.to_string(),
        }
    }
}

/// Settings for opening the base transport of an initiator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportSettings {
    /// Plain TCP
    Tcp(TcpSettings),
    /// WebSocket binary stream
    WebSocket(WebSocketSettings),
}

impl TransportSettings {
    /// Opens the base transport.
    pub async fn connect(&self) -> Result<BoxedTransport, TransportError> {
        match self {
            TransportSettings::Tcp(settings) => {
                Ok(Box::new(TcpTransport::connect(settings).await?))
            }
            #[cfg(feature = "websocket")]
            TransportSettings::WebSocket(settings) => Ok(Box::new(
                crate::transport::WebSocketTransport::connect(settings).await?,
            )),
            #[cfg(not(feature = "websocket"))]
            TransportSettings::WebSocket(_) => Err(TransportError::invalid_configuration(
                "WebSocket support is not compiled in",
            )),
        }
    }

    /// Human-readable endpoint, for logs.
    pub fn endpoint(&self) -> String {
        match self {
            TransportSettings::Tcp(settings) => settings.address(),
            TransportSettings::WebSocket(settings) => settings.url.clone(),
        }
    }
}

impl From<TcpSettings> for TransportSettings {
    fn from(settings: TcpSettings) -> Self {
        TransportSettings::Tcp(settings)
    }
}

impl From<WebSocketSettings> for TransportSettings {
    fn from(settings: WebSocketSettings) -> Self {
        TransportSettings::WebSocket(settings)
    }
}
