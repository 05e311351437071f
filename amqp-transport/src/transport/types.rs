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

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global counter for generating unique transport IDs.
static NEXT_TRANSPORT_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a transport connection.
///
/// An upgraded transport (TLS, SASL) keeps the identifier of the transport it
/// wraps, so every log line for one logical connection carries the same ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportId(u64);

impl TransportId {
    /// Creates a new transport ID.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates the next process-unique transport ID.
    pub fn next() -> Self {
        Self(NEXT_TRANSPORT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Transport({})", self.0)
    }
}

/// Metadata associated with a transport connection.
///
/// This provides the local and remote endpoints of the connection along with
/// a short label naming the layer (e.g. `"tcp"`, `"tls"`, `"sasl"`).
#[derive(Debug, Clone)]
pub struct TransportMetadata {
    /// Unique identifier for this transport
    pub id: TransportId,

    /// Local address of the connection, if available
    pub local_addr: Option<SocketAddr>,

    /// Remote peer address, if available
    pub peer_addr: Option<SocketAddr>,

    /// Layer label (e.g., "tcp", "memory", "tls", "sasl")
    pub transport_type: String,

    /// When the transport was created
    pub created_at: std::time::Instant,
}

impl TransportMetadata {
    /// Creates new transport metadata.
    pub fn new(id: TransportId, transport_type: impl Into<String>) -> Self {
        Self {
            id,
            local_addr: None,
            peer_addr: None,
            transport_type: transport_type.into(),
            created_at: std::time::Instant::now(),
        }
    }

    /// Sets the local address.
    pub fn with_local_addr(mut self, addr: SocketAddr) -> Self {
        self.local_addr = Some(addr);
        self
    }

    /// Sets the peer address.
    pub fn with_peer_addr(mut self, addr: SocketAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }

    /// Derives metadata for a transport layered on top of this one.
    ///
    /// The identifier and both endpoints carry over; only the layer label
    /// and creation time change.
    pub fn wrapped(&self, transport_type: impl Into<String>) -> Self {
        Self {
            id: self.id,
            local_addr: self.local_addr,
            peer_addr: self.peer_addr,
            transport_type: transport_type.into(),
            created_at: std::time::Instant::now(),
        }
    }

    /// Returns the age of this transport.
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }
}

/// Identity established for the peer of a transport.
///
/// Produced by SASL mechanisms that verify credentials (PLAIN) or that trust a
/// lower layer (EXTERNAL).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    name: String,
    mechanism: String,
}

impl Principal {
    /// Creates a principal authenticated by `mechanism`.
    pub fn new(name: impl Into<String>, mechanism: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mechanism: mechanism.into(),
        }
    }

    /// The authenticated identity.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the mechanism that established the identity.
    pub fn mechanism(&self) -> &str {
        &self.mechanism
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.mechanism)
    }
}
