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

//! Negotiation events and counters.
//!
//! Every negotiation reports its progress to a [`NegotiationObserver`]
//! configured on [`AmqpSettings`](crate::negotiation::AmqpSettings). Three
//! implementations ship with the crate:
//!
//! - [`TracingObserver`] (the default): emits `tracing` events
//! - [`NegotiationMetrics`]: atomic counters for dashboards and tests
//! - [`NoopObserver`]: discards everything
//!
//! # Example
//!
//! ```rust
//! use amqp_transport::negotiation::AmqpSettings;
//! use amqp_transport::observability::NegotiationMetrics;
//! use std::sync::Arc;
//!
//! let metrics = Arc::new(NegotiationMetrics::new());
//! let settings = AmqpSettings::new().with_observer(metrics.clone());
//!
//! // ... negotiate ...
//!
//! println!("{} header exchanges", metrics.headers_sent());
//! ```

use crate::error::AmqpError;
use crate::protocol::ProtocolHeader;
use crate::sasl::SaslCode;
use crate::transport::{TransportId, TransportKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Which side of the connection a negotiation runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationRole {
    /// The side that opened the connection.
    Initiator,
    /// The side that accepted it.
    Acceptor,
}

impl NegotiationRole {
    /// Returns `true` for [`NegotiationRole::Initiator`].
    pub fn is_initiator(self) -> bool {
        self == NegotiationRole::Initiator
    }
}

impl fmt::Display for NegotiationRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NegotiationRole::Initiator => f.write_str("initiator"),
            NegotiationRole::Acceptor => f.write_str("acceptor"),
        }
    }
}

/// Receives negotiation events.
///
/// All methods default to doing nothing. Implementations are called inline
/// from the negotiation task and must not block.
pub trait NegotiationObserver: Send + Sync {
    /// A negotiation started on transport `id`.
    fn on_started(&self, role: NegotiationRole, id: TransportId) {
        let _ = (role, id);
    }

    /// A protocol header was written.
    fn on_header_sent(&self, role: NegotiationRole, id: TransportId, header: &ProtocolHeader) {
        let _ = (role, id, header);
    }

    /// A protocol header was read.
    fn on_header_received(&self, role: NegotiationRole, id: TransportId, header: &ProtocolHeader) {
        let _ = (role, id, header);
    }

    /// A provider wrapped the transport in a new layer.
    fn on_upgraded(&self, role: NegotiationRole, id: TransportId, kind: TransportKind) {
        let _ = (role, id, kind);
    }

    /// A SASL exchange ended with `code`.
    fn on_sasl_outcome(&self, role: NegotiationRole, id: TransportId, mechanism: &str, code: SaslCode) {
        let _ = (role, id, mechanism, code);
    }

    /// The negotiation produced a transport for the connection layer.
    fn on_completed(&self, role: NegotiationRole, id: TransportId, elapsed: Duration) {
        let _ = (role, id, elapsed);
    }

    /// The negotiation failed.
    fn on_failed(&self, role: NegotiationRole, id: Option<TransportId>, error: &AmqpError) {
        let _ = (role, id, error);
    }

    /// The negotiation was dropped before it finished, by a shutdown or by
    /// a caller that stopped waiting.
    fn on_cancelled(&self, role: NegotiationRole, id: Option<TransportId>) {
        let _ = (role, id);
    }
}

/// Shared handle to an observer.
pub type SharedObserver = Arc<dyn NegotiationObserver>;

/// Discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl NegotiationObserver for NoopObserver {}

/// Emits every event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl NegotiationObserver for TracingObserver {
    fn on_started(&self, role: NegotiationRole, id: TransportId) {
        debug!(%role, transport_id = %id, "negotiation started");
    }

    fn on_header_sent(&self, role: NegotiationRole, id: TransportId, header: &ProtocolHeader) {
        debug!(%role, transport_id = %id, %header, "sent protocol header");
    }

    fn on_header_received(&self, role: NegotiationRole, id: TransportId, header: &ProtocolHeader) {
        debug!(%role, transport_id = %id, %header, "received protocol header");
    }

    fn on_upgraded(&self, role: NegotiationRole, id: TransportId, kind: TransportKind) {
        debug!(%role, transport_id = %id, %kind, "transport upgraded");
    }

    fn on_sasl_outcome(&self, role: NegotiationRole, id: TransportId, mechanism: &str, code: SaslCode) {
        if code.is_ok() {
            debug!(%role, transport_id = %id, mechanism, %code, "SASL exchange complete");
        } else {
            warn!(%role, transport_id = %id, mechanism, %code, "SASL exchange rejected");
        }
    }

    fn on_completed(&self, role: NegotiationRole, id: TransportId, elapsed: Duration) {
        info!(%role, transport_id = %id, ?elapsed, "negotiation complete");
    }

    fn on_failed(&self, role: NegotiationRole, id: Option<TransportId>, error: &AmqpError) {
        match id {
            Some(id) => warn!(%role, transport_id = %id, class = error.class(), %error, "negotiation failed"),
            None => warn!(%role, class = error.class(), %error, "negotiation failed"),
        }
    }

    fn on_cancelled(&self, role: NegotiationRole, id: Option<TransportId>) {
        debug!(%role, transport_id = ?id, "negotiation cancelled");
    }
}

/// Atomic counters over negotiation events.
#[derive(Debug, Default)]
pub struct NegotiationMetrics {
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    headers_sent: AtomicU64,
    headers_received: AtomicU64,
    upgrades: AtomicU64,
    sasl_ok: AtomicU64,
    sasl_rejected: AtomicU64,
    total_latency_us: AtomicU64,
    failures_by_class: Mutex<HashMap<&'static str, u64>>,
}

impl NegotiationMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Negotiations dropped before they finished.
    #[must_use]
    pub fn cancelled(&self) -> u64 {
        self.cancelled.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn headers_sent(&self) -> u64 {
        self.headers_sent.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn headers_received(&self) -> u64 {
        self.headers_received.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn upgrades(&self) -> u64 {
        self.upgrades.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn sasl_ok(&self) -> u64 {
        self.sasl_ok.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn sasl_rejected(&self) -> u64 {
        self.sasl_rejected.load(Ordering::Relaxed)
    }

    /// Failures recorded for an [`AmqpError::class`] label.
    #[must_use]
    pub fn failures(&self, class: &str) -> u64 {
        self.failures_by_class.lock().get(class).copied().unwrap_or(0)
    }

    /// Mean time from start to completion of successful negotiations.
    #[must_use]
    pub fn average_latency(&self) -> Option<Duration> {
        let completed = self.completed();
        if completed == 0 {
            return None;
        }
        Some(Duration::from_micros(
            self.total_latency_us.load(Ordering::Relaxed) / completed,
        ))
    }

    pub fn reset(&self) {
        self.started.store(0, Ordering::Relaxed);
        self.completed.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.cancelled.store(0, Ordering::Relaxed);
        self.headers_sent.store(0, Ordering::Relaxed);
        self.headers_received.store(0, Ordering::Relaxed);
        self.upgrades.store(0, Ordering::Relaxed);
        self.sasl_ok.store(0, Ordering::Relaxed);
        self.sasl_rejected.store(0, Ordering::Relaxed);
        self.total_latency_us.store(0, Ordering::Relaxed);
        self.failures_by_class.lock().clear();
    }
}

impl NegotiationObserver for NegotiationMetrics {
    fn on_started(&self, _role: NegotiationRole, _id: TransportId) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    fn on_header_sent(&self, _role: NegotiationRole, _id: TransportId, _header: &ProtocolHeader) {
        self.headers_sent.fetch_add(1, Ordering::Relaxed);
    }

    fn on_header_received(&self, _role: NegotiationRole, _id: TransportId, _header: &ProtocolHeader) {
        self.headers_received.fetch_add(1, Ordering::Relaxed);
    }

    fn on_upgraded(&self, _role: NegotiationRole, _id: TransportId, _kind: TransportKind) {
        self.upgrades.fetch_add(1, Ordering::Relaxed);
    }

    fn on_sasl_outcome(&self, _role: NegotiationRole, _id: TransportId, _mechanism: &str, code: SaslCode) {
        if code.is_ok() {
            self.sasl_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.sasl_rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn on_completed(&self, _role: NegotiationRole, _id: TransportId, elapsed: Duration) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    fn on_failed(&self, _role: NegotiationRole, _id: Option<TransportId>, error: &AmqpError) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        *self.failures_by_class.lock().entry(error.class()).or_insert(0) += 1;
    }

    fn on_cancelled(&self, _role: NegotiationRole, _id: Option<TransportId>) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ProtocolId, ProtocolVersion};

    #[test]
    fn test_metrics_count_events() {
        let metrics = NegotiationMetrics::new();
        let id = TransportId::new(7);
        let header = ProtocolHeader::new(ProtocolId::Sasl, ProtocolVersion::V1_0_0);

        metrics.on_started(NegotiationRole::Initiator, id);
        metrics.on_header_sent(NegotiationRole::Initiator, id, &header);
        metrics.on_header_received(NegotiationRole::Initiator, id, &header);
        metrics.on_upgraded(NegotiationRole::Initiator, id, TransportKind::Sasl);
        metrics.on_sasl_outcome(NegotiationRole::Initiator, id, "PLAIN", SaslCode::Ok);
        metrics.on_completed(NegotiationRole::Initiator, id, Duration::from_millis(4));

        assert_eq!(metrics.started(), 1);
        assert_eq!(metrics.headers_sent(), 1);
        assert_eq!(metrics.headers_received(), 1);
        assert_eq!(metrics.upgrades(), 1);
        assert_eq!(metrics.sasl_ok(), 1);
        assert_eq!(metrics.completed(), 1);
        assert_eq!(metrics.average_latency(), Some(Duration::from_millis(4)));
    }

    #[test]
    fn test_failures_by_class() {
        let metrics = NegotiationMetrics::new();
        let timeout = AmqpError::Timeout {
            duration: Duration::from_secs(1),
        };
        metrics.on_failed(NegotiationRole::Acceptor, None, &timeout);
        metrics.on_failed(NegotiationRole::Acceptor, None, &timeout);
        metrics.on_failed(NegotiationRole::Acceptor, None, &AmqpError::unauthorized("no"));

        assert_eq!(metrics.failed(), 3);
        assert_eq!(metrics.failures("timeout"), 2);
        assert_eq!(metrics.failures("unauthorized"), 1);
        assert_eq!(metrics.failures("decode"), 0);

        metrics.reset();
        assert_eq!(metrics.failed(), 0);
        assert_eq!(metrics.failures("timeout"), 0);
        assert_eq!(metrics.average_latency(), None);
    }

    #[test]
    fn test_role_display() {
        assert_eq!(NegotiationRole::Initiator.to_string(), "initiator");
        assert!(!NegotiationRole::Acceptor.is_initiator());
    }
}
