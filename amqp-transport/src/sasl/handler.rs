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

//! The SASL mechanism interface.
//!
//! A [`SaslHandler`] implements one mechanism for one side of an exchange.
//! Handlers registered with a [`MechanismRegistry`] are prototypes: every
//! negotiation works on a fresh copy obtained through
//! [`SaslHandler::clone_handler`], so per-exchange state never leaks between
//! connections.
//!
//! The negotiator drives a handler through these steps:
//!
//! | Side      | Call            | Expected step                              |
//! |-----------|-----------------|--------------------------------------------|
//! | initiator | `on_start`      | [`SaslStep::Init`]                         |
//! | initiator | `on_challenge`  | [`SaslStep::Response`]                     |
//! | acceptor  | `on_start`      | [`SaslStep::Challenge`] or [`SaslStep::Complete`] |
//! | acceptor  | `on_response`   | [`SaslStep::Challenge`] or [`SaslStep::Complete`] |

use super::performative::{SaslChallenge, SaslCode, SaslInit, SaslResponse};
use crate::error::AmqpError;
use crate::transport::Principal;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;

/// What a handler knows about the connection it authenticates.
#[derive(Debug, Clone, Default)]
pub struct SaslContext {
    /// Whether this side started the connection
    pub is_initiator: bool,
    /// Host name the initiator announces in `sasl-init`
    pub hostname: Option<String>,
    /// Whether the transport underneath is encrypted
    pub inner_secure: bool,
    /// Identity established by the transport underneath, such as a verified
    /// TLS client certificate
    pub inner_principal: Option<Principal>,
}

/// The next action a handler asks the negotiator to take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaslStep {
    /// Send `sasl-init` for this mechanism.
    Init {
        /// Initial response carried in `sasl-init`
        initial_response: Option<Bytes>,
    },
    /// Send `sasl-response`.
    Response(Bytes),
    /// Send `sasl-challenge`.
    Challenge(Bytes),
    /// Send `sasl-outcome` and finish.
    Complete(SaslCode),
}

/// One SASL mechanism, for one side of the exchange.
///
/// `on_challenge` and `on_response` default to
/// [`AmqpError::InvalidOperation`]; mechanisms that never exchange a
/// challenge leave them alone.
#[async_trait]
pub trait SaslHandler: Send + Sync {
    /// Mechanism name, such as `PLAIN`.
    fn mechanism(&self) -> &str;

    /// Returns a fresh copy for a new exchange.
    fn clone_handler(&self) -> Box<dyn SaslHandler>;

    /// Starts the exchange.
    ///
    /// On the initiator `init` is `None`; on the acceptor it is the received
    /// `sasl-init`.
    async fn on_start(
        &mut self,
        context: &SaslContext,
        init: Option<&SaslInit>,
    ) -> Result<SaslStep, AmqpError>;

    /// Handles a `sasl-challenge` on the initiator.
    async fn on_challenge(&mut self, challenge: &SaslChallenge) -> Result<SaslStep, AmqpError> {
        let _ = challenge;
        Err(AmqpError::invalid_operation(format!(
            "{} does not expect a challenge",
            self.mechanism()
        )))
    }

    /// Handles a `sasl-response` on the acceptor.
    async fn on_response(&mut self, response: &SaslResponse) -> Result<SaslStep, AmqpError> {
        let _ = response;
        Err(AmqpError::invalid_operation(format!(
            "{} does not expect a response",
            self.mechanism()
        )))
    }

    /// Identity established by a completed exchange.
    fn principal(&self) -> Option<Principal> {
        None
    }
}

/// Ordered set of mechanism prototypes.
///
/// Order is preference: the acceptor advertises mechanisms in this order
/// and the initiator picks the first of its own that the server offers.
/// Names compare case-insensitively.
#[derive(Default)]
pub struct MechanismRegistry {
    handlers: Vec<Box<dyn SaslHandler>>,
}

impl MechanismRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler`, replacing any handler for the same mechanism
    /// in its current position.
    pub fn add(&mut self, handler: Box<dyn SaslHandler>) {
        match self
            .handlers
            .iter()
            .position(|h| h.mechanism().eq_ignore_ascii_case(handler.mechanism()))
        {
            Some(idx) => self.handlers[idx] = handler,
            None => self.handlers.push(handler),
        }
    }

    /// Mechanism names in preference order.
    pub fn names(&self) -> Vec<String> {
        self.handlers.iter().map(|h| h.mechanism().to_string()).collect()
    }

    /// Finds the handler for `mechanism`.
    pub fn find(&self, mechanism: &str) -> Option<&dyn SaslHandler> {
        self.handlers
            .iter()
            .find(|h| h.mechanism().eq_ignore_ascii_case(mechanism))
            .map(|h| &**h)
    }

    /// Picks the first local mechanism that appears in `offered`.
    pub fn select(&self, offered: &[String]) -> Option<&dyn SaslHandler> {
        self.handlers
            .iter()
            .find(|h| {
                offered
                    .iter()
                    .any(|name| name.eq_ignore_ascii_case(h.mechanism()))
            })
            .map(|h| &**h)
    }

    /// Number of registered mechanisms.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Clone for MechanismRegistry {
    fn clone(&self) -> Self {
        Self {
            handlers: self.handlers.iter().map(|h| h.clone_handler()).collect(),
        }
    }
}

impl fmt::Debug for MechanismRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
