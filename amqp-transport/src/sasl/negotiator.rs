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

//! The SASL negotiation state machine.
//!
//! ```text
//! acceptor:  Start ──send mechanisms──▶ WaitingForInit ──init──▶ Negotiating ──outcome──▶ End
//!                                                                  ▲      │
//!                                                                  └resp──┘ (challenge)
//!
//! initiator: Start ──▶ WaitingForServerMechanisms ──mechanisms/send init──▶ Negotiating ──outcome──▶ End
//!                                                                          ▲      │
//!                                                                          └chal──┘ (response)
//! ```
//!
//! A frame that the current state does not accept fails the negotiation
//! with [`AmqpError::IllegalState`] before any handler method runs.

use super::frame::{MAX_SASL_FRAME_SIZE, read_frame, write_frame};
use super::handler::{MechanismRegistry, SaslContext, SaslHandler, SaslStep};
use super::performative::{
    SaslChallenge, SaslCode, SaslInit, SaslMechanisms, SaslOutcome, SaslPerformative,
    SaslResponse,
};
use super::transport::SaslTransport;
use crate::buffer::{NoPool, SharedBufferPool};
use crate::error::AmqpError;
use crate::observability::{NegotiationRole, NoopObserver, SharedObserver};
use crate::transport::{BoxedTransport, TransportId};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// State of a [`SaslNegotiator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaslState {
    /// Nothing sent or received yet.
    Start,
    /// Initiator waiting for `sasl-mechanisms`.
    WaitingForServerMechanisms,
    /// Acceptor waiting for `sasl-init`.
    WaitingForInit,
    /// Mechanism selected; challenges and responses may flow.
    Negotiating,
    /// `sasl-outcome` sent or received.
    End,
}

impl fmt::Display for SaslState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SaslState::Start => "start",
            SaslState::WaitingForServerMechanisms => "waiting-for-server-mechanisms",
            SaslState::WaitingForInit => "waiting-for-init",
            SaslState::Negotiating => "negotiating",
            SaslState::End => "end",
        };
        f.write_str(name)
    }
}

enum Progress {
    Continue,
    Complete,
}

/// Runs one SASL exchange over a transport.
///
/// A negotiator is single use: [`SaslNegotiator::negotiate`] consumes it.
/// Handlers are cloned from the shared registry, so concurrent negotiators
/// never share handler state.
pub struct SaslNegotiator {
    role: NegotiationRole,
    mechanisms: Arc<MechanismRegistry>,
    state: SaslState,
    handler: Option<Box<dyn SaslHandler>>,
    hostname: Option<String>,
    max_frame_size: usize,
    pool: SharedBufferPool,
    observer: SharedObserver,
    transport_id: Option<TransportId>,
}

impl SaslNegotiator {
    /// Creates a negotiator for `role` over the given mechanisms.
    pub fn new(role: NegotiationRole, mechanisms: Arc<MechanismRegistry>) -> Self {
        Self {
            role,
            mechanisms,
            state: SaslState::Start,
            handler: None,
            hostname: None,
            max_frame_size: MAX_SASL_FRAME_SIZE,
            pool: Arc::new(NoPool),
            observer: Arc::new(NoopObserver),
            transport_id: None,
        }
    }

    /// Sets the host name the initiator sends in `sasl-init`.
    pub fn with_hostname(mut self, hostname: Option<String>) -> Self {
        self.hostname = hostname;
        self
    }

    /// Sets the largest frame accepted from the peer.
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Sets the pool frame buffers are rented from.
    pub fn with_buffer_pool(mut self, pool: SharedBufferPool) -> Self {
        self.pool = pool;
        self
    }

    /// Sets the observer that receives the outcome.
    pub fn with_observer(mut self, observer: SharedObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Current state.
    pub fn state(&self) -> SaslState {
        self.state
    }

    /// Runs the exchange to completion.
    ///
    /// On success the transport comes back wrapped in a [`SaslTransport`]
    /// carrying the principal. On failure it is aborted.
    pub async fn negotiate(mut self, mut transport: BoxedTransport) -> Result<SaslTransport, AmqpError> {
        self.transport_id = Some(transport.metadata().id);
        match self.run(&mut transport).await {
            Ok(()) => {
                let (mechanism, principal) = match &self.handler {
                    Some(handler) => (handler.mechanism().to_string(), handler.principal()),
                    None => (String::new(), None),
                };
                debug!(
                    transport_id = %transport.metadata().id,
                    role = %self.role,
                    mechanism = %mechanism,
                    authenticated = principal.is_some(),
                    "SASL negotiation complete"
                );
                Ok(SaslTransport::new(transport, mechanism, principal))
            }
            Err(error) => {
                debug!(
                    transport_id = %transport.metadata().id,
                    role = %self.role,
                    state = %self.state,
                    %error,
                    "SASL negotiation failed"
                );
                transport.abort();
                Err(error)
            }
        }
    }

    async fn run(&mut self, transport: &mut BoxedTransport) -> Result<(), AmqpError> {
        let context = SaslContext {
            is_initiator: self.role.is_initiator(),
            hostname: self.hostname.clone(),
            inner_secure: transport.is_secure(),
            inner_principal: transport.principal().cloned(),
        };

        match self.role {
            NegotiationRole::Initiator => {
                self.state = SaslState::WaitingForServerMechanisms;
            }
            NegotiationRole::Acceptor => {
                if self.mechanisms.is_empty() {
                    return Err(AmqpError::invalid_operation("no SASL mechanisms registered"));
                }
                let mechanisms = SaslPerformative::Mechanisms(SaslMechanisms {
                    mechanisms: self.mechanisms.names(),
                });
                write_frame(transport, &mechanisms, self.pool.as_ref()).await?;
                self.state = SaslState::WaitingForInit;
            }
        }

        loop {
            let frame = read_frame(transport, self.max_frame_size, self.pool.as_ref()).await?;
            trace!(state = %self.state, %frame, "dispatching SASL frame");
            if let Progress::Complete = self.dispatch(transport, &context, frame).await? {
                return Ok(());
            }
        }
    }

    async fn dispatch(
        &mut self,
        transport: &mut BoxedTransport,
        context: &SaslContext,
        frame: SaslPerformative,
    ) -> Result<Progress, AmqpError> {
        use NegotiationRole::{Acceptor, Initiator};
        use SaslState::{Negotiating, WaitingForInit, WaitingForServerMechanisms};

        match (self.role, self.state, frame) {
            (Initiator, WaitingForServerMechanisms, SaslPerformative::Mechanisms(m)) => {
                self.on_mechanisms(transport, context, m).await
            }
            (Initiator, Negotiating, SaslPerformative::Challenge(c)) => {
                self.on_challenge(transport, c).await
            }
            (Initiator, Negotiating, SaslPerformative::Outcome(o)) => self.on_outcome(o),
            (Acceptor, WaitingForInit, SaslPerformative::Init(i)) => {
                self.on_init(transport, context, i).await
            }
            (Acceptor, Negotiating, SaslPerformative::Response(r)) => {
                self.on_response(transport, r).await
            }
            (_, state, frame) => Err(AmqpError::IllegalState {
                state,
                performative: frame.name(),
            }),
        }
    }

    fn mechanism(&self) -> &str {
        self.handler.as_ref().map_or("", |h| h.mechanism())
    }

    fn handler(&mut self) -> Result<&mut Box<dyn SaslHandler>, AmqpError> {
        self.handler
            .as_mut()
            .ok_or_else(|| AmqpError::invalid_operation("no SASL mechanism selected"))
    }

    fn record_outcome(&self, code: SaslCode) {
        if let Some(id) = self.transport_id {
            self.observer
                .on_sasl_outcome(self.role, id, self.mechanism(), code);
        }
    }

    async fn on_mechanisms(
        &mut self,
        transport: &mut BoxedTransport,
        context: &SaslContext,
        offered: SaslMechanisms,
    ) -> Result<Progress, AmqpError> {
        let handler = self
            .mechanisms
            .select(&offered.mechanisms)
            .map(|prototype| prototype.clone_handler())
            .ok_or_else(|| AmqpError::MechanismNotSupported {
                offered: offered.mechanisms.clone(),
            })?;
        debug!(mechanism = handler.mechanism(), offered = ?offered.mechanisms, "selected SASL mechanism");

        self.state = SaslState::Negotiating;
        let handler = self.handler.insert(handler);
        let initial_response = match handler.on_start(context, None).await? {
            SaslStep::Init { initial_response } => initial_response,
            other => return Err(unexpected_step(self.role, &other)),
        };

        let init = SaslPerformative::Init(SaslInit {
            mechanism: handler.mechanism().to_string(),
            initial_response,
            hostname: context.hostname.clone(),
        });
        write_frame(transport, &init, self.pool.as_ref()).await?;
        Ok(Progress::Continue)
    }

    async fn on_challenge(
        &mut self,
        transport: &mut BoxedTransport,
        challenge: SaslChallenge,
    ) -> Result<Progress, AmqpError> {
        let step = self.handler()?.on_challenge(&challenge).await?;
        let response = match step {
            SaslStep::Response(response) => response,
            other => return Err(unexpected_step(self.role, &other)),
        };
        let response = SaslPerformative::Response(SaslResponse { response });
        write_frame(transport, &response, self.pool.as_ref()).await?;
        Ok(Progress::Continue)
    }

    fn on_outcome(&mut self, outcome: SaslOutcome) -> Result<Progress, AmqpError> {
        self.state = SaslState::End;
        self.record_outcome(outcome.code);
        if outcome.code.is_ok() {
            return Ok(Progress::Complete);
        }
        Err(AmqpError::Unauthorized {
            reason: format!("server rejected {} with {}", self.mechanism(), outcome.code),
            code: Some(outcome.code),
        })
    }

    async fn on_init(
        &mut self,
        transport: &mut BoxedTransport,
        context: &SaslContext,
        init: SaslInit,
    ) -> Result<Progress, AmqpError> {
        let Some(prototype) = self.mechanisms.find(&init.mechanism) else {
            self.state = SaslState::End;
            self.send_outcome(transport, SaslCode::Auth).await;
            return Err(AmqpError::MechanismNotFound {
                mechanism: init.mechanism,
            });
        };
        debug!(mechanism = %init.mechanism, hostname = ?init.hostname, "peer selected SASL mechanism");

        let handler = self.handler.insert(prototype.clone_handler());
        self.state = SaslState::Negotiating;
        let step = handler.on_start(context, Some(&init)).await;
        self.acceptor_step(transport, step).await
    }

    async fn on_response(
        &mut self,
        transport: &mut BoxedTransport,
        response: SaslResponse,
    ) -> Result<Progress, AmqpError> {
        let step = match self.handler() {
            Ok(handler) => handler.on_response(&response).await,
            Err(error) => Err(error),
        };
        self.acceptor_step(transport, step).await
    }

    async fn acceptor_step(
        &mut self,
        transport: &mut BoxedTransport,
        step: Result<SaslStep, AmqpError>,
    ) -> Result<Progress, AmqpError> {
        match step {
            Ok(SaslStep::Challenge(challenge)) => {
                let challenge = SaslPerformative::Challenge(SaslChallenge { challenge });
                write_frame(transport, &challenge, self.pool.as_ref()).await?;
                Ok(Progress::Continue)
            }
            Ok(SaslStep::Complete(code)) => {
                self.state = SaslState::End;
                let outcome = SaslPerformative::Outcome(SaslOutcome {
                    code,
                    additional_data: None,
                });
                write_frame(transport, &outcome, self.pool.as_ref()).await?;
                self.record_outcome(code);
                if code.is_ok() {
                    Ok(Progress::Complete)
                } else {
                    Err(AmqpError::Unauthorized {
                        reason: format!("{} rejected the peer", self.mechanism()),
                        code: Some(code),
                    })
                }
            }
            Ok(other) => Err(self.reject(transport, unexpected_step(self.role, &other)).await),
            Err(error) => Err(self.reject(transport, error).await),
        }
    }

    /// Reports a handler failure to the peer and returns the error to raise.
    async fn reject(&mut self, transport: &mut BoxedTransport, error: AmqpError) -> AmqpError {
        let code = if error.is_unauthorized() {
            SaslCode::Auth
        } else {
            SaslCode::Sys
        };
        self.state = SaslState::End;
        self.send_outcome(transport, code).await;
        self.record_outcome(code);
        match error {
            AmqpError::Unauthorized { reason, code: None } => AmqpError::Unauthorized {
                reason,
                code: Some(code),
            },
            other => other,
        }
    }

    /// Best-effort `sasl-outcome` before a failure; the failure is what
    /// the caller reports either way.
    async fn send_outcome(&self, transport: &mut BoxedTransport, code: SaslCode) {
        let outcome = SaslPerformative::Outcome(SaslOutcome {
            code,
            additional_data: None,
        });
        if let Err(error) = write_frame(transport, &outcome, self.pool.as_ref()).await {
            debug!(%error, "could not send SASL outcome");
        }
    }
}

fn unexpected_step(role: NegotiationRole, step: &SaslStep) -> AmqpError {
    AmqpError::invalid_operation(format!("SASL handler returned {step:?} on the {role}"))
}

impl fmt::Debug for SaslNegotiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaslNegotiator")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("mechanisms", &self.mechanisms)
            .field("selected", &self.handler.as_ref().map(|h| h.mechanism().to_string()))
            .finish()
    }
}
