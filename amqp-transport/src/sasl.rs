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

//! SASL authentication over AMQP SASL frames.
//!
//! After both peers agree on the SASL protocol header, the acceptor
//! advertises its mechanisms, the initiator picks one and the two exchange
//! challenges and responses until the acceptor sends an outcome. A
//! [`SaslNegotiator`] runs that exchange for one side; the mechanisms
//! themselves are [`SaslHandler`] implementations:
//!
//! - [`AnonymousHandler`]: no credentials
//! - [`PlainHandler`]: username and password, checked by a [`PlainAuthenticator`]
//! - [`ExternalHandler`]: identity established by the transport underneath
//!
//! # Example
//!
//! ```rust
//! use amqp_transport::observability::NegotiationRole;
//! use amqp_transport::sasl::{
//!     AnonymousHandler, MechanismRegistry, PlainHandler, SaslNegotiator, StaticCredentials,
//! };
//! use amqp_transport::transport::MemoryTransport;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), amqp_transport::AmqpError> {
//! let mut server_mechanisms = MechanismRegistry::new();
//! server_mechanisms.add(Box::new(PlainHandler::server(Arc::new(
//!     StaticCredentials::new().with_user("alice", "secret"),
//! ))));
//! server_mechanisms.add(Box::new(AnonymousHandler::new()));
//!
//! let mut client_mechanisms = MechanismRegistry::new();
//! client_mechanisms.add(Box::new(PlainHandler::client("alice", "secret")));
//!
//! let (client, server) = MemoryTransport::pair_default();
//! let initiator = SaslNegotiator::new(NegotiationRole::Initiator, Arc::new(client_mechanisms));
//! let acceptor = SaslNegotiator::new(NegotiationRole::Acceptor, Arc::new(server_mechanisms));
//!
//! let (client, server) = tokio::join!(
//!     initiator.negotiate(Box::new(client)),
//!     acceptor.negotiate(Box::new(server)),
//! );
//! client?;
//! assert_eq!(server?.mechanism(), "PLAIN");
//! # Ok(())
//! # }
//! ```

mod anonymous;
mod codec;
mod external;
mod frame;
mod handler;
mod negotiator;
mod performative;
mod plain;
mod transport;

pub use anonymous::AnonymousHandler;
pub use codec::CodecError;
pub use external::ExternalHandler;
pub use frame::{MAX_SASL_FRAME_SIZE, SASL_FRAME_TYPE, read_frame, write_frame};
pub use handler::{MechanismRegistry, SaslContext, SaslHandler, SaslStep};
pub use negotiator::{SaslNegotiator, SaslState};
pub use performative::{
    SaslChallenge, SaslCode, SaslInit, SaslMechanisms, SaslOutcome, SaslPerformative,
    SaslResponse,
};
pub use plain::{PlainAuthenticator, PlainHandler, StaticCredentials};
pub use transport::SaslTransport;
