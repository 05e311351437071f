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

//! The `ANONYMOUS` mechanism (RFC 4505).

use super::handler::{SaslContext, SaslHandler, SaslStep};
use super::performative::{SaslCode, SaslInit};
use crate::error::AmqpError;
use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

/// `ANONYMOUS`: no credentials.
///
/// The initiator may send trace information (an email address or opaque
/// token) as its initial response. The acceptor always completes with
/// [`SaslCode::Ok`] and establishes no principal, so the resulting transport
/// is not authenticated.
#[derive(Debug, Clone, Default)]
pub struct AnonymousHandler {
    trace: Option<String>,
}

impl AnonymousHandler {
    /// Mechanism name.
    pub const MECHANISM: &'static str = "ANONYMOUS";

    /// Creates a handler that sends no trace information.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an initiator handler that sends `trace` as its initial response.
    pub fn with_trace(trace: impl Into<String>) -> Self {
        Self {
            trace: Some(trace.into()),
        }
    }
}

#[async_trait]
impl SaslHandler for AnonymousHandler {
    fn mechanism(&self) -> &str {
        Self::MECHANISM
    }

    fn clone_handler(&self) -> Box<dyn SaslHandler> {
        Box::new(self.clone())
    }

    async fn on_start(
        &mut self,
        context: &SaslContext,
        init: Option<&SaslInit>,
    ) -> Result<SaslStep, AmqpError> {
        if context.is_initiator {
            return Ok(SaslStep::Init {
                initial_response: self.trace.clone().map(Bytes::from),
            });
        }

        if let Some(trace) = init.and_then(|i| i.initial_response.as_ref()) {
            debug!(trace = %String::from_utf8_lossy(trace), "anonymous login");
        }
        Ok(SaslStep::Complete(SaslCode::Ok))
    }
}
