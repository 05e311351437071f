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

use super::{TransportProvider, Upgrade, UpgradeContext};
use crate::error::AmqpError;
use crate::protocol::{ProtocolId, ProtocolVersion};
use crate::transport::BoxedTransport;
use async_trait::async_trait;

/// The terminal provider: AMQP itself.
///
/// Its upgrade leaves the transport untouched. Reaching it ends
/// negotiation and hands the transport to the connection layer.
#[derive(Debug, Clone)]
pub struct AmqpTransportProvider {
    versions: Vec<ProtocolVersion>,
}

impl AmqpTransportProvider {
    /// Creates a provider for AMQP 1.0.0.
    pub fn new() -> Self {
        Self {
            versions: vec![ProtocolVersion::V1_0_0],
        }
    }

    /// Replaces the supported versions; the first is the default.
    ///
    /// An empty list is rejected by
    /// [`AmqpSettings::validate`](crate::negotiation::AmqpSettings::validate).
    pub fn with_versions(mut self, versions: Vec<ProtocolVersion>) -> Self {
        self.versions = versions;
        self
    }
}

impl Default for AmqpTransportProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportProvider for AmqpTransportProvider {
    fn protocol_id(&self) -> ProtocolId {
        ProtocolId::Amqp
    }

    fn versions(&self) -> &[ProtocolVersion] {
        &self.versions
    }

    fn is_terminal(&self) -> bool {
        true
    }

    async fn upgrade(
        &self,
        transport: BoxedTransport,
        _context: &UpgradeContext,
    ) -> Result<Upgrade, AmqpError> {
        Ok(Upgrade::Unchanged(transport))
    }
}
