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

//! The transport produced by a successful SASL exchange.

use crate::transport::{
    BoxedTransport, Principal, ShutdownFuture, Transport, TransportKind, TransportMetadata,
};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// A transport whose peer completed SASL authentication.
///
/// Bytes pass through unchanged; SASL security layers are not negotiated.
/// Security follows the transport underneath.
pub struct SaslTransport {
    inner: BoxedTransport,
    metadata: TransportMetadata,
    mechanism: String,
    principal: Option<Principal>,
}

impl SaslTransport {
    /// Wraps `inner` after `mechanism` completed with `principal`.
    pub fn new(inner: BoxedTransport, mechanism: impl Into<String>, principal: Option<Principal>) -> Self {
        let metadata = inner.metadata().wrapped("sasl");
        Self {
            inner,
            metadata,
            mechanism: mechanism.into(),
            principal,
        }
    }

    /// The mechanism that completed.
    pub fn mechanism(&self) -> &str {
        &self.mechanism
    }

    /// The transport underneath.
    pub fn inner(&self) -> &dyn Transport {
        self.inner.as_ref()
    }
}

impl std::fmt::Debug for SaslTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaslTransport")
            .field("metadata", &self.metadata)
            .field("inner", &self.inner.kind())
            .field("mechanism", &self.mechanism)
            .field("principal", &self.principal)
            .finish()
    }
}

impl Transport for SaslTransport {
    fn metadata(&self) -> &TransportMetadata {
        &self.metadata
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Sasl
    }

    fn is_secure(&self) -> bool {
        self.inner.is_secure()
    }

    fn is_authenticated(&self) -> bool {
        self.principal.is_some() || self.inner.is_authenticated()
    }

    fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref().or_else(|| self.inner.principal())
    }

    fn shutdown(&mut self) -> ShutdownFuture<'_> {
        self.inner.shutdown()
    }

    fn abort(self: Box<Self>) {
        self.inner.abort();
    }
}

impl AsyncRead for SaslTransport {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for SaslTransport {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
