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

//! Shared helpers for the integration tests.

#![allow(dead_code)]

use amqp_transport::negotiation::{
    AmqpSettings, AmqpTransportInitiator, AmqpTransportListener, NegotiationOptions,
};
use amqp_transport::operation::TransportOperation;
use amqp_transport::provider::{AmqpTransportProvider, SaslTransportProvider};
use amqp_transport::sasl::{PlainHandler, StaticCredentials};
use amqp_transport::transport::{
    ShutdownFuture, TcpSettings, Transport, TransportId, TransportKind, TransportMetadata,
};
use amqp_transport::{NegotiationMetrics, TransportProvider};
use parking_lot::Mutex;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, Waker};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;

/// Initiator over `providers`, reporting to `metrics`.
pub fn initiator(
    providers: Vec<Arc<dyn TransportProvider>>,
    metrics: Arc<NegotiationMetrics>,
) -> AmqpTransportInitiator {
    let mut settings = AmqpSettings::new().with_observer(metrics);
    for provider in providers {
        settings = settings.with_shared_provider(provider);
    }
    AmqpTransportInitiator::new(settings, TcpSettings::new("localhost", 5672).into()).unwrap()
}

/// Listener over `providers` with `options`, reporting to `metrics`.
pub fn listener(
    providers: Vec<Arc<dyn TransportProvider>>,
    options: NegotiationOptions,
    metrics: Arc<NegotiationMetrics>,
) -> AmqpTransportListener {
    let mut settings = AmqpSettings::new()
        .with_observer(metrics)
        .with_options(options);
    for provider in providers {
        settings = settings.with_shared_provider(provider);
    }
    AmqpTransportListener::new(settings).unwrap()
}

pub fn shared(provider: impl TransportProvider + 'static) -> Arc<dyn TransportProvider> {
    Arc::new(provider)
}

pub fn amqp() -> Arc<dyn TransportProvider> {
    Arc::new(AmqpTransportProvider::new())
}

pub fn plain_client(username: &str, password: &str) -> Arc<dyn TransportProvider> {
    Arc::new(SaslTransportProvider::new().with_handler(PlainHandler::client(username, password)))
}

pub fn plain_server() -> Arc<dyn TransportProvider> {
    let credentials = StaticCredentials::new()
        .with_user("guest", "guest")
        .with_user("admin", "s3cret");
    Arc::new(SaslTransportProvider::new().with_handler(PlainHandler::server(Arc::new(credentials))))
}

/// Options for an acceptor that lets unauthenticated peers through.
pub fn anonymous_ok() -> NegotiationOptions {
    NegotiationOptions::default().with_allow_anonymous_connection(true)
}

/// A descriptor whose callback forwards the completed operation.
///
/// The callback owns the only sender, so the receiver yields `None` once
/// the callback has run.
pub fn forwarding_op() -> (TransportOperation, mpsc::UnboundedReceiver<TransportOperation>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let op = TransportOperation::new(move |op| {
        let _ = sender.send(op);
    });
    (op, receiver)
}

/// A transport that replays a fixed byte script and records what is written.
///
/// An immediate transport serves the script as soon as it is read. A gated
/// one returns `Pending` from every read until its [`Gate`] opens.
pub struct ScriptedTransport {
    metadata: TransportMetadata,
    script: Vec<u8>,
    position: usize,
    written: Arc<Mutex<Vec<u8>>>,
    gate: Option<Gate>,
    dropped: Arc<AtomicBool>,
}

/// Trigger for a gated [`ScriptedTransport`].
#[derive(Clone, Default)]
pub struct Gate {
    state: Arc<Mutex<GateState>>,
}

#[derive(Default)]
struct GateState {
    open: bool,
    waker: Option<Waker>,
}

impl Gate {
    /// Lets reads through and wakes a reader that is waiting.
    pub fn open(&self) {
        let waker = {
            let mut state = self.state.lock();
            state.open = true;
            state.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    fn poll_open(&self, cx: &mut Context<'_>) -> bool {
        let mut state = self.state.lock();
        if !state.open {
            state.waker = Some(cx.waker().clone());
        }
        state.open
    }
}

impl ScriptedTransport {
    /// Serves `script` without ever blocking.
    pub fn immediate(script: Vec<u8>) -> Self {
        Self {
            metadata: TransportMetadata::new(TransportId::next(), "scripted"),
            script,
            position: 0,
            written: Arc::default(),
            gate: None,
            dropped: Arc::default(),
        }
    }

    /// Serves `script` once the returned gate opens.
    pub fn gated(script: Vec<u8>) -> (Self, Gate) {
        let gate = Gate::default();
        let mut transport = Self::immediate(script);
        transport.gate = Some(gate.clone());
        (transport, gate)
    }

    /// Everything written to the transport so far.
    pub fn written(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.written)
    }

    /// Set once the transport has been dropped.
    pub fn dropped(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.dropped)
    }
}

impl Drop for ScriptedTransport {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

impl Transport for ScriptedTransport {
    fn metadata(&self) -> &TransportMetadata {
        &self.metadata
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Memory
    }

    fn shutdown(&mut self) -> ShutdownFuture<'_> {
        Box::pin(async { Ok(()) })
    }
}

impl AsyncRead for ScriptedTransport {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if let Some(gate) = &self.gate {
            if !gate.poll_open(cx) {
                return Poll::Pending;
            }
        }
        let remaining = &self.script[self.position..];
        let count = remaining.len().min(buf.remaining());
        buf.put_slice(&remaining[..count]);
        self.position += count;
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for ScriptedTransport {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.written.lock().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Certificates for TLS tests.
#[cfg(feature = "tls")]
pub mod pki {
    use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair, SanType};

    pub struct TestPki {
        pub ca_pem: Vec<u8>,
        pub server_cert_pem: Vec<u8>,
        pub server_key_pem: Vec<u8>,
    }

    pub fn generate() -> TestPki {
        let mut ca_params = CertificateParams::default();
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "Integration CA");
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let ca_key = KeyPair::generate().unwrap();
        let ca_cert = ca_params.self_signed(&ca_key).unwrap();

        let mut params = CertificateParams::default();
        params.distinguished_name.push(DnType::CommonName, "localhost");
        params.subject_alt_names = vec![SanType::DnsName("localhost".try_into().unwrap())];
        let key = KeyPair::generate().unwrap();
        let cert = params.signed_by(&key, &ca_cert, &ca_key).unwrap();

        TestPki {
            ca_pem: ca_cert.pem().into_bytes(),
            server_cert_pem: cert.pem().into_bytes(),
            server_key_pem: key.serialize_pem().into_bytes(),
        }
    }
}
