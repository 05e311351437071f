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

//! TLS transport implementation for secure communication.
//!
//! [`TlsTransport`] wraps another transport with a `tokio-rustls` session.
//! Certificates, trust roots and validation callbacks are supplied from the
//! outside through [`TlsConfig`]; the
//! [`TlsTransportProvider`](crate::provider::TlsTransportProvider) decides when
//! the wrap happens.
//!
//! # Examples
//!
//! ## Client Mode
//!
//! ```rust,no_run
//! use amqp_transport::transport::{TcpSettings, TcpTransport, TlsConfig, TlsTransport};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let tcp = TcpTransport::connect(&TcpSettings::new("broker.example.com", 5671)).await?;
//! let config = TlsConfig::client_default("broker.example.com")?;
//! let tls = TlsTransport::connect(Box::new(tcp), &config).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Server Mode
//!
//! ```rust,ignore
//! use amqp_transport::transport::{TlsConfig, TlsTransport};
//!
//! let config = TlsConfig::server_from_pem(
//!     include_bytes!("cert.pem"),
//!     include_bytes!("key.pem"),
//! )?;
//! let tls = TlsTransport::accept(accepted, &config).await?;
//! ```

use crate::transport::{
    BoxedTransport, ShutdownFuture, Transport, TransportError, TransportKind, TransportMetadata,
};
use rustls::client::ResolvesClientCert;
use rustls::client::danger::ServerCertVerifier;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::server::WebPkiClientVerifier;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio_rustls::{TlsAcceptor, TlsConnector, TlsStream};
use tracing::{debug, info, warn};

/// TLS configuration for one side of a connection.
///
/// The variant decides the handshake role the configuration can serve; the
/// provider checks it against the role implied by `is_initiator`.
#[derive(Clone)]
pub enum TlsConfig {
    /// Client-side configuration
    Client {
        /// Connector built from a `rustls::ClientConfig`
        connector: Arc<TlsConnector>,
        /// Name the server certificate is validated against
        server_name: ServerName<'static>,
        /// Whether a client certificate is presented
        presents_identity: bool,
    },
    /// Server-side configuration
    Server {
        /// Acceptor built from a `rustls::ServerConfig`
        acceptor: Arc<TlsAcceptor>,
        /// Whether client certificates are requested and verified
        mutual_auth: bool,
    },
}

fn invalid(reason: impl std::fmt::Display) -> TransportError {
    TransportError::invalid_configuration(reason.to_string())
}

fn parse_server_name(server_name: &str) -> Result<ServerName<'static>, TransportError> {
    ServerName::try_from(server_name.to_string())
        .map_err(|e| invalid(format!("invalid server name {server_name:?}: {e}")))
}

fn parse_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, TransportError> {
    let certs = rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| invalid(format!("invalid certificate PEM: {e}")))?;
    if certs.is_empty() {
        return Err(invalid("no certificate found in PEM"));
    }
    Ok(certs)
}

fn parse_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>, TransportError> {
    rustls_pemfile::private_key(&mut &pem[..])
        .map_err(|e| invalid(format!("invalid private key PEM: {e}")))?
        .ok_or_else(|| invalid("no private key found in PEM"))
}

fn roots_from_pem(ca_pem: &[u8]) -> Result<rustls::RootCertStore, TransportError> {
    let mut roots = rustls::RootCertStore::empty();
    for cert in parse_certs(ca_pem)? {
        roots.add(cert).map_err(invalid)?;
    }
    Ok(roots)
}

impl TlsConfig {
    /// Wraps a prepared `rustls` client configuration.
    pub fn client(
        server_name: &str,
        config: rustls::ClientConfig,
    ) -> Result<Self, TransportError> {
        let presents_identity = config.client_auth_cert_resolver.has_certs();
        Ok(Self::Client {
            connector: Arc::new(TlsConnector::from(Arc::new(config))),
            server_name: parse_server_name(server_name)?,
            presents_identity,
        })
    }

    /// Client trusting the operating system's root certificates.
    pub fn client_default(server_name: &str) -> Result<Self, TransportError> {
        let mut roots = rustls::RootCertStore::empty();
        let native = rustls_native_certs::load_native_certs()
            .map_err(|source| TransportError::Io { source })?;
        let (added, ignored) = roots.add_parsable_certificates(native);
        debug!(added, ignored, "loaded native root certificates");

        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Self::client(server_name, config)
    }

    /// Client trusting only the CA certificates in `ca_pem`.
    pub fn client_with_roots(server_name: &str, ca_pem: &[u8]) -> Result<Self, TransportError> {
        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots_from_pem(ca_pem)?)
            .with_no_client_auth();
        Self::client(server_name, config)
    }

    /// Client trusting `ca_pem` and presenting the identity in
    /// `cert_pem`/`key_pem` for mutual authentication.
    pub fn client_with_identity(
        server_name: &str,
        ca_pem: &[u8],
        cert_pem: &[u8],
        key_pem: &[u8],
    ) -> Result<Self, TransportError> {
        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots_from_pem(ca_pem)?)
            .with_client_auth_cert(parse_certs(cert_pem)?, parse_key(key_pem)?)
            .map_err(invalid)?;
        Self::client(server_name, config)
    }

    /// Client delegating server certificate validation to `verifier`.
    pub fn client_with_verifier(
        server_name: &str,
        verifier: Arc<dyn ServerCertVerifier>,
    ) -> Result<Self, TransportError> {
        let config = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth();
        Self::client(server_name, config)
    }

    /// Client that accepts any server certificate.
    ///
    /// Only for tests and development; the connection is encrypted but the
    /// server is not authenticated.
    pub fn client_insecure(server_name: &str) -> Result<Self, TransportError> {
        warn!("TLS server certificate validation is disabled");
        Self::client_with_verifier(server_name, Arc::new(NoVerifier))
    }

    /// Wraps a prepared `rustls` server configuration.
    ///
    /// `mutual_auth` must reflect whether `config` verifies client
    /// certificates; it decides whether accepted transports report an
    /// authenticated peer.
    pub fn server(config: rustls::ServerConfig, mutual_auth: bool) -> Self {
        Self::Server {
            acceptor: Arc::new(TlsAcceptor::from(Arc::new(config))),
            mutual_auth,
        }
    }

    /// Server presenting `cert_pem`/`key_pem` without requesting client
    /// certificates.
    pub fn server_from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, TransportError> {
        let config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(parse_certs(cert_pem)?, parse_key(key_pem)?)
            .map_err(invalid)?;
        Ok(Self::server(config, false))
    }

    /// Server requiring client certificates issued by a CA in `client_ca_pem`.
    pub fn server_with_client_auth(
        cert_pem: &[u8],
        key_pem: &[u8],
        client_ca_pem: &[u8],
    ) -> Result<Self, TransportError> {
        let verifier = WebPkiClientVerifier::builder_with_provider(
            Arc::new(roots_from_pem(client_ca_pem)?),
            Arc::new(rustls::crypto::ring::default_provider()),
        )
        .build()
        .map_err(invalid)?;
        let config = rustls::ServerConfig::builder()
            .with_client_cert_verifier(verifier)
            .with_single_cert(parse_certs(cert_pem)?, parse_key(key_pem)?)
            .map_err(invalid)?;
        Ok(Self::server(config, true))
    }

    /// Returns `true` for a client-side configuration.
    pub fn is_client(&self) -> bool {
        matches!(self, Self::Client { .. })
    }
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Client {
                server_name,
                presents_identity,
                ..
            } => f
                .debug_struct("TlsConfig::Client")
                .field("server_name", server_name)
                .field("presents_identity", presents_identity)
                .finish(),
            Self::Server { mutual_auth, .. } => f
                .debug_struct("TlsConfig::Server")
                .field("mutual_auth", mutual_auth)
                .finish(),
        }
    }
}

/// TLS session layered over another transport.
///
/// `is_secure()` is `true` once construction succeeds, since construction
/// includes the handshake. `is_authenticated()` is `true` only when mutual
/// authentication was configured and the peer presented a certificate the
/// verifier accepted.
pub struct TlsTransport {
    stream: TlsStream<BoxedTransport>,
    metadata: TransportMetadata,
    authenticated: bool,
}

impl TlsTransport {
    /// Performs the client handshake over `transport`.
    pub async fn connect(
        transport: BoxedTransport,
        config: &TlsConfig,
    ) -> Result<Self, TransportError> {
        let TlsConfig::Client {
            connector,
            server_name,
            presents_identity,
        } = config
        else {
            return Err(invalid("expected client TLS configuration, got server"));
        };

        let metadata = transport.metadata().wrapped(TransportKind::Tls.as_str());
        let stream = connector
            .connect(server_name.clone(), transport)
            .await
            .map_err(|source| TransportError::TlsHandshakeFailed { source })?;

        let peer_verified = stream.get_ref().1.peer_certificates().is_some();
        info!(transport_id = %metadata.id, "TLS client handshake complete");

        Ok(Self {
            stream: TlsStream::Client(stream),
            metadata,
            authenticated: *presents_identity && peer_verified,
        })
    }

    /// Performs the server handshake over `transport`.
    pub async fn accept(
        transport: BoxedTransport,
        config: &TlsConfig,
    ) -> Result<Self, TransportError> {
        let TlsConfig::Server {
            acceptor,
            mutual_auth,
        } = config
        else {
            return Err(invalid("expected server TLS configuration, got client"));
        };

        let metadata = transport.metadata().wrapped(TransportKind::Tls.as_str());
        let stream = acceptor
            .accept(transport)
            .await
            .map_err(|source| TransportError::TlsHandshakeFailed { source })?;

        let peer_verified = stream.get_ref().1.peer_certificates().is_some();
        info!(transport_id = %metadata.id, peer_verified, "TLS server handshake complete");

        Ok(Self {
            stream: TlsStream::Server(stream),
            metadata,
            authenticated: *mutual_auth && peer_verified,
        })
    }
}

impl Transport for TlsTransport {
    fn metadata(&self) -> &TransportMetadata {
        &self.metadata
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Tls
    }

    fn is_secure(&self) -> bool {
        true
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    fn shutdown(&mut self) -> ShutdownFuture<'_> {
        Box::pin(async move {
            debug!(transport_id = %self.metadata.id, "sending TLS close_notify");
            self.stream.shutdown().await.map_err(TransportError::from_write)
        })
    }
}

impl AsyncRead for TlsTransport {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for TlsTransport {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

/// Certificate verifier that accepts everything.
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
