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

//! Negotiation chains that include a TLS upgrade.

#![cfg(feature = "tls")]

mod common;

use amqp_transport::provider::TlsTransportProvider;
use amqp_transport::transport::{MemoryTransport, TlsConfig, TransportKind};
use amqp_transport::{AmqpError, NegotiationMetrics, TransportProvider};
use common::*;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

const AMQP_HEADER: &[u8; 8] = b"AMQP\x00\x01\x00\x00";

fn tls_pair() -> (Arc<dyn TransportProvider>, Arc<dyn TransportProvider>) {
    let pki = pki::generate();
    let client = TlsConfig::client_with_roots("localhost", &pki.ca_pem).unwrap();
    let server = TlsConfig::server_from_pem(&pki.server_cert_pem, &pki.server_key_pem).unwrap();
    (
        shared(TlsTransportProvider::new(client).with_expected_inner(TransportKind::Memory)),
        shared(TlsTransportProvider::new(server).with_expected_inner(TransportKind::Memory)),
    )
}

#[tokio::test]
async fn test_tls_chain_exchanges_one_header() {
    let (client_tls, server_tls) = tls_pair();
    let client_metrics = Arc::new(NegotiationMetrics::new());
    let server_metrics = Arc::new(NegotiationMetrics::new());
    let client = initiator(vec![client_tls, amqp()], client_metrics.clone());
    let server = listener(vec![server_tls, amqp()], anonymous_ok(), server_metrics.clone());

    let (a, b) = MemoryTransport::pair_default();
    let (client_side, server_side) = tokio::join!(
        async {
            let mut transport = client.negotiate(Box::new(a)).await?;
            transport.write_all(AMQP_HEADER).await?;
            transport.flush().await?;
            Ok::<_, AmqpError>(transport)
        },
        server.negotiate(Box::new(b)),
    );

    let transport = client_side.unwrap();
    assert_eq!(transport.kind(), TransportKind::Tls);
    assert!(transport.is_secure());

    let negotiated = server_side.unwrap();
    assert!(negotiated.transport.is_secure());
    assert_eq!(client_metrics.headers_sent(), 1);
    assert_eq!(client_metrics.upgrades(), 1);
    assert_eq!(server_metrics.headers_sent(), 1);
}

#[tokio::test]
async fn test_tls_sasl_chain_exchanges_two_headers() {
    let (client_tls, server_tls) = tls_pair();
    let client_metrics = Arc::new(NegotiationMetrics::new());
    let client = initiator(
        vec![client_tls, plain_client("guest", "guest"), amqp()],
        client_metrics.clone(),
    );
    let options = amqp_transport::negotiation::NegotiationOptions::default()
        .with_require_secure_transport(true);
    let server = listener(
        vec![server_tls, plain_server(), amqp()],
        options,
        Arc::new(NegotiationMetrics::new()),
    );

    let (a, b) = MemoryTransport::pair_default();
    let (client_side, server_side) = tokio::join!(
        async {
            let mut transport = client.negotiate(Box::new(a)).await?;
            transport.write_all(AMQP_HEADER).await?;
            transport.flush().await?;
            Ok::<_, AmqpError>(transport)
        },
        server.negotiate(Box::new(b)),
    );

    let transport = client_side.unwrap();
    assert_eq!(transport.kind(), TransportKind::Sasl);
    assert!(transport.is_secure());
    assert!(transport.is_authenticated());

    let negotiated = server_side.unwrap();
    assert!(negotiated.transport.is_secure());
    assert_eq!(negotiated.transport.principal().map(|p| p.name()), Some("guest"));
    assert_eq!(client_metrics.headers_sent(), 2);
    assert_eq!(client_metrics.upgrades(), 2);
}

#[tokio::test]
async fn test_plaintext_sasl_rejected_when_tls_required() {
    let (_, server_tls) = tls_pair();
    let client = initiator(
        vec![plain_client("guest", "guest"), amqp()],
        Arc::new(NegotiationMetrics::new()),
    );
    let options = amqp_transport::negotiation::NegotiationOptions::default()
        .with_require_secure_transport(true);
    let server = listener(
        vec![server_tls, plain_server(), amqp()],
        options,
        Arc::new(NegotiationMetrics::new()),
    );

    let (a, b) = MemoryTransport::pair_default();
    let (client_side, server_side) = tokio::join!(
        async {
            let mut transport = client.negotiate(Box::new(a)).await?;
            transport.write_all(AMQP_HEADER).await?;
            Ok::<_, AmqpError>(transport)
        },
        server.negotiate(Box::new(b)),
    );

    // SASL succeeds in the clear; the policy check on the AMQP header fails.
    assert!(client_side.is_ok());
    assert!(matches!(server_side, Err(AmqpError::InsecureTransport { .. })));
}
