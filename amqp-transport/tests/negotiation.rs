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

//! End-to-end header negotiation between an initiator and a listener.

mod common;

use amqp_transport::negotiation::NegotiationOptions;
use amqp_transport::protocol::{ProtocolHeader, ProtocolId, ProtocolVersion};
use amqp_transport::provider::SaslTransportProvider;
use amqp_transport::buffer::NoPool;
use amqp_transport::sasl::{
    AnonymousHandler, SaslCode, SaslMechanisms, SaslOutcome, SaslPerformative, SaslState,
    read_frame, write_frame,
};
use amqp_transport::transport::{MemoryTransport, TcpSettings, TcpTransportListener, TransportKind};
use amqp_transport::{AmqpError, AmqpSettings, AmqpTransportInitiator, NegotiationMetrics};
use common::*;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const AMQP_HEADER: &[u8; 8] = b"AMQP\x00\x01\x00\x00";

#[test]
fn test_header_wire_form() {
    for (id, byte) in [
        (ProtocolId::Amqp, 0u8),
        (ProtocolId::Tls, 2),
        (ProtocolId::Sasl, 3),
    ] {
        let header = ProtocolHeader::new(id, ProtocolVersion::V1_0_0);
        let bytes = header.encode();
        assert_eq!(&bytes[..4], b"AMQP");
        assert_eq!(bytes[4], byte);
        assert_eq!(&bytes[5..], &[1, 0, 0]);
        assert_eq!(ProtocolHeader::decode(&bytes).unwrap(), header);
    }
}

#[tokio::test]
async fn test_amqp_only_chain() {
    let client_metrics = Arc::new(NegotiationMetrics::new());
    let client = initiator(vec![amqp()], client_metrics.clone());
    let server = listener(vec![amqp()], anonymous_ok(), Arc::new(NegotiationMetrics::new()));

    let (a, b) = MemoryTransport::pair_default();
    let mut transport = client.negotiate(Box::new(a)).await.unwrap();
    transport.write_all(AMQP_HEADER).await.unwrap();

    let negotiated = server.negotiate(Box::new(b)).await.unwrap();
    assert_eq!(negotiated.amqp_header.protocol_id(), ProtocolId::Amqp);
    assert_eq!(client_metrics.headers_sent(), 0);
}

#[tokio::test]
async fn test_sasl_plain_chain() {
    let client_metrics = Arc::new(NegotiationMetrics::new());
    let server_metrics = Arc::new(NegotiationMetrics::new());
    let client = initiator(vec![plain_client("admin", "s3cret"), amqp()], client_metrics.clone());
    let server = listener(
        vec![plain_server(), amqp()],
        NegotiationOptions::default(),
        server_metrics.clone(),
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

    let transport = client_side.unwrap();
    assert!(transport.is_authenticated());
    let negotiated = server_side.unwrap();
    let principal = negotiated.transport.principal().unwrap();
    assert_eq!(principal.name(), "admin");
    assert_eq!(principal.mechanism(), "PLAIN");

    assert_eq!(client_metrics.headers_sent(), 1);
    assert_eq!(server_metrics.headers_sent(), 1);
    assert_eq!(server_metrics.sasl_ok(), 1);
    assert_eq!(server_metrics.completed(), 1);
}

#[tokio::test]
async fn test_sasl_plain_wrong_password() {
    let server_metrics = Arc::new(NegotiationMetrics::new());
    let client = initiator(
        vec![plain_client("admin", "guess"), amqp()],
        Arc::new(NegotiationMetrics::new()),
    );
    let server = listener(
        vec![plain_server(), amqp()],
        NegotiationOptions::default(),
        server_metrics.clone(),
    );

    let (a, b) = MemoryTransport::pair_default();
    let (client_side, server_side) =
        tokio::join!(client.negotiate(Box::new(a)), server.negotiate(Box::new(b)));

    match client_side {
        Err(AmqpError::Unauthorized { code, .. }) => assert_eq!(code, Some(SaslCode::Auth)),
        other => panic!("unexpected client result {:?}", other.err()),
    }
    assert!(server_side.unwrap_err().is_unauthorized());
    assert_eq!(server_metrics.sasl_rejected(), 1);
    assert_eq!(server_metrics.failures("unauthorized"), 1);
}

#[tokio::test]
async fn test_no_common_mechanism() {
    let client = initiator(
        vec![plain_client("guest", "guest"), amqp()],
        Arc::new(NegotiationMetrics::new()),
    );
    let server = listener(
        vec![
            shared(SaslTransportProvider::new().with_handler(AnonymousHandler::new())),
            amqp(),
        ],
        NegotiationOptions::default(),
        Arc::new(NegotiationMetrics::new()),
    );

    let (a, b) = MemoryTransport::pair_default();
    let (client_side, server_side) =
        tokio::join!(client.negotiate(Box::new(a)), server.negotiate(Box::new(b)));

    match client_side {
        Err(AmqpError::MechanismNotSupported { offered }) => {
            assert_eq!(offered, vec!["ANONYMOUS".to_string()])
        }
        other => panic!("unexpected client result {:?}", other.err()),
    }
    assert!(server_side.is_err());
}

#[tokio::test]
async fn test_newer_sasl_version_is_answered_with_closest() {
    let client = initiator(
        vec![
            shared(
                SaslTransportProvider::new()
                    .with_handler(AnonymousHandler::new())
                    .with_versions(vec![ProtocolVersion::new(1, 1, 0)]),
            ),
            amqp(),
        ],
        Arc::new(NegotiationMetrics::new()),
    );
    let server = listener(
        vec![
            shared(SaslTransportProvider::new().with_handler(AnonymousHandler::new())),
            amqp(),
        ],
        anonymous_ok(),
        Arc::new(NegotiationMetrics::new()),
    );

    let (a, b) = MemoryTransport::pair_default();
    let (client_side, server_side) =
        tokio::join!(client.negotiate(Box::new(a)), server.negotiate(Box::new(b)));

    match client_side {
        Err(AmqpError::VersionMismatch {
            requested,
            supported,
        }) => {
            assert_eq!(requested.protocol_id(), ProtocolId::Sasl);
            assert_eq!(requested.version(), ProtocolVersion::new(1, 1, 0));
            assert_eq!(supported, ProtocolVersion::V1_0_0);
        }
        other => panic!("unexpected client result {:?}", other.err()),
    }
    assert!(matches!(server_side, Err(AmqpError::VersionMismatch { .. })));
}

#[tokio::test]
async fn test_unexpected_outcome_is_illegal_state() {
    let server = listener(
        vec![plain_server(), amqp()],
        NegotiationOptions::default(),
        Arc::new(NegotiationMetrics::new()),
    );

    let (mut peer, b) = MemoryTransport::pair_default();
    let script = async move {
        peer.write_all(b"AMQP\x03\x01\x00\x00").await.unwrap();
        let mut echo = [0u8; 8];
        peer.read_exact(&mut echo).await.unwrap();
        assert_eq!(&echo, b"AMQP\x03\x01\x00\x00");

        let mechanisms = read_frame(&mut peer, 4096, &NoPool).await.unwrap();
        assert!(matches!(mechanisms, SaslPerformative::Mechanisms(_)));

        let outcome = SaslPerformative::Outcome(SaslOutcome {
            code: SaslCode::Ok,
            additional_data: None,
        });
        write_frame(&mut peer, &outcome, &NoPool).await.unwrap();
        peer
    };

    let (result, _peer) = tokio::join!(server.negotiate(Box::new(b)), script);
    match result {
        Err(AmqpError::IllegalState {
            state,
            performative,
        }) => {
            assert_eq!(state, SaslState::WaitingForInit);
            assert_eq!(performative, "sasl-outcome");
        }
        other => panic!("unexpected result {other:?}"),
    }
}

/// What an acceptor offering only ANONYMOUS sends to an initiator.
async fn anonymous_acceptor_script() -> Vec<u8> {
    let mut script = b"AMQP\x03\x01\x00\x00".to_vec();
    let mechanisms = SaslPerformative::Mechanisms(SaslMechanisms {
        mechanisms: vec!["ANONYMOUS".to_string()],
    });
    let outcome = SaslPerformative::Outcome(SaslOutcome {
        code: SaslCode::Ok,
        additional_data: None,
    });
    write_frame(&mut script, &mechanisms, &NoPool).await.unwrap();
    write_frame(&mut script, &outcome, &NoPool).await.unwrap();
    script
}

fn anonymous_initiator() -> AmqpTransportInitiator {
    initiator(
        vec![
            shared(SaslTransportProvider::new().with_handler(AnonymousHandler::new())),
            amqp(),
        ],
        Arc::new(NegotiationMetrics::new()),
    )
}

#[tokio::test]
async fn test_synchronous_chain_never_calls_back() {
    let client = anonymous_initiator();
    let transport = ScriptedTransport::immediate(anonymous_acceptor_script().await);
    let written = transport.written();

    let (op, mut callbacks) = forwarding_op();
    let op = client
        .negotiate_async(op.with_transport(Box::new(transport)))
        .completed()
        .unwrap();
    assert!(op.completed_synchronously);
    assert!(op.is_success());
    assert_eq!(op.transport.as_ref().map(|t| t.kind()), Some(TransportKind::Sasl));
    assert!(written.lock().starts_with(b"AMQP\x03\x01\x00\x00"));

    drop(op);
    assert!(callbacks.recv().await.is_none());
}

#[tokio::test]
async fn test_gated_chain_calls_back_once_after_trigger() {
    let client = anonymous_initiator();
    let (transport, gate) = ScriptedTransport::gated(anonymous_acceptor_script().await);
    let dropped = transport.dropped();

    let (op, mut callbacks) = forwarding_op();
    let status = client.negotiate_async(op.with_transport(Box::new(transport)));
    assert!(status.is_pending());

    tokio::task::yield_now().await;
    assert!(callbacks.try_recv().is_err());

    gate.open();
    let op = callbacks.recv().await.unwrap();
    assert!(!op.completed_synchronously);
    assert!(op.is_success());
    assert!(callbacks.recv().await.is_none());

    drop(op);
    assert!(dropped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_failed_chain_drops_transport() {
    let client = anonymous_initiator();
    let transport = ScriptedTransport::immediate(b"AMQP\x02\x01\x00\x00".to_vec());
    let dropped = transport.dropped();

    let (op, _callbacks) = forwarding_op();
    let op = client
        .negotiate_async(op.with_transport(Box::new(transport)))
        .completed()
        .unwrap();
    assert!(matches!(op.error, Some(AmqpError::ProtocolMismatch { .. })));
    assert!(op.transport.is_none());
    assert!(dropped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_accept_async_completes_synchronously_when_ready() {
    let server = listener(vec![amqp()], anonymous_ok(), Arc::new(NegotiationMetrics::new()));
    let (mut client, b) = MemoryTransport::pair_default();
    client.write_all(AMQP_HEADER).await.unwrap();

    let (op, mut callbacks) = forwarding_op();
    let op = server
        .accept_async(op.with_transport(Box::new(b)))
        .completed()
        .unwrap();
    assert!(op.completed_synchronously);
    assert!(op.is_success());
    assert!(op.protocol_header.is_some());

    // The descriptor, and with it the callback, was dropped without running.
    drop(op);
    assert!(callbacks.recv().await.is_none());
}

#[tokio::test]
async fn test_accept_async_calls_back_exactly_once() {
    let server = listener(vec![amqp()], anonymous_ok(), Arc::new(NegotiationMetrics::new()));
    let (mut client, b) = MemoryTransport::pair_default();

    let (op, mut callbacks) = forwarding_op();
    let status = server.accept_async(op.with_transport(Box::new(b)));
    assert!(status.is_pending());

    client.write_all(AMQP_HEADER).await.unwrap();
    let op = callbacks.recv().await.unwrap();
    assert!(!op.completed_synchronously);
    assert!(op.is_success());
    assert_eq!(
        op.protocol_header.map(|h| h.protocol_id()),
        Some(ProtocolId::Amqp)
    );
    assert!(callbacks.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_negotiation_timeout_calls_back_exactly_once() {
    let settings = AmqpSettings::new()
        .with_provider(SaslTransportProvider::new().with_handler(AnonymousHandler::new()))
        .with_provider(amqp_transport::provider::AmqpTransportProvider::new())
        .with_options(
            NegotiationOptions::default().with_negotiation_timeout(Some(Duration::from_secs(5))),
        );
    let client = AmqpTransportInitiator::new(settings, TcpSettings::new("localhost", 5672).into())
        .unwrap();

    // The peer never answers.
    let (a, mut silent_peer) = MemoryTransport::pair_default();
    let (op, mut callbacks) = forwarding_op();
    let status = client.negotiate_async(op.with_transport(Box::new(a)));
    assert!(status.is_pending());

    let op = callbacks.recv().await.unwrap();
    match &op.error {
        Some(AmqpError::Timeout { duration }) => assert_eq!(*duration, Duration::from_secs(5)),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(op.transport.is_none());
    assert!(callbacks.recv().await.is_none());

    // The aborted negotiation dropped its transport.
    let mut received = Vec::new();
    silent_peer.read_to_end(&mut received).await.unwrap();
    assert_eq!(received, b"AMQP\x03\x01\x00\x00");
}

#[tokio::test]
async fn test_listen_over_tcp() {
    let tcp = TcpTransportListener::bind("127.0.0.1:0").await.unwrap();
    let port = tcp.socket_addr().unwrap().port();

    let server = listener(
        vec![plain_server(), amqp()],
        NegotiationOptions::default(),
        Arc::new(NegotiationMetrics::new()),
    );
    let mut handle = server.listen(tcp);

    let client = AmqpTransportInitiator::new(
        AmqpSettings::new()
            .with_shared_provider(plain_client("guest", "guest"))
            .with_shared_provider(amqp()),
        TcpSettings::new("127.0.0.1", port).into(),
    )
    .unwrap();
    let mut transport = client.connect().await.unwrap();
    transport.write_all(AMQP_HEADER).await.unwrap();

    let negotiated = handle.recv().await.unwrap();
    assert_eq!(
        negotiated.transport.principal().map(|p| p.name().to_string()),
        Some("guest".to_string())
    );
    handle.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_async_timeout_is_reported_as_timeout() {
    let metrics = Arc::new(NegotiationMetrics::new());
    let client = initiator(
        vec![
            shared(SaslTransportProvider::new().with_handler(AnonymousHandler::new())),
            amqp(),
        ],
        metrics.clone(),
    );
    let (a, mut silent_peer) = MemoryTransport::pair_default();
    let (op, mut callbacks) = forwarding_op();
    assert!(client.negotiate_async(op.with_transport(Box::new(a))).is_pending());

    let op = callbacks.recv().await.unwrap();
    assert!(matches!(op.error, Some(AmqpError::Timeout { .. })));
    let mut received = Vec::new();
    silent_peer.read_to_end(&mut received).await.unwrap();

    assert_eq!(metrics.failed(), 1);
    assert_eq!(metrics.failures("timeout"), 1);
    assert_eq!(metrics.cancelled(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_negotiation_is_cancelled() {
    let metrics = Arc::new(NegotiationMetrics::new());
    let server = listener(vec![amqp()], anonymous_ok(), metrics.clone());
    let (_client, a) = MemoryTransport::pair_default();

    let abandoned =
        tokio::time::timeout(Duration::from_millis(10), server.negotiate(Box::new(a))).await;
    assert!(abandoned.is_err());

    assert_eq!(metrics.started(), 1);
    assert_eq!(metrics.cancelled(), 1);
    assert_eq!(metrics.failed(), 0);
    assert_eq!(metrics.failures("timeout"), 0);
}

#[tokio::test]
async fn test_listener_shutdown_cancels_negotiations() {
    let tcp = TcpTransportListener::bind("127.0.0.1:0").await.unwrap();
    let port = tcp.socket_addr().unwrap().port();
    let metrics = Arc::new(NegotiationMetrics::new());
    let server = listener(vec![amqp()], anonymous_ok(), metrics.clone());
    let handle = server.listen(tcp);

    // Connects but never sends a header.
    let _idle = tokio::net::TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    for _ in 0..200 {
        if metrics.started() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(metrics.started(), 1);

    handle.shutdown();
    for _ in 0..200 {
        if metrics.cancelled() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(metrics.cancelled(), 1);
    assert_eq!(metrics.failures("timeout"), 0);
}
