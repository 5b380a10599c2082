//! integration tests for device pairing
//!
//! the new device talks to `/pairing/pair_device`, the approving device to
//! `/pairing/pairing_data` and `/pairing/approve`, and the node's signer
//! holds a websocket on `/pairing/signer/{node_id}`, opened by signing a
//! challenge with the node key.

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    Router,
    body::{Body, BodyDataStream},
    http::{Request, StatusCode},
};
use common::{
    TestApp, TestSigner, create_test_app, csr, leaf_names, post_json, register, spawn_test_server,
};
use futures_util::{SinkExt, StreamExt};
use lightyard::handlers::PairDeviceMessage;
use lightyard::pairing::{ApprovalRequest, ApprovalResponse, SignerAuth, SignerChallenge};
use lightyard_types::NodeId;
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tower::ServiceExt;

/// start pair_device and return the body stream, positioned after the
/// pairing code line.
async fn start_pairing(app: &Router) -> (String, BodyDataStream) {
    let body = json!({
        "csr": csr("new-device"),
        "device_name": "tablet",
        "description": "kitchen tablet",
        "restrictions": "method^list",
    });
    let request = Request::builder()
        .method("POST")
        .uri("/pairing/pair_device")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("failed to build request");

    let response = app.clone().oneshot(request).await.expect("request failed");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/x-ndjson"
    );

    let mut stream = response.into_body().into_data_stream();
    let device_id = match next_message(&mut stream).await {
        PairDeviceMessage::PairingCode { device_id, code } => {
            assert!(code.ends_with(&device_id));
            device_id
        }
        other => panic!("expected pairing code, got {other:?}"),
    };
    (device_id, stream)
}

/// each chunk of the stream is exactly one json line.
async fn next_message(stream: &mut BodyDataStream) -> PairDeviceMessage {
    let chunk = tokio::time::timeout(Duration::from_secs(10), stream.next())
        .await
        .expect("timed out waiting for pairing message")
        .expect("stream ended early")
        .expect("failed to read stream");
    assert_eq!(chunk.last(), Some(&b'\n'));
    serde_json::from_slice(&chunk).expect("line should be a pairing message")
}

type SignerSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// the next frame on a signer socket, `None` once it is closed.
async fn next_frame(ws: &mut SignerSocket) -> Option<Message> {
    tokio::time::timeout(Duration::from_secs(10), ws.next())
        .await
        .expect("timed out waiting for frame")
        .and_then(|frame| frame.ok())
}

/// open `node`'s signer stream and answer its challenge with `key`'s
/// signature.
async fn open_signer_stream(addr: SocketAddr, node: &TestSigner, key: &TestSigner) -> SignerSocket {
    let url = format!("ws://{}/pairing/signer/{}", addr, node.hex());
    let (mut ws, _) = connect_async(&url)
        .await
        .expect("failed to connect websocket");

    let challenge: SignerChallenge = match next_frame(&mut ws).await {
        Some(Message::Text(text)) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("expected challenge frame, got {other:?}"),
    };
    let auth = SignerAuth {
        signature: key.sign(&challenge.challenge),
    };
    ws.send(Message::Text(serde_json::to_string(&auth).unwrap().into()))
        .await
        .unwrap();
    ws
}

/// attach `signer` and wait until the server has accepted it.
async fn attach_signer(t: &TestApp, addr: SocketAddr, signer: &TestSigner) -> SignerSocket {
    let ws = open_signer_stream(addr, signer, signer).await;
    wait_connected(t, &signer.node_id).await;
    ws
}

async fn wait_connected(t: &TestApp, node_id: &NodeId) {
    for _ in 0..200 {
        if t.state.pairing.is_signer_connected(node_id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("signer never attached");
}

fn approval(device_id: &str, signer: &TestSigner) -> serde_json::Value {
    json!({
        "device_id": device_id,
        "node_id": signer.hex(),
        "device_name": "tablet",
        "restrictions": "method^list",
        "timestamp": 1_700_000_000u64,
        "pubkey": "",
        "signature": "",
        "rune": "approver-rune",
    })
}

/// test a full pairing: code, review, approval, signer answer, certificate
#[tokio::test]
async fn test_pairing_round_trip() {
    let t = create_test_app().await;
    let signer = TestSigner::new(1);
    register(&t.app, &signer).await;

    let (addr, _server) = spawn_test_server(t.app.clone()).await;
    let mut ws = attach_signer(&t, addr, &signer).await;

    let (device_id, mut stream) = start_pairing(&t.app).await;

    let (status, data) = post_json(
        &t.app,
        "/pairing/pairing_data",
        json!({ "device_id": device_id }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(data["device_name"], "tablet");
    assert_eq!(data["description"], "kitchen tablet");
    assert!(data["csr"].as_str().unwrap().contains("CERTIFICATE REQUEST"));

    let (status, _) = post_json(&t.app, "/pairing/approve", approval(&device_id, &signer)).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let request: ApprovalRequest = match next_frame(&mut ws).await {
        Some(Message::Text(text)) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("expected text frame, got {other:?}"),
    };
    assert_eq!(request.device_id, device_id);
    assert_eq!(request.node_id, signer.node_id);
    assert_eq!(request.rune, "approver-rune");

    let reply = ApprovalResponse {
        device_id: device_id.clone(),
        approved: true,
        rune: "device-rune".to_string(),
        reason: String::new(),
    };
    ws.send(Message::Text(serde_json::to_string(&reply).unwrap().into()))
        .await
        .unwrap();

    match next_message(&mut stream).await {
        PairDeviceMessage::DeviceCert {
            device_cert,
            node_id,
            rune,
        } => {
            assert_eq!(node_id, signer.node_id);
            assert_eq!(rune, "device-rune");
            let (subject, issuer) = leaf_names(&device_cert);
            assert_eq!(subject, format!("/users/{}/paired-{}", signer.hex(), device_id));
            assert_eq!(issuer, format!("/users/{}", signer.hex()));
        }
        other => panic!("expected device cert, got {other:?}"),
    }

    // the session is gone once resolved
    let (status, _) = post_json(
        &t.app,
        "/pairing/pairing_data",
        json!({ "device_id": device_id }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// test that the new device learns about a rejection
#[tokio::test]
async fn test_pairing_rejected_by_signer() {
    let t = create_test_app().await;
    let signer = TestSigner::new(2);
    register(&t.app, &signer).await;

    let (addr, _server) = spawn_test_server(t.app.clone()).await;
    let mut ws = attach_signer(&t, addr, &signer).await;

    let (device_id, mut stream) = start_pairing(&t.app).await;
    let (status, _) = post_json(&t.app, "/pairing/approve", approval(&device_id, &signer)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    next_frame(&mut ws).await.expect("expected approval request");

    let reply = ApprovalResponse {
        device_id,
        approved: false,
        rune: String::new(),
        reason: "unknown device".to_string(),
    };
    ws.send(Message::Text(serde_json::to_string(&reply).unwrap().into()))
        .await
        .unwrap();

    match next_message(&mut stream).await {
        PairDeviceMessage::Error { message, .. } => {
            assert!(message.contains("unknown device"), "unexpected message {message}")
        }
        other => panic!("expected error, got {other:?}"),
    }
}

/// test approval without an attached signer
#[tokio::test]
async fn test_approve_without_signer() {
    let t = create_test_app().await;
    let signer = TestSigner::new(3);
    register(&t.app, &signer).await;

    let (device_id, _stream) = start_pairing(&t.app).await;
    let (status, error) = post_json(&t.app, "/pairing/approve", approval(&device_id, &signer)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(error["code"], "unavailable");

    let (status, _) = post_json(&t.app, "/pairing/approve", approval("unknown", &signer)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// test that dropping the pair_device stream discards the session
#[tokio::test]
async fn test_disconnect_discards_session() {
    let t = create_test_app().await;

    let (device_id, stream) = start_pairing(&t.app).await;
    assert_eq!(t.state.pairing.pending_sessions(), 1);
    drop(stream);

    let (status, _) = post_json(
        &t.app,
        "/pairing/pairing_data",
        json!({ "device_id": device_id }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(t.state.pairing.pending_sessions(), 0);
}

/// test that only registered nodes may attach a signer stream
#[tokio::test]
async fn test_signer_stream_requires_registration() {
    let t = create_test_app().await;
    let signer = TestSigner::new(4);

    let (addr, _server) = spawn_test_server(t.app.clone()).await;
    let url = format!("ws://{}/pairing/signer/{}", addr, signer.hex());
    assert!(connect_async(&url).await.is_err());
    assert!(!t.state.pairing.is_signer_connected(&signer.node_id));

    let url = format!("ws://{}/pairing/signer/not-hex", addr);
    assert!(connect_async(&url).await.is_err());
}

/// test that a stream signed with the wrong key is refused and leaves the
/// node's real signer attached
#[tokio::test]
async fn test_signer_stream_requires_node_key() {
    let t = create_test_app().await;
    let signer = TestSigner::new(5);
    let impostor = TestSigner::new(6);
    register(&t.app, &signer).await;

    let (addr, _server) = spawn_test_server(t.app.clone()).await;

    // nobody attached yet: the impostor's stream is closed, not attached
    let mut refused = open_signer_stream(addr, &signer, &impostor).await;
    match next_frame(&mut refused).await {
        Some(Message::Close(_)) | None => {}
        other => panic!("expected close, got {other:?}"),
    }
    assert!(!t.state.pairing.is_signer_connected(&signer.node_id));

    // with the real signer attached, a refused attempt does not displace it
    let mut ws = attach_signer(&t, addr, &signer).await;
    let mut refused = open_signer_stream(addr, &signer, &impostor).await;
    match next_frame(&mut refused).await {
        Some(Message::Close(_)) | None => {}
        other => panic!("expected close, got {other:?}"),
    }
    assert!(t.state.pairing.is_signer_connected(&signer.node_id));

    let (device_id, _stream) = start_pairing(&t.app).await;
    let (status, _) = post_json(&t.app, "/pairing/approve", approval(&device_id, &signer)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    match next_frame(&mut ws).await {
        Some(Message::Text(text)) => {
            let request: ApprovalRequest = serde_json::from_str(text.as_str()).unwrap();
            assert_eq!(request.device_id, device_id);
        }
        other => panic!("expected approval request, got {other:?}"),
    }
}
