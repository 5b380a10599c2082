//! handlers for the `/pairing` endpoints.
//!
//! `pair_device` answers with a newline-delimited json stream: first the
//! pairing code, then either the signed certificate or an error once the
//! session resolves. the signer side is a websocket carrying json text
//! frames in both directions, opened by a challenge the signer must sign.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json,
    body::Body,
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket, close_code},
    },
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt, future, stream};
use lightyard_types::NodeId;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ApiError, ResultExt};
use crate::pairing::{
    ApprovalResponse, ApprovePairingRequest, PairDeviceRequest, PairingData, PairingDataRequest,
    SignerAuth, SignerChallenge, SignerConnection,
};
use crate::{AppState, Error, PairingCoordinator};

/// content-type of the pair_device stream.
const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// how long a signer has to answer the stream's challenge.
const SIGNER_AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// one line of the pair_device stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PairDeviceMessage {
    /// sent immediately; the code is shown to the approving device.
    PairingCode { device_id: String, code: String },
    /// the session was approved and the csr signed.
    DeviceCert {
        device_cert: String,
        node_id: NodeId,
        rune: String,
    },
    /// the session was rejected, expired or failed.
    Error { code: String, message: String },
}

/// post /pairing/pair_device
pub async fn pair_device(
    State(state): State<AppState>,
    Json(req): Json<PairDeviceRequest>,
) -> Result<Response, ApiError> {
    let pending = state.pairing.pair_device(req)?;
    let first = PairDeviceMessage::PairingCode {
        device_id: pending.device_id.clone(),
        code: pending.code.clone(),
    };

    // dropping the body (client gone) drops `pending`, discarding the session
    let outcome = async move {
        match pending.outcome().await {
            Ok(outcome) => PairDeviceMessage::DeviceCert {
                device_cert: outcome.device_cert,
                node_id: outcome.node_id,
                rune: outcome.rune,
            },
            Err(e) => {
                let api = ApiError::from(e);
                let (_, code, message) = api.parts();
                PairDeviceMessage::Error {
                    code: code.to_string(),
                    message: message.to_string(),
                }
            }
        }
    };

    let lines = stream::once(future::ready(first))
        .chain(stream::once(outcome))
        .map(|message| encode_line(&message));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)
        .body(Body::from_stream(lines))
        .map_internal()
}

fn encode_line(message: &PairDeviceMessage) -> Result<Bytes, serde_json::Error> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    Ok(Bytes::from(line))
}

/// post /pairing/pairing_data
pub async fn pairing_data(
    State(state): State<AppState>,
    Json(req): Json<PairingDataRequest>,
) -> Result<Json<PairingData>, ApiError> {
    Ok(Json(state.pairing.get_pairing_data(&req.device_id)?))
}

/// post /pairing/approve
pub async fn approve(
    State(state): State<AppState>,
    Json(req): Json<ApprovePairingRequest>,
) -> Result<StatusCode, ApiError> {
    state.pairing.approve_pairing(req).await?;
    Ok(StatusCode::ACCEPTED)
}

/// get /pairing/signer/{node_id} - the signer's request stream.
///
/// only registered nodes may attach. the first frame out is a
/// [`SignerChallenge`] and the signer's first frame back must be a
/// [`SignerAuth`] over it; anything else closes the socket without touching
/// an attached stream. after that approval requests go out as json text
/// frames and the signer answers each with an `ApprovalResponse` frame.
pub async fn signer_stream(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let node_id: NodeId = node_id.parse().map_err(Error::from)?;
    state.scheduler.node(&node_id)?;

    let pairing = Arc::clone(&state.pairing);
    Ok(ws
        .on_upgrade(move |socket| attach_signer(socket, pairing, node_id))
        .into_response())
}

async fn attach_signer(mut socket: WebSocket, pairing: Arc<PairingCoordinator>, node_id: NodeId) {
    match authenticate(&mut socket, &pairing, node_id).await {
        Ok(connection) => run_signer_socket(socket, connection).await,
        Err(e) => {
            warn!(node_id = %node_id.short_string(), error = %e, "refused signer stream");
            let close = CloseFrame {
                code: close_code::POLICY,
                reason: e.to_string().into(),
            };
            let _ = socket.send(Message::Close(Some(close))).await;
        }
    }
}

async fn authenticate(
    socket: &mut WebSocket,
    pairing: &PairingCoordinator,
    node_id: NodeId,
) -> crate::Result<SignerConnection> {
    let challenge = pairing.signer_challenge();
    let hello = serde_json::to_string(&SignerChallenge {
        challenge: challenge.to_vec(),
    })
    .map_err(|e| Error::io("encoding signer challenge", std::io::Error::other(e)))?;
    socket
        .send(Message::Text(hello.into()))
        .await
        .map_err(|e| Error::io("sending signer challenge", std::io::Error::other(e)))?;

    let auth = match tokio::time::timeout(SIGNER_AUTH_TIMEOUT, socket.recv()).await {
        Ok(Some(Ok(Message::Text(text)))) => serde_json::from_str::<SignerAuth>(text.as_str())
            .map_err(|e| Error::InvalidArgument(format!("malformed signer authentication: {e}")))?,
        Ok(_) => {
            return Err(Error::InvalidArgument(
                "expected signer authentication".to_string(),
            ));
        }
        Err(_) => {
            return Err(Error::InvalidArgument(
                "signer authentication timed out".to_string(),
            ));
        }
    };
    pairing.authenticate_signer(node_id, &challenge, &auth.signature)
}

async fn run_signer_socket(socket: WebSocket, mut connection: SignerConnection) {
    let node = connection.node_id().short_string();
    let (mut sink, mut frames) = socket.split();

    loop {
        tokio::select! {
            request = connection.next_request() => {
                let Some(request) = request else {
                    debug!(node_id = %node, "signer connection replaced");
                    break;
                };
                let text = match serde_json::to_string(&request) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(node_id = %node, error = %e, "failed to encode approval request");
                        continue;
                    }
                };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            frame = frames.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ApprovalResponse>(text.as_str()) {
                        Ok(reply) => connection.reply(reply).await,
                        Err(e) => warn!(node_id = %node, error = %e, "malformed approval response"),
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!(node_id = %node, "signer stream closed");
}
