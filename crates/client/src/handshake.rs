//! The `connect` handshake.
//!
//! Every gateway session starts the same way: the server pushes a
//! `connect.challenge` event (optionally carrying a nonce), the client
//! answers with a `connect` request, and the server replies on the sentinel
//! id. Nothing else may be written before that reply says `ok`.

use {
    clawdeck_identity::{DeviceIdentity, signing::ProofContext},
    clawdeck_protocol::{
        CONNECT_CHALLENGE_EVENT, CONNECT_METHOD, CONNECT_REQUEST_ID, ChallengePayload,
        ClientInfo, ConnectAuth, ConnectParams, GatewayFrame, HelloOk, PROTOCOL_VERSION,
        encode_frame, parse_frame,
    },
    futures::{SinkExt as _, StreamExt as _},
    tokio_tungstenite::tungstenite::Message,
};

use crate::{
    WsStream,
    config::GatewayConfig,
    error::{Result, RpcError},
    now_ms,
};

/// Drive a fresh socket through the handshake, returning the hello payload.
///
/// Malformed frames and unrelated pre-auth traffic are ignored; a transport
/// close before the sentinel response is `ConnectionClosed`, a negative
/// response is `AuthFailed` with the server's message.
pub(crate) async fn authenticate(
    stream: &mut WsStream,
    config: &GatewayConfig,
    identity: Option<&DeviceIdentity>,
) -> Result<HelloOk> {
    while let Some(message) = stream.next().await {
        let text = match message? {
            Message::Text(text) => text,
            Message::Close(_) => return Err(RpcError::ConnectionClosed),
            _ => continue,
        };
        match parse_frame(&text) {
            Some(GatewayFrame::Event { event, payload, .. })
                if event == CONNECT_CHALLENGE_EVENT =>
            {
                let nonce = payload
                    .and_then(|value| serde_json::from_value::<ChallengePayload>(value).ok())
                    .and_then(|challenge| challenge.nonce);
                let params = build_connect_params(config, identity, nonce.as_deref());
                let frame = GatewayFrame::Request {
                    id: CONNECT_REQUEST_ID.to_string(),
                    method: CONNECT_METHOD.to_string(),
                    params: Some(serde_json::to_value(&params)?),
                };
                stream.send(Message::text(encode_frame(&frame)?)).await?;
            },
            Some(GatewayFrame::Response {
                id, ok, payload, error, ..
            }) if id == CONNECT_REQUEST_ID => {
                if !ok {
                    return Err(RpcError::auth_failed(error.as_ref()));
                }
                let hello = payload
                    .and_then(|value| serde_json::from_value::<HelloOk>(value).ok())
                    .unwrap_or_default();
                tracing::debug!(protocol = hello.protocol, "gateway handshake complete");
                return Ok(hello);
            },
            // Anything else before auth is noise.
            _ => {},
        }
    }
    Err(RpcError::ConnectionClosed)
}

/// Assemble the `connect` parameters for this configuration.
///
/// The device proof is only attached when an identity is present, and the
/// challenge nonce is folded into the signed payload only when the gateway
/// supplied one.
pub(crate) fn build_connect_params(
    config: &GatewayConfig,
    identity: Option<&DeviceIdentity>,
    nonce: Option<&str>,
) -> ConnectParams {
    let signed_at_ms = now_ms();
    let device = identity.map(|identity| {
        identity.connect_proof(&ProofContext {
            client_id: &config.client.id,
            client_mode: &config.client.mode,
            role: &config.role,
            scopes: &config.scopes,
            signed_at_ms,
            nonce,
        })
    });

    let token = identity
        .and_then(|identity| identity.token().map(str::to_string))
        .or_else(|| config.token.clone());
    let auth = if token.is_some() || config.password.is_some() {
        Some(ConnectAuth {
            token,
            password: config.password.clone(),
        })
    } else {
        None
    };

    ConnectParams {
        min_protocol: PROTOCOL_VERSION,
        max_protocol: PROTOCOL_VERSION,
        client: ClientInfo {
            id: config.client.id.clone(),
            version: config.client.version.clone(),
            platform: config.client.platform.clone(),
            mode: config.client.mode.clone(),
            display_name: None,
            instance_id: Some(config.client.instance_id.clone()),
        },
        role: Some(config.role.clone()),
        scopes: Some(config.scopes.clone()),
        auth,
        device,
    }
}
