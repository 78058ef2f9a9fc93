//! Gateway WebSocket wire protocol (v3).
//!
//! All gateway traffic is JSON text frames over a single WebSocket, in one of
//! three shapes:
//! - `req`   — client → gateway RPC call
//! - `res`   — gateway → client RPC result, correlated by `id`
//! - `event` — gateway → client server-push
//!
//! A fresh connection starts with a server-pushed `connect.challenge` event;
//! the client must answer with a `connect` request (sentinel id `"connect"`)
//! before any application RPC is allowed.

use serde::{Deserialize, Serialize};

// ── Constants ────────────────────────────────────────────────────────────────

/// Protocol version this client speaks (sent as both min and max).
pub const PROTOCOL_VERSION: u32 = 3;

/// Event name the gateway pushes as the first message of any session.
pub const CONNECT_CHALLENGE_EVENT: &str = "connect.challenge";

/// Sentinel request id used for the handshake request.
pub const CONNECT_REQUEST_ID: &str = "connect";

/// Method name of the handshake request.
pub const CONNECT_METHOD: &str = "connect";

// ── Frames ───────────────────────────────────────────────────────────────────

/// One wire frame — the closed tagged union of everything the gateway
/// sends or accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GatewayFrame {
    /// Client → gateway RPC call.
    #[serde(rename = "req")]
    Request {
        id: String,
        method: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        params: Option<serde_json::Value>,
    },

    /// Gateway → client RPC result.
    #[serde(rename = "res")]
    Response {
        id: String,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<ErrorShape>,
    },

    /// Gateway → client server-push.
    #[serde(rename = "event")]
    Event {
        event: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
        // Number in older gateways, object in newer ones; opaque either way.
        #[serde(rename = "stateVersion", skip_serializing_if = "Option::is_none")]
        state_version: Option<serde_json::Value>,
    },
}

/// Error shape carried by `res` frames with `ok = false`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorShape {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorShape {
    /// Server-supplied message, or a generic fallback when absent.
    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or("gateway error")
    }
}

// ── Codec ────────────────────────────────────────────────────────────────────

/// Decode one inbound text message.
///
/// Total and fallible: malformed JSON, a missing/unknown `type` discriminant,
/// or missing required fields all yield `None`. Callers drop such frames
/// silently — they must never tear down a connection.
pub fn parse_frame(text: &str) -> Option<GatewayFrame> {
    serde_json::from_str(text).ok()
}

/// Encode an outbound frame to a single JSON text message.
pub fn encode_frame(frame: &GatewayFrame) -> serde_json::Result<String> {
    serde_json::to_string(frame)
}

// ── Connect handshake ────────────────────────────────────────────────────────

/// Payload of the `connect.challenge` event. The nonce is optional: older
/// gateways do not send one, and the signed device proof must only include
/// it when present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChallengePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

/// Parameters of the client's `connect` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub min_protocol: u32,
    pub max_protocol: u32,
    pub client: ClientInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<ConnectAuth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub id: String,
    pub version: String,
    pub platform: String,
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}

/// Shared-secret auth block. Either field may be present; the gateway
/// decides which one it honors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectAuth {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Signed device identity proof attached to `connect`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub id: String,
    pub public_key: String,
    pub signature: String,
    pub signed_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

// ── Hello payload ────────────────────────────────────────────────────────────

/// The gateway's affirmative reply to `connect`.
///
/// Every field is lenient: a client must keep working against gateways that
/// omit parts of the hello, so decoding never fails on absent fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HelloOk {
    #[serde(default)]
    pub protocol: u32,
    #[serde(default)]
    pub server: Option<ServerInfo>,
    #[serde(default)]
    pub features: Features,
    #[serde(default)]
    pub snapshot: serde_json::Value,
    #[serde(default)]
    pub auth: Option<HelloAuth>,
    #[serde(default)]
    pub policy: Option<Policy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    #[serde(default)]
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default)]
    pub conn_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Features {
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub events: Vec<String>,
}

/// Effective auth grant issued with the hello.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloAuth {
    #[serde(default)]
    pub device_token: Option<String>,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issued_at_ms: Option<u64>,
}

/// Server policy advertised in the hello (heartbeat cadence, size caps).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    #[serde(default)]
    pub max_payload: Option<u64>,
    #[serde(default)]
    pub max_buffered_bytes: Option<u64>,
    #[serde(default)]
    pub tick_interval_ms: Option<u64>,
}

// ── Roles and scopes ─────────────────────────────────────────────────────────

pub mod roles {
    pub const OPERATOR: &str = "operator";
}

pub mod scopes {
    pub const ADMIN: &str = "operator.admin";
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ── Decoding ────────────────────────────────────────────────────────

    #[test]
    fn parses_request_frame() {
        let frame =
            parse_frame(r#"{"type":"req","id":"1-abc","method":"agents.list","params":{}}"#)
                .unwrap();
        match frame {
            GatewayFrame::Request { id, method, params } => {
                assert_eq!(id, "1-abc");
                assert_eq!(method, "agents.list");
                assert_eq!(params, Some(serde_json::json!({})));
            },
            _ => panic!("expected req frame"),
        }
    }

    #[test]
    fn parses_response_frame_with_error() {
        let frame = parse_frame(
            r#"{"type":"res","id":"connect","ok":false,"error":{"code":"INVALID_REQUEST","message":"bad password"}}"#,
        )
        .unwrap();
        match frame {
            GatewayFrame::Response { id, ok, error, .. } => {
                assert_eq!(id, "connect");
                assert!(!ok);
                assert_eq!(error.unwrap().message(), "bad password");
            },
            _ => panic!("expected res frame"),
        }
    }

    #[test]
    fn parses_event_with_numeric_state_version() {
        let frame =
            parse_frame(r#"{"type":"event","event":"agent","payload":{"agentId":"a1"},"seq":7,"stateVersion":12}"#)
                .unwrap();
        match frame {
            GatewayFrame::Event {
                event,
                seq,
                state_version,
                ..
            } => {
                assert_eq!(event, "agent");
                assert_eq!(seq, Some(7));
                assert_eq!(state_version, Some(serde_json::json!(12)));
            },
            _ => panic!("expected event frame"),
        }
    }

    #[test]
    fn parses_event_with_object_state_version() {
        let frame = parse_frame(
            r#"{"type":"event","event":"presence","payload":null,"stateVersion":{"presence":3,"health":1}}"#,
        )
        .unwrap();
        assert!(matches!(frame, GatewayFrame::Event { .. }));
    }

    #[test]
    fn challenge_without_nonce_parses() {
        let frame = parse_frame(r#"{"type":"event","event":"connect.challenge","payload":{}}"#);
        let Some(GatewayFrame::Event { event, payload, .. }) = frame else {
            panic!("expected event frame");
        };
        assert_eq!(event, CONNECT_CHALLENGE_EVENT);
        let challenge: ChallengePayload =
            serde_json::from_value(payload.unwrap_or_default()).unwrap();
        assert!(challenge.nonce.is_none());
    }

    // ── Malformed input never decodes, never panics ─────────────────────

    #[test]
    fn malformed_inputs_yield_none() {
        let cases = [
            "",
            "not json",
            "42",
            "null",
            r#"{"no":"type"}"#,
            r#"{"type":"unknown","id":"1"}"#,
            r#"{"type":"req","method":"x"}"#,    // missing id
            r#"{"type":"res","id":"1"}"#,        // missing ok
            r#"{"type":"event","payload":{}}"#,  // missing event name
            "{\"type\":\"req\",\"id\":\"1\",\"method\":", // truncated
        ];
        for case in cases {
            assert!(parse_frame(case).is_none(), "should drop: {case}");
        }
    }

    // ── Encoding ────────────────────────────────────────────────────────

    #[test]
    fn encodes_request_with_wire_field_names() {
        let frame = GatewayFrame::Request {
            id: "connect".into(),
            method: "connect".into(),
            params: None,
        };
        let json: serde_json::Value =
            serde_json::from_str(&encode_frame(&frame).unwrap()).unwrap();
        assert_eq!(json["type"], "req");
        assert_eq!(json["id"], "connect");
        assert!(!json.as_object().unwrap().contains_key("params"));
    }

    #[test]
    fn connect_params_serialize_camel_case() {
        let params = ConnectParams {
            min_protocol: PROTOCOL_VERSION,
            max_protocol: PROTOCOL_VERSION,
            client: ClientInfo {
                id: "gateway-client".into(),
                version: "0.1.0".into(),
                platform: "linux".into(),
                mode: "backend".into(),
                display_name: None,
                instance_id: Some("i-1".into()),
            },
            role: Some(roles::OPERATOR.into()),
            scopes: Some(vec![scopes::ADMIN.into()]),
            auth: Some(ConnectAuth {
                token: None,
                password: Some("secret".into()),
            }),
            device: None,
        };
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["minProtocol"], 3);
        assert_eq!(json["maxProtocol"], 3);
        assert_eq!(json["client"]["instanceId"], "i-1");
        assert_eq!(json["auth"]["password"], "secret");
        assert!(!json.as_object().unwrap().contains_key("device"));
    }

    #[test]
    fn device_info_serializes_wire_names() {
        let device = DeviceInfo {
            id: "deadbeef".into(),
            public_key: "pk".into(),
            signature: "sig".into(),
            signed_at: 1_700_000_000_000,
            nonce: Some("n1".into()),
        };
        let json = serde_json::to_value(&device).unwrap();
        assert_eq!(json["publicKey"], "pk");
        assert_eq!(json["signedAt"], 1_700_000_000_000_u64);
        assert_eq!(json["nonce"], "n1");
    }

    // ── Hello payload leniency ──────────────────────────────────────────

    #[test]
    fn minimal_hello_decodes() {
        let hello: HelloOk = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(hello.protocol, 0);
        assert!(hello.server.is_none());
        assert!(hello.features.methods.is_empty());
    }

    #[test]
    fn full_hello_decodes() {
        let hello: HelloOk = serde_json::from_value(serde_json::json!({
            "type": "hello-ok",
            "protocol": 3,
            "server": { "version": "1.2.3", "connId": "c-9" },
            "features": { "methods": ["health"], "events": ["agent"] },
            "snapshot": { "presence": [] },
            "auth": { "deviceToken": "tok", "role": "operator", "scopes": ["operator.admin"] },
            "policy": { "maxPayload": 524288, "tickIntervalMs": 30000 }
        }))
        .unwrap();
        assert_eq!(hello.protocol, 3);
        assert_eq!(hello.server.unwrap().conn_id, "c-9");
        assert_eq!(hello.auth.unwrap().role, "operator");
        assert_eq!(hello.policy.unwrap().tick_interval_ms, Some(30_000));
    }
}
