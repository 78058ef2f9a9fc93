//! Connect proof construction.
//!
//! The gateway verifies a pipe-joined payload signed with the device key.
//! Field order and delimiters are the wire contract and must not change:
//!
//! ```text
//! version|deviceId|clientId|clientMode|role|scopes,csv|signedAtMs|token[|nonce]
//! ```
//!
//! `version` is `v2` when the gateway issued a challenge nonce, `v1` otherwise.
//! The token slot is the empty string when no token has been stored yet.

use clawdeck_protocol::DeviceInfo;

use crate::DeviceIdentity;

/// Inputs the proof binds the signature to, beyond the identity itself.
#[derive(Debug, Clone)]
pub struct ProofContext<'a> {
    pub client_id: &'a str,
    pub client_mode: &'a str,
    pub role: &'a str,
    pub scopes: &'a [String],
    pub signed_at_ms: u64,
    pub nonce: Option<&'a str>,
}

/// Build the exact byte string the device key signs.
pub fn signing_payload(device_id: &str, token: Option<&str>, ctx: &ProofContext<'_>) -> String {
    let version = if ctx.nonce.is_some() { "v2" } else { "v1" };
    let mut parts = vec![
        version.to_string(),
        device_id.to_string(),
        ctx.client_id.to_string(),
        ctx.client_mode.to_string(),
        ctx.role.to_string(),
        ctx.scopes.join(","),
        ctx.signed_at_ms.to_string(),
        token.unwrap_or_default().to_string(),
    ];
    if let Some(nonce) = ctx.nonce {
        parts.push(nonce.to_string());
    }
    parts.join("|")
}

impl DeviceIdentity {
    /// Produce the signed proof attached to the `connect` request.
    pub fn connect_proof(&self, ctx: &ProofContext<'_>) -> DeviceInfo {
        let payload = signing_payload(self.device_id(), self.token(), ctx);
        DeviceInfo {
            id: self.device_id().to_string(),
            public_key: self.public_key().to_string(),
            signature: self.sign(payload.as_bytes()),
            signed_at: ctx.signed_at_ms,
            nonce: ctx.nonce.map(str::to_string),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use {
        base64::Engine as _,
        base64::engine::general_purpose::URL_SAFE_NO_PAD,
        ed25519_dalek::{Signature, SigningKey},
    };

    use super::*;

    fn fixed_identity(token: Option<&str>) -> DeviceIdentity {
        DeviceIdentity::from_signing_key(
            SigningKey::from_bytes(&[7u8; 32]),
            token.map(str::to_string),
        )
    }

    fn operator_scopes() -> Vec<String> {
        vec!["operator.admin".to_string()]
    }

    #[test]
    fn payload_without_nonce_is_v1() {
        let scopes = operator_scopes();
        let ctx = ProofContext {
            client_id: "gateway-client",
            client_mode: "backend",
            role: "operator",
            scopes: &scopes,
            signed_at_ms: 1_700_000_000_000,
            nonce: None,
        };
        let payload = signing_payload("dev-1", Some("tok"), &ctx);
        assert_eq!(
            payload,
            "v1|dev-1|gateway-client|backend|operator|operator.admin|1700000000000|tok"
        );
    }

    #[test]
    fn payload_with_nonce_is_v2_and_appends_nonce() {
        let scopes = operator_scopes();
        let ctx = ProofContext {
            client_id: "gateway-client",
            client_mode: "backend",
            role: "operator",
            scopes: &scopes,
            signed_at_ms: 42,
            nonce: Some("abc123"),
        };
        let payload = signing_payload("dev-1", None, &ctx);
        assert_eq!(
            payload,
            "v2|dev-1|gateway-client|backend|operator|operator.admin|42||abc123"
        );
    }

    #[test]
    fn missing_token_leaves_an_empty_slot() {
        let scopes = operator_scopes();
        let ctx = ProofContext {
            client_id: "c",
            client_mode: "backend",
            role: "operator",
            scopes: &scopes,
            signed_at_ms: 1,
            nonce: None,
        };
        assert_eq!(
            signing_payload("d", None, &ctx),
            "v1|d|c|backend|operator|operator.admin|1|"
        );
    }

    #[test]
    fn multiple_scopes_join_with_commas() {
        let scopes = vec!["a.read".to_string(), "b.write".to_string()];
        let ctx = ProofContext {
            client_id: "c",
            client_mode: "backend",
            role: "operator",
            scopes: &scopes,
            signed_at_ms: 1,
            nonce: None,
        };
        assert!(signing_payload("d", None, &ctx).contains("|a.read,b.write|"));
    }

    #[test]
    fn connect_proof_signature_verifies() {
        let identity = fixed_identity(Some("tok"));
        let scopes = operator_scopes();
        let ctx = ProofContext {
            client_id: "gateway-client",
            client_mode: "backend",
            role: "operator",
            scopes: &scopes,
            signed_at_ms: 99,
            nonce: Some("n-1"),
        };
        let proof = identity.connect_proof(&ctx);
        assert_eq!(proof.id, identity.device_id());
        assert_eq!(proof.signed_at, 99);
        assert_eq!(proof.nonce.as_deref(), Some("n-1"));

        let payload = signing_payload(identity.device_id(), identity.token(), &ctx);
        let sig_bytes: [u8; 64] = URL_SAFE_NO_PAD
            .decode(&proof.signature)
            .unwrap()
            .try_into()
            .unwrap();
        identity
            .verifying_key()
            .verify_strict(payload.as_bytes(), &Signature::from_bytes(&sig_bytes))
            .unwrap();
    }

    #[test]
    fn proof_binds_to_the_token() {
        let scopes = operator_scopes();
        let ctx = ProofContext {
            client_id: "c",
            client_mode: "backend",
            role: "operator",
            scopes: &scopes,
            signed_at_ms: 5,
            nonce: None,
        };
        let with_token = fixed_identity(Some("tok")).connect_proof(&ctx);
        let without = fixed_identity(None).connect_proof(&ctx);
        assert_ne!(with_token.signature, without.signature);
    }
}
