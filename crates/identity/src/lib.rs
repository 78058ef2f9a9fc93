//! Device identity for gateway authentication.
//!
//! A dashboard host may carry a device identity: an Ed25519 keypair plus a
//! bearer token persisted under the state directory. On every connect attempt
//! the identity signs a proof the gateway verifies against the public key
//! (see [`signing`] for the byte-for-byte payload contract).
//!
//! Absence of identity files is a valid state, not an error: [`DeviceIdentityProvider::load`]
//! returns `None` and the handshake falls back to password/token-only auth.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};

use {
    base64::Engine as _,
    base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    ed25519_dalek::{Signer as _, SigningKey, VerifyingKey},
    rand::RngCore as _,
    serde::{Deserialize, Serialize},
    sha2::{Digest, Sha256},
};

pub mod signing;

const IDENTITY_DIR: &str = "identity";
const DEVICE_KEYS_FILE: &str = "device.json";
const DEVICE_AUTH_FILE: &str = "device-auth.json";

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("invalid device key material: {0}")]
    Key(String),
}

pub type Result<T> = std::result::Result<T, IdentityError>;

// ── On-disk shapes ───────────────────────────────────────────────────────────

/// `identity/device.json` — the raw keypair, base64url-encoded.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredDeviceKeys {
    public_key: String,
    private_key: String,
}

/// `identity/device-auth.json` — the gateway-issued bearer token.
#[derive(Debug, Serialize, Deserialize)]
struct StoredDeviceAuth {
    token: String,
}

// ── Device identity ──────────────────────────────────────────────────────────

/// A loaded device identity: signing keypair, derived id, optional token.
pub struct DeviceIdentity {
    device_id: String,
    signing_key: SigningKey,
    public_key: String,
    token: Option<String>,
}

impl std::fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("device_id", &self.device_id)
            .field("has_token", &self.token.is_some())
            .finish_non_exhaustive()
    }
}

impl DeviceIdentity {
    /// Build an identity from key material. The device id is always derived
    /// from the public key; a stored id is never trusted.
    pub fn from_signing_key(signing_key: SigningKey, token: Option<String>) -> Self {
        let verifying = signing_key.verifying_key();
        Self {
            device_id: derive_device_id(&verifying),
            public_key: URL_SAFE_NO_PAD.encode(verifying.as_bytes()),
            signing_key,
            token,
        }
    }

    /// Generate a fresh keypair (first-run provisioning).
    pub fn generate() -> Self {
        let mut secret = [0u8; 32];
        rand::rng().fill_bytes(&mut secret);
        Self::from_signing_key(SigningKey::from_bytes(&secret), None)
    }

    /// Stable device id: `hex(sha256(raw public key))`.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Raw public key, base64url-encoded for transport.
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Gateway-issued bearer token, if one has been stored.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Sign arbitrary bytes, returning the base64url-encoded signature.
    pub fn sign(&self, payload: &[u8]) -> String {
        URL_SAFE_NO_PAD.encode(self.signing_key.sign(payload).to_bytes())
    }
}

/// Derive the wire device id from a public key.
pub fn derive_device_id(key: &VerifyingKey) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

// ── Provider ─────────────────────────────────────────────────────────────────

/// Loads the device identity from the state directory, once per process.
///
/// Owned by the composition root and injected into the gateway clients;
/// the memoized result is shared across all connection attempts.
pub struct DeviceIdentityProvider {
    state_dir: PathBuf,
    cached: OnceLock<Option<Arc<DeviceIdentity>>>,
}

impl DeviceIdentityProvider {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            cached: OnceLock::new(),
        }
    }

    /// Load the identity, memoized for the provider's lifetime.
    ///
    /// Missing or corrupt identity files degrade to `None` — callers fall
    /// back to password/token-only auth.
    pub fn load(&self) -> Option<Arc<DeviceIdentity>> {
        self.cached
            .get_or_init(|| match self.read_from_disk() {
                Ok(identity) => identity.map(Arc::new),
                Err(err) => {
                    tracing::warn!(
                        state_dir = %self.state_dir.display(),
                        "unusable device identity, falling back to shared-secret auth: {err}"
                    );
                    None
                },
            })
            .clone()
    }

    /// Write the identity files (first-run provisioning). Not called
    /// implicitly by [`Self::load`].
    pub fn persist(&self, identity: &DeviceIdentity) -> Result<()> {
        let dir = self.state_dir.join(IDENTITY_DIR);
        fs::create_dir_all(&dir)?;

        let keys = StoredDeviceKeys {
            public_key: identity.public_key.clone(),
            private_key: URL_SAFE_NO_PAD.encode(identity.signing_key.to_bytes()),
        };
        let keys_path = dir.join(DEVICE_KEYS_FILE);
        fs::write(&keys_path, serde_json::to_string_pretty(&keys)?)?;
        restrict_permissions(&keys_path)?;

        if let Some(token) = &identity.token {
            let auth = StoredDeviceAuth {
                token: token.clone(),
            };
            let auth_path = dir.join(DEVICE_AUTH_FILE);
            fs::write(&auth_path, serde_json::to_string_pretty(&auth)?)?;
            restrict_permissions(&auth_path)?;
        }
        Ok(())
    }

    fn read_from_disk(&self) -> Result<Option<DeviceIdentity>> {
        let dir = self.state_dir.join(IDENTITY_DIR);
        let keys_path = dir.join(DEVICE_KEYS_FILE);
        if !keys_path.exists() {
            tracing::debug!(
                path = %keys_path.display(),
                "no device identity on disk"
            );
            return Ok(None);
        }

        let raw = fs::read_to_string(&keys_path)?;
        let stored: StoredDeviceKeys = serde_json::from_str(&raw)?;
        let secret = decode_key_b64(&stored.private_key)?;
        let secret: [u8; 32] = secret
            .try_into()
            .map_err(|_| IdentityError::Key("private key must be 32 bytes".into()))?;
        let signing_key = SigningKey::from_bytes(&secret);

        // The stored public key is advisory; the derived one is the truth.
        let derived_public = URL_SAFE_NO_PAD.encode(signing_key.verifying_key().as_bytes());
        if stored.public_key != derived_public {
            tracing::warn!("stored device public key does not match private key, using derived");
        }

        let token = self.read_token(&dir)?;
        let identity = DeviceIdentity::from_signing_key(signing_key, token);
        tracing::debug!(device_id = %identity.device_id(), "loaded device identity");
        Ok(Some(identity))
    }

    fn read_token(&self, dir: &Path) -> Result<Option<String>> {
        let auth_path = dir.join(DEVICE_AUTH_FILE);
        if !auth_path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&auth_path)?;
        let stored: StoredDeviceAuth = serde_json::from_str(&raw)?;
        Ok(Some(stored.token))
    }
}

fn decode_key_b64(input: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(input.as_bytes())
        .or_else(|_| STANDARD.decode(input.as_bytes()))
        .map_err(|_| IdentityError::Key("invalid base64 key encoding".into()))
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    Ok(fs::set_permissions(path, fs::Permissions::from_mode(0o600))?)
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
