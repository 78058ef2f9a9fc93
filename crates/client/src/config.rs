//! Gateway client configuration.
//!
//! Everything is environment-driven with sane defaults; tests override
//! fields through the builder-style setters instead of touching the
//! process environment.

use std::{path::PathBuf, sync::LazyLock, time::Duration};

use directories::ProjectDirs;

pub const DEFAULT_GATEWAY_URL: &str = "ws://127.0.0.1:18789";

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(12);
const DEFAULT_NOTIFY_GRACE: Duration = Duration::from_millis(250);
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// One id per process; lets the gateway tell concurrent dashboard
/// instances apart.
static INSTANCE_ID: LazyLock<String> = LazyLock::new(|| uuid::Uuid::new_v4().to_string());

/// How this client introduces itself during the handshake.
#[derive(Debug, Clone)]
pub struct ClientDescriptor {
    pub id: String,
    pub mode: String,
    pub platform: String,
    pub version: String,
    pub instance_id: String,
}

impl Default for ClientDescriptor {
    fn default() -> Self {
        Self {
            id: "gateway-client".to_string(),
            mode: "backend".to_string(),
            platform: std::env::consts::OS.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            instance_id: INSTANCE_ID.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub url: String,
    pub token: Option<String>,
    pub password: Option<String>,
    pub state_dir: PathBuf,
    pub client: ClientDescriptor,
    pub role: String,
    pub scopes: Vec<String>,
    pub call_timeout: Duration,
    pub notify_grace: Duration,
    pub reconnect_delay: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_GATEWAY_URL.to_string(),
            token: None,
            password: None,
            state_dir: default_state_dir(),
            client: ClientDescriptor::default(),
            role: clawdeck_protocol::roles::OPERATOR.to_string(),
            scopes: vec![clawdeck_protocol::scopes::ADMIN.to_string()],
            call_timeout: DEFAULT_CALL_TIMEOUT,
            notify_grace: DEFAULT_NOTIFY_GRACE,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

impl GatewayConfig {
    /// Read the configuration from `CLAWDECK_GATEWAY_*` environment
    /// variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("CLAWDECK_GATEWAY_URL") {
            config.url = url;
        }
        config.token = std::env::var("CLAWDECK_GATEWAY_TOKEN").ok();
        config.password = std::env::var("CLAWDECK_GATEWAY_PASSWORD").ok();
        if let Ok(dir) = std::env::var("CLAWDECK_STATE_DIR") {
            config.state_dir = PathBuf::from(dir);
        }
        config
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_notify_grace(mut self, grace: Duration) -> Self {
        self.notify_grace = grace;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

fn default_state_dir() -> PathBuf {
    ProjectDirs::from("", "", "clawdeck")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_gateway_contract() {
        let config = GatewayConfig::default();
        assert_eq!(config.url, "ws://127.0.0.1:18789");
        assert_eq!(config.call_timeout, Duration::from_secs(12));
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.role, "operator");
        assert_eq!(config.scopes, vec!["operator.admin".to_string()]);
    }

    #[test]
    fn client_descriptor_is_stable_within_a_process() {
        let a = ClientDescriptor::default();
        let b = ClientDescriptor::default();
        assert_eq!(a.instance_id, b.instance_id);
        assert_eq!(a.id, "gateway-client");
        assert_eq!(a.mode, "backend");
    }

    #[test]
    fn builders_override_fields() {
        let config = GatewayConfig::default()
            .with_url("ws://10.0.0.1:1")
            .with_token("t")
            .with_password("p")
            .with_call_timeout(Duration::from_millis(50));
        assert_eq!(config.url, "ws://10.0.0.1:1");
        assert_eq!(config.token.as_deref(), Some("t"));
        assert_eq!(config.password.as_deref(), Some("p"));
        assert_eq!(config.call_timeout, Duration::from_millis(50));
    }
}
