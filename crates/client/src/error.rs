use clawdeck_protocol::ErrorShape;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// No terminal frame arrived within the call timeout.
    #[error("gateway request timed out")]
    Timeout,
    /// The gateway rejected the `connect` handshake. Carries the server's
    /// message verbatim.
    #[error("{0}")]
    AuthFailed(String),
    /// The gateway answered `ok: false` after a successful handshake.
    #[error("{message}")]
    Remote {
        message: String,
        code: Option<String>,
    },
    /// The socket closed before the response arrived.
    #[error("gateway connection closed before response")]
    ConnectionClosed,
    /// A call was issued on a shared connection that is not authenticated.
    #[error("gateway connection not established")]
    ConnectionNotEstablished,
    #[error(transparent)]
    Tungstenite(Box<tokio_tungstenite::tungstenite::Error>),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl RpcError {
    pub(crate) fn auth_failed(error: Option<&ErrorShape>) -> Self {
        let message = error
            .and_then(|e| e.message.as_deref())
            .unwrap_or("gateway authentication failed");
        Self::AuthFailed(message.to_string())
    }

    pub(crate) fn remote(error: Option<&ErrorShape>) -> Self {
        Self::Remote {
            message: error
                .map(ErrorShape::message)
                .unwrap_or("gateway error")
                .to_string(),
            code: error.and_then(|e| e.code.clone()),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RpcError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Tungstenite(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
