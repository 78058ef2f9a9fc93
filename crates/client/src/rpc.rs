//! One-shot RPC over a throwaway socket.
//!
//! Each call dials the gateway, authenticates, sends a single request and
//! waits for its response. Nothing is pooled; dropping the stream is the
//! close path on every exit.

use std::sync::Arc;

use {
    clawdeck_identity::{DeviceIdentity, DeviceIdentityProvider},
    clawdeck_protocol::{GatewayFrame, encode_frame, parse_frame},
    futures::{SinkExt as _, StreamExt as _},
    tokio_tungstenite::{connect_async, tungstenite::Message},
};

use crate::{
    WsStream,
    config::GatewayConfig,
    error::{Result, RpcError},
    handshake::authenticate,
    now_ms,
};

/// Stateless gateway caller. Cheap to clone and share.
#[derive(Clone)]
pub struct GatewayRpc {
    config: GatewayConfig,
    identity: Option<Arc<DeviceIdentity>>,
}

impl GatewayRpc {
    /// Build a caller, loading the device identity from the configured
    /// state directory.
    pub fn new(config: GatewayConfig) -> Self {
        let identity = DeviceIdentityProvider::new(&config.state_dir).load();
        Self { config, identity }
    }

    /// Build a caller with an explicit identity (or none).
    pub fn with_identity(config: GatewayConfig, identity: Option<Arc<DeviceIdentity>>) -> Self {
        Self { config, identity }
    }

    /// Call `method` and wait for its response.
    ///
    /// The whole exchange, dial and handshake included, must finish within
    /// `call_timeout`; otherwise the socket is dropped and the call fails
    /// with [`RpcError::Timeout`].
    pub async fn call(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        match tokio::time::timeout(self.config.call_timeout, self.call_inner(method, params))
            .await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(method, "gateway rpc timed out");
                Err(RpcError::Timeout)
            },
        }
    }

    /// Send `method` without waiting for a response.
    ///
    /// Success means the request frame was written and flushed on an
    /// authenticated socket. The socket is closed in the background after a
    /// short grace period; the caller does not wait for it.
    pub async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> Result<()> {
        let (mut stream, _) = connect_async(&self.config.url).await?;
        authenticate(&mut stream, &self.config, self.identity.as_deref()).await?;

        let frame = GatewayFrame::Request {
            id: request_id(),
            method: method.to_string(),
            params: Some(params.unwrap_or_else(|| serde_json::json!({}))),
        };
        stream.send(Message::text(encode_frame(&frame)?)).await?;
        stream.flush().await?;

        let grace = self.config.notify_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = stream.close(None).await;
        });
        Ok(())
    }

    async fn call_inner(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let (mut stream, _) = connect_async(&self.config.url).await?;
        authenticate(&mut stream, &self.config, self.identity.as_deref()).await?;

        let id = request_id();
        let frame = GatewayFrame::Request {
            id: id.clone(),
            method: method.to_string(),
            params: Some(params.unwrap_or_else(|| serde_json::json!({}))),
        };
        stream.send(Message::text(encode_frame(&frame)?)).await?;

        let result = await_response(&mut stream, &id).await;
        let _ = stream.close(None).await;
        result
    }
}

/// Wait for the response matching `id`, ignoring everything else.
async fn await_response(stream: &mut WsStream, id: &str) -> Result<serde_json::Value> {
    while let Some(message) = stream.next().await {
        let text = match message? {
            Message::Text(text) => text,
            Message::Close(_) => return Err(RpcError::ConnectionClosed),
            _ => continue,
        };
        if let Some(GatewayFrame::Response {
            id: res_id,
            ok,
            payload,
            error,
        }) = parse_frame(&text)
        {
            if res_id != id {
                continue;
            }
            return if ok {
                Ok(payload.unwrap_or_else(|| serde_json::json!({})))
            } else {
                Err(RpcError::remote(error.as_ref()))
            };
        }
    }
    Err(RpcError::ConnectionClosed)
}

/// Request ids mirror the dashboard's historical format: unix millis plus
/// a random hex suffix.
pub(crate) fn request_id() -> String {
    format!("{}-{:x}", now_ms(), rand::random::<u64>())
}
