//! WebSocket client for the clawdeck gateway.
//!
//! Three ways to talk to the gateway, all over the same wire protocol:
//!
//! - [`GatewayRpc::call`] — one-shot request/response on a throwaway socket;
//! - [`GatewayRpc::notify`] — fire-and-forget on a throwaway socket;
//! - [`EventConnection`] — one long-lived socket shared by event subscribers
//!   and multiplexed RPC calls, with automatic reconnect.
//!
//! Every socket authenticates first (see [`clawdeck_protocol`] for the frame
//! shapes); device identity is optional and degrades to shared-secret auth.

use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

mod handshake;

pub mod config;
pub mod error;
pub mod events;
pub mod rpc;

pub use {
    config::{ClientDescriptor, DEFAULT_GATEWAY_URL, GatewayConfig},
    error::{Result, RpcError},
    events::{ConnectionStatus, EventConnection, GatewayEvent},
    rpc::GatewayRpc,
};

/// Stream type returned by `tokio_tungstenite::connect_async`.
pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Local wall-clock time in unix milliseconds.
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
