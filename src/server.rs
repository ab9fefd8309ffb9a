use anyhow::{Context, Result};
use axum::{
    extract::State,
    routing::{any, get},
    Json, Router,
};
use grabdrop_relay::{ws_handler, SignalingRelay};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::info;

/// Signaling relay over HTTP: WebSocket upgrade on `/`, liveness on `/health`
pub struct RelayServer {
    relay: SignalingRelay,
    addr: String,
}

impl RelayServer {
    pub fn new(addr: String) -> Self {
        Self {
            relay: SignalingRelay::new(),
            addr,
        }
    }

    pub fn relay(&self) -> SignalingRelay {
        self.relay.clone()
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", any(ws_handler))
            .route("/health", get(health))
            .with_state(self.relay.clone())
    }

    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(&self.addr)
            .await
            .with_context(|| format!("Failed to bind {}", self.addr))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        info!("Signaling relay listening on {}", listener.local_addr()?);
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

async fn health(State(relay): State<SignalingRelay>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "rooms": relay.room_count().await,
    }))
}
