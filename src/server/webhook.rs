//! Webhook ingestion: the bridge pushes each event as JSON to `/webhook`,
//! authenticated by a shared secret header when one is configured.

use anyhow::Result;
use axum::{
    extract::{Json, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::BridgeConfig;
use crate::ingress::{BridgeEvent, EventBus, InboundEvent};

const SECRET_HEADER: &str = "x-bridge-secret-token";

pub struct WebhookServer {
    bind: String,
    port: u16,
    secret: Option<String>,
    bus: Arc<EventBus>,
}

struct AppState {
    secret: Option<String>,
    bus: Arc<EventBus>,
}

impl WebhookServer {
    pub fn new(config: &BridgeConfig, bus: Arc<EventBus>) -> Self {
        Self {
            bind: config.webhook_bind.clone(),
            port: config.webhook_port,
            secret: config.webhook_secret_token.clone(),
            bus,
        }
    }

    pub async fn run(&self) -> Result<()> {
        let state = Arc::new(AppState {
            secret: self.secret.clone(),
            bus: self.bus.clone(),
        });

        let app = Router::new()
            .route("/webhook", post(webhook_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        let addr: SocketAddr = format!("{}:{}", self.bind, self.port).parse()?;
        info!("Listening for bridge events on http://{}/webhook", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;
        Ok(())
    }
}

async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    // 1. Verify the shared secret
    if let Some(expected) = &state.secret {
        let presented = headers
            .get(SECRET_HEADER)
            .and_then(|v| v.to_str().ok());
        match presented {
            Some(token) if token == expected => {}
            Some(_) => {
                warn!("Invalid bridge secret token");
                return StatusCode::UNAUTHORIZED.into_response();
            }
            None => {
                warn!("Missing bridge secret token");
                return StatusCode::UNAUTHORIZED.into_response();
            }
        }
    }

    // 2. Parse the event
    let event: BridgeEvent = match serde_json::from_value(body) {
        Ok(e) => e,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    if let Some(message) = event.message {
        let inbound = InboundEvent::from_bridge(message);
        if let Err(e) = state.bus.push(inbound).await {
            warn!("Failed to push webhook event to bus: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    StatusCode::OK.into_response()
}
