use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::{Config, IngestMode};
use crate::context::EngineContext;
use crate::dispatcher::Dispatcher;
use crate::ingress::{BridgeApi, BridgeClient, EventBus};
use crate::registry::ExclusionRegistry;
use crate::server::{BridgePollingService, WebhookServer};
use crate::transcribe::create_transcriber;

pub async fn run(config_path: Option<&str>) -> Result<()> {
    let config = Config::load(config_path)?;

    let registry = ExclusionRegistry::new(&config.engine.exclusions_file);
    let transcriber = create_transcriber(&config)?;
    let api_token = config.bridge.api_token()?;
    let transport: Arc<dyn BridgeApi> =
        Arc::new(BridgeClient::new(config.bridge.base_url.as_str(), api_token));

    tokio::fs::create_dir_all(&config.engine.media_dir)
        .await
        .with_context(|| format!("Failed to create media dir {}", config.engine.media_dir))?;

    transport
        .connect()
        .await
        .context("Failed to connect to the bridge gateway")?;
    info!("⚡ Connected to WhatsApp bridge");

    let bus = Arc::new(EventBus::new(256));

    let ingest = match config.bridge.ingest {
        IngestMode::Poll => {
            let service = BridgePollingService::new(
                transport.clone(),
                bus.clone(),
                config.bridge.poll_timeout_secs,
            );
            tokio::spawn(async move { service.run().await })
        }
        IngestMode::Webhook => {
            let server = WebhookServer::new(&config.bridge, bus.clone());
            tokio::spawn(async move {
                if let Err(e) = server.run().await {
                    error!("Webhook listener failed: {e:#}");
                }
            })
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down...");
            let _ = shutdown_tx.send(true);
        }
    });

    let ctx = Arc::new(EngineContext {
        config,
        transport,
        transcriber,
        registry,
    });
    let mut dispatcher = Dispatcher::new(ctx);
    dispatcher.run(bus.receiver(), shutdown_rx).await;

    ingest.abort();
    info!("Client application finished");
    Ok(())
}
