use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use utm_relay::bot::{BotDetector, BotList};
use utm_relay::config::Config;
use utm_relay::cookies::CookieState;
use utm_relay::models::TrackingContext;
use utm_relay::relay::{create_relay_router, RelayState};
use utm_relay::session::{RandomIds, SystemClock};
use utm_relay::tracker::Tracker;
use utm_relay::transport::{ReqwestTransport, Transport};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut config = Config::from_env()?;
    config
        .tracker
        .validate()
        .context("invalid tracker configuration")?;
    info!("Loaded configuration");

    match config.tracker.account.as_deref() {
        Some(account) => info!("Reporting hits to account {}", account),
        None => warn!("TRACKER_ACCOUNT is not set, every hit will be rejected"),
    }

    let transport: Option<Arc<dyn Transport>> = if config.transport.enabled {
        let timeout = Duration::from_secs(config.transport.timeout_secs);
        Some(Arc::new(ReqwestTransport::new(timeout)?))
    } else {
        info!("Beacon transport is disabled, hits are computed but not sent");
        None
    };

    let bot_detector: Option<Arc<dyn BotDetector>> = match &config.bots.list_path {
        Some(path) if config.bots.enabled => {
            let list = BotList::load(path).await?;
            info!("Loaded {} known bots from {}", list.len(), path);
            Some(Arc::new(list))
        }
        _ => None,
    };

    if config.tracker.sync_version {
        if let Some(transport) = &transport {
            let mut probe = Tracker::from_config(
                &config.tracker,
                TrackingContext::default(),
                CookieState::new(),
            )?
            .with_transport(Arc::clone(transport));
            if let Some(version) = probe.sync_version_from_script().await {
                info!("Using tracker version {} from the vendor script", version);
                config.tracker.version = version;
            }
        }
    }

    let router = create_relay_router(RelayState {
        tracker: config.tracker.clone(),
        relay: config.relay.clone(),
        bot_detector,
        transport,
        clock: Arc::new(SystemClock),
        ids: Arc::new(RandomIds),
    });

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("🚀 Relay listening on http://{}", addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
