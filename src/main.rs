use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use slotbook::config::AppConfig;
use slotbook::db;
use slotbook::router::app_router;
use slotbook::services::events::spawn_client_sync;
use slotbook::services::payment::card::HttpCardProcessor;
use slotbook::services::payment::mobile_money::HttpMobileMoneyProvider;
use slotbook::services::payment::{CardProcessor, MobileMoneyProvider};
use slotbook::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();
    if config.admin_token == "changeme" {
        tracing::warn!("ADMIN_TOKEN is not set; using the default token");
    }

    let conn = db::init_db(&config.database_url)?;

    let card_processor: Option<Box<dyn CardProcessor>> = if config.card_processor_url.is_empty() {
        tracing::info!("card payments disabled (CARD_PROCESSOR_URL not set)");
        None
    } else {
        tracing::info!("card processor at {}", config.card_processor_url);
        Some(Box::new(HttpCardProcessor::new(
            config.card_processor_url.clone(),
            config.card_processor_key.clone(),
            config.provider_timeout(),
        )?))
    };

    let mobile_money: Option<Box<dyn MobileMoneyProvider>> = if config.mobile_money_url.is_empty() {
        tracing::info!("mobile money disabled (MOBILE_MONEY_URL not set)");
        None
    } else {
        tracing::info!("mobile money provider at {}", config.mobile_money_url);
        Some(Box::new(HttpMobileMoneyProvider::new(
            config.mobile_money_url.clone(),
            config.mobile_money_key.clone(),
            config.provider_timeout(),
        )?))
    };

    if mobile_money.is_some() && config.payment_webhook_secret.is_empty() {
        tracing::warn!("PAYMENT_WEBHOOK_SECRET is empty; payment callbacks are not verified");
    }

    let (events_tx, _) = broadcast::channel(256);

    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config: config.clone(),
        card_processor,
        mobile_money,
        events_tx,
    });

    spawn_client_sync(Arc::clone(&state));

    let app = app_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
