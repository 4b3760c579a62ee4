use paperdesk::application::services::decision_pipeline::DecisionPipeline;
use paperdesk::config::AppConfig;
use paperdesk::domain::services::risk_manager::RiskManager;
use paperdesk::domain::services::trading_engine::TradingEngine;
use paperdesk::infrastructure::llm_advisor_client::LlmAdvisorClient;
use paperdesk::infrastructure::twelve_data_client::TwelveDataClient;
use paperdesk::persistence::{init_database_with, repository::SqliteTradingStore};
use paperdesk::resilience::Resilience;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "paperdesk=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Paperdesk starting...");
    if let Err(e) = dotenv {
        if !e.not_found() {
            warn!("Failed to load .env: {}", e);
        }
    }

    let config = AppConfig::from_env();
    info!(
        "Watching {} symbols every {}s (min confidence {}, shorts {})",
        config.pipeline.watchlist.len(),
        config.pipeline.cycle_interval.as_secs(),
        config.pipeline.min_confidence,
        if config.pipeline.allow_short { "enabled" } else { "disabled" }
    );
    if config.market_data.api_key.is_none() {
        warn!("TWELVE_DATA_API_KEY is not set, every quote will degrade to HOLD");
    }
    if config.advisor.api_key.is_none() {
        warn!("LLM_API_KEY is not set, every decision will degrade to HOLD");
    }

    let pool = match init_database_with(&config.database).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            return Err(e.into());
        }
    };

    let store = Arc::new(SqliteTradingStore::new(pool));
    let engine = Arc::new(TradingEngine::new(
        store,
        RiskManager::new(config.risk.clone()),
        config.account.clone(),
    ));
    engine.ensure_account(config.pipeline.user_id).await?;

    let portfolio = engine.get_portfolio(config.pipeline.user_id).await?;
    info!(
        "✓ Account {} loaded: balance ${:.2} ({:+.2}%), {} open position(s), {} closed trade(s)",
        config.pipeline.user_id,
        portfolio.balance,
        portfolio.total_profit_loss_percent,
        portfolio.open_positions.len(),
        portfolio.stats.total_trades
    );

    let market_data = Arc::new(TwelveDataClient::new(config.market_data.clone())?);
    let advisor = Arc::new(LlmAdvisorClient::new(config.advisor.clone())?);
    let resilience = Arc::new(Resilience::new(config.resilience.clone()));

    let pipeline = DecisionPipeline::new(
        market_data,
        advisor,
        engine,
        resilience.clone(),
        config.pipeline.clone(),
    );

    let shutdown_signal = async {
        let ctrl_c = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C signal"),
                Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                    info!("Received SIGTERM signal");
                }
                Err(e) => error!("Failed to install SIGTERM handler: {}", e),
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    };

    info!("Pipeline started. Press Ctrl+C to stop.");
    pipeline.run_forever(shutdown_signal).await?;

    for (service, stats) in resilience.breaker_stats().await {
        info!(
            "Circuit '{}': {} ({} recent failures)",
            service, stats.state, stats.failure_count
        );
    }

    info!("Shutdown complete");
    Ok(())
}
