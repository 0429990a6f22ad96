use anyhow::Result;
use secrecy::ExposeSecret;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use paymongo_gateway::config::Config;
use paymongo_gateway::database::Database;
use paymongo_gateway::paymongo::PayMongoClient;
use paymongo_gateway::{
    router, AppState, InMemoryStore, PayMongoProvider, ProviderRegistry, TransactionStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::load()?;

    let store: Arc<dyn TransactionStore> = match &config.database_url {
        Some(database_url) => {
            let db = Database::new(database_url).await?;
            db.migrate().await?;
            Arc::new(db)
        }
        None => {
            info!("No database configured, keeping transactions in memory");
            Arc::new(InMemoryStore::new())
        }
    };

    let live_mode = config.is_live_mode();
    let client = PayMongoClient::new(config.secret_key.expose_secret())?;
    let mut providers = ProviderRegistry::new();
    providers.register(Arc::new(PayMongoProvider::new(
        client,
        config.webhook_secret,
        config.access_token_secret,
        &config.base_url,
    )));
    info!(
        "Registered payment providers: {:?} (PayMongo live mode: {})",
        providers.codes(),
        live_mode
    );

    let app = router(AppState { store, providers })
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!("Server starting on {}", config.bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}
