use std::sync::Arc;

use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use feedhub::config::Config;
use feedhub::db::Database;
use feedhub::listing::Listing;
use feedhub::routes::{self, AppState};
use feedhub::search::{reindex, ElasticIndex, MemoryIndex, SearchIndex};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "feedhub=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path =
        std::env::var("FEEDHUB_CONFIG").unwrap_or_else(|_| "feedhub.toml".to_string());
    let config = Config::load(&config_path)?.with_env_overrides();
    info!(
        "Loaded {} themes and {} featured feeds from {}",
        config.themes.len(),
        config.featured_feeds.len(),
        config_path
    );

    // Initialize database
    let db = Database::new(&config.database_url).await?;
    db.initialize().await?;
    db.sync_themes(&config.themes).await?;
    db.sync_featured_feeds(&config.featured_feeds).await?;
    info!("Database initialized");

    let db = Arc::new(db);

    let search: Arc<dyn SearchIndex> = match &config.search.url {
        Some(url) => {
            info!("Using search service at {}", url);
            let index = Arc::new(ElasticIndex::new(
                url,
                &config.search.index,
                config.search_timeout(),
            )?);
            if config.search.reindex_on_start {
                let count = reindex(index.as_ref(), &db.all_articles().await?).await?;
                info!("Pushed {} articles to the search service", count);
            }
            index
        }
        None => {
            let index = Arc::new(MemoryIndex::new());
            let count = reindex(index.as_ref(), &db.all_articles().await?).await?;
            warn!(
                "No search service configured, indexed {} articles in process",
                count
            );
            index
        }
    };

    let listing = Listing::new(db.clone(), search)
        .with_article_types(config.article_types.clone())
        .with_timeouts(config.search_timeout(), config.store_timeout());

    let app = routes::router(Arc::new(AppState { listing }));

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    info!("Server starting on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    db.close().await;
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!("Failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
