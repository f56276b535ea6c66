use std::sync::Arc;

use mailbin::api::{ApiState, router};
use mailbin::config::{Config, StoreConfig};
use mailbin::store::{Database, LibSqlBackend, PostgresBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    // Backend selected once at startup; everything downstream sees only the
    // Database trait.
    let db: Arc<dyn Database> = match &config.store {
        StoreConfig::LibSql { path } => {
            let backend = LibSqlBackend::new_local(std::path::Path::new(path)).await?;
            eprintln!("   Database: libSQL at {path}");
            Arc::new(backend)
        }
        StoreConfig::Postgres { url } => {
            let backend = PostgresBackend::connect(url).await?;
            eprintln!("   Database: Postgres");
            Arc::new(backend)
        }
    };

    eprintln!("📬 mailbin v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Default domain: {}", config.default_domain);
    eprintln!("   Admin UI: http://0.0.0.0:{}/", config.port);
    eprintln!("   API: http://0.0.0.0:{}/api/aliases", config.port);

    let app = router(ApiState {
        db,
        default_domain: config.default_domain.clone(),
    });

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(port = config.port, "Listening");
    axum::serve(listener, app).await?;

    Ok(())
}
