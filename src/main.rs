use std::sync::Arc;
use tower::ServiceBuilder;
use tracing::info;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;
use txn_match_rust::api::{self, AppState};
use txn_match_rust::db::{
    create_pool, run_migrations, MatchStore, MemoryMatchStore, MemoryProcurementSource, PgMatchStore,
    PgProcurementSource, ProcurementSource,
};
use txn_match_rust::service::LoggingEventSink;
use txn_match_rust::{AppConfig, MatchingOrchestrator};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志 - 使用本地时间格式，级别由 RUST_LOG 控制
    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_target(true)
        .with_level(true)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // 加载配置
    let config = AppConfig::load()?;
    info!("Starting server with config: {:?}", config.server);
    let policies = Arc::new(config.policy_registry()?);

    // 存储后端
    let (store, source): (Arc<dyn MatchStore>, Arc<dyn ProcurementSource>) = if config.database.is_memory() {
        info!("Using in-memory store (no persistence)");
        (
            Arc::new(MemoryMatchStore::new()),
            Arc::new(MemoryProcurementSource::new()),
        )
    } else {
        let pool = create_pool(&config.database).await?;
        info!("Database pool created (max {} connections)", config.database.max_connections);
        if config.database.run_migrations {
            run_migrations(&pool).await?;
        }
        (
            Arc::new(PgMatchStore::new(pool.clone(), config.database.statement_timeout())),
            Arc::new(PgProcurementSource::new(pool)),
        )
    };

    let options = config.matching.options()?;
    let orchestrator = Arc::new(MatchingOrchestrator::new(
        store,
        source,
        Arc::new(LoggingEventSink),
        options,
    ));

    let app = api::router(AppState {
        orchestrator,
        policies,
    })
    .layer(ServiceBuilder::new());

    // 启动服务器
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server listening on {}", addr);
    info!("API Endpoints:");
    info!("  POST /matching/candidates  - automatic match for one invoice");
    info!("  POST /matching/match       - manual match");
    info!("  POST /matching/batch       - batch automatic match");
    info!("  GET  /matching/pending     - exception queue");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received");
}
