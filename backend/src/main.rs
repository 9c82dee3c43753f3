use axum::{http::Method, routing::get, Router};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod auth;
mod config;
mod database;
mod error;
mod handlers;
mod jobs;
mod pagination;
mod services;
mod store;
mod validation;
mod workflows;


use config::Config;
use jobs::JobLog;
use services::{EmailService, LogMailer, Mailer};
use store::{MemoryWorkflowStore, PgWorkflowStore, WorkflowStore};
use workflows::{ActionExecutor, WorkflowEngine};

pub struct AppState {
    pub store: Arc<dyn WorkflowStore>,
    pub engine: Arc<WorkflowEngine>,
    pub job_log: JobLog,
    pub config: Config,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/api/workflows", handlers::workflow_routes())
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
}

async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn WorkflowStore>> {
    if config.uses_memory_store() {
        tracing::warn!("DATABASE_URL=memory, workflows will not survive a restart");
        return Ok(Arc::new(MemoryWorkflowStore::new()));
    }

    let pool = database::create_pool(&config.database_url).await?;
    database::migrate(&pool).await?;
    Ok(Arc::new(PgWorkflowStore::new(pool)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let store = open_store(&config).await?;

    let mailer: Arc<dyn Mailer> = if config.smtp.is_configured() {
        Arc::new(EmailService::new(&config.smtp))
    } else {
        tracing::info!("SMTP not configured, send_email actions will be logged only");
        Arc::new(LogMailer)
    };

    let executor = ActionExecutor::new(mailer, config.worker.action_timeout());
    let (engine, receiver) = WorkflowEngine::new(store.clone(), executor, config.worker.queue_capacity);

    let job_log = JobLog::new();
    let mut scheduler = jobs::JobScheduler::new(store.clone(), config.worker.clone(), job_log.clone()).await?;

    // Sweep executions stranded by a previous process before taking new work
    scheduler.sweep_orphans().await?;

    workflows::spawn_dispatcher(engine.clone(), receiver, config.worker.concurrency);
    scheduler.start().await?;

    let server_addr = config.server_addr.clone();
    let app = build_router(Arc::new(AppState {
        store,
        engine,
        job_log,
        config,
    }));

    let listener = tokio::net::TcpListener::bind(&server_addr).await?;
    tracing::info!("Server running on {}", server_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown().await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
