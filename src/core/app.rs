use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::core::config::Config;
use crate::executor::PriorityExecutor;
use crate::mail::service::MailService;
use crate::markdown::MarkdownRenderer;
use crate::storage::database::Database;
use crate::storage::repositories::ConfigurationRepository;
use crate::tracker::service::TrackerService;
use crate::web::routes;

pub struct App {
    config: Config,
    state: Arc<AppState>,
}

impl App {
    pub async fn new(config: Config) -> Result<Self> {
        info!("Initializing application components");

        // Initialize database
        let db = Arc::new(Database::new(&config.database).await?);

        // Run migrations
        db.migrate().await?;

        let executor = Arc::new(PriorityExecutor::new(config.executor.workers));

        let organization = {
            let mut conn = db.acquire().await?;
            ConfigurationRepository::load_organization(&mut conn).await?
        };

        let state = AppState::new(config.clone(), db, executor, &organization)?;
        Ok(Self { config, state: Arc::new(state) })
    }

    pub async fn run(self) -> Result<()> {
        let app = routes::create_router(Arc::clone(&self.state));

        let addr: SocketAddr = format!("{}:{}", self.config.server.host, self.config.server.port).parse()?;
        info!("Server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("Server stopped, draining background work");
        self.state.executor.shutdown().await;
        self.state.db.close();

        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub executor: Arc<PriorityExecutor>,
    pub tracker_service: Arc<TrackerService>,
    pub mail_service: Arc<MailService>,
    pub markdown: Arc<MarkdownRenderer>,
    pub config: Config,
}

impl AppState {
    /// Wire services around an already migrated database.
    pub fn new(
        config: Config,
        db: Arc<Database>,
        executor: Arc<PriorityExecutor>,
        organization: &crate::core::types::Organization,
    ) -> Result<Self> {
        let tracker_service = Arc::new(TrackerService::new(
            Arc::clone(&db),
            config.pagination.max_page_size,
        ));

        let mail_service = Arc::new(MailService::new(
            &config.mail,
            organization,
            Arc::clone(&executor),
        )?);

        let base_path = base_path(&config.server.base_url);
        let markdown = Arc::new(MarkdownRenderer::new(&base_path));

        Ok(Self {
            db,
            executor,
            tracker_service,
            mail_service,
            markdown,
            config,
        })
    }
}

/// Path component of the public base URL, e.g. `/bugger` for
/// `https://example.com/bugger/`.
fn base_path(base_url: &str) -> String {
    let without_scheme = base_url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(base_url);
    match without_scheme.find('/') {
        Some(index) => without_scheme[index..].trim_end_matches('/').to_string(),
        None => String::new(),
    }
}
