use crate::analysis::{AnalysisBackend, AzureOpenAiBackend};
use crate::config::Config;
use crate::handlers::{analyze_resume, get_attempts, health_check, AppState, SharedState};
use crate::middleware::logging_middleware;
use crate::rate_limiter::RateLimiter;
use axum::routing::{get, post};
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Build the router for the free-tier API.
pub fn create_app(state: SharedState) -> Router {
    Router::new()
        .route("/try-free/analyze", post(analyze_resume))
        .route("/try-free/attempts", get(get_attempts))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(logging_middleware)),
        )
}

pub struct Server {
    config: Config,
    state: SharedState,
}

impl Server {
    pub async fn new(config: Config) -> Self {
        let limiter = Arc::new(RateLimiter::connect(&config).await);
        let analyzer = build_analyzer(&config);

        Self {
            state: AppState::new(limiter, analyzer),
            config,
        }
    }

    pub async fn run(self) -> Result<(), std::io::Error> {
        let cleanup = match self.config.cleanup_interval_secs {
            0 => None,
            secs => Some(spawn_cleanup(
                self.state.limiter.clone(),
                Duration::from_secs(secs),
            )),
        };

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;

        info!("Resume gate listening on {}", self.config.bind_addr);
        info!(
            max_attempts = self.state.limiter.max_attempts(),
            window_secs = self.state.limiter.window().as_secs(),
            storage = ?self.state.limiter.storage_mode(),
            "Free tier quota active"
        );

        let app = create_app(self.state.clone());

        // Run server with graceful shutdown
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        if let Some(cleanup) = cleanup {
            cleanup.abort();
        }

        Ok(())
    }
}

fn build_analyzer(config: &Config) -> Option<Arc<dyn AnalysisBackend>> {
    let Some((endpoint, api_key)) = config.azure_credentials() else {
        warn!("Azure OpenAI credentials not set, resume analysis is disabled");
        return None;
    };

    let backend: Arc<dyn AnalysisBackend> = Arc::new(AzureOpenAiBackend::new(
        endpoint,
        api_key,
        config.azure_openai_deployment.as_str(),
        config.azure_openai_api_version.as_str(),
    ));
    Some(backend)
}

/// Periodically drop in-memory counters whose window has closed.
fn spawn_cleanup(limiter: Arc<RateLimiter>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick fires immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let removed = limiter.purge_expired().await;
            if removed > 0 {
                debug!(removed, "Purged expired attempt counters");
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
