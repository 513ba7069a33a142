use crate::{
    config::Config,
    model_service::ModelService,
    routes::{healthcheck, metrics_handler, predict},
    telemetry::{track_requests, Metrics},
};
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::{net::TcpListener, sync::broadcast::Receiver, task::JoinHandle};

/// Uploads past this size are cut off by the body limit layer.
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Clone)]
pub struct SharedState<M: ModelService> {
    pub model_service: Arc<M>,
    pub metrics: Arc<Metrics>,
}

pub fn app_router<M: ModelService>(model_service: M, metrics: Arc<Metrics>) -> Router {
    let app_state = SharedState {
        model_service: Arc::new(model_service),
        metrics: metrics.clone(),
    };

    Router::new()
        .route("/health", get(healthcheck))
        .route("/predict", post(predict::<M>))
        .route("/metrics", get(metrics_handler::<M>))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(app_state)
        .layer(middleware::from_fn_with_state(metrics, track_requests))
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new<M: ModelService>(model_service: M, config: &Config) -> anyhow::Result<Self> {
        let addr = config.server.get_address();
        let metrics = Arc::new(Metrics::new());
        let router = app_router(model_service, metrics);
        let listener = TcpListener::bind(addr).await?;

        Ok(Self { router, listener })
    }

    pub async fn run(
        self,
        mut shutdown_rx: Receiver<()>,
    ) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
        tracing::info!("Starting app on {}", &self.listener.local_addr().unwrap());

        let listener = self.listener;
        let router = self.router;
        let server_handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_rx.recv().await.ok();
                })
                .await?;
            Ok(())
        });

        Ok(server_handle)
    }
}
