use std::future::Future;

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{configs, register, saved, serial};
use super::state::AppState;
use super::ws;
use crate::config::ServerConfig;

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if config.cors_origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                log::warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

/// All HTTP and WebSocket routes.
pub fn router(state: AppState, config: &ServerConfig) -> Router {
    Router::new()
        .route("/ping", get(serial::ping))
        .route("/ports", get(serial::list_ports))
        .route("/connect", post(serial::connect))
        .route("/disconnect", post(serial::disconnect))
        .route("/status", get(serial::status))
        .route("/serial/write", post(serial::write))
        .route("/register/read", post(register::read))
        .route("/register/write", post(register::write))
        .route("/register/batch-read", post(register::batch_read))
        .route("/register/batch-write", post(register::batch_write))
        .route("/register/logs", get(register::logs))
        .route("/register/saved", get(saved::list).post(saved::create))
        .route("/register/saved/batch-delete", post(saved::batch_delete))
        .route(
            "/register/saved/{id}",
            get(saved::get).put(saved::update).delete(saved::delete),
        )
        .route("/configs", get(configs::list).post(configs::create))
        .route(
            "/configs/{id}",
            get(configs::get).put(configs::update).delete(configs::delete),
        )
        .route("/configs/{id}/open", post(configs::open))
        .route("/ws", get(ws::serial_ws))
        .route("/ws/serial-ports", get(ws::ports_ws))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(config))
        .with_state(state)
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve(
    state: AppState,
    config: &ServerConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = router(state, config);
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    log::info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
