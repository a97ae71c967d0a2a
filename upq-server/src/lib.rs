pub mod config;
pub mod error;
pub mod files;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use upq_core::FILES_PATH;

use crate::config::Config;

pub struct AppState {
    pub config: Config,
}

pub type SharedState = Arc<AppState>;

pub fn build_app(config: Config) -> Router {
    let static_files = ServeDir::new(&config.static_dir);
    let body_limit = config.max_upload_bytes;
    let state: SharedState = Arc::new(AppState { config });

    Router::new()
        .route(
            FILES_PATH,
            get(files::list_files)
                .post(files::upload_file)
                .fallback(files::method_not_allowed),
        )
        .fallback_service(static_files)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
