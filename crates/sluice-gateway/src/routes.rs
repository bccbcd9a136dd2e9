//! HTTP route definitions

use crate::{handlers, middleware, ApiError, AppState};
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::HeaderMap,
    middleware as axum_middleware,
    response::Response,
    routing::get,
    Router,
};
use serde::Deserialize;
use sluice_core::ProviderPath;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the main router
pub fn create_router(state: Arc<AppState>) -> Router {
    let router = Router::new()
        // Service endpoints
        .route("/", get(handlers::health_check).head(handlers::health_head))
        // Provider root
        .route(
            "/{provider}",
            get(root_get_handler).put(root_put_handler).delete(root_delete_handler),
        )
        .route(
            "/{provider}/",
            get(root_get_handler).put(root_put_handler).delete(root_delete_handler),
        )
        // Files and folders
        .route(
            "/{provider}/{*path}",
            get(object_get_handler)
                .put(object_put_handler)
                .delete(object_delete_handler),
        )
        // Apply middleware
        .layer(axum_middleware::from_fn(middleware::logging_middleware))
        .layer(axum_middleware::from_fn(middleware::request_id_middleware))
        .layer(TraceLayer::new_for_http())
        // Uploads are streamed, so no body limit applies
        .layer(DefaultBodyLimit::disable());

    let router = if state.config.cors_enabled {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers(Any);
        router.layer(cors)
    } else {
        router
    };

    router.with_state(state)
}

/// Query parameters for file and folder requests
#[derive(Debug, Default, Deserialize)]
struct ObjectQueryParams {
    meta: Option<String>,
    accept_url: Option<String>,
    #[serde(rename = "displayName")]
    display_name: Option<String>,
}

fn object_path(raw: &str) -> Result<ProviderPath, ApiError> {
    Ok(ProviderPath::parse(&format!("/{raw}"))?)
}

/// Handler for GET: metadata for folders and `?meta`, download otherwise
async fn object_get_handler(
    State(state): State<Arc<AppState>>,
    Path((provider, path)): Path<(String, String)>,
    Query(query): Query<ObjectQueryParams>,
) -> Result<Response, ApiError> {
    let path = object_path(&path)?;
    dispatch_get(state, provider, path, query).await
}

async fn root_get_handler(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(query): Query<ObjectQueryParams>,
) -> Result<Response, ApiError> {
    dispatch_get(state, provider, ProviderPath::root(), query).await
}

async fn dispatch_get(
    state: Arc<AppState>,
    provider: String,
    path: ProviderPath,
    query: ObjectQueryParams,
) -> Result<Response, ApiError> {
    if query.meta.is_some() || path.is_dir() {
        handlers::get_metadata(state, provider, path).await
    } else {
        let params = handlers::DownloadParams {
            accept_url: query.accept_url,
            display_name: query.display_name,
        };
        handlers::get_file(state, provider, path, params).await
    }
}

/// Handler for PUT: streamed upload
async fn object_put_handler(
    State(state): State<Arc<AppState>>,
    Path((provider, path)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, ApiError> {
    let path = object_path(&path)?;
    handlers::put_file(state, provider, path, headers, body).await
}

async fn root_put_handler(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, ApiError> {
    handlers::put_file(state, provider, ProviderPath::root(), headers, body).await
}

/// Handler for DELETE
async fn object_delete_handler(
    State(state): State<Arc<AppState>>,
    Path((provider, path)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let path = object_path(&path)?;
    handlers::delete_file(state, provider, path).await
}

async fn root_delete_handler(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
) -> Result<Response, ApiError> {
    handlers::delete_file(state, provider, ProviderPath::root()).await
}
