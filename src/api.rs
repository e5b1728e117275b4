use axum::{
    body::Body,
    extract::{ConnectInfo, Path, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::net::SocketAddr;
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;

use crate::{
    error::AppError,
    models::{AppState, GeoRecord, HealthResponse, SharedState},
    utils::client_address,
};

/// Build the HTTP router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(lookup_client))
        .route("/health", get(health_check))
        .route("/database", get(download_database))
        .route("/:address", get(lookup_address))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check(State(state): SharedState) -> Json<HealthResponse> {
    let handle = state.store.current_handle();

    Json(HealthResponse {
        status: "ok",
        database_available: handle.is_some(),
        database_version: handle.as_ref().map(|h| h.version),
        loaded_at: handle.as_ref().map(|h| h.loaded_at),
        last_refresh: state.store.last_outcome(),
    })
}

/// Look up the caller's own address
pub async fn lookup_client(
    State(state): SharedState,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Json<GeoRecord>, AppError> {
    let address = client_address(&headers, peer);
    tracing::debug!("Resolved caller address {}", address);

    Ok(Json(state.lookup.lookup(&address)?))
}

/// Look up an explicit address
pub async fn lookup_address(
    State(state): SharedState,
    Path(address): Path<String>,
) -> Result<Json<GeoRecord>, AppError> {
    Ok(Json(state.lookup.lookup(&address)?))
}

/// Stream the compressed database archive
pub async fn download_database(State(state): SharedState) -> Result<Response, AppError> {
    let path = state.store.archive_path().await?;

    // The archive may be replaced between the existence check and the open
    let file = tokio::fs::File::open(&path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AppError::NotFound("Database archive not found".to_string())
        } else {
            AppError::from(e)
        }
    })?;
    let length = file.metadata().await?.len();

    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("GeoLite2-City.tar.gz")
        .to_string();

    let headers = [
        (header::CONTENT_TYPE, "application/gzip".to_string()),
        (header::CONTENT_LENGTH, length.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        ),
    ];

    Ok((headers, Body::from_stream(ReaderStream::new(file))).into_response())
}
