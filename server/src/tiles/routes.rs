//! HTTP route handlers for pyramid tiles

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;

use super::service::LayerTileService;
use super::types::{LayerInfo, TileError, TileRequest};

#[derive(Clone)]
pub struct TileAppState {
    pub service: Arc<dyn LayerTileService>,
}

/// Error response for tile API
#[derive(Debug, Serialize)]
pub struct TileErrorResponse {
    pub error: String,
    pub code: String,
}

impl From<TileError> for TileErrorResponse {
    fn from(e: TileError) -> Self {
        let code = match &e {
            TileError::ExperimentNotFound(_) | TileError::LayerNotFound { .. } => "not_found",
            TileError::InvalidLevel { .. } => "invalid_level",
            TileError::InvalidTileCoordinates { .. } => "invalid_coordinates",
            TileError::Pyramid(_) => "pyramid_error",
            TileError::IoError(io) if io.kind() == std::io::ErrorKind::NotFound => "tile_missing",
            TileError::IoError(_) => "io_error",
        };
        Self {
            error: e.to_string(),
            code: code.to_string(),
        }
    }
}

impl IntoResponse for TileErrorResponse {
    fn into_response(self) -> Response {
        let status = match self.code.as_str() {
            "not_found" | "tile_missing" => StatusCode::NOT_FOUND,
            "invalid_level" | "invalid_coordinates" => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

/// GET /api/experiments/:id/layers - List the pyramid layers of an experiment
pub async fn list_layers(
    State(state): State<TileAppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<LayerInfo>>, TileErrorResponse> {
    let layers = state.service.list_layers(&id).await.map_err(|e| {
        tracing::warn!("Failed to list layers of experiment {}: {}", id, e);
        TileErrorResponse::from(e)
    })?;
    Ok(Json(layers))
}

/// GET /api/experiments/:id/layers/:layer/tiles/:z/:x/:y - Get one encoded tile
pub async fn get_tile(
    State(state): State<TileAppState>,
    Path((id, layer, z, x, y)): Path<(String, String, u32, u32, u32)>,
) -> Result<Response, TileErrorResponse> {
    let request = TileRequest {
        experiment_id: id,
        layer,
        z,
        x,
        y,
    };

    let tile = state.service.get_tile(&request).await.map_err(|e| {
        match &e {
            TileError::ExperimentNotFound(_)
            | TileError::LayerNotFound { .. }
            | TileError::InvalidLevel { .. }
            | TileError::InvalidTileCoordinates { .. } => {
                tracing::debug!(
                    "Tile not served: {}/{} z={} x={} y={}: {}",
                    request.experiment_id,
                    request.layer,
                    z,
                    x,
                    y,
                    e
                );
            }
            _ => tracing::error!(
                "Failed to read tile {}/{} z={} x={} y={}: {}",
                request.experiment_id,
                request.layer,
                z,
                x,
                y,
                e
            ),
        }
        TileErrorResponse::from(e)
    })?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, tile.kind.content_type()),
            (header::CACHE_CONTROL, "public, max-age=3600"),
        ],
        tile.bytes,
    )
        .into_response())
}

/// Build pyramid tile routes
pub fn tile_routes(state: TileAppState) -> Router {
    Router::new()
        .route("/experiments/:id/layers", get(list_layers))
        .route("/experiments/:id/layers/:layer/tiles/:z/:x/:y", get(get_tile))
        .with_state(state)
}
