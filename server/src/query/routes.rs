//! HTTP route handlers for the map object API

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use metrics::{counter, histogram};
use serde::Serialize;

use crate::index::{IndexError, TypeInfo};

use super::service::MapObjectService;
use super::types::{FeatureCollection, QueryError, TileQuery};

/// Application state containing the map object service
#[derive(Clone)]
pub struct QueryAppState {
    pub service: Arc<dyn MapObjectService>,
}

/// Error response for map object API
#[derive(Debug, Serialize)]
pub struct QueryErrorResponse {
    pub error: String,
    pub code: String,
}

impl From<QueryError> for QueryErrorResponse {
    fn from(e: QueryError) -> Self {
        let code = match &e {
            QueryError::Malformed(_) => "malformed_request",
            QueryError::UnknownExperiment(_) => "unknown_experiment",
            QueryError::UnknownObjectType { .. } | QueryError::Index(IndexError::UnknownType(_)) => {
                "unknown_object_type"
            }
            QueryError::Index(_) => "index_error",
            QueryError::Internal(_) => "internal_error",
        };
        Self {
            error: e.to_string(),
            code: code.to_string(),
        }
    }
}

impl IntoResponse for QueryErrorResponse {
    fn into_response(self) -> Response {
        let status = match self.code.as_str() {
            "malformed_request" => StatusCode::BAD_REQUEST,
            "unknown_experiment" | "unknown_object_type" => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

/// Response for GET /api/experiments/:id/mapobjects
#[derive(Debug, Serialize)]
pub struct MapObjectTypesResponse {
    pub experiment_id: String,
    pub types: Vec<TypeInfo>,
}

/// GET /api/experiments/:id/mapobjects - List object types of an experiment
pub async fn list_types(
    State(state): State<QueryAppState>,
    Path(id): Path<String>,
) -> Result<Json<MapObjectTypesResponse>, QueryErrorResponse> {
    let types = state.service.list_types(&id).await.map_err(|e| {
        tracing::warn!("Failed to list object types for experiment {}: {}", id, e);
        QueryErrorResponse::from(e)
    })?;

    Ok(Json(MapObjectTypesResponse {
        experiment_id: id,
        types,
    }))
}

/// GET /api/experiments/:id/mapobjects/:type?x=&y=&z=&zlevel=&t=
///
/// Parameters are taken as raw strings so that missing and non-integer values
/// are reported as 400 with the JSON error body.
pub async fn get_tile_objects(
    State(state): State<QueryAppState>,
    Path((id, type_name)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<FeatureCollection>, QueryErrorResponse> {
    let start = Instant::now();
    let query = TileQuery::from_params(&params).map_err(|e| {
        counter!("cellmap_query_requests_total", "status" => "malformed").increment(1);
        tracing::debug!("Rejected tile query for {}/{}: {}", id, type_name, e);
        QueryErrorResponse::from(e)
    })?;

    let result = state.service.query_tile(&id, &type_name, &query).await;
    histogram!("cellmap_query_duration_seconds").record(start.elapsed());

    match result {
        Ok(collection) => {
            counter!("cellmap_query_requests_total", "status" => "ok").increment(1);
            counter!("cellmap_query_features_total").increment(collection.len() as u64);
            tracing::debug!(
                "Tile query {}/{} x={} y={} z={} zlevel={} t={}: {} features",
                id,
                type_name,
                query.x,
                query.y,
                query.z,
                query.zplane,
                query.tpoint,
                collection.len()
            );
            Ok(Json(collection))
        }
        Err(e) => {
            counter!("cellmap_query_requests_total", "status" => "error").increment(1);
            match &e {
                QueryError::Malformed(_) | QueryError::UnknownExperiment(_) | QueryError::UnknownObjectType { .. } => {
                    tracing::debug!("Tile query {}/{} failed: {}", id, type_name, e);
                }
                _ => tracing::error!("Tile query {}/{} failed: {}", id, type_name, e),
            }
            Err(QueryErrorResponse::from(e))
        }
    }
}

/// Build map object API routes
pub fn query_routes(state: QueryAppState) -> Router {
    Router::new()
        .route("/experiments/:id/mapobjects", get(list_types))
        .route("/experiments/:id/mapobjects/:type", get(get_tile_objects))
        .with_state(state)
}
