//! Public DANE geography lookups

use axum::{
    extract::{Path, State},
    Json,
};
use civitas_common::models::{Department, Municipality, Township};

use crate::db::reference;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// GET /api/geography/departments
pub async fn list_departments(State(state): State<AppState>) -> ApiResult<Json<Vec<Department>>> {
    Ok(Json(reference::list_departments(&state.db).await?))
}

/// GET /api/geography/departments/:code/municipalities
pub async fn list_municipalities(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<Json<Vec<Municipality>>> {
    Ok(Json(reference::list_municipalities(&state.db, &code).await?))
}

/// GET /api/geography/municipalities/:code
pub async fn get_municipality(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<Json<Municipality>> {
    reference::get_municipality(&state.db, &code)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("municipality {}", code)))
}

/// GET /api/geography/municipalities/:code/townships
pub async fn list_townships(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<Json<Vec<Township>>> {
    Ok(Json(reference::list_townships(&state.db, &code).await?))
}
