//! Public incident taxonomy

use axum::{
    extract::{Path, State},
    Json,
};
use civitas_common::models::{Category, Subcategory};

use crate::db::reference;
use crate::error::ApiResult;
use crate::AppState;

/// GET /api/categories
pub async fn list_categories(State(state): State<AppState>) -> ApiResult<Json<Vec<Category>>> {
    Ok(Json(reference::list_categories(&state.db).await?))
}

/// GET /api/categories/:id/subcategories
pub async fn list_subcategories(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Vec<Subcategory>>> {
    Ok(Json(reference::list_subcategories(&state.db, id).await?))
}
