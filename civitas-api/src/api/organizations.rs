//! Administrator organization CRUD

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use civitas_common::models::{Organization, Role};
use civitas_common::pagination::{Page, PageRequest};
use civitas_common::validation::{Validate, ValidationErrors};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::db::organizations::{self, OrganizationFields};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct OrganizationRequest {
    pub name: String,
    pub nit: Option<String>,
    pub description: Option<String>,
}

impl Validate for OrganizationRequest {
    fn validate(&self) -> civitas_common::Result<()> {
        let mut errors = ValidationErrors::new();
        errors.require("name", &self.name);
        errors.max_len("name", &self.name, 200);
        if let Some(nit) = &self.nit {
            errors.max_len("nit", nit, 20);
        }
        if let Some(description) = &self.description {
            errors.max_len("description", description, 2000);
        }
        errors.into_result()
    }
}

impl From<OrganizationRequest> for OrganizationFields {
    fn from(request: OrganizationRequest) -> Self {
        Self {
            name: request.name,
            nit: request.nit.filter(|n| !n.trim().is_empty()),
            description: request.description,
        }
    }
}

/// GET /api/organizations
pub async fn list_organizations(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Query(page): Query<PageRequest>,
) -> ApiResult<Json<Page<Organization>>> {
    admin.require_role(Role::Admin)?;
    Ok(Json(organizations::list_organizations(&state.db, &page).await?))
}

/// GET /api/organizations/:id
pub async fn get_organization(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Organization>> {
    admin.require_role(Role::Admin)?;
    organizations::get_organization(&state.db, id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("organization {}", id)))
}

/// POST /api/organizations
pub async fn create_organization(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Json(request): Json<OrganizationRequest>,
) -> ApiResult<(StatusCode, Json<Organization>)> {
    admin.require_role(Role::Admin)?;
    request.validate()?;
    let organization = organizations::create_organization(&state.db, &request.into()).await?;
    info!(organization_id = %organization.id, name = %organization.name, "Organization created");
    Ok((StatusCode::CREATED, Json(organization)))
}

/// PUT /api/organizations/:id
pub async fn update_organization(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(request): Json<OrganizationRequest>,
) -> ApiResult<Json<Organization>> {
    admin.require_role(Role::Admin)?;
    request.validate()?;
    let organization = organizations::update_organization(&state.db, id, &request.into()).await?;
    Ok(Json(organization))
}

/// DELETE /api/organizations/:id
pub async fn delete_organization(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    admin.require_role(Role::Admin)?;
    organizations::delete_organization(&state.db, id).await?;
    info!(organization_id = %id, "Organization deleted");
    Ok(StatusCode::NO_CONTENT)
}
