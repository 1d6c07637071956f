//! Administrator user management

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use civitas_common::models::{Role, User};
use civitas_common::pagination::{Page, PageRequest};
use civitas_common::validation::{Validate, ValidationErrors};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::api::auth::MIN_PASSWORD_LEN;
use crate::auth::AuthUser;
use crate::db::{sessions, users};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub full_name: String,
    pub password: String,
    pub phone: Option<String>,
    pub organization_id: Option<Uuid>,
    pub roles: Vec<Role>,
}

impl Validate for CreateUserRequest {
    fn validate(&self) -> civitas_common::Result<()> {
        let mut errors = ValidationErrors::new();
        errors.require("email", &self.email);
        errors.email("email", &self.email);
        errors.require("full_name", &self.full_name);
        errors.max_len("full_name", &self.full_name, 200);
        errors.min_len("password", &self.password, MIN_PASSWORD_LEN);
        if let Some(phone) = &self.phone {
            errors.phone("phone", phone);
        }
        if self.roles.is_empty() {
            errors.add("roles", "must contain at least one role");
        }
        errors.into_result()
    }
}

/// Partial update; absent fields are left untouched
#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub organization_id: Option<Uuid>,
    /// Remove the organization link
    #[serde(default)]
    pub detach_organization: bool,
    pub is_active: Option<bool>,
}

impl Validate for UpdateUserRequest {
    fn validate(&self) -> civitas_common::Result<()> {
        let mut errors = ValidationErrors::new();
        if let Some(name) = &self.full_name {
            errors.require("full_name", name);
            errors.max_len("full_name", name, 200);
        }
        if let Some(phone) = &self.phone {
            errors.phone("phone", phone);
        }
        if self.detach_organization && self.organization_id.is_some() {
            errors.add(
                "organization_id",
                "cannot be combined with detach_organization",
            );
        }
        errors.into_result()
    }
}

#[derive(Debug, Deserialize)]
pub struct RolesRequest {
    pub roles: Vec<Role>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserListQuery {
    pub role: Option<Role>,
    pub search: Option<String>,
}

/// GET /api/users
pub async fn list_users(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Query(page): Query<PageRequest>,
    Query(query): Query<UserListQuery>,
) -> ApiResult<Json<Page<User>>> {
    admin.require_role(Role::Admin)?;
    let filter = users::UserFilter {
        role: query.role,
        search: query.search,
    };
    Ok(Json(users::list_users(&state.db, &filter, &page).await?))
}

/// GET /api/users/:id
pub async fn get_user(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<User>> {
    admin.require_role(Role::Admin)?;
    let user = users::get_user(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("user {}", id)))?;
    Ok(Json(user))
}

/// POST /api/users
pub async fn create_user(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Json(request): Json<CreateUserRequest>,
) -> ApiResult<(StatusCode, Json<User>)> {
    admin.require_role(Role::Admin)?;
    request.validate()?;

    let user = users::create_user(
        &state.db,
        &users::NewUser {
            email: request.email.trim().to_lowercase(),
            full_name: request.full_name,
            phone: request.phone,
            password: request.password,
            organization_id: request.organization_id,
            roles: request.roles,
        },
    )
    .await?;

    info!(user_id = %user.id, by = %admin.id, roles = ?user.roles, "User created");
    Ok((StatusCode::CREATED, Json(user)))
}

/// PUT /api/users/:id
///
/// Deactivating an account also revokes its sessions.
pub async fn update_user(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateUserRequest>,
) -> ApiResult<Json<User>> {
    admin.require_role(Role::Admin)?;
    request.validate()?;

    if id == admin.id && request.is_active == Some(false) {
        return Err(ApiError::Conflict(
            "administrators cannot deactivate their own account".to_string(),
        ));
    }

    let user = users::update_user(
        &state.db,
        id,
        &users::UserUpdate {
            full_name: request.full_name,
            phone: request.phone,
            organization_id: request.organization_id,
            detach_organization: request.detach_organization,
            is_active: request.is_active,
        },
    )
    .await?;

    if !user.is_active {
        sessions::revoke_user_sessions(&state.db, id).await?;
    }
    Ok(Json(user))
}

/// PUT /api/users/:id/roles
pub async fn set_roles(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(request): Json<RolesRequest>,
) -> ApiResult<Json<User>> {
    admin.require_role(Role::Admin)?;
    if request.roles.is_empty() {
        let mut errors = ValidationErrors::new();
        errors.add("roles", "must contain at least one role");
        return Err(ApiError::Validation(errors));
    }
    if id == admin.id && !request.roles.contains(&Role::Admin) {
        return Err(ApiError::Conflict(
            "administrators cannot remove their own admin role".to_string(),
        ));
    }

    let user = users::set_roles(&state.db, id, &request.roles).await?;
    info!(user_id = %id, by = %admin.id, roles = ?user.roles, "Roles replaced");
    Ok(Json(user))
}

/// DELETE /api/users/:id
///
/// Soft delete: the account is deactivated and its sessions revoked.
pub async fn deactivate_user(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    admin.require_role(Role::Admin)?;
    if id == admin.id {
        return Err(ApiError::Conflict(
            "administrators cannot deactivate their own account".to_string(),
        ));
    }

    if !users::deactivate_user(&state.db, id).await? {
        return Err(ApiError::NotFound(format!("user {}", id)));
    }
    let revoked = sessions::revoke_user_sessions(&state.db, id).await?;
    info!(user_id = %id, by = %admin.id, revoked, "User deactivated");
    Ok(StatusCode::NO_CONTENT)
}
