//! Account endpoints: register, login, logout, me

use axum::{
    extract::{Request, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use civitas_common::api::verify_password;
use civitas_common::models::{Role, User};
use civitas_common::validation::{Validate, ValidationErrors};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::auth::{request_token, AuthUser};
use crate::db::{sessions, users};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub full_name: String,
    pub password: String,
    pub phone: Option<String>,
}

impl Validate for RegisterRequest {
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
        errors.into_result()
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

/// POST /api/auth/register
///
/// Self-registration always yields a citizen account.
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<User>)> {
    request.validate()?;

    let user = users::create_user(
        &state.db,
        &users::NewUser {
            email: request.email.trim().to_lowercase(),
            full_name: request.full_name,
            phone: request.phone,
            password: request.password,
            organization_id: None,
            roles: vec![Role::Citizen],
        },
    )
    .await?;

    info!(user_id = %user.id, "Citizen registered");
    Ok((StatusCode::CREATED, Json(user)))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let email = request.email.trim().to_lowercase();
    let rejected = || ApiError::Unauthorized("invalid email or password".to_string());

    let credentials = users::find_credentials(&state.db, &email)
        .await?
        .ok_or_else(rejected)?;

    if !verify_password(
        &request.password,
        &credentials.password_salt,
        &credentials.password_hash,
    ) {
        warn!(email = %email, "Failed login attempt");
        return Err(rejected());
    }
    if !credentials.user.is_active {
        return Err(ApiError::Unauthorized("account is not active".to_string()));
    }

    let session = sessions::create_session(
        &state.db,
        credentials.user.id,
        state.config.auth.session_ttl_hours,
    )
    .await?;

    info!(user_id = %credentials.user.id, "User logged in");
    Ok(Json(LoginResponse {
        token: session.token,
        expires_at: session.expires_at,
        user: credentials.user,
    }))
}

/// POST /api/auth/logout
///
/// Revokes the session whose token authenticated this request.
pub async fn logout(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    request: Request,
) -> ApiResult<StatusCode> {
    if let Some(token) = request_token(&request) {
        sessions::revoke_session(&state.db, &token).await?;
    }
    info!(user_id = %user.id, "User logged out");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/auth/me
pub async fn me(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<User>> {
    let user = users::get_user(&state.db, user.id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("account no longer exists".to_string()))?;
    Ok(Json(user))
}
