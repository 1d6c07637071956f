//! Bearer-token authentication
//!
//! `auth_middleware` resolves `Authorization: Bearer <token>` to an
//! [`AuthUser`] stored in the request extensions. Handlers behind it take
//! `Extension<AuthUser>` and check roles with [`AuthUser::require_role`].

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use civitas_common::config::AuthConfig;
use civitas_common::models::{Role, User};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::{sessions, users};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// The authenticated caller
#[derive(Debug, Clone, Serialize)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub roles: Vec<Role>,
}

impl From<User> for AuthUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            full_name: user.full_name,
            roles: user.roles,
        }
    }
}

impl AuthUser {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(Role::Admin)
    }

    /// 403 unless the caller holds `role`
    pub fn require_role(&self, role: Role) -> ApiResult<()> {
        if self.has_role(role) {
            Ok(())
        } else {
            Err(ApiError::Forbidden(format!("requires role '{}'", role)))
        }
    }

    /// 403 unless the caller holds at least one of `roles`
    pub fn require_any(&self, roles: &[Role]) -> ApiResult<()> {
        if roles.iter().any(|r| self.has_role(*r)) {
            Ok(())
        } else {
            let names: Vec<&str> = roles.iter().map(Role::as_str).collect();
            Err(ApiError::Forbidden(format!(
                "requires one of: {}",
                names.join(", ")
            )))
        }
    }
}

/// Token from an `Authorization: Bearer` header value
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") {
        let token = token.trim();
        (!token.is_empty()).then_some(token)
    } else {
        None
    }
}

/// Raw bearer token of a request, if any
pub fn request_token(request: &Request) -> Option<String> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .map(str::to_string)
}

/// Authentication middleware for protected routes
///
/// Unknown, expired or revoked tokens and inactive users all yield 401.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request_token(&request)
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;

    let user_id = sessions::resolve_session(&state.db, &token)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("invalid or expired session".to_string()))?;

    let user = users::get_user(&state.db, user_id)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(|| ApiError::Unauthorized("account is not active".to_string()))?;

    debug!(user_id = %user.id, "Authenticated request");
    request.extensions_mut().insert(AuthUser::from(user));

    Ok(next.run(request).await)
}

/// Create the configured administrator when it does not exist yet
///
/// An existing account with that email is left alone except that it is
/// granted the admin role. Returns the administrator's id when configured.
pub async fn bootstrap_admin(
    pool: &SqlitePool,
    config: &AuthConfig,
) -> civitas_common::Result<Option<Uuid>> {
    let (Some(email), Some(password)) = (&config.admin_email, &config.admin_password) else {
        return Ok(None);
    };
    let email = email.trim().to_lowercase();

    if let Some(existing) = users::find_user_by_email(pool, &email).await? {
        if !existing.has_role(Role::Admin) {
            users::add_role(pool, existing.id, Role::Admin).await?;
            info!(user_id = %existing.id, "Granted admin role to configured administrator");
        }
        return Ok(Some(existing.id));
    }

    let admin = users::create_user(
        pool,
        &users::NewUser {
            email,
            full_name: "Administrator".to_string(),
            phone: None,
            password: password.clone(),
            organization_id: None,
            roles: vec![Role::Admin],
        },
    )
    .await?;
    info!(user_id = %admin.id, email = %admin.email, "Bootstrap administrator created");
    Ok(Some(admin.id))
}
