use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;
use axum::http::HeaderName;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::app::auth::AuthService;
use crate::app::users::UserService;
use crate::domain::user::{Requester, Role};
use crate::http::AppError;
use crate::AppState;

/// A caller holding a valid bearer token for an existing user.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: Role,
}

impl AuthUser {
    pub fn requester(&self) -> Requester {
        Requester {
            user_id: self.user_id,
            role: self.role,
        }
    }
}

/// An authenticated caller whose role is admin.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

#[derive(Debug, Clone)]
pub struct AdminToken;

/// Media-server hook calls, optionally guarded by a shared token.
#[derive(Debug, Clone)]
pub struct IngestCaller;

const ADMIN_TOKEN_HEADER: HeaderName = HeaderName::from_static("x-admin-token");
const INGEST_TOKEN_HEADER: HeaderName = HeaderName::from_static("x-ingest-token");

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::unauthorized("Not authorized to access this route"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::unauthorized("invalid Authorization header"))?;

        let service = AuthService::new(
            state.db.clone(),
            state.paseto_access_key,
            state.access_ttl_minutes,
        );
        let session = service
            .authenticate_access_token(token)
            .await
            .map_err(|err| {
                tracing::error!(error = ?err, "failed to authenticate");
                AppError::internal("failed to authenticate")
            })?
            .ok_or_else(|| AppError::unauthorized("invalid token"))?;

        let user = UserService::new(state.db.clone())
            .get_user(session.user_id)
            .await
            .map_err(|err| {
                tracing::error!(error = ?err, user_id = %session.user_id, "failed to load authenticated user");
                AppError::internal("failed to authenticate")
            })?
            .ok_or_else(|| AppError::unauthorized("user no longer exists"))?;

        Ok(AuthUser {
            user_id: user.id,
            role: user.role,
        })
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if user.role != Role::Admin {
            return Err(AppError::forbidden(format!(
                "User role {} is not authorized to access this route",
                user.role.as_db()
            )));
        }
        Ok(AdminUser(user))
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AdminToken {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let expected = state
            .admin_token
            .as_ref()
            .ok_or_else(|| AppError::forbidden("admin token not configured"))?;

        let provided = parts
            .headers
            .get(ADMIN_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::forbidden("missing admin token"))?;

        if !tokens_match(provided, expected) {
            return Err(AppError::forbidden("invalid admin token"));
        }

        Ok(AdminToken)
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for IngestCaller {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.ingest_hook_token.as_ref() else {
            return Ok(IngestCaller);
        };

        let provided = parts
            .headers
            .get(INGEST_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::forbidden("missing ingest token"))?;

        if !tokens_match(provided, expected) {
            return Err(AppError::forbidden("invalid ingest token"));
        }

        Ok(IngestCaller)
    }
}

fn tokens_match(provided: &str, expected: &str) -> bool {
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}
