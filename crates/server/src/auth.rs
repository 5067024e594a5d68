use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
    Json,
};
use competition_api::auth::{verify_admin_token, AdminClaims, AuthError};
use shared::error::{ApiError, ErrorCode};
use tracing::warn;

use crate::app_state::AppState;

/// Verified admin identity taken from an `Authorization: Bearer <jwt>` header.
/// The scheme name is matched case-insensitively.
#[derive(Debug, Clone)]
pub(crate) struct AdminBearer(pub(crate) AdminClaims);

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for AdminBearer {
    type Rejection = (StatusCode, Json<ApiError>);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().split_once(' '))
            .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
            .map(|(_, token)| token.trim())
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(ApiError::new(
                        ErrorCode::Unauthorized,
                        "missing admin bearer token",
                    )),
                )
            })?;

        verify_admin_token(&state.admin_jwt_secret, token)
            .map(AdminBearer)
            .map_err(|err| {
                warn!(error = %err, path = %parts.uri.path(), "admin token rejected");
                match err {
                    AuthError::NotAdmin(_) => (
                        StatusCode::FORBIDDEN,
                        Json(ApiError::new(ErrorCode::Forbidden, err.to_string())),
                    ),
                    AuthError::InvalidToken(_) => (
                        StatusCode::UNAUTHORIZED,
                        Json(ApiError::new(ErrorCode::Unauthorized, err.to_string())),
                    ),
                }
            })
    }
}
