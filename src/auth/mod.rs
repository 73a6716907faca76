pub mod jwt;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization, Cookie};
use axum_extra::TypedHeader;

use crate::{error::AppError, state::AppState};

/// Identity resolved from the caller's token. `user_id` is the owner key for
/// every board and file operation.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: i64,
    pub subject: String,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = match TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
            .await
        {
            Ok(TypedHeader(Authorization(bearer))) => bearer.token().to_owned(),
            Err(_) => TypedHeader::<Cookie>::from_request_parts(parts, state)
                .await
                .ok()
                .and_then(|TypedHeader(cookies)| {
                    cookies
                        .get(&state.config.auth_cookie_name)
                        .map(str::to_owned)
                })
                .ok_or_else(AppError::unauthorized)?,
        };

        let claims = state.jwt.verify_token(&token).map_err(|err| {
            tracing::debug!(error = %err, "rejected token");
            AppError::unauthorized()
        })?;

        Ok(AuthenticatedUser {
            user_id: claims.user_id,
            subject: claims.sub,
        })
    }
}
