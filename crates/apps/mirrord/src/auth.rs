//! Bearer-token extractor

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use crate::error::ApiError;
use crate::routes::{AppState, blocking};

/// The account behind a valid session token
pub struct AuthUser {
    pub email: String,
    pub token: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(ApiError::Unauthorized)?
            .to_string();

        let service = state.clone();
        let candidate = token.clone();
        let email = blocking(move || Ok(service.authenticate(&candidate)?)).await?;
        Ok(AuthUser { email, token })
    }
}
