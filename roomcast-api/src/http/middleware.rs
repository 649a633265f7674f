// HTTP middleware

use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use roomcast_core::models::UserId;

use super::{AppError, AppState};

/// Caller identity, taken from the header set by the authenticating proxy
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: UserId,
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);

        let header = parts
            .headers
            .get(&*app_state.identity_header)
            .ok_or_else(|| AppError::unauthorized("Missing identity header"))?;

        let user_id = header
            .to_str()
            .map_err(|_| AppError::unauthorized("Invalid identity header"))?
            .trim();

        if user_id.is_empty() {
            return Err(AppError::unauthorized("Empty identity header"));
        }

        Ok(Self {
            user_id: UserId::from(user_id),
        })
    }
}
