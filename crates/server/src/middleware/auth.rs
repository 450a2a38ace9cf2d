use axum::{
    async_trait,
    extract::{FromRequestParts, OriginalUri, Query, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};
use serde::Deserialize;

use crate::{
    db::models::Role,
    error::AppError,
    routes::auth::decode_token,
    AppState,
};

#[derive(Clone, Debug)]
#[allow(dead_code)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// EventSource cannot send headers, so the points stream alone may pass its
/// token in the query string.
pub const QUERY_TOKEN_PATH: &str = "/api/points/stream";

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn extract_token(request: &Request) -> Option<String> {
    if let Some(Authorization(bearer)) = request.headers().typed_get::<Authorization<Bearer>>() {
        return Some(bearer.token().to_string());
    }

    let path = request
        .extensions()
        .get::<OriginalUri>()
        .map(|uri| uri.path())
        .unwrap_or_else(|| request.uri().path());
    if path != QUERY_TOKEN_PATH {
        return None;
    }

    Query::<TokenQuery>::try_from_uri(request.uri())
        .ok()
        .and_then(|Query(q)| q.token)
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_token(&request).ok_or(AppError::Unauthorized)?;
    let claims = decode_token(&token, &state.config.jwt_secret)?;

    let user = AuthUser {
        id: claims.sub,
        email: claims.email,
        name: claims.name,
        role: claims.role,
    };

    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

// Extractor for getting the authenticated user from request extensions
#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or(AppError::Unauthorized)
    }
}
