use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::auth::AppState;
use crate::blocking;
use crate::error::ApiError;

/// Identity resolved from a bearer token, inserted as a request
/// extension by `require_auth`. Carries the presented token key so
/// logout can revoke exactly that token.
#[derive(Debug, Clone)]
pub struct CurrentMember {
    pub id: Uuid,
    pub username: String,
    pub token: String,
}

/// Resolve the Authorization header to a member record. Routes without
/// this layer never inspect the header, so a missing or malformed
/// header on a public route falls through as unauthenticated.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header_value = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            ApiError::Authentication("Authentication credentials were not provided.".into())
        })?;

    let token = header_value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Authentication("Invalid authorization header.".into()))?
        .to_string();

    let db = state.clone();
    let key = token.clone();
    let member = blocking(move || Ok(db.db.get_member_by_token(&key)?))
        .await?
        .ok_or_else(|| ApiError::Authentication("Invalid authentication token.".into()))?;

    let id: Uuid = member
        .id
        .parse()
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("corrupt member id '{}': {e}", member.id)))?;

    req.extensions_mut().insert(CurrentMember {
        id,
        username: member.username,
        token,
    });
    Ok(next.run(req).await)
}
