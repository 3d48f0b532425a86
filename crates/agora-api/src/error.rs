use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use tracing::error;

/// Request-scoped error taxonomy. Every variant maps to an HTTP status
/// at the boundary; none is fatal to the process.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed or missing input, reported under its field name.
    #[error("{message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    /// Well-formed input requesting a forbidden state transition
    /// (self-dialog, self-follow, marking one's own message read).
    #[error("{0}")]
    InvalidOperation(String),

    /// Missing or invalid credential.
    #[error("{0}")]
    Authentication(String),

    /// Authenticated but not authorized for this resource.
    #[error("{0}")]
    Permission(String),

    #[error("{0}")]
    NotFound(String),

    /// Constraint violation surfaced as a race outcome. The dialog
    /// upsert absorbs its own conflicts, so callers rarely see this.
    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Validation { .. } | Self::InvalidOperation(_) => StatusCode::BAD_REQUEST,
            Self::Authentication(_) => StatusCode::UNAUTHORIZED,
            Self::Permission(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Validation { field, message } => {
                let mut body = serde_json::Map::new();
                body.insert(field.to_string(), serde_json::json!([message]));
                (StatusCode::BAD_REQUEST, Json(serde_json::Value::Object(body))).into_response()
            }
            Self::Internal(err) => {
                error!("internal error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "detail": "Internal server error." })),
                )
                    .into_response()
            }
            other => {
                let status = other.status();
                (
                    status,
                    Json(serde_json::json!({ "detail": other.to_string() })),
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ApiError;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    #[test]
    fn statuses_follow_the_taxonomy() {
        let cases = [
            (ApiError::validation("text", "required"), StatusCode::BAD_REQUEST),
            (
                ApiError::InvalidOperation("no".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::Authentication("who".into()),
                StatusCode::UNAUTHORIZED,
            ),
            (ApiError::Permission("denied".into()), StatusCode::FORBIDDEN),
            (ApiError::not_found("gone"), StatusCode::NOT_FOUND),
            (ApiError::Conflict("raced".into()), StatusCode::CONFLICT),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }
}
