use std::sync::Arc;

use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use axum::{extract::State, http::StatusCode, response::IntoResponse, Extension, Json};
use rand::RngCore;
use uuid::Uuid;

use agora_db::Database;
use agora_types::api::{
    AuthTokenResponse, DetailResponse, HelloResponse, LoginRequest, RegisterRequest,
};

use crate::blocking;
use crate::convert::member_profile;
use crate::error::ApiError;
use crate::middleware::CurrentMember;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
}

pub async fn hello() -> impl IntoResponse {
    Json(HelloResponse {
        message: "Hello!".into(),
        timestamp: chrono::Utc::now(),
    })
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // The length limit counts characters, not bytes.
    if req.username.is_empty() || req.username.chars().count() > 150 {
        return Err(ApiError::validation(
            "username",
            "Username must be between 1 and 150 characters.",
        ));
    }
    if req.password.len() < 8 {
        return Err(ApiError::validation(
            "password",
            "Password must be at least 8 characters.",
        ));
    }

    let password_hash = hash_password(&req.password)?;
    let member_id = Uuid::new_v4();
    let token = generate_token();

    let db = state.clone();
    let key = token.clone();
    let member = blocking(move || {
        // Uniqueness is case-insensitive; the NOCASE unique index is
        // the backstop for a concurrent duplicate registration.
        if db.db.get_member_by_username(&req.username)?.is_some() {
            return Err(ApiError::validation(
                "username",
                "A member with this username already exists.",
            ));
        }

        let id = member_id.to_string();
        db.db.create_member(
            &id,
            &req.username,
            &req.first_name,
            &req.last_name,
            &req.bio,
            req.birth_date.map(|d| d.to_string()).as_deref(),
            &req.avatar,
            &password_hash,
        )?;
        db.db.create_token(&key, &id)?;

        db.db
            .get_member_by_id(&id)?
            .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("member vanished after insert")))
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(AuthTokenResponse {
            token,
            member: member_profile(&member),
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let (member, token) = blocking(move || {
        let member = db
            .db
            .get_member_by_username(&req.username)?
            .ok_or_else(|| ApiError::Authentication("Invalid username or password.".into()))?;

        if !verify_password(&req.password, &member.password)? {
            return Err(ApiError::Authentication(
                "Invalid username or password.".into(),
            ));
        }

        // Reuse an existing token if present, otherwise create a new one.
        let token = match db.db.find_token_for_member(&member.id)? {
            Some(existing) => existing.key,
            None => {
                let key = generate_token();
                db.db.create_token(&key, &member.id)?;
                key
            }
        };

        Ok((member, token))
    })
    .await?;

    Ok(Json(AuthTokenResponse {
        token,
        member: member_profile(&member),
    }))
}

/// Revoke the token the request authenticated with. Other sessions of
/// the same member stay valid.
pub async fn logout(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentMember>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    blocking(move || {
        db.db.delete_token(&current.token)?;
        Ok(())
    })
    .await?;

    Ok(Json(DetailResponse {
        detail: "Successfully logged out.".into(),
    }))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentMember>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let member = blocking(move || {
        db.db
            .get_member_by_id(&current.id.to_string())?
            .ok_or_else(|| ApiError::not_found("Member not found."))
    })
    .await?;

    Ok(Json(member_profile(&member)))
}

/// Opaque 40-char bearer token (20 random bytes, hex-encoded).
fn generate_token() -> String {
    let mut bytes = [0u8; 20];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("password hashing failed: {e}")))
}

fn verify_password(password: &str, stored: &str) -> Result<bool, ApiError> {
    let parsed = PasswordHash::new(stored)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("stored hash is malformed: {e}")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_hex_and_distinct() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 40);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn password_round_trip() {
        let hash = hash_password("correct horse").unwrap();
        assert!(verify_password("correct horse", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
    }

    fn register_request(username: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.into(),
            first_name: "Test".into(),
            last_name: "User".into(),
            password: "longenough".into(),
            bio: String::new(),
            birth_date: None,
            avatar: String::new(),
        }
    }

    #[tokio::test]
    async fn username_limit_counts_characters_not_bytes() {
        let state: AppState = Arc::new(AppStateInner {
            db: Database::open_in_memory().unwrap(),
        });

        // 150 two-byte characters fit the limit.
        let at_limit = "ü".repeat(150);
        let result = register(State(state.clone()), Json(register_request(&at_limit))).await;
        assert!(result.is_ok());

        let over_limit = "ü".repeat(151);
        let result = register(State(state), Json(register_request(&over_limit))).await;
        assert!(matches!(
            result,
            Err(ApiError::Validation { field: "username", .. })
        ));
    }
}
