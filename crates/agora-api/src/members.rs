use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;

use agora_db::models::MemberRow;
use agora_types::api::{
    FollowResponse, MemberReplaceRequest, MemberSummary, MemberUpdateRequest,
};

use crate::auth::AppState;
use crate::blocking;
use crate::convert::{member_profile, member_summary};
use crate::error::ApiError;
use crate::middleware::CurrentMember;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

pub async fn get_member(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let member = blocking(move || fetch_member(&db, id)).await?;
    Ok(Json(member_profile(&member)))
}

pub async fn search_members(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let q = query.q.trim().to_string();
    if q.is_empty() {
        return Ok(Json(Vec::new()));
    }

    let db = state.clone();
    let rows = blocking(move || Ok(db.db.search_members(&q)?)).await?;
    let members: Vec<MemberSummary> = rows.iter().map(member_summary).collect();
    Ok(Json(members))
}

pub async fn replace_me(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentMember>,
    Json(req): Json<MemberReplaceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.first_name.is_empty() || req.last_name.is_empty() {
        return Err(ApiError::validation(
            "first_name",
            "First and last name are required.",
        ));
    }

    let db = state.clone();
    let member = blocking(move || {
        let id = current.id.to_string();
        db.db.update_member(
            &id,
            &req.first_name,
            &req.last_name,
            &req.bio,
            req.birth_date.map(|d| d.to_string()).as_deref(),
            &req.avatar,
        )?;
        fetch_member(&db, current.id)
    })
    .await?;

    Ok(Json(member_profile(&member)))
}

/// Partial update: only supplied fields change; a supplied-but-null
/// `birth_date` clears the stored value.
pub async fn update_me(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentMember>,
    Json(req): Json<MemberUpdateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let member = blocking(move || {
        let existing = fetch_member(&db, current.id)?;

        let first_name = req.first_name.unwrap_or(existing.first_name);
        let last_name = req.last_name.unwrap_or(existing.last_name);
        let bio = req.bio.unwrap_or(existing.bio);
        let avatar = req.avatar.unwrap_or(existing.avatar);
        let birth_date = match req.birth_date {
            Some(value) => value.map(|d| d.to_string()),
            None => existing.birth_date,
        };

        if first_name.is_empty() || last_name.is_empty() {
            return Err(ApiError::validation(
                "first_name",
                "First and last name must not be empty.",
            ));
        }

        db.db.update_member(
            &existing.id,
            &first_name,
            &last_name,
            &bio,
            birth_date.as_deref(),
            &avatar,
        )?;
        fetch_member(&db, current.id)
    })
    .await?;

    Ok(Json(member_profile(&member)))
}

pub async fn follow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(current): Extension<CurrentMember>,
) -> Result<impl IntoResponse, ApiError> {
    if id == current.id {
        return Err(ApiError::InvalidOperation(
            "You cannot follow yourself.".into(),
        ));
    }

    let db = state.clone();
    let created = blocking(move || {
        let target = fetch_member(&db, id)?;
        Ok(db.db.create_subscription(
            &Uuid::new_v4().to_string(),
            &current.id.to_string(),
            &target.id,
        )?)
    })
    .await?;

    let detail = if created {
        "Now following the member."
    } else {
        "You are already following this member."
    };
    Ok(Json(FollowResponse {
        following: true,
        detail: detail.into(),
    }))
}

pub async fn unfollow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(current): Extension<CurrentMember>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let deleted = blocking(move || {
        let target = fetch_member(&db, id)?;
        Ok(db
            .db
            .delete_subscription(&current.id.to_string(), &target.id)?)
    })
    .await?;

    let detail = if deleted {
        "Unfollowed the member."
    } else {
        "You were not following this member."
    };
    Ok(Json(FollowResponse {
        following: false,
        detail: detail.into(),
    }))
}

pub async fn following(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let rows = blocking(move || {
        let member = fetch_member(&db, id)?;
        Ok(db.db.list_following(&member.id)?)
    })
    .await?;
    let members: Vec<_> = rows.iter().map(member_summary).collect();
    Ok(Json(members))
}

pub async fn followers(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let rows = blocking(move || {
        let member = fetch_member(&db, id)?;
        Ok(db.db.list_followers(&member.id)?)
    })
    .await?;
    let members: Vec<_> = rows.iter().map(member_summary).collect();
    Ok(Json(members))
}

pub(crate) fn fetch_member(state: &AppState, id: Uuid) -> Result<MemberRow, ApiError> {
    state
        .db
        .get_member_by_id(&id.to_string())?
        .ok_or_else(|| ApiError::not_found("Member not found."))
}

/// Batch lookup keyed by id string, used when assembling list views.
pub(crate) fn member_map(
    state: &AppState,
    ids: &[String],
) -> Result<HashMap<String, MemberRow>, ApiError> {
    let rows = state.db.get_members_by_ids(ids)?;
    Ok(rows.into_iter().map(|m| (m.id.clone(), m)).collect())
}
