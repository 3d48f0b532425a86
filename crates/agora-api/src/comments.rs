use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use uuid::Uuid;

use agora_db::models::{CommentRow, MemberRow};
use agora_types::api::{
    CommentResponse, CreateCommentRequest, LikeResponse, UpdateCommentRequest,
};

use crate::auth::AppState;
use crate::blocking;
use crate::convert::{member_summary, parse_timestamp, parse_uuid};
use crate::error::ApiError;
use crate::members::member_map;
use crate::middleware::CurrentMember;

/// Top-level comments of a post, oldest first, each with one level of
/// replies nested under it.
pub async fn list_comments(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let comments = blocking(move || {
        let post = db
            .db
            .get_post(&post_id.to_string())?
            .ok_or_else(|| ApiError::not_found("Post not found."))?;

        let rows = db.db.list_comments_for_post(&post.id)?;
        let author_ids: Vec<String> = rows.iter().map(|c| c.author_id.clone()).collect();
        let authors = member_map(&db, &author_ids)?;

        let (parents, replies): (Vec<_>, Vec<_>) =
            rows.into_iter().partition(|c| c.parent_id.is_none());

        let mut comments: Vec<CommentResponse> = parents
            .iter()
            .map(|row| comment_response(row, &authors, vec![]))
            .collect::<Result<_, _>>()?;

        for reply in &replies {
            let Some(parent_id) = reply.parent_id.as_deref() else {
                continue;
            };
            let rendered = comment_response(reply, &authors, vec![])?;
            if let Some(parent) = comments.iter_mut().find(|c| c.id.to_string() == parent_id) {
                parent.replies.push(rendered);
            }
        }

        Ok(comments)
    })
    .await?;

    Ok(Json(comments))
}

pub async fn create_comment(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(current): Extension<CurrentMember>,
    Json(req): Json<CreateCommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.text.trim().is_empty() {
        return Err(ApiError::validation("text", "Comment text is required."));
    }

    let db = state.clone();
    let comment_id = Uuid::new_v4();
    let comment = blocking(move || {
        let post = db
            .db
            .get_post(&post_id.to_string())?
            .ok_or_else(|| ApiError::not_found("Post not found."))?;

        let parent_id = match req.parent_id {
            Some(pid) => {
                let parent = db
                    .db
                    .get_comment(&pid.to_string())?
                    .ok_or_else(|| ApiError::not_found("Parent comment not found."))?;
                if parent.post_id != post.id {
                    return Err(ApiError::validation(
                        "parent_id",
                        "Parent comment must belong to the same post.",
                    ));
                }
                Some(parent.id)
            }
            None => None,
        };

        db.db.insert_comment(
            &comment_id.to_string(),
            &post.id,
            &current.id.to_string(),
            req.text.trim(),
            parent_id.as_deref(),
        )?;
        fetch_comment(&db, comment_id)
    })
    .await?;

    Ok((StatusCode::CREATED, Json(comment)))
}

pub async fn get_comment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let comment = blocking(move || fetch_comment(&db, id)).await?;
    Ok(Json(comment))
}

pub async fn update_comment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(current): Extension<CurrentMember>,
    Json(req): Json<UpdateCommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.text.trim().is_empty() {
        return Err(ApiError::validation("text", "Comment text is required."));
    }

    let db = state.clone();
    let comment = blocking(move || {
        let existing = fetch_comment_row(&db, id)?;
        ensure_author(&existing.author_id, current.id)?;
        db.db.update_comment(&existing.id, req.text.trim())?;
        fetch_comment(&db, id)
    })
    .await?;

    Ok(Json(comment))
}

pub async fn delete_comment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(current): Extension<CurrentMember>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    blocking(move || {
        let existing = fetch_comment_row(&db, id)?;
        ensure_author(&existing.author_id, current.id)?;
        db.db.delete_comment(&existing.id)?;
        Ok(())
    })
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn toggle_like(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(current): Extension<CurrentMember>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let liked = blocking(move || {
        let comment = fetch_comment_row(&db, id)?;
        Ok(db.db.toggle_comment_like(
            &Uuid::new_v4().to_string(),
            &current.id.to_string(),
            &comment.id,
        )?)
    })
    .await?;

    Ok(Json(LikeResponse { liked }))
}

fn ensure_author(author_id: &str, member_id: Uuid) -> Result<(), ApiError> {
    if author_id == member_id.to_string() {
        Ok(())
    } else {
        Err(ApiError::Permission(
            "You do not have permission to modify this comment.".into(),
        ))
    }
}

fn fetch_comment_row(state: &AppState, id: Uuid) -> Result<CommentRow, ApiError> {
    state
        .db
        .get_comment(&id.to_string())?
        .ok_or_else(|| ApiError::not_found("Comment not found."))
}

fn fetch_comment(state: &AppState, id: Uuid) -> Result<CommentResponse, ApiError> {
    let row = fetch_comment_row(state, id)?;
    let authors = member_map(state, std::slice::from_ref(&row.author_id))?;
    comment_response(&row, &authors, vec![])
}

fn comment_response(
    row: &CommentRow,
    authors: &std::collections::HashMap<String, MemberRow>,
    replies: Vec<CommentResponse>,
) -> Result<CommentResponse, ApiError> {
    let author = authors
        .get(&row.author_id)
        .map(member_summary)
        .ok_or_else(|| {
            ApiError::Internal(anyhow::anyhow!(
                "comment '{}' references missing author '{}'",
                row.id,
                row.author_id
            ))
        })?;

    Ok(CommentResponse {
        id: parse_uuid(&row.id, "comment"),
        post_id: parse_uuid(&row.post_id, "comment post_id"),
        author,
        text: row.text.clone(),
        parent_id: row.parent_id.as_deref().map(|p| parse_uuid(p, "comment parent_id")),
        created_at: parse_timestamp(&row.created_at, "comment created_at"),
        updated_at: parse_timestamp(&row.updated_at, "comment updated_at"),
        likes_count: row.likes_count,
        replies,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use agora_db::Database;

    use crate::auth::AppStateInner;

    fn state() -> AppState {
        Arc::new(AppStateInner {
            db: Database::open_in_memory().unwrap(),
        })
    }

    fn member(state: &AppState, username: &str) -> CurrentMember {
        let id = Uuid::new_v4();
        state
            .db
            .create_member(&id.to_string(), username, "Test", "User", "", None, "", "hash")
            .unwrap();
        CurrentMember {
            id,
            username: username.into(),
            token: String::new(),
        }
    }

    fn post(state: &AppState, author: &CurrentMember) -> Uuid {
        let id = Uuid::new_v4();
        state
            .db
            .insert_post(&id.to_string(), &author.id.to_string(), "hello", "")
            .unwrap();
        id
    }

    fn comment(state: &AppState, post_id: Uuid, author: &CurrentMember) -> Uuid {
        let id = Uuid::new_v4();
        state
            .db
            .insert_comment(
                &id.to_string(),
                &post_id.to_string(),
                &author.id.to_string(),
                "nice",
                None,
            )
            .unwrap();
        id
    }

    #[tokio::test]
    async fn reply_parent_must_share_the_post() {
        let state = state();
        let alice = member(&state, "alice");
        let bob = member(&state, "bob");
        let first_post = post(&state, &alice);
        let second_post = post(&state, &alice);
        let parent = comment(&state, first_post, &alice);

        // Replying under a different post than the parent's is rejected.
        let result = create_comment(
            State(state.clone()),
            Path(second_post),
            Extension(bob.clone()),
            Json(CreateCommentRequest {
                text: "reply".into(),
                parent_id: Some(parent),
            }),
        )
        .await;
        assert!(matches!(
            result,
            Err(ApiError::Validation { field: "parent_id", .. })
        ));

        let result = create_comment(
            State(state.clone()),
            Path(first_post),
            Extension(bob),
            Json(CreateCommentRequest {
                text: "reply".into(),
                parent_id: Some(parent),
            }),
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn only_the_author_may_modify_a_comment() {
        let state = state();
        let alice = member(&state, "alice");
        let bob = member(&state, "bob");
        let post_id = post(&state, &alice);
        let comment_id = comment(&state, post_id, &alice);

        let result = update_comment(
            State(state.clone()),
            Path(comment_id),
            Extension(bob.clone()),
            Json(UpdateCommentRequest {
                text: "edited".into(),
            }),
        )
        .await;
        assert!(matches!(result, Err(ApiError::Permission(_))));

        let result =
            delete_comment(State(state.clone()), Path(comment_id), Extension(bob)).await;
        assert!(matches!(result, Err(ApiError::Permission(_))));
        assert!(state
            .db
            .get_comment(&comment_id.to_string())
            .unwrap()
            .is_some());

        let result = update_comment(
            State(state.clone()),
            Path(comment_id),
            Extension(alice.clone()),
            Json(UpdateCommentRequest {
                text: "edited".into(),
            }),
        )
        .await;
        assert!(result.is_ok());

        let result =
            delete_comment(State(state.clone()), Path(comment_id), Extension(alice)).await;
        assert!(result.is_ok());
        assert!(state
            .db
            .get_comment(&comment_id.to_string())
            .unwrap()
            .is_none());
    }
}
