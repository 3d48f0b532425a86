use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use uuid::Uuid;

use agora_db::models::{PostMediaRow, PostRow};
use agora_types::api::{
    CreatePostRequest, LikeResponse, PostResponse, UpdatePostRequest,
};

use crate::auth::AppState;
use crate::blocking;
use crate::convert::{member_summary, parse_timestamp, parse_uuid, post_media_response};
use crate::error::ApiError;
use crate::members::{fetch_member, member_map};
use crate::middleware::CurrentMember;
use crate::PageQuery;

const ALLOWED_MEDIA_TYPES: [&str; 2] = ["image", "video"];

pub async fn list_posts(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let limit = page.clamped_limit();
    let offset = page.offset;
    let posts = blocking(move || {
        let rows = db.db.list_posts(limit, offset)?;
        assemble_posts(&db, rows)
    })
    .await?;
    Ok(Json(posts))
}

pub async fn member_posts(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(page): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let limit = page.clamped_limit();
    let offset = page.offset;
    let posts = blocking(move || {
        let author = fetch_member(&db, id)?;
        let rows = db.db.list_posts_by_author(&author.id, limit, offset)?;
        assemble_posts(&db, rows)
    })
    .await?;
    Ok(Json(posts))
}

pub async fn create_post(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentMember>,
    Json(req): Json<CreatePostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.text.trim().is_empty() {
        return Err(ApiError::validation("text", "Post text is required."));
    }
    for attachment in &req.media {
        if !ALLOWED_MEDIA_TYPES.contains(&attachment.media_type.as_str()) {
            return Err(ApiError::validation(
                "files",
                "Only images and videos are allowed.",
            ));
        }
        if attachment.file.trim().is_empty() {
            return Err(ApiError::validation("files", "Media file reference is required."));
        }
    }

    let db = state.clone();
    let post_id = Uuid::new_v4();
    let post = blocking(move || {
        let id = post_id.to_string();
        db.db
            .insert_post(&id, &current.id.to_string(), req.text.trim(), &req.image)?;
        for attachment in &req.media {
            db.db.insert_post_media(
                &Uuid::new_v4().to_string(),
                &id,
                &attachment.file,
                &attachment.media_type,
            )?;
        }
        fetch_post(&db, post_id)
    })
    .await?;

    Ok((StatusCode::CREATED, Json(post)))
}

pub async fn get_post(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let post = blocking(move || fetch_post(&db, id)).await?;
    Ok(Json(post))
}

pub async fn update_post(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(current): Extension<CurrentMember>,
    Json(req): Json<UpdatePostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let post = blocking(move || {
        let existing = fetch_post_row(&db, id)?;
        ensure_author(&existing.author_id, current.id)?;

        let text = req.text.unwrap_or(existing.text);
        let image = req.image.unwrap_or(existing.image);
        if text.trim().is_empty() {
            return Err(ApiError::validation("text", "Post text is required."));
        }

        db.db.update_post(&existing.id, text.trim(), &image)?;
        fetch_post(&db, id)
    })
    .await?;

    Ok(Json(post))
}

pub async fn delete_post(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(current): Extension<CurrentMember>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    blocking(move || {
        let existing = fetch_post_row(&db, id)?;
        ensure_author(&existing.author_id, current.id)?;
        db.db.delete_post(&existing.id)?;
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
        let post = fetch_post_row(&db, id)?;
        Ok(db.db.toggle_post_like(
            &Uuid::new_v4().to_string(),
            &current.id.to_string(),
            &post.id,
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
            "You do not have permission to modify this post.".into(),
        ))
    }
}

fn fetch_post_row(state: &AppState, id: Uuid) -> Result<PostRow, ApiError> {
    state
        .db
        .get_post(&id.to_string())?
        .ok_or_else(|| ApiError::not_found("Post not found."))
}

fn fetch_post(state: &AppState, id: Uuid) -> Result<PostResponse, ApiError> {
    let row = fetch_post_row(state, id)?;
    let mut posts = assemble_posts(state, vec![row])?;
    posts
        .pop()
        .ok_or_else(|| ApiError::not_found("Post not found."))
}

/// Join posts with their authors and media in two batch queries.
fn assemble_posts(state: &AppState, rows: Vec<PostRow>) -> Result<Vec<PostResponse>, ApiError> {
    let author_ids: Vec<String> = rows.iter().map(|p| p.author_id.clone()).collect();
    let authors = member_map(state, &author_ids)?;

    let post_ids: Vec<String> = rows.iter().map(|p| p.id.clone()).collect();
    let mut media_map: HashMap<String, Vec<PostMediaRow>> = HashMap::new();
    for media in state.db.get_media_for_posts(&post_ids)? {
        media_map.entry(media.post_id.clone()).or_default().push(media);
    }

    let posts = rows
        .into_iter()
        .map(|row| {
            let author = authors
                .get(&row.author_id)
                .map(member_summary)
                .ok_or_else(|| {
                    ApiError::Internal(anyhow::anyhow!(
                        "post '{}' references missing author '{}'",
                        row.id,
                        row.author_id
                    ))
                })?;

            let media = media_map
                .remove(&row.id)
                .unwrap_or_default()
                .iter()
                .map(post_media_response)
                .collect();

            Ok(PostResponse {
                id: parse_uuid(&row.id, "post"),
                author,
                text: row.text,
                image: row.image,
                media,
                created_at: parse_timestamp(&row.created_at, "post created_at"),
                updated_at: parse_timestamp(&row.updated_at, "post updated_at"),
                likes_count: row.likes_count,
                comments_count: row.comments_count,
            })
        })
        .collect::<Result<Vec<_>, ApiError>>()?;

    Ok(posts)
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

    #[tokio::test]
    async fn only_the_author_may_modify_a_post() {
        let state = state();
        let alice = member(&state, "alice");
        let bob = member(&state, "bob");
        let post_id = post(&state, &alice);

        let edit = UpdatePostRequest {
            text: Some("edited".into()),
            image: None,
        };
        let result = update_post(
            State(state.clone()),
            Path(post_id),
            Extension(bob.clone()),
            Json(edit),
        )
        .await;
        assert!(matches!(result, Err(ApiError::Permission(_))));

        let result = delete_post(State(state.clone()), Path(post_id), Extension(bob)).await;
        assert!(matches!(result, Err(ApiError::Permission(_))));
        // The post survives the rejected delete.
        assert!(state.db.get_post(&post_id.to_string()).unwrap().is_some());

        let edit = UpdatePostRequest {
            text: Some("edited".into()),
            image: None,
        };
        let result = update_post(
            State(state.clone()),
            Path(post_id),
            Extension(alice.clone()),
            Json(edit),
        )
        .await;
        assert!(result.is_ok());
        assert_eq!(
            state.db.get_post(&post_id.to_string()).unwrap().unwrap().text,
            "edited"
        );

        let result = delete_post(State(state.clone()), Path(post_id), Extension(alice)).await;
        assert!(result.is_ok());
        assert!(state.db.get_post(&post_id.to_string()).unwrap().is_none());
    }
}
