//! The messaging core: canonical dialog identity, the append-only
//! message ledger, and per-viewer unread aggregation. Handlers are thin
//! async wrappers over the sync service functions so the invariants can
//! be tested directly against an in-memory database.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use uuid::Uuid;

use agora_db::models::{DialogRow, MessageRow};
use agora_db::Database;
use agora_types::api::{
    DialogResponse, MarkAllReadResponse, MessageResponse, SendMessageRequest,
};

use crate::auth::AppState;
use crate::blocking;
use crate::convert::{member_summary, message_response, parse_timestamp, parse_uuid};
use crate::error::ApiError;
use crate::members::member_map;
use crate::middleware::CurrentMember;
use crate::PageQuery;

// -- Service layer --

/// Find or create the single dialog for the unordered pair
/// (me, other_id). The pair is canonicalized to (lo, hi) before any
/// store interaction; the unique constraint on the ordered pair makes
/// the upsert safe under concurrent first contact from both directions.
pub fn get_or_create_dialog(
    db: &Database,
    me: Uuid,
    other_id: Uuid,
) -> Result<(DialogRow, bool), ApiError> {
    if other_id == me {
        return Err(ApiError::InvalidOperation(
            "You cannot start a dialog with yourself.".into(),
        ));
    }

    db.get_member_by_id(&other_id.to_string())?
        .ok_or_else(|| ApiError::not_found("Member not found."))?;

    let (lo, hi) = if me < other_id {
        (me, other_id)
    } else {
        (other_id, me)
    };

    Ok(db.get_or_create_dialog(
        &Uuid::new_v4().to_string(),
        &lo.to_string(),
        &hi.to_string(),
    )?)
}

/// Explicit authorization predicate: is the acting member one of the
/// dialog's two participants?
fn ensure_participant(dialog: &DialogRow, member_id: Uuid) -> Result<(), ApiError> {
    let id = member_id.to_string();
    if dialog.member_a_id == id || dialog.member_b_id == id {
        Ok(())
    } else {
        Err(ApiError::Permission(
            "You are not a participant of this dialog.".into(),
        ))
    }
}

fn fetch_dialog(db: &Database, dialog_id: Uuid) -> Result<DialogRow, ApiError> {
    db.get_dialog(&dialog_id.to_string())?
        .ok_or_else(|| ApiError::not_found("Dialog not found."))
}

/// Append a message to a dialog. New messages are always unread.
pub fn append_message(
    db: &Database,
    dialog_id: Uuid,
    sender: Uuid,
    text: &str,
    image: &str,
) -> Result<MessageRow, ApiError> {
    let dialog = fetch_dialog(db, dialog_id)?;
    ensure_participant(&dialog, sender)?;

    let text = text.trim();
    let image = image.trim();
    if text.is_empty() && image.is_empty() {
        return Err(ApiError::validation(
            "text",
            "At least one of text or image must be provided.",
        ));
    }

    Ok(db.insert_message(
        &Uuid::new_v4().to_string(),
        &dialog.id,
        &sender.to_string(),
        text,
        image,
    )?)
}

/// Forward-chronological page of a dialog's messages, participant-only.
pub fn list_dialog_messages(
    db: &Database,
    dialog_id: Uuid,
    viewer: Uuid,
    limit: u32,
    offset: u32,
) -> Result<Vec<MessageRow>, ApiError> {
    let dialog = fetch_dialog(db, dialog_id)?;
    ensure_participant(&dialog, viewer)?;
    Ok(db.list_messages(&dialog.id, limit, offset)?)
}

/// Flip one message to read. Idempotent; the sender cannot mark their
/// own message.
pub fn mark_read(db: &Database, message_id: Uuid, me: Uuid) -> Result<MessageRow, ApiError> {
    let message = db
        .get_message(&message_id.to_string())?
        .ok_or_else(|| ApiError::not_found("Message not found."))?;
    let dialog = db
        .get_dialog(&message.dialog_id)?
        .ok_or_else(|| ApiError::not_found("Dialog not found."))?;
    ensure_participant(&dialog, me)?;

    if message.sender_id == me.to_string() {
        return Err(ApiError::InvalidOperation(
            "You cannot mark your own message as read.".into(),
        ));
    }

    db.mark_message_read(&message.id)?;
    db.get_message(&message.id)?
        .ok_or_else(|| ApiError::not_found("Message not found."))
}

/// Atomically flip every unread message from the other participant.
/// Returns the number of rows actually changed; a message appended
/// concurrently after the update is not retroactively included.
pub fn mark_all_read(db: &Database, dialog_id: Uuid, me: Uuid) -> Result<u64, ApiError> {
    let dialog = fetch_dialog(db, dialog_id)?;
    ensure_participant(&dialog, me)?;
    Ok(db.mark_dialog_read(&dialog.id, &me.to_string())?)
}

/// Unread messages addressed to the viewer, always computed per call.
pub fn unread_count(db: &Database, dialog_id: Uuid, viewer: Uuid) -> Result<i64, ApiError> {
    let dialog = fetch_dialog(db, dialog_id)?;
    ensure_participant(&dialog, viewer)?;
    Ok(db.unread_count(&dialog.id, &viewer.to_string())?)
}

// -- Handlers --

pub async fn open_dialog(
    State(state): State<AppState>,
    Path(member_id): Path<Uuid>,
    Extension(current): Extension<CurrentMember>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let (response, created) = blocking(move || {
        let (dialog, created) = get_or_create_dialog(&db.db, current.id, member_id)?;
        let response = dialog_response(&db, &dialog, current.id)?;
        Ok((response, created))
    })
    .await?;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(response)))
}

pub async fn list_dialogs(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentMember>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let dialogs = blocking(move || {
        let rows = db.db.list_dialogs_for_member(&current.id.to_string())?;
        rows.iter()
            .map(|dialog| dialog_response(&db, dialog, current.id))
            .collect::<Result<Vec<_>, _>>()
    })
    .await?;

    Ok(Json(dialogs))
}

pub async fn list_messages(
    State(state): State<AppState>,
    Path(dialog_id): Path<Uuid>,
    Query(page): Query<PageQuery>,
    Extension(current): Extension<CurrentMember>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let limit = page.clamped_limit();
    let offset = page.offset;
    let messages = blocking(move || {
        let rows = list_dialog_messages(&db.db, dialog_id, current.id, limit, offset)?;
        render_messages(&db, &rows)
    })
    .await?;

    Ok(Json(messages))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(dialog_id): Path<Uuid>,
    Extension(current): Extension<CurrentMember>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let message = blocking(move || {
        let row = append_message(&db.db, dialog_id, current.id, &req.text, &req.image)?;
        let mut rendered = render_messages(&db, std::slice::from_ref(&row))?;
        rendered
            .pop()
            .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("message vanished after insert")))
    })
    .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn mark_message_read(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(current): Extension<CurrentMember>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let message = blocking(move || {
        let row = mark_read(&db.db, id, current.id)?;
        let mut rendered = render_messages(&db, std::slice::from_ref(&row))?;
        rendered
            .pop()
            .ok_or_else(|| ApiError::not_found("Message not found."))
    })
    .await?;

    Ok(Json(message))
}

pub async fn mark_dialog_read(
    State(state): State<AppState>,
    Path(dialog_id): Path<Uuid>,
    Extension(current): Extension<CurrentMember>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let updated_count = blocking(move || mark_all_read(&db.db, dialog_id, current.id)).await?;
    Ok(Json(MarkAllReadResponse { updated_count }))
}

// -- View assembly --

/// Annotate a dialog with the other participant, the newest message,
/// and the viewer's unread count (computed, never cached).
fn dialog_response(
    state: &AppState,
    dialog: &DialogRow,
    viewer: Uuid,
) -> Result<DialogResponse, ApiError> {
    let viewer_id = viewer.to_string();
    let other_id = if dialog.member_a_id == viewer_id {
        &dialog.member_b_id
    } else {
        &dialog.member_a_id
    };

    let other = state
        .db
        .get_member_by_id(other_id)?
        .ok_or_else(|| ApiError::not_found("Member not found."))?;

    let last_message = match state.db.last_message(&dialog.id)? {
        Some(row) => render_messages(state, std::slice::from_ref(&row))?.pop(),
        None => None,
    };

    let unread_count = state.db.unread_count(&dialog.id, &viewer_id)?;

    Ok(DialogResponse {
        id: parse_uuid(&dialog.id, "dialog"),
        created_at: parse_timestamp(&dialog.created_at, "dialog created_at"),
        other_member: member_summary(&other),
        last_message,
        unread_count,
    })
}

fn render_messages(
    state: &AppState,
    rows: &[MessageRow],
) -> Result<Vec<MessageResponse>, ApiError> {
    let sender_ids: Vec<String> = rows.iter().map(|m| m.sender_id.clone()).collect();
    let senders = member_map(state, &sender_ids)?;

    rows.iter()
        .map(|row| {
            let sender = senders.get(&row.sender_id).ok_or_else(|| {
                ApiError::Internal(anyhow::anyhow!(
                    "message '{}' references missing sender '{}'",
                    row.id,
                    row.sender_id
                ))
            })?;
            Ok(message_response(row, sender))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_db::Database;

    fn member(db: &Database, username: &str) -> Uuid {
        let id = Uuid::new_v4();
        db.create_member(
            &id.to_string(),
            username,
            "Test",
            "User",
            "",
            None,
            "",
            "hash",
        )
        .unwrap();
        id
    }

    fn setup() -> (Database, Uuid, Uuid) {
        let db = Database::open_in_memory().unwrap();
        let alice = member(&db, "alice");
        let bob = member(&db, "bob");
        (db, alice, bob)
    }

    #[test]
    fn pair_order_collapses_to_one_dialog() {
        let (db, alice, bob) = setup();

        let (first, created) = get_or_create_dialog(&db, alice, bob).unwrap();
        assert!(created);
        assert!(first.member_a_id < first.member_b_id);

        // Same pair from the other direction: same row, created=false.
        let (second, created) = get_or_create_dialog(&db, bob, alice).unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);

        let count: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM dialogs", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn self_dialog_is_rejected() {
        let (db, alice, _) = setup();
        let err = get_or_create_dialog(&db, alice, alice).unwrap_err();
        assert!(matches!(err, ApiError::InvalidOperation(_)));
    }

    #[test]
    fn dialog_with_unknown_member_is_not_found() {
        let (db, alice, _) = setup();
        let err = get_or_create_dialog(&db, alice, Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[test]
    fn outsiders_cannot_touch_a_dialog() {
        let (db, alice, bob) = setup();
        let eve = member(&db, "eve");
        let (dialog, _) = get_or_create_dialog(&db, alice, bob).unwrap();
        let dialog_id: Uuid = dialog.id.parse().unwrap();

        let err = append_message(&db, dialog_id, eve, "hi", "").unwrap_err();
        assert!(matches!(err, ApiError::Permission(_)));

        let err = list_dialog_messages(&db, dialog_id, eve, 50, 0).unwrap_err();
        assert!(matches!(err, ApiError::Permission(_)));

        let err = mark_all_read(&db, dialog_id, eve).unwrap_err();
        assert!(matches!(err, ApiError::Permission(_)));

        let msg = append_message(&db, dialog_id, alice, "hi", "").unwrap();
        let err = mark_read(&db, msg.id.parse().unwrap(), eve).unwrap_err();
        assert!(matches!(err, ApiError::Permission(_)));
    }

    #[test]
    fn message_requires_text_or_image() {
        let (db, alice, bob) = setup();
        let (dialog, _) = get_or_create_dialog(&db, alice, bob).unwrap();
        let dialog_id: Uuid = dialog.id.parse().unwrap();

        let err = append_message(&db, dialog_id, alice, "", "").unwrap_err();
        assert!(matches!(err, ApiError::Validation { .. }));
        let err = append_message(&db, dialog_id, alice, "   ", "").unwrap_err();
        assert!(matches!(err, ApiError::Validation { .. }));

        // Image-only is enough.
        let msg = append_message(&db, dialog_id, alice, "", "photo.jpg").unwrap();
        assert!(!msg.is_read);
        assert_eq!(msg.image, "photo.jpg");
    }

    #[test]
    fn mark_read_is_idempotent_and_sender_restricted() {
        let (db, alice, bob) = setup();
        let (dialog, _) = get_or_create_dialog(&db, alice, bob).unwrap();
        let dialog_id: Uuid = dialog.id.parse().unwrap();

        let msg = append_message(&db, dialog_id, alice, "hi", "").unwrap();
        let msg_id: Uuid = msg.id.parse().unwrap();

        // The sender cannot mark their own message.
        let err = mark_read(&db, msg_id, alice).unwrap_err();
        assert!(matches!(err, ApiError::InvalidOperation(_)));

        let first = mark_read(&db, msg_id, bob).unwrap();
        assert!(first.is_read);
        let second = mark_read(&db, msg_id, bob).unwrap();
        assert!(second.is_read);
    }

    #[test]
    fn unread_counts_follow_the_two_member_scenario() {
        let (db, alice, bob) = setup();

        let (dialog, created) = get_or_create_dialog(&db, alice, bob).unwrap();
        assert!(created);
        let (same, created) = get_or_create_dialog(&db, bob, alice).unwrap();
        assert!(!created);
        assert_eq!(dialog.id, same.id);
        let dialog_id: Uuid = dialog.id.parse().unwrap();

        append_message(&db, dialog_id, alice, "hi", "").unwrap();
        assert_eq!(unread_count(&db, dialog_id, bob).unwrap(), 1);
        // The sender's own unread view is unaffected.
        assert_eq!(unread_count(&db, dialog_id, alice).unwrap(), 0);

        let updated = mark_all_read(&db, dialog_id, bob).unwrap();
        assert_eq!(updated, 1);
        assert_eq!(unread_count(&db, dialog_id, bob).unwrap(), 0);

        // Nothing left: a second bulk read changes no rows.
        assert_eq!(mark_all_read(&db, dialog_id, bob).unwrap(), 0);
    }

    #[test]
    fn messages_page_in_forward_order() {
        let (db, alice, bob) = setup();
        let (dialog, _) = get_or_create_dialog(&db, alice, bob).unwrap();
        let dialog_id: Uuid = dialog.id.parse().unwrap();

        for i in 0..5 {
            let sender = if i % 2 == 0 { alice } else { bob };
            append_message(&db, dialog_id, sender, &format!("m{i}"), "").unwrap();
        }

        let all = list_dialog_messages(&db, dialog_id, alice, 50, 0).unwrap();
        let texts: Vec<&str> = all.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["m0", "m1", "m2", "m3", "m4"]);

        let page = list_dialog_messages(&db, dialog_id, alice, 2, 2).unwrap();
        let texts: Vec<&str> = page.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["m2", "m3"]);
    }
}
