//! Row-to-DTO conversion. Stored ids and timestamps are TEXT; corrupt
//! values are logged and defaulted rather than failing the request.

use chrono::{DateTime, NaiveDate, Utc};
use tracing::warn;
use uuid::Uuid;

use agora_db::models::{MemberRow, MessageRow, PostMediaRow};
use agora_types::api::{MemberProfile, MemberSummary, MessageResponse, PostMediaResponse};

pub(crate) fn parse_uuid(value: &str, context: &str) -> Uuid {
    value.parse().unwrap_or_else(|e| {
        warn!("Corrupt id '{}' ({}): {}", value, context, e);
        Uuid::default()
    })
}

pub(crate) fn parse_timestamp(value: &str, context: &str) -> DateTime<Utc> {
    value
        .parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without
            // timezone. Parse as naive UTC and convert.
            chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}' ({}): {}", value, context, e);
            DateTime::default()
        })
}

pub(crate) fn parse_date(value: Option<&str>, context: &str) -> Option<NaiveDate> {
    let value = value?;
    match value.parse::<NaiveDate>() {
        Ok(date) => Some(date),
        Err(e) => {
            warn!("Corrupt date '{}' ({}): {}", value, context, e);
            None
        }
    }
}

pub(crate) fn member_profile(row: &MemberRow) -> MemberProfile {
    MemberProfile {
        id: parse_uuid(&row.id, "member"),
        username: row.username.clone(),
        first_name: row.first_name.clone(),
        last_name: row.last_name.clone(),
        bio: row.bio.clone(),
        birth_date: parse_date(row.birth_date.as_deref(), "member birth_date"),
        avatar: row.avatar.clone(),
        created_at: parse_timestamp(&row.created_at, "member created_at"),
        updated_at: parse_timestamp(&row.updated_at, "member updated_at"),
    }
}

pub(crate) fn member_summary(row: &MemberRow) -> MemberSummary {
    MemberSummary {
        id: parse_uuid(&row.id, "member"),
        username: row.username.clone(),
        first_name: row.first_name.clone(),
        last_name: row.last_name.clone(),
        avatar: row.avatar.clone(),
    }
}

pub(crate) fn message_response(row: &MessageRow, sender: &MemberRow) -> MessageResponse {
    MessageResponse {
        id: parse_uuid(&row.id, "message"),
        dialog_id: parse_uuid(&row.dialog_id, "message dialog_id"),
        sender: member_summary(sender),
        text: row.text.clone(),
        image: row.image.clone(),
        is_read: row.is_read,
        created_at: parse_timestamp(&row.created_at, "message created_at"),
    }
}

pub(crate) fn post_media_response(row: &PostMediaRow) -> PostMediaResponse {
    PostMediaResponse {
        id: parse_uuid(&row.id, "post media"),
        file: row.file.clone(),
        media_type: row.media_type.clone(),
        created_at: parse_timestamp(&row.created_at, "post media created_at"),
    }
}
