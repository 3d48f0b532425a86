//! Database row types mapping directly to SQLite rows.
//! Distinct from the agora-types API models to keep the DB layer
//! independent; ids and timestamps stay TEXT here.

pub struct MemberRow {
    pub id: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub bio: String,
    pub birth_date: Option<String>,
    pub avatar: String,
    pub password: String,
    pub created_at: String,
    pub updated_at: String,
}

pub struct TokenRow {
    pub key: String,
    pub member_id: String,
    pub created_at: String,
}

/// Post row with query-time aggregated counters. The counters are
/// always computed projections, never stored columns.
pub struct PostRow {
    pub id: String,
    pub author_id: String,
    pub text: String,
    pub image: String,
    pub created_at: String,
    pub updated_at: String,
    pub likes_count: i64,
    pub comments_count: i64,
}

pub struct PostMediaRow {
    pub id: String,
    pub post_id: String,
    pub file: String,
    pub media_type: String,
    pub created_at: String,
}

pub struct CommentRow {
    pub id: String,
    pub post_id: String,
    pub author_id: String,
    pub text: String,
    pub parent_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub likes_count: i64,
}

#[derive(Debug)]
pub struct DialogRow {
    pub id: String,
    pub member_a_id: String,
    pub member_b_id: String,
    pub created_at: String,
}

#[derive(Debug)]
pub struct MessageRow {
    pub id: String,
    pub dialog_id: String,
    pub sender_id: String,
    pub text: String,
    pub image: String,
    pub is_read: bool,
    pub created_at: String,
}
