use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- Members --

/// Full profile of a member. Never carries the password hash.
#[derive(Debug, Clone, Serialize)]
pub struct MemberProfile {
    pub id: Uuid,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub bio: String,
    pub birth_date: Option<NaiveDate>,
    pub avatar: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Compact member representation used in lists, search results and
/// embedded author/participant fields.
#[derive(Debug, Clone, Serialize)]
pub struct MemberSummary {
    pub id: Uuid,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar: String,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    #[serde(default)]
    pub avatar: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Token plus owning member, returned by both register and login.
#[derive(Debug, Serialize)]
pub struct AuthTokenResponse {
    pub token: String,
    pub member: MemberProfile,
}

/// Full-replace profile update (PUT). Names are required; omitted
/// optional fields are reset to their defaults.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemberReplaceRequest {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    #[serde(default)]
    pub avatar: String,
}

/// Partial profile update (PATCH). Only supplied fields change.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemberUpdateRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
    pub birth_date: Option<Option<NaiveDate>>,
    pub avatar: Option<String>,
}

// -- Subscriptions --

#[derive(Debug, Serialize)]
pub struct FollowResponse {
    pub following: bool,
    pub detail: String,
}

// -- Posts --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MediaAttachment {
    pub file: String,
    pub media_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreatePostRequest {
    pub text: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub media: Vec<MediaAttachment>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdatePostRequest {
    pub text: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostMediaResponse {
    pub id: Uuid,
    pub file: String,
    pub media_type: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct PostResponse {
    pub id: Uuid,
    pub author: MemberSummary,
    pub text: String,
    pub image: String,
    pub media: Vec<PostMediaResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub likes_count: i64,
    pub comments_count: i64,
}

#[derive(Debug, Serialize)]
pub struct LikeResponse {
    pub liked: bool,
}

// -- Comments --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateCommentRequest {
    pub text: String,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateCommentRequest {
    pub text: String,
}

/// Comment with one level of nested replies. Replies carry an empty
/// `replies` list themselves to avoid unbounded recursion in views.
#[derive(Debug, Serialize)]
pub struct CommentResponse {
    pub id: Uuid,
    pub post_id: Uuid,
    pub author: MemberSummary,
    pub text: String,
    pub parent_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub likes_count: i64,
    pub replies: Vec<CommentResponse>,
}

// -- Dialogs / messages --

#[derive(Debug, Serialize)]
pub struct DialogResponse {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub other_member: MemberSummary,
    pub last_message: Option<MessageResponse>,
    pub unread_count: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub image: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub dialog_id: Uuid,
    pub sender: MemberSummary,
    pub text: String,
    pub image: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct MarkAllReadResponse {
    pub updated_count: u64,
}

// -- Misc --

#[derive(Debug, Serialize)]
pub struct HelloResponse {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct DetailResponse {
    pub detail: String,
}
