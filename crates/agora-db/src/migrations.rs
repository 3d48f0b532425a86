use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS members (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE COLLATE NOCASE,
            first_name  TEXT NOT NULL,
            last_name   TEXT NOT NULL,
            bio         TEXT NOT NULL DEFAULT '',
            birth_date  TEXT,
            avatar      TEXT NOT NULL DEFAULT '',
            password    TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS auth_tokens (
            key         TEXT PRIMARY KEY,
            member_id   TEXT NOT NULL REFERENCES members(id) ON DELETE CASCADE,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_auth_tokens_member
            ON auth_tokens(member_id);

        CREATE TABLE IF NOT EXISTS posts (
            id          TEXT PRIMARY KEY,
            author_id   TEXT NOT NULL REFERENCES members(id) ON DELETE CASCADE,
            text        TEXT NOT NULL,
            image       TEXT NOT NULL DEFAULT '',
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_posts_author
            ON posts(author_id, created_at);

        CREATE TABLE IF NOT EXISTS post_media (
            id          TEXT PRIMARY KEY,
            post_id     TEXT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
            file        TEXT NOT NULL,
            media_type  TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_post_media_post
            ON post_media(post_id);

        CREATE TABLE IF NOT EXISTS post_likes (
            id          TEXT PRIMARY KEY,
            member_id   TEXT NOT NULL REFERENCES members(id) ON DELETE CASCADE,
            post_id     TEXT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(member_id, post_id)
        );

        CREATE TABLE IF NOT EXISTS comments (
            id          TEXT PRIMARY KEY,
            post_id     TEXT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
            author_id   TEXT NOT NULL REFERENCES members(id) ON DELETE CASCADE,
            text        TEXT NOT NULL,
            parent_id   TEXT REFERENCES comments(id) ON DELETE CASCADE,
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_comments_post
            ON comments(post_id, created_at);

        CREATE TABLE IF NOT EXISTS comment_likes (
            id          TEXT PRIMARY KEY,
            member_id   TEXT NOT NULL REFERENCES members(id) ON DELETE CASCADE,
            comment_id  TEXT NOT NULL REFERENCES comments(id) ON DELETE CASCADE,
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(member_id, comment_id)
        );

        CREATE TABLE IF NOT EXISTS subscriptions (
            id           TEXT PRIMARY KEY,
            follower_id  TEXT NOT NULL REFERENCES members(id) ON DELETE CASCADE,
            following_id TEXT NOT NULL REFERENCES members(id) ON DELETE CASCADE,
            created_at   TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(follower_id, following_id),
            CHECK(follower_id <> following_id)
        );

        -- Canonical unordered pair: member_a_id < member_b_id always,
        -- so (A,B) and (B,A) collapse to one row.
        CREATE TABLE IF NOT EXISTS dialogs (
            id           TEXT PRIMARY KEY,
            member_a_id  TEXT NOT NULL REFERENCES members(id) ON DELETE CASCADE,
            member_b_id  TEXT NOT NULL REFERENCES members(id) ON DELETE CASCADE,
            created_at   TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(member_a_id, member_b_id),
            CHECK(member_a_id < member_b_id)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            dialog_id   TEXT NOT NULL REFERENCES dialogs(id) ON DELETE CASCADE,
            sender_id   TEXT NOT NULL REFERENCES members(id) ON DELETE CASCADE,
            text        TEXT NOT NULL DEFAULT '',
            image       TEXT NOT NULL DEFAULT '',
            is_read     INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_dialog
            ON messages(dialog_id, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
