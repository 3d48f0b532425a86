use super::OptionalExt;
use crate::models::{CommentRow, PostMediaRow, PostRow};
use crate::Database;
use anyhow::Result;
use rusqlite::Connection;

// Aggregated counters are computed per call as subquery projections
// so they can never drift from the underlying rows.
const POST_COLS: &str = "p.id, p.author_id, p.text, p.image, p.created_at, p.updated_at,
    (SELECT COUNT(*) FROM post_likes pl WHERE pl.post_id = p.id) AS likes_count,
    (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id) AS comments_count";

const COMMENT_COLS: &str = "c.id, c.post_id, c.author_id, c.text, c.parent_id, c.created_at, c.updated_at,
    (SELECT COUNT(*) FROM comment_likes cl WHERE cl.comment_id = c.id) AS likes_count";

fn map_post(row: &rusqlite::Row) -> rusqlite::Result<PostRow> {
    Ok(PostRow {
        id: row.get(0)?,
        author_id: row.get(1)?,
        text: row.get(2)?,
        image: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        likes_count: row.get(6)?,
        comments_count: row.get(7)?,
    })
}

fn map_comment(row: &rusqlite::Row) -> rusqlite::Result<CommentRow> {
    Ok(CommentRow {
        id: row.get(0)?,
        post_id: row.get(1)?,
        author_id: row.get(2)?,
        text: row.get(3)?,
        parent_id: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        likes_count: row.get(7)?,
    })
}

impl Database {
    // -- Posts --

    pub fn insert_post(&self, id: &str, author_id: &str, text: &str, image: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO posts (id, author_id, text, image) VALUES (?1, ?2, ?3, ?4)",
                (id, author_id, text, image),
            )?;
            Ok(())
        })
    }

    pub fn get_post(&self, id: &str) -> Result<Option<PostRow>> {
        self.with_conn(|conn| query_post(conn, id))
    }

    pub fn list_posts(&self, limit: u32, offset: u32) -> Result<Vec<PostRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {POST_COLS} FROM posts p
                 ORDER BY p.created_at DESC, p.rowid DESC
                 LIMIT ?1 OFFSET ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![limit, offset], map_post)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn list_posts_by_author(&self, author_id: &str, limit: u32, offset: u32) -> Result<Vec<PostRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {POST_COLS} FROM posts p
                 WHERE p.author_id = ?1
                 ORDER BY p.created_at DESC, p.rowid DESC
                 LIMIT ?2 OFFSET ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![author_id, limit, offset], map_post)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn update_post(&self, id: &str, text: &str, image: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE posts SET text = ?2, image = ?3, updated_at = datetime('now') WHERE id = ?1",
                (id, text, image),
            )?;
            Ok(changed > 0)
        })
    }

    /// Likes, comments and media go with the post via FK cascade.
    pub fn delete_post(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM posts WHERE id = ?1", [id])?;
            Ok(deleted > 0)
        })
    }

    // -- Post media --

    pub fn insert_post_media(&self, id: &str, post_id: &str, file: &str, media_type: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO post_media (id, post_id, file, media_type) VALUES (?1, ?2, ?3, ?4)",
                (id, post_id, file, media_type),
            )?;
            Ok(())
        })
    }

    /// Batch-fetch media rows for a set of post IDs.
    pub fn get_media_for_posts(&self, post_ids: &[String]) -> Result<Vec<PostMediaRow>> {
        if post_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=post_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT id, post_id, file, media_type, created_at FROM post_media
                 WHERE post_id IN ({})
                 ORDER BY created_at",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = post_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok(PostMediaRow {
                        id: row.get(0)?,
                        post_id: row.get(1)?,
                        file: row.get(2)?,
                        media_type: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Likes --

    /// Toggle a post like: removes if present, inserts if not.
    /// Returns true when the like now exists.
    pub fn toggle_post_like(&self, id: &str, member_id: &str, post_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            toggle_like(conn, "post_likes", "post_id", id, member_id, post_id)
        })
    }

    pub fn toggle_comment_like(&self, id: &str, member_id: &str, comment_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            toggle_like(conn, "comment_likes", "comment_id", id, member_id, comment_id)
        })
    }

    // -- Comments --

    pub fn insert_comment(
        &self,
        id: &str,
        post_id: &str,
        author_id: &str,
        text: &str,
        parent_id: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO comments (id, post_id, author_id, text, parent_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, post_id, author_id, text, parent_id],
            )?;
            Ok(())
        })
    }

    pub fn get_comment(&self, id: &str) -> Result<Option<CommentRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {COMMENT_COLS} FROM comments c WHERE c.id = ?1");
            conn.query_row(&sql, [id], map_comment).optional()
        })
    }

    /// All comments of a post, oldest first; the caller groups replies
    /// under their parents.
    pub fn list_comments_for_post(&self, post_id: &str) -> Result<Vec<CommentRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {COMMENT_COLS} FROM comments c
                 WHERE c.post_id = ?1
                 ORDER BY c.created_at, c.rowid"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([post_id], map_comment)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn update_comment(&self, id: &str, text: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE comments SET text = ?2, updated_at = datetime('now') WHERE id = ?1",
                (id, text),
            )?;
            Ok(changed > 0)
        })
    }

    pub fn delete_comment(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM comments WHERE id = ?1", [id])?;
            Ok(deleted > 0)
        })
    }
}

fn query_post(conn: &Connection, id: &str) -> Result<Option<PostRow>> {
    let sql = format!("SELECT {POST_COLS} FROM posts p WHERE p.id = ?1");
    conn.query_row(&sql, [id], map_post).optional()
}

fn toggle_like(
    conn: &mut Connection,
    table: &str,
    target_col: &str,
    id: &str,
    member_id: &str,
    target_id: &str,
) -> Result<bool> {
    let tx = conn.transaction()?;

    let existing: Option<String> = tx
        .query_row(
            &format!("SELECT id FROM {table} WHERE member_id = ?1 AND {target_col} = ?2"),
            (member_id, target_id),
            |row| row.get(0),
        )
        .optional()?;

    let liked = if let Some(existing_id) = existing {
        tx.execute(&format!("DELETE FROM {table} WHERE id = ?1"), [&existing_id])?;
        false
    } else {
        tx.execute(
            &format!("INSERT INTO {table} (id, member_id, {target_col}) VALUES (?1, ?2, ?3)"),
            (id, member_id, target_id),
        )?;
        true
    };

    tx.commit()?;
    Ok(liked)
}

#[cfg(test)]
mod tests {
    use crate::Database;
    use uuid::Uuid;

    fn member(db: &Database, username: &str) -> String {
        let id = Uuid::new_v4().to_string();
        db.create_member(&id, username, "Test", "User", "", None, "", "hash")
            .unwrap();
        id
    }

    fn post(db: &Database, author_id: &str) -> String {
        let id = Uuid::new_v4().to_string();
        db.insert_post(&id, author_id, "hello", "").unwrap();
        id
    }

    #[test]
    fn post_like_toggles_and_counts() {
        let db = Database::open_in_memory().unwrap();
        let alice = member(&db, "alice");
        let bob = member(&db, "bob");
        let post_id = post(&db, &alice);

        assert!(db
            .toggle_post_like(&Uuid::new_v4().to_string(), &bob, &post_id)
            .unwrap());
        assert_eq!(db.get_post(&post_id).unwrap().unwrap().likes_count, 1);

        // Second toggle removes the like.
        assert!(!db
            .toggle_post_like(&Uuid::new_v4().to_string(), &bob, &post_id)
            .unwrap());
        assert_eq!(db.get_post(&post_id).unwrap().unwrap().likes_count, 0);

        assert!(db
            .toggle_post_like(&Uuid::new_v4().to_string(), &bob, &post_id)
            .unwrap());
        assert_eq!(db.get_post(&post_id).unwrap().unwrap().likes_count, 1);
    }

    #[test]
    fn comment_like_toggles_and_counts() {
        let db = Database::open_in_memory().unwrap();
        let alice = member(&db, "alice");
        let bob = member(&db, "bob");
        let post_id = post(&db, &alice);

        let comment_id = Uuid::new_v4().to_string();
        db.insert_comment(&comment_id, &post_id, &bob, "nice", None)
            .unwrap();

        assert!(db
            .toggle_comment_like(&Uuid::new_v4().to_string(), &alice, &comment_id)
            .unwrap());
        assert_eq!(
            db.get_comment(&comment_id).unwrap().unwrap().likes_count,
            1
        );

        assert!(!db
            .toggle_comment_like(&Uuid::new_v4().to_string(), &alice, &comment_id)
            .unwrap());
        assert_eq!(
            db.get_comment(&comment_id).unwrap().unwrap().likes_count,
            0
        );
    }

    #[test]
    fn likes_are_counted_per_member() {
        let db = Database::open_in_memory().unwrap();
        let alice = member(&db, "alice");
        let bob = member(&db, "bob");
        let post_id = post(&db, &alice);

        db.toggle_post_like(&Uuid::new_v4().to_string(), &alice, &post_id)
            .unwrap();
        db.toggle_post_like(&Uuid::new_v4().to_string(), &bob, &post_id)
            .unwrap();
        assert_eq!(db.get_post(&post_id).unwrap().unwrap().likes_count, 2);

        // Bob unliking leaves Alice's like in place.
        db.toggle_post_like(&Uuid::new_v4().to_string(), &bob, &post_id)
            .unwrap();
        assert_eq!(db.get_post(&post_id).unwrap().unwrap().likes_count, 1);
    }
}
