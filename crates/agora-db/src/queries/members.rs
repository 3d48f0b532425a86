use super::{map_member, OptionalExt, MEMBER_COLS};
use crate::models::{MemberRow, TokenRow};
use crate::Database;
use anyhow::Result;
use rusqlite::Connection;

impl Database {
    // -- Members --

    #[allow(clippy::too_many_arguments)]
    pub fn create_member(
        &self,
        id: &str,
        username: &str,
        first_name: &str,
        last_name: &str,
        bio: &str,
        birth_date: Option<&str>,
        avatar: &str,
        password_hash: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO members (id, username, first_name, last_name, bio, birth_date, avatar, password)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![id, username, first_name, last_name, bio, birth_date, avatar, password_hash],
            )?;
            Ok(())
        })
    }

    pub fn get_member_by_id(&self, id: &str) -> Result<Option<MemberRow>> {
        self.with_conn(|conn| query_member(conn, "id = ?1", id))
    }

    /// Username lookup is case-insensitive (NOCASE collation on the column).
    pub fn get_member_by_username(&self, username: &str) -> Result<Option<MemberRow>> {
        self.with_conn(|conn| query_member(conn, "username = ?1", username))
    }

    pub fn update_member(
        &self,
        id: &str,
        first_name: &str,
        last_name: &str,
        bio: &str,
        birth_date: Option<&str>,
        avatar: &str,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE members
                 SET first_name = ?2, last_name = ?3, bio = ?4, birth_date = ?5, avatar = ?6,
                     updated_at = datetime('now')
                 WHERE id = ?1",
                rusqlite::params![id, first_name, last_name, bio, birth_date, avatar],
            )?;
            Ok(changed > 0)
        })
    }

    /// Substring search over username and name fields. LIKE is
    /// case-insensitive for ASCII in SQLite.
    pub fn search_members(&self, query: &str) -> Result<Vec<MemberRow>> {
        let pattern = format!(
            "%{}%",
            query
                .replace('\\', "\\\\")
                .replace('%', "\\%")
                .replace('_', "\\_")
        );
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MEMBER_COLS} FROM members
                 WHERE username LIKE ?1 ESCAPE '\\'
                    OR first_name LIKE ?1 ESCAPE '\\'
                    OR last_name LIKE ?1 ESCAPE '\\'
                 ORDER BY username"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([&pattern], map_member)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Tokens --

    pub fn create_token(&self, key: &str, member_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO auth_tokens (key, member_id) VALUES (?1, ?2)",
                (key, member_id),
            )?;
            Ok(())
        })
    }

    /// Oldest existing token for a member, reused at login when present.
    pub fn find_token_for_member(&self, member_id: &str) -> Result<Option<TokenRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT key, member_id, created_at FROM auth_tokens
                 WHERE member_id = ?1 ORDER BY created_at LIMIT 1",
                [member_id],
                |row| {
                    Ok(TokenRow {
                        key: row.get(0)?,
                        member_id: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                },
            )
            .optional()
        })
    }

    /// Resolve a bearer token to its owning member in one join.
    pub fn get_member_by_token(&self, key: &str) -> Result<Option<MemberRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM members m
                 JOIN auth_tokens t ON t.member_id = m.id
                 WHERE t.key = ?1",
                member_cols_prefixed()
            );
            conn.query_row(&sql, [key], map_member).optional()
        })
    }

    pub fn delete_token(&self, key: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM auth_tokens WHERE key = ?1", [key])?;
            Ok(deleted > 0)
        })
    }

    // -- Subscriptions --

    /// Idempotent follow: the unique constraint on (follower, following)
    /// absorbs duplicates. Returns true when a new edge was created.
    pub fn create_subscription(&self, id: &str, follower_id: &str, following_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO subscriptions (id, follower_id, following_id)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(follower_id, following_id) DO NOTHING",
                (id, follower_id, following_id),
            )?;
            Ok(inserted > 0)
        })
    }

    /// Returns true when an edge existed and was removed.
    pub fn delete_subscription(&self, follower_id: &str, following_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM subscriptions WHERE follower_id = ?1 AND following_id = ?2",
                (follower_id, following_id),
            )?;
            Ok(deleted > 0)
        })
    }

    pub fn list_following(&self, member_id: &str) -> Result<Vec<MemberRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM members m
                 JOIN subscriptions s ON s.following_id = m.id
                 WHERE s.follower_id = ?1
                 ORDER BY s.created_at",
                member_cols_prefixed()
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([member_id], map_member)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn list_followers(&self, member_id: &str) -> Result<Vec<MemberRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM members m
                 JOIN subscriptions s ON s.follower_id = m.id
                 WHERE s.following_id = ?1
                 ORDER BY s.created_at",
                member_cols_prefixed()
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([member_id], map_member)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Batch member fetch used when assembling list views.
    pub fn get_members_by_ids(&self, ids: &[String]) -> Result<Vec<MemberRow>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT {MEMBER_COLS} FROM members WHERE id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> =
                ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();

            let rows = stmt
                .query_map(params.as_slice(), map_member)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn member_cols_prefixed() -> String {
    MEMBER_COLS
        .split(", ")
        .map(|c| format!("m.{c}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn query_member(conn: &Connection, predicate: &str, value: &str) -> Result<Option<MemberRow>> {
    let sql = format!("SELECT {MEMBER_COLS} FROM members WHERE {predicate}");
    let mut stmt = conn.prepare(&sql)?;
    let row = stmt.query_row([value], map_member).optional()?;
    Ok(row)
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

    #[test]
    fn username_uniqueness_is_case_insensitive() {
        let db = Database::open_in_memory().unwrap();
        member(&db, "Alice");

        let dup = db.create_member(
            &Uuid::new_v4().to_string(),
            "alice",
            "Other",
            "User",
            "",
            None,
            "",
            "hash",
        );
        assert!(dup.is_err());

        let found = db.get_member_by_username("ALICE").unwrap();
        assert!(found.is_some());
    }

    #[test]
    fn token_resolves_to_owning_member() {
        let db = Database::open_in_memory().unwrap();
        let alice = member(&db, "alice");
        db.create_token("deadbeef", &alice).unwrap();

        let resolved = db.get_member_by_token("deadbeef").unwrap().unwrap();
        assert_eq!(resolved.id, alice);
        assert!(db.get_member_by_token("unknown").unwrap().is_none());

        assert!(db.delete_token("deadbeef").unwrap());
        assert!(!db.delete_token("deadbeef").unwrap());
        assert!(db.get_member_by_token("deadbeef").unwrap().is_none());
    }

    #[test]
    fn follow_is_idempotent_and_self_follow_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let alice = member(&db, "alice");
        let bob = member(&db, "bob");

        assert!(db
            .create_subscription(&Uuid::new_v4().to_string(), &alice, &bob)
            .unwrap());
        // Second follow is absorbed by the unique constraint.
        assert!(!db
            .create_subscription(&Uuid::new_v4().to_string(), &alice, &bob)
            .unwrap());

        // CHECK constraint backstops the handler-level self-follow guard.
        assert!(db
            .create_subscription(&Uuid::new_v4().to_string(), &alice, &alice)
            .is_err());

        let following = db.list_following(&alice).unwrap();
        assert_eq!(following.len(), 1);
        assert_eq!(following[0].id, bob);

        assert!(db.delete_subscription(&alice, &bob).unwrap());
        assert!(!db.delete_subscription(&alice, &bob).unwrap());
    }

    #[test]
    fn search_matches_username_and_names() {
        let db = Database::open_in_memory().unwrap();
        let id = Uuid::new_v4().to_string();
        db.create_member(&id, "wanderer", "Greta", "Stone", "", None, "", "hash")
            .unwrap();

        assert_eq!(db.search_members("wand").unwrap().len(), 1);
        assert_eq!(db.search_members("GRETA").unwrap().len(), 1);
        assert_eq!(db.search_members("stone").unwrap().len(), 1);
        assert!(db.search_members("nobody").unwrap().is_empty());
    }
}
