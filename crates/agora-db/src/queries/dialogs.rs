use super::OptionalExt;
use crate::models::{DialogRow, MessageRow};
use crate::Database;
use anyhow::Result;
use rusqlite::Connection;

const DIALOG_COLS: &str = "id, member_a_id, member_b_id, created_at";
const MESSAGE_COLS: &str = "id, dialog_id, sender_id, text, image, is_read, created_at";

fn map_dialog(row: &rusqlite::Row) -> rusqlite::Result<DialogRow> {
    Ok(DialogRow {
        id: row.get(0)?,
        member_a_id: row.get(1)?,
        member_b_id: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn map_message(row: &rusqlite::Row) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        dialog_id: row.get(1)?,
        sender_id: row.get(2)?,
        text: row.get(3)?,
        image: row.get(4)?,
        is_read: row.get(5)?,
        created_at: row.get(6)?,
    })
}

impl Database {
    // -- Dialogs --

    /// Transactional get-or-create for the canonical pair. The caller
    /// must pass `member_a_id < member_b_id`; the unique constraint on
    /// the pair is the backstop against concurrent first contact, so a
    /// losing insert simply falls through to the select.
    pub fn get_or_create_dialog(
        &self,
        id: &str,
        member_a_id: &str,
        member_b_id: &str,
    ) -> Result<(DialogRow, bool)> {
        debug_assert!(member_a_id < member_b_id);

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let inserted = tx.execute(
                "INSERT INTO dialogs (id, member_a_id, member_b_id)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(member_a_id, member_b_id) DO NOTHING",
                (id, member_a_id, member_b_id),
            )?;

            let sql = format!(
                "SELECT {DIALOG_COLS} FROM dialogs WHERE member_a_id = ?1 AND member_b_id = ?2"
            );
            let dialog = tx.query_row(&sql, (member_a_id, member_b_id), map_dialog)?;

            tx.commit()?;
            Ok((dialog, inserted > 0))
        })
    }

    pub fn get_dialog(&self, id: &str) -> Result<Option<DialogRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {DIALOG_COLS} FROM dialogs WHERE id = ?1");
            conn.query_row(&sql, [id], map_dialog).optional()
        })
    }

    /// Dialogs where the member occupies either canonical slot,
    /// newest-created first.
    pub fn list_dialogs_for_member(&self, member_id: &str) -> Result<Vec<DialogRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {DIALOG_COLS} FROM dialogs
                 WHERE member_a_id = ?1 OR member_b_id = ?1
                 ORDER BY created_at DESC, rowid DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([member_id], map_dialog)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    /// Append a message and return the stored row (for the DB-assigned
    /// timestamp). New messages are always unread.
    pub fn insert_message(
        &self,
        id: &str,
        dialog_id: &str,
        sender_id: &str,
        text: &str,
        image: &str,
    ) -> Result<MessageRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, dialog_id, sender_id, text, image)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, dialog_id, sender_id, text, image],
            )?;
            let sql = format!("SELECT {MESSAGE_COLS} FROM messages WHERE id = ?1");
            let row = conn.query_row(&sql, [id], map_message)?;
            Ok(row)
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {MESSAGE_COLS} FROM messages WHERE id = ?1");
            conn.query_row(&sql, [id], map_message).optional()
        })
    }

    /// Forward-chronological page; rowid breaks timestamp ties so the
    /// order matches insertion order.
    pub fn list_messages(&self, dialog_id: &str, limit: u32, offset: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLS} FROM messages
                 WHERE dialog_id = ?1
                 ORDER BY created_at, rowid
                 LIMIT ?2 OFFSET ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![dialog_id, limit, offset], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn last_message(&self, dialog_id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLS} FROM messages
                 WHERE dialog_id = ?1
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT 1"
            );
            conn.query_row(&sql, [dialog_id], map_message).optional()
        })
    }

    /// Flip one message to read. Idempotent: returns false when the
    /// flag was already set.
    pub fn mark_message_read(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET is_read = 1 WHERE id = ?1 AND is_read = 0",
                [id],
            )?;
            Ok(changed > 0)
        })
    }

    /// One atomic UPDATE over the reader's unread incoming messages.
    /// Returns the number of rows actually changed.
    pub fn mark_dialog_read(&self, dialog_id: &str, reader_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET is_read = 1
                 WHERE dialog_id = ?1 AND sender_id <> ?2 AND is_read = 0",
                (dialog_id, reader_id),
            )?;
            Ok(changed as u64)
        })
    }

    /// Unread messages addressed to the viewer, computed per call.
    pub fn unread_count(&self, dialog_id: &str, viewer_id: &str) -> Result<i64> {
        self.with_conn(|conn| count_unread(conn, dialog_id, viewer_id))
    }
}

fn count_unread(conn: &Connection, dialog_id: &str, viewer_id: &str) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM messages
         WHERE dialog_id = ?1 AND is_read = 0 AND sender_id <> ?2",
        (dialog_id, viewer_id),
        |row| row.get(0),
    )?;
    Ok(count)
}
