mod dialogs;
mod members;
mod social;

use crate::models::MemberRow;
use anyhow::Result;

pub(crate) const MEMBER_COLS: &str =
    "id, username, first_name, last_name, bio, birth_date, avatar, password, created_at, updated_at";

pub(crate) fn map_member(row: &rusqlite::Row) -> rusqlite::Result<MemberRow> {
    Ok(MemberRow {
        id: row.get(0)?,
        username: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        bio: row.get(4)?,
        birth_date: row.get(5)?,
        avatar: row.get(6)?,
        password: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
