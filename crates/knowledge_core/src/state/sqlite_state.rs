use super::{LocalStateRepository, LocalStateResult};
use crate::db::ensure_migrated;
use log::debug;
use rusqlite::{params, Connection, OptionalExtension};

/// Local state stored in the `local_state` table.
pub struct SqliteLocalStateRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteLocalStateRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> LocalStateResult<Self> {
        ensure_migrated(conn)?;
        Ok(Self { conn })
    }
}

impl LocalStateRepository for SqliteLocalStateRepository<'_> {
    fn get(&self, key: &str) -> LocalStateResult<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT state_value FROM local_state WHERE state_key = ?1;",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> LocalStateResult<()> {
        self.conn.execute(
            "INSERT INTO local_state (state_key, state_value)
             VALUES (?1, ?2)
             ON CONFLICT(state_key) DO UPDATE SET
                state_value = excluded.state_value,
                updated_at = (strftime('%s', 'now') * 1000);",
            params![key, value],
        )?;
        debug!("event=local_state_set module=state status=ok key={key}");
        Ok(())
    }

    fn remove(&self, key: &str) -> LocalStateResult<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM local_state WHERE state_key = ?1;", [key])?;
        Ok(removed > 0)
    }
}
