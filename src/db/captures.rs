//! Bookkeeping for inbox captures the daemon has already handled.

use anyhow::Result;
use rusqlite::params;

use super::Database;

impl Database {
    pub fn is_capture_processed(&self, sha256: &str) -> Result<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM processed_captures WHERE sha256 = ?)",
            [sha256],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Record a capture as handled. Re-recording the same content is a no-op.
    pub fn mark_capture_processed(
        &self,
        sha256: &str,
        path: &str,
        faces_found: usize,
        marked: usize,
    ) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO processed_captures (sha256, path, faces_found, marked)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(sha256) DO NOTHING
            "#,
            params![sha256, path, faces_found as i64, marked as i64],
        )?;
        Ok(())
    }

    pub fn count_processed_captures(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM processed_captures", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use crate::db::test_db;

    #[test]
    fn test_mark_capture_processed() {
        let db = test_db();
        assert!(!db.is_capture_processed("abc").unwrap());

        db.mark_capture_processed("abc", "/inbox/a.jpg", 2, 1).unwrap();
        assert!(db.is_capture_processed("abc").unwrap());

        // Same content under another name
        db.mark_capture_processed("abc", "/inbox/copy.jpg", 2, 0).unwrap();
        assert_eq!(db.count_processed_captures().unwrap(), 1);
    }
}
