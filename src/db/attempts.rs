use anyhow::Result;
use chrono::{Duration, NaiveDateTime};
use rusqlite::params;
use serde::Serialize;

use super::{round2, Database, TIMESTAMP_FORMAT};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionStats {
    pub days: u32,
    pub total_attempts: i64,
    pub successful: i64,
    pub success_rate: f64,
}

impl Database {
    /// Log one recognition attempt, matched or not.
    pub fn record_attempt(
        &self,
        person_id: Option<i64>,
        confidence: Option<f32>,
        matched: bool,
        notes: Option<&str>,
        at: NaiveDateTime,
    ) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO recognition_attempts (person_id, confidence, matched, attempted_at, notes)
            VALUES (?, ?, ?, ?, ?)
            "#,
            params![
                person_id,
                confidence,
                matched,
                at.format(TIMESTAMP_FORMAT).to_string(),
                notes
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Share of attempts in the last `days` days that matched someone.
    pub fn recognition_success_rate(&self, days: u32, now: NaiveDateTime) -> Result<RecognitionStats> {
        // A window reaching past the calendar covers every attempt
        let since = Duration::try_days(i64::from(days))
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(NaiveDateTime::MIN);

        let (total_attempts, successful): (i64, i64) = self.conn.query_row(
            r#"
            SELECT COUNT(*), COALESCE(SUM(matched), 0)
            FROM recognition_attempts
            WHERE attempted_at >= ?
            "#,
            [since.format(TIMESTAMP_FORMAT).to_string()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let success_rate = if total_attempts > 0 {
            round2(successful as f64 * 100.0 / total_attempts as f64)
        } else {
            0.0
        };

        Ok(RecognitionStats {
            days,
            total_attempts,
            successful,
            success_rate,
        })
    }
}
