//! Daily attendance rows: at most one per person per date.

use anyhow::Result;
use chrono::{NaiveDate, NaiveTime};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{Database, Role, DATE_FORMAT, TIME_FORMAT};
use crate::error::RollcallError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Leave,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Leave => "leave",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttendanceStatus {
    type Err = RollcallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "present" => Ok(AttendanceStatus::Present),
            "absent" => Ok(AttendanceStatus::Absent),
            "leave" => Ok(AttendanceStatus::Leave),
            other => Err(RollcallError::InvalidStatus(other.to_string())),
        }
    }
}

impl ToSql for AttendanceStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for AttendanceStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: RollcallError| FromSqlError::Other(Box::new(e)))
    }
}

/// How an attendance row came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkSource {
    Face,
    Manual,
}

impl MarkSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkSource::Face => "face",
            MarkSource::Manual => "manual",
        }
    }
}

impl ToSql for MarkSource {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for MarkSource {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "face" => Ok(MarkSource::Face),
            "manual" => Ok(MarkSource::Manual),
            other => Err(FromSqlError::Other(
                format!("unknown attendance source '{}'", other).into(),
            )),
        }
    }
}

/// Attendance row joined with the person it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceRecord {
    pub id: i64,
    pub person_id: i64,
    pub name: String,
    pub role: Role,
    pub class_name: Option<String>,
    pub date: String,
    pub time: String,
    pub status: AttendanceStatus,
    pub source: MarkSource,
    pub confidence: Option<f32>,
    pub notes: Option<String>,
    pub marked_by: Option<String>,
}

/// Outcome of an insert-once mark.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkResult {
    Marked(AttendanceRecord),
    AlreadyMarked(AttendanceRecord),
}

impl MarkResult {
    pub fn record(&self) -> &AttendanceRecord {
        match self {
            MarkResult::Marked(r) | MarkResult::AlreadyMarked(r) => r,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, MarkResult::Marked(_))
    }
}

/// A "present" mark to be written at most once per day.
#[derive(Debug, Clone)]
pub struct NewMark<'a> {
    pub person_id: i64,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub source: MarkSource,
    pub confidence: Option<f32>,
    pub notes: Option<&'a str>,
}

const RECORD_COLUMNS: &str = r#"
    a.id, a.person_id, p.name, p.role, p.class_name, a.date, a.time,
    a.status, a.source, a.confidence, a.notes, a.marked_by
"#;

fn record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    Ok(AttendanceRecord {
        id: row.get(0)?,
        person_id: row.get(1)?,
        name: row.get(2)?,
        role: row.get(3)?,
        class_name: row.get(4)?,
        date: row.get(5)?,
        time: row.get(6)?,
        status: row.get(7)?,
        source: row.get(8)?,
        confidence: row.get(9)?,
        notes: row.get(10)?,
        marked_by: row.get(11)?,
    })
}

impl Database {
    /// Mark a person present unless they already have a row for the date.
    ///
    /// The insert and the conflict check are one statement, so concurrent
    /// markers can never create a second row for the same day.
    pub fn mark_once(&self, mark: &NewMark<'_>) -> Result<MarkResult> {
        if self.get_person(mark.person_id)?.is_none() {
            return Err(RollcallError::PersonNotFound(mark.person_id).into());
        }

        let date = mark.date.format(DATE_FORMAT).to_string();
        let inserted = self.conn.execute(
            r#"
            INSERT INTO attendance (person_id, date, time, status, source, confidence, notes)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(person_id, date) DO NOTHING
            "#,
            params![
                mark.person_id,
                date,
                mark.time.format(TIME_FORMAT).to_string(),
                AttendanceStatus::Present,
                mark.source,
                mark.confidence,
                mark.notes,
            ],
        )?;

        let record = self
            .attendance_for(mark.person_id, mark.date)?
            .ok_or_else(|| anyhow::anyhow!("attendance row for person {} vanished", mark.person_id))?;

        if inserted > 0 {
            tracing::info!(person_id = mark.person_id, date = %date, "Marked present");
            Ok(MarkResult::Marked(record))
        } else {
            tracing::debug!(person_id = mark.person_id, date = %date, "Already marked");
            Ok(MarkResult::AlreadyMarked(record))
        }
    }

    /// Manually set a person's status for a date, replacing any earlier mark.
    pub fn set_status(
        &self,
        person_id: i64,
        date: NaiveDate,
        time: NaiveTime,
        status: AttendanceStatus,
        notes: Option<&str>,
        marked_by: Option<&str>,
    ) -> Result<AttendanceRecord> {
        if self.get_person(person_id)?.is_none() {
            return Err(RollcallError::PersonNotFound(person_id).into());
        }

        self.conn.execute(
            r#"
            INSERT INTO attendance (person_id, date, time, status, source, notes, marked_by)
            VALUES (?1, ?2, ?3, ?4, 'manual', ?5, ?6)
            ON CONFLICT(person_id, date) DO UPDATE SET
                time = excluded.time,
                status = excluded.status,
                source = 'manual',
                confidence = NULL,
                notes = excluded.notes,
                marked_by = excluded.marked_by
            "#,
            params![
                person_id,
                date.format(DATE_FORMAT).to_string(),
                time.format(TIME_FORMAT).to_string(),
                status,
                notes,
                marked_by,
            ],
        )?;

        tracing::info!(person_id, %date, %status, "Attendance status set");

        self.attendance_for(person_id, date)?
            .ok_or_else(|| anyhow::anyhow!("attendance row for person {} vanished", person_id))
    }

    pub fn attendance_for(&self, person_id: i64, date: NaiveDate) -> Result<Option<AttendanceRecord>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM attendance a
            JOIN people p ON p.id = a.person_id
            WHERE a.person_id = ?1 AND a.date = ?2
            "#,
            RECORD_COLUMNS
        );

        let record = self
            .conn
            .query_row(
                &sql,
                params![person_id, date.format(DATE_FORMAT).to_string()],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// All rows for a date, most recently marked first.
    pub fn records_for_date(&self, date: NaiveDate, role: Option<Role>) -> Result<Vec<AttendanceRecord>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM attendance a
            JOIN people p ON p.id = a.person_id
            WHERE a.date = ?1 AND (?2 IS NULL OR p.role = ?2)
            ORDER BY a.time DESC, a.id DESC
            "#,
            RECORD_COLUMNS
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(
                params![date.format(DATE_FORMAT).to_string(), role],
                record_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// A person's most recent rows, newest date first.
    pub fn history_for_person(&self, person_id: i64, limit: usize) -> Result<Vec<AttendanceRecord>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM attendance a
            JOIN people p ON p.id = a.person_id
            WHERE a.person_id = ?1
            ORDER BY a.date DESC
            LIMIT ?2
            "#,
            RECORD_COLUMNS
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![person_id, limit as i64], record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn face_mark(person_id: i64, date: NaiveDate, time: NaiveTime) -> NewMark<'static> {
        NewMark {
            person_id,
            date,
            time,
            source: MarkSource::Face,
            confidence: Some(0.8),
            notes: None,
        }
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("Present".parse::<AttendanceStatus>().unwrap(), AttendanceStatus::Present);
        assert_eq!("leave".parse::<AttendanceStatus>().unwrap(), AttendanceStatus::Leave);
        assert_eq!(
            "late".parse::<AttendanceStatus>(),
            Err(RollcallError::InvalidStatus("late".to_string()))
        );
    }

    #[test]
    fn test_concurrent_marks_from_two_connections() {
        use std::sync::{Arc, Barrier};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcall.db");
        let db = Database::open(&path).unwrap();
        db.initialize().unwrap();
        let ada = db.create_person("Ada", Role::Student, Some("5A")).unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|i| {
                let path = path.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    let conn = Database::open(&path).unwrap();
                    barrier.wait();
                    conn.mark_once(&face_mark(ada, day(4), at(8, i))).unwrap().is_new()
                })
            })
            .collect();

        let results: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|new| **new).count(), 1);
        assert_eq!(results.iter().filter(|new| !**new).count(), 1);
        assert_eq!(db.records_for_date(day(4), None).unwrap().len(), 1);
    }

    #[test]
    fn test_mark_once_per_day() {
        let db = test_db();
        let ada = db.create_person("Ada", Role::Student, Some("5A")).unwrap();

        let first = db.mark_once(&face_mark(ada, day(4), at(8, 5))).unwrap();
        assert!(first.is_new());
        assert_eq!(first.record().time, "08:05:00");
        assert_eq!(first.record().status, AttendanceStatus::Present);

        let second = db.mark_once(&face_mark(ada, day(4), at(9, 30))).unwrap();
        assert!(!second.is_new());
        // The first mark is kept untouched
        assert_eq!(second.record().time, "08:05:00");
        assert_eq!(second.record().id, first.record().id);

        let next_day = db.mark_once(&face_mark(ada, day(5), at(8, 0))).unwrap();
        assert!(next_day.is_new());
    }

    #[test]
    fn test_mark_unknown_person() {
        let db = test_db();
        let err = db.mark_once(&face_mark(7, day(4), at(8, 0))).unwrap_err();
        assert_eq!(
            err.downcast_ref::<RollcallError>(),
            Some(&RollcallError::PersonNotFound(7))
        );
    }

    #[test]
    fn test_set_status_overrides_face_mark() {
        let db = test_db();
        let ada = db.create_person("Ada", Role::Student, Some("5A")).unwrap();
        db.mark_once(&face_mark(ada, day(4), at(8, 5))).unwrap();

        let record = db
            .set_status(ada, day(4), at(10, 0), AttendanceStatus::Leave, Some("dentist"), Some("office"))
            .unwrap();
        assert_eq!(record.status, AttendanceStatus::Leave);
        assert_eq!(record.source, MarkSource::Manual);
        assert_eq!(record.confidence, None);
        assert_eq!(record.marked_by.as_deref(), Some("office"));

        // A later face mark does not undo the manual status
        let again = db.mark_once(&face_mark(ada, day(4), at(11, 0))).unwrap();
        assert_eq!(again.record().status, AttendanceStatus::Leave);
    }

    #[test]
    fn test_records_for_date() {
        let db = test_db();
        let ada = db.create_person("Ada", Role::Student, Some("5A")).unwrap();
        let bob = db.create_person("Bob", Role::Student, Some("5A")).unwrap();
        let grace = db.create_person("Grace", Role::Teacher, None).unwrap();

        db.mark_once(&face_mark(ada, day(4), at(8, 0))).unwrap();
        db.mark_once(&face_mark(bob, day(4), at(8, 10))).unwrap();
        db.mark_once(&face_mark(grace, day(4), at(7, 50))).unwrap();
        db.mark_once(&face_mark(ada, day(5), at(8, 0))).unwrap();

        let all: Vec<String> = db
            .records_for_date(day(4), None)
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(all, vec!["Bob", "Ada", "Grace"]);

        let teachers = db.records_for_date(day(4), Some(Role::Teacher)).unwrap();
        assert_eq!(teachers.len(), 1);
        assert_eq!(teachers[0].person_id, grace);

        assert!(db.records_for_date(day(6), None).unwrap().is_empty());
    }

    #[test]
    fn test_history_for_person() {
        let db = test_db();
        let ada = db.create_person("Ada", Role::Student, None).unwrap();
        for d in 1..=4 {
            db.mark_once(&face_mark(ada, day(d), at(8, 0))).unwrap();
        }

        let history = db.history_for_person(ada, 2).unwrap();
        let dates: Vec<&str> = history.iter().map(|r| r.date.as_str()).collect();
        assert_eq!(dates, vec!["2024-03-04", "2024-03-03"]);
    }
}
