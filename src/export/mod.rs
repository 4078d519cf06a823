use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use crate::db::{AttendanceRecord, Database, Role};

/// Export format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExportFormat::Json => "JSON",
            ExportFormat::Csv => "CSV",
        }
    }

    /// Guess the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(|e| e.parse().ok())
    }
}

impl FromStr for ExportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(anyhow!("unknown export format '{}', expected json or csv", other)),
        }
    }
}

/// Export one day's attendance to a file. Returns the number of rows written.
pub fn export_attendance(
    db: &Database,
    date: NaiveDate,
    role: Option<Role>,
    output_path: &Path,
    format: ExportFormat,
) -> Result<usize> {
    let records = db.records_for_date(date, role)?;
    let count = records.len();

    let written = match format {
        ExportFormat::Json => export_json(&records, output_path),
        ExportFormat::Csv => export_csv(&records, output_path),
    };
    written.with_context(|| format!("Failed to write {} export to {}", format.name(), output_path.display()))?;

    tracing::info!(%date, count, path = %output_path.display(), "Exported attendance");
    Ok(count)
}

fn export_json(records: &[AttendanceRecord], output_path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(records)?;
    let mut file = File::create(output_path)?;
    file.write_all(json.as_bytes())?;
    Ok(())
}

fn export_csv(records: &[AttendanceRecord], output_path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(output_path)?;

    wtr.write_record([
        "person_id",
        "name",
        "role",
        "class_name",
        "date",
        "time",
        "status",
        "source",
        "confidence",
        "notes",
        "marked_by",
    ])?;

    for record in records {
        wtr.write_record([
            &record.person_id.to_string(),
            &record.name,
            record.role.as_str(),
            record.class_name.as_deref().unwrap_or(""),
            &record.date,
            &record.time,
            record.status.as_str(),
            record.source.as_str(),
            &record.confidence.map(|c| format!("{:.4}", c)).unwrap_or_default(),
            record.notes.as_deref().unwrap_or(""),
            record.marked_by.as_deref().unwrap_or(""),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}
