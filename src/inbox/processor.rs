use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::path::{Path, PathBuf};

use super::discovery::{discover_captures, FAILED_DIR, PROCESSED_DIR};
use super::hashing::hash_file;
use crate::attendance::{AttendanceService, FrameReport};
use crate::config::InboxConfig;
use crate::db::Database;
use crate::error::RollcallError;
use crate::faces::Capture;

/// Counters for one pass over the inbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InboxSummary {
    pub discovered: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub faces: usize,
    pub marked: usize,
}

enum CaptureOutcome {
    AlreadySeen,
    Processed(FrameReport),
    Unreadable,
}

pub struct InboxProcessor<'a> {
    db: &'a Database,
    service: &'a AttendanceService<'a>,
    config: &'a InboxConfig,
}

impl<'a> InboxProcessor<'a> {
    pub fn new(db: &'a Database, service: &'a AttendanceService<'a>, config: &'a InboxConfig) -> Self {
        Self { db, service, config }
    }

    /// Handle every capture currently in the inbox.
    ///
    /// A capture that fails is logged and counted; the pass carries on with
    /// the next one.
    pub fn run_once(&self, at: NaiveDateTime) -> Result<InboxSummary> {
        let root = &self.config.path;
        if !root.exists() {
            std::fs::create_dir_all(root)
                .with_context(|| format!("Failed to create inbox {}", root.display()))?;
        }

        let captures = discover_captures(root, &self.config.image_extensions)?;
        let mut summary = InboxSummary {
            discovered: captures.len(),
            ..InboxSummary::default()
        };

        for path in &captures {
            match self.process_capture(path, at) {
                Ok(CaptureOutcome::AlreadySeen) => summary.skipped += 1,
                Ok(CaptureOutcome::Processed(report)) => {
                    summary.processed += 1;
                    summary.faces += report.faces_found();
                    summary.marked += report.newly_marked();
                }
                Ok(CaptureOutcome::Unreadable) => summary.failed += 1,
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "Failed to process capture");
                    summary.failed += 1;
                }
            }
        }

        if summary.discovered > 0 {
            tracing::info!(
                discovered = summary.discovered,
                processed = summary.processed,
                skipped = summary.skipped,
                failed = summary.failed,
                marked = summary.marked,
                "Inbox pass complete"
            );
        }

        Ok(summary)
    }

    fn process_capture(&self, path: &Path, at: NaiveDateTime) -> Result<CaptureOutcome> {
        let sha256 = hash_file(path)?;

        if self.db.is_capture_processed(&sha256)? {
            tracing::debug!(path = %path.display(), "Capture already processed");
            self.move_into(path, PROCESSED_DIR, &sha256)?;
            return Ok(CaptureOutcome::AlreadySeen);
        }

        let capture = match Capture::from_path(path) {
            Ok(c) => c,
            Err(e) if e.downcast_ref::<RollcallError>().is_some() => {
                tracing::warn!(path = %path.display(), error = %e, "Unreadable capture");
                // Recorded so it is not decoded again when left in place
                self.db.mark_capture_processed(&sha256, &path.to_string_lossy(), 0, 0)?;
                self.move_into(path, FAILED_DIR, &sha256)?;
                return Ok(CaptureOutcome::Unreadable);
            }
            Err(e) => return Err(e),
        };

        let report = self.service.process_frame(&capture, None, at)?;

        self.db.mark_capture_processed(
            &sha256,
            &path.to_string_lossy(),
            report.faces_found(),
            report.newly_marked(),
        )?;
        self.move_into(path, PROCESSED_DIR, &sha256)?;

        tracing::info!(
            path = %path.display(),
            faces = report.faces_found(),
            marked = report.newly_marked(),
            unknown = report.unknown(),
            "Processed capture"
        );
        Ok(CaptureOutcome::Processed(report))
    }

    /// Move a capture under `<inbox>/<subdir>`, keeping its relative path.
    fn move_into(&self, path: &Path, subdir: &str, sha256: &str) -> Result<Option<PathBuf>> {
        if !self.config.move_processed {
            return Ok(None);
        }

        let root = &self.config.path;
        let relative = match path.strip_prefix(root) {
            Ok(r) => r.to_path_buf(),
            Err(_) => PathBuf::from(path.file_name().unwrap_or_default()),
        };

        let mut target = root.join(subdir).join(&relative);
        if target.exists() {
            let name = relative.file_name().unwrap_or_default().to_string_lossy();
            let prefix = &sha256[..sha256.len().min(12)];
            target.set_file_name(format!("{}-{}", prefix, name));
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::rename(path, &target)
            .with_context(|| format!("Failed to move {} to {}", path.display(), target.display()))?;

        Ok(Some(target))
    }
}
