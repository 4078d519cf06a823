//! Enrollment and face-based attendance marking.
//!
//! `AttendanceService` glues the face encoder, the cached gallery and the
//! database together. Every recognition is logged as an attempt, and a
//! matched person is marked present at most once per day.

use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::config::RecognitionConfig;
use crate::db::{
    AttendanceRecord, AttendanceStatus, Database, MarkResult, MarkSource, NewMark, Person, Role,
};
use crate::error::{validate_tolerance, RollcallError};
use crate::faces::{require_single_face, BoundingBox, Capture, DetectedFace, FaceEncoder, GalleryCache, Match};

/// Who is being enrolled.
#[derive(Debug, Clone)]
pub struct EnrollRequest {
    pub name: String,
    pub role: Role,
    pub class_name: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Enrollment {
    pub person: Person,
    pub embedding_id: i64,
    /// Previously active embeddings that this enrollment replaced.
    pub replaced: usize,
    pub detection_confidence: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Recognition {
    pub bbox: BoundingBox,
    /// Everyone within tolerance, best first.
    pub matches: Vec<Match>,
    /// Distance to the closest enrolled face, matched or not.
    pub nearest_distance: Option<f32>,
}

impl Recognition {
    pub fn best(&self) -> Option<&Match> {
        self.matches.first()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MarkOutcome {
    Marked {
        record: AttendanceRecord,
        distance: f32,
    },
    AlreadyMarked {
        record: AttendanceRecord,
        distance: f32,
    },
    NotRecognized {
        best_distance: Option<f32>,
    },
}

impl MarkOutcome {
    pub fn is_new_mark(&self) -> bool {
        matches!(self, MarkOutcome::Marked { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameFace {
    pub bbox: BoundingBox,
    pub detection_confidence: f32,
    #[serde(flatten)]
    pub outcome: MarkOutcome,
}

/// Result of matching every face in one frame.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FrameReport {
    pub faces: Vec<FrameFace>,
}

impl FrameReport {
    pub fn faces_found(&self) -> usize {
        self.faces.len()
    }

    pub fn newly_marked(&self) -> usize {
        self.faces.iter().filter(|f| f.outcome.is_new_mark()).count()
    }

    pub fn unknown(&self) -> usize {
        self.faces
            .iter()
            .filter(|f| matches!(f.outcome, MarkOutcome::NotRecognized { .. }))
            .count()
    }
}

pub struct AttendanceService<'a> {
    db: &'a Database,
    encoder: &'a dyn FaceEncoder,
    cache: &'a GalleryCache,
    tolerance: f32,
    duplicate_tolerance: f32,
}

impl<'a> AttendanceService<'a> {
    pub fn new(
        db: &'a Database,
        encoder: &'a dyn FaceEncoder,
        cache: &'a GalleryCache,
        config: &RecognitionConfig,
    ) -> Result<Self, RollcallError> {
        Ok(Self {
            db,
            encoder,
            cache,
            tolerance: validate_tolerance(config.tolerance)?,
            duplicate_tolerance: validate_tolerance(config.duplicate_tolerance)?,
        })
    }

    fn tolerance_or_default(&self, tolerance: Option<f32>) -> Result<f32, RollcallError> {
        match tolerance {
            Some(t) => validate_tolerance(t),
            None => Ok(self.tolerance),
        }
    }

    fn single_face(&self, capture: &Capture) -> Result<DetectedFace> {
        let faces = self.encoder.encode(capture.image())?;
        Ok(require_single_face(faces)?)
    }

    /// Enroll (or re-enroll) the single face in `capture`.
    ///
    /// Refused when the face is already within the duplicate tolerance of a
    /// different person's active embedding. Otherwise the person's earlier
    /// embeddings are deactivated and replaced by this one.
    pub fn enroll(&self, request: &EnrollRequest, capture: &Capture) -> Result<Enrollment> {
        let face = self.single_face(capture)?;
        let class_name = request.class_name.as_deref();

        let existing = self.db.find_person(&request.name, request.role, class_name)?;
        let gallery = self.cache.get(self.db)?;
        let nearest = match &existing {
            Some(person) => gallery.nearest_other_person(&face.embedding, person.id),
            None => gallery.nearest(&face.embedding, None),
        };

        if let Some(other) = nearest.filter(|m| m.distance <= self.duplicate_tolerance) {
            tracing::warn!(
                name = %request.name,
                existing_person = other.entry.person_id,
                distance = other.distance,
                "Face already enrolled for another person"
            );
            return Err(RollcallError::AlreadyEnrolled {
                person_id: other.entry.person_id,
                name: other.entry.name,
                distance: other.distance,
            }
            .into());
        }

        let notes = request.notes.as_deref();
        let (person_id, embedding_id, replaced) = match existing {
            Some(person) => {
                let replaced = self
                    .db
                    .embeddings_for_person(person.id)?
                    .iter()
                    .filter(|e| e.is_active)
                    .count();
                let embedding_id =
                    self.db
                        .replace_face_embedding(person.id, &face.embedding, Some(face.confidence), notes)?;
                (person.id, embedding_id, replaced)
            }
            None => {
                let (person_id, embedding_id) = self.db.enroll_new_person(
                    &request.name,
                    request.role,
                    class_name,
                    &face.embedding,
                    Some(face.confidence),
                    notes,
                )?;
                (person_id, embedding_id, 0)
            }
        };
        self.cache.invalidate();

        let person = self
            .db
            .get_person(person_id)?
            .ok_or(RollcallError::PersonNotFound(person_id))?;

        tracing::info!(
            person_id,
            name = %person.name,
            role = %person.role,
            embedding_id,
            replaced,
            "Enrolled face"
        );

        Ok(Enrollment {
            person,
            embedding_id,
            replaced,
            detection_confidence: face.confidence,
        })
    }

    /// Identify the single face in `capture` without marking anyone.
    pub fn recognize(
        &self,
        capture: &Capture,
        tolerance: Option<f32>,
        role: Option<Role>,
        at: NaiveDateTime,
    ) -> Result<Recognition> {
        let tolerance = self.tolerance_or_default(tolerance)?;
        let face = self.single_face(capture)?;
        let gallery = self.cache.get(self.db)?;

        let matches = gallery.matches_within(&face.embedding, tolerance, role);
        let nearest_distance = match matches.first() {
            Some(best) => Some(best.distance),
            None => gallery.nearest(&face.embedding, role).map(|m| m.distance),
        };

        self.log_attempt(matches.first(), nearest_distance, at, "recognize")?;

        Ok(Recognition {
            bbox: face.bbox,
            matches,
            nearest_distance,
        })
    }

    /// Mark the single person in `capture` present for the day of `at`.
    pub fn mark_from_capture(
        &self,
        capture: &Capture,
        tolerance: Option<f32>,
        role: Option<Role>,
        at: NaiveDateTime,
    ) -> Result<MarkOutcome> {
        let tolerance = self.tolerance_or_default(tolerance)?;
        let face = self.single_face(capture)?;
        self.mark_face(&face, tolerance, role, at)
    }

    /// Match and mark every face in a frame independently.
    pub fn process_frame(
        &self,
        capture: &Capture,
        tolerance: Option<f32>,
        at: NaiveDateTime,
    ) -> Result<FrameReport> {
        let tolerance = self.tolerance_or_default(tolerance)?;
        let faces = self.encoder.encode(capture.image())?;

        let mut report = FrameReport::default();
        for face in &faces {
            let outcome = self.mark_face(face, tolerance, None, at)?;
            report.faces.push(FrameFace {
                bbox: face.bbox,
                detection_confidence: face.confidence,
                outcome,
            });
        }

        tracing::debug!(
            faces = report.faces_found(),
            marked = report.newly_marked(),
            unknown = report.unknown(),
            "Processed frame"
        );
        Ok(report)
    }

    fn mark_face(
        &self,
        face: &DetectedFace,
        tolerance: f32,
        role: Option<Role>,
        at: NaiveDateTime,
    ) -> Result<MarkOutcome> {
        let gallery = self.cache.get(self.db)?;

        let best = match gallery.best_match(&face.embedding, tolerance, role) {
            Some(m) => m,
            None => {
                let best_distance = gallery.nearest(&face.embedding, role).map(|m| m.distance);
                self.log_attempt(None, best_distance, at, "mark")?;
                tracing::info!(best_distance = ?best_distance, "Face not recognized");
                return Ok(MarkOutcome::NotRecognized { best_distance });
            }
        };

        self.log_attempt(Some(&best), Some(best.distance), at, "mark")?;

        let notes = format!(
            "Auto-marked via face recognition (confidence: {:.1}%)",
            best.confidence * 100.0
        );
        let mark = NewMark {
            person_id: best.entry.person_id,
            date: at.date(),
            time: at.time(),
            source: MarkSource::Face,
            confidence: Some(best.confidence),
            notes: Some(&notes),
        };

        Ok(match self.db.mark_once(&mark)? {
            MarkResult::Marked(record) => MarkOutcome::Marked {
                record,
                distance: best.distance,
            },
            MarkResult::AlreadyMarked(record) => MarkOutcome::AlreadyMarked {
                record,
                distance: best.distance,
            },
        })
    }

    fn log_attempt(
        &self,
        best: Option<&Match>,
        nearest_distance: Option<f32>,
        at: NaiveDateTime,
        context: &str,
    ) -> Result<()> {
        match best {
            Some(m) => {
                self.db
                    .record_attempt(Some(m.entry.person_id), Some(m.confidence), true, Some(context), at)?;
            }
            None => {
                let confidence = nearest_distance.map(crate::faces::confidence);
                self.db.record_attempt(None, confidence, false, Some(context), at)?;
            }
        }
        Ok(())
    }

    /// Manually record a status, overriding any face mark for that day.
    pub fn set_status(
        &self,
        person_id: i64,
        status: AttendanceStatus,
        at: NaiveDateTime,
        notes: Option<&str>,
        marked_by: Option<&str>,
    ) -> Result<AttendanceRecord> {
        self.db
            .set_status(person_id, at.date(), at.time(), status, notes, marked_by)
    }

    pub fn status(&self, person_id: i64, date: NaiveDate) -> Result<Option<AttendanceRecord>> {
        self.db.attendance_for(person_id, date)
    }

    pub fn records(&self, date: NaiveDate, role: Option<Role>) -> Result<Vec<AttendanceRecord>> {
        self.db.records_for_date(date, role)
    }

    /// Deactivate every embedding of a person; they must re-enroll to be recognized.
    pub fn deactivate(&self, person_id: i64) -> Result<usize> {
        if self.db.get_person(person_id)?.is_none() {
            return Err(RollcallError::PersonNotFound(person_id).into());
        }
        let count = self.db.deactivate_person_embeddings(person_id)?;
        self.cache.invalidate();
        tracing::info!(person_id, count, "Deactivated face embeddings");
        Ok(count)
    }

    /// Permanently remove one embedding.
    pub fn forget_embedding(&self, embedding_id: i64) -> Result<bool> {
        let removed = self.db.delete_embedding(embedding_id)?;
        if removed {
            self.cache.invalidate();
            tracing::info!(embedding_id, "Deleted face embedding");
        }
        Ok(removed)
    }
}
