//! Enrolled face embeddings and the gallery they form.

use anyhow::Result;
use rusqlite::params;
use serde::Serialize;

use super::{round2, Database, Role};
use crate::error::RollcallError;
use crate::faces::{Embedding, Gallery, GalleryEntry};

/// Metadata of one stored embedding (the vector itself is not loaded).
#[derive(Debug, Clone, Serialize)]
pub struct EnrollmentRecord {
    pub id: i64,
    pub person_id: i64,
    pub embedding_dim: i64,
    pub confidence: Option<f32>,
    pub notes: Option<String>,
    pub is_active: bool,
    pub captured_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrollmentStats {
    pub role: Role,
    pub total_people: i64,
    pub enrolled_people: i64,
    pub pending: i64,
    pub total_embeddings: i64,
    pub enrollment_percentage: f64,
}

impl Database {
    /// Store a new active embedding for an existing person.
    pub fn store_face_embedding(
        &self,
        person_id: i64,
        embedding: &Embedding,
        confidence: Option<f32>,
        notes: Option<&str>,
    ) -> Result<i64> {
        if self.get_person(person_id)?.is_none() {
            return Err(RollcallError::PersonNotFound(person_id).into());
        }

        self.conn.execute(
            r#"
            INSERT INTO face_embeddings (person_id, embedding, embedding_dim, confidence, notes, is_active)
            VALUES (?, ?, ?, ?, ?, 1)
            "#,
            params![person_id, embedding.to_bytes(), embedding.dim() as i64, confidence, notes],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    /// Deactivate a person's current embeddings and store a new one, atomically.
    pub fn replace_face_embedding(
        &self,
        person_id: i64,
        embedding: &Embedding,
        confidence: Option<f32>,
        notes: Option<&str>,
    ) -> Result<i64> {
        let tx = self.conn.unchecked_transaction()?;
        self.deactivate_person_embeddings(person_id)?;
        let id = self.store_face_embedding(person_id, embedding, confidence, notes)?;
        tx.commit()?;
        Ok(id)
    }

    /// Create a person together with their first embedding, atomically.
    ///
    /// Returns `(person_id, embedding_id)`. Nothing is kept when either write fails.
    pub fn enroll_new_person(
        &self,
        name: &str,
        role: Role,
        class_name: Option<&str>,
        embedding: &Embedding,
        confidence: Option<f32>,
        notes: Option<&str>,
    ) -> Result<(i64, i64)> {
        let tx = self.conn.unchecked_transaction()?;
        let person_id = self.create_person(name, role, class_name)?;
        let embedding_id = self.store_face_embedding(person_id, embedding, confidence, notes)?;
        tx.commit()?;
        Ok((person_id, embedding_id))
    }

    /// Returns the number of embeddings deactivated.
    pub fn deactivate_person_embeddings(&self, person_id: i64) -> Result<usize> {
        let changed = self.conn.execute(
            "UPDATE face_embeddings SET is_active = 0 WHERE person_id = ? AND is_active = 1",
            [person_id],
        )?;
        Ok(changed)
    }

    /// Returns false when no such embedding existed.
    pub fn delete_embedding(&self, embedding_id: i64) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM face_embeddings WHERE id = ?", [embedding_id])?;
        Ok(changed > 0)
    }

    /// Every embedding of a person, newest first.
    pub fn embeddings_for_person(&self, person_id: i64) -> Result<Vec<EnrollmentRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, person_id, embedding_dim, confidence, notes, is_active, captured_at
            FROM face_embeddings
            WHERE person_id = ?
            ORDER BY id DESC
            "#,
        )?;

        let records = stmt
            .query_map([person_id], |row| {
                Ok(EnrollmentRecord {
                    id: row.get(0)?,
                    person_id: row.get(1)?,
                    embedding_dim: row.get(2)?,
                    confidence: row.get(3)?,
                    notes: row.get(4)?,
                    is_active: row.get(5)?,
                    captured_at: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// All active embeddings with their owners, ready for matching.
    ///
    /// Rows whose blob cannot be decoded, or whose length disagrees with the
    /// recorded dimension, are skipped with a warning instead of failing the
    /// whole load.
    pub fn load_gallery(&self) -> Result<Gallery> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT fe.id, fe.person_id, p.name, p.role, p.class_name, fe.embedding, fe.embedding_dim
            FROM face_embeddings fe
            JOIN people p ON p.id = fe.person_id
            WHERE fe.is_active = 1
            ORDER BY fe.id
            "#,
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Role>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Vec<u8>>(5)?,
                row.get::<_, i64>(6)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (embedding_id, person_id, name, role, class_name, bytes, dim) = row?;

            let embedding = match Embedding::from_bytes(&bytes) {
                Ok(e) if !e.is_empty() && e.dim() as i64 == dim => e,
                Ok(e) => {
                    tracing::warn!(
                        embedding_id,
                        expected = dim,
                        actual = e.dim(),
                        "Skipping embedding with mismatched dimension"
                    );
                    continue;
                }
                Err(e) => {
                    tracing::warn!(embedding_id, error = %e, "Skipping unreadable embedding");
                    continue;
                }
            };

            entries.push(GalleryEntry {
                embedding_id,
                person_id,
                name,
                role,
                class_name,
                embedding,
            });
        }

        Ok(Gallery::new(entries))
    }

    /// How many people of `role` have at least one active embedding.
    pub fn enrollment_stats(&self, role: Role) -> Result<EnrollmentStats> {
        let (total_people, enrolled_people, total_embeddings): (i64, i64, i64) = self.conn.query_row(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(EXISTS (
                    SELECT 1 FROM face_embeddings fe
                    WHERE fe.person_id = p.id AND fe.is_active = 1
                )), 0),
                COALESCE(SUM((
                    SELECT COUNT(*) FROM face_embeddings fe
                    WHERE fe.person_id = p.id AND fe.is_active = 1
                )), 0)
            FROM people p
            WHERE p.role = ?
            "#,
            [role],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let enrollment_percentage = if total_people > 0 {
            round2(enrolled_people as f64 * 100.0 / total_people as f64)
        } else {
            0.0
        };

        Ok(EnrollmentStats {
            role,
            total_people,
            enrolled_people,
            pending: total_people - enrolled_people,
            total_embeddings,
            enrollment_percentage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    #[test]
    fn test_store_and_load_gallery() {
        let db = test_db();
        let ada = db.create_person("Ada", Role::Student, Some("5A")).unwrap();
        let grace = db.create_person("Grace", Role::Teacher, None).unwrap();

        let e1 = db.store_face_embedding(ada, &emb(&[0.1, 0.2, 0.3]), Some(0.98), None).unwrap();
        let e2 = db.store_face_embedding(grace, &emb(&[0.4, 0.5, 0.6]), None, Some("staff room")).unwrap();

        let gallery = db.load_gallery().unwrap();
        let entries = gallery.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].embedding_id, e1);
        assert_eq!(entries[0].name, "Ada");
        assert_eq!(entries[0].class_name.as_deref(), Some("5A"));
        assert_eq!(entries[0].embedding.as_slice(), &[0.1, 0.2, 0.3]);
        assert_eq!(entries[1].embedding_id, e2);
        assert_eq!(entries[1].role, Role::Teacher);
    }

    #[test]
    fn test_enroll_new_person() {
        let db = test_db();
        let (ada, embedding_id) = db
            .enroll_new_person("Ada", Role::Student, Some("5A"), &emb(&[0.1, 0.2]), Some(0.9), None)
            .unwrap();

        let stored = db.embeddings_for_person(ada).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, embedding_id);
        assert!(stored[0].is_active);
    }

    #[test]
    fn test_enroll_new_person_rolls_back_on_failure() {
        let db = test_db();
        db.conn
            .execute_batch(
                r#"
                CREATE TRIGGER reject_embeddings BEFORE INSERT ON face_embeddings
                BEGIN SELECT RAISE(ABORT, 'disk full'); END;
                "#,
            )
            .unwrap();

        assert!(db
            .enroll_new_person("Ada", Role::Student, None, &emb(&[0.1, 0.2]), None, None)
            .is_err());
        assert_eq!(db.count_people().unwrap(), 0);

        // The connection is usable afterwards
        db.create_person("Grace", Role::Teacher, None).unwrap();
        assert_eq!(db.count_people().unwrap(), 1);
    }

    #[test]
    fn test_store_for_unknown_person_fails() {
        let db = test_db();
        let err = db.store_face_embedding(42, &emb(&[1.0]), None, None).unwrap_err();
        assert_eq!(
            err.downcast_ref::<RollcallError>(),
            Some(&RollcallError::PersonNotFound(42))
        );
    }

    #[test]
    fn test_replace_deactivates_previous() {
        let db = test_db();
        let ada = db.create_person("Ada", Role::Student, Some("5A")).unwrap();
        let old = db.store_face_embedding(ada, &emb(&[1.0, 0.0]), None, None).unwrap();
        let new = db.replace_face_embedding(ada, &emb(&[0.0, 1.0]), None, None).unwrap();

        let gallery = db.load_gallery().unwrap();
        assert_eq!(gallery.len(), 1);
        assert_eq!(gallery.entries()[0].embedding_id, new);

        let history = db.embeddings_for_person(ada).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, new);
        assert!(history[0].is_active);
        assert_eq!(history[1].id, old);
        assert!(!history[1].is_active);
    }

    #[test]
    fn test_deactivate_and_delete() {
        let db = test_db();
        let ada = db.create_person("Ada", Role::Student, None).unwrap();
        let id = db.store_face_embedding(ada, &emb(&[1.0]), None, None).unwrap();
        db.store_face_embedding(ada, &emb(&[2.0]), None, None).unwrap();

        assert_eq!(db.deactivate_person_embeddings(ada).unwrap(), 2);
        assert_eq!(db.deactivate_person_embeddings(ada).unwrap(), 0);
        assert!(db.load_gallery().unwrap().is_empty());

        assert!(db.delete_embedding(id).unwrap());
        assert!(!db.delete_embedding(id).unwrap());
        assert_eq!(db.embeddings_for_person(ada).unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_rows_are_skipped() {
        let db = test_db();
        let ada = db.create_person("Ada", Role::Student, None).unwrap();
        db.store_face_embedding(ada, &emb(&[1.0, 2.0]), None, None).unwrap();

        db.conn
            .execute(
                "INSERT INTO face_embeddings (person_id, embedding, embedding_dim) VALUES (?, ?, 2)",
                params![ada, vec![0u8; 5]],
            )
            .unwrap();
        db.conn
            .execute(
                "INSERT INTO face_embeddings (person_id, embedding, embedding_dim) VALUES (?, ?, 3)",
                params![ada, emb(&[1.0, 2.0]).to_bytes()],
            )
            .unwrap();

        assert_eq!(db.load_gallery().unwrap().len(), 1);
    }

    #[test]
    fn test_enrollment_stats_and_pending() {
        let db = test_db();
        let a = db.create_person("Ada", Role::Student, Some("5A")).unwrap();
        db.create_person("Bob", Role::Student, Some("5A")).unwrap();
        db.create_person("Cy", Role::Student, Some("5B")).unwrap();
        let t = db.create_person("Grace", Role::Teacher, None).unwrap();

        db.store_face_embedding(a, &emb(&[1.0]), None, None).unwrap();
        db.store_face_embedding(t, &emb(&[1.0]), None, None).unwrap();

        db.store_face_embedding(a, &emb(&[2.0]), None, None).unwrap();

        let students = db.enrollment_stats(Role::Student).unwrap();
        assert_eq!(students.total_people, 3);
        assert_eq!(students.enrolled_people, 1);
        assert_eq!(students.pending, 2);
        assert_eq!(students.total_embeddings, 2);
        assert_eq!(students.enrollment_percentage, 33.33);

        let teachers = db.enrollment_stats(Role::Teacher).unwrap();
        assert_eq!(teachers.enrollment_percentage, 100.0);

        let pending: Vec<String> = db
            .people_needing_enrollment(Role::Student)
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(pending, vec!["Bob", "Cy"]);

        // Deactivated embeddings do not count as enrolled
        db.deactivate_person_embeddings(a).unwrap();
        assert_eq!(db.enrollment_stats(Role::Student).unwrap().enrolled_people, 0);
    }

    #[test]
    fn test_enrollment_stats_empty() {
        let db = test_db();
        let stats = db.enrollment_stats(Role::Teacher).unwrap();
        assert_eq!(stats.total_people, 0);
        assert_eq!(stats.enrollment_percentage, 0.0);
    }
}
