//! Nearest-neighbour matching against the enrolled face gallery.
//!
//! The gallery is a flat list scanned in full for every probe. Entries are
//! kept in embedding-id order so that equal distances always resolve to the
//! earliest enrollment.

use rayon::prelude::*;
use serde::Serialize;
use std::cmp::Ordering;

use super::embedding::{confidence, Embedding};
use crate::db::Role;

/// One active enrolled embedding together with who it belongs to.
#[derive(Debug, Clone, Serialize)]
pub struct GalleryEntry {
    pub embedding_id: i64,
    pub person_id: i64,
    pub name: String,
    pub role: Role,
    pub class_name: Option<String>,
    #[serde(skip)]
    pub embedding: Embedding,
}

/// A gallery entry that a probe was compared against.
#[derive(Debug, Clone, Serialize)]
pub struct Match {
    #[serde(flatten)]
    pub entry: GalleryEntry,
    pub distance: f32,
    pub confidence: f32,
}

#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn new(mut entries: Vec<GalleryEntry>) -> Self {
        entries.sort_by_key(|e| e.embedding_id);
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    /// Closest entry within `tolerance`, optionally restricted to one role.
    pub fn best_match(&self, probe: &Embedding, tolerance: f32, role: Option<Role>) -> Option<Match> {
        self.nearest(probe, role)
            .filter(|m| m.distance <= tolerance)
    }

    /// Closest entry regardless of tolerance.
    pub fn nearest(&self, probe: &Embedding, role: Option<Role>) -> Option<Match> {
        self.nearest_where(probe, |e| role.map_or(true, |r| e.role == r))
    }

    /// Closest entry belonging to anyone other than `person_id`.
    pub fn nearest_other_person(&self, probe: &Embedding, person_id: i64) -> Option<Match> {
        self.nearest_where(probe, |e| e.person_id != person_id)
    }

    /// Every entry within `tolerance`, best first.
    pub fn matches_within(&self, probe: &Embedding, tolerance: f32, role: Option<Role>) -> Vec<Match> {
        let mut scored: Vec<(usize, f32)> = self
            .scored(probe, |e| role.map_or(true, |r| e.role == r))
            .into_iter()
            .filter(|(_, d)| *d <= tolerance)
            .collect();

        scored.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        scored
            .into_iter()
            .map(|(idx, distance)| self.to_match(idx, distance))
            .collect()
    }

    fn nearest_where<F>(&self, probe: &Embedding, keep: F) -> Option<Match>
    where
        F: Fn(&GalleryEntry) -> bool + Sync,
    {
        let mut best: Option<(usize, f32)> = None;
        for (idx, distance) in self.scored(probe, keep) {
            // Strictly smaller, so ties keep the earlier entry
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((idx, distance));
            }
        }
        best.map(|(idx, distance)| self.to_match(idx, distance))
    }

    /// Distances to every comparable entry, in gallery order.
    fn scored<F>(&self, probe: &Embedding, keep: F) -> Vec<(usize, f32)>
    where
        F: Fn(&GalleryEntry) -> bool + Sync,
    {
        self.entries
            .par_iter()
            .enumerate()
            .filter(|(_, entry)| keep(*entry))
            .filter_map(|(idx, entry)| {
                entry
                    .embedding
                    .distance(probe)
                    .filter(|d| d.is_finite())
                    .map(|d| (idx, d))
            })
            .collect()
    }

    fn to_match(&self, idx: usize, distance: f32) -> Match {
        Match {
            entry: self.entries[idx].clone(),
            distance,
            confidence: confidence(distance),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(embedding_id: i64, person_id: i64, role: Role, values: Vec<f32>) -> GalleryEntry {
        GalleryEntry {
            embedding_id,
            person_id,
            name: format!("person-{}", person_id),
            role,
            class_name: None,
            embedding: Embedding::new(values),
        }
    }

    fn sample() -> Gallery {
        Gallery::new(vec![
            entry(3, 30, Role::Teacher, vec![0.0, 1.0]),
            entry(1, 10, Role::Student, vec![1.0, 0.0]),
            entry(2, 20, Role::Student, vec![0.7, 0.7]),
            entry(4, 40, Role::Student, vec![1.0, 0.0, 0.0]),
        ])
    }

    #[test]
    fn test_best_match_within_tolerance() {
        let gallery = sample();
        let probe = Embedding::new(vec![0.95, 0.05]);

        let m = gallery.best_match(&probe, 0.6, None).unwrap();
        assert_eq!(m.entry.person_id, 10);
        assert!(m.distance < 0.1);
        assert!((m.confidence - (1.0 - m.distance)).abs() < 1e-6);
    }

    #[test]
    fn test_best_match_rejects_beyond_tolerance() {
        let gallery = sample();
        let probe = Embedding::new(vec![-1.0, -1.0]);

        assert!(gallery.best_match(&probe, 0.6, None).is_none());
        // Still reportable as the nearest unknown
        assert!(gallery.nearest(&probe, None).is_some());
    }

    #[test]
    fn test_tolerance_is_inclusive() {
        let gallery = Gallery::new(vec![entry(1, 1, Role::Student, vec![0.0, 0.0])]);
        let probe = Embedding::new(vec![0.5, 0.0]);
        assert!(gallery.best_match(&probe, 0.5, None).is_some());
        assert!(gallery.best_match(&probe, 0.49, None).is_none());
    }

    #[test]
    fn test_role_filter() {
        let gallery = sample();
        let probe = Embedding::new(vec![0.1, 0.9]);

        let any = gallery.best_match(&probe, 0.7, None).unwrap();
        assert_eq!(any.entry.role, Role::Teacher);

        let student = gallery.best_match(&probe, 0.7, Some(Role::Student)).unwrap();
        assert_eq!(student.entry.person_id, 20);
    }

    #[test]
    fn test_mismatched_dimensions_skipped() {
        let gallery = Gallery::new(vec![entry(1, 1, Role::Student, vec![1.0, 0.0, 0.0])]);
        let probe = Embedding::new(vec![1.0, 0.0]);
        assert!(gallery.nearest(&probe, None).is_none());
    }

    #[test]
    fn test_ties_resolve_to_earliest_enrollment() {
        let gallery = Gallery::new(vec![
            entry(9, 2, Role::Student, vec![1.0, 0.0]),
            entry(5, 1, Role::Student, vec![1.0, 0.0]),
        ]);
        let probe = Embedding::new(vec![1.0, 0.0]);

        assert_eq!(gallery.best_match(&probe, 0.1, None).unwrap().entry.embedding_id, 5);
        let all = gallery.matches_within(&probe, 0.1, None);
        assert_eq!(all.iter().map(|m| m.entry.embedding_id).collect::<Vec<_>>(), vec![5, 9]);
    }

    #[test]
    fn test_matches_within_sorted() {
        let gallery = sample();
        let probe = Embedding::new(vec![0.9, 0.3]);

        let matches = gallery.matches_within(&probe, 1.0, Some(Role::Student));
        let ids: Vec<i64> = matches.iter().map(|m| m.entry.person_id).collect();
        assert_eq!(ids, vec![10, 20]);
        assert!(matches[0].distance <= matches[1].distance);
    }

    #[test]
    fn test_nearest_other_person() {
        let gallery = sample();
        let probe = Embedding::new(vec![1.0, 0.0]);

        let other = gallery.nearest_other_person(&probe, 10).unwrap();
        assert_eq!(other.entry.person_id, 20);
    }

    #[test]
    fn test_empty_gallery() {
        let gallery = Gallery::default();
        assert!(gallery.is_empty());
        assert!(gallery.best_match(&Embedding::new(vec![1.0]), 1.0, None).is_none());
        assert!(gallery.matches_within(&Embedding::new(vec![1.0]), 1.0, None).is_empty());
    }
}
