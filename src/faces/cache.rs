//! Time-bounded snapshot of the enrolled gallery.

use anyhow::Result;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::gallery::Gallery;
use crate::db::Database;

struct CachedGallery {
    gallery: Arc<Gallery>,
    loaded_at: Instant,
}

/// Reloads the gallery from the database when the snapshot is older than
/// `ttl` or has been invalidated by a write.
pub struct GalleryCache {
    ttl: Duration,
    slot: Mutex<Option<CachedGallery>>,
}

impl GalleryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    pub fn get(&self, db: &Database) -> Result<Arc<Gallery>> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| anyhow::anyhow!("gallery cache lock poisoned"))?;

        if let Some(cached) = slot.as_ref() {
            if cached.loaded_at.elapsed() < self.ttl {
                return Ok(Arc::clone(&cached.gallery));
            }
        }

        let gallery = Arc::new(db.load_gallery()?);
        tracing::debug!(entries = gallery.len(), "Loaded face gallery");

        *slot = Some(CachedGallery {
            gallery: Arc::clone(&gallery),
            loaded_at: Instant::now(),
        });
        Ok(gallery)
    }

    /// Drop the snapshot so the next `get` reloads.
    pub fn invalidate(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{test_db, Role};
    use crate::faces::Embedding;

    #[test]
    fn test_cache_serves_snapshot_until_invalidated() {
        let db = test_db();
        let cache = GalleryCache::new(Duration::from_secs(300));
        let ada = db.create_person("Ada", Role::Student, None).unwrap();

        assert!(cache.get(&db).unwrap().is_empty());

        db.store_face_embedding(ada, &Embedding::new(vec![1.0, 0.0]), None, None).unwrap();
        // Stale until invalidated
        assert!(cache.get(&db).unwrap().is_empty());

        cache.invalidate();
        assert_eq!(cache.get(&db).unwrap().len(), 1);
    }

    #[test]
    fn test_zero_ttl_always_reloads() {
        let db = test_db();
        let cache = GalleryCache::new(Duration::ZERO);
        let ada = db.create_person("Ada", Role::Student, None).unwrap();

        assert!(cache.get(&db).unwrap().is_empty());
        db.store_face_embedding(ada, &Embedding::new(vec![1.0]), None, None).unwrap();
        assert_eq!(cache.get(&db).unwrap().len(), 1);
    }
}
