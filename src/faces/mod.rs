pub mod cache;
pub mod capture;
pub mod detector;
pub mod embedding;
pub mod gallery;

pub use cache::GalleryCache;
pub use capture::Capture;
pub use detector::{require_single_face, BoundingBox, DetectedFace, FaceEncoder, OnnxEncoder};
pub use embedding::{confidence, euclidean_distance, Embedding};
pub use gallery::{Gallery, GalleryEntry, Match};
