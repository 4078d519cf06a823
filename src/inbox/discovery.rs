use anyhow::Result;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Subdirectory that handled captures are moved into.
pub const PROCESSED_DIR: &str = "processed";
/// Subdirectory that unreadable captures are moved into.
pub const FAILED_DIR: &str = "failed";

/// Find capture images under `directory`, skipping the processed and failed
/// subdirectories.
pub fn discover_captures(directory: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    let mut captures = Vec::new();

    let walker = WalkDir::new(directory)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            !(entry.depth() == 1
                && entry.file_type().is_dir()
                && matches!(entry.file_name().to_str(), Some(PROCESSED_DIR) | Some(FAILED_DIR)))
        });

    for entry in walker.filter_map(|e| e.ok()) {
        let path = entry.path();

        if entry.file_type().is_file() {
            if let Some(ext) = path.extension() {
                let ext_lower = ext.to_string_lossy().to_lowercase();
                if extensions.iter().any(|e| e.to_lowercase() == ext_lower) {
                    captures.push(path.to_path_buf());
                }
            }
        }
    }

    // Sort by path for consistent ordering
    captures.sort();

    Ok(captures)
}
