//! Source recording lookup
//!
//! Order of attempts:
//! 1. The stored `file_path` hint (as given, then joined onto each root)
//! 2. `<root>/<filename>` for each root in priority order
//! 3. Recursive walk of each root in priority order (optional)
//!
//! Stems without an extension are tried with each of [`SUPPORTED_EXTENSIONS`].
//! A match in a higher-priority root always wins, regardless of file age.

use crate::error::{ProcessingError, Result};
use birdrev_common::Detection;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Extensions tried for extensionless filenames, most preferred first
pub const SUPPORTED_EXTENSIONS: [&str; 5] = ["wav", "mp3", "flac", "m4a", "ogg"];

#[derive(Debug, Clone)]
pub struct PathResolver {
    roots: Vec<PathBuf>,
    recursive: bool,
}

impl PathResolver {
    /// `roots` are searched in the order given
    pub fn new(roots: Vec<PathBuf>, recursive: bool) -> Self {
        Self { roots, recursive }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Locate the recording a detection was computed from
    pub fn resolve(&self, detection: &Detection) -> Result<PathBuf> {
        if let Some(hint) = detection.file_path.as_deref().filter(|h| !h.trim().is_empty()) {
            if let Some(found) = self.resolve_hint(Path::new(hint)) {
                debug!(detection_id = detection.id, path = %found.display(), "Resolved from stored path");
                return Ok(found);
            }
            debug!(detection_id = detection.id, hint, "Stored path does not exist");
        }

        let candidates = candidate_names(&detection.filename);
        if candidates.is_empty() {
            return Err(ProcessingError::NotFound(format!(
                "detection {} has no filename",
                detection.id
            )));
        }

        for root in &self.roots {
            for name in &candidates {
                let path = root.join(name);
                if path.is_file() {
                    debug!(detection_id = detection.id, path = %path.display(), "Resolved in source root");
                    return Ok(path);
                }
            }
        }

        if self.recursive {
            for root in &self.roots {
                if let Some(found) = search_tree(root, &candidates) {
                    debug!(detection_id = detection.id, path = %found.display(), "Resolved by recursive search");
                    return Ok(found);
                }
            }
        }

        warn!(
            detection_id = detection.id,
            filename = %detection.filename,
            roots = self.roots.len(),
            "Source recording not found"
        );
        Err(ProcessingError::NotFound(detection.filename.clone()))
    }

    fn resolve_hint(&self, hint: &Path) -> Option<PathBuf> {
        if hint.is_file() {
            return Some(hint.to_path_buf());
        }
        if hint.is_absolute() {
            return None;
        }
        self.roots
            .iter()
            .map(|root| root.join(hint))
            .find(|path| path.is_file())
    }
}

/// File names a stored filename may appear under on disk
fn candidate_names(filename: &str) -> Vec<String> {
    let filename = filename.trim();
    if filename.is_empty() {
        return Vec::new();
    }

    // Only the last component counts; stored names occasionally carry a directory
    let name = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(filename);

    let has_known_extension = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false);

    if has_known_extension {
        vec![name.to_string()]
    } else {
        SUPPORTED_EXTENSIONS
            .iter()
            .map(|ext| format!("{}.{}", name, ext))
            .collect()
    }
}

/// First file anywhere under `root` named like one of `candidates`.
///
/// Candidate order outranks traversal order, so `x.wav` deep in the tree
/// beats `x.mp3` at the top.
fn search_tree(root: &Path, candidates: &[String]) -> Option<PathBuf> {
    if !root.is_dir() {
        return None;
    }

    let mut matches: Vec<(usize, PathBuf)> = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Error accessing entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy();
        if let Some(rank) = candidates.iter().position(|c| c.as_str() == file_name) {
            if rank == 0 {
                return Some(entry.into_path());
            }
            matches.push((rank, entry.into_path()));
        }
    }

    matches
        .into_iter()
        .min_by_key(|(rank, _)| *rank)
        .map(|(_, path)| path)
}
