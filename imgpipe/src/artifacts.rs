//! Artifact naming.
//!
//! Every processed photo produces three files sharing a common base name derived from the photo's
//! alt text:
//!
//! - `<base>_original.jpg`: the downloaded image
//! - `<base>_filtered.jpg`: the image after the filter kernel
//! - `<base>_data.json`: the metadata record

use std::path::{Path, PathBuf};

pub const ORIGINAL_SUFFIX: &str = "_original.jpg";
pub const FILTERED_SUFFIX: &str = "_filtered.jpg";
pub const METADATA_SUFFIX: &str = "_data.json";

/// Characters that cannot appear in a file name on at least one common platform.
const UNSAFE_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Derive the filesystem-safe base name for a photo.
///
/// Spaces are removed. Path separators, characters reserved on Windows and control characters are
/// dropped too. If nothing is left the base name falls back to `photo-<id>`.
///
/// "Two dogs playing" -> "Twodogsplaying"
pub fn base_name(alt: &str, photo_id: u64) -> String {
    let name: String = alt
        .trim()
        .chars()
        .filter(|c| *c != ' ' && !c.is_control() && !UNSAFE_CHARS.contains(c))
        .collect();

    // "." and ".." would resolve to directories
    if name.is_empty() || name.chars().all(|c| c == '.') {
        format!("photo-{photo_id}")
    } else {
        name
    }
}

pub fn original_name(base: &str) -> String {
    format!("{base}{ORIGINAL_SUFFIX}")
}

pub fn filtered_name(base: &str) -> String {
    format!("{base}{FILTERED_SUFFIX}")
}

pub fn metadata_name(base: &str) -> String {
    format!("{base}{METADATA_SUFFIX}")
}

/// The three file names produced for a single photo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSet {
    pub base: String,
    pub original: String,
    pub filtered: String,
    pub metadata: String,
}

impl ArtifactSet {
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            original: original_name(&base),
            filtered: filtered_name(&base),
            metadata: metadata_name(&base),
            base,
        }
    }

    /// File names in upload order: original, filtered, metadata
    pub fn files(&self) -> [&str; 3] {
        [self.original.as_str(), self.filtered.as_str(), self.metadata.as_str()]
    }

    /// Local paths of the artifacts under `dir`
    pub fn paths(&self, dir: &Path) -> [PathBuf; 3] {
        self.files().map(|f| dir.join(f))
    }
}
