//! Per-photo metadata records.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::artifacts::metadata_name;
use crate::errors::{Error, Result};
use crate::photos::PhotoRecord;

/// The fixed set of fields written to `<base>_data.json`.
///
/// `src` holds only the original-resolution URL, not the full source mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetadataRecord {
    pub id: u64,
    pub width: u32,
    pub height: u32,
    pub photographer: String,
    pub photographer_url: String,
    pub alt: String,
    pub src: String,
}

impl From<&PhotoRecord> for MetadataRecord {
    fn from(photo: &PhotoRecord) -> Self {
        Self {
            id: photo.id,
            width: photo.width,
            height: photo.height,
            photographer: photo.photographer.clone(),
            photographer_url: photo.photographer_url.clone(),
            alt: photo.alt.clone(),
            src: photo.src.original.clone(),
        }
    }
}

/// Write the metadata record for `photo` to `<base>_data.json` in `dir` and return the file name.
#[instrument(skip(photo, dir), fields(photo_id = photo.id), err)]
pub async fn create_metadata_record(photo: &PhotoRecord, base: &str, dir: &Path) -> Result<String> {
    let name = metadata_name(base);
    let path = dir.join(&name);

    let json = serde_json::to_vec(&MetadataRecord::from(photo))?;
    tokio::fs::write(&path, json).await.map_err(|e| Error::io(&path, e))?;

    Ok(name)
}
