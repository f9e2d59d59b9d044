//! Original image download.

use std::path::Path;

use reqwest::{Client, StatusCode};
use tracing::{info, instrument, warn};

use crate::artifacts::original_name;
use crate::errors::{Error, Result};

/// Outcome of a download attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    /// `<base>_original.jpg`, returned whether or not the file was written
    pub file_name: String,
    pub status: u16,
    pub written: bool,
}

impl Download {
    /// Turn an unwritten download into an explicit item failure.
    pub fn ensure_written(&self, url: &str) -> Result<()> {
        if self.written {
            Ok(())
        } else {
            Err(Error::DownloadFailed {
                url: url.to_string(),
                status: self.status,
            })
        }
    }
}

/// Download `url` into `<base>_original.jpg` in `dir`.
///
/// Only a 200 response writes the file. Any other status is logged and reported through
/// [`Download::written`]; the file name is returned either way.
#[instrument(skip(client, api_key, dir), err)]
pub async fn download_image(client: &Client, url: &str, base: &str, api_key: &str, dir: &Path) -> Result<Download> {
    let file_name = original_name(base);

    let response = client
        .get(url)
        .header(reqwest::header::AUTHORIZATION, api_key)
        .send()
        .await?;
    let status = response.status();

    if status != StatusCode::OK {
        warn!(status = status.as_u16(), "Failed to download image");
        return Ok(Download {
            file_name,
            status: status.as_u16(),
            written: false,
        });
    }

    let bytes = response.bytes().await?;
    let path = dir.join(&file_name);
    tokio::fs::write(&path, &bytes).await.map_err(|e| Error::io(&path, e))?;
    info!(file = %file_name, bytes = bytes.len(), "Image downloaded");

    Ok(Download {
        file_name,
        status: status.as_u16(),
        written: true,
    })
}
