//! Test utilities for integration testing (available with `test-utils` feature).

use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::json;

use crate::config::{Config, PipelineConfig};
use crate::errors::{Error, Result};
use crate::photos::{PhotoRecord, PhotoSearch, PhotoSources, SearchResult};
use crate::storage::ObjectStore;

/// HTTP client for tests. Installs the TLS crypto provider first.
pub fn http_client() -> reqwest::Client {
    crate::install_crypto_provider();
    reqwest::Client::new()
}

/// Deterministic RGB image with distinct values in every pixel
pub fn gradient_image(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            ((x + y) * 7 % 256) as u8,
        ])
    })
}

pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(gradient_image(width, height))
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
        .expect("Failed to encode test JPEG");
    buf
}

pub fn write_test_jpeg(path: &Path, width: u32, height: u32) {
    std::fs::write(path, jpeg_bytes(width, height)).expect("Failed to write test JPEG");
}

/// A search hit shaped like the Pexels API returns it
pub fn sample_photo(id: u64, alt: &str, original_url: &str) -> PhotoRecord {
    let variants = ["large", "medium", "small"]
        .into_iter()
        .map(|size| (size.to_string(), format!("{original_url}?size={size}")))
        .collect::<BTreeMap<_, _>>();

    PhotoRecord {
        id,
        width: 640,
        height: 480,
        photographer: "Jane Doe".to_string(),
        photographer_url: "https://www.pexels.com/@jane".to_string(),
        alt: alt.to_string(),
        src: PhotoSources {
            original: original_url.to_string(),
            variants,
        },
    }
}

/// Search endpoint response body for `photos`
pub fn search_body(photos: &[PhotoRecord]) -> serde_json::Value {
    json!({
        "page": 1,
        "per_page": photos.len(),
        "total_results": photos.len() * 100,
        "photos": photos,
        "next_page": "https://api.pexels.com/v1/search/?page=2",
    })
}

/// Configuration writing into `output_dir`, with every other field defaulted
pub fn test_config(output_dir: &Path) -> Config {
    Config {
        pipeline: PipelineConfig {
            output_dir: output_dir.to_path_buf(),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Search backend returning a fixed list of photos.
pub struct StaticPhotoSearch {
    photos: Vec<PhotoRecord>,
    failure: Option<String>,
}

impl StaticPhotoSearch {
    pub fn new(photos: Vec<PhotoRecord>) -> Self {
        Self { photos, failure: None }
    }

    /// Every search fails with `message`
    pub fn failing(message: &str) -> Self {
        Self {
            photos: Vec::new(),
            failure: Some(message.to_string()),
        }
    }
}

#[async_trait]
impl PhotoSearch for StaticPhotoSearch {
    async fn search(&self, _subject: &str, count: u32) -> Result<SearchResult> {
        if let Some(message) = &self.failure {
            return Err(Error::Search { message: message.clone() });
        }
        let photos: Vec<PhotoRecord> = self.photos.iter().take(count as usize).cloned().collect();
        Ok(SearchResult {
            per_page: Some(photos.len() as u32),
            photos,
            page: Some(1),
            total_results: None,
            next_page: None,
        })
    }
}

/// An upload seen by [`RecordingStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPut {
    pub bucket: String,
    pub key: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Object store that records uploads instead of sending them.
pub struct RecordingStore {
    bucket: String,
    fail_key: Option<String>,
    puts: Mutex<Vec<RecordedPut>>,
}

impl Default for RecordingStore {
    fn default() -> Self {
        Self {
            bucket: crate::config::DEFAULT_BUCKET.to_string(),
            fail_key: None,
            puts: Mutex::new(Vec::new()),
        }
    }
}

impl RecordingStore {
    /// Rejects the upload of `key`; everything else is recorded
    pub fn failing_on(key: &str) -> Self {
        Self {
            fail_key: Some(key.to_string()),
            ..Default::default()
        }
    }

    pub fn puts(&self) -> Vec<RecordedPut> {
        self.puts.lock().expect("lock poisoned").clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.puts().into_iter().map(|put| put.key).collect()
    }
}

#[async_trait]
impl ObjectStore for RecordingStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_file(&self, key: &str, path: &Path) -> Result<()> {
        if self.fail_key.as_deref() == Some(key) {
            return Err(Error::Storage {
                bucket: self.bucket.clone(),
                key: key.to_string(),
                message: "rejected by test store".to_string(),
            });
        }

        let size = tokio::fs::metadata(path).await.map_err(|e| Error::io(path, e))?.len();
        self.puts.lock().expect("lock poisoned").push(RecordedPut {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            path: path.to_path_buf(),
            size,
        });
        Ok(())
    }
}
