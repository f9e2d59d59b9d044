//! Pipeline orchestration.
//!
//! ```text
//! Pipeline::run()
//!   ├─ search(subject, count)                  // fatal on error
//!   └─ for each photo (up to max_concurrent_images at once):
//!        process_photo()
//!          ├─ download_image()  -> <base>_original.jpg
//!          ├─ filter_image()    -> <base>_filtered.jpg
//!          ├─ create_metadata_record() -> <base>_data.json
//!          └─ put_file() x3     // only when uploading
//! ```
//!
//! Each photo's chain runs strictly in order. Photos whose alt text gives the same base name write
//! the same files, so they run one after another in search order and the last one wins. A failed photo is recorded in the [`RunSummary`] and
//! the run moves on, unless `fail_fast` is set.

mod summary;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use bon::Builder;
use futures::StreamExt;
use futures::stream;
use reqwest::Client;
use tracing::{info, instrument, warn};

use crate::artifacts::{ArtifactSet, base_name};
use crate::config::{PipelineConfig, RunRequest, StorageConfig};
use crate::download::download_image;
use crate::errors::{Error, Result};
use crate::filters::filter_image;
use crate::metadata::create_metadata_record;
use crate::photos::{PhotoRecord, PhotoSearch};
use crate::storage::{ObjectStore, object_key};

pub use summary::{ItemOutcome, ItemStatus, RunSummary};

#[derive(Builder)]
pub struct Pipeline {
    settings: PipelineConfig,
    storage: StorageConfig,
    api_key: String,
    http: Client,
    search: Arc<dyn PhotoSearch>,
    store: Arc<dyn ObjectStore>,
}

impl Pipeline {
    /// Run the pipeline for one request and summarize the outcome.
    ///
    /// Errors only for fatal conditions: the search failed, the output directory cannot be
    /// created, or an image failed while `fail_fast` is set.
    #[instrument(skip(self), fields(subject = %request.subject, filter = %request.filter))]
    pub async fn run(&self, request: &RunRequest) -> Result<RunSummary> {
        let started = Instant::now();
        let dir = &self.settings.output_dir;
        tokio::fs::create_dir_all(dir).await.map_err(|e| Error::io(dir, e))?;

        let results = self.search.search(&request.subject, request.count).await?;
        info!(found = results.photos.len(), requested = request.count, "Search returned photos");

        // Photos sharing a base name write the same files; they run back to back in search order
        let fail_fast = self.settings.fail_fast;
        let mut outcomes = stream::iter(group_by_base_name(&results.photos))
            .map(|group| async move {
                let mut done = Vec::with_capacity(group.len());
                for (index, base, photo) in group {
                    let result = self.process_photo(photo, base, request).await;
                    let stop = matches!(&result, Err(e) if fail_fast || !e.is_item_failure());
                    done.push((index, photo, result));
                    if stop {
                        break;
                    }
                }
                done
            })
            .buffered(self.settings.max_concurrent_images.max(1));

        let mut slots: Vec<Option<(&PhotoRecord, Result<ArtifactSet>)>> =
            std::iter::repeat_with(|| None).take(results.photos.len()).collect();
        while let Some(done) = outcomes.next().await {
            for (index, photo, result) in done {
                slots[index] = match result {
                    Err(e) if fail_fast || !e.is_item_failure() => return Err(e),
                    Err(e) => {
                        warn!(photo_id = photo.id, kind = e.kind(), error = %e, "Skipping photo");
                        Some((photo, Err(e)))
                    }
                    Ok(artifacts) => Some((photo, Ok(artifacts))),
                };
            }
        }

        let mut summary = RunSummary::new(request, results.photos.len());
        for (photo, result) in slots.into_iter().flatten() {
            match result {
                Ok(artifacts) => summary.record_success(photo, artifacts, request.upload),
                Err(e) => summary.record_failure(photo, &e),
            }
        }

        summary.elapsed = started.elapsed();
        summary.log();

        if let Some(path) = &self.settings.report_path
            && let Err(e) = summary.write_report(path).await
        {
            warn!(error = %e, "Failed to write run report");
        }

        Ok(summary)
    }

    /// Download, filter, record and optionally upload a single photo.
    #[instrument(skip_all, fields(photo_id = photo.id))]
    async fn process_photo(&self, photo: &PhotoRecord, base: String, request: &RunRequest) -> Result<ArtifactSet> {
        let dir = &self.settings.output_dir;
        let url = &photo.src.original;

        let download = download_image(&self.http, url, &base, &self.api_key, dir).await?;
        download.ensure_written(url)?;

        let filtered = filter_image(dir, &base, request.filter).await?;
        let metadata = create_metadata_record(photo, &base, dir).await?;

        let artifacts = ArtifactSet {
            base,
            original: download.file_name,
            filtered,
            metadata,
        };

        if request.upload {
            for (file, path) in artifacts.files().into_iter().zip(artifacts.paths(dir)) {
                let key = object_key(&self.storage, &request.subject, file);
                self.store.put_file(&key, &path).await?;
            }
        }

        Ok(artifacts)
    }
}

/// Group photos by base name, keeping search order within and across groups.
///
/// Each entry carries the photo's position in the search results.
fn group_by_base_name(photos: &[PhotoRecord]) -> Vec<Vec<(usize, String, &PhotoRecord)>> {
    let mut groups: Vec<Vec<(usize, String, &PhotoRecord)>> = Vec::new();
    let mut by_base: HashMap<String, usize> = HashMap::new();

    for (index, photo) in photos.iter().enumerate() {
        let base = base_name(&photo.alt, photo.id);
        match by_base.get(&base) {
            Some(&group) => groups[group].push((index, base, photo)),
            None => {
                by_base.insert(base.clone(), groups.len());
                groups.push(vec![(index, base, photo)]);
            }
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::ImageFilter;
    use crate::test_utils::{RecordingStore, StaticPhotoSearch, http_client, jpeg_bytes, sample_photo};
    use std::path::Path;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn pipeline(dir: &Path, photos: Vec<PhotoRecord>, store: Arc<RecordingStore>, fail_fast: bool) -> Pipeline {
        Pipeline::builder()
            .settings(PipelineConfig {
                output_dir: dir.to_path_buf(),
                max_concurrent_images: 1,
                fail_fast,
                report_path: None,
            })
            .storage(StorageConfig::default())
            .api_key("key".to_string())
            .http(http_client())
            .search(Arc::new(StaticPhotoSearch::new(photos)))
            .store(store)
            .build()
    }

    fn request(upload: bool) -> RunRequest {
        RunRequest {
            subject: "cats".to_string(),
            filter: ImageFilter::Emboss,
            count: 10,
            upload,
        }
    }

    async fn image_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.jpeg"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(jpeg_bytes(16, 16)))
            .mount(&server)
            .await;
        server
    }

    #[test_log::test(tokio::test)]
    async fn test_failed_download_skips_photo() {
        let server = image_server().await;
        let dir = tempfile::tempdir().unwrap();
        let photos = vec![
            sample_photo(1, "Lost cat", &format!("{}/missing.jpeg", server.uri())),
            sample_photo(2, "Found cat", &format!("{}/2.jpeg", server.uri())),
        ];
        let store = Arc::new(RecordingStore::default());

        let summary = pipeline(dir.path(), photos, store.clone(), false)
            .run(&request(true))
            .await
            .unwrap();

        assert_eq!(summary.succeeded(), 1);
        assert_eq!(summary.failed(), 1);
        assert!(matches!(summary.items[0].status, ItemStatus::Failed { kind: "download", .. }));
        assert!(!dir.path().join("Lostcat_original.jpg").exists());
        assert!(!dir.path().join("Lostcat_filtered.jpg").exists());
        assert!(dir.path().join("Foundcat_filtered.jpg").exists());
        assert_eq!(
            store.keys(),
            vec!["Foundcat_original.jpg", "Foundcat_filtered.jpg", "Foundcat_data.json"]
        );
    }

    #[tokio::test]
    async fn test_fail_fast_aborts_run() {
        let server = image_server().await;
        let dir = tempfile::tempdir().unwrap();
        let photos = vec![
            sample_photo(1, "Lost cat", &format!("{}/missing.jpeg", server.uri())),
            sample_photo(2, "Found cat", &format!("{}/2.jpeg", server.uri())),
        ];

        let err = pipeline(dir.path(), photos, Arc::new(RecordingStore::default()), true)
            .run(&request(false))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::DownloadFailed { status: 404, .. }));
        assert!(!dir.path().join("Foundcat_original.jpg").exists());
    }

    #[tokio::test]
    async fn test_upload_failure_is_an_item_failure() {
        let server = image_server().await;
        let dir = tempfile::tempdir().unwrap();
        let photos = vec![
            sample_photo(1, "First", &format!("{}/1.jpeg", server.uri())),
            sample_photo(2, "Second", &format!("{}/2.jpeg", server.uri())),
        ];
        let store = Arc::new(RecordingStore::failing_on("First_filtered.jpg"));

        let summary = pipeline(dir.path(), photos, store.clone(), false)
            .run(&request(true))
            .await
            .unwrap();

        assert_eq!(summary.succeeded(), 1);
        assert!(matches!(summary.items[0].status, ItemStatus::Failed { kind: "storage", .. }));
        // The first artifact went up before the failure; nothing after it did
        assert_eq!(
            store.keys(),
            vec!["First_original.jpg", "Second_original.jpg", "Second_filtered.jpg", "Second_data.json"]
        );
    }

    #[tokio::test]
    async fn test_concurrent_run_keeps_search_order() {
        let server = image_server().await;
        let dir = tempfile::tempdir().unwrap();
        let photos: Vec<PhotoRecord> = (1..=5)
            .map(|id| sample_photo(id, &format!("cat number {id}"), &format!("{}/{id}.jpeg", server.uri())))
            .collect();

        let mut pipeline = pipeline(dir.path(), photos, Arc::new(RecordingStore::default()), false);
        pipeline.settings.max_concurrent_images = 3;

        let summary = pipeline.run(&request(false)).await.unwrap();
        assert_eq!(summary.succeeded(), 5);
        let ids: Vec<u64> = summary.items.iter().map(|item| item.photo_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 15);
    }

    #[test]
    fn test_group_by_base_name() {
        let photos = vec![
            sample_photo(1, "Cat", "https://images.example.com/1.jpeg"),
            sample_photo(2, "Dog", "https://images.example.com/2.jpeg"),
            sample_photo(3, "C at", "https://images.example.com/3.jpeg"),
        ];
        let groups: Vec<Vec<(usize, String)>> = group_by_base_name(&photos)
            .into_iter()
            .map(|group| group.into_iter().map(|(index, base, _)| (index, base)).collect())
            .collect();
        assert_eq!(
            groups,
            vec![
                vec![(0, "Cat".to_string()), (2, "Cat".to_string())],
                vec![(1, "Dog".to_string())],
            ]
        );
    }

    #[tokio::test]
    async fn test_concurrent_same_base_name_last_in_search_order_wins() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow.jpeg"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(jpeg_bytes(16, 16))
                    .set_delay(Duration::from_millis(400)),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fast.jpeg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(jpeg_bytes(40, 40)))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let photos = vec![
            sample_photo(1, "Cat", &format!("{}/slow.jpeg", server.uri())),
            sample_photo(2, "Cat", &format!("{}/fast.jpeg", server.uri())),
            sample_photo(3, "Dog", &format!("{}/fast.jpeg", server.uri())),
        ];
        let store = Arc::new(RecordingStore::default());
        let mut pipeline = pipeline(dir.path(), photos, store.clone(), false);
        pipeline.settings.max_concurrent_images = 2;

        let summary = pipeline.run(&request(true)).await.unwrap();
        assert_eq!(summary.succeeded(), 3);
        let ids: Vec<u64> = summary.items.iter().map(|item| item.photo_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        let record: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("Cat_data.json")).unwrap()).unwrap();
        assert_eq!(record["id"], 2);
        let filtered = image::open(dir.path().join("Cat_filtered.jpg")).unwrap();
        assert_eq!((filtered.width(), filtered.height()), (40, 40));

        // Both Cat chains uploaded, one after the other
        let cat_keys: Vec<String> = store.keys().into_iter().filter(|key| key.starts_with("Cat_")).collect();
        assert_eq!(
            cat_keys,
            vec![
                "Cat_original.jpg",
                "Cat_filtered.jpg",
                "Cat_data.json",
                "Cat_original.jpg",
                "Cat_filtered.jpg",
                "Cat_data.json"
            ]
        );
    }

    #[tokio::test]
    async fn test_report_written_when_configured() {
        let server = image_server().await;
        let dir = tempfile::tempdir().unwrap();
        let photos = vec![sample_photo(1, "Cat", &format!("{}/1.jpeg", server.uri()))];

        let mut pipeline = pipeline(dir.path(), photos, Arc::new(RecordingStore::default()), false);
        let report = dir.path().join("reports").join("run.md");
        std::fs::create_dir_all(report.parent().unwrap()).unwrap();
        pipeline.settings.report_path = Some(report.clone());

        pipeline.run(&request(false)).await.unwrap();
        let markdown = std::fs::read_to_string(report).unwrap();
        assert!(markdown.contains("- Succeeded: 1"));
    }

    #[tokio::test]
    async fn test_search_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::builder()
            .settings(PipelineConfig {
                output_dir: dir.path().to_path_buf(),
                ..Default::default()
            })
            .storage(StorageConfig::default())
            .api_key("key".to_string())
            .http(http_client())
            .search(Arc::new(StaticPhotoSearch::failing("rate limited")))
            .store(Arc::new(RecordingStore::default()))
            .build();

        let err = pipeline.run(&request(false)).await.unwrap_err();
        assert!(matches!(err, Error::Search { .. }));
    }
}
