//! End-to-end runs against a mocked photo API and object store.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use wiremock::matchers::{header, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::config::{Config, SecretStoreConfig};
use crate::filters::ImageFilter;
use crate::photos::PhotoRecord;
use crate::secrets::{Credentials, StorageCredentials};
use crate::test_utils::{RecordingStore, jpeg_bytes, sample_photo, search_body, test_config};
use crate::{Application, Error, RunRequest};

const API_KEY: &str = "e2e-api-key";

fn cats(server: &MockServer) -> Vec<PhotoRecord> {
    vec![
        sample_photo(101, "Cat in the sun", &format!("{}/photos/101.jpeg", server.uri())),
        sample_photo(102, "Sleepy cat", &format!("{}/photos/102.jpeg", server.uri())),
    ]
}

/// Mount a search endpoint returning `photos` and an image endpoint serving JPEGs
async fn mount_photo_api(server: &MockServer, photos: &[PhotoRecord]) {
    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .and(query_param("query", "cats"))
        .and(query_param("per_page", photos.len().to_string()))
        .and(header("Authorization", API_KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_body(photos)))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/photos/\d+\.jpeg$"))
        .and(header("Authorization", API_KEY))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(jpeg_bytes(24, 16)))
        .mount(server)
        .await;
}

fn config_for(server: &MockServer, output_dir: &Path) -> Config {
    let mut config = test_config(output_dir);
    config.photos.base_url = format!("{}/v1/", server.uri()).parse().unwrap();
    config
}

fn credentials() -> Credentials {
    Credentials {
        api_key: API_KEY.to_string(),
        storage: StorageCredentials::default(),
    }
}

fn request(upload: bool) -> RunRequest {
    RunRequest {
        subject: "cats".to_string(),
        filter: ImageFilter::Sharpen,
        count: 2,
        upload,
    }
}

fn files_in(dir: &Path) -> BTreeSet<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect()
}

fn expected_files() -> BTreeSet<String> {
    [
        "Catinthesun_original.jpg",
        "Catinthesun_filtered.jpg",
        "Catinthesun_data.json",
        "Sleepycat_original.jpg",
        "Sleepycat_filtered.jpg",
        "Sleepycat_data.json",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[test_log::test(tokio::test)]
async fn test_e2e_local_run_writes_six_files() {
    let server = MockServer::start().await;
    mount_photo_api(&server, &cats(&server)).await;
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RecordingStore::default());

    let app = Application::with_object_store(config_for(&server, dir.path()), credentials(), store.clone()).unwrap();
    let summary = app.run(&request(false)).await.unwrap();

    assert_eq!(summary.found, 2);
    assert_eq!(summary.succeeded(), 2);
    assert_eq!(files_in(dir.path()), expected_files());
    assert!(store.puts().is_empty());

    // Every file the summary reports lives in the configured output directory
    let reported: BTreeSet<String> = summary.files().into_iter().map(String::from).collect();
    assert_eq!(reported, expected_files());
    for file in summary.files() {
        assert!(app.config().pipeline.output_dir.join(file).is_file());
    }

    let record: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.path().join("Sleepycat_data.json")).unwrap()).unwrap();
    assert_eq!(record["id"], 102);
    assert_eq!(record["src"], format!("{}/photos/102.jpeg", server.uri()));

    let filtered = image::open(dir.path().join("Catinthesun_filtered.jpg")).unwrap();
    assert_eq!((filtered.width(), filtered.height()), (24, 16));
}

#[tokio::test]
async fn test_e2e_upload_puts_every_file_under_its_name() {
    let server = MockServer::start().await;
    mount_photo_api(&server, &cats(&server)).await;
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RecordingStore::default());

    let app = Application::with_object_store(config_for(&server, dir.path()), credentials(), store.clone()).unwrap();
    let summary = app.run(&request(true)).await.unwrap();
    assert_eq!(summary.succeeded(), 2);

    let puts = store.puts();
    assert_eq!(puts.len(), 6);
    for put in &puts {
        assert_eq!(put.bucket, "prefect-image-test");
        assert_eq!(put.path, dir.path().join(&put.key));
        assert_eq!(put.size, std::fs::metadata(&put.path).unwrap().len());
    }
    let keys: BTreeSet<String> = puts.into_iter().map(|put| put.key).collect();
    assert_eq!(keys, expected_files());
}

#[tokio::test]
async fn test_e2e_missing_image_is_skipped() {
    let server = MockServer::start().await;
    let mut photos = cats(&server);
    photos[0].src.original = format!("{}/gone/101.jpeg", server.uri());
    mount_photo_api(&server, &photos).await;
    Mock::given(method("GET"))
        .and(path("/gone/101.jpeg"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let app = Application::with_object_store(
        config_for(&server, dir.path()),
        credentials(),
        Arc::new(RecordingStore::default()),
    )
    .unwrap();

    let summary = app.run(&request(false)).await.unwrap();
    assert_eq!(summary.succeeded(), 1);
    assert_eq!(summary.failed(), 1);
    assert_eq!(files_in(dir.path()).len(), 3);
    assert!(!dir.path().join("Catinthesun_original.jpg").exists());
}

#[tokio::test]
async fn test_e2e_fail_fast_stops_on_missing_image() {
    let server = MockServer::start().await;
    let mut photos = cats(&server);
    photos[0].src.original = format!("{}/gone/101.jpeg", server.uri());
    mount_photo_api(&server, &photos).await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = config_for(&server, dir.path());
    config.pipeline.fail_fast = true;
    let app = Application::with_object_store(config, credentials(), Arc::new(RecordingStore::default())).unwrap();

    let err = app.run(&request(false)).await.unwrap_err();
    assert!(matches!(err, Error::DownloadFailed { status: 404, .. }));
    assert!(files_in(dir.path()).is_empty());
}

#[tokio::test]
async fn test_e2e_search_rejected_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let app = Application::with_object_store(
        config_for(&server, dir.path()),
        credentials(),
        Arc::new(RecordingStore::default()),
    )
    .unwrap();

    let err = app.run(&request(false)).await.unwrap_err();
    assert!(matches!(err, Error::Search { .. }));
}

#[tokio::test]
async fn test_e2e_concurrent_run_with_report() {
    let server = MockServer::start().await;
    mount_photo_api(&server, &cats(&server)).await;
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("images");
    let report = dir.path().join("report.md");

    let mut config = config_for(&server, &out);
    config.pipeline.max_concurrent_images = 4;
    config.pipeline.report_path = Some(report.clone());
    let app = Application::with_object_store(config, credentials(), Arc::new(RecordingStore::default())).unwrap();

    let summary = app.run(&request(false)).await.unwrap();
    assert_eq!(summary.succeeded(), 2);
    assert_eq!(files_in(&out), expected_files());

    let markdown = std::fs::read_to_string(report).unwrap();
    assert!(markdown.contains("# Image pipeline run: cats"));
    assert!(markdown.contains("| 101 |"));
    assert!(markdown.contains("| 102 |"));
}

/// Full wiring: credentials from a secrets file, uploads through the S3 client to a mock endpoint
#[tokio::test]
async fn test_e2e_application_from_secrets_file_uploads_to_s3() {
    let server = MockServer::start().await;
    mount_photo_api(&server, &cats(&server)).await;
    Mock::given(method("PUT"))
        .and(path_regex(r"^/prefect-image-test/[A-Za-z]+_(original\.jpg|filtered\.jpg|data\.json)$"))
        .respond_with(ResponseTemplate::new(200))
        .expect(6)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let secrets_path = dir.path().join("secrets.json");
    std::fs::write(
        &secrets_path,
        serde_json::to_vec(&serde_json::json!({
            "pexel-api-key": API_KEY,
            "jbtest": {
                "aws_access_key_id": "AKIDEXAMPLE",
                "aws_secret_access_key": "wJalrXUtnFEMI",
                "region_name": "us-east-1",
                "aws_client_parameters": { "endpoint_url": server.uri() }
            }
        }))
        .unwrap(),
    )
    .unwrap();

    let out = dir.path().join("images");
    let mut config = config_for(&server, &out);
    config.secrets.store = SecretStoreConfig::File { path: secrets_path };

    let app = Application::new(config).await.unwrap();
    let summary = app.run(&request(true)).await.unwrap();
    assert_eq!(summary.succeeded(), 2);
    assert_eq!(files_in(&out), expected_files());
}

#[tokio::test]
async fn test_e2e_missing_secret_fails_before_any_request() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let secrets_path = dir.path().join("secrets.json");
    std::fs::write(&secrets_path, br#"{"jbtest": {}}"#).unwrap();

    let mut config = config_for(&server, dir.path());
    config.secrets.store = SecretStoreConfig::File { path: secrets_path };

    let err = Application::new(config).await.err().unwrap();
    assert!(matches!(err, Error::MissingSecret { ref name, .. } if name == "pexel-api-key"));
    assert!(server.received_requests().await.unwrap().is_empty());
}
