//! # imgpipe: search, filter and archive stock photos
//!
//! `imgpipe` is a batch job. One invocation searches a Pexels-compatible photo API for a subject,
//! downloads the original of each hit, applies a convolution filter, writes a JSON metadata record
//! next to the images and optionally uploads all three artifacts to an S3 bucket.
//!
//! ## Flow
//!
//! 1. [`config::Args`] and [`Config`] describe the run; credentials come from a
//!    [`secrets::SecretStore`] and are resolved once, before anything else happens.
//! 2. [`photos::PexelsClient`] finds up to `image_count` photos.
//! 3. For every photo, [`pipeline::Pipeline`] runs download, filter, metadata and upload in order.
//!    A photo that fails is skipped and counted unless `pipeline.fail_fast` is set.
//! 4. A [`pipeline::RunSummary`] is logged, and written as Markdown if a report path is configured.
//!
//! Per photo, with `alt` text "Two dogs playing", the run produces `Twodogsplaying_original.jpg`,
//! `Twodogsplaying_filtered.jpg` and `Twodogsplaying_data.json`. Uploaded objects use the file names
//! as keys.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use imgpipe::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     imgpipe::install_crypto_provider();
//!
//!     let args = imgpipe::config::Args::parse();
//!     let config = Config::load(&args)?;
//!     imgpipe::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let request = args.run_request().expect("--subject is required");
//!     let summary = Application::new(config).await?.run(&request).await?;
//!     println!("{} of {} images processed", summary.succeeded(), summary.found);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options and [`secrets`] for credential stores.
pub mod artifacts;
pub mod config;
pub mod download;
pub mod errors;
pub mod filters;
pub mod metadata;
pub mod photos;
pub mod pipeline;
pub mod secrets;
pub mod storage;
pub mod telemetry;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

#[cfg(test)]
mod test;

use std::sync::{Arc, Once};

pub use config::{Config, RunRequest};
use config::PhotosConfig;
use errors::Result;
pub use errors::Error;
use photos::PexelsClient;
use pipeline::{Pipeline, RunSummary};
use secrets::Credentials;
use storage::{ObjectStore, S3Store};
use tracing::{debug, info, instrument};

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Install the rustls crypto provider used by every TLS client in the process.
///
/// Must run before the first HTTP or S3 client is built. Safe to call more than once.
pub fn install_crypto_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        // Err means another provider is already installed, which is fine
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

/// HTTP client shared by search and download
pub fn build_http_client(config: &PhotosConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(config.request_timeout)
        .user_agent(USER_AGENT)
        .build()?)
}

/// The wired-up pipeline: credentials resolved, clients built.
pub struct Application {
    config: Config,
    pipeline: Pipeline,
}

impl Application {
    /// Resolve credentials from the configured secret store and connect the S3 client.
    ///
    /// Fails before any image work if a secret is missing or malformed.
    #[instrument(skip_all, err)]
    pub async fn new(config: Config) -> Result<Self> {
        let secret_store = secrets::open_store(&config.secrets.store)?;
        let credentials = secrets::resolve_credentials(secret_store.as_ref(), &config.secrets)?;
        let object_store = S3Store::connect(&credentials.storage, config.storage.bucket.clone()).await;
        Self::with_object_store(config, credentials, Arc::new(object_store))
    }

    /// Build the application around an already constructed object store.
    pub fn with_object_store(config: Config, credentials: Credentials, store: Arc<dyn ObjectStore>) -> Result<Self> {
        install_crypto_provider();
        let http = build_http_client(&config.photos)?;
        let search = PexelsClient::new(http.clone(), config.photos.base_url.clone(), credentials.api_key.clone());

        debug!(
            base_url = %config.photos.base_url,
            bucket = store.bucket(),
            output_dir = %config.pipeline.output_dir.display(),
            "Application configured"
        );

        let pipeline = Pipeline::builder()
            .settings(config.pipeline.clone())
            .storage(config.storage.clone())
            .api_key(credentials.api_key)
            .http(http)
            .search(Arc::new(search))
            .store(store)
            .build();

        Ok(Self { config, pipeline })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the pipeline once.
    pub async fn run(&self, request: &RunRequest) -> Result<RunSummary> {
        info!(
            subject = %request.subject,
            filter = %request.filter,
            count = request.count,
            upload = request.upload,
            "Starting image pipeline"
        );
        self.pipeline.run(request).await
    }
}
