//! Command line arguments and pipeline configuration.
//!
//! The per-run parameters (subject, filter, count, upload flag) come from the command line. Everything
//! else is loaded from a YAML file with environment variable overrides. The configuration file path
//! defaults to `imgpipe.yaml` but can be specified via `-f` flag or `IMGPIPE_CONFIG` environment
//! variable. A missing file is not an error: every field has a default.
//!
//! ## Loading Priority
//!
//! 1. **YAML config file** - Base configuration (default: `imgpipe.yaml`)
//! 2. **Environment variables** - Variables prefixed with `IMGPIPE_` override YAML values
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `IMGPIPE_STORAGE__BUCKET=my-bucket` sets the `storage.bucket` field. Variables starting with
//! `IMGPIPE_SECRET_` belong to the environment secret store and are not read as configuration.
//!
//! ## Example
//!
//! ```yaml
//! photos:
//!   base_url: https://api.pexels.com/v1/
//!   request_timeout: 30s
//! secrets:
//!   api_key_name: pexel-api-key
//!   storage_credentials_name: jbtest
//!   store:
//!     type: file
//!     path: /run/secrets/imgpipe.json
//! storage:
//!   bucket: prefect-image-test
//!   prefix_with_subject: true
//! pipeline:
//!   output_dir: ./images
//!   max_concurrent_images: 4
//!   report_path: ./images/report.md
//! ```
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! IMGPIPE_PIPELINE__MAX_CONCURRENT_IMAGES=4
//! IMGPIPE_PIPELINE__FAIL_FAST=true
//! IMGPIPE_ENABLE_OTEL_EXPORT=true
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::Error;
use crate::filters::ImageFilter;

/// Prefix for configuration environment variables
pub const ENV_PREFIX: &str = "IMGPIPE_";

/// Default destination bucket
pub const DEFAULT_BUCKET: &str = "prefect-image-test";

/// Image pipeline to pull down images, apply a filter and upload to S3.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Subject of images
    #[arg(long, required_unless_present = "validate")]
    pub subject: Option<String>,

    /// Image filter to apply to images
    #[arg(long, value_enum, default_value_t = ImageFilter::Blur)]
    pub filter: ImageFilter,

    /// Number of images to process
    #[arg(
        long = "image_count",
        visible_alias = "image-count",
        default_value_t = 10,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub image_count: u32,

    /// Upload the processed images to S3
    #[arg(long = "upload_to_s3", visible_alias = "upload-to-s3")]
    pub upload_to_s3: bool,

    /// Path to configuration file
    #[arg(short = 'f', long, env = "IMGPIPE_CONFIG", default_value = "imgpipe.yaml")]
    pub config: String,

    /// Validate configuration and exit without running the pipeline.
    #[arg(long)]
    pub validate: bool,
}

impl Args {
    /// The run described by these arguments, if a subject was given
    pub fn run_request(&self) -> Option<RunRequest> {
        self.subject.as_ref().map(|subject| RunRequest {
            subject: subject.clone(),
            filter: self.filter,
            count: self.image_count,
            upload: self.upload_to_s3,
        })
    }
}

/// Parameters of a single pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub subject: String,
    pub filter: ImageFilter,
    pub count: u32,
    pub upload: bool,
}

/// Main pipeline configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Photo search API settings
    pub photos: PhotosConfig,
    /// Where the API key and storage credentials come from
    pub secrets: SecretsConfig,
    /// Object storage destination
    pub storage: StorageConfig,
    /// Orchestration settings
    pub pipeline: PipelineConfig,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PhotosConfig {
    /// Base URL of the photo API; `search` is appended
    pub base_url: Url,
    /// Timeout for search and download requests
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for PhotosConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse("https://api.pexels.com/v1/").expect("static URL is valid"),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecretsConfig {
    /// Secret store backend
    pub store: SecretStoreConfig,
    /// Entry holding the photo API key
    pub api_key_name: String,
    /// Entry holding the object storage credential block
    pub storage_credentials_name: String,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            store: SecretStoreConfig::default(),
            api_key_name: "pexel-api-key".to_string(),
            storage_credentials_name: "jbtest".to_string(),
        }
    }
}

/// Secret store backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SecretStoreConfig {
    /// Environment variables named `<prefix><ENTRY_NAME>`
    Env {
        #[serde(default = "SecretStoreConfig::default_env_prefix")]
        prefix: String,
    },
    /// JSON file mapping entry names to values
    File { path: PathBuf },
}

impl SecretStoreConfig {
    fn default_env_prefix() -> String {
        format!("{ENV_PREFIX}SECRET_")
    }
}

impl Default for SecretStoreConfig {
    fn default() -> Self {
        SecretStoreConfig::Env {
            prefix: Self::default_env_prefix(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Destination bucket
    pub bucket: String,
    /// Fixed prefix prepended to every object key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_prefix: Option<String>,
    /// Put each run's objects under `<subject>/`
    pub prefix_with_subject: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: DEFAULT_BUCKET.to_string(),
            key_prefix: None,
            prefix_with_subject: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Directory the artifacts are written to
    pub output_dir: PathBuf,
    /// Images processed at the same time. 1 processes them strictly in order.
    pub max_concurrent_images: usize,
    /// Abort the run on the first failed image instead of skipping it
    pub fail_fast: bool,
    /// Write a Markdown summary of the run here
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            max_concurrent_images: 1,
            fail_fast: false,
            report_path: None,
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if self.pipeline.max_concurrent_images == 0 {
            return Err(Error::Config {
                message: "pipeline.max_concurrent_images must be at least 1".to_string(),
            });
        }

        if self.storage.bucket.trim().is_empty() {
            return Err(Error::Config {
                message: "storage.bucket cannot be empty".to_string(),
            });
        }

        if self.secrets.api_key_name.trim().is_empty() || self.secrets.storage_credentials_name.trim().is_empty() {
            return Err(Error::Config {
                message: "secrets.api_key_name and secrets.storage_credentials_name cannot be empty".to_string(),
            });
        }

        if let SecretStoreConfig::Env { prefix } = &self.secrets.store {
            if prefix.is_empty() {
                return Err(Error::Config {
                    message: "secrets.store.prefix cannot be empty".to_string(),
                });
            }
            if prefix.eq_ignore_ascii_case(ENV_PREFIX)
                || secret_key_prefix(prefix).is_some_and(|rest| {
                    CONFIG_KEYS
                        .iter()
                        .chain(&["config"])
                        .any(|key| key.starts_with(rest.as_str()) || rest.starts_with(key))
                })
            {
                return Err(Error::Config {
                    message: format!("secrets.store.prefix {prefix} overlaps configuration environment variables"),
                });
            }
        }

        if self.photos.request_timeout.is_zero() {
            return Err(Error::Config {
                message: "photos.request_timeout must be positive".to_string(),
            });
        }

        if !matches!(self.photos.base_url.scheme(), "http" | "https") {
            return Err(Error::Config {
                message: format!("photos.base_url must be http(s), got {}", self.photos.base_url),
            });
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        // Load base config file
        let file = Figment::new().merge(Yaml::file(&args.config));

        // Environment variables override specific values. The config path and the env secret
        // store share the prefix and are skipped; a custom secret prefix is only known after a
        // first pass.
        let mut skipped = vec![DEFAULT_SECRET_KEY_PREFIX.to_string()];
        let first_pass = file.clone().merge(env_overrides(skipped.clone()));
        if let Ok(prefix) = first_pass.extract_inner::<String>("secrets.store.prefix")
            && let Some(key_prefix) = secret_key_prefix(&prefix)
            && !skipped.contains(&key_prefix)
        {
            skipped.push(key_prefix);
        }

        file.merge(env_overrides(skipped))
    }
}

const DEFAULT_SECRET_KEY_PREFIX: &str = "secret_";

/// Top-level configuration keys, as they appear after the `IMGPIPE_` prefix
const CONFIG_KEYS: [&str; 5] = ["photos", "secrets", "storage", "pipeline", "enable_otel_export"];

fn env_overrides(skipped: Vec<String>) -> Env {
    Env::prefixed(ENV_PREFIX)
        .filter(move |key| {
            let key = key.as_str().to_ascii_lowercase();
            key != "config" && !skipped.iter().any(|prefix| key.starts_with(prefix.as_str()))
        })
        .split("__")
}

/// The config key prefix an env secret store prefix occupies, if it lives under `IMGPIPE_`
fn secret_key_prefix(store_prefix: &str) -> Option<String> {
    let head = store_prefix.get(..ENV_PREFIX.len())?;
    if !head.eq_ignore_ascii_case(ENV_PREFIX) {
        return None;
    }
    let rest = store_prefix[ENV_PREFIX.len()..].to_ascii_lowercase();
    (!rest.is_empty()).then_some(rest)
}
