//! Run summary and Markdown report.

use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

use crate::artifacts::ArtifactSet;
use crate::config::RunRequest;
use crate::errors::{Error, Result};
use crate::filters::ImageFilter;
use crate::photos::PhotoRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemStatus {
    Succeeded { artifacts: ArtifactSet, uploaded: bool },
    Failed { kind: &'static str, error: String },
}

/// What happened to one photo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemOutcome {
    pub photo_id: u64,
    pub source_url: String,
    pub status: ItemStatus,
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, ItemStatus::Succeeded { .. })
    }
}

/// Result of a whole pipeline run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub subject: String,
    pub filter: ImageFilter,
    pub requested: u32,
    pub found: usize,
    pub items: Vec<ItemOutcome>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn new(request: &RunRequest, found: usize) -> Self {
        Self {
            subject: request.subject.clone(),
            filter: request.filter,
            requested: request.count,
            found,
            items: Vec::with_capacity(found),
            elapsed: Duration::ZERO,
        }
    }

    pub fn record_success(&mut self, photo: &PhotoRecord, artifacts: ArtifactSet, uploaded: bool) {
        self.items.push(ItemOutcome {
            photo_id: photo.id,
            source_url: photo.src.original.clone(),
            status: ItemStatus::Succeeded { artifacts, uploaded },
        });
    }

    pub fn record_failure(&mut self, photo: &PhotoRecord, error: &Error) {
        self.items.push(ItemOutcome {
            photo_id: photo.id,
            source_url: photo.src.original.clone(),
            status: ItemStatus::Failed {
                kind: error.kind(),
                error: error.to_string(),
            },
        });
    }

    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|item| item.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.items.len() - self.succeeded()
    }

    /// Local files written by successful items, in processing order
    pub fn files(&self) -> Vec<&str> {
        self.items
            .iter()
            .filter_map(|item| match &item.status {
                ItemStatus::Succeeded { artifacts, .. } => Some(artifacts.files()),
                ItemStatus::Failed { .. } => None,
            })
            .flatten()
            .collect()
    }

    pub fn log(&self) {
        if self.failed() > 0 {
            warn!(
                subject = %self.subject,
                found = self.found,
                succeeded = self.succeeded(),
                failed = self.failed(),
                elapsed_ms = self.elapsed.as_millis() as u64,
                "Pipeline finished with failures"
            );
        } else {
            info!(
                subject = %self.subject,
                found = self.found,
                succeeded = self.succeeded(),
                elapsed_ms = self.elapsed.as_millis() as u64,
                "Pipeline finished"
            );
        }
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Image pipeline run: {}", escape(&self.subject));
        let _ = writeln!(out);
        let _ = writeln!(out, "- Filter: {}", self.filter);
        let _ = writeln!(out, "- Requested: {}", self.requested);
        let _ = writeln!(out, "- Found: {}", self.found);
        let _ = writeln!(out, "- Succeeded: {}", self.succeeded());
        let _ = writeln!(out, "- Failed: {}", self.failed());
        let _ = writeln!(out, "- Elapsed: {:.1}s", self.elapsed.as_secs_f64());
        let _ = writeln!(out);
        let _ = writeln!(out, "| Photo | Source | Status | Files |");
        let _ = writeln!(out, "|---|---|---|---|");
        for item in &self.items {
            let (status, detail) = match &item.status {
                ItemStatus::Succeeded { artifacts, uploaded } => {
                    let status = if *uploaded { "uploaded" } else { "ok" };
                    (status.to_string(), artifacts.files().join(", "))
                }
                ItemStatus::Failed { kind, error } => (format!("failed ({kind})"), error.clone()),
            };
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} |",
                item.photo_id,
                escape(&item.source_url),
                status,
                escape(&detail)
            );
        }
        out
    }

    pub async fn write_report(&self, path: &Path) -> Result<()> {
        tokio::fs::write(path, self.to_markdown())
            .await
            .map_err(|e| Error::io(path, e))?;
        info!(path = %path.display(), "Wrote run report");
        Ok(())
    }
}

/// Keep table cells on one line and intact
fn escape(text: &str) -> String {
    text.replace('|', "\\|").replace(['\n', '\r'], " ")
}
