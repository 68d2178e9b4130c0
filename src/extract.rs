#![forbid(unsafe_code)]

//! Thin adapter around the external `yt-dlp` program. All site scraping,
//! codec negotiation, and network handling stays inside the tool; this module
//! shells out, parses the JSON it prints, and reports failures. Nothing is
//! retried.

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::format::MediaFormat;

/// Extracted metadata for one media page.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaInfo {
    pub title: Option<String>,
    pub duration: Option<f64>,
    #[serde(default)]
    pub formats: Vec<MediaFormat>,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("could not run {bin}: {source}")]
    Spawn {
        bin: String,
        #[source]
        source: io::Error,
    },
    /// The tool exited non-zero; carries its last stderr line.
    #[error("{message}")]
    Failed { message: String },
    /// The tool produced output that is not valid UTF-8; a fixed message is
    /// surfaced instead of raw bytes.
    #[error("unable to process request due to encoding issues in the extractor output")]
    Encoding,
    #[error("could not parse extractor metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// The two operations the request handlers need from the extraction tool,
/// modeled as a trait so tests can substitute a fake without touching the
/// network.
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    /// Reads remote metadata only; never downloads media bytes.
    async fn fetch_metadata(&self, url: &str) -> Result<MediaInfo, ExtractError>;

    /// Downloads `url` constrained to `format_hint` into a file matching
    /// `output_template`. The template fixes the stem; the extension is
    /// resolved by the tool, so callers must locate the result afterwards.
    async fn download_to_path(
        &self,
        url: &str,
        format_hint: &str,
        output_template: &str,
    ) -> Result<(), ExtractError>;
}

/// Production implementation shelling out to yt-dlp.
pub struct YtDlpExtractor {
    bin: PathBuf,
}

impl YtDlpExtractor {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into() }
    }

    fn command(&self) -> Command {
        Command::new(&self.bin)
    }

    async fn run(&self, command: &mut Command) -> Result<std::process::Output, ExtractError> {
        let output = command.output().await.map_err(|source| ExtractError::Spawn {
            bin: self.bin.display().to_string(),
            source,
        })?;
        if !output.status.success() {
            return Err(ExtractError::Failed {
                message: failure_message(&output.stderr),
            });
        }
        Ok(output)
    }
}

impl Default for YtDlpExtractor {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

#[async_trait]
impl MediaExtractor for YtDlpExtractor {
    async fn fetch_metadata(&self, url: &str) -> Result<MediaInfo, ExtractError> {
        debug!(url, "fetching media metadata");
        let mut command = self.command();
        command
            .arg("--dump-single-json")
            .arg("--skip-download")
            .arg("--no-warnings")
            .arg("--no-progress")
            .arg(url);
        let output = self.run(&mut command).await?;

        let raw = String::from_utf8(output.stdout).map_err(|_| ExtractError::Encoding)?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn download_to_path(
        &self,
        url: &str,
        format_hint: &str,
        output_template: &str,
    ) -> Result<(), ExtractError> {
        debug!(url, format_hint, output_template, "downloading media");
        let mut command = self.command();
        command
            .arg("-f")
            .arg(format_hint)
            .arg("-o")
            .arg(output_template)
            .arg("--merge-output-format")
            .arg("mp4")
            .arg("--no-warnings")
            .arg("--no-progress")
            .arg(url);
        self.run(&mut command).await?;
        Ok(())
    }
}

/// Last non-empty stderr line; falls back to fixed text when stderr is empty
/// or not representable as UTF-8.
fn failure_message(stderr: &[u8]) -> String {
    let Ok(text) = std::str::from_utf8(stderr) else {
        return ExtractError::Encoding.to_string();
    };
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or("the media extractor failed without diagnostics")
        .to_string()
}
