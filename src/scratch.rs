#![forbid(unsafe_code)]

//! Per-request scratch files: unique ids, output templates for the extraction
//! tool, locating whatever file the tool produced, and streaming it back with
//! unconditional cleanup.

use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use futures_util::{Stream, StreamExt};
use thiserror::Error;
use tokio::fs::File;
use tokio_util::bytes::Bytes;
use tokio_util::io::ReaderStream;
use tracing::warn;

/// Entries included in a `FileNotFound` report; keeps the message useful
/// without dumping a whole directory.
const LISTING_LIMIT: usize = 10;

#[derive(Debug, Error)]
pub enum ScratchError {
    #[error("no downloaded file found for id {id}; scratch dir holds {listing:?}")]
    FileNotFound { id: String, listing: Vec<String> },
    #[error("could not read scratch directory {}: {source}", .dir.display())]
    Scan {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Shared scratch directory staging one file per in-flight download.
#[derive(Debug, Clone)]
pub struct ScratchDir {
    dir: PathBuf,
}

impl ScratchDir {
    /// Picks the first writable location out of: the configured directory,
    /// the system temp directory, the current working directory.
    pub fn resolve(configured: Option<&Path>) -> Self {
        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Some(dir) = configured {
            candidates.push(dir.to_path_buf());
        }
        candidates.push(std::env::temp_dir());
        if let Ok(cwd) = std::env::current_dir() {
            candidates.push(cwd);
        }

        for candidate in candidates {
            if dir_is_writable(&candidate) {
                return Self { dir: candidate };
            }
        }
        // Nothing probed writable; keep the system temp dir and let the
        // download itself report the failure.
        Self {
            dir: std::env::temp_dir(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Allocates a slot with a fresh unique id.
    pub fn allocate(&self) -> DownloadSlot {
        DownloadSlot {
            id: new_download_id(),
            dir: self.dir.clone(),
        }
    }
}

/// Checks writability by round-tripping an anonymous temp file.
pub fn dir_is_writable(dir: &Path) -> bool {
    tempfile::tempfile_in(dir).is_ok()
}

/// Eight hex characters of randomness; enough to make cross-request
/// collisions in a shared scratch directory negligible.
pub fn new_download_id() -> String {
    format!("{:08x}", rand::random::<u32>())
}

/// One in-flight download: a unique stem inside the scratch directory. The
/// extension is whatever the extraction tool settles on, so the produced file
/// has to be found by stem scan after the fact.
#[derive(Debug)]
pub struct DownloadSlot {
    id: String,
    dir: PathBuf,
}

impl DownloadSlot {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Output template handed to the extraction tool.
    pub fn output_template(&self) -> String {
        self.dir
            .join(format!("{}.%(ext)s", self.id))
            .to_string_lossy()
            .into_owned()
    }

    /// Finds the file the tool produced for this slot's stem.
    pub fn locate(&self) -> Result<PathBuf, ScratchError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| ScratchError::Scan {
            dir: self.dir.clone(),
            source,
        })?;

        let mut listing = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(&self.id) {
                return Ok(entry.path());
            }
            if listing.len() < LISTING_LIMIT {
                listing.push(name);
            }
        }

        Err(ScratchError::FileNotFound {
            id: self.id.clone(),
            listing,
        })
    }
}

/// Deletes the wrapped path when dropped. Removal failures are logged and
/// swallowed; cleanup must never turn into a request failure.
#[derive(Debug)]
struct CleanupGuard {
    path: PathBuf,
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path)
            && err.kind() != ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), error = %err, "could not remove scratch file");
        }
    }
}

/// Opens `path` and returns a chunked byte stream that removes the file when
/// the stream is dropped: after the last chunk, on a read error, or when the
/// consumer disconnects mid-body.
pub async fn stream_with_cleanup(
    path: PathBuf,
) -> io::Result<impl Stream<Item = io::Result<Bytes>> + Send> {
    let guard = CleanupGuard { path: path.clone() };
    let file = File::open(&path).await?;
    Ok(ReaderStream::new(file).map(move |chunk| {
        let _held = &guard;
        chunk
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn slot_in(dir: &Path, id: &str) -> DownloadSlot {
        DownloadSlot {
            id: id.to_string(),
            dir: dir.to_path_buf(),
        }
    }

    #[test]
    fn download_ids_are_short_hex() {
        let id = new_download_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(new_download_id(), id);
    }

    #[test]
    fn resolve_prefers_a_writable_configured_dir() {
        let dir = tempdir().unwrap();
        let scratch = ScratchDir::resolve(Some(dir.path()));
        assert_eq!(scratch.path(), dir.path());
    }

    #[test]
    fn resolve_skips_missing_configured_dir() {
        let scratch = ScratchDir::resolve(Some(Path::new("/definitely/not/here")));
        assert_ne!(scratch.path(), Path::new("/definitely/not/here"));
    }

    #[test]
    fn template_embeds_id_and_leaves_extension_open() {
        let dir = tempdir().unwrap();
        let slot = slot_in(dir.path(), "abc12345");
        let template = slot.output_template();
        assert!(template.contains("abc12345"));
        assert!(template.ends_with(".%(ext)s"));
    }

    #[test]
    fn locate_finds_the_matching_stem() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("unrelated.webm"), b"x").unwrap();
        fs::write(dir.path().join("abc12345.mp4"), b"x").unwrap();
        fs::write(dir.path().join("zz999999.mkv"), b"x").unwrap();

        let slot = slot_in(dir.path(), "abc12345");
        let found = slot.locate().unwrap();
        assert_eq!(found.file_name().unwrap(), "abc12345.mp4");
    }

    #[test]
    fn locate_reports_a_bounded_listing_on_miss() {
        let dir = tempdir().unwrap();
        for i in 0..15 {
            fs::write(dir.path().join(format!("other-{i}.mp4")), b"x").unwrap();
        }

        let slot = slot_in(dir.path(), "abc12345");
        match slot.locate().unwrap_err() {
            ScratchError::FileNotFound { id, listing } => {
                assert_eq!(id, "abc12345");
                assert_eq!(listing.len(), LISTING_LIMIT);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn locate_fails_on_unreadable_directory() {
        let slot = slot_in(Path::new("/definitely/not/here"), "abc12345");
        assert!(matches!(slot.locate(), Err(ScratchError::Scan { .. })));
    }

    #[tokio::test]
    async fn file_is_deleted_after_the_stream_is_consumed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("abc12345.mp4");
        fs::write(&path, b"media bytes").unwrap();

        let mut stream = stream_with_cleanup(path.clone()).await.unwrap();
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, b"media bytes");

        drop(stream);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn file_is_deleted_when_the_consumer_disconnects() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("abc12345.mp4");
        fs::write(&path, vec![0u8; 64 * 1024]).unwrap();

        let stream = stream_with_cleanup(path.clone()).await.unwrap();
        // Dropping without reading stands in for a client that went away.
        drop(stream);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn open_failure_still_cleans_up_silently() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.mp4");
        assert!(stream_with_cleanup(path).await.is_err());
    }
}
