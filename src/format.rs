#![forbid(unsafe_code)]

//! Format model and the selection policy applied to a user-supplied hint.

use serde::Deserialize;
use thiserror::Error;

/// One encoding/container/quality variant of a media item, as reported by the
/// extraction tool's `--dump-single-json` output. Everything except the id is
/// optional because extractors for smaller sites leave most fields unset.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaFormat {
    #[serde(default)]
    pub format_id: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub ext: Option<String>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub filesize: Option<i64>,
    pub filesize_approx: Option<i64>,
    pub url: Option<String>,
}

impl MediaFormat {
    /// The tool reports absent video as the literal codec string `none`.
    pub fn has_video(&self) -> bool {
        matches!(self.vcodec.as_deref(), Some(codec) if codec != "none")
    }

    pub fn has_audio(&self) -> bool {
        matches!(self.acodec.as_deref(), Some(codec) if codec != "none")
    }

    /// Exact size when known, otherwise the tool's estimate.
    pub fn size_bytes(&self) -> Option<i64> {
        self.filesize.or(self.filesize_approx)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("no downloadable format with both audio and video was found")]
    NoSuitableFormat,
    #[error("no audio-bearing format is available for this media")]
    NoAudioFormat,
}

/// Picks a format for `hint`.
///
/// `"best"` prefers the tallest format carrying both audio and video, then
/// any audio-bearing format. Other hints match a format id exactly or a
/// height written as `<number>p`; an unmatched hint falls back to the first
/// listed format instead of failing — callers depend on that leniency, so do
/// not tighten it here.
pub fn select_format<'a>(
    formats: &'a [MediaFormat],
    hint: &str,
) -> Result<&'a MediaFormat, FormatError> {
    if formats.is_empty() {
        return Err(FormatError::NoSuitableFormat);
    }

    if hint == "best" {
        return formats
            .iter()
            .filter(|f| f.has_video() && f.has_audio())
            .max_by_key(|f| f.height.unwrap_or(0))
            .or_else(|| formats.iter().find(|f| f.has_audio()))
            .ok_or(FormatError::NoSuitableFormat);
    }

    if let Some(found) = formats.iter().find(|f| f.format_id == hint) {
        return Ok(found);
    }
    if let Some(height) = parse_height_hint(hint)
        && let Some(found) = formats.iter().find(|f| f.height == Some(height))
    {
        return Ok(found);
    }

    Ok(&formats[0])
}

/// Picks the tallest format with an audio codec, for callers that only care
/// about the audio track.
pub fn select_audio_format(formats: &[MediaFormat]) -> Result<&MediaFormat, FormatError> {
    formats
        .iter()
        .filter(|f| f.has_audio())
        .max_by_key(|f| f.height.unwrap_or(0))
        .ok_or(FormatError::NoAudioFormat)
}

fn parse_height_hint(hint: &str) -> Option<i64> {
    hint.strip_suffix('p')?.parse().ok()
}
