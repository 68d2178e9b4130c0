#![forbid(unsafe_code)]

//! HTTP surface of vidrelay: a small axum app that relays media from
//! third-party hosting sites. Extraction and downloading are delegated to
//! yt-dlp behind the `MediaExtractor` trait; the handlers orchestrate format
//! selection, scratch files, and streaming.

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result, anyhow};
use axum::{
    Json, Router,
    body::Body,
    extract::{Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use vidrelay::{
    config::{ConfigOverrides, resolve_config},
    extract::{ExtractError, MediaExtractor, YtDlpExtractor},
    filename::{content_disposition, sanitize_filename},
    format::{FormatError, MediaFormat, select_audio_format, select_format},
    scratch::{ScratchDir, dir_is_writable, stream_with_cleanup},
    security::ensure_not_root,
};

/// Hard ceilings enforced by the downstream transcription service.
const TRANSCRIPTION_MAX_MINUTES: f64 = 135.0;
const TRANSCRIPTION_MAX_MEGABYTES: f64 = 1000.0;

const BYTES_PER_MEGABYTE: f64 = 1024.0 * 1024.0;

/// Known-good public video used by the smoke-test endpoint.
const SMOKE_TEST_URL: &str = "https://www.youtube.com/watch?v=BaW_jenozKc";

#[derive(Debug, Clone, Default)]
struct ServerArgs {
    host: Option<String>,
    port: Option<u16>,
    scratch_dir: Option<PathBuf>,
    env_path: Option<PathBuf>,
}

impl ServerArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(std::env::args().skip(1))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = Self::default();
        let mut args = iter.into_iter();
        while let Some(arg) = args.next() {
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) => (flag.to_string(), Some(value.to_string())),
                None => (arg, None),
            };
            let value = match inline {
                Some(value) => value,
                None => match flag.as_str() {
                    "--host" | "--port" | "--scratch-dir" | "--env" => args
                        .next()
                        .ok_or_else(|| anyhow!("{flag} requires a value"))?,
                    other => return Err(anyhow!("unknown argument: {other}")),
                },
            };
            match flag.as_str() {
                "--host" => parsed.host = Some(value),
                "--port" => parsed.port = Some(parse_port(&value)?),
                "--scratch-dir" => parsed.scratch_dir = Some(PathBuf::from(value)),
                "--env" => parsed.env_path = Some(PathBuf::from(value)),
                other => return Err(anyhow!("unknown argument: {other}")),
            }
        }
        Ok(parsed)
    }
}

fn parse_port(value: &str) -> Result<u16> {
    value
        .parse::<u16>()
        .context("expected a numeric port between 0 and 65535")
}

/// Shared state injected into every handler.
#[derive(Clone)]
struct AppState {
    extractor: Arc<dyn MediaExtractor>,
    scratch: Arc<ScratchDir>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    /// 500 for anything the extraction tool or filesystem throws at us.
    fn internal(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: detail.into(),
        }
    }

    /// 400 is reserved for unmet format/audio preconditions.
    fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }

    fn from_selection(err: FormatError) -> Self {
        Self::bad_request(err.to_string())
    }
}

impl From<ExtractError> for ApiError {
    fn from(err: ExtractError) -> Self {
        Self::internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
struct MediaQuery {
    url: String,
    #[serde(default = "default_format_hint")]
    format: String,
}

fn default_format_hint() -> String {
    "best".to_string()
}

#[derive(Debug, Deserialize)]
struct TranscriptionQuery {
    url: String,
    #[serde(default = "default_language")]
    language: String,
}

fn default_language() -> String {
    "auto".to_string()
}

/// The query layer already percent-decodes once, but the original clients
/// send doubly-encoded URLs; one more pass is applied. URLs without percent
/// escapes come through unchanged.
fn decode_url(raw: &str) -> String {
    match urlencoding::decode(raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw.to_string(),
    }
}

async fn capabilities() -> Json<serde_json::Value> {
    Json(json!({
        "message": "vidrelay media relay API",
        "endpoints": {
            "/download": "stream a downloaded media file (url, format)",
            "/extract-url": "resolve a direct media URL (url, format)",
            "/gladia-url": "resolve a direct audio URL for transcription (url, language)",
            "/debug": "runtime environment report",
            "/test-download": "metadata smoke test against a fixed URL"
        }
    }))
}

#[derive(Debug, Serialize)]
struct DebugReport {
    platform: &'static str,
    temp_dir: String,
    current_dir: String,
    temp_dir_writable: bool,
    current_dir_writable: bool,
}

async fn debug_report(State(state): State<AppState>) -> Json<DebugReport> {
    let current_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    Json(DebugReport {
        platform: std::env::consts::OS,
        temp_dir: state.scratch.path().display().to_string(),
        current_dir: current_dir.display().to_string(),
        temp_dir_writable: dir_is_writable(state.scratch.path()),
        current_dir_writable: dir_is_writable(&current_dir),
    })
}

/// Smoke test: metadata fetch against a fixed URL, reported as JSON either
/// way. Not a production code path.
async fn smoke_test(State(state): State<AppState>) -> Json<serde_json::Value> {
    match state.extractor.fetch_metadata(SMOKE_TEST_URL).await {
        Ok(info) => Json(json!({
            "status": "ok",
            "title": info.title,
            "duration": info.duration,
            "formats_available": info.formats.len(),
        })),
        Err(err) => Json(json!({ "status": "error", "error": err.to_string() })),
    }
}

#[derive(Debug, Serialize)]
struct DirectUrlResponse {
    video_url: String,
    title: String,
    duration: Option<f64>,
    format_id: String,
    resolution: String,
    filesize: Option<i64>,
    has_video: bool,
    has_audio: bool,
    browser_compatible: bool,
}

async fn extract_url(
    State(state): State<AppState>,
    Query(query): Query<MediaQuery>,
) -> ApiResult<Json<DirectUrlResponse>> {
    let url = decode_url(&query.url);
    let info = state.extractor.fetch_metadata(&url).await?;
    let chosen = select_format(&info.formats, &query.format).map_err(ApiError::from_selection)?;
    let video_url = chosen
        .url
        .clone()
        .ok_or_else(|| ApiError::internal("selected format does not expose a direct URL"))?;

    Ok(Json(DirectUrlResponse {
        video_url,
        title: info.title.clone().unwrap_or_else(|| "video".to_string()),
        duration: info.duration,
        format_id: chosen.format_id.clone(),
        resolution: describe_resolution(chosen),
        filesize: chosen.size_bytes(),
        has_video: chosen.has_video(),
        has_audio: chosen.has_audio(),
        browser_compatible: true,
    }))
}

fn describe_resolution(format: &MediaFormat) -> String {
    match (format.width, format.height) {
        (Some(width), Some(height)) => format!("{width}x{height}"),
        (None, Some(height)) => format!("{height}p"),
        _ => "audio only".to_string(),
    }
}

#[derive(Debug, Serialize)]
struct TranscriptionSourceResponse {
    audio_url: String,
    title: String,
    duration: Option<f64>,
    duration_minutes: Option<f64>,
    filesize: Option<i64>,
    filesize_mb: Option<f64>,
    format_id: String,
    language: String,
    gladia_compatible: bool,
    compatibility_issues: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url_expiry_warning: Option<String>,
    gladia_request: TranscriptionRequest,
}

/// Request body ready to be posted to the transcription service as-is.
#[derive(Debug, Serialize)]
struct TranscriptionRequest {
    audio_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<String>,
    detect_language: bool,
}

async fn gladia_url(
    State(state): State<AppState>,
    Query(query): Query<TranscriptionQuery>,
) -> ApiResult<Json<TranscriptionSourceResponse>> {
    let url = decode_url(&query.url);
    let info = state.extractor.fetch_metadata(&url).await?;
    let chosen = select_audio_format(&info.formats).map_err(ApiError::from_selection)?;
    let audio_url = chosen
        .url
        .clone()
        .ok_or_else(|| ApiError::internal("selected format does not expose a direct URL"))?;

    let duration_minutes = info.duration.map(|seconds| seconds / 60.0);
    let filesize = chosen.size_bytes();
    let filesize_mb = filesize.map(|bytes| bytes as f64 / BYTES_PER_MEGABYTE);

    let mut compatibility_issues = Vec::new();
    if let Some(minutes) = duration_minutes
        && minutes > TRANSCRIPTION_MAX_MINUTES
    {
        compatibility_issues.push(format!(
            "duration {minutes:.1} min exceeds the {TRANSCRIPTION_MAX_MINUTES:.0} min transcription limit"
        ));
    }
    if let Some(mb) = filesize_mb
        && mb > TRANSCRIPTION_MAX_MEGABYTES
    {
        compatibility_issues.push(format!(
            "file size {mb:.1} MB exceeds the {TRANSCRIPTION_MAX_MEGABYTES:.0} MB transcription limit"
        ));
    }
    let gladia_compatible = compatibility_issues.is_empty();

    // Direct URLs from most hosts carry signed, short-lived credentials.
    let url_expiry_warning = if audio_url.contains("signature=") || audio_url.contains("token=") {
        Some(
            "the direct URL carries expiring credentials; hand it to the transcription service promptly"
                .to_string(),
        )
    } else {
        None
    };

    let detect_language = query.language == "auto";
    Ok(Json(TranscriptionSourceResponse {
        gladia_request: TranscriptionRequest {
            audio_url: audio_url.clone(),
            language: (!detect_language).then(|| query.language.clone()),
            detect_language,
        },
        audio_url,
        title: info.title.clone().unwrap_or_else(|| "video".to_string()),
        duration: info.duration,
        duration_minutes,
        filesize,
        filesize_mb,
        format_id: chosen.format_id.clone(),
        language: query.language,
        gladia_compatible,
        compatibility_issues,
        url_expiry_warning,
    }))
}

async fn download(
    State(state): State<AppState>,
    Query(query): Query<MediaQuery>,
) -> ApiResult<Response> {
    let url = decode_url(&query.url);

    // Metadata first, for the title only; the download re-resolves the page.
    let info = state.extractor.fetch_metadata(&url).await?;
    let title = sanitize_filename(info.title.as_deref().unwrap_or("video"));
    let filename = format!("{title}.mp4");

    let slot = state.scratch.allocate();
    state
        .extractor
        .download_to_path(&url, &query.format, &slot.output_template())
        .await?;
    let path = slot
        .locate()
        .map_err(|err| ApiError::internal(err.to_string()))?;

    let stream = stream_with_cleanup(path)
        .await
        .map_err(|err| ApiError::internal(format!("could not open downloaded file: {err}")))?;

    let disposition = HeaderValue::from_str(&content_disposition(&filename))
        .map_err(|_| ApiError::internal("could not encode the download filename"))?;

    let mut response = Body::from_stream(stream).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    response
        .headers_mut()
        .insert(header::CONTENT_DISPOSITION, disposition);
    Ok(response)
}

fn build_router(state: AppState, allowed_origin: Option<&str>) -> Router {
    let router = Router::new()
        .route("/", get(capabilities))
        .route("/debug", get(debug_report))
        .route("/test-download", get(smoke_test))
        .route("/extract-url", get(extract_url))
        .route("/gladia-url", get(gladia_url))
        .route("/download", get(download))
        .with_state(state);

    let router = match allowed_origin {
        Some(origin) => match cors_layer(origin) {
            Ok(cors) => router.layer(cors),
            Err(err) => {
                warn!("ignoring ALLOWED_ORIGIN: {err:#}");
                router
            }
        },
        None => {
            warn!("ALLOWED_ORIGIN is not set; browsers will refuse cross-origin calls");
            router
        }
    };

    router.layer(TraceLayer::new_for_http())
}

fn cors_layer(origin: &str) -> Result<CorsLayer> {
    let origin = origin
        .parse::<HeaderValue>()
        .context("parsing ALLOWED_ORIGIN as a header value")?;
    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([header::CONTENT_DISPOSITION]))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vidrelay=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    ensure_not_root("server")?;

    let args = ServerArgs::parse()?;
    let config = resolve_config(ConfigOverrides {
        host: args.host,
        port: args.port,
        scratch_dir: args.scratch_dir,
        env_path: args.env_path,
    })?;

    let scratch = ScratchDir::resolve(config.scratch_dir.as_deref());
    info!(dir = %scratch.path().display(), "scratch directory ready");

    let state = AppState {
        extractor: Arc::new(YtDlpExtractor::new(&config.ytdlp_bin)),
        scratch: Arc::new(scratch),
    };
    let app = build_router(state, config.allowed_origin.as_deref());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", config.host, config.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    info!("API server listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

async fn shutdown_signal() {
    // Only graceful shutdown is affected if this fails; the process still
    // terminates when Ctrl+C fires.
    if let Err(err) = signal::ctrl_c().await {
        warn!("failed to install Ctrl+C handler: {err}");
    }
}
