use std::pin::Pin;
use std::task::{Context, Poll};

use axum::{
    Form, Json,
    body::{Body, Bytes},
    extract::{FromRequest, Multipart, Query, Request, State},
    http::{StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use futures::Stream;
use log::{debug, info, warn};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tokio_util::sync::DropGuard;

use crate::extract::{ExtractOptions, SourceLocator};

use super::AppState;
use super::error::ApiError;
use super::params::{RawParams, Scalar};

/// Bytes buffered between the archive writer and the response body.
const STREAM_BUFFER: usize = 64 * 1024;

/// Name of an uploaded video inside its work directory.
const UPLOAD_FILE_NAME: &str = "upload.video";

/// Root endpoint.
pub async fn index() -> impl IntoResponse {
    Json(serde_json::json!({ "message": "Frame extractor server running" }))
}

/// Extract frames from a remote video.
pub async fn extract(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, ApiError> {
    let query = query_params(request.uri())?;
    let body = body_params(&state, request).await?;
    let params = body.or(query);

    let url = params.source_url()?;
    let options = params.options(&state.defaults)?;
    let workdir = new_workdir(&state)?;

    stream_extraction(&state, workdir, SourceLocator::Url(url), options).await
}

/// Extract frames from an uploaded video (multipart field `video`).
pub async fn upload(
    State(state): State<AppState>,
    uri: Uri,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let query = query_params(&uri)?;
    let workdir = new_workdir(&state)?;

    let mut params = RawParams::default();
    let mut video = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "video" => {
                let path = workdir.path().join(UPLOAD_FILE_NAME);
                let mut file = tokio::fs::File::create(&path).await.map_err(internal)?;
                let mut written = 0u64;
                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.body_text()))?
                {
                    file.write_all(&chunk).await.map_err(internal)?;
                    written += chunk.len() as u64;
                }
                file.flush().await.map_err(internal)?;

                if written == 0 {
                    return Err(ApiError::BadRequest("uploaded 'video' is empty".to_string()));
                }
                debug!("[server] received upload of {} bytes", written);
                video = Some(path);
            }
            "max_frames" | "maxFrames" | "interval" | "intervalSeconds" | "format" | "fmt" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.body_text()))?;
                let value = Some(Scalar::Text(value));
                match name.as_str() {
                    "max_frames" | "maxFrames" => params.max_frames = value,
                    "interval" | "intervalSeconds" => params.interval = value,
                    _ => params.format = value,
                }
            }
            other => debug!("[server] ignoring form field '{}'", other),
        }
    }

    let path = video.ok_or_else(|| ApiError::BadRequest("missing file field 'video'".to_string()))?;
    let options = params.or(query).options(&state.defaults)?;

    stream_extraction(&state, workdir, SourceLocator::File(path), options).await
}

fn internal(error: std::io::Error) -> ApiError {
    ApiError::Internal(error.to_string())
}

fn new_workdir(state: &AppState) -> Result<TempDir, ApiError> {
    state
        .extractor
        .workdir()
        .map_err(|e| ApiError::Internal(format!("failed to create work directory: {e}")))
}

fn query_params(uri: &Uri) -> Result<RawParams, ApiError> {
    if uri.query().is_none() {
        return Ok(RawParams::default());
    }
    Query::<RawParams>::try_from_uri(uri)
        .map(|Query(params)| params)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

/// Parameters from a JSON or URL-encoded body. An empty body has none.
async fn body_params(state: &AppState, request: Request) -> Result<RawParams, ApiError> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.starts_with("application/x-www-form-urlencoded") {
        let Form(params) = Form::<RawParams>::from_request(request, state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        return Ok(params);
    }

    let bytes = Bytes::from_request(request, state)
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(RawParams::default());
    }
    serde_json::from_slice(&bytes).map_err(|e| ApiError::BadRequest(format!("malformed body: {e}")))
}

/**
    Start the extraction and, once its first frame exists, answer with a
    streamed archive. Dropping the response body stops the extraction as
    disconnected.
*/
async fn stream_extraction(
    state: &AppState,
    workdir: TempDir,
    source: SourceLocator,
    options: ExtractOptions,
) -> Result<Response, ApiError> {
    let cancel = state.shutdown.child_token();
    let extraction = state
        .extractor
        .start(workdir, source, options, cancel)
        .await?;

    let id = extraction.id().to_string();
    let guard = extraction.disconnect_token().drop_guard();
    let (writer, reader) = tokio::io::duplex(STREAM_BUFFER);

    tokio::spawn(async move {
        match extraction.write_to(writer).await {
            Ok(summary) => info!(
                "[server:{}] streamed {} frames ({})",
                id, summary.frames, summary.stop_reason
            ),
            Err(e) => warn!("[server:{}] stream ended: {}", id, e),
        }
    });

    let body = Body::from_stream(GuardedStream {
        inner: ReaderStream::new(reader),
        _guard: guard,
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/zip")
        .header(header::CONTENT_DISPOSITION, "attachment; filename=frames.zip")
        .body(body)
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// A body stream that marks its consumer gone when dropped.
struct GuardedStream<S> {
    inner: S,
    _guard: DropGuard,
}

impl<S> Stream for GuardedStream<S>
where
    S: Stream + Unpin,
{
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
