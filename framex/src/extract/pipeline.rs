use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use frame_archive::{ArchiveError, Compression, FrameArchive};
use frame_demux::{FrameReader, FrameSplitter};
use frame_types::{Frame, FrameNaming};
use log::{debug, info, warn};
use tempfile::TempDir;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

use super::encoder::{EncoderInput, spawn_encoder, spawn_feeder};
use super::error::ExtractError;
use super::options::{ExtractOptions, Interval};
use super::probe::probe_duration;
use super::process::StderrTail;
use super::source::{ByteSource, SourceLocator, SourceResolver};
use super::state::{PipelineState, StopReason};
use crate::config::ExtractorConfig;

const ENCODER: &str = "encoder";
const SOURCE: &str = "source";

/// How long to wait for the encoder's diagnostics after it exits.
const STDERR_DRAIN: Duration = Duration::from_secs(1);

/// Short id used to tag log lines of one extraction.
pub fn request_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

/// What a finished extraction produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractSummary {
    pub frames: u32,
    /// Archive bytes written before the central directory.
    pub bytes: u64,
    pub stop_reason: StopReason,
}

/**
    Starts extractions: resolves the source, launches the encoder and waits
    for the first frame.
*/
pub struct Extractor {
    config: Arc<ExtractorConfig>,
    resolver: SourceResolver,
}

impl Extractor {
    pub fn new(config: ExtractorConfig) -> anyhow::Result<Self> {
        let resolver = SourceResolver::new(&config)?;
        Ok(Self {
            config: Arc::new(config),
            resolver,
        })
    }

    /// A fresh per-request work directory, removed when dropped.
    pub fn workdir(&self) -> io::Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("framex-");
        match &self.config.temp_dir {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        }
    }

    /**
        Start extracting from `source`.

        Returns once the first frame exists, so callers can commit to a
        successful response. Every failure before that point is returned here
        with all processes already torn down. `cancel` stops the extraction
        at any point; `workdir` lives as long as the extraction.
    */
    pub async fn start(
        &self,
        workdir: TempDir,
        source: SourceLocator,
        options: ExtractOptions,
        cancel: CancellationToken,
    ) -> Result<Extraction, ExtractError> {
        let id = request_id();
        info!(
            "[extract:{}] {} (max_frames={}, interval={}, format={})",
            id, source, options.max_frames, options.interval, options.format
        );

        let mut state = PipelineState::new(id, options.max_frames, cancel);
        let launched = {
            let cancel = state.cancel_token().clone();
            let dir = workdir.path().to_path_buf();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ExtractError::Cancelled),
                launched = self.launch(&mut state, dir, &source, &options) => launched,
            }
        };

        let (reader, encoder_log) = match launched {
            Ok(launched) => launched,
            Err(e) => {
                state.stop(stop_reason_for(&e));
                state.teardown(self.config.shutdown_grace).await;
                return Err(e);
            }
        };

        Extraction::begin(
            state,
            reader,
            Some(encoder_log),
            self.config.compression,
            self.config.shutdown_grace,
            Some(workdir),
        )
        .await
    }

    async fn launch(
        &self,
        state: &mut PipelineState,
        workdir: PathBuf,
        source: &SourceLocator,
        options: &ExtractOptions,
    ) -> Result<(FrameReader<ByteSource>, StderrTail), ExtractError> {
        let id = state.id().to_string();

        let mut chained = None;
        let input = match source {
            SourceLocator::File(path) => Some(path.clone()),
            SourceLocator::Url(url) if self.config.chain_source => {
                chained = Some(self.resolver.open_chained(url, &id).await?);
                None
            }
            SourceLocator::Url(url) => Some(self.resolver.download(url, &workdir, &id).await?),
        };

        let interval = match (options.interval, &input) {
            (Interval::Auto, Some(path)) => {
                let duration = match probe_duration(&self.config.ffprobe, path).await {
                    Ok(secs) => Some(secs),
                    Err(e) => {
                        warn!("[extract:{}] could not probe duration: {}", id, e);
                        None
                    }
                };
                options.interval.resolve(options.max_frames, duration)
            }
            (interval, _) => interval.resolve(options.max_frames, None),
        };
        debug!("[extract:{}] one frame every {}s", id, interval);

        let encoder_input = match &input {
            Some(path) => EncoderInput::File(path),
            None => EncoderInput::Stdin,
        };
        let encoder = spawn_encoder(&self.config.ffmpeg, encoder_input, options, interval, &id)?;

        let processes = state.processes();
        processes.adopt(ENCODER, encoder.child);
        if let Some(chained) = chained {
            debug!("[extract:{}] piping {} output into the encoder", id, chained.provider);
            if let Some(child) = chained.child {
                processes.adopt(SOURCE, child);
            }
            if let Some(stdin) = encoder.stdin {
                processes.track(spawn_feeder(&id, stdin, chained.first, chained.reader));
            }
        }

        let encoder_log = match encoder.stderr {
            Some(stderr) => StderrTail::spawn("ffmpeg", &id, stderr),
            None => StderrTail::spawn("ffmpeg", &id, tokio::io::empty()),
        };

        let splitter = FrameSplitter::new(
            options.format,
            self.config.splitter.clone().with_max_frames(options.max_frames),
        );
        let stdout: ByteSource = Box::pin(encoder.stdout);
        let reader = FrameReader::with_chunk_size(stdout, splitter, self.config.read_chunk_size);

        Ok((reader, encoder_log))
    }
}

fn stop_reason_for(error: &ExtractError) -> StopReason {
    match error {
        ExtractError::Cancelled => StopReason::Cancelled,
        ExtractError::DownstreamDisconnected => StopReason::Disconnected,
        _ => StopReason::Failed,
    }
}

fn archive_error(error: ArchiveError) -> ExtractError {
    match error {
        ArchiveError::Io(e) => ExtractError::Io(e),
        other => ExtractError::Io(io::Error::other(other)),
    }
}

/**
    A running extraction whose first frame is already in hand.

    Dropping it without calling [`write_to`] kills the processes (they are
    spawned with `kill_on_drop`) and removes the work directory.

    [`write_to`]: Extraction::write_to
*/
pub struct Extraction {
    state: PipelineState,
    reader: FrameReader<ByteSource>,
    first: Option<Frame>,
    encoder_log: Option<StderrTail>,
    disconnect: CancellationToken,
    naming: FrameNaming,
    compression: Compression,
    grace: Duration,
    _workdir: Option<TempDir>,
}

impl Extraction {
    /**
        Wait for the first frame. With none, the encoder's exit status decides
        between `EncoderFailed` and `NoFramesProduced`.
    */
    pub(crate) async fn begin(
        mut state: PipelineState,
        mut reader: FrameReader<ByteSource>,
        mut encoder_log: Option<StderrTail>,
        compression: Compression,
        grace: Duration,
        workdir: Option<TempDir>,
    ) -> Result<Self, ExtractError> {
        let cancel = state.cancel_token().clone();
        let first = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ExtractError::Cancelled),
            next = reader.next_frame() => next.map_err(ExtractError::from),
        };

        let error = match first {
            Ok(Some(frame)) => {
                debug!("[extract:{}] first frame ready ({} bytes)", state.id(), frame.len());
                return Ok(Self {
                    naming: FrameNaming::for_capacity(state.max_frames()),
                    state,
                    reader,
                    first: Some(frame),
                    encoder_log,
                    disconnect: CancellationToken::new(),
                    compression,
                    grace,
                    _workdir: workdir,
                });
            }
            Ok(None) => {
                let exited = tokio::time::timeout(grace, state.processes().wait(ENCODER)).await;
                let status = match exited {
                    Ok(Some(Ok(status))) => Some(status),
                    _ => None,
                };
                match status {
                    Some(status) if !status.success() => {
                        let stderr = match encoder_log.as_mut() {
                            Some(log) => log.drain(STDERR_DRAIN).await,
                            None => String::new(),
                        };
                        ExtractError::EncoderFailed { status, stderr }
                    }
                    _ => ExtractError::NoFramesProduced,
                }
            }
            Err(e) => e,
        };

        warn!("[extract:{}] failed before first frame: {}", state.id(), error);
        state.stop(stop_reason_for(&error));
        state.teardown(grace).await;
        Err(error)
    }

    pub fn id(&self) -> &str {
        self.state.id()
    }

    /// Token the consumer cancels when it goes away without a write failing.
    pub fn disconnect_token(&self) -> CancellationToken {
        self.disconnect.clone()
    }

    /**
        Stream every frame into a ZIP archive written to `out`.

        Stops at end of stream, at the frame cap, on cancellation, on
        disconnect or when `out` fails. The archive is finalized exactly once
        on every path, and processes are reaped before returning. A consumer
        that disconnects before the first frame was written yields
        `DownstreamDisconnected`.
    */
    pub async fn write_to<W>(mut self, out: W) -> Result<ExtractSummary, ExtractError>
    where
        W: AsyncWrite + Unpin,
    {
        let id = self.state.id().to_string();
        let mut archive = FrameArchive::new(out, self.naming, self.compression);
        let mut pending = self.first.take();
        let mut disconnected = false;

        loop {
            let frame = match pending.take() {
                Some(frame) => frame,
                None => {
                    if self.state.is_stopped() {
                        break;
                    }
                    let cancel = self.state.cancel_token().clone();
                    let disconnect = self.disconnect.clone();
                    let next = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Err(StopReason::Cancelled),
                        _ = disconnect.cancelled() => Err(StopReason::Disconnected),
                        next = self.reader.next_frame() => Ok(next),
                    };
                    let next = match next {
                        Ok(next) => next,
                        Err(reason) => {
                            self.state.stop(reason);
                            break;
                        }
                    };
                    match next {
                        Ok(Some(frame)) => frame,
                        Ok(None) => {
                            self.end_of_stream().await;
                            break;
                        }
                        Err(e) => {
                            warn!("[extract:{}] ending archive early: {}", id, e);
                            self.state.stop(StopReason::Failed);
                            break;
                        }
                    }
                }
            };

            if self.state.record_frame() {
                self.state.stop(StopReason::FrameCap);
            }

            if let Err(e) = archive.write_frame(&frame).await {
                if e.is_disconnect() {
                    info!(
                        "[extract:{}] consumer went away at frame {}: {}",
                        id,
                        self.state.emitted(),
                        e
                    );
                } else {
                    warn!("[extract:{}] archive write failed: {}", id, e);
                }
                self.state.stop(StopReason::Disconnected);
                disconnected = true;
                break;
            }
        }

        let frames = archive.frames();
        let bytes = archive.bytes_written();
        let mut finish_error = None;
        match archive.finish().await {
            Ok(_) => {}
            Err(e) if disconnected => {
                debug!("[extract:{}] archive end not delivered: {}", id, e);
            }
            Err(e) if e.is_disconnect() => {
                info!("[extract:{}] consumer went away before the archive end", id);
                self.state.stop(StopReason::Disconnected);
            }
            Err(e) => finish_error = Some(archive_error(e)),
        }

        self.state.teardown(self.grace).await;

        let splitter = self.reader.splitter();
        if splitter.dropped_bytes() > 0 || splitter.skipped_bytes() > 0 {
            info!(
                "[extract:{}] dropped {} trailing bytes, skipped {} unmarked bytes",
                id,
                splitter.dropped_bytes(),
                splitter.skipped_bytes()
            );
        }

        if let Some(e) = finish_error {
            return Err(e);
        }
        if disconnected && frames == 0 {
            return Err(ExtractError::DownstreamDisconnected);
        }

        let stop_reason = self.state.stop_reason().unwrap_or(StopReason::EndOfStream);
        info!(
            "[extract:{}] done: {} frames, {} bytes ({})",
            id, frames, bytes, stop_reason
        );
        Ok(ExtractSummary {
            frames,
            bytes,
            stop_reason,
        })
    }

    /// The encoder closed its output. Record why and log a failed exit.
    async fn end_of_stream(&mut self) {
        if self.reader.is_capped() {
            self.state.stop(StopReason::FrameCap);
            return;
        }

        let id = self.state.id().to_string();
        let grace = self.grace;
        match tokio::time::timeout(grace, self.state.processes().wait(ENCODER)).await {
            Ok(Some(Ok(status))) if !status.success() => {
                let stderr = match self.encoder_log.as_mut() {
                    Some(log) => log.drain(STDERR_DRAIN).await,
                    None => String::new(),
                };
                warn!("[extract:{}] encoder exited with {}: {}", id, status, stderr);
            }
            Ok(Some(Err(e))) => warn!("[extract:{}] failed to wait for encoder: {}", id, e),
            Err(_) => warn!("[extract:{}] encoder still running after end of output", id),
            _ => {}
        }
        self.state.stop(StopReason::EndOfStream);
    }
}
