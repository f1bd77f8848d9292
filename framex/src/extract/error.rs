use std::io;
use std::process::ExitStatus;

use frame_demux::DemuxError;
use thiserror::Error;

/**
    Failures of a single extraction.
*/
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The source could not be downloaded or opened.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// The encoder ran to completion without producing a complete frame.
    #[error("no frames were extracted")]
    NoFramesProduced,

    /// The encoder failed before producing any frame.
    #[error("encoder exited with {status}: {stderr}")]
    EncoderFailed { status: ExitStatus, stderr: String },

    /// The encoder's output could not be split into images.
    #[error("malformed encoder output: {0}")]
    ProtocolAnomaly(#[source] DemuxError),

    /// The consumer went away before the first frame was written.
    #[error("downstream disconnected")]
    DownstreamDisconnected,

    #[error("extraction cancelled")]
    Cancelled,

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<DemuxError> for ExtractError {
    fn from(error: DemuxError) -> Self {
        match error {
            DemuxError::Io(e) => Self::Io(e),
            other => Self::ProtocolAnomaly(other),
        }
    }
}
