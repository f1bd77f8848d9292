use thiserror::Error;

use frame_types::ImageFormat;

/**
    Errors produced while splitting an image stream.
*/
#[derive(Debug, Error)]
pub enum DemuxError {
    #[error("no {format} start marker within {buffered} buffered bytes")]
    NoMarker {
        format: ImageFormat,
        buffered: usize,
    },

    #[error("{format} frame grew past {limit} bytes without completing")]
    FrameTooLarge { format: ImageFormat, limit: usize },

    #[error("failed to read image stream: {0}")]
    Io(#[from] std::io::Error),
}

impl DemuxError {
    /**
        Returns true if the stream itself is malformed, as opposed to the
        read failing.
    */
    pub fn is_protocol_anomaly(&self) -> bool {
        matches!(self, Self::NoMarker { .. } | Self::FrameTooLarge { .. })
    }
}
