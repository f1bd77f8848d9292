use std::path::PathBuf;
use std::time::Duration;

use frame_archive::Compression;
use frame_demux::{DEFAULT_CHUNK_SIZE, SplitterConfig};

use crate::extract::ProviderKind;

/// Settings shared by every extraction in the process.
#[derive(Clone, Debug)]
pub struct ExtractorConfig {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub yt_dlp: PathBuf,
    /// Cookies file handed to yt-dlp.
    pub cookies: Option<PathBuf>,
    /// Source providers, tried in this order.
    pub providers: Vec<ProviderKind>,
    /// Pipe the downloader straight into the encoder instead of via a file.
    pub chain_source: bool,
    /// Parent directory for per-request work directories (None = system temp).
    pub temp_dir: Option<PathBuf>,
    pub compression: Compression,
    pub splitter: SplitterConfig,
    pub read_chunk_size: usize,
    /// How long to wait for killed processes to be reaped.
    pub shutdown_grace: Duration,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            yt_dlp: PathBuf::from("yt-dlp"),
            cookies: None,
            providers: vec![ProviderKind::YtDlp, ProviderKind::Http],
            chain_source: false,
            temp_dir: None,
            compression: Compression::from_level(6),
            splitter: SplitterConfig::default(),
            read_chunk_size: DEFAULT_CHUNK_SIZE,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}
