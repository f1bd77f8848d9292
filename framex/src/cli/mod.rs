use std::path::PathBuf;

use anyhow::Result;
use clap::{Args as ClapArgs, Parser, Subcommand};
use frame_archive::Compression;
use frame_demux::{DEFAULT_CHUNK_SIZE, SplitterConfig};

use crate::config::ExtractorConfig;
use crate::extract::ProviderKind;

mod extract;
mod serve;

pub use extract::ExtractCommand;
pub use serve::ServeCommand;

/// Cookies file picked up when none is given explicitly.
const DEFAULT_COOKIES: &str = "cookies.txt";

#[derive(Parser, Debug)]
#[command(name = "framex")]
#[command(about = "Extract still frames from videos into a streamed ZIP archive")]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP extraction server (default)
    Serve(ServeCommand),
    /// Extract frames from one URL or file and exit
    Extract(ExtractCommand),
}

impl Args {
    pub async fn run(self) -> Result<()> {
        let command = self
            .command
            .unwrap_or(Command::Serve(ServeCommand::default()));

        match command {
            Command::Serve(cmd) => cmd.run().await,
            Command::Extract(cmd) => cmd.run().await,
        }
    }
}

/// External tools and pipeline tuning shared by every subcommand.
#[derive(ClapArgs, Debug, Clone)]
pub struct ToolArgs {
    /// Encoder binary
    #[arg(long, default_value = "ffmpeg")]
    pub ffmpeg: PathBuf,

    /// Prober binary, used for --interval auto
    #[arg(long, default_value = "ffprobe")]
    pub ffprobe: PathBuf,

    /// Downloader binary
    #[arg(long = "yt-dlp", default_value = "yt-dlp")]
    pub yt_dlp: PathBuf,

    /// Cookies file for yt-dlp (default: ./cookies.txt if present)
    #[arg(long)]
    pub cookies: Option<PathBuf>,

    /// Source providers to try, in order
    #[arg(
        long,
        value_enum,
        value_delimiter = ',',
        default_values_t = [ProviderKind::YtDlp, ProviderKind::Http]
    )]
    pub providers: Vec<ProviderKind>,

    /// Skip the direct HTTP download fallback
    #[arg(long)]
    pub no_direct_http: bool,

    /// Pipe the download straight into the encoder instead of a temp file
    #[arg(long)]
    pub chain_source: bool,

    /// Parent directory for per-request work directories
    #[arg(long)]
    pub temp_dir: Option<PathBuf>,

    /// ZIP compression level, 0 (store) to 9
    #[arg(long, default_value = "6", value_parser = clap::value_parser!(u32).range(0..=9))]
    pub compression_level: u32,

    /// A trailing PNG is kept only if longer than this many bytes
    #[arg(long, default_value_t = SplitterConfig::DEFAULT_TRAILING_FRAME_THRESHOLD)]
    pub trailing_frame_threshold: usize,

    /// Unmarked encoder output tolerated before failing
    #[arg(long, default_value_t = SplitterConfig::DEFAULT_MAX_UNMARKED_BYTES)]
    pub max_unmarked_bytes: usize,

    /// Largest single frame accepted
    #[arg(long, default_value_t = SplitterConfig::DEFAULT_MAX_FRAME_BYTES)]
    pub max_frame_bytes: usize,

    /// Bytes per read from the encoder
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub read_chunk_size: usize,
}

impl ToolArgs {
    pub fn into_config(self) -> ExtractorConfig {
        let cookies = self.cookies.or_else(|| {
            let default = PathBuf::from(DEFAULT_COOKIES);
            default.is_file().then_some(default)
        });

        let mut providers = self.providers;
        if self.no_direct_http {
            providers.retain(|p| *p != ProviderKind::Http);
        }
        providers.dedup();

        ExtractorConfig {
            ffmpeg: self.ffmpeg,
            ffprobe: self.ffprobe,
            yt_dlp: self.yt_dlp,
            cookies,
            providers,
            chain_source: self.chain_source,
            temp_dir: self.temp_dir,
            compression: Compression::from_level(self.compression_level),
            splitter: SplitterConfig {
                max_frames: None,
                trailing_frame_threshold: self.trailing_frame_threshold,
                max_unmarked_bytes: self.max_unmarked_bytes,
                max_frame_bytes: self.max_frame_bytes,
            },
            read_chunk_size: self.read_chunk_size,
            ..ExtractorConfig::default()
        }
    }
}

impl Default for ToolArgs {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            yt_dlp: PathBuf::from("yt-dlp"),
            cookies: None,
            providers: vec![ProviderKind::YtDlp, ProviderKind::Http],
            no_direct_http: false,
            chain_source: false,
            temp_dir: None,
            compression_level: 6,
            trailing_frame_threshold: SplitterConfig::DEFAULT_TRAILING_FRAME_THRESHOLD,
            max_unmarked_bytes: SplitterConfig::DEFAULT_MAX_UNMARKED_BYTES,
            max_frame_bytes: SplitterConfig::DEFAULT_MAX_FRAME_BYTES,
            read_chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}
