use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use frame_types::ImageFormat;
use log::info;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use super::ToolArgs;
use crate::extract::{ExtractOptions, Extractor, Interval, SourceLocator};

#[derive(Parser, Debug)]
pub struct ExtractCommand {
    /// Video URL (http/https) or local file
    pub input: String,

    /// Archive to write, "-" for stdout
    #[arg(short, long, default_value = "frames.zip")]
    pub output: PathBuf,

    /// Stop after this many frames
    #[arg(
        short = 'n',
        long,
        default_value = "100",
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub max_frames: u32,

    /// Seconds between frames, or "auto"
    #[arg(short, long, default_value = "5")]
    pub interval: Interval,

    /// Image format (png or jpeg)
    #[arg(short, long, default_value = "png")]
    pub format: ImageFormat,

    #[command(flatten)]
    pub tools: ToolArgs,
}

impl ExtractCommand {
    pub async fn run(self) -> Result<()> {
        let extractor = Extractor::new(self.tools.into_config())?;
        let source = locate(&self.input)?;
        let options = ExtractOptions {
            max_frames: self.max_frames,
            interval: self.interval,
            format: self.format,
        };

        let cancel = CancellationToken::new();
        {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            });
        }

        let workdir = extractor.workdir()?;
        let extraction = extractor.start(workdir, source, options, cancel).await?;

        let summary = if self.output.as_os_str() == "-" {
            extraction.write_to(tokio::io::stdout()).await?
        } else {
            let file = tokio::fs::File::create(&self.output)
                .await
                .with_context(|| format!("failed to create {}", self.output.display()))?;
            extraction.write_to(file).await?
        };

        info!(
            "Wrote {} frames, {} bytes ({}) to {}",
            summary.frames,
            summary.bytes,
            summary.stop_reason,
            self.output.display()
        );
        Ok(())
    }
}

fn locate(input: &str) -> Result<SourceLocator> {
    if input.starts_with("http://") || input.starts_with("https://") {
        return Ok(SourceLocator::Url(input.to_string()));
    }
    let path = PathBuf::from(input);
    if !path.is_file() {
        bail!("'{}' is neither an http(s) URL nor a file", input);
    }
    let path = path
        .canonicalize()
        .with_context(|| format!("failed to resolve {}", path.display()))?;
    Ok(SourceLocator::File(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate_url() {
        assert_eq!(
            locate("https://example.com/v.mp4").unwrap(),
            SourceLocator::Url("https://example.com/v.mp4".to_string())
        );
    }

    #[test]
    fn test_locate_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let located = locate(file.path().to_str().unwrap()).unwrap();
        assert!(matches!(located, SourceLocator::File(p) if p.is_absolute()));
    }

    #[test]
    fn test_locate_missing() {
        assert!(locate("/nonexistent/video.mp4").is_err());
    }
}
