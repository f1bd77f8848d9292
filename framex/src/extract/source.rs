use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use bytes::Bytes;
use futures::TryStreamExt;
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio_util::io::StreamReader;

use super::error::ExtractError;
use super::process::StderrTail;
use crate::config::ExtractorConfig;

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Name of the downloaded source inside a work directory.
pub const SOURCE_FILE_NAME: &str = "source.video";

/// Encoded video bytes from any provider.
pub type ByteSource = Pin<Box<dyn AsyncRead + Send>>;

/// How the source video is fetched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ProviderKind {
    /// Resolve and download through yt-dlp.
    YtDlp,
    /// Plain HTTP(S) GET of the URL.
    Http,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::YtDlp => f.write_str("yt-dlp"),
            ProviderKind::Http => f.write_str("http"),
        }
    }
}

/// Where the video comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceLocator {
    Url(String),
    /// A file already on local disk (uploads, CLI paths).
    File(PathBuf),
}

impl fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocator::Url(url) => f.write_str(url),
            SourceLocator::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// A provider's live output.
struct Opened {
    reader: ByteSource,
    child: Option<Child>,
    stderr: Option<StderrTail>,
}

impl Opened {
    /// Wait for the provider process, if any, and fail on a non-zero exit.
    async fn finish(&mut self) -> Result<()> {
        let Some(child) = self.child.as_mut() else {
            return Ok(());
        };
        let status = child.wait().await.context("failed to wait for provider")?;
        if status.success() {
            return Ok(());
        }
        let tail = match self.stderr.as_mut() {
            Some(stderr) => stderr.drain(Duration::from_secs(1)).await,
            None => String::new(),
        };
        if tail.is_empty() {
            bail!("exited with {}", status);
        }
        bail!("exited with {}: {}", status, tail)
    }
}

enum Provider {
    YtDlp {
        program: PathBuf,
        cookies: Option<PathBuf>,
    },
    Http {
        client: reqwest::Client,
    },
}

impl Provider {
    fn kind(&self) -> ProviderKind {
        match self {
            Provider::YtDlp { .. } => ProviderKind::YtDlp,
            Provider::Http { .. } => ProviderKind::Http,
        }
    }

    async fn open(&self, url: &str, id: &str) -> Result<Opened> {
        match self {
            Provider::YtDlp { program, cookies } => {
                let mut command = Command::new(program);
                command.args([
                    "-f",
                    "mp4/best",
                    "-o",
                    "-",
                    "--no-playlist",
                    "--no-warnings",
                ]);
                if let Some(cookies) = cookies {
                    command.arg("--cookies").arg(cookies);
                }
                command
                    .arg(url)
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .kill_on_drop(true);

                let mut child = command
                    .spawn()
                    .with_context(|| format!("failed to start {}", program.display()))?;
                let stdout = child
                    .stdout
                    .take()
                    .ok_or_else(|| anyhow!("provider stdout was not captured"))?;
                let stderr = child
                    .stderr
                    .take()
                    .map(|s| StderrTail::spawn("yt-dlp", id, s));

                Ok(Opened {
                    reader: Box::pin(stdout),
                    child: Some(child),
                    stderr,
                })
            }
            Provider::Http { client } => {
                let response = client
                    .get(url)
                    .header(reqwest::header::USER_AGENT, USER_AGENT)
                    .send()
                    .await
                    .map_err(|e| anyhow!("request failed: {}", e))?;

                if !response.status().is_success() {
                    bail!("HTTP {}", response.status());
                }

                let stream = response.bytes_stream().map_err(io::Error::other);
                Ok(Opened {
                    reader: Box::pin(StreamReader::new(stream)),
                    child: None,
                    stderr: None,
                })
            }
        }
    }
}

/**
    A source opened for piping straight into the encoder.

    `first` holds the chunk that proved the provider works; it must be
    written before anything else read from `reader`.
*/
pub struct ChainedSource {
    pub provider: ProviderKind,
    pub first: Bytes,
    pub reader: ByteSource,
    pub child: Option<Child>,
}

/**
    Fetches remote sources, trying each configured provider in order until
    one produces data.
*/
pub struct SourceResolver {
    providers: Vec<Provider>,
    chunk_size: usize,
}

impl SourceResolver {
    pub fn new(config: &ExtractorConfig) -> Result<Self> {
        let cookies = config.cookies.clone().filter(|path| path.is_file());
        let mut providers = Vec::with_capacity(config.providers.len());
        for kind in &config.providers {
            let provider = match kind {
                ProviderKind::YtDlp => Provider::YtDlp {
                    program: config.yt_dlp.clone(),
                    cookies: cookies.clone(),
                },
                ProviderKind::Http => Provider::Http {
                    client: reqwest::Client::builder()
                        .build()
                        .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?,
                },
            };
            providers.push(provider);
        }
        Ok(Self {
            providers,
            chunk_size: config.read_chunk_size.max(1),
        })
    }

    #[cfg(test)]
    pub fn providers(&self) -> Vec<ProviderKind> {
        self.providers.iter().map(Provider::kind).collect()
    }

    /**
        Download `url` into `<workdir>/source.video`.

        An attempt counts when at least one byte was written and the provider
        exited cleanly. Otherwise the next provider is tried against a fresh
        file.
    */
    pub async fn download(
        &self,
        url: &str,
        workdir: &Path,
        id: &str,
    ) -> Result<PathBuf, ExtractError> {
        let target = workdir.join(SOURCE_FILE_NAME);
        let mut failures = Vec::new();

        for provider in &self.providers {
            let kind = provider.kind();
            info!("[source:{}] downloading with {}", id, kind);
            match download_with(provider, url, &target, id).await {
                Ok(written) => {
                    info!("[source:{}] {} wrote {} bytes", id, kind, written);
                    return Ok(target);
                }
                Err(e) => {
                    warn!("[source:{}] {} failed: {:#}", id, kind, e);
                    failures.push(format!("{}: {:#}", kind, e));
                }
            }
        }

        let _ = tokio::fs::remove_file(&target).await;
        Err(unavailable(failures))
    }

    /**
        Open `url` for streaming. The first provider to deliver a non-empty
        chunk wins.
    */
    pub async fn open_chained(&self, url: &str, id: &str) -> Result<ChainedSource, ExtractError> {
        let mut failures = Vec::new();

        for provider in &self.providers {
            let kind = provider.kind();
            info!("[source:{}] streaming with {}", id, kind);
            match first_chunk(provider, url, id, self.chunk_size).await {
                Ok((first, opened)) => {
                    debug!("[source:{}] {} delivered {} bytes", id, kind, first.len());
                    return Ok(ChainedSource {
                        provider: kind,
                        first,
                        reader: opened.reader,
                        child: opened.child,
                    });
                }
                Err(e) => {
                    warn!("[source:{}] {} failed: {:#}", id, kind, e);
                    failures.push(format!("{}: {:#}", kind, e));
                }
            }
        }

        Err(unavailable(failures))
    }
}

fn unavailable(failures: Vec<String>) -> ExtractError {
    if failures.is_empty() {
        return ExtractError::SourceUnavailable("no source providers configured".to_string());
    }
    ExtractError::SourceUnavailable(failures.join("; "))
}

async fn download_with(provider: &Provider, url: &str, target: &Path, id: &str) -> Result<u64> {
    let mut opened = provider.open(url, id).await?;
    let mut file = tokio::fs::File::create(target)
        .await
        .with_context(|| format!("failed to create {}", target.display()))?;

    let written = tokio::io::copy(&mut opened.reader, &mut file)
        .await
        .context("download interrupted")?;
    file.flush().await?;
    opened.finish().await?;

    if written == 0 {
        bail!("no data received");
    }
    Ok(written)
}

async fn first_chunk(
    provider: &Provider,
    url: &str,
    id: &str,
    chunk_size: usize,
) -> Result<(Bytes, Opened)> {
    let mut opened = provider.open(url, id).await?;
    let mut buf = vec![0u8; chunk_size];
    let n = opened.reader.read(&mut buf).await.context("read failed")?;
    if n == 0 {
        // Clean EOF before any data; surface the exit status if there is one.
        opened.finish().await?;
        bail!("no data received");
    }
    buf.truncate(n);
    Ok((Bytes::from(buf), opened))
}
