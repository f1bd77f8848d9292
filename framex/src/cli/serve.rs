use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::{Result, anyhow};
use clap::Parser;
use frame_types::ImageFormat;
use log::{error, info};
use tokio::signal;
use tokio_util::sync::CancellationToken;

use super::ToolArgs;
use crate::extract::{Extractor, Interval};
use crate::server::{AppState, RequestDefaults};

#[derive(Parser, Debug)]
pub struct ServeCommand {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// HTTP server port
    #[arg(short, long, env = "PORT", default_value = "7860")]
    pub port: u16,

    /// Largest max_frames a request may ask for
    #[arg(long, default_value = "10000")]
    pub frame_limit: u32,

    /// Largest accepted request body in bytes (uploads)
    #[arg(long, default_value = "209715200")]
    pub upload_limit: usize,

    /// max_frames when a request leaves it out
    #[arg(long, default_value = "100")]
    pub default_max_frames: u32,

    /// Interval when a request leaves it out (seconds or "auto")
    #[arg(long, default_value = "5")]
    pub default_interval: Interval,

    /// Image format when a request leaves it out
    #[arg(long, default_value = "png")]
    pub default_format: ImageFormat,

    #[command(flatten)]
    pub tools: ToolArgs,
}

impl Default for ServeCommand {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(7860),
            frame_limit: 10_000,
            upload_limit: 200 * 1024 * 1024,
            default_max_frames: 100,
            default_interval: Interval::Seconds(5.0),
            default_format: ImageFormat::Png,
            tools: ToolArgs::default(),
        }
    }
}

impl ServeCommand {
    pub async fn run(self) -> Result<()> {
        if self.default_max_frames == 0 || self.default_max_frames > self.frame_limit {
            return Err(anyhow!(
                "--default-max-frames must be between 1 and --frame-limit ({})",
                self.frame_limit
            ));
        }

        let shutdown = CancellationToken::new();
        let extractor = Arc::new(Extractor::new(self.tools.into_config())?);

        let state = AppState {
            extractor,
            defaults: RequestDefaults {
                max_frames: self.default_max_frames,
                interval: self.default_interval,
                format: self.default_format,
                frame_limit: self.frame_limit,
            },
            shutdown: shutdown.clone(),
        };

        let addr = SocketAddr::new(self.host, self.port);
        let server_handle = {
            let upload_limit = self.upload_limit;
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = crate::server::run_server(addr, state, upload_limit).await {
                    error!("[server] {}", e);
                }
                shutdown.cancel();
            })
        };

        // Wait for Ctrl+C, unless the server stopped on its own.
        tokio::select! {
            result = signal::ctrl_c() => result?,
            _ = shutdown.cancelled() => {}
        }
        info!("Shutting down...");
        shutdown.cancel();

        let _ = server_handle.await;

        info!("Done.");
        Ok(())
    }
}
