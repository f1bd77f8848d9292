use std::path::Path;

use serde::Deserialize;
use tokio::process::Command;

/**
    Error type for duration probing.
*/
#[derive(Debug)]
pub enum ProbeError {
    /// Failed to execute ffprobe
    ExecutionFailed(std::io::Error),
    /// ffprobe returned non-zero exit code
    NonZeroExit(i32),
    /// Failed to parse ffprobe output
    ParseFailed(serde_json::Error),
    /// The container reports no usable duration
    NoDuration,
}

impl std::fmt::Display for ProbeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeError::ExecutionFailed(e) => write!(f, "Failed to execute ffprobe: {}", e),
            ProbeError::NonZeroExit(code) => write!(f, "ffprobe exited with code {}", code),
            ProbeError::ParseFailed(e) => write!(f, "Failed to parse ffprobe output: {}", e),
            ProbeError::NoDuration => write!(f, "No duration reported"),
        }
    }
}

impl std::error::Error for ProbeError {}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

/**
    Container duration in seconds, as reported by `ffprobe -show_format`.
*/
pub async fn probe_duration(ffprobe: &Path, input: &Path) -> Result<f64, ProbeError> {
    let output = Command::new(ffprobe)
        .args(["-v", "quiet", "-print_format", "json", "-show_format"])
        .arg(input)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(ProbeError::ExecutionFailed)?;

    if !output.status.success() {
        return Err(ProbeError::NonZeroExit(output.status.code().unwrap_or(-1)));
    }

    parse_duration(&output.stdout)
}

fn parse_duration(json: &[u8]) -> Result<f64, ProbeError> {
    let probe_output: FfprobeOutput =
        serde_json::from_slice(json).map_err(ProbeError::ParseFailed)?;

    probe_output
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs > 0.0)
        .ok_or(ProbeError::NoDuration)
}
