use frame_types::ImageFormat;
use serde::Deserialize;

use crate::extract::{ExtractOptions, Interval};

use super::error::ApiError;

/// A parameter value as clients send it: JSON numbers or strings, form text.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    fn text(&self) -> String {
        match self {
            Scalar::Int(n) => n.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Text(s) => s.trim().to_string(),
        }
    }
}

/// Request parameters before validation.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawParams {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, alias = "maxFrames")]
    pub max_frames: Option<Scalar>,
    #[serde(default, alias = "intervalSeconds")]
    pub interval: Option<Scalar>,
    #[serde(default, alias = "fmt")]
    pub format: Option<Scalar>,
}

impl RawParams {
    /// Fill fields missing here from `other`.
    pub fn or(self, other: RawParams) -> Self {
        Self {
            url: self.url.or(other.url),
            max_frames: self.max_frames.or(other.max_frames),
            interval: self.interval.or(other.interval),
            format: self.format.or(other.format),
        }
    }

    /// The source URL, required and limited to http(s).
    pub fn source_url(&self) -> Result<String, ApiError> {
        let url = self
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ApiError::BadRequest("missing 'url'".to_string()))?;

        let parsed = reqwest::Url::parse(url)
            .map_err(|e| ApiError::Unprocessable(format!("invalid url '{url}': {e}")))?;
        match parsed.scheme() {
            "http" | "https" => Ok(url.to_string()),
            scheme => Err(ApiError::Unprocessable(format!(
                "unsupported url scheme '{scheme}'"
            ))),
        }
    }

    pub fn options(&self, defaults: &RequestDefaults) -> Result<ExtractOptions, ApiError> {
        let max_frames = match &self.max_frames {
            None => defaults.max_frames,
            Some(value) => parse_max_frames(value)?,
        };
        if max_frames > defaults.frame_limit {
            return Err(ApiError::Unprocessable(format!(
                "max_frames must be at most {}, got {}",
                defaults.frame_limit, max_frames
            )));
        }

        let interval = match &self.interval {
            None => defaults.interval,
            Some(value) => value.text().parse::<Interval>().map_err(ApiError::Unprocessable)?,
        };

        let format = match &self.format {
            None => defaults.format,
            Some(value) => {
                let cleaned: String = value
                    .text()
                    .chars()
                    .filter(char::is_ascii_alphanumeric)
                    .collect::<String>()
                    .to_ascii_lowercase();
                cleaned
                    .parse::<ImageFormat>()
                    .map_err(|e| ApiError::Unprocessable(format!("{e}; expected png or jpeg")))?
            }
        };

        Ok(ExtractOptions {
            max_frames,
            interval,
            format,
        })
    }
}

fn parse_max_frames(value: &Scalar) -> Result<u32, ApiError> {
    let invalid = || {
        ApiError::Unprocessable(format!(
            "max_frames must be a positive integer, got '{}'",
            value.text()
        ))
    };
    let n = match value {
        Scalar::Int(n) => *n,
        Scalar::Float(f) if f.fract() == 0.0 && f.is_finite() => *f as i64,
        Scalar::Float(_) => return Err(invalid()),
        Scalar::Text(s) => s.trim().parse::<i64>().map_err(|_| invalid())?,
    };
    match u32::try_from(n) {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(invalid()),
    }
}

/// Values applied when a request leaves a parameter out, plus the cap.
#[derive(Debug, Clone, Copy)]
pub struct RequestDefaults {
    pub max_frames: u32,
    pub interval: Interval,
    pub format: ImageFormat,
    pub frame_limit: u32,
}

impl Default for RequestDefaults {
    fn default() -> Self {
        let options = ExtractOptions::default();
        Self {
            max_frames: options.max_frames,
            interval: options.interval,
            format: options.format,
            frame_limit: 10_000,
        }
    }
}
