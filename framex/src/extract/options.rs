use std::fmt;
use std::str::FromStr;

use frame_types::ImageFormat;

/// Smallest interval "auto" will pick, about one frame per video frame at 25fps.
pub const MIN_AUTO_INTERVAL: f64 = 0.04;

/// Interval used when "auto" has nothing to go on.
pub const FALLBACK_INTERVAL: f64 = 1.0;

/// Spacing between extracted frames.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Interval {
    /// Spread the frame budget over the source's duration.
    Auto,
    /// One frame every this many seconds.
    Seconds(f64),
}

impl Interval {
    /**
        Concrete interval in seconds. `duration` is the probed source length,
        if known; it only matters for `Auto`.
    */
    pub fn resolve(self, max_frames: u32, duration: Option<f64>) -> f64 {
        match self {
            Self::Seconds(secs) => secs,
            Self::Auto => match duration {
                Some(d) if d.is_finite() && d > 0.0 && max_frames > 0 => {
                    (d / f64::from(max_frames)).max(MIN_AUTO_INTERVAL)
                }
                _ => FALLBACK_INTERVAL,
            },
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Seconds(secs) => write!(f, "{secs}"),
        }
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }
        let secs: f64 = s
            .parse()
            .map_err(|_| format!("interval must be a positive number or \"auto\", got '{s}'"))?;
        Self::try_from(secs)
    }
}

impl TryFrom<f64> for Interval {
    type Error = String;

    fn try_from(secs: f64) -> Result<Self, Self::Error> {
        if secs.is_finite() && secs > 0.0 {
            Ok(Self::Seconds(secs))
        } else {
            Err(format!("interval must be a positive number, got {secs}"))
        }
    }
}

/// What to extract for one request.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExtractOptions {
    pub max_frames: u32,
    pub interval: Interval,
    pub format: ImageFormat,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            max_frames: 100,
            interval: Interval::Seconds(5.0),
            format: ImageFormat::Png,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_interval() {
        assert_eq!("auto".parse::<Interval>(), Ok(Interval::Auto));
        assert_eq!("AUTO".parse::<Interval>(), Ok(Interval::Auto));
        assert_eq!("2.5".parse::<Interval>(), Ok(Interval::Seconds(2.5)));
        assert!("0".parse::<Interval>().is_err());
        assert!("-1".parse::<Interval>().is_err());
        assert!("NaN".parse::<Interval>().is_err());
        assert!("soon".parse::<Interval>().is_err());
    }

    #[test]
    fn test_resolve_auto_spreads_over_duration() {
        assert_eq!(Interval::Auto.resolve(10, Some(100.0)), 10.0);
        assert_eq!(Interval::Auto.resolve(1000, Some(1.0)), MIN_AUTO_INTERVAL);
        assert_eq!(Interval::Auto.resolve(10, None), FALLBACK_INTERVAL);
        assert_eq!(Interval::Auto.resolve(10, Some(0.0)), FALLBACK_INTERVAL);
        assert_eq!(Interval::Seconds(3.0).resolve(10, Some(100.0)), 3.0);
    }
}
