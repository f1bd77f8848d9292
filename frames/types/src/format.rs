/*!
    Image formats and the marker bytes used to find them in a raw stream.
*/

use std::fmt;
use std::str::FromStr;

use crate::ParseError;

/**
    Marker bytes identifying an image inside a concatenated byte stream.

    PNG only has a start signature, so the extent of a PNG image is known once
    the next signature (or the end of the stream) is seen. JPEG has both a
    start-of-image and an end-of-image marker.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FormatSignature {
    pub start: &'static [u8],
    pub end: Option<&'static [u8]>,
}

impl FormatSignature {
    pub const PNG: Self = Self {
        start: &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A],
        end: None,
    };

    pub const JPEG: Self = Self {
        start: &[0xFF, 0xD8],
        end: Some(&[0xFF, 0xD9]),
    };
}

/**
    Raster formats the encoder can be asked to produce.
*/
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
}

impl ImageFormat {
    pub const fn signature(self) -> FormatSignature {
        match self {
            Self::Png => FormatSignature::PNG,
            Self::Jpeg => FormatSignature::JPEG,
        }
    }

    /**
        File extension used for archive entries, also the format tag.
    */
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
        }
    }

    /**
        Name of the ffmpeg encoder producing this format.
    */
    pub const fn ffmpeg_codec(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "mjpeg",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ImageFormat {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            _ => Err(ParseError {
                kind: "image format",
                value: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_aliases_and_case() {
        assert_eq!("png".parse::<ImageFormat>(), Ok(ImageFormat::Png));
        assert_eq!("JPG".parse::<ImageFormat>(), Ok(ImageFormat::Jpeg));
        assert_eq!(" jpeg ".parse::<ImageFormat>(), Ok(ImageFormat::Jpeg));
    }

    #[test]
    fn parse_rejects_unknown() {
        let err = "gif".parse::<ImageFormat>().unwrap_err();
        assert_eq!(err.to_string(), "unknown image format 'gif'");
    }

    #[test]
    fn signatures_match_format() {
        assert_eq!(ImageFormat::Png.signature().start.len(), 8);
        assert!(ImageFormat::Png.signature().end.is_none());
        assert_eq!(ImageFormat::Jpeg.signature().end, Some(&[0xFF, 0xD9][..]));
    }
}
