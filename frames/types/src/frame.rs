/*!
    Extracted frames and their archive names.
*/

use bytes::Bytes;

use crate::ImageFormat;

/**
    One complete image cut out of the encoder's output.

    The sequence number is 1-based and contiguous within a single extraction.
    The data is reference counted and never mutated after the frame is built.
*/
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    index: u32,
    format: ImageFormat,
    data: Bytes,
}

impl Frame {
    pub fn new(index: u32, format: ImageFormat, data: Bytes) -> Self {
        Self {
            index,
            format,
            data,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/**
    Naming convention for archive entries: `frame_%0Nd.<ext>`.

    The width is `max(4, digits(capacity))`, where the capacity is the largest
    number of frames the extraction may emit. Fixing the width up front keeps
    every name in one archive the same length, so lexical order matches
    emission order.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameNaming {
    width: usize,
}

impl FrameNaming {
    pub const MIN_WIDTH: usize = 4;

    pub fn for_capacity(capacity: u32) -> Self {
        let digits = capacity.checked_ilog10().map_or(1, |d| d as usize + 1);
        Self {
            width: digits.max(Self::MIN_WIDTH),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn name(&self, frame: &Frame) -> String {
        self.name_for(frame.index(), frame.format())
    }

    pub fn name_for(&self, index: u32, format: ImageFormat) -> String {
        format!(
            "frame_{:0width$}.{}",
            index,
            format.extension(),
            width = self.width
        )
    }
}

impl Default for FrameNaming {
    fn default() -> Self {
        Self {
            width: Self::MIN_WIDTH,
        }
    }
}
