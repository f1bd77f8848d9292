/*!
    Marker-based splitting of concatenated images.
*/

use bytes::{Buf, BytesMut};
use log::{debug, trace};

use frame_types::{FormatSignature, Frame, ImageFormat};

use crate::DemuxError;

/**
    Limits and policy knobs for a [`FrameSplitter`].
*/
#[derive(Clone, Debug)]
pub struct SplitterConfig {
    /// Stop after this many frames (None = unbounded).
    pub max_frames: Option<u32>,
    /// A PNG left over at end of stream is kept only if it is longer than this.
    pub trailing_frame_threshold: usize,
    /// Bytes allowed to accumulate without any start marker.
    pub max_unmarked_bytes: usize,
    /// Bytes a single frame may occupy before it is considered runaway.
    pub max_frame_bytes: usize,
}

impl SplitterConfig {
    pub const DEFAULT_TRAILING_FRAME_THRESHOLD: usize = 64;
    pub const DEFAULT_MAX_UNMARKED_BYTES: usize = 1024 * 1024;
    pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

    pub fn with_max_frames(mut self, max_frames: u32) -> Self {
        self.max_frames = Some(max_frames);
        self
    }
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            max_frames: None,
            trailing_frame_threshold: Self::DEFAULT_TRAILING_FRAME_THRESHOLD,
            max_unmarked_bytes: Self::DEFAULT_MAX_UNMARKED_BYTES,
            max_frame_bytes: Self::DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

/**
    Splits a raw concatenation of images into frames.

    The scan buffer only ever holds the frame currently being assembled plus
    bytes not yet examined; bytes belonging to an emitted frame are split off
    and handed to the frame without copying.

    JPEG frames run from the start-of-image marker to the first end-of-image
    marker after it. PNG has no end marker, so a PNG frame is only complete
    once the next signature shows up, or the stream ends (see [`finish`]).

    [`finish`]: FrameSplitter::finish
*/
#[derive(Debug)]
pub struct FrameSplitter {
    format: ImageFormat,
    signature: FormatSignature,
    config: SplitterConfig,
    buffer: BytesMut,
    /// A start marker sits at offset 0 of the buffer.
    in_frame: bool,
    /// Where the next marker search resumes.
    scan_offset: usize,
    emitted: u32,
    skipped_bytes: usize,
    dropped_bytes: usize,
    finished: bool,
}

impl FrameSplitter {
    pub fn new(format: ImageFormat, config: SplitterConfig) -> Self {
        Self {
            format,
            signature: format.signature(),
            config,
            buffer: BytesMut::new(),
            in_frame: false,
            scan_offset: 0,
            emitted: 0,
            skipped_bytes: 0,
            dropped_bytes: 0,
            finished: false,
        }
    }

    /// Number of frames emitted so far.
    pub fn emitted(&self) -> u32 {
        self.emitted
    }

    /// Bytes currently held in the scan buffer.
    #[cfg(test)]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes discarded before a start marker.
    pub fn skipped_bytes(&self) -> usize {
        self.skipped_bytes
    }

    /// Bytes of an incomplete trailing frame dropped at end of stream.
    pub fn dropped_bytes(&self) -> usize {
        self.dropped_bytes
    }

    /**
        Returns true once the frame cap has been reached. No further frames
        will be emitted, whatever is buffered.
    */
    pub fn is_capped(&self) -> bool {
        self.config
            .max_frames
            .is_some_and(|max| self.emitted >= max)
    }

    /**
        Append a chunk of input. Chunks may split images and markers anywhere.
    */
    pub fn push(&mut self, chunk: &[u8]) {
        if self.finished || self.is_capped() {
            return;
        }
        self.buffer.extend_from_slice(chunk);
    }

    /**
        Extract the next complete frame from the buffer, if there is one.

        Call repeatedly until it returns `Ok(None)`; a single chunk can
        complete any number of frames.
    */
    pub fn next_frame(&mut self) -> Result<Option<Frame>, DemuxError> {
        if self.finished || self.is_capped() {
            return Ok(None);
        }

        if !self.in_frame && !self.seek_start()? {
            return Ok(None);
        }

        let end = match self.signature.end {
            // End marker is part of the frame.
            Some(end) => find(&self.buffer, end, self.scan_offset).map(|pos| pos + end.len()),
            // Next start marker begins the following frame.
            None => find(&self.buffer, self.signature.start, self.scan_offset),
        };

        match end {
            Some(end) => Ok(Some(self.emit(end))),
            None => {
                if self.buffer.len() > self.config.max_frame_bytes {
                    return Err(DemuxError::FrameTooLarge {
                        format: self.format,
                        limit: self.config.max_frame_bytes,
                    });
                }
                let marker_len = self.signature.end.unwrap_or(self.signature.start).len();
                let resume = resume_offset(self.buffer.len(), marker_len);
                self.scan_offset = resume.max(self.signature.start.len());
                Ok(None)
            }
        }
    }

    /**
        Signal end of stream and flush the trailing frame.

        A trailing PNG is emitted if it is longer than the configured
        threshold. A trailing JPEG without its end marker is always dropped.
        Either way the buffer is released; later calls return `None`.
    */
    pub fn finish(&mut self) -> Option<Frame> {
        if self.finished {
            return None;
        }
        self.finished = true;

        if self.is_capped() {
            self.buffer.clear();
            return None;
        }

        if !self.in_frame
            && let Some(pos) = find(&self.buffer, self.signature.start, 0)
        {
            self.skip(pos);
            self.in_frame = true;
        }

        let remaining = self.buffer.len();
        if remaining == 0 {
            return None;
        }

        let keep = self.in_frame
            && self.signature.end.is_none()
            && remaining > self.config.trailing_frame_threshold;

        if keep {
            return Some(self.emit(remaining));
        }

        debug!(
            "dropping {} trailing bytes of incomplete {} data",
            remaining, self.format
        );
        self.dropped_bytes += remaining;
        self.buffer.clear();
        self.in_frame = false;
        None
    }

    /// Returns true if a start marker now sits at offset 0.
    fn seek_start(&mut self) -> Result<bool, DemuxError> {
        let start = self.signature.start;
        match find(&self.buffer, start, self.scan_offset) {
            Some(pos) => {
                self.skip(pos);
                self.in_frame = true;
                self.scan_offset = start.len();
                Ok(true)
            }
            None => {
                if self.buffer.len() > self.config.max_unmarked_bytes {
                    return Err(DemuxError::NoMarker {
                        format: self.format,
                        buffered: self.buffer.len(),
                    });
                }
                self.scan_offset = resume_offset(self.buffer.len(), start.len());
                Ok(false)
            }
        }
    }

    fn skip(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        trace!("skipping {} bytes before {} start marker", count, self.format);
        self.buffer.advance(count);
        self.skipped_bytes += count;
    }

    fn emit(&mut self, end: usize) -> Frame {
        let data = self.buffer.split_to(end).freeze();
        self.in_frame = false;
        self.scan_offset = 0;
        self.emitted += 1;
        trace!(
            "{} frame {} complete ({} bytes, {} buffered)",
            self.format,
            self.emitted,
            data.len(),
            self.buffer.len()
        );
        Frame::new(self.emitted, self.format, data)
    }
}

/// Where to resume searching so a marker split across pushes is still found.
fn resume_offset(len: usize, marker_len: usize) -> usize {
    len.saturating_sub(marker_len.saturating_sub(1))
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg(fill: u8, len: usize) -> Vec<u8> {
        let mut data = vec![0xFF, 0xD8];
        data.extend(std::iter::repeat_n(fill, len));
        data.extend([0xFF, 0xD9]);
        data
    }

    fn png(fill: u8, len: usize) -> Vec<u8> {
        let mut data = FormatSignature::PNG.start.to_vec();
        data.extend(std::iter::repeat_n(fill, len));
        data
    }

    fn split(format: ImageFormat, config: SplitterConfig, chunks: &[&[u8]]) -> Vec<Frame> {
        let mut splitter = FrameSplitter::new(format, config);
        let mut frames = Vec::new();
        for chunk in chunks {
            splitter.push(chunk);
            while let Some(frame) = splitter.next_frame().unwrap() {
                frames.push(frame);
            }
        }
        frames.extend(splitter.finish());
        frames
    }

    fn bytewise(data: &[u8]) -> Vec<&[u8]> {
        data.chunks(1).collect()
    }

    #[test]
    fn jpeg_frames_split_mid_marker() {
        let first = jpeg(0x11, 10);
        let second = jpeg(0x22, 20);
        let stream = [first.clone(), second.clone()].concat();

        // First cut lands between 0xFF and 0xD9 of the first end marker,
        // second cut between 0xFF and 0xD8 of the second start marker.
        let cut_a = first.len() - 1;
        let cut_b = first.len() + 1;
        let chunks = [&stream[..cut_a], &stream[cut_a..cut_b], &stream[cut_b..]];

        let frames = split(ImageFormat::Jpeg, SplitterConfig::default(), &chunks);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].index(), 1);
        assert_eq!(frames[0].data().as_ref(), first.as_slice());
        assert_eq!(frames[1].index(), 2);
        assert_eq!(frames[1].data().as_ref(), second.as_slice());
    }

    #[test]
    fn one_chunk_can_complete_many_frames() {
        let stream = [jpeg(1, 3), jpeg(2, 4), jpeg(3, 5)].concat();
        let frames = split(ImageFormat::Jpeg, SplitterConfig::default(), &[&stream]);
        let indexes: Vec<u32> = frames.iter().map(Frame::index).collect();
        assert_eq!(indexes, vec![1, 2, 3]);
        assert_eq!(frames[2].len(), 9);
    }

    #[test]
    fn bytewise_delivery_matches_single_chunk() {
        let jpegs = [jpeg(1, 30), jpeg(2, 1), jpeg(3, 200)].concat();
        let whole = split(ImageFormat::Jpeg, SplitterConfig::default(), &[&jpegs]);
        let single = split(ImageFormat::Jpeg, SplitterConfig::default(), &bytewise(&jpegs));
        assert_eq!(whole, single);

        let pngs = [png(1, 100), png(2, 120), png(3, 90)].concat();
        let whole = split(ImageFormat::Png, SplitterConfig::default(), &[&pngs]);
        let single = split(ImageFormat::Png, SplitterConfig::default(), &bytewise(&pngs));
        assert_eq!(whole.len(), 3);
        assert_eq!(whole, single);
    }

    #[test]
    fn truncated_jpeg_is_dropped() {
        let complete = [jpeg(1, 10), jpeg(2, 10)].concat();
        let mut truncated = complete.clone();
        truncated.extend([0xFF, 0xD8, 0x01, 0x02]);

        let mut splitter = FrameSplitter::new(ImageFormat::Jpeg, SplitterConfig::default());
        splitter.push(&truncated);
        let mut count = 0;
        while splitter.next_frame().unwrap().is_some() {
            count += 1;
        }
        assert!(splitter.finish().is_none());
        assert_eq!(count, 2);
        assert_eq!(splitter.dropped_bytes(), 4);

        let baseline = split(ImageFormat::Jpeg, SplitterConfig::default(), &[&complete]);
        assert_eq!(baseline.len(), count);
    }

    #[test]
    fn jpeg_stream_ending_after_start_marker_yields_same_count() {
        let complete = jpeg(9, 16);
        let with_tail = [complete.clone(), vec![0xFF, 0xD8]].concat();
        let a = split(ImageFormat::Jpeg, SplitterConfig::default(), &[&complete]);
        let b = split(ImageFormat::Jpeg, SplitterConfig::default(), &[&with_tail]);
        assert_eq!(a.len(), b.len());
    }

    #[test]
    fn single_png_respects_threshold() {
        let config = SplitterConfig {
            trailing_frame_threshold: 64,
            ..SplitterConfig::default()
        };

        let big = png(7, 100);
        let frames = split(ImageFormat::Png, config.clone(), &[&big]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data().as_ref(), big.as_slice());

        // 8 byte signature + 56 bytes = exactly the threshold, not above it.
        let small = png(7, 56);
        assert!(split(ImageFormat::Png, config, &[&small]).is_empty());
    }

    #[test]
    fn png_frame_held_until_next_signature() {
        let first = png(1, 100);
        let mut splitter = FrameSplitter::new(ImageFormat::Png, SplitterConfig::default());

        splitter.push(&first);
        assert!(splitter.next_frame().unwrap().is_none());

        splitter.push(&FormatSignature::PNG.start[..3]);
        assert!(splitter.next_frame().unwrap().is_none());

        splitter.push(&FormatSignature::PNG.start[3..]);
        let frame = splitter.next_frame().unwrap().unwrap();
        assert_eq!(frame.data().as_ref(), first.as_slice());
        assert_eq!(splitter.buffered(), 8);
    }

    #[test]
    fn cap_stops_after_kth_frame() {
        let stream = [jpeg(1, 5), jpeg(2, 5), jpeg(3, 5), jpeg(4, 5)].concat();
        let config = SplitterConfig::default().with_max_frames(2);

        let mut splitter = FrameSplitter::new(ImageFormat::Jpeg, config);
        splitter.push(&stream);
        assert_eq!(splitter.next_frame().unwrap().unwrap().index(), 1);
        assert!(!splitter.is_capped());
        assert_eq!(splitter.next_frame().unwrap().unwrap().index(), 2);
        assert!(splitter.is_capped());
        assert!(splitter.next_frame().unwrap().is_none());
        assert!(splitter.finish().is_none());
    }

    #[test]
    fn cap_suppresses_trailing_png() {
        let stream = [png(1, 100), png(2, 100)].concat();
        let frames = split(
            ImageFormat::Png,
            SplitterConfig::default().with_max_frames(1),
            &[&stream],
        );
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn leading_garbage_is_skipped() {
        let stream = [b"noise".to_vec(), jpeg(1, 4)].concat();
        let mut splitter = FrameSplitter::new(ImageFormat::Jpeg, SplitterConfig::default());
        splitter.push(&stream);
        let frame = splitter.next_frame().unwrap().unwrap();
        assert_eq!(frame.data().as_ref(), jpeg(1, 4).as_slice());
        assert_eq!(splitter.skipped_bytes(), 5);
    }

    #[test]
    fn unmarked_data_past_bound_is_an_anomaly() {
        let config = SplitterConfig {
            max_unmarked_bytes: 16,
            ..SplitterConfig::default()
        };
        let mut splitter = FrameSplitter::new(ImageFormat::Png, config);
        splitter.push(&[0u8; 16]);
        assert!(splitter.next_frame().unwrap().is_none());
        splitter.push(&[0u8; 1]);
        let err = splitter.next_frame().unwrap_err();
        assert!(err.is_protocol_anomaly());
        assert!(matches!(err, DemuxError::NoMarker { buffered: 17, .. }));
    }

    #[test]
    fn runaway_frame_is_an_anomaly() {
        let config = SplitterConfig {
            max_frame_bytes: 32,
            ..SplitterConfig::default()
        };
        let mut splitter = FrameSplitter::new(ImageFormat::Jpeg, config);
        splitter.push(&[0xFF, 0xD8]);
        splitter.push(&[0u8; 40]);
        let err = splitter.next_frame().unwrap_err();
        assert!(matches!(err, DemuxError::FrameTooLarge { limit: 32, .. }));
    }

    #[test]
    fn sequence_numbers_are_contiguous() {
        let stream: Vec<u8> = (0..50u8).flat_map(|i| jpeg(i, i as usize)).collect();
        let chunks: Vec<&[u8]> = stream.chunks(7).collect();
        let frames = split(ImageFormat::Jpeg, SplitterConfig::default(), &chunks);
        assert_eq!(frames.len(), 50);
        for (n, frame) in frames.iter().enumerate() {
            assert_eq!(frame.index() as usize, n + 1);
        }
    }
}
