/*!
    Pull-based frame reading over an async byte source.
*/

use std::io::ErrorKind;

use futures::Stream;
use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt};

use frame_types::Frame;

use crate::{DemuxError, FrameSplitter};

/// Size of a single read from the underlying source.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/**
    Produces frames one at a time from an async byte source.

    The source is read only when the splitter has no complete frame buffered,
    so a slow consumer leaves unread bytes in the source (for a child process,
    in its pipe) instead of in memory. Once the frame cap is reached nothing
    more is read.

    `next_frame` is cancel safe: dropping its future loses no input.
*/
pub struct FrameReader<R> {
    inner: R,
    splitter: FrameSplitter,
    chunk: Vec<u8>,
    eof: bool,
    done: bool,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(inner: R, splitter: FrameSplitter) -> Self {
        Self::with_chunk_size(inner, splitter, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(inner: R, splitter: FrameSplitter, chunk_size: usize) -> Self {
        Self {
            inner,
            splitter,
            chunk: vec![0; chunk_size.max(1)],
            eof: false,
            done: false,
        }
    }

    pub fn splitter(&self) -> &FrameSplitter {
        &self.splitter
    }

    pub fn emitted(&self) -> u32 {
        self.splitter.emitted()
    }

    pub fn is_capped(&self) -> bool {
        self.splitter.is_capped()
    }

    /// Returns true once the source hit end of stream.
    #[cfg(test)]
    pub fn reached_eof(&self) -> bool {
        self.eof
    }

    /**
        Returns the next frame, or `None` when the stream ended or the cap was
        reached. After `None` or an error, every later call returns `None`.
    */
    pub async fn next_frame(&mut self) -> Result<Option<Frame>, DemuxError> {
        loop {
            if self.done {
                return Ok(None);
            }

            match self.splitter.next_frame() {
                Ok(Some(frame)) => return Ok(Some(frame)),
                Ok(None) => {}
                Err(e) => {
                    self.done = true;
                    return Err(e);
                }
            }

            if self.splitter.is_capped() {
                debug!("frame cap reached after {} frames", self.splitter.emitted());
                self.done = true;
                return Ok(None);
            }

            if self.eof {
                self.done = true;
                return Ok(self.splitter.finish());
            }

            match self.inner.read(&mut self.chunk).await {
                Ok(0) => self.eof = true,
                Ok(n) => self.splitter.push(&self.chunk[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    self.done = true;
                    return Err(e.into());
                }
            }
        }
    }

    /**
        Turn the reader into a [`Stream`] of frames.
    */
    pub fn into_stream(self) -> impl Stream<Item = Result<Frame, DemuxError>> {
        futures::stream::try_unfold(self, |mut reader| async move {
            Ok(reader.next_frame().await?.map(|frame| (frame, reader)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;
    use futures::{StreamExt, TryStreamExt};
    use tokio_util::io::StreamReader;

    use frame_types::{FormatSignature, ImageFormat};

    use crate::SplitterConfig;

    fn jpeg(fill: u8, len: usize) -> Vec<u8> {
        let mut data = vec![0xFF, 0xD8];
        data.extend(std::iter::repeat_n(fill, len));
        data.extend([0xFF, 0xD9]);
        data
    }

    fn chunked(data: &[u8], size: usize) -> impl AsyncRead + Unpin {
        let chunks: Vec<std::io::Result<Bytes>> = data
            .chunks(size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        StreamReader::new(futures::stream::iter(chunks))
    }

    fn reader<R: AsyncRead + Unpin>(
        source: R,
        format: ImageFormat,
        config: SplitterConfig,
    ) -> FrameReader<R> {
        FrameReader::new(source, FrameSplitter::new(format, config))
    }

    #[tokio::test]
    async fn test_reads_frames_across_chunks() {
        let stream = [jpeg(1, 10), jpeg(2, 10), jpeg(3, 10)].concat();
        for size in [1, 3, 13, stream.len()] {
            let mut reader = reader(
                chunked(&stream, size),
                ImageFormat::Jpeg,
                SplitterConfig::default(),
            );
            let mut indexes = Vec::new();
            while let Some(frame) = reader.next_frame().await.unwrap() {
                indexes.push(frame.index());
            }
            assert_eq!(indexes, vec![1, 2, 3], "chunk size {size}");
            assert!(reader.reached_eof());
        }
    }

    #[tokio::test]
    async fn test_trailing_png_flushed_at_eof() {
        let mut stream = FormatSignature::PNG.start.to_vec();
        stream.extend([7u8; 120]);
        let mut reader = reader(
            chunked(&stream, 16),
            ImageFormat::Png,
            SplitterConfig::default(),
        );
        let frame = reader.next_frame().await.unwrap().unwrap();
        assert_eq!(frame.len(), 128);
        assert!(reader.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cap_stops_reading_source() {
        let frames: Vec<u8> = (1..=10).flat_map(|i| jpeg(i, 4)).collect();
        let mut reader = reader(
            chunked(&frames, 8),
            ImageFormat::Jpeg,
            SplitterConfig::default().with_max_frames(3),
        );

        let mut count = 0;
        while reader.next_frame().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 3);
        assert!(reader.is_capped());
        assert!(!reader.reached_eof());
        assert!(reader.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_error_is_reported_once() {
        let chunks: Vec<std::io::Result<Bytes>> = vec![
            Ok(Bytes::from(jpeg(1, 4))),
            Err(std::io::Error::new(ErrorKind::BrokenPipe, "gone")),
        ];
        let mut reader = reader(
            StreamReader::new(futures::stream::iter(chunks)),
            ImageFormat::Jpeg,
            SplitterConfig::default(),
        );
        assert!(reader.next_frame().await.unwrap().is_some());
        assert!(matches!(
            reader.next_frame().await,
            Err(DemuxError::Io(_))
        ));
        assert!(reader.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_into_stream_yields_in_order() {
        let stream = [jpeg(1, 2), jpeg(2, 2)].concat();
        let frames: Vec<Frame> = reader(
            chunked(&stream, 3),
            ImageFormat::Jpeg,
            SplitterConfig::default(),
        )
        .into_stream()
        .try_collect()
        .await
        .unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].index(), 2);

        let empty = reader(chunked(&[], 1), ImageFormat::Jpeg, SplitterConfig::default())
            .into_stream()
            .collect::<Vec<_>>()
            .await;
        assert!(empty.is_empty());
    }
}
