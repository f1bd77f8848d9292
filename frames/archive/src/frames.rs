/*!
    Archive adapter naming and writing frames in arrival order.
*/

use log::debug;
use tokio::io::AsyncWrite;

use frame_types::{Frame, FrameNaming};

use crate::{ArchiveError, Compression, ZipStreamWriter};

/**
    Writes frames into a streamed ZIP archive as `frame_NNNN.<ext>` entries.

    Entries are listed in the order frames are written; names come from each
    frame's own sequence number. [`finish`] consumes the archive, so it runs
    at most once and only after every earlier write has completed.

    [`finish`]: FrameArchive::finish
*/
pub struct FrameArchive<W> {
    writer: ZipStreamWriter<W>,
    naming: FrameNaming,
    frames: u32,
}

impl<W> FrameArchive<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(inner: W, naming: FrameNaming, compression: Compression) -> Self {
        Self {
            writer: ZipStreamWriter::new(inner, compression),
            naming,
            frames: 0,
        }
    }

    /// Frames written so far.
    pub fn frames(&self) -> u32 {
        self.frames
    }

    pub fn bytes_written(&self) -> u64 {
        self.writer.bytes_written()
    }

    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), ArchiveError> {
        let name = self.naming.name(frame);
        self.writer.add_entry(&name, frame.data()).await?;
        self.frames += 1;
        debug!("archived {} ({} bytes)", name, frame.len());
        Ok(())
    }

    /**
        Finalize the archive and return the sink.
    */
    pub async fn finish(self) -> Result<W, ArchiveError> {
        self.writer.finish().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};

    use bytes::Bytes;
    use frame_types::ImageFormat;

    use crate::zip::tests::parse_archive;

    /// Accepts `budget` bytes, then fails like a closed socket.
    #[derive(Debug)]
    struct ClosingWriter {
        budget: usize,
        shutdowns: Arc<AtomicUsize>,
    }

    impl ClosingWriter {
        fn new(budget: usize) -> (Self, Arc<AtomicUsize>) {
            let shutdowns = Arc::new(AtomicUsize::new(0));
            let writer = Self {
                budget,
                shutdowns: Arc::clone(&shutdowns),
            };
            (writer, shutdowns)
        }
    }

    impl AsyncWrite for ClosingWriter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            if self.budget == 0 {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed")));
            }
            let n = buf.len().min(self.budget);
            self.budget -= n;
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Poll::Ready(Ok(()))
        }
    }

    fn frame(index: u32, format: ImageFormat, data: &'static [u8]) -> Frame {
        Frame::new(index, format, Bytes::from_static(data))
    }

    #[tokio::test]
    async fn test_frames_named_in_arrival_order() {
        let mut archive = FrameArchive::new(
            Vec::new(),
            FrameNaming::for_capacity(100),
            Compression::Stored,
        );
        archive
            .write_frame(&frame(1, ImageFormat::Jpeg, b"\xFF\xD8one\xFF\xD9"))
            .await
            .unwrap();
        archive
            .write_frame(&frame(2, ImageFormat::Jpeg, b"\xFF\xD8two\xFF\xD9"))
            .await
            .unwrap();
        assert_eq!(archive.frames(), 2);

        let buf = archive.finish().await.unwrap();
        let entries = parse_archive(&buf);
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["frame_0001.jpeg", "frame_0002.jpeg"]);
        assert_eq!(entries[1].data, b"\xFF\xD8two\xFF\xD9");
    }

    #[tokio::test]
    async fn test_wide_names_for_large_capacity() {
        let mut archive = FrameArchive::new(
            Vec::new(),
            FrameNaming::for_capacity(12_000),
            Compression::Stored,
        );
        archive
            .write_frame(&frame(3, ImageFormat::Png, b"png"))
            .await
            .unwrap();
        let buf = archive.finish().await.unwrap();
        assert_eq!(parse_archive(&buf)[0].name, "frame_00003.png");
    }

    #[tokio::test]
    async fn test_closed_sink_reports_disconnect() {
        let (writer, _) = ClosingWriter::new(10);
        let mut archive = FrameArchive::new(writer, FrameNaming::default(), Compression::Stored);
        let err = archive
            .write_frame(&frame(1, ImageFormat::Png, b"0123456789abcdef"))
            .await
            .unwrap_err();
        assert!(err.is_disconnect());
        assert_eq!(archive.frames(), 0);
    }

    #[tokio::test]
    async fn test_finish_shuts_down_closed_sink_once() {
        let (writer, shutdowns) = ClosingWriter::new(10);
        let mut archive = FrameArchive::new(writer, FrameNaming::default(), Compression::Stored);
        archive
            .write_frame(&frame(1, ImageFormat::Png, b"0123456789abcdef"))
            .await
            .unwrap_err();

        let err = archive.finish().await.unwrap_err();
        assert!(err.is_disconnect());
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }
}
