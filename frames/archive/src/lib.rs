/*!
    Incremental ZIP output for extracted frames.

    Entries are written to the underlying [`tokio::io::AsyncWrite`] as soon as
    they are added, so the archive can be streamed to a client while frames
    are still being produced. The central directory is written once, by
    [`ZipStreamWriter::finish`], which consumes the writer.
*/

mod error;
mod frames;
mod zip;

pub use error::ArchiveError;
pub use frames::FrameArchive;
pub use zip::{Compression, ZipStreamWriter};
