/*!
    Frame demultiplexing for raw image streams.

    An encoder writing `image2pipe` output produces complete PNG or JPEG images
    back to back, with no length prefix or container around them. This crate
    cuts such a stream back into individual [`Frame`]s.

    [`FrameSplitter`] is the synchronous core: bytes are pushed in, frames are
    pulled out. [`FrameReader`] drives a splitter from any [`tokio::io::AsyncRead`],
    reading only when the splitter has no complete frame buffered.
*/

mod error;
mod reader;
mod splitter;

pub use error::DemuxError;
pub use reader::{DEFAULT_CHUNK_SIZE, FrameReader};
pub use splitter::{FrameSplitter, SplitterConfig};

pub use frame_types::{Frame, ImageFormat};
