/*!
    Shared types for the frame extraction crates.

    This crate defines the vocabulary that crosses crate boundaries: image
    formats and their marker bytes, extracted frames, and archive entry naming.
    It knows nothing about processes, I/O or containers.
*/

mod error;
mod format;
mod frame;

pub use error::ParseError;
pub use format::{FormatSignature, ImageFormat};
pub use frame::{Frame, FrameNaming};
