/*!
    The extraction pipeline: source, encoder, demultiplexer and archive.
*/

mod encoder;
mod error;
mod options;
mod pipeline;
mod probe;
mod process;
mod source;
mod state;

pub use error::ExtractError;
pub use options::{ExtractOptions, Interval};
pub use pipeline::Extractor;
pub use source::{ProviderKind, SourceLocator};
