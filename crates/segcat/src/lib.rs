pub mod blackout;
pub mod decrypt;
pub mod download;
pub mod error;
pub mod fetch;
pub mod hls;
pub mod key;
pub mod media;
pub mod remux;
pub mod util;

#[cfg(test)]
mod test_util;

pub use error::{CatError, CatResult, ErrorKind};
pub use fetch::{Download, SegmentFetcher};
pub use util::{http::HttpClient, pipe::ByteStream};
