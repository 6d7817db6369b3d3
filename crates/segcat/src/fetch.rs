use std::{future::Future, num::NonZeroUsize, sync::Arc};

use bytes::Bytes;
use reqwest::Url;
use tokio::sync::Semaphore;

use crate::{
    error::{CatError, CatResult},
    util::pipe::{forward, unbounded_pipe, ByteStream},
};

/// Default number of segment bodies that may be downloading at once.
pub const DEFAULT_CONCURRENCY: NonZeroUsize = match NonZeroUsize::new(128) {
    Some(n) => n,
    None => unreachable!(),
};
/// Default size of the chunks a body is drained in.
pub const DEFAULT_BUFFER_SIZE: usize = 128 * 1024;

/// The download collaborator.
pub trait Download: Send + Sync + 'static {
    /// Fetches a small resource, such as a key or a playlist, in one shot.
    fn fetch(&self, url: Url) -> impl Future<Output = CatResult<Bytes>> + Send;

    /// Opens the body of a resource as a byte stream.
    fn stream(&self, url: Url) -> impl Future<Output = CatResult<ByteStream>> + Send;
}

impl<D> Download for Arc<D>
where
    D: Download,
{
    fn fetch(&self, url: Url) -> impl Future<Output = CatResult<Bytes>> + Send {
        self.as_ref().fetch(url)
    }

    fn stream(&self, url: Url) -> impl Future<Output = CatResult<ByteStream>> + Send {
        self.as_ref().stream(url)
    }
}

/// Performs segment fetches under a shared concurrency limit.
///
/// Clones share the same permits, so every pipeline of one run draws from
/// the same budget.
pub struct SegmentFetcher<D> {
    downloader: Arc<D>,
    permits: Arc<Semaphore>,
    buffer_size: usize,
}

impl<D> Clone for SegmentFetcher<D> {
    fn clone(&self) -> Self {
        Self {
            downloader: self.downloader.clone(),
            permits: self.permits.clone(),
            buffer_size: self.buffer_size,
        }
    }
}

impl<D> SegmentFetcher<D>
where
    D: Download,
{
    pub fn new(downloader: D, concurrency: NonZeroUsize) -> Self {
        Self {
            downloader: Arc::new(downloader),
            permits: Arc::new(Semaphore::new(concurrency.get())),
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    pub fn downloader(&self) -> &D {
        &self.downloader
    }

    /// Number of fetches that could start right now.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Starts fetching `url` and returns its body as a stream.
    ///
    /// Waits for a free permit before returning. The permit is held until
    /// the whole body has been read off the network into memory, regardless
    /// of how fast the returned stream is consumed.
    pub async fn open(&self, url: Url) -> CatResult<ByteStream> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| CatError::IOError(std::io::Error::other(e)))?;
        tracing::debug!("start stream {url}");

        let downloader = self.downloader.clone();
        let buffer_size = self.buffer_size;
        let (mut writer, reader) = unbounded_pipe();
        tokio::spawn(async move {
            let result: CatResult<u64> = async {
                let mut body = downloader.stream(url.clone()).await?;
                forward(&mut body, &mut writer, buffer_size).await
            }
            .await;
            drop(permit);

            match result {
                Ok(size) => tracing::debug!("fin stream {url} ({size} bytes)"),
                Err(e) => {
                    tracing::debug!("stream {url} failed: {e}");
                    writer.close_with_error(e).await;
                }
            }
        });

        Ok(reader)
    }
}
