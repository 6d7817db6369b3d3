use std::{num::NonZeroUsize, sync::Arc};

use reqwest::Url;
use tokio::sync::mpsc;

use crate::{
    blackout::BlackoutPolicy,
    decrypt::{decrypt_stream, normalize_chunk_size, DEFAULT_CBC_BUFFER_SIZE},
    error::CatResult,
    fetch::{Download, SegmentFetcher, DEFAULT_BUFFER_SIZE, DEFAULT_CONCURRENCY},
    hls::{MediaPlaylist, Segment},
    key::{KeyCache, KeyMaterial},
    util::pipe::{forward, pipe, ByteStream, PipeWriter},
};

const OUTPUT_CAPACITY: usize = 16;

type Queue = mpsc::Sender<CatResult<ByteStream>>;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    concurrency: NonZeroUsize,
    queue_capacity: Option<usize>,
    buffer_size: usize,
    cbc_buffer_size: usize,
    decrypt: bool,
    stream_init: bool,
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            queue_capacity: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            cbc_buffer_size: DEFAULT_CBC_BUFFER_SIZE,
            decrypt: true,
            stream_init: true,
        }
    }

    /// Maximum number of segment bodies downloading at once.
    pub fn concurrency(mut self, concurrency: NonZeroUsize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Number of opened segments that may wait for the output. Defaults to
    /// the concurrency.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    /// Ciphertext chunk size. Values that are not a positive multiple of the
    /// AES block size fall back to the default.
    pub fn cbc_buffer_size(mut self, size: usize) -> Self {
        self.cbc_buffer_size = normalize_chunk_size(size);
        self
    }

    pub fn decrypt(mut self, decrypt: bool) -> Self {
        self.decrypt = decrypt;
        self
    }

    /// Whether `EXT-X-MAP` init sections are part of the output.
    pub fn stream_init(mut self, stream_init: bool) -> Self {
        self.stream_init = stream_init;
        self
    }

    /// Builds the fetcher shared by every pipeline of a run.
    pub fn fetcher<D>(&self, downloader: D) -> SegmentFetcher<D>
    where
        D: Download,
    {
        SegmentFetcher::new(downloader, self.concurrency).with_buffer_size(self.buffer_size)
    }

    fn effective_queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or(self.concurrency.get()).max(1)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Turns a media playlist into one ordered byte stream.
///
/// An ordering producer walks the segments, resolves keys and opens each
/// body through the fetcher, and queues the streams in playlist order. A
/// merge consumer copies the queued streams one after another into the
/// output. Fetches overlap, emission never reorders.
pub struct FetchPipeline<D> {
    fetcher: SegmentFetcher<D>,
    config: PipelineConfig,
}

impl<D> FetchPipeline<D>
where
    D: Download,
{
    pub fn new(fetcher: SegmentFetcher<D>, config: PipelineConfig) -> Self {
        Self { fetcher, config }
    }

    /// Starts streaming `playlist`.
    ///
    /// The first error closes the returned stream after every byte of the
    /// segments before the failing one.
    pub fn run(&self, playlist: MediaPlaylist, blackout: Option<Arc<BlackoutPolicy>>) -> ByteStream {
        let (queue, pending) = mpsc::channel(self.config.effective_queue_capacity());
        let (writer, output) = pipe(OUTPUT_CAPACITY);

        tracing::info!(
            "Start streaming {} segments of {} with {} connection(s).",
            playlist.segments.len(),
            playlist.url,
            self.config.concurrency
        );

        let producer = Producer {
            fetcher: self.fetcher.clone(),
            config: self.config.clone(),
            keys: KeyCache::new(),
            current_init: None,
            blackout,
        };
        tokio::spawn(producer.run(playlist.segments, queue));
        tokio::spawn(merge(pending, writer, self.config.buffer_size));

        output
    }
}

struct Producer<D> {
    fetcher: SegmentFetcher<D>,
    config: PipelineConfig,
    keys: KeyCache,
    current_init: Option<Url>,
    blackout: Option<Arc<BlackoutPolicy>>,
}

impl<D> Producer<D>
where
    D: Download,
{
    async fn run(mut self, segments: Vec<Segment>, queue: Queue) {
        for (i, segment) in segments.iter().enumerate() {
            if queue.is_closed() {
                tracing::debug!("output closed, stop fetching");
                return;
            }

            if let Err(e) = self.process(i + 1, segment, &queue).await {
                tracing::debug!("segment {} failed: {e}", segment.url);
                _ = queue.send(Err(e)).await;
                return;
            }
        }
    }

    async fn process(&mut self, position: usize, segment: &Segment, queue: &Queue) -> CatResult<()> {
        let material = if self.config.decrypt {
            self.keys.material(self.fetcher.downloader(), segment).await?
        } else {
            None
        };
        if let Some(material) = &material {
            tracing::trace!(
                "key={} key_uri={} iv={}",
                hex::encode(material.key),
                material.uri,
                hex::encode(material.iv)
            );
        }

        if let Some(policy) = self
            .blackout
            .as_ref()
            .filter(|policy| policy.substitutes(position, segment))
        {
            tracing::debug!("blackout segment {position}: {}", segment.url);
            self.current_init = None;
            _ = queue.send(Ok(policy.filler_stream(segment)?)).await;
            return Ok(());
        }

        if let Some(map) = segment.map.as_ref().filter(|_| self.config.stream_init) {
            if self.current_init.as_ref() != Some(&map.url) {
                tracing::info!("streaming init segment: {}", map.url);
                let init = self.open(map.url.clone(), material.as_ref()).await?;
                _ = queue.send(Ok(init)).await;
                self.current_init = Some(map.url.clone());
            }
        }

        let body = self.open(segment.url.clone(), material.as_ref()).await?;
        _ = queue.send(Ok(body)).await;
        Ok(())
    }

    async fn open(&self, url: Url, material: Option<&KeyMaterial>) -> CatResult<ByteStream> {
        let body = self.fetcher.open(url).await?;
        Ok(match material {
            Some(material) => {
                decrypt_stream(body, material.key, material.iv, self.config.cbc_buffer_size)
            }
            None => body,
        })
    }
}

/// Copies the queued streams into `writer` strictly in queue order.
async fn merge(
    mut pending: mpsc::Receiver<CatResult<ByteStream>>,
    mut writer: PipeWriter,
    chunk_size: usize,
) {
    while let Some(source) = pending.recv().await {
        let result = match source {
            Ok(mut stream) => forward(&mut stream, &mut writer, chunk_size).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            if writer.is_closed() {
                tracing::debug!("output dropped, stop merging");
            } else {
                writer.close_with_error(e).await;
            }
            return;
        }
    }
    tracing::debug!("all segments merged");
}
