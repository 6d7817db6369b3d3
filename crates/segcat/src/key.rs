use reqwest::Url;

use crate::{
    error::{CatError, CatResult},
    fetch::Download,
    hls::Segment,
};

/// Key and IV that decrypt one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    pub uri: Url,
    pub key: [u8; 16],
    pub iv: [u8; 16],
}

/// Remembers the most recently fetched key.
///
/// Owned by the ordering producer of a pipeline, which calls it once per
/// segment in playlist order. A key is fetched again only when the key URI
/// changes.
#[derive(Default)]
pub struct KeyCache {
    current: Option<(Url, [u8; 16])>,
}

impl KeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn resolve<D>(&mut self, downloader: &D, uri: &Url) -> CatResult<[u8; 16]>
    where
        D: Download,
    {
        if let Some((cached, key)) = &self.current {
            if cached == uri {
                return Ok(*key);
            }
        }

        tracing::debug!("fetching key {uri}");
        let bytes = downloader.fetch(uri.clone()).await?;
        let key: [u8; 16] = bytes
            .as_ref()
            .try_into()
            .map_err(|_| CatError::InvalidAes128Key(bytes.to_vec()))?;
        self.current = Some((uri.clone(), key));
        Ok(key)
    }

    /// Forgets the cached key. Called for segments without encryption.
    pub fn clear(&mut self) {
        self.current = None;
    }

    /// Resolves the key material of `segment`, or clears the cache and
    /// returns `None` if the segment is not encrypted.
    pub async fn material<D>(
        &mut self,
        downloader: &D,
        segment: &Segment,
    ) -> CatResult<Option<KeyMaterial>>
    where
        D: Download,
    {
        let Some(key) = &segment.key else {
            self.clear();
            return Ok(None);
        };

        Ok(Some(KeyMaterial {
            key: self.resolve(downloader, &key.uri).await?,
            iv: key.iv_bytes(segment.media_sequence)?,
            uri: key.uri.clone(),
        }))
    }
}
