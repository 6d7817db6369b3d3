use std::{collections::HashMap, io::Cursor, sync::Mutex, time::Duration};

use aes::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};
use bytes::Bytes;
use rand::Rng;
use reqwest::{StatusCode, Url};

use crate::{
    error::{CatError, CatResult},
    fetch::Download,
    util::pipe::ByteStream,
};

/// In-memory download collaborator that records every request.
#[derive(Default)]
pub struct MockDownloader {
    bodies: HashMap<String, Bytes>,
    delays: HashMap<String, Duration>,
    random_delay: Option<u64>,
    requests: Mutex<HashMap<String, usize>>,
}

impl MockDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: &str, body: impl Into<Bytes>) -> Self {
        self.bodies.insert(url.to_string(), body.into());
        self
    }

    pub fn with_delay(mut self, url: &str, delay: Duration) -> Self {
        self.delays.insert(url.to_string(), delay);
        self
    }

    /// Delays every response by a random amount up to `max_millis`.
    pub fn with_random_delay(mut self, max_millis: u64) -> Self {
        self.random_delay = Some(max_millis);
        self
    }

    pub fn requests(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .get(url)
            .copied()
            .unwrap_or_default()
    }

    async fn respond(&self, url: Url) -> CatResult<Bytes> {
        let key = url.to_string();
        *self.requests.lock().unwrap().entry(key.clone()).or_default() += 1;

        let delay = match self.random_delay {
            Some(max) => Duration::from_millis(rand::thread_rng().gen_range(0..=max)),
            None => self.delays.get(&key).copied().unwrap_or_default(),
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.bodies
            .get(&key)
            .cloned()
            .ok_or(CatError::HttpError(StatusCode::NOT_FOUND))
    }
}

impl Download for MockDownloader {
    async fn fetch(&self, url: Url) -> CatResult<Bytes> {
        self.respond(url).await
    }

    async fn stream(&self, url: Url) -> CatResult<ByteStream> {
        let body = self.respond(url).await?;
        Ok(Box::pin(Cursor::new(body)))
    }
}

/// AES-128-CBC encrypts `plaintext` with PKCS7 padding.
pub fn encrypt(plaintext: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Vec<u8> {
    cbc::Encryptor::<aes::Aes128>::new(key.into(), iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}
