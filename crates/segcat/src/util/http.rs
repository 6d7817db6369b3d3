use std::{io, ops::Deref, sync::Arc};

use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::{Client, ClientBuilder, IntoUrl, Url};
use reqwest_cookie_store::{CookieStore, CookieStoreMutex};
use tokio_util::io::StreamReader;

use crate::{
    error::{CatError, CatResult},
    fetch::Download,
    util::pipe::ByteStream,
};

#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    cookies_store: Arc<CookieStoreMutex>,
}

impl HttpClient {
    pub fn new(builder: ClientBuilder) -> CatResult<Self> {
        let cookies_store = Arc::new(CookieStoreMutex::new(CookieStore::default()));
        let client = builder.cookie_provider(cookies_store.clone()).build()?;

        Ok(Self {
            client,
            cookies_store,
        })
    }

    pub fn add_cookies(&self, cookies: Vec<String>, url: impl IntoUrl) -> CatResult<()> {
        let url = url.into_url()?;
        let mut lock = self
            .cookies_store
            .lock()
            .map_err(|_| io::Error::other("cookie store is poisoned"))?;
        for cookie in cookies {
            if let Err(e) = lock.parse(&cookie, &url) {
                tracing::warn!("ignoring cookie {cookie}: {e}");
            }
        }
        Ok(())
    }

    async fn send(&self, url: Url) -> CatResult<reqwest::Response> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            if let Ok(body) = response.text().await {
                tracing::warn!("Error body: {body}");
            }
            return Err(CatError::HttpError(status));
        }
        Ok(response)
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        let cookies_store = Arc::new(CookieStoreMutex::new(CookieStore::default()));
        let client = Client::builder()
            .cookie_provider(cookies_store.clone())
            .build()
            .unwrap_or_default();

        Self {
            client,
            cookies_store,
        }
    }
}

impl Deref for HttpClient {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

impl Download for HttpClient {
    async fn fetch(&self, url: Url) -> CatResult<Bytes> {
        if url.scheme() == "file" {
            return Ok(tokio::fs::read(file_path(&url)?).await?.into());
        }
        Ok(self.send(url).await?.bytes().await?)
    }

    async fn stream(&self, url: Url) -> CatResult<ByteStream> {
        if url.scheme() == "file" {
            let file = tokio::fs::File::open(file_path(&url)?).await?;
            return Ok(Box::pin(file));
        }

        let body = self
            .send(url)
            .await?
            .bytes_stream()
            .map_err(|e| io::Error::from(CatError::from(e)));
        Ok(Box::pin(StreamReader::new(body)))
    }
}

fn file_path(url: &Url) -> CatResult<std::path::PathBuf> {
    url.to_file_path()
        .map_err(|_| CatError::InvalidArgument(format!("not a local file: {url}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_cookies() {
        let client = HttpClient::default();
        client
            .add_cookies(
                vec!["session=abc".to_string(), "lang=ja".to_string()],
                "https://example.com/live/index.m3u8",
            )
            .unwrap();

        let store = client.cookies_store.lock().unwrap();
        assert!(store.get("example.com", "/live", "session").is_some());
        assert!(store.get("example.com", "/live", "lang").is_some());
    }

    #[test]
    fn test_add_cookies_to_poisoned_store() {
        let client = HttpClient::default();
        let store = client.cookies_store.clone();
        _ = std::thread::spawn(move || {
            let _lock = store.lock().unwrap();
            panic!("poison the cookie store");
        })
        .join();

        let result = client.add_cookies(
            vec!["session=abc".to_string()],
            "https://example.com/index.m3u8",
        );
        assert!(matches!(result, Err(CatError::IOError(_))));
    }
}
