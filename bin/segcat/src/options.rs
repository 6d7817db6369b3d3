use std::{num::NonZeroUsize, str::FromStr, time::Duration};

use anyhow::Context;
use clap::{Args, ValueEnum};
use fake_user_agent::get_chrome_rua;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Client, Url,
};
use segcat::{
    decrypt::DEFAULT_CBC_BUFFER_SIZE,
    download::PipelineConfig,
    fetch::{DEFAULT_BUFFER_SIZE, DEFAULT_CONCURRENCY},
    hls::SelectExpr,
    media::{AudioProfile, MediaProfile, VideoProfile},
    remux::RemuxFormat,
    HttpClient,
};

#[derive(Args, Clone, Debug)]
pub struct HttpOptions {
    /// Additional HTTP headers, eg. "Referer: https://example.com"
    #[clap(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// Cookies sent with every request, eg. "a=1; b=2"
    #[clap(long)]
    pub cookies: Option<String>,

    /// HTTP timeout, in seconds. Requests never time out by default.
    #[clap(long)]
    pub timeout: Option<u64>,
}

impl HttpOptions {
    pub fn into_client(self, cookie_url: &Url) -> anyhow::Result<HttpClient> {
        let mut headers = HeaderMap::new();
        for header in &self.headers {
            let (key, value) = header
                .split_once(':')
                .with_context(|| format!("Invalid header: {header}"))?;
            headers.insert(
                HeaderName::from_str(key.trim()).context("Invalid header name")?,
                HeaderValue::from_str(value.trim()).context("Invalid header value")?,
            );
        }

        let mut builder = Client::builder()
            .default_headers(headers)
            .user_agent(get_chrome_rua());
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(Duration::from_secs(timeout));
        }

        let client = HttpClient::new(builder)?;
        if let Some(cookies) = self.cookies {
            let cookies = cookies
                .split(';')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect();
            client.add_cookies(cookies, cookie_url.clone())?;
        }
        Ok(client)
    }
}

#[derive(Args, Clone, Debug)]
pub struct PipelineOptions {
    /// Maximum number of concurrent HTTP fetches
    #[clap(long, default_value_t = DEFAULT_CONCURRENCY)]
    pub max_http: NonZeroUsize,

    /// Size of the chunks segment bodies are read in
    #[clap(long, default_value_t = DEFAULT_BUFFER_SIZE)]
    pub max_buf: usize,

    /// Size of the chunks ciphertext is decrypted in, a multiple of 16
    #[clap(long, default_value_t = DEFAULT_CBC_BUFFER_SIZE)]
    pub cbc_buf: usize,

    /// Debugging: never decrypt anything
    #[clap(long)]
    pub no_decrypt: bool,

    /// Skip init sections
    #[clap(long)]
    pub no_init: bool,
}

impl PipelineOptions {
    pub fn config(&self) -> PipelineConfig {
        PipelineConfig::new()
            .concurrency(self.max_http)
            .buffer_size(self.max_buf)
            .cbc_buffer_size(self.cbc_buf)
            .decrypt(!self.no_decrypt)
            .stream_init(!self.no_init)
    }
}

#[derive(Args, Clone, Debug)]
pub struct FilterOptions {
    /// Trim away all ad breaks
    #[clap(long)]
    pub no_ads: bool,

    /// Time range to keep: <start>, <start>+<duration> or <start>-<end>, in
    /// Unix seconds
    #[clap(long)]
    pub select: Option<SelectExpr>,

    /// Debugging: skip this amount of segments after the other filters
    #[clap(long, default_value_t = 0)]
    pub skip: usize,

    /// Debugging: limit the number of segments processed
    #[clap(long, default_value_t = 0)]
    pub count: usize,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum OutputFormat {
    /// Fragmented MP4
    #[default]
    Mp4,
    /// MPEG transport stream
    Ts,
}

impl From<OutputFormat> for RemuxFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Mp4 => RemuxFormat::FragmentedMp4,
            OutputFormat::Ts => RemuxFormat::MpegTs,
        }
    }
}

/// Encoder settings for generated filler, used as is for media playlists
/// and refined from the chosen variant of a master playlist.
#[derive(Args, Clone, Debug)]
pub struct ProfileOptions {
    /// Video width
    #[clap(long, default_value_t = VideoProfile::default().width)]
    pub width: u64,

    /// Video height
    #[clap(long, default_value_t = VideoProfile::default().height)]
    pub height: u64,

    /// Frame rate
    #[clap(long, default_value_t = VideoProfile::default().fps)]
    pub fps: f64,

    /// Video codec
    #[clap(long, default_value_t = VideoProfile::default().codec)]
    pub vcodec: String,

    /// Video profile
    #[clap(long, default_value_t = VideoProfile::default().profile)]
    pub profile: String,

    /// Video level
    #[clap(long, default_value_t = VideoProfile::default().level)]
    pub level: String,

    /// Video bitrate
    #[clap(long, default_value_t = VideoProfile::default().bitrate)]
    pub vbps: u64,

    /// Audio codec, empty for no audio
    #[clap(long, default_value_t = AudioProfile::default().codec)]
    pub acodec: String,

    /// Audio bitrate
    #[clap(long, default_value_t = AudioProfile::default().bitrate)]
    pub abps: u64,

    /// Audio sample rate
    #[clap(long, default_value_t = AudioProfile::default().sample_rate)]
    pub arate: u32,

    /// Audio channel count
    #[clap(long, default_value_t = AudioProfile::default().channels)]
    pub channels: u32,
}

impl ProfileOptions {
    pub fn profile(&self) -> MediaProfile {
        MediaProfile {
            video: VideoProfile {
                codec: self.vcodec.clone(),
                profile: self.profile.clone(),
                level: self.level.clone(),
                width: self.width,
                height: self.height,
                fps: self.fps,
                bitrate: self.vbps,
            },
            audio: AudioProfile {
                codec: self.acodec.clone(),
                bitrate: self.abps,
                sample_rate: self.arate,
                channels: self.channels,
            },
            duration: None,
        }
    }
}
