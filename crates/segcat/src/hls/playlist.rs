use chrono::{DateTime, Utc};
use m3u8_rs::{AlternativeMediaType, KeyMethod};
use reqwest::Url;

use crate::{
    decrypt::parse_iv,
    error::{CatError, CatResult},
    fetch::Download,
};

/// AES-128 key reference of a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentKey {
    pub uri: Url,
    /// IV attribute as written in the playlist.
    pub iv: Option<String>,
}

impl SegmentKey {
    pub fn iv_bytes(&self, media_sequence: u64) -> CatResult<[u8; 16]> {
        parse_iv(self.iv.as_deref(), media_sequence)
    }
}

/// `EXT-X-MAP` initialization section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitMap {
    pub uri: String,
    pub url: Url,
}

#[derive(Debug, Clone)]
pub struct Segment {
    /// URI as written in the playlist.
    pub uri: String,
    pub url: Url,
    /// Declared duration in seconds, zero when unknown.
    pub duration: f64,
    /// `EXT-X-PROGRAM-DATE-TIME` of the segment.
    pub time: Option<DateTime<Utc>>,
    pub map: Option<InitMap>,
    pub key: Option<SegmentKey>,
    pub ad: bool,
    pub media_sequence: u64,
}

impl Segment {
    /// Declared duration, or `default` if none was declared.
    pub fn duration_or(&self, default: f64) -> f64 {
        if self.duration > 0.0 {
            self.duration
        } else {
            default
        }
    }
}

#[derive(Debug, Clone)]
pub struct MediaPlaylist {
    pub url: Url,
    pub target_duration: f64,
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone)]
pub struct Variant {
    pub uri: String,
    pub url: Url,
    pub bandwidth: u64,
    pub average_bandwidth: Option<u64>,
    pub resolution: Option<(u64, u64)>,
    pub frame_rate: Option<f64>,
    pub codecs: Option<String>,
    /// Audio group id.
    pub audio: Option<String>,
    pub i_frame: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenditionKind {
    Audio,
    Video,
    Subtitles,
    ClosedCaptions,
    Other,
}

#[derive(Debug, Clone)]
pub struct Rendition {
    pub kind: RenditionKind,
    pub group_id: String,
    pub name: String,
    pub language: Option<String>,
    pub uri: Option<String>,
    pub url: Option<Url>,
    pub default: bool,
}

#[derive(Debug, Clone)]
pub struct MasterPlaylist {
    pub url: Url,
    pub variants: Vec<Variant>,
    pub renditions: Vec<Rendition>,
}

impl MasterPlaylist {
    /// Finds the audio rendition of `group_id`, preferring the default one.
    pub fn audio_rendition(&self, group_id: &str) -> Option<&Rendition> {
        let mut group = self
            .renditions
            .iter()
            .filter(|r| r.kind == RenditionKind::Audio && r.group_id == group_id);
        let first = group.next()?;
        Some(
            std::iter::once(first)
                .chain(group)
                .find(|r| r.default)
                .unwrap_or(first),
        )
    }
}

#[derive(Debug, Clone)]
pub enum Playlist {
    Master(MasterPlaylist),
    Media(MediaPlaylist),
}

/// Decodes a playlist, resolving every URI against `url`.
pub fn parse_playlist(url: &Url, data: &[u8]) -> CatResult<Playlist> {
    let parsed = m3u8_rs::parse_playlist_res(data)
        .map_err(|_| CatError::M3u8ParseError(String::from_utf8_lossy(data).into_owned()))?;

    match parsed {
        m3u8_rs::Playlist::MasterPlaylist(pl) => Ok(Playlist::Master(master(url, pl)?)),
        m3u8_rs::Playlist::MediaPlaylist(pl) => Ok(Playlist::Media(media(url, pl)?)),
    }
}

/// Fetches and decodes the playlist at `url`.
pub async fn load_playlist<D>(downloader: &D, url: Url) -> CatResult<Playlist>
where
    D: Download,
{
    tracing::info!("Start fetching M3U8 file {url}");
    let data = downloader.fetch(url.clone()).await?;
    let playlist = parse_playlist(&url, &data)?;
    tracing::info!("M3U8 file fetched.");
    Ok(playlist)
}

fn master(url: &Url, pl: m3u8_rs::MasterPlaylist) -> CatResult<MasterPlaylist> {
    let variants = pl
        .variants
        .into_iter()
        .map(|v| {
            Ok(Variant {
                url: url.join(&v.uri)?,
                uri: v.uri,
                bandwidth: v.bandwidth,
                average_bandwidth: v.average_bandwidth,
                resolution: v.resolution.map(|r| (r.width, r.height)),
                frame_rate: v.frame_rate,
                codecs: v.codecs,
                audio: v.audio,
                i_frame: v.is_i_frame,
            })
        })
        .collect::<CatResult<_>>()?;

    let renditions = pl
        .alternatives
        .into_iter()
        .map(|a| {
            let kind = match a.media_type {
                AlternativeMediaType::Audio => RenditionKind::Audio,
                AlternativeMediaType::Video => RenditionKind::Video,
                AlternativeMediaType::Subtitles => RenditionKind::Subtitles,
                AlternativeMediaType::ClosedCaptions => RenditionKind::ClosedCaptions,
                AlternativeMediaType::Other(_) => RenditionKind::Other,
            };
            Ok(Rendition {
                kind,
                url: a.uri.as_deref().map(|uri| url.join(uri)).transpose()?,
                uri: a.uri,
                group_id: a.group_id,
                name: a.name,
                language: a.language,
                default: a.default,
            })
        })
        .collect::<CatResult<_>>()?;

    Ok(MasterPlaylist {
        url: url.clone(),
        variants,
        renditions,
    })
}

fn media(url: &Url, pl: m3u8_rs::MediaPlaylist) -> CatResult<MediaPlaylist> {
    let mut key = None;
    let mut map = None;
    let mut in_ad_break = false;
    let mut segments = Vec::with_capacity(pl.segments.len());

    for (i, segment) in pl.segments.into_iter().enumerate() {
        if let Some(k) = &segment.key {
            key = match &k.method {
                KeyMethod::None => None,
                KeyMethod::AES128 => {
                    let uri = k.uri.as_deref().ok_or(CatError::MissingKeyUri)?;
                    Some(SegmentKey {
                        uri: url.join(uri)?,
                        iv: k.iv.clone(),
                    })
                }
                method => return Err(CatError::UnsupportedKeyMethod(method.to_string())),
            };
        }

        if let Some(m) = &segment.map {
            map = Some(InitMap {
                url: url.join(&m.uri)?,
                uri: m.uri.clone(),
            });
        }

        let mut ad = false;
        for tag in &segment.unknown_tags {
            match tag.tag.as_str() {
                "X-CUE-OUT" | "X-CUE-OUT-CONT" => in_ad_break = true,
                "X-CUE-IN" => in_ad_break = false,
                "X-SCTE35" | "OATCLS-SCTE35" => ad = true,
                _ => {}
            }
        }

        segments.push(Segment {
            url: url.join(&segment.uri)?,
            uri: segment.uri,
            duration: segment.duration as f64,
            time: segment.program_date_time.map(|t| t.with_timezone(&Utc)),
            map: map.clone(),
            key: key.clone(),
            ad: ad || in_ad_break,
            media_sequence: pl.media_sequence + i as u64,
        });
    }

    Ok(MediaPlaylist {
        url: url.clone(),
        target_duration: pl.target_duration as f64,
        segments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_media(text: &str) -> MediaPlaylist {
        let url = "http://test/path/index.m3u8".parse().unwrap();
        match parse_playlist(&url, text.as_bytes()).unwrap() {
            Playlist::Media(pl) => pl,
            Playlist::Master(_) => panic!("Expected media playlist"),
        }
    }

    #[test]
    fn test_parse_media() {
        let pl = parse_media(
            r#"#EXTM3U
#EXT-X-VERSION:6
#EXT-X-TARGETDURATION:10
#EXT-X-MEDIA-SEQUENCE:7
#EXT-X-MAP:URI="init.mp4"
#EXT-X-KEY:METHOD=AES-128,URI="/keys/a.key",IV=0x00000000000000000000000000000009
#EXT-X-PROGRAM-DATE-TIME:2024-01-01T00:00:00.000Z
#EXTINF:10.0,
seg0.m4s
#EXTINF:10.0,
seg1.m4s
#EXT-X-KEY:METHOD=NONE
#EXTINF:8.5,
http://cdn.test/seg2.m4s
#EXT-X-ENDLIST
"#,
        );

        assert_eq!(pl.target_duration, 10.0);
        assert_eq!(pl.segments.len(), 3);

        let first = &pl.segments[0];
        assert_eq!(first.url.as_str(), "http://test/path/seg0.m4s");
        assert_eq!(first.media_sequence, 7);
        assert_eq!(first.time.unwrap().timestamp(), 1704067200);
        assert_eq!(
            first.map.as_ref().unwrap().url.as_str(),
            "http://test/path/init.mp4"
        );
        let key = first.key.as_ref().unwrap();
        assert_eq!(key.uri.as_str(), "http://test/keys/a.key");
        assert_eq!(key.iv_bytes(7).unwrap(), 9u128.to_be_bytes());

        // key and map carry forward
        let second = &pl.segments[1];
        assert_eq!(second.key, first.key);
        assert_eq!(second.map, first.map);
        assert!(second.time.is_none());

        let third = &pl.segments[2];
        assert!(third.key.is_none());
        assert_eq!(third.url.as_str(), "http://cdn.test/seg2.m4s");
        assert_eq!(third.duration, 8.5);
        assert_eq!(third.media_sequence, 9);
    }

    #[test]
    fn test_ad_markers() {
        let pl = parse_media(
            r#"#EXTM3U
#EXT-X-TARGETDURATION:6
#EXTINF:6.0,
a.ts
#EXT-X-CUE-OUT:12
#EXTINF:6.0,
ad0.ts
#EXT-X-CUE-OUT-CONT:6/12
#EXTINF:6.0,
ad1.ts
#EXT-X-CUE-IN
#EXTINF:6.0,
b.ts
#EXT-OATCLS-SCTE35:/DAlAAAAAAAAAP/wFAUAAAABf+/+AAAAAH4AAAAAAAEAAAAAXfVNxw==
#EXTINF:6.0,
ad2.ts
#EXTINF:6.0,
c.ts
#EXT-X-ENDLIST
"#,
        );

        let ads: Vec<bool> = pl.segments.iter().map(|s| s.ad).collect();
        assert_eq!(ads, [false, true, true, false, true, false]);
    }

    #[test]
    fn test_unsupported_key_method() {
        let url = "http://test/index.m3u8".parse().unwrap();
        let result = parse_playlist(
            &url,
            br#"#EXTM3U
#EXT-X-TARGETDURATION:6
#EXT-X-KEY:METHOD=SAMPLE-AES,URI="a.key"
#EXTINF:6.0,
a.ts
"#,
        );
        assert!(matches!(result, Err(CatError::UnsupportedKeyMethod(_))));
    }

    #[test]
    fn test_parse_master() {
        let url = "http://test/master.m3u8".parse().unwrap();
        let Playlist::Master(pl) = parse_playlist(
            &url,
            br#"#EXTM3U
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID="aac",NAME="en",LANGUAGE="en",URI="audio/en.m3u8"
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID="aac",NAME="ja",LANGUAGE="ja",DEFAULT=YES,URI="audio/ja.m3u8"
#EXT-X-STREAM-INF:BANDWIDTH=1280000,AVERAGE-BANDWIDTH=1000000,RESOLUTION=1280x720,AUDIO="aac"
video/720.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=640000
video/low.m3u8
"#,
        )
        .unwrap() else {
            panic!("Expected master playlist");
        };

        assert_eq!(pl.variants.len(), 2);
        assert_eq!(pl.variants[0].resolution, Some((1280, 720)));
        assert_eq!(pl.variants[0].average_bandwidth, Some(1000000));
        assert_eq!(pl.variants[0].url.as_str(), "http://test/video/720.m3u8");
        assert_eq!(pl.variants[1].resolution, None);

        let audio = pl.audio_rendition("aac").unwrap();
        assert_eq!(audio.name, "ja");
        assert_eq!(
            audio.url.as_ref().unwrap().as_str(),
            "http://test/audio/ja.m3u8"
        );
        assert!(pl.audio_rendition("missing").is_none());
    }

    #[test]
    fn test_invalid_playlist() {
        let url = "http://test/index.m3u8".parse().unwrap();
        let result = parse_playlist(&url, b"not a playlist");
        assert!(matches!(result, Err(CatError::M3u8ParseError(_))));
    }
}
