use std::io::Cursor;

use bytes::Bytes;

use crate::{
    error::CatResult,
    hls::{MediaPlaylist, Segment},
    media::MediaProfile,
    remux::Remuxer,
    util::pipe::ByteStream,
};

/// Filler length used when neither the playlist nor the profile knows one.
pub const DEFAULT_FILLER_DURATION: f64 = 12.0;

/// Replaces selected segments with pre-rendered filler.
///
/// A segment is replaced when it is ad-marked or when its 1-based position
/// in the playlist is even.
pub struct BlackoutPolicy {
    filler: Bytes,
    trimmer: Option<Remuxer>,
}

impl BlackoutPolicy {
    pub fn new(filler: Bytes) -> Self {
        Self {
            filler,
            trimmer: None,
        }
    }

    /// Cuts every filler stream to the duration of the segment it replaces.
    pub fn with_trim(mut self, remuxer: Remuxer) -> Self {
        self.trimmer = Some(remuxer);
        self
    }

    pub fn filler(&self) -> &Bytes {
        &self.filler
    }

    pub fn substitutes(&self, position: usize, segment: &Segment) -> bool {
        segment.ad || position % 2 == 0
    }

    /// Filler standing in for `segment`.
    pub fn filler_stream(&self, segment: &Segment) -> CatResult<ByteStream> {
        let filler: ByteStream = Box::pin(Cursor::new(self.filler.clone()));
        match &self.trimmer {
            Some(remuxer) => {
                let trim = Some(segment.duration_or(0.0)).filter(|d| *d > 0.0);
                remuxer.remux(filler, trim)
            }
            None => Ok(filler),
        }
    }
}

/// How long the generated filler should be, in seconds.
pub fn filler_duration(playlist: &MediaPlaylist, profile: &MediaProfile) -> f64 {
    [Some(playlist.target_duration), profile.duration]
        .into_iter()
        .flatten()
        .find(|d| *d > 0.0)
        .unwrap_or(DEFAULT_FILLER_DURATION)
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;

    fn segments(ads: &[bool]) -> Vec<Segment> {
        ads.iter()
            .enumerate()
            .map(|(i, &ad)| Segment {
                uri: format!("{i}.ts"),
                url: format!("http://test/{i}.ts").parse().unwrap(),
                duration: 6.0,
                time: None,
                map: None,
                key: None,
                ad,
                media_sequence: i as u64,
            })
            .collect()
    }

    #[test]
    fn test_substituted_positions() {
        let policy = BlackoutPolicy::new(Bytes::from_static(b"filler"));
        let segs = segments(&[false, true, false, false]);

        let substituted: Vec<usize> = segs
            .iter()
            .enumerate()
            .map(|(i, s)| (i + 1, s))
            .filter(|(position, s)| policy.substitutes(*position, s))
            .map(|(position, _)| position)
            .collect();
        assert_eq!(substituted, [2, 4]);
    }

    #[test]
    fn test_ad_at_odd_position() {
        let policy = BlackoutPolicy::new(Bytes::new());
        let segs = segments(&[true, false, true]);
        assert!(policy.substitutes(1, &segs[0]));
        assert!(policy.substitutes(2, &segs[1]));
        assert!(policy.substitutes(3, &segs[2]));
    }

    #[test]
    fn test_filler_duration() {
        let mut playlist = MediaPlaylist {
            url: "http://test/index.m3u8".parse().unwrap(),
            target_duration: 6.0,
            segments: Vec::new(),
        };
        let mut profile = MediaProfile::default();
        assert_eq!(filler_duration(&playlist, &profile), 6.0);

        playlist.target_duration = 0.0;
        assert_eq!(filler_duration(&playlist, &profile), DEFAULT_FILLER_DURATION);

        profile.duration = Some(30.0);
        assert_eq!(filler_duration(&playlist, &profile), 30.0);
    }

    #[tokio::test]
    async fn test_filler_stream_untrimmed() {
        let policy = BlackoutPolicy::new(Bytes::from_static(b"black"));
        let segs = segments(&[true]);

        for _ in 0..2 {
            let mut stream = policy.filler_stream(&segs[0]).unwrap();
            let mut data = Vec::new();
            stream.read_to_end(&mut data).await.unwrap();
            assert_eq!(data, b"black");
        }
    }
}
