//! Encoder parameters describing the media of a playlist.
//!
//! Used to generate filler that matches the real segments closely enough to
//! be concatenated with them.

use crate::hls::Variant;

#[derive(Debug, Clone, PartialEq)]
pub struct VideoProfile {
    pub codec: String,
    pub profile: String,
    pub level: String,
    pub width: u64,
    pub height: u64,
    pub fps: f64,
    /// Bits per second.
    pub bitrate: u64,
}

impl VideoProfile {
    pub fn is_enabled(&self) -> bool {
        !(self.codec.is_empty() && self.width == 0 && self.height == 0)
    }
}

impl Default for VideoProfile {
    fn default() -> Self {
        Self {
            codec: "h264".to_string(),
            profile: "high".to_string(),
            level: "4".to_string(),
            width: 960,
            height: 540,
            fps: 25.0,
            bitrate: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioProfile {
    pub codec: String,
    /// Bits per second.
    pub bitrate: u64,
    pub sample_rate: u32,
    pub channels: u32,
}

impl AudioProfile {
    pub fn is_enabled(&self) -> bool {
        !self.codec.is_empty()
    }
}

impl Default for AudioProfile {
    fn default() -> Self {
        Self {
            codec: "aac".to_string(),
            bitrate: 192_000,
            sample_rate: 48000,
            channels: 2,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaProfile {
    pub video: VideoProfile,
    pub audio: AudioProfile,
    /// Content duration in seconds, if known.
    pub duration: Option<f64>,
}

impl MediaProfile {
    /// Takes resolution, frame rate and bitrate from a master playlist variant.
    pub fn apply_variant(&mut self, variant: &Variant) {
        if let Some((width, height)) = variant.resolution {
            self.video.width = width;
            self.video.height = height;
        }
        if let Some(fps) = variant.frame_rate.filter(|fps| *fps > 0.0) {
            self.video.fps = fps;
        }

        let bandwidth = variant.average_bandwidth.unwrap_or(variant.bandwidth);
        let audio = if self.audio.is_enabled() {
            self.audio.bitrate
        } else {
            0
        };
        if bandwidth > audio {
            self.video.bitrate = bandwidth - audio;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let profile = MediaProfile::default();
        assert_eq!((profile.video.width, profile.video.height), (960, 540));
        assert_eq!(profile.video.fps, 25.0);
        assert_eq!(profile.audio.sample_rate, 48000);
        assert!(profile.video.is_enabled());
        assert!(profile.audio.is_enabled());
    }

    #[test]
    fn test_apply_variant() {
        let mut profile = MediaProfile::default();
        profile.apply_variant(&Variant {
            uri: "v.m3u8".to_string(),
            url: "http://test/v.m3u8".parse().unwrap(),
            bandwidth: 3_000_000,
            average_bandwidth: Some(2_192_000),
            resolution: Some((1920, 1080)),
            frame_rate: Some(29.97),
            codecs: None,
            audio: None,
            i_frame: false,
        });

        assert_eq!((profile.video.width, profile.video.height), (1920, 1080));
        assert_eq!(profile.video.fps, 29.97);
        assert_eq!(profile.video.bitrate, 2_000_000);
    }

    #[test]
    fn test_disabled_tracks() {
        let video = VideoProfile {
            codec: String::new(),
            width: 0,
            height: 0,
            ..Default::default()
        };
        assert!(!video.is_enabled());

        let audio = AudioProfile {
            codec: String::new(),
            ..Default::default()
        };
        assert!(!audio.is_enabled());
    }
}
