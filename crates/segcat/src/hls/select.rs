use reqwest::Url;

use super::{MasterPlaylist, Variant};
use crate::error::{CatError, CatResult};

/// Media playlists chosen from a master playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub video: Url,
    /// Same as `video` when the variant carries its own audio.
    pub audio: Url,
    /// Index of the chosen variant in [`MasterPlaylist::variants`].
    pub variant: usize,
}

impl Selection {
    /// Whether audio and video come from one playlist.
    pub fn is_combined(&self) -> bool {
        self.video == self.audio
    }
}

/// Scores a variant as `bandwidth * width * height`.
///
/// Bandwidth is the peak bandwidth, then the average one, then 1. Variants
/// without a resolution use `default_area`.
pub fn score(variant: &Variant, default_area: u64) -> u128 {
    let bandwidth = Some(variant.bandwidth)
        .filter(|&bw| bw > 0)
        .or(variant.average_bandwidth.filter(|&bw| bw > 0))
        .unwrap_or(1);
    let area = variant
        .resolution
        .map(|(width, height)| width * height)
        .unwrap_or(default_area);

    bandwidth as u128 * area as u128
}

/// Picks the highest scoring variant and its audio.
///
/// The first variant reaching the maximum score wins. I-frame only variants
/// are never picked. When no variant declares a resolution, bandwidth alone
/// decides.
pub fn select_best(master: &MasterPlaylist) -> CatResult<Selection> {
    let candidates = || master.variants.iter().enumerate().filter(|(_, v)| !v.i_frame);

    let default_area = if candidates().any(|(_, v)| v.resolution.is_some()) {
        0
    } else {
        1
    };

    let mut best: Option<(usize, &Variant, u128)> = None;
    for (index, variant) in candidates() {
        let score = score(variant, default_area);
        if best.map_or(true, |(_, _, best)| score > best) {
            best = Some((index, variant, score));
        }
    }
    let (index, variant, _) = best.ok_or(CatError::NoVariant)?;

    let audio = variant
        .audio
        .as_deref()
        .and_then(|group| master.audio_rendition(group))
        .and_then(|rendition| rendition.url.clone())
        .unwrap_or_else(|| variant.url.clone());

    tracing::info!(
        "Best stream: {url}; Bandwidth: {bandwidth}",
        url = variant.url,
        bandwidth = variant.bandwidth
    );
    if audio != variant.url {
        tracing::info!("Audio stream: {audio}");
    }

    Ok(Selection {
        video: variant.url.clone(),
        audio,
        variant: index,
    })
}
