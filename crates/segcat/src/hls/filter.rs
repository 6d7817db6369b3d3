use super::MediaPlaylist;

impl MediaPlaylist {
    /// Drops every ad-marked segment.
    pub fn remove_ads(&mut self) {
        self.segments.retain(|segment| {
            if segment.ad {
                tracing::info!("skipping ad break: {}", segment.url);
            }
            !segment.ad
        });
    }

    /// Drops the first `n` segments.
    pub fn skip(&mut self, n: usize) {
        let n = n.min(self.segments.len());
        self.segments.drain(..n);
    }

    /// Keeps at most `n` segments.
    pub fn take(&mut self, n: usize) {
        self.segments.truncate(n);
    }

    /// Sum of the declared segment durations, in seconds.
    pub fn runtime(&self) -> f64 {
        self.segments.iter().map(|s| s.duration_or(0.0)).sum()
    }
}
