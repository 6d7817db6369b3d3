use std::io::{self, Write};

use reqwest::Url;

use super::{MasterPlaylist, MediaPlaylist};

#[derive(Debug, Clone, Copy, Default)]
pub struct ListOptions {
    /// Print resolved URLs instead of URIs with timing columns.
    pub absolute: bool,
    /// Print init section URIs.
    pub init: bool,
}

/// Lists the segments of a media playlist, one per line.
///
/// Init sections are listed before the first segment using them. In
/// relative mode each segment line carries its duration and the cumulative
/// runtime: `uri<TAB>d=<secs><TAB>t=<secs>`.
pub fn write_media_list<W>(playlist: &MediaPlaylist, options: ListOptions, mut w: W) -> io::Result<()>
where
    W: Write,
{
    let mut current_init: Option<&Url> = None;
    let mut runtime = 0.0;

    for segment in &playlist.segments {
        if let Some(map) = segment.map.as_ref().filter(|_| options.init) {
            if current_init != Some(&map.url) {
                if options.absolute {
                    writeln!(w, "{}", map.url)?;
                } else {
                    writeln!(w, "{}", map.uri)?;
                }
                current_init = Some(&map.url);
            }
        }

        if options.absolute {
            writeln!(w, "{}", segment.url)?;
        } else {
            let duration = segment.duration_or(0.0);
            runtime += duration;
            writeln!(w, "{}\td={duration:.6}\tt={runtime:.6}", segment.uri)?;
        }
    }
    Ok(())
}

/// Every playlist a master references: renditions, then variants, then
/// I-frame variants.
pub fn master_entries(master: &MasterPlaylist) -> Vec<(&str, &Url)> {
    let renditions = master
        .renditions
        .iter()
        .filter_map(|r| Some((r.uri.as_deref()?, r.url.as_ref()?)));
    let variants = master
        .variants
        .iter()
        .filter(|v| !v.i_frame)
        .map(|v| (v.uri.as_str(), &v.url));
    let i_frames = master
        .variants
        .iter()
        .filter(|v| v.i_frame)
        .map(|v| (v.uri.as_str(), &v.url));

    renditions.chain(variants).chain(i_frames).collect()
}

pub fn write_master_entry<W>(uri: &str, url: &Url, absolute: bool, mut w: W) -> io::Result<()>
where
    W: Write,
{
    if absolute {
        writeln!(w, "{url}")
    } else {
        writeln!(w, "{uri}")
    }
}

/// Lists the playlists a master references, one per line.
pub fn write_master_list<W>(master: &MasterPlaylist, absolute: bool, mut w: W) -> io::Result<()>
where
    W: Write,
{
    for (uri, url) in master_entries(master) {
        write_master_entry(uri, url, absolute, &mut w)?;
    }
    Ok(())
}
