use std::{io::Write, path::Path, sync::Arc};

use anyhow::{bail, Context};
use reqwest::Url;
use segcat::{
    blackout::{filler_duration, BlackoutPolicy},
    download::FetchPipeline,
    hls::{
        list::{master_entries, write_master_entry, write_media_list, ListOptions},
        load_playlist, parse_playlist, select_best, MasterPlaylist, MediaPlaylist, Playlist,
        Variant,
    },
    media::MediaProfile,
    remux::Remuxer,
    ByteStream, CatError, Download, HttpClient,
};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::SegcatArgs;

pub async fn run(args: SegcatArgs) -> anyhow::Result<()> {
    let (url, data) = read_input(&args).await?;
    let client = args.http.clone().into_client(&url)?;

    let data = match data {
        Some(data) => data,
        None => client.fetch(url.clone()).await?.to_vec(),
    };

    match parse_playlist(&url, &data)? {
        Playlist::Media(playlist) => run_media(&args, client, playlist).await,
        Playlist::Master(master) => run_master(&args, client, master).await,
    }
}

/// Resolves the playlist location. Remote playlists are fetched later, once
/// the client carrying the cookies for their URL exists.
async fn read_input(args: &SegcatArgs) -> anyhow::Result<(Url, Option<Vec<u8>>)> {
    match args.input.as_deref() {
        Some(input) if input.starts_with("http://") || input.starts_with("https://") => {
            Ok((Url::parse(input)?, None))
        }
        Some(input) if input != "-" => {
            let path = Path::new(input);
            let data = tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read {input}"))?;
            let url = match &args.base_url {
                Some(base) => base.clone(),
                None => {
                    let path = std::fs::canonicalize(path)?;
                    Url::from_file_path(&path)
                        .map_err(|_| anyhow::anyhow!("Invalid path: {}", path.display()))?
                }
            };
            Ok((url, Some(data)))
        }
        _ => {
            let mut data = Vec::new();
            tokio::io::stdin().read_to_end(&mut data).await?;
            let url = match &args.base_url {
                Some(base) => base.clone(),
                None => {
                    let cwd = std::env::current_dir()?;
                    Url::from_directory_path(&cwd)
                        .map_err(|_| anyhow::anyhow!("Invalid path: {}", cwd.display()))?
                        .join("stdin.m3u8")?
                }
            };
            Ok((url, Some(data)))
        }
    }
}

/// Applies the segment filters in order: time range, ads, then the
/// skip/count window.
fn prepare(args: &SegcatArgs, playlist: &mut MediaPlaylist) {
    tracing::info!(
        "Playlist {} has {} segments, {:.3}s in total.",
        playlist.url,
        playlist.segments.len(),
        playlist.runtime()
    );

    let filter = &args.filter;
    if let Some(select) = &filter.select {
        playlist.select_time(select);
    }
    if filter.no_ads {
        playlist.remove_ads();
    }
    if filter.skip > 0 {
        playlist.skip(filter.skip);
    }
    if filter.count > 0 {
        playlist.take(filter.count);
    }
}

/// Filler encoder settings for `playlist`, refined from the chosen variant
/// of a master playlist when there is one.
fn media_profile(
    args: &SegcatArgs,
    playlist: &MediaPlaylist,
    variant: Option<&Variant>,
) -> MediaProfile {
    let mut profile = args.profile.profile();
    if let Some(variant) = variant {
        profile.apply_variant(variant);
    }
    profile.duration = Some(playlist.runtime()).filter(|d| *d > 0.0);
    profile
}

fn list_options(args: &SegcatArgs) -> ListOptions {
    ListOptions {
        absolute: args.abs,
        init: !args.pipeline.no_init,
    }
}

fn remuxer(args: &SegcatArgs) -> anyhow::Result<Remuxer> {
    Ok(Remuxer::new(args.format.into())?.show_output(args.verbose >= 2))
}

async fn run_media(
    args: &SegcatArgs,
    client: HttpClient,
    mut playlist: MediaPlaylist,
) -> anyhow::Result<()> {
    prepare(args, &mut playlist);

    if args.list {
        let stdout = std::io::stdout();
        write_media_list(&playlist, list_options(args), stdout.lock())?;
        return Ok(());
    }

    let profile = media_profile(args, &playlist, None);
    let blackout = blackout_policy(args, &playlist, &profile).await?;
    if args.blackout_debug {
        return dump_filler(args, blackout).await;
    }

    let config = args.pipeline.config();
    let pipeline = FetchPipeline::new(config.fetcher(client), config);
    let stream = pipeline.run(playlist, blackout);

    let stream = if args.no_remux {
        stream
    } else {
        remuxer(args)?.remux(stream, None)?
    };
    drain(args, stream).await
}

async fn run_master(
    args: &SegcatArgs,
    client: HttpClient,
    master: MasterPlaylist,
) -> anyhow::Result<()> {
    if args.list {
        return list_master(args, &client, &master).await;
    }

    let selection = select_best(&master)?;

    let mut video = load_media(&client, selection.video.clone()).await?;
    prepare(args, &mut video);
    let audio = if selection.is_combined() {
        None
    } else {
        let mut audio = load_media(&client, selection.audio.clone()).await?;
        prepare(args, &mut audio);
        Some(audio)
    };
    if audio.is_some() && args.no_remux {
        bail!("--no-remux cannot join separate audio and video streams");
    }

    // Filler carries both tracks, the merge only keeps its video.
    let profile = media_profile(args, &video, master.variants.get(selection.variant));
    let blackout = blackout_policy(args, &video, &profile).await?;
    if args.blackout_debug {
        return dump_filler(args, blackout).await;
    }

    let config = args.pipeline.config();
    let fetcher = config.fetcher(client);
    let video = FetchPipeline::new(fetcher.clone(), config.clone()).run(video, blackout);

    let stream = match audio {
        Some(audio) => {
            let audio = FetchPipeline::new(fetcher, config).run(audio, None);
            remuxer(args)?.merge(video, audio)?
        }
        None if args.no_remux => video,
        None => remuxer(args)?.remux(video, None)?,
    };
    drain(args, stream).await
}

async fn list_master(
    args: &SegcatArgs,
    client: &HttpClient,
    master: &MasterPlaylist,
) -> anyhow::Result<()> {
    for (uri, url) in master_entries(master) {
        write_master_entry(uri, url, args.abs, std::io::stdout().lock())?;
        if !args.recurse {
            continue;
        }

        match load_playlist(client, url.clone()).await? {
            Playlist::Media(mut playlist) => {
                prepare(args, &mut playlist);
                let mut stdout = std::io::stdout().lock();
                write_media_list(&playlist, list_options(args), &mut stdout)?;
                writeln!(stdout)?;
                writeln!(stdout)?;
            }
            Playlist::Master(_) => tracing::warn!("skipping nested master playlist: {url}"),
        }
    }
    Ok(())
}

async fn load_media(client: &HttpClient, url: Url) -> anyhow::Result<MediaPlaylist> {
    match load_playlist(client, url.clone()).await? {
        Playlist::Media(playlist) => Ok(playlist),
        Playlist::Master(_) => bail!("expected a media playlist at {url}"),
    }
}

async fn blackout_policy(
    args: &SegcatArgs,
    playlist: &MediaPlaylist,
    profile: &MediaProfile,
) -> anyhow::Result<Option<Arc<BlackoutPolicy>>> {
    if !args.blackout && !args.blackout_debug {
        return Ok(None);
    }

    let duration = filler_duration(playlist, profile);
    tracing::info!("Generating {duration:.3}s of filler.");
    let remuxer = remuxer(args)?;
    let filler = remuxer.generate_filler(profile, duration).await?;

    let policy = BlackoutPolicy::new(filler);
    let policy = if args.no_remux {
        policy
    } else {
        policy.with_trim(remuxer)
    };
    Ok(Some(Arc::new(policy)))
}

async fn dump_filler(
    args: &SegcatArgs,
    blackout: Option<Arc<BlackoutPolicy>>,
) -> anyhow::Result<()> {
    let Some(policy) = blackout else {
        return Ok(());
    };
    let mut sink = open_sink(args).await?;
    sink.write_all(policy.filler()).await?;
    sink.flush().await?;
    Ok(())
}

async fn open_sink(args: &SegcatArgs) -> anyhow::Result<Box<dyn AsyncWrite + Unpin + Send>> {
    Ok(match &args.output {
        Some(path) => Box::new(
            tokio::fs::File::create(path)
                .await
                .with_context(|| format!("Failed to create {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdout()),
    })
}

/// Copies `stream` into the sink until it ends, surfacing the error that
/// closed it.
async fn drain(args: &SegcatArgs, mut stream: ByteStream) -> anyhow::Result<()> {
    let mut sink = open_sink(args).await?;
    let written = tokio::io::copy(&mut stream, &mut sink)
        .await
        .map_err(CatError::from_io)?;
    sink.flush().await?;
    tracing::info!("Wrote {written} bytes.");
    Ok(())
}
