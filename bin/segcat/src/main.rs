mod cat;
mod options;

use std::path::PathBuf;

use clap::{ArgAction, Parser};
use options::{FilterOptions, HttpOptions, OutputFormat, PipelineOptions, ProfileOptions};
use reqwest::Url;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Streams an HLS playlist as one continuous, decrypted media stream.
#[derive(Parser, Debug, Clone)]
#[clap(version, author)]
pub struct SegcatArgs {
    /// Playlist URL or path. Reads the playlist from stdin when absent.
    pub input: Option<String>,

    /// Base URL to resolve relative URIs of a playlist read from a file or stdin
    #[clap(long)]
    pub base_url: Option<Url>,

    /// Only list the segments or streams of the playlist
    #[clap(short = 'l', long = "ls", visible_alias = "list")]
    pub list: bool,

    /// List absolute URLs instead of playlist URIs
    #[clap(long)]
    pub abs: bool,

    /// Recurse into the media playlists of a master playlist when listing
    #[clap(short, long)]
    pub recurse: bool,

    /// Replace ad-marked and every second segment with generated filler
    #[clap(long)]
    pub blackout: bool,

    /// Debugging: write the generated filler to the output and exit
    #[clap(long)]
    pub blackout_debug: bool,

    /// Debugging: write the joined segments without remuxing them
    #[clap(long)]
    pub no_remux: bool,

    /// Output container
    #[clap(long, value_enum, default_value_t = OutputFormat::default())]
    pub format: OutputFormat,

    /// Output file. Writes to stdout when absent.
    #[clap(short, long)]
    pub output: Option<PathBuf>,

    /// Increase log verbosity, repeat for more
    #[clap(short, long = "debug", action = ArgAction::Count)]
    pub verbose: u8,

    #[clap(flatten)]
    pub filter: FilterOptions,

    #[clap(flatten)]
    pub pipeline: PipelineOptions,

    #[clap(flatten)]
    pub http: HttpOptions,

    #[clap(flatten)]
    pub profile: ProfileOptions,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = SegcatArgs::parse();

    let level = match args.verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    cat::run(args).await
}
