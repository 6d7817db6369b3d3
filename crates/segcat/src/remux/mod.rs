//! Drives the external `ffmpeg` process that repairs, frames and merges the
//! concatenated segment stream, and that renders blackout filler.

mod args;

use std::{
    io,
    path::{Path, PathBuf},
    process::Stdio,
};

use bytes::Bytes;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    process::{Child, Command},
};

pub use args::*;

use crate::{
    error::{CatError, CatResult},
    media::MediaProfile,
    util::pipe::{forward, pipe, ByteStream, PipeWriter},
};

const OUTPUT_CHUNK_SIZE: usize = 64 * 1024;
const OUTPUT_CAPACITY: usize = 16;

/// Output container of the remux step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RemuxFormat {
    /// Fragmented MP4 that can be written to a pipe.
    #[default]
    FragmentedMp4,
    MpegTs,
}

#[derive(Debug, Clone)]
pub struct Remuxer {
    program: PathBuf,
    format: RemuxFormat,
    show_output: bool,
}

impl Remuxer {
    /// Locates `ffmpeg` in `PATH`.
    pub fn new(format: RemuxFormat) -> CatResult<Self> {
        Ok(Self::with_program(which::which("ffmpeg")?, format))
    }

    pub fn with_program(program: impl Into<PathBuf>, format: RemuxFormat) -> Self {
        Self {
            program: program.into(),
            format,
            show_output: false,
        }
    }

    /// Forwards the encoder's own diagnostics to stderr.
    pub fn show_output(mut self, show_output: bool) -> Self {
        self.show_output = show_output;
        self
    }

    pub fn format(&self) -> RemuxFormat {
        self.format
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Rewraps `input` into the output container, optionally cutting it to
    /// `trim` seconds.
    pub fn remux(&self, input: ByteStream, trim: Option<f64>) -> CatResult<ByteStream> {
        self.run(remux_args(self.format, trim), input)
    }

    /// Takes video from `video` and audio from `audio`.
    #[cfg(unix)]
    pub fn merge(&self, video: ByteStream, audio: ByteStream) -> CatResult<ByteStream> {
        use command_fds::{CommandFdExt, FdMapping};
        use std::os::fd::OwnedFd;

        let (audio_reader, audio_writer) = io::pipe()?;
        let mut command = self.command(merge_args(self.format));
        command
            .fd_mappings(vec![FdMapping {
                parent_fd: OwnedFd::from(audio_reader),
                child_fd: 3,
            }])
            .map_err(io::Error::other)?;

        let child = self.spawn(command)?;
        let audio_writer = tokio::fs::File::from_std(std::fs::File::from(OwnedFd::from(audio_writer)));
        Ok(self.chain(child, video, Some((audio, audio_writer))))
    }

    #[cfg(not(unix))]
    pub fn merge(&self, _video: ByteStream, _audio: ByteStream) -> CatResult<ByteStream> {
        Err(CatError::InvalidArgument(
            "merging separate audio is only supported on unix".to_string(),
        ))
    }

    /// Runs the encoder with `args`, feeding it `input` on stdin.
    ///
    /// The returned stream yields the encoder's stdout. It ends with an
    /// error if reading `input` fails or if the encoder exits unsuccessfully.
    pub fn run(&self, args: Vec<String>, input: ByteStream) -> CatResult<ByteStream> {
        let child = self.spawn(self.command(args))?;
        Ok(self.chain::<tokio::fs::File>(child, input, None))
    }

    /// Renders `duration` seconds of black video and silence.
    pub async fn generate_filler(&self, profile: &MediaProfile, duration: f64) -> CatResult<Bytes> {
        let mut command = self.command(filler_args(self.format, profile, duration));
        command.stdin(Stdio::null());

        tracing::info!("generating {duration}s of filler");
        let output = command.output().await?;
        if !output.status.success() {
            return Err(self.exit_error(output.status));
        }
        tracing::debug!("filler is {} bytes", output.stdout.len());
        Ok(Bytes::from(output.stdout))
    }

    fn command(&self, args: Vec<String>) -> Command {
        tracing::debug!("{} {}", self.program.display(), args.join(" "));

        let mut command = Command::new(&self.program);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true);
        if self.show_output {
            command.stderr(Stdio::inherit());
        } else {
            command.stderr(Stdio::null());
        }
        command
    }

    fn spawn(&self, mut command: Command) -> CatResult<Child> {
        command.spawn().map_err(|e| {
            tracing::error!("failed to start {}: {e}", self.program.display());
            CatError::IOError(e)
        })
    }

    fn exit_error(&self, status: std::process::ExitStatus) -> CatError {
        CatError::EncoderExit {
            program: self.program.display().to_string(),
            status,
        }
    }

    /// Connects a spawned child to its input streams and returns its stdout.
    fn chain<W>(&self, mut child: Child, input: ByteStream, extra: Option<(ByteStream, W)>) -> ByteStream
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (mut writer, output) = pipe(OUTPUT_CAPACITY);
        let remuxer = self.clone();

        tokio::spawn(async move {
            let result = remuxer.drive(&mut child, input, extra, &mut writer).await;
            if let Err(e) = result {
                tracing::debug!("{} failed: {e}", remuxer.program.display());
                _ = child.start_kill();
                writer.close_with_error(e).await;
            }
        });

        output
    }

    async fn drive<W>(
        &self,
        child: &mut Child,
        mut input: ByteStream,
        extra: Option<(ByteStream, W)>,
        writer: &mut PipeWriter,
    ) -> CatResult<()>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (Some(stdin), Some(mut stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(io::Error::other("encoder stdio is not piped").into());
        };

        let main_input = feed(&mut input, stdin);
        let extra_input = async move {
            match extra {
                Some((mut input, sink)) => feed(&mut input, sink).await,
                None => Ok(()),
            }
        };
        let output = forward(&mut stdout, writer, OUTPUT_CHUNK_SIZE);
        let (fed, fed_extra, drained) = tokio::join!(main_input, extra_input, output);

        // Upstream failures come first: the encoder exiting on truncated
        // input is a consequence of them.
        for result in [fed, fed_extra] {
            if let Err(e) = result {
                if !is_broken_pipe(&e) {
                    return Err(e);
                }
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            return Err(self.exit_error(status));
        }
        drained.map(|size| tracing::debug!("encoder produced {size} bytes"))
    }
}

/// Copies `input` into `sink`, then closes `sink`.
async fn feed<R, W>(input: &mut R, mut sink: W) -> CatResult<()>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin,
{
    use tokio::io::AsyncWriteExt;

    tokio::io::copy(input, &mut sink)
        .await
        .map_err(CatError::from_io)?;
    sink.shutdown().await?;
    Ok(())
}

fn is_broken_pipe(error: &CatError) -> bool {
    matches!(error, CatError::IOError(e) if e.kind() == io::ErrorKind::BrokenPipe)
}
