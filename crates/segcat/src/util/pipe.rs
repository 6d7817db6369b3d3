use std::{io, pin::Pin};

use bytes::{Bytes, BytesMut};
use futures::{channel::mpsc, SinkExt};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::StreamReader;

use crate::error::{CatError, CatResult};

/// A readable byte stream handed between tasks.
pub type ByteStream = Pin<Box<dyn AsyncRead + Send + 'static>>;

type Chunk = io::Result<Bytes>;

enum Sender {
    Bounded(mpsc::Sender<Chunk>),
    Unbounded(mpsc::UnboundedSender<Chunk>),
}

/// Writing half of an in-process pipe.
///
/// Dropping the writer closes the pipe cleanly. [`PipeWriter::close_with_error`]
/// closes it with an error that the reader observes on its next read.
pub struct PipeWriter {
    sender: Sender,
}

/// Creates an ordered pipe holding at most `capacity` chunks in flight.
pub fn pipe(capacity: usize) -> (PipeWriter, ByteStream) {
    let (sender, receiver) = mpsc::channel(capacity);
    let writer = PipeWriter {
        sender: Sender::Bounded(sender),
    };
    (writer, Box::pin(StreamReader::new(receiver)))
}

/// Creates a pipe whose writes never wait for the reader.
pub fn unbounded_pipe() -> (PipeWriter, ByteStream) {
    let (sender, receiver) = mpsc::unbounded();
    let writer = PipeWriter {
        sender: Sender::Unbounded(sender),
    };
    (writer, Box::pin(StreamReader::new(receiver)))
}

impl PipeWriter {
    pub async fn write(&mut self, data: Bytes) -> CatResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        let sent = match &mut self.sender {
            Sender::Bounded(sender) => sender.send(Ok(data)).await.is_ok(),
            Sender::Unbounded(sender) => sender.unbounded_send(Ok(data)).is_ok(),
        };
        if sent {
            Ok(())
        } else {
            Err(io::Error::from(io::ErrorKind::BrokenPipe).into())
        }
    }

    /// Closes the pipe, attaching `error` as its terminal value.
    pub async fn close_with_error(mut self, error: CatError) {
        let error = io::Error::from(error);
        match &mut self.sender {
            Sender::Bounded(sender) => {
                _ = sender.send(Err(error)).await;
            }
            Sender::Unbounded(sender) => {
                _ = sender.unbounded_send(Err(error));
            }
        }
    }

    /// Whether the reading half has been dropped.
    pub fn is_closed(&self) -> bool {
        match &self.sender {
            Sender::Bounded(sender) => sender.is_closed(),
            Sender::Unbounded(sender) => sender.is_closed(),
        }
    }
}

/// Copies `reader` into `writer` in chunks of at most `chunk_size` bytes.
pub async fn forward<R>(reader: &mut R, writer: &mut PipeWriter, chunk_size: usize) -> CatResult<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut total = 0;
    loop {
        let mut buf = BytesMut::with_capacity(chunk_size);
        let read = reader.read_buf(&mut buf).await.map_err(CatError::from_io)?;
        if read == 0 {
            return Ok(total);
        }
        total += read as u64;
        writer.write(buf.freeze()).await?;
    }
}
