use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatError {
    #[error("HTTP error: {0}")]
    HttpError(reqwest::StatusCode),

    #[error("Invalid m3u8 file: {0}")]
    M3u8ParseError(String),

    #[error("Unsupported key method: {0}")]
    UnsupportedKeyMethod(String),

    #[error("URI field in key must exist")]
    MissingKeyUri,

    #[error("Invalid hex iv: {0}")]
    InvalidHexIv(String),

    #[error("Invalid AES-128 key: {0:?}")]
    InvalidAes128Key(Vec<u8>),

    #[error("bad pad length: {0} > 16")]
    InvalidPadLength(u8),

    #[error("bad pad value: {found} != {expected}")]
    InvalidPadValue { found: u8, expected: u8 },

    #[error("final block too small: {0} bytes")]
    BlockTooSmall(usize),

    #[error("ciphertext is not aligned to the block size: {0} trailing bytes")]
    UnalignedCiphertext(usize),

    #[error("Invalid select expression: {0}")]
    InvalidSelectExpression(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("master playlist has no streams")]
    NoVariant,

    #[error("{program} exited with {status}")]
    EncoderExit {
        program: String,
        status: std::process::ExitStatus,
    },

    #[error(transparent)]
    MissingExecutable(#[from] which::Error),

    #[error(transparent)]
    IOError(#[from] io::Error),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),
}

/// Coarse classification of [`CatError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed playlist or key descriptor.
    Decode,
    /// Bad padding, tampered or truncated ciphertext.
    Integrity,
    /// Transport failure.
    Download,
    /// Malformed user input.
    Config,
    /// The remux/encode process failed.
    Encoder,
    Io,
}

impl CatError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CatError::M3u8ParseError(_)
            | CatError::UnsupportedKeyMethod(_)
            | CatError::MissingKeyUri
            | CatError::InvalidHexIv(_)
            | CatError::InvalidAes128Key(_) => ErrorKind::Decode,
            CatError::InvalidPadLength(_)
            | CatError::InvalidPadValue { .. }
            | CatError::BlockTooSmall(_)
            | CatError::UnalignedCiphertext(_) => ErrorKind::Integrity,
            CatError::HttpError(_) | CatError::RequestError(_) | CatError::UrlParseError(_) => {
                ErrorKind::Download
            }
            CatError::InvalidSelectExpression(_)
            | CatError::InvalidArgument(_)
            | CatError::NoVariant => ErrorKind::Config,
            CatError::EncoderExit { .. } | CatError::MissingExecutable(_) => ErrorKind::Encoder,
            CatError::IOError(_) => ErrorKind::Io,
        }
    }

    /// Recovers the error that closed a byte stream.
    ///
    /// Errors travel through [`tokio::io::AsyncRead`] boundaries wrapped in
    /// [`io::Error`]. If the wrapped value is a [`CatError`] it is returned
    /// as is, otherwise the io error itself is kept.
    pub fn from_io(error: io::Error) -> Self {
        if !error.get_ref().is_some_and(|inner| inner.is::<CatError>()) {
            return CatError::IOError(error);
        }

        let kind = error.kind();
        match error.into_inner() {
            Some(inner) => match inner.downcast::<CatError>() {
                Ok(inner) => *inner,
                Err(inner) => CatError::IOError(io::Error::new(kind, inner)),
            },
            None => CatError::IOError(io::Error::from(kind)),
        }
    }
}

impl From<CatError> for io::Error {
    fn from(error: CatError) -> Self {
        match error {
            CatError::IOError(error) => error,
            error => io::Error::other(error),
        }
    }
}

pub type CatResult<T> = Result<T, CatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_survives_io_boundary() {
        let error: io::Error = CatError::InvalidPadLength(17).into();
        let error = CatError::from_io(error);
        assert!(matches!(error, CatError::InvalidPadLength(17)));
        assert_eq!(error.kind(), ErrorKind::Integrity);
    }

    #[test]
    fn test_plain_io_error_is_kept() {
        let error = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        let error = CatError::from_io(error);
        match error {
            CatError::IOError(e) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            _ => panic!("Expected io error"),
        }
    }
}
