//! Error kinds shared across the relay.
//!
//! The split mirrors how each failure is handled: [`FrameError`] is fatal when
//! it happens on the read path, [`CommandError`] and [`DirectoryError`] are
//! answered inline and the session carries on, and [`DeliveryError`] is
//! collected by the hub so file senders can be told what went wrong.

use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
    #[error("frame of {0} bytes exceeds the {max} byte limit", max = u16::MAX)]
    TooLong(usize),
    #[error("chunk length {len} is invalid with {remaining} bytes remaining")]
    InvalidChunk { len: u32, remaining: u64 },
    #[error("timed out waiting for file data")]
    TimedOut,
}

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("connection closed before handshake")]
    Closed,
    #[error("invalid username '{0}'")]
    InvalidUsername(String),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Usage: {0}")]
    Usage(&'static str),
    #[error("Invalid command !!!  Type /help to see all the valid commands")]
    Unknown(String),
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("'{0}' is not a valid folder name")]
    InvalidPath(String),
    #[error("filesystem error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DirectoryError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("could not write to client: {0}")]
    Transport(#[from] FrameError),
    #[error("could not store file: {0}")]
    Filesystem(#[from] DirectoryError),
    #[error("already receiving {0}")]
    Busy(String),
}

impl DeliveryError {
    /// Failures the sender of a file is able to act on.
    pub fn concerns_sender(&self) -> bool {
        !matches!(self, DeliveryError::Transport(_))
    }
}
