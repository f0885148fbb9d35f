//! Error kinds per the error-handling design: each variant names the
//! recovery policy a caller should apply, not just the failure.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("wrong password")]
    WrongPassword,

    #[error("root-of-trust anchor unavailable")]
    AnchorUnavailable,

    #[error("device I/O error at block {block}")]
    DeviceIo { block: u64, source: std::io::Error },

    #[error("corrupt header")]
    CorruptHeader,

    #[error("pprf arena exhausted")]
    ArenaExhausted,

    #[error("tag already punctured")]
    AlreadyPunctured,

    #[error("journal replay failure")]
    JournalReplayFailure,

    #[error("missing key for inode {0}")]
    MissingKey(u64),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Bincode(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
