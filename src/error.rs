use thiserror::Error;

/// Failures surfaced by the parsing, key-recovery and rewrite stages.
#[derive(Error, Debug)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid container: {0}")]
    BadHeader(String),

    #[error("input is not DRM protected: {0}")]
    NotEncrypted(String),

    #[error("credentials unavailable: {0}")]
    MissingCredential(String),

    #[error("protected value could not be decrypted: {0}")]
    Unprotect(String),

    #[error("no candidate PID unlocked the book key")]
    NoKey,

    #[error("malformed encoded number at offset 0x{0:x}")]
    BadVarint(usize),

    #[error("record tag mismatch: expected {expected:?}, found {found:?}")]
    TagMismatch { expected: String, found: String },

    #[error("zlib inflate failed: {0}")]
    Inflate(String),

    #[error("unrecognized container format")]
    UnknownFormat,

    #[error("{0}")]
    Usage(String),
}

pub type Result<T> = std::result::Result<T, Error>;
