use thiserror::Error;

/// Crate-wide fatal error type.
///
/// Only tier-3 errors ever reach this type: a framing or validation
/// failure on a connection is handled entirely inside the decoder that
/// found it (see [`crate::dts::DecodeOutcome`]) and never unwinds up to
/// here.
#[derive(Error, Debug)]
pub enum Sis066Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, Sis066Error>;
