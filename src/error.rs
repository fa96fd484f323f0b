use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the library.
///
/// Parse failures carry the input context (`data`, `tree`, or `recons`) and,
/// for row errors, the 1-based row number, so the binary can report exactly
/// where an input file went wrong. Invariant violations inside the
/// reconstruction (copying across trees or rasters) are programming errors
/// and panic instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration: {0}")]
    Config(String),

    #[error("header ({ctx}): {msg}")]
    Header { ctx: &'static str, msg: String },

    #[error("({ctx}) row {row}: {msg}")]
    Row {
        ctx: &'static str,
        row: usize,
        msg: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn row(ctx: &'static str, row: usize, msg: impl Into<String>) -> Self {
        Error::Row {
            ctx,
            row,
            msg: msg.into(),
        }
    }

    pub(crate) fn header(ctx: &'static str, msg: impl Into<String>) -> Self {
        Error::Header {
            ctx,
            msg: msg.into(),
        }
    }
}
