use thiserror::Error;
use trellis_outline::OutlineError;

pub type SentinelResult<T> = Result<T, SentinelError>;

/// Failures that abort a whole read or write.
///
/// Anything recoverable is reported as a [`crate::Diagnostic`] instead.
#[derive(Error, Debug)]
pub enum SentinelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Derived file is not valid UTF-8 (first bad byte at offset {offset})")]
    InvalidUtf8 { offset: usize },

    #[error("No @+leo header line found")]
    MissingHeader,

    #[error("Unsupported sentinel format on line {line}: {message}")]
    UnsupportedFormat { line: usize, message: String },

    #[error("Unterminated derived file: end of input at line {line} before @-leo")]
    Unterminated { line: usize },

    #[error("Unknown language: {0}")]
    UnknownLanguage(String),

    #[error(transparent)]
    Outline(#[from] OutlineError),
}

impl SentinelError {
    pub fn unsupported(line: usize, message: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            line,
            message: message.into(),
        }
    }

    pub fn unterminated(line: usize) -> Self {
        Self::Unterminated { line }
    }
}
