use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("malformed frame: {0}")]
    Malformed(&'static str),

    #[error("frame exceeds maximum size")]
    FrameTooLarge,

    #[error("invalid utf-8 in frame")]
    InvalidUtf8,

    #[error("expected an array of bulk strings")]
    NotARequest,

    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
