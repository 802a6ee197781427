use harborkv_proto::{ProtoError, Resp};
use thiserror::Error;

/// Command and background failure kinds. Handler errors are rendered as a
/// single `-Error ...` reply on the originating connection.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtoError),

    #[error("unknown command {0}")]
    UnknownCommand(String),

    #[error("unknown subcommand {1} for {0}")]
    UnknownSubCommand(String, String),

    #[error("wrong number of arguments for {0}")]
    WrongArgs(&'static str),

    #[error("authentication required")]
    AuthRequired,

    #[error("invalid username or password")]
    AuthFailed,

    #[error("user {0} is disabled")]
    UserDisabled(String),

    #[error("no such user {0}")]
    NoSuchUser(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("key {0} not found")]
    KeyNotFound(String),

    #[error("value at key {0} is not the right type")]
    WrongType(String),

    #[error("timed out waiting for key {0}")]
    Timeout(String),

    #[error("max memory reached, no keys can be evicted")]
    MaxMemoryExceeded,

    #[error("not cluster leader")]
    NotLeader,

    #[error("snapshot already in progress")]
    SnapshotInProgress,

    #[error("aof rewrite already in progress")]
    AofRewriteInProgress,

    #[error("{0}")]
    Eviction(String),

    #[error("{0}")]
    Value(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    pub fn to_resp(&self) -> Resp {
        Resp::Error(format!("Error {self}"))
    }
}
