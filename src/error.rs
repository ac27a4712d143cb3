use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Walk error: {0}")]
    Walk(#[from] crate::scanner::WalkError),

    #[error("Queue is empty")]
    EmptyQueue,

    #[error("Queue was modified during enumeration")]
    ConcurrentModification,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Catalog {0} not found")]
    CatalogNotFound(i64),

    #[error("Task panicked: {0}")]
    TaskPanicked(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Whether the failure is a transient file system condition (locked,
    /// busy, interrupted) that is worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Io(e) => is_transient_io(e.kind()),
            Error::Walk(e) => is_transient_io(e.kind()),
            Error::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }

    /// Caller bugs; retrying cannot succeed.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Error::InvalidArgument(_))
    }
}

fn is_transient_io(kind: std::io::ErrorKind) -> bool {
    !matches!(
        kind,
        std::io::ErrorKind::InvalidInput | std::io::ErrorKind::Unsupported
    )
}

pub type Result<T> = std::result::Result<T, Error>;
