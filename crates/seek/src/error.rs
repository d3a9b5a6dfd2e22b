use std::path::PathBuf;

/// Errors raised while parsing or validating a search query.
///
/// These carry enough structure for callers to distinguish user-facing
/// syntax problems from internal failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("empty query")]
    Empty,

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("unbalanced parentheses")]
    UnbalancedParentheses,

    #[error("invalid operator near {0:?}")]
    InvalidOperator(String),

    #[error("missing operand near {0:?}")]
    MissingOperand(String),

    #[error("tokenization failed: {0}")]
    Tokenization(String),

    #[error("expression too complex: {0}")]
    ExpressionTooComplex(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SeekError {
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("store connection failed: {0}")]
    StoreConnectionFailed(String),

    #[error("store query failed: {0}")]
    StoreQueryFailed(String),

    #[error("store returned invalid data: {0}")]
    StoreInvalidData(String),

    #[error("event stream creation failed: {0}")]
    StreamCreate(String),

    #[error("event stream start failed: {0}")]
    StreamStart(String),

    #[error("invalid path: {0}")]
    InvalidPath(PathBuf),

    #[error("invalid search: {0}")]
    SearchInvalid(String),

    #[error("search result processing failed: {0}")]
    ResultProcessing(String),

    #[error("indexing path not found: {0}")]
    IndexingPathNotFound(PathBuf),

    #[error("batch insert failed: {0}")]
    BatchInsert(String),

    #[error("memory pressure during indexing: {0}")]
    MemoryPressure(String),

    #[error("indexing failed: {0}")]
    IndexingFailed(String),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for SeekError {
    fn from(error: rusqlite::Error) -> Self {
        Self::StoreQueryFailed(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SeekError>;
