use thiserror::Error;

use crate::story::NodeId;

/// The generative collaborator returned nothing usable.
///
/// Always recovered locally: the builder abandons the branch, the expander
/// forces a fallback ending. Never surfaced to the player as a crash.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation backend failed: {0}")]
    Backend(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("expected {expected} choices, found {found}")]
    WrongShape { expected: usize, found: usize },
}

/// Errors from save/load.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt save document: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("save document contains no usable nodes")]
    EmptyGraph,

    #[error("version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

impl PersistError {
    /// Whether the document itself is unusable (as opposed to the file being unreadable).
    pub fn is_corruption(&self) -> bool {
        !matches!(self, PersistError::Io(_))
    }
}

/// Errors surfaced by the traversal engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid choice {index}: {available} choice(s) available")]
    InvalidChoice { index: usize, available: usize },

    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    #[error("edge {from} -> {to} references a missing node")]
    MissingNode { from: NodeId, to: NodeId },

    #[error("the session has already ended")]
    SessionOver,

    #[error(transparent)]
    Persist(#[from] PersistError),
}
