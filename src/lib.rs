//! Branching-narrative engine: a content-addressed story graph, grown ahead of
//! time by a staged breadth-first builder and on demand at the frontier, and
//! walked by a player state machine that applies consequences and decides
//! endings.

pub mod builder;
pub mod error;
pub mod expander;
pub mod export;
pub mod generate;
#[cfg(feature = "llama")]
pub mod llm;
pub mod persist;
pub mod prompt;
pub mod session;
pub mod story;

#[cfg(test)]
mod testing;

pub use builder::{BuildConfig, TreeBuilder};
pub use error::{EngineError, GenerationError, PersistError};
pub use expander::{Expansion, FrontierContext, FrontierExpander};
pub use generate::{ContentGenerator, NodePayload, NodeRequest};
pub use persist::SaveDocument;
pub use session::{
    HealthPolicy, PlayerSession, SceneView, SessionConfig, SessionStatus, StartOptions,
    StorySession,
};
