pub mod arc;
pub mod graph;
pub mod node;

pub use arc::{path_label, stage_index, ArcStage, NarrativeArc, Progression, ARC_LENGTH};
pub use graph::{Edge, StoryGraph};
pub use node::{
    player_mood, CharacterKind, CharacterState, Consequences, EndingKind, Node, NodeId, SceneState,
    PLAYER_KEY,
};
