use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Content-derived node identifier: lower-case hex SHA-256 of the story text.
///
/// Two nodes with literally identical prose share an id and are deduplicated
/// by the graph. This is intended.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn for_story(story: &str) -> Self {
        Self(hex::encode(Sha256::digest(story.as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 hex chars, for log lines.
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a playthrough ended. Only meaningful on terminal nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndingKind {
    #[default]
    None,
    Victory,
    Defeat,
    Bittersweet,
    Tragic,
    // Unknown labels from the generator land here too.
    #[serde(other)]
    Neutral,
}

impl EndingKind {
    /// The kind to show the player: unspecified endings are neutral.
    pub fn or_neutral(self) -> Self {
        match self {
            EndingKind::None => EndingKind::Neutral,
            other => other,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            EndingKind::None => "none",
            EndingKind::Victory => "victory",
            EndingKind::Defeat => "defeat",
            EndingKind::Neutral => "neutral",
            EndingKind::Bittersweet => "bittersweet",
            EndingKind::Tragic => "tragic",
        }
    }

    /// Rationale used when the node itself carries none.
    pub fn default_reason(self) -> &'static str {
        match self.or_neutral() {
            EndingKind::Victory => "You prevailed against everything the story threw at you.",
            EndingKind::Defeat => "Your enemies carried the day.",
            EndingKind::Bittersweet => "You won, but not without losing something dear.",
            EndingKind::Tragic => "The tale closes in sorrow.",
            _ => "Your journey comes to a quiet close.",
        }
    }
}

/// Where and when a scene takes place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneState {
    pub location: String,
    pub time_of_day: String,
    pub weather: String,
    pub ambient: String,
}

/// Narrative allegiance of a character. The engine only passes it through;
/// renderers decide what to do with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CharacterKind {
    Ally,
    Enemy,
    #[default]
    #[serde(other)]
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CharacterState {
    pub health: i32,
    pub mood: String,
    pub status_effects: Vec<String>,
    pub relationships: BTreeMap<String, String>,
    #[serde(rename = "type")]
    pub kind: CharacterKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Populated only on the reserved `"player"` entry.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub inventory: Vec<String>,
}

impl Default for CharacterState {
    fn default() -> Self {
        Self {
            health: 100,
            mood: String::new(),
            status_effects: Vec::new(),
            relationships: BTreeMap::new(),
            kind: CharacterKind::Neutral,
            description: None,
            inventory: Vec::new(),
        }
    }
}

impl CharacterState {
    /// The `"player"` mirror entry for the given live stats.
    pub fn player(health: i32, inventory: &[String]) -> Self {
        Self {
            health,
            mood: player_mood(health).to_string(),
            inventory: inventory.to_vec(),
            ..Self::default()
        }
    }
}

/// Reserved character key mirroring the live player.
pub const PLAYER_KEY: &str = "player";

pub fn player_mood(health: i32) -> &'static str {
    match health {
        h if h < 30 => "desperate",
        h if h < 50 => "worried",
        h if h < 70 => "cautious",
        _ => "determined",
    }
}

/// Effect of choosing a node from its parent. Applied once, on entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Consequences {
    pub health_delta: i32,
    pub inventory_additions: Vec<String>,
    pub inventory_removals: Vec<String>,
    pub experience_delta: i32,
}

impl Consequences {
    pub fn is_empty(&self) -> bool {
        self.health_delta == 0
            && self.experience_delta == 0
            && self.inventory_additions.is_empty()
            && self.inventory_removals.is_empty()
    }
}

/// A single narrative unit in the story graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Text shown to the player on entering this node.
    pub story: String,
    #[serde(rename = "is_end", default)]
    pub is_terminal: bool,
    #[serde(default)]
    pub ending_kind: EndingKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ending_reason: Option<String>,
    #[serde(default)]
    pub scene_state: SceneState,
    #[serde(default)]
    pub characters: BTreeMap<String, CharacterState>,
    #[serde(default)]
    pub consequences: Consequences,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialogue: Option<String>,
    /// Which arc stage and progression produced this node. Diagnostic only.
    #[serde(rename = "story_path", default)]
    pub narrative_path_label: String,
}

impl Node {
    pub fn new(story: impl Into<String>) -> Self {
        let story = story.into();
        Self {
            id: NodeId::for_story(&story),
            story,
            is_terminal: false,
            ending_kind: EndingKind::None,
            ending_reason: None,
            scene_state: SceneState::default(),
            characters: BTreeMap::new(),
            consequences: Consequences::default(),
            dialogue: None,
            narrative_path_label: String::new(),
        }
    }

    pub fn terminal(mut self, kind: EndingKind) -> Self {
        self.is_terminal = true;
        self.ending_kind = kind;
        self
    }

    pub fn with_consequences(mut self, consequences: Consequences) -> Self {
        self.consequences = consequences;
        self
    }

    pub fn with_scene(mut self, scene: SceneState) -> Self {
        self.scene_state = scene;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.narrative_path_label = label.into();
        self
    }

    /// Turn this node into an ending in place.
    pub fn force_ending(&mut self, kind: EndingKind, reason: impl Into<String>) {
        self.is_terminal = true;
        self.ending_kind = kind;
        self.ending_reason = Some(reason.into());
    }
}
