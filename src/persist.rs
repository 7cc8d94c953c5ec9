use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::PersistError;
use crate::session::{PlayerSession, MAX_HEALTH};
use crate::story::{CharacterState, NarrativeArc, Node, NodeId, SceneState, StoryGraph};

pub const SAVE_VERSION: u32 = 1;

fn default_version() -> u32 {
    SAVE_VERSION
}

// ---------------------------------------------------------------------------
// Document shape
// ---------------------------------------------------------------------------

/// Everything needed to resume a playthrough.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveDocument {
    #[serde(default = "default_version")]
    pub version: u32,
    pub player_state: PlayerSession,
    pub story_state: StoryStateRecord,
    pub graph: GraphRecord,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoryStateRecord {
    pub theme: String,
    #[serde(default)]
    pub visited_node_ids: Vec<NodeId>,
    #[serde(default)]
    pub current_scene: SceneState,
    #[serde(default)]
    pub characters: BTreeMap<String, CharacterState>,
    #[serde(default)]
    pub max_depth: usize,
    #[serde(default)]
    pub branching_factor: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arc: Option<NarrativeArc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<NodeId>,
    pub nodes: BTreeMap<NodeId, Node>,
    #[serde(default)]
    pub edges: Vec<EdgeRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub from: NodeId,
    pub to: NodeId,
    #[serde(default)]
    pub backtrack: bool,
}

/// A validated save, ready to drive a session.
#[derive(Debug, Clone)]
pub struct LoadedState {
    pub graph: StoryGraph,
    pub player: PlayerSession,
    pub story: StoryStateRecord,
}

// ---------------------------------------------------------------------------
// Capture / restore
// ---------------------------------------------------------------------------

impl SaveDocument {
    pub fn capture(
        graph: &StoryGraph,
        player: &PlayerSession,
        mut story: StoryStateRecord,
    ) -> Self {
        story.visited_node_ids = player.visited_node_ids.clone();
        let nodes = graph
            .nodes()
            .map(|node| (node.id.clone(), node.clone()))
            .collect();
        let edges = graph
            .edges()
            .into_iter()
            .map(|e| EdgeRecord {
                from: e.from,
                to: e.to,
                backtrack: e.backtrack,
            })
            .collect();
        Self {
            version: SAVE_VERSION,
            player_state: player.clone(),
            story_state: story,
            graph: GraphRecord {
                root: Some(graph.root().clone()),
                nodes,
                edges,
            },
        }
    }

    /// Rebuild the graph and player, repairing what can be repaired.
    ///
    /// Node ids come from the map keys. Edges that reference missing nodes are
    /// skipped, and a player pointing at a missing node is moved to the root.
    pub fn into_state(self) -> Result<LoadedState, PersistError> {
        if self.version != SAVE_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SAVE_VERSION,
                found: self.version,
            });
        }
        let GraphRecord { root, nodes, edges } = self.graph;
        if nodes.is_empty() {
            return Err(PersistError::EmptyGraph);
        }

        let mut nodes: BTreeMap<NodeId, Node> = nodes
            .into_iter()
            .map(|(id, mut node)| {
                node.id = id.clone();
                (id, node)
            })
            .collect();

        let root_id = pick_root(root, &nodes, &edges).ok_or(PersistError::EmptyGraph)?;
        let root_node = nodes.remove(&root_id).ok_or(PersistError::EmptyGraph)?;
        let mut graph = StoryGraph::new(root_node);
        for (_, node) in nodes {
            graph.add_node(node);
        }
        for edge in &edges {
            if let Err(e) = graph.add_edge_with(&edge.from, &edge.to, edge.backtrack) {
                warn!("Skipping edge in save: {e}");
            }
        }

        let mut player = self.player_state;
        if !graph.contains(&player.current_node_id) {
            warn!(
                "Saved position {} is not in the graph, returning to the start",
                player.current_node_id.short()
            );
            player.current_node_id = graph.root().clone();
        }
        player.visited_node_ids.retain(|id| graph.contains(id));
        if player.visited_node_ids.last() != Some(&player.current_node_id) {
            player.visited_node_ids.push(player.current_node_id.clone());
        }
        player.health = player.health.clamp(0, MAX_HEALTH);

        let mut story = self.story_state;
        story.visited_node_ids = player.visited_node_ids.clone();

        info!(
            "Loaded save: {} nodes, player at {}",
            graph.len(),
            player.current_node_id.short()
        );
        Ok(LoadedState {
            graph,
            player,
            story,
        })
    }

    pub fn to_json(&self) -> Result<String, PersistError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, PersistError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn read(path: &Path) -> Result<Self, PersistError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Write via a sibling temp file so a crash never leaves half a save.
    pub fn write(&self, path: &Path) -> Result<(), PersistError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, self.to_json()?)?;
        fs::rename(&tmp, path)?;
        info!("Game saved to {}", path.display());
        Ok(())
    }
}

/// The recorded root if usable, else the first node nothing points to.
fn pick_root(
    recorded: Option<NodeId>,
    nodes: &BTreeMap<NodeId, Node>,
    edges: &[EdgeRecord],
) -> Option<NodeId> {
    if let Some(id) = recorded.filter(|id| nodes.contains_key(id)) {
        return Some(id);
    }
    let targets: HashSet<&NodeId> = edges
        .iter()
        .filter(|e| nodes.contains_key(&e.from))
        .map(|e| &e.to)
        .collect();
    nodes
        .keys()
        .find(|id| !targets.contains(id))
        .or_else(|| nodes.keys().next())
        .cloned()
}

/// `<dir>/player_<name>_theme_<theme>.json`, with unsafe characters replaced.
pub fn save_path(dir: &Path, player_name: &str, theme: &str) -> PathBuf {
    dir.join(format!(
        "player_{}_theme_{}.json",
        sanitize(player_name),
        sanitize(theme)
    ))
}

fn sanitize(part: &str) -> String {
    let cleaned: String = part
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}
