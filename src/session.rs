use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::builder::{BuildConfig, TreeBuilder};
use crate::error::{EngineError, PersistError};
use crate::expander::{Expansion, FrontierContext, FrontierExpander};
use crate::generate::ContentGenerator;
use crate::persist::{LoadedState, SaveDocument, StoryStateRecord};
use crate::story::{
    player_mood, CharacterState, Consequences, EndingKind, NarrativeArc, NodeId, SceneState,
    StoryGraph, PLAYER_KEY,
};

pub const MAX_HEALTH: i32 = 100;

/// Reason given when the story cannot be continued.
pub const FADED_PATH_REASON: &str = "The path fades into uncertainty.";

// ---------------------------------------------------------------------------
// Player state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSession {
    pub name: String,
    pub current_node_id: NodeId,
    pub health: i32,
    pub experience: u32,
    pub inventory: Vec<String>,
    pub visited_node_ids: Vec<NodeId>,
    #[serde(default)]
    pub is_dead: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub death_cause: Option<String>,
}

impl PlayerSession {
    pub fn new(name: impl Into<String>, start: NodeId) -> Self {
        Self {
            name: name.into(),
            current_node_id: start.clone(),
            health: MAX_HEALTH,
            experience: 0,
            inventory: Vec::new(),
            visited_node_ids: vec![start],
            is_dead: false,
            death_cause: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Dead { cause: String },
    Ended { kind: EndingKind, reason: String },
}

impl SessionStatus {
    pub fn is_over(&self) -> bool {
        !matches!(self, SessionStatus::Active)
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How raw health deltas are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HealthPolicy {
    /// Apply deltas as authored.
    #[default]
    Exact,
    /// Non-zero deltas move health by at least 5 points.
    MinimumFive,
}

impl HealthPolicy {
    pub fn adjust(self, delta: i32) -> i32 {
        match self {
            HealthPolicy::Exact => delta,
            HealthPolicy::MinimumFive if delta != 0 && delta.abs() < 5 => delta.signum() * 5,
            HealthPolicy::MinimumFive => delta,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub health_policy: HealthPolicy,
    /// How many visited scenes are passed to the generator as recent events.
    pub recent_window: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            health_policy: HealthPolicy::Exact,
            recent_window: 3,
        }
    }
}

/// Parameters for a new game.
#[derive(Debug, Clone)]
pub struct StartOptions {
    pub theme: String,
    pub depth: usize,
    pub branching_factor: usize,
    pub player_name: String,
    /// Delay between generation calls during pre-generation.
    pub pause: Duration,
}

impl StartOptions {
    pub fn new(theme: impl Into<String>, player_name: impl Into<String>) -> Self {
        let build = BuildConfig::default();
        Self {
            theme: theme.into(),
            depth: build.max_depth,
            branching_factor: build.branching_factor,
            player_name: player_name.into(),
            pause: build.pause,
        }
    }
}

// ---------------------------------------------------------------------------
// Render payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceView {
    pub index: usize,
    pub text: String,
    pub can_backtrack: bool,
    pub consequences: Consequences,
}

/// Everything a front end needs to draw the current turn.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneView {
    pub node_id: NodeId,
    pub story: String,
    pub dialogue: Option<String>,
    pub scene: SceneState,
    pub characters: BTreeMap<String, CharacterState>,
    pub path_label: String,
    pub health: i32,
    pub experience: u32,
    pub inventory: Vec<String>,
    pub mood: &'static str,
    /// Empty once the session is over.
    pub choices: Vec<ChoiceView>,
    pub status: SessionStatus,
}

// ---------------------------------------------------------------------------
// StorySession
// ---------------------------------------------------------------------------

/// One player's playthrough: exclusive owner of its graph and player state.
pub struct StorySession<G> {
    graph: StoryGraph,
    player: PlayerSession,
    status: SessionStatus,
    expander: FrontierExpander<G>,
    theme: String,
    max_depth: usize,
    config: SessionConfig,
}

impl<G: ContentGenerator> StorySession<G> {
    /// Generate an arc, pre-generate the tree and place the player at its root.
    pub fn start(mut generator: G, options: StartOptions, config: SessionConfig) -> Self {
        info!(
            "Starting '{}' for {} (depth {}, {} choices)",
            options.theme, options.player_name, options.depth, options.branching_factor
        );
        let arc = match generator.generate_arc(&options.theme) {
            Ok(arc) => arc.normalized(),
            Err(e) => {
                warn!("Arc generation failed, using the generic arc: {e}");
                NarrativeArc::skeleton(&options.theme)
            }
        };

        let build = BuildConfig {
            max_depth: options.depth,
            branching_factor: options.branching_factor,
            pause: options.pause,
        };
        let (graph, branching_factor) = {
            let mut builder = TreeBuilder::new(&mut generator, arc.clone(), build);
            (builder.build(), builder.config().branching_factor)
        };

        let player = PlayerSession::new(options.player_name, graph.root().clone());
        let story = StoryStateRecord {
            theme: options.theme,
            max_depth: options.depth,
            branching_factor,
            arc: Some(arc),
            ..StoryStateRecord::default()
        };
        Self::assemble(generator, LoadedState { graph, player, story }, config)
    }

    /// Continue from a save document.
    pub fn resume(
        generator: G,
        doc: SaveDocument,
        config: SessionConfig,
    ) -> Result<Self, PersistError> {
        let state = doc.into_state()?;
        Ok(Self::assemble(generator, state, config))
    }

    /// Resume the save at `path`, or start fresh if there is none or it is unusable.
    pub fn load_or_start(
        generator: G,
        path: &Path,
        options: StartOptions,
        config: SessionConfig,
    ) -> Self {
        match SaveDocument::read(path).and_then(SaveDocument::into_state) {
            Ok(state) => {
                info!("Resuming saved game from {}", path.display());
                Self::assemble(generator, state, config)
            }
            Err(PersistError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No save at {}", path.display());
                Self::start(generator, options, config)
            }
            Err(e) => {
                warn!("Discarding unusable save {}: {e}", path.display());
                Self::start(generator, options, config)
            }
        }
    }

    fn assemble(generator: G, state: LoadedState, config: SessionConfig) -> Self {
        let LoadedState {
            graph,
            player,
            story,
        } = state;
        let arc = story
            .arc
            .unwrap_or_else(|| NarrativeArc::skeleton(&story.theme));
        let mut session = Self {
            graph,
            player,
            status: SessionStatus::Active,
            expander: FrontierExpander::new(generator, arc, story.branching_factor),
            theme: story.theme,
            max_depth: story.max_depth,
            config,
        };
        session.settle();
        session
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Take the choice at `index` among the current node's children.
    pub fn choose(&mut self, index: usize) -> Result<SceneView, EngineError> {
        if self.status.is_over() {
            return Err(EngineError::SessionOver);
        }
        let children = self.graph.children_of(&self.player.current_node_id);
        let target_id = children
            .get(index)
            .cloned()
            .ok_or(EngineError::InvalidChoice {
                index,
                available: children.len(),
            })?;
        let target = self.graph.node(&target_id)?;
        let consequences = target.consequences.clone();
        let story = target.story.clone();

        self.apply(&consequences);
        info!(
            "Choice {index} -> node {} (health {}, xp {})",
            target_id.short(),
            self.player.health,
            self.player.experience
        );

        if self.player.health == 0 {
            info!("{} has died", self.player.name);
            self.player.is_dead = true;
            self.player.death_cause = Some(story.clone());
            self.status = SessionStatus::Dead { cause: story };
            return Ok(self.view());
        }

        self.player.current_node_id = target_id.clone();
        self.player.visited_node_ids.push(target_id);
        self.settle();
        Ok(self.view())
    }

    fn apply(&mut self, c: &Consequences) {
        let delta = self.config.health_policy.adjust(c.health_delta);
        self.player.health = self
            .player
            .health
            .saturating_add(delta)
            .clamp(0, MAX_HEALTH);

        for item in &c.inventory_additions {
            self.player.inventory.push(item.clone());
        }
        for item in &c.inventory_removals {
            match self.player.inventory.iter().position(|i| i == item) {
                Some(pos) => {
                    self.player.inventory.remove(pos);
                }
                None => debug!("Nothing to remove for '{item}'"),
            }
        }
        self.player.experience = self
            .player
            .experience
            .saturating_add_signed(c.experience_delta);
    }

    /// Recompute the status at the current node, expanding a frontier if needed.
    ///
    /// Leaves the session either with at least one choice or over.
    fn settle(&mut self) {
        if self.player.is_dead {
            let cause = self
                .player
                .death_cause
                .clone()
                .unwrap_or_else(|| "Your wounds proved fatal.".to_string());
            self.status = SessionStatus::Dead { cause };
            return;
        }

        let current = self.player.current_node_id.clone();
        let Some(node) = self.graph.get(&current) else {
            warn!("Current node {} is missing", current.short());
            self.status = SessionStatus::Ended {
                kind: EndingKind::Neutral,
                reason: FADED_PATH_REASON.to_string(),
            };
            return;
        };

        if node.is_terminal {
            let kind = node.ending_kind.or_neutral();
            let reason = node
                .ending_reason
                .clone()
                .unwrap_or_else(|| kind.default_reason().to_string());
            info!("Reached a {} ending", kind.label());
            self.status = SessionStatus::Ended { kind, reason };
            return;
        }
        if !self.graph.children_of(&current).is_empty() {
            self.status = SessionStatus::Active;
            return;
        }

        let ctx = self.frontier_context();
        self.status = match self.expander.expand(&mut self.graph, &ctx) {
            Expansion::Expanded(_) => SessionStatus::Active,
            Expansion::Ended { kind, reason } => SessionStatus::Ended { kind, reason },
            Expansion::Failed => {
                warn!(
                    "Could not continue past node {}, forcing an ending",
                    current.short()
                );
                if let Some(node) = self.graph.get_mut(&current) {
                    node.force_ending(EndingKind::Neutral, FADED_PATH_REASON);
                }
                SessionStatus::Ended {
                    kind: EndingKind::Neutral,
                    reason: FADED_PATH_REASON.to_string(),
                }
            }
        };
    }

    fn frontier_context(&self) -> FrontierContext {
        let visited = &self.player.visited_node_ids;
        let recent_events = visited
            .iter()
            .skip(visited.len().saturating_sub(self.config.recent_window))
            .filter_map(|id| self.graph.get(id))
            .map(|node| node.story.clone())
            .collect();
        FrontierContext {
            current: self.player.current_node_id.clone(),
            depth: visited.len().saturating_sub(1),
            max_depth: self.max_depth,
            health: self.player.health,
            inventory: self.player.inventory.clone(),
            recent_events,
        }
    }

    // -----------------------------------------------------------------------
    // Views and persistence
    // -----------------------------------------------------------------------

    pub fn view(&self) -> SceneView {
        let current = &self.player.current_node_id;
        let node = self.graph.get(current);

        let choices = if self.status.is_over() {
            Vec::new()
        } else {
            self.graph
                .children_of(current)
                .iter()
                .enumerate()
                .filter_map(|(index, id)| {
                    self.graph.get(id).map(|child| ChoiceView {
                        index,
                        text: child.story.clone(),
                        can_backtrack: self.graph.is_backtrack(current, id),
                        consequences: child.consequences.clone(),
                    })
                })
                .collect()
        };

        let mut characters = node.map(|n| n.characters.clone()).unwrap_or_default();
        let mirror = characters.entry(PLAYER_KEY.to_string()).or_default();
        mirror.health = self.player.health;
        mirror.mood = player_mood(self.player.health).to_string();
        mirror.inventory = self.player.inventory.clone();

        SceneView {
            node_id: current.clone(),
            story: node.map(|n| n.story.clone()).unwrap_or_default(),
            dialogue: node.and_then(|n| n.dialogue.clone()),
            scene: node.map(|n| n.scene_state.clone()).unwrap_or_default(),
            characters,
            path_label: node
                .map(|n| n.narrative_path_label.clone())
                .unwrap_or_default(),
            health: self.player.health,
            experience: self.player.experience,
            inventory: self.player.inventory.clone(),
            mood: player_mood(self.player.health),
            choices,
            status: self.status.clone(),
        }
    }

    pub fn to_document(&self) -> SaveDocument {
        let node = self.graph.get(&self.player.current_node_id);
        let story = StoryStateRecord {
            theme: self.theme.clone(),
            current_scene: node.map(|n| n.scene_state.clone()).unwrap_or_default(),
            characters: node.map(|n| n.characters.clone()).unwrap_or_default(),
            max_depth: self.max_depth,
            branching_factor: self.expander.branching_factor(),
            arc: Some(self.expander.arc().clone()),
            ..StoryStateRecord::default()
        };
        SaveDocument::capture(&self.graph, &self.player, story)
    }

    pub fn save(&self, path: &Path) -> Result<(), EngineError> {
        self.to_document().write(path)?;
        Ok(())
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    pub fn player(&self) -> &PlayerSession {
        &self.player
    }

    pub fn graph(&self) -> &StoryGraph {
        &self.graph
    }

    pub fn theme(&self) -> &str {
        &self.theme
    }

    pub fn arc(&self) -> &NarrativeArc {
        self.expander.arc()
    }
}
