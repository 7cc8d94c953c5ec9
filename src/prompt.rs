use std::fmt::Write as _;

use crate::generate::NodeRequest;

// ---------------------------------------------------------------------------
// Chat message helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

impl std::fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: {}", self.role, self.content)
    }
}

// ---------------------------------------------------------------------------
// System prompts
// ---------------------------------------------------------------------------

const STORYTELLER_SYSTEM: &str = "You are a master storyteller writing an interactive, \
branching adventure. You answer ONLY with a single JSON object, no prose around it.";

const NODE_SHAPE: &str = r#"{
  "story": "2-4 sentences of narrative",
  "scene_state": {"location": "...", "time_of_day": "...", "weather": "...", "ambient": "..."},
  "characters": {
    "player": {"health": 100, "mood": "...", "status_effects": []},
    "others": [{"name": "...", "description": "...", "relationship": "..."}]
  },
  "choices": [
    {"text": "what the player does",
     "consequences": {"health_change": 0, "item_changes": ["add_item", "remove_item"], "experience_change": 10},
     "dialogue": "optional line",
     "can_backtrack": false}
  ],
  "is_ending": false,
  "ending_kind": "victory | defeat | neutral | bittersweet | tragic",
  "ending_reason": "why the story ends here"
}"#;

const ARC_SHAPE: &str = r#"{
  "theme": "...",
  "golden_path": "one sentence describing the ideal route through the story",
  "arc": [
    {"stage": "The Ordinary World", "description": "...", "characters": ["..."],
     "key_plot_points": ["..."], "potential_branches": ["..."], "thematic_elements": ["..."]}
  ]
}"#;

// ---------------------------------------------------------------------------
// Request rendering
// ---------------------------------------------------------------------------

/// Messages asking for one node-with-choices.
pub fn node_messages(request: &NodeRequest) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(STORYTELLER_SYSTEM),
        ChatMessage::user(render_node_request(request)),
    ]
}

/// Messages asking for an eight-stage arc.
pub fn arc_messages(theme: &str) -> Vec<ChatMessage> {
    let user = format!(
        "Design a narrative arc for a '{theme}' adventure following the hero's journey.\n\
         Provide exactly 8 stages in order: The Ordinary World, The Call to Adventure, \
         Crossing the Threshold, Tests, Allies, and Enemies, The Approach, The Ordeal, \
         The Reward, Return and Resolution.\n\
         For each stage give a description, key characters, plot points, 2-4 potential \
         branches the player might take, and thematic elements.\n\n\
         Respond with JSON in exactly this shape:\n{ARC_SHAPE}"
    );
    vec![ChatMessage::system(STORYTELLER_SYSTEM), ChatMessage::user(user)]
}

fn render_node_request(req: &NodeRequest) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "Theme: {}", req.theme);
    let _ = writeln!(
        out,
        "Story stage: {} ({}), depth {} of {}",
        req.stage.stage,
        req.progression.as_str(),
        req.depth,
        req.max_depth
    );
    if !req.stage.description.is_empty() {
        let _ = writeln!(out, "Stage description: {}", req.stage.description);
    }
    if !req.stage.characters.is_empty() {
        let _ = writeln!(out, "Key characters: {}", req.stage.characters.join(", "));
    }
    if !req.stage.key_plot_points.is_empty() {
        let _ = writeln!(out, "Plot points: {}", req.stage.key_plot_points.join("; "));
    }
    if !req.stage.thematic_elements.is_empty() {
        let _ = writeln!(out, "Themes: {}", req.stage.thematic_elements.join(", "));
    }
    if let Some(golden) = &req.golden_path {
        let _ = writeln!(out, "The ideal path through the story: {golden}");
    }

    if let Some(player) = &req.player {
        let items = if player.inventory.is_empty() {
            "nothing".to_string()
        } else {
            player.inventory.join(", ")
        };
        let _ = writeln!(out, "\nPlayer: health {}/100, carrying {items}.", player.health);
    }
    if !req.recent_events.is_empty() {
        let _ = writeln!(out, "\nRecent events, oldest first:");
        for event in &req.recent_events {
            let _ = writeln!(out, "- {event}");
        }
    }

    match &req.parent_story {
        None => {
            let _ = writeln!(
                out,
                "\nWrite the opening scene of the story. It sets up the world but offers no \
                 choices yet, so return an empty \"choices\" list."
            );
        }
        Some(parent) => {
            let _ = writeln!(out, "\nThe current scene:\n{parent}");
            if let Some(scene) = &req.parent_scene {
                let _ = writeln!(
                    out,
                    "Location: {}, {} ({}), {}",
                    scene.location, scene.time_of_day, scene.weather, scene.ambient
                );
            }
            let _ = writeln!(
                out,
                "\nContinue the story and offer EXACTLY {} distinct choices for what the player \
                 does next. Each choice text is written as the next scene the player enters.",
                req.choice_count
            );
            if !req.branch_hints.is_empty() {
                for (i, hint) in req.branch_hints.iter().enumerate() {
                    let _ = writeln!(out, "Choice {} should lean towards: {hint}", i + 1);
                }
            }
        }
    }

    if req.is_final {
        let _ = writeln!(
            out,
            "These choices are the final beats of the story: each should bring it to an end. \
             Set \"is_ending\" to true and give an ending_kind and ending_reason."
        );
    }
    if req.simplified {
        let _ = writeln!(out, "Keep it short and simple. Valid JSON matters more than style.");
    }

    let _ = write!(out, "\nRespond with JSON in exactly this shape:\n{NODE_SHAPE}");
    out
}
