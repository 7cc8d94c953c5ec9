use std::collections::BTreeMap;

use anyhow::{Context, Result};
use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GenerationError;
use crate::story::{
    stage_index, ArcStage, CharacterKind, CharacterState, Consequences, EndingKind,
    NarrativeArc, Node, NodeId, Progression, SceneState, PLAYER_KEY,
};

// ---------------------------------------------------------------------------
// Collaborator interface
// ---------------------------------------------------------------------------

/// The external generative-text service.
///
/// Injected into the builder and the expander; one call is outstanding at a
/// time. Implementations impose their own timeouts and report them as errors.
pub trait ContentGenerator {
    /// Author one scene plus `request.choice_count` choices.
    fn generate_node(&mut self, request: &NodeRequest) -> Result<NodePayload, GenerationError>;

    /// Author an eight-stage arc for `theme`.
    fn generate_arc(&mut self, theme: &str) -> Result<NarrativeArc, GenerationError>;
}

impl<G: ContentGenerator + ?Sized> ContentGenerator for &mut G {
    fn generate_node(&mut self, request: &NodeRequest) -> Result<NodePayload, GenerationError> {
        (**self).generate_node(request)
    }

    fn generate_arc(&mut self, theme: &str) -> Result<NarrativeArc, GenerationError> {
        (**self).generate_arc(theme)
    }
}

impl<G: ContentGenerator + ?Sized> ContentGenerator for Box<G> {
    fn generate_node(&mut self, request: &NodeRequest) -> Result<NodePayload, GenerationError> {
        (**self).generate_node(request)
    }

    fn generate_arc(&mut self, theme: &str) -> Result<NarrativeArc, GenerationError> {
        (**self).generate_arc(theme)
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Live player stats handed to the generator during play.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlayerSnapshot {
    pub health: i32,
    pub inventory: Vec<String>,
}

/// What to ask the generator for.
#[derive(Debug, Clone, Serialize)]
pub struct NodeRequest {
    pub theme: String,
    /// Depth of the node whose children are being authored (0 for the opening).
    pub depth: usize,
    pub max_depth: usize,
    pub stage_index: usize,
    pub stage: ArcStage,
    pub progression: Progression,
    pub golden_path: Option<String>,
    /// Story text of the parent; `None` for the opening scene.
    pub parent_story: Option<String>,
    pub parent_scene: Option<SceneState>,
    /// One hint per requested choice slot.
    pub branch_hints: Vec<String>,
    /// Number of choices required. Zero for the opening scene.
    pub choice_count: usize,
    /// Children of this request sit on the last planned level.
    pub is_final: bool,
    pub player: Option<PlayerSnapshot>,
    /// Most recent visited scenes, oldest first.
    pub recent_events: Vec<String>,
    /// Set on the single retry after a failed attempt.
    pub simplified: bool,
}

impl NodeRequest {
    /// Opening-scene request: stage 0, no parent context, no choices.
    pub fn opening(arc: &NarrativeArc, max_depth: usize) -> Self {
        Self {
            theme: arc.theme.clone(),
            depth: 0,
            max_depth,
            stage_index: 0,
            stage: arc.stage(0).clone(),
            progression: Progression::for_depth(0, max_depth),
            golden_path: non_empty(&arc.golden_path),
            parent_story: None,
            parent_scene: None,
            branch_hints: Vec::new(),
            choice_count: 0,
            is_final: max_depth == 0,
            player: None,
            recent_events: Vec::new(),
            simplified: false,
        }
    }

    /// Request for the children of `parent`, which sits at `depth`.
    ///
    /// The stage comes from the parent's depth, the progression from the
    /// children's. Branch hints cycle through the stage's list.
    pub fn continuation(
        arc: &NarrativeArc,
        parent: &Node,
        depth: usize,
        max_depth: usize,
        choice_count: usize,
    ) -> Self {
        let stage_index = stage_index(depth, max_depth, arc.len());
        let stage = arc.stage(stage_index).clone();
        let branch_hints = (0..choice_count)
            .filter_map(|slot| stage.branch_hint(slot).map(str::to_string))
            .collect();
        Self {
            theme: arc.theme.clone(),
            depth,
            max_depth,
            stage_index,
            stage,
            progression: Progression::for_depth(depth + 1, max_depth),
            golden_path: non_empty(&arc.golden_path),
            parent_story: Some(parent.story.clone()),
            parent_scene: Some(parent.scene_state.clone()),
            branch_hints,
            choice_count,
            is_final: depth + 1 >= max_depth,
            player: None,
            recent_events: Vec::new(),
            simplified: false,
        }
    }

    /// The reduced request used for the single retry: only the parent scene,
    /// stage and required shape survive.
    pub fn simplified(&self) -> Self {
        Self {
            golden_path: None,
            branch_hints: Vec::new(),
            recent_events: Vec::new(),
            stage: ArcStage {
                stage: self.stage.stage.clone(),
                description: self.stage.description.clone(),
                ..ArcStage::default()
            },
            simplified: true,
            ..self.clone()
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Consequences as the generator writes them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChoiceConsequences {
    pub health_change: i32,
    /// `"add_<item>"`, `"remove_<item>"`, or a bare item name (an addition).
    pub item_changes: Vec<String>,
    pub experience_change: i32,
}

impl ChoiceConsequences {
    pub fn to_consequences(&self) -> Consequences {
        let mut out = Consequences {
            health_delta: self.health_change,
            experience_delta: self.experience_change,
            ..Consequences::default()
        };
        for change in &self.item_changes {
            let change = change.trim();
            if let Some(item) = change.strip_prefix("remove_") {
                out.inventory_removals.push(item.to_string());
            } else if let Some(item) = change.strip_prefix("add_") {
                out.inventory_additions.push(item.to_string());
            } else if !change.is_empty() {
                out.inventory_additions.push(change.to_string());
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoicePayload {
    pub text: String,
    #[serde(default)]
    pub consequences: ChoiceConsequences,
    #[serde(default)]
    pub dialogue: Option<String>,
    #[serde(default)]
    pub can_backtrack: bool,
    /// Per-choice ending override, for concluding choices.
    #[serde(default)]
    pub ending_kind: Option<EndingKind>,
}

pub const FILLER_TEXT: &str = "Take an alternative path";

impl ChoicePayload {
    /// Generic filler used when repairing a short choice list.
    pub fn filler() -> Self {
        Self {
            text: FILLER_TEXT.to_string(),
            consequences: ChoiceConsequences::default(),
            dialogue: None,
            can_backtrack: false,
            ending_kind: None,
        }
    }

    pub fn is_filler(&self) -> bool {
        self.text.trim() == FILLER_TEXT
    }

    /// Story text of the scene this choice leads to.
    ///
    /// Fillers carry no prose of their own, so theirs is derived from the
    /// parent scene and the slot. That keeps every filler a distinct node.
    pub fn child_story(&self, parent: &NodeId, parent_story: &str, slot: usize) -> String {
        const EXCERPT: usize = 80;
        if !self.is_filler() {
            return self.text.trim().to_string();
        }
        let story = parent_story.trim();
        let excerpt = match story.char_indices().nth(EXCERPT) {
            Some((cut, _)) => format!("{}...", &story[..cut]),
            None => story.to_string(),
        };
        format!(
            "{FILLER_TEXT}, leaving behind: {excerpt} [{}/{}]",
            parent.short(),
            slot + 1
        )
    }
}

/// The node-with-choices shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodePayload {
    pub story: String,
    #[serde(default)]
    pub scene_state: SceneState,
    /// Raw character block; see [`normalize_characters`].
    #[serde(default)]
    pub characters: Value,
    #[serde(default)]
    pub choices: Vec<ChoicePayload>,
    #[serde(default)]
    pub is_ending: bool,
    #[serde(default)]
    pub ending_kind: Option<EndingKind>,
    #[serde(default)]
    pub ending_reason: Option<String>,
    #[serde(default)]
    pub story_path: Option<String>,
}

impl NodePayload {
    pub fn characters(&self) -> BTreeMap<String, CharacterState> {
        normalize_characters(&self.characters)
    }
}

/// Check a payload against the requested choice count, repairing what can be repaired.
///
/// Extra choices are dropped and a short list is padded with generic fillers.
/// An empty list is only valid when the payload declares an ending.
pub fn validate_choices(
    mut payload: NodePayload,
    expected: usize,
) -> Result<NodePayload, GenerationError> {
    if payload.story.trim().is_empty() {
        return Err(GenerationError::Malformed("empty story text".into()));
    }
    payload.choices.retain(|c| !c.text.trim().is_empty());
    let found = payload.choices.len();

    if found == expected || expected == 0 {
        return Ok(payload);
    }
    if found == 0 {
        if payload.is_ending {
            return Ok(payload);
        }
        return Err(GenerationError::WrongShape { expected, found });
    }
    if found > expected {
        warn!("Generator returned {found} choices, keeping the first {expected}");
        payload.choices.truncate(expected);
    } else {
        warn!("Generator returned {found} choices, padding to {expected}");
        payload.choices.resize_with(expected, ChoicePayload::filler);
    }
    Ok(payload)
}

/// Fold the generator's character block into `name -> state`.
///
/// Accepts a plain name-keyed map, plus the list form
/// `{"others": [{"name", "description", "relationship"}]}`.
pub fn normalize_characters(value: &Value) -> BTreeMap<String, CharacterState> {
    let mut out = BTreeMap::new();
    let Some(map) = value.as_object() else {
        return out;
    };

    for (key, entry) in map {
        match entry {
            Value::Array(list) => {
                for item in list {
                    if let Some((name, state)) = listed_character(item) {
                        out.insert(name, state);
                    }
                }
            }
            Value::Object(fields) if fields.contains_key("name") && !looks_like_state(fields) => {
                if let Some((name, state)) = listed_character(entry) {
                    out.insert(name, state);
                }
            }
            Value::Object(_) => match serde_json::from_value::<CharacterState>(entry.clone()) {
                Ok(state) => {
                    out.insert(key.clone(), state);
                }
                Err(e) => debug!("Skipping character '{key}': {e}"),
            },
            _ => debug!("Skipping character '{key}': not an object"),
        }
    }
    out
}

fn looks_like_state(fields: &serde_json::Map<String, Value>) -> bool {
    fields.contains_key("health") || fields.contains_key("mood")
}

fn listed_character(item: &Value) -> Option<(String, CharacterState)> {
    let name = item.get("name")?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }
    let mut state: CharacterState = serde_json::from_value(item.clone()).unwrap_or_default();
    if let Some(rel) = item.get("relationship").and_then(Value::as_str) {
        state
            .relationships
            .insert(PLAYER_KEY.to_string(), rel.to_string());
        if state.kind == CharacterKind::Neutral {
            state.kind = kind_from_relationship(rel);
        }
    }
    Some((name.to_string(), state))
}

fn kind_from_relationship(rel: &str) -> CharacterKind {
    let rel = rel.to_lowercase();
    if ["enemy", "hostile", "rival", "antagonist"].iter().any(|w| rel.contains(w)) {
        CharacterKind::Enemy
    } else if ["ally", "friend", "mentor", "companion"].iter().any(|w| rel.contains(w)) {
        CharacterKind::Ally
    } else {
        CharacterKind::Neutral
    }
}

// ---------------------------------------------------------------------------
// JSON extraction
// ---------------------------------------------------------------------------

/// Pull the outermost JSON object out of raw model output.
///
/// Strips `<think>` blocks and markdown fences, then takes everything from the
/// first `{` to the last `}`.
pub fn extract_json(raw: &str) -> Result<String> {
    let re_think = Regex::new(r"(?s)<think>(.*?)</think>").context("invalid think pattern")?;
    for cap in re_think.captures_iter(raw) {
        let thought = cap.get(1).map_or("", |m| m.as_str()).trim();
        if !thought.is_empty() {
            debug!("Model thinking:\n{thought}");
        }
    }

    let cleaned = re_think.replace_all(raw, "");
    let cleaned = cleaned.replace("```json", "").replace("```", "");

    let start = cleaned
        .find('{')
        .with_context(|| format!("no JSON object found in model output. Raw output:\n{raw}"))?;
    let end = cleaned
        .rfind('}')
        .filter(|end| *end > start)
        .with_context(|| format!("unterminated JSON object in model output:\n{raw}"))?;

    Ok(cleaned[start..=end].to_string())
}

pub fn parse_node_payload(raw: &str) -> Result<NodePayload> {
    let json = extract_json(raw)?;
    debug!("Extracted JSON: {json}");
    serde_json::from_str(&json).with_context(|| format!("failed to parse node JSON: {json}"))
}

pub fn parse_arc_payload(raw: &str) -> Result<NarrativeArc> {
    let json = extract_json(raw)?;
    let arc: NarrativeArc =
        serde_json::from_str(&json).with_context(|| format!("failed to parse arc JSON: {json}"))?;
    Ok(arc.normalized())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NODE_JSON: &str = r#"{
        "story": "The market square smells of rain.",
        "scene_state": {"location": "Market", "time_of_day": "dusk", "weather": "rain", "ambient": "tense"},
        "characters": {
            "player": {"health": 90, "mood": "wary", "status_effects": []},
            "others": [{"name": "Mara", "description": "a smuggler", "relationship": "wary ally"}]
        },
        "choices": [
            {"text": "Follow Mara", "consequences": {"health_change": -10, "item_changes": ["add_lantern", "remove_coin"]}},
            {"text": "Stay put", "consequences": {"health_change": 0, "item_changes": []}}
        ],
        "is_ending": false
    }"#;

    #[test]
    fn test_parse_node_clean() {
        let payload = parse_node_payload(NODE_JSON).unwrap();
        assert_eq!(payload.choices.len(), 2);
        assert_eq!(payload.scene_state.location, "Market");
        let c = payload.choices[0].consequences.to_consequences();
        assert_eq!(c.health_delta, -10);
        assert_eq!(c.inventory_additions, vec!["lantern"]);
        assert_eq!(c.inventory_removals, vec!["coin"]);
    }

    #[test]
    fn test_parse_node_with_think_and_fences() {
        let raw =
            format!("<think>Let me plan {{the scene}}.</think>\n```json\n{NODE_JSON}\n```\nDone.");
        let payload = parse_node_payload(&raw).unwrap();
        assert_eq!(payload.story, "The market square smells of rain.");
    }

    #[test]
    fn test_extract_json_without_object_fails() {
        assert!(extract_json("I cannot do that.").is_err());
        assert!(extract_json("} backwards {").is_err());
    }

    #[test]
    fn test_characters_normalize_both_shapes() {
        let payload = parse_node_payload(NODE_JSON).unwrap();
        let chars = payload.characters();
        assert_eq!(chars["player"].health, 90);
        assert_eq!(chars["Mara"].kind, CharacterKind::Ally);
        assert_eq!(chars["Mara"].relationships["player"], "wary ally");

        let flat: Value =
            serde_json::from_str(r#"{"Goblin": {"health": 30, "mood": "angry", "type": "enemy"}}"#)
                .unwrap();
        let chars = normalize_characters(&flat);
        assert_eq!(chars["Goblin"].kind, CharacterKind::Enemy);
        assert!(normalize_characters(&Value::Null).is_empty());
    }

    #[test]
    fn test_validate_truncates_and_pads() {
        let mut payload = parse_node_payload(NODE_JSON).unwrap();
        let trimmed = validate_choices(payload.clone(), 1).unwrap();
        assert_eq!(trimmed.choices.len(), 1);
        assert_eq!(trimmed.choices[0].text, "Follow Mara");

        let padded = validate_choices(payload.clone(), 3).unwrap();
        assert_eq!(padded.choices.len(), 3);
        assert_eq!(padded.choices[2], ChoicePayload::filler());

        payload.choices.clear();
        let err = validate_choices(payload.clone(), 2).unwrap_err();
        assert!(matches!(err, GenerationError::WrongShape { expected: 2, found: 0 }));

        payload.is_ending = true;
        assert!(validate_choices(payload, 2).unwrap().choices.is_empty());
    }

    #[test]
    fn test_filler_story_is_distinct_per_parent_and_slot() {
        let gate = NodeId::for_story("The gate creaks open.");
        let crow = NodeId::for_story("A crow watches you.");
        let filler = ChoicePayload::filler();
        assert!(filler.is_filler());
        let a1 = filler.child_story(&gate, "The gate creaks open.", 1);
        let a2 = filler.child_story(&gate, "The gate creaks open.", 2);
        let b1 = filler.child_story(&crow, "A crow watches you.", 1);
        assert_ne!(a1, a2);
        assert_ne!(a1, b1);
        assert!(a1.starts_with(FILLER_TEXT));
        assert!(a1.contains("The gate creaks open."));
        assert!(a1.ends_with(&format!("[{}/2]", gate.short())));

        // same excerpt, different parents
        let long = "x".repeat(200);
        let first = filler.child_story(&NodeId::from("aaaaaaaa"), &long, 0);
        let second = filler.child_story(&NodeId::from("bbbbbbbb"), &long, 0);
        assert!(first.contains("x..."));
        assert_ne!(first, second);

        let real = ChoicePayload {
            text: "  Climb the tower ".into(),
            ..ChoicePayload::filler()
        };
        assert!(!real.is_filler());
        assert_eq!(real.child_story(&gate, "anything", 3), "Climb the tower");
    }

    #[test]
    fn test_validate_rejects_empty_story() {
        let payload = NodePayload::default();
        assert!(matches!(
            validate_choices(payload, 0),
            Err(GenerationError::Malformed(_))
        ));
    }

    #[test]
    fn test_bare_item_is_an_addition() {
        let c = ChoiceConsequences {
            health_change: 5,
            item_changes: vec!["rope".into(), " ".into()],
            experience_change: 15,
        }
        .to_consequences();
        assert_eq!(c.inventory_additions, vec!["rope"]);
        assert_eq!(c.experience_delta, 15);
    }

    #[test]
    fn test_parse_short_arc_is_normalized() {
        let raw = r#"Here you go: {"theme": "Dracula", "golden_path": "Van Helsing wins.",
            "arc": [{"stage": "The Ordinary World", "description": "London fog",
                     "potential_branches": ["visit Lucy"]}]}"#;
        let arc = parse_arc_payload(raw).unwrap();
        assert_eq!(arc.len(), 8);
        assert_eq!(arc.arc[0].description, "London fog");
        assert_eq!(arc.golden_path, "Van Helsing wins.");
    }
}
