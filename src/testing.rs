//! Scripted generator for engine tests.
//!
//! Produces deterministic, always-unique content without a model, with knobs
//! for failures, odd choice counts, health deltas and endings.

use std::collections::VecDeque;

use serde_json::json;

use crate::error::GenerationError;
use crate::generate::{
    ChoiceConsequences, ChoicePayload, ContentGenerator, NodePayload, NodeRequest,
};
use crate::story::{EndingKind, NarrativeArc, SceneState};

/// One queued answer. Consumed before falling back to auto-generated content.
#[derive(Debug, Clone)]
pub enum Scripted {
    Fail,
    Respond(NodePayload),
}

pub struct ScriptedGenerator {
    script: VecDeque<Scripted>,
    counter: usize,
    /// Health change carried by every auto-generated choice.
    pub health_change: i32,
    /// Item changes carried by every auto-generated choice.
    pub item_changes: Vec<String>,
    /// Return this many choices instead of the requested count.
    pub choice_count: Option<usize>,
    /// Fail every node request whose parent story equals one of these.
    pub fail_parents: Vec<String>,
    pub fail_arc: bool,
    /// Every node request seen, in order.
    pub requests: Vec<NodeRequest>,
    pub arc_calls: usize,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self {
            script: VecDeque::new(),
            counter: 0,
            health_change: 0,
            item_changes: Vec::new(),
            choice_count: None,
            fail_parents: Vec::new(),
            fail_arc: false,
            requests: Vec::new(),
            arc_calls: 0,
        }
    }

    pub fn push(&mut self, answer: Scripted) -> &mut Self {
        self.script.push_back(answer);
        self
    }

    pub fn fail_next(&mut self, times: usize) -> &mut Self {
        for _ in 0..times {
            self.push(Scripted::Fail);
        }
        self
    }

    /// Payload the generator would produce for `request` right now.
    pub fn auto_payload(&mut self, request: &NodeRequest) -> NodePayload {
        self.counter += 1;
        let n = self.counter;
        let count = self.choice_count.unwrap_or(request.choice_count);
        let choices = (0..count)
            .map(|slot| ChoicePayload {
                text: format!("Path {n}.{slot} at depth {}", request.depth + 1),
                consequences: ChoiceConsequences {
                    health_change: self.health_change,
                    item_changes: self.item_changes.clone(),
                    experience_change: 10,
                },
                dialogue: None,
                can_backtrack: slot == 0,
                ending_kind: None,
            })
            .collect();

        NodePayload {
            story: format!("Scene {n} in the {} world", request.theme),
            scene_state: SceneState {
                location: format!("Place {n}"),
                time_of_day: "noon".into(),
                weather: "clear".into(),
                ambient: "calm".into(),
            },
            characters: json!({
                "others": [{"name": format!("Stranger {n}"), "relationship": "ally"}]
            }),
            choices,
            is_ending: false,
            ending_kind: None,
            ending_reason: None,
            story_path: None,
        }
    }

    /// An `is_ending` payload with no choices.
    pub fn ending(kind: EndingKind, reason: &str) -> NodePayload {
        NodePayload {
            story: format!("The end: {reason}"),
            is_ending: true,
            ending_kind: Some(kind),
            ending_reason: Some(reason.to_string()),
            ..NodePayload::default()
        }
    }
}

impl ContentGenerator for ScriptedGenerator {
    fn generate_node(&mut self, request: &NodeRequest) -> Result<NodePayload, GenerationError> {
        self.requests.push(request.clone());

        match self.script.pop_front() {
            Some(Scripted::Fail) => {
                return Err(GenerationError::Backend("scripted failure".into()));
            }
            Some(Scripted::Respond(payload)) => return Ok(payload),
            None => {}
        }

        if let Some(parent) = &request.parent_story {
            if self.fail_parents.contains(parent) {
                return Err(GenerationError::Malformed("scripted parent failure".into()));
            }
        }
        Ok(self.auto_payload(request))
    }

    fn generate_arc(&mut self, theme: &str) -> Result<NarrativeArc, GenerationError> {
        self.arc_calls += 1;
        if self.fail_arc {
            return Err(GenerationError::Backend("scripted arc failure".into()));
        }
        let mut arc = NarrativeArc::skeleton(theme);
        arc.golden_path = format!("The hero of {theme} returns home changed.");
        for stage in &mut arc.arc {
            stage.potential_branches = vec!["fight".into(), "flee".into(), "parley".into()];
        }
        Ok(arc)
    }
}
