use log::warn;
use serde::{Deserialize, Serialize};

/// Number of stages in the canonical hero's-journey arc.
pub const ARC_LENGTH: usize = 8;

pub const ARC_STAGE_NAMES: [&str; ARC_LENGTH] = [
    "The Ordinary World",
    "The Call to Adventure",
    "Crossing the Threshold",
    "Tests, Allies, and Enemies",
    "The Approach",
    "The Ordeal",
    "The Reward",
    "Return and Resolution",
];

const STAGE_SUMMARIES: [&str; ARC_LENGTH] = [
    "Establish the protagonist and their normal life",
    "Introduce the inciting incident",
    "The protagonist enters the world of adventure",
    "The protagonist faces challenges and meets key characters",
    "Preparation for the major challenge",
    "The main conflict or challenge",
    "The protagonist achieves something valuable",
    "The conclusion and return to a new normal",
];

/// Map a tree depth onto an arc stage.
///
/// The mapping is relative to `max_depth`, so a depth-3 tree and a depth-12 tree
/// both sweep the whole arc. Depth 0 is always the first stage and `max_depth`
/// the last; depths beyond `max_depth` (dynamic growth) stay on the last stage.
pub fn stage_index(depth: usize, max_depth: usize, arc_length: usize) -> usize {
    let last = arc_length.saturating_sub(1);
    if depth == 0 {
        return 0;
    }
    if depth >= max_depth {
        return last;
    }
    (depth * arc_length / max_depth).min(last)
}

/// Coarse position within the tree, used in labels and prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Progression {
    Beginning,
    Middle,
    Late,
    Conclusion,
}

impl Progression {
    pub fn for_depth(depth: usize, max_depth: usize) -> Self {
        if depth >= max_depth {
            Progression::Conclusion
        } else if depth * 3 < max_depth {
            Progression::Beginning
        } else if depth * 3 < max_depth * 2 {
            Progression::Middle
        } else {
            Progression::Late
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Progression::Beginning => "Beginning",
            Progression::Middle => "Middle",
            Progression::Late => "Late",
            Progression::Conclusion => "Conclusion",
        }
    }

    /// Parse the progression back out of a `"<stage> - <progression>"` label.
    pub fn from_label(label: &str) -> Option<Self> {
        let tail = label.rsplit(" - ").next()?.trim();
        match tail {
            "Beginning" => Some(Progression::Beginning),
            "Middle" => Some(Progression::Middle),
            "Late" => Some(Progression::Late),
            "Conclusion" => Some(Progression::Conclusion),
            _ => None,
        }
    }
}

/// `"<stage name> - <progression>"`, recorded on every generated node.
pub fn path_label(stage: &ArcStage, progression: Progression) -> String {
    format!("{} - {}", stage.stage, progression.as_str())
}

/// One stage of the narrative arc.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArcStage {
    pub stage: String,
    pub description: String,
    pub characters: Vec<String>,
    pub key_plot_points: Vec<String>,
    pub potential_branches: Vec<String>,
    pub thematic_elements: Vec<String>,
}

impl ArcStage {
    /// Branch hint for child slot `slot`, cycling through the stage's hints.
    pub fn branch_hint(&self, slot: usize) -> Option<&str> {
        if self.potential_branches.is_empty() {
            return None;
        }
        Some(&self.potential_branches[slot % self.potential_branches.len()])
    }
}

/// Thematic guidance shared read-only by the builder and the expander.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrativeArc {
    pub theme: String,
    #[serde(default)]
    pub golden_path: String,
    pub arc: Vec<ArcStage>,
}

impl NarrativeArc {
    /// Generic eight-stage arc used when no generated arc is available.
    pub fn skeleton(theme: &str) -> Self {
        let arc = ARC_STAGE_NAMES
            .iter()
            .zip(STAGE_SUMMARIES)
            .map(|(name, summary)| ArcStage {
                stage: (*name).to_string(),
                description: format!("{summary}, in a {theme} setting."),
                ..ArcStage::default()
            })
            .collect();
        Self {
            theme: theme.to_string(),
            golden_path: String::new(),
            arc,
        }
    }

    /// Force the arc to exactly [`ARC_LENGTH`] stages, padding from the skeleton.
    pub fn normalized(mut self) -> Self {
        if self.arc.len() != ARC_LENGTH {
            warn!(
                "Arc for '{}' has {} stages, normalizing to {ARC_LENGTH}",
                self.theme,
                self.arc.len()
            );
        }
        self.arc.truncate(ARC_LENGTH);
        let skeleton = Self::skeleton(&self.theme);
        self.arc.extend(skeleton.arc.into_iter().skip(self.arc.len()));
        for (stage, name) in self.arc.iter_mut().zip(ARC_STAGE_NAMES) {
            if stage.stage.trim().is_empty() {
                stage.stage = name.to_string();
            }
        }
        self
    }

    /// Stage at `index`, clamped to the last stage. The arc must be non-empty.
    pub fn stage(&self, index: usize) -> &ArcStage {
        let last = self.arc.len().saturating_sub(1);
        &self.arc[index.min(last)]
    }

    pub fn len(&self) -> usize {
        self.arc.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arc.is_empty()
    }
}
