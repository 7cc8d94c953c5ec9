use std::collections::VecDeque;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::generate::{validate_choices, ChoicePayload, ContentGenerator, NodePayload, NodeRequest};
use crate::story::{path_label, EndingKind, NarrativeArc, Node, NodeId, Progression, StoryGraph};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const MIN_BRANCHING: usize = 2;
pub const MAX_BRANCHING: usize = 4;

#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Depth of the deepest (terminal) level. Zero builds the root only.
    pub max_depth: usize,
    /// Children requested per node, clamped to `2..=4`.
    pub branching_factor: usize,
    /// Delay between successive generation calls.
    pub pause: Duration,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            branching_factor: 2,
            pause: Duration::from_millis(200),
        }
    }
}

impl BuildConfig {
    pub fn clamped(mut self) -> Self {
        let bf = self.branching_factor.clamp(MIN_BRANCHING, MAX_BRANCHING);
        if bf != self.branching_factor {
            warn!(
                "Branching factor {} out of range, using {bf}",
                self.branching_factor
            );
        }
        self.branching_factor = bf;
        self
    }
}

// ---------------------------------------------------------------------------
// Node construction shared with the expander
// ---------------------------------------------------------------------------

/// Build the child node a choice leads to. The choice text becomes the story,
/// except for fillers, whose story is derived from `parent`.
pub(crate) fn child_from_choice(
    choice: &ChoicePayload,
    slot: usize,
    payload: &NodePayload,
    parent: (&NodeId, &str),
    label: &str,
    terminal: bool,
) -> Node {
    let (parent_id, parent_story) = parent;
    let mut node = Node::new(choice.child_story(parent_id, parent_story, slot))
        .with_consequences(choice.consequences.to_consequences())
        .with_scene(payload.scene_state.clone())
        .with_label(label);
    node.characters = payload.characters();
    node.dialogue = choice.dialogue.clone();

    if terminal {
        let kind = choice
            .ending_kind
            .or(payload.ending_kind)
            .unwrap_or(EndingKind::None);
        node.is_terminal = true;
        node.ending_kind = kind;
        node.ending_reason = payload.ending_reason.clone();
    }
    node
}

/// Whether the generator itself declared this choice an ending.
pub(crate) fn declares_ending(choice: &ChoicePayload, payload: &NodePayload) -> bool {
    payload.is_ending || choice.ending_kind.is_some_and(|k| k != EndingKind::None)
}

// ---------------------------------------------------------------------------
// TreeBuilder
// ---------------------------------------------------------------------------

/// Breadth-first pre-generation of a fixed-depth story tree.
pub struct TreeBuilder<G> {
    generator: G,
    arc: NarrativeArc,
    config: BuildConfig,
    calls: usize,
}

impl<G: ContentGenerator> TreeBuilder<G> {
    pub fn new(generator: G, arc: NarrativeArc, config: BuildConfig) -> Self {
        Self {
            generator,
            arc: arc.normalized(),
            config: config.clamped(),
            calls: 0,
        }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Grow the whole tree. Generation failures abandon single branches only.
    pub fn build(&mut self) -> StoryGraph {
        let max_depth = self.config.max_depth;
        let bf = self.config.branching_factor;
        info!(
            "Building story tree for '{}': depth {max_depth}, branching {bf}",
            self.arc.theme
        );

        let root = self.build_root();
        let mut graph = StoryGraph::new(root);

        let mut queue: VecDeque<(NodeId, usize)> = VecDeque::new();
        if max_depth > 0 {
            queue.push_back((graph.root().clone(), 0));
        }

        while let Some((id, depth)) = queue.pop_front() {
            let Some(parent) = graph.get(&id) else {
                warn!("Queued node {} vanished, skipping", id.short());
                continue;
            };
            if depth >= max_depth || parent.is_terminal {
                continue;
            }

            let request = NodeRequest::continuation(&self.arc, parent, depth, max_depth, bf);
            let Some(payload) = self.request_with_retry(&request, bf) else {
                warn!(
                    "Abandoning branch below node {} at depth {depth}",
                    id.short()
                );
                continue;
            };

            if payload.choices.is_empty() {
                // Only reachable for an `is_ending` response.
                if let Some(parent) = graph.get_mut(&id) {
                    let kind = payload.ending_kind.unwrap_or(EndingKind::None);
                    let reason = payload
                        .ending_reason
                        .clone()
                        .unwrap_or_else(|| kind.default_reason().to_string());
                    parent.force_ending(kind, reason);
                }
                info!("Node {} closed early by the generator", id.short());
                continue;
            }

            let child_depth = depth + 1;
            let label = path_label(&request.stage, Progression::for_depth(child_depth, max_depth));
            let parent_story = request.parent_story.as_deref().unwrap_or_default();
            for (slot, choice) in payload.choices.iter().enumerate() {
                let terminal = child_depth == max_depth || declares_ending(choice, &payload);
                let child = child_from_choice(
                    choice,
                    slot,
                    &payload,
                    (&id, parent_story),
                    &label,
                    terminal,
                );
                let child_id = child.id.clone();

                // Each pre-generated node has exactly one parent.
                if !graph.add_node(child) {
                    warn!(
                        "Choice {} repeats scene {} already in the tree, skipping",
                        slot + 1,
                        child_id.short()
                    );
                    continue;
                }
                if let Err(e) = graph.add_edge_with(&id, &child_id, slot == 0) {
                    warn!("Could not attach child: {e}");
                    continue;
                }
                if !terminal {
                    queue.push_back((child_id, child_depth));
                }
            }
            info!(
                "Depth {depth}: node {} -> {} children ({} nodes total)",
                id.short(),
                graph.children_of(&id).len(),
                graph.len()
            );
        }

        info!("Story tree complete: {} nodes", graph.len());
        graph
    }

    fn build_root(&mut self) -> Node {
        let request = NodeRequest::opening(&self.arc, self.config.max_depth);
        let label = path_label(&request.stage, request.progression);

        let Some(payload) = self.request_with_retry(&request, 0) else {
            warn!("Opening scene generation failed, using a synthetic opening");
            let stage = self.arc.stage(0);
            let story = format!(
                "Your story in the {} world begins. {}",
                self.arc.theme, stage.description
            );
            return Node::new(story.trim_end()).with_label(label);
        };

        let mut root = Node::new(payload.story.trim())
            .with_scene(payload.scene_state.clone())
            .with_label(label);
        root.characters = payload.characters();
        if payload.is_ending {
            root.is_terminal = true;
            root.ending_kind = payload.ending_kind.unwrap_or(EndingKind::None);
            root.ending_reason = payload.ending_reason;
        }
        root
    }

    /// One attempt plus one simplified retry.
    fn request_with_retry(
        &mut self,
        request: &NodeRequest,
        expected: usize,
    ) -> Option<NodePayload> {
        let attempts = [request.clone(), request.simplified()];
        for (attempt, req) in attempts.iter().enumerate() {
            self.pause();
            debug!(
                "Requesting node: depth {}, stage {} ({}), attempt {}",
                req.depth,
                req.stage_index,
                req.stage.stage,
                attempt + 1
            );
            match self
                .generator
                .generate_node(req)
                .and_then(|payload| validate_choices(payload, expected))
            {
                Ok(payload) => return Some(payload),
                Err(e) => warn!("Generation attempt {} failed: {e}", attempt + 1),
            }
        }
        None
    }

    fn pause(&mut self) {
        if self.calls > 0 && !self.config.pause.is_zero() {
            thread::sleep(self.config.pause);
        }
        self.calls += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::{ChoiceConsequences, FILLER_TEXT};
    use crate::testing::{Scripted, ScriptedGenerator};

    fn config(max_depth: usize, branching_factor: usize) -> BuildConfig {
        BuildConfig {
            max_depth,
            branching_factor,
            pause: Duration::ZERO,
        }
    }

    fn build(generator: &mut ScriptedGenerator, cfg: BuildConfig) -> StoryGraph {
        TreeBuilder::new(generator, NarrativeArc::skeleton("Fantasy"), cfg).build()
    }

    fn choices(texts: &[&str]) -> NodePayload {
        NodePayload {
            story: "Scripted scene.".into(),
            choices: texts
                .iter()
                .map(|text| ChoicePayload {
                    text: text.to_string(),
                    ..ChoicePayload::filler()
                })
                .collect(),
            ..NodePayload::default()
        }
    }

    #[test]
    fn test_depth_two_binary_tree() {
        let mut generator = ScriptedGenerator::new();
        let graph = build(&mut generator, config(2, 2));

        assert_eq!(graph.len(), 7);
        let depths = graph.depths();
        let leaves: Vec<&Node> = graph.leaves().collect();
        assert_eq!(leaves.len(), 4);
        for leaf in leaves {
            assert!(leaf.is_terminal);
            assert_eq!(depths[&leaf.id], 2);
        }
        // root + one request per non-terminal parent
        assert_eq!(generator.requests.len(), 4);
    }

    #[test]
    fn test_depth_bound_holds() {
        for (max_depth, bf) in [(1, 2), (3, 2), (2, 3), (2, 4)] {
            let mut generator = ScriptedGenerator::new();
            let graph = build(&mut generator, config(max_depth, bf));
            let depths = graph.depths();
            assert_eq!(depths.len(), graph.len());
            for edge in graph.edges() {
                assert_eq!(depths[&edge.to], depths[&edge.from] + 1);
            }
            for node in graph.nodes() {
                let d = depths[&node.id];
                assert!(d <= max_depth);
                if d == max_depth {
                    assert!(node.is_terminal);
                } else {
                    assert_eq!(graph.children_of(&node.id).len(), bf);
                }
            }
        }
    }

    #[test]
    fn test_requests_follow_the_arc() {
        let mut generator = ScriptedGenerator::new();
        build(&mut generator, config(3, 2));
        let stages: Vec<(usize, usize)> = generator
            .requests
            .iter()
            .map(|r| (r.depth, r.stage_index))
            .collect();
        assert_eq!(stages[0], (0, 0));
        assert!(stages.contains(&(1, 2)));
        assert!(stages.contains(&(2, 5)));
        let last = generator.requests.last().unwrap();
        assert!(last.is_final);
        assert_eq!(last.progression, Progression::Conclusion);
    }

    #[test]
    fn test_failed_branch_is_abandoned() {
        let mut generator = ScriptedGenerator::new();
        // counter: opening is 1, the root's children come from call 2
        let doomed = "Path 2.0 at depth 1".to_string();
        generator.fail_parents = vec![doomed.clone()];
        let graph = build(&mut generator, config(2, 2));

        let doomed_id = NodeId::for_story(&doomed);
        assert_eq!(graph.len(), 5);
        assert!(graph.children_of(&doomed_id).is_empty());
        assert!(!graph.node(&doomed_id).unwrap().is_terminal);

        let attempts: Vec<&NodeRequest> = generator
            .requests
            .iter()
            .filter(|r| r.parent_story.as_deref() == Some(doomed.as_str()))
            .collect();
        assert_eq!(attempts.len(), 2);
        assert!(!attempts[0].simplified);
        assert!(attempts[1].simplified);
    }

    #[test]
    fn test_retry_recovers() {
        let mut generator = ScriptedGenerator::new();
        generator.push(Scripted::Fail);
        let graph = build(&mut generator, config(1, 2));
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn test_opening_failure_falls_back() {
        let mut generator = ScriptedGenerator::new();
        generator.fail_next(2);
        let graph = build(&mut generator, config(1, 2));
        assert!(graph
            .root_node()
            .story
            .starts_with("Your story in the Fantasy world begins."));
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn test_zero_depth_is_root_only() {
        let mut generator = ScriptedGenerator::new();
        let graph = build(&mut generator, config(0, 2));
        assert_eq!(graph.len(), 1);
        assert!(!graph.root_node().is_terminal);
        assert_eq!(generator.requests.len(), 1);
    }

    #[test]
    fn test_branching_factor_is_clamped() {
        assert_eq!(config(2, 1).clamped().branching_factor, 2);
        assert_eq!(config(2, 9).clamped().branching_factor, 4);
        let mut generator = ScriptedGenerator::new();
        let graph = build(&mut generator, config(1, 0));
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn test_short_response_is_padded() {
        let mut generator = ScriptedGenerator::new();
        generator.choice_count = Some(1);
        let graph = build(&mut generator, config(1, 3));
        let children = graph.children_of(graph.root());
        assert_eq!(children.len(), 3);
        assert_eq!(graph.len(), 4);
        let filler = graph.node(&children[1]).unwrap();
        assert!(filler.story.starts_with(FILLER_TEXT));
        assert!(filler.consequences.is_empty());
        assert!(filler.is_terminal);
        assert_ne!(children[1], children[2]);
    }

    #[test]
    fn test_padded_tree_stays_a_bounded_tree() {
        let mut generator = ScriptedGenerator::new();
        generator.choice_count = Some(1);
        let graph = build(&mut generator, config(3, 2));

        assert_eq!(graph.len(), 15);
        let depths = graph.depths();
        for node in graph.nodes() {
            let parents = graph.parents_of(&node.id).count();
            let expected = if &node.id == graph.root() { 0 } else { 1 };
            assert_eq!(parents, expected, "node {} has {parents} parents", node.id);
        }
        for edge in graph.edges() {
            assert_eq!(depths[&edge.to], depths[&edge.from] + 1);
            if depths[&edge.to] == 3 {
                assert!(graph.node(&edge.to).unwrap().is_terminal);
            }
        }

        // always taking the filler still ends the story
        let mut current = graph.root().clone();
        for _ in 0..3 {
            let children = graph.children_of(&current);
            current = children.last().unwrap().clone();
        }
        assert!(graph.node(&current).unwrap().is_terminal);
        assert!(graph.children_of(&current).is_empty());
    }

    #[test]
    fn test_repeated_scene_is_not_relinked() {
        let mut generator = ScriptedGenerator::new();
        let opening = NodePayload {
            story: "A fork in the road.".into(),
            ..NodePayload::default()
        };
        generator
            .push(Scripted::Respond(opening))
            .push(Scripted::Respond(choices(&["Go left", "Go right"])))
            .push(Scripted::Respond(choices(&["Find a well", "Find a cave"])))
            .push(Scripted::Respond(choices(&["Find a well", "A fork in the road."])));
        let graph = build(&mut generator, config(2, 2));

        let left = NodeId::for_story("Go left");
        let right = NodeId::for_story("Go right");
        let well = NodeId::for_story("Find a well");
        assert_eq!(graph.children_of(&left).len(), 2);
        assert!(graph.children_of(&right).is_empty());
        assert_eq!(graph.parents_of(&well).collect::<Vec<_>>(), vec![&left]);
        assert_eq!(graph.parents_of(graph.root()).count(), 0);
        assert_eq!(graph.len(), 5);
    }

    #[test]
    fn test_first_child_is_backtrack_edge() {
        let mut generator = ScriptedGenerator::new();
        let graph = build(&mut generator, config(1, 2));
        let children = graph.children_of(graph.root()).to_vec();
        assert!(graph.is_backtrack(graph.root(), &children[0]));
        assert!(!graph.is_backtrack(graph.root(), &children[1]));
    }

    #[test]
    fn test_ending_response_closes_parent() {
        let mut generator = ScriptedGenerator::new();
        generator.push(Scripted::Respond(ScriptedGenerator::ending(
            EndingKind::Tragic,
            "the dragon wakes",
        )));
        // the scripted ending answers the opening request
        let graph = build(&mut generator, config(2, 2));
        assert_eq!(graph.len(), 1);
        assert!(graph.root_node().is_terminal);
        assert_eq!(graph.root_node().ending_kind, EndingKind::Tragic);
    }

    #[test]
    fn test_early_ending_choice_is_terminal() {
        let mut generator = ScriptedGenerator::new();
        let opening = {
            let arc = NarrativeArc::skeleton("Fantasy");
            generator.auto_payload(&NodeRequest::opening(&arc, 3))
        };
        let children = NodePayload {
            story: "A crossroads.".into(),
            choices: vec![
                ChoicePayload {
                    text: "Jump into the abyss".into(),
                    consequences: ChoiceConsequences::default(),
                    dialogue: None,
                    can_backtrack: false,
                    ending_kind: Some(EndingKind::Defeat),
                },
                ChoicePayload {
                    text: "Walk on".into(),
                    consequences: ChoiceConsequences::default(),
                    dialogue: Some("Onwards.".into()),
                    can_backtrack: false,
                    ending_kind: None,
                },
            ],
            ..NodePayload::default()
        };
        generator
            .push(Scripted::Respond(opening))
            .push(Scripted::Respond(children));
        let graph = build(&mut generator, config(3, 2));

        let abyss = graph.node(&NodeId::for_story("Jump into the abyss")).unwrap();
        assert!(abyss.is_terminal);
        assert_eq!(abyss.ending_kind, EndingKind::Defeat);
        assert!(graph.children_of(&abyss.id).is_empty());

        let walk = NodeId::for_story("Walk on");
        assert_eq!(graph.node(&walk).unwrap().dialogue.as_deref(), Some("Onwards."));
        assert_eq!(graph.children_of(&walk).len(), 2);
    }
}
