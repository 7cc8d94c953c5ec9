use log::{debug, info, warn};

use crate::builder::{child_from_choice, declares_ending, MAX_BRANCHING, MIN_BRANCHING};
use crate::generate::{validate_choices, ContentGenerator, NodePayload, NodeRequest, PlayerSnapshot};
use crate::story::{
    path_label, CharacterState, EndingKind, NarrativeArc, NodeId, StoryGraph, PLAYER_KEY,
};

/// What the session knows when it hits a frontier.
#[derive(Debug, Clone)]
pub struct FrontierContext {
    pub current: NodeId,
    /// `visited.len() - 1`; may exceed the planned depth.
    pub depth: usize,
    pub max_depth: usize,
    pub health: i32,
    pub inventory: Vec<String>,
    /// Story text of the last few visited nodes, oldest first.
    pub recent_events: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expansion {
    /// New children are attached; these are the current node's children now.
    Expanded(Vec<NodeId>),
    /// The generator chose to end the story at the current node.
    Ended { kind: EndingKind, reason: String },
    /// Nothing usable came back. The caller must force an ending.
    Failed,
}

/// Grows the graph at play time when the player reaches a frontier.
pub struct FrontierExpander<G> {
    generator: G,
    arc: NarrativeArc,
    branching_factor: usize,
}

impl<G: ContentGenerator> FrontierExpander<G> {
    pub fn new(generator: G, arc: NarrativeArc, branching_factor: usize) -> Self {
        Self {
            generator,
            arc: arc.normalized(),
            branching_factor: branching_factor.clamp(MIN_BRANCHING, MAX_BRANCHING),
        }
    }

    pub fn arc(&self) -> &NarrativeArc {
        &self.arc
    }

    pub fn branching_factor(&self) -> usize {
        self.branching_factor
    }

    pub fn expand(&mut self, graph: &mut StoryGraph, ctx: &FrontierContext) -> Expansion {
        let Some(current) = graph.get(&ctx.current) else {
            warn!("Frontier node {} is not in the graph", ctx.current.short());
            return Expansion::Failed;
        };
        let existing = graph.children_of(&ctx.current);
        if !existing.is_empty() {
            debug!("Node {} already has children", ctx.current.short());
            return Expansion::Expanded(existing.to_vec());
        }

        info!(
            "Reached the frontier at node {} (depth {}), generating new paths",
            ctx.current.short(),
            ctx.depth
        );

        let mut request = NodeRequest::continuation(
            &self.arc,
            current,
            ctx.depth,
            ctx.max_depth,
            self.branching_factor,
        );
        request.player = Some(PlayerSnapshot {
            health: ctx.health,
            inventory: ctx.inventory.clone(),
        });
        request.recent_events = ctx.recent_events.clone();

        let Some(payload) = self.request_with_retry(&request) else {
            return Expansion::Failed;
        };

        if payload.choices.is_empty() {
            let kind = payload.ending_kind.unwrap_or_default().or_neutral();
            let reason = payload
                .ending_reason
                .clone()
                .unwrap_or_else(|| kind.default_reason().to_string());
            if let Some(node) = graph.get_mut(&ctx.current) {
                node.force_ending(kind, reason.clone());
            }
            info!("Generator ended the story at node {}", ctx.current.short());
            return Expansion::Ended { kind, reason };
        }

        let label = payload
            .story_path
            .clone()
            .unwrap_or_else(|| path_label(&request.stage, request.progression));
        let mirror = CharacterState::player(ctx.health, &ctx.inventory);

        let parent_story = request.parent_story.as_deref().unwrap_or_default();
        for (slot, choice) in payload.choices.iter().enumerate() {
            let mut child = child_from_choice(
                choice,
                slot,
                &payload,
                (&ctx.current, parent_story),
                &label,
                declares_ending(choice, &payload),
            );
            child
                .characters
                .insert(PLAYER_KEY.to_string(), mirror.clone());
            let child_id = child.id.clone();
            // No edge back into the current node's own ancestry.
            if graph.is_ancestor(&child_id, &ctx.current) {
                warn!(
                    "Choice {} leads back to earlier scene {}, skipping",
                    slot + 1,
                    child_id.short()
                );
                continue;
            }
            graph.add_node(child);
            if let Err(e) = graph.add_edge_with(&ctx.current, &child_id, choice.can_backtrack) {
                warn!("Could not attach dynamic child: {e}");
            }
        }

        let children = graph.children_of(&ctx.current).to_vec();
        if children.is_empty() {
            warn!("No usable children for node {}", ctx.current.short());
            return Expansion::Failed;
        }
        info!(
            "Expanded node {} with {} new paths",
            ctx.current.short(),
            children.len()
        );
        Expansion::Expanded(children)
    }

    fn request_with_retry(&mut self, request: &NodeRequest) -> Option<NodePayload> {
        for (attempt, req) in [request.clone(), request.simplified()].iter().enumerate() {
            match self
                .generator
                .generate_node(req)
                .and_then(|payload| validate_choices(payload, self.branching_factor))
            {
                Ok(payload) => return Some(payload),
                Err(e) => warn!("Dynamic generation attempt {} failed: {e}", attempt + 1),
            }
        }
        None
    }
}
