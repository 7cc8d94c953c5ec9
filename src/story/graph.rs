use std::collections::{BTreeSet, HashMap, HashSet};

use log::{debug, warn};

use crate::error::EngineError;
use crate::story::node::{Node, NodeId};

/// A directed choice edge between two stored nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub backtrack: bool,
}

/// The story graph: a dedup store of nodes plus adjacency bookkeeping.
///
/// Pre-generated content forms a tree, but dynamic expansion may attach an
/// existing node to a new parent, so callers must not assume each node has at
/// most one parent.
#[derive(Debug, Clone)]
pub struct StoryGraph {
    nodes: HashMap<NodeId, Node>,
    children: HashMap<NodeId, Vec<NodeId>>,
    parents: HashMap<NodeId, BTreeSet<NodeId>>,
    backtrack: HashSet<(NodeId, NodeId)>,
    /// Insertion order, so iteration and saves are deterministic.
    order: Vec<NodeId>,
    root: NodeId,
}

impl StoryGraph {
    /// Create a graph rooted at `root`.
    pub fn new(root: Node) -> Self {
        let root_id = root.id.clone();
        let mut graph = Self {
            nodes: HashMap::new(),
            children: HashMap::new(),
            parents: HashMap::new(),
            backtrack: HashSet::new(),
            order: Vec::new(),
            root: root_id,
        };
        graph.add_node(root);
        graph
    }

    pub fn root(&self) -> &NodeId {
        &self.root
    }

    pub fn root_node(&self) -> &Node {
        // The root is inserted in `new` and nodes are never removed.
        &self.nodes[&self.root]
    }

    /// Insert a node unless one with the same id is already stored.
    ///
    /// Returns `true` if the node was new. A duplicate is not an error: this is
    /// how identical content is deduplicated.
    pub fn add_node(&mut self, node: Node) -> bool {
        if self.nodes.contains_key(&node.id) {
            debug!("Node {} already present, keeping existing", node.id.short());
            return false;
        }
        self.order.push(node.id.clone());
        self.nodes.insert(node.id.clone(), node);
        true
    }

    /// Record `child` under `parent`. Both ids must already be stored.
    pub fn add_edge(&mut self, parent: &NodeId, child: &NodeId) -> Result<(), EngineError> {
        self.add_edge_with(parent, child, false)
    }

    /// Like [`add_edge`](Self::add_edge), also recording whether the edge allows backtracking.
    ///
    /// Re-adding an existing edge is a no-op. Self-edges are skipped with a warning.
    pub fn add_edge_with(
        &mut self,
        parent: &NodeId,
        child: &NodeId,
        backtrack: bool,
    ) -> Result<(), EngineError> {
        if !self.nodes.contains_key(parent) || !self.nodes.contains_key(child) {
            return Err(EngineError::MissingNode {
                from: parent.clone(),
                to: child.clone(),
            });
        }
        if parent == child {
            warn!("Refusing self-edge on node {}", parent.short());
            return Ok(());
        }

        let siblings = self.children.entry(parent.clone()).or_default();
        if siblings.contains(child) {
            return Ok(());
        }
        siblings.push(child.clone());
        self.parents
            .entry(child.clone())
            .or_default()
            .insert(parent.clone());
        if backtrack {
            self.backtrack.insert((parent.clone(), child.clone()));
        }
        Ok(())
    }

    /// Ordered children of `id`. Empty when none have been generated yet,
    /// which is not the same as the node being terminal.
    pub fn children_of(&self, id: &NodeId) -> &[NodeId] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn parents_of(&self, id: &NodeId) -> impl Iterator<Item = &NodeId> {
        self.parents.get(id).into_iter().flatten()
    }

    /// Whether `candidate` is `id` itself or lies on some path from the root to `id`.
    pub fn is_ancestor(&self, candidate: &NodeId, id: &NodeId) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if next == candidate {
                return true;
            }
            if seen.insert(next) {
                stack.extend(self.parents_of(next));
            }
        }
        false
    }

    pub fn is_backtrack(&self, parent: &NodeId, child: &NodeId) -> bool {
        self.backtrack.contains(&(parent.clone(), child.clone()))
    }

    pub fn get(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    /// Like [`get`](Self::get), but an absent id is an explicit error.
    pub fn node(&self, id: &NodeId) -> Result<&Node, EngineError> {
        self.nodes
            .get(id)
            .ok_or_else(|| EngineError::NodeNotFound(id.clone()))
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    /// All edges, grouped by parent in insertion order.
    pub fn edges(&self) -> Vec<Edge> {
        self.order
            .iter()
            .flat_map(|from| {
                self.children_of(from).iter().map(move |to| Edge {
                    from: from.clone(),
                    to: to.clone(),
                    backtrack: self.is_backtrack(from, to),
                })
            })
            .collect()
    }

    /// Depth of every node reachable from the root (shortest path).
    pub fn depths(&self) -> HashMap<NodeId, usize> {
        let mut depths = HashMap::new();
        let mut queue = std::collections::VecDeque::new();
        depths.insert(self.root.clone(), 0);
        queue.push_back(self.root.clone());
        while let Some(id) = queue.pop_front() {
            let depth = depths[&id];
            for child in self.children_of(&id) {
                if !depths.contains_key(child) {
                    depths.insert(child.clone(), depth + 1);
                    queue.push_back(child.clone());
                }
            }
        }
        depths
    }

    /// Nodes with no children, terminal or not.
    pub fn leaves(&self) -> impl Iterator<Item = &Node> {
        self.nodes().filter(|n| self.children_of(&n.id).is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::story::node::EndingKind;

    fn graph_with(stories: &[&str]) -> (StoryGraph, Vec<NodeId>) {
        let mut nodes = stories.iter().map(|s| Node::new(*s));
        let root = nodes.next().unwrap();
        let mut ids = vec![root.id.clone()];
        let mut graph = StoryGraph::new(root);
        for node in nodes {
            ids.push(node.id.clone());
            graph.add_node(node);
        }
        (graph, ids)
    }

    #[test]
    fn test_add_node_dedups_by_id() {
        let (mut graph, _) = graph_with(&["Once upon a time..."]);
        assert!(graph.add_node(Node::new("There was a princess...")));
        assert!(!graph.add_node(Node::new("There was a princess...").terminal(EndingKind::Tragic)));
        assert_eq!(graph.len(), 2);
        let id = NodeId::for_story("There was a princess...");
        assert!(!graph.get(&id).unwrap().is_terminal);
    }

    #[test]
    fn test_edges_keep_order_and_parents() {
        let (mut graph, ids) = graph_with(&["root", "left", "right"]);
        graph.add_edge_with(&ids[0], &ids[1], true).unwrap();
        graph.add_edge(&ids[0], &ids[2]).unwrap();
        graph.add_edge(&ids[0], &ids[2]).unwrap();

        assert_eq!(graph.children_of(&ids[0]), &[ids[1].clone(), ids[2].clone()]);
        assert_eq!(graph.parents_of(&ids[2]).collect::<Vec<_>>(), vec![&ids[0]]);
        assert!(graph.is_backtrack(&ids[0], &ids[1]));
        assert!(!graph.is_backtrack(&ids[0], &ids[2]));
        assert_eq!(graph.edges().len(), 2);
    }

    #[test]
    fn test_edge_to_missing_node_is_refused() {
        let (mut graph, ids) = graph_with(&["root"]);
        let ghost = NodeId::for_story("ghost");
        let err = graph.add_edge(&ids[0], &ghost).unwrap_err();
        assert!(matches!(err, EngineError::MissingNode { .. }));
        assert!(graph.children_of(&ids[0]).is_empty());
    }

    #[test]
    fn test_absent_lookup_is_explicit() {
        let (graph, _) = graph_with(&["root"]);
        let ghost = NodeId::for_story("ghost");
        assert!(graph.get(&ghost).is_none());
        assert!(graph.children_of(&ghost).is_empty());
        assert!(matches!(graph.node(&ghost), Err(EngineError::NodeNotFound(_))));
    }

    #[test]
    fn test_shared_child_makes_a_dag() {
        let (mut graph, ids) = graph_with(&["root", "a", "b", "shared"]);
        graph.add_edge(&ids[0], &ids[1]).unwrap();
        graph.add_edge(&ids[0], &ids[2]).unwrap();
        graph.add_edge(&ids[1], &ids[3]).unwrap();
        graph.add_edge(&ids[2], &ids[3]).unwrap();
        assert_eq!(graph.parents_of(&ids[3]).count(), 2);
        assert_eq!(graph.depths()[&ids[3]], 2);
        assert_eq!(graph.leaves().count(), 1);
    }

    #[test]
    fn test_is_ancestor_follows_every_parent() {
        let (mut graph, ids) = graph_with(&["root", "left", "right", "shared", "stray"]);
        graph.add_edge(&ids[0], &ids[1]).unwrap();
        graph.add_edge(&ids[0], &ids[2]).unwrap();
        graph.add_edge(&ids[1], &ids[3]).unwrap();
        graph.add_edge(&ids[2], &ids[3]).unwrap();

        assert!(graph.is_ancestor(&ids[3], &ids[3]));
        assert!(graph.is_ancestor(&ids[0], &ids[3]));
        assert!(graph.is_ancestor(&ids[2], &ids[3]));
        assert!(!graph.is_ancestor(&ids[3], &ids[0]));
        assert!(!graph.is_ancestor(&ids[4], &ids[3]));
    }

    #[test]
    fn test_self_edge_is_skipped() {
        let (mut graph, ids) = graph_with(&["root"]);
        graph.add_edge(&ids[0], &ids[0]).unwrap();
        assert!(graph.children_of(&ids[0]).is_empty());
    }
}
