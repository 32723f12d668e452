//! In-memory hierarchy graph over summary relationship edges.
//!
//! The roll-up hierarchy (individual -> group -> global) is a DAG. Cycle
//! detection and traversal run over an explicit adjacency structure loaded
//! from the relationships table, never as a recursive query, so depth limits
//! stay under application control.

use std::collections::{HashMap, HashSet, VecDeque};

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{ChildGroup, RelationshipType, Summary, SummaryNode, SummaryRelationship};

/// Hard cap on traversal depth. The acyclicity invariant already guarantees
/// termination; this bounds damage if the store is corrupted out-of-band.
pub const MAX_DEPTH: usize = 32;

/// Directed adjacency over summary ids. Edges point parent -> child.
#[derive(Debug, Default)]
pub struct HierarchyGraph {
    children: HashMap<Uuid, Vec<(Uuid, RelationshipType)>>,
    parents: HashMap<Uuid, Vec<(Uuid, RelationshipType)>>,
}

impl HierarchyGraph {
    /// Build a graph from a set of relationship edges.
    pub fn from_edges(edges: &[SummaryRelationship]) -> Self {
        let mut graph = Self::default();
        for edge in edges {
            graph
                .children
                .entry(edge.parent_summary_id)
                .or_default()
                .push((edge.child_summary_id, edge.relationship_type));
            graph
                .parents
                .entry(edge.child_summary_id)
                .or_default()
                .push((edge.parent_summary_id, edge.relationship_type));
        }
        graph
    }

    /// Whether an edge `parent -> child` already exists.
    pub fn has_edge(&self, parent: Uuid, child: Uuid) -> bool {
        self.children
            .get(&parent)
            .is_some_and(|kids| kids.iter().any(|(id, _)| *id == child))
    }

    /// Whether adding `parent -> child` would close a cycle, i.e. whether
    /// `parent` is reachable from `child` by following child edges.
    pub fn would_cycle(&self, parent: Uuid, child: Uuid) -> bool {
        if parent == child {
            return true;
        }
        let mut seen = HashSet::new();
        let mut stack = vec![child];
        while let Some(node) = stack.pop() {
            if node == parent {
                return true;
            }
            if !seen.insert(node) {
                continue;
            }
            if let Some(kids) = self.children.get(&node) {
                stack.extend(kids.iter().map(|(id, _)| *id));
            }
        }
        false
    }

    /// Add an edge, rejecting duplicates and cycles. The graph is left
    /// unchanged on failure.
    pub fn add_edge(
        &mut self,
        parent: Uuid,
        child: Uuid,
        relationship_type: RelationshipType,
    ) -> Result<()> {
        if self.has_edge(parent, child) {
            return Err(Error::DuplicateEdge { parent, child });
        }
        if self.would_cycle(parent, child) {
            return Err(Error::CycleDetected(format!(
                "edge {parent} -> {child} would make {parent} its own ancestor"
            )));
        }
        self.children
            .entry(parent)
            .or_default()
            .push((child, relationship_type));
        self.parents
            .entry(child)
            .or_default()
            .push((parent, relationship_type));
        Ok(())
    }

    /// Direct children of a summary.
    pub fn children_of(&self, parent: Uuid) -> Vec<(Uuid, RelationshipType)> {
        self.children.get(&parent).cloned().unwrap_or_default()
    }

    /// Ancestors of a summary, breadth-first from immediate parents to roots.
    pub fn ancestors(&self, child: Uuid) -> Vec<Uuid> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut queue: VecDeque<Uuid> = VecDeque::new();
        queue.push_back(child);
        seen.insert(child);
        while let Some(node) = queue.pop_front() {
            if let Some(parents) = self.parents.get(&node) {
                for (parent, _) in parents {
                    if seen.insert(*parent) {
                        out.push(*parent);
                        queue.push_back(*parent);
                    }
                }
            }
        }
        out
    }

    /// Summary ids that have no parent edge (tree roots).
    pub fn roots<'a>(&self, ids: impl Iterator<Item = &'a Uuid>) -> Vec<Uuid> {
        ids.filter(|id| !self.parents.contains_key(id))
            .copied()
            .collect()
    }
}

/// Filter applied to the root set when materializing a hierarchy tree.
#[derive(Debug, Clone, Default)]
pub struct TreeFilter {
    pub hierarchy_level: Option<crate::models::HierarchyLevel>,
    pub category: Option<crate::models::Category>,
}

impl TreeFilter {
    fn matches(&self, summary: &Summary) -> bool {
        if let Some(level) = self.hierarchy_level {
            if summary.hierarchy_level != level {
                return false;
            }
        }
        if let Some(category) = self.category {
            if summary.category != Some(category) {
                return false;
            }
        }
        true
    }
}

/// Materialize the hierarchy as a forest of trees, children grouped by
/// relationship type. Holds no iterator state; every call traverses from
/// scratch.
pub fn materialize_tree(
    summaries: &[Summary],
    edges: &[SummaryRelationship],
    filter: &TreeFilter,
) -> Vec<SummaryNode> {
    let graph = HierarchyGraph::from_edges(edges);
    let by_id: HashMap<Uuid, &Summary> = summaries.iter().map(|s| (s.id, s)).collect();

    let mut roots = graph.roots(by_id.keys());
    // Summaries without any edge are roots too, but only filtered ones render.
    roots.retain(|id| by_id.get(id).is_some_and(|s| filter.matches(s)));
    // Most recently generated roots first, ties broken by id.
    roots.sort_by(|a, b| {
        let ka = by_id.get(a).map(|s| s.last_generated_at);
        let kb = by_id.get(b).map(|s| s.last_generated_at);
        kb.cmp(&ka).then_with(|| a.cmp(b))
    });

    roots
        .into_iter()
        .filter_map(|id| build_node(id, &graph, &by_id, 0))
        .collect()
}

fn build_node(
    id: Uuid,
    graph: &HierarchyGraph,
    by_id: &HashMap<Uuid, &Summary>,
    depth: usize,
) -> Option<SummaryNode> {
    if depth >= MAX_DEPTH {
        tracing::warn!("hierarchy traversal depth limit hit at summary {id}");
        return None;
    }
    let summary = (*by_id.get(&id)?).clone();

    let mut grouped: HashMap<RelationshipType, Vec<SummaryNode>> = HashMap::new();
    let mut kids = graph.children_of(id);
    kids.sort_by_key(|(child, _)| *child);
    for (child, relationship_type) in kids {
        if let Some(node) = build_node(child, graph, by_id, depth + 1) {
            grouped.entry(relationship_type).or_default().push(node);
        }
    }

    let mut children: Vec<ChildGroup> = grouped
        .into_iter()
        .map(|(relationship_type, nodes)| ChildGroup {
            relationship_type,
            nodes,
        })
        .collect();
    children.sort_by_key(|group| group.relationship_type);

    Some(SummaryNode { summary, children })
}

#[cfg(test)]
#[path = "hierarchy_tests.rs"]
mod tests;
