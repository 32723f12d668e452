//! Unit tests for the hierarchy graph.

use super::*;
use crate::models::{Category, HierarchyLevel, SourceType, Summary};
use chrono::Utc;

fn edge(parent: Uuid, child: Uuid) -> SummaryRelationship {
    SummaryRelationship {
        parent_summary_id: parent,
        child_summary_id: child,
        relationship_type: RelationshipType::Aggregation,
    }
}

fn summary(id: Uuid, level: HierarchyLevel) -> Summary {
    Summary {
        id,
        summary_type: "test".to_string(),
        hierarchy_level: level,
        category: Some(Category::Zendesk),
        source_type: SourceType::RawData,
        source_ids: None,
        source_summary_ids: None,
        query_params: serde_json::json!({"id": id.to_string()}),
        date_range_start: None,
        date_range_end: None,
        summary: "text".to_string(),
        metadata: serde_json::json!({}),
        hash_signature: "sig".to_string(),
        last_generated_at: Utc::now(),
        last_verified_at: Utc::now(),
        is_valid: true,
    }
}

#[test]
fn add_edge_rejects_duplicates() {
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let mut graph = HierarchyGraph::default();
    graph
        .add_edge(a, b, RelationshipType::Aggregation)
        .expect("first edge");
    let err = graph
        .add_edge(a, b, RelationshipType::Aggregation)
        .expect_err("duplicate");
    assert!(matches!(err, Error::DuplicateEdge { .. }));
}

#[test]
fn add_edge_rejects_self_loop() {
    let a = Uuid::new_v4();
    let mut graph = HierarchyGraph::default();
    let err = graph
        .add_edge(a, a, RelationshipType::Aggregation)
        .expect_err("self loop");
    assert!(matches!(err, Error::CycleDetected(_)));
}

#[test]
fn add_edge_rejects_ancestor_cycle() {
    // a -> b -> c, then c -> a must fail and leave the graph unchanged.
    let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let mut graph = HierarchyGraph::default();
    graph
        .add_edge(a, b, RelationshipType::Aggregation)
        .expect("a -> b");
    graph
        .add_edge(b, c, RelationshipType::Aggregation)
        .expect("b -> c");

    let err = graph
        .add_edge(c, a, RelationshipType::Aggregation)
        .expect_err("cycle");
    assert!(matches!(err, Error::CycleDetected(_)));
    assert!(graph.children_of(c).is_empty());
    assert_eq!(graph.ancestors(a), Vec::<Uuid>::new());
}

#[test]
fn ancestors_walk_from_immediate_parent_to_root() {
    let (root, mid, leaf) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let graph = HierarchyGraph::from_edges(&[edge(root, mid), edge(mid, leaf)]);
    assert_eq!(graph.ancestors(leaf), vec![mid, root]);
}

#[test]
fn roots_are_summaries_without_parents() {
    let (root, mid, leaf) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let graph = HierarchyGraph::from_edges(&[edge(root, mid), edge(mid, leaf)]);
    let ids = [root, mid, leaf];
    assert_eq!(graph.roots(ids.iter()), vec![root]);
}

#[test]
fn materialize_tree_groups_children_by_relationship_type() {
    let root = Uuid::new_v4();
    let (agg, period) = (Uuid::new_v4(), Uuid::new_v4());
    let summaries = vec![
        summary(root, HierarchyLevel::Global),
        summary(agg, HierarchyLevel::Group),
        summary(period, HierarchyLevel::Group),
    ];
    let edges = vec![
        SummaryRelationship {
            parent_summary_id: root,
            child_summary_id: agg,
            relationship_type: RelationshipType::Aggregation,
        },
        SummaryRelationship {
            parent_summary_id: root,
            child_summary_id: period,
            relationship_type: RelationshipType::TimePeriod,
        },
    ];

    let forest = materialize_tree(&summaries, &edges, &TreeFilter::default());
    assert_eq!(forest.len(), 1);
    let node = &forest[0];
    assert_eq!(node.summary.id, root);
    assert_eq!(node.children.len(), 2);
    assert_eq!(
        node.children[0].relationship_type,
        RelationshipType::Aggregation
    );
    assert_eq!(
        node.children[1].relationship_type,
        RelationshipType::TimePeriod
    );
}

#[test]
fn materialize_tree_filters_roots() {
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let summaries = vec![
        summary(a, HierarchyLevel::Group),
        summary(b, HierarchyLevel::Individual),
    ];

    let filter = TreeFilter {
        hierarchy_level: Some(HierarchyLevel::Group),
        category: None,
    };
    let forest = materialize_tree(&summaries, &[], &filter);
    assert_eq!(forest.len(), 1);
    assert_eq!(forest[0].summary.id, a);
}

#[test]
fn materialize_tree_is_restartable() {
    let (parent, child) = (Uuid::new_v4(), Uuid::new_v4());
    let summaries = vec![
        summary(parent, HierarchyLevel::Group),
        summary(child, HierarchyLevel::Individual),
    ];
    let edges = vec![edge(parent, child)];

    let first = materialize_tree(&summaries, &edges, &TreeFilter::default());
    let second = materialize_tree(&summaries, &edges, &TreeFilter::default());
    assert_eq!(first.len(), second.len());
    assert_eq!(first[0].summary.id, second[0].summary.id);
    assert_eq!(first[0].children.len(), second[0].children.len());
}
