use indexmap::IndexMap;

use crate::patterns::{scan_line, LineCitations};
use crate::schema::{EntityKind, GraphEdge, GraphNode, KnowledgeGraph, Relation};

/// Accumulates nodes and edges with implicit deduplication.
///
/// Nodes are keyed by id and edges by `(source, target)`. Re-inserting a key
/// keeps its original position and overwrites the value, so output order is
/// first-discovered while the last write decides the type or relation.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: IndexMap<String, EntityKind>,
    edges: IndexMap<(String, String), Relation>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: &str, kind: EntityKind) {
        self.nodes.insert(id.to_string(), kind);
    }

    pub fn add_edge(&mut self, source: &str, target: &str, relation: Relation) {
        self.edges
            .insert((source.to_string(), target.to_string()), relation);
    }

    /// Snapshot into an immutable graph.
    pub fn build(self) -> KnowledgeGraph {
        KnowledgeGraph {
            nodes: self
                .nodes
                .into_iter()
                .map(|(id, kind)| GraphNode { id, kind })
                .collect(),
            edges: self
                .edges
                .into_iter()
                .map(|((source, target), relation)| GraphEdge {
                    source,
                    target,
                    relation,
                })
                .collect(),
        }
    }
}

/// Build the citation graph for a block of retrieved context.
pub fn extract(context: &str) -> KnowledgeGraph {
    let lines: Vec<LineCitations<'_>> = context.split('\n').map(scan_line).collect();
    let mut builder = GraphBuilder::new();

    for line in &lines {
        for act in &line.acts {
            builder.add_node(act, EntityKind::Act);
        }
        for section in &line.sections {
            builder.add_node(section, EntityKind::Section);
        }
    }

    for (i, line) in lines.iter().enumerate() {
        link(&mut builder, &line.acts, &line.sections, Relation::BelongsTo);

        if i > 0 {
            link(&mut builder, &lines[i - 1].acts, &line.sections, Relation::Related);
        }
    }

    builder.build()
}

fn link(builder: &mut GraphBuilder, acts: &[&str], sections: &[&str], relation: Relation) {
    for act in acts {
        for section in sections {
            builder.add_edge(act, section, relation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(graph: &KnowledgeGraph) -> Vec<&str> {
        graph.nodes.iter().map(|n| n.id.as_str()).collect()
    }

    #[test]
    fn test_same_line_pair_only() {
        let graph = extract("The Theft Act covers Section 379\nThe Fraud Act applies");

        assert_eq!(ids(&graph), vec!["Theft Act", "Section 379", "Fraud Act"]);
        assert_eq!(graph.edges.len(), 1);

        let edge = graph.edge("Theft Act", "Section 379").unwrap();
        assert_eq!(edge.relation, Relation::BelongsTo);
        assert!(graph.edges.iter().all(|e| e.source != "Fraud Act"));
    }

    #[test]
    fn test_adjacent_line_relation() {
        let graph = extract("The Fraud Act applies\npunishable under Section 420");

        assert_eq!(graph.edges.len(), 1);
        assert_eq!(
            graph.edge("Fraud Act", "Section 420").unwrap().relation,
            Relation::Related
        );
    }

    #[test]
    fn test_edges_point_from_act_in_discovery_order() {
        // Section 379 is registered before the Act that cites it
        let graph = extract("Section 302 of the Penal Act\nSection 379\nTheft Act, Section 379");

        let pairs: Vec<_> = graph
            .edges
            .iter()
            .map(|e| (e.source.as_str(), e.target.as_str(), e.relation))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("Penal Act", "Section 302", Relation::BelongsTo),
                ("Penal Act", "Section 379", Relation::Related),
                ("Theft Act", "Section 379", Relation::BelongsTo),
            ]
        );
    }

    #[test]
    fn test_adjacency_skips_a_blank_line() {
        let graph = extract("The Fraud Act applies\n\nSection 420");
        assert!(graph.edges.is_empty());
        assert_eq!(graph.nodes.len(), 2);
    }

    #[test]
    fn test_cross_product_on_one_line() {
        let graph = extract("Companies Act and Contract Act, see Section 10 and Section 11");

        assert_eq!(graph.edges_with(Relation::BelongsTo).count(), 4);
        assert_eq!(graph.edges_with(Relation::Related).count(), 0);
    }

    #[test]
    fn test_duplicate_pairs_collapse() {
        let graph = extract("Theft Act Section 5\nTheft Act again, Section 5");

        // line 0 and line 1 write the same pair; line 1's adjacency pass writes it last
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(
            graph.edge("Theft Act", "Section 5").unwrap().relation,
            Relation::Related
        );
        assert_eq!(ids(&graph), vec!["Theft Act", "Section 5"]);
    }

    #[test]
    fn test_related_overrides_belongs_to_in_place() {
        let graph = extract("Evidence Act\nEvidence Act Section 65\nSection 66");

        let relations: Vec<_> = graph
            .edges
            .iter()
            .map(|e| (e.source.as_str(), e.target.as_str(), e.relation))
            .collect();
        assert_eq!(
            relations,
            vec![
                ("Evidence Act", "Section 65", Relation::Related),
                ("Evidence Act", "Section 66", Relation::Related),
            ]
        );
    }

    #[test]
    fn test_no_edges_between_same_kind() {
        let graph = extract(
            "Theft Act, Fraud Act\nSection 1 Section 2\nArms Act Section 25 Section 27\nSection 3",
        );

        for edge in &graph.edges {
            let source = graph.node(&edge.source).unwrap();
            let target = graph.node(&edge.target).unwrap();
            assert_eq!(source.kind, EntityKind::Act);
            assert_eq!(target.kind, EntityKind::Section);
        }
    }

    #[test]
    fn test_deterministic_output() {
        let context = "Arms Act Section 25\nSection 27 of the Arms Act\nNDPS Act\nSection 20";
        let first = serde_json::to_string(&extract(context)).unwrap();

        for _ in 0..10 {
            assert_eq!(serde_json::to_string(&extract(context)).unwrap(), first);
        }
    }

    #[test]
    fn test_wire_shape() {
        let graph = extract("Theft Act Section 379");
        let json = serde_json::to_value(&graph).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "nodes": [
                    {"id": "Theft Act", "type": "Act"},
                    {"id": "Section 379", "type": "Section"}
                ],
                "edges": [
                    {"source": "Theft Act", "target": "Section 379", "relation": "belongs_to"}
                ]
            })
        );
    }

    #[test]
    fn test_empty_context() {
        let graph = extract("");
        assert!(graph.is_empty());
    }

    #[test]
    fn test_last_kind_wins_for_a_reused_id() {
        let mut builder = GraphBuilder::new();
        builder.add_node("Section 420", EntityKind::Section);
        builder.add_node("Fraud Act", EntityKind::Act);
        builder.add_node("Section 420", EntityKind::Act);

        let graph = builder.build();
        assert_eq!(ids(&graph), vec!["Section 420", "Fraud Act"]);
        assert_eq!(graph.nodes[0].kind, EntityKind::Act);
    }
}
