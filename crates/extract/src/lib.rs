//! Citation graph extraction for retrieved legal text.
//!
//! Pure and deterministic: the same context always yields the same graph.

pub mod graph;
pub mod patterns;
pub mod schema;

pub use graph::{extract, GraphBuilder};
pub use patterns::{scan_line, LineCitations};
pub use schema::{EntityKind, GraphEdge, GraphNode, KnowledgeGraph, Relation};
