//! A dynamic R-tree spatial index expressed as vertices and typed edges in a host
//! property graph.
//!
//! The index itself (envelope algebra, `chooseSubtree`, quadratic split, underflow
//! handling, traversal, search, dynamic predicate views) lives in this crate; the host
//! property-graph engine, geometry decoding, and CQL/JSON predicate parsing are
//! external collaborators reached only through the capability traits in
//! [`graph::GraphStore`] and [`encoder::GeometryEncoder`].
//!
//! [`memgraph::MemGraph`] is an in-memory reference `GraphStore` so this crate is
//! usable and testable standalone; a production host graph is a drop-in replacement
//! that implements the same trait.

pub mod delete;
pub mod dynamic;
pub mod encoder;
pub mod envelope;
pub mod error;
pub mod graph;
pub mod insert;
pub mod layer;
pub mod listener;
pub mod memgraph;
pub mod search;
pub mod store;
pub mod visitor;

pub use encoder::GeometryEncoder;
pub use envelope::Envelope;
pub use error::Error;
pub use graph::{EdgeKind, GraphStore, GraphTxn, PropertyValue};
pub use layer::Layer;
pub use listener::{Listener, NullListener};
pub use store::TreeStoreConfig;
