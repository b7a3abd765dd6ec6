//! Traversal / visitor protocol (C6): a capability pair, `needs_to_visit` and
//! `on_index_reference`, instead of an abstract base class with template methods. The
//! dynamic layer (C8) and the search façade (C7) both compose by wrapping a `Visitor`,
//! not by subclassing a traversal class.

use crate::envelope::Envelope;
use crate::error::Error;
use crate::graph::{EdgeKind, GraphStore};
use crate::insert::{bbox, is_leaf};
use crate::store::TreeStore;

/// The hook points a depth-first descent calls at each index vertex and each leaf
/// reference (§4.5, §9's "inheritance -> capability sets" note).
pub trait Visitor<G: GraphStore> {
    /// Whether the subtree rooted at an index vertex with bbox `node_bbox` is worth
    /// descending into at all. Returning `false` prunes the whole subtree.
    fn needs_to_visit(&mut self, node_bbox: Envelope) -> bool;

    /// Called once per `REFERENCE` edge reached during the descent, after
    /// `needs_to_visit` accepted the leaf that holds it. Returning `false` stops the
    /// traversal early.
    fn on_index_reference(&mut self, geom: G::VertexId, geom_bbox: Envelope) -> bool;
}

/// Depth-first traversal from `start` (normally a layer's root), calling `visitor`'s
/// hooks as it goes. Returns `Ok(())` whether the traversal ran to completion or was
/// stopped early by `on_index_reference` returning `false`; early stop is not an error.
pub fn walk<G: GraphStore, V: Visitor<G>>(
    store: &G,
    _tree: &TreeStore<G>,
    start: G::VertexId,
    visitor: &mut V,
) -> Result<(), Error<G::StoreError>> {
    walk_inner(store, start, visitor);
    Ok(())
}

fn walk_inner<G: GraphStore, V: Visitor<G>>(store: &G, v: G::VertexId, visitor: &mut V) -> bool {
    if !visitor.needs_to_visit(bbox(store, v)) {
        return true;
    }

    if is_leaf(store, v) {
        for g in store.iterate_out(v, EdgeKind::Reference) {
            let geom_bbox = bbox(store, g);
            if !visitor.on_index_reference(g, geom_bbox) {
                return false;
            }
        }
        return true;
    }

    for child in store.iterate_out(v, EdgeKind::Child) {
        if !walk_inner(store, child, visitor) {
            return false;
        }
    }
    true
}

/// A `Visitor` that counts how many references it sees, pruning nothing.
/// `needs_to_visit` always returns `true`; a counting visitor has no bbox to prune against.
pub struct RecordCounter {
    pub count: u64,
}

impl RecordCounter {
    pub fn new() -> Self {
        Self { count: 0 }
    }
}

impl Default for RecordCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl<G: GraphStore> Visitor<G> for RecordCounter {
    fn needs_to_visit(&mut self, _node_bbox: Envelope) -> bool {
        true
    }

    fn on_index_reference(&mut self, _geom: G::VertexId, _geom_bbox: Envelope) -> bool {
        self.count += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::GeometryEncoder;
    use crate::graph::{self, GraphTxn};
    use crate::insert::add;
    use crate::memgraph::MemGraph;
    use crate::store::TreeStoreConfig;
    use geo::{Geometry, Rect};

    struct RectEncoder;

    impl GeometryEncoder<MemGraph> for RectEncoder {
        fn decode_envelope(&self, store: &MemGraph, geom: <MemGraph as GraphStore>::VertexId) -> Envelope {
            bbox(store, geom)
        }

        fn decode_geometry(&self, store: &MemGraph, geom: <MemGraph as GraphStore>::VertexId) -> Geometry<f64> {
            let b = bbox(store, geom);
            Geometry::Rect(Rect::new((b.xmin, b.ymin), (b.xmax, b.ymax)))
        }

        fn encode_geometry(
            &self,
            store: &MemGraph,
            txn: &mut <MemGraph as GraphStore>::Txn,
            target: <MemGraph as GraphStore>::VertexId,
            geometry: &Geometry<f64>,
        ) {
            let env = crate::encoder::envelope_of_geometry(geometry);
            graph::write_bbox(store, txn, target, env);
        }
    }

    fn make_geom(store: &MemGraph, txn: &mut <MemGraph as GraphStore>::Txn, env: Envelope) -> <MemGraph as GraphStore>::VertexId {
        let g = store.create_vertex(txn);
        graph::write_bbox(store, txn, g, env);
        g
    }

    #[test]
    fn record_counter_matches_tree_count() {
        let store = MemGraph::new();
        let mut txn = store.begin();
        let tree = TreeStore::create(&store, &mut txn, "layer", TreeStoreConfig::new(1, 4));
        let encoder = RectEncoder;

        for i in 0..10 {
            let x = i as f64;
            let g = make_geom(&store, &mut txn, Envelope::new(x, x + 0.5, x, x + 0.5));
            add(&store, &mut txn, &tree, &encoder, g).unwrap();
        }

        let root = tree.root(&store, &mut txn);
        let mut counter = RecordCounter::new();
        walk(&store, &tree, root, &mut counter).unwrap();

        let expected = tree.count(&store, &mut txn).unwrap();
        txn.success();
        store.finish(txn).unwrap();

        assert_eq!(counter.count, expected);
    }

    struct StopAfterOne {
        seen: u32,
    }

    impl<G: GraphStore> Visitor<G> for StopAfterOne {
        fn needs_to_visit(&mut self, _node_bbox: Envelope) -> bool {
            true
        }

        fn on_index_reference(&mut self, _geom: G::VertexId, _geom_bbox: Envelope) -> bool {
            self.seen += 1;
            self.seen < 1
        }
    }

    #[test]
    fn early_stop_halts_traversal() {
        let store = MemGraph::new();
        let mut txn = store.begin();
        let tree = TreeStore::create(&store, &mut txn, "layer", TreeStoreConfig::new(1, 2));
        let encoder = RectEncoder;

        for i in 0..5 {
            let x = i as f64;
            let g = make_geom(&store, &mut txn, Envelope::new(x, x + 0.5, x, x + 0.5));
            add(&store, &mut txn, &tree, &encoder, g).unwrap();
        }

        let root = tree.root(&store, &mut txn);
        let mut visitor = StopAfterOne { seen: 0 };
        walk(&store, &tree, root, &mut visitor).unwrap();
        txn.success();
        store.finish(txn).unwrap();

        assert_eq!(visitor.seen, 1);
    }

    #[test]
    fn pruning_visitor_skips_disjoint_subtrees() {
        let store = MemGraph::new();
        let mut txn = store.begin();
        let tree = TreeStore::create(&store, &mut txn, "layer", TreeStoreConfig::new(1, 2));
        let encoder = RectEncoder;

        for i in 0..6 {
            let x = i as f64 * 10.0;
            let g = make_geom(&store, &mut txn, Envelope::new(x, x + 1.0, x, x + 1.0));
            add(&store, &mut txn, &tree, &encoder, g).unwrap();
        }

        let root = tree.root(&store, &mut txn);
        struct OnlyNear {
            window: Envelope,
            found: Vec<Envelope>,
        }
        impl<G: GraphStore> Visitor<G> for OnlyNear {
            fn needs_to_visit(&mut self, node_bbox: Envelope) -> bool {
                node_bbox.intersects(&self.window)
            }
            fn on_index_reference(&mut self, _geom: G::VertexId, geom_bbox: Envelope) -> bool {
                self.found.push(geom_bbox);
                true
            }
        }
        let mut visitor = OnlyNear {
            window: Envelope::new(-1.0, 2.0, -1.0, 2.0),
            found: Vec::new(),
        };
        walk(&store, &tree, root, &mut visitor).unwrap();
        txn.success();
        store.finish(txn).unwrap();

        assert_eq!(visitor.found.len(), 1);
    }
}
