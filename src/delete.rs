//! Delete path (C5): locate leaf, unlink reference, detect underflow, find the highest
//! underflowing ancestor, and re-insert orphaned leaves (§4.4).

use crate::encoder::GeometryEncoder;
use crate::error::Error;
use crate::graph::{self, EdgeKind, GraphStore};
use crate::insert::{bbox, insert_without_count, is_leaf};
use crate::store::TreeStore;

/// Removes `geom` from the layer's index. If `delete_geom_node` is true, the geometry
/// vertex itself (and whatever edges it has) is deleted too; otherwise only the
/// `REFERENCE` edge is removed and the geometry vertex survives (§3 Ownership).
pub fn remove<G: GraphStore, E: GeometryEncoder<G>>(
    store: &G,
    txn: &mut G::Txn,
    tree: &TreeStore<G>,
    encoder: &E,
    geom: G::VertexId,
    delete_geom_node: bool,
) -> Result<(), Error<G::StoreError>> {
    let leaf = locate_leaf(store, tree, geom)?;

    store.disconnect(txn, leaf, geom, EdgeKind::Reference);
    if delete_geom_node {
        store.delete_vertex(txn, geom);
    }

    let root = tree.root(store, txn);
    let remaining = store.iterate_out(leaf, EdgeKind::Reference).len();

    if leaf != root && remaining < tree.min_children() {
        handle_underflow(store, txn, tree, encoder, leaf)?;
        shorten_root(store, txn, tree);
    } else {
        retighten_bbox(store, txn, leaf);
    }

    tree.decrement_count();
    Ok(())
}

/// Collapses a root left with exactly one `CHILD` after underflow eviction, pulling
/// that child's own children (or references) up into the root and deleting it. Loops
/// in case the pulled-up level is itself a single child, since `min_children` can be 1.
fn shorten_root<G: GraphStore>(store: &G, txn: &mut G::Txn, tree: &TreeStore<G>) {
    loop {
        let root = tree.root(store, txn);
        let children = store.iterate_out(root, EdgeKind::Child);
        if children.len() != 1 {
            return;
        }
        let only = children[0];
        store.disconnect(txn, root, only, EdgeKind::Child);

        if is_leaf(store, only) {
            for r in store.iterate_out(only, EdgeKind::Reference) {
                store.disconnect(txn, only, r, EdgeKind::Reference);
                store.connect(txn, root, r, EdgeKind::Reference);
            }
            store.delete_vertex(txn, only);
            return;
        }

        for grandchild in store.iterate_out(only, EdgeKind::Child) {
            store.disconnect(txn, only, grandchild, EdgeKind::Child);
            store.connect(txn, root, grandchild, EdgeKind::Child);
        }
        store.delete_vertex(txn, only);
    }
}

/// Removes every geometry reference in the layer, leaf by leaf, committing one host
/// transaction per leaf so a very large layer never holds a single working set open
/// (§4.4). A final transaction tears down the now-empty index skeleton and the
/// metadata vertex.
pub fn remove_all<G: GraphStore, L: crate::listener::Listener>(
    store: &G,
    tree: &TreeStore<G>,
    delete_geom_nodes: bool,
    listener: &mut L,
) -> Result<(), Error<G::StoreError>> {
    let total = {
        let mut txn = store.begin();
        let total = tree.count(store, &mut txn).ok();
        txn.success();
        store.finish(txn)?;
        total.map(|n| n as usize)
    };
    listener.begin(total);

    let mut leaves = Vec::new();
    collect_leaves(store, tree.root_readonly(store), &mut leaves);

    for leaf in leaves {
        let mut txn = store.begin();
        let refs = store.iterate_out(leaf, EdgeKind::Reference);
        let n = refs.len();
        for g in refs {
            store.disconnect(&mut txn, leaf, g, EdgeKind::Reference);
            if delete_geom_nodes {
                store.delete_vertex(&mut txn, g);
            }
            tree.decrement_count();
        }
        txn.success();
        store.finish(txn)?;
        listener.worked(n);
    }

    let mut txn = store.begin();
    let layer_vertex = tree.layer_vertex;
    let root = tree.root_readonly(store);
    store.disconnect(&mut txn, layer_vertex, root, EdgeKind::Root);
    delete_subtree(store, &mut txn, root);
    let metadata = tree.metadata(store);
    store.disconnect(&mut txn, layer_vertex, metadata, EdgeKind::Metadata);
    store.delete_vertex(&mut txn, metadata);
    txn.success();
    store.finish(txn)?;

    listener.done();
    Ok(())
}

/// `removeAll(false, NullListener)` followed by re-initialising root and metadata;
/// geometry vertices survive untouched (§4.4's `clear`).
pub fn clear<G: GraphStore>(store: &G, tree: &TreeStore<G>) -> Result<(), Error<G::StoreError>> {
    remove_all(store, tree, false, &mut crate::listener::NullListener)?;
    let mut txn = store.begin();
    tree.reinit(store, &mut txn);
    txn.success();
    store.finish(txn)?;
    Ok(())
}

fn collect_leaves<G: GraphStore>(store: &G, v: G::VertexId, out: &mut Vec<G::VertexId>) {
    if is_leaf(store, v) {
        out.push(v);
        return;
    }
    for child in store.iterate_out(v, EdgeKind::Child) {
        collect_leaves(store, child, out);
    }
}

/// Finds the unique leaf holding a `REFERENCE` to `geom` and confirms it is reachable
/// from this layer's root, failing with `NotIndexed` otherwise (§4.4 step 1).
fn locate_leaf<G: GraphStore>(
    store: &G,
    tree: &TreeStore<G>,
    geom: G::VertexId,
) -> Result<G::VertexId, Error<G::StoreError>> {
    let leaf = store
        .single_in(geom, EdgeKind::Reference)
        .ok_or(Error::NotIndexed)?;

    let root = tree.root_readonly(store);
    let mut v = leaf;
    loop {
        if v == root {
            return Ok(leaf);
        }
        match store.single_in(v, EdgeKind::Child) {
            Some(parent) => v = parent,
            None => return Err(Error::NotIndexed),
        }
    }
}

/// Finds the highest ancestor of `leaf` whose subtree must be evicted and re-inserted
/// because collapsing `leaf` would leave it (and possibly several more ancestors above
/// it) under `min_children` (§4.4 step 3a).
fn find_eviction_root<G: GraphStore>(store: &G, tree: &TreeStore<G>, leaf: G::VertexId) -> G::VertexId {
    let root = tree.root_readonly(store);
    let mut a = leaf;
    loop {
        let parent = match store.single_in(a, EdgeKind::Child) {
            Some(p) => p,
            None => return a, // a is the root; never reached in practice since the
                               // caller only calls this for a non-root leaf.
        };
        if parent == root {
            return a;
        }
        let parent_child_count = store.iterate_out(parent, EdgeKind::Child).len();
        if parent_child_count == tree.min_children() {
            a = parent;
        } else {
            return a;
        }
    }
}

fn handle_underflow<G: GraphStore, E: GeometryEncoder<G>>(
    store: &G,
    txn: &mut G::Txn,
    tree: &TreeStore<G>,
    encoder: &E,
    leaf: G::VertexId,
) -> Result<(), Error<G::StoreError>> {
    let eviction_root = find_eviction_root(store, tree, leaf);

    let mut orphans = Vec::new();
    collect_references(store, eviction_root, &mut orphans);

    for &g in &orphans {
        store.disconnect(txn, find_owning_leaf(store, eviction_root, g), g, EdgeKind::Reference);
    }

    let parent = store
        .single_in(eviction_root, EdgeKind::Child)
        .expect("eviction root is never the tree root");
    store.disconnect(txn, parent, eviction_root, EdgeKind::Child);
    delete_subtree(store, txn, eviction_root);

    retighten_bbox(store, txn, parent);

    for g in orphans {
        log::debug!(target: "graph_rtree", "re-inserting orphan after underflow eviction in layer {}", tree.layer_name);
        insert_without_count(store, txn, tree, encoder, g)?;
    }

    Ok(())
}

/// Gathers every geometry vertex reachable under `v` via `REFERENCE` edges (§4.4 step
/// 3b).
fn collect_references<G: GraphStore>(store: &G, v: G::VertexId, out: &mut Vec<G::VertexId>) {
    if is_leaf(store, v) {
        out.extend(store.iterate_out(v, EdgeKind::Reference));
        return;
    }
    for child in store.iterate_out(v, EdgeKind::Child) {
        collect_references(store, child, out);
    }
}

/// Finds which leaf under `subtree_root` currently holds a `REFERENCE` to `geom`.
fn find_owning_leaf<G: GraphStore>(store: &G, subtree_root: G::VertexId, geom: G::VertexId) -> G::VertexId {
    store
        .single_in(geom, EdgeKind::Reference)
        .filter(|&l| is_descendant_or_self(store, subtree_root, l))
        .expect("geom must still be referenced by a leaf under subtree_root")
}

fn is_descendant_or_self<G: GraphStore>(store: &G, root: G::VertexId, v: G::VertexId) -> bool {
    let mut cur = v;
    loop {
        if cur == root {
            return true;
        }
        match store.single_in(cur, EdgeKind::Child) {
            Some(parent) => cur = parent,
            None => return false,
        }
    }
}

/// Recursively deletes all index vertices under (and including) `v`, leaving any
/// geometry vertices alive. Orphans must already be unlinked by the caller (§4.4 step 3c).
fn delete_subtree<G: GraphStore>(store: &G, txn: &mut G::Txn, v: G::VertexId) {
    let children = store.iterate_out(v, EdgeKind::Child);
    for child in children {
        store.disconnect(txn, v, child, EdgeKind::Child);
        delete_subtree(store, txn, child);
    }
    store.delete_vertex(txn, v);
}

/// Recomputes `v`'s bbox from scratch as the union of its current children/references
/// and propagates the tightened bbox upward, stopping at the first ancestor whose bbox
/// does not change (§4.4 step 3d / step 4). Deletion can shrink a bbox, so unlike
/// `propagate_bbox_upward` this does not just grow the existing one.
fn retighten_bbox<G: GraphStore>(store: &G, txn: &mut G::Txn, start: G::VertexId) {
    let mut v = start;
    loop {
        let new_bbox = recompute_bbox(store, v);
        let before = bbox(store, v);
        graph::write_bbox(store, txn, v, new_bbox);
        let changed = new_bbox != before;

        let parent = match store.single_in(v, EdgeKind::Child) {
            Some(p) => p,
            None => break,
        };
        if !changed {
            break;
        }
        v = parent;
    }
}

fn recompute_bbox<G: GraphStore>(store: &G, v: G::VertexId) -> crate::envelope::Envelope {
    let mut acc = crate::envelope::Envelope::null();
    if is_leaf(store, v) {
        for r in store.iterate_out(v, EdgeKind::Reference) {
            acc.expand(&bbox(store, r));
        }
    } else {
        for c in store.iterate_out(v, EdgeKind::Child) {
            acc.expand(&bbox(store, c));
        }
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphTxn;
    use crate::insert::add;
    use crate::memgraph::MemGraph;
    use crate::store::TreeStoreConfig;
    use crate::envelope::Envelope;
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
    fn add_then_remove_restores_empty_tree() {
        let store = MemGraph::new();
        let mut txn = store.begin();
        let tree = TreeStore::create(&store, &mut txn, "layer", TreeStoreConfig::new(1, 51));
        let encoder = RectEncoder;

        let g = make_geom(&store, &mut txn, Envelope::new(1.0, 1.2, 2.0, 3.0));
        add(&store, &mut txn, &tree, &encoder, g).unwrap();
        remove(&store, &mut txn, &tree, &encoder, g, false).unwrap();
        let count = tree.count(&store, &mut txn).unwrap();
        txn.success();
        store.finish(txn).unwrap();

        assert_eq!(count, 0);
        let root = tree.root_readonly(&store);
        assert!(store.iterate_out(root, EdgeKind::Reference).is_empty());
        assert!(store.vertex_exists(tree.metadata(&store)));
    }

    #[test]
    fn remove_with_delete_geom_node_deletes_vertex() {
        let store = MemGraph::new();
        let mut txn = store.begin();
        let tree = TreeStore::create(&store, &mut txn, "layer", TreeStoreConfig::new(1, 51));
        let encoder = RectEncoder;

        let g = make_geom(&store, &mut txn, Envelope::new(0.0, 1.0, 0.0, 1.0));
        add(&store, &mut txn, &tree, &encoder, g).unwrap();
        remove(&store, &mut txn, &tree, &encoder, g, true).unwrap();
        txn.success();
        store.finish(txn).unwrap();

        assert!(!store.vertex_exists(g));
    }

    #[test]
    fn remove_unindexed_geometry_fails() {
        let store = MemGraph::new();
        let mut txn = store.begin();
        let tree = TreeStore::create(&store, &mut txn, "layer", TreeStoreConfig::new(1, 51));
        let encoder = RectEncoder;

        let g = make_geom(&store, &mut txn, Envelope::new(0.0, 1.0, 0.0, 1.0));
        let result = remove(&store, &mut txn, &tree, &encoder, g, false);
        assert!(matches!(result, Err(Error::NotIndexed)));
    }

    #[test]
    fn underflow_eviction_reinserts_orphans_and_keeps_invariants() {
        let store = MemGraph::new();
        let mut txn = store.begin();
        let tree = TreeStore::create(&store, &mut txn, "layer", TreeStoreConfig::new(2, 4));
        let encoder = RectEncoder;

        let mut geoms = Vec::new();
        for i in 0..20 {
            let x = i as f64;
            let g = make_geom(&store, &mut txn, Envelope::new(x, x + 0.5, x, x + 0.5));
            add(&store, &mut txn, &tree, &encoder, g).unwrap();
            geoms.push(g);
        }

        // remove enough from one region to force an underflow in that subtree.
        for &g in &geoms[0..3] {
            remove(&store, &mut txn, &tree, &encoder, g, false).unwrap();
        }

        let count = tree.count(&store, &mut txn).unwrap();
        txn.success();
        store.finish(txn).unwrap();

        assert_eq!(count, 17);

        for &g in &geoms[3..] {
            assert!(store.single_in(g, EdgeKind::Reference).is_some());
        }
    }

    #[test]
    fn underflow_eviction_shortens_a_root_left_with_one_child() {
        let store = MemGraph::new();
        let mut txn = store.begin();
        let tree = TreeStore::create(&store, &mut txn, "layer", TreeStoreConfig::new(1, 2));
        let encoder = RectEncoder;

        let mut geoms = Vec::new();
        for i in 0..30 {
            let x = i as f64 * 10.0;
            let g = make_geom(&store, &mut txn, Envelope::new(x, x + 1.0, x, x + 1.0));
            add(&store, &mut txn, &tree, &encoder, g).unwrap();
            geoms.push(g);
        }

        for &g in &geoms[0..27] {
            remove(&store, &mut txn, &tree, &encoder, g, false).unwrap();
        }

        let root = tree.root(&store, &mut txn);
        let children = store.iterate_out(root, EdgeKind::Child);
        assert_ne!(children.len(), 1, "root must never be left with a single CHILD");

        txn.success();
        store.finish(txn).unwrap();
    }

    #[test]
    fn remove_all_four_geometries_empties_layer() {
        // §8 scenario 3.
        let store = MemGraph::new();
        let mut txn = store.begin();
        let tree = TreeStore::create(&store, &mut txn, "layer", TreeStoreConfig::new(1, 51));
        let encoder = RectEncoder;

        let boxes = [
            Envelope::new(1.0, 1.2, 2.0, 3.0),
            Envelope::new(1.2, 4.0, 2.0, 7.0),
            Envelope::new(2.2, 3.0, 6.0, 8.0),
            Envelope::new(1.9, 4.5, 5.0, 9.0),
        ];
        let mut geoms = Vec::new();
        for b in boxes {
            let g = make_geom(&store, &mut txn, b);
            add(&store, &mut txn, &tree, &encoder, g).unwrap();
            geoms.push(g);
        }
        txn.success();
        store.finish(txn).unwrap();

        let mut listener = crate::listener::NullListener;
        remove_all(&store, &tree, true, &mut listener).unwrap();

        let mut txn = store.begin();
        let count = tree.count(&store, &mut txn).unwrap();
        txn.success();
        store.finish(txn).unwrap();

        assert_eq!(count, 0);
        for g in geoms {
            assert!(!store.vertex_exists(g));
        }
    }

    #[test]
    fn clear_reinitialises_layer_and_keeps_geometries() {
        let store = MemGraph::new();
        let mut txn = store.begin();
        let tree = TreeStore::create(&store, &mut txn, "layer", TreeStoreConfig::new(1, 4));
        let encoder = RectEncoder;

        let mut geoms = Vec::new();
        for i in 0..6 {
            let x = i as f64;
            let g = make_geom(&store, &mut txn, Envelope::new(x, x + 0.5, x, x + 0.5));
            add(&store, &mut txn, &tree, &encoder, g).unwrap();
            geoms.push(g);
        }
        txn.success();
        store.finish(txn).unwrap();

        clear(&store, &tree).unwrap();

        let mut txn = store.begin();
        let count = tree.count(&store, &mut txn).unwrap();
        txn.success();
        store.finish(txn).unwrap();

        assert_eq!(count, 0);
        for g in geoms {
            assert!(store.vertex_exists(g), "geometry vertices survive clear()");
        }
        assert!(store.vertex_exists(tree.metadata(&store)));
        assert!(store.vertex_exists(tree.root_readonly(&store)));
    }
}
