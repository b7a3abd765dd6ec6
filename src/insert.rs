//! Insert path (C4): `chooseSubtree` descent, leaf insertion, quadratic split, upward
//! bbox adjustment, and root promotion (§4.3).

use crate::encoder::GeometryEncoder;
use crate::envelope::Envelope;
use crate::error::Error;
use crate::graph::{self, EdgeKind, GraphStore};
use crate::store::TreeStore;

pub fn is_leaf<G: GraphStore>(store: &G, v: G::VertexId) -> bool {
    store.iterate_out(v, EdgeKind::Child).is_empty()
}

pub fn bbox<G: GraphStore>(store: &G, v: G::VertexId) -> Envelope {
    graph::read_bbox(store, v)
        .ok()
        .flatten()
        .unwrap_or_else(Envelope::null)
}

/// Inserts geometry vertex `geom` into the layer's index, descending from the root,
/// splitting overflowing nodes, and promoting a new root if the split reaches the top
/// (§4.3).
pub fn add<G: GraphStore, E: GeometryEncoder<G>>(
    store: &G,
    txn: &mut G::Txn,
    tree: &TreeStore<G>,
    encoder: &E,
    geom: G::VertexId,
) -> Result<(), Error<G::StoreError>> {
    insert_without_count(store, txn, tree, encoder, geom)?;
    tree.increment_count();
    Ok(())
}

/// The insert algorithm of §4.3, without the `totalGeometryCount` bookkeeping of step 5.
/// Used by `add`, and by the delete path (§4.4 step 3e) to re-insert orphans that were
/// never decremented in the first place.
pub(crate) fn insert_without_count<G: GraphStore, E: GeometryEncoder<G>>(
    store: &G,
    txn: &mut G::Txn,
    tree: &TreeStore<G>,
    encoder: &E,
    geom: G::VertexId,
) -> Result<(), Error<G::StoreError>> {
    let envelope = encoder.decode_envelope(store, geom);
    let root = tree.root(store, txn);

    let leaf = descend_to_leaf(store, tree, root, envelope)?;

    store.connect(txn, leaf, geom, EdgeKind::Reference);
    let mut leaf_bbox = bbox(store, leaf);
    leaf_bbox.expand(&envelope);
    graph::write_bbox(store, txn, leaf, leaf_bbox);
    propagate_bbox_upward(store, txn, leaf);

    if store.iterate_out(leaf, EdgeKind::Reference).len() > tree.max_children() {
        log::debug!(target: "graph_rtree", "leaf {leaf:?} overflowed in layer {}; splitting", tree.layer_name);
        split_node(store, txn, tree, encoder, leaf, EdgeKind::Reference)?;
    }

    Ok(())
}

/// Repeatedly applies `choose_subtree` starting from `start` until a leaf is reached.
fn descend_to_leaf<G: GraphStore>(
    store: &G,
    tree: &TreeStore<G>,
    start: G::VertexId,
    envelope: Envelope,
) -> Result<G::VertexId, Error<G::StoreError>> {
    let mut current = start;
    loop {
        if is_leaf(store, current) {
            return Ok(current);
        }
        current = choose_subtree(store, tree, current, envelope)?;
    }
}

/// `chooseSubtree(parent, g)` (§4.3 step 2): picks which child of `parent` to descend
/// into for a geometry with envelope `envelope`.
fn choose_subtree<G: GraphStore>(
    store: &G,
    tree: &TreeStore<G>,
    parent: G::VertexId,
    envelope: Envelope,
) -> Result<G::VertexId, Error<G::StoreError>> {
    let (px, py) = envelope.centroid();
    let children = store.iterate_out(parent, EdgeKind::Child);

    if children.is_empty() {
        return Err(Error::internal_invariant(
            tree.layer_name.clone(),
            format!("choose_subtree found no children under {parent:?}"),
        ));
    }

    // (a) children whose bbox covers the centroid point; smallest area wins ties.
    let mut covering: Vec<(G::VertexId, Envelope)> = children
        .iter()
        .map(|&c| (c, bbox(store, c)))
        .filter(|(_, b)| b.covers_point(px, py))
        .collect();

    if !covering.is_empty() {
        covering.sort_by(|(_, a), (_, b)| a.area().partial_cmp(&b.area()).unwrap());
        return Ok(covering[0].0);
    }

    // (b) otherwise the child with the smallest enlargement, ties by smallest area.
    let mut best: Option<(G::VertexId, f64, f64)> = None; // (id, enlargement, area)
    for &c in &children {
        let b = bbox(store, c);
        let enlargement = b.enlargement(&envelope);
        let area = b.area();
        best = match best {
            None => Some((c, enlargement, area)),
            Some((_, best_enl, best_area)) => {
                if enlargement < best_enl || (enlargement == best_enl && area < best_area) {
                    Some((c, enlargement, area))
                } else {
                    best
                }
            }
        };
    }

    best.map(|(c, _, _)| c).ok_or_else(|| {
        Error::internal_invariant(
            tree.layer_name.clone(),
            "choose_subtree: no child candidate qualified under a non-empty parent",
        )
    })
}

/// Walks upward from `start`, expanding each ancestor's bbox to include its child's,
/// and stopping at the first level where the bbox did not change (§4.3 step 3).
pub(crate) fn propagate_bbox_upward<G: GraphStore>(store: &G, txn: &mut G::Txn, start: G::VertexId) {
    let mut v = start;
    loop {
        let parent = match store.single_in(v, EdgeKind::Child) {
            Some(p) => p,
            None => break,
        };
        let before = bbox(store, parent);
        let mut after = before;
        after.expand(&bbox(store, v));
        if after == before {
            break;
        }
        graph::write_bbox(store, txn, parent, after);
        v = parent;
    }
}

/// Splits the overflowing vertex `node` using quadratic split (§4.3.1), then recurses
/// upward: if the parent now overflows, split it too; if `node` is the root, promote a
/// fresh root (§4.3 step 4).
fn split_node<G: GraphStore, E: GeometryEncoder<G>>(
    store: &G,
    txn: &mut G::Txn,
    tree: &TreeStore<G>,
    encoder: &E,
    node: G::VertexId,
    kind: EdgeKind,
) -> Result<(), Error<G::StoreError>> {
    let entries: Vec<(G::VertexId, Envelope)> = store
        .iterate_out(node, kind)
        .into_iter()
        .map(|e| {
            let env = match kind {
                EdgeKind::Reference => encoder.decode_envelope(store, e),
                _ => bbox(store, e),
            };
            (e, env)
        })
        .collect();

    let (group1, group2, mbr1, mbr2) = quadratic_partition(entries, tree.min_children());

    debug_assert!(group1.len() >= tree.min_children());
    debug_assert!(group2.len() >= tree.min_children());

    for &(id, _) in group1.iter().chain(group2.iter()) {
        store.disconnect(txn, node, id, kind);
    }

    let root = tree.root(store, txn);

    if node == root {
        // the root vertex keeps its identity; both groups move under two freshly
        // created children, adding one level of height.
        let left = store.create_vertex(txn);
        graph::write_bbox(store, txn, left, mbr1);
        attach_children(store, txn, left, &group1, kind);

        let right = store.create_vertex(txn);
        graph::write_bbox(store, txn, right, mbr2);
        attach_children(store, txn, right, &group2, kind);

        store.connect(txn, node, left, EdgeKind::Child);
        store.connect(txn, node, right, EdgeKind::Child);
        graph::write_bbox(store, txn, node, mbr1.expanded(&mbr2));

        log::debug!(target: "graph_rtree", "promoted new root level in layer {}", tree.layer_name);
        return Ok(());
    }

    let parent = store
        .single_in(node, EdgeKind::Child)
        .expect("non-root split target must have a parent");

    // `node` becomes the left group, in place.
    attach_children(store, txn, node, &group1, kind);
    graph::write_bbox(store, txn, node, mbr1);

    let sibling = store.create_vertex(txn);
    graph::write_bbox(store, txn, sibling, mbr2);
    attach_children(store, txn, sibling, &group2, kind);
    store.connect(txn, parent, sibling, EdgeKind::Child);

    propagate_bbox_upward(store, txn, node);

    if store.iterate_out(parent, EdgeKind::Child).len() > tree.max_children() {
        split_node(store, txn, tree, encoder, parent, EdgeKind::Child)?;
    }

    Ok(())
}

fn attach_children<G: GraphStore>(
    store: &G,
    txn: &mut G::Txn,
    parent: G::VertexId,
    entries: &[(G::VertexId, Envelope)],
    kind: EdgeKind,
) {
    for &(id, _) in entries {
        store.connect(txn, parent, id, kind);
    }
}

/// Quadratic split (§4.3.1): seed picking by maximum dead space, then greedy
/// distribution with an underflow guard that dumps remaining entries into whichever
/// group would otherwise end up short of `min_children`.
fn quadratic_partition<Id: Copy + PartialEq>(
    entries: Vec<(Id, Envelope)>,
    min_children: usize,
) -> (Vec<(Id, Envelope)>, Vec<(Id, Envelope)>, Envelope, Envelope) {
    let n = entries.len();
    debug_assert!(n >= 2);

    let (seed_a, seed_b) = find_worst_pair(&entries);

    let mut remaining: Vec<usize> = (0..n).filter(|&i| i != seed_a && i != seed_b).collect();

    let mut group1 = vec![entries[seed_a]];
    let mut group2 = vec![entries[seed_b]];
    let mut mbr1 = entries[seed_a].1;
    let mut mbr2 = entries[seed_b].1;

    while !remaining.is_empty() {
        if group1.len() + remaining.len() == min_children {
            for &i in &remaining {
                mbr1.expand(&entries[i].1);
                group1.push(entries[i]);
            }
            remaining.clear();
            break;
        }
        if group2.len() + remaining.len() == min_children {
            for &i in &remaining {
                mbr2.expand(&entries[i].1);
                group2.push(entries[i]);
            }
            remaining.clear();
            break;
        }

        // §4.3.1 step 2: pick the entry whose min(d1, d2) is smallest (cheapest to
        // place anywhere), then assign it to the cheaper of its two groups.
        let mut best_pos = 0;
        let mut best_min_d = f64::MAX;
        let mut best_to_group1 = true;

        for (pos, &i) in remaining.iter().enumerate() {
            let e = entries[i].1;
            let d1 = mbr1.enlargement(&e);
            let d2 = mbr2.enlargement(&e);
            let min_d = d1.min(d2);
            let to_group1 = if d1 < d2 {
                true
            } else if d2 < d1 {
                false
            } else {
                mbr1.area() <= mbr2.area()
            };

            if min_d < best_min_d {
                best_min_d = min_d;
                best_pos = pos;
                best_to_group1 = to_group1;
            }
        }

        let chosen = remaining.remove(best_pos);
        if best_to_group1 {
            mbr1.expand(&entries[chosen].1);
            group1.push(entries[chosen]);
        } else {
            mbr2.expand(&entries[chosen].1);
            group2.push(entries[chosen]);
        }
    }

    (group1, group2, mbr1, mbr2)
}

/// Finds the pair of entries whose combined bbox wastes the most area together
/// (§4.3.1 step 1).
fn find_worst_pair<Id: Copy>(entries: &[(Id, Envelope)]) -> (usize, usize) {
    debug_assert!(entries.len() >= 2);

    let mut worst = (0, 1);
    let mut worst_waste = f64::MIN;

    for i in 0..entries.len() {
        for j in (i + 1)..entries.len() {
            let (_, a) = entries[i];
            let (_, b) = entries[j];
            let waste = a.expanded(&b).area() - a.area() - b.area();
            if waste > worst_waste {
                worst_waste = waste;
                worst = (i, j);
            }
        }
    }

    worst
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::envelope_of_geometry;
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
            let env = envelope_of_geometry(geometry);
            graph::write_bbox(store, txn, target, env);
        }
    }

    fn make_geom(store: &MemGraph, txn: &mut <MemGraph as GraphStore>::Txn, env: Envelope) -> <MemGraph as GraphStore>::VertexId {
        let g = store.create_vertex(txn);
        graph::write_bbox(store, txn, g, env);
        g
    }

    #[test]
    fn single_insert_sets_root_bbox_and_count() {
        let store = MemGraph::new();
        let mut txn = store.begin();
        let tree = TreeStore::create(&store, &mut txn, "layer", TreeStoreConfig::new(1, 51));
        let encoder = RectEncoder;

        let g = make_geom(&store, &mut txn, Envelope::new(1.0, 1.2, 2.0, 3.0));
        add(&store, &mut txn, &tree, &encoder, g).unwrap();
        let count = tree.count(&store, &mut txn).unwrap();
        txn.success();
        store.finish(txn).unwrap();

        assert_eq!(count, 1);
        let root = tree.root_readonly(&store);
        assert_eq!(store.iterate_out(root, EdgeKind::Reference).len(), 1);
        assert_eq!(bbox(&store, root), Envelope::new(1.0, 1.2, 2.0, 3.0));
    }

    #[test]
    fn overflow_triggers_split_and_new_root() {
        let store = MemGraph::new();
        let mut txn = store.begin();
        let tree = TreeStore::create(&store, &mut txn, "layer", TreeStoreConfig::new(1, 4));
        let encoder = RectEncoder;

        // 4 quadrants of the unit square plus one overlapping the centre: 5 entries,
        // max_children = 4, so exactly one split is expected.
        let boxes = [
            Envelope::new(0.0, 0.5, 0.0, 0.5),
            Envelope::new(0.5, 1.0, 0.0, 0.5),
            Envelope::new(0.0, 0.5, 0.5, 1.0),
            Envelope::new(0.5, 1.0, 0.5, 1.0),
            Envelope::new(0.25, 0.75, 0.25, 0.75),
        ];

        for b in boxes {
            let g = make_geom(&store, &mut txn, b);
            add(&store, &mut txn, &tree, &encoder, g).unwrap();
        }
        txn.success();
        store.finish(txn).unwrap();

        let root = tree.root_readonly(&store);
        let children = store.iterate_out(root, EdgeKind::Child);
        assert_eq!(children.len(), 2, "expected exactly one split to produce two children");

        for &c in &children {
            let refs = store.iterate_out(c, EdgeKind::Reference).len();
            assert!(refs >= tree.min_children());
        }

        let union = children
            .iter()
            .map(|&c| bbox(&store, c))
            .reduce(|mut a, b| {
                a.expand(&b);
                a
            })
            .unwrap();
        assert_eq!(union, Envelope::new(0.0, 1.0, 0.0, 1.0));
    }

    #[test]
    fn choose_subtree_prefers_covering_child_over_enlargement() {
        let store = MemGraph::new();
        let mut txn = store.begin();
        let tree = TreeStore::create(&store, &mut txn, "layer", TreeStoreConfig::new(1, 2));
        let encoder = RectEncoder;

        // Force two leaves to exist by overflowing max_children=2 with 3 disjoint inserts.
        for b in [
            Envelope::new(0.0, 1.0, 0.0, 1.0),
            Envelope::new(10.0, 11.0, 10.0, 11.0),
            Envelope::new(20.0, 21.0, 20.0, 21.0),
        ] {
            let g = make_geom(&store, &mut txn, b);
            add(&store, &mut txn, &tree, &encoder, g).unwrap();
        }

        // now insert a point that falls inside the first leaf's bbox: it must land there.
        let g = make_geom(&store, &mut txn, Envelope::new(0.4, 0.4, 0.4, 0.4));
        add(&store, &mut txn, &tree, &encoder, g).unwrap();
        let count = tree.count(&store, &mut txn).unwrap();
        txn.success();
        store.finish(txn).unwrap();

        assert_eq!(count, 4);
    }
}
