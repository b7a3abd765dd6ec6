//! The top-level `Layer` API (C3-C7 composed): one logical index over a host graph,
//! opening and closing host transactions per call, bundling root/metadata access and
//! the public `add`/`remove`/`search` methods.

use geo::Geometry;

use crate::delete;
use crate::encoder::GeometryEncoder;
use crate::envelope::Envelope;
use crate::error::Error;
use crate::graph::{EdgeKind, GraphStore, GraphTxn};
use crate::insert;
use crate::listener::Listener;
use crate::search::{self, SearchResult};
use crate::store::{TreeStore, TreeStoreConfig};

/// One logical R-tree layer over a host graph store, parameterised by the geometry
/// encoder that knows how to read and write the domain geometries it indexes.
pub struct Layer<G: GraphStore, E: GeometryEncoder<G>> {
    store: G,
    tree: TreeStore<G>,
    encoder: E,
}

impl<G: GraphStore, E: GeometryEncoder<G>> Layer<G, E> {
    /// Creates a brand new layer with the given name and fanout bounds.
    pub fn create(store: G, encoder: E, layer_name: impl Into<String>, config: TreeStoreConfig) -> Result<Self, Error<G::StoreError>> {
        let mut txn = store.begin();
        let tree = TreeStore::create(&store, &mut txn, layer_name, config);
        txn.success();
        store.finish(txn)?;
        Ok(Self { store, tree, encoder })
    }

    /// Reopens a layer whose layer vertex already exists in the host graph.
    pub fn open(store: G, encoder: E, layer_vertex: G::VertexId) -> Self {
        let tree = TreeStore::open(&store, layer_vertex);
        Self { store, tree, encoder }
    }

    pub fn store(&self) -> &G {
        &self.store
    }

    pub fn layer_vertex(&self) -> G::VertexId {
        self.tree.layer_vertex
    }

    /// Indexes `geom`, opening and committing its own transaction. Rolls back and
    /// re-raises on any error, marking the counter cache dirty per §7's error policy.
    pub fn add(&self, geom: G::VertexId) -> Result<(), Error<G::StoreError>> {
        let mut txn = self.store.begin();
        match insert::add(&self.store, &mut txn, &self.tree, &self.encoder, geom) {
            Ok(()) => {
                txn.success();
                self.store.finish(txn)?;
                Ok(())
            }
            Err(e) => {
                self.tree.mark_dirty();
                self.store.finish(txn)?;
                Err(e)
            }
        }
    }

    /// Removes `geom` from the index. See [`delete::remove`] for the full algorithm.
    pub fn remove(&self, geom: G::VertexId, delete_geom_node: bool) -> Result<(), Error<G::StoreError>> {
        let mut txn = self.store.begin();
        match delete::remove(&self.store, &mut txn, &self.tree, &self.encoder, geom, delete_geom_node) {
            Ok(()) => {
                txn.success();
                self.store.finish(txn)?;
                Ok(())
            }
            Err(e) => {
                self.tree.mark_dirty();
                self.store.finish(txn)?;
                Err(e)
            }
        }
    }

    /// Removes every indexed geometry, leaf by leaf, in a series of short transactions
    /// (§4.4's `removeAll`).
    pub fn remove_all<L: Listener>(&self, delete_geom_nodes: bool, listener: &mut L) -> Result<(), Error<G::StoreError>> {
        delete::remove_all(&self.store, &self.tree, delete_geom_nodes, listener)
    }

    /// `removeAll(false, NullListener)` followed by re-initialising root and metadata.
    pub fn clear(&self) -> Result<(), Error<G::StoreError>> {
        delete::clear(&self.store, &self.tree)
    }

    /// The current geometry count, reconciling the cached counter against the metadata
    /// vertex if dirty (§4.2).
    pub fn count(&self) -> Result<u64, Error<G::StoreError>> {
        let mut txn = self.store.begin();
        let count = self.tree.count(&self.store, &mut txn)?;
        txn.success();
        self.store.finish(txn)?;
        Ok(count)
    }

    /// Every indexed geometry (`SearchAll`, §4.6).
    pub fn search_all(&self) -> Result<Vec<SearchResult<G>>, Error<G::StoreError>> {
        let root = self.tree.root_readonly(&self.store);
        search::search_all(&self.store, &self.tree, root)
    }

    /// Two-phase window intersection (`SearchIntersectWindow`, §4.6).
    pub fn search_intersect_window(&self, window: Envelope) -> Result<Vec<SearchResult<G>>, Error<G::StoreError>> {
        let root = self.tree.root_readonly(&self.store);
        search::search_intersect_window(&self.store, &self.tree, root, &self.encoder, window)
    }

    /// Decodes the full geometry for a search hit, for callers that only need it
    /// selectively rather than eagerly for every result (`search_all` never decodes).
    pub fn decode(&self, geom: G::VertexId) -> Geometry<f64> {
        self.encoder.decode_geometry(&self.store, geom)
    }

    /// Checks every invariant of §3/§8 against the current persisted state. Intended
    /// for tests and diagnostics, not the hot path.
    pub fn validate_consistency(&self) -> Result<(), String> {
        let root = self.tree.root_readonly(&self.store);
        validate_subtree(&self.store, &self.tree, root, true)?;

        let mut txn = self.store.begin();
        let cached = self
            .tree
            .count(&self.store, &mut txn)
            .map_err(|e| e.to_string())?;
        txn.success();
        self.store
            .finish(txn)
            .map_err(|e| e.to_string())?;
        let recounted = self.tree.recount(&self.store);
        if cached != recounted {
            return Err(format!(
                "counter consistency violated: cached {cached} != recounted {recounted}"
            ));
        }

        Ok(())
    }
}

fn validate_subtree<G: GraphStore>(
    store: &G,
    tree: &TreeStore<G>,
    v: G::VertexId,
    is_root: bool,
) -> Result<(usize, Envelope), String> {
    let children = store.iterate_out(v, EdgeKind::Child);
    let references = store.iterate_out(v, EdgeKind::Reference);

    if !children.is_empty() && !references.is_empty() {
        return Err(format!("{v:?} has both CHILD and REFERENCE edges"));
    }

    if children.is_empty() {
        // leaf
        if !is_root {
            let n = references.len();
            if n < tree.min_children() || n > tree.max_children() {
                return Err(format!(
                    "leaf {v:?} has {n} references, outside [{}, {}]",
                    tree.min_children(),
                    tree.max_children()
                ));
            }
        }
        let mut union = Envelope::null();
        for &g in &references {
            union.expand(&insert::bbox(store, g));
        }
        check_bbox(store, v, union)?;
        return Ok((1, union));
    }

    if is_root && children.len() == 1 {
        return Err(format!("root {v:?} has a single CHILD; should have been shortened"));
    }

    if !is_root {
        let n = children.len();
        if n < tree.min_children() || n > tree.max_children() {
            return Err(format!(
                "internal vertex {v:?} has {n} children, outside [{}, {}]",
                tree.min_children(),
                tree.max_children()
            ));
        }
    }

    let mut union = Envelope::null();
    let mut depth = None;
    for &c in &children {
        let (child_depth, child_bbox) = validate_subtree(store, tree, c, false)?;
        match depth {
            None => depth = Some(child_depth),
            Some(d) if d != child_depth => {
                return Err(format!("height imbalance under {v:?}: {d} vs {child_depth}"))
            }
            _ => {}
        }
        union.expand(&child_bbox);
    }
    check_bbox(store, v, union)?;

    Ok((depth.unwrap_or(0) + 1, union))
}

fn check_bbox<G: GraphStore>(store: &G, v: G::VertexId, expected: Envelope) -> Result<(), String> {
    let actual = insert::bbox(store, v);
    if actual != expected {
        return Err(format!(
            "containment violated at {v:?}: stored bbox {actual} != union {expected}"
        ));
    }
    Ok(())
}
