//! Tree store (C3): locates a layer's root and metadata vertices, holds its fanout
//! parameters, and keeps the process-local `totalGeometryCount` cache in sync with the
//! metadata vertex at transaction boundaries.

use std::cell::Cell;

use crate::envelope::Envelope;
use crate::error::Error;
use crate::graph::{self, EdgeKind, GraphStore, GraphTxn, PropertyValue};

/// Fanout bounds for a layer's index (§4.2). `min_children` must leave room for two
/// minimum-fill groups inside one overflowing node during a quadratic split (§4.3.1),
/// i.e. `2 * min_children <= max_children`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeStoreConfig {
    pub max_children: usize,
    pub min_children: usize,
}

impl TreeStoreConfig {
    pub fn new(min_children: usize, max_children: usize) -> Self {
        assert!(
            min_children >= 1,
            "min_children must be at least 1, got {min_children}"
        );
        assert!(
            2 * min_children <= max_children,
            "min_children ({min_children}) must leave room for two groups in a split of max_children ({max_children})"
        );
        Self {
            max_children,
            min_children,
        }
    }
}

impl Default for TreeStoreConfig {
    fn default() -> Self {
        Self::new(2, 8)
    }
}

/// The C3 component: per-layer location of the root/metadata vertices, fanout config,
/// and the cached geometry counter.
pub struct TreeStore<G: GraphStore> {
    pub layer_name: String,
    pub layer_vertex: G::VertexId,
    root: Cell<Option<G::VertexId>>,
    metadata: Cell<Option<G::VertexId>>,
    config: Cell<TreeStoreConfig>,
    cached_count: Cell<u64>,
    dirty: Cell<bool>,
}

impl<G: GraphStore> TreeStore<G> {
    /// Creates a brand new layer: a layer vertex, its metadata vertex (with the given
    /// fanout config), and an empty root leaf, all wired up in one transaction.
    pub fn create(
        store: &G,
        txn: &mut G::Txn,
        layer_name: impl Into<String>,
        config: TreeStoreConfig,
    ) -> Self {
        let layer_name = layer_name.into();
        let layer_vertex = store.create_vertex(txn);
        store.set_prop(txn, layer_vertex, graph::PROP_LAYER, PropertyValue::Str(layer_name.clone()));

        let this = Self {
            layer_name,
            layer_vertex,
            root: Cell::new(None),
            metadata: Cell::new(None),
            config: Cell::new(config),
            cached_count: Cell::new(0),
            dirty: Cell::new(false),
        };
        this.init_metadata(store, txn, config);
        this.init_root(store, txn);
        this
    }

    /// Reopens a layer whose layer vertex already exists; root/metadata are located
    /// lazily on first touch. Loads the persisted `totalGeometryCount` off the metadata
    /// vertex (§4.2); if it is zero, marks the cache dirty so the next `count()` performs
    /// the lost-write recount of §9.
    pub fn open(store: &G, layer_vertex: G::VertexId) -> Self {
        let layer_name = store
            .get_prop(layer_vertex, graph::PROP_LAYER)
            .and_then(|p| p.as_str().map(str::to_owned))
            .unwrap_or_default();

        let this = Self {
            layer_name,
            layer_vertex,
            root: Cell::new(None),
            metadata: Cell::new(None),
            config: Cell::new(TreeStoreConfig::default()),
            cached_count: Cell::new(0),
            dirty: Cell::new(false),
        };

        let saved = this.load_saved_count(store);
        this.cached_count.set(saved);
        this.dirty.set(saved == 0);
        this
    }

    fn init_metadata(&self, store: &G, txn: &mut G::Txn, config: TreeStoreConfig) {
        if store.single_out(self.layer_vertex, EdgeKind::Metadata).is_some() {
            return;
        }
        let metadata = store.create_vertex(txn);
        store.set_prop(
            txn,
            metadata,
            graph::PROP_MAX_NODE_REFERENCES,
            PropertyValue::I64(config.max_children as i64),
        );
        store.set_prop(
            txn,
            metadata,
            graph::PROP_MIN_NODE_REFERENCES,
            PropertyValue::I64(config.min_children as i64),
        );
        store.set_prop(
            txn,
            metadata,
            graph::PROP_TOTAL_GEOMETRY_COUNT,
            PropertyValue::I64(0),
        );
        store.connect(txn, self.layer_vertex, metadata, EdgeKind::Metadata);
        self.metadata.set(Some(metadata));
        self.config.set(config);
    }

    fn init_root(&self, store: &G, txn: &mut G::Txn) {
        if store.single_out(self.layer_vertex, EdgeKind::Root).is_some() {
            return;
        }
        let root = store.create_vertex(txn);
        graph::write_bbox(store, txn, root, Envelope::null());
        store.connect(txn, self.layer_vertex, root, EdgeKind::Root);
        self.root.set(Some(root));
    }

    /// The index root vertex, initialising it if this is the first touch of a freshly
    /// reopened layer (§4.2).
    pub fn root(&self, store: &G, txn: &mut G::Txn) -> G::VertexId {
        if let Some(r) = self.root.get() {
            return r;
        }
        self.init_root(store, txn);
        self.root.get().expect("root initialised above")
    }

    /// Same as [`TreeStore::root`], but assumes an already-initialised layer and takes
    /// no transaction; used by read paths that must not create one.
    pub fn root_readonly(&self, store: &G) -> G::VertexId {
        if let Some(r) = self.root.get() {
            return r;
        }
        let r = store
            .single_out(self.layer_vertex, EdgeKind::Root)
            .expect("layer has no root vertex; call create() or a write path first");
        self.root.set(Some(r));
        r
    }

    pub fn metadata(&self, store: &G) -> G::VertexId {
        if let Some(m) = self.metadata.get() {
            return m;
        }
        let m = store
            .single_out(self.layer_vertex, EdgeKind::Metadata)
            .expect("layer has no metadata vertex; call create() first");
        self.metadata.set(Some(m));
        self.load_config(store);
        m
    }

    fn load_config(&self, store: &G) {
        let metadata = self.metadata(store);
        let max_children = store
            .get_prop(metadata, graph::PROP_MAX_NODE_REFERENCES)
            .and_then(|p| match p {
                PropertyValue::I64(v) => Some(v as usize),
                _ => None,
            })
            .unwrap_or(8);
        let min_children = store
            .get_prop(metadata, graph::PROP_MIN_NODE_REFERENCES)
            .and_then(|p| match p {
                PropertyValue::I64(v) => Some(v as usize),
                _ => None,
            })
            .unwrap_or(2);
        self.config
            .set(TreeStoreConfig::new(min_children, max_children));
    }

    pub fn config(&self) -> TreeStoreConfig {
        self.config.get()
    }

    pub fn max_children(&self) -> usize {
        self.config.get().max_children
    }

    pub fn min_children(&self) -> usize {
        self.config.get().min_children
    }

    pub fn mark_dirty(&self) {
        self.dirty.set(true);
    }

    pub fn increment_count(&self) {
        self.cached_count.set(self.cached_count.get() + 1);
        self.mark_dirty();
    }

    pub fn decrement_count(&self) {
        self.cached_count.set(self.cached_count.get().saturating_sub(1));
        self.mark_dirty();
    }

    /// Returns the cached count, saving it to the metadata vertex if dirty. If the
    /// cached value is zero while dirty, performs a full recount first (§4.2, §9).
    pub fn count(&self, store: &G, txn: &mut G::Txn) -> Result<u64, Error<G::StoreError>> {
        if self.dirty.get() && self.cached_count.get() == 0 {
            let recounted = self.recount(store);
            self.cached_count.set(recounted);
        }

        if self.dirty.get() {
            let metadata = self.metadata(store);
            store.set_prop(
                txn,
                metadata,
                graph::PROP_TOTAL_GEOMETRY_COUNT,
                PropertyValue::I64(self.cached_count.get() as i64),
            );
            self.dirty.set(false);
        }

        Ok(self.cached_count.get())
    }

    /// Reads the last-saved counter off the metadata vertex without reconciling it.
    pub fn load_saved_count(&self, store: &G) -> u64 {
        let metadata = self.metadata(store);
        store
            .get_prop(metadata, graph::PROP_TOTAL_GEOMETRY_COUNT)
            .and_then(|p| match p {
                PropertyValue::I64(v) => Some(v as u64),
                _ => None,
            })
            .unwrap_or(0)
    }

    /// Full traversal recount of `REFERENCE` edges reachable from the root (invariant 6).
    pub fn recount(&self, store: &G) -> u64 {
        let root = self.root_readonly(store);
        count_references(store, root)
    }

    /// Re-initialises root and metadata after `removeAll` has torn down the previous
    /// skeleton (§4.4's `clear`).
    pub fn reinit(&self, store: &G, txn: &mut G::Txn) {
        self.root.set(None);
        self.metadata.set(None);
        self.init_metadata(store, txn, self.config.get());
        self.init_root(store, txn);
        self.cached_count.set(0);
        self.dirty.set(false);
    }
}

fn count_references<G: GraphStore>(store: &G, index_vertex: G::VertexId) -> u64 {
    let children = store.iterate_out(index_vertex, EdgeKind::Child);
    if !children.is_empty() {
        return children
            .into_iter()
            .map(|c| count_references(store, c))
            .sum();
    }
    store.iterate_out(index_vertex, EdgeKind::Reference).len() as u64
}
