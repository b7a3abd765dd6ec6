//! The graph adapter (C2): the thin capability layer this crate needs from a host
//! property-graph store.
//!
//! Everything here is a trait; the tree only ever goes through `GraphStore`/`GraphTxn`.
//! `crate::memgraph` ships a reference implementation so this crate is usable and
//! testable standalone.

use std::fmt::Debug;
use std::hash::Hash;

use crate::error::Error;

/// The fixed set of typed edges a layer's index uses (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// Layer vertex -> index root.
    Root,
    /// Internal index vertex -> child index vertex.
    Child,
    /// Leaf index vertex -> geometry vertex.
    Reference,
    /// Layer vertex -> metadata vertex.
    Metadata,
    /// Layer vertex -> layer-config vertex (dynamic sub-layer).
    LayerConfig,
}

/// A property value as stored on a vertex. `loosely_eq` falls back to string-form
/// equality, smoothing over int/long width mismatches (§4.7).
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    I64(i64),
    F64(f64),
    F64Array(Vec<f64>),
    Str(String),
}

impl PropertyValue {
    pub fn loosely_eq(&self, other: &PropertyValue) -> bool {
        if self == other {
            return true;
        }
        self.to_string_form() == other.to_string_form()
    }

    fn to_string_form(&self) -> String {
        match self {
            PropertyValue::Bool(b) => b.to_string(),
            PropertyValue::I64(i) => i.to_string(),
            PropertyValue::F64(f) => f.to_string(),
            PropertyValue::F64Array(a) => format!("{:?}", a),
            PropertyValue::Str(s) => s.clone(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64_array(&self) -> Option<&[f64]> {
        match self {
            PropertyValue::F64Array(a) => Some(a),
            _ => None,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::Str(s.to_owned())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::Str(s)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::I64(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::F64(v)
    }
}

impl From<Vec<f64>> for PropertyValue {
    fn from(v: Vec<f64>) -> Self {
        PropertyValue::F64Array(v)
    }
}

/// A host transaction handle. `success()` must be called before `GraphStore::finish` for
/// the transaction to commit; otherwise `finish` rolls back (§6's `Txn.success()` /
/// `Txn.finish()` pair).
pub trait GraphTxn {
    fn success(&mut self);
    fn is_successful(&self) -> bool;
}

/// The capability set the R-tree core requires of a host property-graph store (§6).
pub trait GraphStore {
    type VertexId: Copy + Eq + Hash + Debug;
    type Txn: GraphTxn;
    type StoreError: std::error::Error + Send + Sync + 'static;

    fn begin(&self) -> Self::Txn;
    fn finish(&self, txn: Self::Txn) -> Result<(), Error<Self::StoreError>>;

    fn create_vertex(&self, txn: &mut Self::Txn) -> Self::VertexId;
    fn delete_vertex(&self, txn: &mut Self::Txn, v: Self::VertexId);
    fn vertex_exists(&self, v: Self::VertexId) -> bool;

    fn get_prop(&self, v: Self::VertexId, key: &str) -> Option<PropertyValue>;
    fn set_prop(&self, txn: &mut Self::Txn, v: Self::VertexId, key: &str, value: PropertyValue);
    fn has_prop(&self, v: Self::VertexId, key: &str) -> bool {
        self.get_prop(v, key).is_some()
    }
    fn remove_prop(&self, txn: &mut Self::Txn, v: Self::VertexId, key: &str);

    fn connect(&self, txn: &mut Self::Txn, src: Self::VertexId, dst: Self::VertexId, kind: EdgeKind);
    fn disconnect(&self, txn: &mut Self::Txn, src: Self::VertexId, dst: Self::VertexId, kind: EdgeKind);

    fn iterate_out(&self, v: Self::VertexId, kind: EdgeKind) -> Vec<Self::VertexId>;
    fn iterate_in(&self, v: Self::VertexId, kind: EdgeKind) -> Vec<Self::VertexId>;

    fn single_out(&self, v: Self::VertexId, kind: EdgeKind) -> Option<Self::VertexId> {
        let mut it = self.iterate_out(v, kind);
        debug_assert!(it.len() <= 1, "expected at most one {:?} edge", kind);
        it.pop()
    }

    fn single_in(&self, v: Self::VertexId, kind: EdgeKind) -> Option<Self::VertexId> {
        let mut it = self.iterate_in(v, kind);
        debug_assert!(it.len() <= 1, "expected at most one {:?} edge", kind);
        it.pop()
    }
}

/// Reads the fixed `bbox` property (§6) off a vertex, interpreting it in
/// `[xmin, xmax, ymin, ymax]` order. Returns `None` if the property is absent (an
/// uninitialised node), and an `EncoderMismatch` if it is present but the wrong width.
pub fn read_bbox<G: GraphStore>(
    store: &G,
    v: G::VertexId,
) -> Result<Option<crate::envelope::Envelope>, Error<G::StoreError>> {
    match store.get_prop(v, PROP_BBOX) {
        None => Ok(None),
        Some(PropertyValue::F64Array(arr)) if arr.len() == 4 => {
            Ok(Some(crate::envelope::Envelope::from_array([
                arr[0], arr[1], arr[2], arr[3],
            ])))
        }
        Some(_) => Err(Error::EncoderMismatch),
    }
}

pub fn write_bbox<G: GraphStore>(
    store: &G,
    txn: &mut G::Txn,
    v: G::VertexId,
    bbox: crate::envelope::Envelope,
) {
    store.set_prop(txn, v, PROP_BBOX, PropertyValue::F64Array(bbox.to_array().to_vec()));
}

/// Fixed property keys persisted in the graph (§6).
pub const PROP_BBOX: &str = "bbox";
pub const PROP_LAYER: &str = "layer";
pub const PROP_GTYPE: &str = "gtype";
pub const PROP_QUERY: &str = "query";
pub const PROP_MAX_NODE_REFERENCES: &str = "maxNodeReferences";
pub const PROP_MIN_NODE_REFERENCES: &str = "minNodeReferences";
pub const PROP_TOTAL_GEOMETRY_COUNT: &str = "totalGeometryCount";
