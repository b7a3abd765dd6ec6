//! A reference, in-memory [`GraphStore`] implementation.
//!
//! Vertices live in a `generational_arena::Arena`, keyed by `generational_arena::Index`,
//! storing typed-edge adjacency and properties per vertex. A production host graph is a
//! drop-in replacement implementing the same trait.
//!
//! Rollback uses an undo log rather than snapshotting the whole arena: every mutating
//! call appends the inverse operation to the transaction, and `finish` replays that log
//! in reverse when the transaction was never marked successful. Deleted vertices are
//! tombstoned rather than removed from the arena, since `generational_arena` indices
//! can't be resurrected once freed and rollback needs exactly that.

use std::cell::RefCell;
use std::collections::HashMap;

use generational_arena::{Arena, Index};

use crate::error::Error;
use crate::graph::{EdgeKind, GraphStore, GraphTxn, PropertyValue};

#[derive(Debug, Clone, Default)]
struct VertexData {
    tombstoned: bool,
    props: HashMap<String, PropertyValue>,
    out_edges: HashMap<EdgeKind, Vec<Index>>,
    in_edges: HashMap<EdgeKind, Vec<Index>>,
}

#[derive(Debug)]
enum UndoOp {
    UntombstoneVertex(Index),
    TombstoneVertex(Index),
    RestoreProp(Index, String, Option<PropertyValue>),
    Disconnect(Index, Index, EdgeKind),
    Connect(Index, Index, EdgeKind),
}

#[derive(Debug, Default)]
struct Inner {
    vertices: Arena<VertexData>,
}

/// An in-memory host graph, reference-counted the way a real host store client handle
/// would be: cheap to clone, interior mutability behind the scenes.
#[derive(Debug, Default)]
pub struct MemGraph {
    inner: RefCell<Inner>,
}

impl MemGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vertex_count(&self) -> usize {
        self.inner
            .borrow()
            .vertices
            .iter()
            .filter(|(_, v)| !v.tombstoned)
            .count()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MemGraphError {
    #[error("vertex {0:?} does not exist")]
    NoSuchVertex(Index),
}

/// An in-flight transaction against a [`MemGraph`]. Mutations are applied eagerly (this
/// store has a single writer, per §5); `success()` decides whether `finish` commits or
/// unwinds the recorded undo log.
#[derive(Debug, Default)]
pub struct MemTxn {
    successful: bool,
    undo: Vec<UndoOp>,
}

impl GraphTxn for MemTxn {
    fn success(&mut self) {
        self.successful = true;
    }

    fn is_successful(&self) -> bool {
        self.successful
    }
}

impl GraphStore for MemGraph {
    type VertexId = Index;
    type Txn = MemTxn;
    type StoreError = MemGraphError;

    fn begin(&self) -> Self::Txn {
        MemTxn::default()
    }

    fn finish(&self, txn: Self::Txn) -> Result<(), Error<Self::StoreError>> {
        if !txn.successful {
            let mut inner = self.inner.borrow_mut();
            for op in txn.undo.into_iter().rev() {
                apply_undo(&mut inner, op);
            }
        }
        Ok(())
    }

    fn create_vertex(&self, txn: &mut Self::Txn) -> Self::VertexId {
        let mut inner = self.inner.borrow_mut();
        let id = inner.vertices.insert(VertexData::default());
        txn.undo.push(UndoOp::TombstoneVertex(id));
        id
    }

    fn delete_vertex(&self, txn: &mut Self::Txn, v: Self::VertexId) {
        let mut inner = self.inner.borrow_mut();
        if let Some(data) = inner.vertices.get_mut(v) {
            if !data.tombstoned {
                data.tombstoned = true;
                txn.undo.push(UndoOp::UntombstoneVertex(v));
            }
        }
    }

    fn vertex_exists(&self, v: Self::VertexId) -> bool {
        self.inner
            .borrow()
            .vertices
            .get(v)
            .map(|d| !d.tombstoned)
            .unwrap_or(false)
    }

    fn get_prop(&self, v: Self::VertexId, key: &str) -> Option<PropertyValue> {
        self.inner
            .borrow()
            .vertices
            .get(v)
            .and_then(|d| d.props.get(key).cloned())
    }

    fn set_prop(&self, txn: &mut Self::Txn, v: Self::VertexId, key: &str, value: PropertyValue) {
        let mut inner = self.inner.borrow_mut();
        let data = inner
            .vertices
            .get_mut(v)
            .expect("set_prop on nonexistent vertex");
        let old = data.props.insert(key.to_owned(), value);
        txn.undo
            .push(UndoOp::RestoreProp(v, key.to_owned(), old));
    }

    fn remove_prop(&self, txn: &mut Self::Txn, v: Self::VertexId, key: &str) {
        let mut inner = self.inner.borrow_mut();
        let data = inner
            .vertices
            .get_mut(v)
            .expect("remove_prop on nonexistent vertex");
        let old = data.props.remove(key);
        if old.is_some() {
            txn.undo
                .push(UndoOp::RestoreProp(v, key.to_owned(), old));
        }
    }

    fn connect(&self, txn: &mut Self::Txn, src: Self::VertexId, dst: Self::VertexId, kind: EdgeKind) {
        let mut inner = self.inner.borrow_mut();
        inner
            .vertices
            .get_mut(src)
            .expect("connect from nonexistent vertex")
            .out_edges
            .entry(kind)
            .or_default()
            .push(dst);
        inner
            .vertices
            .get_mut(dst)
            .expect("connect to nonexistent vertex")
            .in_edges
            .entry(kind)
            .or_default()
            .push(src);
        txn.undo.push(UndoOp::Disconnect(src, dst, kind));
    }

    fn disconnect(&self, txn: &mut Self::Txn, src: Self::VertexId, dst: Self::VertexId, kind: EdgeKind) {
        let mut inner = self.inner.borrow_mut();
        if let Some(data) = inner.vertices.get_mut(src) {
            if let Some(edges) = data.out_edges.get_mut(&kind) {
                edges.retain(|&d| d != dst);
            }
        }
        if let Some(data) = inner.vertices.get_mut(dst) {
            if let Some(edges) = data.in_edges.get_mut(&kind) {
                edges.retain(|&s| s != src);
            }
        }
        txn.undo.push(UndoOp::Connect(src, dst, kind));
    }

    fn iterate_out(&self, v: Self::VertexId, kind: EdgeKind) -> Vec<Self::VertexId> {
        self.inner
            .borrow()
            .vertices
            .get(v)
            .and_then(|d| d.out_edges.get(&kind).cloned())
            .unwrap_or_default()
    }

    fn iterate_in(&self, v: Self::VertexId, kind: EdgeKind) -> Vec<Self::VertexId> {
        self.inner
            .borrow()
            .vertices
            .get(v)
            .and_then(|d| d.in_edges.get(&kind).cloned())
            .unwrap_or_default()
    }
}

fn apply_undo(inner: &mut Inner, op: UndoOp) {
    match op {
        UndoOp::UntombstoneVertex(v) => {
            if let Some(d) = inner.vertices.get_mut(v) {
                d.tombstoned = true;
            }
        }
        UndoOp::TombstoneVertex(v) => {
            if let Some(d) = inner.vertices.get_mut(v) {
                d.tombstoned = false;
            }
        }
        UndoOp::RestoreProp(v, key, old) => {
            if let Some(d) = inner.vertices.get_mut(v) {
                match old {
                    Some(val) => {
                        d.props.insert(key, val);
                    }
                    None => {
                        d.props.remove(&key);
                    }
                }
            }
        }
        UndoOp::Disconnect(src, dst, kind) => {
            if let Some(d) = inner.vertices.get_mut(src) {
                if let Some(edges) = d.out_edges.get_mut(&kind) {
                    edges.retain(|&x| x != dst);
                }
            }
            if let Some(d) = inner.vertices.get_mut(dst) {
                if let Some(edges) = d.in_edges.get_mut(&kind) {
                    edges.retain(|&x| x != src);
                }
            }
        }
        UndoOp::Connect(src, dst, kind) => {
            if let Some(d) = inner.vertices.get_mut(src) {
                d.out_edges.entry(kind).or_default().push(dst);
            }
            if let Some(d) = inner.vertices.get_mut(dst) {
                d.in_edges.entry(kind).or_default().push(src);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollback_undoes_vertex_creation() {
        let g = MemGraph::new();
        let mut txn = g.begin();
        let v = g.create_vertex(&mut txn);
        assert!(g.vertex_exists(v));
        g.finish(txn).unwrap();
        assert!(!g.vertex_exists(v));
    }

    #[test]
    fn commit_keeps_vertex() {
        let g = MemGraph::new();
        let mut txn = g.begin();
        let v = g.create_vertex(&mut txn);
        txn.success();
        g.finish(txn).unwrap();
        assert!(g.vertex_exists(v));
    }

    #[test]
    fn rollback_restores_prop_overwrite() {
        let g = MemGraph::new();
        let mut txn = g.begin();
        let v = g.create_vertex(&mut txn);
        g.set_prop(&mut txn, v, "k", PropertyValue::I64(1));
        txn.success();
        g.finish(txn).unwrap();

        let mut txn2 = g.begin();
        g.set_prop(&mut txn2, v, "k", PropertyValue::I64(2));
        // not marked successful -> rolled back
        g.finish(txn2).unwrap();

        assert_eq!(g.get_prop(v, "k"), Some(PropertyValue::I64(1)));
    }

    #[test]
    fn rollback_undoes_edge_connect() {
        let g = MemGraph::new();
        let mut txn = g.begin();
        let a = g.create_vertex(&mut txn);
        let b = g.create_vertex(&mut txn);
        txn.success();
        g.finish(txn).unwrap();

        let mut txn2 = g.begin();
        g.connect(&mut txn2, a, b, EdgeKind::Child);
        g.finish(txn2).unwrap();

        assert!(g.iterate_out(a, EdgeKind::Child).is_empty());
    }
}
