//! Error kinds (§7): one `thiserror` enum rather than one error type per operation.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error<S: std::error::Error + 'static> {
    /// A geometry vertex given to `remove`/`get` is not reachable from this layer's
    /// index root.
    #[error("geometry vertex is not indexed by this layer")]
    NotIndexed,

    /// An invariant of §3 was observed violated, e.g. `choose_subtree` found no
    /// candidate child in a non-empty tree. Fatal: the caller should treat the layer
    /// as corrupt.
    #[error("internal invariant violated in layer {layer}: {detail}")]
    InternalInvariant { layer: String, detail: String },

    /// Mutation attempted through a dynamic sub-layer; retry against the base layer.
    #[error("cannot mutate a read-only dynamic layer view")]
    ReadOnlyView,

    /// The `bbox` property was present but not a 4-double vector.
    #[error("bbox property has an unrecognised width")]
    EncoderMismatch,

    /// Two shapes were compared with mismatched dimensionality (always 2 in this
    /// crate, but geometry decoders can still hand back degenerate envelopes).
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    /// A dynamic-layer predicate could not be evaluated (malformed JSON shape,
    /// missing edge to step through, or a CQL expression the encoder can't resolve).
    #[error("predicate evaluation failed: {0}")]
    Predicate(String),

    /// Propagated from the host graph store, original cause preserved.
    #[error("host store error: {0}")]
    HostStoreError(#[from] S),
}

impl<S: std::error::Error + 'static> Error<S> {
    pub fn internal_invariant(layer: impl Into<String>, detail: impl Into<String>) -> Self {
        let layer = layer.into();
        let detail = detail.into();
        log::error!(target: "graph_rtree", "internal invariant violated in layer {layer}: {detail}");
        Error::InternalInvariant { layer, detail }
    }
}
