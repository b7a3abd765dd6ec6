//! The geometry encoder capability (§6): a pluggable mapping between a geometry-bearing
//! vertex in the host's domain graph and its decoded `geo_types` representation.

use geo::{BoundingRect, Geometry};

use crate::envelope::Envelope;
use crate::graph::GraphStore;

/// Maps geometry vertices to envelopes and decoded geometries and back.
///
/// Implementations are expected to be stateless (§5) and shareable across concurrent
/// readers.
pub trait GeometryEncoder<G: GraphStore> {
    /// The envelope of the geometry stored on `geom`, without paying to fully decode it.
    fn decode_envelope(&self, store: &G, geom: G::VertexId) -> Envelope;

    /// The fully decoded geometry, used only by search refinement steps that need more
    /// than the bounding box (§4.6's "refinement step").
    fn decode_geometry(&self, store: &G, geom: G::VertexId) -> Geometry<f64>;

    /// Writes `geometry` onto `target`, encoding it into whatever properties this
    /// encoder's `decode_*` methods expect to read back.
    fn encode_geometry(&self, store: &G, txn: &mut G::Txn, target: G::VertexId, geometry: &Geometry<f64>);
}

/// Derives an [`Envelope`] from a decoded `geo_types` geometry via its bounding rect.
pub fn envelope_of_geometry(geometry: &Geometry<f64>) -> Envelope {
    match geometry.bounding_rect() {
        Some(rect) => Envelope::new(rect.min().x, rect.max().x, rect.min().y, rect.max().y),
        None => Envelope::null(),
    }
}
