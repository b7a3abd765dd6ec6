//! Search façade (C7): `search_all`, `search_intersect_window`, and
//! `search_abstract_intersection`, all built on the `Visitor` protocol of C6 rather than
//! hand-rolled traversal code of their own.

use geo::{Geometry, Intersects, Rect};

use crate::envelope::Envelope;
use crate::error::Error;
use crate::graph::GraphStore;
use crate::store::TreeStore;
use crate::visitor::{walk, Visitor};

fn window_as_rect(window: Envelope) -> Rect<f64> {
    Rect::new((window.xmin, window.ymin), (window.xmax, window.ymax))
}

/// One hit from a search: the geometry vertex, its envelope, and optionally its fully
/// decoded geometry (only populated when the search needed it for refinement, §4.6).
#[derive(Debug, Clone)]
pub struct SearchResult<G: GraphStore> {
    pub geom: G::VertexId,
    pub envelope: Envelope,
    pub geometry: Option<Geometry<f64>>,
}

/// Every geometry indexed in the layer, in traversal order. Equivalent to a
/// `RecordCounter` that keeps records instead of just counting them.
pub fn search_all<G: GraphStore>(
    store: &G,
    tree: &TreeStore<G>,
    root: G::VertexId,
) -> Result<Vec<SearchResult<G>>, Error<G::StoreError>> {
    struct Collector<G: GraphStore> {
        out: Vec<SearchResult<G>>,
    }
    impl<G: GraphStore> Visitor<G> for Collector<G> {
        fn needs_to_visit(&mut self, _node_bbox: Envelope) -> bool {
            true
        }
        fn on_index_reference(&mut self, geom: G::VertexId, geom_bbox: Envelope) -> bool {
            self.out.push(SearchResult {
                geom,
                envelope: geom_bbox,
                geometry: None,
            });
            true
        }
    }

    let mut collector = Collector { out: Vec::new() };
    walk(store, tree, root, &mut collector)?;
    Ok(collector.out)
}

/// Two-phase window intersection (§4.6). Phase one prunes by bbox via `Visitor` and
/// splits survivors into two buckets: `window` fully covers the envelope (added
/// directly, no decode needed), or merely intersects it (needs the refinement decode).
/// Phase two decodes only the second bucket and keeps only the candidates whose actual
/// geometry intersects `window`.
pub fn search_intersect_window<G: GraphStore, E: crate::encoder::GeometryEncoder<G>>(
    store: &G,
    tree: &TreeStore<G>,
    root: G::VertexId,
    encoder: &E,
    window: Envelope,
) -> Result<Vec<SearchResult<G>>, Error<G::StoreError>> {
    enum Candidate<G: GraphStore> {
        Covered(G::VertexId, Envelope),
        NeedsRefinement(G::VertexId, Envelope),
    }

    struct BboxOnly<G: GraphStore> {
        window: Envelope,
        candidates: Vec<Candidate<G>>,
    }

    impl<G: GraphStore> Visitor<G> for BboxOnly<G> {
        fn needs_to_visit(&mut self, node_bbox: Envelope) -> bool {
            node_bbox.is_null() || node_bbox.intersects(&self.window)
        }

        fn on_index_reference(&mut self, geom: G::VertexId, geom_bbox: Envelope) -> bool {
            if self.window.covers(&geom_bbox) {
                self.candidates.push(Candidate::Covered(geom, geom_bbox));
            } else if self.window.intersects(&geom_bbox) {
                self.candidates.push(Candidate::NeedsRefinement(geom, geom_bbox));
            }
            true
        }
    }

    let mut phase1 = BboxOnly::<G> {
        window,
        candidates: Vec::new(),
    };
    walk(store, tree, root, &mut phase1)?;

    let window_rect = window_as_rect(window);
    let mut out = Vec::with_capacity(phase1.candidates.len());
    for candidate in phase1.candidates {
        match candidate {
            Candidate::Covered(geom, envelope) => out.push(SearchResult {
                geom,
                envelope,
                geometry: None,
            }),
            Candidate::NeedsRefinement(geom, envelope) => {
                let geometry = encoder.decode_geometry(store, geom);
                if geometry.intersects(&window_rect) {
                    out.push(SearchResult {
                        geom,
                        envelope,
                        geometry: Some(geometry),
                    });
                }
            }
        }
    }
    Ok(out)
}

/// The common shape behind envelope-intersection searches (§4.6). `needs_to_visit`
/// prunes by `intersects(nodeBbox, envelope(G))`; on a leaf reference whose envelope
/// intersects `envelope(G)`, dispatch to `on_envelope_intersection` so the caller
/// decides containment, touches, or whatever finer relation it actually wants.
pub trait EnvelopeIntersectionRefiner<G: GraphStore> {
    /// Called once per leaf reference whose envelope survived the bbox-intersects
    /// prefilter. Returns whether `geom` belongs in the result set.
    fn on_envelope_intersection(&mut self, store: &G, geom: G::VertexId, geom_bbox: Envelope) -> bool;
}

/// Runs `AbstractIntersection(target)` over the tree rooted at `root`, deferring every
/// admitted candidate's final accept/reject decision to `refiner`.
pub fn search_abstract_intersection<G: GraphStore, R: EnvelopeIntersectionRefiner<G>>(
    store: &G,
    tree: &TreeStore<G>,
    root: G::VertexId,
    target: Envelope,
    refiner: &mut R,
) -> Result<Vec<SearchResult<G>>, Error<G::StoreError>> {
    struct AbstractVisitor<'r, G: GraphStore, R: EnvelopeIntersectionRefiner<G>> {
        target: Envelope,
        refiner: &'r mut R,
        out: Vec<SearchResult<G>>,
    }

    impl<'r, G: GraphStore, R: EnvelopeIntersectionRefiner<G>> AbstractVisitor<'r, G, R> {
        fn visit_reference(&mut self, store: &G, geom: G::VertexId, geom_bbox: Envelope) -> bool {
            if geom_bbox.intersects(&self.target) && self.refiner.on_envelope_intersection(store, geom, geom_bbox) {
                self.out.push(SearchResult {
                    geom,
                    envelope: geom_bbox,
                    geometry: None,
                });
            }
            true
        }
    }

    // The `Visitor` trait's `on_index_reference` hook has no `&G` parameter (§4.5), so
    // thread `store` through a thin adapter that closes over it instead of widening the
    // trait for this one search kind.
    struct StoreBoundVisitor<'s, 'r, G: GraphStore, R: EnvelopeIntersectionRefiner<G>> {
        store: &'s G,
        inner: AbstractVisitor<'r, G, R>,
    }

    impl<'s, 'r, G: GraphStore, R: EnvelopeIntersectionRefiner<G>> Visitor<G> for StoreBoundVisitor<'s, 'r, G, R> {
        fn needs_to_visit(&mut self, node_bbox: Envelope) -> bool {
            node_bbox.is_null() || node_bbox.intersects(&self.inner.target)
        }

        fn on_index_reference(&mut self, geom: G::VertexId, geom_bbox: Envelope) -> bool {
            self.inner.visit_reference(self.store, geom, geom_bbox)
        }
    }

    let mut visitor = StoreBoundVisitor {
        store,
        inner: AbstractVisitor {
            target,
            refiner,
            out: Vec::new(),
        },
    };
    walk(store, tree, root, &mut visitor)?;
    Ok(visitor.inner.out)
}
