//! Indexes a handful of rectangles into an in-memory layer, runs a window search, and
//! prints what it found. A stand-in for a real host graph, which would plug its own
//! `GraphStore` + `GeometryEncoder` into the same `Layer` API.

use geo::{BoundingRect, Geometry, Rect};
use graph_rtree::graph::{self, GraphStore, GraphTxn, PropertyValue};
use graph_rtree::memgraph::MemGraph;
use graph_rtree::{Envelope, GeometryEncoder, Layer, TreeStoreConfig};
use rand::Rng;

struct RectEncoder;

impl GeometryEncoder<MemGraph> for RectEncoder {
    fn decode_envelope(&self, store: &MemGraph, geom: <MemGraph as GraphStore>::VertexId) -> Envelope {
        graph::read_bbox(store, geom)
            .ok()
            .flatten()
            .unwrap_or_else(Envelope::null)
    }

    fn decode_geometry(&self, store: &MemGraph, geom: <MemGraph as GraphStore>::VertexId) -> Geometry<f64> {
        let b = self.decode_envelope(store, geom);
        Geometry::Rect(Rect::new((b.xmin, b.ymin), (b.xmax, b.ymax)))
    }

    fn encode_geometry(
        &self,
        store: &MemGraph,
        txn: &mut <MemGraph as GraphStore>::Txn,
        target: <MemGraph as GraphStore>::VertexId,
        geometry: &Geometry<f64>,
    ) {
        let rect = geometry.bounding_rect().expect("non-empty geometry");
        let env = Envelope::new(rect.min().x, rect.max().x, rect.min().y, rect.max().y);
        graph::write_bbox(store, txn, target, env);
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let store = MemGraph::new();
    let layer = Layer::create(store, RectEncoder, "parcels", TreeStoreConfig::new(2, 8))?;

    let mut rng = rand::thread_rng();
    for _ in 0..200 {
        let x: f64 = rng.gen_range(0.0..1000.0);
        let y: f64 = rng.gen_range(0.0..1000.0);
        let w: f64 = rng.gen_range(5.0..40.0);
        let h: f64 = rng.gen_range(5.0..40.0);

        let mut txn = layer.store().begin();
        let vertex = layer.store().create_vertex(&mut txn);
        layer.store().set_prop(&mut txn, vertex, "label", PropertyValue::Str("parcel".into()));
        let encoder = RectEncoder;
        encoder.encode_geometry(
            layer.store(),
            &mut txn,
            vertex,
            &Geometry::Rect(Rect::new((x, y), (x + w, y + h))),
        );
        txn.success();
        layer.store().finish(txn)?;

        layer.add(vertex)?;
    }

    println!("indexed {} geometries", layer.count()?);

    let window = Envelope::new(400.0, 600.0, 400.0, 600.0);
    let hits = layer.search_intersect_window(window)?;
    println!("{} parcels intersect the centre window", hits.len());

    layer.validate_consistency().map_err(anyhow::Error::msg)?;

    Ok(())
}
