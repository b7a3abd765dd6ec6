//! Dynamic layer (C8): a predicate-filtered view over a shared base index, composed by
//! wrapping a `Visitor` rather than subclassing a search class (§9's "inheritance ->
//! capability sets" note).

use serde_json::Value;

use crate::envelope::Envelope;
use crate::error::Error;
use crate::graph::{self, EdgeKind, GraphStore, PropertyValue};
use crate::store::TreeStore;
use crate::visitor::{walk, Visitor};

/// A structural JSON predicate node (§4.7 dialect 1): `{ "properties": {...}, "step": {
/// "type": EDGE, "direction": IN|OUT, "properties": {...}, "step": {...} } }`.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonPredicate {
    properties: Vec<(String, PropertyValue)>,
    step: Option<Box<Step>>,
}

#[derive(Debug, Clone, PartialEq)]
struct Step {
    edge: EdgeKind,
    direction: Direction,
    predicate: JsonPredicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    In,
    Out,
}

impl JsonPredicate {
    /// Parses a predicate out of its JSON source text.
    pub fn parse(source: &str) -> Result<Self, String> {
        let value: Value = serde_json::from_str(source).map_err(|e| e.to_string())?;
        Self::from_value(&value)
    }

    fn from_value(value: &Value) -> Result<Self, String> {
        let obj = value.as_object().ok_or("predicate must be a JSON object")?;

        let mut properties = Vec::new();
        if let Some(props) = obj.get("properties") {
            let props = props.as_object().ok_or("\"properties\" must be an object")?;
            for (k, v) in props {
                properties.push((k.clone(), json_to_property(v)?));
            }
        }

        let step = match obj.get("step") {
            Some(step_value) => Some(Box::new(parse_step(step_value)?)),
            None => None,
        };

        Ok(JsonPredicate { properties, step })
    }

    /// Evaluates the predicate against a geometry vertex (§4.7): all listed properties
    /// must match (exact or string-form equality), then if `step` is present, traverse
    /// one typed edge and recurse; a missing edge is false.
    pub fn evaluate<G: GraphStore>(&self, store: &G, vertex: G::VertexId) -> bool {
        for (key, expected) in &self.properties {
            match store.get_prop(vertex, key) {
                Some(actual) if actual.loosely_eq(expected) => {}
                _ => return false,
            }
        }

        match &self.step {
            None => true,
            Some(step) => {
                let next = match step.direction {
                    Direction::Out => store.single_out(vertex, step.edge),
                    Direction::In => store.single_in(vertex, step.edge),
                };
                match next {
                    Some(v) => step.predicate.evaluate(store, v),
                    None => false,
                }
            }
        }
    }
}

fn parse_step(value: &Value) -> Result<Step, String> {
    let obj = value.as_object().ok_or("\"step\" must be an object")?;

    let edge = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or("step is missing \"type\"")?;
    let edge = parse_edge_kind(edge)?;

    let direction = obj
        .get("direction")
        .and_then(Value::as_str)
        .ok_or("step is missing \"direction\"")?;
    let direction = match direction {
        "IN" => Direction::In,
        "OUT" => Direction::Out,
        other => return Err(format!("unknown direction {other:?}")),
    };

    let predicate = JsonPredicate::from_value(value)?;

    Ok(Step {
        edge,
        direction,
        predicate,
    })
}

fn parse_edge_kind(s: &str) -> Result<EdgeKind, String> {
    match s {
        "ROOT" => Ok(EdgeKind::Root),
        "CHILD" => Ok(EdgeKind::Child),
        "REFERENCE" => Ok(EdgeKind::Reference),
        "METADATA" => Ok(EdgeKind::Metadata),
        "LAYER_CONFIG" => Ok(EdgeKind::LayerConfig),
        other => Err(format!("unknown edge type {other:?}")),
    }
}

fn json_to_property(value: &Value) -> Result<PropertyValue, String> {
    match value {
        Value::Bool(b) => Ok(PropertyValue::Bool(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(PropertyValue::I64(i))
            } else if let Some(f) = n.as_f64() {
                Ok(PropertyValue::F64(f))
            } else {
                Err(format!("unrepresentable number {n}"))
            }
        }
        Value::String(s) => Ok(PropertyValue::Str(s.clone())),
        other => Err(format!("unsupported property value {other}")),
    }
}

/// An OGC-style CQL predicate over the decoded feature (§4.7 dialect 2). Parsing and
/// evaluating the CQL grammar itself is out of scope (§1); this hook lets a host
/// supply its own evaluator closure against the decoded geometry and its properties.
pub trait CqlEvaluator<G: GraphStore> {
    fn matches(&self, store: &G, geometry: &geo::Geometry<f64>, vertex: G::VertexId) -> bool;
}

enum Predicate<G: GraphStore, E: crate::encoder::GeometryEncoder<G>> {
    Json(JsonPredicate),
    Cql(Box<dyn CqlEvaluator<G>>, std::marker::PhantomData<E>),
}

/// A predicate-filtered view over a base layer's index, sharing its root rather than
/// copying (§4.7). Read-only: this type simply has no mutating methods.
pub struct DynamicLayer<'a, G: GraphStore, E: crate::encoder::GeometryEncoder<G>> {
    store: &'a G,
    tree: &'a TreeStore<G>,
    encoder: &'a E,
    predicate: Predicate<G, E>,
}

impl<'a, G: GraphStore, E: crate::encoder::GeometryEncoder<G>> DynamicLayer<'a, G, E> {
    pub fn with_json_predicate(store: &'a G, tree: &'a TreeStore<G>, encoder: &'a E, predicate: JsonPredicate) -> Self {
        Self {
            store,
            tree,
            encoder,
            predicate: Predicate::Json(predicate),
        }
    }

    pub fn with_cql_evaluator(
        store: &'a G,
        tree: &'a TreeStore<G>,
        encoder: &'a E,
        evaluator: Box<dyn CqlEvaluator<G>>,
    ) -> Self {
        Self {
            store,
            tree,
            encoder,
            predicate: Predicate::Cql(evaluator, std::marker::PhantomData),
        }
    }

    fn matches(&self, geom: G::VertexId) -> bool {
        match &self.predicate {
            Predicate::Json(p) => p.evaluate(self.store, geom),
            Predicate::Cql(evaluator, _) => {
                let geometry = self.encoder.decode_geometry(self.store, geom);
                evaluator.matches(self.store, &geometry, geom)
            }
        }
    }

    /// Every geometry in the base index whose vertex satisfies this layer's predicate.
    pub fn search_all(&self) -> Result<Vec<G::VertexId>, Error<G::StoreError>> {
        struct Filtered<'p, G: GraphStore, E: crate::encoder::GeometryEncoder<G>> {
            layer: &'p DynamicLayer<'p, G, E>,
            out: Vec<G::VertexId>,
        }
        impl<'p, G: GraphStore, E: crate::encoder::GeometryEncoder<G>> Visitor<G> for Filtered<'p, G, E> {
            fn needs_to_visit(&mut self, _node_bbox: Envelope) -> bool {
                true
            }
            fn on_index_reference(&mut self, geom: G::VertexId, _geom_bbox: Envelope) -> bool {
                if self.layer.matches(geom) {
                    self.out.push(geom);
                }
                true
            }
        }

        let root = self.tree.root_readonly(self.store);
        let mut visitor = Filtered { layer: self, out: Vec::new() };
        walk(self.store, self.tree, root, &mut visitor)?;
        Ok(visitor.out)
    }

    /// The number of geometries matching this sub-layer's predicate. Unlike the base
    /// layer's `count()`, this is always computed by traversal; sub-layers share the
    /// base's root and metadata and have no counter of their own (§4.7).
    pub fn count(&self) -> Result<u64, Error<G::StoreError>> {
        Ok(self.search_all()?.len() as u64)
    }

    /// Any write attempted through a dynamic layer must go through the base layer
    /// instead; this is the uniform rejection point every mutating call on this type
    /// routes to.
    pub fn reject_write() -> Result<(), Error<G::StoreError>> {
        Err(Error::ReadOnlyView)
    }
}

/// Creates and persists a §3 layer-config vertex for a JSON-predicate sub-layer: name,
/// geometry type, and the predicate's source text, connected to the base layer vertex
/// via `LAYER_CONFIG` (§4.7's "each sub-layer holds its own predicate and name").
pub fn create_json_layer_config<G: GraphStore>(
    store: &G,
    txn: &mut G::Txn,
    base_layer_vertex: G::VertexId,
    name: impl Into<String>,
    gtype: impl Into<String>,
    query: impl Into<String>,
) -> G::VertexId {
    let config = store.create_vertex(txn);
    store.set_prop(txn, config, graph::PROP_LAYER, PropertyValue::Str(name.into()));
    store.set_prop(txn, config, graph::PROP_GTYPE, PropertyValue::Str(gtype.into()));
    store.set_prop(txn, config, graph::PROP_QUERY, PropertyValue::Str(query.into()));
    store.connect(txn, base_layer_vertex, config, EdgeKind::LayerConfig);
    config
}

/// Every layer-config vertex hanging off `base_layer_vertex` (§3's "zero or more
/// outgoing `LAYER_CONFIG`").
pub fn list_layer_configs<G: GraphStore>(store: &G, base_layer_vertex: G::VertexId) -> Vec<G::VertexId> {
    store.iterate_out(base_layer_vertex, EdgeKind::LayerConfig)
}

/// Reopens a `DynamicLayer` from a persisted layer-config vertex, parsing its stored
/// `query` property as a structural JSON predicate (§4.7 dialect 1). Fails if the
/// vertex has no `query` property or the stored text doesn't parse.
pub fn open_json_layer_config<'a, G: GraphStore, E: crate::encoder::GeometryEncoder<G>>(
    store: &'a G,
    tree: &'a TreeStore<G>,
    encoder: &'a E,
    layer_config_vertex: G::VertexId,
) -> Result<DynamicLayer<'a, G, E>, String> {
    let query = store
        .get_prop(layer_config_vertex, graph::PROP_QUERY)
        .and_then(|p| p.as_str().map(str::to_owned))
        .ok_or("layer-config vertex has no query property")?;
    let predicate = JsonPredicate::parse(&query)?;
    Ok(DynamicLayer::with_json_predicate(store, tree, encoder, predicate))
}
