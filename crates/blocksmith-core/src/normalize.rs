//! Conversion of the two model output shapes into the canonical flat diagram,
//! with nested internal block diagrams pulled out as separate records.
//!
//! Flat shape: `elements`/`relationships`, where an element may carry
//! `internal_diagram: {nodes, edges}`. Nested shape: ReactFlow-style
//! `nodes`/`edges` with `data.label` and `data.properties`.

use std::borrow::Cow;

use serde_json::{json, Map, Value};

use crate::repair::{Repair, RepairLog, Repaired};
use crate::validate::{endpoint, position_from_value, repair_into, string_field};
use crate::{
    make_edge_id, Diagram, Element, ElementType, GenerationMode, IbdEdge, IbdNode, IbdRecord,
    IbdSource,
};

/// Fewest nodes and edges an enhanced-mode IBD should have.
pub const MIN_IBD_NODES: usize = 2;
pub const MIN_IBD_EDGES: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub diagram: Diagram,
    pub ibds: Vec<ExtractedIbd>,
}

/// An internal block diagram lifted out of its parent element.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ExtractedIbd {
    pub parent_block_id: String,
    pub nodes: Vec<IbdNode>,
    pub edges: Vec<IbdEdge>,
}

impl ExtractedIbd {
    /// Attach to a stored parent diagram. The store assigns the record id.
    pub fn into_record(self, parent_bdd_diagram_id: u64, source: IbdSource) -> IbdRecord {
        IbdRecord {
            id: 0,
            parent_bdd_diagram_id,
            parent_block_id: self.parent_block_id,
            nodes: self.nodes,
            edges: self.edges,
            source,
        }
    }
}

/// Repair `raw` (either shape) into a flat diagram. In enhanced mode nested
/// diagrams are extracted; in standard mode they are discarded.
pub fn normalize(raw: &Value, mode: GenerationMode) -> Repaired<Normalized> {
    let mut log = RepairLog::new();

    let flat = if is_nested_shape(raw) {
        Cow::Owned(flatten_nested(raw))
    } else {
        Cow::Borrowed(raw)
    };
    let mut diagram = repair_into(&flat, ElementType::BDD, &mut log);

    let ibds = match mode {
        GenerationMode::Enhanced => extract_internal_diagrams(&mut diagram.elements, &mut log),
        GenerationMode::Standard => {
            for element in &mut diagram.elements {
                if element.internal_diagram.take().is_some() {
                    log.push(Repair::IgnoredInternalDiagram {
                        element_id: element.id.clone(),
                    });
                }
            }
            Vec::new()
        }
    };

    Repaired::new(Normalized { diagram, ibds }, log)
}

fn is_nested_shape(raw: &Value) -> bool {
    raw.get("elements").is_none() && raw.get("nodes").is_some_and(Value::is_array)
}

/// Remove every element's nested diagram and return them as IBDs keyed by
/// the element id. The element keeps `has_internal_diagram = true`.
pub fn extract_internal_diagrams(
    elements: &mut [Element],
    log: &mut RepairLog,
) -> Vec<ExtractedIbd> {
    elements
        .iter_mut()
        .filter_map(|element| {
            let nested = element.internal_diagram.take()?;
            element.has_internal_diagram = true;
            let parent_block_id = element.id.clone();

            let nodes: Vec<IbdNode> = nested
                .nodes
                .iter()
                .enumerate()
                .filter_map(|(index, node)| {
                    let node = ibd_node_from_value(node);
                    if node.is_none() {
                        log.push(Repair::DroppedIbdNode {
                            parent_block_id: parent_block_id.clone(),
                            index,
                        });
                    }
                    node
                })
                .collect();

            let edges: Vec<IbdEdge> = nested
                .edges
                .iter()
                .enumerate()
                .filter_map(|(index, edge)| {
                    let edge = ibd_edge_from_value(edge);
                    if edge.is_none() {
                        log.push(Repair::DroppedIbdEdge {
                            parent_block_id: parent_block_id.clone(),
                            index,
                        });
                    }
                    edge
                })
                .collect();

            if nodes.len() < MIN_IBD_NODES || edges.len() < MIN_IBD_EDGES {
                log.push(Repair::SparseInternalDiagram {
                    parent_block_id: parent_block_id.clone(),
                    nodes: nodes.len(),
                    edges: edges.len(),
                });
            }

            Some(ExtractedIbd {
                parent_block_id,
                nodes,
                edges,
            })
        })
        .collect()
}

const IBD_NODE_KEYS: &[&str] = &["id", "type", "name", "description", "properties", "position"];
const IBD_EDGE_KEYS: &[&str] = &["id", "source", "target", "label"];

/// Build an IBD node from whatever the model emitted. Nulls read as empty,
/// scalar ids are stringified and unrecognized keys are kept in `extra`.
/// Only a non-object or a node without a usable id is rejected.
fn ibd_node_from_value(value: &Value) -> Option<IbdNode> {
    let map = value.as_object()?;
    let id = endpoint(map, "id")?;
    Some(IbdNode {
        id,
        node_type: string_field(map, "type")
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| ElementType::IbdBlock.as_str().to_string()),
        name: string_field(map, "name")
            .or_else(|| string_field(map, "label"))
            .unwrap_or_default(),
        description: string_field(map, "description").unwrap_or_default(),
        properties: map
            .get("properties")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default(),
        position: map.get("position").and_then(position_from_value),
        extra: unrecognized(map, IBD_NODE_KEYS),
    })
}

/// Edges need both endpoints; a missing id is derived from them.
fn ibd_edge_from_value(value: &Value) -> Option<IbdEdge> {
    let map = value.as_object()?;
    let source = endpoint(map, "source")?;
    let target = endpoint(map, "target")?;
    Some(IbdEdge {
        id: endpoint(map, "id").unwrap_or_else(|| make_edge_id(&source, &target)),
        label: string_field(map, "label").unwrap_or_default(),
        extra: unrecognized(map, IBD_EDGE_KEYS),
        source,
        target,
    })
}

fn unrecognized(map: &Map<String, Value>, known: &[&str]) -> Map<String, Value> {
    map.iter()
        .filter(|(key, _)| !known.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Rewrite the nested `nodes`/`edges` shape as the flat shape. Values that
/// are not objects pass through for the validator to drop.
pub fn flatten_nested(raw: &Value) -> Value {
    let nodes: Vec<Value> = raw
        .get("nodes")
        .and_then(Value::as_array)
        .map(|nodes| nodes.iter().map(node_to_element).collect())
        .unwrap_or_else(Vec::new);
    let edges: Vec<Value> = raw
        .get("edges")
        .and_then(Value::as_array)
        .map(|edges| edges.iter().map(edge_to_relationship).collect())
        .unwrap_or_else(Vec::new);

    let mut flat = json!({
        "elements": nodes,
        "relationships": edges,
    });
    if let Some(kind) = raw.get("diagram_type") {
        flat["diagram_type"] = kind.clone();
    }
    flat
}

fn node_to_element(node: &Value) -> Value {
    let Some(node) = node.as_object() else {
        return node.clone();
    };
    let data = node.get("data").and_then(Value::as_object);
    let from_data = |key: &str| data.and_then(|d| d.get(key)).cloned();

    let mut element = Map::new();
    copy_key(node, &mut element, "id", "id");
    copy_key(node, &mut element, "type", "type");
    if let Some(label) = from_data("label").or_else(|| node.get("name").cloned()) {
        element.insert("name".into(), label);
    }
    if let Some(description) = from_data("description").or_else(|| node.get("description").cloned())
    {
        element.insert("description".into(), description);
    }

    let mut properties = Map::new();
    if let Some(Value::Object(props)) = from_data("properties") {
        for (key, value) in props {
            // The node id already lives at the top level.
            if key != "id" {
                properties.insert(key, value);
            }
        }
    }
    element.insert("properties".into(), Value::Object(properties));

    if let Some(nested) = node
        .get("internal_diagram")
        .cloned()
        .or_else(|| from_data("internal_diagram"))
    {
        element.insert("internal_diagram".into(), nested);
    }
    Value::Object(element)
}

fn edge_to_relationship(edge: &Value) -> Value {
    let Some(edge) = edge.as_object() else {
        return edge.clone();
    };
    let mut rel = Map::new();
    copy_key(edge, &mut rel, "source", "source_id");
    copy_key(edge, &mut rel, "target", "target_id");
    copy_key(edge, &mut rel, "type", "type");
    let name = edge
        .get("data")
        .and_then(|d| d.get("name"))
        .filter(|n| !n.is_null())
        .or_else(|| edge.get("label"))
        .cloned();
    if let Some(name) = name {
        rel.insert("name".into(), name);
    }
    Value::Object(rel)
}

fn copy_key(from: &Map<String, Value>, to: &mut Map<String, Value>, key: &str, as_key: &str) {
    if let Some(value) = from.get(key) {
        to.insert(as_key.into(), value.clone());
    }
}
