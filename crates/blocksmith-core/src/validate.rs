//! Validation and repair of diagrams emitted by the model.
//!
//! Nothing here fails. Defects are repaired in place or the offending
//! element/relationship is dropped, and every change lands in the
//! [`RepairLog`].

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::repair::{DropReason, Repair, RepairLog, Repaired};
use crate::{
    default_relationship_type, Diagram, DiagramKind, Element, ElementType, InternalDiagram,
    Position, Relationship,
};

/// Type given to elements whose type is missing or not allowed.
pub const DEFAULT_ELEMENT_TYPE: ElementType = ElementType::Block;

/// Turn an untyped model document into a diagram that satisfies the diagram
/// invariants: unique non-empty element ids, and relationship endpoints that
/// exist among the elements.
pub fn validate_and_repair(raw: &Value) -> Repaired<Diagram> {
    let mut log = RepairLog::new();
    let diagram = repair_into(raw, ElementType::BDD, &mut log);
    Repaired::new(diagram, log)
}

pub(crate) fn repair_into(raw: &Value, allowed: &[ElementType], log: &mut RepairLog) -> Diagram {
    let Some(map) = raw.as_object() else {
        log.push(Repair::MalformedDiagram {
            reason: "diagram is not a JSON object".into(),
        });
        return Diagram::default();
    };
    let Some(raw_elements) = map.get("elements").and_then(Value::as_array) else {
        log.push(Repair::MalformedDiagram {
            reason: "missing 'elements' array".into(),
        });
        return Diagram::default();
    };

    let diagram_type = match map.get("diagram_type") {
        None | Some(Value::Null) => DiagramKind::default(),
        Some(Value::String(s)) => DiagramKind::parse(s).unwrap_or_else(|| {
            log.push(Repair::CoercedDiagramType { original: s.clone() });
            DiagramKind::default()
        }),
        Some(other) => {
            log.push(Repair::CoercedDiagramType {
                original: other.to_string(),
            });
            DiagramKind::default()
        }
    };

    let mut raw_elements = raw_elements.clone();
    assign_missing_ids(&mut raw_elements, log);
    coerce_element_types(&mut raw_elements, allowed, log);

    let elements: Vec<Element> = raw_elements
        .iter()
        .enumerate()
        .filter_map(|(index, value)| {
            let element = value.as_object().map(element_from_map);
            if element.is_none() {
                log.push(Repair::DroppedElement { index });
            }
            element
        })
        .collect();

    let raw_relationships = map
        .get("relationships")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let relationships = validate_relationships(&elements, raw_relationships, log);

    Diagram {
        diagram_type,
        elements,
        relationships,
    }
}

/// Give every element a non-empty id that is unique within `elements`.
///
/// An element without an id gets `element-<i+1>` for its position `i`. The
/// first element carrying a given id keeps it; later elements repeating it are
/// treated as missing. Generated ids that would collide get a `-<n>` suffix.
/// Running this again on its own output changes nothing.
pub fn assign_missing_ids(elements: &mut [Value], log: &mut RepairLog) {
    let mut taken: HashSet<String> = HashSet::new();
    let mut pending: Vec<(usize, Option<String>)> = Vec::new();

    for (index, element) in elements.iter_mut().enumerate() {
        let Some(map) = element.as_object_mut() else {
            continue;
        };
        let id = match map.get("id") {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => {
                let id = n.to_string();
                map.insert("id".into(), Value::String(id.clone()));
                Some(id)
            }
            _ => None,
        };
        match id {
            Some(id) if taken.insert(id.clone()) => {}
            duplicate => pending.push((index, duplicate)),
        }
    }

    for (index, duplicate) in pending {
        let base = format!("element-{}", index + 1);
        let mut id = base.clone();
        let mut suffix = 2;
        while taken.contains(&id) {
            id = format!("{base}-{suffix}");
            suffix += 1;
        }
        taken.insert(id.clone());
        if let Some(map) = elements[index].as_object_mut() {
            map.insert("id".into(), Value::String(id.clone()));
        }
        match duplicate {
            Some(original) => log.push(Repair::DuplicateId {
                index,
                original,
                id,
            }),
            None => log.push(Repair::AssignedId { index, id }),
        }
    }
}

/// Keep the relationships whose endpoints both name an element, in their
/// original order.
pub fn validate_relationships(
    elements: &[Element],
    relationships: &[Value],
    log: &mut RepairLog,
) -> Vec<Relationship> {
    let valid_ids: HashSet<&str> = elements.iter().map(|e| e.id.as_str()).collect();

    relationships
        .iter()
        .enumerate()
        .filter_map(|(index, rel)| {
            let Some(map) = rel.as_object() else {
                log.push(Repair::DroppedRelationship {
                    index,
                    source_id: None,
                    target_id: None,
                    reason: DropReason::NotAnObject,
                });
                return None;
            };
            let source_id = endpoint(map, "source_id");
            let target_id = endpoint(map, "target_id");
            let reason = match (&source_id, &target_id) {
                (Some(s), Some(t)) => {
                    if !valid_ids.contains(s.as_str()) {
                        Some(DropReason::UnknownSource)
                    } else if !valid_ids.contains(t.as_str()) {
                        Some(DropReason::UnknownTarget)
                    } else {
                        None
                    }
                }
                _ => Some(DropReason::MissingEndpoint),
            };
            match (reason, source_id, target_id) {
                (None, Some(source_id), Some(target_id)) => Some(Relationship {
                    source_id,
                    target_id,
                    relationship_type: string_field(map, "type")
                        .unwrap_or_else(default_relationship_type),
                    name: string_field(map, "name"),
                }),
                (reason, source_id, target_id) => {
                    log.push(Repair::DroppedRelationship {
                        index,
                        source_id,
                        target_id,
                        reason: reason.unwrap_or(DropReason::MissingEndpoint),
                    });
                    None
                }
            }
        })
        .collect()
}

/// Replace a missing or disallowed `type` with [`DEFAULT_ELEMENT_TYPE`].
pub fn coerce_element_types(elements: &mut [Value], allowed: &[ElementType], log: &mut RepairLog) {
    for element in elements.iter_mut() {
        let Some(map) = element.as_object_mut() else {
            continue;
        };
        let original = map.get("type").map(|t| match t {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });
        let valid = original
            .as_deref()
            .and_then(ElementType::parse)
            .is_some_and(|t| allowed.contains(&t));
        if !valid {
            let id = string_field(map, "id").unwrap_or_else(|| "unknown".into());
            map.insert(
                "type".into(),
                Value::String(DEFAULT_ELEMENT_TYPE.as_str().into()),
            );
            log.push(Repair::CoercedType { id, original });
        }
    }
}

fn element_from_map(map: &Map<String, Value>) -> Element {
    Element {
        id: string_field(map, "id").unwrap_or_default(),
        element_type: map
            .get("type")
            .and_then(Value::as_str)
            .and_then(ElementType::parse)
            .unwrap_or(DEFAULT_ELEMENT_TYPE),
        name: string_field(map, "name").unwrap_or_default(),
        description: string_field(map, "description").unwrap_or_default(),
        properties: map
            .get("properties")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default(),
        position: map.get("position").and_then(position_from_value),
        has_internal_diagram: map
            .get("has_internal_diagram")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        internal_diagram: map
            .get("internal_diagram")
            .and_then(Value::as_object)
            .map(|nested| InternalDiagram {
                nodes: array_field(nested, "nodes"),
                edges: array_field(nested, "edges"),
            }),
    }
}

pub(crate) fn position_from_value(value: &Value) -> Option<Position> {
    Some(Position {
        x: value.get("x")?.as_f64()?,
        y: value.get("y")?.as_f64()?,
    })
}

pub(crate) fn endpoint(map: &Map<String, Value>, key: &str) -> Option<String> {
    string_field(map, key).filter(|s| !s.is_empty())
}

/// Strings as-is; other scalars are stringified, since models often emit numeric ids.
pub(crate) fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn array_field(map: &Map<String, Value>, key: &str) -> Vec<Value> {
    map.get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}
