//! Non-fatal defects found while repairing model output.
//!
//! Repairs never abort the pipeline. Each one is recorded in a [`RepairLog`]
//! so callers can report it, and is logged as a warning when it happens.

use std::fmt;

use log::warn;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Repair {
    /// The document was not a diagram at all; an empty diagram replaced it.
    MalformedDiagram { reason: String },
    CoercedDiagramType { original: String },
    DroppedElement { index: usize },
    AssignedId { index: usize, id: String },
    DuplicateId { index: usize, original: String, id: String },
    CoercedType { id: String, original: Option<String> },
    DroppedRelationship {
        index: usize,
        source_id: Option<String>,
        target_id: Option<String>,
        reason: DropReason,
    },
    IgnoredInternalDiagram { element_id: String },
    DroppedIbdNode { parent_block_id: String, index: usize },
    DroppedIbdEdge { parent_block_id: String, index: usize },
    /// Reported only. Padding the IBD would mean inventing components.
    SparseInternalDiagram { parent_block_id: String, nodes: usize, edges: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    NotAnObject,
    MissingEndpoint,
    UnknownSource,
    UnknownTarget,
}

impl Repair {
    pub fn kind(&self) -> &'static str {
        match self {
            Repair::MalformedDiagram { .. } => "malformed_diagram",
            Repair::CoercedDiagramType { .. } => "coerced_diagram_type",
            Repair::DroppedElement { .. } => "dropped_element",
            Repair::AssignedId { .. } => "assigned_id",
            Repair::DuplicateId { .. } => "duplicate_id",
            Repair::CoercedType { .. } => "coerced_type",
            Repair::DroppedRelationship { .. } => "dropped_relationship",
            Repair::IgnoredInternalDiagram { .. } => "ignored_internal_diagram",
            Repair::DroppedIbdNode { .. } => "dropped_ibd_node",
            Repair::DroppedIbdEdge { .. } => "dropped_ibd_edge",
            Repair::SparseInternalDiagram { .. } => "sparse_internal_diagram",
        }
    }
}

impl fmt::Display for Repair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Repair::MalformedDiagram { reason } => {
                write!(f, "malformed diagram ({reason}), using an empty diagram")
            }
            Repair::CoercedDiagramType { original } => {
                write!(f, "unknown diagram type '{original}' changed to 'block'")
            }
            Repair::DroppedElement { index } => {
                write!(f, "element at index {index} is not an object, dropped")
            }
            Repair::AssignedId { index, id } => {
                write!(f, "element without ID at index {index}, assigned ID '{id}'")
            }
            Repair::DuplicateId { index, original, id } => write!(
                f,
                "element at index {index} repeats ID '{original}', assigned ID '{id}'"
            ),
            Repair::CoercedType { id, original } => write!(
                f,
                "changed invalid element type '{}' to 'block' for element {id}",
                original.as_deref().unwrap_or("unknown")
            ),
            Repair::DroppedRelationship {
                index,
                source_id,
                target_id,
                reason,
            } => {
                let source = source_id.as_deref().unwrap_or("?");
                let target = target_id.as_deref().unwrap_or("?");
                let why = match reason {
                    DropReason::NotAnObject => "not an object",
                    DropReason::MissingEndpoint => "missing source or target ID",
                    DropReason::UnknownSource => "source not found in elements",
                    DropReason::UnknownTarget => "target not found in elements",
                };
                write!(f, "skipping relationship {index} ({source} -> {target}): {why}")
            }
            Repair::IgnoredInternalDiagram { element_id } => write!(
                f,
                "internal diagram on '{element_id}' ignored outside enhanced mode"
            ),
            Repair::DroppedIbdNode {
                parent_block_id,
                index,
            } => write!(
                f,
                "internal diagram of '{parent_block_id}': node {index} is invalid, dropped"
            ),
            Repair::DroppedIbdEdge {
                parent_block_id,
                index,
            } => write!(
                f,
                "internal diagram of '{parent_block_id}': edge {index} is invalid, dropped"
            ),
            Repair::SparseInternalDiagram {
                parent_block_id,
                nodes,
                edges,
            } => write!(
                f,
                "internal diagram of '{parent_block_id}' has {nodes} nodes and {edges} edges, expected at least 2 of each"
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RepairLog {
    repairs: Vec<Repair>,
}

impl RepairLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, repair: Repair) {
        warn!(kind = repair.kind(); "{repair}");
        self.repairs.push(repair);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Repair> {
        self.repairs.iter()
    }

    pub fn len(&self) -> usize {
        self.repairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repairs.is_empty()
    }

    pub fn into_vec(self) -> Vec<Repair> {
        self.repairs
    }
}

/// A value produced by a repairing operation, with the repairs it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Repaired<T> {
    pub value: T,
    pub log: RepairLog,
}

impl<T> Repaired<T> {
    pub fn new(value: T, log: RepairLog) -> Self {
        Self { value, log }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Repaired<U> {
        Repaired {
            value: f(self.value),
            log: self.log,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repairs_serialize_with_kind_tag() {
        let mut log = RepairLog::new();
        log.push(Repair::AssignedId {
            index: 2,
            id: "element-3".into(),
        });
        let json = serde_json::to_value(&log).unwrap();
        assert_eq!(json[0]["kind"], "assigned_id");
        assert_eq!(json[0]["id"], "element-3");
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn coerced_type_message_names_original() {
        let repair = Repair::CoercedType {
            id: "x".into(),
            original: Some("actuator".into()),
        };
        assert_eq!(
            repair.to_string(),
            "changed invalid element type 'actuator' to 'block' for element x"
        );
    }
}
