//! File-backed persistence for generated diagrams, their internal block
//! diagrams, and the example diagrams used for retrieval.
//!
//! Each collection is one JSON file under the store root. Writes go through
//! a temp file and a rename, so readers never see a half-written file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{blocksmith_home, Diagram, DiagramKind, IbdRecord};

const DIAGRAMS_FILE: &str = "diagrams.json";
const IBDS_FILE: &str = "ibds.json";
const EXAMPLES_FILE: &str = "examples.json";
const TEMPLATES_FILE: &str = "templates.json";
const COMPONENTS_FILE: &str = "components.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("diagram {0} not found")]
    DiagramNotFound(u64),
}

/// A generated diagram, unique by the text it was generated from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredDiagram {
    pub id: u64,
    pub name: String,
    pub raw_text: String,
    pub diagram_type: DiagramKind,
    pub diagram: Diagram,
}

/// A description/diagram pair offered to the model as a one-shot example.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredExample {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub raw_text: String,
    pub diagram_type: DiagramKind,
    pub diagram_json: Value,
    #[serde(default)]
    pub embedding: Vec<f32>,
}

/// A reusable diagram skeleton for one diagram kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredTemplate {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub template_type: DiagramKind,
    pub template_json: Value,
}

/// A catalog part (motor, battery, flight controller...) grouped by a free-form type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredComponent {
    pub id: u64,
    pub name: String,
    pub component_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

pub struct FileStore {
    root: PathBuf,
    // Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Mutex::new(()),
        }
    }

    /// Store rooted at [`blocksmith_home`].
    pub fn open_default() -> Self {
        Self::new(blocksmith_home())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read_collection<T: DeserializeOwned>(&self, file: &str) -> Result<Vec<T>, StoreError> {
        let path = self.root.join(file);
        if !path.exists() {
            return Ok(vec![]);
        }
        let raw = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn write_collection<T: Serialize>(&self, file: &str, items: &[T]) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root)?;
        let json = serde_json::to_string_pretty(items)?;
        let tmp = self.root.join(format!(".{file}.tmp"));
        let path = self.root.join(file);
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    // --- Diagrams ---

    /// Create a diagram, or replace the one generated from the same text.
    pub fn save_diagram(
        &self,
        name: &str,
        raw_text: &str,
        diagram: &Diagram,
    ) -> Result<StoredDiagram, StoreError> {
        let _guard = self.guard();
        let mut diagrams: Vec<StoredDiagram> = self.read_collection(DIAGRAMS_FILE)?;

        let stored = match diagrams.iter_mut().find(|d| d.raw_text == raw_text) {
            Some(existing) => {
                existing.name = name.to_string();
                existing.diagram_type = diagram.diagram_type;
                existing.diagram = diagram.clone();
                debug!(id = existing.id; "Updated stored diagram");
                existing.clone()
            }
            None => {
                let stored = StoredDiagram {
                    id: next_id(diagrams.iter().map(|d| d.id)),
                    name: name.to_string(),
                    raw_text: raw_text.to_string(),
                    diagram_type: diagram.diagram_type,
                    diagram: diagram.clone(),
                };
                info!(id = stored.id; "Stored new diagram");
                diagrams.push(stored.clone());
                stored
            }
        };

        self.write_collection(DIAGRAMS_FILE, &diagrams)?;
        Ok(stored)
    }

    pub fn get_diagram(&self, id: u64) -> Result<Option<StoredDiagram>, StoreError> {
        let diagrams: Vec<StoredDiagram> = self.read_collection(DIAGRAMS_FILE)?;
        Ok(diagrams.into_iter().find(|d| d.id == id))
    }

    pub fn list_diagrams(&self) -> Result<Vec<StoredDiagram>, StoreError> {
        self.read_collection(DIAGRAMS_FILE)
    }

    // --- Internal block diagrams ---

    /// Insert or replace the IBD for `(parent_bdd_diagram_id, parent_block_id)`.
    ///
    /// A replaced record keeps its id and moves to the end of the collection,
    /// so the file stays ordered by last write.
    pub fn upsert_ibd(&self, record: IbdRecord) -> Result<IbdRecord, StoreError> {
        let _guard = self.guard();
        let diagrams: Vec<StoredDiagram> = self.read_collection(DIAGRAMS_FILE)?;
        if !diagrams.iter().any(|d| d.id == record.parent_bdd_diagram_id) {
            return Err(StoreError::DiagramNotFound(record.parent_bdd_diagram_id));
        }

        let mut ibds: Vec<IbdRecord> = self.read_collection(IBDS_FILE)?;
        let existing = ibds.iter().position(|r| {
            r.parent_bdd_diagram_id == record.parent_bdd_diagram_id
                && r.parent_block_id == record.parent_block_id
        });
        let id = match existing {
            Some(index) => ibds.remove(index).id,
            None => next_id(ibds.iter().map(|r| r.id)),
        };
        let record = IbdRecord { id, ..record };
        debug!(
            id = record.id,
            parent = record.parent_bdd_diagram_id,
            block = record.parent_block_id.as_str(),
            replaced = existing.is_some();
            "Upserted internal block diagram"
        );
        ibds.push(record.clone());

        self.write_collection(IBDS_FILE, &ibds)?;
        Ok(record)
    }

    pub fn get_ibd(
        &self,
        parent_bdd_diagram_id: u64,
        parent_block_id: &str,
    ) -> Result<Option<IbdRecord>, StoreError> {
        let ibds: Vec<IbdRecord> = self.read_collection(IBDS_FILE)?;
        Ok(ibds.into_iter().find(|r| {
            r.parent_bdd_diagram_id == parent_bdd_diagram_id && r.parent_block_id == parent_block_id
        }))
    }

    /// Most recently written IBD for a block id, across all parent diagrams.
    pub fn latest_ibd_for_block(&self, parent_block_id: &str) -> Result<Option<IbdRecord>, StoreError> {
        let ibds: Vec<IbdRecord> = self.read_collection(IBDS_FILE)?;
        Ok(ibds
            .into_iter()
            .rev()
            .find(|r| r.parent_block_id == parent_block_id))
    }

    pub fn list_ibds(&self, parent_bdd_diagram_id: u64) -> Result<Vec<IbdRecord>, StoreError> {
        let ibds: Vec<IbdRecord> = self.read_collection(IBDS_FILE)?;
        Ok(ibds
            .into_iter()
            .filter(|r| r.parent_bdd_diagram_id == parent_bdd_diagram_id)
            .collect())
    }

    // --- Examples ---

    /// Store an example. Its `id` is assigned here.
    pub fn add_example(&self, example: StoredExample) -> Result<StoredExample, StoreError> {
        let example = self.append(EXAMPLES_FILE, |id| StoredExample { id, ..example }, |e| e.id)?;
        info!(id = example.id, kind = example.diagram_type.as_str(); "Stored example diagram");
        Ok(example)
    }

    pub fn list_examples(&self, kind: Option<DiagramKind>) -> Result<Vec<StoredExample>, StoreError> {
        let examples: Vec<StoredExample> = self.read_collection(EXAMPLES_FILE)?;
        Ok(examples
            .into_iter()
            .filter(|e| kind.map_or(true, |k| e.diagram_type == k))
            .collect())
    }

    // --- Catalog ---

    pub fn add_template(&self, template: StoredTemplate) -> Result<StoredTemplate, StoreError> {
        let template = self.append(TEMPLATES_FILE, |id| StoredTemplate { id, ..template }, |t| t.id)?;
        info!(id = template.id, kind = template.template_type.as_str(); "Stored template");
        Ok(template)
    }

    pub fn list_templates(&self, kind: Option<DiagramKind>) -> Result<Vec<StoredTemplate>, StoreError> {
        let templates: Vec<StoredTemplate> = self.read_collection(TEMPLATES_FILE)?;
        Ok(templates
            .into_iter()
            .filter(|t| kind.map_or(true, |k| t.template_type == k))
            .collect())
    }

    pub fn add_component(&self, component: StoredComponent) -> Result<StoredComponent, StoreError> {
        let component =
            self.append(COMPONENTS_FILE, |id| StoredComponent { id, ..component }, |c| c.id)?;
        info!(id = component.id, kind = component.component_type.as_str(); "Stored component");
        Ok(component)
    }

    /// Components whose type matches `component_type`, ignoring ASCII case.
    pub fn list_components(
        &self,
        component_type: Option<&str>,
    ) -> Result<Vec<StoredComponent>, StoreError> {
        let components: Vec<StoredComponent> = self.read_collection(COMPONENTS_FILE)?;
        Ok(components
            .into_iter()
            .filter(|c| component_type.map_or(true, |t| c.component_type.eq_ignore_ascii_case(t)))
            .collect())
    }

    /// Append one item to a collection, giving it the next free id.
    fn append<T: Serialize + DeserializeOwned + Clone>(
        &self,
        file: &str,
        with_id: impl FnOnce(u64) -> T,
        id_of: impl Fn(&T) -> u64,
    ) -> Result<T, StoreError> {
        let _guard = self.guard();
        let mut items: Vec<T> = self.read_collection(file)?;
        let item = with_id(next_id(items.iter().map(&id_of)));
        items.push(item.clone());
        self.write_collection(file, &items)?;
        Ok(item)
    }
}

fn next_id(ids: impl Iterator<Item = u64>) -> u64 {
    ids.max().unwrap_or(0) + 1
}
