pub mod layout;
pub mod levels;
pub mod normalize;
pub mod repair;
pub mod rules;
pub mod storage;
pub mod validate;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

pub use layout::{layout, layout_ibd, layout_with, LayoutConfig};
pub use levels::{assign_levels, assign_levels_with, LevelStrategy};
pub use normalize::{normalize, ExtractedIbd, Normalized};
pub use repair::{Repair, RepairLog, Repaired};
pub use storage::{
    FileStore, StoreError, StoredComponent, StoredDiagram, StoredExample, StoredTemplate,
};
pub use validate::validate_and_repair;

// --- Types ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    Block,
    Sensor,
    Processor,
    IbdBlock,
}

impl ElementType {
    /// Types a top-level block definition diagram may use.
    pub const BDD: &'static [ElementType] =
        &[ElementType::Block, ElementType::Sensor, ElementType::Processor];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "block" => Some(Self::Block),
            "sensor" => Some(Self::Sensor),
            "processor" => Some(Self::Processor),
            "ibd_block" => Some(Self::IbdBlock),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Sensor => "sensor",
            Self::Processor => "processor",
            Self::IbdBlock => "ibd_block",
        }
    }
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default, schemars::JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum DiagramKind {
    #[default]
    Block,
    Bdd,
    Ibd,
}

impl DiagramKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "block" => Some(Self::Block),
            "bdd" => Some(Self::Bdd),
            "ibd" => Some(Self::Ibd),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Bdd => "bdd",
            Self::Ibd => "ibd",
        }
    }
}

/// Which prompt variant produced (or should produce) a diagram.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, schemars::JsonSchema,
)]
pub enum GenerationMode {
    #[default]
    #[serde(rename = "bdd", alias = "standard")]
    Standard,
    #[serde(rename = "bdd_enhanced", alias = "enhanced")]
    Enhanced,
}

impl GenerationMode {
    /// Diagram kind stored for diagrams generated in this mode.
    pub fn diagram_kind(self) -> DiagramKind {
        match self {
            Self::Standard => DiagramKind::Block,
            Self::Enhanced => DiagramKind::Bdd,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Nested diagram exactly as the model emitted it, before extraction.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct InternalDiagram {
    #[serde(default)]
    pub nodes: Vec<Value>,
    #[serde(default)]
    pub edges: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Element {
    pub id: String,
    #[serde(rename = "type")]
    pub element_type: ElementType,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    /// Set once the element's nested diagram has been extracted into an IBD.
    #[serde(default, skip_serializing_if = "is_false")]
    pub has_internal_diagram: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_diagram: Option<InternalDiagram>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Relationship {
    pub source_id: String,
    pub target_id: String,
    #[serde(rename = "type", default = "default_relationship_type")]
    pub relationship_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

pub fn default_relationship_type() -> String {
    "association".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Diagram {
    #[serde(default)]
    pub diagram_type: DiagramKind,
    #[serde(default)]
    pub elements: Vec<Element>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

impl Diagram {
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty() && self.relationships.is_empty()
    }
}

/// A node of an internal block diagram. Keys the schema doesn't name are kept in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IbdNode {
    pub id: String,
    #[serde(rename = "type", default = "default_ibd_node_type")]
    pub node_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_ibd_node_type() -> String {
    ElementType::IbdBlock.as_str().to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IbdEdge {
    #[serde(default)]
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub label: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IbdSource {
    #[default]
    Ai,
    User,
}

/// A persisted internal block diagram, unique by (parent diagram, parent block).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IbdRecord {
    #[serde(default)]
    pub id: u64,
    pub parent_bdd_diagram_id: u64,
    pub parent_block_id: String,
    #[serde(default)]
    pub nodes: Vec<IbdNode>,
    #[serde(default)]
    pub edges: Vec<IbdEdge>,
    #[serde(default)]
    pub source: IbdSource,
}

/// Generate an edge ID from source and target node IDs.
pub fn make_edge_id(source: &str, target: &str) -> String {
    format!("edge-{}-{}", source, target)
}

// --- AI Settings ---

/// Resolve the store directory (`$BLOCKSMITH_HOME`, else ~/.blocksmith/).
pub fn blocksmith_home() -> PathBuf {
    if let Some(dir) = std::env::var_os("BLOCKSMITH_HOME").filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".blocksmith")
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AiSettings {
    pub provider: String,
    pub api_key: String,
    pub model: String,
    #[serde(default)]
    pub embedding_model: String,
}

impl AiSettings {
    /// Apply `BLOCKSMITH_*` environment variables on top of the stored settings.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        if let Some(v) = get("BLOCKSMITH_PROVIDER") {
            self.provider = v;
        }
        if let Some(v) = get("BLOCKSMITH_API_KEY") {
            self.api_key = v;
        }
        if let Some(v) = get("BLOCKSMITH_MODEL") {
            self.model = v;
        }
        if let Some(v) = get("BLOCKSMITH_EMBEDDING_MODEL") {
            self.embedding_model = v;
        }
        self
    }
}

fn settings_path(dir: &Path) -> PathBuf {
    dir.join("settings.json")
}

pub fn read_settings(dir: &Path) -> AiSettings {
    let path = settings_path(dir);
    if !path.exists() {
        return AiSettings::default();
    }
    fs::read_to_string(&path)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

pub fn write_settings(dir: &Path, settings: &AiSettings) -> Result<(), StoreError> {
    fs::create_dir_all(dir)?;
    let json = serde_json::to_string_pretty(settings)?;
    fs::write(settings_path(dir), json)?;
    Ok(())
}

pub fn ai_configured(settings: &AiSettings) -> bool {
    !settings.provider.is_empty()
        && !settings.model.is_empty()
        && (settings.provider == "ollama" || !settings.api_key.is_empty())
}
