use std::sync::Arc;

use log::{info, warn};
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    schemars, tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt,
};
use serde::Deserialize;
use serde_json::{json, Value};

use blocksmith_core::{
    read_settings, AiSettings, DiagramKind, FileStore, GenerationMode, LayoutConfig,
    StoredComponent, StoredExample, StoredTemplate,
};
use blocksmith_gen::{
    finish, save_outcome, ChatModel, Embedder, ExampleSource, GenerationRequest, Generator,
    LlmChatModel, LlmEmbedder, NoExamples, RagExamples, RetrieveError, ScoredExample,
};

const DEFAULT_NAME_CHARS: usize = 60;
const DEFAULT_SEARCH_LIMIT: usize = 5;

// --- Request types ---

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct GetDiagramRequest {
    /// ID of the stored diagram
    id: u64,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct GenerateRequest {
    /// Natural-language description of the system to model
    text: String,
    /// "bdd" for a plain block diagram, "bdd_enhanced" to also produce internal block diagrams. Default: "bdd"
    mode: Option<GenerationMode>,
    /// Use similar stored examples as one-shot prompts. Default: true
    use_rag: Option<bool>,
    /// Store the result (and its internal block diagrams). Default: true
    save: Option<bool>,
    /// Display name for the stored diagram. Default: the start of the description
    name: Option<String>,
    /// Also add the result to the example pool used for retrieval. Default: false
    save_as_example: Option<bool>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct LayoutRequest {
    /// Diagram as a JSON string, either {elements, relationships} or {nodes, edges}
    data: String,
    /// "bdd" strips internal diagrams, "bdd_enhanced" extracts them. Default: "bdd"
    mode: Option<GenerationMode>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct GetIbdRequest {
    /// ID of the element that owns the internal block diagram
    parent_block_id: String,
    /// ID of the stored parent diagram. Omit to get the most recent IBD for this block across all diagrams.
    diagram_id: Option<u64>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct SaveExampleRequest {
    /// Short name for the example
    name: String,
    /// What the example demonstrates
    description: Option<String>,
    /// The system description the diagram was made from. This is what retrieval matches against.
    raw_text: String,
    /// "block", "bdd" or "ibd"
    diagram_type: String,
    /// The example diagram as a JSON string
    data: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct FindSimilarRequest {
    /// System description to match against stored examples
    query_text: String,
    /// Maximum number of results. Default: 5
    limit: Option<usize>,
    /// Only search examples of this kind: "block", "bdd" or "ibd". Default: all kinds
    diagram_type: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct GetTemplatesRequest {
    /// "block", "bdd" or "ibd"
    template_type: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct SaveTemplateRequest {
    /// Template name
    name: String,
    /// What the template is for
    description: Option<String>,
    /// "block", "bdd" or "ibd"
    template_type: String,
    /// The template diagram as a JSON string
    data: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct GetComponentsRequest {
    /// Component type, e.g. "motor", "battery", "flight_controller". Matched case-insensitively.
    component_type: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct SaveComponentRequest {
    /// Component name, e.g. "T-Motor MN3110"
    name: String,
    /// Component type, e.g. "motor"
    component_type: String,
    /// What the component is
    description: Option<String>,
    /// Flat key/value properties as a JSON object string, e.g. {"kv": "780", "weight": "78g"}
    properties: Option<String>,
}

// --- Server ---

#[derive(Clone)]
pub struct BlocksmithServer {
    store: Arc<FileStore>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl BlocksmithServer {
    pub fn new(store: Arc<FileStore>) -> Self {
        Self {
            store,
            tool_router: Self::tool_router(),
        }
    }

    /// Settings are re-read per call so edits to settings.json apply without a restart.
    fn settings(&self) -> AiSettings {
        read_settings(self.store.root()).with_env_overrides()
    }

    #[tool(description = "List stored diagrams with their IDs, names and sizes")]
    fn list_diagrams(&self) -> Result<CallToolResult, McpError> {
        Ok(text_result(list_diagrams_text(&self.store)))
    }

    #[tool(
        description = "Get a stored diagram by ID. Returns {id, name, raw_text, diagram_type, diagram: {diagram_type, elements: [{id, type, name, description, properties, position}], relationships: [{source_id, target_id, type, name?}]}}."
    )]
    fn get_diagram(
        &self,
        Parameters(req): Parameters<GetDiagramRequest>,
    ) -> Result<CallToolResult, McpError> {
        Ok(text_result(get_diagram_text(&self.store, req.id)))
    }

    #[tool(
        description = "Generate a SysML block diagram from a system description with the configured AI provider. The result is repaired, laid out and (by default) stored. With save_as_example the result also joins the retrieval examples. Returns {diagram, ibds, repairs, model_used, rag_used, examples_count, saved_to_rag, diagram_id?, ibd_ids?}; on failure an error field accompanies an empty diagram."
    )]
    async fn generate_diagram(
        &self,
        Parameters(req): Parameters<GenerateRequest>,
    ) -> Result<CallToolResult, McpError> {
        let settings = self.settings();
        let model = match LlmChatModel::new(settings.clone()) {
            Ok(model) => model,
            Err(e) => {
                return Ok(CallToolResult::error(vec![Content::text(format!(
                    "Cannot generate: {e}. Set provider, model and apiKey in settings.json or BLOCKSMITH_* environment variables."
                ))]))
            }
        };

        let use_rag = req.use_rag.unwrap_or(true);
        let result = match use_rag.then(|| LlmEmbedder::new(&settings)) {
            Some(Ok(embedder)) => {
                let examples = RagExamples::new(self.store.clone(), embedder);
                generate_and_save(&self.store, &Generator::new(model, examples), &req).await
            }
            Some(Err(e)) => {
                warn!("Example retrieval unavailable: {e}");
                generate_and_save(&self.store, &Generator::new(model, NoExamples), &req).await
            }
            None => generate_and_save(&self.store, &Generator::new(model, NoExamples), &req).await,
        };

        let (mut body, failed) = match result {
            Ok(result) => result,
            Err(e) => return Ok(CallToolResult::error(vec![Content::text(e)])),
        };

        if !failed {
            let embedder = LlmEmbedder::new(&settings);
            add_generated_example(&self.store, embedder, &req, &mut body).await;
        }

        let text = match pretty(&body) {
            Ok(text) => text,
            Err(e) => return Ok(CallToolResult::error(vec![Content::text(e)])),
        };
        Ok(if failed {
            CallToolResult::error(vec![Content::text(text)])
        } else {
            CallToolResult::success(vec![Content::text(text)])
        })
    }

    #[tool(
        description = "Repair and lay out a diagram without calling the AI. Accepts the flat {elements, relationships} shape or the nested {nodes, edges} shape. Returns {diagram, ibds, repairs}."
    )]
    fn layout_diagram(
        &self,
        Parameters(req): Parameters<LayoutRequest>,
    ) -> Result<CallToolResult, McpError> {
        Ok(text_result(layout_text(
            &req.data,
            req.mode.unwrap_or_default(),
        )))
    }

    #[tool(
        description = "Get the internal block diagram of a block. Returns {id, parent_bdd_diagram_id, parent_block_id, nodes, edges: [{id, source, target, label}], source}."
    )]
    fn get_ibd(
        &self,
        Parameters(req): Parameters<GetIbdRequest>,
    ) -> Result<CallToolResult, McpError> {
        Ok(text_result(get_ibd_text(
            &self.store,
            &req.parent_block_id,
            req.diagram_id,
        )))
    }

    #[tool(
        description = "Store an example diagram for retrieval-augmented generation. Its description is embedded with the configured provider; without one the example is stored but never retrieved."
    )]
    async fn save_example(
        &self,
        Parameters(req): Parameters<SaveExampleRequest>,
    ) -> Result<CallToolResult, McpError> {
        let example = match parse_example(req) {
            Ok(example) => example,
            Err(e) => return Ok(CallToolResult::error(vec![Content::text(e)])),
        };

        let stored = store_example(&self.store, LlmEmbedder::new(&self.settings()), example).await;

        Ok(match stored {
            Ok(example) => CallToolResult::success(vec![Content::text(format!(
                "Saved example {} ({}){}",
                example.id,
                example.diagram_type.as_str(),
                if example.embedding.is_empty() {
                    ", not embedded"
                } else {
                    ""
                }
            ))]),
            Err(e) => CallToolResult::error(vec![Content::text(format!(
                "Failed to save example: {e}"
            ))]),
        })
    }

    #[tool(
        description = "Find stored example diagrams similar to a description. Returns [{id, name, description, diagram_type, raw_text, diagram_json, similarity}], most similar first."
    )]
    async fn find_similar_examples(
        &self,
        Parameters(req): Parameters<FindSimilarRequest>,
    ) -> Result<CallToolResult, McpError> {
        let kind = match req.diagram_type.as_deref().map(parse_kind).transpose() {
            Ok(kind) => kind,
            Err(e) => return Ok(CallToolResult::error(vec![Content::text(e)])),
        };
        let embedder = match LlmEmbedder::new(&self.settings()) {
            Ok(embedder) => embedder,
            Err(e) => {
                return Ok(CallToolResult::error(vec![Content::text(format!(
                    "Similarity search needs an embedding provider: {e}"
                ))]))
            }
        };
        let found = RagExamples::new(self.store.clone(), embedder)
            .search(
                &req.query_text,
                kind,
                req.limit.unwrap_or(DEFAULT_SEARCH_LIMIT),
            )
            .await;
        Ok(text_result(match found {
            Ok(found) => similar_text(&found),
            Err(e) => Err(format!("Similarity search failed: {e}")),
        }))
    }

    #[tool(
        description = "List diagram templates of one kind. Returns [{id, name, description, template_type, template_json}]."
    )]
    fn get_templates(
        &self,
        Parameters(req): Parameters<GetTemplatesRequest>,
    ) -> Result<CallToolResult, McpError> {
        Ok(text_result(templates_text(&self.store, &req.template_type)))
    }

    #[tool(description = "Store a diagram template for one diagram kind")]
    fn save_template(
        &self,
        Parameters(req): Parameters<SaveTemplateRequest>,
    ) -> Result<CallToolResult, McpError> {
        let saved = parse_template(req).and_then(|template| {
            self.store
                .add_template(template)
                .map_err(|e| format!("Failed to save template: {e}"))
        });
        Ok(text_result(saved.map(|t| {
            format!("Saved template {} ({})", t.id, t.template_type.as_str())
        })))
    }

    #[tool(
        description = "List catalog components of one type. Returns [{id, name, component_type, description, properties}]."
    )]
    fn get_components(
        &self,
        Parameters(req): Parameters<GetComponentsRequest>,
    ) -> Result<CallToolResult, McpError> {
        Ok(text_result(components_text(&self.store, &req.component_type)))
    }

    #[tool(description = "Add a component to the catalog")]
    fn save_component(
        &self,
        Parameters(req): Parameters<SaveComponentRequest>,
    ) -> Result<CallToolResult, McpError> {
        let saved = parse_component(req).and_then(|component| {
            self.store
                .add_component(component)
                .map_err(|e| format!("Failed to save component: {e}"))
        });
        Ok(text_result(saved.map(|c| {
            format!("Saved component {} ({})", c.id, c.component_type)
        })))
    }

    #[tool(description = "Get the SysML modeling rules that generated diagrams follow")]
    fn get_rules(&self) -> Result<CallToolResult, McpError> {
        Ok(CallToolResult::success(vec![Content::text(format!(
            "{}\n\n## Internal block diagrams\n{}",
            blocksmith_core::rules::RULES,
            blocksmith_core::rules::IBD_RULES
        ))]))
    }
}

#[tool_handler]
impl ServerHandler for BlocksmithServer {
    fn get_info(&self) -> ServerInfo {
        let instructions = format!(
            "{}\n\n## SysML Modeling Rules\n{}",
            INSTRUCTIONS,
            blocksmith_core::rules::RULES
        );
        ServerInfo {
            instructions: Some(instructions.into()),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

// --- Helpers ---

fn text_result(result: Result<String, String>) -> CallToolResult {
    match result {
        Ok(text) => CallToolResult::success(vec![Content::text(text)]),
        Err(e) => CallToolResult::error(vec![Content::text(e)]),
    }
}

fn pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("Serialization error: {e}"))
}

fn list_diagrams_text(store: &FileStore) -> Result<String, String> {
    let diagrams = store
        .list_diagrams()
        .map_err(|e| format!("Failed to list diagrams: {e}"))?;
    if diagrams.is_empty() {
        return Ok("No diagrams found. Use generate_diagram to create one.".to_string());
    }
    Ok(diagrams
        .iter()
        .map(|d| {
            format!(
                "{}\t{}\t{}\t{} elements, {} relationships",
                d.id,
                d.name,
                d.diagram_type.as_str(),
                d.diagram.elements.len(),
                d.diagram.relationships.len()
            )
        })
        .collect::<Vec<_>>()
        .join("\n"))
}

fn get_diagram_text(store: &FileStore, id: u64) -> Result<String, String> {
    match store.get_diagram(id) {
        Ok(Some(diagram)) => pretty(&diagram),
        Ok(None) => Err(format!("Diagram {id} not found")),
        Err(e) => Err(format!("Failed to read diagram {id}: {e}")),
    }
}

fn layout_text(data: &str, mode: GenerationMode) -> Result<String, String> {
    let raw: Value = serde_json::from_str(data).map_err(|e| format!("Invalid JSON: {e}"))?;
    let repaired = finish(&LayoutConfig::default(), &raw, mode);
    pretty(&json!({
        "diagram": repaired.value.diagram,
        "ibds": repaired.value.ibds,
        "repairs": repaired.log,
    }))
}

fn get_ibd_text(
    store: &FileStore,
    parent_block_id: &str,
    diagram_id: Option<u64>,
) -> Result<String, String> {
    let found = match diagram_id {
        Some(id) => store.get_ibd(id, parent_block_id),
        None => store.latest_ibd_for_block(parent_block_id),
    }
    .map_err(|e| format!("Failed to read internal block diagrams: {e}"))?;

    match found {
        Some(record) => pretty(&record),
        None => Err(match diagram_id {
            Some(id) => format!("No internal block diagram for block '{parent_block_id}' in diagram {id}"),
            None => format!("No internal block diagram for block '{parent_block_id}'"),
        }),
    }
}

fn parse_example(req: SaveExampleRequest) -> Result<StoredExample, String> {
    let diagram_type = parse_kind(&req.diagram_type)?;
    let diagram_json = parse_object(&req.data, "data")?;
    Ok(StoredExample {
        id: 0,
        name: req.name,
        description: req.description.unwrap_or_default(),
        raw_text: req.raw_text,
        diagram_type,
        diagram_json,
        embedding: vec![],
    })
}

fn parse_kind(kind: &str) -> Result<DiagramKind, String> {
    DiagramKind::parse(kind)
        .ok_or_else(|| format!("Unknown diagram type '{kind}'. Use \"block\", \"bdd\" or \"ibd\"."))
}

fn parse_object(raw: &str, field: &str) -> Result<Value, String> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| format!("Invalid JSON in {field}: {e}"))?;
    if !value.is_object() {
        return Err(format!("{field} must be a JSON object"));
    }
    Ok(value)
}

fn similar_text(found: &[ScoredExample]) -> Result<String, String> {
    let items: Vec<Value> = found
        .iter()
        .map(|scored| {
            let e = &scored.example;
            json!({
                "id": e.id,
                "name": e.name,
                "description": e.description,
                "diagram_type": e.diagram_type,
                "raw_text": e.raw_text,
                "diagram_json": e.diagram_json,
                "similarity": scored.similarity,
            })
        })
        .collect();
    pretty(&items)
}

fn templates_text(store: &FileStore, template_type: &str) -> Result<String, String> {
    let kind = parse_kind(template_type)?;
    let templates = store
        .list_templates(Some(kind))
        .map_err(|e| format!("Failed to read templates: {e}"))?;
    pretty(&templates)
}

fn parse_template(req: SaveTemplateRequest) -> Result<StoredTemplate, String> {
    Ok(StoredTemplate {
        id: 0,
        name: req.name,
        description: req.description.unwrap_or_default(),
        template_type: parse_kind(&req.template_type)?,
        template_json: parse_object(&req.data, "data")?,
    })
}

fn components_text(store: &FileStore, component_type: &str) -> Result<String, String> {
    let components = store
        .list_components(Some(component_type))
        .map_err(|e| format!("Failed to read components: {e}"))?;
    pretty(&components)
}

fn parse_component(req: SaveComponentRequest) -> Result<StoredComponent, String> {
    if req.component_type.trim().is_empty() {
        return Err("component_type must not be empty".to_string());
    }
    let properties = match req.properties.as_deref() {
        Some(raw) => match parse_object(raw, "properties")? {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        },
        None => serde_json::Map::new(),
    };
    Ok(StoredComponent {
        id: 0,
        name: req.name,
        component_type: req.component_type,
        description: req.description.unwrap_or_default(),
        properties,
    })
}

/// The generated diagram as an example for later retrieval.
fn example_from_generation(req: &GenerateRequest, body: &Value) -> Option<StoredExample> {
    let diagram = body.get("diagram").filter(|d| d.is_object())?;
    Some(StoredExample {
        id: 0,
        name: generated_name(req),
        description: String::new(),
        raw_text: req.text.clone(),
        diagram_type: req.mode.unwrap_or_default().diagram_kind(),
        diagram_json: diagram.clone(),
        embedding: vec![],
    })
}

fn generated_name(req: &GenerateRequest) -> String {
    req.name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| default_name(&req.text))
}

fn default_name(text: &str) -> String {
    let first_line = text.lines().next().unwrap_or_default().trim();
    let mut name: String = first_line.chars().take(DEFAULT_NAME_CHARS).collect();
    if first_line.chars().count() > DEFAULT_NAME_CHARS {
        name.push_str("...");
    }
    if name.is_empty() {
        name = "Untitled diagram".to_string();
    }
    name
}

/// Embed and store an example. Without a usable embedder it is stored
/// unembedded, which keeps it out of retrieval.
async fn store_example<Em: Embedder>(
    store: &Arc<FileStore>,
    embedder: Result<Em, RetrieveError>,
    example: StoredExample,
) -> Result<StoredExample, String> {
    match embedder {
        Ok(embedder) => RagExamples::new(store.clone(), embedder)
            .add_example(example)
            .await
            .map_err(|e| e.to_string()),
        Err(e) => {
            warn!("Storing example without embedding: {e}");
            store.add_example(example).map_err(|e| e.to_string())
        }
    }
}

/// Store a successful generation as an example when asked and record
/// `saved_to_rag` in the body. Only an embedded example counts as saved.
async fn add_generated_example<Em: Embedder>(
    store: &Arc<FileStore>,
    embedder: Result<Em, RetrieveError>,
    req: &GenerateRequest,
    body: &mut Value,
) {
    let saved_to_rag = match example_from_generation(req, body) {
        Some(example) if req.save_as_example.unwrap_or(false) => {
            match store_example(store, embedder, example).await {
                Ok(example) => !example.embedding.is_empty(),
                Err(e) => {
                    warn!("Could not add generated diagram to examples: {e}");
                    false
                }
            }
        }
        _ => false,
    };
    if let Value::Object(map) = body {
        map.insert("saved_to_rag".into(), json!(saved_to_rag));
    }
}

/// Run a generation and store it when asked. The flag is true when the
/// outcome carries a generation error.
async fn generate_and_save<M: ChatModel, E: ExampleSource>(
    store: &FileStore,
    generator: &Generator<M, E>,
    req: &GenerateRequest,
) -> Result<(Value, bool), String> {
    let request = GenerationRequest {
        text: req.text.clone(),
        mode: req.mode.unwrap_or_default(),
        use_rag: req.use_rag.unwrap_or(true),
    };
    let outcome = generator.generate(&request).await;
    let mut body =
        serde_json::to_value(&outcome).map_err(|e| format!("Serialization error: {e}"))?;

    if outcome.is_error() {
        return Ok((body, true));
    }

    if req.save.unwrap_or(true) {
        let (stored, records) = save_outcome(store, &generated_name(req), &req.text, &outcome)
            .map_err(|e| format!("Generated, but failed to store: {e}"))?;
        info!(id = stored.id, ibds = records.len(); "Saved generated diagram");
        if let Value::Object(map) = &mut body {
            map.insert("diagram_id".into(), json!(stored.id));
            map.insert(
                "ibd_ids".into(),
                json!(records.iter().map(|r| r.id).collect::<Vec<_>>()),
            );
        }
    }

    Ok((body, false))
}

const INSTRUCTIONS: &str = r#"Blocksmith turns natural-language system descriptions into SysML block definition diagrams.

Workflow:
1. `generate_diagram` with the description. Use mode "bdd_enhanced" when blocks have internal structure worth modeling; their internal block diagrams come back under `ibds` and are stored per block.
2. `get_diagram` / `list_diagrams` to read stored results, `get_ibd` to read a block's internal diagram.
3. `layout_diagram` repairs and positions a diagram you wrote yourself without calling the AI.
4. `save_example` stores good diagrams (or pass `save_as_example` to `generate_diagram`); similar ones are replayed as examples in later generations. `find_similar_examples` shows what would be matched.
5. `get_templates` / `save_template` keep starting diagrams per kind, `get_components` / `save_component` keep a catalog of real parts to name blocks after.

Every response lists the `repairs` applied to the model output (assigned IDs, dropped relationships, coerced types). Positions are computed: consumers sit on top, the elements feeding them below."#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries the protocol; logs go to stderr.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let store = Arc::new(FileStore::open_default());
    info!(root:? = store.root(); "Starting Blocksmith MCP server");

    let service = BlocksmithServer::new(store)
        .serve(rmcp::transport::io::stdio())
        .await
        .inspect_err(|e| log::error!("MCP server error: {e}"))?;
    service.waiting().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use blocksmith_core::{Diagram, IbdSource};
    use blocksmith_gen::prompt::Turn;
    use blocksmith_gen::GenerateError;

    struct CannedModel(Result<String, String>);

    #[async_trait]
    impl ChatModel for CannedModel {
        fn name(&self) -> &str {
            "canned"
        }

        async fn complete(
            &self,
            _system: &str,
            _history: &[Turn],
            _user: &str,
        ) -> Result<String, GenerateError> {
            self.0.clone().map_err(GenerateError::Chat)
        }
    }

    fn store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        (dir, store)
    }

    fn generate_request(text: &str, save: bool) -> GenerateRequest {
        GenerateRequest {
            text: text.into(),
            mode: Some(GenerationMode::Enhanced),
            use_rag: Some(false),
            save: Some(save),
            name: None,
            save_as_example: None,
        }
    }

    const ENHANCED_REPLY: &str = r#"{"elements": [
        {"id": "fc", "type": "processor", "internal_diagram": {
            "nodes": [{"id": "cpu"}, {"id": "mem"}],
            "edges": [{"source": "cpu", "target": "mem"}, {"source": "mem", "target": "cpu"}]
        }},
        {"id": "gps", "type": "sensor"}
    ], "relationships": [{"source_id": "gps", "target_id": "fc"}]}"#;

    #[tokio::test]
    async fn generation_is_saved_with_its_ibds() {
        let (_dir, store) = store();
        let generator = Generator::new(CannedModel(Ok(ENHANCED_REPLY.into())), NoExamples);
        let (body, failed) =
            generate_and_save(&store, &generator, &generate_request("a drone", true))
                .await
                .unwrap();
        assert!(!failed);

        assert_eq!(body["diagram_id"], 1);
        assert_eq!(body["ibd_ids"], json!([1]));
        assert_eq!(body["model_used"], "canned");

        let ibd = store.get_ibd(1, "fc").unwrap().unwrap();
        assert_eq!(ibd.source, IbdSource::Ai);
        assert_eq!(ibd.edges[0].id, "edge-cpu-mem");
        assert_eq!(store.get_diagram(1).unwrap().unwrap().name, "a drone");
    }

    #[tokio::test]
    async fn unsaved_generation_leaves_store_empty() {
        let (_dir, store) = store();
        let generator = Generator::new(CannedModel(Ok(ENHANCED_REPLY.into())), NoExamples);
        let (body, _) = generate_and_save(&store, &generator, &generate_request("x", false))
            .await
            .unwrap();
        assert!(body.get("diagram_id").is_none());
        assert!(store.list_diagrams().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_generation_is_flagged_and_not_saved() {
        let (_dir, store) = store();
        let generator = Generator::new(CannedModel(Err("quota".into())), NoExamples);
        let (body, failed) = generate_and_save(&store, &generator, &generate_request("x", true))
            .await
            .unwrap();
        assert!(failed);
        assert_eq!(body["error"], "chat: quota");
        assert_eq!(body["diagram"]["elements"], json!([]));
        assert!(store.list_diagrams().unwrap().is_empty());
    }

    struct FixedEmbedder;

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, RetrieveError> {
            Ok(vec![1.0, 0.0])
        }
    }

    #[tokio::test]
    async fn generated_diagram_joins_examples_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::new(dir.path()));
        let generator = Generator::new(CannedModel(Ok(ENHANCED_REPLY.into())), NoExamples);
        let mut req = generate_request("a survey drone", false);
        req.save_as_example = Some(true);

        let (mut body, _) = generate_and_save(&store, &generator, &req).await.unwrap();
        add_generated_example(&store, Ok(FixedEmbedder), &req, &mut body).await;
        assert_eq!(body["saved_to_rag"], true);

        let examples = store.list_examples(Some(DiagramKind::Bdd)).unwrap();
        assert_eq!(examples.len(), 1);
        assert_eq!(examples[0].raw_text, "a survey drone");
        assert_eq!(examples[0].embedding, vec![1.0, 0.0]);
        assert_eq!(examples[0].diagram_json, body["diagram"]);
    }

    #[tokio::test]
    async fn generated_diagram_stays_out_of_examples_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::new(dir.path()));
        let generator = Generator::new(CannedModel(Ok(ENHANCED_REPLY.into())), NoExamples);
        let req = generate_request("x", false);

        let (mut body, _) = generate_and_save(&store, &generator, &req).await.unwrap();
        add_generated_example(&store, Ok(FixedEmbedder), &req, &mut body).await;
        assert_eq!(body["saved_to_rag"], false);
        assert!(store.list_examples(None).unwrap().is_empty());

        // Without an embedder the example is kept but not retrievable.
        let mut req = req;
        req.save_as_example = Some(true);
        let missing: Result<FixedEmbedder, _> =
            Err(RetrieveError::UnknownProvider(String::new()));
        add_generated_example(&store, missing, &req, &mut body).await;
        assert_eq!(body["saved_to_rag"], false);
        assert_eq!(store.list_examples(None).unwrap().len(), 1);
    }

    #[test]
    fn similar_examples_omit_embeddings() {
        let found = vec![ScoredExample {
            similarity: 0.5,
            example: StoredExample {
                id: 3,
                name: "ex".into(),
                description: String::new(),
                raw_text: "a drone".into(),
                diagram_type: DiagramKind::Block,
                diagram_json: json!({"elements": []}),
                embedding: vec![0.1, 0.2],
            },
        }];
        let body: Value = serde_json::from_str(&similar_text(&found).unwrap()).unwrap();
        assert_eq!(body[0]["id"], 3);
        assert_eq!(body[0]["similarity"], 0.5);
        assert_eq!(body[0]["diagram_type"], "block");
        assert!(body[0].get("embedding").is_none());
    }

    #[test]
    fn templates_are_stored_and_listed_by_kind() {
        let (_dir, store) = store();
        let req = |template_type: &str, data: &str| SaveTemplateRequest {
            name: "quad".into(),
            description: Some("quadcopter skeleton".into()),
            template_type: template_type.into(),
            data: data.into(),
        };
        store
            .add_template(parse_template(req("bdd", r#"{"elements": []}"#)).unwrap())
            .unwrap();
        assert!(parse_template(req("uml", "{}")).is_err());
        assert!(parse_template(req("bdd", "[]")).is_err());

        let bdd: Value = serde_json::from_str(&templates_text(&store, "bdd").unwrap()).unwrap();
        assert_eq!(bdd[0]["name"], "quad");
        assert_eq!(bdd[0]["template_json"], json!({"elements": []}));
        assert_eq!(templates_text(&store, "block").unwrap(), "[]");
        assert!(templates_text(&store, "uml").is_err());
    }

    #[test]
    fn components_are_stored_and_listed_by_type() {
        let (_dir, store) = store();
        let req = |component_type: &str, properties: Option<&str>| SaveComponentRequest {
            name: "T-Motor MN3110".into(),
            component_type: component_type.into(),
            description: None,
            properties: properties.map(str::to_string),
        };
        store
            .add_component(parse_component(req("motor", Some(r#"{"kv": "780"}"#))).unwrap())
            .unwrap();
        assert!(parse_component(req(" ", None)).is_err());
        assert!(parse_component(req("motor", Some("[1]"))).is_err());

        let motors: Value =
            serde_json::from_str(&components_text(&store, "Motor").unwrap()).unwrap();
        assert_eq!(motors[0]["properties"]["kv"], "780");
        assert_eq!(components_text(&store, "battery").unwrap(), "[]");
    }

    #[test]
    fn layout_reports_repairs() {
        let text = layout_text(
            r#"{"elements": [{"id": "a"}, {"type": "widget"}], "relationships": [{"source_id": "a", "target_id": "nope"}]}"#,
            GenerationMode::Standard,
        )
        .unwrap();
        let body: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(body["diagram"]["elements"][1]["id"], "element-2");
        assert_eq!(body["diagram"]["elements"][1]["type"], "block");
        assert_eq!(body["diagram"]["relationships"], json!([]));
        assert!(body["repairs"].as_array().unwrap().len() >= 3);
        assert!(layout_text("not json", GenerationMode::Standard).is_err());
    }

    #[test]
    fn ibd_lookup_by_diagram_or_latest() {
        let (_dir, store) = store();
        let parent = store.save_diagram("d", "text", &Diagram::default()).unwrap();
        store
            .upsert_ibd(blocksmith_core::IbdRecord {
                id: 0,
                parent_bdd_diagram_id: parent.id,
                parent_block_id: "fc".into(),
                nodes: vec![],
                edges: vec![],
                source: IbdSource::User,
            })
            .unwrap();

        assert!(get_ibd_text(&store, "fc", Some(parent.id)).is_ok());
        assert!(get_ibd_text(&store, "fc", None).unwrap().contains("\"user\""));
        assert!(get_ibd_text(&store, "fc", Some(99)).is_err());
        assert!(get_ibd_text(&store, "other", None).is_err());
    }

    #[test]
    fn listing_and_reading_diagrams() {
        let (_dir, store) = store();
        assert!(list_diagrams_text(&store).unwrap().starts_with("No diagrams"));
        store.save_diagram("drone", "a drone", &Diagram::default()).unwrap();
        assert!(list_diagrams_text(&store).unwrap().starts_with("1\tdrone\tblock"));
        assert!(get_diagram_text(&store, 1).unwrap().contains("\"raw_text\": \"a drone\""));
        assert!(get_diagram_text(&store, 2).is_err());
    }

    #[test]
    fn example_requests_are_checked() {
        let req = |diagram_type: &str, data: &str| SaveExampleRequest {
            name: "ex".into(),
            description: None,
            raw_text: "a drone".into(),
            diagram_type: diagram_type.into(),
            data: data.into(),
        };
        let example = parse_example(req("bdd", r#"{"elements": []}"#)).unwrap();
        assert_eq!(example.diagram_type, DiagramKind::Bdd);
        assert!(parse_example(req("uml", "{}")).is_err());
        assert!(parse_example(req("block", "[]")).is_err());
        assert!(parse_example(req("block", "{")).is_err());
    }

    #[test]
    fn default_names_are_short() {
        assert_eq!(default_name("a drone\nwith GPS"), "a drone");
        assert_eq!(default_name("   "), "Untitled diagram");
        let long = "x".repeat(80);
        assert_eq!(default_name(&long).chars().count(), DEFAULT_NAME_CHARS + 3);
    }
}
