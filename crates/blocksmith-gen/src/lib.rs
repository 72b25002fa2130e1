pub mod engine;
pub mod error;
mod parse;
pub mod prompt;
pub mod retrieve;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use blocksmith_core::{
    layout_ibd, layout_with, normalize, Diagram, ExtractedIbd, FileStore, GenerationMode,
    IbdRecord, IbdSource, LayoutConfig, Normalized, RepairLog, Repaired, StoreError,
    StoredDiagram,
};

pub use engine::{ChatModel, LlmChatModel};
pub use error::{GenerateError, RetrieveError};
pub use retrieve::{
    Embedder, ExampleSource, LlmEmbedder, NoExamples, RagExamples, ScoredExample,
};

/// A description/diagram pair replayed to the model before the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub input: String,
    pub output: Value,
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub text: String,
    pub mode: GenerationMode,
    pub use_rag: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationOutcome {
    pub diagram: Diagram,
    pub ibds: Vec<ExtractedIbd>,
    pub repairs: RepairLog,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub model_used: String,
    pub rag_used: bool,
    pub examples_count: usize,
}

impl GenerationOutcome {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Turns a system description into a laid-out diagram.
///
/// The model and example source are injected so the pipeline runs without
/// network access in tests.
pub struct Generator<M, E> {
    model: M,
    examples: E,
    layout: LayoutConfig,
    example_limit: usize,
}

impl<M: ChatModel, E: ExampleSource> Generator<M, E> {
    pub fn new(model: M, examples: E) -> Self {
        Self {
            model,
            examples,
            layout: LayoutConfig::default(),
            example_limit: retrieve::DEFAULT_EXAMPLE_LIMIT,
        }
    }

    pub fn with_layout(mut self, layout: LayoutConfig) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_example_limit(mut self, limit: usize) -> Self {
        self.example_limit = limit;
        self
    }

    /// Never fails outright: a model or parse failure yields the empty
    /// fallback diagram with `error` set.
    pub async fn generate(&self, request: &GenerationRequest) -> GenerationOutcome {
        let examples = if request.use_rag {
            self.retrieve(request).await
        } else {
            vec![]
        };
        let examples_count = examples.len();

        info!(
            model = self.model.name(),
            mode = request.mode.diagram_kind().as_str(),
            examples = examples_count;
            "Generating diagram"
        );

        let system = prompt::system_prompt(request.mode);
        let history = prompt::history(&examples);
        let user = prompt::user_message(&request.text);

        let raw = match self.call_model(&system, &history, &user).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(model = self.model.name(); "Generation failed: {e}");
                return GenerationOutcome {
                    diagram: Diagram::default(),
                    ibds: vec![],
                    repairs: RepairLog::new(),
                    error: Some(e.to_string()),
                    model_used: self.model.name().to_string(),
                    rag_used: examples_count > 0,
                    examples_count,
                };
            }
        };

        let Repaired {
            value: Normalized { diagram, ibds },
            log,
        } = finish(&self.layout, &raw, request.mode);

        info!(
            elements = diagram.elements.len(),
            relationships = diagram.relationships.len(),
            ibds = ibds.len(),
            repairs = log.len();
            "Diagram generated"
        );

        GenerationOutcome {
            diagram,
            ibds,
            repairs: log,
            error: None,
            model_used: self.model.name().to_string(),
            rag_used: examples_count > 0,
            examples_count,
        }
    }

    async fn retrieve(&self, request: &GenerationRequest) -> Vec<Example> {
        let kind = request.mode.diagram_kind();
        match self
            .examples
            .similar(&request.text, kind, self.example_limit)
            .await
        {
            Ok(examples) => examples,
            Err(e) => {
                warn!(kind = kind.as_str(); "Example retrieval failed, continuing without: {e}");
                vec![]
            }
        }
    }

    async fn call_model(
        &self,
        system: &str,
        history: &[prompt::Turn],
        user: &str,
    ) -> Result<Value, GenerateError> {
        let reply = self.model.complete(system, history, user).await?;
        log::debug!(chars = reply.len(); "Model replied");
        parse::parse_llm_output(&reply)
    }
}

/// Repair, normalize and lay out a raw model document. The diagram is tagged
/// with the kind that `mode` produces.
pub fn finish(layout: &LayoutConfig, raw: &Value, mode: GenerationMode) -> Repaired<Normalized> {
    normalize(raw, mode).map(|Normalized { mut diagram, mut ibds }| {
        diagram.diagram_type = mode.diagram_kind();
        let diagram = layout_with(layout, diagram);
        for ibd in &mut ibds {
            layout_ibd(layout, ibd);
        }
        Normalized { diagram, ibds }
    })
}

/// Persist a successful outcome: the diagram under its source text, then
/// each extracted IBD keyed by the stored diagram and its parent block.
pub fn save_outcome(
    store: &FileStore,
    name: &str,
    text: &str,
    outcome: &GenerationOutcome,
) -> Result<(StoredDiagram, Vec<IbdRecord>), StoreError> {
    let stored = store.save_diagram(name, text, &outcome.diagram)?;
    let records = outcome
        .ibds
        .iter()
        .cloned()
        .map(|ibd| store.upsert_ibd(ibd.into_record(stored.id, IbdSource::Ai)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((stored, records))
}
