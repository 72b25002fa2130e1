//! Example retrieval for one-shot prompting.
//!
//! Stored examples carry an embedding of their description. A query is
//! embedded the same way and examples are ranked by cosine similarity.

use std::sync::Arc;

use async_trait::async_trait;
use llm::builder::{LLMBackend, LLMBuilder};
use log::debug;

use blocksmith_core::{AiSettings, DiagramKind, FileStore, StoredExample};

use crate::engine::map_backend;
use crate::error::RetrieveError;
use crate::Example;

pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Number of examples fetched per generation.
pub const DEFAULT_EXAMPLE_LIMIT: usize = 3;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrieveError>;
}

#[async_trait]
pub trait ExampleSource: Send + Sync {
    /// Up to `limit` examples of `kind`, most similar to `query` first.
    async fn similar(
        &self,
        query: &str,
        kind: DiagramKind,
        limit: usize,
    ) -> Result<Vec<Example>, RetrieveError>;
}

/// Source that never returns anything.
pub struct NoExamples;

#[async_trait]
impl ExampleSource for NoExamples {
    async fn similar(
        &self,
        _query: &str,
        _kind: DiagramKind,
        _limit: usize,
    ) -> Result<Vec<Example>, RetrieveError> {
        Ok(vec![])
    }
}

/// Embedding-ranked examples from a [`FileStore`].
pub struct RagExamples<Em> {
    store: Arc<FileStore>,
    embedder: Em,
}

impl<Em: Embedder> RagExamples<Em> {
    pub fn new(store: Arc<FileStore>, embedder: Em) -> Self {
        Self { store, embedder }
    }

    /// Store an example, embedding its text first if it has no vector yet.
    pub async fn add_example(
        &self,
        mut example: StoredExample,
    ) -> Result<StoredExample, RetrieveError> {
        if example.embedding.is_empty() {
            example.embedding = self.embedder.embed(&example.raw_text).await?;
        }
        Ok(self.store.add_example(example)?)
    }
}

/// A stored example with its similarity to a query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredExample {
    pub similarity: f32,
    pub example: StoredExample,
}

impl<Em: Embedder> RagExamples<Em> {
    /// Up to `limit` stored examples ranked by similarity to `query`, most
    /// similar first. `kind` of `None` searches every diagram kind. Examples
    /// without an embedding are never returned.
    pub async fn search(
        &self,
        query: &str,
        kind: Option<DiagramKind>,
        limit: usize,
    ) -> Result<Vec<ScoredExample>, RetrieveError> {
        let candidates = self.store.list_examples(kind)?;
        if candidates.iter().all(|e| e.embedding.is_empty()) || limit == 0 {
            return Ok(vec![]);
        }

        let query_vec = self.embedder.embed(query).await?;
        let mut scored: Vec<ScoredExample> = candidates
            .into_iter()
            .filter(|e| !e.embedding.is_empty())
            .map(|example| ScoredExample {
                similarity: cosine_similarity(&query_vec, &example.embedding),
                example,
            })
            .collect();
        scored.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        scored.truncate(limit);

        debug!(
            kind = kind.map_or("any", DiagramKind::as_str),
            matched = scored.len(),
            best = scored.first().map_or(0.0, |s| s.similarity);
            "Ranked example diagrams"
        );
        Ok(scored)
    }
}

#[async_trait]
impl<Em: Embedder> ExampleSource for RagExamples<Em> {
    async fn similar(
        &self,
        query: &str,
        kind: DiagramKind,
        limit: usize,
    ) -> Result<Vec<Example>, RetrieveError> {
        Ok(self
            .search(query, Some(kind), limit)
            .await?
            .into_iter()
            .map(|scored| Example {
                input: scored.example.raw_text,
                output: scored.example.diagram_json,
            })
            .collect())
    }
}

/// 0.0 when either vector is zero or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// [`Embedder`] backed by the `llm` crate's embedding API.
pub struct LlmEmbedder {
    backend: LLMBackend,
    model: String,
    api_key: String,
}

impl LlmEmbedder {
    pub fn new(settings: &AiSettings) -> Result<Self, RetrieveError> {
        let backend = map_backend(&settings.provider)
            .ok_or_else(|| RetrieveError::UnknownProvider(settings.provider.clone()))?;
        let model = if settings.embedding_model.is_empty() {
            DEFAULT_EMBEDDING_MODEL.to_string()
        } else {
            settings.embedding_model.clone()
        };
        Ok(Self {
            backend,
            model,
            api_key: settings.api_key.clone(),
        })
    }
}

#[async_trait]
impl Embedder for LlmEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrieveError> {
        let mut builder = LLMBuilder::new()
            .backend(self.backend.clone())
            .model(&self.model);
        if !self.api_key.is_empty() {
            builder = builder.api_key(&self.api_key);
        }
        let llm = builder
            .build()
            .map_err(|e| RetrieveError::Embedding(e.to_string()))?;

        let vectors = llm
            .embed(vec![text.to_string()])
            .await
            .map_err(|e| RetrieveError::Embedding(e.to_string()))?;
        vectors
            .into_iter()
            .next()
            .filter(|v| !v.is_empty())
            .ok_or(RetrieveError::EmptyEmbedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Maps known words to fixed axes.
    struct KeywordEmbedder;

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrieveError> {
            let has = |w: &str| if text.contains(w) { 1.0 } else { 0.0 };
            Ok(vec![has("drone"), has("rover"), has("boat")])
        }
    }

    fn example(raw_text: &str, kind: DiagramKind) -> StoredExample {
        StoredExample {
            id: 0,
            name: raw_text.into(),
            description: String::new(),
            raw_text: raw_text.into(),
            diagram_type: kind,
            diagram_json: json!({"name": raw_text}),
            embedding: vec![],
        }
    }

    #[test]
    fn cosine_edge_cases() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), 1.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn ranks_examples_by_similarity() {
        let dir = tempfile::tempdir().unwrap();
        let rag = RagExamples::new(Arc::new(FileStore::new(dir.path())), KeywordEmbedder);
        for text in ["a boat", "a drone", "a rover"] {
            rag.add_example(example(text, DiagramKind::Block)).await.unwrap();
        }
        rag.add_example(example("a drone with an ibd", DiagramKind::Bdd))
            .await
            .unwrap();

        let found = rag
            .similar("survey drone", DiagramKind::Block, 2)
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].input, "a drone");
        assert_eq!(found[0].output, json!({"name": "a drone"}));

        let bdd = rag.similar("drone", DiagramKind::Bdd, 3).await.unwrap();
        assert_eq!(bdd.len(), 1);
    }

    #[tokio::test]
    async fn search_across_kinds_reports_scores() {
        let dir = tempfile::tempdir().unwrap();
        let rag = RagExamples::new(Arc::new(FileStore::new(dir.path())), KeywordEmbedder);
        rag.add_example(example("a drone", DiagramKind::Block)).await.unwrap();
        rag.add_example(example("a drone and a boat", DiagramKind::Bdd))
            .await
            .unwrap();
        rag.add_example(example("a rover", DiagramKind::Bdd)).await.unwrap();

        let found = rag.search("drone", None, 5).await.unwrap();
        assert_eq!(found.len(), 3);
        assert_eq!(found[0].example.raw_text, "a drone");
        assert_eq!(found[0].similarity, 1.0);
        assert!(found[1].similarity > 0.0 && found[1].similarity < 1.0);
        assert_eq!(found[2].similarity, 0.0);

        let limited = rag.search("drone", Some(DiagramKind::Bdd), 1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].example.raw_text, "a drone and a boat");
    }

    #[tokio::test]
    async fn empty_store_needs_no_embedding() {
        struct Unreachable;

        #[async_trait]
        impl Embedder for Unreachable {
            async fn embed(&self, _text: &str) -> Result<Vec<f32>, RetrieveError> {
                Err(RetrieveError::Embedding("offline".into()))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let rag = RagExamples::new(Arc::new(FileStore::new(dir.path())), Unreachable);
        let found = rag.similar("anything", DiagramKind::Block, 3).await.unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn embedding_model_defaults() {
        let settings = AiSettings {
            provider: "openai".into(),
            api_key: "k".into(),
            model: "gpt-4o".into(),
            embedding_model: String::new(),
        };
        assert_eq!(LlmEmbedder::new(&settings).unwrap().model, DEFAULT_EMBEDDING_MODEL);
        assert!(matches!(
            LlmEmbedder::new(&AiSettings::default()),
            Err(RetrieveError::UnknownProvider(_))
        ));
    }
}
