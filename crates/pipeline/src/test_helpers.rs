//! Shared test doubles for pipeline, aggregator and graph manager tests.

use async_trait::async_trait;
use educore_core::cache::CacheStore;
use educore_core::error::{CacheError, GraphError, ProviderError};
use educore_core::graph::{
    GraphContextSource, GraphStore, KnowledgeContext, KnowledgeGraphEdge, KnowledgeGraphNode,
};
use educore_core::personalization::{
    AssessmentProvider, DevLabProvider, LearningProgressProvider, SkillGapProvider,
};
use educore_core::provider::{AnswerSynthesizer, CompletionRequest, EmbeddingProvider};
use educore_core::retrieval::{RetrievalQuery, RetrievedChunk, VectorRetriever};
use educore_providers::RetryPolicy;
use educore_store::InMemoryGraphStore;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

pub fn chunk(id: &str, content_type: &str, text: &str, similarity: f32) -> RetrievedChunk {
    RetrievedChunk {
        id: id.into(),
        tenant_id: "t1".into(),
        content_id: format!("content-{id}"),
        content_type: content_type.into(),
        text: text.into(),
        similarity,
        metadata: Map::new(),
    }
}

/// Returns a fixed embedding, or a scripted error.
pub struct MockEmbedder {
    embedding: Vec<f32>,
    error: Option<ProviderError>,
    delay: Option<Duration>,
    inputs: Mutex<Vec<String>>,
}

impl MockEmbedder {
    pub fn returning(embedding: Vec<f32>) -> Self {
        Self {
            embedding,
            error: None,
            delay: None,
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: ProviderError) -> Self {
        Self {
            error: Some(error),
            ..Self::returning(Vec::new())
        }
    }

    pub fn slow(embedding: Vec<f32>, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::returning(embedding)
        }
    }

    pub fn call_count(&self) -> usize {
        self.inputs.lock().unwrap().len()
    }

    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    fn name(&self) -> &str {
        "mock_embedder"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.inputs.lock().unwrap().push(text.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(self.embedding.clone()),
        }
    }
}

/// Returns scripted results in order; the last one repeats.
pub struct ScriptedSynthesizer {
    results: Vec<Result<String, ProviderError>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedSynthesizer {
    pub fn new(results: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            results,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn answering(text: &str) -> Self {
        Self::new(vec![Ok(text.to_string())])
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.requests.lock().unwrap().last().map(|r| r.prompt.clone())
    }
}

#[async_trait]
impl AnswerSynthesizer for ScriptedSynthesizer {
    fn name(&self) -> &str {
        "scripted_synthesizer"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError> {
        let mut requests = self.requests.lock().unwrap();
        let index = requests.len().min(self.results.len().saturating_sub(1));
        requests.push(request);
        self.results
            .get(index)
            .cloned()
            .unwrap_or_else(|| Ok(String::new()))
    }
}

/// What a retriever was asked for.
#[derive(Debug, Clone)]
pub struct SeenRetrieval {
    pub tenant_id: String,
    pub embedding: Vec<f32>,
    pub top_k: usize,
    pub roles: Vec<String>,
    pub attributes: HashMap<String, String>,
}

/// Returns fixed chunks (truncated to `top_k`) and records each call.
pub struct StaticRetriever {
    chunks: Vec<RetrievedChunk>,
    error: Option<ProviderError>,
    seen: Mutex<Vec<SeenRetrieval>>,
}

impl StaticRetriever {
    pub fn new(chunks: Vec<RetrievedChunk>) -> Self {
        Self {
            chunks,
            error: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: ProviderError) -> Self {
        Self {
            error: Some(error),
            ..Self::new(Vec::new())
        }
    }

    pub fn call_count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn last_call(&self) -> Option<SeenRetrieval> {
        self.seen.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl VectorRetriever for StaticRetriever {
    fn name(&self) -> &str {
        "static_retriever"
    }

    async fn get_similar_content(
        &self,
        query: RetrievalQuery<'_>,
    ) -> Result<Vec<RetrievedChunk>, ProviderError> {
        self.seen.lock().unwrap().push(SeenRetrieval {
            tenant_id: query.tenant_id.to_string(),
            embedding: query.embedding.to_vec(),
            top_k: query.top_k,
            roles: query.roles.to_vec(),
            attributes: query.attributes.clone(),
        });
        if let Some(e) = &self.error {
            return Err(e.clone());
        }
        Ok(self.chunks.iter().take(query.top_k).cloned().collect())
    }
}

/// A HashMap cache that records writes and can be told to fail.
#[derive(Default)]
pub struct RecordingCache {
    values: Mutex<HashMap<String, String>>,
    writes: Mutex<Vec<(String, Duration)>>,
    gets: Mutex<usize>,
    fail_get: bool,
    fail_set: bool,
}

impl RecordingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn broken() -> Self {
        Self {
            fail_get: true,
            fail_set: true,
            ..Self::default()
        }
    }

    pub fn writes(&self) -> Vec<(String, Duration)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn get_count(&self) -> usize {
        *self.gets.lock().unwrap()
    }
}

#[async_trait]
impl CacheStore for RecordingCache {
    fn name(&self) -> &str {
        "recording"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        *self.gets.lock().unwrap() += 1;
        if self.fail_get {
            return Err(CacheError::Unavailable("connection refused".into()));
        }
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.writes.lock().unwrap().push((key.to_string(), ttl));
        if self.fail_set {
            return Err(CacheError::Unavailable("connection refused".into()));
        }
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Fixed graph context, or a failure.
pub struct StaticGraphContext {
    result: Result<Option<KnowledgeContext>, GraphError>,
}

impl StaticGraphContext {
    pub fn concepts(concepts: &[&str]) -> Self {
        Self {
            result: Ok(Some(KnowledgeContext {
                related_concepts: concepts.iter().map(|c| c.to_string()).collect(),
            })),
        }
    }

    pub fn failing() -> Self {
        Self {
            result: Err(GraphError::QueryFailed("graph offline".into())),
        }
    }
}

#[async_trait]
impl GraphContextSource for StaticGraphContext {
    async fn context_for_query(
        &self,
        _tenant_id: &str,
        _query: &str,
    ) -> Result<Option<KnowledgeContext>, GraphError> {
        self.result.clone()
    }
}

/// Retries retryable errors up to `max_attempts` with no delay.
pub struct ImmediateRetry {
    pub max_attempts: u32,
}

impl RetryPolicy for ImmediateRetry {
    fn next_delay(&self, attempt: u32, error: &ProviderError) -> Option<Duration> {
        (attempt < self.max_attempts && error.is_retryable()).then_some(Duration::ZERO)
    }
}

/// Delegates to an in-memory store but fails the n-th node upsert.
pub struct FlakyGraphStore {
    pub inner: InMemoryGraphStore,
    fail_on_node: usize,
    node_writes: Mutex<usize>,
    total_writes: Mutex<usize>,
}

impl FlakyGraphStore {
    pub fn failing_on_node(n: usize) -> Self {
        Self {
            inner: InMemoryGraphStore::new(),
            fail_on_node: n,
            node_writes: Mutex::new(0),
            total_writes: Mutex::new(0),
        }
    }

    pub fn total_writes(&self) -> usize {
        *self.total_writes.lock().unwrap()
    }
}

#[async_trait]
impl GraphStore for FlakyGraphStore {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn upsert_node(&self, node: &KnowledgeGraphNode) -> Result<(), GraphError> {
        let attempt = {
            let mut writes = self.node_writes.lock().unwrap();
            *writes += 1;
            *writes
        };
        if attempt == self.fail_on_node {
            return Err(GraphError::Storage("disk full".into()));
        }
        *self.total_writes.lock().unwrap() += 1;
        self.inner.upsert_node(node).await
    }

    async fn upsert_edge(&self, edge: &KnowledgeGraphEdge) -> Result<(), GraphError> {
        *self.total_writes.lock().unwrap() += 1;
        self.inner.upsert_edge(edge).await
    }

    async fn find_nodes(
        &self,
        tenant_id: &str,
        node_ids: &[String],
        limit: usize,
    ) -> Result<Vec<KnowledgeGraphNode>, GraphError> {
        self.inner.find_nodes(tenant_id, node_ids, limit).await
    }

    async fn find_edges(
        &self,
        tenant_id: &str,
        node_ids: &[String],
    ) -> Result<Vec<KnowledgeGraphEdge>, GraphError> {
        self.inner.find_edges(tenant_id, node_ids).await
    }
}

/// A learner-signal source serving one fixed payload for every trait.
pub struct StaticSignals {
    pub name: &'static str,
    pub list: Vec<Value>,
    pub object: Map<String, Value>,
    pub fail: bool,
    calls: Mutex<usize>,
}

impl StaticSignals {
    pub fn new(name: &'static str, list: Vec<Value>, object: Map<String, Value>) -> Self {
        Self {
            name,
            list,
            object,
            fail: false,
            calls: Mutex::new(0),
        }
    }

    pub fn failing(name: &'static str) -> Self {
        Self {
            fail: true,
            ..Self::new(name, Vec::new(), Map::new())
        }
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    fn list_result(&self) -> Result<Vec<Value>, ProviderError> {
        *self.calls.lock().unwrap() += 1;
        if self.fail {
            Err(ProviderError::Unavailable(format!("{} down", self.name)))
        } else {
            Ok(self.list.clone())
        }
    }

    fn object_result(&self) -> Result<Map<String, Value>, ProviderError> {
        *self.calls.lock().unwrap() += 1;
        if self.fail {
            Err(ProviderError::Unavailable(format!("{} down", self.name)))
        } else {
            Ok(self.object.clone())
        }
    }
}

#[async_trait]
impl SkillGapProvider for StaticSignals {
    fn name(&self) -> &str {
        self.name
    }

    async fn get_skill_gaps(&self, _t: &str, _u: &str) -> Result<Vec<Value>, ProviderError> {
        self.list_result()
    }
}

#[async_trait]
impl LearningProgressProvider for StaticSignals {
    fn name(&self) -> &str {
        self.name
    }

    async fn get_learning_progress(
        &self,
        _t: &str,
        _u: &str,
    ) -> Result<Map<String, Value>, ProviderError> {
        self.object_result()
    }
}

#[async_trait]
impl AssessmentProvider for StaticSignals {
    fn name(&self) -> &str {
        self.name
    }

    async fn get_latest_assessments(&self, _t: &str, _u: &str) -> Result<Vec<Value>, ProviderError> {
        self.list_result()
    }
}

#[async_trait]
impl DevLabProvider for StaticSignals {
    fn name(&self) -> &str {
        self.name
    }

    async fn get_devlab_progress(
        &self,
        _t: &str,
        _u: &str,
    ) -> Result<Map<String, Value>, ProviderError> {
        self.object_result()
    }
}
