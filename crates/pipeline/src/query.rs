//! The retrieval-augmented query pipeline.
//!
//! # Flow
//!
//! 1. Validate and normalise the query, derive the cache key
//! 2. On a cache hit return the stored response marked `cached`
//! 3. Embed the query and fetch graph context concurrently
//! 4. Retrieve tenant content with the embedding
//! 5. Build the prompt and synthesize under the retry policy
//! 6. Assemble the response and write it to the cache (best effort)
//!
//! Embedding, retrieval and synthesis failures are fatal. Graph context and
//! cache failures are logged and the pipeline continues without them.

use async_trait::async_trait;
use chrono::Utc;
use educore_config::AppConfig;
use educore_core::cache::CacheStore;
use educore_core::error::{Error, ProviderError, Result};
use educore_core::event::{DomainEvent, EventBus};
use educore_core::graph::{GraphContextSource, KnowledgeContext};
use educore_core::personalization::{Recommendations, UserContext};
use educore_core::provider::{
    AnswerSynthesizer, CompletionRequest, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE,
    EmbeddingProvider,
};
use educore_core::query::{
    DEFAULT_CACHE_PREFIX, QueryMetadata, QueryRequest, QueryResponse, cache_key, normalize_query,
};
use educore_core::retrieval::{RetrievalMode, RetrievalQuery, RetrievedChunk, VectorRetriever};
use educore_providers::{ExponentialBackoff, RetryPolicy, run_with_retry};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

/// Content type that files a recommendation under `courses`.
pub const COURSE_CONTENT_TYPE: &str = "course";

/// What the pipeline and its consumers need from a query engine.
///
/// [`QueryPipeline`] is the production implementation; the aggregator
/// depends on this trait so it can be exercised with stand-ins.
#[async_trait]
pub trait QueryService: Send + Sync {
    async fn process_query(&self, request: QueryRequest) -> Result<QueryResponse>;

    /// Suggest courses and exercises for the user's skill gaps.
    async fn generate_recommendations(
        &self,
        tenant_id: &str,
        user_id: &str,
        context: &UserContext,
    ) -> Result<Recommendations>;
}

/// Per-call deadlines.
#[derive(Debug, Clone)]
pub struct PipelineTimeouts {
    pub embedding: Duration,
    pub retrieval: Duration,
    pub synthesis: Duration,
    pub graph: Duration,
    pub cache: Duration,
}

impl Default for PipelineTimeouts {
    fn default() -> Self {
        Self {
            embedding: Duration::from_secs(10),
            retrieval: Duration::from_secs(5),
            synthesis: Duration::from_secs(60),
            graph: Duration::from_secs(2),
            cache: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub cache_prefix: String,
    pub cache_ttl: Duration,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Chunks retrieved when building recommendations
    pub recommendation_limit: usize,
    pub timeouts: PipelineTimeouts,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            cache_prefix: DEFAULT_CACHE_PREFIX.into(),
            cache_ttl: Duration::from_secs(300),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            recommendation_limit: 10,
            timeouts: PipelineTimeouts::default(),
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let t = &config.timeouts;
        Self {
            cache_prefix: config.cache.key_prefix.clone(),
            cache_ttl: config.query.cache_ttl(),
            temperature: config.query.temperature,
            max_tokens: config.query.max_tokens,
            recommendation_limit: config.query.default_top_k.max(10),
            timeouts: PipelineTimeouts {
                embedding: Duration::from_millis(t.embedding_ms),
                retrieval: Duration::from_millis(t.retrieval_ms),
                synthesis: Duration::from_millis(t.synthesis_ms),
                graph: Duration::from_millis(t.graph_ms),
                cache: Duration::from_millis(t.cache_ms),
            },
        }
    }
}

/// The query pipeline. Cheap to share behind an `Arc`.
pub struct QueryPipeline {
    embedder: Arc<dyn EmbeddingProvider>,
    retriever: Arc<dyn VectorRetriever>,
    synthesizer: Arc<dyn AnswerSynthesizer>,
    cache: Arc<dyn CacheStore>,
    graph: Option<Arc<dyn GraphContextSource>>,
    retry: Arc<dyn RetryPolicy>,
    settings: PipelineSettings,
    event_bus: Option<Arc<EventBus>>,
}

impl QueryPipeline {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        retriever: Arc<dyn VectorRetriever>,
        synthesizer: Arc<dyn AnswerSynthesizer>,
        cache: Arc<dyn CacheStore>,
    ) -> Self {
        Self {
            embedder,
            retriever,
            synthesizer,
            cache,
            graph: None,
            retry: Arc::new(ExponentialBackoff::default()),
            settings: PipelineSettings::default(),
            event_bus: None,
        }
    }

    pub fn with_graph_context(mut self, graph: Arc<dyn GraphContextSource>) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn with_retry_policy(mut self, retry: Arc<dyn RetryPolicy>) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }

    fn degraded(&self, tenant_id: &str, source: &str, message: &str) {
        warn!(tenant_id, provider = source, error = message, "Context degraded, continuing without it");
        self.publish(DomainEvent::ContextDegraded {
            tenant_id: tenant_id.to_string(),
            source: source.to_string(),
            error_message: message.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Cache lookup. Any failure reads as a miss.
    async fn cached_response(&self, tenant_id: &str, key: &str) -> Option<QueryResponse> {
        let raw = match tokio::time::timeout(self.settings.timeouts.cache, self.cache.get(key)).await
        {
            Ok(Ok(raw)) => raw?,
            Ok(Err(e)) => {
                self.degraded(tenant_id, self.cache.name(), &e.to_string());
                return None;
            }
            Err(_) => {
                self.degraded(tenant_id, self.cache.name(), "cache read timed out");
                return None;
            }
        };

        match serde_json::from_str::<QueryResponse>(&raw) {
            Ok(response) => Some(response),
            Err(e) => {
                self.degraded(tenant_id, self.cache.name(), &format!("undecodable entry: {e}"));
                None
            }
        }
    }

    /// Best-effort cache write.
    async fn store_response(&self, tenant_id: &str, key: &str, response: &QueryResponse) {
        let value = match serde_json::to_string(response) {
            Ok(v) => v,
            Err(e) => {
                self.degraded(tenant_id, self.cache.name(), &e.to_string());
                return;
            }
        };

        let write = self.cache.set(key, &value, self.settings.cache_ttl);
        match tokio::time::timeout(self.settings.timeouts.cache, write).await {
            Ok(Ok(())) => debug!(tenant_id, "Response cached"),
            Ok(Err(e)) => self.degraded(tenant_id, self.cache.name(), &e.to_string()),
            Err(_) => self.degraded(tenant_id, self.cache.name(), "cache write timed out"),
        }
    }

    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, ProviderError> {
        let deadline = self.settings.timeouts.embedding;
        let embedding = tokio::time::timeout(deadline, self.embedder.embed(text))
            .await
            .map_err(|_| {
                ProviderError::Timeout(format!("embedding exceeded {}ms", deadline.as_millis()))
            })??;

        if embedding.is_empty() {
            return Err(ProviderError::InvalidResponse(format!(
                "{} returned an empty embedding",
                self.embedder.name()
            )));
        }
        Ok(embedding)
    }

    /// Graph context. Failures and timeouts read as absent.
    async fn knowledge_context(&self, tenant_id: &str, query: &str) -> Option<KnowledgeContext> {
        let graph = self.graph.as_ref()?;
        match tokio::time::timeout(
            self.settings.timeouts.graph,
            graph.context_for_query(tenant_id, query),
        )
        .await
        {
            Ok(Ok(context)) => context,
            Ok(Err(e)) => {
                self.degraded(tenant_id, "knowledge_graph", &e.to_string());
                None
            }
            Err(_) => {
                self.degraded(tenant_id, "knowledge_graph", "graph context timed out");
                None
            }
        }
    }

    async fn retrieve(
        &self,
        tenant_id: &str,
        embedding: &[f32],
        top_k: usize,
        roles: &[String],
        attributes: &HashMap<String, String>,
    ) -> std::result::Result<Vec<RetrievedChunk>, ProviderError> {
        let query = RetrievalQuery {
            tenant_id,
            embedding,
            top_k,
            roles,
            attributes,
            mode: RetrievalMode::Filtered,
        };
        let deadline = self.settings.timeouts.retrieval;
        tokio::time::timeout(deadline, self.retriever.get_similar_content(query))
            .await
            .map_err(|_| {
                ProviderError::Timeout(format!("retrieval exceeded {}ms", deadline.as_millis()))
            })?
    }

    async fn synthesize(&self, prompt: &str) -> std::result::Result<String, ProviderError> {
        let deadline = self.settings.timeouts.synthesis;
        let synthesizer = &self.synthesizer;

        run_with_retry(self.retry.as_ref(), "synthesis", || {
            let request = CompletionRequest {
                prompt: prompt.to_string(),
                temperature: self.settings.temperature,
                max_tokens: self.settings.max_tokens,
            };
            async move {
                match tokio::time::timeout(deadline, synthesizer.complete(request)).await {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Timeout(format!(
                        "synthesis exceeded {}ms",
                        deadline.as_millis()
                    ))),
                }
            }
        })
        .await
    }

    async fn run(&self, request: QueryRequest) -> Result<QueryResponse> {
        let started = Instant::now();

        if request.tenant_id.trim().is_empty() {
            return Err(Error::validation("tenantId is required"));
        }
        let query = normalize_query(&request.query_text);
        if query.is_empty() {
            return Err(Error::validation("query is required"));
        }
        if request.top_k == 0 {
            return Err(Error::validation("topK must be at least 1"));
        }

        let tenant_id = request.tenant_id.as_str();
        let key = cache_key(
            &self.settings.cache_prefix,
            tenant_id,
            &query,
            request.user_id.as_deref(),
            request.session_id.as_deref(),
        );

        if request.use_cache {
            if let Some(mut cached) = self.cached_response(tenant_id, &key).await {
                cached.metadata.cached = true;
                info!(tenant_id, "Serving cached response");
                self.publish(DomainEvent::CacheHit {
                    tenant_id: tenant_id.to_string(),
                    timestamp: Utc::now(),
                });
                return Ok(cached);
            }
        }

        let (embedding, knowledge) =
            tokio::join!(self.embed(&query), self.knowledge_context(tenant_id, &query));
        let embedding = embedding?;

        let sources = self
            .retrieve(
                tenant_id,
                &embedding,
                request.top_k,
                &request.roles,
                &request.attributes,
            )
            .await?;
        debug!(tenant_id, sources = sources.len(), "Retrieved content");

        let prompt = crate::prompt::build_prompt(&query, &sources, knowledge.as_ref());
        let answer = self.synthesize(&prompt).await?;

        let response = QueryResponse {
            answer,
            metadata: QueryMetadata {
                tenant_id: request.tenant_id.clone(),
                user_id: request.user_id.clone(),
                session_id: request.session_id.clone(),
                cached: false,
                top_k: request.top_k,
                sources_count: sources.len(),
                extra: request.metadata.clone(),
            },
            sources,
        };

        if request.use_cache {
            self.store_response(tenant_id, &key, &response).await;
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(tenant_id, sources = response.metadata.sources_count, duration_ms, "Query answered");
        self.publish(DomainEvent::QueryAnswered {
            tenant_id: tenant_id.to_string(),
            sources_count: response.metadata.sources_count,
            duration_ms,
            timestamp: Utc::now(),
        });

        Ok(response)
    }
}

#[async_trait]
impl QueryService for QueryPipeline {
    async fn process_query(&self, request: QueryRequest) -> Result<QueryResponse> {
        let request_id = Uuid::new_v4();
        let tenant_id = request.tenant_id.clone();
        let span = info_span!("process_query", %request_id, tenant_id = %tenant_id);

        let result = self.run(request).instrument(span).await;
        if let Err(e) = &result {
            if !e.is_validation() {
                error!(%request_id, tenant_id = %tenant_id, error = %e, "Query processing failed");
            }
        }
        result
    }

    async fn generate_recommendations(
        &self,
        tenant_id: &str,
        user_id: &str,
        context: &UserContext,
    ) -> Result<Recommendations> {
        let gaps = context.skill_gap_names();
        if gaps.is_empty() {
            return Ok(Recommendations::default());
        }

        let summary = format!("Learning resources for: {}", gaps.join(", "));
        let embedding = self.embed(&summary).await?;
        let chunks = self
            .retrieve(
                tenant_id,
                &embedding,
                self.settings.recommendation_limit,
                &[],
                &HashMap::new(),
            )
            .await?;

        let mut recommendations = Recommendations::default();
        for chunk in chunks {
            let is_course = chunk.content_type.eq_ignore_ascii_case(COURSE_CONTENT_TYPE);
            let item = serde_json::to_value(&chunk)?;
            if is_course {
                recommendations.courses.push(item);
            } else {
                recommendations.exercises.push(item);
            }
        }

        debug!(
            tenant_id,
            user_id,
            courses = recommendations.courses.len(),
            exercises = recommendations.exercises.len(),
            "Recommendations generated"
        );
        Ok(recommendations)
    }
}
