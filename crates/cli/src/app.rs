//! Composition root: builds every collaborator from [`AppConfig`].
//!
//! Nothing below the CLI resolves its own dependencies; this is the only
//! place that picks concrete backends and providers.

use std::sync::Arc;
use std::time::Duration;

use educore_config::AppConfig;
use educore_core::cache::CacheStore;
use educore_core::event::EventBus;
use educore_core::graph::GraphStore;
use educore_core::retrieval::VectorRetriever;
use educore_pipeline::{ContextAggregator, KnowledgeGraphManager, PipelineSettings, QueryPipeline};
use educore_providers::{ExponentialBackoff, HttpSignalClient, OpenAiCompatProvider};
use educore_store::{InMemoryCache, InMemoryGraphStore, InMemoryVectorIndex, NoopCache};
use tracing::{debug, warn};

#[cfg(feature = "postgres")]
use educore_store::postgres::{self, PgCache, PgGraphStore, PgPool, PgVectorRetriever};

type BoxError = Box<dyn std::error::Error>;

fn unsupported(section: &str, backend: &str) -> BoxError {
    format!("{section} \"{backend}\" is not available in this build").into()
}

/// Storage backends selected by `[cache]`, `[graph]` and `[database]`.
pub struct Backends {
    pub cache: Arc<dyn CacheStore>,
    pub graph: Arc<dyn GraphStore>,
    pub retriever: Arc<dyn VectorRetriever>,
}

impl Backends {
    pub async fn connect(config: &AppConfig) -> Result<Self, BoxError> {
        #[cfg(feature = "postgres")]
        let pool: Option<PgPool> = match &config.database.url {
            Some(url) => {
                let pool = postgres::connect(url).await?;
                postgres::migrate(&pool).await?;
                Some(pool)
            }
            None => None,
        };

        let cache: Arc<dyn CacheStore> = match config.cache.backend.as_str() {
            "none" => Arc::new(NoopCache),
            "memory" => Arc::new(InMemoryCache::new()),
            #[cfg(feature = "postgres")]
            "postgres" => match &pool {
                Some(pool) => Arc::new(PgCache::from_pool(pool.clone())),
                None => return Err("cache.backend \"postgres\" requires database.url".into()),
            },
            other => return Err(unsupported("cache.backend", other)),
        };

        let graph: Arc<dyn GraphStore> = match config.graph.store.as_str() {
            "memory" => Arc::new(InMemoryGraphStore::new()),
            #[cfg(feature = "postgres")]
            "postgres" => match &pool {
                Some(pool) => Arc::new(PgGraphStore::from_pool(pool.clone())),
                None => return Err("graph.store \"postgres\" requires database.url".into()),
            },
            other => return Err(unsupported("graph.store", other)),
        };

        let threshold = config.retrieval.similarity_threshold;
        let allow_unfiltered = config.retrieval.allow_unfiltered;

        #[cfg(feature = "postgres")]
        let retriever: Option<Arc<dyn VectorRetriever>> = pool.map(|pool| {
            Arc::new(PgVectorRetriever::from_pool(pool, threshold).with_unfiltered(allow_unfiltered))
                as Arc<dyn VectorRetriever>
        });
        #[cfg(not(feature = "postgres"))]
        let retriever: Option<Arc<dyn VectorRetriever>> = None;

        let retriever = retriever.unwrap_or_else(|| {
            warn!("No database configured; similarity search runs over an empty in-memory index");
            Arc::new(InMemoryVectorIndex::new(threshold).with_unfiltered(allow_unfiltered))
        });

        Ok(Self {
            cache,
            graph,
            retriever,
        })
    }
}

pub fn graph_manager(
    config: &AppConfig,
    store: Arc<dyn GraphStore>,
    events: Arc<EventBus>,
) -> Arc<KnowledgeGraphManager> {
    Arc::new(
        KnowledgeGraphManager::new(store)
            .with_default_max_nodes(config.graph.default_max_nodes)
            .with_event_bus(events),
    )
}

/// The fully wired query engine.
pub struct App {
    pub pipeline: Arc<QueryPipeline>,
    pub aggregator: ContextAggregator,
    pub graph: Arc<KnowledgeGraphManager>,
}

impl App {
    pub async fn build(config: &AppConfig) -> Result<Self, BoxError> {
        let events = Arc::new(EventBus::default());
        let backends = Backends::connect(config).await?;
        let graph = graph_manager(config, backends.graph, events.clone());

        let provider = Arc::new(OpenAiCompatProvider::from_config(
            &config.provider,
            &config.query,
        )?);

        let pipeline = Arc::new(
            QueryPipeline::new(
                provider.clone(),
                backends.retriever,
                provider,
                backends.cache,
            )
            .with_graph_context(graph.clone())
            .with_retry_policy(Arc::new(ExponentialBackoff::from_config(&config.retry)))
            .with_settings(PipelineSettings::from_config(config))
            .with_event_bus(events.clone()),
        );

        let aggregator = signal_clients(config, ContextAggregator::new(pipeline.clone()))?
            .with_event_bus(events);

        Ok(Self {
            pipeline,
            aggregator,
            graph,
        })
    }
}

/// Attach an HTTP client for every configured learner-signal service.
fn signal_clients(
    config: &AppConfig,
    mut aggregator: ContextAggregator,
) -> Result<ContextAggregator, BoxError> {
    let timeout = Duration::from_millis(config.timeouts.signal_ms);
    let p = &config.personalization;

    if let Some(url) = &p.skills_url {
        aggregator = aggregator.with_skill_gaps(Arc::new(HttpSignalClient::new("skills", url, timeout)?));
    }
    if let Some(url) = &p.learner_url {
        aggregator = aggregator
            .with_learning_progress(Arc::new(HttpSignalClient::new("learner", url, timeout)?));
    }
    if let Some(url) = &p.assessment_url {
        aggregator = aggregator
            .with_assessments(Arc::new(HttpSignalClient::new("assessment", url, timeout)?));
    }
    if let Some(url) = &p.devlab_url {
        aggregator = aggregator.with_devlab(Arc::new(HttpSignalClient::new("devlab", url, timeout)?));
    }

    debug!(
        skills = p.skills_url.is_some(),
        learner = p.learner_url.is_some(),
        assessment = p.assessment_url.is_some(),
        devlab = p.devlab_url.is_some(),
        "Learner signal clients configured"
    );
    Ok(aggregator.with_signal_timeout(timeout))
}
