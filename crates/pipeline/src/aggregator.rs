//! Personalization: aggregate learner signals and answer with them.
//!
//! The four signal fetches run concurrently and fail independently. A
//! failing (or unconfigured) provider leaves its field at the empty default.

use chrono::Utc;
use educore_core::error::{Error, ProviderError, Result};
use educore_core::event::{DomainEvent, EventBus};
use educore_core::personalization::{
    AssessmentProvider, DevLabProvider, LearningProgressProvider, Recommendations,
    SkillGapProvider, UserContext,
};
use educore_core::query::{QueryMetadata, QueryRequest};
use educore_core::retrieval::RetrievedChunk;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

use crate::query::QueryService;

/// A query answer merged with the learner context and recommendations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalizedResponse {
    pub answer: String,
    pub sources: Vec<RetrievedChunk>,
    pub metadata: QueryMetadata,
    pub recommendations: Recommendations,
    pub context: UserContext,
}

pub struct ContextAggregator {
    queries: Arc<dyn QueryService>,
    skills: Option<Arc<dyn SkillGapProvider>>,
    progress: Option<Arc<dyn LearningProgressProvider>>,
    assessments: Option<Arc<dyn AssessmentProvider>>,
    devlab: Option<Arc<dyn DevLabProvider>>,
    signal_timeout: Duration,
    event_bus: Option<Arc<EventBus>>,
}

impl ContextAggregator {
    pub fn new(queries: Arc<dyn QueryService>) -> Self {
        Self {
            queries,
            skills: None,
            progress: None,
            assessments: None,
            devlab: None,
            signal_timeout: Duration::from_secs(3),
            event_bus: None,
        }
    }

    pub fn with_skill_gaps(mut self, provider: Arc<dyn SkillGapProvider>) -> Self {
        self.skills = Some(provider);
        self
    }

    pub fn with_learning_progress(mut self, provider: Arc<dyn LearningProgressProvider>) -> Self {
        self.progress = Some(provider);
        self
    }

    pub fn with_assessments(mut self, provider: Arc<dyn AssessmentProvider>) -> Self {
        self.assessments = Some(provider);
        self
    }

    pub fn with_devlab(mut self, provider: Arc<dyn DevLabProvider>) -> Self {
        self.devlab = Some(provider);
        self
    }

    pub fn with_signal_timeout(mut self, timeout: Duration) -> Self {
        self.signal_timeout = timeout;
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    fn degraded(&self, provider: &str, tenant_id: &str, user_id: &str, message: &str) {
        warn!(provider, tenant_id, user_id, error = message, "Learner signal unavailable, using empty default");
        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::ContextDegraded {
                tenant_id: tenant_id.to_string(),
                source: provider.to_string(),
                error_message: message.to_string(),
                timestamp: Utc::now(),
            });
        }
    }

    /// Await one signal under the timeout, substituting `T::default()` on failure.
    async fn fetch_signal<T, F>(&self, provider: &str, tenant_id: &str, user_id: &str, fetch: F) -> T
    where
        T: Default,
        F: Future<Output = std::result::Result<T, ProviderError>>,
    {
        match tokio::time::timeout(self.signal_timeout, fetch).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                self.degraded(provider, tenant_id, user_id, &e.to_string());
                T::default()
            }
            Err(_) => {
                let message = format!("timed out after {}ms", self.signal_timeout.as_millis());
                self.degraded(provider, tenant_id, user_id, &message);
                T::default()
            }
        }
    }

    /// Gather all four signals concurrently. Never fails.
    pub async fn build_user_context(&self, tenant_id: &str, user_id: &str) -> UserContext {
        let skills = async {
            match &self.skills {
                Some(p) => {
                    self.fetch_signal(p.name(), tenant_id, user_id, p.get_skill_gaps(tenant_id, user_id))
                        .await
                }
                None => Vec::new(),
            }
        };
        let progress = async {
            match &self.progress {
                Some(p) => {
                    self.fetch_signal(
                        p.name(),
                        tenant_id,
                        user_id,
                        p.get_learning_progress(tenant_id, user_id),
                    )
                    .await
                }
                None => Default::default(),
            }
        };
        let assessments = async {
            match &self.assessments {
                Some(p) => {
                    self.fetch_signal(
                        p.name(),
                        tenant_id,
                        user_id,
                        p.get_latest_assessments(tenant_id, user_id),
                    )
                    .await
                }
                None => Vec::new(),
            }
        };
        let devlab = async {
            match &self.devlab {
                Some(p) => {
                    self.fetch_signal(
                        p.name(),
                        tenant_id,
                        user_id,
                        p.get_devlab_progress(tenant_id, user_id),
                    )
                    .await
                }
                None => Default::default(),
            }
        };

        let (skill_gaps, learning_progress, assessments, devlab_progress) =
            tokio::join!(skills, progress, assessments, devlab);

        UserContext {
            skill_gaps,
            learning_progress,
            assessments,
            devlab_progress,
        }
    }

    /// Recommendations for the user. Failures yield the empty default.
    pub async fn generate_recommendations(
        &self,
        tenant_id: &str,
        user_id: &str,
        context: &UserContext,
    ) -> Recommendations {
        match self
            .queries
            .generate_recommendations(tenant_id, user_id, context)
            .await
        {
            Ok(recommendations) => recommendations,
            Err(e) => {
                warn!(tenant_id, user_id, error = %e, "Failed to generate personalized recommendations");
                Recommendations::default()
            }
        }
    }

    /// Answer `query` with the learner's context attached.
    ///
    /// The context travels in the response metadata; it is not embedded.
    /// Only a query failure is returned as an error.
    pub async fn get_personalized_query(
        &self,
        tenant_id: &str,
        user_id: &str,
        query: &str,
        session_id: Option<&str>,
    ) -> Result<PersonalizedResponse> {
        if tenant_id.trim().is_empty() {
            return Err(Error::validation("tenantId is required"));
        }
        if user_id.trim().is_empty() {
            return Err(Error::validation("userId is required"));
        }

        let context = self.build_user_context(tenant_id, user_id).await;

        let mut request = QueryRequest::new(tenant_id, query)
            .with_user(user_id)
            .with_metadata(context.to_metadata());
        if let Some(session_id) = session_id {
            request = request.with_session(session_id);
        }

        let response = match self.queries.process_query(request).await {
            Ok(response) => response,
            Err(e) => {
                error!(tenant_id, user_id, error = %e, "Personalized query generation failed");
                return Err(e);
            }
        };

        let recommendations = self
            .generate_recommendations(tenant_id, user_id, &context)
            .await;

        Ok(PersonalizedResponse {
            answer: response.answer,
            sources: response.sources,
            metadata: response.metadata,
            recommendations,
            context,
        })
    }
}
