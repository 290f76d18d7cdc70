//! HTTP clients for the learner-signal services.
//!
//! Each service exposes `GET {base}/tenants/{tenantId}/users/{userId}/{resource}`
//! and answers with either the bare payload or a `{"data": ...}` envelope.

use async_trait::async_trait;
use educore_core::error::ProviderError;
use educore_core::personalization::{
    AssessmentProvider, DevLabProvider, LearningProgressProvider, SkillGapProvider,
};
use reqwest::Url;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

pub const SKILL_GAPS_RESOURCE: &str = "skill-gaps";
pub const LEARNING_PROGRESS_RESOURCE: &str = "learning-progress";
pub const ASSESSMENTS_RESOURCE: &str = "assessments/latest";
pub const DEVLAB_PROGRESS_RESOURCE: &str = "devlab-progress";

/// A JSON-over-HTTP client for one learner-signal service.
///
/// The same type serves all four signal traits; which resource it reads
/// depends on the trait method invoked.
pub struct HttpSignalClient {
    name: String,
    base_url: Url,
    client: reqwest::Client,
}

impl HttpSignalClient {
    pub fn new(
        name: impl Into<String>,
        base_url: impl AsRef<str>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let name = name.into();
        let base_url = Url::parse(base_url.as_ref())
            .map_err(|e| ProviderError::NotConfigured(format!("{name} URL: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ProviderError::NotConfigured(format!(
                "{name} URL cannot carry a path: {base_url}"
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name,
            base_url,
            client,
        })
    }

    fn resource_url(&self, tenant_id: &str, user_id: &str, resource: &str) -> Result<Url, ProviderError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ProviderError::NotConfigured(format!("{} URL has no path", self.name)))?
            .pop_if_empty()
            .extend(["tenants", tenant_id, "users", user_id])
            .extend(resource.split('/'));
        Ok(url)
    }

    async fn fetch(&self, tenant_id: &str, user_id: &str, resource: &str) -> Result<Value, ProviderError> {
        let url = self.resource_url(tenant_id, user_id, resource)?;
        debug!(service = %self.name, tenant_id, resource, "Fetching learner signal");

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(e.to_string())
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if status == 404 {
            return Ok(Value::Null);
        }
        if !(200..300).contains(&status) {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::ApiError {
                status_code: status,
                message,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("{}: {e}", self.name)))?;

        Ok(match body {
            Value::Object(mut obj) if obj.len() == 1 && obj.contains_key("data") => {
                obj.remove("data").unwrap_or(Value::Null)
            }
            other => other,
        })
    }
}

fn into_list(value: Value, service: &str) -> Result<Vec<Value>, ProviderError> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => Err(ProviderError::InvalidResponse(format!(
            "{service}: expected array, got {}",
            kind(&other)
        ))),
    }
}

fn into_object(value: Value, service: &str) -> Result<Map<String, Value>, ProviderError> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(ProviderError::InvalidResponse(format!(
            "{service}: expected object, got {}",
            kind(&other)
        ))),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[async_trait]
impl SkillGapProvider for HttpSignalClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_skill_gaps(&self, tenant_id: &str, user_id: &str) -> Result<Vec<Value>, ProviderError> {
        let value = self.fetch(tenant_id, user_id, SKILL_GAPS_RESOURCE).await?;
        into_list(value, &self.name)
    }
}

#[async_trait]
impl LearningProgressProvider for HttpSignalClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_learning_progress(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Map<String, Value>, ProviderError> {
        let value = self.fetch(tenant_id, user_id, LEARNING_PROGRESS_RESOURCE).await?;
        into_object(value, &self.name)
    }
}

#[async_trait]
impl AssessmentProvider for HttpSignalClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_latest_assessments(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Vec<Value>, ProviderError> {
        let value = self.fetch(tenant_id, user_id, ASSESSMENTS_RESOURCE).await?;
        into_list(value, &self.name)
    }
}

#[async_trait]
impl DevLabProvider for HttpSignalClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_devlab_progress(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Map<String, Value>, ProviderError> {
        let value = self.fetch(tenant_id, user_id, DEVLAB_PROGRESS_RESOURCE).await?;
        into_object(value, &self.name)
    }
}
