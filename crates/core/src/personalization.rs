//! Per-user learning signals and the providers that supply them.
//!
//! Each signal is fetched independently; a missing or failing provider
//! leaves its field at the empty default. Payloads are kept as JSON because
//! each upstream service owns its own shape.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProviderError;

/// Aggregated learning signals for one user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserContext {
    #[serde(default)]
    pub skill_gaps: Vec<Value>,
    #[serde(default)]
    pub learning_progress: Map<String, Value>,
    #[serde(default)]
    pub assessments: Vec<Value>,
    #[serde(default)]
    pub devlab_progress: Map<String, Value>,
}

impl UserContext {
    /// True when no provider contributed anything.
    pub fn is_empty(&self) -> bool {
        self.skill_gaps.is_empty()
            && self.learning_progress.is_empty()
            && self.assessments.is_empty()
            && self.devlab_progress.is_empty()
    }

    /// Readable names of the skill gaps.
    ///
    /// Accepts plain strings or objects carrying `skill`, `name` or `title`.
    pub fn skill_gap_names(&self) -> Vec<String> {
        self.skill_gaps
            .iter()
            .filter_map(|gap| match gap {
                Value::String(s) => Some(s.clone()),
                Value::Object(obj) => ["skill", "name", "title"]
                    .iter()
                    .find_map(|k| obj.get(*k).and_then(Value::as_str))
                    .map(str::to_string),
                _ => None,
            })
            .filter(|s| !s.trim().is_empty())
            .collect()
    }

    /// The context as response-metadata fields.
    pub fn to_metadata(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// Content suggestions derived from a user's context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recommendations {
    pub courses: Vec<Value>,
    pub exercises: Vec<Value>,
}

impl Recommendations {
    pub fn is_empty(&self) -> bool {
        self.courses.is_empty() && self.exercises.is_empty()
    }
}

#[async_trait]
pub trait SkillGapProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn get_skill_gaps(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> std::result::Result<Vec<Value>, ProviderError>;
}

#[async_trait]
pub trait LearningProgressProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn get_learning_progress(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> std::result::Result<Map<String, Value>, ProviderError>;
}

#[async_trait]
pub trait AssessmentProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn get_latest_assessments(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> std::result::Result<Vec<Value>, ProviderError>;
}

#[async_trait]
pub trait DevLabProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn get_devlab_progress(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> std::result::Result<Map<String, Value>, ProviderError>;
}
