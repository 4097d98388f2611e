pub mod chat;
pub mod llm;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::metrics::Targets;
use crate::storage::model::{DailySnapshot, Insight};

/// What the generator knows about the user beyond their daily data.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileContext {
    pub goals: Option<String>,
    pub targets: Targets,
    /// Titles of recently generated insights, newest first. Generators should
    /// avoid repeating these.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub recent_titles: Vec<String>,
}

/// Produces candidate insights from a window of snapshots.
///
/// Implementations never write to the store; the scheduler persists whatever
/// they return. An error is recorded against the run and does not affect
/// other tasks.
#[async_trait]
pub trait InsightGenerator: Send + Sync {
    async fn generate(
        &self,
        snapshots: &[DailySnapshot],
        profile: &ProfileContext,
    ) -> Result<Vec<Insight>>;
}
