use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::Utc;

use super::model::{Engagement, Insight, InsightCategory};
use super::ContextStore;
use crate::error::{Error, Result};

/// Listing filter for stored insights. The default matches every
/// undismissed insight.
#[derive(Debug, Clone, Default)]
pub struct InsightFilter {
    pub category: Option<InsightCategory>,
    pub tier: Option<u8>,
    pub include_dismissed: bool,
}

impl InsightFilter {
    pub fn matches(&self, insight: &Insight) -> bool {
        if !self.include_dismissed && insight.is_dismissed() {
            return false;
        }
        if let Some(category) = self.category {
            if insight.category != category {
                return false;
            }
        }
        if let Some(tier) = self.tier {
            if insight.tier != tier {
                return false;
            }
        }
        true
    }
}

/// Highest `importance * confidence` first, newest first among ties.
pub fn rank_order(a: &Insight, b: &Insight) -> Ordering {
    b.score()
        .total_cmp(&a.score())
        .then_with(|| b.created_at.cmp(&a.created_at))
}

impl ContextStore {
    /// Append one insight. Ids are unique within the store.
    pub fn add_insight(&self, insight: Insight) -> Result<()> {
        self.add_insights(vec![insight]).map(|_| ())
    }

    /// Append a batch in one rewrite. Returns how many were added.
    pub fn add_insights(&self, insights: Vec<Insight>) -> Result<usize> {
        if insights.is_empty() {
            return Ok(0);
        }
        self.mutate(move |data| {
            let mut ids: HashSet<&str> = data.insights.iter().map(|i| i.id.as_str()).collect();
            for insight in &insights {
                if !ids.insert(insight.id.as_str()) {
                    return Err(Error::InvalidInput(format!(
                        "insight {} already exists",
                        insight.id
                    )));
                }
            }
            let count = insights.len();
            data.insights
                .extend(insights.into_iter().map(Insight::clamped));
            Ok(count)
        })
    }

    /// Matching insights in rank order, at most `limit` of them.
    pub fn list_insights(&self, filter: &InsightFilter, limit: usize) -> Vec<Insight> {
        let data = self.read();
        let mut matched: Vec<Insight> = data
            .insights
            .iter()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect();
        matched.sort_by(rank_order);
        matched.truncate(limit);
        matched
    }

    pub fn get_insight(&self, id: &str) -> Option<Insight> {
        self.read().insights.iter().find(|i| i.id == id).cloned()
    }

    /// Record one engagement event against an insight.
    ///
    /// The first event of any kind marks the insight surfaced. A dismissal
    /// stamps `dismissed_at` once; later dismissals keep the original time.
    pub fn update_engagement(
        &self,
        id: &str,
        action: Engagement,
        feedback: Option<String>,
    ) -> Result<Insight> {
        self.mutate(|data| {
            let insight = data
                .insights
                .iter_mut()
                .find(|i| i.id == id)
                .ok_or_else(|| Error::NotFound(format!("insight {id}")))?;

            let now = Utc::now();
            insight.engagement = Some(action);
            insight.surfaced_at.get_or_insert(now);
            if action == Engagement::Dismissed {
                insight.dismissed_at.get_or_insert(now);
            }
            if let Some(feedback) = feedback {
                insight.user_feedback = Some(feedback);
            }
            Ok(insight.clone())
        })
    }

    /// Titles of the most recently created insights, dismissed included,
    /// newest first. Fed back to the generator so it avoids repeats.
    pub fn recent_insight_titles(&self, limit: usize) -> Vec<String> {
        let data = self.read();
        let mut recent: Vec<&Insight> = data.insights.iter().collect();
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        recent
            .into_iter()
            .take(limit)
            .map(|i| i.title.clone())
            .collect()
    }
}
