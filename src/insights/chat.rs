//! Plain-text context blocks prepended to chat requests, so the chat path
//! can use background results without calling the model itself.

use crate::metrics::{Averages, BodyCompReport, TrendSummary};
use crate::storage::model::Insight;

/// Yearly weight change worth mentioning, in lbs.
const YEARLY_WEIGHT_MENTION_LBS: f64 = 2.0;

/// Stored insights as a bullet list with up to two suggested actions each.
/// Empty when there is nothing to say.
pub fn format_insights(insights: &[Insight]) -> String {
    if insights.is_empty() {
        return String::new();
    }

    let mut lines = vec!["Recent AI-generated insights about this user:".to_string()];
    for insight in insights {
        lines.push(format!(
            "- [{}] {}: {}",
            insight.category.as_str().to_uppercase(),
            insight.title,
            insight.body
        ));
        if !insight.suggested_actions.is_empty() {
            let actions: Vec<&str> = insight
                .suggested_actions
                .iter()
                .take(2)
                .map(String::as_str)
                .collect();
            lines.push(format!("  Suggested: {}", actions.join(", ")));
        }
    }
    lines.join("\n")
}

/// Seven-day recap. Empty when the week has no usable data.
pub fn format_weekly_summary(averages: &Averages) -> String {
    let mut lines = vec!["This week's summary:".to_string()];

    if averages.nutrition_days > 0 {
        lines.push(format!(
            "- Nutrition: avg {}cal, {}g protein ({} days tracked)",
            averages.avg_calories, averages.avg_protein, averages.nutrition_days
        ));
    }

    if let Some(weight) = averages.avg_weight {
        let mut line = format!("- Weight: {weight}lbs");
        if let Some(change) = averages.weight_change.filter(|c| *c != 0.0) {
            let arrow = if change < 0.0 { "↓" } else { "↑" };
            line.push_str(&format!(" ({arrow}{}lbs this week)", change.abs()));
        }
        lines.push(line);
    }

    if let Some(sleep) = averages.avg_sleep {
        lines.push(format!("- Sleep: avg {sleep}h"));
    }

    if averages.total_workouts > 0 {
        lines.push(format!("- Workouts: {} sessions", averages.total_workouts));
    }

    if lines.len() > 1 {
        lines.join("\n")
    } else {
        String::new()
    }
}

fn describe(label: &str, trend: &TrendSummary, unit: &str, show_current: bool) -> Option<String> {
    if trend.change == 0.0 {
        return None;
    }
    let mut text = format!(
        "{label} {} ({:+.1}{unit}",
        trend.direction.as_str(),
        trend.change
    );
    if show_current {
        text.push_str(&format!(", now {}{unit}", trend.current));
    }
    text.push(')');
    Some(text)
}

/// Monthly body-composition trends, plus the yearly weight change when it
/// is large enough to matter.
pub fn format_body_comp(report: &BodyCompReport) -> String {
    let mut lines = Vec::new();

    let monthly = &report.monthly;
    let parts: Vec<String> = [
        monthly
            .weight
            .as_ref()
            .and_then(|t| describe("weight", t, "lbs", true)),
        monthly
            .body_fat
            .as_ref()
            .and_then(|t| describe("body fat", t, "%", true)),
        monthly
            .lean_mass
            .as_ref()
            .and_then(|t| describe("lean mass", t, "lbs", false)),
    ]
    .into_iter()
    .flatten()
    .collect();
    if !parts.is_empty() {
        lines.push(format!("Monthly body comp trends: {}", parts.join(", ")));
    }

    if let Some(weight) = &report.yearly.weight {
        if weight.change.abs() >= YEARLY_WEIGHT_MENTION_LBS {
            lines.push(format!("Yearly trend: {:+.1}lbs over the year", weight.change));
        }
    }

    lines.join("\n")
}
