use async_trait::async_trait;
use serde::Deserialize;

use super::{InsightGenerator, ProfileContext};
use crate::config::Settings;
use crate::date_util::extract_json_object;
use crate::error::{Error, Result};
use crate::storage::model::{DailySnapshot, Insight, InsightCategory};

/// Upper bound on how much of the prompt data is kept on each insight.
const CONVERSATION_CONTEXT_CHARS: usize = 2000;
const MAX_EXERCISES_PER_DAY: usize = 8;
const EXERCISE_NAME_CHARS: usize = 12;

const INSIGHT_PROMPT: &str = r#"You are an experienced strength and nutrition coach reviewing a client's raw tracking data: daily nutrition totals, health metrics, and logged workouts.

Find what is interesting, important, or actionable. Look for patterns, cross-domain correlations (sleep vs. training, protein vs. weight, steps vs. recovery), anomalies, progress, and risks. Cite the actual numbers. Skip anything generic or obvious.

Respond with ONLY a JSON object (no markdown, no code fences) in this exact format:
{
  "insights": [
    {
      "category": "correlation|trend|anomaly|milestone|nudge",
      "tier": <1-5 integer, 1 = most urgent>,
      "title": "Short title, at most 8 words",
      "body": "Two or three conversational sentences that reference the data",
      "importance": <0.0-1.0>,
      "confidence": <0.0-1.0>,
      "actionability": <0.0-1.0>,
      "suggested_actions": ["action", "action"],
      "supporting_data": {"metric": "value"}
    }
  ]
}

Categories: correlation = patterns across domains, trend = direction over time, anomaly = something unusual needing attention, milestone = progress worth celebrating, nudge = a gentle reminder.

Return between 3 and 7 insights. Fewer, sharper insights beat many weak ones."#;

/// Insight generator backed by a mixtape agent.
#[derive(Debug, Clone)]
pub struct LlmInsightGenerator {
    provider: String,
    model: String,
}

impl LlmInsightGenerator {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.llm_provider, &settings.llm_model)
    }
}

#[async_trait]
impl InsightGenerator for LlmInsightGenerator {
    async fn generate(
        &self,
        snapshots: &[DailySnapshot],
        profile: &ProfileContext,
    ) -> Result<Vec<Insight>> {
        if snapshots.is_empty() {
            log::info!("No snapshots in window, skipping insight generation");
            return Ok(Vec::new());
        }

        let data_text = format_data_compact(snapshots, profile);
        log::info!(
            "Generating insights from {} days (~{} tokens)",
            snapshots.len(),
            data_text.len() / 4
        );

        let prompt = build_prompt(&data_text, &profile.recent_titles);
        let agent = build_agent(&self.provider, &self.model).await?;
        let response = agent
            .run(&prompt)
            .await
            .map_err(|e| Error::Llm(e.to_string()))?;

        let insights = parse_insights(&response.text(), &data_text)?;
        log::info!("LLM returned {} insights", insights.len());
        Ok(insights)
    }
}

/// Build a mixtape agent for the configured provider and model.
pub async fn build_agent(provider: &str, model_name: &str) -> Result<mixtape_core::Agent> {
    // Each combination needs its own builder call since the model types differ.
    match (provider, model_name) {
        ("bedrock", "claude-haiku-4-5" | "haiku") => mixtape_core::Agent::builder()
            .bedrock(mixtape_core::ClaudeHaiku4_5)
            .build()
            .await
            .map_err(|e| Error::Llm(e.to_string())),
        ("bedrock", _) => mixtape_core::Agent::builder()
            .bedrock(mixtape_core::ClaudeSonnet4_5)
            .build()
            .await
            .map_err(|e| Error::Llm(e.to_string())),
        ("anthropic", "claude-haiku-4-5" | "haiku") => mixtape_core::Agent::builder()
            .anthropic_from_env(mixtape_core::ClaudeHaiku4_5)
            .build()
            .await
            .map_err(|e| Error::Llm(e.to_string())),
        ("anthropic", _) => mixtape_core::Agent::builder()
            .anthropic_from_env(mixtape_core::ClaudeSonnet4_5)
            .build()
            .await
            .map_err(|e| Error::Llm(e.to_string())),
        (other, _) => Err(Error::Config(format!("unknown llm_provider: {other}"))),
    }
}

fn build_prompt(data_text: &str, recent_titles: &[String]) -> String {
    let mut prompt = String::from(INSIGHT_PROMPT);
    if !recent_titles.is_empty() {
        prompt.push_str("\n\nThese insights were already delivered recently. Do not repeat them; only revisit one if the data has clearly changed:\n");
        for title in recent_titles {
            prompt.push_str("- ");
            prompt.push_str(title);
            prompt.push('\n');
        }
    }
    prompt.push_str("\n\nClient data:\n\n");
    prompt.push_str(data_text);
    prompt
}

// ── Compact encoding ───────────────────────────────────────────────

/// One day on one line, e.g.
/// `2025-01-05 | N:2150|162|210|70|5 | H:w181.2,sl7.4,st10432 | W:1x|62m|8450kg Bench(4×32@80)`.
///
/// Sections with no data are left out entirely.
pub fn format_day_compact(snapshot: &DailySnapshot) -> String {
    let mut parts = vec![snapshot.date.to_string()];

    let n = &snapshot.nutrition;
    if n.is_tracked() {
        parts.push(format!(
            "N:{}|{}|{}|{}|{}",
            n.calories, n.protein, n.carbs, n.fat, n.entry_count
        ));
    }

    let h = &snapshot.health;
    let mut health = Vec::new();
    if let Some(w) = h.weight_lbs {
        health.push(format!("w{w:.1}"));
    }
    if let Some(bf) = h.body_fat_pct {
        health.push(format!("bf{bf:.1}"));
    }
    if let Some(sl) = h.sleep_hours {
        health.push(format!("sl{sl:.1}"));
    }
    if let Some(hr) = h.resting_hr {
        health.push(format!("hr{hr}"));
    }
    if let Some(hrv) = h.hrv_ms {
        health.push(format!("hrv{hrv:.0}"));
    }
    if h.steps > 0 {
        health.push(format!("st{}", h.steps));
    }
    if h.active_calories > 0 {
        health.push(format!("ac{}", h.active_calories));
    }
    if let Some(vo2) = h.vo2_max {
        health.push(format!("vo2{vo2:.1}"));
    }
    if !health.is_empty() {
        parts.push(format!("H:{}", health.join(",")));
    }

    let w = &snapshot.workout;
    if w.workout_count > 0 {
        let mut line = format!(
            "W:{}x|{}m|{:.0}kg",
            w.workout_count, w.total_duration_minutes, w.total_volume_kg
        );
        let exercises: Vec<String> = w
            .exercises
            .iter()
            .take(MAX_EXERCISES_PER_DAY)
            .map(|ex| {
                let name = truncate(&ex.name, EXERCISE_NAME_CHARS);
                if ex.max_weight_kg > 0.0 {
                    format!("{name}({}×{}@{:.0})", ex.sets, ex.total_reps, ex.max_weight_kg)
                } else {
                    format!("{name}({}×{})", ex.sets, ex.total_reps)
                }
            })
            .collect();
        if !exercises.is_empty() {
            line.push(' ');
            line.push_str(&exercises.join(","));
        }
        parts.push(line);
    }

    parts.join(" | ")
}

/// Everything the generator sees: legend, profile, then one line per day
/// with data, newest first.
pub fn format_data_compact(snapshots: &[DailySnapshot], profile: &ProfileContext) -> String {
    let mut lines = vec![
        "=== RAW FITNESS DATA ===".to_string(),
        "Format: DATE | N:cal|prot|carb|fat|entries | H:w(lbs),bf(%),sl(hrs),hr,hrv(ms),st(steps),ac(kcal),vo2 | W:count|minutes|volume exercises(sets×reps@kg)".to_string(),
        String::new(),
        "--- PROFILE ---".to_string(),
    ];
    if let Some(goals) = profile.goals.as_deref().filter(|g| !g.trim().is_empty()) {
        lines.push(format!("goals: {goals}"));
    }
    lines.push(format!("protein_target: {}g", profile.targets.protein));
    lines.push(format!("calorie_target: {}", profile.targets.calories));
    lines.push(String::new());

    lines.push("--- DAILY DATA (newest first) ---".to_string());
    let mut days: Vec<&DailySnapshot> = snapshots.iter().collect();
    days.sort_by(|a, b| b.date.cmp(&a.date));
    for day in days {
        let line = format_day_compact(day);
        if line.contains(" | ") {
            lines.push(line);
        }
    }

    lines.join("\n")
}

// ── Response parsing ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct InsightResponse {
    #[serde(default)]
    insights: Vec<RawInsight>,
}

#[derive(Debug, Deserialize)]
struct RawInsight {
    category: Option<String>,
    tier: Option<i64>,
    title: Option<String>,
    body: Option<String>,
    importance: Option<f64>,
    confidence: Option<f64>,
    actionability: Option<f64>,
    #[serde(default)]
    suggested_actions: Vec<String>,
    supporting_data: Option<serde_json::Value>,
}

/// Parse the model's reply into clamped insights. Unknown categories fall
/// back to `nudge`; missing scores are neutral.
pub fn parse_insights(text: &str, data_text: &str) -> Result<Vec<Insight>> {
    let json_str = extract_json_object(text);
    let response: InsightResponse = serde_json::from_str(json_str).map_err(|e| {
        Error::Llm(format!("Failed to parse LLM response: {e}\nResponse: {text}"))
    })?;

    let context = truncate(data_text, CONVERSATION_CONTEXT_CHARS).to_string();
    let insights = response
        .insights
        .into_iter()
        .map(|raw| {
            let category = raw
                .category
                .as_deref()
                .and_then(|c| match c.parse::<InsightCategory>() {
                    Ok(category) => Some(category),
                    Err(_) => {
                        log::debug!("Unknown insight category '{c}', using nudge");
                        None
                    }
                })
                .unwrap_or(InsightCategory::Nudge);

            let mut insight = Insight::new(
                category,
                raw.title.unwrap_or_else(|| "Insight".to_string()),
                raw.body.unwrap_or_default(),
            );
            insight.tier = raw.tier.unwrap_or(3).clamp(1, 5) as u8;
            insight.importance = raw.importance.unwrap_or(0.5);
            insight.confidence = raw.confidence.unwrap_or(0.5);
            insight.actionability = raw.actionability.unwrap_or(0.5);
            insight.suggested_actions = raw.suggested_actions;
            insight.supporting_data = match raw.supporting_data {
                Some(serde_json::Value::Object(map)) => map,
                Some(serde_json::Value::Null) | None => serde_json::Map::new(),
                Some(other) => {
                    let mut map = serde_json::Map::new();
                    map.insert("data".to_string(), other);
                    map
                }
            };
            insight.conversation_context = context.clone();
            insight.clamped()
        })
        .collect();

    Ok(insights)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((end, _)) => &s[..end],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::model::{ExerciseSummary, HealthSnapshot, NutritionSnapshot, WorkoutSnapshot};
    use chrono::NaiveDate;

    fn day(d: u32) -> DailySnapshot {
        DailySnapshot::new(NaiveDate::from_ymd_opt(2025, 1, d).unwrap())
    }

    #[test]
    fn test_format_day_compact_full() {
        let mut s = day(5);
        s.nutrition = NutritionSnapshot {
            calories: 2150,
            protein: 162,
            carbs: 210,
            fat: 70,
            entry_count: 5,
            ..Default::default()
        };
        s.health = HealthSnapshot {
            weight_lbs: Some(181.24),
            sleep_hours: Some(7.4),
            steps: 10432,
            ..Default::default()
        };
        s.workout = WorkoutSnapshot {
            workout_count: 1,
            total_duration_minutes: 62,
            total_volume_kg: 8450.4,
            exercises: vec![ExerciseSummary {
                name: "Bench Press (Barbell)".into(),
                sets: 4,
                total_reps: 32,
                max_weight_kg: 80.0,
            }],
            workout_titles: vec!["Push".into()],
        };

        assert_eq!(
            format_day_compact(&s),
            "2025-01-05 | N:2150|162|210|70|5 | H:w181.2,sl7.4,st10432 | W:1x|62m|8450kg Bench Press (4×32@80)"
        );
    }

    #[test]
    fn test_format_day_compact_empty_day() {
        assert_eq!(format_day_compact(&day(6)), "2025-01-06");
    }

    #[test]
    fn test_format_data_compact_skips_empty_days_newest_first() {
        let mut a = day(1);
        a.health.steps = 5000;
        let mut c = day(3);
        c.health.steps = 7000;
        let profile = ProfileContext {
            goals: Some("cut to 175".into()),
            ..Default::default()
        };

        let text = format_data_compact(&[a, day(2), c], &profile);
        assert!(text.contains("goals: cut to 175"));
        assert!(text.contains("protein_target: 160g"));
        assert!(!text.contains("2025-01-02"));
        let first = text.find("2025-01-03").unwrap();
        let second = text.find("2025-01-01").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_prompt_lists_recent_titles() {
        let prompt = build_prompt("DATA", &["Sleep drives squat volume".to_string()]);
        assert!(prompt.contains("- Sleep drives squat volume"));
        assert!(prompt.ends_with("DATA"));
        assert!(!build_prompt("DATA", &[]).contains("already delivered"));
    }

    #[test]
    fn test_parse_insights_fenced() {
        let text = r#"```json
{"insights": [
  {"category": "correlation", "tier": 1, "title": "Sleep and squats",
   "body": "Better sleep, heavier squats.", "importance": 0.9, "confidence": 0.8,
   "actionability": 0.7, "suggested_actions": ["Sleep 8h"], "supporting_data": {"r": 0.6}},
  {"category": "gossip", "tier": 9, "title": "Odd", "importance": 3.0}
]}
```"#;
        let insights = parse_insights(text, "ctx").unwrap();
        assert_eq!(insights.len(), 2);

        let first = &insights[0];
        assert_eq!(first.category, InsightCategory::Correlation);
        assert_eq!(first.tier, 1);
        assert_eq!(first.suggested_actions, vec!["Sleep 8h"]);
        assert_eq!(first.supporting_data["r"], 0.6);
        assert_eq!(first.conversation_context, "ctx");
        assert_eq!(first.novelty, 1.0);

        let second = &insights[1];
        assert_eq!(second.category, InsightCategory::Nudge);
        assert_eq!(second.tier, 5);
        assert_eq!(second.importance, 1.0);
        assert_eq!(second.body, "");
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn test_parse_insights_with_prose() {
        let text = "Sure! {\"insights\": [{\"title\": \"Steady\", \"category\": \"trend\"}]} Done.";
        let insights = parse_insights(text, "").unwrap();
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].category, InsightCategory::Trend);
    }

    #[test]
    fn test_parse_insights_garbage_is_llm_error() {
        assert!(matches!(parse_insights("no json at all", ""), Err(Error::Llm(_))));
    }

    #[test]
    fn test_conversation_context_truncated() {
        let long = "x".repeat(5000);
        let insights = parse_insights(r#"{"insights":[{"title":"t"}]}"#, &long).unwrap();
        assert_eq!(insights[0].conversation_context.len(), CONVERSATION_CONTEXT_CHARS);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("Überzug Press", 3), "Übe");
        assert_eq!(truncate("Row", 12), "Row");
    }
}
