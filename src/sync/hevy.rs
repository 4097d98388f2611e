use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use url::Url;

use super::rate_limit::{send_with_retry, RetryPolicy};
use super::{Workout, WorkoutExercise, WorkoutSet, WorkoutSource};
use crate::error::{Error, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.hevyapp.com/v1/";
const PAGE_SIZE: u32 = 20;
const MAX_PAGES: u32 = 10;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the Hevy workout API.
///
/// Without an API key every fetch returns an empty history, so a deployment
/// that never configured Hevy still runs the sync task cleanly.
#[derive(Debug, Clone)]
pub struct HevyClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
    max_pages: u32,
    retry: RetryPolicy,
}

impl HevyClient {
    pub fn new(api_key: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: Url::parse(DEFAULT_BASE_URL)?,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            max_pages: MAX_PAGES,
            retry: RetryPolicy::default(),
        })
    }

    /// Key from `HEVY_API_KEY`; base URL from `HEVY_API_URL` when set.
    pub fn from_env() -> Result<Self> {
        let client = Self::new(std::env::var("HEVY_API_KEY").ok())?;
        match std::env::var("HEVY_API_URL") {
            Ok(url) if !url.trim().is_empty() => client.with_base_url(&url),
            _ => Ok(client),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Result<Self> {
        let mut base = base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        self.base_url = Url::parse(&base)?;
        Ok(self)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    async fn fetch_page(&self, api_key: &str, page: u32) -> Result<WorkoutPage> {
        let url = self.base_url.join("workouts")?;
        let page_param = page.to_string();
        let page_size = PAGE_SIZE.to_string();

        let response = send_with_retry(&self.retry, || {
            self.http
                .get(url.clone())
                .header("api-key", api_key)
                .header("Accept", "application/json")
                .query(&[("page", page_param.as_str()), ("pageSize", page_size.as_str())])
        })
        .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Http(format!(
                "Hevy GET workouts page {page} failed with {status}: {body}"
            )));
        }
        Ok(response.json::<WorkoutPage>().await?)
    }
}

#[async_trait]
impl WorkoutSource for HevyClient {
    async fn fetch_all(&self) -> Result<Vec<Workout>> {
        let Some(api_key) = self.api_key.as_deref() else {
            log::debug!("HEVY_API_KEY not set, skipping workout fetch");
            return Ok(Vec::new());
        };

        let mut workouts = Vec::new();
        for page in 1..=self.max_pages {
            let body = self.fetch_page(api_key, page).await?;
            if body.workouts.is_empty() {
                break;
            }
            log::debug!("Hevy page {page}: {} workouts", body.workouts.len());
            workouts.extend(body.workouts.into_iter().filter_map(ApiWorkout::into_workout));

            if page >= body.page_count.unwrap_or(1) {
                break;
            }
        }

        log::info!("Fetched {} workouts from Hevy", workouts.len());
        Ok(workouts)
    }
}

// ── Wire format ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WorkoutPage {
    page_count: Option<u32>,
    #[serde(default)]
    workouts: Vec<ApiWorkout>,
}

#[derive(Debug, Deserialize)]
struct ApiWorkout {
    #[serde(default)]
    id: String,
    title: Option<String>,
    description: Option<String>,
    start_time: Option<String>,
    end_time: Option<String>,
    #[serde(default)]
    exercises: Vec<ApiExercise>,
}

#[derive(Debug, Deserialize)]
struct ApiExercise {
    title: Option<String>,
    notes: Option<String>,
    #[serde(default)]
    sets: Vec<ApiSet>,
}

#[derive(Debug, Deserialize)]
struct ApiSet {
    weight_kg: Option<f64>,
    reps: Option<u32>,
}

fn parse_time(s: Option<&str>) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s?).ok().map(|t| t.with_timezone(&Utc))
}

impl ApiWorkout {
    /// A workout without a parseable start time cannot be placed on a day
    /// and is dropped.
    fn into_workout(self) -> Option<Workout> {
        let Some(start_time) = parse_time(self.start_time.as_deref()) else {
            log::warn!("Skipping Hevy workout {} with no valid start_time", self.id);
            return None;
        };
        let duration_minutes = parse_time(self.end_time.as_deref())
            .map(|end| (end - start_time).num_minutes().max(0) as u32)
            .unwrap_or(0);

        let mut total_volume_kg = 0.0;
        let exercises: Vec<WorkoutExercise> = self
            .exercises
            .into_iter()
            .map(|ex| {
                let sets: Vec<WorkoutSet> = ex
                    .sets
                    .into_iter()
                    .map(|s| WorkoutSet {
                        reps: s.reps.unwrap_or(0),
                        weight_kg: s.weight_kg.unwrap_or(0.0),
                    })
                    .collect();
                total_volume_kg += sets
                    .iter()
                    .map(|s| s.weight_kg * f64::from(s.reps))
                    .sum::<f64>();
                WorkoutExercise {
                    name: ex.title.unwrap_or_else(|| "Unknown".to_string()),
                    sets,
                    notes: ex.notes.unwrap_or_default().trim().to_string(),
                }
            })
            .collect();

        Some(Workout {
            id: self.id,
            title: self.title.unwrap_or_else(|| "Workout".to_string()),
            start_time,
            duration_minutes,
            exercises,
            total_volume_kg,
            notes: self.description.unwrap_or_default().trim().to_string(),
        })
    }
}
