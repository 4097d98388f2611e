use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::metrics::Targets;
use crate::storage::file::JsonFile;

pub const SETTINGS_FILE: &str = "settings.json";

pub const MAX_LOOKBACK_DAYS: u32 = 3650;
/// One week.
pub const MAX_TICK_MINUTES: u64 = 7 * 24 * 60;
pub const MAX_STARTUP_DELAY_SECS: u64 = 3600;
pub const MAX_CACHE_TTL_SECS: u64 = 24 * 3600;

/// Keys accepted by [`Settings::get`] and [`Settings::set`], in listing order.
pub const SETTING_KEYS: &[&str] = &[
    "llm_provider",
    "llm_model",
    "protein_target",
    "calorie_target",
    "goals",
    "lookback_days",
    "tick_minutes",
    "startup_delay_secs",
    "cache_ttl_secs",
];

/// User-editable settings, stored as `settings.json` in the data directory.
/// Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// `bedrock` or `anthropic`.
    pub llm_provider: String,
    pub llm_model: String,
    pub protein_target: u32,
    pub calorie_target: u32,
    pub goals: Option<String>,
    /// Days of history fed to insight generation.
    pub lookback_days: u32,
    /// How often the scheduler wakes to check for due tasks.
    pub tick_minutes: u64,
    pub startup_delay_secs: u64,
    pub cache_ttl_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            llm_provider: "bedrock".to_string(),
            llm_model: "claude-sonnet-4-5".to_string(),
            protein_target: 160,
            calorie_target: 2200,
            goals: None,
            lookback_days: 90,
            tick_minutes: 15,
            startup_delay_secs: 5,
            cache_ttl_secs: 5,
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::InvalidInput(format!("{key} must be a non-negative integer, got '{value}'")))
}

fn parse_positive<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr + PartialEq + Default,
{
    let n: T = parse_number(key, value)?;
    if n == T::default() {
        return Err(Error::InvalidInput(format!("{key} must be greater than zero")));
    }
    Ok(n)
}

fn parse_at_most<T>(key: &str, value: &str, min: T, max: T) -> Result<T>
where
    T: std::str::FromStr + PartialOrd + std::fmt::Display,
{
    let n: T = parse_number(key, value)?;
    if n < min || n > max {
        return Err(Error::InvalidInput(format!(
            "{key} must be between {min} and {max}, got {n}"
        )));
    }
    Ok(n)
}

impl Settings {
    fn file(data_dir: &Path) -> JsonFile<Settings> {
        JsonFile::new(data_dir.join(SETTINGS_FILE))
    }

    pub fn load(data_dir: &Path) -> Self {
        Self::file(data_dir).load()
    }

    pub fn save(&self, data_dir: &Path) -> Result<()> {
        Self::file(data_dir).save(self)
    }

    /// Current value of `key`, or `None` for an unset optional setting.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let value = match key {
            "llm_provider" => self.llm_provider.clone(),
            "llm_model" => self.llm_model.clone(),
            "protein_target" => self.protein_target.to_string(),
            "calorie_target" => self.calorie_target.to_string(),
            "goals" => return Ok(self.goals.clone()),
            "lookback_days" => self.lookback_days.to_string(),
            "tick_minutes" => self.tick_minutes.to_string(),
            "startup_delay_secs" => self.startup_delay_secs.to_string(),
            "cache_ttl_secs" => self.cache_ttl_secs.to_string(),
            other => return Err(Error::Config(format!("unknown setting: {other}"))),
        };
        Ok(Some(value))
    }

    /// Parse and assign `value` to `key`. An empty `goals` clears it.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "llm_provider" => {
                let provider = value.trim().to_lowercase();
                if provider != "bedrock" && provider != "anthropic" {
                    return Err(Error::InvalidInput(format!(
                        "llm_provider must be bedrock or anthropic, got '{value}'"
                    )));
                }
                self.llm_provider = provider;
            }
            "llm_model" => {
                if value.trim().is_empty() {
                    return Err(Error::InvalidInput("llm_model cannot be empty".into()));
                }
                self.llm_model = value.trim().to_string();
            }
            "protein_target" => self.protein_target = parse_positive(key, value)?,
            "calorie_target" => self.calorie_target = parse_positive(key, value)?,
            "goals" => {
                let goals = value.trim();
                self.goals = (!goals.is_empty()).then(|| goals.to_string());
            }
            "lookback_days" => {
                self.lookback_days = parse_at_most(key, value, 1, MAX_LOOKBACK_DAYS)?
            }
            "tick_minutes" => self.tick_minutes = parse_at_most(key, value, 1, MAX_TICK_MINUTES)?,
            "startup_delay_secs" => {
                self.startup_delay_secs = parse_at_most(key, value, 0, MAX_STARTUP_DELAY_SECS)?
            }
            "cache_ttl_secs" => {
                self.cache_ttl_secs = parse_at_most(key, value, 0, MAX_CACHE_TTL_SECS)?
            }
            other => return Err(Error::Config(format!("unknown setting: {other}"))),
        }
        Ok(())
    }

    /// Every setting with its current value; unset optionals show as empty.
    pub fn list(&self) -> Vec<(&'static str, String)> {
        SETTING_KEYS
            .iter()
            .map(|&key| (key, self.get(key).ok().flatten().unwrap_or_default()))
            .collect()
    }

    pub fn targets(&self) -> Targets {
        Targets {
            protein: self.protein_target,
            calories: self.calorie_target,
        }
    }

    // Accessors clamp to the ranges `set` enforces; settings.json may be
    // edited by hand.

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs.min(MAX_CACHE_TTL_SECS))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_minutes.clamp(1, MAX_TICK_MINUTES) * 60)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs.min(MAX_STARTUP_DELAY_SECS))
    }

    pub fn lookback_days(&self) -> u32 {
        self.lookback_days.clamp(1, MAX_LOOKBACK_DAYS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(dir.path());
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.targets(), Targets::default());
        assert_eq!(settings.tick_interval(), Duration::from_secs(900));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SETTINGS_FILE), r#"{"protein_target": 180}"#).unwrap();
        let settings = Settings::load(dir.path());
        assert_eq!(settings.protein_target, 180);
        assert_eq!(settings.calorie_target, 2200);
    }

    #[test]
    fn test_set_get_roundtrip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::load(dir.path());
        settings.set("llm_provider", "Anthropic").unwrap();
        settings.set("goals", "  recomp, 1 lb/month  ").unwrap();
        settings.set("lookback_days", "30").unwrap();
        settings.save(dir.path()).unwrap();

        let reloaded = Settings::load(dir.path());
        assert_eq!(reloaded.get("llm_provider").unwrap().as_deref(), Some("anthropic"));
        assert_eq!(reloaded.get("goals").unwrap().as_deref(), Some("recomp, 1 lb/month"));
        assert_eq!(reloaded.lookback_days, 30);
    }

    #[test]
    fn test_set_validation() {
        let mut settings = Settings::default();
        assert!(matches!(settings.set("llm_provider", "openai"), Err(Error::InvalidInput(_))));
        assert!(matches!(settings.set("protein_target", "lots"), Err(Error::InvalidInput(_))));
        assert!(matches!(settings.set("tick_minutes", "0"), Err(Error::InvalidInput(_))));
        assert!(matches!(settings.set("color", "blue"), Err(Error::Config(_))));
        assert!(matches!(settings.get("color"), Err(Error::Config(_))));

        settings.set("cache_ttl_secs", "0").unwrap();
        assert_eq!(settings.cache_ttl(), Duration::ZERO);

        settings.set("goals", "cut").unwrap();
        settings.set("goals", "").unwrap();
        assert_eq!(settings.goals, None);
    }

    #[test]
    fn test_out_of_range_numbers_rejected() {
        let mut settings = Settings::default();
        for (key, value) in [
            ("tick_minutes", "18446744073709551615"),
            ("tick_minutes", "10081"),
            ("lookback_days", "4294967295"),
            ("startup_delay_secs", "3601"),
            ("cache_ttl_secs", "86401"),
        ] {
            assert!(
                matches!(settings.set(key, value), Err(Error::InvalidInput(_))),
                "{key}={value} accepted"
            );
        }
        assert_eq!(settings, Settings::default());

        settings.set("tick_minutes", "10080").unwrap();
        assert_eq!(settings.tick_interval(), Duration::from_secs(10080 * 60));
    }

    #[test]
    fn test_hand_edited_extremes_are_clamped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE),
            r#"{"tick_minutes": 18446744073709551615, "lookback_days": 4294967295,
                "startup_delay_secs": 18446744073709551615}"#,
        )
        .unwrap();
        let settings = Settings::load(dir.path());
        assert_eq!(settings.tick_minutes, u64::MAX);
        assert_eq!(settings.tick_interval(), Duration::from_secs(MAX_TICK_MINUTES * 60));
        assert_eq!(settings.lookback_days(), MAX_LOOKBACK_DAYS);
        assert_eq!(settings.startup_delay(), Duration::from_secs(MAX_STARTUP_DELAY_SECS));
    }

    #[test]
    fn test_list_covers_every_key() {
        let list = Settings::default().list();
        assert_eq!(list.len(), SETTING_KEYS.len());
        assert!(list.contains(&("goals", String::new())));
        assert!(list.contains(&("protein_target", "160".to_string())));
    }
}
