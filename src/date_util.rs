use std::sync::LazyLock;

use chrono::{Days, NaiveDate};
use regex::Regex;

use crate::error::{Error, Result};

static RE_JSON_OBJECT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\{.*\}").unwrap());

/// Today's date in the local timezone. Snapshots are keyed by the user's
/// calendar day, not UTC.
pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// Parse an ISO `YYYY-MM-DD` date.
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| Error::InvalidInput(format!("expected YYYY-MM-DD, got '{s}'")))
}

/// The inclusive window `[today - days, today]`, starting no earlier than
/// the first representable date.
pub fn window_ending(today: NaiveDate, days: u32) -> (NaiveDate, NaiveDate) {
    let start = today
        .checked_sub_days(Days::new(u64::from(days)))
        .unwrap_or(NaiveDate::MIN);
    (start, today)
}

/// Strip markdown code fences from LLM responses.
pub fn strip_code_fences(s: &str) -> &str {
    let s = s.trim();
    if let Some(rest) = s.strip_prefix("```json") {
        rest.strip_suffix("```").unwrap_or(rest).trim()
    } else if let Some(rest) = s.strip_prefix("```") {
        rest.strip_suffix("```").unwrap_or(rest).trim()
    } else {
        s
    }
}

/// Find the JSON object in an LLM response.
///
/// Models sometimes wrap the object in prose or put the fence mid-response,
/// so after fence stripping this falls back to the outermost `{...}` span.
pub fn extract_json_object(s: &str) -> &str {
    let stripped = strip_code_fences(s);
    if stripped.starts_with('{') {
        return stripped;
    }
    RE_JSON_OBJECT
        .find(stripped)
        .map(|m| m.as_str())
        .unwrap_or(stripped)
}
