use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};

use crate::error::Result;

const BACKOFF_SECONDS: &[u64] = &[60, 120, 240];

/// Bounded backoff for HTTP 429 responses.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    backoff: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: BACKOFF_SECONDS.iter().map(|&s| Duration::from_secs(s)).collect(),
        }
    }
}

impl RetryPolicy {
    /// Explicit waits, one per retry.
    pub fn with_backoff(backoff: Vec<Duration>) -> Self {
        Self { backoff }
    }

    /// Never retry.
    pub fn none() -> Self {
        Self { backoff: Vec::new() }
    }

    pub fn max_retries(&self) -> u32 {
        self.backoff.len() as u32
    }

    /// Wait before retry number `attempt` (0-based), or `None` once retries
    /// are exhausted.
    pub fn backoff_for(&self, attempt: u32) -> Option<Duration> {
        self.backoff.get(attempt as usize).copied()
    }
}

pub fn is_rate_limited(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
}

/// Send a request, retrying on 429 according to `policy`.
///
/// `build` is called once per attempt because a `RequestBuilder` is
/// consumed by `send`. Non-429 responses, including other errors, are
/// returned as-is for the caller to inspect. A 429 that outlasts the policy
/// is returned too.
pub async fn send_with_retry<F>(policy: &RetryPolicy, build: F) -> Result<Response>
where
    F: Fn() -> RequestBuilder,
{
    let mut attempt: u32 = 0;
    loop {
        let response = build().send().await?;
        if !is_rate_limited(response.status()) {
            return Ok(response);
        }
        match policy.backoff_for(attempt) {
            Some(wait) => {
                log::warn!(
                    "Rate limited (429). Waiting {}s before retry {}/{}",
                    wait.as_secs_f64(),
                    attempt + 1,
                    policy.max_retries()
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            None => return Ok(response),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries(), 3);
        assert_eq!(policy.backoff_for(0), Some(Duration::from_secs(60)));
        assert_eq!(policy.backoff_for(2), Some(Duration::from_secs(240)));
        assert_eq!(policy.backoff_for(3), None);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/thing"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/thing"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/thing", server.uri());
        let policy = RetryPolicy::with_backoff(vec![Duration::from_millis(1); 3]);
        let response = send_with_retry(&policy, || client.get(&url)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_gives_up_after_policy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .expect(2)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/thing", server.uri());
        let policy = RetryPolicy::with_backoff(vec![Duration::from_millis(1)]);
        let response = send_with_retry(&policy, || client.get(&url)).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
