//! Outbound HTTP transport policy.
//!
//! One shared [`TransportClient`] carries the retry discipline for every
//! provider API, token endpoint, and object-store call: exponential backoff
//! with jitter on transient failures (5xx, 429, connect errors, timeouts),
//! `Retry-After` honored when present, a per-attempt timeout distinct from
//! the total budget, and cancellation checked at every suspension point.
//!
//! Retries apply only to calls that are idempotent from the client's
//! perspective: GETs, and the token-endpoint POST. Object-store writes go
//! through the unretried path.

use std::time::Duration;

use rand::Rng;
use reqwest::header::{HeaderMap, AUTHORIZATION, LOCATION, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cancel::CancelSignal;
use crate::error::{AppError, Result};

/// Retry and timeout knobs, shared by all outbound traffic.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Budget for a single attempt.
    pub attempt_timeout: Duration,
    /// Budget for the whole call including retries and backoff sleeps.
    pub total_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            attempt_timeout: Duration::from_secs(10),
            total_timeout: Duration::from_secs(20),
        }
    }
}

/// A completed (non-retryable) HTTP exchange with a leniently-parsed body.
#[derive(Debug)]
pub struct JsonResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl JsonResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// HTTP client wrapper enforcing the transport policy.
#[derive(Debug, Clone)]
pub struct TransportClient {
    client: Client,
    policy: RetryPolicy,
}

impl TransportClient {
    pub fn new(policy: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(policy.attempt_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| AppError::ProviderTransient(format!("building http client: {e}")))?;
        Ok(Self { client, policy })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(RetryPolicy::default())
    }

    /// GET with retry. `auth` is a complete Authorization header value.
    pub async fn get_json(
        &self,
        url: &str,
        auth: Option<&str>,
        cancel: &CancelSignal,
    ) -> Result<JsonResponse> {
        let request = self.request(reqwest::Method::GET, url, auth);
        self.execute_with_retry(request, url, cancel).await
    }

    /// Form-encoded POST with retry; used only for token endpoints, which
    /// are idempotent from the client's perspective.
    pub async fn post_form_with_retry(
        &self,
        url: &str,
        form: &[(&str, &str)],
        auth: Option<&str>,
        cancel: &CancelSignal,
    ) -> Result<JsonResponse> {
        let form: Vec<(String, String)> =
            form.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        let request = self.request(reqwest::Method::POST, url, auth).form(&form);
        self.execute_with_retry(request, url, cancel).await
    }

    /// JSON POST without retry; for non-idempotent writes.
    pub async fn post_json(
        &self,
        url: &str,
        body: &Value,
        auth: Option<&str>,
        cancel: &CancelSignal,
    ) -> Result<JsonResponse> {
        let request = self.request(reqwest::Method::POST, url, auth).json(body);
        let response = self.send_once(request, url, cancel).await?;
        Self::read_json(response, url).await
    }

    /// Single GET that does not follow redirects; returns the Location
    /// header on a 3xx response. Used to resolve short links. Fails soft.
    pub async fn redirect_location(&self, url: &str, cancel: &CancelSignal) -> Option<String> {
        let request = self.request(reqwest::Method::GET, url, None);
        match self.send_once(request, url, cancel).await {
            Ok(response) if response.status().is_redirection() => response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            Ok(response) => {
                debug!(url, status = %response.status(), "short link did not redirect");
                None
            }
            Err(e) => {
                warn!(url, error = %e, "short link resolution failed");
                None
            }
        }
    }

    fn request(&self, method: reqwest::Method, url: &str, auth: Option<&str>) -> RequestBuilder {
        let mut builder = self.client.request(method, url);
        if let Some(value) = auth {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder
    }

    async fn send_once(
        &self,
        request: RequestBuilder,
        url: &str,
        cancel: &CancelSignal,
    ) -> Result<Response> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AppError::Cancelled),
            result = request.send() => {
                result.map_err(|e| AppError::ProviderTransient(format!("{url}: {e}")))
            }
        }
    }

    async fn execute_with_retry(
        &self,
        request: RequestBuilder,
        url: &str,
        cancel: &CancelSignal,
    ) -> Result<JsonResponse> {
        let attempt_loop = async {
            let mut delay = self.policy.initial_delay;
            let mut last_error = String::new();

            for attempt in 1..=self.policy.max_attempts {
                let Some(request) = request.try_clone() else {
                    return Err(AppError::ProviderTransient(format!("{url}: unclonable request")));
                };
                match self.send_once(request, url, cancel).await {
                    Ok(response) => {
                        let status = response.status();
                        if !Self::is_retryable_status(status) {
                            return Self::read_json(response, url).await;
                        }
                        let retry_after = Self::retry_after(response.headers());
                        last_error = format!("HTTP {status}");
                        warn!(url, %status, attempt, "transient provider response");
                        if attempt < self.policy.max_attempts {
                            let wait = retry_after.unwrap_or_else(|| self.with_jitter(delay));
                            tokio::time::sleep(wait.min(self.policy.max_delay)).await;
                        }
                    }
                    Err(AppError::Cancelled) => return Err(AppError::Cancelled),
                    Err(e) => {
                        last_error = e.to_string();
                        warn!(url, attempt, error = %last_error, "transient transport failure");
                        if attempt < self.policy.max_attempts {
                            tokio::time::sleep(self.with_jitter(delay)).await;
                        }
                    }
                }
                delay = Duration::from_millis(
                    ((delay.as_millis() as f64) * self.policy.backoff_multiplier) as u64,
                )
                .min(self.policy.max_delay);
            }
            Err(AppError::ProviderTransient(format!(
                "{url}: exhausted {} attempts: {last_error}",
                self.policy.max_attempts
            )))
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AppError::Cancelled),
            result = tokio::time::timeout(self.policy.total_timeout, attempt_loop) => {
                result.unwrap_or_else(|_| {
                    Err(AppError::ProviderTransient(format!(
                        "{url}: total timeout of {:?} exceeded",
                        self.policy.total_timeout
                    )))
                })
            }
        }
    }

    fn is_retryable_status(status: StatusCode) -> bool {
        status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
    }

    fn retry_after(headers: &HeaderMap) -> Option<Duration> {
        headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    fn with_jitter(&self, delay: Duration) -> Duration {
        let jitter_cap = (delay.as_millis() / 2).max(1) as u64;
        let jitter = rand::thread_rng().gen_range(0..jitter_cap);
        delay + Duration::from_millis(jitter)
    }

    async fn read_json(response: Response, url: &str) -> Result<JsonResponse> {
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AppError::ProviderTransient(format!("{url}: reading body: {e}")))?;
        if status.is_success() {
            let body: Value = serde_json::from_str(&text).map_err(|e| {
                AppError::ProviderMalformed(format!(
                    "{url}: {e}; payload starts: {:.120}",
                    text.replace('\n', " ")
                ))
            })?;
            Ok(JsonResponse { status, body })
        } else {
            // Error bodies are informational only; tolerate non-JSON.
            let body = serde_json::from_str(&text).unwrap_or(Value::Null);
            Ok(JsonResponse { status, body })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            backoff_multiplier: 2.0,
            attempt_timeout: Duration::from_secs(2),
            total_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn retries_server_errors_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let client = TransportClient::new(fast_policy()).unwrap();
        let response = client
            .get_json(&format!("{}/flaky", server.uri()), None, &CancelSignal::none())
            .await
            .unwrap();
        assert!(response.is_success());
        assert_eq!(response.body["ok"], true);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let client = TransportClient::new(fast_policy()).unwrap();
        let result = client
            .get_json(&format!("{}/down", server.uri()), None, &CancelSignal::none())
            .await;
        assert!(matches!(result, Err(AppError::ProviderTransient(_))));
    }

    #[tokio::test]
    async fn client_errors_are_returned_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({"error": "nope"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = TransportClient::new(fast_policy()).unwrap();
        let response = client
            .get_json(&format!("{}/missing", server.uri()), None, &CancelSignal::none())
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(response.body["error"], "nope");
    }

    #[tokio::test]
    async fn honors_retry_after_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/limited"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/limited"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let client = TransportClient::new(fast_policy()).unwrap();
        let response = client
            .get_json(&format!("{}/limited", server.uri()), None, &CancelSignal::none())
            .await
            .unwrap();
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn malformed_success_body_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/garbled"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
            .mount(&server)
            .await;

        let client = TransportClient::new(fast_policy()).unwrap();
        let result = client
            .get_json(&format!("{}/garbled", server.uri()), None, &CancelSignal::none())
            .await;
        assert!(matches!(result, Err(AppError::ProviderMalformed(_))));
    }

    #[tokio::test]
    async fn redirect_location_reads_location_without_following() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/short"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", "https://open.spotify.com/track/abc123"),
            )
            .mount(&server)
            .await;

        let client = TransportClient::new(fast_policy()).unwrap();
        let location = client
            .redirect_location(&format!("{}/short", server.uri()), &CancelSignal::none())
            .await;
        assert_eq!(location.as_deref(), Some("https://open.spotify.com/track/abc123"));
    }

    #[tokio::test]
    async fn cancellation_aborts_inflight_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let (handle, signal) = crate::cancel::cancel_pair();
        let client = TransportClient::new(fast_policy()).unwrap();
        let url = format!("{}/slow", server.uri());
        let call = tokio::spawn(async move { client.get_json(&url, None, &signal).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();
        let result = call.await.unwrap();
        assert!(matches!(result, Err(AppError::Cancelled)));
    }
}
