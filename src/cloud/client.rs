//! HTTP control plane client.
//!
//! Resources are addressed as `/v1/{kind}/{name}`. `PUT` creates or updates,
//! `DELETE` removes and `GET /v1/identity` returns the caller account.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, header};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::error::CloudError;
use crate::planner::ResourceType;

use super::types::{CallerIdentity, PutResourceBody, RemoteResource, ResourceRequest};
use super::{CloudResult, ControlPlane};

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum number of attempts for transient failures.
const MAX_RETRIES: u32 = 3;

/// Base delay between retries in milliseconds.
const RETRY_DELAY_MS: u64 = 1000;

/// Wait assumed when a rate-limited response carries no `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 1;

/// Longest `Retry-After` honoured before the next attempt.
const MAX_RETRY_AFTER_SECS: u64 = 60;

/// HTTP control plane client.
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    /// HTTP client.
    client: Client,
    /// Endpoint base URL without a trailing slash.
    base_url: String,
    /// Bearer token, if any.
    token: Option<String>,
    /// Base delay between retries.
    retry_delay: Duration,
}

/// What a request addresses, for error reporting.
struct Target<'a> {
    kind: &'a str,
    name: &'a str,
}

impl HttpControlPlane {
    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(base_url: &str, token: Option<String>) -> CloudResult<Self> {
        Self::with_timeout(base_url, token, DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a client with a custom timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_timeout(base_url: &str, token: Option<String>, timeout_secs: u64) -> CloudResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| CloudError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            retry_delay: Duration::from_millis(RETRY_DELAY_MS),
        })
    }

    /// Sets the base delay between retries.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Executes a request, retrying transient failures.
    ///
    /// Waits for the `Retry-After` of a rate-limited response, and backs off
    /// linearly otherwise.
    async fn execute<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&PutResourceBody<'_>>,
        target: &Target<'_>,
    ) -> CloudResult<Option<T>> {
        let mut last_error: Option<CloudError> = None;

        for attempt in 0..MAX_RETRIES {
            if let Some(previous) = &last_error {
                let wait = previous.retry_after().map_or(self.retry_delay * attempt, |after| {
                    after.min(Duration::from_secs(MAX_RETRY_AFTER_SECS))
                });
                debug!("Retry attempt {attempt} of {MAX_RETRIES} in {wait:?}");
                tokio::time::sleep(wait).await;
            }

            match self
                .execute_once::<T>(method.clone(), path, query, body, target)
                .await
            {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() => {
                    warn!("Transient control plane failure: {e}");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| CloudError::network("Max retries exceeded")))
    }

    /// Executes a single request. An empty success body yields `None`.
    async fn execute_once<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&PutResourceBody<'_>>,
        target: &Target<'_>,
    ) -> CloudResult<Option<T>> {
        let url = format!("{}{path}", self.base_url);
        trace!("{method} {url}");

        let mut request = self
            .client
            .request(method, &url)
            .header(header::ACCEPT, "application/json");
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CloudError::network(format!("Request failed: {e}")))?;

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            return Err(CloudError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(CloudError::AuthenticationFailed {
                message: String::from("Invalid or missing API token"),
            });
        }

        if status == StatusCode::NOT_FOUND {
            return Err(CloudError::NotFound {
                kind: target.kind.to_string(),
                name: target.name.to_string(),
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CloudError::api_error(status.as_u16(), body));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CloudError::network(format!("Failed to read response: {e}")))?;
        if bytes.is_empty() {
            return Ok(None);
        }

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| CloudError::InvalidResponse {
                message: format!("Failed to parse response: {e}"),
            })
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn caller_identity(&self) -> CloudResult<CallerIdentity> {
        let target = Target {
            kind: "identity",
            name: "caller",
        };
        self.execute::<CallerIdentity>(Method::GET, "/v1/identity", &[], None, &target)
            .await?
            .ok_or_else(|| CloudError::InvalidResponse {
                message: String::from("Empty identity response"),
            })
    }

    async fn put_resource(&self, request: &ResourceRequest) -> CloudResult<RemoteResource> {
        let path = format!("/v1/{}/{}", request.kind.kind(), request.name);
        let body = PutResourceBody {
            region: &request.region,
            spec: &request.spec,
        };
        let target = Target {
            kind: request.kind.kind(),
            name: &request.name,
        };

        debug!("Putting {} {}", request.kind, request.name);
        self.execute::<RemoteResource>(Method::PUT, &path, &[], Some(&body), &target)
            .await?
            .ok_or_else(|| CloudError::InvalidResponse {
                message: format!("Empty response for {} {}", request.kind, request.name),
            })
    }

    async fn delete_resource(&self, kind: ResourceType, region: &str, name: &str) -> CloudResult<()> {
        let path = format!("/v1/{}/{name}", kind.kind());
        let target = Target {
            kind: kind.kind(),
            name,
        };

        debug!("Deleting {kind} {name}");
        self.execute::<serde_json::Value>(Method::DELETE, &path, &[("region", region)], None, &target)
            .await
            .map(|_| ())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header as header_eq, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn plane(server: &MockServer) -> HttpControlPlane {
        HttpControlPlane::new(&server.uri(), Some(String::from("secret")))
            .expect("client should build")
            .with_retry_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_put_resource_sends_spec_and_parses_resource() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/table/svc-process-table-x"))
            .and(header_eq("authorization", "Bearer secret"))
            .and(body_json(json!({"region": "us-east-1", "spec": {"hash_key": "id"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "tbl-1",
                "arn": "arn:aws:dynamodb:us-east-1:1:table/svc-process-table-x"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let request = ResourceRequest::new(
            ResourceType::Table,
            "svc-process-table-x",
            "us-east-1",
            json!({"hash_key": "id"}),
        );
        let resource = plane(&server).put_resource(&request).await.expect("put should succeed");
        assert_eq!(resource.id, "tbl-1");
        assert!(resource.attributes.is_empty());
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/identity"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/identity"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"account": "123456789012"})))
            .mount(&server)
            .await;

        let identity = plane(&server).caller_identity().await.expect("retry should succeed");
        assert_eq!(identity.account, "123456789012");
    }

    #[tokio::test]
    async fn test_rate_limit_waits_for_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/identity"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/identity"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"account": "123456789012"})))
            .mount(&server)
            .await;

        let plane = HttpControlPlane::new(&server.uri(), None)
            .expect("client should build")
            .with_retry_delay(Duration::from_secs(20));
        let started = tokio::time::Instant::now();
        let identity = plane.caller_identity().await.expect("retry should succeed");

        assert_eq!(identity.account, "123456789012");
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(900), "waited {waited:?}");
        assert!(waited < Duration::from_secs(10), "waited {waited:?}");
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad spec"))
            .expect(1)
            .mount(&server)
            .await;

        let request = ResourceRequest::new(ResourceType::Bucket, "b", "us-east-1", json!({}));
        let err = plane(&server).put_resource(&request).await.unwrap_err();
        assert!(matches!(err, CloudError::ApiRequestFailed { status: 400, ref message } if message == "bad spec"));
    }

    #[tokio::test]
    async fn test_delete_missing_resource_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1/bucket/gone"))
            .and(query_param("region", "eu-west-1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = plane(&server)
            .delete_resource(ResourceType::Bucket, "eu-west-1", "gone")
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::NotFound { ref name, .. } if name == "gone"));
    }

    #[tokio::test]
    async fn test_delete_accepts_empty_body() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1/role/r"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        plane(&server)
            .delete_resource(ResourceType::Role, "us-east-1", "r")
            .await
            .expect("delete should succeed");
    }

    #[tokio::test]
    async fn test_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = plane(&server).caller_identity().await.unwrap_err();
        assert!(matches!(err, CloudError::AuthenticationFailed { .. }));
    }
}
