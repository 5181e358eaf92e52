//! Reverse proxy for non-ECS AWS calls, forwarded verbatim to LocalStack.

use std::time::Duration;

use axum::body::{Body, to_bytes};
use axum::extract::Request;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use tokio::sync::watch;

const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;
const POOL_MAX_IDLE: usize = 32;
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

pub struct LocalStackProxy {
    client: reqwest::Client,
    /// Re-bound by the LocalStack lifecycle when a deploy resolves a new
    /// endpoint.
    endpoint: watch::Receiver<Option<String>>,
    default_endpoint: String,
}

impl LocalStackProxy {
    pub fn new(endpoint: watch::Receiver<Option<String>>) -> Self {
        // No request timeout: the upstream controls its own pacing.
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(POOL_MAX_IDLE)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .build()
            .expect("proxy client");
        let default_endpoint = std::env::var("KECS_LOCALSTACK_URL")
            .unwrap_or_else(|_| "http://localhost:4566".to_string());
        Self {
            client,
            endpoint,
            default_endpoint,
        }
    }

    fn upstream(&self) -> String {
        self.endpoint
            .borrow()
            .clone()
            .unwrap_or_else(|| self.default_endpoint.clone())
    }

    /// Forward the request as-is. Upstream failures are a plain 503 with no
    /// retry.
    pub async fn forward(&self, req: Request) -> Response {
        let upstream = self.upstream();
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        let url = format!("{upstream}{path_and_query}");

        let method = req.method().clone();
        let headers = forward_headers(req.headers());
        let body = match to_bytes(req.into_body(), MAX_BODY_BYTES).await {
            Ok(body) => body,
            Err(err) => {
                return (StatusCode::BAD_REQUEST, format!("failed to read body: {err}"))
                    .into_response();
            }
        };

        let upstream_response = match self
            .client
            .request(method, url.as_str())
            .headers(headers)
            .body(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(%err, %url, "LocalStack upstream unavailable");
                return (StatusCode::SERVICE_UNAVAILABLE, "LocalStack is not available")
                    .into_response();
            }
        };

        into_response(upstream_response).await
    }

    /// Probe the upstream's own health endpoint.
    pub async fn health(&self) -> Response {
        let url = format!("{}/_localstack/health", self.upstream());
        match self.client.get(url.as_str()).send().await {
            Ok(response) => into_response(response).await,
            Err(err) => {
                tracing::debug!(%err, "LocalStack health probe failed");
                (StatusCode::SERVICE_UNAVAILABLE, "LocalStack is not available").into_response()
            }
        }
    }
}

/// Copy request headers, dropping hop-by-hop fields and preserving the
/// original host in `X-Forwarded-Host` when the caller has not set one.
fn forward_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers {
        if name == header::HOST
            || name == header::CONNECTION
            || name == header::TRANSFER_ENCODING
            || name == header::CONTENT_LENGTH
        {
            continue;
        }
        out.insert(name.clone(), value.clone());
    }
    if !out.contains_key("x-forwarded-host")
        && let Some(host) = headers.get(header::HOST)
    {
        out.insert("x-forwarded-host", host.clone());
    }
    out
}

async fn into_response(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let headers = upstream.headers().clone();
    let bytes = match upstream.bytes().await {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(%err, "failed to read upstream response");
            return (StatusCode::SERVICE_UNAVAILABLE, "LocalStack is not available")
                .into_response();
        }
    };

    let mut builder = Response::builder().status(status);
    for (name, value) in &headers {
        if name == header::CONNECTION || name == header::TRANSFER_ENCODING {
            continue;
        }
        builder = builder.header(name, value);
    }
    builder
        .body(Body::from(bytes))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwarded_host_is_preserved() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, "sqs.us-east-1.amazonaws.com".parse().unwrap());
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        let out = forward_headers(&headers);
        assert_eq!(
            out.get("x-forwarded-host").unwrap(),
            "sqs.us-east-1.amazonaws.com"
        );
        assert!(out.get(header::HOST).is_none());
        assert_eq!(out.get(header::CONTENT_TYPE).unwrap(), "application/json");
    }

    #[test]
    fn test_existing_forwarded_host_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, "proxy.internal".parse().unwrap());
        headers.insert("x-forwarded-host", "original.example".parse().unwrap());
        let out = forward_headers(&headers);
        assert_eq!(out.get("x-forwarded-host").unwrap(), "original.example");
    }
}
