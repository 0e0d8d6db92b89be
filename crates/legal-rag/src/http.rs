//! HTTP plumbing shared by the remote adapters

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::ClientError;

/// Build a reqwest client whose request timeout matches the stage budget.
pub(crate) fn build_client(request_timeout: Duration) -> Result<Client, ClientError> {
    Client::builder()
        .connect_timeout(request_timeout.min(Duration::from_secs(15)))
        .timeout(request_timeout)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_nodelay(true)
        .build()
        .map_err(|e| ClientError::NotConfigured(format!("Failed to build HTTP client: {}", e)))
}

/// Check the status and parse a response body as JSON, returning a clear error
/// if the server returned HTML (e.g. a gateway error page) instead of JSON.
pub(crate) async fn read_json<T: DeserializeOwned>(
    response: Response,
    endpoint: &str,
) -> Result<T, ClientError> {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return Err(ClientError::RateLimited {
            endpoint: endpoint.to_string(),
            retry_after,
        });
    }

    let body = response
        .text()
        .await
        .map_err(|e| ClientError::from_reqwest(endpoint, e))?;

    if !status.is_success() {
        let preview: String = body.chars().take(300).collect();
        tracing::error!(endpoint = %endpoint, status = %status, error = %preview, "API returned error");
        return Err(ClientError::Status {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body: preview,
        });
    }

    parse_json_body(&body, endpoint)
}

/// Parse an already-read body; split out so parsing is testable without a server.
pub(crate) fn parse_json_body<T: DeserializeOwned>(
    body: &str,
    endpoint: &str,
) -> Result<T, ClientError> {
    // CDNs/proxies sometimes return 200 with HTML
    let trimmed = body.trim_start();
    if trimmed.starts_with('<') {
        let preview: String = trimmed.chars().take(200).collect();
        return Err(ClientError::InvalidResponse {
            endpoint: endpoint.to_string(),
            message: format!(
                "returned HTML instead of JSON, the service may be down or misconfigured: {}",
                preview
            ),
        });
    }

    serde_json::from_str::<T>(body).map_err(|e| {
        let preview: String = body.chars().take(300).collect();
        ClientError::InvalidResponse {
            endpoint: endpoint.to_string(),
            message: format!("{}. Response body: {}", e, preview),
        }
    })
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
