use std::future::Future;
use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::warn;

use super::DeliveryError;

/// Failure for a non-2xx status: 429 and 5xx may be retried, anything else is
/// final.
pub(crate) fn classify_status(status: StatusCode, body: &str) -> DeliveryError {
    let msg = if body.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("HTTP {}: {}", status.as_u16(), truncate(body, 200))
    };
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        DeliveryError::Transient(msg)
    } else {
        DeliveryError::Permanent(msg)
    }
}

pub(crate) fn classify_request_error(err: reqwest::Error) -> DeliveryError {
    if err.is_builder() {
        DeliveryError::Permanent(err.to_string())
    } else {
        DeliveryError::Transient(err.to_string())
    }
}

/// Sends and classifies; the response is only returned on 2xx.
pub(crate) async fn send(request: RequestBuilder) -> Result<Response, DeliveryError> {
    let response = request.send().await.map_err(classify_request_error)?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, &body))
}

pub(crate) async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, DeliveryError> {
    response
        .json::<T>()
        .await
        .map_err(|e| DeliveryError::Permanent(format!("undecodable gateway response: {e}")))
}

/// Runs `attempt` up to `1 + retries` times, backing off `delay * 2^n`
/// between transient failures.
pub(crate) async fn with_retries<T, F, Fut>(
    label: &str,
    retries: u32,
    delay: Duration,
    mut attempt: F,
) -> Result<T, DeliveryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DeliveryError>>,
{
    let mut tried = 0;
    loop {
        match attempt().await {
            Err(e) if e.is_retryable() && tried < retries => {
                let backoff = delay.saturating_mul(2u32.saturating_pow(tried));
                tried += 1;
                warn!(driver = label, attempt = tried, error = %e, "Transient send failure, retrying in driver");
                tokio::time::sleep(backoff).await;
            }
            other => return other,
        }
    }
}

fn truncate(body: &str, max: usize) -> String {
    body.chars().take(max).collect()
}
