//! nsqlookupd HTTP discovery.

use fleet_core::Endpoint;
use serde::Deserialize;

use super::error::MessagingError;

#[derive(Debug, Deserialize)]
struct Producer {
    broadcast_address: String,
    tcp_port: u16,
}

#[derive(Debug, Deserialize)]
struct LookupData {
    #[serde(default)]
    producers: Vec<Producer>,
}

/// Older nsqlookupd versions wrap the payload in `{status_code, data}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LookupResponse {
    Enveloped { data: LookupData },
    Flat(LookupData),
}

/// Extracts producer TCP endpoints from a `/lookup` response body.
///
/// # Errors
///
/// Returns `MessagingError::Discovery` if the body is not a lookup response.
pub fn parse_lookup_response(
    discovery: &Endpoint,
    body: &str,
) -> Result<Vec<Endpoint>, MessagingError> {
    let parsed: LookupResponse =
        serde_json::from_str(body).map_err(|e| MessagingError::Discovery {
            endpoint: discovery.address(),
            reason: format!("unexpected lookup response: {e}"),
        })?;
    let data = match parsed {
        LookupResponse::Enveloped { data } | LookupResponse::Flat(data) => data,
    };
    Ok(data
        .producers
        .into_iter()
        .map(|p| Endpoint::new(p.broadcast_address, p.tcp_port.to_string()))
        .collect())
}

/// Asks nsqlookupd which nsqd instances carry `topic`.
///
/// An unknown topic (HTTP 404) yields an empty list rather than an error.
///
/// # Errors
///
/// Returns `MessagingError::Discovery` on transport failures or unexpected
/// status codes.
pub async fn lookup_producers(
    client: &reqwest::Client,
    discovery: &Endpoint,
    topic: &str,
) -> Result<Vec<Endpoint>, MessagingError> {
    let url = format!("http://{}/lookup", discovery.address());
    let discovery_err = |reason: String| MessagingError::Discovery {
        endpoint: discovery.address(),
        reason,
    };

    let response = client
        .get(&url)
        .query(&[("topic", topic)])
        .send()
        .await
        .map_err(|e| discovery_err(e.to_string()))?;

    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Ok(Vec::new());
    }
    if !response.status().is_success() {
        return Err(discovery_err(format!("status {}", response.status())));
    }

    let body = response
        .text()
        .await
        .map_err(|e| discovery_err(e.to_string()))?;
    parse_lookup_response(discovery, &body)
}
