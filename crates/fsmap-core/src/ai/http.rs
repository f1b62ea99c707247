//! JSON-over-HTTP plumbing shared by the network backends

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::normalize::truncate_text;

use super::REQUEST_TIMEOUT;

/// Longest slice of an error body kept in the error message
const ERROR_BODY_LIMIT: usize = 300;

pub(crate) fn client() -> Client {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_default()
}

/// Send `body` and decode the JSON reply.
///
/// Non-2xx statuses become [`Error::TransientExternal`] so the caller's
/// retry loop treats them like connection failures.
pub(crate) async fn send_json<B, T>(request: RequestBuilder, body: &B, what: &str) -> Result<T>
where
    B: Serialize + ?Sized,
    T: DeserializeOwned,
{
    let response = request.json(body).send().await?;
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(Error::TransientExternal(format!(
            "{} returned {}: {}",
            what,
            status,
            truncate_text(text.trim(), ERROR_BODY_LIMIT)
        )));
    }
    Ok(response.json().await?)
}

/// Whether a GET to a listing endpoint succeeds
pub(crate) async fn probe(request: RequestBuilder) -> bool {
    request
        .send()
        .await
        .map(|r| r.status().is_success())
        .unwrap_or(false)
}
