use harvest_error::SyncError;
use reqwest::Response;
use serde::de::DeserializeOwned;

pub(crate) fn send_failed(api: &'static str) -> impl Fn(reqwest::Error) -> SyncError {
    move |e| SyncError::network(format!("{api} request failed: {e}"))
}

/// Map a non-2xx response to `Auth` (401/403) or `Provider`, keeping the
/// upstream body.
pub(crate) async fn check_status(resp: Response, api: &str) -> Result<Response, SyncError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    if status.as_u16() == 401 || status.as_u16() == 403 {
        return Err(SyncError::auth(format!("{api} auth failed ({status}): {body}")));
    }
    Err(SyncError::provider(format!("{api} API error ({status}): {body}")))
}

pub(crate) async fn parse_json<T: DeserializeOwned>(resp: Response, api: &str) -> Result<T, SyncError> {
    check_status(resp, api)
        .await?
        .json()
        .await
        .map_err(|e| SyncError::provider(format!("{api} response parse failed: {e}")))
}
