use async_trait::async_trait;
use harvest_domain::{RangeUpdate, SpreadsheetWriter};
use harvest_error::SyncError;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::http::{check_status, parse_json, send_failed};

const BASE_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";

pub struct SheetsClient {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

impl SheetsClient {
    pub fn new(client: Client) -> Self {
        Self::with_base_url(client, BASE_URL)
    }

    pub fn with_base_url(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// `<base>/<sheet>/<segment>`, with `segment` percent-encoded.
    fn url(&self, sheet_id: &str, segments: &[&str]) -> Result<Url, SyncError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| SyncError::internal(format!("sheets base url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| SyncError::internal("sheets base url cannot take a path"))?
            .push(sheet_id)
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl SpreadsheetWriter for SheetsClient {
    async fn read_rows(
        &self,
        access_token: &str,
        sheet_id: &str,
        range: &str,
    ) -> Result<Vec<Vec<String>>, SyncError> {
        let url = self.url(sheet_id, &["values", range])?;
        debug!(%url, "sheets GET");
        let resp = self
            .client
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(send_failed("sheets"))?;
        if resp.status() == StatusCode::NOT_FOUND {
            debug!(sheet_id, range, "range not found, reading as empty");
            return Ok(Vec::new());
        }
        let body: ValueRange = parse_json(resp, "sheets").await?;
        Ok(body.values)
    }

    async fn update_rows(
        &self,
        access_token: &str,
        sheet_id: &str,
        updates: &[RangeUpdate],
    ) -> Result<(), SyncError> {
        let url = self.url(sheet_id, &["values:batchUpdate"])?;
        debug!(%url, count = updates.len(), "sheets batch update");
        let resp = self
            .client
            .post(url)
            .bearer_auth(access_token)
            .json(&json!({
                "valueInputOption": "USER_ENTERED",
                "data": updates,
            }))
            .send()
            .await
            .map_err(send_failed("sheets"))?;
        check_status(resp, "sheets").await?;
        Ok(())
    }

    async fn append_rows(
        &self,
        access_token: &str,
        sheet_id: &str,
        range: &str,
        rows: &[Vec<String>],
    ) -> Result<(), SyncError> {
        let mut url = self.url(sheet_id, &["values", &format!("{range}:append")])?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED")
            .append_pair("insertDataOption", "INSERT_ROWS");
        debug!(%url, count = rows.len(), "sheets append");
        let resp = self
            .client
            .post(url)
            .bearer_auth(access_token)
            .json(&json!({ "values": rows }))
            .send()
            .await
            .map_err(send_failed("sheets"))?;
        check_status(resp, "sheets").await?;
        Ok(())
    }
}
