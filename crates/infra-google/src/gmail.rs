use async_trait::async_trait;
use chrono::{DateTime, Utc};
use harvest_domain::{Folder, MailboxFetcher, MessagePage, MessageRef, MessageSender};
use harvest_error::SyncError;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::http::{parse_json, send_failed};

const BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

/// Messages requested per list call.
pub const PAGE_SIZE: u32 = 100;

pub struct GmailClient {
    client: Client,
    base_url: String,
}

impl GmailClient {
    pub fn new(client: Client) -> Self {
        Self::with_base_url(client, BASE_URL)
    }

    pub fn with_base_url(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        access_token: &str,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<T, SyncError> {
        let url = format!("{}/{path}", self.base_url);
        debug!(url, "gmail GET");
        let resp = self
            .client
            .get(&url)
            .bearer_auth(access_token)
            .query(params)
            .send()
            .await
            .map_err(send_failed("gmail"))?;
        parse_json(resp, "gmail").await
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    messages: Vec<RawRef>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRef {
    id: String,
    #[serde(default)]
    thread_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageMetadata {
    id: String,
    #[serde(default)]
    internal_date: String,
    #[serde(default)]
    payload: Payload,
}

#[derive(Deserialize, Default)]
struct Payload {
    #[serde(default)]
    headers: Vec<Header>,
}

#[derive(Deserialize)]
struct Header {
    name: String,
    value: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LabelDetail {
    #[serde(default)]
    messages_total: u64,
}

#[derive(Deserialize)]
struct LabelList {
    #[serde(default)]
    labels: Vec<RawLabel>,
}

#[derive(Deserialize)]
struct RawLabel {
    id: String,
    name: String,
    #[serde(rename = "type", default)]
    kind: String,
}

/// `in:<label>` plus an `after:Y/M/D` day bound when a watermark is set.
pub fn search_query(folder_id: &str, after: Option<i64>) -> String {
    let mut query = format!("in:{folder_id}");
    if let Some(day) = after.and_then(DateTime::<Utc>::from_timestamp_millis) {
        query.push_str(&format!(" after:{}", day.format("%Y/%-m/%-d")));
    }
    query
}

fn decode_mime_str(raw: &str) -> String {
    if !raw.contains("=?") {
        return raw.to_string();
    }
    let fake = format!("X: {raw}");
    match mailparse::parse_header(fake.as_bytes()) {
        Ok((hdr, _)) => hdr.get_value(),
        Err(_) => raw.to_string(),
    }
}

fn into_sender(meta: MessageMetadata) -> Result<MessageSender, SyncError> {
    let timestamp_millis = meta.internal_date.parse::<i64>().map_err(|_| {
        SyncError::provider(format!(
            "gmail API error: message {} has internalDate {:?}",
            meta.id, meta.internal_date
        ))
    })?;
    let from = meta
        .payload
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("from"))
        .map(|h| decode_mime_str(&h.value))
        .unwrap_or_default();
    Ok(MessageSender {
        id: meta.id,
        timestamp_millis,
        from_header: from,
    })
}

#[async_trait]
impl MailboxFetcher for GmailClient {
    async fn list_messages(
        &self,
        access_token: &str,
        folder_id: &str,
        after: Option<i64>,
        page_token: Option<&str>,
    ) -> Result<MessagePage, SyncError> {
        let query = search_query(folder_id, after);
        let max = PAGE_SIZE.to_string();
        let mut params = vec![("q", query.as_str()), ("maxResults", max.as_str())];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }

        let resp: ListResponse = self.get(access_token, "messages", &params).await?;
        debug!(
            query,
            count = resp.messages.len(),
            more = resp.next_page_token.is_some(),
            "listed messages"
        );
        Ok(MessagePage {
            messages: resp
                .messages
                .into_iter()
                .map(|m| MessageRef {
                    id: m.id,
                    thread_id: m.thread_id,
                })
                .collect(),
            next_page_token: resp.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    async fn get_message_sender(
        &self,
        access_token: &str,
        message_id: &str,
    ) -> Result<MessageSender, SyncError> {
        let meta: MessageMetadata = self
            .get(
                access_token,
                &format!("messages/{message_id}"),
                &[("format", "metadata"), ("metadataHeaders", "From")],
            )
            .await?;
        into_sender(meta)
    }

    async fn folder_total(&self, access_token: &str, folder_id: &str) -> Result<u64, SyncError> {
        let label: LabelDetail = self
            .get(access_token, &format!("labels/{folder_id}"), &[])
            .await?;
        Ok(label.messages_total)
    }

    async fn list_folders(&self, access_token: &str) -> Result<Vec<Folder>, SyncError> {
        let list: LabelList = self.get(access_token, "labels", &[]).await?;
        Ok(list
            .labels
            .into_iter()
            .map(|l| Folder {
                id: l.id,
                name: l.name,
                kind: l.kind,
            })
            .collect())
    }
}
