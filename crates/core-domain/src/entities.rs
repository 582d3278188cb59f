use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(ConnectionId);
string_id!(ContactId);
string_id!(DomainId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Idle,
    Syncing,
    Error,
    Deleting,
    Resetting,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Syncing => write!(f, "syncing"),
            Self::Error => write!(f, "error"),
            Self::Deleting => write!(f, "deleting"),
            Self::Resetting => write!(f, "resetting"),
        }
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "idle" => Ok(Self::Idle),
            "syncing" => Ok(Self::Syncing),
            "error" => Ok(Self::Error),
            "deleting" => Ok(Self::Deleting),
            "resetting" => Ok(Self::Resetting),
            _ => Err(format!("unknown sync status: {s}")),
        }
    }
}

/// How often the sweep starts a new cycle for a connection.
///
/// Unknown values are kept verbatim so a record written by a newer version
/// survives a round trip; they are never due.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SyncSchedule {
    Manual,
    Every15Minutes,
    Hourly,
    Every4Hours,
    Daily,
    Other(String),
}

impl SyncSchedule {
    pub fn interval(&self) -> Option<Duration> {
        match self {
            Self::Every15Minutes => Some(Duration::from_secs(15 * 60)),
            Self::Hourly => Some(Duration::from_secs(60 * 60)),
            Self::Every4Hours => Some(Duration::from_secs(4 * 60 * 60)),
            Self::Daily => Some(Duration::from_secs(24 * 60 * 60)),
            Self::Manual | Self::Other(_) => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Manual => "manual",
            Self::Every15Minutes => "15min",
            Self::Hourly => "1hour",
            Self::Every4Hours => "4hours",
            Self::Daily => "daily",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for SyncSchedule {
    fn from(s: String) -> Self {
        match s.as_str() {
            "manual" => Self::Manual,
            "15min" => Self::Every15Minutes,
            "1hour" => Self::Hourly,
            "4hours" => Self::Every4Hours,
            "daily" => Self::Daily,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for SyncSchedule {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<SyncSchedule> for String {
    fn from(s: SyncSchedule) -> Self {
        s.as_str().to_string()
    }
}

impl fmt::Display for SyncSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthCredential {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token expiry, epoch millis.
    pub expires_at: i64,
}

impl OAuthCredential {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at < now
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub user_id: String,
    pub name: String,
    pub credential: OAuthCredential,
    pub folder_id: String,
    pub sheet_id: String,
    pub sheet_tab: String,
    pub schedule: SyncSchedule,
    pub is_active: bool,
    pub status: SyncStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_messages_to_sync: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages_processed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_page_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_started_at: Option<i64>,
}

impl Connection {
    pub fn from_new(id: ConnectionId, new: NewConnection) -> Self {
        Self {
            id,
            user_id: new.user_id,
            name: new.name,
            credential: new.credential,
            folder_id: new.folder_id,
            sheet_id: new.sheet_id,
            sheet_tab: new.sheet_tab,
            schedule: new.schedule,
            is_active: true,
            status: SyncStatus::Idle,
            last_sync_at: None,
            progress_message: None,
            last_error: None,
            total_messages_to_sync: None,
            messages_processed: None,
            sync_page_token: None,
            sync_started_at: None,
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.status == SyncStatus::Syncing
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({} -> {}!{}, {}, {})",
            self.id, self.name, self.folder_id, self.sheet_id, self.sheet_tab, self.schedule, self.status
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewConnection {
    pub user_id: String,
    pub name: String,
    pub credential: OAuthCredential,
    pub folder_id: String,
    pub sheet_id: String,
    pub sheet_tab: String,
    pub schedule: SyncSchedule,
}

/// A partial update of a [`Connection`].
///
/// Outer `None` leaves a field untouched; `Some(None)` clears an optional
/// field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionPatch {
    pub name: Option<String>,
    pub credential: Option<OAuthCredential>,
    pub folder_id: Option<String>,
    pub sheet_id: Option<String>,
    pub sheet_tab: Option<String>,
    pub schedule: Option<SyncSchedule>,
    pub is_active: Option<bool>,
    pub status: Option<SyncStatus>,
    pub last_sync_at: Option<Option<i64>>,
    pub progress_message: Option<Option<String>>,
    pub last_error: Option<Option<String>>,
    pub total_messages_to_sync: Option<Option<u64>>,
    pub messages_processed: Option<Option<u64>>,
    pub sync_page_token: Option<Option<String>>,
    pub sync_started_at: Option<Option<i64>>,
}

impl ConnectionPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: SyncStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn credential(mut self, credential: OAuthCredential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn last_sync_at(mut self, at: Option<i64>) -> Self {
        self.last_sync_at = Some(at);
        self
    }

    pub fn progress_message(mut self, msg: Option<String>) -> Self {
        self.progress_message = Some(msg);
        self
    }

    pub fn last_error(mut self, err: Option<String>) -> Self {
        self.last_error = Some(err);
        self
    }

    pub fn total_messages_to_sync(mut self, total: Option<u64>) -> Self {
        self.total_messages_to_sync = Some(total);
        self
    }

    pub fn messages_processed(mut self, processed: Option<u64>) -> Self {
        self.messages_processed = Some(processed);
        self
    }

    pub fn sync_page_token(mut self, token: Option<String>) -> Self {
        self.sync_page_token = Some(token);
        self
    }

    pub fn sync_started_at(mut self, at: Option<i64>) -> Self {
        self.sync_started_at = Some(at);
        self
    }

    pub fn apply(self, conn: &mut Connection) {
        if let Some(v) = self.name {
            conn.name = v;
        }
        if let Some(v) = self.credential {
            conn.credential = v;
        }
        if let Some(v) = self.folder_id {
            conn.folder_id = v;
        }
        if let Some(v) = self.sheet_id {
            conn.sheet_id = v;
        }
        if let Some(v) = self.sheet_tab {
            conn.sheet_tab = v;
        }
        if let Some(v) = self.schedule {
            conn.schedule = v;
        }
        if let Some(v) = self.is_active {
            conn.is_active = v;
        }
        if let Some(v) = self.status {
            conn.status = v;
        }
        if let Some(v) = self.last_sync_at {
            conn.last_sync_at = v;
        }
        if let Some(v) = self.progress_message {
            conn.progress_message = v;
        }
        if let Some(v) = self.last_error {
            conn.last_error = v;
        }
        if let Some(v) = self.total_messages_to_sync {
            conn.total_messages_to_sync = v;
        }
        if let Some(v) = self.messages_processed {
            conn.messages_processed = v;
        }
        if let Some(v) = self.sync_page_token {
            conn.sync_page_token = v;
        }
        if let Some(v) = self.sync_started_at {
            conn.sync_started_at = v;
        }
    }
}

/// User-editable connection settings. Unset fields are left as they are.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionSettings {
    pub name: Option<String>,
    pub folder_id: Option<String>,
    pub sheet_id: Option<String>,
    pub sheet_tab: Option<String>,
    pub schedule: Option<SyncSchedule>,
    pub is_active: Option<bool>,
}

impl From<ConnectionSettings> for ConnectionPatch {
    fn from(s: ConnectionSettings) -> Self {
        Self {
            name: s.name,
            folder_id: s.folder_id,
            sheet_id: s.sheet_id,
            sheet_tab: s.sheet_tab,
            schedule: s.schedule,
            is_active: s.is_active,
            ..Self::default()
        }
    }
}

/// Dedup witness: the message was fetched once for this connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncedMessage {
    pub connection_id: ConnectionId,
    pub message_id: String,
    pub synced_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub connection_id: ConnectionId,
    pub email: String,
    pub name: String,
    pub first_contact_at: i64,
    pub email_count: u64,
    pub last_exported_count: u64,
}

impl Contact {
    pub fn first_sighting(
        id: ContactId,
        connection_id: ConnectionId,
        email: String,
        name: String,
        timestamp: i64,
    ) -> Self {
        Self {
            id,
            connection_id,
            email,
            name,
            first_contact_at: timestamp,
            email_count: 1,
            last_exported_count: 0,
        }
    }

    /// Merge a later sighting: count it, prefer a fresh non-empty name, and
    /// keep the earliest timestamp.
    pub fn record_sighting(&mut self, name: &str, timestamp: i64) {
        self.email_count += 1;
        if !name.is_empty() && name != self.name {
            self.name = name.to_string();
        }
        if timestamp < self.first_contact_at {
            self.first_contact_at = timestamp;
        }
    }

    pub fn needs_export(&self) -> bool {
        self.email_count > self.last_exported_count
    }

    pub fn mark_exported(&mut self, count: u64) {
        self.last_exported_count = count.min(self.email_count).max(self.last_exported_count);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilteredDomain {
    pub id: DomainId,
    pub connection_id: ConnectionId,
    pub domain: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
    pub access_token: String,
    pub expires_in_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub id: String,
    pub thread_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePage {
    pub messages: Vec<MessageRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSender {
    pub id: String,
    pub timestamp_millis: i64,
    pub from_header: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub id: String,
    pub name: String,
    pub kind: String,
}

impl fmt::Display for Folder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.id, self.kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeUpdate {
    pub range: String,
    pub values: Vec<Vec<String>>,
}

/// Work item handed to the delayed re-invocation primitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "connection_id", rename_all = "snake_case")]
pub enum Task {
    ProcessBatch(ConnectionId),
    DeleteBatch(ConnectionId),
}

impl Task {
    pub fn connection_id(&self) -> &ConnectionId {
        match self {
            Self::ProcessBatch(id) | Self::DeleteBatch(id) => id,
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProcessBatch(id) => write!(f, "process_batch({id})"),
            Self::DeleteBatch(id) => write!(f, "delete_batch({id})"),
        }
    }
}
