use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use harvest_error::SyncError;

use crate::entities::{
    AccessGrant, Connection, ConnectionId, ConnectionPatch, Contact, ContactId, DomainId,
    FilteredDomain, Folder, MessagePage, MessageSender, NewConnection, RangeUpdate, SyncStatus,
    Task, UpsertOutcome,
};

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Exchange a refresh token for a fresh access token. Fails with
    /// [`SyncError::Auth`] when the refresh token is invalid or revoked.
    async fn refresh(&self, refresh_token: &str) -> Result<AccessGrant, SyncError>;
}

#[async_trait]
pub trait MailboxFetcher: Send + Sync {
    async fn list_messages(
        &self,
        access_token: &str,
        folder_id: &str,
        after: Option<i64>,
        page_token: Option<&str>,
    ) -> Result<MessagePage, SyncError>;

    async fn get_message_sender(
        &self,
        access_token: &str,
        message_id: &str,
    ) -> Result<MessageSender, SyncError>;

    async fn folder_total(&self, access_token: &str, folder_id: &str) -> Result<u64, SyncError>;

    async fn list_folders(&self, access_token: &str) -> Result<Vec<Folder>, SyncError>;
}

#[async_trait]
pub trait SpreadsheetWriter: Send + Sync {
    /// Rows of `range`; a missing sheet reads as empty.
    async fn read_rows(
        &self,
        access_token: &str,
        sheet_id: &str,
        range: &str,
    ) -> Result<Vec<Vec<String>>, SyncError>;

    async fn update_rows(
        &self,
        access_token: &str,
        sheet_id: &str,
        updates: &[RangeUpdate],
    ) -> Result<(), SyncError>;

    async fn append_rows(
        &self,
        access_token: &str,
        sheet_id: &str,
        range: &str,
        rows: &[Vec<String>],
    ) -> Result<(), SyncError>;
}

#[async_trait]
pub trait ConnectionStore: Send + Sync {
    async fn insert_connection(&self, new: NewConnection) -> Result<Connection, SyncError>;

    async fn get_connection(&self, id: &ConnectionId) -> Result<Option<Connection>, SyncError>;

    async fn list_connections(&self) -> Result<Vec<Connection>, SyncError>;

    async fn list_connections_by_user(&self, user_id: &str) -> Result<Vec<Connection>, SyncError>;

    /// Fails with [`SyncError::NotFound`] when the record is gone.
    async fn patch_connection(
        &self,
        id: &ConnectionId,
        patch: ConnectionPatch,
    ) -> Result<Connection, SyncError>;

    /// Apply `patch` only while the stored status equals `expected`.
    /// Returns `Ok(None)` when the status has moved on.
    async fn patch_connection_if(
        &self,
        id: &ConnectionId,
        expected: SyncStatus,
        patch: ConnectionPatch,
    ) -> Result<Option<Connection>, SyncError>;

    async fn delete_connection(&self, id: &ConnectionId) -> Result<(), SyncError>;
}

#[async_trait]
pub trait SyncedMessageStore: Send + Sync {
    /// The subset of `message_ids` that already have a witness.
    async fn synced_ids(
        &self,
        connection_id: &ConnectionId,
        message_ids: &[String],
    ) -> Result<HashSet<String>, SyncError>;

    /// Insert witnesses; ids that already have one are left untouched.
    async fn mark_synced(
        &self,
        connection_id: &ConnectionId,
        message_ids: &[String],
        synced_at: i64,
    ) -> Result<(), SyncError>;

    async fn count_synced(&self, connection_id: &ConnectionId) -> Result<u64, SyncError>;

    /// Delete at most `limit` witnesses, returning how many went.
    async fn delete_synced_page(
        &self,
        connection_id: &ConnectionId,
        limit: usize,
    ) -> Result<usize, SyncError>;
}

#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Create or merge the contact keyed by (connection, `email`).
    async fn upsert_contact(
        &self,
        connection_id: &ConnectionId,
        email: &str,
        name: &str,
        timestamp: i64,
    ) -> Result<UpsertOutcome, SyncError>;

    async fn get_contact(
        &self,
        connection_id: &ConnectionId,
        email: &str,
    ) -> Result<Option<Contact>, SyncError>;

    async fn list_contacts(&self, connection_id: &ConnectionId) -> Result<Vec<Contact>, SyncError>;

    /// Record the `email_count` each contact had when it was written out.
    async fn mark_exported(&self, exported: &[(ContactId, u64)]) -> Result<(), SyncError>;

    async fn delete_contacts_page(
        &self,
        connection_id: &ConnectionId,
        limit: usize,
    ) -> Result<usize, SyncError>;
}

#[async_trait]
pub trait DomainFilterStore: Send + Sync {
    async fn list_domains(&self, connection_id: &ConnectionId)
        -> Result<Vec<FilteredDomain>, SyncError>;

    /// Insert `domain` (already normalized) unless present; returns the
    /// stored record either way.
    async fn add_domain(
        &self,
        connection_id: &ConnectionId,
        domain: &str,
    ) -> Result<FilteredDomain, SyncError>;

    async fn remove_domain(&self, id: &DomainId) -> Result<(), SyncError>;

    async fn delete_domains_page(
        &self,
        connection_id: &ConnectionId,
        limit: usize,
    ) -> Result<usize, SyncError>;
}

#[async_trait]
pub trait TaskScheduler: Send + Sync {
    async fn schedule_after(&self, delay: Duration, task: Task) -> Result<(), SyncError>;
}

pub trait Clock: Send + Sync {
    /// Wall clock, epoch millis.
    fn now_millis(&self) -> i64;
}
