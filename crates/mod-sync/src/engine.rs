use std::sync::Arc;

use harvest_domain::*;
use harvest_error::SyncError;
use tracing::info;

use crate::address::normalize_domain;
use crate::config::SyncConfig;
use crate::progress::SyncProgress;

/// The four accessors of the durable store.
#[derive(Clone)]
pub struct Stores {
    pub connections: Arc<dyn ConnectionStore>,
    pub synced: Arc<dyn SyncedMessageStore>,
    pub contacts: Arc<dyn ContactStore>,
    pub domains: Arc<dyn DomainFilterStore>,
}

impl Stores {
    /// All accessors served by one backend.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: ConnectionStore + SyncedMessageStore + ContactStore + DomainFilterStore + 'static,
    {
        Self {
            connections: store.clone(),
            synced: store.clone(),
            contacts: store.clone(),
            domains: store,
        }
    }
}

#[derive(Clone)]
pub struct Providers {
    pub credentials: Arc<dyn CredentialProvider>,
    pub mailbox: Arc<dyn MailboxFetcher>,
    pub sheets: Arc<dyn SpreadsheetWriter>,
}

pub struct SyncEngine {
    pub(crate) stores: Stores,
    pub(crate) providers: Providers,
    pub(crate) tasks: Arc<dyn TaskScheduler>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: SyncConfig,
}

impl SyncEngine {
    pub fn new(
        stores: Stores,
        providers: Providers,
        tasks: Arc<dyn TaskScheduler>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        Self {
            stores,
            providers,
            tasks,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub(crate) fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Entry point for the delayed re-invocation primitive.
    pub async fn run_task(&self, task: Task) {
        match task {
            Task::ProcessBatch(id) => {
                self.process_batch(&id).await;
            }
            Task::DeleteBatch(id) => {
                self.process_deletion_batch(&id).await;
            }
        }
    }

    pub async fn create_connection(&self, new: NewConnection) -> Result<Connection, SyncError> {
        validate_not_empty(&new.user_id, "user_id")?;
        validate_not_empty(&new.folder_id, "folder_id")?;
        validate_not_empty(&new.sheet_id, "sheet_id")?;
        validate_not_empty(&new.sheet_tab, "sheet_tab")?;
        validate_not_empty(&new.credential.refresh_token, "refresh_token")?;
        let conn = self.stores.connections.insert_connection(new).await?;
        info!(connection = %conn.id, folder = %conn.folder_id, schedule = %conn.schedule, "created connection");
        Ok(conn)
    }

    pub async fn update_settings(
        &self,
        id: &ConnectionId,
        settings: ConnectionSettings,
    ) -> Result<Connection, SyncError> {
        for (value, name) in [
            (&settings.name, "name"),
            (&settings.folder_id, "folder_id"),
            (&settings.sheet_id, "sheet_id"),
            (&settings.sheet_tab, "sheet_tab"),
        ] {
            if let Some(v) = value {
                validate_not_empty(v, name)?;
            }
        }
        let conn = self
            .stores
            .connections
            .patch_connection(id, settings.into())
            .await?;
        info!(connection = %id, "updated connection settings");
        Ok(conn)
    }

    pub async fn connection(&self, id: &ConnectionId) -> Result<Connection, SyncError> {
        self.stores
            .connections
            .get_connection(id)
            .await?
            .ok_or_else(|| SyncError::not_found(format!("connection {id}")))
    }

    pub async fn list_connections(&self, user_id: Option<&str>) -> Result<Vec<Connection>, SyncError> {
        match user_id {
            Some(user) => self.stores.connections.list_connections_by_user(user).await,
            None => self.stores.connections.list_connections().await,
        }
    }

    pub async fn progress(&self, id: &ConnectionId) -> Result<SyncProgress, SyncError> {
        let conn = self.connection(id).await?;
        Ok(SyncProgress::of(&conn, self.now(), self.config.stuck_after))
    }

    pub async fn list_contacts(&self, id: &ConnectionId) -> Result<Vec<Contact>, SyncError> {
        self.stores.contacts.list_contacts(id).await
    }

    pub async fn list_folders(&self, id: &ConnectionId) -> Result<Vec<Folder>, SyncError> {
        let conn = self.connection(id).await?;
        let token = self.access_token(&conn).await?;
        self.providers.mailbox.list_folders(&token).await
    }

    pub async fn add_filtered_domain(
        &self,
        id: &ConnectionId,
        domain: &str,
    ) -> Result<FilteredDomain, SyncError> {
        let domain = normalize_domain(domain);
        validate_not_empty(&domain, "domain")?;
        self.connection(id).await?;
        let record = self.stores.domains.add_domain(id, &domain).await?;
        info!(connection = %id, domain = %record.domain, "blocked domain");
        Ok(record)
    }

    /// Returns how many domains were newly blocked.
    pub async fn add_filtered_domains(
        &self,
        id: &ConnectionId,
        domains: &[String],
    ) -> Result<usize, SyncError> {
        self.connection(id).await?;
        let mut known: std::collections::HashSet<String> = self
            .stores
            .domains
            .list_domains(id)
            .await?
            .into_iter()
            .map(|d| d.domain)
            .collect();

        let mut added = 0;
        for raw in domains {
            let domain = normalize_domain(raw);
            if domain.is_empty() || known.contains(&domain) {
                continue;
            }
            self.stores.domains.add_domain(id, &domain).await?;
            known.insert(domain);
            added += 1;
        }
        info!(connection = %id, added, "blocked domains in bulk");
        Ok(added)
    }

    pub async fn remove_filtered_domain(&self, id: &DomainId) -> Result<(), SyncError> {
        self.stores.domains.remove_domain(id).await?;
        info!(domain_id = %id, "unblocked domain");
        Ok(())
    }

    pub async fn list_filtered_domains(
        &self,
        id: &ConnectionId,
    ) -> Result<Vec<FilteredDomain>, SyncError> {
        self.stores.domains.list_domains(id).await
    }

    /// A usable access token, refreshing and persisting it first when the
    /// cached one has expired.
    pub(crate) async fn access_token(&self, conn: &Connection) -> Result<String, SyncError> {
        let now = self.now();
        if !conn.credential.is_expired(now) {
            return Ok(conn.credential.access_token.clone());
        }

        let grant = self
            .providers
            .credentials
            .refresh(&conn.credential.refresh_token)
            .await?;
        let credential = OAuthCredential {
            access_token: grant.access_token,
            refresh_token: conn.credential.refresh_token.clone(),
            expires_at: now + (grant.expires_in_secs as i64) * 1000,
        };
        let token = credential.access_token.clone();
        self.stores
            .connections
            .patch_connection(&conn.id, ConnectionPatch::new().credential(credential))
            .await?;
        info!(connection = %conn.id, "refreshed access token");
        Ok(token)
    }
}

pub(crate) fn validate_not_empty(val: &str, name: &str) -> Result<(), SyncError> {
    if val.trim().is_empty() {
        return Err(SyncError::invalid_input(format!("{name} cannot be empty")));
    }
    Ok(())
}
