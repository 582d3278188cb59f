use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use harvest_domain::*;
use harvest_error::SyncError;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Everything the store holds. Serialized as-is into the snapshot file.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct State {
    pub(crate) next_id: u64,
    pub(crate) connections: BTreeMap<ConnectionId, Connection>,
    /// Witnesses by message id, per connection.
    pub(crate) synced: BTreeMap<ConnectionId, BTreeMap<String, SyncedMessage>>,
    /// email → contact, per connection.
    pub(crate) contacts: BTreeMap<ConnectionId, BTreeMap<String, Contact>>,
    pub(crate) domains: BTreeMap<ConnectionId, Vec<FilteredDomain>>,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}_{}", self.next_id)
    }
}

/// All four store ports over one mutex-guarded [`State`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    pub(crate) state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, State>, SyncError> {
        self.state
            .lock()
            .map_err(|e| SyncError::store(format!("memory store poisoned: {e}")))
    }
}

fn take_page<K: Clone + Ord, V>(map: &mut BTreeMap<K, V>, limit: usize) -> usize {
    let keys: Vec<K> = map.keys().take(limit).cloned().collect();
    for k in &keys {
        map.remove(k);
    }
    keys.len()
}

#[async_trait]
impl ConnectionStore for MemoryStore {
    async fn insert_connection(&self, new: NewConnection) -> Result<Connection, SyncError> {
        let mut state = self.lock()?;
        let id = ConnectionId::new(state.next_id("conn"));
        let conn = Connection::from_new(id.clone(), new);
        state.connections.insert(id, conn.clone());
        Ok(conn)
    }

    async fn get_connection(&self, id: &ConnectionId) -> Result<Option<Connection>, SyncError> {
        Ok(self.lock()?.connections.get(id).cloned())
    }

    async fn list_connections(&self) -> Result<Vec<Connection>, SyncError> {
        Ok(self.lock()?.connections.values().cloned().collect())
    }

    async fn list_connections_by_user(&self, user_id: &str) -> Result<Vec<Connection>, SyncError> {
        Ok(self
            .lock()?
            .connections
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn patch_connection(
        &self,
        id: &ConnectionId,
        patch: ConnectionPatch,
    ) -> Result<Connection, SyncError> {
        let mut state = self.lock()?;
        let conn = state
            .connections
            .get_mut(id)
            .ok_or_else(|| SyncError::not_found(format!("connection {id}")))?;
        patch.apply(conn);
        Ok(conn.clone())
    }

    async fn patch_connection_if(
        &self,
        id: &ConnectionId,
        expected: SyncStatus,
        patch: ConnectionPatch,
    ) -> Result<Option<Connection>, SyncError> {
        let mut state = self.lock()?;
        let conn = state
            .connections
            .get_mut(id)
            .ok_or_else(|| SyncError::not_found(format!("connection {id}")))?;
        if conn.status != expected {
            debug!(connection = %id, status = %conn.status, %expected, "conditional patch skipped");
            return Ok(None);
        }
        patch.apply(conn);
        Ok(Some(conn.clone()))
    }

    async fn delete_connection(&self, id: &ConnectionId) -> Result<(), SyncError> {
        let mut state = self.lock()?;
        state.connections.remove(id);
        state.synced.remove(id);
        state.contacts.remove(id);
        state.domains.remove(id);
        Ok(())
    }
}

#[async_trait]
impl SyncedMessageStore for MemoryStore {
    async fn synced_ids(
        &self,
        connection_id: &ConnectionId,
        message_ids: &[String],
    ) -> Result<HashSet<String>, SyncError> {
        let state = self.lock()?;
        let Some(synced) = state.synced.get(connection_id) else {
            return Ok(HashSet::new());
        };
        Ok(message_ids
            .iter()
            .filter(|id| synced.contains_key(*id))
            .cloned()
            .collect())
    }

    async fn mark_synced(
        &self,
        connection_id: &ConnectionId,
        message_ids: &[String],
        synced_at: i64,
    ) -> Result<(), SyncError> {
        let mut state = self.lock()?;
        let synced = state.synced.entry(connection_id.clone()).or_default();
        for id in message_ids {
            synced.entry(id.clone()).or_insert_with(|| SyncedMessage {
                connection_id: connection_id.clone(),
                message_id: id.clone(),
                synced_at,
            });
        }
        Ok(())
    }

    async fn count_synced(&self, connection_id: &ConnectionId) -> Result<u64, SyncError> {
        Ok(self
            .lock()?
            .synced
            .get(connection_id)
            .map_or(0, |s| s.len() as u64))
    }

    async fn delete_synced_page(
        &self,
        connection_id: &ConnectionId,
        limit: usize,
    ) -> Result<usize, SyncError> {
        let mut state = self.lock()?;
        Ok(state
            .synced
            .get_mut(connection_id)
            .map_or(0, |s| take_page(s, limit)))
    }
}

#[async_trait]
impl ContactStore for MemoryStore {
    async fn upsert_contact(
        &self,
        connection_id: &ConnectionId,
        email: &str,
        name: &str,
        timestamp: i64,
    ) -> Result<UpsertOutcome, SyncError> {
        let mut state = self.lock()?;
        if let Some(existing) = state
            .contacts
            .get_mut(connection_id)
            .and_then(|c| c.get_mut(email))
        {
            existing.record_sighting(name, timestamp);
            return Ok(UpsertOutcome::Updated);
        }

        let id = ContactId::new(state.next_id("contact"));
        let contact = Contact::first_sighting(
            id,
            connection_id.clone(),
            email.to_string(),
            name.to_string(),
            timestamp,
        );
        state
            .contacts
            .entry(connection_id.clone())
            .or_default()
            .insert(email.to_string(), contact);
        Ok(UpsertOutcome::Created)
    }

    async fn get_contact(
        &self,
        connection_id: &ConnectionId,
        email: &str,
    ) -> Result<Option<Contact>, SyncError> {
        Ok(self
            .lock()?
            .contacts
            .get(connection_id)
            .and_then(|c| c.get(email))
            .cloned())
    }

    async fn list_contacts(&self, connection_id: &ConnectionId) -> Result<Vec<Contact>, SyncError> {
        Ok(self
            .lock()?
            .contacts
            .get(connection_id)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn mark_exported(&self, exported: &[(ContactId, u64)]) -> Result<(), SyncError> {
        let mut state = self.lock()?;
        for (id, count) in exported {
            let found = state
                .contacts
                .values_mut()
                .flat_map(|c| c.values_mut())
                .find(|c| &c.id == id);
            match found {
                Some(contact) => contact.mark_exported(*count),
                None => debug!(contact = %id, "exported contact no longer stored"),
            }
        }
        Ok(())
    }

    async fn delete_contacts_page(
        &self,
        connection_id: &ConnectionId,
        limit: usize,
    ) -> Result<usize, SyncError> {
        let mut state = self.lock()?;
        Ok(state
            .contacts
            .get_mut(connection_id)
            .map_or(0, |c| take_page(c, limit)))
    }
}

#[async_trait]
impl DomainFilterStore for MemoryStore {
    async fn list_domains(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<Vec<FilteredDomain>, SyncError> {
        Ok(self
            .lock()?
            .domains
            .get(connection_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_domain(
        &self,
        connection_id: &ConnectionId,
        domain: &str,
    ) -> Result<FilteredDomain, SyncError> {
        let mut state = self.lock()?;
        if let Some(existing) = state
            .domains
            .get(connection_id)
            .and_then(|d| d.iter().find(|d| d.domain == domain))
        {
            return Ok(existing.clone());
        }

        let record = FilteredDomain {
            id: DomainId::new(state.next_id("domain")),
            connection_id: connection_id.clone(),
            domain: domain.to_string(),
        };
        state
            .domains
            .entry(connection_id.clone())
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    async fn remove_domain(&self, id: &DomainId) -> Result<(), SyncError> {
        let mut state = self.lock()?;
        let before: usize = state.domains.values().map(Vec::len).sum();
        for list in state.domains.values_mut() {
            list.retain(|d| &d.id != id);
        }
        let after: usize = state.domains.values().map(Vec::len).sum();
        if before == after {
            return Err(SyncError::not_found(format!("domain {id}")));
        }
        Ok(())
    }

    async fn delete_domains_page(
        &self,
        connection_id: &ConnectionId,
        limit: usize,
    ) -> Result<usize, SyncError> {
        let mut state = self.lock()?;
        let Some(list) = state.domains.get_mut(connection_id) else {
            return Ok(0);
        };
        let n = limit.min(list.len());
        list.drain(..n);
        Ok(n)
    }
}
