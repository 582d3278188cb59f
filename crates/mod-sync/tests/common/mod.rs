#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use harvest_domain::*;
use harvest_error::SyncError;
use harvest_memstore::MemoryStore;
use harvest_sync::{Providers, Stores, SyncConfig, SyncEngine};

pub const START: i64 = 1_700_000_000_000;

/// Mailbox over an ordered message list, paged `page_size` at a time with
/// tokens `p1`, `p2`, ...
pub struct FakeMailbox {
    page_size: usize,
    messages: Mutex<Vec<MessageSender>>,
    failing: Mutex<HashSet<String>>,
    fail_listing: Mutex<bool>,
    pub list_calls: Mutex<Vec<Option<String>>>,
    pub fetched: Mutex<Vec<String>>,
}

impl FakeMailbox {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            messages: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            fail_listing: Mutex::new(false),
            list_calls: Mutex::new(Vec::new()),
            fetched: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, id: &str, from: &str, timestamp_millis: i64) {
        self.messages.lock().unwrap().push(MessageSender {
            id: id.to_string(),
            timestamp_millis,
            from_header: from.to_string(),
        });
    }

    /// `n` messages `m0..m{n-1}`, each from its own sender.
    pub fn fill(&self, n: usize) {
        for i in 0..n {
            self.push(&format!("m{i}"), &format!("user{i}@x.com"), START + i as i64);
        }
    }

    pub fn fail_message(&self, id: &str, fail: bool) {
        let mut failing = self.failing.lock().unwrap();
        if fail {
            failing.insert(id.to_string());
        } else {
            failing.remove(id);
        }
    }

    pub fn fail_listing(&self, fail: bool) {
        *self.fail_listing.lock().unwrap() = fail;
    }

    pub fn fetch_count(&self, id: &str) -> usize {
        self.fetched.lock().unwrap().iter().filter(|f| *f == id).count()
    }
}

#[async_trait]
impl MailboxFetcher for FakeMailbox {
    async fn list_messages(
        &self,
        _access_token: &str,
        _folder_id: &str,
        _after: Option<i64>,
        page_token: Option<&str>,
    ) -> Result<MessagePage, SyncError> {
        self.list_calls
            .lock()
            .unwrap()
            .push(page_token.map(str::to_string));
        if *self.fail_listing.lock().unwrap() {
            return Err(SyncError::provider("gmail API error: 500 backend error"));
        }

        let page: usize = match page_token {
            None => 0,
            Some(t) => t
                .trim_start_matches('p')
                .parse()
                .map_err(|_| SyncError::provider(format!("bad page token {t}")))?,
        };
        let messages = self.messages.lock().unwrap();
        let start = (page * self.page_size).min(messages.len());
        let end = (start + self.page_size).min(messages.len());
        Ok(MessagePage {
            messages: messages[start..end]
                .iter()
                .map(|m| MessageRef {
                    id: m.id.clone(),
                    thread_id: format!("t-{}", m.id),
                })
                .collect(),
            next_page_token: (end < messages.len()).then(|| format!("p{}", page + 1)),
        })
    }

    async fn get_message_sender(
        &self,
        _access_token: &str,
        message_id: &str,
    ) -> Result<MessageSender, SyncError> {
        if self.failing.lock().unwrap().contains(message_id) {
            return Err(SyncError::provider(format!("gmail API error: 500 on {message_id}")));
        }
        let found = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.id == message_id)
            .cloned()
            .ok_or_else(|| SyncError::provider(format!("gmail API error: 404 {message_id}")))?;
        self.fetched.lock().unwrap().push(message_id.to_string());
        Ok(found)
    }

    async fn folder_total(&self, _access_token: &str, folder_id: &str) -> Result<u64, SyncError> {
        if folder_id != "INBOX" {
            return Err(SyncError::provider(format!("gmail API error: 404 label {folder_id}")));
        }
        Ok(self.messages.lock().unwrap().len() as u64)
    }

    async fn list_folders(&self, _access_token: &str) -> Result<Vec<Folder>, SyncError> {
        Ok(vec![Folder {
            id: "INBOX".to_string(),
            name: "INBOX".to_string(),
            kind: "system".to_string(),
        }])
    }
}

#[derive(Default)]
pub struct FakeCredentials {
    pub refreshes: AtomicUsize,
    pub fail: Mutex<bool>,
}

#[async_trait]
impl CredentialProvider for FakeCredentials {
    async fn refresh(&self, _refresh_token: &str) -> Result<AccessGrant, SyncError> {
        if *self.fail.lock().unwrap() {
            return Err(SyncError::auth("token refresh failed: invalid_grant"));
        }
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(AccessGrant {
            access_token: format!("fresh-{n}"),
            expires_in_secs: 3600,
        })
    }
}

/// Sheet held as plain rows; ranges are `Tab!A{n}:D{n}`.
#[derive(Default)]
pub struct FakeSheets {
    pub rows: Mutex<Vec<Vec<String>>>,
    pub update_calls: AtomicUsize,
    pub append_calls: AtomicUsize,
}

#[async_trait]
impl SpreadsheetWriter for FakeSheets {
    async fn read_rows(
        &self,
        _access_token: &str,
        _sheet_id: &str,
        _range: &str,
    ) -> Result<Vec<Vec<String>>, SyncError> {
        Ok(self.rows.lock().unwrap().clone())
    }

    async fn update_rows(
        &self,
        _access_token: &str,
        _sheet_id: &str,
        updates: &[RangeUpdate],
    ) -> Result<(), SyncError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows.lock().unwrap();
        for update in updates {
            let cell = update.range.split('!').nth(1).unwrap();
            let n: usize = cell
                .split(':')
                .next()
                .unwrap()
                .trim_start_matches('A')
                .parse()
                .unwrap();
            rows[n - 1] = update.values[0].clone();
        }
        Ok(())
    }

    async fn append_rows(
        &self,
        _access_token: &str,
        _sheet_id: &str,
        _range: &str,
        new_rows: &[Vec<String>],
    ) -> Result<(), SyncError> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        self.rows.lock().unwrap().extend_from_slice(new_rows);
        Ok(())
    }
}

/// Address book over the memory store whose upserts can be made to fail.
pub struct FlakyContacts {
    inner: Arc<MemoryStore>,
    /// Upserts still allowed before failing; `None` never fails.
    allowed: Mutex<Option<usize>>,
}

impl FlakyContacts {
    pub fn fail_after(&self, upserts: usize) {
        *self.allowed.lock().unwrap() = Some(upserts);
    }

    pub fn recover(&self) {
        *self.allowed.lock().unwrap() = None;
    }
}

#[async_trait]
impl ContactStore for FlakyContacts {
    async fn upsert_contact(
        &self,
        connection_id: &ConnectionId,
        email: &str,
        name: &str,
        timestamp: i64,
    ) -> Result<UpsertOutcome, SyncError> {
        if let Some(left) = self.allowed.lock().unwrap().as_mut() {
            if *left == 0 {
                return Err(SyncError::store("contacts table unavailable"));
            }
            *left -= 1;
        }
        self.inner
            .upsert_contact(connection_id, email, name, timestamp)
            .await
    }

    async fn get_contact(
        &self,
        connection_id: &ConnectionId,
        email: &str,
    ) -> Result<Option<Contact>, SyncError> {
        self.inner.get_contact(connection_id, email).await
    }

    async fn list_contacts(&self, connection_id: &ConnectionId) -> Result<Vec<Contact>, SyncError> {
        self.inner.list_contacts(connection_id).await
    }

    async fn mark_exported(&self, exported: &[(ContactId, u64)]) -> Result<(), SyncError> {
        self.inner.mark_exported(exported).await
    }

    async fn delete_contacts_page(
        &self,
        connection_id: &ConnectionId,
        limit: usize,
    ) -> Result<usize, SyncError> {
        self.inner.delete_contacts_page(connection_id, limit).await
    }
}

/// Queues tasks instead of running them; tests pop and run them by hand.
#[derive(Default)]
pub struct RecordingScheduler {
    pub queue: Mutex<VecDeque<(Duration, Task)>>,
}

impl RecordingScheduler {
    pub fn pop(&self) -> Option<(Duration, Task)> {
        self.queue.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }
}

#[async_trait]
impl TaskScheduler for RecordingScheduler {
    async fn schedule_after(&self, delay: Duration, task: Task) -> Result<(), SyncError> {
        self.queue.lock().unwrap().push_back((delay, task));
        Ok(())
    }
}

pub struct FixedClock(AtomicI64);

impl FixedClock {
    pub fn advance(&self, by: Duration) {
        self.0.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }

    pub fn set(&self, at: i64) {
        self.0.store(at, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Harness {
    pub engine: SyncEngine,
    pub store: Arc<MemoryStore>,
    pub contacts: Arc<FlakyContacts>,
    pub mailbox: Arc<FakeMailbox>,
    pub credentials: Arc<FakeCredentials>,
    pub sheets: Arc<FakeSheets>,
    pub tasks: Arc<RecordingScheduler>,
    pub clock: Arc<FixedClock>,
}

impl Harness {
    pub fn new(page_size: usize, config: SyncConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let contacts = Arc::new(FlakyContacts {
            inner: store.clone(),
            allowed: Mutex::new(None),
        });
        let mailbox = Arc::new(FakeMailbox::new(page_size));
        let credentials = Arc::new(FakeCredentials::default());
        let sheets = Arc::new(FakeSheets::default());
        let tasks = Arc::new(RecordingScheduler::default());
        let clock = Arc::new(FixedClock(AtomicI64::new(START)));

        let stores = Stores {
            contacts: contacts.clone(),
            ..Stores::shared(store.clone())
        };
        let engine = SyncEngine::new(
            stores,
            Providers {
                credentials: credentials.clone(),
                mailbox: mailbox.clone(),
                sheets: sheets.clone(),
            },
            tasks.clone(),
            clock.clone(),
            config,
        );
        Self {
            engine,
            store,
            contacts,
            mailbox,
            credentials,
            sheets,
            tasks,
            clock,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(100, SyncConfig::default())
    }

    pub fn new_connection(schedule: SyncSchedule) -> NewConnection {
        NewConnection {
            user_id: "u1".to_string(),
            name: "Work inbox".to_string(),
            credential: OAuthCredential {
                access_token: "cached".to_string(),
                refresh_token: "refresh".to_string(),
                expires_at: i64::MAX,
            },
            folder_id: "INBOX".to_string(),
            sheet_id: "sheet-1".to_string(),
            sheet_tab: "Addresses".to_string(),
            schedule,
        }
    }

    pub async fn connect(&self) -> Connection {
        self.engine
            .create_connection(Self::new_connection(SyncSchedule::Manual))
            .await
            .unwrap()
    }

    pub async fn reload(&self, id: &ConnectionId) -> Connection {
        self.engine.connection(id).await.unwrap()
    }

    /// Run queued tasks in order, advancing the clock by each delay, until
    /// the queue is empty. Returns how many ran.
    pub async fn drain(&self) -> usize {
        let mut ran = 0;
        while let Some((delay, task)) = self.tasks.pop() {
            self.clock.advance(delay);
            self.engine.run_task(task).await;
            ran += 1;
            assert!(ran < 10_000, "task chain never settled");
        }
        ran
    }

    /// Start a cycle and run it to the end.
    pub async fn sync(&self, id: &ConnectionId) {
        self.engine.start_cycle(id).await.unwrap();
        self.drain().await;
    }
}
