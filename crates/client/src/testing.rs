//! In-memory fakes of the external collaborators.
//!
//! Enabled with the `testing` feature (always on for unit tests). The fakes
//! keep their state behind plain mutexes, count their calls and expose
//! knobs for latency and failure injection so flow tests can drive races
//! deterministically under paused tokio time.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::stream::{BoxStream, StreamExt};
use packup_core::{AuthUser, Document, DocumentId, Email, FilterSet, IdentityId};
use secrecy::SecretString;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use url::Url;

use crate::firebase::auth::is_sign_in_link;
use crate::providers::{
    DocumentStore, EmailPrompt, IdentityError, IdentityProvider, SearchError, SearchHit,
    SearchIndex, StoreError,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Identity provider
// =============================================================================

/// A sign-in link the fake "emailed".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentLink {
    pub email: Email,
    pub url: Url,
}

#[derive(Default)]
struct IdentityState {
    accounts: HashMap<Email, AuthUser>,
    /// oobCode -> (email, consumed)
    codes: HashMap<String, (Email, bool)>,
    outbox: Vec<SentLink>,
    current: Option<AuthUser>,
    observers: Vec<mpsc::UnboundedSender<Option<AuthUser>>>,
    next_id: u64,
    fail_send: bool,
    fail_create: bool,
    observe_calls: usize,
    exchange_calls: usize,
}

/// Identity provider with single-use links and an observable current user.
#[derive(Default)]
pub struct FakeIdentityProvider {
    state: Mutex<IdentityState>,
}

impl FakeIdentityProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an account without signing it in.
    ///
    /// # Panics
    ///
    /// Panics if `email` is not a valid address.
    #[must_use]
    pub fn register(&self, email: &str) -> AuthUser {
        #[allow(clippy::expect_used)]
        let email = Email::parse(email).expect("valid test email");
        let mut state = lock(&self.state);
        Self::new_account(&mut state, email)
    }

    fn new_account(state: &mut IdentityState, email: Email) -> AuthUser {
        state.next_id += 1;
        let user = AuthUser {
            uid: IdentityId::new(format!("uid-{}", state.next_id)),
            email: Some(email.clone()),
            display_name: None,
        };
        state.accounts.insert(email, user.clone());
        user
    }

    fn set_current(state: &mut IdentityState, user: Option<AuthUser>) {
        state.current.clone_from(&user);
        state
            .observers
            .retain(|observer| observer.send(user.clone()).is_ok());
    }

    /// Push a current-user change as the provider would (e.g. revocation).
    pub fn push_user(&self, user: Option<AuthUser>) {
        Self::set_current(&mut lock(&self.state), user);
    }

    /// Every link sent so far, oldest first.
    #[must_use]
    pub fn outbox(&self) -> Vec<SentLink> {
        lock(&self.state).outbox.clone()
    }

    /// The most recent link sent to `email`.
    #[must_use]
    pub fn last_link_for(&self, email: &str) -> Option<Url> {
        lock(&self.state)
            .outbox
            .iter()
            .rev()
            .find(|sent| sent.email.as_str() == email)
            .map(|sent| sent.url.clone())
    }

    #[must_use]
    pub fn account(&self, email: &str) -> Option<AuthUser> {
        let email = Email::parse(email).ok()?;
        lock(&self.state).accounts.get(&email).cloned()
    }

    pub fn fail_link_requests(&self, fail: bool) {
        lock(&self.state).fail_send = fail;
    }

    pub fn fail_account_creation(&self, fail: bool) {
        lock(&self.state).fail_create = fail;
    }

    /// Number of `observe_session` subscriptions ever opened.
    #[must_use]
    pub fn observe_calls(&self) -> usize {
        lock(&self.state).observe_calls
    }

    #[must_use]
    pub fn exchange_calls(&self) -> usize {
        lock(&self.state).exchange_calls
    }
}

impl IdentityProvider for FakeIdentityProvider {
    async fn request_sign_in_link(&self, email: &Email, return_url: &Url) -> Result<(), IdentityError> {
        let mut state = lock(&self.state);
        if state.fail_send {
            return Err(IdentityError::Unavailable("mail relay down".to_owned()));
        }
        state.next_id += 1;
        let code = format!("oob-{}", state.next_id);
        let mut url = return_url.clone();
        url.query_pairs_mut()
            .append_pair("apiKey", "fake-key")
            .append_pair("mode", "signIn")
            .append_pair("oobCode", &code);

        state.codes.insert(code, (email.clone(), false));
        state.outbox.push(SentLink {
            email: email.clone(),
            url,
        });
        Ok(())
    }

    fn is_valid_sign_in_link(&self, url: &Url) -> bool {
        is_sign_in_link(url)
    }

    async fn exchange_sign_in_link(&self, email: &Email, url: &Url) -> Result<AuthUser, IdentityError> {
        let mut state = lock(&self.state);
        state.exchange_calls += 1;

        let code = url
            .query_pairs()
            .find(|(key, _)| key == "oobCode")
            .map(|(_, value)| value.into_owned())
            .unwrap_or_default();
        let Some((issued_to, consumed)) = state.codes.get_mut(&code) else {
            return Err(IdentityError::ExpiredOrInvalidLink);
        };
        if *consumed {
            return Err(IdentityError::ExpiredOrInvalidLink);
        }
        *consumed = true;
        // The provider answers a mismatch with INVALID_EMAIL.
        if issued_to != email {
            return Err(IdentityError::UnknownIdentity);
        }

        let Some(user) = state.accounts.get(email).cloned() else {
            return Err(IdentityError::UnknownIdentity);
        };
        Self::set_current(&mut state, Some(user.clone()));
        Ok(user)
    }

    async fn create_identity(
        &self,
        email: &Email,
        _password: &SecretString,
    ) -> Result<AuthUser, IdentityError> {
        let mut state = lock(&self.state);
        if state.fail_create {
            return Err(IdentityError::Unavailable("identity service down".to_owned()));
        }
        if state.accounts.contains_key(email) {
            return Err(IdentityError::EmailAlreadyInUse);
        }
        let user = Self::new_account(&mut state, email.clone());
        Self::set_current(&mut state, Some(user.clone()));
        Ok(user)
    }

    fn observe_session(&self) -> BoxStream<'static, Option<AuthUser>> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        {
            let mut state = lock(&self.state);
            state.observe_calls += 1;
            // The provider reports the current user first.
            let _ = tx.send(state.current.clone());
            state.observers.push(tx);
        }
        async_stream::stream! {
            while let Some(user) = rx.recv().await {
                yield user;
            }
        }
        .boxed()
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        Self::set_current(&mut lock(&self.state), None);
        Ok(())
    }
}

// =============================================================================
// Document store
// =============================================================================

type PushSender = mpsc::UnboundedSender<Result<Option<Document>, StoreError>>;

#[derive(Default)]
struct StoreState {
    collections: HashMap<String, BTreeMap<String, Map<String, Value>>>,
    channels: HashMap<(String, String), Vec<PushSender>>,
    latency: Duration,
    fail_reads: bool,
    fail_writes: HashSet<String>,
    fail_patches: bool,
    get_calls: usize,
    list_calls: usize,
    set_calls: usize,
    patch_calls: usize,
    subscribe_calls: usize,
}

/// Document store over nested maps with push channels.
#[derive(Default)]
pub struct FakeDocumentStore {
    state: Mutex<StoreState>,
}

impl FakeDocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document. `fields` must be a JSON object.
    pub fn insert(&self, collection: &str, id: &str, fields: Value) {
        let Value::Object(fields) = fields else {
            return;
        };
        lock(&self.state)
            .collections
            .entry(collection.to_owned())
            .or_default()
            .insert(id.to_owned(), fields);
    }

    /// Remote state of a document.
    #[must_use]
    pub fn document(&self, collection: &str, id: &str) -> Option<Document> {
        lock(&self.state)
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|fields| Document::new(DocumentId::new(id), fields.clone()))
    }

    /// Delay every request by `latency` (use with paused time).
    pub fn set_latency(&self, latency: Duration) {
        lock(&self.state).latency = latency;
    }

    pub fn fail_reads(&self, fail: bool) {
        lock(&self.state).fail_reads = fail;
    }

    /// Reject `set_document` calls on `collection`.
    pub fn fail_writes_to(&self, collection: &str) {
        lock(&self.state).fail_writes.insert(collection.to_owned());
    }

    /// Accept writes to every collection again.
    pub fn clear_write_failures(&self) {
        lock(&self.state).fail_writes.clear();
    }

    pub fn fail_patches(&self, fail: bool) {
        lock(&self.state).fail_patches = fail;
    }

    /// Change a document remotely and push the new state to subscribers.
    pub fn push(&self, collection: &str, id: &str, fields: Option<Value>) {
        let mut state = lock(&self.state);
        let docs = state.collections.entry(collection.to_owned()).or_default();
        let document = match fields {
            Some(Value::Object(fields)) => {
                docs.insert(id.to_owned(), fields.clone());
                Some(Document::new(DocumentId::new(id), fields))
            }
            _ => {
                docs.remove(id);
                None
            }
        };
        if let Some(senders) = state.channels.get_mut(&(collection.to_owned(), id.to_owned())) {
            senders.retain(|tx| tx.send(Ok(document.clone())).is_ok());
        }
    }

    /// Fail every open push channel of a document.
    pub fn break_channels(&self, collection: &str, id: &str) {
        let mut state = lock(&self.state);
        if let Some(senders) = state.channels.remove(&(collection.to_owned(), id.to_owned())) {
            for tx in senders {
                let _ = tx.send(Err(StoreError::Unavailable("channel reset".to_owned())));
            }
        }
    }

    /// Push channels of a document whose receiving end is still alive.
    #[must_use]
    pub fn open_channels(&self, collection: &str, id: &str) -> usize {
        lock(&self.state)
            .channels
            .get(&(collection.to_owned(), id.to_owned()))
            .map_or(0, |senders| senders.iter().filter(|tx| !tx.is_closed()).count())
    }

    #[must_use]
    pub fn get_calls(&self) -> usize {
        lock(&self.state).get_calls
    }

    #[must_use]
    pub fn list_calls(&self) -> usize {
        lock(&self.state).list_calls
    }

    #[must_use]
    pub fn set_calls(&self) -> usize {
        lock(&self.state).set_calls
    }

    #[must_use]
    pub fn patch_calls(&self) -> usize {
        lock(&self.state).patch_calls
    }

    #[must_use]
    pub fn subscribe_calls(&self) -> usize {
        lock(&self.state).subscribe_calls
    }

    fn latency(&self) -> Duration {
        lock(&self.state).latency
    }
}

impl DocumentStore for FakeDocumentStore {
    async fn get_document(
        &self,
        collection: &str,
        id: &DocumentId,
    ) -> Result<Option<Document>, StoreError> {
        lock(&self.state).get_calls += 1;
        tokio::time::sleep(self.latency()).await;

        if lock(&self.state).fail_reads {
            return Err(StoreError::Unavailable("read failed".to_owned()));
        }
        Ok(self.document(collection, id.as_str()))
    }

    async fn list_documents(
        &self,
        collection: &str,
        filters: &FilterSet,
    ) -> Result<Vec<Document>, StoreError> {
        lock(&self.state).list_calls += 1;
        tokio::time::sleep(self.latency()).await;

        let state = lock(&self.state);
        if state.fail_reads {
            return Err(StoreError::Unavailable("query failed".to_owned()));
        }
        Ok(state
            .collections
            .get(collection)
            .into_iter()
            .flatten()
            .filter(|(_, fields)| filters.matches(fields))
            .map(|(id, fields)| Document::new(DocumentId::new(id.as_str()), fields.clone()))
            .collect())
    }

    async fn set_document(
        &self,
        collection: &str,
        id: &DocumentId,
        value: &Map<String, Value>,
    ) -> Result<(), StoreError> {
        lock(&self.state).set_calls += 1;
        tokio::time::sleep(self.latency()).await;

        let mut state = lock(&self.state);
        if state.fail_writes.contains(collection) {
            return Err(StoreError::PermissionDenied(format!("writes to {collection} rejected")));
        }
        state
            .collections
            .entry(collection.to_owned())
            .or_default()
            .insert(id.as_str().to_owned(), value.clone());
        Ok(())
    }

    async fn patch_document(
        &self,
        collection: &str,
        id: &DocumentId,
        patch: &Map<String, Value>,
    ) -> Result<(), StoreError> {
        lock(&self.state).patch_calls += 1;
        tokio::time::sleep(self.latency()).await;

        let mut state = lock(&self.state);
        if state.fail_patches {
            return Err(StoreError::PermissionDenied("patch rejected".to_owned()));
        }
        let Some(fields) = state
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id.as_str()))
        else {
            return Err(StoreError::NotFound {
                collection: collection.to_owned(),
                id: id.to_string(),
            });
        };
        for (key, value) in patch {
            fields.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    fn subscribe(
        &self,
        collection: &str,
        id: &DocumentId,
    ) -> BoxStream<'static, Result<Option<Document>, StoreError>> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let initial = self.document(collection, id.as_str());
        {
            let mut state = lock(&self.state);
            state.subscribe_calls += 1;
            state
                .channels
                .entry((collection.to_owned(), id.as_str().to_owned()))
                .or_default()
                .push(tx);
        }
        async_stream::stream! {
            yield Ok(initial);
            while let Some(update) = rx.recv().await {
                yield update;
            }
        }
        .boxed()
    }
}

// =============================================================================
// Search index
// =============================================================================

#[derive(Default)]
struct SearchState {
    records: HashMap<String, Vec<SearchHit>>,
    latencies: HashMap<String, Duration>,
    queries: Vec<String>,
    fail: bool,
}

/// Search index over `username` attributes with per-query latency.
#[derive(Default)]
pub struct FakeSearchIndex {
    state: Mutex<SearchState>,
}

impl FakeSearchIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record with the given `username` to `index`.
    pub fn add_username(&self, index: &str, username: &str) {
        let mut attributes = Map::new();
        attributes.insert("username".to_owned(), Value::String(username.to_owned()));
        lock(&self.state)
            .records
            .entry(index.to_owned())
            .or_default()
            .push(SearchHit {
                object_id: format!("obj-{username}"),
                attributes,
            });
    }

    /// Delay answers to `query`.
    pub fn set_latency(&self, query: &str, latency: Duration) {
        lock(&self.state)
            .latencies
            .insert(query.to_owned(), latency);
    }

    pub fn fail(&self, fail: bool) {
        lock(&self.state).fail = fail;
    }

    /// Queries received so far, in order.
    #[must_use]
    pub fn queries(&self) -> Vec<String> {
        lock(&self.state).queries.clone()
    }
}

impl SearchIndex for FakeSearchIndex {
    async fn search(&self, index_name: &str, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        let latency = {
            let mut state = lock(&self.state);
            state.queries.push(query.to_owned());
            state.latencies.get(query).copied().unwrap_or_default()
        };
        tokio::time::sleep(latency).await;

        let state = lock(&self.state);
        if state.fail {
            return Err(SearchError::Unavailable("search down".to_owned()));
        }
        let needle = query.to_lowercase();
        let mut hits: Vec<SearchHit> = state
            .records
            .get(index_name)
            .into_iter()
            .flatten()
            .filter(|hit| {
                hit.attribute("username")
                    .is_some_and(|name| name.to_lowercase().starts_with(&needle))
            })
            .cloned()
            .collect();
        // Exact matches rank first, then shorter names.
        hits.sort_by_key(|hit| {
            let name = hit.attribute("username").unwrap_or_default().to_lowercase();
            (name != needle, name.len())
        });
        Ok(hits)
    }
}

// =============================================================================
// Email prompt
// =============================================================================

/// Prompt that returns scripted answers in order, then declines.
#[derive(Default)]
pub struct ScriptedPrompt {
    answers: Mutex<VecDeque<Option<String>>>,
    calls: AtomicUsize,
}

impl ScriptedPrompt {
    /// A prompt that always declines.
    #[must_use]
    pub fn declining() -> Self {
        Self::default()
    }

    /// A prompt whose first answer is `email`.
    #[must_use]
    pub fn answering(email: &str) -> Self {
        Self {
            answers: Mutex::new(VecDeque::from([Some(email.to_owned())])),
            calls: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EmailPrompt for ScriptedPrompt {
    fn prompt_for_email(&self, _message: &str) -> Option<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.answers).pop_front().flatten()
    }
}
