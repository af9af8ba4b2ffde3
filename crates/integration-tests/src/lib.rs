//! Integration tests for Packup.
//!
//! The whole client stack runs over the in-memory providers from
//! `packup_client::testing`, so no network or credentials are needed.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p packup-integration-tests
//! ```
//!
//! # Test Categories
//!
//! - `signin_flow` - link request, completion, single use, route guards
//! - `signup_flow` - username probe, provisioning, orphaned accounts
//! - `document_sync` - cache sharing, optimistic writes, realtime pushes

use std::sync::Arc;

use packup_client::PackupClient;
use packup_client::providers::LocalStorage;
use packup_client::services::session::SessionState;
use packup_client::state::ClientSettings;
use packup_client::storage::MemoryStorage;
use packup_client::testing::{
    FakeDocumentStore, FakeIdentityProvider, FakeSearchIndex, ScriptedPrompt,
};
use packup_core::Session;
use url::Url;

/// Client wired to the in-memory providers.
pub type TestClient = PackupClient<FakeIdentityProvider, FakeDocumentStore, FakeSearchIndex>;

/// Return URL every test link points at.
pub const RETURN_URL: &str = "https://packup.example.net/signin";

/// A client plus handles on its providers.
pub struct TestContext {
    pub client: TestClient,
    pub identity: Arc<FakeIdentityProvider>,
    pub store: Arc<FakeDocumentStore>,
    pub search: Arc<FakeSearchIndex>,
    pub storage: Arc<MemoryStorage>,
}

impl TestContext {
    /// Fresh providers, one device.
    #[must_use]
    pub fn new() -> Self {
        Self::with_providers(
            Arc::new(FakeIdentityProvider::new()),
            Arc::new(FakeDocumentStore::new()),
        )
    }

    /// A second device of the same user.
    ///
    /// Storage, cache and session are separate; the identity provider and
    /// document store are shared.
    #[must_use]
    pub fn other_device(&self) -> Self {
        Self::with_providers(Arc::clone(&self.identity), Arc::clone(&self.store))
    }

    fn with_providers(identity: Arc<FakeIdentityProvider>, store: Arc<FakeDocumentStore>) -> Self {
        let search = Arc::new(FakeSearchIndex::new());
        let storage = Arc::new(MemoryStorage::new());
        let client = build(&identity, &store, &search, &storage);
        Self {
            client,
            identity,
            store,
            search,
            storage,
        }
    }
}

impl TestContext {
    /// Register `email`, then sign in through an emailed link on this
    /// device. Returns the published session.
    ///
    /// The client must have been started.
    ///
    /// # Panics
    ///
    /// Panics if any step of the flow fails.
    #[allow(clippy::unwrap_used)]
    pub async fn sign_in(&self, email: &str) -> Session {
        if self.identity.account(email).is_none() {
            let _ = self.identity.register(email);
        }
        self.client.request_link(email).await.unwrap();
        let link = self.identity.last_link_for(email).unwrap();
        self.client
            .complete_link(&link, &ScriptedPrompt::declining())
            .await
            .unwrap()
            .unwrap();
        self.session().await
    }

    /// Wait until the session observer publishes a signed-in session.
    ///
    /// # Panics
    ///
    /// Panics if the observer stops first.
    pub async fn session(&self) -> Session {
        let mut subscription = self.client.session().subscribe();
        if let SessionState::SignedIn(session) = subscription.initial() {
            return session.clone();
        }
        loop {
            match subscription.changed().await {
                Some(Some(session)) => return session,
                Some(None) => {}
                None => panic!("session observer stopped"),
            }
        }
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

fn build(
    identity: &Arc<FakeIdentityProvider>,
    store: &Arc<FakeDocumentStore>,
    search: &Arc<FakeSearchIndex>,
    storage: &Arc<MemoryStorage>,
) -> TestClient {
    let Ok(return_url) = Url::parse(RETURN_URL) else {
        unreachable!("RETURN_URL is a valid URL");
    };
    PackupClient::new(
        Arc::clone(identity),
        Arc::clone(store),
        Arc::clone(search),
        Arc::clone(storage) as Arc<dyn LocalStorage>,
        &ClientSettings::new(return_url),
    )
}
