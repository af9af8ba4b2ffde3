//! Client state shared by every front end.

use std::sync::Arc;
use std::time::Duration;

use packup_core::{DisplayName, Email, Profile, Trip, Username};
use tokio::sync::watch;
use tracing::{info, instrument};
use url::Url;

use crate::algolia::AlgoliaClient;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::firebase::{FirestoreClient, IdentityToolkitClient};
use crate::providers::{
    DocumentStore, EmailPrompt, IdentityProvider, LocalStorage, SearchIndex,
};
use crate::services::auth::{CredentialLinkFlow, LinkOutcome};
use crate::services::availability::{Availability, AvailabilityProber};
use crate::services::cache::DocumentCache;
use crate::services::provisioning::{AccountProvisioner, ProvisionedAccount};
use crate::services::session::{SessionObserver, SessionState};
use crate::services::trips;
use crate::storage::FileStorage;

/// Tunables of the flows, independent of which providers back them.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Return URL embedded in sign-in links
    pub return_url: Url,
    /// Search index holding usernames
    pub users_index: String,
    pub username_debounce: Duration,
    /// How long an unobserved cache entry survives
    pub cache_idle: Duration,
}

impl ClientSettings {
    /// Settings with the default debounce (500ms) and idle eviction (5 min).
    #[must_use]
    pub fn new(return_url: Url) -> Self {
        Self {
            return_url,
            users_index: "Users".to_string(),
            username_debounce: Duration::from_millis(500),
            cache_idle: Duration::from_secs(300),
        }
    }
}

impl From<&ClientConfig> for ClientSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            return_url: config.return_url.clone(),
            users_index: config.algolia.users_index.clone(),
            username_debounce: config.username_debounce,
            cache_idle: config.cache_idle,
        }
    }
}

/// Client state shared across views.
///
/// Cheaply cloneable via `Arc`. Defaults to the production providers;
/// tests plug in the fakes from the `testing` module.
pub struct PackupClient<I = IdentityToolkitClient, D = FirestoreClient, S = AlgoliaClient> {
    inner: Arc<PackupClientInner<I, D, S>>,
}

struct PackupClientInner<I, D, S> {
    identity: Arc<I>,
    link_flow: CredentialLinkFlow<I>,
    session: SessionObserver,
    cache: DocumentCache<D>,
    prober: AvailabilityProber<S>,
    provisioner: AccountProvisioner<I, D>,
}

impl<I, D, S> Clone for PackupClient<I, D, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl PackupClient {
    /// Build a client over the real providers.
    ///
    /// Local storage lives in `config.data_dir`; a previously signed-in user
    /// is restored from it.
    ///
    /// # Errors
    ///
    /// Returns an error if local storage cannot be opened or a provider
    /// client fails to build.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let storage: Arc<dyn LocalStorage> = Arc::new(FileStorage::open(&config.data_dir)?);
        let identity = IdentityToolkitClient::new(&config.firebase, Arc::clone(&storage))?;
        let store = FirestoreClient::new(
            &config.firebase,
            Some(identity.clone()),
            config.realtime_poll,
        );
        let search = AlgoliaClient::new(&config.algolia)?;

        Ok(Self::new(
            Arc::new(identity),
            Arc::new(store),
            Arc::new(search),
            storage,
            &ClientSettings::from(config),
        ))
    }
}

impl<I, D, S> PackupClient<I, D, S>
where
    I: IdentityProvider,
    D: DocumentStore,
    S: SearchIndex,
{
    /// Wire the flows over the given providers.
    #[must_use]
    pub fn new(
        identity: Arc<I>,
        store: Arc<D>,
        search: Arc<S>,
        storage: Arc<dyn LocalStorage>,
        settings: &ClientSettings,
    ) -> Self {
        let link_flow = CredentialLinkFlow::new(
            Arc::clone(&identity),
            Arc::clone(&storage),
            settings.return_url.clone(),
        );
        let cache = DocumentCache::new(store, settings.cache_idle);
        let prober = AvailabilityProber::new(
            search,
            settings.users_index.clone(),
            settings.username_debounce,
        );
        let provisioner = AccountProvisioner::new(
            Arc::clone(&identity),
            cache.clone(),
            link_flow.clone(),
            storage,
        );

        Self {
            inner: Arc::new(PackupClientInner {
                identity,
                link_flow,
                session: SessionObserver::new(),
                cache,
                prober,
                provisioner,
            }),
        }
    }

    /// Start observing the provider's session.
    ///
    /// From then on the document cache is cleared whenever the signed-in
    /// identity goes away or changes, including revocations pushed by the
    /// provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the observer was already started.
    pub fn start(&self) -> Result<()> {
        self.inner.session.start(&*self.inner.identity)?;
        tokio::spawn(clear_cache_on_identity_change(
            self.inner.session.watch(),
            self.inner.cache.clone(),
        ));
        Ok(())
    }

    #[must_use]
    pub fn link_flow(&self) -> &CredentialLinkFlow<I> {
        &self.inner.link_flow
    }

    #[must_use]
    pub fn session(&self) -> &SessionObserver {
        &self.inner.session
    }

    #[must_use]
    pub fn cache(&self) -> &DocumentCache<D> {
        &self.inner.cache
    }

    #[must_use]
    pub fn prober(&self) -> &AvailabilityProber<S> {
        &self.inner.prober
    }

    #[must_use]
    pub fn provisioner(&self) -> &AccountProvisioner<I, D> {
        &self.inner.provisioner
    }

    /// Email a sign-in link.
    ///
    /// # Errors
    ///
    /// Returns an error if the email is malformed or the link was not sent.
    pub async fn request_link(&self, raw_email: &str) -> Result<Email> {
        Ok(self.inner.link_flow.request_link(raw_email).await?)
    }

    /// Complete a sign-in if `url` is a sign-in link.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange failed or the user declined to
    /// confirm their email.
    pub async fn complete_link<P>(&self, url: &Url, prompt: &P) -> Result<Option<LinkOutcome>>
    where
        P: EmailPrompt + ?Sized,
    {
        Ok(self.inner.link_flow.complete_link(url, prompt).await?)
    }

    /// Probe a candidate username right away.
    pub async fn check_username(&self, raw: &str) -> Availability {
        self.inner.prober.check_now(raw).await
    }

    /// Create an account and email its first sign-in link.
    ///
    /// The username must have been confirmed available by the prober.
    ///
    /// # Errors
    ///
    /// Returns a validation error for malformed fields,
    /// [`ClientError::UsernameUnavailable`] if the probe did not report the
    /// username available, or the provisioning error.
    #[instrument(skip_all)]
    pub async fn sign_up(
        &self,
        raw_email: &str,
        raw_display_name: &str,
        raw_username: &str,
    ) -> Result<ProvisionedAccount> {
        let email = Email::parse(raw_email)?;
        let display_name = DisplayName::parse(raw_display_name)?;
        let username = Username::parse(raw_username)?;

        if !self.inner.prober.is_available_for(&username) {
            return Err(ClientError::UsernameUnavailable(username.to_string()));
        }

        Ok(self
            .inner
            .provisioner
            .provision(&email, &display_name, &username)
            .await?)
    }

    /// Active trips of the signed-in user.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotSignedIn`] without a session, or the read
    /// error.
    pub async fn trips(&self) -> Result<Vec<Trip>> {
        let session = self.inner.session.current().ok_or(ClientError::NotSignedIn)?;
        Ok(trips::list_trips(&self.inner.cache, &session.identity_id).await?)
    }

    /// Profile of the signed-in user.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotSignedIn`] without a session, or the read
    /// error.
    pub async fn profile(&self) -> Result<Option<Profile>> {
        let session = self.inner.session.current().ok_or(ClientError::NotSignedIn)?;
        Ok(trips::read_profile(&self.inner.cache, &session.identity_id).await?)
    }

    /// Sign out and drop every cached document.
    ///
    /// The provider pushes the signed-out state to the session observer.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider could not sign out.
    #[instrument(skip(self))]
    pub async fn sign_out(&self) -> Result<()> {
        self.inner.identity.sign_out().await?;
        self.inner.cache.clear();
        info!("Signed out");
        Ok(())
    }
}

/// Drop cached documents once the identity they were read for is gone.
///
/// The watch may skip intermediate states, so any signed-out state clears
/// too. Runs until the session observer is dropped.
async fn clear_cache_on_identity_change<D: DocumentStore>(
    mut state: watch::Receiver<SessionState>,
    cache: DocumentCache<D>,
) {
    let mut last = state
        .borrow_and_update()
        .session()
        .map(|session| session.identity_id.clone());
    while state.changed().await.is_ok() {
        let next = {
            let current = state.borrow_and_update();
            if !current.is_resolved() {
                continue;
            }
            current.session().map(|session| session.identity_id.clone())
        };
        let changed = next.is_none() || (last.is_some() && next != last);
        if changed && !cache.is_empty() {
            info!("Identity changed, clearing document cache");
            cache.clear();
        }
        last = next;
    }
}
