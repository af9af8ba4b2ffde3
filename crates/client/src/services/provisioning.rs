//! Account provisioning for new users.
//!
//! An identity is created with a random password nobody ever sees, its
//! profile document is written under the identity id, and a sign-in link is
//! emailed so the user finishes through the normal link flow. The identity
//! and the profile are two remote writes with no transaction between them:
//! when the second fails the account is orphaned. The orphan is reported and
//! remembered on this device, so submitting the sign-up form again with the
//! same email writes the missing profile instead of creating a second
//! identity. [`AccountProvisioner::repair_profile`] repairs one directly.

use std::sync::Arc;

use chrono::Utc;
use packup_core::{AuthUser, DisplayName, DocumentId, Email, IdentityId, Profile, Username};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::providers::{
    DocumentStore, IdentityError, IdentityProvider, LocalStorage, read_json, write_json,
};
use crate::services::auth::{
    CredentialLinkFlow, DEFAULT_PASSWORD_LENGTH, LinkError, PasswordError, generate_password,
};
use crate::services::cache::{CacheError, DocumentCache};
use crate::telemetry::add_breadcrumb;

/// Errors from account provisioning.
#[derive(Debug, Error)]
pub enum ProvisioningError {
    /// The identity could not be created; nothing was written.
    #[error("failed to create identity: {0}")]
    Identity(#[from] IdentityError),

    /// The identity exists but has no profile.
    #[error("identity {identity_id} was created without a profile: {source}")]
    OrphanedAccount {
        identity_id: IdentityId,
        email: Email,
        #[source]
        source: CacheError,
    },

    /// The account is complete but the sign-in link was not sent.
    #[error("account created but the sign-in link could not be sent: {0}")]
    LinkDispatch(#[source] LinkError),

    #[error(transparent)]
    Password(#[from] PasswordError),
}

/// Local storage key of an identity still missing its profile.
pub const ORPHANED_ACCOUNT_KEY: &str = "orphanedAccount";

/// An identity created on this device whose profile write failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct OrphanedIdentity {
    identity: AuthUser,
    email: Email,
}

/// A freshly created account.
#[derive(Debug, Clone)]
pub struct ProvisionedAccount {
    pub identity: AuthUser,
    pub profile: Profile,
}

/// Creates identities together with their profile documents.
pub struct AccountProvisioner<I, D> {
    identity: Arc<I>,
    cache: DocumentCache<D>,
    link_flow: CredentialLinkFlow<I>,
    storage: Arc<dyn LocalStorage>,
}

impl<I: IdentityProvider, D: DocumentStore> AccountProvisioner<I, D> {
    #[must_use]
    pub fn new(
        identity: Arc<I>,
        cache: DocumentCache<D>,
        link_flow: CredentialLinkFlow<I>,
        storage: Arc<dyn LocalStorage>,
    ) -> Self {
        Self {
            identity,
            cache,
            link_flow,
            storage,
        }
    }

    /// Create the identity and its profile, then email a sign-in link.
    ///
    /// If an earlier attempt for `email` on this device left an orphaned
    /// identity, that identity is reused and only the profile is written.
    ///
    /// # Errors
    ///
    /// - [`ProvisioningError::Identity`] if the provider refused the identity
    ///   (e.g. the email is already registered).
    /// - [`ProvisioningError::OrphanedAccount`] if the profile write failed
    ///   after the identity was created. This is captured to Sentry here.
    /// - [`ProvisioningError::LinkDispatch`] if only the link failed.
    #[instrument(skip(self, display_name, username), fields(email = %email))]
    pub async fn provision(
        &self,
        email: &Email,
        display_name: &DisplayName,
        username: &Username,
    ) -> Result<ProvisionedAccount, ProvisioningError> {
        let orphan = self.orphan_for(email);
        let resumed = orphan.is_some();
        let identity = match orphan {
            Some(identity) => {
                info!(identity_id = %identity.uid, "Resuming orphaned identity");
                identity
            }
            None => self.create_identity(email).await?,
        };

        let profile = match self
            .write_profile(&identity.uid, email, display_name, username)
            .await
        {
            Ok(profile) => profile,
            Err(err) => {
                self.remember_orphan(&identity, email);
                return Err(err);
            }
        };
        if resumed {
            self.forget_orphan();
        }

        self.link_flow
            .request_link(email.as_str())
            .await
            .map_err(ProvisioningError::LinkDispatch)?;

        Ok(ProvisionedAccount { identity, profile })
    }

    async fn create_identity(&self, email: &Email) -> Result<AuthUser, ProvisioningError> {
        let password = generate_password(DEFAULT_PASSWORD_LENGTH)?;
        let identity = self.identity.create_identity(email, &password).await?;
        info!(identity_id = %identity.uid, "Identity created");
        add_breadcrumb(
            "auth",
            "identity created",
            Some(&[("identity_id", identity.uid.as_str())]),
        );
        Ok(identity)
    }

    /// Orphaned identity recorded on this device for `email`.
    fn orphan_for(&self, email: &Email) -> Option<AuthUser> {
        match read_json::<OrphanedIdentity, _>(&*self.storage, ORPHANED_ACCOUNT_KEY) {
            Ok(orphan) => orphan
                .filter(|orphan| orphan.email == *email)
                .map(|orphan| orphan.identity),
            Err(err) => {
                warn!(error = %err, "Failed to read orphaned identity");
                None
            }
        }
    }

    fn remember_orphan(&self, identity: &AuthUser, email: &Email) {
        let orphan = OrphanedIdentity {
            identity: identity.clone(),
            email: email.clone(),
        };
        if let Err(err) = write_json(&*self.storage, ORPHANED_ACCOUNT_KEY, &orphan) {
            warn!(error = %err, "Failed to remember orphaned identity");
        }
    }

    fn forget_orphan(&self) {
        if let Err(err) = self.storage.remove(ORPHANED_ACCOUNT_KEY) {
            warn!(error = %err, "Failed to clear orphaned identity");
        }
    }

    /// Write the missing profile of an orphaned identity.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisioningError::OrphanedAccount`] if the write fails again.
    #[instrument(skip(self, display_name, username), fields(identity_id = %identity_id))]
    pub async fn repair_profile(
        &self,
        identity_id: &IdentityId,
        email: &Email,
        display_name: &DisplayName,
        username: &Username,
    ) -> Result<Profile, ProvisioningError> {
        let profile = self
            .write_profile(identity_id, email, display_name, username)
            .await?;
        if self.orphan_for(email).is_some() {
            self.forget_orphan();
        }
        info!("Orphaned identity repaired");
        Ok(profile)
    }

    async fn write_profile(
        &self,
        identity_id: &IdentityId,
        email: &Email,
        display_name: &DisplayName,
        username: &Username,
    ) -> Result<Profile, ProvisioningError> {
        let profile = Profile::new(
            identity_id.clone(),
            email.clone(),
            display_name,
            username,
            Utc::now(),
        );

        match self
            .cache
            .create_record(Profile::COLLECTION, &DocumentId::from(identity_id), &profile)
            .await
        {
            Ok(_) => Ok(profile),
            Err(source) => {
                let err = ProvisioningError::OrphanedAccount {
                    identity_id: identity_id.clone(),
                    email: email.clone(),
                    source,
                };
                error!(identity_id = %identity_id, error = %err, "Profile creation failed");
                sentry::capture_error(&err);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use url::Url;

    use super::*;
    use crate::providers::LocalStorage;
    use crate::storage::MemoryStorage;
    use crate::testing::{FakeDocumentStore, FakeIdentityProvider};

    struct Harness {
        identity: Arc<FakeIdentityProvider>,
        store: Arc<FakeDocumentStore>,
        link_flow: CredentialLinkFlow<FakeIdentityProvider>,
        provisioner: AccountProvisioner<FakeIdentityProvider, FakeDocumentStore>,
    }

    fn harness() -> Harness {
        let identity = Arc::new(FakeIdentityProvider::new());
        let store = Arc::new(FakeDocumentStore::new());
        let cache = DocumentCache::new(Arc::clone(&store), Duration::from_secs(300));
        let storage: Arc<dyn LocalStorage> = Arc::new(MemoryStorage::new());
        let link_flow = CredentialLinkFlow::new(
            Arc::clone(&identity),
            Arc::clone(&storage),
            Url::parse("https://packup.example.net/signin").unwrap(),
        );
        let provisioner = AccountProvisioner::new(
            Arc::clone(&identity),
            cache,
            link_flow.clone(),
            storage,
        );
        Harness {
            identity,
            store,
            link_flow,
            provisioner,
        }
    }

    fn inputs() -> (Email, DisplayName, Username) {
        (
            Email::parse("grace@example.com").unwrap(),
            DisplayName::parse("Grace Hopper").unwrap(),
            Username::parse("ghopper").unwrap(),
        )
    }

    #[tokio::test]
    async fn test_provision_creates_identity_profile_and_link() {
        let h = harness();
        let (email, name, username) = inputs();

        let account = h.provisioner.provision(&email, &name, &username).await.unwrap();

        let stored = h
            .store
            .document(Profile::COLLECTION, account.identity.uid.as_str())
            .unwrap();
        let profile: Profile = stored.decode().unwrap();
        assert_eq!(profile.uid, account.identity.uid);
        assert_eq!(profile.username, "ghopper");
        assert_eq!(profile.display_name, "Grace Hopper");
        assert!(h.identity.last_link_for("grace@example.com").is_some());
        assert_eq!(h.link_flow.pending().unwrap().unwrap().email, email);
    }

    #[tokio::test]
    async fn test_existing_email_writes_nothing() {
        let h = harness();
        let _ = h.identity.register("grace@example.com");
        let (email, name, username) = inputs();

        let err = h.provisioner.provision(&email, &name, &username).await.unwrap_err();

        assert!(matches!(
            err,
            ProvisioningError::Identity(IdentityError::EmailAlreadyInUse)
        ));
        assert_eq!(h.store.set_calls(), 0);
        assert!(h.identity.outbox().is_empty());
    }

    #[tokio::test]
    async fn test_profile_failure_surfaces_orphaned_account() {
        let h = harness();
        h.store.fail_writes_to(Profile::COLLECTION);
        let (email, name, username) = inputs();

        let err = h.provisioner.provision(&email, &name, &username).await.unwrap_err();

        let ProvisioningError::OrphanedAccount { identity_id, .. } = &err else {
            panic!("expected orphaned account, got {err:?}");
        };
        let account = h.identity.account("grace@example.com").unwrap();
        assert_eq!(identity_id, &account.uid);
        // No link goes out for a half-created account.
        assert!(h.identity.outbox().is_empty());

        h.store.clear_write_failures();
        h.provisioner
            .repair_profile(identity_id, &email, &name, &username)
            .await
            .unwrap();
        assert!(h
            .store
            .document(Profile::COLLECTION, account.uid.as_str())
            .is_some());
    }

    #[tokio::test]
    async fn test_resubmitting_after_orphan_reuses_identity() {
        let h = harness();
        h.store.fail_writes_to(Profile::COLLECTION);
        let (email, name, username) = inputs();
        let err = h.provisioner.provision(&email, &name, &username).await.unwrap_err();
        assert!(matches!(err, ProvisioningError::OrphanedAccount { .. }));
        let orphan = h.identity.account("grace@example.com").unwrap();

        h.store.clear_write_failures();
        let account = h.provisioner.provision(&email, &name, &username).await.unwrap();

        assert_eq!(account.identity.uid, orphan.uid);
        assert!(h
            .store
            .document(Profile::COLLECTION, orphan.uid.as_str())
            .is_some());
        assert!(h.identity.last_link_for("grace@example.com").is_some());

        // The orphan is settled: a third attempt is an ordinary duplicate.
        let err = h.provisioner.provision(&email, &name, &username).await.unwrap_err();
        assert!(matches!(
            err,
            ProvisioningError::Identity(IdentityError::EmailAlreadyInUse)
        ));
    }

    #[tokio::test]
    async fn test_orphan_is_not_reused_for_another_email() {
        let h = harness();
        h.store.fail_writes_to(Profile::COLLECTION);
        let (email, name, username) = inputs();
        h.provisioner.provision(&email, &name, &username).await.unwrap_err();
        h.store.clear_write_failures();

        let other = Email::parse("ada@example.com").unwrap();
        let account = h.provisioner.provision(&other, &name, &username).await.unwrap();

        let orphan = h.identity.account("grace@example.com").unwrap();
        assert_ne!(account.identity.uid, orphan.uid);
    }

    #[tokio::test]
    async fn test_link_failure_keeps_account() {
        let h = harness();
        h.identity.fail_link_requests(true);
        let (email, name, username) = inputs();

        let err = h.provisioner.provision(&email, &name, &username).await.unwrap_err();

        assert!(matches!(err, ProvisioningError::LinkDispatch(_)));
        let account = h.identity.account("grace@example.com").unwrap();
        assert!(h
            .store
            .document(Profile::COLLECTION, account.uid.as_str())
            .is_some());
    }
}
