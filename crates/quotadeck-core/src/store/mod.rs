//! Encrypted credential store.
//!
//! Two files live in the data directory:
//! - `auth.json`: plaintext password record (salt + hash). It gates everything
//!   else, so it cannot itself be encrypted.
//! - `credentials.enc`: the whole `StorageDocument`, encrypted under the password.
//!
//! The store starts locked. Unlocking decrypts the document once and caches it;
//! every mutation then runs read-modify-write-persist under a single mutex, so
//! concurrent callers never lose each other's updates.

pub mod backend;
pub mod migrations;

pub use backend::{FileBackend, StorageBackend};

use crate::crypto::{self, Cipher};
use crate::i18n;
use crate::models::{
    Account, AccountUpdate, CustomizationState, ProviderId, Settings, SettingsUpdate,
    StorageDocument,
};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

pub const AUTH_FILE: &str = "auth.json";
pub const CREDENTIALS_FILE: &str = "credentials.enc";

/// Stands in for the password when the user opts out of setting one.
///
/// This key ships with the program, so anyone who has it can decrypt a store
/// created in this mode. It only keeps tokens from being readable at a glance.
pub const SKIP_PASSWORD_KEY: &str = "quotadeck-no-password-mode-v1";

/// Contents of `auth.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PasswordRecord {
    /// Hex-encoded salt
    pub salt: String,
    /// Hex-encoded KDF output
    pub hash: String,
    #[serde(default)]
    pub skipped: bool,
}

impl PasswordRecord {
    fn create(cipher: &Cipher, password: &str, skipped: bool) -> Self {
        let salt = crypto::generate_salt();
        Self {
            salt: hex::encode(salt),
            hash: cipher.hash_password(password, &salt),
            skipped,
        }
    }

    fn matches(&self, cipher: &Cipher, password: &str) -> bool {
        cipher.verify_password(password, &self.hash, &self.salt)
    }
}

enum Session {
    Locked,
    Unlocked {
        password: Zeroizing<String>,
        document: StorageDocument,
    },
}

struct Inner {
    session: Session,
    last_load_error: Option<String>,
}

pub struct CredentialStore {
    backend: Arc<dyn StorageBackend>,
    cipher: Cipher,
    inner: Mutex<Inner>,
}

impl CredentialStore {
    /// Store backed by files in `data_dir`
    pub fn open(data_dir: impl Into<PathBuf>) -> Self {
        Self::with_backend(Arc::new(FileBackend::new(data_dir)), Cipher::new())
    }

    pub fn with_backend(backend: Arc<dyn StorageBackend>, cipher: Cipher) -> Self {
        Self {
            backend,
            cipher,
            inner: Mutex::new(Inner {
                session: Session::Locked,
                last_load_error: None,
            }),
        }
    }

    /// Whether a password record exists on disk
    pub async fn has_password(&self) -> Result<bool> {
        self.backend.exists(AUTH_FILE).await
    }

    /// Whether the user chose to run without a password
    pub async fn is_password_skipped(&self) -> Result<bool> {
        Ok(self
            .read_password_record()
            .await?
            .map(|record| record.skipped)
            .unwrap_or(false))
    }

    pub async fn is_unlocked(&self) -> bool {
        matches!(self.inner.lock().await.session, Session::Unlocked { .. })
    }

    /// Why the most recent unlock had to fall back to an empty document, if it did
    pub async fn last_load_error(&self) -> Option<String> {
        self.inner.lock().await.last_load_error.clone()
    }

    /// Create a new password record and unlock with it. Fails with
    /// `PasswordAlreadySet` if a record exists; use `change_password` instead.
    pub async fn set_password(&self, password: &str) -> Result<()> {
        self.create_record_and_unlock(password, false).await
    }

    /// Run without a password: the fixed key stands in for one
    pub async fn skip_password(&self) -> Result<()> {
        self.create_record_and_unlock(SKIP_PASSWORD_KEY, true).await
    }

    /// Check a password against the stored record. Does not unlock.
    pub async fn verify_password(&self, password: &str) -> Result<bool> {
        match self.read_password_record().await? {
            Some(record) => Ok(record.matches(&self.cipher, password)),
            None => {
                debug!("No password record to verify against");
                Ok(false)
            }
        }
    }

    /// Decrypt the stored document with `password` and cache it
    pub async fn unlock(&self, password: &str) -> Result<()> {
        let record = self
            .read_password_record()
            .await?
            .ok_or(Error::PasswordNotSet)?;

        if !record.matches(&self.cipher, password) {
            warn!("Unlock rejected: password does not match");
            return Err(Error::AuthenticationFailed);
        }

        let mut inner = self.inner.lock().await;
        self.load_into(&mut inner, password).await;
        Ok(())
    }

    /// Unlock a store that was set up without a password
    pub async fn unlock_skipped(&self) -> Result<()> {
        if !self.is_password_skipped().await? {
            return Err(Error::AuthenticationFailed);
        }
        self.unlock(SKIP_PASSWORD_KEY).await
    }

    /// Unlock and report only success, so a wrong password and a damaged
    /// store look the same to the user
    pub async fn try_unlock(&self, password: &str) -> bool {
        match self.unlock(password).await {
            Ok(()) => true,
            Err(e) => {
                debug!("Unlock failed: {}", e);
                false
            }
        }
    }

    /// Forget the password and the cached document
    pub async fn lock(&self) {
        let mut inner = self.inner.lock().await;
        inner.session = Session::Locked;
        info!("Credential store locked");
    }

    /// Re-encrypt everything under `new_password`
    ///
    /// If persisting fails the store keeps working with `old_password`, both in
    /// memory and on disk.
    pub async fn change_password(&self, old_password: &str, new_password: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let Session::Unlocked { password, document } = &mut inner.session else {
            return Err(Error::NotUnlocked);
        };

        let record = self
            .read_password_record()
            .await?
            .ok_or(Error::PasswordNotSet)?;
        if !record.matches(&self.cipher, old_password) {
            return Err(Error::AuthenticationFailed);
        }

        let new_record = PasswordRecord::create(&self.cipher, new_password, false);

        // Document first: if this fails nothing on disk has changed
        self.persist(document, new_password).await?;

        if let Err(e) = self.write_password_record(&new_record).await {
            error!("Password record write failed, restoring previous encryption: {}", e);
            if let Err(restore) = self.persist(document, old_password).await {
                error!("Could not restore document under previous password: {}", restore);
            }
            return Err(e);
        }

        *password = Zeroizing::new(new_password.to_string());
        info!("Password changed");
        Ok(())
    }

    pub async fn get_accounts(&self, provider: ProviderId) -> Result<Vec<Account>> {
        self.read(|doc| doc.accounts.list(provider)).await
    }

    /// Insert or replace (by id) an account
    pub async fn save_account(&self, provider: ProviderId, account: Account) -> Result<()> {
        if account.provider() != provider {
            return Err(Error::ProviderMismatch {
                expected: provider,
                actual: account.provider(),
            });
        }
        debug!(provider = %provider, account_id = account.id(), "Saving account");
        self.mutate(|doc| doc.accounts.upsert(account)).await
    }

    /// Remove an account. Unknown ids are not an error.
    pub async fn delete_account(&self, provider: ProviderId, id: &str) -> Result<()> {
        self.mutate(|doc| {
            if !doc.accounts.remove(provider, id) {
                debug!(provider = %provider, account_id = id, "Delete of unknown account ignored");
            }
        })
        .await
    }

    /// Merge `update` into an existing account. Returns false if there is no such account.
    pub async fn update_account(
        &self,
        provider: ProviderId,
        id: &str,
        update: AccountUpdate,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let Session::Unlocked { password, document } = &mut inner.session else {
            return Err(Error::NotUnlocked);
        };

        let mut next = document.clone();
        if !next.accounts.update(provider, id, &update) {
            return Ok(false);
        }
        self.persist(&next, password).await?;
        *document = next;
        Ok(true)
    }

    pub async fn get_settings(&self) -> Result<Settings> {
        self.read(|doc| doc.settings.clone()).await
    }

    /// Shallow-merge `update` into the settings and return the result
    pub async fn save_settings(&self, update: SettingsUpdate) -> Result<Settings> {
        let mut merged = None;
        self.mutate(|doc| {
            doc.settings.apply(update);
            merged = Some(doc.settings.clone());
        })
        .await?;
        merged.ok_or(Error::NotUnlocked)
    }

    pub async fn get_customization(&self) -> Result<Option<CustomizationState>> {
        self.read(|doc| doc.customization.clone()).await
    }

    /// Replace the customization state wholesale
    pub async fn save_customization(&self, state: CustomizationState) -> Result<()> {
        self.mutate(|doc| doc.customization = Some(state)).await
    }

    /// Copy of the whole cached document
    pub async fn document(&self) -> Result<StorageDocument> {
        self.read(|doc| doc.clone()).await
    }

    async fn read<T>(&self, f: impl FnOnce(&StorageDocument) -> T) -> Result<T> {
        let inner = self.inner.lock().await;
        match &inner.session {
            Session::Unlocked { document, .. } => Ok(f(document)),
            Session::Locked => Err(Error::NotUnlocked),
        }
    }

    /// Apply `f` to a copy, persist it, then swap it in. A failed write leaves
    /// the cache as it was.
    async fn mutate(&self, f: impl FnOnce(&mut StorageDocument)) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let Session::Unlocked { password, document } = &mut inner.session else {
            return Err(Error::NotUnlocked);
        };

        let mut next = document.clone();
        f(&mut next);
        self.persist(&next, password).await?;
        *document = next;
        Ok(())
    }

    async fn create_record_and_unlock(&self, password: &str, skipped: bool) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if self.read_password_record().await?.is_some() {
            warn!("Refusing to replace the existing password record");
            return Err(Error::PasswordAlreadySet);
        }

        let record = PasswordRecord::create(&self.cipher, password, skipped);
        self.write_password_record(&record).await?;
        info!(skipped, "Password record created");

        self.load_into(&mut inner, password).await;
        Ok(())
    }

    /// Load the document into the session. Never fails: a document that cannot
    /// be read is replaced in memory by a fresh one, and the file on disk is
    /// left alone until the next explicit save.
    async fn load_into(&self, inner: &mut Inner, password: &str) {
        let (document, load_error) = match self.load_document(password).await {
            Ok(document) => (document, None),
            Err(e) => {
                error!("Stored credentials could not be loaded, using an empty document: {}", e);
                (
                    StorageDocument::new(&i18n::detect_language()),
                    Some(e.to_string()),
                )
            }
        };

        inner.session = Session::Unlocked {
            password: Zeroizing::new(password.to_string()),
            document,
        };
        inner.last_load_error = load_error;
        info!("Credential store unlocked");
    }

    async fn load_document(&self, password: &str) -> Result<StorageDocument> {
        let Some(raw) = self
            .backend
            .read(CREDENTIALS_FILE)
            .await
            .map_err(|e| Error::StorageLoadFailed(e.to_string()))?
        else {
            info!("No stored credentials yet, starting a new document");
            return Ok(StorageDocument::new(&i18n::detect_language()));
        };

        let plaintext = self
            .cipher
            .decrypt(&raw, password)
            .map_err(|e| Error::StorageLoadFailed(e.to_string()))?;

        let value: serde_json::Value = serde_json::from_slice(&plaintext)
            .map_err(|e| Error::StorageLoadFailed(e.to_string()))?;

        let from_version = migrations::document_version(&value);
        let migrated = migrations::run_migrations(value);
        let document: StorageDocument = serde_json::from_value(migrated)
            .map_err(|e| Error::StorageLoadFailed(e.to_string()))?;

        if document.version != from_version {
            info!("Persisting document migrated from v{} to v{}", from_version, document.version);
            if let Err(e) = self.persist(&document, password).await {
                warn!("Could not persist migrated document, will retry on next load: {}", e);
            }
        }

        Ok(document)
    }

    async fn persist(&self, document: &StorageDocument, password: &str) -> Result<()> {
        let json = serde_json::to_vec(document)?;
        let blob = self.cipher.encrypt(&json, password)?;
        self.backend.write(CREDENTIALS_FILE, &blob).await
    }

    async fn read_password_record(&self) -> Result<Option<PasswordRecord>> {
        match self.backend.read(AUTH_FILE).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn write_password_record(&self, record: &PasswordRecord) -> Result<()> {
        let json = serde_json::to_string_pretty(record)?;
        self.backend.write(AUTH_FILE, &json).await
    }
}
