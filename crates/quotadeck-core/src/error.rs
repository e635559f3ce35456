use crate::models::ProviderId;
use thiserror::Error;

/// Everything that can go wrong in quotadeck
///
/// Crypto failures are deliberately coarse: a wrong password and a tampered
/// file both surface as `AuthenticationFailed`.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Encrypted payload is malformed: {0}")]
    MalformedBlob(String),

    #[error("Authentication failed: wrong password or corrupted data")]
    AuthenticationFailed,

    #[error("Credential store is locked")]
    NotUnlocked,

    #[error("No password has been set up yet")]
    PasswordNotSet,

    #[error("A password is already set up")]
    PasswordAlreadySet,

    #[error("Encryption failed: {0}")]
    CryptoError(String),

    #[error("Failed to load stored credentials: {0}")]
    StorageLoadFailed(String),

    #[error("Usage fetch failed for {provider} account {account_id}: {message}")]
    ProviderFetchFailed {
        provider: ProviderId,
        account_id: String,
        message: String,
    },

    #[error("Token refresh failed for {provider} account {account_id}")]
    ProviderRefreshFailed {
        provider: ProviderId,
        account_id: String,
    },

    #[error("Account belongs to {actual}, not {expected}")]
    ProviderMismatch {
        expected: ProviderId,
        actual: ProviderId,
    },

    #[error("No provider registered for {0}")]
    ProviderNotRegistered(ProviderId),

    #[error("Login failed: {0}")]
    LoginFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
