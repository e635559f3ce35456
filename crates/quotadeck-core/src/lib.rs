// Core of the quota dashboard: encrypted account storage, threshold alerts
// and the refresh cycle that ties them to the provider collaborators
pub mod config;
pub mod crypto;
pub mod error;
pub mod i18n;
pub mod models;
pub mod notifications;
pub mod providers;
pub mod refresh;
pub mod store;

pub use config::Config;
pub use crypto::{Cipher, EncryptedBlob};
pub use error::Error;
pub use models::{Account, AccountUpdate, ProviderId, Settings, SettingsUpdate, StorageDocument};
pub use notifications::{AlertSink, NotificationService, Severity, ThresholdAlert, ThresholdEngine};
pub use providers::{AccountUsage, LoginOutcome, UsageProvider, UsageSnapshot};
pub use refresh::{RefreshOrchestrator, RefreshReport};
pub use store::CredentialStore;

/// Result type alias because typing Result<T, Error> everywhere is tedious
pub type Result<T> = std::result::Result<T, Error>;
