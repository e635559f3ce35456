// Provider collaborators - the HTTP side of each service lives behind this trait
pub mod usage;

pub use usage::{AccountUsage, QuotaItem, UsageSnapshot};

use crate::models::{Account, OAuthToken, ProviderId};
use crate::Result;
use async_trait::async_trait;

/// Result of an interactive login flow
#[derive(Debug, Clone, Default)]
pub struct LoginOutcome {
    pub success: bool,
    pub account: Option<Account>,
    pub error: Option<String>,
}

impl LoginOutcome {
    pub fn succeeded(account: Account) -> Self {
        Self {
            success: true,
            account: Some(account),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            account: None,
            error: Some(error.into()),
        }
    }
}

/// One quota service as seen by the refresh cycle
///
/// Implementations own the network calls. The core only relies on the
/// contract: `fetch_usage` may fail, `refresh_token` returns None when the
/// refresh token is definitively rejected.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UsageProvider: Send + Sync {
    fn provider(&self) -> ProviderId;

    async fn fetch_usage(&self, account: &Account) -> Result<UsageSnapshot>;

    async fn refresh_token(&self, refresh_token: &str) -> Option<OAuthToken>;

    /// Interactive login, for OAuth-style providers
    async fn login(&self) -> LoginOutcome {
        LoginOutcome::failed(format!(
            "{} does not support interactive login",
            self.provider().label()
        ))
    }

    /// Check a bare credential (API key providers) before it is stored
    async fn validate_credential(&self, _account: &Account) -> Result<bool> {
        Ok(true)
    }
}
