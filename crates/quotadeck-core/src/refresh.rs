//! Refresh cycle: renew expiring tokens, fetch usage for every account, feed
//! the batch to the notification service. Also owns the background timer.

use crate::models::{
    Account, AccountUpdate, DisplayFilters, OAuthToken, ProviderId, Settings, SettingsUpdate,
    ZaiAccount,
};
use crate::notifications::{NotificationService, ThresholdAlert};
use crate::providers::{AccountUsage, UsageProvider};
use crate::store::CredentialStore;
use crate::{Error, Result};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Tokens expiring within this window are renewed before use
pub const TOKEN_REFRESH_LOOKAHEAD: Duration = Duration::from_secs(5 * 60);

/// Shortest interval the background timer accepts
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Outcome of one refresh cycle
#[derive(Debug, Clone, Default)]
pub struct RefreshReport {
    /// One entry per account, in storage order
    pub results: Vec<AccountUsage>,
    /// Notifications raised by this batch
    pub alerts: Vec<ThresholdAlert>,
}

impl RefreshReport {
    pub fn failures(&self) -> impl Iterator<Item = &AccountUsage> {
        self.results.iter().filter(|r| r.error.is_some())
    }
}

pub struct RefreshOrchestrator {
    store: Arc<CredentialStore>,
    notifications: Arc<NotificationService>,
    providers: HashMap<ProviderId, Arc<dyn UsageProvider>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshOrchestrator {
    pub fn new(store: Arc<CredentialStore>, notifications: Arc<NotificationService>) -> Self {
        Self {
            store,
            notifications,
            providers: HashMap::new(),
            timer: Mutex::new(None),
        }
    }

    /// Register the collaborator for a provider, replacing any previous one
    pub fn with_provider(mut self, provider: Arc<dyn UsageProvider>) -> Self {
        self.providers.insert(provider.provider(), provider);
        self
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn notifications(&self) -> &Arc<NotificationService> {
        &self.notifications
    }

    /// Refresh every account of every registered provider
    pub async fn refresh_all(&self) -> Result<RefreshReport> {
        let mut jobs = Vec::new();
        for provider_id in ProviderId::all() {
            let Some(provider) = self.providers.get(&provider_id) else {
                continue;
            };
            for account in self.store.get_accounts(provider_id).await? {
                jobs.push(self.refresh_account(provider.as_ref(), account));
            }
        }

        let results = join_all(jobs).await;
        self.finish_cycle(results).await
    }

    /// Refresh the accounts of a single provider
    pub async fn refresh_provider(&self, provider_id: ProviderId) -> Result<RefreshReport> {
        let provider = self.provider(provider_id)?;
        let accounts = self.store.get_accounts(provider_id).await?;

        let results = join_all(
            accounts
                .into_iter()
                .map(|account| self.refresh_account(provider.as_ref(), account)),
        )
        .await;
        self.finish_cycle(results).await
    }

    async fn finish_cycle(&self, results: Vec<AccountUsage>) -> Result<RefreshReport> {
        let settings = self.store.get_settings().await?;
        let filters = self
            .store
            .get_customization()
            .await?
            .as_ref()
            .map(DisplayFilters::from)
            .unwrap_or_default();

        let failed = results.iter().filter(|r| r.error.is_some()).count();
        info!(accounts = results.len(), failed, "Refresh cycle finished");

        let alerts = self
            .notifications
            .check_and_notify(&results, &settings, &filters);
        Ok(RefreshReport { results, alerts })
    }

    /// Never fails: every problem ends up in the account's result slot
    async fn refresh_account(
        &self,
        provider: &dyn UsageProvider,
        mut account: Account,
    ) -> AccountUsage {
        let provider_id = account.provider();
        let account_id = account.id().to_string();
        let account_name = account.display_name().to_string();

        let now_ms = chrono::Utc::now().timestamp_millis();
        let lookahead_ms = TOKEN_REFRESH_LOOKAHEAD.as_millis() as i64;
        let expiring = account
            .oauth_token()
            .filter(|token| token.expires_within(now_ms, lookahead_ms))
            .map(|token| token.refresh_token.clone());

        if let Some(refresh_token) = expiring {
            match self.renew_token(provider, &account, &refresh_token).await {
                Ok(token) => account.set_oauth_token(token),
                Err(e) => {
                    warn!(
                        provider = %provider_id,
                        account_id = %account_id,
                        "Skipping account: {}",
                        e
                    );
                    return AccountUsage::failed(
                        provider_id,
                        &account_id,
                        &account_name,
                        e.to_string(),
                    );
                }
            }
        }

        match provider.fetch_usage(&account).await {
            Ok(usage) => {
                debug!(provider = %provider_id, account_id = %account_id, "Usage fetched");
                AccountUsage::ok(provider_id, &account_id, &account_name, usage)
            }
            Err(e) => {
                let e = match e {
                    Error::ProviderFetchFailed { .. } => e,
                    other => Error::ProviderFetchFailed {
                        provider: provider_id,
                        account_id: account_id.clone(),
                        message: other.to_string(),
                    },
                };
                warn!(provider = %provider_id, account_id = %account_id, "{}", e);
                AccountUsage::failed(provider_id, &account_id, &account_name, e.to_string())
            }
        }
    }

    /// Exchange the refresh token and persist the result
    async fn renew_token(
        &self,
        provider: &dyn UsageProvider,
        account: &Account,
        refresh_token: &str,
    ) -> Result<OAuthToken> {
        let provider_id = account.provider();
        let token = provider
            .refresh_token(refresh_token)
            .await
            .ok_or_else(|| Error::ProviderRefreshFailed {
                provider: provider_id,
                account_id: account.id().to_string(),
            })?;

        let update = AccountUpdate {
            token: Some(token.clone()),
            ..Default::default()
        };
        // The fresh token is still good for this cycle even if saving it failed
        match self.store.update_account(provider_id, account.id(), update).await {
            Ok(true) => {
                info!(provider = %provider_id, account_id = account.id(), "Token refreshed")
            }
            Ok(false) => warn!(
                provider = %provider_id,
                account_id = account.id(),
                "Token refreshed for an account that no longer exists"
            ),
            Err(e) => error!(
                provider = %provider_id,
                account_id = account.id(),
                "Failed to persist refreshed token: {}",
                e
            ),
        }
        Ok(token)
    }

    /// Run the provider's login flow and store the account it yields
    pub async fn add_account_via_login(&self, provider_id: ProviderId) -> Result<Account> {
        let provider = self.provider(provider_id)?;
        let outcome = provider.login().await;

        let account = match outcome.account {
            Some(account) if outcome.success => account,
            _ => {
                return Err(Error::LoginFailed(
                    outcome.error.unwrap_or_else(|| "no account returned".to_string()),
                ))
            }
        };

        self.store.save_account(provider_id, account.clone()).await?;
        info!(provider = %provider_id, account_id = account.id(), "Account added via login");
        Ok(account)
    }

    /// Validate a bare API key with the provider, then store it as a new account
    pub async fn add_api_key_account(
        &self,
        provider_id: ProviderId,
        name: &str,
        api_key: &str,
    ) -> Result<Account> {
        if provider_id != ProviderId::ZaiCoding {
            return Err(Error::ProviderMismatch {
                expected: ProviderId::ZaiCoding,
                actual: provider_id,
            });
        }
        let provider = self.provider(provider_id)?;
        let account = Account::Zai(ZaiAccount::new(name, api_key));

        if !provider.validate_credential(&account).await? {
            return Err(Error::LoginFailed("API key was rejected".to_string()));
        }

        self.store.save_account(provider_id, account.clone()).await?;
        info!(provider = %provider_id, account_id = account.id(), "API key account added");
        Ok(account)
    }

    /// Save a settings change and apply its side effects: new thresholds
    /// clear the crossing history, timer settings re-arm the timer
    pub async fn apply_settings_change(
        self: &Arc<Self>,
        update: SettingsUpdate,
    ) -> Result<Settings> {
        let resets_thresholds = update.touches_thresholds();
        let rearms_timer = update.touches_refresh_timer();

        let settings = self.store.save_settings(update).await?;

        if resets_thresholds {
            self.notifications.reset_state();
        }
        if rearms_timer {
            self.sync_timer(&settings);
        }
        Ok(settings)
    }

    /// Arm or disarm the background timer to match `settings`
    pub fn sync_timer(self: &Arc<Self>, settings: &Settings) {
        if settings.background_refresh && settings.refresh_interval > 0 {
            self.start(Duration::from_secs(settings.refresh_interval));
        } else {
            self.stop();
        }
    }

    /// Start the background timer, cancelling any previous one. The first
    /// cycle runs one interval from now.
    pub fn start(self: &Arc<Self>, interval: Duration) {
        let interval = interval.max(MIN_REFRESH_INTERVAL);
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(run_timer(weak, interval));

        if let Some(previous) = self.timer().replace(handle) {
            previous.abort();
        }
        info!(interval_secs = interval.as_secs(), "Background refresh armed");
    }

    /// Cancel the timer. Cycles already running are left to finish.
    pub fn stop(&self) {
        if let Some(handle) = self.timer().take() {
            handle.abort();
            info!("Background refresh stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.timer().as_ref().is_some_and(|handle| !handle.is_finished())
    }

    async fn run_scheduled_cycle(&self) {
        if !self.store.is_unlocked().await {
            debug!("Store is locked, skipping scheduled refresh");
            return;
        }
        if let Err(e) = self.refresh_all().await {
            error!("Scheduled refresh failed: {}", e);
        }
    }

    fn provider(&self, provider_id: ProviderId) -> Result<Arc<dyn UsageProvider>> {
        self.providers
            .get(&provider_id)
            .cloned()
            .ok_or(Error::ProviderNotRegistered(provider_id))
    }

    fn timer(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.timer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for RefreshOrchestrator {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_timer(orchestrator: Weak<RefreshOrchestrator>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(orchestrator) = orchestrator.upgrade() else {
            break;
        };
        // Spawned separately so cancelling the timer never cuts a cycle short
        tokio::spawn(async move { orchestrator.run_scheduled_cycle().await });
    }
}
