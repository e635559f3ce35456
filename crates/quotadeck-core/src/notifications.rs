//! Low-quota alerts.
//!
//! `ThresholdEngine` tracks, per quota item, the tier of the last reading and
//! decides whether a new reading deserves an alert. The rules:
//! - a flat reading inside an already reported tier stays quiet
//! - dropping into a more severe tier alerts
//! - recovering above every threshold clears the item, so a later drop alerts again
//!
//! `NotificationService` runs the engine over a whole refresh batch and turns
//! the result into at most one notification per severity.

use crate::i18n;
use crate::models::{DisplayFilters, ProviderId, Settings};
use crate::providers::AccountUsage;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// Items listed verbatim in a notification body
pub const MAX_LISTED_ITEMS: usize = 3;

/// Alert level, most severe first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Urgent,
    Warning,
}

impl Severity {
    /// The lowest configured threshold is critical, the next one urgent,
    /// anything above is a warning
    pub fn for_threshold(threshold: f64, thresholds: &[f64]) -> Self {
        let mut ascending = thresholds.to_vec();
        ascending.sort_by(|a, b| a.total_cmp(b));
        ascending.dedup();

        match ascending.iter().position(|t| *t == threshold) {
            Some(0) => Severity::Critical,
            Some(1) => Severity::Urgent,
            _ => Severity::Warning,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Urgent => "urgent",
            Severity::Warning => "warning",
        }
    }
}

/// What the engine remembers about one quota item
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ItemNotificationState {
    /// Tier of the latest reading, None when above every threshold
    pub last_notified_threshold: Option<f64>,
    pub last_percentage: f64,
}

impl Default for ItemNotificationState {
    fn default() -> Self {
        Self {
            last_notified_threshold: None,
            last_percentage: 100.0,
        }
    }
}

/// The tier a reading falls into: the smallest threshold it is at or below
pub fn tier_for(percentage: f64, thresholds: &[f64]) -> Option<f64> {
    thresholds
        .iter()
        .copied()
        .filter(|t| percentage <= *t)
        .min_by(|a, b| a.total_cmp(b))
}

/// Per-item crossing state, in memory only
#[derive(Debug, Default)]
pub struct ThresholdEngine {
    states: HashMap<String, ItemNotificationState>,
}

impl ThresholdEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reading and return the threshold to alert at, if any
    pub fn check_threshold_crossing(
        &mut self,
        item_id: &str,
        current_percentage: f64,
        thresholds: &[f64],
    ) -> Option<f64> {
        let previous = self.states.get(item_id).copied().unwrap_or_default();
        let current_threshold = tier_for(current_percentage, thresholds);

        self.states.insert(
            item_id.to_string(),
            ItemNotificationState {
                last_notified_threshold: current_threshold,
                last_percentage: current_percentage,
            },
        );

        let current = current_threshold?;
        let notify = match previous.last_notified_threshold {
            None => true,
            Some(last) if current < last => true,
            Some(_) => previous.last_percentage > current && current_percentage <= current,
        };

        if notify {
            debug!(
                item_id,
                threshold = current,
                percentage = current_percentage,
                "Threshold crossed"
            );
            Some(current)
        } else {
            None
        }
    }

    /// Forget everything, e.g. after the thresholds were edited
    pub fn reset_state(&mut self) {
        self.states.clear();
    }

    pub fn reset_item_state(&mut self, item_id: &str) {
        self.states.remove(item_id);
    }

    pub fn state(&self, item_id: &str) -> Option<ItemNotificationState> {
        self.states.get(item_id).copied()
    }

    pub fn states(&self) -> HashMap<String, ItemNotificationState> {
        self.states.clone()
    }
}

/// A quota item that crossed into an alerting tier
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LowQuotaItem {
    pub provider: ProviderId,
    pub account_name: String,
    pub item_name: String,
    pub percentage: f64,
    pub severity: Severity,
}

/// One notification, ready for display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdAlert {
    pub severity: Severity,
    pub title: String,
    pub body: String,
    pub items: Vec<LowQuotaItem>,
}

/// Display side of notifications
pub trait AlertSink: Send + Sync {
    /// Show one native notification
    fn show(&self, alert: &ThresholdAlert);
    /// Bring the main window forward on the overview
    fn navigate_to_overview(&self);
}

/// Stable id of a quota card: `provider-accountId-itemKey`
pub fn card_id(provider: ProviderId, account_id: &str, item_key: &str) -> String {
    format!("{}-{}-{}", provider.as_str(), account_id, item_key)
}

/// "12" for whole numbers, "12.5" otherwise
pub fn format_percentage(percentage: f64) -> String {
    if percentage.fract() == 0.0 {
        format!("{:.0}", percentage)
    } else {
        format!("{:.1}", percentage)
    }
}

pub struct NotificationService {
    engine: Mutex<ThresholdEngine>,
    sink: Arc<dyn AlertSink>,
}

impl NotificationService {
    pub fn new(sink: Arc<dyn AlertSink>) -> Self {
        Self {
            engine: Mutex::new(ThresholdEngine::new()),
            sink,
        }
    }

    /// Run a refresh batch through the engine and show the resulting alerts
    pub fn check_and_notify(
        &self,
        usage: &[AccountUsage],
        settings: &Settings,
        filters: &DisplayFilters,
    ) -> Vec<ThresholdAlert> {
        if !settings.notifications {
            return Vec::new();
        }
        let thresholds = settings.enabled_thresholds();
        if thresholds.is_empty() {
            return Vec::new();
        }

        let mut buckets: BTreeMap<Severity, Vec<LowQuotaItem>> = BTreeMap::new();
        {
            let mut engine = self.engine();
            for account in usage {
                let Some(snapshot) = &account.usage else {
                    continue;
                };

                for item in snapshot.quota_items() {
                    let id = card_id(account.provider, &account.account_id, &item.key);
                    if filters.hidden_card_ids.contains(&id) {
                        continue;
                    }
                    // Unlimited items are hidden by the filter; Copilot's never alert
                    let skip_unlimited = filters.hide_unlimited_quota
                        || account.provider == ProviderId::GithubCopilot;
                    if item.unlimited && skip_unlimited {
                        continue;
                    }

                    if let Some(threshold) =
                        engine.check_threshold_crossing(&id, item.percentage, &thresholds)
                    {
                        let severity = Severity::for_threshold(threshold, &thresholds);
                        buckets.entry(severity).or_default().push(LowQuotaItem {
                            provider: account.provider,
                            account_name: account.account_name.clone(),
                            item_name: item.name,
                            percentage: item.percentage,
                            severity,
                        });
                    }
                }
            }
        }

        let alerts: Vec<ThresholdAlert> = buckets
            .into_iter()
            .map(|(severity, items)| build_alert(&settings.language, severity, items))
            .collect();

        for alert in &alerts {
            info!(
                severity = alert.severity.as_str(),
                items = alert.items.len(),
                "Showing quota alert"
            );
            self.sink.show(alert);
        }
        alerts
    }

    /// The user clicked a notification
    pub fn handle_click(&self) {
        self.sink.navigate_to_overview();
    }

    pub fn reset_state(&self) {
        self.engine().reset_state();
        info!("Notification state reset");
    }

    pub fn reset_item_state(&self, item_id: &str) {
        self.engine().reset_item_state(item_id);
    }

    pub fn item_state(&self, item_id: &str) -> Option<ItemNotificationState> {
        self.engine().state(item_id)
    }

    fn engine(&self) -> MutexGuard<'_, ThresholdEngine> {
        // The engine holds no invariants a panicking holder could break
        self.engine.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn build_alert(language: &str, severity: Severity, items: Vec<LowQuotaItem>) -> ThresholdAlert {
    let mut lines: Vec<String> = items
        .iter()
        .take(MAX_LISTED_ITEMS)
        .map(|item| {
            format!(
                "{} ({}): {}%",
                item.item_name,
                item.account_name,
                format_percentage(item.percentage)
            )
        })
        .collect();

    if items.len() > MAX_LISTED_ITEMS {
        lines.push(i18n::more_items(language, items.len() - MAX_LISTED_ITEMS));
    }

    ThresholdAlert {
        severity,
        title: i18n::alert_title(language, severity).to_string(),
        body: lines.join("\n"),
        items,
    }
}
