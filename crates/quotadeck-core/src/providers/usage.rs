use crate::models::ProviderId;
use quotadeck_api::{copilot::quota_label, AntigravityUsage, CopilotUsage, ZaiUsage};
use serde::{Deserialize, Serialize};

/// Latest usage of one account, in the provider's own shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", content = "usage", rename_all = "camelCase")]
pub enum UsageSnapshot {
    Antigravity(AntigravityUsage),
    GithubCopilot(CopilotUsage),
    ZaiCoding(ZaiUsage),
}

/// A single quota line, normalised to a remaining percentage
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaItem {
    /// Stable key within the account, used in card ids
    pub key: String,
    pub name: String,
    /// Remaining quota, 0 - 100
    pub percentage: f64,
    pub unlimited: bool,
}

impl UsageSnapshot {
    pub fn provider(&self) -> ProviderId {
        match self {
            UsageSnapshot::Antigravity(_) => ProviderId::Antigravity,
            UsageSnapshot::GithubCopilot(_) => ProviderId::GithubCopilot,
            UsageSnapshot::ZaiCoding(_) => ProviderId::ZaiCoding,
        }
    }

    /// Every quota item of the snapshot with its remaining percentage
    pub fn quota_items(&self) -> Vec<QuotaItem> {
        match self {
            UsageSnapshot::Antigravity(usage) => usage
                .models
                .iter()
                .map(|model| QuotaItem {
                    key: model.name.clone(),
                    name: model.label().to_string(),
                    percentage: model.remaining_percentage(),
                    unlimited: false,
                })
                .collect(),
            UsageSnapshot::GithubCopilot(usage) => usage
                .quota_snapshots
                .iter()
                .map(|(key, snapshot)| QuotaItem {
                    key: key.clone(),
                    name: quota_label(key),
                    percentage: snapshot.percent_remaining,
                    unlimited: snapshot.unlimited,
                })
                .collect(),
            UsageSnapshot::ZaiCoding(usage) => usage
                .limits
                .iter()
                .map(|limit| QuotaItem {
                    key: limit.kind.clone(),
                    name: limit.label().to_string(),
                    percentage: limit.remaining_percentage(),
                    unlimited: false,
                })
                .collect(),
        }
    }
}

/// Outcome of one account's fetch within a refresh cycle
#[derive(Debug, Clone, PartialEq)]
pub struct AccountUsage {
    pub provider: ProviderId,
    pub account_id: String,
    pub account_name: String,
    pub usage: Option<UsageSnapshot>,
    pub error: Option<String>,
}

impl AccountUsage {
    pub fn ok(
        provider: ProviderId,
        account_id: &str,
        account_name: &str,
        usage: UsageSnapshot,
    ) -> Self {
        Self {
            provider,
            account_id: account_id.to_string(),
            account_name: account_name.to_string(),
            usage: Some(usage),
            error: None,
        }
    }

    pub fn failed(
        provider: ProviderId,
        account_id: &str,
        account_name: &str,
        error: String,
    ) -> Self {
        Self {
            provider,
            account_id: account_id.to_string(),
            account_name: account_name.to_string(),
            usage: None,
            error: Some(error),
        }
    }
}
