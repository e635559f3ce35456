use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// GitHub Copilot entitlement info as returned by the copilot user endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CopilotUsage {
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub copilot_plan: Option<String>,
    /// Date the monthly quota resets (YYYY-MM-DD)
    #[serde(default)]
    pub quota_reset_date: Option<String>,
    /// Keyed by quota id: "chat", "completions", "premium_interactions"
    #[serde(default)]
    pub quota_snapshots: BTreeMap<String, QuotaSnapshot>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QuotaSnapshot {
    #[serde(default)]
    pub entitlement: f64,
    #[serde(default)]
    pub remaining: f64,
    /// Precomputed by GitHub, already a remaining percentage
    #[serde(default)]
    pub percent_remaining: f64,
    #[serde(default)]
    pub unlimited: bool,
    #[serde(default)]
    pub quota_id: Option<String>,
}

/// Human readable name for a quota snapshot key
pub fn quota_label(key: &str) -> String {
    match key {
        "chat" => "Chat".to_string(),
        "completions" => "Completions".to_string(),
        "premium_interactions" => "Premium requests".to_string(),
        other => other.replace('_', " "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_copilot_user_payload() {
        let json = r#"{
            "login": "octocat",
            "copilot_plan": "individual",
            "quota_reset_date": "2026-11-01",
            "quota_snapshots": {
                "chat": {"entitlement": 0, "remaining": 0, "percent_remaining": 100.0, "unlimited": true, "quota_id": "chat"},
                "premium_interactions": {"entitlement": 300, "remaining": 24, "percent_remaining": 8.0, "unlimited": false, "quota_id": "premium_interactions"}
            }
        }"#;

        let usage: CopilotUsage = serde_json::from_str(json).unwrap();
        assert_eq!(usage.login.as_deref(), Some("octocat"));
        assert!(usage.quota_snapshots["chat"].unlimited);
        assert_eq!(usage.quota_snapshots["premium_interactions"].percent_remaining, 8.0);
    }

    #[test]
    fn test_quota_label() {
        assert_eq!(quota_label("premium_interactions"), "Premium requests");
        assert_eq!(quota_label("code_review"), "code review");
    }
}
