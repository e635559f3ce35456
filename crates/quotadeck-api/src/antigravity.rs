use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Quota state of an Antigravity (Google) account, one entry per model
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AntigravityUsage {
    #[serde(default)]
    pub models: Vec<ModelQuota>,
    /// Subscription tier reported by the account, if any
    #[serde(default)]
    pub tier: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelQuota {
    /// Model identifier, e.g. "gemini-3-pro-high"
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Remaining share of the quota window, 0.0 - 1.0
    #[serde(default)]
    pub remaining_fraction: f64,
    #[serde(default)]
    pub reset_time: Option<DateTime<Utc>>,
}

impl ModelQuota {
    /// Remaining quota as a whole percentage
    pub fn remaining_percentage(&self) -> f64 {
        (self.remaining_fraction * 100.0).round()
    }

    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining_percentage_rounds() {
        let quota = ModelQuota {
            name: "gemini-3-pro-high".to_string(),
            display_name: None,
            remaining_fraction: 0.084,
            reset_time: None,
        };
        assert_eq!(quota.remaining_percentage(), 8.0);

        let quota = ModelQuota {
            remaining_fraction: 0.226,
            ..quota
        };
        assert_eq!(quota.remaining_percentage(), 23.0);
    }

    #[test]
    fn test_parse_usage_payload() {
        let json = r#"{
            "models": [
                {"name": "claude-sonnet-4-5", "displayName": "Claude Sonnet 4.5", "remainingFraction": 0.5,
                 "resetTime": "2026-01-01T00:00:00Z"},
                {"name": "gemini-3-flash"}
            ]
        }"#;

        let usage: AntigravityUsage = serde_json::from_str(json).unwrap();
        assert_eq!(usage.models.len(), 2);
        assert_eq!(usage.models[0].label(), "Claude Sonnet 4.5");
        assert_eq!(usage.models[0].remaining_percentage(), 50.0);
        // Missing fraction means the quota is exhausted
        assert_eq!(usage.models[1].label(), "gemini-3-flash");
        assert_eq!(usage.models[1].remaining_percentage(), 0.0);
        assert!(usage.tier.is_none());
    }
}
