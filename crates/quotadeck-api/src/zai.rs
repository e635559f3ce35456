use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ZaiUsage {
    #[serde(default)]
    pub limits: Vec<ZaiLimit>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ZaiLimit {
    /// "TOKENS_LIMIT" or "TIME_LIMIT"
    #[serde(rename = "type")]
    pub kind: String,
    /// Consumed share of the limit, 0 - 100
    #[serde(default)]
    pub percentage: f64,
    #[serde(default)]
    pub usage: Option<f64>,
    #[serde(default)]
    pub current_value: Option<f64>,
    #[serde(default)]
    pub remaining: Option<f64>,
    /// Unix millis
    #[serde(default)]
    pub next_reset_time: Option<i64>,
}

impl ZaiLimit {
    /// The API reports consumption; thresholds work on what is left
    pub fn remaining_percentage(&self) -> f64 {
        100.0 - self.percentage
    }

    pub fn label(&self) -> &str {
        match self.kind.as_str() {
            "TOKENS_LIMIT" => "Tokens",
            "TIME_LIMIT" => "Tool calls",
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining_is_inverted() {
        let limit = ZaiLimit {
            kind: "TOKENS_LIMIT".to_string(),
            percentage: 93.0,
            usage: None,
            current_value: None,
            remaining: None,
            next_reset_time: None,
        };
        assert_eq!(limit.remaining_percentage(), 7.0);
        assert_eq!(limit.label(), "Tokens");
    }

    #[test]
    fn test_parse_limits() {
        let json = r#"{"limits": [
            {"type": "TIME_LIMIT", "usage": 1000, "currentValue": 120, "remaining": 880, "percentage": 12},
            {"type": "TOKENS_LIMIT", "percentage": 40, "nextResetTime": 1767225600000}
        ]}"#;

        let usage: ZaiUsage = serde_json::from_str(json).unwrap();
        assert_eq!(usage.limits.len(), 2);
        assert_eq!(usage.limits[0].remaining_percentage(), 88.0);
        assert_eq!(usage.limits[1].next_reset_time, Some(1_767_225_600_000));
    }
}
