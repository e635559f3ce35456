use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use tracing::warn;

/// Current schema version of the stored document
pub const CURRENT_VERSION: u32 = 2;

/// Supported quota providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProviderId {
    Antigravity,
    GithubCopilot,
    ZaiCoding,
}

impl ProviderId {
    pub fn all() -> [ProviderId; 3] {
        [
            ProviderId::Antigravity,
            ProviderId::GithubCopilot,
            ProviderId::ZaiCoding,
        ]
    }

    /// Key used for the collection in the stored document and in card ids
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Antigravity => "antigravity",
            ProviderId::GithubCopilot => "githubCopilot",
            ProviderId::ZaiCoding => "zaiCoding",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProviderId::Antigravity => "Antigravity",
            ProviderId::GithubCopilot => "GitHub Copilot",
            ProviderId::ZaiCoding => "Z.ai Coding",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ProviderId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "antigravity" => Ok(ProviderId::Antigravity),
            "githubcopilot" | "copilot" | "github-copilot" => Ok(ProviderId::GithubCopilot),
            "zaicoding" | "zai" | "zai-coding" => Ok(ProviderId::ZaiCoding),
            other => Err(format!("unknown provider: {}", other)),
        }
    }
}

/// OAuth token triple shared by the OAuth-backed providers
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthToken {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    /// Unix millis
    #[serde(default)]
    pub expires_at: i64,
}

impl OAuthToken {
    /// True if the token expires within `lookahead_ms` of `now_ms`
    pub fn expires_within(&self, now_ms: i64, lookahead_ms: i64) -> bool {
        now_ms > self.expires_at - lookahead_ms
    }
}

impl fmt::Debug for OAuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthToken")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AntigravityAccount {
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub display_name: String,
    #[serde(default = "default_true")]
    pub show_in_overview: bool,
    #[serde(flatten)]
    pub token: OAuthToken,
    #[serde(default)]
    pub project_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GithubCopilotAccount {
    pub id: String,
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub display_name: String,
    #[serde(default = "default_true")]
    pub show_in_overview: bool,
    #[serde(flatten)]
    pub token: OAuthToken,
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZaiAccount {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub display_name: String,
    #[serde(default = "default_true")]
    pub show_in_overview: bool,
    #[serde(default)]
    pub api_key: String,
}

impl ZaiAccount {
    /// Fresh account with a generated id. A blank name shows as the provider label.
    pub fn new(name: &str, api_key: &str) -> Self {
        let name = name.trim();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: (!name.is_empty()).then(|| name.to_string()),
            display_name: if name.is_empty() {
                ProviderId::ZaiCoding.label().to_string()
            } else {
                name.to_string()
            },
            show_in_overview: true,
            api_key: api_key.trim().to_string(),
        }
    }
}

impl fmt::Debug for ZaiAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZaiAccount")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("display_name", &self.display_name)
            .field("show_in_overview", &self.show_in_overview)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// An account of any provider
#[derive(Debug, Clone, PartialEq)]
pub enum Account {
    Antigravity(AntigravityAccount),
    GithubCopilot(GithubCopilotAccount),
    Zai(ZaiAccount),
}

impl Account {
    pub fn provider(&self) -> ProviderId {
        match self {
            Account::Antigravity(_) => ProviderId::Antigravity,
            Account::GithubCopilot(_) => ProviderId::GithubCopilot,
            Account::Zai(_) => ProviderId::ZaiCoding,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Account::Antigravity(a) => &a.id,
            Account::GithubCopilot(a) => &a.id,
            Account::Zai(a) => &a.id,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            Account::Antigravity(a) => &a.display_name,
            Account::GithubCopilot(a) => &a.display_name,
            Account::Zai(a) => &a.display_name,
        }
    }

    pub fn show_in_overview(&self) -> bool {
        match self {
            Account::Antigravity(a) => a.show_in_overview,
            Account::GithubCopilot(a) => a.show_in_overview,
            Account::Zai(a) => a.show_in_overview,
        }
    }

    /// OAuth credential, if this provider uses one
    pub fn oauth_token(&self) -> Option<&OAuthToken> {
        match self {
            Account::Antigravity(a) => Some(&a.token),
            Account::GithubCopilot(a) => Some(&a.token),
            Account::Zai(_) => None,
        }
    }

    pub fn set_oauth_token(&mut self, token: OAuthToken) {
        match self {
            Account::Antigravity(a) => a.token = token,
            Account::GithubCopilot(a) => a.token = token,
            Account::Zai(_) => {}
        }
    }

    /// Shallow-merge the set fields of `update` into this account
    pub fn apply(&mut self, update: &AccountUpdate) {
        let (display_name, show_in_overview) = match self {
            Account::Antigravity(a) => (&mut a.display_name, &mut a.show_in_overview),
            Account::GithubCopilot(a) => (&mut a.display_name, &mut a.show_in_overview),
            Account::Zai(a) => (&mut a.display_name, &mut a.show_in_overview),
        };
        if let Some(name) = &update.display_name {
            *display_name = name.clone();
        }
        if let Some(show) = update.show_in_overview {
            *show_in_overview = show;
        }

        if let Some(token) = &update.token {
            self.set_oauth_token(token.clone());
        }
        if let (Account::Zai(a), Some(key)) = (&mut *self, &update.api_key) {
            a.api_key = key.clone();
        }
    }
}

/// Partial account update. Unset fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct AccountUpdate {
    pub display_name: Option<String>,
    pub show_in_overview: Option<bool>,
    pub token: Option<OAuthToken>,
    pub api_key: Option<String>,
}

/// The three provider collections
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Accounts {
    #[serde(default, deserialize_with = "lenient_list")]
    pub antigravity: Vec<AntigravityAccount>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub github_copilot: Vec<GithubCopilotAccount>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub zai_coding: Vec<ZaiAccount>,
}

/// Decode a collection entry by entry. Unreadable entries are skipped so one
/// bad account cannot hide the rest.
fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let serde_json::Value::Array(entries) = serde_json::Value::deserialize(deserializer)? else {
        warn!("Account collection is not a list, treating it as empty");
        return Ok(Vec::new());
    };

    let accounts = entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match serde_json::from_value(entry) {
            Ok(account) => Some(account),
            Err(e) => {
                warn!("Skipping unreadable account at index {}: {}", index, e);
                None
            }
        })
        .collect();
    Ok(accounts)
}

impl Accounts {
    pub fn list(&self, provider: ProviderId) -> Vec<Account> {
        match provider {
            ProviderId::Antigravity => {
                self.antigravity.iter().cloned().map(Account::Antigravity).collect()
            }
            ProviderId::GithubCopilot => self
                .github_copilot
                .iter()
                .cloned()
                .map(Account::GithubCopilot)
                .collect(),
            ProviderId::ZaiCoding => self.zai_coding.iter().cloned().map(Account::Zai).collect(),
        }
    }

    /// Replace the account with the same id, or append it
    pub fn upsert(&mut self, account: Account) {
        fn upsert_into<T>(list: &mut Vec<T>, item: T, same: impl Fn(&T) -> bool) {
            match list.iter_mut().find(|existing| same(existing)) {
                Some(slot) => *slot = item,
                None => list.push(item),
            }
        }

        match account {
            Account::Antigravity(a) => {
                let id = a.id.clone();
                upsert_into(&mut self.antigravity, a, |x| x.id == id)
            }
            Account::GithubCopilot(a) => {
                let id = a.id.clone();
                upsert_into(&mut self.github_copilot, a, |x| x.id == id)
            }
            Account::Zai(a) => {
                let id = a.id.clone();
                upsert_into(&mut self.zai_coding, a, |x| x.id == id)
            }
        }
    }

    /// Drop the account with this id. Returns whether anything was removed.
    pub fn remove(&mut self, provider: ProviderId, id: &str) -> bool {
        let before = self.len(provider);
        match provider {
            ProviderId::Antigravity => self.antigravity.retain(|a| a.id != id),
            ProviderId::GithubCopilot => self.github_copilot.retain(|a| a.id != id),
            ProviderId::ZaiCoding => self.zai_coding.retain(|a| a.id != id),
        }
        before != self.len(provider)
    }

    /// Merge `update` into the account with this id. Returns false if there is none.
    pub fn update(&mut self, provider: ProviderId, id: &str, update: &AccountUpdate) -> bool {
        let Some(mut account) = self.list(provider).into_iter().find(|a| a.id() == id) else {
            return false;
        };
        account.apply(update);
        self.upsert(account);
        true
    }

    pub fn len(&self, provider: ProviderId) -> usize {
        match provider {
            ProviderId::Antigravity => self.antigravity.len(),
            ProviderId::GithubCopilot => self.github_copilot.len(),
            ProviderId::ZaiCoding => self.zai_coding.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        ProviderId::all().iter().all(|p| self.len(*p) == 0)
    }
}

/// A quota level that should raise an alert when crossed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationThreshold {
    /// Remaining percentage, 0 - 100
    pub value: f64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl NotificationThreshold {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            enabled: true,
            name: None,
        }
    }
}

/// User settings, stored encrypted with the accounts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Seconds between background refreshes
    pub refresh_interval: u64,
    pub background_refresh: bool,
    pub notification_thresholds: Vec<NotificationThreshold>,
    pub notifications: bool,
    pub language: String,
    pub close_to_tray: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            refresh_interval: 300,
            background_refresh: true,
            notification_thresholds: vec![
                NotificationThreshold::new(25.0),
                NotificationThreshold::new(10.0),
                NotificationThreshold::new(5.0),
            ],
            notifications: true,
            language: crate::i18n::DEFAULT_LANGUAGE.to_string(),
            close_to_tray: true,
        }
    }
}

impl Settings {
    /// Enabled threshold values, most lenient first
    pub fn enabled_thresholds(&self) -> Vec<f64> {
        let mut values: Vec<f64> = self
            .notification_thresholds
            .iter()
            .filter(|t| t.enabled)
            .map(|t| t.value)
            .collect();
        values.sort_by(|a, b| b.total_cmp(a));
        values.dedup();
        values
    }

    pub fn apply(&mut self, update: SettingsUpdate) {
        if let Some(v) = update.refresh_interval {
            self.refresh_interval = v;
        }
        if let Some(v) = update.background_refresh {
            self.background_refresh = v;
        }
        if let Some(v) = update.notification_thresholds {
            self.notification_thresholds = v;
        }
        if let Some(v) = update.notifications {
            self.notifications = v;
        }
        if let Some(v) = update.language {
            self.language = v;
        }
        if let Some(v) = update.close_to_tray {
            self.close_to_tray = v;
        }
    }
}

/// Partial settings update
#[derive(Debug, Clone, Default)]
pub struct SettingsUpdate {
    pub refresh_interval: Option<u64>,
    pub background_refresh: Option<bool>,
    pub notification_thresholds: Option<Vec<NotificationThreshold>>,
    pub notifications: Option<bool>,
    pub language: Option<String>,
    pub close_to_tray: Option<bool>,
}

impl SettingsUpdate {
    pub fn touches_thresholds(&self) -> bool {
        self.notification_thresholds.is_some()
    }

    pub fn touches_refresh_timer(&self) -> bool {
        self.refresh_interval.is_some() || self.background_refresh.is_some()
    }
}

/// Layout state owned by the dashboard; stored wholesale
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomizationState {
    pub provider_order: Vec<ProviderId>,
    pub card_order: Vec<String>,
    pub hidden_card_ids: Vec<String>,
    pub hide_unlimited_quota: bool,
}

/// Which quota cards the user has hidden from view
#[derive(Debug, Clone, Default)]
pub struct DisplayFilters {
    pub hidden_card_ids: Vec<String>,
    pub hide_unlimited_quota: bool,
}

impl From<&CustomizationState> for DisplayFilters {
    fn from(state: &CustomizationState) -> Self {
        Self {
            hidden_card_ids: state.hidden_card_ids.clone(),
            hide_unlimited_quota: state.hide_unlimited_quota,
        }
    }
}

/// Decrypted content of `credentials.enc`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageDocument {
    #[serde(rename = "_version")]
    pub version: u32,
    #[serde(flatten)]
    pub accounts: Accounts,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customization: Option<CustomizationState>,
}

impl StorageDocument {
    /// Fresh document at the current schema version
    pub fn new(language: &str) -> Self {
        Self {
            version: CURRENT_VERSION,
            accounts: Accounts::default(),
            settings: Settings {
                language: language.to_string(),
                ..Settings::default()
            },
            customization: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zai(id: &str, name: &str) -> Account {
        Account::Zai(ZaiAccount {
            id: id.to_string(),
            name: None,
            display_name: name.to_string(),
            show_in_overview: true,
            api_key: "key".to_string(),
        })
    }

    #[test]
    fn test_upsert_replaces_by_id() {
        let mut accounts = Accounts::default();
        accounts.upsert(zai("1", "first"));
        accounts.upsert(zai("2", "second"));
        accounts.upsert(zai("1", "renamed"));

        let list = accounts.list(ProviderId::ZaiCoding);
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].display_name(), "renamed");
        assert_eq!(list[1].display_name(), "second");
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let mut accounts = Accounts::default();
        accounts.upsert(zai("1", "first"));
        assert!(!accounts.remove(ProviderId::ZaiCoding, "nope"));
        assert!(accounts.remove(ProviderId::ZaiCoding, "1"));
        assert!(accounts.is_empty());
    }

    #[test]
    fn test_update_merges_only_set_fields() {
        let mut accounts = Accounts::default();
        accounts.upsert(zai("1", "first"));

        let update = AccountUpdate {
            show_in_overview: Some(false),
            ..Default::default()
        };
        assert!(accounts.update(ProviderId::ZaiCoding, "1", &update));
        assert!(!accounts.update(ProviderId::ZaiCoding, "2", &update));

        let account = &accounts.list(ProviderId::ZaiCoding)[0];
        assert_eq!(account.display_name(), "first");
        assert!(!account.show_in_overview());
    }

    #[test]
    fn test_enabled_thresholds_sorted_descending() {
        let settings = Settings {
            notification_thresholds: vec![
                NotificationThreshold::new(5.0),
                NotificationThreshold::new(25.0),
                NotificationThreshold {
                    value: 50.0,
                    enabled: false,
                    name: Some("half".to_string()),
                },
                NotificationThreshold::new(10.0),
            ],
            ..Settings::default()
        };
        assert_eq!(settings.enabled_thresholds(), vec![25.0, 10.0, 5.0]);
    }

    #[test]
    fn test_token_expiry_window() {
        let token = OAuthToken {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_at: 1_000_000,
        };
        let five_minutes = 5 * 60 * 1000;
        assert!(!token.expires_within(1_000_000 - five_minutes - 1, five_minutes));
        assert!(token.expires_within(1_000_000 - five_minutes + 1, five_minutes));
        assert!(!format!("{:?}", token).contains("\"a\""));
    }

    #[test]
    fn test_document_layout() {
        let mut doc = StorageDocument::new("en");
        doc.accounts.upsert(zai("z1", "Work"));

        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["_version"], CURRENT_VERSION);
        assert_eq!(json["zaiCoding"][0]["displayName"], "Work");
        assert_eq!(json["settings"]["refreshInterval"], 300);
        assert!(json.get("customization").is_none());

        let back: StorageDocument = serde_json::from_value(json).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn test_unreadable_accounts_are_skipped() {
        let json = serde_json::json!({
            "_version": 2,
            "antigravity": {"not": "a list"},
            "zaiCoding": [
                {"id": "good", "displayName": "Work", "apiKey": "k"},
                {"displayName": "no id"},
                7,
                {"id": "keyless"}
            ]
        });

        let doc: StorageDocument = serde_json::from_value(json).unwrap();
        assert!(doc.accounts.antigravity.is_empty());
        let ids: Vec<&str> = doc.accounts.zai_coding.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["good", "keyless"]);
        assert_eq!(doc.accounts.zai_coding[1].api_key, "");
    }
}
