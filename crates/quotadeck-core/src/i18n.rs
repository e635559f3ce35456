// Locale detection and the handful of strings the core renders itself
use crate::notifications::Severity;

pub const DEFAULT_LANGUAGE: &str = "en";
pub const SUPPORTED_LANGUAGES: [&str; 3] = ["en", "zh-CN", "ja"];

/// Pick a supported language from the host locale environment
pub fn detect_language() -> String {
    ["LC_ALL", "LC_MESSAGES", "LANG"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|value| !value.is_empty())
        .and_then(|locale| map_locale(&locale))
        .unwrap_or(DEFAULT_LANGUAGE)
        .to_string()
}

/// Map a POSIX or BCP 47 locale ("zh_CN.UTF-8", "ja-JP") to a supported language
pub fn map_locale(locale: &str) -> Option<&'static str> {
    let lang = locale
        .split(['.', '@'])
        .next()
        .unwrap_or_default()
        .split(['_', '-'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();

    match lang.as_str() {
        "en" => Some("en"),
        "zh" => Some("zh-CN"),
        "ja" => Some("ja"),
        _ => None,
    }
}

pub fn alert_title(language: &str, severity: Severity) -> &'static str {
    match (language, severity) {
        ("zh-CN", Severity::Critical) => "配额即将耗尽",
        ("zh-CN", Severity::Urgent) => "配额严重不足",
        ("zh-CN", Severity::Warning) => "配额不足",
        ("ja", Severity::Critical) => "クォータがほぼ枯渇しています",
        ("ja", Severity::Urgent) => "クォータが残りわずかです",
        ("ja", Severity::Warning) => "クォータ残量の警告",
        (_, Severity::Critical) => "Quota almost exhausted",
        (_, Severity::Urgent) => "Quota running low",
        (_, Severity::Warning) => "Quota warning",
    }
}

/// "+N more" line appended when a notification has more items than it lists
pub fn more_items(language: &str, count: usize) -> String {
    match language {
        "zh-CN" => format!("+{} 项更多", count),
        "ja" => format!("他 {} 件", count),
        _ => format!("+{} more", count),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_locale() {
        assert_eq!(map_locale("zh_CN.UTF-8"), Some("zh-CN"));
        assert_eq!(map_locale("ja-JP"), Some("ja"));
        assert_eq!(map_locale("en_US.UTF-8@euro"), Some("en"));
        assert_eq!(map_locale("de_DE"), None);
        assert_eq!(map_locale(""), None);
    }

    #[test]
    fn test_unknown_language_falls_back_to_english() {
        assert_eq!(alert_title("fr", Severity::Urgent), "Quota running low");
        assert_eq!(more_items("fr", 2), "+2 more");
        assert_eq!(more_items("zh-CN", 2), "+2 项更多");
    }
}
