//! Schema migrations for the decrypted storage document.
//!
//! Each step is a pure function over the raw JSON that takes a document at
//! version N to version N+1. Steps run in order on every load and never fail:
//! data a step cannot make sense of is replaced with defaults.

use crate::models::{ProviderId, CURRENT_VERSION};
use serde_json::{Map, Value};
use tracing::{info, warn};

pub const VERSION_KEY: &str = "_version";

type Migration = fn(Value) -> Value;

/// (source version, step) pairs, in order
const MIGRATIONS: &[(u32, Migration)] = &[(1, migrate_v1_to_v2)];

/// Version of a raw document. Documents predating the field are version 1.
pub fn document_version(doc: &Value) -> u32 {
    doc.get(VERSION_KEY)
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(1)
}

/// Bring a document up to `CURRENT_VERSION`
pub fn run_migrations(doc: Value) -> Value {
    let mut doc = match doc {
        Value::Object(_) => doc,
        other => {
            warn!("Stored document is not an object ({}), starting from empty", type_name(&other));
            Value::Object(Map::new())
        }
    };

    for (from, step) in MIGRATIONS {
        if document_version(&doc) == *from {
            info!("Migrating storage document v{} -> v{}", from, from + 1);
            doc = step(doc);
        }
    }

    if document_version(&doc) > CURRENT_VERSION {
        warn!(
            "Storage document is v{}, newer than supported v{}",
            document_version(&doc),
            CURRENT_VERSION
        );
    }
    doc
}

/// v1 -> v2: every account gets a `displayName`
///
/// The name is taken from the first non-empty of `name` and the provider's
/// identity field (email for Antigravity, login for Copilot). An existing
/// `displayName` is never overwritten.
pub fn migrate_v1_to_v2(mut doc: Value) -> Value {
    if document_version(&doc) >= 2 {
        return doc;
    }
    let Value::Object(root) = &mut doc else {
        return doc;
    };

    for provider in ProviderId::all() {
        let key = provider.as_str();
        let accounts = root
            .entry(key)
            .or_insert_with(|| Value::Array(Vec::new()));

        let Some(list) = accounts.as_array_mut() else {
            warn!("Collection {} is not a list, resetting it", key);
            *accounts = Value::Array(Vec::new());
            continue;
        };

        let before = list.len();
        list.retain(Value::is_object);
        if list.len() != before {
            warn!("Dropped {} malformed {} entries", before - list.len(), key);
        }

        for account in list.iter_mut().filter_map(Value::as_object_mut) {
            if account.get("displayName").is_some_and(Value::is_string) {
                continue;
            }
            let name = derive_display_name(provider, account);
            account.insert("displayName".to_string(), Value::String(name));
        }
    }

    root.insert(VERSION_KEY.to_string(), Value::from(2));
    doc
}

fn derive_display_name(provider: ProviderId, account: &Map<String, Value>) -> String {
    let field = |name: &str| {
        account
            .get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let identity = match provider {
        ProviderId::Antigravity => field("email"),
        ProviderId::GithubCopilot => field("login"),
        ProviderId::ZaiCoding => None,
    };

    field("name")
        .or(identity)
        .or_else(|| field("id"))
        .unwrap_or_else(|| provider.label().to_string())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
