// Usage snapshot models for each supported provider
pub mod antigravity;
pub mod copilot;
pub mod zai;

// Re-export common types
pub use antigravity::{AntigravityUsage, ModelQuota};
pub use copilot::{CopilotUsage, QuotaSnapshot};
pub use zai::{ZaiLimit, ZaiUsage};
