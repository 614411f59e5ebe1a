use derive_more::Display;
use serde::{Deserialize, Serialize};

/// The code host a provider talks to.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[display("github")]
    Github,
    #[display("gitlab")]
    Gitlab,
    #[display("shopware")]
    Shopware,
    /// Packages uploaded directly to the repository.
    #[display("custom")]
    Custom,
}

/// One configured source of packages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique name; also the `{provider-name}` segment of the webhook route.
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ProviderKind,
    /// API host for self-hosted instances. Empty means the public service.
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub token: String,
    /// Shared secret (GitLab) or HMAC key (GitHub) for incoming webhooks.
    /// Empty disables validation.
    #[serde(default)]
    pub webhook_secret: String,
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub fetch_all_on_start: bool,
    /// Cron expression for periodic full resyncs. Scheduling happens outside
    /// the library.
    #[serde(default)]
    pub cron_schedule: Option<String>,
}

/// A tracked repository, `owner/name` or a GitLab namespace path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
}
