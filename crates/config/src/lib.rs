//! Configuration loading and validation.
//!
//! A [`Config`] is built once from a YAML, TOML or JSON file overlaid with
//! `COMREG_`-prefixed environment variables, validated, and then treated as an
//! immutable snapshot. Runtime reloads go through [`SharedConfig`], which
//! swaps the whole snapshot atomically.
//!
//! ```yaml
//! base_url: https://packages.example.com
//! providers:
//!   - name: github
//!     type: github
//!     token: ghp_xxx
//!     webhook_secret: s3cret
//!     fetch_all_on_start: true
//!     projects:
//!       - name: acme/widget
//! users:
//!   - token: customer-token
//!     rules:
//!       - type: begins_with
//!         value: acme/
//! ```

mod access;
pub mod error;
mod provider;
mod shared;

pub use crate::access::{Rule, RuleKind, User};
pub use crate::provider::{Project, ProviderConfig, ProviderKind};
pub use crate::shared::SharedConfig;

use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::instrument;

use crate::error::{ErrorKind, Result};

/// Prefix of environment variables overriding file values, e.g.
/// `COMREG_BASE_URL`. Nested keys are separated by `__`.
pub const ENV_PREFIX: &str = "COMREG_";
const DEFAULT_BASE_URL: &str = "http://localhost:8080";
const DEFAULT_STORAGE_PATH: &str = "./storage";
const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8080";
const DATABASE_FILE: &str = "index.sqlite";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    /// Empty means the repository is open to everyone.
    #[serde(default)]
    pub users: Vec<User>,
    /// Public URL the repository is served under.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_storage_path() -> PathBuf {
    PathBuf::from(DEFAULT_STORAGE_PATH)
}

fn default_bind_address() -> String {
    DEFAULT_BIND_ADDRESS.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            users: Vec::new(),
            base_url: default_base_url(),
            storage_path: default_storage_path(),
            bind_address: default_bind_address(),
        }
    }
}

impl Config {
    /// Load the file at `path`, overlay the environment, and validate.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config = Self::from_figment(Self::figment(path.as_ref())?)?;
        tracing::info!(
            providers = config.providers.len(),
            users = config.users.len(),
            storage_path = %config.storage_path.display(),
            "configuration loaded",
        );
        Ok(config)
    }

    /// The layered sources for the file at `path`: the file itself, picked
    /// by extension, then the environment.
    pub fn figment(path: &Path) -> Result<Figment> {
        if !path.is_file() {
            exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
        }
        let extension = path.extension().and_then(|ext| ext.to_str()).map(str::to_ascii_lowercase);
        let figment = match extension.as_deref() {
            Some("yml" | "yaml") => Figment::from(Yaml::file(path)),
            Some("toml") => Figment::from(Toml::file(path)),
            Some("json") => Figment::from(Json::file(path)),
            _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
        };
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Extract and validate a configuration from arbitrary sources.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().or_raise(|| ErrorKind::Invalid)?;
        config.validate()?;
        Ok(config)
    }

    /// Where to look for a configuration file when none is given: the
    /// platform configuration directory, e.g. `~/.config/comreg/config.yaml`.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "comreg").map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    /// Location of the SQLite index inside the storage directory.
    pub fn database_path(&self) -> PathBuf {
        self.storage_path.join(DATABASE_FILE)
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|provider| provider.name == name)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for provider in &self.providers {
            if provider.name.is_empty() {
                exn::bail!(ErrorKind::MissingValue("providers[].name"));
            }
            if !seen.insert(provider.name.as_str()) {
                exn::bail!(ErrorKind::DuplicateProvider(provider.name.clone()));
            }
        }
        if self.users.iter().any(|user| user.token.is_empty()) {
            exn::bail!(ErrorKind::MissingValue("users[].token"));
        }
        Ok(())
    }
}
