use comreg_config::{Config, ProviderConfig};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::Provider;
use crate::error::{ErrorKind, Result};

pub type ProviderHandle = Arc<dyn Provider>;

struct Registered {
    provider: ProviderHandle,
    fetch_all_on_start: bool,
}

/// Configured providers, keyed by their configured name.
#[derive(Default)]
pub struct Providers {
    entries: BTreeMap<String, Registered>,
}

impl Providers {
    /// Build every configured provider through `factory`, which dispatches on
    /// [`ProviderConfig::kind`] and owns the host-specific clients.
    ///
    /// The first factory error aborts construction.
    pub fn from_config<F>(config: &Config, mut factory: F) -> Result<Self>
    where
        F: FnMut(&ProviderConfig) -> Result<ProviderHandle>,
    {
        let mut providers = Self::default();
        for provider_config in &config.providers {
            let provider = factory(provider_config)?;
            tracing::debug!(provider = %provider_config.name, kind = %provider_config.kind, "provider registered");
            providers.register(&provider_config.name, provider, provider_config.fetch_all_on_start);
        }
        Ok(providers)
    }

    /// Add (or replace) a provider under `name`.
    pub fn register(&mut self, name: &str, provider: ProviderHandle, fetch_all_on_start: bool) {
        self.entries.insert(name.to_string(), Registered { provider, fetch_all_on_start });
    }

    pub fn get(&self, name: &str) -> Result<&ProviderHandle> {
        match self.entries.get(name) {
            Some(registered) => Ok(&registered.provider),
            None => exn::bail!(ErrorKind::UnknownProvider(name.to_string())),
        }
    }

    /// Every provider, ordered by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ProviderHandle)> {
        self.entries.iter().map(|(name, registered)| (name.as_str(), &registered.provider))
    }

    /// Providers configured to resync as soon as the service starts.
    pub fn fetch_on_start(&self) -> impl Iterator<Item = &ProviderHandle> {
        self.entries.values().filter(|registered| registered.fetch_all_on_start).map(|registered| &registered.provider)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RefProvider;
    use crate::mock::MockSource;
    use comreg_config::ProviderKind;

    fn provider_config(name: &str, kind: ProviderKind, fetch_all_on_start: bool) -> ProviderConfig {
        ProviderConfig {
            name: name.to_string(),
            kind,
            domain: String::new(),
            token: String::new(),
            webhook_secret: String::new(),
            projects: Vec::new(),
            fetch_all_on_start,
            cron_schedule: None,
        }
    }

    fn factory(config: &ProviderConfig) -> Result<ProviderHandle> {
        match config.kind {
            ProviderKind::Github => Ok(Arc::new(RefProvider::new(MockSource::new(&config.name)))),
            other => exn::bail!(ErrorKind::UnsupportedProvider(other.to_string())),
        }
    }

    #[test]
    fn test_from_config() {
        let config = Config {
            providers: vec![
                provider_config("b", ProviderKind::Github, false),
                provider_config("a", ProviderKind::Github, true),
            ],
            ..Config::default()
        };
        let providers = Providers::from_config(&config, factory).unwrap();
        assert_eq!(providers.len(), 2);
        assert_eq!(providers.iter().map(|(name, _)| name).collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(providers.fetch_on_start().map(|p| p.name().to_string()).collect::<Vec<_>>(), ["a"]);
        assert_eq!(providers.get("b").unwrap().name(), "b");
    }

    #[test]
    fn test_factory_error_aborts() {
        let config = Config {
            providers: vec![provider_config("gh", ProviderKind::Github, false), provider_config("sw", ProviderKind::Shopware, false)],
            ..Config::default()
        };
        let err = Providers::from_config(&config, factory).err().unwrap();
        assert_eq!(*err, ErrorKind::UnsupportedProvider("shopware".to_string()));
    }

    #[test]
    fn test_unknown_provider() {
        let err = Providers::default().get("nope").err().unwrap();
        assert_eq!(*err, ErrorKind::UnknownProvider("nope".to_string()));
    }
}
