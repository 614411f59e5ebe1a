use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

use crate::Config;
use crate::error::{ErrorKind, Result};

/// The live configuration snapshot.
///
/// Readers take an [`Arc<Config>`] with [`current`](Self::current) and keep
/// using it for as long as they like; a reload never mutates a snapshot in
/// place, it swaps in a new one and notifies [subscribers](Self::subscribe).
/// An invalid replacement is rejected and the current snapshot stays.
#[derive(Debug, Clone)]
pub struct SharedConfig {
    sender: Arc<watch::Sender<Arc<Config>>>,
    source: Option<PathBuf>,
}

impl SharedConfig {
    pub fn new(config: Config) -> Self {
        let (sender, _) = watch::channel(Arc::new(config));
        Self { sender: Arc::new(sender), source: None }
    }

    /// Load `path` and remember it for [`reload`](Self::reload).
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let config = Config::load(&path)?;
        let mut shared = Self::new(config);
        shared.source = Some(path);
        Ok(shared)
    }

    pub fn current(&self) -> Arc<Config> {
        Arc::clone(&self.sender.borrow())
    }

    /// Swap in `config` after validating it.
    pub fn replace(&self, config: Config) -> Result<()> {
        config.validate()?;
        self.sender.send_replace(Arc::new(config));
        tracing::info!("configuration replaced");
        Ok(())
    }

    /// Re-read the file this configuration was loaded from.
    pub fn reload(&self) -> Result<Arc<Config>> {
        let Some(path) = &self.source else {
            exn::bail!(ErrorKind::NoSource);
        };
        let config = Arc::new(Config::load(path)?);
        self.sender.send_replace(Arc::clone(&config));
        Ok(config)
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Config>> {
        self.sender.subscribe()
    }
}
