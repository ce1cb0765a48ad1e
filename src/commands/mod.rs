pub mod completions;
pub mod context;
pub mod obtain;
pub mod remove;

pub use completions::CompletionsCommand;
pub use context::ContextCommand;
pub use obtain::ObtainCommand;
pub use remove::RemoveCommand;

use anyhow::{Context as _, Result};

use crate::{
    cache::CredentialCache,
    config::{Context, ContextStore},
    constants::{CACHE_FILE_NAME, LOCK_FILE_NAME},
    profile::ProfileStore,
};

/// Locations of everything rolehop reads and writes, rooted at `~/.config/rolehop`
#[derive(Debug, Clone)]
pub(crate) struct StatePaths {
    contexts: ContextStore,
}

impl StatePaths {
    pub(crate) fn resolve() -> Result<Self> {
        Ok(Self {
            contexts: ContextStore::default_location()?,
        })
    }

    pub(crate) fn contexts(&self) -> &ContextStore {
        &self.contexts
    }

    /// Load `name`, or the active context when none is given
    pub(crate) fn load_context(&self, name: Option<&str>) -> Result<(String, Context)> {
        let name = match name {
            Some(name) => name.to_string(),
            None => self.contexts.active_context()?,
        };
        let context = self
            .contexts
            .load(&name)
            .with_context(|| format!("Failed to load context '{name}'"))?;
        Ok((name, context))
    }

    pub(crate) fn cache(&self) -> CredentialCache {
        let dir = self.contexts.dir();
        CredentialCache::new(dir.join(CACHE_FILE_NAME)).with_lock(dir.join(LOCK_FILE_NAME))
    }

    pub(crate) fn profiles(&self) -> Result<ProfileStore> {
        let store = ProfileStore::default_location().context("Failed to determine home directory")?;
        Ok(store.with_lock(self.contexts.dir().join(LOCK_FILE_NAME)))
    }
}
