use anyhow::{Context as _, Result};
use clap::Args;
use tracing::{debug, info};

use super::StatePaths;
use crate::{
    cache::CredentialCache,
    profile::{ProfileStore, Removed},
};

#[derive(Debug, Clone, Args)]
pub struct RemoveCommand {
    #[arg(help = "Account whose managed profile should be removed")]
    pub account: String,
}

impl RemoveCommand {
    pub fn execute(self) -> Result<()> {
        let state = StatePaths::resolve()?;

        let removed = remove_account(&state.profiles()?, &state.cache(), &self.account)?;
        debug!(
            "Removed from credentials: {}, from config: {}",
            removed.credentials, removed.config
        );

        println!("Profile '{}' removed.", self.account);
        Ok(())
    }
}

/// Forget `account` everywhere. The cache record goes first, so it is dropped even when
/// the profile files hold nothing for the account.
pub(crate) fn remove_account(
    profiles: &ProfileStore,
    cache: &CredentialCache,
    account: &str,
) -> Result<Removed> {
    let dropped = cache
        .remove(account)
        .context("Failed to update the credential cache")?;
    info!("Cache record for '{}' dropped: {}", account, dropped);

    profiles
        .remove(account)
        .with_context(|| format!("Failed to remove profile '{account}'"))
}
