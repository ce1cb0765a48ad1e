use std::env;

use anyhow::{Context as _, Result};
use clap::Args;
use tracing::{debug, info};

use super::StatePaths;
use crate::{
    aws::{RoleProvider, StsProvider},
    constants::MFA_PROMPT_TIMEOUT,
    directory::{AccountDirectory, DynamoDbDirectory},
    engine::{Issuance, RoleAssumer},
    mfa::{MfaMode, TerminalPrompt},
    profile::{ConfigFields, CredentialFields, ProfileStore},
};

#[derive(Debug, Clone, Args)]
pub struct ObtainCommand {
    #[arg(help = "Account name as stored in the directory table")]
    pub account: String,

    #[arg(short = 'r', long, help = "Ignore cached credentials and request new ones")]
    pub renew: bool,

    #[arg(
        long = "inline-mfa",
        value_name = "CODE",
        help = "MFA code to use instead of prompting for one"
    )]
    pub inline_mfa: Option<String>,

    #[arg(
        long,
        conflicts_with = "credential_process",
        help = "Print credentials as credential_process JSON (version 1) instead of writing profile files"
    )]
    pub v1: bool,

    #[arg(
        long,
        help = "Write a credential_process entry to the config file instead of static credentials"
    )]
    pub credential_process: bool,
}

/// Where issued credentials end up
pub(crate) enum Destination<'a> {
    /// Handed back to the caller only; no file is touched
    Stdout,
    /// Static credentials in the credentials file plus a config block
    Profile(&'a ProfileStore),
    /// Config block that calls `<executable> obtain <account> --v1`
    CredentialProcess {
        profiles: &'a ProfileStore,
        executable: String,
    },
}

impl ObtainCommand {
    pub async fn execute(self, context_name: Option<&str>) -> Result<()> {
        let state = StatePaths::resolve()?;
        let (name, context) = state.load_context(context_name)?;
        info!("Using context '{}'", name);

        let directory =
            DynamoDbDirectory::from_profile(&context.source_profile, &context.source_profile_region)
                .await;
        let provider =
            StsProvider::from_profile(&context.source_profile, &context.source_profile_region).await;
        let cache = state.cache();
        let prompt = TerminalPrompt::new(MFA_PROMPT_TIMEOUT);
        let mfa = match self.inline_mfa.clone() {
            Some(code) => MfaMode::Inline(code),
            None => MfaMode::Interactive(&prompt),
        };
        let assumer = RoleAssumer::new(&context, &directory, &provider, &cache);

        if self.v1 {
            let issuance =
                obtain_into(&assumer, &self.account, self.renew, &mfa, &Destination::Stdout).await?;
            let json = issuance
                .credentials()
                .to_process_json()
                .context("Failed to encode credentials")?;
            println!("{json}");
            return Ok(());
        }

        let profiles = state.profiles()?;
        let destination = if self.credential_process {
            Destination::CredentialProcess {
                profiles: &profiles,
                executable: current_executable()?,
            }
        } else {
            Destination::Profile(&profiles)
        };
        let issuance = obtain_into(&assumer, &self.account, self.renew, &mfa, &destination).await?;

        if self.credential_process {
            println!("\nProfile '{}' now fetches credentials through rolehop.", self.account);
        } else {
            println!("\nAWS credentials saved to {} profile.", self.account);
        }
        if issuance.is_cached() {
            println!("Reused cached credentials.");
        }
        println!(
            "Credentials will expire at: {}",
            issuance.credentials().expiration_rfc3339()
        );

        Ok(())
    }
}

/// Obtain credentials for `account` and materialize them at `destination`.
///
/// A cached credential still needs the account's region for the config block; the
/// managed block already on disk answers that before the directory is asked.
pub(crate) async fn obtain_into<D, P>(
    assumer: &RoleAssumer<'_, D, P>,
    account: &str,
    renew: bool,
    mfa: &MfaMode<'_>,
    destination: &Destination<'_>,
) -> Result<Issuance>
where
    D: AccountDirectory,
    P: RoleProvider,
{
    let issuance = assumer
        .obtain(account, renew, mfa)
        .await
        .with_context(|| format!("Failed to obtain credentials for '{account}'"))?;

    let profiles = match destination {
        Destination::Stdout => return Ok(issuance),
        Destination::Profile(profiles) => profiles,
        Destination::CredentialProcess { profiles, .. } => profiles,
    };

    let (name, region) = match &issuance {
        Issuance::Issued { account, .. } => {
            (account.name.clone(), account.primary_region().to_string())
        }
        Issuance::Cached(_) => {
            let region = match profiles.managed_region(account)? {
                Some(region) => {
                    debug!("Region for '{}' read from its managed profile", account);
                    region
                }
                None => assumer
                    .resolve(account)
                    .await
                    .with_context(|| format!("Failed to look up '{account}'"))?
                    .primary_region()
                    .to_string(),
            };
            (account.to_string(), region)
        }
    };

    let config = ConfigFields::new(region);
    let written = match destination {
        Destination::CredentialProcess { executable, .. } => {
            let command = format!("{executable} obtain {name} --v1");
            profiles.upsert(&name, None, &config.with_credential_process(command))
        }
        _ => profiles.upsert(
            &name,
            Some(&CredentialFields::from(issuance.credentials())),
            &config,
        ),
    };
    written.context("Failed to write AWS profile")?;

    Ok(issuance)
}

fn current_executable() -> Result<String> {
    let exe = env::current_exe().context("Failed to locate the rolehop executable")?;
    Ok(exe.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::AuthMethod,
        test_support::{FakeDirectory, FakeProvider, account, cache, context, prompt},
    };
    use chrono::{Duration, Utc};
    use std::fs;
    use tempfile::TempDir;

    const USER_CREDENTIALS: &str = "[default]\naws_access_key_id = USERKEY\n";
    const USER_CONFIG: &str = "[default]\nregion = eu-west-3\n";

    fn profiles() -> (TempDir, ProfileStore) {
        let dir = TempDir::new().unwrap();
        let creds = dir.path().join("credentials");
        let config = dir.path().join("config");
        fs::write(&creds, USER_CREDENTIALS).unwrap();
        fs::write(&config, USER_CONFIG).unwrap();
        (dir, ProfileStore::new(creds, config))
    }

    fn read(path: &std::path::Path) -> String {
        fs::read_to_string(path).unwrap()
    }

    #[tokio::test]
    async fn test_payments_scenario_writes_and_renews_profile() {
        let ctx = context(None);
        let directory = FakeDirectory::with(vec![account("payments", &["roleA", "roleB"])]);
        let provider = FakeProvider::default();
        let (_cache_dir, cache) = cache();
        let (_dir, store) = profiles();
        let prompt = prompt();
        let mfa = MfaMode::Interactive(&prompt);
        let assumer = RoleAssumer::new(&ctx, &directory, &provider, &cache);

        obtain_into(&assumer, "payments", false, &mfa, &Destination::Profile(&store))
            .await
            .unwrap();

        let creds = read(store.credentials_path());
        assert!(creds.starts_with(USER_CREDENTIALS));
        assert!(creds.contains("#s-payments\n[payments]\n"));
        assert!(creds.contains("aws_access_key_id = AKIA-roleB"));
        assert!(creds.contains("aws_session_token = token-2"));
        let config = read(store.config_path());
        assert!(config.starts_with(USER_CONFIG));
        assert!(config.contains("#s-payments\n[profile payments]\n"));
        assert!(config.contains("region = eu-west-1"));

        // An older record that renewal has to replace
        let stale_expiry = Utc::now() + Duration::seconds(60);
        let blob = cache.get("payments").unwrap().unwrap();
        cache
            .put("payments", stale_expiry, AuthMethod::MfaInline, blob)
            .unwrap();

        obtain_into(&assumer, "payments", true, &mfa, &Destination::Profile(&store))
            .await
            .unwrap();

        assert_eq!(provider.calls.borrow().len(), 4);
        let creds = read(store.credentials_path());
        assert!(creds.contains("aws_session_token = token-4"));
        assert!(!creds.contains("token-2"));
        assert_eq!(creds.matches("#s-payments").count(), 1);
        assert_eq!(read(store.config_path()).matches("#s-payments").count(), 1);

        let record = cache.record("payments").unwrap().unwrap();
        assert_eq!(record.auth_method, AuthMethod::Chained);
        assert!(record.expires_at > stale_expiry + Duration::seconds(3000));
    }

    #[tokio::test]
    async fn test_cache_hit_reads_region_from_managed_block() {
        let ctx = context(None);
        let directory = FakeDirectory::with(vec![account("billing", &["roleA"])]);
        let provider = FakeProvider::default();
        let (_cache_dir, cache) = cache();
        let (_dir, store) = profiles();
        let prompt = prompt();
        let mfa = MfaMode::Interactive(&prompt);
        let assumer = RoleAssumer::new(&ctx, &directory, &provider, &cache);

        obtain_into(&assumer, "billing", false, &mfa, &Destination::Profile(&store))
            .await
            .unwrap();
        let first = (read(store.credentials_path()), read(store.config_path()));

        let issuance = obtain_into(&assumer, "billing", false, &mfa, &Destination::Profile(&store))
            .await
            .unwrap();

        assert!(issuance.is_cached());
        assert_eq!(directory.lookups.get(), 1);
        assert_eq!(provider.calls.borrow().len(), 1);
        assert_eq!(
            (read(store.credentials_path()), read(store.config_path())),
            first
        );
    }

    #[tokio::test]
    async fn test_cache_hit_without_profile_resolves_region() {
        let ctx = context(None);
        let directory = FakeDirectory::with(vec![account("billing", &["roleA"])]);
        let provider = FakeProvider::default();
        let (_cache_dir, cache) = cache();
        let (_dir, store) = profiles();
        let prompt = prompt();
        let mfa = MfaMode::Interactive(&prompt);
        let assumer = RoleAssumer::new(&ctx, &directory, &provider, &cache);

        obtain_into(&assumer, "billing", false, &mfa, &Destination::Stdout)
            .await
            .unwrap();
        assert_eq!(read(store.credentials_path()), USER_CREDENTIALS);
        assert_eq!(read(store.config_path()), USER_CONFIG);

        let issuance = obtain_into(&assumer, "billing", false, &mfa, &Destination::Profile(&store))
            .await
            .unwrap();

        assert!(issuance.is_cached());
        assert_eq!(directory.lookups.get(), 2);
        assert_eq!(provider.calls.borrow().len(), 1);
        assert!(read(store.credentials_path()).contains("#s-billing\n[billing]\n"));
        assert!(read(store.config_path()).contains("region = eu-west-1"));
    }

    #[tokio::test]
    async fn test_credential_process_destination() {
        let ctx = context(None);
        let directory = FakeDirectory::with(vec![account("payments", &["roleA"])]);
        let provider = FakeProvider::default();
        let (_cache_dir, cache) = cache();
        let (_dir, store) = profiles();
        let prompt = prompt();
        let mfa = MfaMode::Interactive(&prompt);
        let assumer = RoleAssumer::new(&ctx, &directory, &provider, &cache);

        let destination = Destination::CredentialProcess {
            profiles: &store,
            executable: "/opt/bin/rolehop".to_string(),
        };
        obtain_into(&assumer, "payments", false, &mfa, &destination)
            .await
            .unwrap();

        assert_eq!(read(store.credentials_path()), USER_CREDENTIALS);
        let config = read(store.config_path());
        assert!(config.contains("credential_process = /opt/bin/rolehop obtain payments --v1"));
        assert!(config.contains("region = eu-west-1"));
    }

    #[tokio::test]
    async fn test_failed_obtain_leaves_profiles_untouched() {
        let ctx = context(None);
        let directory = FakeDirectory::with(vec![account("payments", &["roleA", "roleB"])]);
        let provider = FakeProvider::failing_on("roleB");
        let (_cache_dir, cache) = cache();
        let (_dir, store) = profiles();
        let prompt = prompt();
        let mfa = MfaMode::Interactive(&prompt);
        let assumer = RoleAssumer::new(&ctx, &directory, &provider, &cache);

        let err = obtain_into(&assumer, "payments", false, &mfa, &Destination::Profile(&store))
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("AccessDenied"));
        assert_eq!(read(store.credentials_path()), USER_CREDENTIALS);
        assert_eq!(read(store.config_path()), USER_CONFIG);
    }

    #[test]
    fn test_current_executable_is_absolute() {
        let exe = current_executable().unwrap();
        assert!(std::path::Path::new(&exe).is_absolute());
    }
}
