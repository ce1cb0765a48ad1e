//! Role assumption state machine.
//!
//! A request either hits the cache or walks the account's role chain one hop at a
//! time. The second factor is only ever presented on the first hop; every later hop
//! is signed with the credentials the previous hop returned.

use std::{future::Future, time::Duration};

use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::{
    aws::{AssumeRoleRequest, Credentials, MfaToken, RoleProvider},
    cache::{AuthMethod, CredentialCache},
    config::{ConfigError, Context},
    constants::{MAX_CHAINED_SESSION_DURATION_SECS, PROVIDER_CALL_TIMEOUT},
    directory::{Account, AccountDirectory},
    error::{Error, Result},
    mfa::MfaMode,
};

/// Outcome of one `obtain` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Issuance {
    /// Served from a still-valid cache record; nothing was called
    Cached(Credentials),
    /// Freshly issued and already persisted to the cache
    Issued {
        credentials: Credentials,
        auth_method: AuthMethod,
        account: Account,
    },
}

impl Issuance {
    pub fn credentials(&self) -> &Credentials {
        match self {
            Self::Cached(credentials) => credentials,
            Self::Issued { credentials, .. } => credentials,
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, Self::Cached(_))
    }
}

pub struct RoleAssumer<'a, D, P> {
    context: &'a Context,
    directory: &'a D,
    provider: &'a P,
    cache: &'a CredentialCache,
    call_timeout: Duration,
}

impl<'a, D, P> RoleAssumer<'a, D, P>
where
    D: AccountDirectory,
    P: RoleProvider,
{
    pub fn new(
        context: &'a Context,
        directory: &'a D,
        provider: &'a P,
        cache: &'a CredentialCache,
    ) -> Self {
        Self {
            context,
            directory,
            provider,
            cache,
            call_timeout: PROVIDER_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Return credentials for `account`, assuming its role chain when the cache
    /// cannot answer.
    pub async fn obtain(&self, account: &str, renew: bool, mfa: &MfaMode<'_>) -> Result<Issuance> {
        if mfa.is_inline() && self.context.mfa_serial().is_none() {
            return Err(ConfigError::NoMfaDevice.into());
        }

        if renew {
            info!("Renewal requested, ignoring cached credentials for '{}'", account);
        } else if let Some(credentials) = self.cached(account)? {
            info!("Using cached credentials for '{}'", account);
            return Ok(Issuance::Cached(credentials));
        }

        let resolved = self.resolve(account).await?;
        let (credentials, auth_method) = self.assume_chain(&resolved, mfa).await?;

        let blob = credentials
            .to_process_json()
            .map_err(|e| Error::Provider(format!("Failed to encode credentials: {e}")))?;
        self.cache
            .put(&resolved.name, credentials.expiration, auth_method, blob)?;

        Ok(Issuance::Issued {
            credentials,
            auth_method,
            account: resolved,
        })
    }

    /// Look `account` up in the context's directory table
    pub async fn resolve(&self, account: &str) -> Result<Account> {
        self.bounded(
            "account lookup",
            self.directory.resolve(&self.context.dynamodb_table, account),
        )
        .await
    }

    fn cached(&self, account: &str) -> Result<Option<Credentials>> {
        if !self.cache.is_valid(account)? {
            return Ok(None);
        }
        let Some(blob) = self.cache.get(account)? else {
            return Ok(None);
        };
        let credentials =
            Credentials::from_process_json(&blob).map_err(|e| Error::Corruption {
                path: self.cache.path().to_path_buf(),
                reason: format!("record for '{account}' holds an unreadable credential: {e}"),
            })?;
        Ok(Some(credentials))
    }

    async fn assume_chain(
        &self,
        account: &Account,
        mfa: &MfaMode<'_>,
    ) -> Result<(Credentials, AuthMethod)> {
        let session_name = self.context.session_name_for(&account.name);
        let duration_seconds = self.context.session_duration_secs();
        let hops = account.roles.len();

        let mut auth_method = if account.is_chained() {
            AuthMethod::Chained
        } else {
            AuthMethod::Plain
        };
        let mut previous: Option<Credentials> = None;

        for (hop, role_arn) in account.roles.iter().enumerate() {
            info!("[{}/{}] Assuming {}", hop + 1, hops, role_arn);

            let token = match (hop, self.context.mfa_serial()) {
                (0, Some(serial)) => {
                    let (token, method) = collect_token(serial, mfa)?;
                    auth_method = method;
                    Some(token)
                }
                _ => None,
            };

            let request = AssumeRoleRequest {
                role_arn: role_arn.clone(),
                session_name: session_name.clone(),
                duration_seconds: hop_duration(hop, duration_seconds),
                mfa: token,
            };
            let issued = self
                .bounded(
                    "AssumeRole call",
                    self.provider.assume_role(&request, previous.as_ref()),
                )
                .await?;
            debug!("Hop {} credentials expire at {}", hop + 1, issued.expiration);
            previous = Some(issued);
        }

        let credentials = previous.ok_or_else(|| Error::Integrity {
            table: self.context.dynamodb_table.clone(),
            account: account.name.clone(),
            reason: "no roles defined".to_string(),
        })?;
        Ok((credentials, auth_method))
    }

    async fn bounded<T>(&self, what: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        match timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!("{} did not answer within {:?}", what, self.call_timeout);
                Err(Error::Timeout {
                    what: what.to_string(),
                    after: self.call_timeout,
                })
            }
        }
    }
}

// Hops signed with role credentials are role chaining, which STS caps at one hour
fn hop_duration(hop: usize, requested: i32) -> i32 {
    if hop == 0 || requested <= MAX_CHAINED_SESSION_DURATION_SECS {
        return requested;
    }
    warn!(
        "Session duration {}s exceeds the {}s allowed for chained roles, using {}s for hop {}",
        requested,
        MAX_CHAINED_SESSION_DURATION_SECS,
        MAX_CHAINED_SESSION_DURATION_SECS,
        hop + 1
    );
    MAX_CHAINED_SESSION_DURATION_SECS
}

fn collect_token(serial: &str, mfa: &MfaMode<'_>) -> Result<(MfaToken, AuthMethod)> {
    let (code, method) = match mfa {
        MfaMode::Inline(code) => (code.trim().to_string(), AuthMethod::MfaInline),
        MfaMode::Interactive(prompt) => (prompt.read_token(serial)?, AuthMethod::MfaInteractive),
    };
    Ok((
        MfaToken {
            serial_number: serial.to_string(),
            code,
        },
        method,
    ))
}
