//! In-memory stand-ins for the directory, STS and the MFA prompt.

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
};

use chrono::{SubsecRound, Utc};
use tempfile::TempDir;

use crate::{
    aws::{AssumeRoleRequest, Credentials, RoleProvider},
    cache::CredentialCache,
    config::Context,
    directory::{Account, AccountDirectory},
    error::{Error, Result},
    mfa::TokenPrompt,
};

pub(crate) struct FakeDirectory {
    accounts: HashMap<String, Account>,
    pub(crate) lookups: Cell<usize>,
}

impl FakeDirectory {
    pub(crate) fn with(accounts: Vec<Account>) -> Self {
        Self {
            accounts: accounts.into_iter().map(|a| (a.name.clone(), a)).collect(),
            lookups: Cell::new(0),
        }
    }
}

impl AccountDirectory for FakeDirectory {
    async fn resolve(&self, table: &str, account: &str) -> Result<Account> {
        self.lookups.set(self.lookups.get() + 1);
        self.accounts
            .get(account)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                table: table.to_string(),
                account: account.to_string(),
            })
    }
}

/// Records every call; hop N returns credentials tagged with the role it assumed.
#[derive(Default)]
pub(crate) struct FakeProvider {
    pub(crate) calls: RefCell<Vec<(AssumeRoleRequest, Option<String>)>>,
    pub(crate) fail_on: Option<String>,
    pub(crate) hang: bool,
    pub(crate) issued: Cell<usize>,
}

impl FakeProvider {
    pub(crate) fn failing_on(role: &str) -> Self {
        Self {
            fail_on: Some(role.to_string()),
            ..Self::default()
        }
    }
}

impl RoleProvider for FakeProvider {
    async fn assume_role(
        &self,
        request: &AssumeRoleRequest,
        via: Option<&Credentials>,
    ) -> Result<Credentials> {
        self.calls
            .borrow_mut()
            .push((request.clone(), via.map(|c| c.access_key_id.clone())));
        if self.hang {
            std::future::pending::<()>().await;
        }
        if self.fail_on.as_deref() == Some(request.role_arn.as_str()) {
            return Err(Error::Provider(format!(
                "AccessDenied: not authorized to assume {}",
                request.role_arn
            )));
        }
        self.issued.set(self.issued.get() + 1);
        Ok(Credentials {
            access_key_id: format!("AKIA-{}", request.role_arn),
            secret_access_key: "secret".to_string(),
            session_token: format!("token-{}", self.issued.get()),
            // STS reports whole seconds
            expiration: Utc::now().trunc_subsecs(0)
                + chrono::Duration::seconds(request.duration_seconds.into()),
        })
    }
}

pub(crate) struct CountingPrompt {
    pub(crate) asked: Cell<usize>,
}

impl TokenPrompt for CountingPrompt {
    fn read_token(&self, _serial_number: &str) -> Result<String> {
        self.asked.set(self.asked.get() + 1);
        Ok("654321".to_string())
    }
}

pub(crate) fn prompt() -> CountingPrompt {
    CountingPrompt { asked: Cell::new(0) }
}

pub(crate) fn context(mfa_arn: Option<&str>) -> Context {
    Context {
        source_profile: "source".to_string(),
        source_profile_region: "eu-west-1".to_string(),
        dynamodb_table: "customers".to_string(),
        mfa_arn: mfa_arn.map(str::to_string),
        session_name: None,
        session_duration: None,
    }
}

pub(crate) fn account(name: &str, roles: &[&str]) -> Account {
    Account {
        name: name.to_string(),
        regions: vec!["eu-west-1".to_string()],
        roles: roles.iter().map(|r| r.to_string()).collect(),
        id: None,
        description: None,
    }
}

pub(crate) fn cache() -> (TempDir, CredentialCache) {
    let dir = TempDir::new().unwrap();
    let cache = CredentialCache::new(dir.path().join("cache.json"));
    (dir, cache)
}
