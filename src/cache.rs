//! Local record store of issued credentials, one record per account.
//!
//! The store is a JSON array rewritten as a whole on every mutation. A store that
//! exists and cannot be parsed is never repaired automatically.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    error::{Error, Result},
    fs as store_fs,
};

/// Which branch of the issuance state machine produced a credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMethod {
    Plain,
    MfaInteractive,
    MfaInline,
    Chained,
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::Plain => "plain",
            Self::MfaInteractive => "mfa-interactive",
            Self::MfaInline => "mfa-inline",
            Self::Chained => "chained",
        };
        f.write_str(tag)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedCredentialRecord {
    pub name: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub issued_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub expires_at: DateTime<Utc>,
    pub auth_method: AuthMethod,
    pub credential_blob: String,
}

#[derive(Debug, Clone)]
pub struct CredentialCache {
    path: PathBuf,
    lock_path: Option<PathBuf>,
}

impl CredentialCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_path: None,
        }
    }

    /// Serialize mutations through an advisory lock file
    pub fn with_lock(mut self, lock_path: impl Into<PathBuf>) -> Self {
        self.lock_path = Some(lock_path.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `account` has a record that has not expired yet
    pub fn is_valid(&self, account: &str) -> Result<bool> {
        self.is_valid_at(account, Utc::now())
    }

    pub fn is_valid_at(&self, account: &str, now: DateTime<Utc>) -> Result<bool> {
        store_fs::touch(&self.path)?;
        let valid = self
            .read_records()?
            .iter()
            .find(|r| r.name == account)
            .is_some_and(|r| now < r.expires_at);
        debug!("Cache entry for '{}' valid: {}", account, valid);
        Ok(valid)
    }

    /// Blob of the record for `account`. Callers check [`Self::is_valid`] first.
    pub fn get(&self, account: &str) -> Result<Option<String>> {
        Ok(self.record(account)?.map(|r| r.credential_blob))
    }

    /// Full record for `account`, expired or not
    pub fn record(&self, account: &str) -> Result<Option<CachedCredentialRecord>> {
        Ok(self.read_records()?.into_iter().find(|r| r.name == account))
    }

    /// Insert or replace the record for `account`
    pub fn put(
        &self,
        account: &str,
        expires_at: DateTime<Utc>,
        auth_method: AuthMethod,
        credential_blob: String,
    ) -> Result<()> {
        self.put_at(account, Utc::now(), expires_at, auth_method, credential_blob)
    }

    pub fn put_at(
        &self,
        account: &str,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        auth_method: AuthMethod,
        credential_blob: String,
    ) -> Result<()> {
        let record = CachedCredentialRecord {
            name: account.to_string(),
            issued_at,
            expires_at,
            auth_method,
            credential_blob,
        };

        self.locked(|| {
            let mut records = self.read_records()?;
            match records.iter_mut().find(|r| r.name == account) {
                Some(existing) => *existing = record,
                None => records.push(record),
            }
            self.write_records(&records)
        })?;
        info!("Cached credentials for '{}' ({})", account, auth_method);
        Ok(())
    }

    /// Drop the record for `account`, returning whether one existed
    pub fn remove(&self, account: &str) -> Result<bool> {
        self.locked(|| {
            let mut records = self.read_records()?;
            let before = records.len();
            records.retain(|r| r.name != account);
            if records.len() == before {
                return Ok(false);
            }
            self.write_records(&records)?;
            Ok(true)
        })
    }

    fn locked<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        match &self.lock_path {
            Some(lock) => store_fs::with_exclusive_lock(lock, f),
            None => f(),
        }
    }

    fn read_records(&self) -> Result<Vec<CachedCredentialRecord>> {
        let Some(contents) = store_fs::read_optional(&self.path)? else {
            return Ok(Vec::new());
        };
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }

        let records: Vec<CachedCredentialRecord> =
            serde_json::from_str(&contents).map_err(|e| Error::Corruption {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        let mut seen = std::collections::HashSet::new();
        if let Some(dup) = records.iter().find(|r| !seen.insert(r.name.as_str())) {
            return Err(Error::Corruption {
                path: self.path.clone(),
                reason: format!("duplicate records for '{}'", dup.name),
            });
        }
        Ok(records)
    }

    fn write_records(&self, records: &[CachedCredentialRecord]) -> Result<()> {
        let json = serde_json::to_string_pretty(records).map_err(|e| Error::Corruption {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        store_fs::write_atomic(&self.path, &json, true)
    }
}
