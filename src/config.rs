use std::{
    collections::BTreeSet,
    fmt, fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::constants::{
    self, CONTEXT_FILE_NAME, CURRENT_CONTEXT_FILE_NAME, DEFAULT_CONTEXT_NAME,
    DEFAULT_SESSION_DURATION_SECS, MAX_SESSION_DURATION_SECS, MIN_SESSION_DURATION_SECS,
};

/// Keys every context table must define
pub const MANDATORY_KEYS: &[&str] = &["source_profile", "source_profile_region", "dynamodb_table"];

/// Keys a context table may define on top of the mandatory ones
pub const OPTIONAL_KEYS: &[&str] = &["mfa_arn", "session_name", "session_duration"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to determine home directory")]
    NoHomeDirectory,

    #[error(
        "could not locate a context file at {}. Run `rolehop context template` to create one",
        .0.display()
    )]
    MissingContextFile(PathBuf),

    #[error("failed to read {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {} as TOML", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("{} is invalid:\n{}", .path.display(), render_issues(.issues))]
    Invalid { path: PathBuf, issues: Vec<KeyIssue> },

    #[error("context '{0}' does not exist. Run `rolehop context list` to see the available contexts")]
    UnknownContext(String),

    #[error("an inline MFA code was given but the active context has no mfa_arn")]
    NoMfaDevice,
}

/// One problem found while validating the context file against the known key set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyIssue {
    NotATable { context: String },
    UnexpectedKey { context: String, key: String },
    MissingKey { context: String, key: String },
    InvalidValue { context: String, reason: String },
}

impl fmt::Display for KeyIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotATable { context } => write!(f, "'{context}' is not a table"),
            Self::UnexpectedKey { context, key } => {
                write!(f, "unexpected key '{key}' in context '{context}'")
            }
            Self::MissingKey { context, key } => {
                write!(f, "missing mandatory key '{key}' in context '{context}'")
            }
            Self::InvalidValue { context, reason } => {
                write!(f, "invalid value in context '{context}': {reason}")
            }
        }
    }
}

fn render_issues(issues: &[KeyIssue]) -> String {
    issues
        .iter()
        .map(|issue| format!("  - {issue}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// A named bundle of source identity, directory location and session parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    pub source_profile: String,
    pub source_profile_region: String,
    pub dynamodb_table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mfa_arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_duration: Option<i64>,
}

impl Context {
    /// Session duration with the default applied and clamped to what STS accepts
    pub fn session_duration_secs(&self) -> i32 {
        let requested = self
            .session_duration
            .unwrap_or(i64::from(DEFAULT_SESSION_DURATION_SECS));
        let clamped = requested.clamp(
            i64::from(MIN_SESSION_DURATION_SECS),
            i64::from(MAX_SESSION_DURATION_SECS),
        );
        if clamped != requested {
            warn!(
                "Session duration {}s is outside [{}, {}], using {}s",
                requested, MIN_SESSION_DURATION_SECS, MAX_SESSION_DURATION_SECS, clamped
            );
        }
        // Bounded by the clamp above
        clamped as i32
    }

    /// Role session name, derived from the account when the context has none
    pub fn session_name_for(&self, account: &str) -> String {
        match self.session_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("{account}-rolehop-session"),
        }
    }

    /// MFA device serial, if the second factor is configured
    pub fn mfa_serial(&self) -> Option<&str> {
        self.mfa_arn
            .as_deref()
            .map(str::trim)
            .filter(|arn| !arn.is_empty())
    }
}

/// Contexts live in one TOML file; the active one is named by a pointer file next to it.
#[derive(Debug, Clone)]
pub struct ContextStore {
    dir: PathBuf,
}

impl ContextStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store rooted at `~/.config/rolehop`
    pub fn default_location() -> Result<Self, ConfigError> {
        constants::config_dir()
            .map(Self::new)
            .ok_or(ConfigError::NoHomeDirectory)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn context_path(&self) -> PathBuf {
        self.dir.join(CONTEXT_FILE_NAME)
    }

    fn pointer_path(&self) -> PathBuf {
        self.dir.join(CURRENT_CONTEXT_FILE_NAME)
    }

    /// Name of the active context, `default` when no pointer has been written
    pub fn active_context(&self) -> Result<String, ConfigError> {
        let path = self.pointer_path();
        match fs::read_to_string(&path) {
            Ok(contents) => {
                let name = contents.trim();
                if name.is_empty() {
                    Ok(DEFAULT_CONTEXT_NAME.to_string())
                } else {
                    Ok(name.to_string())
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(DEFAULT_CONTEXT_NAME.to_string())
            }
            Err(source) => Err(ConfigError::Read { path, source }),
        }
    }

    /// Load and validate the named context
    pub fn load(&self, name: &str) -> Result<Context, ConfigError> {
        let table = self.read_validated()?;
        let value = table
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownContext(name.to_string()))?;

        debug!("Loaded context '{}' from {}", name, self.context_path().display());
        value.try_into::<Context>().map_err(|e| ConfigError::Invalid {
            path: self.context_path(),
            issues: vec![KeyIssue::InvalidValue {
                context: name.to_string(),
                reason: e.message().to_string(),
            }],
        })
    }

    /// Context names, sorted
    pub fn list(&self) -> Result<Vec<String>, ConfigError> {
        Ok(self.read_table()?.keys().cloned().collect())
    }

    /// Point the active context at `name` after checking it exists
    pub fn switch(&self, name: &str) -> Result<(), ConfigError> {
        if !self.list()?.iter().any(|c| c == name) {
            return Err(ConfigError::UnknownContext(name.to_string()));
        }
        let path = self.pointer_path();
        fs::write(&path, format!("{name}\n")).map_err(|source| ConfigError::Write { path, source })
    }

    /// Validate every context in the file, returning their names
    pub fn validate(&self) -> Result<Vec<String>, ConfigError> {
        let table = self.read_validated()?;
        Ok(table.keys().cloned().collect())
    }

    fn read_validated(&self) -> Result<toml::Table, ConfigError> {
        let table = self.read_table()?;
        let issues = validate_table(&table);
        if issues.is_empty() {
            Ok(table)
        } else {
            Err(ConfigError::Invalid {
                path: self.context_path(),
                issues,
            })
        }
    }

    fn read_table(&self) -> Result<toml::Table, ConfigError> {
        let path = self.context_path();
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::MissingContextFile(path));
            }
            Err(source) => return Err(ConfigError::Read { path, source }),
        };
        contents
            .parse::<toml::Table>()
            .map_err(|source| ConfigError::Parse { path, source })
    }
}

/// Compare each context's keys against the known key set and check value types.
pub fn validate_table(table: &toml::Table) -> Vec<KeyIssue> {
    let mandatory: BTreeSet<&str> = MANDATORY_KEYS.iter().copied().collect();
    let known: BTreeSet<&str> = MANDATORY_KEYS
        .iter()
        .chain(OPTIONAL_KEYS)
        .copied()
        .collect();

    let mut issues = Vec::new();
    for (name, value) in table {
        let Some(section) = value.as_table() else {
            issues.push(KeyIssue::NotATable {
                context: name.clone(),
            });
            continue;
        };

        let present: BTreeSet<&str> = section.keys().map(String::as_str).collect();

        issues.extend(present.difference(&known).map(|key| KeyIssue::UnexpectedKey {
            context: name.clone(),
            key: key.to_string(),
        }));
        issues.extend(mandatory.difference(&present).map(|key| KeyIssue::MissingKey {
            context: name.clone(),
            key: key.to_string(),
        }));

        // Shape errors are only meaningful once the key set is right
        if present.is_subset(&known) && mandatory.is_subset(&present) {
            if let Err(e) = value.clone().try_into::<Context>() {
                issues.push(KeyIssue::InvalidValue {
                    context: name.clone(),
                    reason: e.message().to_string(),
                });
            }
        }
    }
    issues
}

/// Example context file printed by `rolehop context template`
pub fn template() -> String {
    let example = Context {
        source_profile: "default".to_string(),
        source_profile_region: "eu-west-3".to_string(),
        dynamodb_table: "customers".to_string(),
        mfa_arn: Some("arn:aws:iam::123456789012:mfa/user".to_string()),
        session_name: Some("user-rolehop".to_string()),
        session_duration: Some(i64::from(DEFAULT_SESSION_DURATION_SECS)),
    };
    let mut table = toml::Table::new();
    table.insert(
        DEFAULT_CONTEXT_NAME.to_string(),
        toml::Value::try_from(example).unwrap_or_else(|_| toml::Value::Table(toml::Table::new())),
    );
    toml::to_string(&table).unwrap_or_default()
}
