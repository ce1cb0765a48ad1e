//! Managed blocks inside the AWS shared credentials and config files.

pub mod blocks;

use std::path::{Path, PathBuf};

use ini::{Ini, ParseOption};
use tracing::{debug, info};

use self::blocks::{Block, FileKind, end_marker, parse_blocks, start_marker};
use crate::{
    aws::Credentials,
    constants::{self, DEFAULT_OUTPUT_FORMAT},
    error::{Error, Result},
    fs as store_fs,
};

/// Tag line written inside every managed section
pub const MANAGED_TAG: &str = "; managed by rolehop";

/// Values for the secret file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialFields {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: String,
}

impl From<&Credentials> for CredentialFields {
    fn from(creds: &Credentials) -> Self {
        Self {
            access_key_id: creds.access_key_id.clone(),
            secret_access_key: creds.secret_access_key.clone(),
            session_token: creds.session_token.clone(),
            expiration: creds.expiration_rfc3339(),
        }
    }
}

/// Values for the non-secret file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFields {
    pub region: String,
    pub output: String,
    /// Command the AWS CLI runs to fetch credentials on demand
    pub credential_process: Option<String>,
}

impl ConfigFields {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            output: DEFAULT_OUTPUT_FORMAT.to_string(),
            credential_process: None,
        }
    }

    pub fn with_credential_process(mut self, command: impl Into<String>) -> Self {
        self.credential_process = Some(command.into());
        self
    }
}

/// Which files a removal touched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Removed {
    pub credentials: bool,
    pub config: bool,
}

/// One shared file held as lines. Each line keeps its own terminator so untouched
/// content renders back byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileDocument {
    kind: FileKind,
    path: PathBuf,
    lines: Vec<String>,
    newline: &'static str,
}

impl ProfileDocument {
    /// Read and sanity check a shared file. Missing and malformed files are distinct errors.
    pub fn load(kind: FileKind, path: &Path) -> Result<Self> {
        let contents =
            store_fs::read_optional(path)?.ok_or_else(|| Error::MissingFile(path.to_path_buf()))?;
        Self::parse(kind, path, &contents)
    }

    pub fn parse(kind: FileKind, path: &Path, contents: &str) -> Result<Self> {
        // Shared files hold raw values such as Windows paths; backslashes are not escapes
        let options = ParseOption {
            enabled_quote: false,
            enabled_escape: false,
            enabled_indented_mutiline_value: true,
            ..ParseOption::default()
        };
        Ini::load_from_str_opt(contents, options).map_err(|e| Error::MalformedFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            kind,
            path: path.to_path_buf(),
            lines: contents.split_inclusive('\n').map(str::to_string).collect(),
            newline: if contents.contains("\r\n") { "\r\n" } else { "\n" },
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn blocks(&self) -> Vec<Block> {
        parse_blocks(self.kind, &self.lines)
    }

    /// Fail if a user-owned section carries this profile name
    fn ensure_not_user_owned(&self, profile: &str) -> Result<()> {
        if self.blocks().iter().any(|b| b.name == profile && !b.managed) {
            return Err(Error::Collision {
                account: profile.to_string(),
                path: self.path.clone(),
            });
        }
        Ok(())
    }

    fn managed_block(&self, profile: &str) -> Option<Block> {
        self.blocks()
            .into_iter()
            .find(|b| b.name == profile && b.managed)
    }

    /// Value of `key` inside the managed block for `profile`
    fn managed_value(&self, profile: &str, key: &str) -> Option<String> {
        let block = self.managed_block(profile)?;
        self.lines[block.start_line..=block.end_line]
            .iter()
            .filter_map(|line| line.split_once('='))
            .find(|(k, _)| k.trim() == key)
            .map(|(_, v)| v.trim().to_string())
    }

    /// Put `block` where the old managed block was, or append it. Returns whether a
    /// block was replaced.
    fn replace_or_append(&mut self, profile: &str, block: Vec<String>) -> bool {
        let mut block = self.terminated(block);
        match self.managed_block(profile) {
            Some(old) => {
                // The old block closed the file without a terminator; keep it that way
                if old.end_line + 1 == self.lines.len() && !has_terminator(&self.lines[old.end_line]) {
                    if let Some(last) = block.last_mut() {
                        let trimmed = last.trim_end_matches(['\r', '\n']).len();
                        last.truncate(trimmed);
                    }
                }
                self.lines.splice(old.start_line..=old.end_line, block);
                true
            }
            None => {
                if let Some(last) = self.lines.last_mut() {
                    if !has_terminator(last) {
                        last.push_str(self.newline);
                    }
                }
                if self.lines.last().is_some_and(|l| !l.trim().is_empty()) {
                    self.lines.push(self.newline.to_string());
                }
                self.lines.append(&mut block);
                false
            }
        }
    }

    /// Delete the managed block for `profile` together with one separating blank line.
    fn delete(&mut self, profile: &str) -> bool {
        let Some(old) = self.managed_block(profile) else {
            return false;
        };

        let mut start = old.start_line;
        let mut end = old.end_line;
        let blank = |idx: usize, lines: &[String]| lines.get(idx).is_some_and(|l| l.trim().is_empty());
        if blank(end + 1, &self.lines) {
            end += 1;
        } else if start > 0 && blank(start - 1, &self.lines) {
            start -= 1;
        }
        self.lines.drain(start..=end);
        true
    }

    pub fn render(&self) -> String {
        self.lines.concat()
    }

    fn terminated(&self, block: Vec<String>) -> Vec<String> {
        block
            .into_iter()
            .map(|mut line| {
                line.push_str(self.newline);
                line
            })
            .collect()
    }
}

fn has_terminator(line: &str) -> bool {
    line.ends_with('\n')
}

fn render_block(kind: FileKind, profile: &str, pairs: &[(&str, &str)]) -> Vec<String> {
    let mut lines = vec![
        start_marker(profile),
        kind.section_header(profile),
        MANAGED_TAG.to_string(),
    ];
    lines.extend(pairs.iter().map(|(k, v)| format!("{k} = {v}")));
    lines.push(end_marker(profile));
    lines
}

fn credentials_block(profile: &str, fields: &CredentialFields) -> Vec<String> {
    render_block(
        FileKind::Credentials,
        profile,
        &[
            ("aws_access_key_id", fields.access_key_id.as_str()),
            ("aws_secret_access_key", fields.secret_access_key.as_str()),
            ("aws_session_token", fields.session_token.as_str()),
            ("aws_session_expiration", fields.expiration.as_str()),
        ],
    )
}

fn config_block(profile: &str, fields: &ConfigFields) -> Vec<String> {
    let mut pairs = vec![
        ("region", fields.region.as_str()),
        ("output", fields.output.as_str()),
    ];
    if let Some(command) = &fields.credential_process {
        pairs.push(("credential_process", command.as_str()));
    }
    render_block(FileKind::Config, profile, &pairs)
}

/// The AWS shared credentials file and config file, as one store
#[derive(Debug, Clone)]
pub struct ProfileStore {
    credentials_path: PathBuf,
    config_path: PathBuf,
    lock_path: Option<PathBuf>,
}

impl ProfileStore {
    pub fn new(credentials_path: impl Into<PathBuf>, config_path: impl Into<PathBuf>) -> Self {
        Self {
            credentials_path: credentials_path.into(),
            config_path: config_path.into(),
            lock_path: None,
        }
    }

    /// Store at the AWS default paths, honouring the AWS environment overrides
    pub fn default_location() -> Option<Self> {
        Some(Self::new(
            constants::get_aws_credentials_path()?,
            constants::get_aws_config_path()?,
        ))
    }

    /// Serialize mutations through an advisory lock file
    pub fn with_lock(mut self, lock_path: impl Into<PathBuf>) -> Self {
        self.lock_path = Some(lock_path.into());
        self
    }

    pub fn credentials_path(&self) -> &Path {
        &self.credentials_path
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn read_both(&self) -> Result<(ProfileDocument, ProfileDocument)> {
        let credentials = ProfileDocument::load(FileKind::Credentials, &self.credentials_path)?;
        let config = ProfileDocument::load(FileKind::Config, &self.config_path)?;
        Ok((credentials, config))
    }

    /// Region recorded in the managed config block for `profile`, if there is one
    pub fn managed_region(&self, profile: &str) -> Result<Option<String>> {
        let config = ProfileDocument::load(FileKind::Config, &self.config_path)?;
        Ok(config
            .managed_value(profile, "region")
            .filter(|region| !region.is_empty()))
    }

    /// Write fresh managed blocks for `profile` into both files.
    ///
    /// Without `credentials` the profile is served through `credential_process`, so any
    /// managed credentials block is dropped instead of rewritten.
    pub fn upsert(
        &self,
        profile: &str,
        credentials: Option<&CredentialFields>,
        config: &ConfigFields,
    ) -> Result<()> {
        self.locked(|| {
            let (mut creds_doc, mut config_doc) = self.read_both()?;

            // Check both files before touching either
            creds_doc.ensure_not_user_owned(profile)?;
            config_doc.ensure_not_user_owned(profile)?;

            let creds_before = creds_doc.render();
            let config_before = config_doc.render();
            match credentials {
                Some(fields) => {
                    let replaced = creds_doc.replace_or_append(profile, credentials_block(profile, fields));
                    debug!("Credentials block for '{}' replaced: {}", profile, replaced);
                }
                None => {
                    if creds_doc.delete(profile) {
                        debug!("Dropped credentials block for '{}'", profile);
                    }
                }
            }
            let replaced = config_doc.replace_or_append(profile, config_block(profile, config));
            debug!("Config block for '{}' replaced: {}", profile, replaced);

            let creds_after = creds_doc.render();
            if creds_after != creds_before {
                store_fs::write_atomic(&self.credentials_path, &creds_after, true)?;
            }
            let config_after = config_doc.render();
            if config_after != config_before {
                store_fs::write_atomic(&self.config_path, &config_after, false)?;
            }

            info!("Profile '{}' written to AWS shared files", profile);
            Ok(())
        })
    }

    /// Delete the managed blocks for `profile` from both files
    pub fn remove(&self, profile: &str) -> Result<Removed> {
        self.locked(|| {
            let (mut creds_doc, mut config_doc) = self.read_both()?;

            let removed = Removed {
                credentials: creds_doc.delete(profile),
                config: config_doc.delete(profile),
            };
            if !removed.credentials && !removed.config {
                return Err(Error::NotManaged(profile.to_string()));
            }

            if removed.credentials {
                store_fs::write_atomic(&self.credentials_path, &creds_doc.render(), true)?;
            }
            if removed.config {
                store_fs::write_atomic(&self.config_path, &config_doc.render(), false)?;
            }

            info!("Profile '{}' removed from AWS shared files", profile);
            Ok(removed)
        })
    }

    fn locked<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        match &self.lock_path {
            Some(lock) => store_fs::with_exclusive_lock(lock, f),
            None => f(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const USER_CREDENTIALS: &str = "[default]\naws_access_key_id = USERKEY\naws_secret_access_key = USERSECRET\n";
    const USER_CONFIG: &str = "[default]\nregion = eu-west-3\noutput = json\n";

    fn store(credentials: &str, config: &str) -> (TempDir, ProfileStore) {
        let dir = TempDir::new().unwrap();
        let creds_path = dir.path().join("credentials");
        let config_path = dir.path().join("config");
        fs::write(&creds_path, credentials).unwrap();
        fs::write(&config_path, config).unwrap();
        let store = ProfileStore::new(creds_path, config_path).with_lock(dir.path().join("state.lock"));
        (dir, store)
    }

    fn fields(key: &str) -> CredentialFields {
        CredentialFields {
            access_key_id: key.to_string(),
            secret_access_key: format!("{key}-secret"),
            session_token: format!("{key}-token"),
            expiration: "2026-10-19T10:00:00Z".to_string(),
        }
    }

    fn read(path: &Path) -> String {
        fs::read_to_string(path).unwrap()
    }

    #[test]
    fn test_upsert_creates_managed_blocks() {
        let (_dir, store) = store(USER_CREDENTIALS, USER_CONFIG);
        store
            .upsert("payments", Some(&fields("AKIA1")), &ConfigFields::new("eu-west-1"))
            .unwrap();

        let creds = read(store.credentials_path());
        assert!(creds.starts_with(USER_CREDENTIALS));
        assert!(creds.contains(
            "#s-payments\n[payments]\n; managed by rolehop\naws_access_key_id = AKIA1\n"
        ));
        assert!(creds.ends_with("#e-payments\n"));

        let config = read(store.config_path());
        assert!(config.starts_with(USER_CONFIG));
        assert!(config.contains(
            "#s-payments\n[profile payments]\n; managed by rolehop\nregion = eu-west-1\noutput = json\n#e-payments\n"
        ));
    }

    #[test]
    fn test_upsert_replaces_block_and_preserves_neighbours() {
        let trailing = "[other]\naws_access_key_id = KEEP\n";
        let creds = format!(
            "{USER_CREDENTIALS}\n#s-payments\n[payments]\n; managed by rolehop\naws_access_key_id = OLD\n#e-payments\n{trailing}"
        );
        let (_dir, store) = store(&creds, USER_CONFIG);

        store
            .upsert("payments", Some(&fields("NEW")), &ConfigFields::new("eu-west-1"))
            .unwrap();

        let after = read(store.credentials_path());
        assert!(after.starts_with(USER_CREDENTIALS));
        assert!(after.ends_with(trailing));
        assert!(after.contains("aws_access_key_id = NEW"));
        assert!(!after.contains("OLD"));
        assert_eq!(after.matches("#s-payments").count(), 1);
        assert_eq!(after.matches("#e-payments").count(), 1);
    }

    #[test]
    fn test_repeated_upserts_are_stable() {
        let (_dir, store) = store(USER_CREDENTIALS, USER_CONFIG);
        let config = ConfigFields::new("eu-west-1");

        store.upsert("payments", Some(&fields("A")), &config).unwrap();
        store.upsert("billing", Some(&fields("B")), &config).unwrap();
        let first = read(store.credentials_path());

        store.upsert("payments", Some(&fields("A")), &config).unwrap();
        assert_eq!(read(store.credentials_path()), first);
    }

    #[test]
    fn test_unmanaged_section_is_a_collision_and_files_untouched() {
        let creds = format!("{USER_CREDENTIALS}[payments]\naws_access_key_id = MINE\n");
        let (_dir, store) = store(&creds, USER_CONFIG);

        let err = store
            .upsert("payments", Some(&fields("AKIA1")), &ConfigFields::new("eu-west-1"))
            .unwrap_err();

        assert!(matches!(err, Error::Collision { .. }));
        assert_eq!(read(store.credentials_path()), creds);
        assert_eq!(read(store.config_path()), USER_CONFIG);
    }

    #[test]
    fn test_unmanaged_config_section_is_a_collision() {
        let config = format!("{USER_CONFIG}[profile payments]\nregion = us-east-1\n");
        let (_dir, store) = store(USER_CREDENTIALS, &config);

        let err = store
            .upsert("payments", Some(&fields("AKIA1")), &ConfigFields::new("eu-west-1"))
            .unwrap_err();

        assert!(matches!(err, Error::Collision { .. }));
        assert_eq!(read(store.credentials_path()), USER_CREDENTIALS);
        assert_eq!(read(store.config_path()), config);
    }

    #[test]
    fn test_credential_process_mode_drops_credentials_block() {
        let (_dir, store) = store(USER_CREDENTIALS, USER_CONFIG);
        store
            .upsert("payments", Some(&fields("AKIA1")), &ConfigFields::new("eu-west-1"))
            .unwrap();

        let config = ConfigFields::new("eu-west-1").with_credential_process("rolehop obtain payments --v1");
        store.upsert("payments", None, &config).unwrap();

        assert_eq!(read(store.credentials_path()), USER_CREDENTIALS);
        let config_text = read(store.config_path());
        assert!(config_text.contains("credential_process = rolehop obtain payments --v1"));
        assert_eq!(config_text.matches("[profile payments]").count(), 1);
    }

    #[test]
    fn test_remove_deletes_both_blocks() {
        let (_dir, store) = store(USER_CREDENTIALS, USER_CONFIG);
        store
            .upsert("payments", Some(&fields("AKIA1")), &ConfigFields::new("eu-west-1"))
            .unwrap();

        let removed = store.remove("payments").unwrap();
        assert_eq!(
            removed,
            Removed {
                credentials: true,
                config: true
            }
        );
        assert_eq!(read(store.credentials_path()), USER_CREDENTIALS);
        assert_eq!(read(store.config_path()), USER_CONFIG);
    }

    #[test]
    fn test_remove_unmanaged_is_not_managed_error() {
        let creds = format!("{USER_CREDENTIALS}[payments]\naws_access_key_id = MINE\n");
        let (_dir, store) = store(&creds, USER_CONFIG);

        assert!(matches!(
            store.remove("payments"),
            Err(Error::NotManaged(name)) if name == "payments"
        ));
        assert_eq!(read(store.credentials_path()), creds);
    }

    #[test]
    fn test_missing_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("config");
        fs::write(&config_path, USER_CONFIG).unwrap();
        let store = ProfileStore::new(dir.path().join("credentials"), config_path);

        assert!(matches!(store.read_both(), Err(Error::MissingFile(_))));
        assert!(matches!(
            store.upsert("payments", Some(&fields("A")), &ConfigFields::new("eu-west-1")),
            Err(Error::MissingFile(_))
        ));
    }

    #[test]
    fn test_malformed_file_is_reported() {
        let (_dir, store) = store("[default\naws_access_key_id = A\n", USER_CONFIG);
        assert!(matches!(store.read_both(), Err(Error::MalformedFile { .. })));
    }

    #[test]
    fn test_empty_files_accept_first_block() {
        let (_dir, store) = store("", "");
        store
            .upsert("payments", Some(&fields("A")), &ConfigFields::new("eu-west-1"))
            .unwrap();

        assert!(read(store.credentials_path()).starts_with("#s-payments\n"));
        assert!(read(store.config_path()).starts_with("#s-payments\n"));
    }

    #[test]
    fn test_crlf_content_is_preserved_verbatim() {
        let user = "[default]\r\naws_access_key_id = USER\r\n";
        let (_dir, store) = store(user, USER_CONFIG);

        store
            .upsert("payments", Some(&fields("A")), &ConfigFields::new("eu-west-1"))
            .unwrap();
        let after = read(store.credentials_path());
        assert!(after.starts_with(user));
        assert!(after.contains("\r\n#s-payments\r\n[payments]\r\n"));
        assert!(!after.replace("\r\n", "").contains('\n'));

        store.remove("payments").unwrap();
        assert_eq!(read(store.credentials_path()), user);
    }

    #[test]
    fn test_missing_final_newline_is_kept_when_untouched() {
        let config = "[default]\nregion = eu-west-3";
        let (_dir, store) = store(USER_CREDENTIALS, config);

        store
            .upsert("payments", Some(&fields("A")), &ConfigFields::new("eu-west-1"))
            .unwrap();
        let after = read(store.config_path());
        assert!(after.starts_with("[default]\nregion = eu-west-3\n\n#s-payments\n"));

        store.remove("payments").unwrap();
        assert_eq!(read(store.config_path()), "[default]\nregion = eu-west-3\n");
    }

    #[test]
    fn test_backslashes_are_not_escapes() {
        let config = "[profile tools]\ncredential_process = C:\\Users\\xavier\\tool.exe obtain tools --v1\n";
        let doc = ProfileDocument::parse(FileKind::Config, Path::new("config"), config).unwrap();
        assert_eq!(doc.render(), config);

        let (_dir, store) = store(USER_CREDENTIALS, USER_CONFIG);
        let fields = ConfigFields::new("eu-west-1")
            .with_credential_process("C:\\Program Files\\rolehop\\rolehop.exe obtain payments --v1");
        store.upsert("payments", None, &fields).unwrap();
        store.upsert("payments", None, &fields).unwrap();
        assert!(read(store.config_path()).contains("C:\\Program Files\\rolehop\\rolehop.exe"));
    }

    #[test]
    fn test_managed_region_reads_config_block() {
        let config = format!("{USER_CONFIG}[profile billing]\nregion = us-east-1\n");
        let (_dir, store) = store(USER_CREDENTIALS, &config);
        assert_eq!(store.managed_region("payments").unwrap(), None);

        store
            .upsert("payments", Some(&fields("A")), &ConfigFields::new("eu-west-1"))
            .unwrap();
        assert_eq!(store.managed_region("payments").unwrap().as_deref(), Some("eu-west-1"));
        // user-owned sections are never read back
        assert_eq!(store.managed_region("billing").unwrap(), None);
    }
}
