use std::{env, path::PathBuf, time::Duration};

use dirs;

/// Configuration directory name under `~/.config`
pub const CONFIG_DIR_NAME: &str = "rolehop";

/// Context file holding one TOML table per context
pub const CONTEXT_FILE_NAME: &str = "config.toml";

/// Pointer file naming the active context
pub const CURRENT_CONTEXT_FILE_NAME: &str = "current-context";

/// Credential cache record store
pub const CACHE_FILE_NAME: &str = "cache.json";

/// Advisory lock guarding read-modify-write of the cache and profile files
pub const LOCK_FILE_NAME: &str = "state.lock";

/// Context used when no pointer file exists
pub const DEFAULT_CONTEXT_NAME: &str = "default";

/// AWS configuration directory name
pub const AWS_CONFIG_DIR_NAME: &str = ".aws";

/// AWS configuration file name
pub const AWS_CONFIG_FILE_NAME: &str = "config";

/// AWS shared credentials file name
pub const AWS_CREDENTIALS_FILE_NAME: &str = "credentials";

/// Minimum STS session duration in seconds
pub const MIN_SESSION_DURATION_SECS: i32 = 900;

/// Maximum STS session duration in seconds
pub const MAX_SESSION_DURATION_SECS: i32 = 43_200;

/// STS ceiling for sessions obtained through role chaining
pub const MAX_CHAINED_SESSION_DURATION_SECS: i32 = 3_600;

/// Default STS session duration in seconds
pub const DEFAULT_SESSION_DURATION_SECS: i32 = 3_600;

/// Output format written to managed config blocks
pub const DEFAULT_OUTPUT_FORMAT: &str = "json";

/// Upper bound on a single STS call
pub const PROVIDER_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on waiting for the operator to type an MFA code
pub const MFA_PROMPT_TIMEOUT: Duration = Duration::from_secs(120);

/// Get the rolehop configuration directory
/// Always returns: ~/.config/rolehop (on all platforms)
pub fn config_dir() -> Option<PathBuf> {
    home_dir().map(|home| home.join(".config").join(CONFIG_DIR_NAME))
}

/// Get the AWS config file path
/// Respects AWS_CONFIG_FILE environment variable if set
pub fn get_aws_config_path() -> Option<PathBuf> {
    if let Ok(path) = env::var("AWS_CONFIG_FILE") {
        return Some(PathBuf::from(path));
    }

    home_dir().map(|home| home.join(AWS_CONFIG_DIR_NAME).join(AWS_CONFIG_FILE_NAME))
}

/// Get the AWS credentials file path
/// Respects AWS_SHARED_CREDENTIALS_FILE environment variable if set
pub fn get_aws_credentials_path() -> Option<PathBuf> {
    if let Ok(path) = env::var("AWS_SHARED_CREDENTIALS_FILE") {
        return Some(PathBuf::from(path));
    }

    home_dir().map(|home| home.join(AWS_CONFIG_DIR_NAME).join(AWS_CREDENTIALS_FILE_NAME))
}

fn home_dir() -> Option<PathBuf> {
    dirs::home_dir().or_else(|| {
        // Fallback to environment variables if dirs crate fails
        env::var("HOME")
            .or_else(|_| env::var("USERPROFILE"))
            .ok()
            .map(PathBuf::from)
    })
}
