use chrono::{DateTime, Utc};

pub mod credentials;
pub mod sts;

/// AWS temporary credentials structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: DateTime<Utc>,
}

// Re-export commonly used types (functions should be accessed via module path)
pub use credentials::ProcessCredentials;
pub use sts::{AssumeRoleRequest, MfaToken, RoleProvider, StsProvider};
