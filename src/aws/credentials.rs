use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::Credentials;

/// Version of the AWS CLI `credential_process` output protocol
pub const PROCESS_CREDENTIALS_VERSION: u8 = 1;

/// Credentials in the shape the AWS CLI expects from a `credential_process` command.
///
/// The same JSON doubles as the cache blob, so a cached credential can be printed
/// again without contacting STS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProcessCredentials {
    pub version: u8,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    #[serde(with = "rfc3339")]
    pub expiration: DateTime<Utc>,
}

impl From<&Credentials> for ProcessCredentials {
    fn from(creds: &Credentials) -> Self {
        Self {
            version: PROCESS_CREDENTIALS_VERSION,
            access_key_id: creds.access_key_id.clone(),
            secret_access_key: creds.secret_access_key.clone(),
            session_token: creds.session_token.clone(),
            expiration: creds.expiration,
        }
    }
}

impl From<ProcessCredentials> for Credentials {
    fn from(process: ProcessCredentials) -> Self {
        Self {
            access_key_id: process.access_key_id,
            secret_access_key: process.secret_access_key,
            session_token: process.session_token,
            expiration: process.expiration,
        }
    }
}

impl Credentials {
    /// Serialize into the protocol-v1 JSON payload
    pub fn to_process_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&ProcessCredentials::from(self))
    }

    /// Rebuild credentials from a protocol-v1 JSON payload
    pub fn from_process_json(blob: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<ProcessCredentials>(blob).map(Self::from)
    }

    /// Expiration formatted for humans and config files
    pub fn expiration_rfc3339(&self) -> String {
        self.expiration.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

// The AWS CLI parses ISO 8601 with a `Z` suffix; chrono's default serde impl keeps
// fractional seconds and an offset form, so pin the format here.
mod rfc3339 {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(de::Error::custom)
    }
}
