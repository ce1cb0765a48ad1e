use std::time::SystemTime;

use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_sts::{
    Client as StsClient,
    config::{Builder as StsConfigBuilder, Credentials as StaticCredentials},
    error::DisplayErrorContext,
};
use aws_smithy_types::DateTime as SmithyDateTime;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::Credentials;
use crate::error::{Error, Result};

/// Provider name attached to credentials handed from one hop to the next
const CHAINED_PROVIDER_NAME: &str = "rolehop-chain";

/// Second factor presented on the first hop of a chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MfaToken {
    pub serial_number: String,
    pub code: String,
}

/// One `AssumeRole` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssumeRoleRequest {
    pub role_arn: String,
    pub session_name: String,
    pub duration_seconds: i32,
    pub mfa: Option<MfaToken>,
}

/// Something that can exchange a role ARN for temporary credentials.
///
/// `via` carries the credentials produced by the previous hop; `None` means the
/// call is signed with the context's source identity.
#[allow(async_fn_in_trait)]
pub trait RoleProvider {
    async fn assume_role(
        &self,
        request: &AssumeRoleRequest,
        via: Option<&Credentials>,
    ) -> Result<Credentials>;
}

/// STS-backed provider whose first hop is signed by a named source profile
#[derive(Debug, Clone)]
pub struct StsProvider {
    source: SdkConfig,
}

impl StsProvider {
    /// Load the SDK configuration for the source profile and region
    pub async fn from_profile(profile: &str, region: &str) -> Self {
        info!("Using source profile '{}' in region {}", profile, region);
        let source = aws_config::defaults(BehaviorVersion::latest())
            .profile_name(profile)
            .region(Region::new(region.to_string()))
            .load()
            .await;
        Self { source }
    }

    fn client(&self, via: Option<&Credentials>) -> StsClient {
        match via {
            None => StsClient::new(&self.source),
            Some(creds) => {
                let chained = StaticCredentials::new(
                    &creds.access_key_id,
                    &creds.secret_access_key,
                    Some(creds.session_token.clone()),
                    Some(SystemTime::from(creds.expiration)),
                    CHAINED_PROVIDER_NAME,
                );
                let config = StsConfigBuilder::from(&self.source)
                    .credentials_provider(chained)
                    .build();
                StsClient::from_conf(config)
            }
        }
    }
}

impl RoleProvider for StsProvider {
    async fn assume_role(
        &self,
        request: &AssumeRoleRequest,
        via: Option<&Credentials>,
    ) -> Result<Credentials> {
        info!("Calling AWS STS AssumeRole");
        debug!("Role ARN: {}", request.role_arn);
        debug!("Session name: {}", request.session_name);
        debug!("Duration: {} seconds", request.duration_seconds);
        debug!("Signed with previous hop: {}", via.is_some());

        let mut call = self
            .client(via)
            .assume_role()
            .role_arn(&request.role_arn)
            .role_session_name(&request.session_name)
            .duration_seconds(request.duration_seconds);
        if let Some(mfa) = &request.mfa {
            debug!("MFA serial: {}", mfa.serial_number);
            call = call
                .serial_number(&mfa.serial_number)
                .token_code(&mfa.code);
        }

        let response = call.send().await.map_err(|e| {
            Error::Provider(format!(
                "Failed to assume role {}: {}",
                request.role_arn,
                DisplayErrorContext(&e)
            ))
        })?;

        let sts_creds = response.credentials().ok_or_else(|| {
            Error::Provider(format!(
                "AWS STS returned no credentials for {}",
                request.role_arn
            ))
        })?;

        let expiration = to_utc(sts_creds.expiration()).ok_or_else(|| {
            Error::Provider(format!(
                "AWS STS returned an out of range expiration for {}",
                request.role_arn
            ))
        })?;

        let credentials = Credentials {
            access_key_id: sts_creds.access_key_id().to_string(),
            secret_access_key: sts_creds.secret_access_key().to_string(),
            session_token: sts_creds.session_token().to_string(),
            expiration,
        };

        info!("Successfully obtained AWS credentials");
        Ok(credentials)
    }
}

fn to_utc(value: &SmithyDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(value.secs(), value.subsec_nanos())
}
