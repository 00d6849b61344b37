//! Exchanging a profile's role for temporary credentials.

use std::fmt;

use aws_config::{BehaviorVersion, Region};
use aws_sdk_sts::{
    Client,
    error::{DisplayErrorContext, ProvideErrorMetadata},
};
use aws_smithy_types::{DateTime, date_time::Format};
use log::{debug, info};

use crate::error::AssumeError;

/// Prefix of every session name; the result is also the credentials section.
pub const SESSION_NAME_PREFIX: &str = "temp_";

/// Region used for STS when the profile does not configure one.
pub const DEFAULT_AWS_REGION: &str = "us-east-1";

/// Temporary credentials issued by STS.
#[derive(Clone, PartialEq)]
pub struct CredentialBundle {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: Option<DateTime>,
}

impl CredentialBundle {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: impl Into<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: session_token.into(),
            expiration: None,
        }
    }

    /// Expiration as an RFC 3339 timestamp, when STS reported one.
    pub fn expiration_display(&self) -> Option<String> {
        self.expiration.and_then(|e| e.fmt(Format::DateTime).ok())
    }
}

// Keeps secrets out of logs.
impl fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"** redacted **")
            .field("session_token", &"** redacted **")
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// Anything that can trade a role ARN for temporary credentials.
pub trait TokenIssuer {
    /// Assumes `role_arn` as `session_name`, authenticating as `profile`.
    async fn assume_role(
        &self,
        profile: &str,
        role_arn: &str,
        session_name: &str,
    ) -> Result<CredentialBundle, AssumeError>;
}

/// [`TokenIssuer`] backed by AWS STS.
pub struct StsIssuer {
    /// Requested session duration in seconds; STS default when `None`.
    duration: Option<u32>,
}

impl StsIssuer {
    pub fn new(duration: Option<u32>) -> Self {
        Self { duration }
    }

    /// Builds an STS client from `profile`'s settings.
    ///
    /// The SDK resolves credentials for the profile itself, including
    /// `source_profile` chains. When the profile has no region, STS is called
    /// in [`DEFAULT_AWS_REGION`].
    async fn client(profile: &str) -> Client {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .profile_name(profile)
            .load()
            .await;

        let config = match config.region() {
            Some(region) => {
                debug!("Using region: {region}");
                config
            }
            None => {
                debug!("No region configured, using {DEFAULT_AWS_REGION} for STS");
                aws_config::defaults(BehaviorVersion::latest())
                    .profile_name(profile)
                    .region(Region::new(DEFAULT_AWS_REGION))
                    .load()
                    .await
            }
        };

        Client::new(&config)
    }
}

impl TokenIssuer for StsIssuer {
    async fn assume_role(
        &self,
        profile: &str,
        role_arn: &str,
        session_name: &str,
    ) -> Result<CredentialBundle, AssumeError> {
        let client = Self::client(profile).await;
        request_credentials(&client, role_arn, session_name, self.duration).await
    }
}

/// Sends a single `AssumeRole` request with an already configured client.
///
/// # Arguments
///
/// * `client` - STS client carrying the caller's long-lived credentials
/// * `role_arn` - Role to assume
/// * `session_name` - `RoleSessionName` of the new session
/// * `duration` - Optional `DurationSeconds`; the role's default when `None`
///
/// # Returns
///
/// * `Ok(CredentialBundle)` - Temporary credentials and their expiration
/// * `Err(AssumeError::Exchange)` - STS refused the request or could not be
///   reached. The message is the one STS sent (e.g. `Access denied`) when
///   there is one, otherwise the full SDK error chain.
/// * `Err(AssumeError::MissingCredentials)` - The response carried no
///   credentials
pub async fn request_credentials(
    client: &Client,
    role_arn: &str,
    session_name: &str,
    duration: Option<u32>,
) -> Result<CredentialBundle, AssumeError> {
    let response = client
        .assume_role()
        .role_arn(role_arn)
        .role_session_name(session_name)
        .set_duration_seconds(duration.map(|d| d as i32))
        .send()
        .await
        .map_err(|e| AssumeError::Exchange {
            role_arn: role_arn.to_string(),
            message: e
                .as_service_error()
                .and_then(|s| s.message())
                .map(str::to_string)
                .unwrap_or_else(|| DisplayErrorContext(&e).to_string()),
        })?;

    let credentials = response
        .credentials()
        .ok_or_else(|| AssumeError::MissingCredentials {
            role_arn: role_arn.to_string(),
        })?;

    Ok(CredentialBundle {
        access_key_id: credentials.access_key_id().to_string(),
        secret_access_key: credentials.secret_access_key().to_string(),
        session_token: credentials.session_token().to_string(),
        expiration: Some(*credentials.expiration()),
    })
}

/// Session name used for `profile`: `temp_<profile>`.
pub fn session_name(profile: &str) -> String {
    format!("{SESSION_NAME_PREFIX}{profile}")
}

/// Assumes `role_arn` using `profile`'s long-lived credentials.
///
/// A failed exchange is final; nothing is retried.
///
/// # Arguments
/// * `issuer` - Performs the actual exchange
/// * `profile` - Normalized profile name, also used to derive the session name
/// * `role_arn` - Role to assume
///
/// # Returns
/// * `Ok((session_name, bundle))` - `temp_<profile>` and the issued credentials
///
/// # Errors
/// Whatever the issuer reports, typically [`AssumeError::Exchange`] or
/// [`AssumeError::MissingCredentials`].
pub async fn assume(
    issuer: &impl TokenIssuer,
    profile: &str,
    role_arn: &str,
) -> Result<(String, CredentialBundle), AssumeError> {
    let session_name = session_name(profile);
    info!("Assuming {role_arn} as {session_name}");

    let bundle = issuer.assume_role(profile, role_arn, &session_name).await?;
    debug!("Received {bundle:?}");

    Ok((session_name, bundle))
}
