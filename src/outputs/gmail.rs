//! Gmail API delivery with installed-app OAuth2 credentials.
//!
//! # Credential files
//!
//! - `client_secret_path`: the OAuth client downloaded from the Google console
//!   (`{"installed": {...}}` or `{"web": {...}}`)
//! - `token_path`: the authorized-user token written after consent and
//!   rewritten after every refresh
//!
//! [`authenticate`] reuses a valid stored token, refreshes an expired one, and
//! only falls back to the interactive consent flow when there is nothing to
//! refresh. The resulting [`Credential`] is shared read-only by every
//! delivery in the run.

use crate::config::MailSettings;
use crate::error::MailError;
use crate::retry::Retrying;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, instrument, warn};
use url::Url;

pub const GMAIL_SEND_SCOPE: &str = "https://www.googleapis.com/auth/gmail.send";
pub const GMAIL_SEND_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me/messages/send";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const OOB_REDIRECT: &str = "urn:ietf:wg:oauth:2.0:oob";
/// Tokens this close to expiry are treated as expired.
const EXPIRY_SKEW_SECS: i64 = 60;

/// Sends a fully composed RFC 5322 message.
pub trait MailClient {
    async fn send(&self, raw_message: &[u8]) -> Result<DeliveryReceipt, MailError>;
}

impl<T: MailClient> MailClient for Retrying<T> {
    async fn send(&self, raw_message: &[u8]) -> Result<DeliveryReceipt, MailError> {
        self.policy
            .run("send mail", || self.inner.send(raw_message))
            .await
    }
}

/// What the mail service returns for an accepted message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeliveryReceipt {
    pub id: String,
    #[serde(rename = "threadId", default)]
    pub thread_id: Option<String>,
}

/// Bearer token for the current run.
#[derive(Clone)]
pub struct Credential {
    access_token: String,
}

impl Credential {
    pub fn new(access_token: String) -> Self {
        Self { access_token }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Authorized-user token file, compatible with Google's client libraries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredToken {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl StoredToken {
    /// A token without an expiry never expires.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.token.is_some()
            && self
                .expiry
                .is_none_or(|exp| exp - Duration::seconds(EXPIRY_SKEW_SECS) > now)
    }

    fn apply(&mut self, response: TokenResponse, now: DateTime<Utc>) {
        self.token = Some(response.access_token);
        if let Some(refresh) = response.refresh_token {
            self.refresh_token = Some(refresh);
        }
        self.expiry = response.expires_in.map(|s| now + Duration::seconds(s));
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}

#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    pub fn from_json(raw: &str) -> Result<Self, MailError> {
        let file: ClientSecretsFile = serde_json::from_str(raw)?;
        file.installed
            .or(file.web)
            .ok_or_else(|| MailError::Credential("client secret file has no 'installed' or 'web' section".into()))
    }

    /// Consent page URL for the out-of-band flow.
    pub fn consent_url(&self) -> Result<Url, MailError> {
        Url::parse_with_params(
            &self.auth_uri,
            &[
                ("response_type", "code"),
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", OOB_REDIRECT),
                ("scope", GMAIL_SEND_SCOPE),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .map_err(|e| MailError::Credential(format!("invalid auth_uri: {e}")))
    }
}

/// Reads the stored authorized-user token.
///
/// # Returns
///
/// * `Ok(None)` - no token file yet
/// * `Ok(Some(token))` - the parsed token, possibly expired
/// * `Err(_)` - the file exists but cannot be read or parsed
pub async fn load_token(path: &Path) -> Result<Option<StoredToken>, MailError> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Writes `token` to `path` as pretty JSON, replacing any previous file.
pub async fn save_token(path: &Path, token: &StoredToken) -> Result<(), MailError> {
    let json = serde_json::to_string_pretty(token)?;
    tokio::fs::write(path, json).await?;
    info!(path = %path.display(), "Saved mail token");
    Ok(())
}

async fn post_token_form(
    http: &Client,
    token_uri: &str,
    form: &[(&str, &str)],
) -> Result<TokenResponse, MailError> {
    let response = http.post(token_uri).form(form).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(MailError::Status {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        });
    }
    Ok(response.json().await?)
}

#[instrument(level = "info", skip_all)]
async fn refresh(http: &Client, token: &mut StoredToken) -> Result<(), MailError> {
    let refresh_token = token
        .refresh_token
        .clone()
        .ok_or_else(|| MailError::Credential("no refresh token".into()))?;
    let response = post_token_form(
        http,
        &token.token_uri,
        &[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("client_id", token.client_id.as_str()),
            ("client_secret", token.client_secret.as_str()),
        ],
    )
    .await?;
    token.apply(response, Utc::now());
    info!(expiry = ?token.expiry, "Refreshed mail token");
    Ok(())
}

/// Asks the operator to approve access and exchanges the pasted code.
#[instrument(level = "info", skip_all)]
async fn interactive_consent(http: &Client, secrets: &ClientSecrets) -> Result<StoredToken, MailError> {
    let url = secrets.consent_url()?;
    println!("Open this URL in your browser and paste the authorization code here:");
    println!("{url}");
    print!("Authorization code: ");
    use std::io::Write;
    std::io::stdout().flush()?;

    let mut code = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut code).await?;
    let code = code.trim();
    if code.is_empty() {
        return Err(MailError::Credential("no authorization code entered".into()));
    }

    let response = post_token_form(
        http,
        &secrets.token_uri,
        &[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", secrets.client_id.as_str()),
            ("client_secret", secrets.client_secret.as_str()),
            ("redirect_uri", OOB_REDIRECT),
        ],
    )
    .await?;

    let mut token = StoredToken {
        token: None,
        refresh_token: None,
        token_uri: secrets.token_uri.clone(),
        client_id: secrets.client_id.clone(),
        client_secret: secrets.client_secret.clone(),
        scopes: vec![GMAIL_SEND_SCOPE.to_string()],
        expiry: None,
    };
    token.apply(response, Utc::now());
    Ok(token)
}

/// Returns a usable credential, refreshing or re-authorizing as needed.
#[instrument(level = "info", skip_all, fields(token_path = %settings.token_path.display()))]
pub async fn authenticate(http: &Client, settings: &MailSettings) -> Result<Credential, MailError> {
    if let Some(mut stored) = load_token(&settings.token_path).await? {
        if stored.is_valid(Utc::now()) {
            info!("Stored mail token is valid");
            return credential_of(&stored);
        }
        if stored.refresh_token.is_some() {
            refresh(http, &mut stored).await?;
            save_token(&settings.token_path, &stored).await?;
            return credential_of(&stored);
        }
        warn!("Stored mail token is expired and cannot be refreshed");
    }

    let raw = tokio::fs::read_to_string(&settings.client_secret_path)
        .await
        .map_err(|e| {
            MailError::Credential(format!(
                "cannot read client secret {}: {e}",
                settings.client_secret_path.display()
            ))
        })?;
    let secrets = ClientSecrets::from_json(&raw)?;
    let stored = interactive_consent(http, &secrets).await?;
    save_token(&settings.token_path, &stored).await?;
    credential_of(&stored)
}

fn credential_of(token: &StoredToken) -> Result<Credential, MailError> {
    token
        .token
        .clone()
        .map(Credential::new)
        .ok_or_else(|| MailError::Credential("token file has no access token".into()))
}

/// Delivers messages through `users.messages.send`.
#[derive(Debug, Clone)]
pub struct GmailClient {
    http: Client,
    credential: Credential,
    endpoint: String,
}

impl GmailClient {
    pub fn new(http: Client, credential: Credential) -> Self {
        Self {
            http,
            credential,
            endpoint: GMAIL_SEND_URL.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SendRequest {
    raw: String,
}

/// Gmail expects the whole message base64url-encoded in `raw`.
fn send_request(raw_message: &[u8]) -> SendRequest {
    SendRequest {
        raw: URL_SAFE.encode(raw_message),
    }
}

impl MailClient for GmailClient {
    #[instrument(level = "info", skip_all, fields(bytes = raw_message.len()))]
    async fn send(&self, raw_message: &[u8]) -> Result<DeliveryReceipt, MailError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.credential.access_token)
            .json(&send_request(raw_message))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(MailError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        let receipt: DeliveryReceipt = response.json().await?;
        info!(id = %receipt.id, "Message sent");
        Ok(receipt)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn token(expiry: Option<DateTime<Utc>>) -> StoredToken {
        StoredToken {
            token: Some("ya29.token".into()),
            refresh_token: Some("1//refresh".into()),
            token_uri: DEFAULT_TOKEN_URI.into(),
            client_id: "id.apps.googleusercontent.com".into(),
            client_secret: "secret".into(),
            scopes: vec![GMAIL_SEND_SCOPE.into()],
            expiry,
        }
    }

    #[test]
    fn test_token_validity() {
        let now = Utc::now();
        assert!(token(None).is_valid(now));
        assert!(token(Some(now + Duration::hours(1))).is_valid(now));
        assert!(!token(Some(now + Duration::seconds(30))).is_valid(now));
        assert!(!token(Some(now - Duration::hours(1))).is_valid(now));

        let mut no_access = token(None);
        no_access.token = None;
        assert!(!no_access.is_valid(now));
    }

    #[test]
    fn test_reads_google_token_format() {
        let raw = r#"{
            "token": "ya29.a0",
            "refresh_token": "1//0g",
            "token_uri": "https://oauth2.googleapis.com/token",
            "client_id": "x.apps.googleusercontent.com",
            "client_secret": "s",
            "scopes": ["https://www.googleapis.com/auth/gmail.send"],
            "universe_domain": "googleapis.com",
            "expiry": "2025-06-12T10:00:00.123456Z"
        }"#;
        let t: StoredToken = serde_json::from_str(raw).unwrap();
        assert_eq!(t.token.as_deref(), Some("ya29.a0"));
        assert_eq!(t.expiry.unwrap().to_rfc3339(), "2025-06-12T10:00:00.123456+00:00");
    }

    #[test]
    fn test_apply_keeps_refresh_token() {
        let now = Utc::now();
        let mut t = token(None);
        t.apply(
            TokenResponse {
                access_token: "new".into(),
                expires_in: Some(3599),
                refresh_token: None,
            },
            now,
        );
        assert_eq!(t.token.as_deref(), Some("new"));
        assert_eq!(t.refresh_token.as_deref(), Some("1//refresh"));
        assert_eq!(t.expiry, Some(now + Duration::seconds(3599)));
    }

    #[tokio::test]
    async fn test_token_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        assert!(load_token(&path).await.unwrap().is_none());

        let t = token(Some(Utc::now()));
        save_token(&path, &t).await.unwrap();
        assert_eq!(load_token(&path).await.unwrap(), Some(t));
    }

    #[tokio::test]
    async fn test_valid_stored_token_skips_network() {
        let dir = tempfile::tempdir().unwrap();
        let settings = MailSettings {
            token_path: dir.path().join("token.json"),
            client_secret_path: dir.path().join("absent.json"),
            ..Default::default()
        };
        save_token(&settings.token_path, &token(Some(Utc::now() + Duration::hours(1))))
            .await
            .unwrap();

        let cred = authenticate(&Client::new(), &settings).await.unwrap();
        assert_eq!(cred.access_token, "ya29.token");
        assert_eq!(format!("{cred:?}"), "Credential(<redacted>)");
    }

    #[tokio::test]
    async fn test_missing_client_secret_is_credential_error() {
        let dir = tempfile::tempdir().unwrap();
        let settings = MailSettings {
            token_path: dir.path().join("token.json"),
            client_secret_path: dir.path().join("absent.json"),
            ..Default::default()
        };
        let err = authenticate(&Client::new(), &settings).await.unwrap_err();
        assert!(matches!(err, MailError::Credential(_)));
    }

    #[test]
    fn test_client_secrets_and_consent_url() {
        let raw = r#"{"installed":{"client_id":"abc.apps.googleusercontent.com","client_secret":"s",
            "auth_uri":"https://accounts.google.com/o/oauth2/auth",
            "token_uri":"https://oauth2.googleapis.com/token","redirect_uris":["http://localhost"]}}"#;
        let secrets = ClientSecrets::from_json(raw).unwrap();
        let url = secrets.consent_url().unwrap();
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["client_id"], "abc.apps.googleusercontent.com");
        assert_eq!(pairs["scope"], GMAIL_SEND_SCOPE);
        assert_eq!(pairs["redirect_uri"], OOB_REDIRECT);
        assert_eq!(pairs["prompt"], "consent");

        assert!(ClientSecrets::from_json(r#"{"other":{}}"#).is_err());
    }

    #[test]
    fn test_send_request_is_base64url() {
        let req = send_request(b"Subject: hi\r\n\r\n??>>");
        assert!(!req.raw.contains('+') && !req.raw.contains('/'));
        assert_eq!(URL_SAFE.decode(&req.raw).unwrap(), b"Subject: hi\r\n\r\n??>>");
    }
}
