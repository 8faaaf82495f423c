//! One-time passcode retrieval for the login flow.
//!
//! Each `TwoFactorKind` maps to one `CodeProvider` through a small capability
//! table; a kind with no registered provider fails the login up front.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::api::ApiError;
use crate::models::{TwoFactorKind, TwoFactorMethod};

use super::LoginError;

/// Microsoft Graph base URL
const GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// Mail folder the verification mails are filtered into
pub const DEFAULT_MAIL_FOLDER: &str = "AtoZ";

/// Default directory holding per-mailbox token files
pub const DEFAULT_TOKEN_DIR: &str = "O365_tokens";

/// Subject fragment identifying a verification mail
const VERIFICATION_SUBJECT: &str = "login verification code";

/// Give the mail time to arrive before looking for it
const DEFAULT_INITIAL_DELAY_SECS: u64 = 20;

/// Request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Retrieves a 6-digit passcode sent to `identifier`.
#[async_trait]
pub trait CodeProvider: Send + Sync {
    /// `None` when no code could be found.
    async fn code(&self, identifier: &str) -> Option<String>;
}

/// Capability table: which provider answers which two-factor kind.
#[derive(Clone, Default)]
pub struct TwoFactorProviders {
    providers: HashMap<TwoFactorKind, Arc<dyn CodeProvider>>,
}

impl TwoFactorProviders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: TwoFactorKind, provider: Arc<dyn CodeProvider>) -> Self {
        self.providers.insert(kind, provider);
        self
    }

    pub fn supports(&self, kind: TwoFactorKind) -> bool {
        self.providers.contains_key(&kind)
    }

    /// Fetch a code for `method` from the provider registered for its kind.
    pub async fn code_for(&self, method: &TwoFactorMethod) -> Result<String, LoginError> {
        let provider = self
            .providers
            .get(&method.kind)
            .ok_or(LoginError::UnsupportedTwoFactor(method.kind))?;
        provider
            .code(&method.identifier)
            .await
            .ok_or_else(|| LoginError::NoCode(obfuscate_identifier(method)))
    }
}

/// The label the login page shows for a two-factor option, e.g.
/// `j******@example.com` for `jdoe.xy@example.com`.
pub fn obfuscate_identifier(method: &TwoFactorMethod) -> String {
    match method.kind {
        TwoFactorKind::Outlook => {
            let identifier = &method.identifier;
            let mut chars = identifier.chars();
            let Some(first) = chars.next() else {
                return String::new();
            };
            let local_len = identifier
                .find('@')
                .map(|at| identifier[..at].chars().count())
                .unwrap_or_else(|| identifier.chars().count());
            let rest: String = identifier.chars().skip(local_len).collect();
            format!("{}{}{}", first, "*".repeat(local_len.saturating_sub(1)), rest)
        }
    }
}

static CODE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(\d{6})\b").expect("valid regex"));

/// First standalone 6-digit number in `text`.
pub fn extract_code(text: &str) -> Option<String> {
    CODE_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

// ============================================================================
// Outlook via Microsoft Graph
// ============================================================================

#[derive(Debug, Deserialize)]
struct TokenFile {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct GraphList<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct MailFolder {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    body: Option<MessageBody>,
    #[serde(rename = "bodyPreview", default)]
    body_preview: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageBody {
    #[serde(default)]
    content: String,
}

/// Reads verification codes from an Outlook mailbox.
///
/// The bearer token for each mailbox lives in `{token_dir}/{identifier}.token`
/// as JSON with an `access_token` field; obtaining and renewing it is left to
/// whatever tool writes that file.
#[derive(Debug, Clone)]
pub struct OutlookCodeProvider {
    http: Client,
    graph_base: String,
    token_dir: PathBuf,
    folder: String,
    initial_delay: Duration,
}

impl OutlookCodeProvider {
    pub fn new(token_dir: impl Into<PathBuf>, folder: impl Into<String>) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            graph_base: GRAPH_BASE_URL.to_string(),
            token_dir: token_dir.into(),
            folder: folder.into(),
            initial_delay: Duration::from_secs(DEFAULT_INITIAL_DELAY_SECS),
        })
    }

    /// Point at a different Graph host (local test servers).
    pub fn with_graph_base(mut self, base: impl Into<String>) -> Self {
        self.graph_base = base.into();
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    fn token_path(&self, identifier: &str) -> PathBuf {
        self.token_dir.join(format!("{}.token", identifier))
    }

    fn read_token(path: &Path) -> Option<String> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read mailbox token");
                return None;
            }
        };
        match serde_json::from_str::<TokenFile>(&contents) {
            Ok(token) => Some(token.access_token),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to parse mailbox token");
                None
            }
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        token: &str,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ApiError::from_status(status, &text));
        }
        serde_json::from_str(&text).map_err(|e| {
            ApiError::InvalidResponse(format!("{}: {}", e, ApiError::truncate_body(&text)))
        })
    }

    async fn latest_message(&self, token: &str) -> Result<Option<Message>, ApiError> {
        let filter = format!("displayName eq '{}'", self.folder.replace('\'', "''"));
        let folders: GraphList<MailFolder> = self
            .get_json(
                token,
                &format!("{}/me/mailFolders", self.graph_base),
                &[("$filter", filter.as_str())],
            )
            .await?;
        let Some(folder) = folders.value.into_iter().next() else {
            warn!(folder = %self.folder, "Mail folder not found");
            return Ok(None);
        };

        let messages: GraphList<Message> = self
            .get_json(
                token,
                &format!("{}/me/mailFolders/{}/messages", self.graph_base, folder.id),
                &[
                    ("$top", "1"),
                    ("$orderby", "receivedDateTime desc"),
                    ("$select", "subject,body,bodyPreview"),
                ],
            )
            .await?;
        Ok(messages.value.into_iter().next())
    }
}

#[async_trait]
impl CodeProvider for OutlookCodeProvider {
    async fn code(&self, identifier: &str) -> Option<String> {
        let token = Self::read_token(&self.token_path(identifier))?;

        if !self.initial_delay.is_zero() {
            tokio::time::sleep(self.initial_delay).await;
        }

        let message = match self.latest_message(&token).await {
            Ok(Some(message)) => message,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Failed to read verification mail");
                return None;
            }
        };

        let subject = message.subject.unwrap_or_default();
        if !subject.to_lowercase().contains(VERIFICATION_SUBJECT) {
            debug!(subject = %subject, "Latest mail is not a verification mail");
            return None;
        }

        message
            .body
            .map(|b| b.content)
            .and_then(|content| extract_code(&content))
            .or_else(|| message.body_preview.as_deref().and_then(extract_code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    struct StaticCode(Option<&'static str>);

    #[async_trait]
    impl CodeProvider for StaticCode {
        async fn code(&self, _identifier: &str) -> Option<String> {
            self.0.map(str::to_string)
        }
    }

    fn outlook(identifier: &str) -> TwoFactorMethod {
        TwoFactorMethod::new(TwoFactorKind::Outlook, identifier)
    }

    #[test]
    fn test_obfuscate_identifier() {
        assert_eq!(obfuscate_identifier(&outlook("jdoe@example.com")), "j***@example.com");
        assert_eq!(obfuscate_identifier(&outlook("a@example.com")), "a@example.com");
        assert_eq!(obfuscate_identifier(&outlook("nodomain")), "n*******");
    }

    #[test]
    fn test_extract_code() {
        assert_eq!(
            extract_code("Your verification code is 482913. It expires soon.").as_deref(),
            Some("482913")
        );
        assert!(extract_code("Reference 12345 only").is_none());
        assert!(extract_code("Order 12345678").is_none());
    }

    #[tokio::test]
    async fn test_capability_table_dispatch() {
        let providers =
            TwoFactorProviders::new().with(TwoFactorKind::Outlook, Arc::new(StaticCode(Some("123456"))));
        assert!(providers.supports(TwoFactorKind::Outlook));
        let code = providers
            .code_for(&outlook("jdoe@example.com"))
            .await
            .expect("code should resolve");
        assert_eq!(code, "123456");
    }

    #[tokio::test]
    async fn test_missing_provider_is_unsupported() {
        let providers = TwoFactorProviders::new();
        let result = providers.code_for(&outlook("jdoe@example.com")).await;
        assert!(matches!(
            result,
            Err(LoginError::UnsupportedTwoFactor(TwoFactorKind::Outlook))
        ));
    }

    #[tokio::test]
    async fn test_provider_without_code() {
        let providers = TwoFactorProviders::new().with(TwoFactorKind::Outlook, Arc::new(StaticCode(None)));
        let result = providers.code_for(&outlook("jdoe@example.com")).await;
        assert!(matches!(result, Err(LoginError::NoCode(label)) if label == "j***@example.com"));
    }

    #[tokio::test]
    async fn test_outlook_reads_latest_verification_mail() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/me/mailFolders")
            .match_header("authorization", "Bearer graph-token")
            .match_query(Matcher::UrlEncoded(
                "$filter".to_string(),
                "displayName eq 'AtoZ'".to_string(),
            ))
            .with_body(r#"{"value":[{"id":"folder-1","displayName":"AtoZ"}]}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/me/mailFolders/folder-1/messages")
            .match_query(Matcher::Any)
            .with_body(
                r#"{"value":[{"subject":"Amazon A to Z login verification code","body":{"contentType":"html","content":"<p>Your code is <b>654321</b></p>"}}]}"#,
            )
            .create_async()
            .await;

        let dir = tempfile::tempdir().expect("Failed to create tempdir");
        std::fs::write(
            dir.path().join("jdoe@example.com.token"),
            r#"{"access_token":"graph-token","token_type":"Bearer"}"#,
        )
        .expect("Failed to write token");

        let provider = OutlookCodeProvider::new(dir.path(), DEFAULT_MAIL_FOLDER)
            .expect("Failed to build provider")
            .with_graph_base(server.url())
            .with_initial_delay(Duration::ZERO);

        assert_eq!(provider.code("jdoe@example.com").await.as_deref(), Some("654321"));
    }

    #[tokio::test]
    async fn test_outlook_ignores_unrelated_mail() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/me/mailFolders")
            .match_query(Matcher::Any)
            .with_body(r#"{"value":[{"id":"folder-1"}]}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/me/mailFolders/folder-1/messages")
            .match_query(Matcher::Any)
            .with_body(r#"{"value":[{"subject":"Your shift swap 123456","body":{"content":"123456"}}]}"#)
            .create_async()
            .await;

        let dir = tempfile::tempdir().expect("Failed to create tempdir");
        std::fs::write(dir.path().join("jdoe@example.com.token"), r#"{"access_token":"t"}"#)
            .expect("Failed to write token");

        let provider = OutlookCodeProvider::new(dir.path(), DEFAULT_MAIL_FOLDER)
            .expect("Failed to build provider")
            .with_graph_base(server.url())
            .with_initial_delay(Duration::ZERO);

        assert!(provider.code("jdoe@example.com").await.is_none());
    }

    #[tokio::test]
    async fn test_outlook_without_token_file() {
        let dir = tempfile::tempdir().expect("Failed to create tempdir");
        let provider = OutlookCodeProvider::new(dir.path(), DEFAULT_MAIL_FOLDER)
            .expect("Failed to build provider")
            .with_graph_base("http://127.0.0.1:9")
            .with_initial_delay(Duration::ZERO);
        assert!(provider.code("nobody@example.com").await.is_none());
    }
}
