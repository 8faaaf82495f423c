//! The cookie-carrying HTTP client a session talks through.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::api::Endpoints;

/// Request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// The scheduling web app rejects unfamiliar user agents
pub(crate) const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:138.0) Gecko/20100101 Firefox/138.0";

/// Primary access token cookie
pub const ACCESS_TOKEN_COOKIE: &str = "atoz-oauth-token";
/// Refresh token cookie
pub const REFRESH_TOKEN_COOKIE: &str = "atoz-refresh-token";
/// Session marker cookie
pub const SESSION_MARKER_COOKIE: &str = "atoz-auth-session";
/// Unix seconds at which the refresh session expires
pub const EXPIRATION_COOKIE: &str = "refresh_session_expiration";

/// Cookies whose joint presence makes a session structurally valid
pub const TRUST_ARTIFACTS: [&str; 3] = [ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE, SESSION_MARKER_COOKIE];

/// A cookie as handed back by the login helper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    /// Unix seconds; absent for session cookies
    #[serde(default)]
    pub expiry: Option<i64>,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
            expiry: None,
        }
    }

    fn is_expired(&self) -> bool {
        self.expiry.is_some_and(|expiry| expiry <= Utc::now().timestamp())
    }
}

pub type CookieSet = Vec<Cookie>;

/// A reqwest client plus its cookie jar.
///
/// Never mutated in place by the session: login and credential changes build a
/// new context and swap the `Arc`. The jar itself does absorb `Set-Cookie`
/// headers, which is how a refresh renews the tokens.
pub struct HttpContext {
    http: Client,
    jar: Arc<Jar>,
    /// Where cookie lookups are probed; covers every host the session uses
    probe_urls: Vec<Url>,
    /// Host-only cookies without a domain land here
    default_url: Option<Url>,
}

impl std::fmt::Debug for HttpContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpContext")
            .field("probe_urls", &self.probe_urls)
            .field("valid", &self.has_trust_artifacts())
            .finish()
    }
}

impl HttpContext {
    /// A context holding no cookies at all.
    pub fn empty(endpoints: &Endpoints) -> Result<Self, reqwest::Error> {
        let jar = Arc::new(Jar::default());
        let http = Client::builder()
            .cookie_provider(jar.clone())
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()?;

        let probe_urls: Vec<Url> = endpoints
            .cookie_hosts()
            .iter()
            .filter_map(|host| match Url::parse(host) {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!(host = %host, error = %e, "Ignoring unparseable endpoint");
                    None
                }
            })
            .collect();
        let default_url = probe_urls.first().cloned();

        Ok(Self {
            http,
            jar,
            probe_urls,
            default_url,
        })
    }

    /// A context seeded with the cookies a login produced. Cookies that have
    /// already expired are dropped.
    pub fn from_cookies(cookies: &[Cookie], endpoints: &Endpoints) -> Result<Self, reqwest::Error> {
        let context = Self::empty(endpoints)?;
        for cookie in cookies.iter().filter(|c| !c.is_expired()) {
            context.add_cookie(cookie);
        }
        Ok(context)
    }

    fn add_cookie(&self, cookie: &Cookie) {
        let path = cookie.path.as_deref().unwrap_or("/");
        // The jar expires the cookie when the helper's expiry passes
        let lifetime = cookie
            .expiry
            .map(|expiry| format!("; Max-Age={}", (expiry - Utc::now().timestamp()).max(0)))
            .unwrap_or_default();
        let (header, url) = match cookie.domain.as_deref() {
            Some(domain) => {
                let host = domain.trim_start_matches('.');
                let header = format!(
                    "{}={}; Domain={}; Path={}{}",
                    cookie.name, cookie.value, host, path, lifetime
                );
                (header, Url::parse(&format!("https://{}{}", host, path)).ok())
            }
            None => {
                let header = format!("{}={}; Path={}{}", cookie.name, cookie.value, path, lifetime);
                (header, self.default_url.clone())
            }
        };

        match url {
            Some(url) => self.jar.add_cookie_str(&header, &url),
            None => debug!(name = %cookie.name, "Dropping cookie with unusable domain"),
        }
    }

    /// The underlying client. Requests sent on it carry the jar's cookies.
    pub fn http(&self) -> &Client {
        &self.http
    }

    /// Value of the first cookie called `name` visible on any session host.
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.probe_urls.iter().find_map(|url| {
            let header = self.jar.cookies(url)?;
            let header = header.to_str().ok()?;
            header
                .split("; ")
                .filter_map(|pair| pair.split_once('='))
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.to_string())
        })
    }

    /// All three trust artifacts are present and non-empty.
    pub fn has_trust_artifacts(&self) -> bool {
        TRUST_ARTIFACTS
            .iter()
            .all(|name| self.cookie(name).is_some_and(|v| !v.is_empty()))
    }

    /// The expiration claim, if present and numeric.
    pub fn expiration_claim(&self) -> Option<i64> {
        self.cookie(EXPIRATION_COOKIE)?.trim().parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_cookies() -> CookieSet {
        vec![
            Cookie::new(ACCESS_TOKEN_COOKIE, "access"),
            Cookie::new(REFRESH_TOKEN_COOKIE, "refresh"),
            Cookie::new(SESSION_MARKER_COOKIE, "marker"),
            Cookie::new(EXPIRATION_COOKIE, "1893456000"),
        ]
    }

    #[test]
    fn test_empty_context_has_no_artifacts() {
        let context = HttpContext::empty(&Endpoints::default()).expect("Failed to build context");
        assert!(!context.has_trust_artifacts());
        assert!(context.expiration_claim().is_none());
    }

    #[test]
    fn test_host_only_cookies_are_visible() {
        let context = HttpContext::from_cookies(&valid_cookies(), &Endpoints::single("http://127.0.0.1:9"))
            .expect("Failed to build context");
        assert!(context.has_trust_artifacts());
        assert_eq!(context.cookie(ACCESS_TOKEN_COOKIE).as_deref(), Some("access"));
        assert_eq!(context.expiration_claim(), Some(1_893_456_000));
    }

    #[test]
    fn test_domain_cookies_cover_every_host() {
        let cookies: CookieSet = valid_cookies()
            .into_iter()
            .map(|mut c| {
                c.domain = Some(".amazon.work".to_string());
                c
            })
            .collect();
        let context =
            HttpContext::from_cookies(&cookies, &Endpoints::default()).expect("Failed to build context");
        assert!(context.has_trust_artifacts());
    }

    #[test]
    fn test_missing_artifact_is_not_valid() {
        let mut cookies = valid_cookies();
        cookies.retain(|c| c.name != SESSION_MARKER_COOKIE);
        let context = HttpContext::from_cookies(&cookies, &Endpoints::single("http://127.0.0.1:9"))
            .expect("Failed to build context");
        assert!(!context.has_trust_artifacts());
    }

    #[test]
    fn test_expired_cookies_are_dropped() {
        let mut cookies = valid_cookies();
        cookies[0].expiry = Some(1);
        let context = HttpContext::from_cookies(&cookies, &Endpoints::single("http://127.0.0.1:9"))
            .expect("Failed to build context");
        assert!(context.cookie(ACCESS_TOKEN_COOKIE).is_none());
        assert!(!context.has_trust_artifacts());
    }

    #[test]
    fn test_cookie_expires_in_jar() {
        let mut cookies = valid_cookies();
        cookies[0].expiry = Some(Utc::now().timestamp() + 1);
        cookies[1].expiry = Some(Utc::now().timestamp() + 3_600);
        let context = HttpContext::from_cookies(&cookies, &Endpoints::single("http://127.0.0.1:9"))
            .expect("Failed to build context");
        assert!(context.has_trust_artifacts());

        std::thread::sleep(Duration::from_millis(2_100));
        assert!(context.cookie(ACCESS_TOKEN_COOKIE).is_none());
        assert_eq!(context.cookie(REFRESH_TOKEN_COOKIE).as_deref(), Some("refresh"));
        assert!(!context.has_trust_artifacts());
    }

    #[test]
    fn test_parse_helper_cookie_json() {
        let json = r#"[{"name":"atoz-oauth-token","value":"abc","domain":".amazon.work","path":"/","expiry":1893456000,"httpOnly":true}]"#;
        let cookies: CookieSet = serde_json::from_str(json).expect("Failed to parse cookies");
        assert_eq!(cookies[0].domain.as_deref(), Some(".amazon.work"));
        assert_eq!(cookies[0].expiry, Some(1_893_456_000));
    }
}
