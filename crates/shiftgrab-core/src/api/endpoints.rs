/// Login host: initialize, refresh, logout
const LOGIN_BASE_URL: &str = "https://atoz-login.amazon.work";

/// Web app host: the shifts page carries the employee id
const APP_BASE_URL: &str = "https://atoz.amazon.work";

/// GraphQL API host
const API_BASE_URL: &str = "https://atoz-api-us-east-1.amazon.work";

/// Base URLs of the three hosts a session talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub login_base: String,
    pub app_base: String,
    pub api_base: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            login_base: LOGIN_BASE_URL.to_string(),
            app_base: APP_BASE_URL.to_string(),
            api_base: API_BASE_URL.to_string(),
        }
    }
}

impl Endpoints {
    /// Point every host at one base URL (local test servers).
    pub fn single(base: &str) -> Self {
        Self {
            login_base: base.to_string(),
            app_base: base.to_string(),
            api_base: base.to_string(),
        }
    }

    pub fn initialize_url(&self) -> String {
        format!("{}/initialize", self.login_base)
    }

    pub fn refresh_url(&self) -> String {
        format!("{}/refresh_access_token", self.login_base)
    }

    pub fn logout_url(&self) -> String {
        format!("{}/logout", self.login_base)
    }

    pub fn shifts_page_url(&self) -> String {
        format!("{}/shifts", self.app_base)
    }

    /// GraphQL endpoint; the web client appends the bare employee id as the query string.
    pub fn graphql_url(&self, employee_id: u64) -> String {
        format!("{}/graphql?{}", self.api_base, employee_id)
    }

    /// Base URLs whose cookies make up a session's trust artifacts.
    pub fn cookie_hosts(&self) -> [&str; 3] {
        [&self.login_base, &self.app_base, &self.api_base]
    }
}
