use serde::{Deserialize, Serialize};

use super::window::PickWindowConfig;

/// Second-factor delivery channels the login flow knows how to answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TwoFactorKind {
    /// Verification code delivered to an Outlook mailbox
    #[serde(rename = "OUTLOOK")]
    Outlook,
}

impl std::fmt::Display for TwoFactorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TwoFactorKind::Outlook => write!(f, "OUTLOOK"),
        }
    }
}

/// A two-factor method: which channel, and the address on that channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwoFactorMethod {
    pub kind: TwoFactorKind,
    pub identifier: String,
}

impl TwoFactorMethod {
    pub fn new(kind: TwoFactorKind, identifier: impl Into<String>) -> Self {
        Self {
            kind,
            identifier: identifier.into(),
        }
    }
}

/// Work skills a shift can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Skill {
    #[serde(rename = "Inbound")]
    Inbound,
    #[serde(rename = "Ship Dock")]
    ShipDock,
    #[serde(rename = "Sort")]
    Sort,
}

impl Skill {
    pub fn label(&self) -> &'static str {
        match self {
            Skill::Inbound => "Inbound",
            Skill::ShipDock => "Ship Dock",
            Skill::Sort => "Sort",
        }
    }

    /// Compare against a skill string as reported by the API.
    /// The API is inconsistent about case and separators ("SHIP_DOCK", "Ship Dock").
    pub fn matches(&self, api_skill: &str) -> bool {
        normalize_skill(self.label()) == normalize_skill(api_skill)
    }
}

fn normalize_skill(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
    pub two_factor: TwoFactorMethod,
    /// Higher runs first within a tick
    pub priority: i32,
    pub skills: Option<Vec<Skill>>,
}

// Keep passwords out of logs
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("two_factor", &self.two_factor)
            .field("priority", &self.priority)
            .field("skills", &self.skills)
            .finish()
    }
}

impl Credential {
    /// Whether an opportunity with this skill passes the user's skill filter.
    /// No filter means every skill is accepted.
    pub fn accepts_skill(&self, api_skill: &str) -> bool {
        match &self.skills {
            None => true,
            Some(skills) if skills.is_empty() => true,
            Some(skills) => skills.iter().any(|s| s.matches(api_skill)),
        }
    }
}

/// Everything one config file describes about one user.
#[derive(Debug, Clone, PartialEq)]
pub struct UserConfig {
    pub credential: Credential,
    pub pick_window: PickWindowConfig,
}

impl UserConfig {
    pub fn username(&self) -> &str {
        &self.credential.username
    }

    pub fn priority(&self) -> i32 {
        self.credential.priority
    }
}
