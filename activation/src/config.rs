use serde::Deserialize;
use std::fmt;
use url::Url;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("missing required credential: {0}")]
    MissingCredential(&'static str),

    #[error("incomplete OAuth configuration: {present} is set but {missing} is not")]
    PartialOAuth {
        present: &'static str,
        missing: &'static str,
    },

    #[error("missing required setting: {0}")]
    MissingSetting(&'static str),

    #[error("{0} cannot be 0")]
    ZeroDuration(&'static str),

    #[error("Port cannot be 0")]
    InvalidPort,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        Ok(())
    }
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 3000,
        }
    }
}

/// Credentials for the CMS, Delivery and Personalize APIs.
///
/// Required values default to empty strings so that a missing key is reported
/// by [`Credentials::validate`] by name instead of as a parse error.
#[derive(Clone, Deserialize, PartialEq, Default)]
pub struct Credentials {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub management_token: String,
    #[serde(default)]
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    #[serde(default)]
    pub org_uid: String,
    #[serde(default)]
    pub project_uid: String,
    pub delivery_token: Option<String>,
}

/// OAuth material needed to refresh the Personalize access token.
#[derive(Clone, Debug, PartialEq)]
pub struct OAuthCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

impl Credentials {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("api_key", &self.api_key),
            ("management_token", &self.management_token),
            ("access_token", &self.access_token),
            ("org_uid", &self.org_uid),
            ("project_uid", &self.project_uid),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingCredential(name));
            }
        }

        let oauth = [
            ("client_id", self.client_id.is_some()),
            ("client_secret", self.client_secret.is_some()),
            ("refresh_token", self.refresh_token.is_some()),
        ];
        let present = oauth.iter().find(|(_, set)| *set).map(|(name, _)| *name);
        let missing = oauth.iter().find(|(_, set)| !*set).map(|(name, _)| *name);
        if let (Some(present), Some(missing)) = (present, missing) {
            return Err(ConfigError::PartialOAuth { present, missing });
        }

        Ok(())
    }

    pub fn oauth(&self) -> Option<OAuthCredentials> {
        Some(OAuthCredentials {
            client_id: self.client_id.clone()?,
            client_secret: self.client_secret.clone()?,
            refresh_token: self.refresh_token.clone()?,
        })
    }

    pub fn delivery_token(&self) -> Result<&str, ConfigError> {
        self.delivery_token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
            .ok_or(ConfigError::MissingCredential("delivery_token"))
    }
}

// Secrets never reach the logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("management_token", &"<redacted>")
            .field("access_token", &"<redacted>")
            .field("oauth", &self.oauth().is_some())
            .field("org_uid", &self.org_uid)
            .field("project_uid", &self.project_uid)
            .field("delivery_token", &self.delivery_token.is_some())
            .finish()
    }
}

/// Templates rendered into the entry variant; `{team}` is replaced by the team name.
#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct ContentTemplate {
    #[serde(default = "default_title_template")]
    pub title: String,
    #[serde(default = "default_description_template")]
    pub description: String,
}

impl Default for ContentTemplate {
    fn default() -> Self {
        ContentTemplate {
            title: default_title_template(),
            description: default_description_template(),
        }
    }
}

/// Where the Challenge Pro content lives and how its audience is targeted.
#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct ChallengeConfig {
    #[serde(default)]
    pub content_type_uid: String,
    #[serde(default)]
    pub entry_uid: String,
    #[serde(default)]
    pub environment: String,
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default)]
    pub team_attribute_uid: String,
    #[serde(default)]
    pub content: ContentTemplate,
}

impl ChallengeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("challenge.content_type_uid", &self.content_type_uid),
            ("challenge.entry_uid", &self.entry_uid),
            ("challenge.environment", &self.environment),
            ("challenge.locale", &self.locale),
            ("challenge.team_attribute_uid", &self.team_attribute_uid),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingSetting(name));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct UsersConfig {
    #[serde(default = "default_user_content_type")]
    pub content_type_uid: String,
}

impl Default for UsersConfig {
    fn default() -> Self {
        UsersConfig {
            content_type_uid: default_user_content_type(),
        }
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Config {
    #[serde(default = "default_personalize_url")]
    pub personalize_url: Url,
    #[serde(default = "default_management_url")]
    pub management_url: Url,
    #[serde(default = "default_delivery_url")]
    pub delivery_url: Url,
    #[serde(default = "default_token_url")]
    pub token_url: Url,
    /// Applies to every upstream request, connect through body.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_alias_ttl_secs")]
    pub alias_ttl_secs: u64,
    pub credentials: Credentials,
    pub challenge: ChallengeConfig,
    #[serde(default)]
    pub users: UsersConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.credentials.validate()?;
        self.challenge.validate()?;

        if self.http_timeout_secs == 0 {
            return Err(ConfigError::ZeroDuration("http_timeout_secs"));
        }
        if self.alias_ttl_secs == 0 {
            return Err(ConfigError::ZeroDuration("alias_ttl_secs"));
        }
        if self.users.content_type_uid.trim().is_empty() {
            return Err(ConfigError::MissingSetting("users.content_type_uid"));
        }

        Ok(())
    }
}

fn parse_default(url: &str) -> Url {
    Url::parse(url).expect("default upstream URLs are valid")
}

fn default_personalize_url() -> Url {
    parse_default("https://personalize-api.contentstack.com")
}

fn default_management_url() -> Url {
    parse_default("https://api.contentstack.io/v3")
}

fn default_delivery_url() -> Url {
    parse_default("https://cdn.contentstack.io/v3")
}

fn default_token_url() -> Url {
    parse_default("https://app.contentstack.com/apps-api/token")
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_alias_ttl_secs() -> u64 {
    300
}

fn default_locale() -> String {
    "en-us".into()
}

fn default_user_content_type() -> String {
    "user".into()
}

fn default_title_template() -> String {
    "{team} Challenge Pro".into()
}

fn default_description_template() -> String {
    "Advanced challenges unlocked for team {team}.".into()
}
