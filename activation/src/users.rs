//! Learner profiles stored as CMS entries, keyed by `(name, team)`.
//!
//! Reads go through the Delivery API; writes go through the Management API.

use crate::cms::CmsClient;
use crate::config::{Config, ConfigError};
use crate::upstream::{ClientError, endpoint, send_json};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::Arc;

/// Entry fields owned by the CMS. They are stripped before a profile is
/// returned so that a read followed by a write does not echo them back.
const SYSTEM_FIELDS: &[&str] = &[
    "uid",
    "title",
    "locale",
    "tags",
    "ACL",
    "created_at",
    "created_by",
    "updated_at",
    "updated_by",
    "publish_details",
];

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum UserError {
    #[error("{0}")]
    Validation(&'static str),

    #[error("user {name} already exists in team {team}")]
    Conflict { name: String, team: String },

    #[error("user {name} not found in team {team}")]
    NotFound { name: String, team: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Client(#[from] ClientError),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: String,
    pub team: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub completed_modules: Vec<String>,
    /// Any further fields of the content type, passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserProfile {
    fn validate(&self) -> Result<(), UserError> {
        validate_key(&self.name, &self.team)
    }

    fn from_entry(entry: Value) -> Result<Self, ClientError> {
        let mut profile: UserProfile = serde_json::from_value(entry)
            .map_err(|e| ClientError::InvalidResponse(format!("user entry: {e}")))?;
        profile
            .extra
            .retain(|key, _| !key.starts_with('_') && !SYSTEM_FIELDS.contains(&key.as_str()));
        Ok(profile)
    }
}

fn validate_key(name: &str, team: &str) -> Result<(), UserError> {
    if name.trim().is_empty() {
        return Err(UserError::Validation("Name parameter required"));
    }
    if team.trim().is_empty() {
        return Err(UserError::Validation("Team parameter required"));
    }
    Ok(())
}

fn key_query(name: &str, team: &str) -> Value {
    json!({ "name": name, "team": team })
}

#[derive(Serialize)]
struct UserEntry<'a> {
    title: String,
    #[serde(flatten)]
    profile: &'a UserProfile,
}

impl<'a> From<&'a UserProfile> for UserEntry<'a> {
    fn from(profile: &'a UserProfile) -> Self {
        UserEntry {
            title: format!("{} ({})", profile.name, profile.team),
            profile,
        }
    }
}

#[derive(Deserialize)]
struct DeliveryEntries {
    entries: Vec<Value>,
}

pub struct UserDirectory {
    client: reqwest::Client,
    delivery_url: url::Url,
    api_key: String,
    delivery_token: Option<String>,
    content_type_uid: String,
    environment: String,
    locale: String,
    cms: Arc<CmsClient>,
}

impl UserDirectory {
    pub fn new(client: reqwest::Client, config: &Config, cms: Arc<CmsClient>) -> Self {
        UserDirectory {
            client,
            delivery_url: config.delivery_url.clone(),
            api_key: config.credentials.api_key.clone(),
            delivery_token: config.credentials.delivery_token().ok().map(str::to_owned),
            content_type_uid: config.users.content_type_uid.clone(),
            environment: config.challenge.environment.clone(),
            locale: config.challenge.locale.clone(),
            cms,
        }
    }

    /// Reads a published profile through the Delivery API.
    pub async fn get(&self, name: &str, team: &str) -> Result<UserProfile, UserError> {
        validate_key(name, team)?;
        let token = self
            .delivery_token
            .as_deref()
            .ok_or(ConfigError::MissingCredential("delivery_token"))?;

        let path = format!("content_types/{}/entries", self.content_type_uid);
        let request = self
            .client
            .get(endpoint(&self.delivery_url, &path))
            .header("api_key", &self.api_key)
            .header("access_token", token)
            .query(&[
                ("environment", self.environment.as_str()),
                ("locale", self.locale.as_str()),
                ("query", key_query(name, team).to_string().as_str()),
            ]);
        let list: DeliveryEntries = send_json(request, "user entries").await?;

        let Some(entry) = list.entries.into_iter().next() else {
            return Err(UserError::NotFound {
                name: name.to_string(),
                team: team.to_string(),
            });
        };
        Ok(UserProfile::from_entry(entry)?)
    }

    pub async fn create(&self, profile: &UserProfile) -> Result<UserProfile, UserError> {
        profile.validate()?;
        if self.find_uid(&profile.name, &profile.team).await?.is_some() {
            return Err(UserError::Conflict {
                name: profile.name.clone(),
                team: profile.team.clone(),
            });
        }

        let entry = self
            .cms
            .create_entry(&self.content_type_uid, &UserEntry::from(profile))
            .await?;
        tracing::info!(name = %profile.name, team = %profile.team, "created user profile");
        Ok(UserProfile::from_entry(entry)?)
    }

    pub async fn update(&self, profile: &UserProfile) -> Result<UserProfile, UserError> {
        profile.validate()?;
        let Some(uid) = self.find_uid(&profile.name, &profile.team).await? else {
            return Err(UserError::NotFound {
                name: profile.name.clone(),
                team: profile.team.clone(),
            });
        };

        let entry = self
            .cms
            .update_entry(&self.content_type_uid, &uid, &UserEntry::from(profile))
            .await?;
        tracing::info!(name = %profile.name, team = %profile.team, uid = %uid, "updated user profile");
        Ok(UserProfile::from_entry(entry)?)
    }

    /// Management API uid of the entry for `(name, team)`, if there is one.
    async fn find_uid(&self, name: &str, team: &str) -> Result<Option<String>, ClientError> {
        let entries = self
            .cms
            .query_entries(&self.content_type_uid, &key_query(name, team))
            .await?;

        match entries.first() {
            None => Ok(None),
            Some(entry) => entry
                .get("uid")
                .and_then(Value::as_str)
                .map(|uid| Some(uid.to_string()))
                .ok_or_else(|| ClientError::InvalidResponse("user entry without uid".into())),
        }
    }
}
