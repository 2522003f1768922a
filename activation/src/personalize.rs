//! Typed client for the Personalize management API.

use crate::types::AccessToken;
use crate::upstream::{ClientError, check_status, endpoint, send_json};
use reqwest::{RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};

/// Matches users whose custom attribute `attribute_uid` equals `value`.
#[derive(Clone, Debug, PartialEq)]
pub struct AttributeRule {
    pub attribute_uid: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VariantConfig {
    pub name: String,
    pub audience_uids: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct CreatedExperience {
    pub uid: String,
    #[serde(rename = "shortUid")]
    pub short_uid: String,
}

// Request schemas

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AudienceRequest<'a> {
    name: &'a str,
    description: String,
    definition: RuleCombination<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RuleCombination<'a> {
    #[serde(rename = "__type")]
    kind: &'static str,
    combination_type: &'static str,
    rules: Vec<Rule<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Rule<'a> {
    #[serde(rename = "__type")]
    kind: &'static str,
    attribute: AttributeReference<'a>,
    attribute_match_condition: &'static str,
    attribute_match_options: StringMatchOptions<'a>,
    invert_condition: bool,
}

#[derive(Serialize)]
struct AttributeReference<'a> {
    #[serde(rename = "__type")]
    kind: &'static str,
    #[serde(rename = "ref")]
    uid: &'a str,
}

#[derive(Serialize)]
struct StringMatchOptions<'a> {
    #[serde(rename = "__type")]
    kind: &'static str,
    value: &'a str,
}

impl<'a> From<&'a AttributeRule> for Rule<'a> {
    fn from(rule: &'a AttributeRule) -> Self {
        Rule {
            kind: "Rule",
            attribute: AttributeReference {
                kind: "CustomAttributeReference",
                uid: &rule.attribute_uid,
            },
            attribute_match_condition: "STRING_EQUALS",
            attribute_match_options: StringMatchOptions {
                kind: "StringMatchOptions",
                value: &rule.value,
            },
            invert_condition: false,
        }
    }
}

#[derive(Serialize)]
struct ExperienceRequest<'a> {
    name: &'a str,
    #[serde(rename = "__type")]
    kind: &'static str,
    audiences: [&'a str; 1],
}

#[derive(Serialize)]
struct VersionRequest<'a> {
    status: &'static str,
    variants: Vec<SegmentedVariant<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SegmentedVariant<'a> {
    #[serde(rename = "__type")]
    kind: &'static str,
    name: &'a str,
    audiences: &'a [String],
    audience_combination_type: &'static str,
}

// Response schemas

#[derive(Deserialize)]
struct Created {
    uid: String,
}

/// Client for a single Personalize project. Every call is authorized with the
/// bearer token passed in by the caller.
pub struct PersonalizeClient {
    client: reqwest::Client,
    base_url: url::Url,
    project_uid: String,
}

impl PersonalizeClient {
    pub fn new(client: reqwest::Client, base_url: url::Url, project_uid: String) -> Self {
        PersonalizeClient {
            client,
            base_url,
            project_uid,
        }
    }

    fn post(&self, path: &str, token: &AccessToken) -> RequestBuilder {
        self.client
            .post(endpoint(&self.base_url, path))
            .bearer_auth(token.as_str())
            .header("x-project-uid", &self.project_uid)
    }

    pub async fn create_audience(
        &self,
        token: &AccessToken,
        name: &str,
        rules: &[AttributeRule],
    ) -> Result<String, ClientError> {
        let body = AudienceRequest {
            name,
            description: format!("Members of {name}"),
            definition: RuleCombination {
                kind: "RuleCombination",
                combination_type: "AND",
                rules: rules.iter().map(Rule::from).collect(),
            },
        };

        let created: Created =
            send_json(self.post("audiences", token).json(&body), "audience").await?;
        Ok(created.uid)
    }

    pub async fn create_experience(
        &self,
        token: &AccessToken,
        audience_uid: &str,
        name: &str,
    ) -> Result<CreatedExperience, ClientError> {
        let body = ExperienceRequest {
            name,
            kind: "SEGMENTED",
            audiences: [audience_uid],
        };

        send_json(self.post("experiences", token).json(&body), "experience").await
    }

    /// Adds a draft version holding one segmented variant and returns its uid.
    pub async fn add_variant(
        &self,
        token: &AccessToken,
        experience_uid: &str,
        variant: &VariantConfig,
    ) -> Result<String, ClientError> {
        let body = VersionRequest {
            status: "DRAFT",
            variants: vec![SegmentedVariant {
                kind: "SegmentedVariant",
                name: &variant.name,
                audiences: &variant.audience_uids,
                audience_combination_type: "AND",
            }],
        };

        let path = format!("experiences/{experience_uid}/versions");
        let resource = format!("experience {experience_uid}");
        let created: Created = send_json(self.post(&path, token).json(&body), &resource).await?;
        Ok(created.uid)
    }

    /// Activates the experience's latest version. An experience that is
    /// already active is reported with 409 and treated as success.
    pub async fn activate_experience(
        &self,
        token: &AccessToken,
        experience_uid: &str,
    ) -> Result<(), ClientError> {
        let path = format!("experiences/{experience_uid}/activate");
        let response = self.post(&path, token).send().await?;

        if response.status() == StatusCode::CONFLICT {
            tracing::debug!(experience_uid, "experience already active");
            return Ok(());
        }

        check_status(response, &format!("experience {experience_uid}")).await?;
        Ok(())
    }
}
