//! Typed client for the CMS management API.

use crate::upstream::{ClientError, endpoint, send_empty, send_json};
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct PersonalizeMetadata {
    pub experience_uid: String,
    pub experience_short_uid: String,
    #[serde(default)]
    pub project_uid: Option<String>,
}

/// A CMS variant group. Groups created for a Personalize experience carry
/// its identifiers in `personalize_metadata`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct VariantGroup {
    pub uid: String,
    pub name: String,
    #[serde(default)]
    pub personalize_metadata: Option<PersonalizeMetadata>,
}

#[derive(Deserialize)]
struct VariantGroupList {
    variant_groups: Vec<VariantGroup>,
}

#[derive(Serialize)]
struct LinkContentTypes<'a> {
    content_types: [LinkedContentType<'a>; 1],
}

#[derive(Serialize)]
struct LinkedContentType<'a> {
    uid: &'a str,
    status: &'static str,
}

#[derive(Serialize)]
struct EntryBody<'a, T: Serialize> {
    entry: &'a T,
}

#[derive(Deserialize)]
struct EntryVariantResponse {
    entry: EntryVariant,
}

#[derive(Deserialize)]
struct EntryVariant {
    #[serde(rename = "_variant")]
    variant: EntryVariantMeta,
}

#[derive(Deserialize)]
struct EntryVariantMeta {
    #[serde(rename = "_uid")]
    uid: String,
}

#[derive(Serialize)]
struct PublishRequest<'a> {
    entry: PublishTarget<'a>,
}

#[derive(Serialize)]
struct PublishTarget<'a> {
    environments: [&'a str; 1],
    locales: [&'a str; 1],
    variants: [PublishVariant<'a>; 1],
}

#[derive(Serialize)]
struct PublishVariant<'a> {
    uid: &'a str,
}

#[derive(Deserialize)]
struct EnvironmentResponse {
    environment: Environment,
}

#[derive(Deserialize)]
struct Environment {
    uid: String,
}

#[derive(Deserialize)]
struct EntryList {
    entries: Vec<Value>,
}

#[derive(Deserialize)]
struct EntryResponse {
    entry: Value,
}

pub struct CmsClient {
    client: reqwest::Client,
    base_url: url::Url,
    api_key: String,
    management_token: String,
    locale: String,
    /// Publish target. Its uid is resolved once and kept for the process lifetime.
    environment: String,
    environment_uid: OnceCell<String>,
}

impl CmsClient {
    pub fn new(
        client: reqwest::Client,
        base_url: url::Url,
        api_key: String,
        management_token: String,
        locale: String,
        environment: String,
    ) -> Self {
        CmsClient {
            client,
            base_url,
            api_key,
            management_token,
            locale,
            environment,
            environment_uid: OnceCell::new(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, endpoint(&self.base_url, path))
            .header("api_key", &self.api_key)
            .header("authorization", &self.management_token)
    }

    pub async fn link_content_type(
        &self,
        content_type_uid: &str,
        variant_group_uid: &str,
    ) -> Result<(), ClientError> {
        let body = LinkContentTypes {
            content_types: [LinkedContentType {
                uid: content_type_uid,
                status: "linked",
            }],
        };
        let path = format!("variant_groups/{variant_group_uid}/content_types");
        send_empty(
            self.request(reqwest::Method::PUT, &path).json(&body),
            &format!("variant group {variant_group_uid}"),
        )
        .await
    }

    /// Writes `content` as the `variant_uid` variant of an entry and returns
    /// the uid of the created entry variant.
    pub async fn create_entry_variant(
        &self,
        content_type_uid: &str,
        entry_uid: &str,
        variant_uid: &str,
        content: &Value,
    ) -> Result<String, ClientError> {
        let path =
            format!("content_types/{content_type_uid}/entries/{entry_uid}/variants/{variant_uid}");
        let request = self
            .request(reqwest::Method::PUT, &path)
            .query(&[("locale", self.locale.as_str())])
            .json(&EntryBody { entry: content });

        let response: EntryVariantResponse =
            send_json(request, &format!("entry {entry_uid}")).await?;
        Ok(response.entry.variant.uid)
    }

    /// Publishes an entry variant to the configured environment. Publishing a
    /// variant the CMS does not know fails with `NotFound`.
    pub async fn publish_entry_variant(
        &self,
        content_type_uid: &str,
        entry_uid: &str,
        variant_entry_uid: &str,
    ) -> Result<(), ClientError> {
        let environment_uid = self.environment_uid().await?;
        let body = PublishRequest {
            entry: PublishTarget {
                environments: [environment_uid.as_str()],
                locales: [self.locale.as_str()],
                variants: [PublishVariant {
                    uid: variant_entry_uid,
                }],
            },
        };
        let path = format!("content_types/{content_type_uid}/entries/{entry_uid}/publish");
        send_empty(
            self.request(reqwest::Method::POST, &path).json(&body),
            &format!("entry variant {variant_entry_uid}"),
        )
        .await
    }

    pub async fn list_variant_groups(&self) -> Result<Vec<VariantGroup>, ClientError> {
        let list: VariantGroupList = send_json(
            self.request(reqwest::Method::GET, "variant_groups"),
            "variant groups",
        )
        .await?;
        Ok(list.variant_groups)
    }

    /// The variant group the CMS created for a Personalize experience. The CMS
    /// creates it asynchronously, so `NotFound` may be transient.
    pub async fn find_variant_group(
        &self,
        experience_uid: &str,
    ) -> Result<VariantGroup, ClientError> {
        let request = self
            .request(reqwest::Method::GET, "variant_groups")
            .query(&[("experience_uid", experience_uid)]);
        let list: VariantGroupList = send_json(request, "variant groups").await?;

        list.variant_groups
            .into_iter()
            .find(|group| {
                group
                    .personalize_metadata
                    .as_ref()
                    .is_some_and(|meta| meta.experience_uid == experience_uid)
            })
            .ok_or_else(|| {
                ClientError::NotFound(format!("variant group for experience {experience_uid}"))
            })
    }

    pub async fn environment_uid(&self) -> Result<String, ClientError> {
        let name = self.environment.as_str();
        let uid = self
            .environment_uid
            .get_or_try_init(|| async {
                let path = format!("environments/{name}");
                let response: EnvironmentResponse = send_json(
                    self.request(reqwest::Method::GET, &path),
                    &format!("environment {name}"),
                )
                .await?;
                tracing::info!(environment = name, uid = %response.environment.uid, "resolved environment");
                Ok::<_, ClientError>(response.environment.uid)
            })
            .await?;
        Ok(uid.clone())
    }

    pub fn is_environment_resolved(&self) -> bool {
        self.environment_uid.initialized()
    }

    pub async fn query_entries(
        &self,
        content_type_uid: &str,
        query: &Value,
    ) -> Result<Vec<Value>, ClientError> {
        let path = format!("content_types/{content_type_uid}/entries");
        let request = self
            .request(reqwest::Method::GET, &path)
            .query(&[("query", query.to_string()), ("locale", self.locale.clone())]);
        let list: EntryList = send_json(request, &format!("{content_type_uid} entries")).await?;
        Ok(list.entries)
    }

    pub async fn create_entry<T: Serialize>(
        &self,
        content_type_uid: &str,
        entry: &T,
    ) -> Result<Value, ClientError> {
        let path = format!("content_types/{content_type_uid}/entries");
        let request = self
            .request(reqwest::Method::POST, &path)
            .query(&[("locale", self.locale.as_str())])
            .json(&EntryBody { entry });
        let response: EntryResponse =
            send_json(request, &format!("{content_type_uid} entry")).await?;
        Ok(response.entry)
    }

    pub async fn update_entry<T: Serialize>(
        &self,
        content_type_uid: &str,
        entry_uid: &str,
        entry: &T,
    ) -> Result<Value, ClientError> {
        let path = format!("content_types/{content_type_uid}/entries/{entry_uid}");
        let request = self
            .request(reqwest::Method::PUT, &path)
            .query(&[("locale", self.locale.as_str())])
            .json(&EntryBody { entry });
        let response: EntryResponse = send_json(request, &format!("entry {entry_uid}")).await?;
        Ok(response.entry)
    }
}
