//! Mock upstreams shared by the orchestrator and API tests. One wiremock
//! server plays every upstream, each under its own path prefix.

use crate::cms::CmsClient;
use crate::config::{ChallengeConfig, ContentTemplate, Config, Credentials, UsersConfig};
use crate::content::TemplateContentSource;
use crate::orchestrator::Orchestrator;
use crate::personalize::PersonalizeClient;
use crate::token::TokenManager;
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub(crate) const TEAM: &str = "DAM";

pub(crate) struct TestUpstreams {
    pub server: MockServer,
}

impl TestUpstreams {
    pub async fn start() -> Self {
        TestUpstreams {
            server: MockServer::start().await,
        }
    }

    fn url(&self, prefix: &str) -> url::Url {
        url::Url::parse(&format!("{}{prefix}", self.server.uri())).unwrap()
    }

    pub fn config(&self) -> Config {
        Config {
            personalize_url: self.url("/personalize"),
            management_url: self.url("/v3"),
            delivery_url: self.url("/cdn/v3"),
            token_url: self.url("/oauth/token"),
            http_timeout_secs: 5,
            alias_ttl_secs: 300,
            credentials: Credentials {
                api_key: "blt123".into(),
                management_token: "cs-mgmt".into(),
                access_token: "static-token".into(),
                refresh_token: Some("refresh-1".into()),
                client_id: Some("client".into()),
                client_secret: Some("secret".into()),
                org_uid: "org1".into(),
                project_uid: "proj1".into(),
                delivery_token: Some("cs-delivery".into()),
            },
            challenge: ChallengeConfig {
                content_type_uid: "challenge".into(),
                entry_uid: "blt_entry".into(),
                environment: "development".into(),
                locale: "en-us".into(),
                team_attribute_uid: "team_name".into(),
                content: ContentTemplate::default(),
            },
            users: UsersConfig::default(),
        }
    }

    pub fn orchestrator(&self) -> Orchestrator {
        let config = self.config();
        let client = reqwest::Client::new();
        let tokens = Arc::new(TokenManager::new(
            client.clone(),
            &config.token_url,
            &config.credentials.access_token,
            config.credentials.oauth(),
        ));
        let personalize = PersonalizeClient::new(
            client.clone(),
            config.personalize_url.clone(),
            config.credentials.project_uid.clone(),
        );
        let cms = Arc::new(CmsClient::new(
            client,
            config.management_url.clone(),
            config.credentials.api_key.clone(),
            config.credentials.management_token.clone(),
            config.challenge.locale.clone(),
            config.challenge.environment.clone(),
        ));
        let content = Arc::new(TemplateContentSource::new(
            config.challenge.content.clone(),
        ));
        Orchestrator::new(tokens, personalize, cms, content, config.challenge)
    }

    pub fn created(uid: &str) -> ResponseTemplate {
        ResponseTemplate::new(201).set_body_json(json!({ "uid": uid }))
    }

    pub fn experience_created() -> ResponseTemplate {
        ResponseTemplate::new(201).set_body_json(json!({"uid": "exp1", "shortUid": "a"}))
    }

    async fn mount(&self, mock: wiremock::MockBuilder, response: ResponseTemplate, times: u64) {
        mock.respond_with(response)
            .up_to_n_times(times)
            .expect(times)
            .mount(&self.server)
            .await;
    }

    pub async fn mount_token_refresh(&self, token: &str, times: u64) {
        let response = ResponseTemplate::new(200)
            .set_body_json(json!({"access_token": token, "expires_in": 3600}));
        self.mount(
            Mock::given(method("POST")).and(path("/oauth/token")),
            response,
            times,
        )
        .await;
    }

    pub async fn mount_audience(&self, times: u64) {
        self.mount(
            Mock::given(method("POST")).and(path("/personalize/audiences")),
            Self::created("aud1"),
            times,
        )
        .await;
    }

    pub async fn mount_audience_with_token(
        &self,
        token: &str,
        response: ResponseTemplate,
        times: u64,
    ) {
        self.mount(
            Mock::given(method("POST"))
                .and(path("/personalize/audiences"))
                .and(header("authorization", format!("Bearer {token}"))),
            response,
            times,
        )
        .await;
    }

    pub async fn mount_experience(&self, response: ResponseTemplate, times: u64) {
        self.mount(
            Mock::given(method("POST")).and(path("/personalize/experiences")),
            response,
            times,
        )
        .await;
    }

    pub async fn mount_variant(&self, times: u64) {
        self.mount(
            Mock::given(method("POST")).and(path("/personalize/experiences/exp1/versions")),
            Self::created("ver1"),
            times,
        )
        .await;
    }

    pub async fn mount_activate(&self, response: ResponseTemplate, times: u64) {
        self.mount(
            Mock::given(method("POST")).and(path("/personalize/experiences/exp1/activate")),
            response,
            times,
        )
        .await;
    }

    pub async fn mount_personalize_steps(&self, times: u64) {
        self.mount_audience(times).await;
        self.mount_experience(Self::experience_created(), times)
            .await;
        self.mount_variant(times).await;
        self.mount_activate(ResponseTemplate::new(200), times).await;
    }

    /// Variant group lookup, content type link and entry variant creation.
    pub async fn mount_cms_until_create(&self, times: u64) {
        self.mount(
            Mock::given(method("GET"))
                .and(path("/v3/variant_groups"))
                .and(query_param("experience_uid", "exp1")),
            ResponseTemplate::new(200).set_body_json(json!({
                "variant_groups": [{
                    "uid": "vg1",
                    "name": "DAM-challenge-pro",
                    "personalize_metadata": {"experience_uid": "exp1", "experience_short_uid": "a"}
                }]
            })),
            times,
        )
        .await;
        self.mount(
            Mock::given(method("PUT")).and(path("/v3/variant_groups/vg1/content_types")),
            ResponseTemplate::new(200).set_body_json(json!({"notice": "linked"})),
            times,
        )
        .await;
        self.mount(
            Mock::given(method("PUT")).and(path(
                "/v3/content_types/challenge/entries/blt_entry/variants/cs_personalize_a_0",
            )),
            ResponseTemplate::new(201)
                .set_body_json(json!({"entry": {"_variant": {"_uid": "ev1"}}})),
            times,
        )
        .await;
    }

    pub async fn mount_empty_variant_groups(&self, times: u64) {
        self.mount(
            Mock::given(method("GET")).and(path("/v3/variant_groups")),
            ResponseTemplate::new(200).set_body_json(json!({"variant_groups": []})),
            times,
        )
        .await;
    }

    /// Listing of every variant group, as scanned by the alias cache.
    pub async fn mount_variant_group_listing(&self, groups: serde_json::Value, times: u64) {
        self.mount(
            Mock::given(method("GET")).and(path("/v3/variant_groups")),
            ResponseTemplate::new(200).set_body_json(json!({ "variant_groups": groups })),
            times,
        )
        .await;
    }

    pub async fn mount_environment(&self) {
        Mock::given(method("GET"))
            .and(path("/v3/environments/development"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"environment": {"uid": "env1", "name": "development"}})),
            )
            .mount(&self.server)
            .await;
    }

    pub async fn mount_publish(&self, response: ResponseTemplate, times: u64) {
        self.mount(
            Mock::given(method("POST"))
                .and(path("/v3/content_types/challenge/entries/blt_entry/publish")),
            response,
            times,
        )
        .await;
    }

    /// Fails the first `http_method` request to `route` with a 500. Mount it
    /// before the mocks that should answer later calls.
    pub async fn mount_failure_once(&self, http_method: &str, route: &str) {
        self.mount(
            Mock::given(method(http_method)).and(path(route)),
            ResponseTemplate::new(500),
            1,
        )
        .await;
    }

    pub async fn mount_happy_path(&self, times: u64) {
        self.mount_personalize_steps(times).await;
        self.mount_cms_until_create(times).await;
        self.mount_environment().await;
        self.mount_publish(ResponseTemplate::new(200), times).await;
    }
}
