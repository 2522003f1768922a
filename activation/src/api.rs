use crate::alias_cache::AliasCache;
use crate::cms::CmsClient;
use crate::config::{Config, ConfigError, Listener};
use crate::content::{ContentSource, TemplateContentSource};
use crate::orchestrator::{ActivationError, ActivationFailure, Orchestrator};
use crate::personalize::PersonalizeClient;
use crate::record::ActivationState;
use crate::token::TokenManager;
use crate::upstream::{ClientError, http_client};
use crate::users::{UserDirectory, UserError, UserProfile};
use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(thiserror::Error, Debug)]
pub enum ServeError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Everything the handlers share. Built once at startup.
pub struct AppState {
    orchestrator: Orchestrator,
    aliases: AliasCache,
    users: UserDirectory,
    cms: Arc<CmsClient>,
}

impl AppState {
    pub fn new(config: &Config, content: Arc<dyn ContentSource>) -> Result<Self, reqwest::Error> {
        let client = http_client(Duration::from_secs(config.http_timeout_secs))?;
        let credentials = &config.credentials;

        let tokens = Arc::new(TokenManager::new(
            client.clone(),
            &config.token_url,
            &credentials.access_token,
            credentials.oauth(),
        ));
        let personalize = PersonalizeClient::new(
            client.clone(),
            config.personalize_url.clone(),
            credentials.project_uid.clone(),
        );
        let cms = Arc::new(CmsClient::new(
            client.clone(),
            config.management_url.clone(),
            credentials.api_key.clone(),
            credentials.management_token.clone(),
            config.challenge.locale.clone(),
            config.challenge.environment.clone(),
        ));

        Ok(AppState {
            orchestrator: Orchestrator::new(
                tokens,
                personalize,
                cms.clone(),
                content,
                config.challenge.clone(),
            ),
            aliases: AliasCache::new(cms.clone(), Duration::from_secs(config.alias_ttl_secs)),
            users: UserDirectory::new(client, config, cms.clone()),
            cms,
        })
    }

    /// State with the built-in template content source.
    pub fn from_config(config: &Config) -> Result<Self, reqwest::Error> {
        let content = Arc::new(TemplateContentSource::new(
            config.challenge.content.clone(),
        ));
        Self::new(config, content)
    }

    /// Ready once the publish environment has been resolved.
    pub fn is_ready(&self) -> bool {
        self.cms.is_environment_resolved()
    }

    /// Resolves the publish environment ahead of the first activation.
    pub async fn warm_up(&self) -> Result<(), ClientError> {
        let uid = self.cms.environment_uid().await?;
        tracing::debug!(uid = %uid, "environment warmed up");
        Ok(())
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/activation", post(missing_team))
        .route("/activation/", post(missing_team))
        .route("/activation/{team}", post(activate))
        .route("/alias", get(alias))
        .route("/users", get(get_user).post(create_user).put(update_user))
        .with_state(state)
}

pub async fn serve(listener: &Listener, state: Arc<AppState>) -> Result<(), ServeError> {
    let app = router(state);
    let addr = format!("{}:{}", listener.host, listener.port);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "activation API listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Activation(#[from] ActivationFailure),
}

impl ApiError {
    fn team_required() -> Self {
        ApiError::Validation("Team parameter required".into())
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Client(err) => client_status(err),
            ApiError::Activation(failure) => match &failure.error {
                ActivationError::Client(err) => client_status(err),
                ActivationError::Content(_) | ActivationError::Record(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

fn client_status(err: &ClientError) -> StatusCode {
    match err {
        ClientError::NotFound(_) => StatusCode::NOT_FOUND,
        ClientError::Transport(_) => StatusCode::BAD_GATEWAY,
        ClientError::Auth { .. }
        | ClientError::Upstream { .. }
        | ClientError::InvalidResponse(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<UserError> for ApiError {
    fn from(err: UserError) -> Self {
        match err {
            UserError::Validation(message) => ApiError::Validation(message.into()),
            err @ UserError::Conflict { .. } => ApiError::Conflict(err.to_string()),
            err @ UserError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            UserError::Config(err) => ApiError::Config(err),
            UserError::Client(err) => ApiError::Client(err),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<ActivationState>,
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(%status, error = %self, "request failed");
        } else {
            tracing::debug!(%status, error = %self, "request rejected");
        }

        let state = match &self {
            ApiError::Activation(failure) => Some(failure.state),
            _ => None,
        };
        let body = Json(ErrorBody {
            success: false,
            state,
            error: self.to_string(),
        });

        (status, body).into_response()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ActivationResponse {
    success: bool,
    variant_alias: String,
    state: ActivationState,
}

async fn missing_team() -> ApiError {
    ApiError::team_required()
}

async fn activate(
    State(state): State<Arc<AppState>>,
    team: Result<Path<String>, PathRejection>,
) -> Result<Json<ActivationResponse>, ApiError> {
    let Path(team) = team?;
    let team = team.trim();
    if team.is_empty() {
        return Err(ApiError::team_required());
    }

    let activation = state.orchestrator.activate(team).await?;
    // The new variant group only shows up in the alias map after a rebuild.
    if activation.progressed {
        state.aliases.invalidate().await;
    }

    Ok(Json(ActivationResponse {
        success: true,
        variant_alias: activation.variant_alias,
        state: activation.record.state,
    }))
}

#[derive(Deserialize, Debug)]
struct AliasParams {
    team: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AliasResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    variant_alias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

async fn alias(
    State(state): State<Arc<AppState>>,
    params: Result<Query<AliasParams>, QueryRejection>,
) -> Result<Json<AliasResponse>, ApiError> {
    let Query(params) = params?;
    let team = params.team.as_deref().map(str::trim).unwrap_or_default();
    if team.is_empty() {
        return Err(ApiError::team_required());
    }

    let response = match state.aliases.resolve(team).await? {
        Some(found) => AliasResponse {
            success: true,
            variant_alias: Some(found.alias),
            message: None,
        },
        None => AliasResponse {
            success: false,
            variant_alias: None,
            message: Some(format!("No Challenge Pro variant found for team {team}")),
        },
    };
    Ok(Json(response))
}

#[derive(Deserialize, Debug)]
struct UserParams {
    name: Option<String>,
    team: Option<String>,
}

#[derive(Serialize)]
struct UserResponse {
    success: bool,
    user: UserProfile,
}

impl UserResponse {
    fn ok(user: UserProfile) -> Json<Self> {
        Json(UserResponse {
            success: true,
            user,
        })
    }
}

async fn get_user(
    State(state): State<Arc<AppState>>,
    params: Result<Query<UserParams>, QueryRejection>,
) -> Result<Json<UserResponse>, ApiError> {
    let Query(params) = params?;
    let name = params.name.unwrap_or_default();
    let team = params.team.unwrap_or_default();
    let user = state.users.get(&name, &team).await?;
    Ok(UserResponse::ok(user))
}

async fn create_user(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<UserProfile>, JsonRejection>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    let Json(profile) = payload?;
    let user = state.users.create(&profile).await?;
    Ok((StatusCode::CREATED, UserResponse::ok(user)))
}

async fn update_user(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<UserProfile>, JsonRejection>,
) -> Result<Json<UserResponse>, ApiError> {
    let Json(profile) = payload?;
    let user = state.users.update(&profile).await?;
    Ok(UserResponse::ok(user))
}
