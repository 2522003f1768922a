//! Drives the Challenge Pro activation for a team.
//!
//! The upstream services have no multi-step transaction, so activation is a
//! forward-only state machine: the next step is derived from the record's
//! cursor, the record is updated after every successful step, and a failed
//! step leaves the record where it was so the next call resumes there. Nothing
//! is rolled back.
//!
//! Activations for the same team are serialized on a per-team async lock. A
//! caller arriving while another activation for the team is in flight waits
//! for it and then continues from whatever state it reached. Team names are
//! compared case-insensitively, matching alias lookups.

use crate::cms::CmsClient;
use crate::config::ChallengeConfig;
use crate::content::{ContentError, ContentSource};
use crate::metrics_defs::{
    ACTIVATION_AUTH_RETRY, ACTIVATION_CACHE_HIT, ACTIVATION_FAILURE, ACTIVATION_STEP_DURATION,
};
use crate::personalize::{AttributeRule, PersonalizeClient, VariantConfig};
use crate::record::{ActivationState, ExperienceRecord, RecordError, Step, StepOutput};
use crate::token::TokenManager;
use crate::types::{AccessToken, experience_name, variant_alias};
use crate::upstream::ClientError;
use parking_lot::Mutex;
use shared::{counter, histogram};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ActivationError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Content(#[from] ContentError),

    #[error("inconsistent activation record: {0}")]
    Record(#[from] RecordError),
}

/// A step failed. The record stays cached in `state` for the next attempt.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("activation for {team} failed at {} (state {}): {error}", .step.as_str(), .state.as_str())]
pub struct ActivationFailure {
    pub team: String,
    pub state: ActivationState,
    pub step: Step,
    pub error: ActivationError,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Activation {
    pub variant_alias: String,
    pub record: ExperienceRecord,
    /// False when the record was already published and no step ran.
    pub progressed: bool,
}

pub struct Orchestrator {
    tokens: Arc<TokenManager>,
    personalize: PersonalizeClient,
    cms: Arc<CmsClient>,
    content: Arc<dyn ContentSource>,
    challenge: ChallengeConfig,
    records: Mutex<HashMap<String, Arc<tokio::sync::Mutex<ExperienceRecord>>>>,
}

impl Orchestrator {
    pub fn new(
        tokens: Arc<TokenManager>,
        personalize: PersonalizeClient,
        cms: Arc<CmsClient>,
        content: Arc<dyn ContentSource>,
        challenge: ChallengeConfig,
    ) -> Self {
        Orchestrator {
            tokens,
            personalize,
            cms,
            content,
            challenge,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub async fn activate(&self, team: &str) -> Result<Activation, ActivationFailure> {
        let slot = self.record_slot(team);
        let mut record = slot.lock().await;

        if record.is_complete() {
            counter!(ACTIVATION_CACHE_HIT).increment(1);
            tracing::debug!(team, "activation already complete");
            return self.completed(&record, false);
        }

        tracing::info!(team, state = record.state.as_str(), "starting activation");

        while let Some(step) = record.state.next_step() {
            let started = Instant::now();
            let applied = match self.run_step(step, &record).await {
                Ok(output) => record.apply(output).map_err(ActivationError::from),
                Err(err) => Err(err),
            };

            if let Err(error) = applied {
                counter!(ACTIVATION_FAILURE, "step" => step.as_str()).increment(1);
                tracing::error!(
                    team,
                    step = step.as_str(),
                    state = record.state.as_str(),
                    error = %error,
                    "activation step failed"
                );
                return Err(ActivationFailure {
                    team: team.to_string(),
                    state: record.state,
                    step,
                    error,
                });
            }

            histogram!(ACTIVATION_STEP_DURATION, "step" => step.as_str())
                .record(started.elapsed().as_secs_f64());
            tracing::info!(
                team,
                step = step.as_str(),
                state = record.state.as_str(),
                "activation step completed"
            );
        }

        self.completed(&record, true)
    }

    /// Snapshot of the team's record, waiting for any in-flight activation.
    #[cfg(test)]
    pub(crate) async fn record(&self, team: &str) -> Option<ExperienceRecord> {
        let slot = self.records.lock().get(&team.to_lowercase()).cloned()?;
        let record = slot.lock().await;
        Some(record.clone())
    }

    // The first caller's spelling is kept in the record.
    fn record_slot(&self, team: &str) -> Arc<tokio::sync::Mutex<ExperienceRecord>> {
        self.records
            .lock()
            .entry(team.to_lowercase())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(ExperienceRecord::new(team))))
            .clone()
    }

    fn completed(
        &self,
        record: &ExperienceRecord,
        progressed: bool,
    ) -> Result<Activation, ActivationFailure> {
        let Some(variant_alias) = record.alias() else {
            return Err(ActivationFailure {
                team: record.team.clone(),
                state: record.state,
                step: Step::PublishEntryVariant,
                error: RecordError::MissingField {
                    state: record.state,
                    field: "experienceShortUid",
                }
                .into(),
            });
        };

        Ok(Activation {
            variant_alias,
            record: record.clone(),
            progressed,
        })
    }

    /// Runs one step, refreshing the token and retrying once if the upstream
    /// rejects the credentials.
    async fn run_step(
        &self,
        step: Step,
        record: &ExperienceRecord,
    ) -> Result<StepOutput, ActivationError> {
        let token = self.tokens.access_token().await;
        match self.execute(step, record, &token).await {
            Err(ActivationError::Client(err)) if err.is_auth() => {
                counter!(ACTIVATION_AUTH_RETRY).increment(1);
                tracing::warn!(
                    team = %record.team,
                    step = step.as_str(),
                    error = %err,
                    "credentials rejected, refreshing token and retrying step"
                );
                let token = self.tokens.force_refresh(&token).await;
                self.execute(step, record, &token).await
            }
            result => result,
        }
    }

    async fn execute(
        &self,
        step: Step,
        record: &ExperienceRecord,
        token: &AccessToken,
    ) -> Result<StepOutput, ActivationError> {
        let team = record.team.as_str();
        let challenge = &self.challenge;

        let output = match step {
            Step::CreateAudience => {
                let rules = [AttributeRule {
                    attribute_uid: challenge.team_attribute_uid.clone(),
                    value: team.to_string(),
                }];
                let audience_uid = self
                    .personalize
                    .create_audience(token, team, &rules)
                    .await?;
                StepOutput::AudienceCreated { audience_uid }
            }
            Step::CreateExperience => {
                let audience_uid = record.require(&record.audience_uid, "audienceUid")?;
                let experience = self
                    .personalize
                    .create_experience(token, audience_uid, &experience_name(team))
                    .await?;
                StepOutput::ExperienceCreated {
                    experience_uid: experience.uid,
                    experience_short_uid: experience.short_uid,
                }
            }
            Step::AddVariant => {
                let audience_uid = record.require(&record.audience_uid, "audienceUid")?;
                let experience_uid = record.require(&record.experience_uid, "experienceUid")?;
                let variant = VariantConfig {
                    name: format!("{team} Challenge Pro"),
                    audience_uids: vec![audience_uid.to_string()],
                };
                let variant_uid = self
                    .personalize
                    .add_variant(token, experience_uid, &variant)
                    .await?;
                StepOutput::VariantAdded { variant_uid }
            }
            Step::ActivateExperience => {
                let experience_uid = record.require(&record.experience_uid, "experienceUid")?;
                self.personalize
                    .activate_experience(token, experience_uid)
                    .await?;
                StepOutput::Activated
            }
            Step::LinkContentType => {
                let experience_uid = record.require(&record.experience_uid, "experienceUid")?;
                let group = self.cms.find_variant_group(experience_uid).await?;
                self.cms
                    .link_content_type(&challenge.content_type_uid, &group.uid)
                    .await?;
                StepOutput::CmsLinked {
                    variant_group_uid: group.uid,
                }
            }
            Step::CreateEntryVariant => {
                let short_uid =
                    record.require(&record.experience_short_uid, "experienceShortUid")?;
                let content = self.content.generate(team).await?;
                let cms_variant_uid = self
                    .cms
                    .create_entry_variant(
                        &challenge.content_type_uid,
                        &challenge.entry_uid,
                        &variant_alias(short_uid),
                        &content,
                    )
                    .await?;
                StepOutput::VariantCreated { cms_variant_uid }
            }
            Step::PublishEntryVariant => {
                let cms_variant_uid = record.require(&record.cms_variant_uid, "cmsVariantUid")?;
                self.cms
                    .publish_entry_variant(
                        &challenge.content_type_uid,
                        &challenge.entry_uid,
                        cms_variant_uid,
                    )
                    .await?;
                StepOutput::Published
            }
        };

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{TestUpstreams, TEAM};
    use tokio::task::JoinSet;
    use wiremock::ResponseTemplate;

    #[tokio::test]
    async fn test_activation_is_idempotent() {
        let upstreams = TestUpstreams::start().await;
        upstreams.mount_happy_path(1).await;
        let orchestrator = upstreams.orchestrator();

        let first = orchestrator.activate(TEAM).await.unwrap();
        assert_eq!(first.variant_alias, "cs_personalize_a_0");
        assert_eq!(first.record.state, ActivationState::Published);
        assert_eq!(first.record.audience_uid.as_deref(), Some("aud1"));
        assert_eq!(first.record.variant_group_uid.as_deref(), Some("vg1"));
        assert_eq!(first.record.cms_variant_uid.as_deref(), Some("ev1"));

        // Every upstream mock expects exactly one call; the second activation
        // must be answered from the record.
        let second = orchestrator.activate(TEAM).await.unwrap();
        assert_eq!(second.record, first.record);
        assert_eq!(second.variant_alias, first.variant_alias);
        assert!(first.progressed);
        assert!(!second.progressed);
    }

    #[tokio::test]
    async fn test_auth_error_refreshes_and_retries_once() {
        let upstreams = TestUpstreams::start().await;
        upstreams
            .mount_audience_with_token("static-token", ResponseTemplate::new(401), 1)
            .await;
        upstreams
            .mount_audience_with_token(
                "fresh-token",
                TestUpstreams::created("aud1"),
                1,
            )
            .await;
        upstreams.mount_token_refresh("fresh-token", 1).await;
        // Stop right after the audience step.
        upstreams
            .mount_experience(ResponseTemplate::new(500), 1)
            .await;

        let orchestrator = upstreams.orchestrator();
        let failure = orchestrator.activate(TEAM).await.unwrap_err();
        assert_eq!(failure.state, ActivationState::AudienceCreated);
        assert_eq!(failure.step, Step::CreateExperience);

        let record = orchestrator.record(TEAM).await.unwrap();
        assert_eq!(record.state, ActivationState::AudienceCreated);
        assert_eq!(record.audience_uid.as_deref(), Some("aud1"));
        assert_eq!(record.experience_uid, None);
    }

    #[tokio::test]
    async fn test_second_auth_failure_is_terminal() {
        let upstreams = TestUpstreams::start().await;
        upstreams
            .mount_audience_with_token("static-token", ResponseTemplate::new(401), 1)
            .await;
        upstreams
            .mount_audience_with_token("fresh-token", ResponseTemplate::new(403), 1)
            .await;
        upstreams.mount_token_refresh("fresh-token", 1).await;

        let orchestrator = upstreams.orchestrator();
        let failure = orchestrator.activate(TEAM).await.unwrap_err();
        assert_eq!(failure.state, ActivationState::Empty);
        assert_eq!(failure.step, Step::CreateAudience);
        assert!(matches!(
            failure.error,
            ActivationError::Client(ClientError::Auth { status: 403, .. })
        ));
    }

    #[tokio::test]
    async fn test_publish_failure_resumes_at_publish() {
        let upstreams = TestUpstreams::start().await;
        upstreams.mount_personalize_steps(1).await;
        upstreams.mount_cms_until_create(1).await;
        upstreams.mount_environment().await;
        upstreams
            .mount_publish(ResponseTemplate::new(500).set_body_string("publish queue full"), 1)
            .await;

        let orchestrator = upstreams.orchestrator();
        let failure = orchestrator.activate(TEAM).await.unwrap_err();
        assert_eq!(failure.state, ActivationState::VariantCreated);
        assert_eq!(failure.step, Step::PublishEntryVariant);
        assert_eq!(
            failure.error,
            ActivationError::Client(ClientError::Upstream {
                status: 500,
                body: "publish queue full".into()
            })
        );

        let record = orchestrator.record(TEAM).await.unwrap();
        assert_eq!(record.cms_variant_uid.as_deref(), Some("ev1"));

        // Only publish is called again; every other mock still expects one call.
        upstreams.mount_publish(ResponseTemplate::new(200), 1).await;
        let activation = orchestrator.activate(TEAM).await.unwrap();
        assert_eq!(activation.record.state, ActivationState::Published);
        assert_eq!(activation.variant_alias, "cs_personalize_a_0");
    }

    #[tokio::test]
    async fn test_resume_after_activation_failure() {
        let upstreams = TestUpstreams::start().await;
        upstreams.mount_audience(1).await;
        upstreams
            .mount_experience(TestUpstreams::experience_created(), 1)
            .await;
        upstreams.mount_variant(1).await;
        upstreams
            .mount_activate(ResponseTemplate::new(502), 1)
            .await;

        let orchestrator = upstreams.orchestrator();
        let failure = orchestrator.activate(TEAM).await.unwrap_err();
        assert_eq!(failure.state, ActivationState::VariantAdded);

        // Already-active is fine on the retry.
        upstreams
            .mount_activate(ResponseTemplate::new(409), 1)
            .await;
        upstreams.mount_cms_until_create(1).await;
        upstreams.mount_environment().await;
        upstreams.mount_publish(ResponseTemplate::new(200), 1).await;

        let activation = orchestrator.activate(TEAM).await.unwrap();
        assert_eq!(activation.record.state, ActivationState::Published);
    }

    #[tokio::test]
    async fn test_missing_variant_group_is_resumable() {
        let upstreams = TestUpstreams::start().await;
        upstreams.mount_personalize_steps(1).await;
        upstreams.mount_empty_variant_groups(1).await;

        let orchestrator = upstreams.orchestrator();
        let failure = orchestrator.activate(TEAM).await.unwrap_err();
        assert_eq!(failure.state, ActivationState::Activated);
        assert_eq!(failure.step, Step::LinkContentType);
        assert!(matches!(
            failure.error,
            ActivationError::Client(ClientError::NotFound(_))
        ));

        // The group shows up later; only the CMS steps run on the retry and
        // every Personalize mock still expects a single call.
        upstreams.mount_cms_until_create(1).await;
        upstreams.mount_environment().await;
        upstreams.mount_publish(ResponseTemplate::new(200), 1).await;

        let activation = orchestrator.activate(TEAM).await.unwrap();
        assert_eq!(activation.record.state, ActivationState::Published);
        assert_eq!(activation.record.variant_group_uid.as_deref(), Some("vg1"));
        assert!(activation.progressed);
        upstreams.server.verify().await;
    }

    #[tokio::test]
    async fn test_resume_from_each_failed_step() {
        let cases = [
            (
                Step::CreateAudience,
                "POST",
                "/personalize/audiences",
                ActivationState::Empty,
            ),
            (
                Step::CreateExperience,
                "POST",
                "/personalize/experiences",
                ActivationState::AudienceCreated,
            ),
            (
                Step::AddVariant,
                "POST",
                "/personalize/experiences/exp1/versions",
                ActivationState::ExperienceCreated,
            ),
            (
                Step::CreateEntryVariant,
                "PUT",
                "/v3/content_types/challenge/entries/blt_entry/variants/cs_personalize_a_0",
                ActivationState::CmsLinked,
            ),
        ];

        for (step, http_method, route, state) in cases {
            let upstreams = TestUpstreams::start().await;
            // Mounted first so it answers the first call only.
            upstreams.mount_failure_once(http_method, route).await;
            upstreams.mount_happy_path(1).await;
            let orchestrator = upstreams.orchestrator();

            let failure = orchestrator.activate(TEAM).await.unwrap_err();
            assert_eq!((failure.step, failure.state), (step, state), "{route}");
            assert_eq!(orchestrator.record(TEAM).await.unwrap().state, state);

            let activation = orchestrator.activate(TEAM).await.unwrap();
            assert_eq!(activation.record.state, ActivationState::Published, "{route}");
            assert_eq!(activation.variant_alias, "cs_personalize_a_0");

            // Every happy-path mock was hit exactly once across both calls.
            upstreams.server.verify().await;
        }
    }

    #[tokio::test]
    async fn test_team_names_are_case_insensitive() {
        let upstreams = TestUpstreams::start().await;
        upstreams.mount_happy_path(1).await;
        let orchestrator = upstreams.orchestrator();

        let first = orchestrator.activate("DAM").await.unwrap();
        assert!(first.progressed);

        let second = orchestrator.activate("dam").await.unwrap();
        assert!(!second.progressed);
        assert_eq!(second.variant_alias, first.variant_alias);
        assert_eq!(second.record.team, "DAM");
        assert_eq!(orchestrator.record("Dam").await, Some(first.record));
    }

    #[tokio::test]
    async fn test_concurrent_activations_share_one_run() {
        let upstreams = TestUpstreams::start().await;
        upstreams.mount_happy_path(1).await;
        let orchestrator = Arc::new(upstreams.orchestrator());

        let mut join_set = JoinSet::new();
        for _ in 0..4 {
            let orchestrator = orchestrator.clone();
            join_set.spawn(async move { orchestrator.activate(TEAM).await });
        }

        while let Some(result) = join_set.join_next().await {
            let activation = result.unwrap().unwrap();
            assert_eq!(activation.variant_alias, "cs_personalize_a_0");
        }
    }

    #[tokio::test]
    async fn test_teams_are_independent() {
        let upstreams = TestUpstreams::start().await;
        upstreams.mount_happy_path(1).await;
        let orchestrator = upstreams.orchestrator();

        orchestrator.activate(TEAM).await.unwrap();
        assert!(orchestrator.record("Search").await.is_none());
    }
}
