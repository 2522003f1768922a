//! Per-team activation progress.
//!
//! An [`ExperienceRecord`] is the cursor of the activation state machine. Each
//! completed step is applied through [`ExperienceRecord::apply`], which only
//! accepts the output of the step that follows the current state. Fields are
//! therefore populated strictly in dependency order.

use crate::types::variant_alias;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivationState {
    Empty,
    AudienceCreated,
    ExperienceCreated,
    VariantAdded,
    Activated,
    CmsLinked,
    VariantCreated,
    Published,
}

impl ActivationState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActivationState::Empty => "EMPTY",
            ActivationState::AudienceCreated => "AUDIENCE_CREATED",
            ActivationState::ExperienceCreated => "EXPERIENCE_CREATED",
            ActivationState::VariantAdded => "VARIANT_ADDED",
            ActivationState::Activated => "ACTIVATED",
            ActivationState::CmsLinked => "CMS_LINKED",
            ActivationState::VariantCreated => "VARIANT_CREATED",
            ActivationState::Published => "PUBLISHED",
        }
    }

    /// The step that moves a record out of this state, `None` once published.
    pub const fn next_step(&self) -> Option<Step> {
        match self {
            ActivationState::Empty => Some(Step::CreateAudience),
            ActivationState::AudienceCreated => Some(Step::CreateExperience),
            ActivationState::ExperienceCreated => Some(Step::AddVariant),
            ActivationState::VariantAdded => Some(Step::ActivateExperience),
            ActivationState::Activated => Some(Step::LinkContentType),
            ActivationState::CmsLinked => Some(Step::CreateEntryVariant),
            ActivationState::VariantCreated => Some(Step::PublishEntryVariant),
            ActivationState::Published => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    CreateAudience,
    CreateExperience,
    AddVariant,
    ActivateExperience,
    LinkContentType,
    CreateEntryVariant,
    PublishEntryVariant,
}

impl Step {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Step::CreateAudience => "create_audience",
            Step::CreateExperience => "create_experience",
            Step::AddVariant => "add_variant",
            Step::ActivateExperience => "activate_experience",
            Step::LinkContentType => "link_content_type",
            Step::CreateEntryVariant => "create_entry_variant",
            Step::PublishEntryVariant => "publish_entry_variant",
        }
    }
}

/// What a successful step produced.
#[derive(Clone, Debug, PartialEq)]
pub enum StepOutput {
    AudienceCreated {
        audience_uid: String,
    },
    ExperienceCreated {
        experience_uid: String,
        experience_short_uid: String,
    },
    VariantAdded {
        variant_uid: String,
    },
    Activated,
    CmsLinked {
        variant_group_uid: String,
    },
    VariantCreated {
        cms_variant_uid: String,
    },
    Published,
}

impl StepOutput {
    fn step(&self) -> Step {
        match self {
            StepOutput::AudienceCreated { .. } => Step::CreateAudience,
            StepOutput::ExperienceCreated { .. } => Step::CreateExperience,
            StepOutput::VariantAdded { .. } => Step::AddVariant,
            StepOutput::Activated => Step::ActivateExperience,
            StepOutput::CmsLinked { .. } => Step::LinkContentType,
            StepOutput::VariantCreated { .. } => Step::CreateEntryVariant,
            StepOutput::Published => Step::PublishEntryVariant,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("step {step:?} does not follow state {state:?}")]
    OutOfOrder { state: ActivationState, step: Step },

    #[error("record in state {state:?} is missing {field}")]
    MissingField {
        state: ActivationState,
        field: &'static str,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperienceRecord {
    pub team: String,
    pub state: ActivationState,
    pub audience_uid: Option<String>,
    pub experience_uid: Option<String>,
    pub experience_short_uid: Option<String>,
    pub variant_uid: Option<String>,
    pub variant_group_uid: Option<String>,
    pub cms_variant_uid: Option<String>,
}

impl ExperienceRecord {
    pub fn new<T: Into<String>>(team: T) -> Self {
        ExperienceRecord {
            team: team.into(),
            state: ActivationState::Empty,
            audience_uid: None,
            experience_uid: None,
            experience_short_uid: None,
            variant_uid: None,
            variant_group_uid: None,
            cms_variant_uid: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state == ActivationState::Published
    }

    pub fn alias(&self) -> Option<String> {
        self.experience_short_uid.as_deref().map(variant_alias)
    }

    pub fn apply(&mut self, output: StepOutput) -> Result<(), RecordError> {
        let step = output.step();
        if self.state.next_step() != Some(step) {
            return Err(RecordError::OutOfOrder {
                state: self.state,
                step,
            });
        }

        self.state = match output {
            StepOutput::AudienceCreated { audience_uid } => {
                self.audience_uid = Some(audience_uid);
                ActivationState::AudienceCreated
            }
            StepOutput::ExperienceCreated {
                experience_uid,
                experience_short_uid,
            } => {
                self.experience_uid = Some(experience_uid);
                self.experience_short_uid = Some(experience_short_uid);
                ActivationState::ExperienceCreated
            }
            StepOutput::VariantAdded { variant_uid } => {
                self.variant_uid = Some(variant_uid);
                ActivationState::VariantAdded
            }
            StepOutput::Activated => ActivationState::Activated,
            StepOutput::CmsLinked { variant_group_uid } => {
                self.variant_group_uid = Some(variant_group_uid);
                ActivationState::CmsLinked
            }
            StepOutput::VariantCreated { cms_variant_uid } => {
                self.cms_variant_uid = Some(cms_variant_uid);
                ActivationState::VariantCreated
            }
            StepOutput::Published => ActivationState::Published,
        };
        Ok(())
    }

    /// Reads a field an earlier step must have populated.
    pub fn require<'a>(
        &self,
        field: &'a Option<String>,
        name: &'static str,
    ) -> Result<&'a str, RecordError> {
        field.as_deref().ok_or(RecordError::MissingField {
            state: self.state,
            field: name,
        })
    }
}
