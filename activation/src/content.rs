//! Producers of the Challenge Pro entry-variant content.

use crate::config::ContentTemplate;
use async_trait::async_trait;
use serde_json::{Value, json};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("content generation failed: {0}")]
pub struct ContentError(pub String);

/// Generates the fields written into a team's entry variant.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn generate(&self, team: &str) -> Result<Value, ContentError>;
}

/// Renders fixed templates, replacing `{team}` with the team name.
pub struct TemplateContentSource {
    template: ContentTemplate,
}

impl TemplateContentSource {
    pub fn new(template: ContentTemplate) -> Self {
        TemplateContentSource { template }
    }
}

#[async_trait]
impl ContentSource for TemplateContentSource {
    async fn generate(&self, team: &str) -> Result<Value, ContentError> {
        Ok(json!({
            "title": self.template.title.replace("{team}", team),
            "description": self.template.description.replace("{team}", team),
        }))
    }
}
