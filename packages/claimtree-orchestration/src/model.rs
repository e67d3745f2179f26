//! Run inputs and the opaque stage payloads (summaries, cruxes)

use crate::error::{OrchestratorError, Result};
use crate::job::StageName;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One consultation comment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub speaker: Option<String>,
}

impl Comment {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            speaker: None,
        }
    }

    pub fn with_speaker(mut self, speaker: impl Into<String>) -> Self {
        self.speaker = Some(speaker.into());
        self
    }

    /// Speaker if known, else the comment id (each anonymous comment is its own voice)
    pub fn speaker_key(&self) -> &str {
        self.speaker.as_deref().unwrap_or(&self.id)
    }
}

/// Model settings for one stage. Prompt text is passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageConfig {
    pub model_name: String,
    pub system_prompt: String,
    pub user_prompt_template: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortStrategy {
    /// Distinct speakers behind a topic's claims
    #[default]
    NumPeople,
    /// Claims including nested duplicates
    NumClaims,
}

/// Provider credential. Never printed.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

/// Everything a run needs besides the runner config
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineInput {
    pub comments: Vec<Comment>,
    pub clustering: StageConfig,
    pub claims: StageConfig,
    pub dedup: StageConfig,
    pub summaries: StageConfig,
    #[serde(default)]
    pub cruxes: Option<StageConfig>,
    #[serde(default)]
    pub enable_cruxes: bool,
    #[serde(default)]
    pub sort_strategy: SortStrategy,
    pub api_key: ApiKey,
}

impl PipelineInput {
    pub fn stage_config(&self, stage: StageName) -> Option<&StageConfig> {
        match stage {
            StageName::Clustering => Some(&self.clustering),
            StageName::Claims => Some(&self.claims),
            StageName::SortAndDeduplicate => Some(&self.dedup),
            StageName::Summaries => Some(&self.summaries),
            StageName::Cruxes => self.cruxes.as_ref(),
        }
    }

    pub fn is_required(&self, stage: StageName) -> bool {
        !stage.is_optional() || self.enable_cruxes
    }

    /// Stages this run executes, in order
    pub fn required_stages(&self) -> Vec<StageName> {
        StageName::ALL
            .into_iter()
            .filter(|stage| self.is_required(*stage))
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.enable_cruxes && self.cruxes.is_none() {
            return Err(OrchestratorError::invalid_input(
                "enableCruxes is set but no cruxes stage config was given",
            ));
        }

        let mut seen = HashSet::with_capacity(self.comments.len());
        for comment in &self.comments {
            if comment.id.is_empty() {
                return Err(OrchestratorError::invalid_input("comment with empty id"));
            }
            if !seen.insert(comment.id.as_str()) {
                return Err(OrchestratorError::invalid_input(format!(
                    "duplicate comment id {}",
                    comment.id
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicSummary {
    pub topic_name: String,
    pub summary: String,
}

/// Statement that splits participants into agree/disagree groups
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Crux {
    pub topic_name: String,
    pub subtopic_name: String,
    pub crux_claim: String,
    #[serde(default)]
    pub agree: Vec<String>,
    #[serde(default)]
    pub disagree: Vec<String>,
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CruxReport {
    pub cruxes: Vec<Crux>,
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_debug_is_redacted() {
        let key = ApiKey::new("sk-very-secret");
        let printed = format!("{:?}", key);

        assert!(!printed.contains("secret"));
        assert_eq!(key.expose(), "sk-very-secret");
    }

    #[test]
    fn test_input_debug_does_not_leak_key() {
        let input = fixtures::input(vec![], false);
        assert!(!format!("{:?}", input).contains("sk-test"));
    }

    #[test]
    fn test_required_stages_without_cruxes() {
        let input = fixtures::input(vec![], false);
        assert_eq!(
            input.required_stages(),
            vec![
                StageName::Clustering,
                StageName::Claims,
                StageName::SortAndDeduplicate,
                StageName::Summaries,
            ]
        );
    }

    #[test]
    fn test_required_stages_with_cruxes() {
        let input = fixtures::input(vec![], true);
        assert_eq!(input.required_stages().len(), 5);
        assert!(input.stage_config(StageName::Cruxes).is_some());
    }

    #[test]
    fn test_validate_rejects_cruxes_without_config() {
        let mut input = fixtures::input(vec![], true);
        input.cruxes = None;
        assert!(input.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_comment_ids() {
        let input = fixtures::input(
            vec![Comment::new("c1", "a"), Comment::new("c1", "b")],
            false,
        );
        assert!(input.validate().is_err());
    }

    #[test]
    fn test_speaker_key_falls_back_to_id() {
        assert_eq!(Comment::new("c1", "x").speaker_key(), "c1");
        assert_eq!(
            Comment::new("c1", "x").with_speaker("Ada").speaker_key(),
            "Ada"
        );
    }

    #[test]
    fn test_input_deserializes_from_json() {
        let json = r#"{
            "comments": [{"id": "c1", "text": "hello", "speaker": "Ada"}],
            "clustering": {"modelName": "m", "systemPrompt": "", "userPromptTemplate": ""},
            "claims": {"modelName": "m", "systemPrompt": "", "userPromptTemplate": ""},
            "dedup": {"modelName": "m", "systemPrompt": "", "userPromptTemplate": ""},
            "summaries": {"modelName": "m", "systemPrompt": "", "userPromptTemplate": ""},
            "sortStrategy": "num_claims",
            "apiKey": "sk-1"
        }"#;

        let input: PipelineInput = serde_json::from_str(json).unwrap();
        assert_eq!(input.sort_strategy, SortStrategy::NumClaims);
        assert!(!input.enable_cruxes);
        assert_eq!(input.comments[0].speaker_key(), "Ada");
        input.validate().unwrap();
    }
}
