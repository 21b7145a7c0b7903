pub mod client;
pub mod parsing;
pub mod prompts;

use agent_core::settings::LlmSettings;
use agent_core::{
    ContentGenerator, CoreError, Decision, DecisionProposal, Draft, DraftRequest, Evaluation,
    FeedItem, LlmError, Persona, QualityEvaluator,
};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

pub use client::{ChatMessage, OpenRouterClient};

const DECIDE_TEMPERATURE: f32 = 0.3;
const DRAFT_TEMPERATURE: f32 = 0.8;
const EVALUATE_TEMPERATURE: f32 = 0.0;

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub approval_threshold: f64,
    pub timeout: Duration,
}

impl LlmConfig {
    pub fn from_settings(settings: &LlmSettings, api_key: &str) -> Self {
        Self {
            base_url: settings.base_url.clone(),
            api_key: api_key.to_string(),
            model: settings.model.clone(),
            approval_threshold: settings.approval_threshold,
            timeout: Duration::from_secs(settings.request_timeout_seconds),
        }
    }
}

/// Content generator and quality evaluator backed by one OpenRouter model.
#[derive(Debug, Clone)]
pub struct OpenRouterProvider {
    client: OpenRouterClient,
    approval_threshold: f64,
}

impl OpenRouterProvider {
    pub fn new(config: LlmConfig) -> Result<Self, CoreError> {
        let client = OpenRouterClient::new(
            &config.base_url,
            &config.api_key,
            &config.model,
            config.timeout,
        )?;
        info!("LLM provider ready (model {})", config.model);
        Ok(Self {
            client,
            approval_threshold: config.approval_threshold,
        })
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }
}

#[async_trait]
impl ContentGenerator for OpenRouterProvider {
    async fn decide(
        &self,
        feed: &[FeedItem],
        persona: &Persona,
        context: Option<&str>,
    ) -> Result<DecisionProposal, CoreError> {
        let messages = [
            ChatMessage::system(prompts::identity(persona)),
            ChatMessage::user(prompts::decide(feed, context)),
        ];
        let reply = self.client.complete(&messages, DECIDE_TEMPERATURE).await?;
        debug!("Decision reply: {}", reply);

        let proposal = parsing::parse_decision(&reply, feed, context)?;
        info!(
            "Model chose {} (target {:?})",
            proposal.decision, proposal.target_item_id
        );
        Ok(proposal)
    }

    async fn draft(&self, request: &DraftRequest, persona: &Persona) -> Result<Draft, CoreError> {
        let prompt = match (request.decision, &request.target) {
            (Decision::Post, _) => {
                prompts::draft_post(request.context.as_deref(), request.reason.as_deref())
            }
            (Decision::Comment, Some(target)) => {
                prompts::draft_comment(target, request.context.as_deref())
            }
            (Decision::Comment, None) => {
                return Err(LlmError::InvalidDecision {
                    reason: "comment draft requested without a target post".to_string(),
                }
                .into())
            }
            (other, _) => {
                return Err(LlmError::InvalidDecision {
                    reason: format!("{} does not take a draft", other),
                }
                .into())
            }
        };

        let messages = [
            ChatMessage::system(prompts::identity(persona)),
            ChatMessage::user(prompt),
        ];
        let reply = self.client.complete(&messages, DRAFT_TEMPERATURE).await?;

        let draft = match request.decision {
            Decision::Post => parsing::parse_post_draft(&reply)?,
            _ => parsing::parse_comment_draft(&reply)?,
        };
        debug!("Drafted {} ({} chars)", request.decision, draft.content.len());
        Ok(draft)
    }
}

#[async_trait]
impl QualityEvaluator for OpenRouterProvider {
    async fn evaluate(&self, draft: &Draft, persona: &Persona) -> Result<Evaluation, CoreError> {
        let messages = [
            ChatMessage::system(prompts::EVALUATOR_SYSTEM),
            ChatMessage::user(prompts::evaluate(draft, persona)),
        ];
        let reply = self.client.complete(&messages, EVALUATE_TEMPERATURE).await?;

        let evaluation = parsing::parse_evaluation(&reply, self.approval_threshold)?;
        info!(
            "Draft {} (score {:?}): {}",
            if evaluation.accepted { "accepted" } else { "rejected" },
            evaluation.score,
            evaluation.reason
        );
        Ok(evaluation)
    }
}
