//! Reply generator: rewrites the fallback message in a persona's voice.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::error::GenerationError;
use crate::llm::{ChatMessage, CompletionRequest, FinishReason, LlmProvider};
use crate::personas::Persona;

/// Turns (persona, base message) into an in-character email body.
pub struct ReplyGenerator {
    llm: Arc<dyn LlmProvider>,
}

impl ReplyGenerator {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    /// Generate an in-character rewrite of `base_message`.
    ///
    /// Provider errors and empty completions come back as `GenerationError`;
    /// nothing is retried here.
    pub async fn generate(
        &self,
        persona: &Persona,
        base_message: &str,
    ) -> Result<String, GenerationError> {
        let prompt = build_prompt(persona, base_message);
        debug!(persona = %persona.name, model = self.llm.model_name(), "Generating persona reply");

        let request = CompletionRequest::new(vec![ChatMessage::user(prompt)]);
        let response = match self.llm.complete(request).await {
            Ok(r) => r,
            Err(e) => {
                error!(persona = %persona.name, error = %e, "Completion provider error");
                return Err(GenerationError::Provider(e));
            }
        };

        debug!(
            persona = %persona.name,
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            finish_reason = ?response.finish_reason,
            "Completion finished"
        );
        if response.finish_reason == FinishReason::Length {
            warn!(persona = %persona.name, "Completion hit the token limit, reply may be cut short");
        }

        let text = response.content.trim();
        if text.is_empty() {
            warn!(persona = %persona.name, "Completion provider returned an empty reply");
            return Err(GenerationError::Empty);
        }
        Ok(text.to_string())
    }
}

/// Build the single instruction sent to the model.
pub fn build_prompt(persona: &Persona, base_message: &str) -> String {
    let style = if persona.style.trim().is_empty() {
        "friendly"
    } else {
        persona.style.trim()
    };

    format!(
        "You are {name}, a {style} persona. \
         Facts about you: {facts}. \
         Personality quirks: {quirks}. \
         Your task: rewrite and deliver the following message so that it keeps ALL its \
         information, facts, and meaning intact, but sounds exactly like something {name} \
         would say: their tone, habits, mannerisms, and emotional nuance. \
         Do not shorten or omit any factual part of the message. \
         Write it as a readable in-character email reply body, not a script, stage \
         direction, or commentary about the task. \
         Here is the message you must fully express in character:\n\"{message}\"",
        name = persona.name,
        facts = list_or_none(&persona.random_facts),
        quirks = list_or_none(&persona.quirks),
        message = base_message,
    )
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join("; ")
    }
}
