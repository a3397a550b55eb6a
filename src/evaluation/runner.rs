//! Plays a scripted scenario against a model under test.
//!
//! Each user turn is sent with the full transcript so far, so the model sees
//! the conversation the way it would in a real multi-turn session.

use tracing::{debug, info};

use super::rubric::Scenario;
use super::{ConversationTrace, Message, ModelConfig};
use crate::error::{HarnessError, Result};
use crate::llm::{ChatClient, ChatRequest};

const SKILL_PREAMBLE: &str =
    "You are an AI agent with the following skill installed. Follow its instructions precisely.\n\n";
const SETUP_PREFIX: &str = "Context about the user you are helping: ";

/// Wrap a skill document as the system prompt for the model under test.
pub fn build_system_prompt(skill_text: &str) -> String {
    format!("{}{}", SKILL_PREAMBLE, skill_text)
}

/// Run one scenario and return the resulting conversation.
///
/// Any failed model call aborts the run; no partial trace is returned.
pub async fn run_scenario<C: ChatClient>(
    client: &C,
    model_config: &ModelConfig,
    system_prompt: &str,
    scenario: &Scenario,
    skill_name: &str,
) -> Result<ConversationTrace> {
    if scenario.messages.is_empty() {
        return Err(HarnessError::InvalidScenario {
            id: scenario.id.clone(),
            reason: "no user messages".to_string(),
        });
    }

    let mut trace = ConversationTrace::new(skill_name, &scenario.id, &model_config.id);
    let total = scenario.messages.len();
    info!(
        "Running scenario {} ({} user turns) with model {}",
        scenario.id, total, model_config.model
    );

    let mut outgoing = vec![Message::system(system_prompt)];
    let setup = scenario.setup.trim();
    if !setup.is_empty() {
        info!("  Setup: {}", preview(setup, 120));
        outgoing.push(Message::system(format!("{}{}", SETUP_PREFIX, scenario.setup)));
    }

    for (i, user_msg) in scenario.messages.iter().enumerate() {
        let turn = i + 1;
        info!("  [Turn {}/{}] USER: {}", turn, total, preview(&user_msg.content, 120));
        let user = Message::user(&user_msg.content);
        outgoing.push(user.clone());
        trace.messages.push(user);

        debug!("  Calling {} ...", model_config.model);
        let request = ChatRequest::for_model(model_config, outgoing.clone());
        let response = client.chat(&request).await?;

        let content = response.content().to_string();
        let tokens = response
            .usage
            .map(|u| format!(" ({}+{} tokens)", u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();
        info!(
            "  [Turn {}/{}] AGENT:{} {}",
            turn,
            total,
            tokens,
            preview(&content.replace('\n', " "), 150)
        );

        let assistant = Message::assistant(content);
        outgoing.push(assistant.clone());
        trace.messages.push(assistant);
    }

    info!("  Conversation complete: {} turns total", trace.messages.len());
    Ok(trace)
}

/// First `max` characters of `text`, respecting char boundaries.
pub(crate) fn preview(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
