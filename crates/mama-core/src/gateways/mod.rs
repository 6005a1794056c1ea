// MAMA OS — Gateway adapters.
//
// Thin bridges from a chat platform's wire protocol to the orchestration
// core: receive an inbound event, build `atoms::types::Message`, forward it
// through `Orchestrator::handle_message`, and push the resulting text back
// out through `RateLimiter`. Wire-protocol fidelity (reconnect backoff,
// every gateway intent/opcode) is explicitly out of scope — these adapters
// exist to drive the core with real traffic, not to be a complete SDK.

pub mod discord;
pub mod slack;
pub mod telegram;

use std::sync::Arc;

use log::info;

use crate::atoms::types::GatewaysConfig;
use crate::orchestrator::Orchestrator;
use crate::rate_limiter::RateLimiter;

/// Spawn a background task per enabled gateway. Each adapter owns its own
/// reconnect loop; this just decides which ones to start.
pub fn spawn_enabled(config: &GatewaysConfig, orchestrator: Arc<Orchestrator>, rate_limiter: Arc<RateLimiter>) {
    if let Some(token) = config.discord.token.clone().filter(|t| !t.is_empty()) {
        let orch = orchestrator.clone();
        let rl = rate_limiter.clone();
        let require_mention = config.discord.require_mention;
        info!("gateways: starting discord bridge (require_mention={require_mention})");
        tokio::spawn(async move {
            discord::run(token, require_mention, orch, rl).await;
        });
    }

    if let (Some(bot_token), Some(app_token)) = (
        config.slack.bot_token.clone().filter(|t| !t.is_empty()),
        config.slack.app_token.clone().filter(|t| !t.is_empty()),
    ) {
        let orch = orchestrator.clone();
        let rl = rate_limiter.clone();
        info!("gateways: starting slack bridge (socket mode)");
        tokio::spawn(async move {
            slack::run(bot_token, app_token, orch, rl).await;
        });
    }

    if let Some(token) = config.telegram.token.clone().filter(|t| !t.is_empty()) {
        let orch = orchestrator.clone();
        let rl = rate_limiter.clone();
        let allowed = config.telegram.allowed_chat_ids.clone();
        info!("gateways: starting telegram bridge (long polling)");
        tokio::spawn(async move {
            telegram::run(token, allowed, orch, rl).await;
        });
    }
}

/// Split `text` into chunks no longer than `limit` chars, breaking on the
/// last newline before the limit when one exists so messages don't get cut
/// mid-sentence.
pub(crate) fn split_message(text: &str, limit: usize) -> Vec<String> {
    if text.chars().count() <= limit {
        return vec![text.to_string()];
    }
    let mut chunks = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let mut cut = rest.char_indices().nth(limit).map(|(i, _)| i).unwrap_or(rest.len());
        if cut < rest.len() {
            if let Some(nl) = rest[..cut].rfind('\n') {
                if nl > cut / 2 {
                    cut = nl;
                }
            }
        }
        chunks.push(rest[..cut].trim().to_string());
        rest = rest[cut..].trim_start_matches('\n');
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_a_single_chunk() {
        assert_eq!(split_message("hello", 2000), vec!["hello".to_string()]);
    }

    #[test]
    fn long_text_splits_on_newline_boundary() {
        let text = format!("{}\n{}", "a".repeat(10), "b".repeat(10));
        let chunks = split_message(&text, 12);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "a".repeat(10));
        assert_eq!(chunks[1], "b".repeat(10));
    }
}
