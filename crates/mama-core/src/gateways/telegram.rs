// MAMA OS — Telegram gateway adapter.
//
// Long-polling `getUpdates` — no public URL or webhook registration needed.
// `allowed_chat_ids` (when non-empty) acts as a simple allowlist; anything
// else is dropped silently rather than routed.

use std::sync::Arc;
use std::time::Duration;

use log::{error, warn};
use serde::Deserialize;
use serde_json::json;

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::Message;
use crate::gateways::split_message;
use crate::orchestrator::Orchestrator;
use crate::rate_limiter::RateLimiter;

const TELEGRAM_MESSAGE_LIMIT: usize = 4000;
const POLL_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct TgResponse<T> {
    ok: bool,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct TgUpdate {
    update_id: i64,
    message: Option<TgMessage>,
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    from: Option<TgUser>,
    chat: TgChat,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgUser {
    id: i64,
    is_bot: bool,
}

#[derive(Debug, Deserialize)]
struct TgChat {
    id: i64,
}

pub async fn run(token: String, allowed_chat_ids: Vec<String>, orchestrator: Arc<Orchestrator>, rate_limiter: Arc<RateLimiter>) {
    let http = crate::http::pinned_client();
    let mut offset: i64 = 0;
    loop {
        match poll_once(&http, &token, offset, &allowed_chat_ids, &orchestrator, &rate_limiter).await {
            Ok(next_offset) => offset = next_offset,
            Err(e) => {
                error!("telegram: poll failed: {e}, backing off");
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
}

async fn poll_once(
    http: &reqwest::Client,
    token: &str,
    offset: i64,
    allowed_chat_ids: &[String],
    orchestrator: &Arc<Orchestrator>,
    rate_limiter: &Arc<RateLimiter>,
) -> EngineResult<i64> {
    let url = format!("https://api.telegram.org/bot{token}/getUpdates");
    let resp: TgResponse<Vec<TgUpdate>> = http
        .get(&url)
        .query(&[("offset", offset.to_string()), ("timeout", POLL_TIMEOUT_SECS.to_string())])
        .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 10))
        .send()
        .await?
        .json()
        .await?;

    if !resp.ok {
        return Err(EngineError::channel("telegram", "getUpdates returned ok=false"));
    }
    let updates = resp.result.unwrap_or_default();
    let mut next_offset = offset;

    for update in updates {
        next_offset = next_offset.max(update.update_id + 1);
        let Some(tg_msg) = update.message else { continue };
        let Some(from) = &tg_msg.from else { continue };
        if from.is_bot {
            continue;
        }
        let Some(text) = tg_msg.text else { continue };
        if text.is_empty() {
            continue;
        }
        let chat_id = tg_msg.chat.id.to_string();
        if !allowed_chat_ids.is_empty() && !allowed_chat_ids.contains(&chat_id) {
            continue;
        }

        let msg = Message {
            source: "telegram".to_string(),
            channel_id: chat_id.clone(),
            user_id: from.id.to_string(),
            text,
            attachments: Vec::new(),
            timestamp: chrono::Utc::now(),
        };

        match orchestrator.handle_message(&msg).await {
            Ok(outcomes) => {
                for outcome in outcomes {
                    for chunk in split_message(&outcome.text, TELEGRAM_MESSAGE_LIMIT) {
                        send_message(http, token, &chat_id, &chunk, rate_limiter).await;
                    }
                }
            }
            Err(e) => warn!("telegram: orchestration failed for {chat_id}: {e}"),
        }
    }

    Ok(next_offset)
}

async fn send_message(client: &reqwest::Client, token: &str, chat_id: &str, text: &str, rate_limiter: &Arc<RateLimiter>) {
    let url = format!("https://api.telegram.org/bot{token}/sendMessage");
    let chat_id = chat_id.to_string();
    let text = text.to_string();
    let result = rate_limiter
        .enqueue(|| async {
            client
                .post(&url)
                .json(&json!({ "chat_id": chat_id, "text": text }))
                .send()
                .await
                .map_err(EngineError::from)
                .and_then(|r| if r.status().is_success() { Ok(()) } else { Err(EngineError::channel("telegram", format!("sendMessage failed: {}", r.status()))) })
        })
        .await;
    if let Err(e) = result {
        warn!("telegram: send failed: {e}");
    }
}
