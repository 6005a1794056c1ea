// MAMA OS — Slack gateway adapter.
//
// Socket Mode: `apps.connections.open` trades the app-level token for a
// short-lived wss:// URL, then events arrive as `events_api` envelopes over
// that socket. Each envelope must be acked by `envelope_id` within a few
// seconds or Slack redelivers it.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use log::{error, warn};
use serde::Deserialize;
use serde_json::json;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::Message;
use crate::gateways::split_message;
use crate::orchestrator::Orchestrator;
use crate::rate_limiter::RateLimiter;

const SLACK_MESSAGE_LIMIT: usize = 3900;

#[derive(Debug, Deserialize)]
struct ConnectionsOpenResponse {
    ok: bool,
    url: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SocketEnvelope {
    envelope_id: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    payload: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct EventsApiPayload {
    event: Option<SlackEvent>,
}

#[derive(Debug, Deserialize)]
struct SlackEvent {
    #[serde(rename = "type")]
    kind: String,
    user: Option<String>,
    text: Option<String>,
    channel: Option<String>,
    bot_id: Option<String>,
}

pub async fn run(bot_token: String, app_token: String, orchestrator: Arc<Orchestrator>, rate_limiter: Arc<RateLimiter>) {
    let mut attempt: u32 = 0;
    loop {
        match run_once(&bot_token, &app_token, &orchestrator, &rate_limiter).await {
            Ok(()) => attempt = 0,
            Err(e) => {
                error!("slack socket: {e}, reconnecting");
                tokio::time::sleep(Duration::from_millis(1000u64.saturating_mul(1 << attempt.min(6)).min(60_000))).await;
                attempt = attempt.saturating_add(1);
            }
        }
    }
}

async fn run_once(bot_token: &str, app_token: &str, orchestrator: &Arc<Orchestrator>, rate_limiter: &Arc<RateLimiter>) -> EngineResult<()> {
    let http = crate::http::pinned_client();
    let open: ConnectionsOpenResponse = http
        .post("https://slack.com/api/apps.connections.open")
        .header("Authorization", format!("Bearer {app_token}"))
        .send()
        .await?
        .json()
        .await?;
    if !open.ok {
        return Err(EngineError::channel("slack", open.error.unwrap_or_else(|| "apps.connections.open failed".into())));
    }
    let ws_url = open.url.ok_or_else(|| EngineError::channel("slack", "no socket url returned"))?;

    let (ws_stream, _) = connect_async(&ws_url).await.map_err(|e| EngineError::channel("slack", e.to_string()))?;
    let (mut write, mut read) = ws_stream.split();

    while let Some(msg) = read.next().await {
        let msg = msg.map_err(|e| EngineError::channel("slack", e.to_string()))?;
        let text = match msg {
            WsMessage::Text(t) => t,
            WsMessage::Close(_) => break,
            _ => continue,
        };
        let envelope: SocketEnvelope = match serde_json::from_str(&text) {
            Ok(e) => e,
            Err(_) => continue,
        };

        if let Some(envelope_id) = &envelope.envelope_id {
            let ack = json!({ "envelope_id": envelope_id });
            let _ = write.send(WsMessage::Text(ack.to_string())).await;
        }

        if envelope.kind != "events_api" {
            continue;
        }
        let Some(payload) = envelope.payload else { continue };
        let Ok(events_payload) = serde_json::from_value::<EventsApiPayload>(payload) else { continue };
        let Some(event) = events_payload.event else { continue };

        if event.kind != "message" || event.bot_id.is_some() {
            continue;
        }
        let (Some(channel), Some(user), Some(text)) = (event.channel, event.user, event.text) else { continue };
        if text.is_empty() {
            continue;
        }

        let msg = Message {
            source: "slack".to_string(),
            channel_id: channel.clone(),
            user_id: user,
            text,
            attachments: Vec::new(),
            timestamp: chrono::Utc::now(),
        };

        match orchestrator.handle_message(&msg).await {
            Ok(outcomes) => {
                for outcome in outcomes {
                    for chunk in split_message(&outcome.text, SLACK_MESSAGE_LIMIT) {
                        post_message(&http, bot_token, &channel, &chunk, rate_limiter).await;
                    }
                }
            }
            Err(e) => warn!("slack: orchestration failed for {channel}: {e}"),
        }
    }

    Ok(())
}

async fn post_message(client: &reqwest::Client, bot_token: &str, channel: &str, text: &str, rate_limiter: &Arc<RateLimiter>) {
    let result = rate_limiter
        .enqueue(|| async {
            client
                .post("https://slack.com/api/chat.postMessage")
                .header("Authorization", format!("Bearer {bot_token}"))
                .json(&json!({ "channel": channel, "text": text }))
                .send()
                .await
                .map_err(EngineError::from)
                .and_then(|r| if r.status().is_success() { Ok(()) } else { Err(EngineError::channel("slack", format!("post failed: {}", r.status()))) })
        })
        .await;
    if let Err(e) = result {
        warn!("slack: send to {channel} failed: {e}");
    }
}
