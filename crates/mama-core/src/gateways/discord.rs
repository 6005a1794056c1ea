// MAMA OS — Discord gateway adapter.
//
// Connects via Discord's Gateway WebSocket (the only way to receive events
// without a public webhook endpoint), filters to DMs and @mentions in
// guild channels, and forwards everything else into the orchestration
// core. Reconnects with jittered backoff on any gateway error.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use log::{error, info, warn};
use serde::Deserialize;
use serde_json::json;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::Message;
use crate::gateways::split_message;
use crate::orchestrator::Orchestrator;
use crate::rate_limiter::RateLimiter;

const GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";
const API_BASE: &str = "https://discord.com/api/v10";
const DISCORD_MESSAGE_LIMIT: usize = 1950;

#[derive(Debug, Deserialize)]
struct GatewayPayload {
    op: u8,
    d: Option<serde_json::Value>,
    s: Option<u64>,
    t: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReadyEvent {
    user: DiscordUser,
}

#[derive(Debug, Clone, Deserialize)]
struct DiscordUser {
    id: String,
    username: String,
    bot: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct DiscordMessage {
    channel_id: String,
    author: DiscordUser,
    content: String,
    guild_id: Option<String>,
    mentions: Option<Vec<DiscordUser>>,
}

/// Reconnect forever until the process exits; each failed attempt backs off
/// with capped exponential jitter.
pub async fn run(token: String, require_mention: bool, orchestrator: Arc<Orchestrator>, rate_limiter: Arc<RateLimiter>) {
    let mut attempt: u32 = 0;
    loop {
        match run_once(&token, require_mention, &orchestrator, &rate_limiter).await {
            Ok(()) => attempt = 0,
            Err(e) => {
                error!("discord gateway: {e}, reconnecting");
                let delay = reconnect_delay(attempt);
                warn!("discord gateway: retrying in {}ms", delay.as_millis());
                tokio::time::sleep(delay).await;
                attempt = attempt.saturating_add(1);
            }
        }
    }
}

fn reconnect_delay(attempt: u32) -> Duration {
    let base_ms = 1000u64.saturating_mul(1u64 << attempt.min(6));
    Duration::from_millis(base_ms.min(60_000))
}

async fn run_once(token: &str, require_mention: bool, orchestrator: &Arc<Orchestrator>, rate_limiter: &Arc<RateLimiter>) -> EngineResult<()> {
    let http = crate::http::pinned_client();
    let (ws_stream, _) = connect_async(GATEWAY_URL).await.map_err(|e| EngineError::channel("discord", e.to_string()))?;
    let (write, mut read) = ws_stream.split();

    let hello = read.next().await.ok_or_else(|| EngineError::channel("discord", "gateway closed before Hello"))?.map_err(|e| EngineError::channel("discord", e.to_string()))?;
    let hello: GatewayPayload = serde_json::from_str(hello.to_text().map_err(|e| EngineError::channel("discord", e.to_string()))?)?;
    if hello.op != 10 {
        return Err(EngineError::channel("discord", format!("expected Hello (op 10), got {}", hello.op)));
    }
    let heartbeat_ms = hello.d.as_ref().and_then(|d| d["heartbeat_interval"].as_u64()).unwrap_or(41_250);

    let intents = (1 << 0) | (1 << 9) | (1 << 12) | (1 << 15);
    let identify = json!({ "op": 2, "d": { "token": token, "intents": intents, "properties": { "os": std::env::consts::OS, "browser": "mama-osd", "device": "mama-osd" } } });

    let write = Arc::new(tokio::sync::Mutex::new(write));
    write.lock().await.send(WsMessage::Text(identify.to_string())).await.map_err(|e| EngineError::channel("discord", e.to_string()))?;

    let mut bot_id: Option<String> = None;
    let hb_write = write.clone();
    let heartbeat_task = tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_millis(heartbeat_ms)).await;
            let hb = json!({ "op": 1, "d": null });
            if hb_write.lock().await.send(WsMessage::Text(hb.to_string())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = read.next().await {
        let msg = msg.map_err(|e| EngineError::channel("discord", e.to_string()))?;
        let text = match msg {
            WsMessage::Text(t) => t,
            WsMessage::Close(_) => break,
            _ => continue,
        };
        let payload: GatewayPayload = match serde_json::from_str(&text) {
            Ok(p) => p,
            Err(_) => continue,
        };

        match payload.op {
            0 => match payload.t.as_deref().unwrap_or("") {
                "READY" => {
                    if let Some(d) = payload.d {
                        if let Ok(ready) = serde_json::from_value::<ReadyEvent>(d) {
                            info!("discord: ready as {} ({})", ready.user.username, ready.user.id);
                            bot_id = Some(ready.user.id);
                        }
                    }
                }
                "MESSAGE_CREATE" => {
                    if let Some(d) = payload.d {
                        if let Ok(dm) = serde_json::from_value::<DiscordMessage>(d) {
                            handle_discord_message(dm, bot_id.as_deref(), require_mention, &http, token, orchestrator, rate_limiter).await;
                        }
                    }
                }
                _ => {}
            },
            7 | 9 => break,
            _ => {}
        }
    }

    heartbeat_task.abort();
    Ok(())
}

async fn handle_discord_message(
    dm: DiscordMessage,
    bot_id: Option<&str>,
    require_mention: bool,
    http: &reqwest::Client,
    token: &str,
    orchestrator: &Arc<Orchestrator>,
    rate_limiter: &Arc<RateLimiter>,
) {
    if dm.author.bot.unwrap_or(false) || dm.content.is_empty() {
        return;
    }
    let is_dm = dm.guild_id.is_none();
    let is_mentioned = dm.mentions.as_ref().map(|m| m.iter().any(|u| Some(u.id.as_str()) == bot_id)).unwrap_or(false);
    if !is_dm && require_mention && !is_mentioned {
        return;
    }

    let content = if is_mentioned {
        if let Some(id) = bot_id {
            dm.content.replace(&format!("<@{id}>"), "").trim().to_string()
        } else {
            dm.content.clone()
        }
    } else {
        dm.content.clone()
    };
    if content.is_empty() {
        return;
    }

    let msg = Message {
        source: "discord".to_string(),
        channel_id: dm.channel_id.clone(),
        user_id: dm.author.id.clone(),
        text: content,
        attachments: Vec::new(),
        timestamp: chrono::Utc::now(),
    };

    match orchestrator.handle_message(&msg).await {
        Ok(outcomes) => {
            for outcome in outcomes {
                for chunk in split_message(&outcome.text, DISCORD_MESSAGE_LIMIT) {
                    send_message(http, token, &dm.channel_id, &chunk, rate_limiter).await;
                }
            }
        }
        Err(e) => {
            warn!("discord: orchestration failed for {}: {e}", dm.author.id);
        }
    }
}

async fn send_message(client: &reqwest::Client, token: &str, channel_id: &str, content: &str, rate_limiter: &Arc<RateLimiter>) {
    let url = format!("{API_BASE}/channels/{channel_id}/messages");
    let result = rate_limiter
        .enqueue(|| async {
            client
                .post(&url)
                .header("Authorization", format!("Bot {token}"))
                .json(&json!({ "content": content }))
                .send()
                .await
                .map_err(EngineError::from)
                .and_then(|r| if r.status().is_success() { Ok(()) } else { Err(EngineError::channel("discord", format!("send failed: {}", r.status()))) })
        })
        .await;
    if let Err(e) = result {
        warn!("discord: send to {channel_id} failed: {e}");
    }
}
