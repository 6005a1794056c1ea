// MAMA OS — LLMRunner embedded-HTTP backend (C10b).
//
// Calls a model API directly over HTTP, reusing the certificate-pinned
// `reqwest::Client` and request-signing helpers shared with outbound
// gateway calls (`crate::http`).

use async_trait::async_trait;
use serde::Deserialize;

use crate::atoms::constants::RUNNER_HTTP_TIMEOUT_SECS;
use crate::atoms::error::{EngineError, EngineResult, RunnerErrorKind};
use crate::atoms::traits::{LLMRunner, RunOptions, RunOutcome, Usage};
use crate::http::{pinned_client, sign_and_log_request, update_audit_status};

#[derive(Debug, Clone)]
pub struct HttpRunnerConfig {
    pub base_url: String,
    pub api_key: String,
    pub default_model: String,
    pub timeout_secs: u64,
}

impl Default for HttpRunnerConfig {
    fn default() -> Self {
        HttpRunnerConfig {
            base_url: "https://api.anthropic.com/v1/messages".into(),
            api_key: String::new(),
            default_model: "claude-3-5-sonnet".into(),
            timeout_secs: RUNNER_HTTP_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Deserialize)]
struct HttpRunnerResponse {
    text: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

pub struct HttpRunner {
    config: HttpRunnerConfig,
}

impl HttpRunner {
    pub fn new(config: HttpRunnerConfig) -> Self {
        HttpRunner { config }
    }
}

#[async_trait]
impl LLMRunner for HttpRunner {
    async fn run(&self, prompt: &str, opts: RunOptions) -> EngineResult<RunOutcome> {
        let client = pinned_client();
        let model = opts.model.clone().unwrap_or_else(|| self.config.default_model.clone());
        let timeout = std::time::Duration::from_millis(opts.timeout_ms.unwrap_or(self.config.timeout_secs * 1_000));

        let body = serde_json::json!({
            "model": model,
            "prompt": prompt,
            "system": opts.session_prompt,
            "session_id": opts.session_id,
        });
        let body_bytes = serde_json::to_vec(&body).unwrap_or_default();
        let audit_hash = sign_and_log_request(self.kind(), &model, &body_bytes);

        let response = client
            .post(&self.config.base_url)
            .bearer_auth(&self.config.api_key)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::runner(RunnerErrorKind::Network, e.to_string()))?;

        update_audit_status(&audit_hash, response.status().as_u16());
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::runner(RunnerErrorKind::Network, format!("HTTP {status}: {text}")));
        }

        let parsed: HttpRunnerResponse = response
            .json()
            .await
            .map_err(|e| EngineError::runner(RunnerErrorKind::ParseError, e.to_string()))?;

        Ok(RunOutcome {
            text: parsed.text,
            session_id: parsed.session_id.or(opts.session_id).unwrap_or_default(),
            usage: Usage { input_tokens: parsed.input_tokens, output_tokens: parsed.output_tokens },
        })
    }

    fn kind(&self) -> &'static str {
        "http"
    }
}
