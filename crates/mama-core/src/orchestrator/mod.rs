// MAMA OS — Orchestrator (C13).
//
// Ties every other component together into one conversational turn: route
// -> session -> prompt -> runner -> validate -> continue -> delegate. Each
// concern stays in its own module (`prompt`, `delegation`, `ultrawork`);
// this file only sequences them, mirroring how this codebase's original
// multi-agent orchestrator stayed a thin conductor over `tools`/`handlers`/
// `agent_loop`/`sub_agent`.

pub mod delegation;
pub mod prompt;
pub mod ultrawork;

use std::sync::Arc;

use log::{info, warn};

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::traits::{AnyRunner, LLMRunner, RunOptions, ToolContext};
use crate::atoms::types::{AgentConfig, DelegationEdge, DelegationStatus, Message, MultiAgentConfig};
use crate::channel_key::{self, MentionPolicy};
use crate::response_validator::ResponseValidator;
use crate::role_manager::RoleManager;
use crate::router::MessageRouter;
use crate::sandbox::host_bridge;
use crate::sandbox::{self, SandboxConfig};
use crate::scope_guard::{self, ScopeGuard};
use crate::sessions::SessionPool;
use crate::stop_continuation::StopContinuationHandler;
use crate::store::Store;
use crate::tools::GatewayToolExecutor;

use delegation::{extract_delegation_line, DelegationTracker};
use ultrawork::UltraWorkHandler;

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub agent_id: String,
    pub channel_key: String,
    pub text: String,
}

/// Everything one conversational turn needs, wired once at daemon startup
/// and shared across every inbound message.
pub struct Orchestrator {
    config: MultiAgentConfig,
    mention_policy: MentionPolicy,
    role_manager: Arc<RoleManager>,
    sessions: Arc<SessionPool>,
    rate_limiter: Arc<crate::rate_limiter::RateLimiter>,
    runner: Arc<AnyRunner>,
    tool_executor: Arc<GatewayToolExecutor>,
    response_validator: ResponseValidator,
    scope_guard: ScopeGuard,
    stop_continuation: StopContinuationHandler,
    delegation: DelegationTracker,
    ultrawork: UltraWorkHandler,
    sandbox_config: SandboxConfig,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: MultiAgentConfig,
        mention_policy: MentionPolicy,
        role_manager: RoleManager,
        store: Arc<Store>,
        sessions: Arc<SessionPool>,
        rate_limiter: Arc<crate::rate_limiter::RateLimiter>,
        runner: Arc<AnyRunner>,
        tool_executor: Arc<GatewayToolExecutor>,
        response_validator: ResponseValidator,
        scope_guard: ScopeGuard,
        stop_continuation: StopContinuationHandler,
        sandbox_config: SandboxConfig,
    ) -> Self {
        Orchestrator {
            config,
            mention_policy,
            role_manager: Arc::new(role_manager),
            sessions,
            rate_limiter,
            runner,
            tool_executor,
            response_validator,
            scope_guard,
            stop_continuation,
            delegation: DelegationTracker::new(store.clone()),
            ultrawork: UltraWorkHandler::new(store),
            sandbox_config,
        }
    }

    /// Route `msg` and run a turn for every agent it resolves to. Most
    /// stages return exactly one agent id; free-chat can return many.
    /// Takes `self` behind an `Arc` because a background (`DELEGATE_BG::`)
    /// delegation spawned during the turn needs an owned, `'static` handle
    /// back onto the orchestrator.
    pub async fn handle_message(self: &Arc<Self>, msg: &Message) -> EngineResult<Vec<TurnOutcome>> {
        let route = MessageRouter::new(&self.config, &self.mention_policy).route(msg);
        let mut outcomes = Vec::with_capacity(route.agent_ids.len());

        for agent_id in &route.agent_ids {
            let Some(agent) = self.config.agents.get(agent_id) else {
                warn!("router selected unknown agent '{agent_id}', skipping");
                continue;
            };
            if !agent.enabled {
                continue;
            }
            let text = self.run_turn(agent, msg, 0).await?;
            let channel_key = channel_key::channel_key(&msg.source, &msg.channel_id);
            outcomes.push(TurnOutcome { agent_id: agent_id.clone(), channel_key, text });
        }

        Ok(outcomes)
    }

    /// One full turn for a single agent: session continuity, prompt
    /// assembly, dispatch through the rate limiter, validation, bounded
    /// continuation, and delegation-line handling. `depth` is the
    /// delegation depth this turn is running at (0 for a human-originated
    /// message).
    async fn run_turn(self: &Arc<Self>, agent: &AgentConfig, msg: &Message, depth: u32) -> EngineResult<String> {
        let channel_key = channel_key::channel_key(&msg.source, &msg.channel_id);
        let lane = self.sessions.lane(&channel_key);
        // The lane lock only needs to cover this channel's own LLM turn —
        // a delegation recurses into `run_turn` for the same channel key
        // and would deadlock on a re-entrant tokio::Mutex if the guard were
        // still held across that call.
        let mut text = {
            let _lane_guard = lane.lock().await;

            if self.config.ultrawork.enabled && depth == 0 && ultrawork::is_trigger(&msg.text) {
                return self.run_ultrawork_turn(agent, msg, &channel_key).await;
            }

            let session = self.sessions.get_or_create(&channel_key)?;
            let strict_mode = depth > 0;

            let sections = vec![
                prompt::PromptSection::new("persona", 1, agent.persona_text.clone()),
                prompt::PromptSection::new("tools", 2, self.tools_section(agent)),
                prompt::PromptSection::new("agents", 4, self.agents_section(&agent.id)),
                prompt::PromptSection::new("rules", 5, self.rules_section(&msg.source)),
                prompt::PromptSection::new("context", 6, self.context_section(agent)),
                prompt::PromptSection::new("user_message", 1, msg.text.clone()),
            ];
            let built = prompt::PromptSizeMonitor::default().build(&sections);

            let opts = RunOptions {
                model: Some(agent.model.clone()),
                session_prompt: Some(agent.persona_text.clone()),
                session_id: Some(session.session_id.clone()),
                workspace_dir: None,
                timeout_ms: None,
                skip_permissions: false,
            };

            let mut text = self.dispatch(&built.text, opts.clone()).await?;
            self.sessions.touch(&channel_key);

            text = self.enforce_response_quality(&channel_key, &opts, text, strict_mode).await?;
            text = self.run_continuation_loop(&channel_key, &opts, text).await?;
            text = self.maybe_run_code_act(agent, &msg.source, &session.session_id, &text);

            self.sessions.release(&channel_key);
            text
        };

        if let Some(line) = extract_delegation_line(&text) {
            match self.dispatch_delegation(agent, &channel_key, depth, line).await {
                Ok(Some(delegated_text)) => text = format!("{text}\n\n{delegated_text}"),
                Ok(None) => {}
                Err(e) => warn!("delegation from '{}' blocked: {e}", agent.id),
            }
        }

        Ok(text)
    }

    /// Priority-2 layer: the Code-Act `.d.ts` tool surface admitted for
    /// this agent's tier, from `HostBridge`.
    fn tools_section(&self, agent: &AgentConfig) -> String {
        let admitted = host_bridge::admitted_tools(&self.tool_executor, agent.tier);
        host_bridge::declaration_string(&admitted)
    }

    /// Priority-4 layer: the roster of other enabled agents this one could
    /// delegate to via `DELEGATE::`/`DELEGATE_BG::`.
    fn agents_section(&self, exclude_id: &str) -> String {
        let mut ids: Vec<&String> = self.config.agents.keys().filter(|id| id.as_str() != exclude_id).collect();
        ids.sort();
        let mut out = String::from("// Other agents available for delegation\n");
        for id in ids {
            let other = &self.config.agents[id];
            if !other.enabled {
                continue;
            }
            out.push_str(&format!(
                "- {} ({}){}\n",
                other.id,
                other.display_name,
                other.trigger_prefix.as_deref().map(|p| format!(", trigger \"{p}\"")).unwrap_or_default()
            ));
        }
        out
    }

    /// Priority-5 layer: the tool/path rules this turn's source role is
    /// bound by, so the model doesn't propose calls it will be denied.
    fn rules_section(&self, source: &str) -> String {
        let role = self.role_manager.role_for(source);
        let mut out = String::from("// Rules in effect for this channel\n");
        if !role.allowed_tools.is_empty() {
            out.push_str(&format!("allowed tools: {}\n", role.allowed_tools.join(", ")));
        }
        if !role.blocked_tools.is_empty() {
            out.push_str(&format!("blocked tools: {}\n", role.blocked_tools.join(", ")));
        }
        if !role.allowed_paths.is_empty() {
            out.push_str(&format!("allowed paths: {}\n", role.allowed_paths.join(", ")));
        }
        if !self.scope_guard.allowed_patterns.is_empty() {
            out.push_str(&format!("delegated-task scope: {}\n", self.scope_guard.allowed_patterns.join(", ")));
        }
        out
    }

    /// Priority-6 layer: this agent's auto-respond keywords and the
    /// channel it's replying in, so the model knows why it was invoked.
    fn context_section(&self, agent: &AgentConfig) -> String {
        let mut out = String::new();
        if !agent.auto_respond_keywords.is_empty() {
            out.push_str(&format!("// Keywords that route to this agent: {}\n", agent.auto_respond_keywords.join(", ")));
        }
        out
    }

    /// Run one LLM call under rate-limit admission control.
    async fn dispatch(&self, prompt: &str, opts: RunOptions) -> EngineResult<String> {
        let runner = self.runner.clone();
        let prompt = prompt.to_string();
        let outcome = self
            .rate_limiter
            .enqueue(|| {
                let runner = runner.clone();
                let prompt = prompt.clone();
                let opts = opts.clone();
                async move { runner.run(&prompt, opts).await }
            })
            .await?;
        Ok(outcome.text)
    }

    /// Re-prompt (bounded by `ResponseValidator::max_retries`) whenever the
    /// response scores over the flattery/filler threshold.
    async fn enforce_response_quality(&self, channel_key: &str, opts: &RunOptions, mut text: String, strict_mode: bool) -> EngineResult<String> {
        let mut attempts = 0;
        loop {
            let result = self.response_validator.validate(&text, strict_mode);
            if result.valid {
                return Ok(text);
            }
            if attempts >= self.response_validator.max_retries() {
                return Err(EngineError::FlatteryRejected(result.reason.unwrap_or_else(|| "exhausted retries".to_string())));
            }
            attempts += 1;
            info!("response for '{channel_key}' rejected by validator: {:?}", result.reason);
            let reprompt = format!(
                "Rewrite the previous response without filler or flattery phrases ({}). Keep the substance, drop the tone.",
                result.reason.unwrap_or_default()
            );
            text = self.dispatch(&reprompt, opts.clone()).await?;
        }
    }

    /// Keep asking for continuation while `StopContinuationHandler` says
    /// the response looks incomplete, up to its own bounded retry count.
    async fn run_continuation_loop(&self, channel_key: &str, opts: &RunOptions, mut text: String) -> EngineResult<String> {
        loop {
            let decision = self.stop_continuation.analyze(channel_key, &text);
            if !decision.should_continue {
                if decision.max_retries_reached {
                    warn!("stop/continuation max retries reached for '{channel_key}'");
                }
                return Ok(text);
            }
            let continuation_prompt = decision.continuation_prompt.unwrap_or_default();
            let next = self.dispatch(&continuation_prompt, opts.clone()).await?;
            text = format!("{text}\n{next}");
        }
    }

    /// If the response contains a fenced ```js (or plain ```) code block,
    /// run it through the Code-Act sandbox with the agent's admitted tools
    /// installed, and append its output to the visible text.
    fn maybe_run_code_act(&self, agent: &AgentConfig, source: &str, session_id: &str, text: &str) -> String {
        let Some(code) = extract_js_block(text) else {
            return text.to_string();
        };

        let executor = self.tool_executor.clone();
        let role_manager = self.role_manager.clone();
        let role = role_manager.role_for(source).clone();
        let definitions: Vec<_> = host_bridge::admitted_tools(&executor, agent.tier).into_iter().cloned().collect();
        let tool_context = ToolContext { agent_id: agent.id.clone(), session_id: session_id.to_string(), role_name: agent.id.clone() };

        let result = sandbox::execute(&code, &self.sandbox_config, move |ctx, counters| {
            host_bridge::install_tools(ctx, counters, executor, role_manager, role, tool_context, definitions)
        });

        match result {
            Ok(exec) if exec.success => {
                let value = exec.value.unwrap_or(serde_json::Value::Null);
                format!("{text}\n\n[code-act result: {value}]")
            }
            Ok(exec) => format!("{text}\n\n[code-act error: {}]", exec.error.unwrap_or_default()),
            Err(e) => format!("{text}\n\n[code-act sandbox error: {e}]"),
        }
    }

    /// Evaluate and, if allowed, execute a `DELEGATE::`/`DELEGATE_BG::` line
    /// found in an agent's response. Returns the delegate's output for a
    /// foreground delegation, or `None` for background (fire-and-forget)
    /// or when the line was blocked.
    async fn dispatch_delegation(
        self: &Arc<Self>,
        from_agent: &AgentConfig,
        channel_key: &str,
        depth: u32,
        line: delegation::DelegationLine,
    ) -> EngineResult<Option<String>> {
        if !from_agent.effective_can_delegate() {
            return Err(EngineError::PermissionDenied(format!("agent '{}' is not permitted to delegate", from_agent.id)));
        }
        let Some(to_agent) = self.config.agents.get(&line.to_agent).cloned() else {
            return Err(EngineError::UnknownTool(format!("delegate target '{}' is not configured", line.to_agent)));
        };

        self.delegation
            .check(channel_key, &line.to_agent, depth, &self.config.loop_prevention)
            .map_err(EngineError::DelegationBlocked)?;

        self.delegation.begin(channel_key, &from_agent.id, &line.to_agent, &self.config.loop_prevention);
        let wave = depth + 1;
        let edge = DelegationEdge {
            from_agent_id: from_agent.id.clone(),
            to_agent_id: line.to_agent.clone(),
            task: line.task.clone(),
            wave,
            depth: depth + 1,
            claimed_at: chrono::Utc::now(),
            completed_at: None,
            status: DelegationStatus::Claimed,
            background: line.background,
        };
        self.delegation.record_edge(channel_key, &edge)?;

        let (source, channel_id) = channel_key::parse_channel_key(channel_key).unwrap_or(("delegation", channel_key));
        let delegated_msg = Message {
            source: source.to_string(),
            channel_id: channel_id.to_string(),
            user_id: from_agent.id.clone(),
            text: line.task.clone(),
            attachments: vec![],
            timestamp: chrono::Utc::now(),
        };

        if line.background {
            // Fire-and-forget: the calling turn doesn't block on the result,
            // matching DELEGATE_BG semantics (§4.13). The delegated turn still
            // has to actually run, so it's spawned on its own task rather than
            // dropped; the orchestrator handle is cloned since the spawned
            // task outlives this call.
            let orchestrator = Arc::clone(self);
            let channel_key = channel_key.to_string();
            let to_agent_id = line.to_agent.clone();
            tokio::spawn(async move {
                let expected_files = scope_guard::extract_expected_files(&delegated_msg.text);
                let outcome = orchestrator.run_turn(&to_agent, &delegated_msg, depth + 1).await;
                orchestrator.delegation.end(&channel_key, &to_agent_id);

                match outcome {
                    Ok(delegated_text) => {
                        let modified_files = scope_guard::extract_expected_files(&delegated_text);
                        let scope_result = orchestrator.scope_guard.check(&expected_files, &modified_files);
                        // `in_scope` is only ever false in Block mode. Nothing is
                        // waiting on this background delegation's result, so the
                        // edge status is the only way a violation surfaces — mark
                        // it Failed rather than Completed.
                        let status = if scope_result.in_scope {
                            DelegationStatus::Completed
                        } else {
                            warn!("scope creep on background delegation to '{}': {:?}", to_agent_id, scope_result.unexpected_files);
                            DelegationStatus::Failed
                        };
                        if let Err(e) = orchestrator.delegation.complete_edge(&channel_key, &to_agent_id, status) {
                            warn!("failed to record completion of background delegation to '{}': {e}", to_agent_id);
                        }
                    }
                    Err(e) => {
                        warn!("background delegation to '{}' failed: {e}", to_agent_id);
                        if let Err(e) = orchestrator.delegation.complete_edge(&channel_key, &to_agent_id, DelegationStatus::Failed) {
                            warn!("failed to record failure of background delegation to '{}': {e}", to_agent_id);
                        }
                    }
                }
            });
            return Ok(None);
        }

        let expected_files = scope_guard::extract_expected_files(&line.task);
        let outcome = self.run_turn(&to_agent, &delegated_msg, depth + 1).await;
        self.delegation.end(channel_key, &line.to_agent);

        match outcome {
            Ok(delegated_text) => {
                let modified_files = scope_guard::extract_expected_files(&delegated_text);
                let scope_result = self.scope_guard.check(&expected_files, &modified_files);
                if !scope_result.in_scope {
                    // `in_scope` is only ever false in Block mode (Warn mode
                    // always reports in_scope: true) — reject the delegation
                    // outright rather than just logging it.
                    warn!("scope creep on delegation to '{}': {:?}", line.to_agent, scope_result.unexpected_files);
                    self.delegation.complete_edge(channel_key, &line.to_agent, DelegationStatus::Failed)?;
                    return Err(EngineError::ScopeCreep(scope_result.unexpected_files));
                }
                self.delegation.complete_edge(channel_key, &line.to_agent, DelegationStatus::Completed)?;
                Ok(Some(delegated_text))
            }
            Err(e) => {
                self.delegation.complete_edge(channel_key, &line.to_agent, DelegationStatus::Failed)?;
                Err(e)
            }
        }
    }

    /// Three-phase UltraWork turn: resume an in-flight session if one
    /// exists for this channel, otherwise start a new one in Planning.
    async fn run_ultrawork_turn(&self, agent: &AgentConfig, msg: &Message, channel_key: &str) -> EngineResult<String> {
        let mut session = match self.ultrawork.load_active(channel_key)? {
            Some(s) => s,
            None => self.ultrawork.start(channel_key, self.config.ultrawork.max_steps, self.config.ultrawork.max_duration_ms)?,
        };

        let pool_session = self.sessions.get_or_create(channel_key)?;
        let opts = RunOptions {
            model: Some(agent.model.clone()),
            session_prompt: Some(agent.persona_text.clone()),
            session_id: Some(pool_session.session_id.clone()),
            workspace_dir: None,
            timeout_ms: None,
            skip_permissions: true,
        };

        match session.state {
            crate::atoms::types::UltraWorkState::Planning => {
                let prompt = format!("Draft a step-by-step plan to accomplish: {}", msg.text);
                let plan = self.dispatch(&prompt, opts.clone()).await?;
                self.ultrawork.record_plan(&mut session, plan.clone())?;
                Ok(format!("Plan:\n{plan}"))
            }
            crate::atoms::types::UltraWorkState::Building => {
                let prompt = format!("Continue executing this plan, one step at a time:\n{}\nOriginal request: {}", session.plan, msg.text);
                let step_output = self.dispatch(&prompt, opts.clone()).await?;
                self.ultrawork.record_step(&mut session, step_output.clone())?;
                Ok(step_output)
            }
            crate::atoms::types::UltraWorkState::Retro => {
                let prompt = format!("Write a brief retrospective: what was accomplished against the plan:\n{}", session.plan);
                let summary = self.dispatch(&prompt, opts.clone()).await?;
                self.ultrawork.finish(&mut session, summary.clone())?;
                Ok(summary)
            }
            crate::atoms::types::UltraWorkState::Done | crate::atoms::types::UltraWorkState::Failed => {
                Ok("UltraWork session already concluded.".to_string())
            }
        }
    }
}

fn extract_js_block(text: &str) -> Option<String> {
    let start = text.find("```js").or_else(|| text.find("```javascript"))?;
    let after_fence = text[start..].find('\n')? + start + 1;
    let end = text[after_fence..].find("```")? + after_fence;
    Some(text[after_fence..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_fenced_js_block() {
        let text = "here's the code:\n```js\nconsole.log(1)\n```\ndone";
        assert_eq!(extract_js_block(text), Some("console.log(1)\n".to_string()));
    }

    #[test]
    fn no_code_block_returns_none() {
        assert_eq!(extract_js_block("just text"), None);
    }
}
