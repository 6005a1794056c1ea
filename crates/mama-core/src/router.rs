// MAMA OS — MessageRouter (C12).
//
// Five-stage routing pipeline, generalized from this codebase's existing
// first-match-wins `resolve_route` (one stage) into the spec's five. Each
// stage short-circuits on a match except stage 1 (free-chat), which returns
// immediately when enabled.

use regex::Regex;

use crate::atoms::types::{AgentConfig, CategoryConfig, Message, MultiAgentConfig};
use crate::channel_key::{self, MentionPolicy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteStage {
    FreeChat,
    ExplicitTrigger,
    CategoryMatch,
    KeywordMatch,
    DefaultAgent,
}

#[derive(Debug, Clone)]
pub struct RouteResult {
    pub agent_ids: Vec<String>,
    pub stage: RouteStage,
}

pub struct MessageRouter<'a> {
    config: &'a MultiAgentConfig,
    mention_policy: &'a MentionPolicy,
}

impl<'a> MessageRouter<'a> {
    pub fn new(config: &'a MultiAgentConfig, mention_policy: &'a MentionPolicy) -> Self {
        MessageRouter { config, mention_policy }
    }

    pub fn route(&self, msg: &Message) -> RouteResult {
        // Stage 1: free-chat bypasses mention policy and every later stage.
        if self.config.free_chat {
            let agent_ids: Vec<String> = self.config.agents.values().filter(|a| a.enabled).map(|a| a.id.clone()).collect();
            return RouteResult { agent_ids, stage: RouteStage::FreeChat };
        }

        // Stage 2: explicit trigger / delegation lines bypass mention rules.
        if let Some(agent_id) = explicit_trigger_agent(&msg.text, self.config) {
            return RouteResult { agent_ids: vec![agent_id], stage: RouteStage::ExplicitTrigger };
        }

        let key = channel_key::channel_key(&msg.source, &msg.channel_id);
        let mention_required = self.mention_policy.requires_mention(&key);
        let mentioned = !mention_required || channel_key::has_any_mention_token(&msg.text);

        if mentioned {
            // Stage 3: category match — highest-priority matching pattern wins.
            if let Some(agent_ids) = category_match(&msg.text, &self.config.categories) {
                return RouteResult { agent_ids, stage: RouteStage::CategoryMatch };
            }

            // Stage 4: keyword match.
            let keyword_agents: Vec<String> = self
                .config
                .agents
                .values()
                .filter(|a| a.enabled && a.auto_respond_keywords.iter().any(|kw| msg.text.to_lowercase().contains(&kw.to_lowercase())))
                .map(|a| a.id.clone())
                .collect();
            if !keyword_agents.is_empty() {
                return RouteResult { agent_ids: keyword_agents, stage: RouteStage::KeywordMatch };
            }
        }

        // Stage 5: default agent fallback.
        RouteResult { agent_ids: vec![self.config.default_agent_id.clone()], stage: RouteStage::DefaultAgent }
    }
}

fn explicit_trigger_agent(text: &str, config: &MultiAgentConfig) -> Option<String> {
    if let Some(captures) = delegate_line_regex().captures(text) {
        let agent_id = captures.get(2)?.as_str();
        if config.agents.contains_key(agent_id) {
            return Some(agent_id.to_string());
        }
    }

    for agent in config.agents.values() {
        if let Some(prefix) = &agent.trigger_prefix {
            if text.trim_start().starts_with(prefix.as_str()) {
                return Some(agent.id.clone());
            }
        }
    }
    None
}

fn delegate_line_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^DELEGATE(_BG)?::(\w+)::(.+)$").expect("delegate line regex"))
}

fn category_match(text: &str, categories: &[CategoryConfig]) -> Option<Vec<String>> {
    let mut sorted: Vec<&CategoryConfig> = categories.iter().collect();
    sorted.sort_by(|a, b| b.priority.cmp(&a.priority));

    for category in sorted {
        for pattern in &category.patterns {
            if let Ok(re) = Regex::new(pattern) {
                if re.is_match(text) {
                    return Some(category.agent_ids.clone());
                }
            }
        }
    }
    None
}
