// MAMA OS — ChannelKey & Mention Policy (C15).
//
// Builds the `"{source}:{channelId}"` identifier used everywhere a
// conversation needs a stable handle, and normalizes platform-specific
// mention syntax (Discord `<@id>`, plain `@name`) before MessageRouter
// stage evaluation.

use std::collections::HashMap;

pub fn channel_key(source: &str, channel_id: &str) -> String {
    format!("{source}:{channel_id}")
}

pub fn parse_channel_key(key: &str) -> Option<(&str, &str)> {
    key.split_once(':')
}

/// Per-(guild, channel) mention requirement. `require_mention` gates
/// stages 3–5 of the message router; stages 1 (free-chat) and 2 (explicit
/// trigger) bypass it unconditionally.
#[derive(Debug, Clone, Default)]
pub struct MentionPolicy {
    require_mention_by_channel: HashMap<String, bool>,
}

impl MentionPolicy {
    pub fn new() -> Self {
        MentionPolicy::default()
    }

    pub fn set_require_mention(&mut self, channel_key: impl Into<String>, required: bool) {
        self.require_mention_by_channel.insert(channel_key.into(), required);
    }

    pub fn requires_mention(&self, channel_key: &str) -> bool {
        self.require_mention_by_channel.get(channel_key).copied().unwrap_or(false)
    }
}

/// True if `text` mentions `bot_id` in any recognized platform form:
/// Discord `<@id>` / `<@!id>`, or a plain `@name` token matching `bot_name`.
pub fn is_mentioned(text: &str, bot_id: &str, bot_name: Option<&str>) -> bool {
    let discord_forms = [format!("<@{bot_id}>"), format!("<@!{bot_id}>")];
    if discord_forms.iter().any(|f| text.contains(f.as_str())) {
        return true;
    }
    if let Some(name) = bot_name {
        let at_name = format!("@{name}");
        if text.to_lowercase().contains(&at_name.to_lowercase()) {
            return true;
        }
    }
    false
}

/// True if `text` contains a mention-shaped token of any kind: a Discord/
/// Slack raw `<@id>` form, or an `@name` word preceded by a boundary (start
/// of string or whitespace). Used where the router doesn't know its own bot
/// identity and can't call `is_mentioned` directly — it still rejects a
/// bare '@' inside running text (an email address, a mid-word @) that
/// `text.contains('@')` would wrongly accept.
pub fn has_any_mention_token(text: &str) -> bool {
    mention_token_regex().is_match(text)
}

fn mention_token_regex() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"<@!?\w+>|(?:^|\s)@\w+").expect("mention token regex"))
}

/// Strip the bot's own mention token from the start of a message so the
/// remaining text can be matched against trigger/category/keyword stages
/// without the mention noise.
pub fn strip_bot_mention(text: &str, bot_id: &str) -> String {
    let forms = [format!("<@{bot_id}>"), format!("<@!{bot_id}>")];
    let mut stripped = text.to_string();
    for form in &forms {
        stripped = stripped.replacen(form.as_str(), "", 1);
    }
    stripped.trim_start().to_string()
}
