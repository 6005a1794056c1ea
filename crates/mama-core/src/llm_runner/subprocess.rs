// MAMA OS — LLMRunner subprocess backend (C10a).
//
// Spawns an external CLI with flags for model, session id, and an
// "append-system-prompt". Arguments are passed as a `Vec<OsString>` to
// `tokio::process::Command`, never interpolated into a shell string, so
// embedded quotes/newlines in the prompt cannot inject extra flags.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use crate::atoms::constants::RUNNER_SUBPROCESS_TIMEOUT_SECS;
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::traits::{LLMRunner, RunOptions, RunOutcome, Usage};
use crate::atoms::error::RunnerErrorKind;

#[derive(Debug, Clone)]
pub struct SubprocessRunnerConfig {
    pub binary_path: String,
    pub timeout_secs: u64,
}

impl Default for SubprocessRunnerConfig {
    fn default() -> Self {
        SubprocessRunnerConfig { binary_path: "claude".into(), timeout_secs: RUNNER_SUBPROCESS_TIMEOUT_SECS }
    }
}

#[derive(Debug, Deserialize)]
struct SubprocessResponse {
    text: String,
    session_id: String,
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

pub struct SubprocessRunner {
    config: SubprocessRunnerConfig,
}

impl SubprocessRunner {
    pub fn new(config: SubprocessRunnerConfig) -> Self {
        SubprocessRunner { config }
    }

    fn build_command(&self, prompt: &str, opts: &RunOptions) -> Command {
        let mut cmd = Command::new(&self.config.binary_path);
        cmd.arg("--print").arg("--output-format").arg("json");

        if let Some(model) = &opts.model {
            cmd.arg("--model").arg(model);
        }
        if let Some(session_id) = &opts.session_id {
            cmd.arg("--session-id").arg(session_id);
        }
        if let Some(system_prompt) = &opts.session_prompt {
            cmd.arg("--append-system-prompt").arg(system_prompt);
        }
        if let Some(workspace) = &opts.workspace_dir {
            cmd.current_dir(workspace);
        }
        if opts.skip_permissions {
            cmd.arg("--dangerously-skip-permissions");
        }
        cmd.arg(prompt);
        cmd.kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl LLMRunner for SubprocessRunner {
    async fn run(&self, prompt: &str, opts: RunOptions) -> EngineResult<RunOutcome> {
        let timeout = std::time::Duration::from_millis(
            opts.timeout_ms.unwrap_or(self.config.timeout_secs * 1_000),
        );
        let mut cmd = self.build_command(prompt, &opts);

        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| EngineError::runner(RunnerErrorKind::Timeout, "subprocess timed out"))?
            .map_err(|e| EngineError::runner(RunnerErrorKind::Network, e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::runner(
                RunnerErrorKind::ExitNonZero,
                format!("exit status {:?}: {}", output.status.code(), stderr.trim()),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let parsed: SubprocessResponse = serde_json::from_str(stdout.trim())
            .map_err(|e| EngineError::runner(RunnerErrorKind::ParseError, format!("{e}: {}", stdout.trim())))?;

        Ok(RunOutcome {
            text: parsed.text,
            session_id: parsed.session_id,
            usage: Usage { input_tokens: parsed.input_tokens, output_tokens: parsed.output_tokens },
        })
    }

    fn kind(&self) -> &'static str {
        "subprocess"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_command_includes_model_and_session_flags() {
        let runner = SubprocessRunner::new(SubprocessRunnerConfig { binary_path: "echo".into(), timeout_secs: 5 });
        let opts = RunOptions { model: Some("claude-3-5-sonnet".into()), session_id: Some("abc".into()), ..Default::default() };
        let cmd = runner.build_command("hello", &opts);
        let debug = format!("{:?}", cmd.as_std());
        assert!(debug.contains("claude-3-5-sonnet"));
        assert!(debug.contains("abc"));
    }

    #[tokio::test]
    async fn non_zero_exit_surfaces_as_runner_error() {
        let runner = SubprocessRunner::new(SubprocessRunnerConfig { binary_path: "false".into(), timeout_secs: 5 });
        let result = runner.run("hello", RunOptions::default()).await;
        assert!(matches!(result, Err(EngineError::Runner { kind: RunnerErrorKind::ExitNonZero, .. })));
    }
}
