// MAMA OS — LLMRunner (C10).
//
// Abstracted prompt→response interface. A subprocess CLI and an embedded
// HTTP backend both implement `LLMRunner` so the orchestrator never needs
// to know which one it is talking to — the same type-erasure shape as
// `AnyProvider` for AI providers elsewhere in this codebase.

pub mod http;
pub mod subprocess;

use crate::atoms::traits::{AnyRunner, LLMRunner};

#[derive(Debug, Clone)]
pub enum RunnerBackendConfig {
    Subprocess(subprocess::SubprocessRunnerConfig),
    Http(http::HttpRunnerConfig),
}

pub fn build_runner(config: RunnerBackendConfig) -> AnyRunner {
    match config {
        RunnerBackendConfig::Subprocess(cfg) => AnyRunner(Box::new(subprocess::SubprocessRunner::new(cfg))),
        RunnerBackendConfig::Http(cfg) => AnyRunner(Box::new(http::HttpRunner::new(cfg))),
    }
}

pub use crate::atoms::traits::{RunOptions, RunOutcome, Usage};

#[allow(dead_code)]
fn _assert_object_safe(_: &dyn LLMRunner) {}
