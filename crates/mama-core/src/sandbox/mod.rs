// MAMA OS — Code-Act Sandbox (C7).
//
// Executes untrusted JS inside an embedded QuickJS VM (`rquickjs`) with
// memory/stack/time limits. Host functions registered by `HostBridge` (C8)
// appear as synchronous globals from the guest's point of view, even though
// the host side runs on the tokio runtime.
//
// Config/result/metrics shape follows this codebase's existing sandbox
// module (config struct with `Default`, a `*Result` struct, persisted via
// the key-value store, formatted for inclusion in the AI context).

pub mod host_bridge;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rquickjs::{Context, Ctx, Runtime, Value as JsValue};
use serde::{Deserialize, Serialize};

use crate::atoms::constants::{
    SANDBOX_MAX_CONCURRENT_HOST_CALLS, SANDBOX_MAX_MARSHAL_DEPTH, SANDBOX_MEMORY_LIMIT_BYTES,
    SANDBOX_STACK_LIMIT_BYTES, SANDBOX_TIMEOUT_MS,
};
use crate::atoms::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    pub memory_limit_bytes: usize,
    pub stack_limit_bytes: usize,
    pub timeout_ms: u64,
    pub max_concurrent_host_calls: u32,
    pub max_marshal_depth: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        SandboxConfig {
            memory_limit_bytes: SANDBOX_MEMORY_LIMIT_BYTES,
            stack_limit_bytes: SANDBOX_STACK_LIMIT_BYTES,
            timeout_ms: SANDBOX_TIMEOUT_MS,
            max_concurrent_host_calls: SANDBOX_MAX_CONCURRENT_HOST_CALLS,
            max_marshal_depth: SANDBOX_MAX_MARSHAL_DEPTH,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SandboxMetrics {
    pub in_flight_host_calls: u32,
    pub total_host_calls: u32,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxExecutionResult {
    pub success: bool,
    pub value: Option<serde_json::Value>,
    pub error: Option<String>,
    pub logs: Vec<String>,
    pub metrics: SandboxMetrics,
}

/// Per-execution bookkeeping shared between the guest's `console.log` /
/// host-call globals and the result assembled after `eval` returns.
#[derive(Default)]
struct ExecState {
    logs: Vec<String>,
    in_flight_host_calls: u32,
    total_host_calls: u32,
}

/// Counters exposed to host function closures during one `execute` call.
/// Cheap to clone — wraps `Arc<Mutex<_>>` internally via parking_lot.
#[derive(Clone)]
pub struct CallCounters {
    inner: Arc<parking_lot::Mutex<ExecState>>,
    max_concurrent: u32,
}

impl CallCounters {
    fn new(max_concurrent: u32) -> Self {
        CallCounters { inner: Arc::new(parking_lot::Mutex::new(ExecState::default())), max_concurrent }
    }

    pub fn log(&self, line: String) {
        self.inner.lock().logs.push(line);
    }

    /// Called by a host bridge function before dispatching. Returns an
    /// error string for the guest to throw if the call budget is exhausted.
    /// Counts this attempt first, then compares — so a rejected call still
    /// counts toward the budget and `total_host_calls` in the final metrics
    /// reflects attempts, not just admitted calls.
    pub fn enter_host_call(&self) -> Result<(), String> {
        let mut state = self.inner.lock();
        state.total_host_calls += 1;
        if state.total_host_calls > self.max_concurrent {
            return Err(format!(
                "host call budget exceeded: {} calls already made (max {})",
                state.total_host_calls, self.max_concurrent
            ));
        }
        state.in_flight_host_calls += 1;
        Ok(())
    }

    pub fn exit_host_call(&self) {
        let mut state = self.inner.lock();
        state.in_flight_host_calls = state.in_flight_host_calls.saturating_sub(1);
    }
}

/// Hidden property used to mark an object/array as an active ancestor
/// during traversal. Set on entry, cleared on exit — so a legitimate shared
/// reference (same object reachable via two sibling branches, no cycle)
/// still marshals fine, and only a true self-reference trips the guard.
const VISITING_MARKER: &str = "__mama_sandbox_marshal_visiting__";

/// Deep-copy a `rquickjs::Value` into `serde_json::Value`, cycle- and
/// depth-guarded per §4.7.
fn marshal(ctx: &Ctx<'_>, value: &JsValue, depth: usize, max_depth: usize) -> serde_json::Value {
    use serde_json::Value as J;

    if depth > max_depth {
        return J::String("[max depth exceeded]".into());
    }

    if value.is_null() || value.is_undefined() {
        J::Null
    } else if let Some(b) = value.as_bool() {
        J::Bool(b)
    } else if let Some(n) = value.as_float() {
        serde_json::Number::from_f64(n).map(J::Number).unwrap_or(J::Null)
    } else if let Some(i) = value.as_int() {
        J::Number(i.into())
    } else if let Some(s) = value.as_string() {
        J::String(s.to_string().unwrap_or_default())
    } else if let Some(arr) = value.as_array() {
        // Arrays index by usize; the hidden marker is a string-keyed property,
        // so it goes through the array's underlying object, same as on a
        // plain object below.
        let marker_holder = arr.as_object();
        if marker_holder.get::<_, bool>(VISITING_MARKER).unwrap_or(false) {
            return J::String("[circular reference]".into());
        }
        let _ = marker_holder.set(VISITING_MARKER, true);
        let mut out = Vec::with_capacity(arr.len());
        for item in arr.iter::<JsValue>().flatten() {
            out.push(marshal(ctx, &item, depth + 1, max_depth));
        }
        let _ = marker_holder.set(VISITING_MARKER, false);
        J::Array(out)
    } else if let Some(obj) = value.as_object() {
        if obj.get::<_, bool>(VISITING_MARKER).unwrap_or(false) {
            return J::String("[circular reference]".into());
        }
        let _ = obj.set(VISITING_MARKER, true);
        let mut map = serde_json::Map::new();
        if let Ok(keys) = obj.keys::<String>().collect::<Result<Vec<_>, _>>() {
            for key in keys {
                if key == VISITING_MARKER {
                    continue;
                }
                if let Ok(v) = obj.get::<_, JsValue>(key.as_str()) {
                    map.insert(key, marshal(ctx, &v, depth + 1, max_depth));
                }
            }
        }
        let _ = obj.set(VISITING_MARKER, false);
        J::Object(map)
    } else {
        J::Null
    }
}

/// Unwrap a `{type: "fulfilled"|"rejected", value}` thenable wrapper if the
/// guest's last expression produced one; otherwise pass the value through.
fn unwrap_thenable<'js>(ctx: &Ctx<'js>, value: JsValue<'js>) -> Result<JsValue<'js>, String> {
    if let Some(obj) = value.as_object() {
        if let Ok(kind) = obj.get::<_, String>("type") {
            if kind == "fulfilled" || kind == "rejected" {
                let inner: JsValue = obj.get("value").unwrap_or_else(|_| JsValue::new_undefined(ctx.clone()));
                if kind == "rejected" {
                    let json = marshal(ctx, &inner, 0, 8);
                    return Err(json.to_string());
                }
                return Ok(inner);
            }
        }
    }
    Ok(value)
}

/// Execute `code` inside a fresh, single-use QuickJS VM. `register` is given
/// the context to install host-bridge globals before evaluation begins.
pub fn execute<F>(code: &str, config: &SandboxConfig, register: F) -> EngineResult<SandboxExecutionResult>
where
    F: for<'js> FnOnce(&Ctx<'js>, CallCounters) -> rquickjs::Result<()>,
{
    let started = Instant::now();
    let counters = CallCounters::new(config.max_concurrent_host_calls);

    let runtime = Runtime::new().map_err(|e| EngineError::sandbox(format!("vm init failed: {e}")))?;
    runtime.set_memory_limit(config.memory_limit_bytes);
    runtime.set_max_stack_size(config.stack_limit_bytes);

    let deadline = started + Duration::from_millis(config.timeout_ms);
    let interrupted = Arc::new(AtomicU32::new(0));
    let interrupted_flag = interrupted.clone();
    runtime.set_interrupt_handler(Some(Box::new(move || {
        if Instant::now() >= deadline {
            interrupted_flag.store(1, Ordering::SeqCst);
            true
        } else {
            false
        }
    })));

    let context = Context::full(&runtime).map_err(|e| EngineError::sandbox(format!("context init failed: {e}")))?;

    let outcome: Result<serde_json::Value, String> = context.with(|ctx| {
        install_console_log(&ctx, counters.clone()).map_err(|e| e.to_string())?;
        register(&ctx, counters.clone()).map_err(|e| e.to_string())?;

        let eval_result: Result<JsValue, rquickjs::Error> = ctx.eval(code);
        match eval_result {
            Ok(value) => {
                let unwrapped = unwrap_thenable(&ctx, value)?;
                Ok(marshal(&ctx, &unwrapped, 0, config.max_marshal_depth))
            }
            Err(e) => Err(e.to_string()),
        }
    });

    // Runtime and Context are dropped here unconditionally — every exit
    // path (success, error, interrupt) releases VM resources.
    drop(context);
    drop(runtime);

    let duration_ms = started.elapsed().as_millis() as u64;
    let timed_out = interrupted.load(Ordering::SeqCst) == 1;
    let final_state = counters.inner.lock();
    let metrics = SandboxMetrics {
        in_flight_host_calls: final_state.in_flight_host_calls,
        total_host_calls: final_state.total_host_calls,
        duration_ms,
    };
    let logs = final_state.logs.clone();
    drop(final_state);

    match outcome {
        Ok(value) => Ok(SandboxExecutionResult { success: true, value: Some(value), error: None, logs, metrics }),
        Err(message) => {
            let error = if timed_out { format!("execution timed out after {}ms", config.timeout_ms) } else { message };
            Ok(SandboxExecutionResult { success: false, value: None, error: Some(error), logs, metrics })
        }
    }
}

fn install_console_log(ctx: &Ctx<'_>, counters: CallCounters) -> rquickjs::Result<()> {
    let console = rquickjs::Object::new(ctx.clone())?;
    let log_fn = rquickjs::Function::new(ctx.clone(), move |args: rquickjs::function::Rest<JsValue>| {
        let line = args
            .0
            .iter()
            .map(|v| v.as_string().and_then(|s| s.to_string().ok()).unwrap_or_else(|| format!("{v:?}")))
            .collect::<Vec<_>>()
            .join(" ");
        counters.log(line);
    })?;
    console.set("log", log_fn)?;
    ctx.globals().set("console", console)?;
    Ok(())
}
