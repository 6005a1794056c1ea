// MAMA OS — HostBridge (C8).
//
// Registers gateway tools as synchronous globals inside a Code-Act sandbox
// instance. Owns the tool-catalogue metadata used both for tier filtering
// and for the `.d.ts`-style declaration string handed to the LLM prompt.

use std::sync::Arc;

use rquickjs::function::Rest;
use rquickjs::{Ctx, Function, Object, Value as JsValue};

use crate::atoms::traits::ToolContext;
use crate::atoms::types::{AgentTier, RoleConfig, ToolDefinition};
use crate::role_manager::RoleManager;
use crate::sandbox::CallCounters;
use crate::tools::GatewayToolExecutor;

/// Fixed, enumerated read-only subset admitted for tier 2/3 agents (§4.8).
pub const READ_ONLY_TOOLS: &[&str] = &[
    "search",
    "load_checkpoint",
    "read_file",
    "browser_get_text",
    "browser_screenshot",
    "list_bots",
    "get_config",
    "pr_review_read",
];

/// Which tools a sandbox instance should expose for the given tier: tier 1
/// gets everything registered with the executor; tier 2/3 only the
/// read-only subset.
pub fn admitted_tools<'a>(executor: &'a GatewayToolExecutor, tier: AgentTier) -> Vec<&'a ToolDefinition> {
    executor
        .definitions()
        .filter(|d| tier == AgentTier::Full || READ_ONLY_TOOLS.contains(&d.name.as_str()))
        .collect()
}

/// Build the compact `.d.ts`-style declaration string for the admitted
/// tools, grouped by category, for inclusion in the LLM prompt.
pub fn declaration_string(defs: &[&ToolDefinition]) -> String {
    let mut by_category: std::collections::BTreeMap<&str, Vec<&ToolDefinition>> = std::collections::BTreeMap::new();
    for def in defs {
        by_category.entry(def.category.as_str()).or_default().push(def);
    }

    let mut out = String::new();
    out.push_str(
        "// Code-Act tool surface — functions below are synchronous inside this sandbox.\n\
         // The last expression evaluated is the return value. Prefer `var` over `let`/`const`\n\
         // for top-level bindings; there is no top-level `await`.\n",
    );
    for (category, defs) in by_category {
        out.push_str(&format!("\n// {category}\n"));
        for def in defs {
            let params = def
                .params
                .iter()
                .map(|p| format!("{}{}: {}", p.name, if p.required { "" } else { "?" }, p.ty))
                .collect::<Vec<_>>()
                .join(", ");
            out.push_str(&format!("declare function {}({params}): {};", def.name, def.return_type));
            if !def.description.is_empty() {
                out.push_str(&format!(" // {}", def.description));
            }
            out.push('\n');
        }
    }
    out
}

fn json_to_js<'js>(ctx: &Ctx<'js>, value: &serde_json::Value) -> rquickjs::Result<JsValue<'js>> {
    Ok(match value {
        serde_json::Value::Null => JsValue::new_null(ctx.clone()),
        serde_json::Value::Bool(b) => JsValue::new_bool(ctx.clone(), *b),
        serde_json::Value::Number(n) => {
            // Only narrow to a JS int when it actually fits i32; a wider i64
            // (ids, millisecond timestamps) goes through as a float instead of
            // silently wrapping.
            match n.as_i64().and_then(|i| i32::try_from(i).ok()) {
                Some(i) => JsValue::new_int(ctx.clone(), i),
                None => JsValue::new_float(ctx.clone(), n.as_f64().unwrap_or(0.0)),
            }
        }
        serde_json::Value::String(s) => rquickjs::String::from_str(ctx.clone(), s)?.into_value(),
        serde_json::Value::Array(items) => {
            let arr = rquickjs::Array::new(ctx.clone())?;
            for (i, item) in items.iter().enumerate() {
                arr.set(i, json_to_js(ctx, item)?)?;
            }
            arr.into_value()
        }
        serde_json::Value::Object(map) => {
            let obj = Object::new(ctx.clone())?;
            for (k, v) in map {
                obj.set(k.as_str(), json_to_js(ctx, v)?)?;
            }
            obj.into_value()
        }
    })
}

/// Coerce guest-side call arguments: a single object argument is used
/// directly; otherwise positional args are mapped to the declared param
/// names in order.
fn coerce_args(ctx: &Ctx<'_>, def: &ToolDefinition, args: &[JsValue]) -> Result<serde_json::Value, String> {
    if args.len() == 1 {
        if let Some(obj) = args[0].as_object() {
            if def.params.len() != 1 || def.params[0].ty != "object" {
                return Ok(object_to_json(ctx, obj));
            }
        }
    }

    let mut map = serde_json::Map::new();
    for (i, param) in def.params.iter().enumerate() {
        if let Some(arg) = args.get(i) {
            map.insert(param.name.clone(), value_to_json(ctx, arg));
        } else if param.required {
            return Err(format!(
                "usage: {}({})",
                def.name,
                def.params.iter().map(|p| p.name.as_str()).collect::<Vec<_>>().join(", ")
            ));
        }
    }
    Ok(serde_json::Value::Object(map))
}

fn object_to_json(ctx: &Ctx<'_>, obj: &rquickjs::Object<'_>) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    if let Ok(keys) = obj.keys::<String>().collect::<Result<Vec<_>, _>>() {
        for key in keys {
            if let Ok(v) = obj.get::<_, JsValue>(key.as_str()) {
                map.insert(key, value_to_json(ctx, &v));
            }
        }
    }
    serde_json::Value::Object(map)
}

fn value_to_json(ctx: &Ctx<'_>, value: &JsValue) -> serde_json::Value {
    if value.is_null() || value.is_undefined() {
        serde_json::Value::Null
    } else if let Some(b) = value.as_bool() {
        serde_json::Value::Bool(b)
    } else if let Some(i) = value.as_int() {
        serde_json::Value::Number(i.into())
    } else if let Some(f) = value.as_float() {
        serde_json::Number::from_f64(f).map(serde_json::Value::Number).unwrap_or(serde_json::Value::Null)
    } else if let Some(s) = value.as_string() {
        serde_json::Value::String(s.to_string().unwrap_or_default())
    } else if let Some(obj) = value.as_object() {
        object_to_json(ctx, obj)
    } else {
        serde_json::Value::Null
    }
}

fn missing_required_params(def: &ToolDefinition, input: &serde_json::Value) -> Option<String> {
    for param in &def.params {
        if param.required && input.get(&param.name).is_none() {
            return Some(format!(
                "usage: {}({})",
                def.name,
                def.params.iter().map(|p| p.name.as_str()).collect::<Vec<_>>().join(", ")
            ));
        }
    }
    None
}

/// Register every admitted tool as a guest-visible global function on
/// `ctx`. Each call: coerces arguments, validates required params, calls
/// `GatewayToolExecutor::execute`, and throws or returns per §4.8.
pub fn install_tools<'js>(
    ctx: &Ctx<'js>,
    counters: CallCounters,
    executor: Arc<GatewayToolExecutor>,
    role_manager: Arc<RoleManager>,
    role: RoleConfig,
    tool_context: ToolContext,
    definitions: Vec<ToolDefinition>,
) -> rquickjs::Result<()> {
    for def in definitions {
        let executor = executor.clone();
        let role_manager = role_manager.clone();
        let role = role.clone();
        let tool_context = tool_context.clone();
        let counters = counters.clone();
        let def = Arc::new(def);
        let name = def.name.clone();

        let func = Function::new(ctx.clone(), move |ctx: Ctx<'js>, args: Rest<JsValue<'js>>| -> rquickjs::Result<JsValue<'js>> {
            if let Err(budget_err) = counters.enter_host_call() {
                return Err(rquickjs::Exception::throw_type(&ctx, &budget_err));
            }
            let outcome = (|| -> Result<serde_json::Value, String> {
                let input = coerce_args(&ctx, &def, &args.0)?;
                if let Some(usage) = missing_required_params(&def, &input) {
                    return Err(usage);
                }
                executor
                    .execute(&role_manager, &role, &def.name, &input, &tool_context)
                    .map_err(|e| e.to_string())
            })();
            counters.exit_host_call();

            match outcome {
                Ok(value) => json_to_js(&ctx, &value),
                Err(message) => Err(rquickjs::Exception::throw_type(&ctx, &message)),
            }
        })?;

        ctx.globals().set(name.as_str(), func)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::ToolParamSpec;

    fn def(name: &str, category: &str, read_only: bool) -> ToolDefinition {
        ToolDefinition {
            name: name.into(),
            params: vec![ToolParamSpec { name: "query".into(), ty: "string".into(), required: true }],
            return_type: "object".into(),
            description: "".into(),
            category: category.into(),
            read_only,
        }
    }

    #[test]
    fn full_tier_admits_every_registered_tool() {
        let mut executor = GatewayToolExecutor::new();
        executor.register(def("search", "read", true), |_, _| Ok(serde_json::json!({})));
        executor.register(def("delete_file", "write", false), |_, _| Ok(serde_json::json!({})));
        let admitted = admitted_tools(&executor, AgentTier::Full);
        assert_eq!(admitted.len(), 2);
    }

    #[test]
    fn read_only_tier_excludes_non_enumerated_tools() {
        let mut executor = GatewayToolExecutor::new();
        executor.register(def("search", "read", true), |_, _| Ok(serde_json::json!({})));
        executor.register(def("delete_file", "write", false), |_, _| Ok(serde_json::json!({})));
        let admitted = admitted_tools(&executor, AgentTier::ReadOnly);
        assert_eq!(admitted.len(), 1);
        assert_eq!(admitted[0].name, "search");
    }

    #[test]
    fn declaration_string_groups_by_category() {
        let defs = vec![def("search", "read", true)];
        let refs: Vec<&ToolDefinition> = defs.iter().collect();
        let decl = declaration_string(&refs);
        assert!(decl.contains("// read"));
        assert!(decl.contains("declare function search"));
    }
}
