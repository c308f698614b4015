//! `javascript` transformer scripts, evaluated with boa.
//!
//! A script is the body of an async function of `args`. It may `return` any JSON
//! value and may call `runFunction(name, params)`, which goes through the run's
//! function registry and returns the function's result object. Nothing else in
//! the sandbox reaches outside it: no modules, no timers, no I/O.
//!
//! ```yaml
//! transformers:
//!   - script: |
//!       const hits = runFunction("search", { q: args.topic });
//!       return { topic: args.topic, hits: hits.items.length };
//! ```

use std::cell::RefCell;
use std::rc::Rc;

use boa_engine::builtins::promise::PromiseState;
use boa_engine::object::builtins::JsPromise;
use boa_engine::property::Attribute;
use boa_engine::{
    js_string, Context, JsError, JsNativeError, JsResult, JsString, JsValue, NativeFunction, Source,
};
use serde_json::{Map, Value};

use crate::error::FragsError;

/// Engine names served by [`run_script`].
pub const JAVASCRIPT_ENGINES: &[&str] = &["javascript", "js"];

const LOOP_ITERATION_LIMIT: u64 = 1_000_000;
const RECURSION_LIMIT: usize = 400;

// Values cross the boundary as JSON text so every shape round-trips the same way.
const PRELUDE: &str = r#"
const args = JSON.parse(__fragsArgs);
function runFunction(name, params) {
  const reply = __fragsCall(String(name), JSON.stringify(params === undefined ? {} : params));
  return JSON.parse(reply);
}
"#;

type CallFn = dyn Fn(&str, Map<String, Value>) -> Result<Map<String, Value>, FragsError>;

/// Evaluate `source` with `args` bound; `call` serves `runFunction`.
///
/// Blocking: run it on a blocking thread when `call` waits on async work.
pub fn run_script<F>(source: &str, args: &Value, call: F) -> Result<Value, FragsError>
where
    F: Fn(&str, Map<String, Value>) -> Result<Map<String, Value>, FragsError> + 'static,
{
    let call: Rc<CallFn> = Rc::new(call);
    // A fatal function error (cancellation) must win even if the script catches it.
    let fatal: Rc<RefCell<Option<FragsError>>> = Rc::new(RefCell::new(None));

    let mut context = Context::default();
    context
        .runtime_limits_mut()
        .set_loop_iteration_limit(LOOP_ITERATION_LIMIT);
    context.runtime_limits_mut().set_recursion_limit(RECURSION_LIMIT);

    context
        .register_global_property(
            js_string!("__fragsArgs"),
            JsString::from(args.to_string()),
            Attribute::empty(),
        )
        .map_err(script_error)?;

    let bridge_fatal = fatal.clone();
    let bridge = move |_this: &JsValue, params: &[JsValue], ctx: &mut Context| -> JsResult<JsValue> {
        let name = string_arg(params, 0, ctx)?;
        let raw = string_arg(params, 1, ctx)?;
        let params = match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => map,
            Ok(Value::Null) => Map::new(),
            _ => {
                return Err(JsNativeError::typ()
                    .with_message("runFunction params must be an object")
                    .into())
            }
        };
        match call(&name, params) {
            Ok(result) => Ok(JsString::from(Value::Object(result).to_string()).into()),
            Err(e) => {
                let message = e.to_string();
                if e.is_fatal_in_turn() {
                    bridge_fatal.borrow_mut().get_or_insert(e);
                }
                Err(JsNativeError::error().with_message(message).into())
            }
        }
    };
    // SAFETY: the closure captures only Rc handles to Rust data, never a GC-managed value.
    let bridge = unsafe { NativeFunction::from_closure(bridge) };
    context
        .register_global_callable(js_string!("__fragsCall"), 2, bridge)
        .map_err(script_error)?;

    context
        .eval(Source::from_bytes(PRELUDE))
        .map_err(script_error)?;

    let wrapped = format!(
        "(async function (args) {{\n{}\n}})(args).then((value) => JSON.stringify(value === undefined ? null : value))",
        source
    );
    let pending = context
        .eval(Source::from_bytes(wrapped.as_str()))
        .map_err(script_error)?;
    context.run_jobs();

    if let Some(e) = fatal.borrow_mut().take() {
        return Err(e);
    }

    let promise = pending
        .as_promise()
        .cloned()
        .ok_or_else(|| FragsError::Internal("script wrapper did not return a promise".to_string()))
        .and_then(|obj| JsPromise::from_object(obj).map_err(script_error))?;

    match promise.state() {
        PromiseState::Fulfilled(value) => {
            let text = value
                .as_string()
                .map(JsString::to_std_string_escaped)
                .unwrap_or_else(|| "null".to_string());
            serde_json::from_str(&text)
                .map_err(|e| FragsError::tool(format!("javascript: result is not JSON ({})", e)))
        }
        PromiseState::Rejected(reason) => Err(script_error(JsError::from_opaque(reason))),
        PromiseState::Pending => Err(FragsError::tool(
            "javascript: script awaited something that never settled",
        )),
    }
}

fn string_arg(params: &[JsValue], index: usize, ctx: &mut Context) -> JsResult<String> {
    let value = params.get(index).cloned().unwrap_or_default();
    Ok(value.to_string(ctx)?.to_std_string_escaped())
}

fn script_error(e: JsError) -> FragsError {
    FragsError::tool(format!("javascript: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn no_functions(name: &str, _params: Map<String, Value>) -> Result<Map<String, Value>, FragsError> {
        Err(FragsError::tool(format!("Unknown function '{}'", name)))
    }

    #[test]
    fn test_returns_json_from_args() {
        let out = run_script(
            "return { n: args.items.length, first: args.items[0].toUpperCase() };",
            &json!({"items": ["a", "b"]}),
            no_functions,
        )
        .unwrap();
        assert_eq!(out, json!({"n": 2, "first": "A"}));
    }

    #[test]
    fn test_no_return_is_null() {
        assert_eq!(run_script("const x = 1;", &json!({}), no_functions).unwrap(), Value::Null);
    }

    #[test]
    fn test_run_function_bridge() {
        let out = run_script(
            r#"
const doubled = runFunction("double", { n: args.n });
const again = await runFunction("double", { n: doubled.n });
return { result: again.n };
"#,
            &json!({"n": 3}),
            |name, params| {
                assert_eq!(name, "double");
                let n = params["n"].as_i64().unwrap_or_default();
                Ok(json!({"n": n * 2}).as_object().cloned().unwrap_or_default())
            },
        )
        .unwrap();
        assert_eq!(out, json!({"result": 12}));
    }

    #[test]
    fn test_function_errors_can_be_caught() {
        let out = run_script(
            r#"
try { runFunction("missing", {}); return "no"; }
catch (e) { return String(e.message); }
"#,
            &json!({}),
            no_functions,
        )
        .unwrap();
        assert_eq!(out, json!("Tool error: Unknown function 'missing'"));
    }

    #[test]
    fn test_fatal_function_error_wins() {
        let err = run_script(
            r#"try { runFunction("slow", {}); } catch (e) {} return 1;"#,
            &json!({}),
            |_, _| Err(FragsError::Cancelled("run cancelled".to_string())),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "cancelled");
    }

    #[test]
    fn test_thrown_and_syntax_errors() {
        let err = run_script("throw new Error('boom');", &json!({}), no_functions).unwrap_err();
        assert_eq!(err.kind(), "tool");
        assert!(err.to_string().contains("boom"));

        let err = run_script("return {", &json!({}), no_functions).unwrap_err();
        assert!(err.to_string().starts_with("Tool error: javascript:"));
    }

    #[test]
    fn test_runaway_loops_stop() {
        let err = run_script("while (true) {}", &json!({}), no_functions).unwrap_err();
        assert_eq!(err.kind(), "tool");
    }

    #[test]
    fn test_no_host_access() {
        let out = run_script(
            "return [typeof require, typeof fetch, typeof process];",
            &json!({}),
            no_functions,
        )
        .unwrap();
        assert_eq!(out, json!(["undefined", "undefined", "undefined"]));
    }
}
