//! Tool bridge
//!
//! Exposes two tools to external callers: `list`, which renders the members of
//! a type, and `invoke`, which evaluates a command with the globals module
//! imported. Transports are left to the host; this module only maps tool
//! calls onto a session and results onto response payloads.

use std::error::Error as StdError;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{BridgeError, Fault};
use crate::introspect::{list_members, TypeCatalog};
use crate::result::EvaluationResult;
use crate::script::{module_type_name, ScriptEngine, PRELUDE};
use crate::session::Session;

pub const LIST_TOOL: &str = "list";
pub const INVOKE_TOOL: &str = "invoke";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub server_name: String,
    /// Module imported into every invoked command
    pub globals_module: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            server_name: "stanza".to_string(),
            globals_module: "core".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolContent {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolResponse {
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError")]
    pub is_error: bool,
}

pub struct ToolBridge {
    config: BridgeConfig,
    engine: Arc<ScriptEngine>,
    session: Mutex<Session<ScriptEngine>>,
}

impl ToolBridge {
    pub fn new(config: BridgeConfig, session: Session<ScriptEngine>) -> Self {
        Self {
            config,
            engine: session.engine().clone(),
            session: Mutex::new(session),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Full type name of the globals module
    pub fn globals_type(&self) -> String {
        module_type_name(&self.config.globals_module)
    }

    pub fn server_info(&self) -> JsonValue {
        json!({
            "name": self.config.server_name,
            "version": env!("CARGO_PKG_VERSION"),
        })
    }

    pub fn tools(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: LIST_TOOL.to_string(),
                description: "Lists all public members of a type i.e. properties and functions that can be invoked.".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "type": {
                            "type": "string",
                            "description": "The type to list members for. Defaults to the type of the globals module.",
                            "default": self.globals_type(),
                            "nullable": true
                        }
                    },
                    "required": []
                }),
            },
            ToolDefinition {
                name: INVOKE_TOOL.to_string(),
                description: "Invokes a stanza command.".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "command": {
                            "type": "string",
                            "description": "A stanza expression to evaluate. Can be multiple statements separated by semicolons. The last statement's result is returned."
                        }
                    },
                    "required": ["command"]
                }),
            },
        ]
    }

    /// Dispatch a tool call by name
    pub async fn call(&self, name: &str, arguments: &JsonValue) -> Result<ToolResponse, BridgeError> {
        self.call_with_cancel(name, arguments, &CancellationToken::new())
            .await
    }

    pub async fn call_with_cancel(
        &self,
        name: &str,
        arguments: &JsonValue,
        cancel: &CancellationToken,
    ) -> Result<ToolResponse, BridgeError> {
        match name {
            LIST_TOOL => {
                let type_name = match arguments.get("type") {
                    None | Some(JsonValue::Null) => self.globals_type(),
                    Some(JsonValue::String(s)) => s.clone(),
                    Some(_) => return Err(BridgeError::InvalidArgument("type")),
                };
                self.list(&type_name)
            }
            INVOKE_TOOL => {
                let command = match arguments.get("command") {
                    None => return Err(BridgeError::MissingArgument("command")),
                    Some(JsonValue::String(s)) => s.as_str(),
                    Some(_) => return Err(BridgeError::InvalidArgument("command")),
                };
                self.invoke(command, cancel).await
            }
            other => Err(BridgeError::UnknownTool(other.to_string())),
        }
    }

    /// One text item per member signature
    pub fn list(&self, type_name: &str) -> Result<ToolResponse, BridgeError> {
        let shape = self
            .engine
            .find_type(type_name)
            .ok_or_else(|| BridgeError::TypeNotFound(type_name.to_string()))?;
        Ok(ToolResponse {
            content: list_members(&shape)
                .into_iter()
                .map(ToolContent::text)
                .collect(),
            is_error: false,
        })
    }

    /// Evaluate `command` with the globals module imported
    ///
    /// The globals module is bound on the first successful command when the
    /// session does not already reference it.
    pub async fn invoke(
        &self,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<ToolResponse, BridgeError> {
        info!("<< {}", command);

        let result = {
            let mut session = self.session.lock().await;
            let expression = self.expression(&session, command);
            session.evaluate(&expression, &[], cancel).await
        };

        let (payload, is_error) = match result {
            EvaluationResult::Success { return_value, .. } => (
                json!({
                    "result": return_value.as_ref().map_or(JsonValue::Null, |v| v.to_json()),
                    "hasValue": return_value.is_some(),
                }),
                false,
            ),
            EvaluationResult::Fault { cause } => (
                json!({
                    "error": {
                        "message": fault_message(&cause),
                        "details": fault_details(&cause),
                    }
                }),
                true,
            ),
            EvaluationResult::Cancelled => return Err(BridgeError::Cancelled),
        };

        let text = payload.to_string();
        debug!(is_error, ">> {}", text);
        Ok(ToolResponse {
            content: vec![ToolContent::text(text)],
            is_error,
        })
    }

    fn expression(&self, session: &Session<ScriptEngine>, command: &str) -> String {
        let globals = &self.config.globals_module;
        let command = command.trim_end_matches(';');
        if globals == PRELUDE || session.references().contains_module(globals) {
            format!("use {}; {}", globals, command)
        } else {
            format!("#load \"{}\"\nuse {}; {}", globals, globals, command)
        }
    }
}

/// One line a caller can show as-is
fn fault_message(fault: &Fault) -> String {
    match fault {
        Fault::Compile(diagnostics) => match diagnostics.iter().next() {
            Some(first) if diagnostics.0.len() > 1 => format!(
                "{} (and {} more)",
                first.message,
                diagnostics.0.len() - 1
            ),
            Some(first) => first.message.clone(),
            None => "compilation failed".to_string(),
        },
        Fault::Runtime(err) => err.message.clone(),
        Fault::Resolve(err) => err.to_string(),
    }
}

/// Everything known about the fault, by kind
fn fault_details(fault: &Fault) -> JsonValue {
    match fault {
        Fault::Compile(diagnostics) => json!({
            "kind": "compile",
            "diagnostics": diagnostics
                .iter()
                .map(|d| json!({ "line": d.line + 1, "column": d.col + 1, "message": d.message }))
                .collect::<Vec<_>>(),
        }),
        Fault::Runtime(err) => json!({
            "kind": "runtime",
            "code": err.code,
            "causes": causes(err.source()),
        }),
        Fault::Resolve(err) => json!({
            "kind": "resolve",
            "causes": causes(err.source()),
        }),
    }
}

fn causes(mut source: Option<&(dyn StdError + 'static)>) -> Vec<String> {
    let mut out = Vec::new();
    while let Some(err) = source {
        out.push(err.to_string());
        source = err.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::references::ReferenceTracker;
    use tokio_test::{assert_err, assert_ok};

    fn bridge() -> ToolBridge {
        let engine = Arc::new(ScriptEngine::standard());
        let tracker = ReferenceTracker::new(Arc::new(engine.resolver()), vec![]);
        ToolBridge::new(BridgeConfig::default(), Session::new(engine, tracker))
    }

    fn payload(response: &ToolResponse) -> JsonValue {
        serde_json::from_str(&response.content[0].text).unwrap()
    }

    #[test]
    fn test_tool_definitions() {
        let bridge = bridge();
        let tools = bridge.tools();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["list", "invoke"]);
        assert_eq!(
            tools[0].input_schema["properties"]["type"]["default"],
            "script.modules.core"
        );
        assert_eq!(tools[1].input_schema["required"][0], "command");
        assert_eq!(bridge.server_info()["name"], "stanza");
    }

    #[tokio::test]
    async fn test_invoke_returns_value() {
        let bridge = bridge();
        let response = bridge
            .call("invoke", &json!({ "command": "1 + 1;" }))
            .await
            .unwrap();
        assert!(!response.is_error);
        let body = payload(&response);
        assert_eq!(body["result"], 2.0);
        assert_eq!(body["hasValue"], true);
    }

    #[tokio::test]
    async fn test_invoke_keeps_session_state() {
        let bridge = bridge();
        bridge.call("invoke", &json!({ "command": "x = 5" })).await.unwrap();
        let response = bridge
            .call("invoke", &json!({ "command": "len(\"abc\") + x" }))
            .await
            .unwrap();
        assert_eq!(payload(&response)["result"], 8.0);
    }

    #[tokio::test]
    async fn test_invoke_void_has_no_value() {
        let bridge = bridge();
        let response = bridge
            .call("invoke", &json!({ "command": "print(1)" }))
            .await
            .unwrap();
        let body = payload(&response);
        assert_eq!(body["hasValue"], false);
        assert!(body["result"].is_null());
    }

    #[tokio::test]
    async fn test_invoke_fault_is_error_payload() {
        let bridge = bridge();
        let response = bridge
            .call("invoke", &json!({ "command": "fail(\"boom\")" }))
            .await
            .unwrap();
        assert!(response.is_error);
        let body = payload(&response);
        assert!(body["error"]["message"].as_str().unwrap().contains("boom"));
        assert_eq!(body["error"]["details"]["kind"], "runtime");
    }

    #[tokio::test]
    async fn test_compile_fault_details_are_structured() {
        let bridge = bridge();
        let response = bridge.call("invoke", &json!({ "command": "1 +" })).await.unwrap();
        assert!(response.is_error);
        let error = &payload(&response)["error"];
        assert!(error["message"].is_string());
        assert_ne!(error["message"], error["details"]);
        assert_eq!(error["details"]["kind"], "compile");
        assert_eq!(error["details"]["diagnostics"][0]["line"], 1);
        let first = error["details"]["diagnostics"][0]["message"].as_str().unwrap();
        assert!(error["message"].as_str().unwrap().starts_with(first));
    }

    #[tokio::test]
    async fn test_unreferenced_globals_module_is_loaded() {
        let engine = Arc::new(ScriptEngine::standard());
        let tracker = ReferenceTracker::new(Arc::new(engine.resolver()), vec![]);
        let config = BridgeConfig {
            globals_module: "math".to_string(),
            ..BridgeConfig::default()
        };
        let bridge = ToolBridge::new(config, Session::new(engine, tracker));

        for _ in 0..2 {
            let response = bridge
                .call("invoke", &json!({ "command": "floor(2.5)" }))
                .await
                .unwrap();
            assert!(!response.is_error, "{}", response.content[0].text);
            assert_eq!(payload(&response)["result"], 2.0);
        }
    }

    #[tokio::test]
    async fn test_invoke_cancelled() {
        let bridge = bridge();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = bridge
            .call_with_cancel("invoke", &json!({ "command": "1" }), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Cancelled));
    }

    #[tokio::test]
    async fn test_argument_errors() {
        let bridge = bridge();
        let err = assert_err!(bridge.call("invoke", &json!({})).await);
        assert_eq!(err.to_string(), "Missing required argument 'command'");
        let err = assert_err!(bridge.call("invoke", &json!({ "command": 3 })).await);
        assert_eq!(err.to_string(), "Argument 'command' must be a string");
        let err = assert_err!(bridge.call("eval", &json!({})).await);
        assert_eq!(err.to_string(), "Unknown tool: 'eval'");
    }

    #[tokio::test]
    async fn test_list_defaults_to_globals() {
        let bridge = bridge();
        let response = assert_ok!(bridge.call("list", &json!({})).await);
        let members: Vec<_> = response.content.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(
            members,
            vec![
                "void print(any.. values)",
                "num len(any value)",
                "str str(any value)",
                "void fail(str message)",
            ]
        );

        let response = bridge
            .call("list", &json!({ "type": "script.modules.stats" }))
            .await
            .unwrap();
        assert_eq!(response.content[0].text, "num sum(script.List<num> values)");

        let err = bridge.call("list", &json!({ "type": "Nope" })).await.unwrap_err();
        assert!(matches!(err, BridgeError::TypeNotFound(_)));
    }
}
