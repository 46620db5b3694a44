//! Tool-call bridging between the remote model and the host application.
//!
//! The remote model requests host capabilities by name. This module never
//! interprets those requests: it routes them to a [`ToolHost`] and guarantees
//! that every request is answered exactly once, so the remote protocol can
//! never stall waiting on a missing response.

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result value sent back when the host could not produce a real answer.
pub const GENERIC_ACK: &str = "ok";

/// How long a single host handler may run before it is acknowledged generically.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(10);

/// A single function invocation requested by the remote model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// The answer to exactly one [`ToolCallRequest`], correlated by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResponse {
    pub id: String,
    pub name: String,
    pub result: Value,
}

/// A tool schema advertised to the remote model at connect time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl FunctionDeclaration {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Builds a declaration whose parameters are the JSON schema of `T`.
    ///
    /// Schema metadata keys the remote rejects (`$schema`, `title`) are removed.
    pub fn for_args<T: schemars::JsonSchema>(
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let schema = schemars::schema_for!(T);
        let mut parameters = serde_json::to_value(&schema).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut parameters {
            map.remove("$schema");
            map.remove("title");
        }
        Self::new(name, description, parameters)
    }
}

/// Why a host could not answer a tool call. Never sent to the remote.
#[derive(Debug, thiserror::Error)]
pub enum ToolDispatchError {
    #[error("no handler registered for tool '{0}'")]
    UnknownTool(String),
    #[error("tool '{name}' failed: {message}")]
    Failed { name: String, message: String },
    #[error("tool '{0}' panicked")]
    Panicked(String),
    #[error("tool '{name}' did not answer within {after:?}")]
    TimedOut { name: String, after: Duration },
}

/// The host side of tool calling: what can be called, and how to call it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolHost: Send + Sync {
    /// Declarations supplied to the remote when a session connects.
    fn declarations(&self) -> Vec<FunctionDeclaration>;

    /// Executes one named capability.
    async fn dispatch(&self, name: &str, args: Value) -> Result<Value, ToolDispatchError>;
}

type ToolFn = Arc<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// A [`ToolHost`] backed by plain async closures.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, (FunctionDeclaration, ToolFn)>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under the declaration's name, replacing any previous one.
    pub fn register<F, Fut>(&mut self, declaration: FunctionDeclaration, handler: F) -> &mut Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let handler: ToolFn = Arc::new(move |args| Box::pin(handler(args)));
        self.tools
            .insert(declaration.name.clone(), (declaration, handler));
        self
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolHost for ToolRegistry {
    fn declarations(&self) -> Vec<FunctionDeclaration> {
        self.tools.values().map(|(decl, _)| decl.clone()).collect()
    }

    async fn dispatch(&self, name: &str, args: Value) -> Result<Value, ToolDispatchError> {
        let (_, handler) = self
            .tools
            .get(name)
            .ok_or_else(|| ToolDispatchError::UnknownTool(name.to_string()))?;
        handler(args).await.map_err(|e| ToolDispatchError::Failed {
            name: name.to_string(),
            message: e.to_string(),
        })
    }
}

/// Delivers tool calls to the host and pairs every request with a response.
#[derive(Clone)]
pub struct ToolCallBridge {
    host: Arc<dyn ToolHost>,
    timeout: Duration,
}

impl ToolCallBridge {
    pub fn new(host: Arc<dyn ToolHost>) -> Self {
        Self {
            host,
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The tool schema to advertise at connect time.
    pub fn declarations(&self) -> Vec<FunctionDeclaration> {
        self.host.declarations()
    }

    /// Answers a batch of requests, one response per request, in call order.
    ///
    /// Unknown tools, and handlers that fail, panic or outlive the timeout,
    /// are answered with [`GENERIC_ACK`].
    pub async fn answer(&self, calls: Vec<ToolCallRequest>) -> Vec<ToolCallResponse> {
        let mut responses = Vec::with_capacity(calls.len());
        for call in calls {
            info!(id = %call.id, name = %call.name, "Dispatching tool call");
            let result = match self.dispatch(&call.name, call.args).await {
                Ok(value) => {
                    debug!(id = %call.id, "Tool call succeeded");
                    value
                }
                Err(e) => {
                    warn!(id = %call.id, error = %e, "Tool call failed; acknowledging generically");
                    Value::String(GENERIC_ACK.to_string())
                }
            };
            responses.push(ToolCallResponse {
                id: call.id,
                name: call.name,
                result,
            });
        }
        responses
    }

    async fn dispatch(&self, name: &str, args: Value) -> Result<Value, ToolDispatchError> {
        let call = AssertUnwindSafe(self.host.dispatch(name, args)).catch_unwind();
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ToolDispatchError::Panicked(name.to_string())),
            Err(_) => Err(ToolDispatchError::TimedOut {
                name: name.to_string(),
                after: self.timeout,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(id: &str, name: &str) -> ToolCallRequest {
        ToolCallRequest {
            id: id.to_string(),
            name: name.to_string(),
            args: json!({}),
        }
    }

    #[derive(schemars::JsonSchema)]
    #[allow(dead_code)]
    struct OpenArgs {
        /// Document title.
        title: String,
    }

    #[tokio::test]
    async fn test_every_request_gets_one_matching_response() {
        let mut registry = ToolRegistry::new();
        registry.register(
            FunctionDeclaration::new("echo", "Echo the args", json!({"type": "object"})),
            |args| async move { Ok(args) },
        );
        let bridge = ToolCallBridge::new(Arc::new(registry));

        let responses = bridge
            .answer(vec![
                ToolCallRequest {
                    id: "1".into(),
                    name: "echo".into(),
                    args: json!({"x": 1}),
                },
                call("2", "missing"),
                call("3", "echo"),
            ])
            .await;

        assert_eq!(responses.len(), 3);
        let ids: Vec<_> = responses.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["1", "2", "3"]);
        assert_eq!(responses[0].result, json!({"x": 1}));
        assert_eq!(responses[1].result, json!(GENERIC_ACK));
        assert_eq!(responses[1].name, "missing");
    }

    #[tokio::test]
    async fn test_empty_batch_yields_no_responses() {
        let bridge = ToolCallBridge::new(Arc::new(ToolRegistry::new()));
        assert!(bridge.answer(vec![]).await.is_empty());
    }

    #[tokio::test]
    async fn test_failing_handler_is_acknowledged() {
        let mut host = MockToolHost::new();
        host.expect_dispatch()
            .times(2)
            .returning(|name, _| {
                Err(ToolDispatchError::Failed {
                    name: name.to_string(),
                    message: "boom".into(),
                })
            });
        let bridge = ToolCallBridge::new(Arc::new(host));

        let responses = bridge
            .answer(vec![call("a", "explode"), call("b", "explode")])
            .await;

        assert_eq!(responses.len(), 2);
        assert!(responses.iter().all(|r| r.result == json!(GENERIC_ACK)));
        assert_eq!(responses[1].id, "b");
    }

    #[tokio::test]
    async fn test_panicking_handler_is_acknowledged() {
        let mut registry = ToolRegistry::new();
        registry.register(
            FunctionDeclaration::new("first", "Index an empty list", json!({"type": "object"})),
            |_| async move {
                let items: Vec<Value> = Vec::new();
                Ok(items[0].clone())
            },
        );
        registry.register(
            FunctionDeclaration::new("echo", "Echo the args", json!({"type": "object"})),
            |args| async move { Ok(args) },
        );
        let bridge = ToolCallBridge::new(Arc::new(registry));

        let responses = bridge
            .answer(vec![call("a", "first"), call("b", "echo")])
            .await;

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].result, json!(GENERIC_ACK));
        assert_eq!(responses[1].id, "b");
        assert_eq!(responses[1].result, json!({}));
    }

    #[tokio::test]
    async fn test_hanging_handler_times_out() {
        let mut registry = ToolRegistry::new();
        registry.register(
            FunctionDeclaration::new("wait", "Never returns", json!({"type": "object"})),
            |_| std::future::pending::<anyhow::Result<Value>>(),
        );
        let bridge =
            ToolCallBridge::new(Arc::new(registry)).with_timeout(Duration::from_millis(20));

        let responses = bridge.answer(vec![call("w", "wait")]).await;

        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].id, "w");
        assert_eq!(responses[0].result, json!(GENERIC_ACK));
    }

    #[tokio::test]
    async fn test_registry_reports_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry.dispatch("nope", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolDispatchError::UnknownTool(name) if name == "nope"));
    }

    #[test]
    fn test_declaration_schema_drops_metadata() {
        let decl = FunctionDeclaration::for_args::<OpenArgs>("open", "Open a document");
        assert_eq!(decl.name, "open");
        assert!(decl.parameters.get("$schema").is_none());
        assert!(decl.parameters.get("title").is_none());
        assert!(decl.parameters["properties"].get("title").is_some());
    }
}
