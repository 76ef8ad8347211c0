//! Tool dispatch: names an operation, runs it under a timeout, and always
//! answers with an envelope.
//!
//! Each request moves through
//! `Received -> Validated -> Executing -> {Succeeded | Failed | TimedOut}`.
//! Handler errors and panics are converted to `FAILED` envelopes here and
//! never reach the transport.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};
use tokio::time::{Instant, timeout};
use tracing::{Instrument, info, instrument, trace, warn};
use uuid::Uuid;

use crate::error::{ErrorKind, RagError, RagResult};

/// Operations exposed through the dispatcher
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    Ingest,
    Vectorize,
    BatchVectorize,
    RagSearch,
    DeleteByTag,
}

/// Executes a validated operation
#[async_trait]
pub trait ToolHandler: Send + Sync + 'static {
    async fn handle(&self, operation: Operation, arguments: Value) -> RagResult<Value>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
enum DispatchState {
    Received,
    Validated,
    Executing,
    Succeeded,
    Failed,
    TimedOut,
}

/// Terminal status of a dispatched request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolStatus {
    Succeeded,
    Failed,
    TimedOut,
}

/// Inbound request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(alias = "operation_name")]
    pub operation: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolRequest {
    pub fn new(operation: impl Into<String>, arguments: Value) -> Self {
        Self {
            request_id: None,
            operation: operation.into(),
            arguments,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// Outbound envelope; produced for every request whatever the outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub request_id: String,
    pub operation: String,
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub duration_ms: u64,
}

impl ToolResponse {
    fn succeeded(request_id: String, operation: String, result: Value, started: Instant) -> Self {
        Self {
            request_id,
            operation,
            status: ToolStatus::Succeeded,
            result: Some(result),
            error: None,
            error_kind: None,
            duration_ms: elapsed_ms(started),
        }
    }

    fn failed(request_id: String, operation: String, err: &RagError, started: Instant) -> Self {
        let status = match err {
            RagError::Timeout(_) => ToolStatus::TimedOut,
            _ => ToolStatus::Failed,
        };
        Self {
            request_id,
            operation,
            status,
            result: None,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
            duration_ms: elapsed_ms(started),
        }
    }

    /// Envelope for input the transport could not even parse into a request
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            operation: String::new(),
            status: ToolStatus::Failed,
            result: None,
            error: Some(message.into()),
            error_kind: Some(ErrorKind::Validation),
            duration_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Succeeded
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Routes requests to a [`ToolHandler`] under a bounded timeout
pub struct ToolDispatcher<H: ToolHandler> {
    handler: Arc<H>,
    registry: BTreeMap<String, Operation>,
    timeout: Duration,
}

impl<H: ToolHandler> ToolDispatcher<H> {
    /// Dispatcher with every [`Operation`] registered
    pub fn new(handler: Arc<H>, timeout: Duration) -> Self {
        Self::with_operations(handler, Operation::iter(), timeout)
    }

    /// Dispatcher exposing only the given operations
    pub fn with_operations(
        handler: Arc<H>,
        operations: impl IntoIterator<Item = Operation>,
        timeout: Duration,
    ) -> Self {
        let registry = operations
            .into_iter()
            .map(|op| (op.to_string(), op))
            .collect();
        Self {
            handler,
            registry,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Registered operation names, sorted
    pub fn operations(&self) -> Vec<&str> {
        self.registry.keys().map(String::as_str).collect()
    }

    fn resolve(&self, name: &str) -> RagResult<Operation> {
        if name.is_empty() {
            return Err(RagError::Validation("Operation name must not be empty".to_string()));
        }
        self.registry.get(name).copied().ok_or_else(|| {
            RagError::Validation(format!(
                "Unknown operation '{}'. Available operations: {}",
                name,
                self.operations().join(", ")
            ))
        })
    }

    #[instrument(skip(self, request), fields(request_id = tracing::field::Empty, operation = %request.operation))]
    pub async fn dispatch(&self, request: ToolRequest) -> ToolResponse {
        let started = Instant::now();
        let request_id = request
            .request_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        tracing::Span::current().record("request_id", request_id.as_str());
        trace!(state = %DispatchState::Received);

        let name = request.operation.trim().to_string();
        let operation = match self.resolve(&name) {
            Ok(operation) => operation,
            Err(err) => {
                warn!(state = %DispatchState::Failed, error = %err, "Rejected request");
                return ToolResponse::failed(request_id, name, &err, started);
            }
        };
        trace!(state = %DispatchState::Validated);

        let handler = Arc::clone(&self.handler);
        let arguments = request.arguments;
        let mut task = tokio::spawn(
            async move { handler.handle(operation, arguments).await }.in_current_span(),
        );
        trace!(state = %DispatchState::Executing);

        let outcome = match timeout(self.timeout, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(RagError::Internal(format!(
                "Operation '{}' aborted: {}",
                name, join_error
            ))),
            Err(_) => {
                // Dropping the task's future cancels every pending client call
                task.abort();
                Err(RagError::Timeout(self.timeout.as_millis() as u64))
            }
        };

        let response = match outcome {
            Ok(value) => ToolResponse::succeeded(request_id, name, value, started),
            Err(err) => ToolResponse::failed(request_id, name, &err, started),
        };

        let state = match response.status {
            ToolStatus::Succeeded => DispatchState::Succeeded,
            ToolStatus::Failed => DispatchState::Failed,
            ToolStatus::TimedOut => DispatchState::TimedOut,
        };
        info!(
            state = %state,
            duration_ms = response.duration_ms,
            error = response.error.as_deref(),
            "Dispatch complete"
        );
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Handler whose behaviour is chosen by the `mode` argument
    #[derive(Default)]
    struct ScriptedHandler {
        finished: AtomicBool,
    }

    #[async_trait]
    impl ToolHandler for ScriptedHandler {
        async fn handle(&self, operation: Operation, arguments: Value) -> RagResult<Value> {
            match arguments["mode"].as_str() {
                Some("sleep") => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    self.finished.store(true, Ordering::SeqCst);
                    Ok(Value::Null)
                }
                Some("fail") => Err(RagError::Validation("doc_id is required".into())),
                Some("exhausted") => Err(RagError::RetryExhausted {
                    attempts: 3,
                    last_error: Box::new(RagError::RateLimited("429".into())),
                }),
                Some("panic") => panic!("handler bug"),
                _ => Ok(json!({ "operation": operation.to_string(), "echo": arguments })),
            }
        }
    }

    fn dispatcher(timeout_ms: u64) -> (Arc<ScriptedHandler>, ToolDispatcher<ScriptedHandler>) {
        let handler = Arc::new(ScriptedHandler::default());
        let dispatcher =
            ToolDispatcher::new(Arc::clone(&handler), Duration::from_millis(timeout_ms));
        (handler, dispatcher)
    }

    #[tokio::test]
    async fn test_success_envelope() {
        let (_, dispatcher) = dispatcher(1000);
        let response = dispatcher
            .dispatch(ToolRequest::new("rag_search", json!({"query_text": "rust"})))
            .await;

        assert_eq!(response.status, ToolStatus::Succeeded);
        assert_eq!(response.operation, "rag_search");
        assert_eq!(response.result.unwrap()["operation"], "rag_search");
        assert!(response.error.is_none());
        assert!(!response.request_id.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_operation_is_failed_not_panic() {
        let (_, dispatcher) = dispatcher(1000);
        let response = dispatcher
            .dispatch(ToolRequest::new("unknown_op", json!({})))
            .await;

        assert_eq!(response.status, ToolStatus::Failed);
        assert_eq!(response.error_kind, Some(ErrorKind::Validation));
        let error = response.error.unwrap();
        assert!(error.contains("unknown_op"));
        assert!(error.contains("rag_search"));
        assert!(response.result.is_none());
    }

    #[tokio::test]
    async fn test_empty_operation_is_failed() {
        let (_, dispatcher) = dispatcher(1000);
        let response = dispatcher.dispatch(ToolRequest::new("  ", json!({}))).await;
        assert_eq!(response.status, ToolStatus::Failed);
        assert!(response.error.unwrap().contains("must not be empty"));
    }

    #[tokio::test]
    async fn test_handler_error_is_wrapped() {
        let (_, dispatcher) = dispatcher(1000);
        let response = dispatcher
            .dispatch(ToolRequest::new("ingest", json!({"mode": "fail"})))
            .await;

        assert_eq!(response.status, ToolStatus::Failed);
        assert_eq!(response.error_kind, Some(ErrorKind::Validation));
        assert!(response.error.unwrap().contains("doc_id is required"));
    }

    #[tokio::test]
    async fn test_retry_exhaustion_is_reported_distinctly() {
        let (_, dispatcher) = dispatcher(1000);
        let response = dispatcher
            .dispatch(ToolRequest::new("vectorize", json!({"mode": "exhausted"})))
            .await;

        assert_eq!(response.status, ToolStatus::Failed);
        assert_eq!(response.error_kind, Some(ErrorKind::RetryExhausted));
    }

    #[tokio::test]
    async fn test_panic_becomes_failed_envelope() {
        let (_, dispatcher) = dispatcher(1000);
        let response = dispatcher
            .dispatch(ToolRequest::new("ingest", json!({"mode": "panic"})))
            .await;

        assert_eq!(response.status, ToolStatus::Failed);
        assert_eq!(response.error_kind, Some(ErrorKind::Internal));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_envelope_and_cancellation() {
        let (handler, dispatcher) = dispatcher(100);
        let response = dispatcher
            .dispatch(ToolRequest::new("batch_vectorize", json!({"mode": "sleep"})))
            .await;

        assert_eq!(response.status, ToolStatus::TimedOut);
        assert_eq!(response.error_kind, Some(ErrorKind::Timeout));
        assert!(response.duration_ms >= 100);

        // The abandoned operation never completes
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(!handler.finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_caller_request_id_is_preserved() {
        let (_, dispatcher) = dispatcher(1000);
        let response = dispatcher
            .dispatch(ToolRequest::new("ingest", json!({})).with_request_id("req-42"))
            .await;
        assert_eq!(response.request_id, "req-42");

        let generated = dispatcher.dispatch(ToolRequest::new("ingest", json!({}))).await;
        assert!(Uuid::parse_str(&generated.request_id).is_ok());
    }

    #[test]
    fn test_operations_listing() {
        let (_, dispatcher) = dispatcher(1000);
        assert_eq!(
            dispatcher.operations(),
            vec!["batch_vectorize", "delete_by_tag", "ingest", "rag_search", "vectorize"]
        );
    }

    #[tokio::test]
    async fn test_unregistered_operation_is_unknown() {
        let handler = Arc::new(ScriptedHandler::default());
        let dispatcher = ToolDispatcher::with_operations(
            handler,
            [Operation::RagSearch],
            Duration::from_secs(1),
        );
        let response = dispatcher.dispatch(ToolRequest::new("ingest", json!({}))).await;
        assert_eq!(response.status, ToolStatus::Failed);
    }

    #[test]
    fn test_envelope_serialization() {
        let request: ToolRequest = serde_json::from_value(json!({
            "operation_name": "rag_search",
            "arguments": {"query_text": "x"}
        }))
        .unwrap();
        assert_eq!(request.operation, "rag_search");
        assert!(request.request_id.is_none());

        let response = ToolResponse::invalid_request("bad json");
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["status"], "FAILED");
        assert_eq!(value["error_kind"], "validation");
        assert!(value.get("result").is_none());
    }
}
