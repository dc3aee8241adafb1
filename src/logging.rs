//! Logging
//!
//! Diagnostics go through `tracing`. Incoming operations are reported to an
//! injected [`OperationLogger`] chosen from configuration at startup.

use async_graphql::Request;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};
use uuid::Uuid;

use crate::config::LogFormat;
use crate::{Result, SubgraphError};

/// One incoming GraphQL operation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingOperation {
    pub request_id: Uuid,
    pub received_at: DateTime<Utc>,
    pub operation_name: Option<String>,
    pub query: String,
    pub variables: serde_json::Value,
}

impl IncomingOperation {
    pub fn from_request(request: &Request) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            received_at: Utc::now(),
            operation_name: request.operation_name.clone(),
            query: request.query.clone(),
            variables: serde_json::to_value(&request.variables).unwrap_or(serde_json::Value::Null),
        }
    }
}

/// Sink for incoming operations
pub trait OperationLogger: Send + Sync {
    fn record(&self, operation: &IncomingOperation);
}

/// Logs every operation at `info`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingOperationLogger;

impl OperationLogger for TracingOperationLogger {
    fn record(&self, operation: &IncomingOperation) {
        tracing::info!(
            request_id = %operation.request_id,
            received_at = %operation.received_at.to_rfc3339(),
            operation = operation.operation_name.as_deref().unwrap_or("<anonymous>"),
            query = %operation.query,
            variables = %operation.variables,
            "Incoming GraphQL request"
        );
    }
}

/// Discards operations
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentOperationLogger;

impl OperationLogger for SilentOperationLogger {
    fn record(&self, _operation: &IncomingOperation) {}
}

/// Install the global tracing subscriber
///
/// `RUST_LOG`, when set, overrides the configured filter.
pub fn init_logging(filter: &str, format: LogFormat) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(filter)
            .map_err(|e| SubgraphError::Logging(format!("invalid filter `{filter}`: {e}")))?,
    };

    let base_subscriber = Registry::default().with(filter);

    match format {
        LogFormat::Json => base_subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(std::io::stdout),
            )
            .try_init(),
        LogFormat::Text => base_subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(std::io::stdout),
            )
            .try_init(),
    }
    .map_err(|e| SubgraphError::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_graphql::Variables;
    use serde_json::json;

    #[test]
    fn test_incoming_operation_from_request() {
        let request = Request::new("query Blog($id: ID!) { blog(id: $id) { id } }")
            .operation_name("Blog")
            .variables(Variables::from_json(json!({ "id": "1" })));

        let operation = IncomingOperation::from_request(&request);
        assert_eq!(operation.operation_name.as_deref(), Some("Blog"));
        assert!(operation.query.contains("blog(id: $id)"));
        assert_eq!(operation.variables, json!({ "id": "1" }));
    }

    #[test]
    fn test_request_ids_are_unique() {
        let request = Request::new("{ blogs { id } }");
        let first = IncomingOperation::from_request(&request);
        let second = IncomingOperation::from_request(&request);
        assert_ne!(first.request_id, second.request_id);
    }

    #[test]
    fn test_invalid_filter_is_logging_error() {
        // An explicit RUST_LOG takes precedence over the configured filter
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let err = init_logging("blogs_subgraph=notalevel", LogFormat::Text).unwrap_err();
        assert!(matches!(err, SubgraphError::Logging(ref message) if message.contains("notalevel")));
    }

    #[test]
    fn test_serializes_camel_case() {
        let operation = IncomingOperation::from_request(&Request::new("{ authors { id } }"));
        let json = serde_json::to_value(&operation).unwrap();
        assert!(json.get("requestId").is_some());
        assert!(json.get("operationName").unwrap().is_null());
    }
}
