//! HTTP transport
//!
//! `POST /graphql` accepts `{query, operationName?, variables?}`. Rejected
//! requests answer 400 with `{"errors": [...]}`; everything else is 200.

use async_graphql::ServerError;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::config::Config;
use crate::executor::{Execution, Subgraph};

/// Router serving the subgraph at `/graphql`
pub fn router(subgraph: Arc<Subgraph>) -> Router {
    Router::new()
        .route("/graphql", post(graphql_handler))
        .with_state(subgraph)
}

/// GraphQL handler
///
/// The body is decoded by hand so a malformed request gets a GraphQL-shaped
/// error instead of axum's plain-text rejection.
pub async fn graphql_handler(State(subgraph): State<Arc<Subgraph>>, body: Bytes) -> Response {
    let request = match serde_json::from_slice::<async_graphql::Request>(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(error = %e, "Malformed GraphQL request body");
            let error = ServerError::new(format!("Invalid GraphQL request: {e}"), None);
            return bad_request(vec![error]);
        }
    };

    match subgraph.execute(request).await {
        Execution::Executed(response) => Json(response).into_response(),
        Execution::Rejected(errors) => bad_request(errors),
    }
}

fn bad_request(errors: Vec<ServerError>) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "errors": errors }))).into_response()
}

/// Bind and serve until Ctrl-C
pub async fn serve(config: &Config, subgraph: Subgraph) -> std::io::Result<()> {
    let listener = TcpListener::bind(config.socket_addr()).await?;
    let addr = listener.local_addr()?;
    tracing::info!("Blogs subgraph running at http://{addr}/graphql");

    axum::serve(listener, router(Arc::new(subgraph)))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        // Without a signal handler, keep serving
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
