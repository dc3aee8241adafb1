//! Server configuration
//!
//! Parsed once at startup from flags, with environment fallbacks, and passed
//! explicitly into subgraph construction.

use clap::{ArgAction, Parser, ValueEnum};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use crate::logging::{OperationLogger, SilentOperationLogger, TracingOperationLogger};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Blogs subgraph configuration
#[derive(Debug, Clone, Parser)]
#[command(name = "blogs-subgraph", version, about = "Federated GraphQL subgraph for blogs and authors")]
pub struct Config {
    /// Address to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 4001)]
    pub port: u16,

    /// Federation-annotated SDL
    #[arg(long, env = "SCHEMA_PATH", default_value = "schema.graphql")]
    pub schema: PathBuf,

    /// JSON data snapshot
    #[arg(long, env = "DATA_PATH", default_value = "data.json")]
    pub data: PathBuf,

    /// Log every incoming operation
    #[arg(long, env = "LOG_OPERATIONS", default_value_t = true, action = ArgAction::Set)]
    pub log_operations: bool,

    /// Tracing filter directive, e.g. `info` or `blogs_subgraph=debug`
    #[arg(long, env = "LOG_FILTER", default_value = "info")]
    pub log_filter: String,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Config {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Operation logger selected by `log_operations`
    pub fn operation_logger(&self) -> Arc<dyn OperationLogger> {
        if self.log_operations {
            Arc::new(TracingOperationLogger)
        } else {
            Arc::new(SilentOperationLogger)
        }
    }
}
