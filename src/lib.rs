//! # blogs-subgraph
//!
//! Apollo Federation subgraph serving blogs and authors from an in-memory
//! snapshot.
//!
//! ## Features
//!
//! - **Schema Registry** - Federation-annotated SDL with key and ownership declarations
//! - **Reference Protocol** - Outbound reference stubs and inbound `_entities` resolution
//! - **Resolver Dispatch** - `(type, field)` resolver table validated at startup
//! - **Execution Adapter** - Transport vs GraphQL error classification
//! - **HTTP Transport** - Axum handler for `POST /graphql`
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use blogs_subgraph::{DataStore, SchemaRegistry, SubgraphBuilder};
//!
//! # async fn example() -> blogs_subgraph::Result<()> {
//! let registry = SchemaRegistry::load("schema.graphql")?;
//! let store = Arc::new(DataStore::load("data.json")?);
//! let subgraph = SubgraphBuilder::new(registry, store).build()?;
//!
//! let execution = subgraph
//!     .execute(async_graphql::Request::new("{ blogs { id title } }"))
//!     .await;
//! # Ok(())
//! # }
//! ```

mod completion;
pub mod config;
pub mod executor;
pub mod federation;
pub mod logging;
pub mod registry;
pub mod resolvers;
pub mod server;
pub mod store;

pub use config::{Config, LogFormat};
pub use executor::{Execution, Subgraph, SubgraphBuilder};
pub use federation::{Entity, EntityResolver, EntityResolvers, ReferenceStub, Representation};
pub use logging::{init_logging, IncomingOperation, OperationLogger, SilentOperationLogger, TracingOperationLogger};
pub use registry::{Ownership, Resolution, SchemaRegistry};
pub use resolvers::{FieldInput, Resolved, ResolverMap};
pub use store::{Author, Blog, DataStore};

use std::path::PathBuf;
use thiserror::Error;

/// Subgraph configuration errors
///
/// All of these are raised while the subgraph is being assembled and are
/// fatal at startup; request-time failures are GraphQL errors instead.
#[derive(Error, Debug)]
pub enum SubgraphError {
    #[error("Failed to read `{}`: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid data snapshot: {0}")]
    DataFormat(#[from] serde_json::Error),

    #[error("Invalid schema document: {0}")]
    SchemaParse(String),

    #[error("Unsupported definition `{0}`: only object types and scalars are supported")]
    UnsupportedDefinition(String),

    #[error("Query root type `{0}` is not declared")]
    MissingQueryType(String),

    #[error("Field `{type_name}.{field}` refers to unknown type `{target}`")]
    UnknownType {
        type_name: String,
        field: String,
        target: String,
    },

    #[error("Cannot declare entity `{0}`: no such object type")]
    UnknownEntityType(String),

    #[error("Entity `{0}` must declare at least one key field")]
    EmptyKey(String),

    #[error("Key field `{field}` does not exist on type `{type_name}`")]
    UnknownKeyField { type_name: String, field: String },

    #[error("Key field `{field}` is listed twice on `{type_name}`")]
    DuplicateKeyField { type_name: String, field: String },

    #[error("Unsupported key selection `{fields}` on `{type_name}`")]
    UnsupportedKey { type_name: String, fields: String },

    #[error("Entity `{0}` is declared more than once")]
    DuplicateEntity(String),

    #[error("Key field `{type_name}.{field}` of an extended entity must be marked @external")]
    LocallyResolvableKey { type_name: String, field: String },

    #[error("Field `{type_name}.{field}` is marked @external but is not a key of an extended entity")]
    UnexpectedExternal { type_name: String, field: String },

    #[error("Field `{type_name}.{field}` needs the full record, but `{type_name}` is extended here and only its key is known")]
    RecordOnlyField { type_name: String, field: String },

    #[error("No resolver registered for `{type_name}.{field}`")]
    MissingResolver { type_name: String, field: String },

    #[error("No reference resolver registered for owned entity `{0}`")]
    MissingReferenceResolver(String),

    #[error("Failed to build executable schema: {0}")]
    SchemaBuild(String),

    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

/// Result type for subgraph assembly
pub type Result<T> = std::result::Result<T, SubgraphError>;
