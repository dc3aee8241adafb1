//! Query execution adapter
//!
//! Assembles an async-graphql dynamic schema from the registry and the
//! resolver dispatch table, then runs requests against it. Failures that make
//! a request unexecutable (syntax, operation selection, missing variables)
//! come back as [`Execution::Rejected`]; everything else, including
//! validation and field errors, is a regular GraphQL response.

use async_graphql::dynamic::{self, Field, FieldFuture, FieldValue, InputValue, Object, TypeRef};
use async_graphql::parser::types::{
    BaseType, DocumentOperations, ExecutableDocument, OperationDefinition, OperationType, Selection, SelectionSet,
    Type,
};
use async_graphql::parser::{parse_query, Positioned};
use async_graphql::{Request, Response, ServerError, Value, Variables};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::Instrument;

use crate::completion::{Completion, FieldErrors, UnresolvedEntities};
use crate::config::Config;
use crate::federation::{Entity, EntityResolver, EntityResolvers};
use crate::logging::{IncomingOperation, OperationLogger, TracingOperationLogger};
use crate::registry::{Ownership, SchemaRegistry};
use crate::resolvers::{self, Arguments, FieldInput, Resolved, ResolverMap};
use crate::store::DataStore;
use crate::{Result, SubgraphError};

/// Outcome of one request
#[derive(Debug)]
pub enum Execution {
    /// Executed (possibly with validation or field errors)
    Executed(Response),
    /// Not executable; no `data`
    Rejected(Vec<ServerError>),
}

impl Execution {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Execution::Rejected(_))
    }

    pub fn errors(&self) -> &[ServerError] {
        match self {
            Execution::Executed(response) => &response.errors,
            Execution::Rejected(errors) => errors,
        }
    }
}

/// Assembles a [`Subgraph`]
pub struct SubgraphBuilder {
    registry: SchemaRegistry,
    store: Arc<DataStore>,
    resolvers: ResolverMap,
    references: EntityResolvers,
    logger: Arc<dyn OperationLogger>,
}

impl SubgraphBuilder {
    /// Start from the blog subgraph resolvers
    pub fn new(registry: SchemaRegistry, store: Arc<DataStore>) -> Self {
        Self {
            registry,
            resolvers: resolvers::blog_subgraph_resolvers(),
            references: resolvers::reference_resolvers(store.clone()),
            store,
            logger: Arc::new(TracingOperationLogger),
        }
    }

    /// Replace the whole dispatch table
    pub fn resolvers(mut self, resolvers: ResolverMap) -> Self {
        self.resolvers = resolvers;
        self
    }

    /// Add or override a single field resolver
    pub fn resolver<F>(mut self, type_name: &str, field: &str, resolver: F) -> Self
    where
        F: Fn(&FieldInput<'_>) -> async_graphql::Result<Resolved> + Send + Sync + 'static,
    {
        self.resolvers = self.resolvers.register(type_name, field, resolver);
        self
    }

    pub fn reference_resolver(mut self, typename: &str, resolver: impl EntityResolver + 'static) -> Self {
        self.references = self.references.register(typename, resolver);
        self
    }

    pub fn logger(mut self, logger: Arc<dyn OperationLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Validate the dispatch table against the registry and build the schema
    pub fn build(self) -> Result<Subgraph> {
        let registry = Arc::new(self.registry);
        registry.validate()?;

        for (type_name, field) in self.resolvers.fields() {
            let declared = registry
                .object(type_name)
                .is_some_and(|object| object.get_field(field).is_some());
            if !declared {
                tracing::warn!(type_name, field, "Resolver registered for undeclared field, ignoring");
            }
        }

        for entity in registry.entities() {
            if entity.ownership() == Ownership::Owned && !self.references.contains(entity.type_name()) {
                return Err(SubgraphError::MissingReferenceResolver(entity.type_name().to_string()));
            }
        }

        let mut builder = dynamic::Schema::build(registry.query_type(), None, None).enable_federation();

        for scalar in registry.scalars() {
            builder = builder.register(dynamic::Scalar::new(scalar.as_str()));
        }

        for object in registry.objects() {
            let mut ty = Object::new(object.name());
            if let Some(description) = object.description() {
                ty = ty.description(description);
            }
            if let Some(entity) = registry.entity(object.name()) {
                ty = ty.key(entity.key_selection());
                if entity.ownership() == Ownership::Extended {
                    ty = ty.extends();
                }
            }

            let extended = registry
                .entity(object.name())
                .filter(|entity| entity.ownership() == Ownership::Extended);

            for field in object.fields() {
                if let Some(entity) = extended {
                    if !entity.is_key(field.name()) && self.resolvers.needs_record(object.name(), field.name()) {
                        return Err(SubgraphError::RecordOnlyField {
                            type_name: object.name().to_string(),
                            field: field.name().to_string(),
                        });
                    }
                }

                let resolver = self
                    .resolvers
                    .get(object.name(), field.name())
                    .cloned()
                    .ok_or_else(|| SubgraphError::MissingResolver {
                        type_name: object.name().to_string(),
                        field: field.name().to_string(),
                    })?;

                let type_name = object.name().to_string();
                let field_name = field.name().to_string();
                let argument_names: Vec<String> = field.arguments().iter().map(|arg| arg.name.clone()).collect();
                let resolution = registry.resolution(field);
                let store = self.store.clone();

                let mut dynamic_field = Field::new(field.name(), type_ref(field.ty()), move |ctx| {
                    let args: Arguments = argument_names
                        .iter()
                        .filter_map(|name| {
                            ctx.args
                                .get(name)
                                .map(|value| (name.as_str(), value.as_value().clone()))
                        })
                        .collect();
                    let input = FieldInput {
                        type_name: &type_name,
                        field_name: &field_name,
                        parent: ctx.parent_value.downcast_ref::<Entity>(),
                        args: &args,
                        store: &store,
                        resolution: &resolution,
                    };
                    let resolved = resolver(&input);
                    FieldFuture::new(async move { resolved.map(|resolved| resolved.into_field_value()) })
                });

                if let Some(description) = field.description() {
                    dynamic_field = dynamic_field.description(description);
                }
                for argument in field.arguments() {
                    dynamic_field = dynamic_field.argument(InputValue::new(argument.name.as_str(), type_ref(&argument.ty)));
                }
                if field.is_external() {
                    dynamic_field = dynamic_field.external();
                }
                ty = ty.field(dynamic_field);
            }

            builder = builder.register(ty);
        }

        let references = Arc::new(self.references);
        let entity_registry = registry.clone();
        builder = builder.entity_resolver(move |ctx| {
            let references = references.clone();
            let registry = entity_registry.clone();
            FieldFuture::new(async move {
                let representations: Vec<Value> = ctx
                    .args
                    .try_get("representations")?
                    .list()?
                    .iter()
                    .map(|item| item.as_value().clone())
                    .collect();

                let entities = references.resolve_all(&registry, &representations).await?;
                tracing::debug!(requested = representations.len(), "Resolved entity representations");

                // Unions take no plain null; unresolved positions are skipped at resolve time
                let unresolved = ctx.data_opt::<UnresolvedEntities>();
                let path = ctx.path_node.as_ref().map(ToString::to_string).unwrap_or_default();

                Ok(Some(FieldValue::list(entities.into_iter().enumerate().map(|(idx, entity)| match entity {
                    Some(entity) => {
                        let typename = entity.typename().to_string();
                        FieldValue::owned_any(entity).with_type(typename)
                    }
                    None => {
                        if let Some(unresolved) = unresolved {
                            unresolved.insert(format!("{path}.{idx}"));
                        }
                        FieldValue::NULL
                    }
                }))))
            })
        });

        let schema = builder
            .extension(FieldErrors)
            .finish()
            .map_err(|e| SubgraphError::SchemaBuild(e.to_string()))?;

        Ok(Subgraph {
            schema,
            registry,
            logger: self.logger,
        })
    }
}

/// Executable subgraph
pub struct Subgraph {
    schema: dynamic::Schema,
    registry: Arc<SchemaRegistry>,
    logger: Arc<dyn OperationLogger>,
}

impl Subgraph {
    /// Load schema and data named by the configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let registry = SchemaRegistry::load(&config.schema)?;
        let store = Arc::new(DataStore::load(&config.data)?);
        SubgraphBuilder::new(registry, store)
            .logger(config.operation_logger())
            .build()
    }

    /// Execute one GraphQL request
    pub async fn execute(&self, request: Request) -> Execution {
        let operation = IncomingOperation::from_request(&request);
        self.logger.record(&operation);

        let span = tracing::info_span!(
            "graphql_request",
            request_id = %operation.request_id,
            operation = operation.operation_name.as_deref().unwrap_or("")
        );

        async move {
            let document = match self.prepare(&request) {
                Ok(document) => document,
                Err(execution) => {
                    tracing::debug!(
                        rejected = execution.is_rejected(),
                        errors = execution.errors().len(),
                        "Request not executed"
                    );
                    return execution;
                }
            };

            let operation_name = request.operation_name.clone();
            let mut response = self.schema.execute(request.data(UnresolvedEntities::default())).await;
            if response.is_err() {
                if let Ok(operation) = select_operation(&document, operation_name.as_deref()) {
                    Completion::new(&self.registry, &document)
                        .complete(&mut response.data, &operation.node.selection_set.node);
                }
                tracing::debug!(errors = response.errors.len(), "Request completed with errors");
            }
            Execution::Executed(response)
        }
        .instrument(span)
        .await
    }

    /// Parsed document of an executable request
    ///
    /// `Err` is the final outcome: a rejection, or validation errors.
    fn prepare(&self, request: &Request) -> std::result::Result<ExecutableDocument, Execution> {
        let document = parse_query(&request.query).map_err(|e| Execution::Rejected(vec![ServerError::from(e)]))?;
        let operation = select_operation(&document, request.operation_name.as_deref())
            .map_err(|e| Execution::Rejected(vec![e]))?;

        let missing = missing_variables(&operation.node, &request.variables);
        if !missing.is_empty() {
            return Err(Execution::Rejected(missing));
        }

        let errors = validate_selections(&self.registry, &document, operation);
        if !errors.is_empty() {
            return Err(Execution::Executed(Response::from_errors(errors)));
        }

        Ok(document)
    }
}

fn type_ref(ty: &Type) -> TypeRef {
    let base = match &ty.base {
        BaseType::Named(name) => TypeRef::named(name.to_string()),
        BaseType::List(inner) => TypeRef::List(Box::new(type_ref(inner))),
    };
    if ty.nullable {
        base
    } else {
        TypeRef::NonNull(Box::new(base))
    }
}

fn select_operation<'a>(
    document: &'a ExecutableDocument,
    operation_name: Option<&str>,
) -> std::result::Result<&'a Positioned<OperationDefinition>, ServerError> {
    match (&document.operations, operation_name) {
        (DocumentOperations::Single(operation), None) => Ok(operation),
        (DocumentOperations::Single(_), Some(name)) => {
            Err(ServerError::new(format!("Unknown operation named \"{name}\"."), None))
        }
        (DocumentOperations::Multiple(operations), Some(name)) => operations
            .get(name)
            .ok_or_else(|| ServerError::new(format!("Unknown operation named \"{name}\"."), None)),
        (DocumentOperations::Multiple(operations), None) => {
            let mut iter = operations.values();
            match (iter.next(), iter.next()) {
                (Some(operation), None) => Ok(operation),
                _ => Err(ServerError::new(
                    "Must provide operation name if query contains multiple operations.",
                    None,
                )),
            }
        }
    }
}

fn missing_variables(operation: &OperationDefinition, variables: &Variables) -> Vec<ServerError> {
    operation
        .variable_definitions
        .iter()
        .filter(|definition| !definition.node.var_type.node.nullable && definition.node.default_value.is_none())
        .filter(|definition| {
            matches!(
                variables.get(definition.node.name.node.as_str()),
                None | Some(Value::Null)
            )
        })
        .map(|definition| {
            ServerError::new(
                format!(
                    "Variable \"${}\" of required type \"{}\" was not provided.",
                    definition.node.name.node, definition.node.var_type.node
                ),
                Some(definition.pos),
            )
        })
        .collect()
}

/// Report selections of fields the registry does not declare
///
/// Introspection and federation root fields are left to the executor.
fn validate_selections(
    registry: &SchemaRegistry,
    document: &ExecutableDocument,
    operation: &Positioned<OperationDefinition>,
) -> Vec<ServerError> {
    if operation.node.ty != OperationType::Query {
        return vec![ServerError::new(
            format!("Schema is not configured to execute {} operation.", operation.node.ty),
            Some(operation.pos),
        )];
    }

    let mut validator = SelectionValidator {
        registry,
        document,
        visited_fragments: HashSet::new(),
        errors: Vec::new(),
    };
    validator.visit(registry.query_type(), &operation.node.selection_set.node);
    validator.errors
}

struct SelectionValidator<'a> {
    registry: &'a SchemaRegistry,
    document: &'a ExecutableDocument,
    visited_fragments: HashSet<&'a str>,
    errors: Vec<ServerError>,
}

impl<'a> SelectionValidator<'a> {
    fn visit(&mut self, type_name: &'a str, selection_set: &'a SelectionSet) {
        for selection in &selection_set.items {
            match &selection.node {
                Selection::Field(field) => {
                    let name = field.node.name.node.as_str();
                    if name.starts_with("__") {
                        continue;
                    }
                    if type_name == self.registry.query_type() && (name == "_service" || name == "_entities") {
                        continue;
                    }
                    // Unions and federation types are not in the registry
                    let Some(object) = self.registry.object(type_name) else {
                        continue;
                    };
                    match object.get_field(name) {
                        Some(declared) => self.visit(declared.named_type(), &field.node.selection_set.node),
                        None => self.errors.push(ServerError::new(
                            format!("Cannot query field \"{name}\" on type \"{type_name}\"."),
                            Some(field.pos),
                        )),
                    }
                }
                Selection::FragmentSpread(spread) => {
                    let name = spread.node.fragment_name.node.as_str();
                    if !self.visited_fragments.insert(name) {
                        continue;
                    }
                    if let Some(fragment) = self.document.fragments.get(name) {
                        let on = fragment.node.type_condition.node.on.node.as_str();
                        self.visit(on, &fragment.node.selection_set.node);
                    }
                }
                Selection::InlineFragment(inline) => {
                    let on = inline
                        .node
                        .type_condition
                        .as_ref()
                        .map_or(type_name, |condition| condition.node.on.node.as_str());
                    self.visit(on, &inline.node.selection_set.node);
                }
            }
        }
    }
}
