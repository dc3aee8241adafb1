//! Response completion
//!
//! The dynamic executor drops the key of a field whose resolver failed and
//! reports the error without a path. [`FieldErrors`] turns each failure into
//! a `null` value plus a located error; [`Completion`] then moves every
//! `null` out of a non-null position up to its nearest nullable ancestor.

use async_graphql::extensions::{
    Extension, ExtensionContext, ExtensionFactory, NextExecute, NextResolve, ResolveInfo,
};
use async_graphql::indexmap::IndexMap;
use async_graphql::parser::types::{BaseType, ExecutableDocument, Field, Selection, SelectionSet, Type};
use async_graphql::{Name, PathSegment, QueryPathNode, QueryPathSegment, Response, ServerError, ServerResult, Value};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::registry::SchemaRegistry;

const TYPENAME: &str = "__typename";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn path_segments(node: &QueryPathNode<'_>) -> Vec<PathSegment> {
    let mut path = node.parent.map(path_segments).unwrap_or_default();
    path.push(match node.segment {
        QueryPathSegment::Name(name) => PathSegment::Field(name.to_string()),
        QueryPathSegment::Index(idx) => PathSegment::Index(idx),
    });
    path
}

/// `_entities` positions with no matching entity, keyed by response path
///
/// Attached to each request; the entity resolver fills it before the list
/// items are resolved.
#[derive(Debug, Default)]
pub(crate) struct UnresolvedEntities(Mutex<HashSet<String>>);

impl UnresolvedEntities {
    pub(crate) fn insert(&self, path: String) {
        lock(&self.0).insert(path);
    }

    fn contains(&self, node: &QueryPathNode<'_>) -> bool {
        let unresolved = lock(&self.0);
        !unresolved.is_empty() && unresolved.contains(&node.to_string())
    }
}

/// Field error capture
pub(crate) struct FieldErrors;

impl ExtensionFactory for FieldErrors {
    fn create(&self) -> Arc<dyn Extension> {
        Arc::new(FieldErrorsExtension::default())
    }
}

#[derive(Default)]
struct FieldErrorsExtension {
    errors: Mutex<Vec<ServerError>>,
}

#[async_trait]
impl Extension for FieldErrorsExtension {
    async fn execute(
        &self,
        ctx: &ExtensionContext<'_>,
        operation_name: Option<&str>,
        next: NextExecute<'_>,
    ) -> Response {
        let mut response = next.run(ctx, operation_name).await;
        let errors = std::mem::take(&mut *lock(&self.errors));
        response.errors.extend(errors);
        response
    }

    async fn resolve(
        &self,
        ctx: &ExtensionContext<'_>,
        info: ResolveInfo<'_>,
        next: NextResolve<'_>,
    ) -> ServerResult<Option<Value>> {
        let path_node = info.path_node;
        if ctx
            .data_opt::<UnresolvedEntities>()
            .is_some_and(|unresolved| unresolved.contains(path_node))
        {
            return Ok(None);
        }

        match next.run(ctx, info).await {
            Ok(value) => Ok(value),
            Err(mut error) => {
                if error.path.is_empty() {
                    error.path = path_segments(path_node);
                }
                tracing::debug!(path = %path_node, error = %error.message, "Field resolved to null after error");
                lock(&self.errors).push(error);
                Ok(None)
            }
        }
    }
}

/// Null propagation over an executed response
pub(crate) struct Completion<'a> {
    registry: &'a SchemaRegistry,
    document: &'a ExecutableDocument,
}

impl<'a> Completion<'a> {
    pub(crate) fn new(registry: &'a SchemaRegistry, document: &'a ExecutableDocument) -> Self {
        Self { registry, document }
    }

    /// Complete `data` for a query operation's selection set
    pub(crate) fn complete(&self, data: &mut Value, selection_set: &'a SelectionSet) {
        let valid = match data {
            Value::Object(fields) => self.complete_object(fields, self.registry.query_type(), selection_set),
            _ => true,
        };
        if !valid {
            *data = Value::Null;
        }
    }

    /// `false` when a non-null field of the object ended up `null`
    fn complete_object(&self, fields: &mut IndexMap<Name, Value>, type_name: &str, selection_set: &'a SelectionSet) -> bool {
        let is_query = type_name == self.registry.query_type();
        let mut valid = true;

        for field in self.collect_fields(type_name, selection_set) {
            let name = field.name.node.as_str();
            let key = field.response_key().node.clone();

            if is_query && name == "_entities" {
                valid &= self.complete_entities(fields.entry(key).or_insert(Value::Null), &field.selection_set.node);
                continue;
            }
            // Introspection and `_service` are not in the registry
            let Some(declared) = self.registry.object(type_name).and_then(|object| object.get_field(name)) else {
                continue;
            };

            let value = fields.entry(key).or_insert(Value::Null);
            valid &= self.complete_value(value, declared.ty(), &field.selection_set.node);
        }

        valid
    }

    /// `false` when `value` is `null` in a non-null position
    fn complete_value(&self, value: &mut Value, ty: &Type, selection_set: &'a SelectionSet) -> bool {
        let valid = match (&ty.base, &mut *value) {
            (_, Value::Null) => true,
            (BaseType::List(item_ty), Value::List(items)) => {
                let mut valid = true;
                for item in items.iter_mut() {
                    valid &= self.complete_value(item, item_ty, selection_set);
                }
                valid
            }
            (BaseType::Named(name), Value::Object(fields)) => self.complete_object(fields, name.as_str(), selection_set),
            _ => true,
        };
        if !valid {
            *value = Value::Null;
        }

        ty.nullable || !matches!(value, Value::Null)
    }

    /// `[_Entity]!`: items are nullable, the list is not
    fn complete_entities(&self, value: &mut Value, selection_set: &'a SelectionSet) -> bool {
        if let Value::List(items) = value {
            for item in items.iter_mut() {
                let valid = match item {
                    Value::Object(fields) => match self.entity_type(fields, selection_set) {
                        Some(type_name) => self.complete_object(fields, &type_name, selection_set),
                        None => true,
                    },
                    _ => true,
                };
                if !valid {
                    *item = Value::Null;
                }
            }
        }

        !matches!(value, Value::Null)
    }

    /// Concrete type of a union member, from `__typename` or else the first
    /// fragment whose response keys are all present
    fn entity_type(&self, fields: &IndexMap<Name, Value>, selection_set: &'a SelectionSet) -> Option<String> {
        if let Some(Value::String(typename)) = fields.get(TYPENAME) {
            return Some(typename.clone());
        }

        self.type_conditions(selection_set).into_iter().find_map(|type_name| {
            let keys: Vec<_> = self
                .collect_fields(type_name, selection_set)
                .into_iter()
                .filter(|field| field.name.node.as_str() != TYPENAME)
                .map(|field| field.response_key().node.clone())
                .collect();
            (!keys.is_empty() && keys.iter().all(|key| fields.contains_key(key))).then(|| type_name.to_string())
        })
    }

    fn type_conditions(&self, selection_set: &'a SelectionSet) -> Vec<&'a str> {
        let mut conditions = Vec::new();
        for selection in &selection_set.items {
            let condition = match &selection.node {
                Selection::Field(_) => None,
                Selection::InlineFragment(inline) => inline.node.type_condition.as_ref().map(|c| c.node.on.node.as_str()),
                Selection::FragmentSpread(spread) => self
                    .document
                    .fragments
                    .get(spread.node.fragment_name.node.as_str())
                    .map(|fragment| fragment.node.type_condition.node.on.node.as_str()),
            };
            if let Some(condition) = condition {
                if !conditions.contains(&condition) {
                    conditions.push(condition);
                }
            }
        }
        conditions
    }

    /// Fields selected on `type_name`, fragments expanded
    fn collect_fields(&self, type_name: &str, selection_set: &'a SelectionSet) -> Vec<&'a Field> {
        let mut fields = Vec::new();
        let mut visited = HashSet::new();
        self.collect_into(type_name, selection_set, &mut fields, &mut visited);
        fields
    }

    fn collect_into(
        &self,
        type_name: &str,
        selection_set: &'a SelectionSet,
        fields: &mut Vec<&'a Field>,
        visited: &mut HashSet<&'a str>,
    ) {
        for selection in &selection_set.items {
            match &selection.node {
                Selection::Field(field) => fields.push(&field.node),
                Selection::InlineFragment(inline) => {
                    let applies = inline
                        .node
                        .type_condition
                        .as_ref()
                        .map_or(true, |condition| condition.node.on.node.as_str() == type_name);
                    if applies {
                        self.collect_into(type_name, &inline.node.selection_set.node, fields, visited);
                    }
                }
                Selection::FragmentSpread(spread) => {
                    let name = spread.node.fragment_name.node.as_str();
                    let Some(fragment) = self.document.fragments.get(name) else {
                        continue;
                    };
                    if fragment.node.type_condition.node.on.node.as_str() == type_name && visited.insert(name) {
                        self.collect_into(type_name, &fragment.node.selection_set.node, fields, visited);
                    }
                }
            }
        }
    }
}
