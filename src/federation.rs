//! Apollo Federation reference protocol
//!
//! Two directions are covered here:
//!
//! - **Outbound**: a field whose target entity is owned by another subgraph
//!   yields a [`ReferenceStub`] carrying `__typename` and the key fields only.
//! - **Inbound**: `_entities` hands us [`Representation`]s; owned entities are
//!   looked up through a registered [`EntityResolver`], extended ones are
//!   rebuilt from the key alone.

use async_graphql::{Name, Value};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::registry::{EntityDecl, Ownership, SchemaRegistry};
use crate::store::{Author, Blog};

const TYPENAME: &str = "__typename";

/// Reference protocol errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReferenceError {
    #[error("Entity representation must be an object")]
    NotAnObject,

    #[error("Entity representation is missing `__typename`")]
    MissingTypename,

    #[error("`{0}` is not an entity of this subgraph")]
    UnknownEntity(String),

    #[error("Representation of `{typename}` is missing key field `{field}`")]
    MissingKey { typename: String, field: String },

    #[error("Reference to `{typename}` must carry exactly its key fields {expected:?}, got {provided:?}")]
    KeyMismatch {
        typename: String,
        expected: Vec<String>,
        provided: Vec<String>,
    },
}

/// Anything that can expose a field value by name
pub trait RecordFields {
    fn field_value(&self, field: &str) -> Option<Value>;
}

impl RecordFields for Author {
    fn field_value(&self, field: &str) -> Option<Value> {
        match field {
            "id" => Some(Value::String(self.id.clone())),
            "name" => Some(Value::String(self.name.clone())),
            "age" => Some(Value::Number(self.age.into())),
            "description" => Some(Value::String(self.description.clone())),
            _ => None,
        }
    }
}

impl RecordFields for Blog {
    fn field_value(&self, field: &str) -> Option<Value> {
        match field {
            "id" => Some(Value::String(self.id.clone())),
            "title" => Some(Value::String(self.title.clone())),
            "labels" => Some(Value::List(self.labels.iter().cloned().map(Value::String).collect())),
            "authorId" => Some(Value::String(self.author_id.clone())),
            _ => None,
        }
    }
}

/// Minimal `{ __typename, key... }` reference to an entity
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceStub {
    typename: String,
    keys: Vec<(String, Value)>,
}

impl ReferenceStub {
    /// Build a stub from explicit key values
    ///
    /// The provided fields must be exactly the declared key fields; they are
    /// stored in declaration order.
    pub fn from_keys(entity: &EntityDecl, provided: Vec<(String, Value)>) -> Result<Self, ReferenceError> {
        let mismatch = provided.len() != entity.key_fields().len()
            || entity
                .key_fields()
                .iter()
                .any(|key| !provided.iter().any(|(name, _)| name == key));
        if mismatch {
            return Err(ReferenceError::KeyMismatch {
                typename: entity.type_name().to_string(),
                expected: entity.key_fields().to_vec(),
                provided: provided.into_iter().map(|(name, _)| name).collect(),
            });
        }

        let mut provided = provided;
        let keys = entity
            .key_fields()
            .iter()
            .filter_map(|key| {
                let idx = provided.iter().position(|(name, _)| name == key)?;
                Some(provided.swap_remove(idx))
            })
            .collect();

        Ok(Self {
            typename: entity.type_name().to_string(),
            keys,
        })
    }

    /// Build a stub from a local record's key fields
    pub fn from_record<R: RecordFields + ?Sized>(entity: &EntityDecl, record: &R) -> Result<Self, ReferenceError> {
        let keys = entity
            .key_fields()
            .iter()
            .map(|key| {
                record
                    .field_value(key)
                    .map(|value| (key.clone(), value))
                    .ok_or_else(|| ReferenceError::MissingKey {
                        typename: entity.type_name().to_string(),
                        field: key.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            typename: entity.type_name().to_string(),
            keys,
        })
    }

    pub fn typename(&self) -> &str {
        &self.typename
    }

    pub fn key(&self, field: &str) -> Option<&Value> {
        self.keys.iter().find(|(name, _)| name == field).map(|(_, value)| value)
    }

    pub fn keys(&self) -> &[(String, Value)] {
        &self.keys
    }

    /// Wire shape handed to the gateway
    pub fn to_value(&self) -> Value {
        let mut fields = vec![(Name::new(TYPENAME), Value::String(self.typename.clone()))];
        fields.extend(self.keys.iter().map(|(name, value)| (Name::new(name), value.clone())));
        Value::Object(fields.into_iter().collect())
    }
}

impl RecordFields for ReferenceStub {
    fn field_value(&self, field: &str) -> Option<Value> {
        self.key(field).cloned()
    }
}

/// Entity representation received through `_entities`
#[derive(Debug, Clone, PartialEq)]
pub struct Representation {
    typename: String,
    keys: Vec<(String, Value)>,
}

impl Representation {
    /// Validate a raw `_Any` value against the registry
    ///
    /// Non-key fields (e.g. `@requires` payloads) are dropped.
    pub fn parse(value: &Value, registry: &SchemaRegistry) -> Result<Self, ReferenceError> {
        let Value::Object(fields) = value else {
            return Err(ReferenceError::NotAnObject);
        };

        let typename = match fields.get(TYPENAME) {
            Some(Value::String(typename)) => typename.clone(),
            _ => return Err(ReferenceError::MissingTypename),
        };
        let entity = registry
            .entity(&typename)
            .ok_or_else(|| ReferenceError::UnknownEntity(typename.clone()))?;

        let keys = entity
            .key_fields()
            .iter()
            .map(|key| match fields.get(key.as_str()) {
                Some(value) if !matches!(value, Value::Null) => Ok((key.clone(), value.clone())),
                _ => Err(ReferenceError::MissingKey {
                    typename: typename.clone(),
                    field: key.clone(),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { typename, keys })
    }

    pub fn typename(&self) -> &str {
        &self.typename
    }

    pub fn key(&self, field: &str) -> Option<&Value> {
        self.keys.iter().find(|(name, _)| name == field).map(|(_, value)| value)
    }

    pub fn key_str(&self, field: &str) -> Option<&str> {
        match self.key(field)? {
            Value::String(value) => Some(value),
            _ => None,
        }
    }

    /// Conjunctive exact match on every key field
    pub fn matches<R: RecordFields + ?Sized>(&self, record: &R) -> bool {
        self.keys
            .iter()
            .all(|(name, value)| record.field_value(name).as_ref() == Some(value))
    }

    pub fn into_stub(self) -> ReferenceStub {
        ReferenceStub {
            typename: self.typename,
            keys: self.keys,
        }
    }
}

/// Parent value flowing through field resolution
#[derive(Debug, Clone)]
pub enum Entity {
    Author(Arc<Author>),
    Blog(Arc<Blog>),
    /// Known only by key
    Reference(ReferenceStub),
}

impl Entity {
    pub fn typename(&self) -> &str {
        match self {
            Entity::Author(_) => "Author",
            Entity::Blog(_) => "Blog",
            Entity::Reference(stub) => stub.typename(),
        }
    }

    pub fn as_reference(&self) -> Option<&ReferenceStub> {
        match self {
            Entity::Reference(stub) => Some(stub),
            _ => None,
        }
    }
}

impl RecordFields for Entity {
    fn field_value(&self, field: &str) -> Option<Value> {
        match self {
            Entity::Author(author) => author.field_value(field),
            Entity::Blog(blog) => blog.field_value(field),
            Entity::Reference(stub) => stub.field_value(field),
        }
    }
}

/// Entity resolver trait for Apollo Federation
#[async_trait]
pub trait EntityResolver: Send + Sync {
    /// Resolve a full local entity from its representation, `None` when absent
    async fn resolve_reference(&self, representation: &Representation) -> Option<Entity>;
}

/// Reference resolvers by entity type name
#[derive(Clone, Default)]
pub struct EntityResolvers {
    resolvers: HashMap<String, Arc<dyn EntityResolver>>,
}

impl EntityResolvers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, typename: impl Into<String>, resolver: impl EntityResolver + 'static) -> Self {
        self.resolvers.insert(typename.into(), Arc::new(resolver));
        self
    }

    pub fn contains(&self, typename: &str) -> bool {
        self.resolvers.contains_key(typename)
    }

    /// Resolve one representation
    pub async fn resolve(&self, registry: &SchemaRegistry, representation: Representation) -> Option<Entity> {
        match registry.ownership(representation.typename())? {
            Ownership::Extended => Some(Entity::Reference(representation.into_stub())),
            Ownership::Owned => {
                let resolver = self.resolvers.get(representation.typename())?;
                resolver.resolve_reference(&representation).await
            }
        }
    }

    /// Resolve `_entities` representations position for position
    ///
    /// Every representation is validated before any is resolved, so a
    /// malformed entry fails the batch instead of shifting positions.
    pub async fn resolve_all(
        &self,
        registry: &SchemaRegistry,
        values: &[Value],
    ) -> Result<Vec<Option<Entity>>, ReferenceError> {
        let representations = values
            .iter()
            .map(|value| Representation::parse(value, registry))
            .collect::<Result<Vec<_>, _>>()?;

        let mut entities = Vec::with_capacity(representations.len());
        for representation in representations {
            entities.push(self.resolve(registry, representation).await);
        }
        Ok(entities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolvers::reference_resolvers;
    use crate::store::DataStore;
    use serde_json::json;

    const OWNED_SCHEMA: &str = include_str!("../schema.graphql");

    const EXTENDED_SCHEMA: &str = r#"
        type Query { blogs: [Blog!] }
        type Blog @key(fields: "id") {
          id: ID!
          title: String!
          author: Author
        }
        type Author @key(fields: "id") @extends {
          id: ID! @external
          blogs: [Blog!]!
        }
    "#;

    fn store() -> Arc<DataStore> {
        Arc::new(
            DataStore::from_json(
                r#"{
                    "authors": [{ "id": "101", "name": "Ada Lovelace", "age": 37, "description": "Engines." }],
                    "blogs": [{ "id": "1", "title": "The Poetry of Code", "labels": [], "authorId": "101" }]
                }"#,
            )
            .unwrap(),
        )
    }

    fn value(json: serde_json::Value) -> Value {
        Value::from_json(json).unwrap()
    }

    #[test]
    fn test_stub_carries_only_key_fields() {
        let registry = SchemaRegistry::from_sdl(EXTENDED_SCHEMA).unwrap();
        let author = registry.entity("Author").unwrap();

        let stub = ReferenceStub::from_keys(author, vec![("id".to_string(), Value::from("101"))]).unwrap();
        assert_eq!(
            stub.to_value().into_json().unwrap(),
            json!({ "__typename": "Author", "id": "101" })
        );

        let err = ReferenceStub::from_keys(
            author,
            vec![
                ("id".to_string(), Value::from("101")),
                ("name".to_string(), Value::from("Ada Lovelace")),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, ReferenceError::KeyMismatch { .. }));
    }

    #[test]
    fn test_stub_from_record() {
        let registry = SchemaRegistry::from_sdl(OWNED_SCHEMA).unwrap();
        let store = store();
        let author = store.author("101").unwrap();

        let stub = ReferenceStub::from_record(registry.entity("Author").unwrap(), author.as_ref()).unwrap();
        assert_eq!(stub.typename(), "Author");
        assert_eq!(stub.keys().len(), 1);
        assert_eq!(stub.key("id"), Some(&Value::from("101")));
        assert_eq!(stub.field_value("name"), None);
    }

    #[test]
    fn test_parse_representation() {
        let registry = SchemaRegistry::from_sdl(OWNED_SCHEMA).unwrap();

        let rep = Representation::parse(
            &value(json!({ "__typename": "Author", "id": "101", "name": "ignored" })),
            &registry,
        )
        .unwrap();
        assert_eq!(rep.typename(), "Author");
        assert_eq!(rep.key_str("id"), Some("101"));
        assert_eq!(rep.key("name"), None);

        assert_eq!(
            Representation::parse(&value(json!("101")), &registry),
            Err(ReferenceError::NotAnObject)
        );
        assert_eq!(
            Representation::parse(&value(json!({ "id": "101" })), &registry),
            Err(ReferenceError::MissingTypename)
        );
        assert_eq!(
            Representation::parse(&value(json!({ "__typename": "Comment", "id": "1" })), &registry),
            Err(ReferenceError::UnknownEntity("Comment".to_string()))
        );
        assert!(matches!(
            Representation::parse(&value(json!({ "__typename": "Blog" })), &registry),
            Err(ReferenceError::MissingKey { .. })
        ));
    }

    #[test]
    fn test_conjunctive_match() {
        let mut registry = SchemaRegistry::from_sdl(
            r#"
            type Query { author: Author }
            type Author { id: ID! name: String! age: Int! description: String! }
            "#,
        )
        .unwrap();
        registry.declare_entity("Author", &["id", "name"], Ownership::Owned).unwrap();

        let store = store();
        let author = store.author("101").unwrap();

        let exact = Representation::parse(
            &value(json!({ "__typename": "Author", "id": "101", "name": "Ada Lovelace" })),
            &registry,
        )
        .unwrap();
        assert!(exact.matches(author.as_ref()));

        let partial = Representation::parse(
            &value(json!({ "__typename": "Author", "id": "101", "name": "Ada" })),
            &registry,
        )
        .unwrap();
        assert!(!partial.matches(author.as_ref()));
    }

    #[tokio::test]
    async fn test_resolve_all_preserves_order() {
        let registry = SchemaRegistry::from_sdl(OWNED_SCHEMA).unwrap();
        let resolvers = reference_resolvers(store());

        let entities = resolvers
            .resolve_all(
                &registry,
                &[
                    value(json!({ "__typename": "Blog", "id": "1" })),
                    value(json!({ "__typename": "Author", "id": "999" })),
                    value(json!({ "__typename": "Author", "id": "101" })),
                ],
            )
            .await
            .unwrap();

        assert_eq!(entities.len(), 3);
        assert!(matches!(&entities[0], Some(Entity::Blog(blog)) if blog.id == "1"));
        assert!(entities[1].is_none());
        assert!(matches!(&entities[2], Some(Entity::Author(author)) if author.name == "Ada Lovelace"));
    }

    #[tokio::test]
    async fn test_resolve_all_rejects_malformed_batch() {
        let registry = SchemaRegistry::from_sdl(OWNED_SCHEMA).unwrap();
        let resolvers = reference_resolvers(store());

        let err = resolvers
            .resolve_all(
                &registry,
                &[
                    value(json!({ "__typename": "Author", "id": "101" })),
                    value(json!({ "__typename": "Author" })),
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ReferenceError::MissingKey { .. }));
    }

    #[tokio::test]
    async fn test_extended_entity_resolves_to_reference() {
        let registry = SchemaRegistry::from_sdl(EXTENDED_SCHEMA).unwrap();
        let resolvers = EntityResolvers::new();

        let entities = resolvers
            .resolve_all(&registry, &[value(json!({ "__typename": "Author", "id": "404" }))])
            .await
            .unwrap();

        let stub = entities[0].as_ref().and_then(Entity::as_reference).unwrap();
        assert_eq!(stub.typename(), "Author");
        assert_eq!(stub.key("id"), Some(&Value::from("404")));
    }
}
