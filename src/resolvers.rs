//! Field resolver dispatch table and the blog subgraph resolvers

use async_graphql::dynamic::FieldValue;
use async_graphql::{Error, Result, Value};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::federation::{Entity, EntityResolver, EntityResolvers, RecordFields, ReferenceStub, Representation};
use crate::registry::Resolution;
use crate::store::{Blog, DataStore};

/// Field arguments after variable substitution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments(HashMap<String, Value>);

impl Arguments {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// `ID` argument; integer input is coerced to its decimal string
    pub fn id(&self, name: &str) -> Result<String> {
        match self.get(name) {
            Some(Value::String(value)) => Ok(value.clone()),
            Some(Value::Number(value)) if value.is_i64() || value.is_u64() => Ok(value.to_string()),
            Some(other) => Err(Error::new(format!("Argument \"{name}\" is not a valid ID: {other}"))),
            None => Err(Error::new(format!("Argument \"{name}\" is required"))),
        }
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Arguments {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(name, value)| (name.into(), value)).collect())
    }
}

/// Everything a resolver may look at for one field
pub struct FieldInput<'a> {
    pub type_name: &'a str,
    pub field_name: &'a str,
    /// `None` on the query root
    pub parent: Option<&'a Entity>,
    pub args: &'a Arguments,
    pub store: &'a DataStore,
    pub resolution: &'a Resolution,
}

impl<'a> FieldInput<'a> {
    pub fn parent(&self) -> Result<&'a Entity> {
        self.parent
            .ok_or_else(|| Error::new(format!("Field \"{}.{}\" has no parent value", self.type_name, self.field_name)))
    }

    /// Wrap a local record, or reduce it to a reference stub when the target
    /// entity is owned elsewhere
    pub fn local_entity<R: RecordFields + ?Sized>(&self, record: &R, entity: impl FnOnce() -> Entity) -> Result<Resolved> {
        match self.resolution {
            Resolution::Reference(target) => {
                let stub = ReferenceStub::from_record(target, record)?;
                Ok(Resolved::Entity(Entity::Reference(stub)))
            }
            Resolution::Local => Ok(Resolved::Entity(entity())),
        }
    }

    /// Resolve a to-one relation from key values
    ///
    /// Extended targets never hit the store: the key is all we hand back.
    pub fn keyed_entity(&self, key: Vec<(String, Value)>, lookup: impl FnOnce() -> Option<Entity>) -> Result<Resolved> {
        match self.resolution {
            Resolution::Reference(target) => {
                let stub = ReferenceStub::from_keys(target, key)?;
                Ok(Resolved::Entity(Entity::Reference(stub)))
            }
            Resolution::Local => Ok(lookup().map_or(Resolved::Null, Resolved::Entity)),
        }
    }

    fn unresolvable(&self, parent: &Entity) -> Error {
        match parent {
            Entity::Reference(stub) => Error::new(format!(
                "Field \"{}.{}\" cannot be resolved from a reference to {}",
                self.type_name,
                self.field_name,
                stub.typename()
            )),
            _ => Error::new(format!(
                "Field \"{}.{}\" is not available on {}",
                self.type_name,
                self.field_name,
                parent.typename()
            )),
        }
    }
}

/// Resolver output, converted into async-graphql values by the executor
#[derive(Debug, Clone)]
pub enum Resolved {
    Null,
    Value(Value),
    Entity(Entity),
    List(Vec<Resolved>),
}

impl Resolved {
    pub fn into_field_value<'a>(self) -> Option<FieldValue<'a>> {
        match self {
            Resolved::Null => None,
            Resolved::Value(value) => Some(FieldValue::value(value)),
            Resolved::Entity(entity) => Some(FieldValue::owned_any(entity)),
            Resolved::List(items) => Some(FieldValue::list(
                items
                    .into_iter()
                    .map(|item| item.into_field_value().unwrap_or_else(|| FieldValue::value(Value::Null))),
            )),
        }
    }
}

pub type FieldResolver = Arc<dyn Fn(&FieldInput<'_>) -> Result<Resolved> + Send + Sync>;

/// Dispatch table keyed by `(type name, field name)`
#[derive(Clone, Default)]
pub struct ResolverMap {
    resolvers: HashMap<(String, String), FieldResolver>,
    /// Fields that can only be answered from a full local record
    record_fields: HashSet<(String, String)>,
}

impl ResolverMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(mut self, type_name: impl Into<String>, field: impl Into<String>, resolver: F) -> Self
    where
        F: Fn(&FieldInput<'_>) -> Result<Resolved> + Send + Sync + 'static,
    {
        let key = (type_name.into(), field.into());
        self.record_fields.remove(&key);
        self.resolvers.insert(key, Arc::new(resolver));
        self
    }

    /// Register [`project`] for a field that only a full record carries
    pub fn projection(mut self, type_name: impl Into<String>, field: impl Into<String>) -> Self {
        let key = (type_name.into(), field.into());
        self.resolvers.insert(key.clone(), Arc::new(project));
        self.record_fields.insert(key);
        self
    }

    pub fn needs_record(&self, type_name: &str, field: &str) -> bool {
        self.record_fields
            .contains(&(type_name.to_string(), field.to_string()))
    }

    pub fn get(&self, type_name: &str, field: &str) -> Option<&FieldResolver> {
        self.resolvers.get(&(type_name.to_string(), field.to_string()))
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.resolvers
            .keys()
            .map(|(type_name, field)| (type_name.as_str(), field.as_str()))
    }
}

/// Scalar projection from the parent entity
pub fn project(input: &FieldInput<'_>) -> Result<Resolved> {
    let parent = input.parent()?;
    parent
        .field_value(input.field_name)
        .map(Resolved::Value)
        .ok_or_else(|| input.unresolvable(parent))
}

fn parent_blog<'a>(input: &FieldInput<'a>) -> Result<&'a Arc<Blog>> {
    match input.parent()? {
        Entity::Blog(blog) => Ok(blog),
        other => Err(input.unresolvable(other)),
    }
}

/// Author id from either a full record or a reference stub
fn author_id(input: &FieldInput<'_>) -> Result<String> {
    let parent = input.parent()?;
    match parent.field_value("id") {
        Some(Value::String(id)) => Ok(id),
        _ => Err(input.unresolvable(parent)),
    }
}

fn id_key(id: &str) -> Vec<(String, Value)> {
    vec![("id".to_string(), Value::String(id.to_string()))]
}

fn query_blogs(input: &FieldInput<'_>) -> Result<Resolved> {
    input
        .store
        .blogs()
        .iter()
        .map(|blog| input.local_entity(blog.as_ref(), || Entity::Blog(blog.clone())))
        .collect::<Result<Vec<_>>>()
        .map(Resolved::List)
}

fn query_blog(input: &FieldInput<'_>) -> Result<Resolved> {
    let id = input.args.id("id")?;
    input.keyed_entity(id_key(&id), || input.store.blog(&id).cloned().map(Entity::Blog))
}

fn query_authors(input: &FieldInput<'_>) -> Result<Resolved> {
    input
        .store
        .authors()
        .iter()
        .map(|author| input.local_entity(author.as_ref(), || Entity::Author(author.clone())))
        .collect::<Result<Vec<_>>>()
        .map(Resolved::List)
}

fn query_author(input: &FieldInput<'_>) -> Result<Resolved> {
    let id = input.args.id("id")?;
    input.keyed_entity(id_key(&id), || input.store.author(&id).cloned().map(Entity::Author))
}

fn blog_author(input: &FieldInput<'_>) -> Result<Resolved> {
    let blog = parent_blog(input)?;
    // Dangling authorId resolves to null
    input.keyed_entity(id_key(&blog.author_id), || {
        input.store.author(&blog.author_id).cloned().map(Entity::Author)
    })
}

fn author_blogs(input: &FieldInput<'_>) -> Result<Resolved> {
    let id = author_id(input)?;
    input
        .store
        .blogs_by_author(&id)
        .map(|blog| input.local_entity(blog.as_ref(), || Entity::Blog(blog.clone())))
        .collect::<Result<Vec<_>>>()
        .map(Resolved::List)
}

/// Resolvers for every field the blog subgraph can declare
///
/// Non-key projections are only answerable while their type is owned here;
/// under the extended posture the schema must leave them out.
pub fn blog_subgraph_resolvers() -> ResolverMap {
    ResolverMap::new()
        .register("Query", "blogs", query_blogs)
        .register("Query", "blog", query_blog)
        .register("Query", "authors", query_authors)
        .register("Query", "author", query_author)
        .register("Blog", "id", project)
        .projection("Blog", "title")
        .projection("Blog", "labels")
        .register("Blog", "author", blog_author)
        .register("Author", "id", project)
        .projection("Author", "name")
        .projection("Author", "age")
        .projection("Author", "description")
        .register("Author", "blogs", author_blogs)
}

/// Inbound reference resolution for owned authors
pub struct AuthorReferences {
    store: Arc<DataStore>,
}

impl AuthorReferences {
    pub fn new(store: Arc<DataStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EntityResolver for AuthorReferences {
    async fn resolve_reference(&self, representation: &Representation) -> Option<Entity> {
        let author = self.store.author(representation.key_str("id")?)?;
        representation
            .matches(author.as_ref())
            .then(|| Entity::Author(author.clone()))
    }
}

/// Inbound reference resolution for owned blogs
pub struct BlogReferences {
    store: Arc<DataStore>,
}

impl BlogReferences {
    pub fn new(store: Arc<DataStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EntityResolver for BlogReferences {
    async fn resolve_reference(&self, representation: &Representation) -> Option<Entity> {
        let blog = self.store.blog(representation.key_str("id")?)?;
        representation.matches(blog.as_ref()).then(|| Entity::Blog(blog.clone()))
    }
}

pub fn reference_resolvers(store: Arc<DataStore>) -> EntityResolvers {
    EntityResolvers::new()
        .register("Author", AuthorReferences::new(store.clone()))
        .register("Blog", BlogReferences::new(store))
}
