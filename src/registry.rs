//! Schema registry for the federation-annotated subgraph SDL
//!
//! The registry is the single place that knows which object types exist,
//! which of them are federation entities, which fields form their keys and
//! whether this subgraph owns the entity or only extends it.

use async_graphql::parser::types::{
    BaseType, ConstDirective, FieldDefinition, Type, TypeDefinition, TypeKind, TypeSystemDefinition,
};
use async_graphql::parser::{parse_schema, Positioned};
use async_graphql::Value;
use std::collections::HashMap;
use std::path::Path;

use crate::{Result, SubgraphError};

const BUILTIN_SCALARS: [&str; 5] = ["ID", "String", "Int", "Float", "Boolean"];

/// Federation ownership posture of an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// This subgraph is the source of truth
    Owned,
    /// Owned elsewhere; this subgraph only knows the key and adds fields
    Extended,
}

/// Entity declaration: key fields plus ownership
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDecl {
    type_name: String,
    key_fields: Vec<String>,
    ownership: Ownership,
}

impl EntityDecl {
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn key_fields(&self) -> &[String] {
        &self.key_fields
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    pub fn is_key(&self, field: &str) -> bool {
        self.key_fields.iter().any(|key| key == field)
    }

    /// `@key(fields: "...")` selection string
    pub fn key_selection(&self) -> String {
        self.key_fields.join(" ")
    }
}

/// Field argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentDecl {
    pub name: String,
    pub ty: Type,
}

/// Object field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDecl {
    name: String,
    description: Option<String>,
    arguments: Vec<ArgumentDecl>,
    ty: Type,
    external: bool,
}

impl FieldDecl {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            description: None,
            arguments: Vec::new(),
            ty,
            external: false,
        }
    }

    pub fn argument(mut self, name: impl Into<String>, ty: Type) -> Self {
        self.arguments.push(ArgumentDecl { name: name.into(), ty });
        self
    }

    /// Mark the field as supplied by another subgraph
    pub fn external(mut self) -> Self {
        self.external = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn arguments(&self) -> &[ArgumentDecl] {
        &self.arguments
    }

    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn is_external(&self) -> bool {
        self.external
    }

    /// Innermost named type, e.g. `Blog` for `[Blog!]!`
    pub fn named_type(&self) -> &str {
        named_type(&self.ty)
    }

    fn from_definition(definition: &FieldDefinition) -> Self {
        Self {
            name: definition.name.node.to_string(),
            description: definition.description.as_ref().map(|d| d.node.clone()),
            arguments: definition
                .arguments
                .iter()
                .map(|arg| ArgumentDecl {
                    name: arg.node.name.node.to_string(),
                    ty: arg.node.ty.node.clone(),
                })
                .collect(),
            ty: definition.ty.node.clone(),
            external: has_directive(&definition.directives, "external"),
        }
    }
}

/// Object type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectDecl {
    name: String,
    description: Option<String>,
    fields: Vec<FieldDecl>,
}

impl ObjectDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldDecl) -> Self {
        self.fields.push(field);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn fields(&self) -> &[FieldDecl] {
        &self.fields
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldDecl> {
        self.fields.iter().find(|field| field.name == name)
    }
}

/// How a field's value is produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Resolved from local data
    Local,
    /// Target is an extended entity; only a reference stub is returned
    Reference(EntityDecl),
}

/// Registry of object types and entity declarations
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    query_type: String,
    objects: Vec<ObjectDecl>,
    scalars: Vec<String>,
    entities: HashMap<String, EntityDecl>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self {
            query_type: "Query".to_string(),
            objects: Vec::new(),
            scalars: Vec::new(),
            entities: HashMap::new(),
        }
    }
}

struct PendingEntity {
    type_name: String,
    selection: String,
    ownership: Ownership,
}

impl SchemaRegistry {
    /// Read and parse an SDL file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let sdl = std::fs::read_to_string(path).map_err(|source| SubgraphError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let registry = Self::from_sdl(&sdl)?;

        tracing::info!(
            path = %path.display(),
            types = registry.objects.len(),
            entities = registry.entities.len(),
            "Loaded subgraph schema"
        );

        Ok(registry)
    }

    /// Parse federation-annotated SDL
    pub fn from_sdl(sdl: &str) -> Result<Self> {
        let document = parse_schema(sdl).map_err(|e| SubgraphError::SchemaParse(e.to_string()))?;

        let mut registry = Self::default();
        let mut pending = Vec::new();

        for definition in &document.definitions {
            match definition {
                TypeSystemDefinition::Schema(schema) => {
                    if let Some(query) = &schema.node.query {
                        registry.query_type = query.node.to_string();
                    }
                }
                TypeSystemDefinition::Type(ty) => registry.add_type(&ty.node, &mut pending)?,
                // Federation directive definitions are implied
                TypeSystemDefinition::Directive(_) => {}
            }
        }

        // Keys are declared once every `extend type` block has been merged
        for entity in pending {
            let keys = parse_key_selection(&entity.type_name, &entity.selection)?;
            let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
            registry.declare_entity(&entity.type_name, &keys, entity.ownership)?;
        }

        registry.validate()?;
        Ok(registry)
    }

    fn add_type(&mut self, definition: &TypeDefinition, pending: &mut Vec<PendingEntity>) -> Result<()> {
        let name = definition.name.node.to_string();

        let object = match &definition.kind {
            TypeKind::Scalar => {
                if !self.scalars.contains(&name) {
                    self.scalars.push(name);
                }
                return Ok(());
            }
            TypeKind::Object(object) => object,
            _ => return Err(SubgraphError::UnsupportedDefinition(name)),
        };

        let extended = definition.extend || has_directive(&definition.directives, "extends");
        for directive in definition.directives.iter().filter(|d| d.node.name.node.as_str() == "key") {
            let selection = match directive.node.get_argument("fields").map(|v| &v.node) {
                Some(Value::String(selection)) => selection.clone(),
                _ => {
                    return Err(SubgraphError::UnsupportedKey {
                        type_name: name,
                        fields: String::new(),
                    })
                }
            };
            pending.push(PendingEntity {
                type_name: name.clone(),
                selection,
                ownership: if extended { Ownership::Extended } else { Ownership::Owned },
            });
        }

        let fields = object
            .fields
            .iter()
            .map(|field| FieldDecl::from_definition(&field.node));

        match self.objects.iter_mut().find(|existing| existing.name == name) {
            Some(existing) => existing.fields.extend(fields),
            None => {
                let mut decl = ObjectDecl::new(name);
                decl.description = definition.description.as_ref().map(|d| d.node.clone());
                decl.fields.extend(fields);
                self.objects.push(decl);
            }
        }

        Ok(())
    }

    /// Register an object type
    pub fn declare_object(&mut self, object: ObjectDecl) {
        self.objects.retain(|existing| existing.name != object.name);
        self.objects.push(object);
    }

    /// Register an object type as a federation entity
    ///
    /// Every key field must exist on the type. Key fields of an extended
    /// entity must be `@external`: the subgraph knows the key, never the
    /// canonical value behind it.
    pub fn declare_entity(&mut self, type_name: &str, key_fields: &[&str], ownership: Ownership) -> Result<()> {
        let object = self
            .object(type_name)
            .ok_or_else(|| SubgraphError::UnknownEntityType(type_name.to_string()))?;

        if key_fields.is_empty() {
            return Err(SubgraphError::EmptyKey(type_name.to_string()));
        }
        if self.entities.contains_key(type_name) {
            return Err(SubgraphError::DuplicateEntity(type_name.to_string()));
        }

        let mut keys: Vec<String> = Vec::with_capacity(key_fields.len());
        for &key in key_fields {
            let field = object.get_field(key).ok_or_else(|| SubgraphError::UnknownKeyField {
                type_name: type_name.to_string(),
                field: key.to_string(),
            })?;
            if keys.iter().any(|existing| existing == key) {
                return Err(SubgraphError::DuplicateKeyField {
                    type_name: type_name.to_string(),
                    field: key.to_string(),
                });
            }
            if ownership == Ownership::Extended && !field.is_external() {
                return Err(SubgraphError::LocallyResolvableKey {
                    type_name: type_name.to_string(),
                    field: key.to_string(),
                });
            }
            keys.push(key.to_string());
        }

        self.entities.insert(
            type_name.to_string(),
            EntityDecl {
                type_name: type_name.to_string(),
                key_fields: keys,
                ownership,
            },
        );
        Ok(())
    }

    /// Check cross-type consistency
    pub fn validate(&self) -> Result<()> {
        if self.object(&self.query_type).is_none() {
            return Err(SubgraphError::MissingQueryType(self.query_type.clone()));
        }

        for object in &self.objects {
            let entity = self.entity(&object.name);
            for field in &object.fields {
                let target = field.named_type();
                if !self.is_known_type(target) {
                    return Err(SubgraphError::UnknownType {
                        type_name: object.name.clone(),
                        field: field.name.clone(),
                        target: target.to_string(),
                    });
                }
                for argument in &field.arguments {
                    let target = named_type(&argument.ty);
                    if !self.is_scalar(target) {
                        return Err(SubgraphError::UnknownType {
                            type_name: object.name.clone(),
                            field: format!("{}({})", field.name, argument.name),
                            target: target.to_string(),
                        });
                    }
                }

                // @requires is not supported, so only extended keys can be external
                let external_key =
                    matches!(entity, Some(e) if e.ownership == Ownership::Extended && e.is_key(&field.name));
                if field.external && !external_key {
                    return Err(SubgraphError::UnexpectedExternal {
                        type_name: object.name.clone(),
                        field: field.name.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    pub fn query_type(&self) -> &str {
        &self.query_type
    }

    pub fn objects(&self) -> &[ObjectDecl] {
        &self.objects
    }

    pub fn scalars(&self) -> &[String] {
        &self.scalars
    }

    pub fn object(&self, name: &str) -> Option<&ObjectDecl> {
        self.objects.iter().find(|object| object.name == name)
    }

    pub fn entity(&self, type_name: &str) -> Option<&EntityDecl> {
        self.entities.get(type_name)
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityDecl> {
        self.entities.values()
    }

    pub fn ownership(&self, type_name: &str) -> Option<Ownership> {
        self.entity(type_name).map(|entity| entity.ownership)
    }

    /// Whether a field is resolved locally or delegated through a reference stub
    pub fn resolution(&self, field: &FieldDecl) -> Resolution {
        match self.entity(field.named_type()) {
            Some(entity) if entity.ownership == Ownership::Extended => Resolution::Reference(entity.clone()),
            _ => Resolution::Local,
        }
    }

    pub fn is_scalar(&self, name: &str) -> bool {
        BUILTIN_SCALARS.contains(&name) || self.scalars.iter().any(|scalar| scalar == name)
    }

    fn is_known_type(&self, name: &str) -> bool {
        self.is_scalar(name) || self.object(name).is_some()
    }
}

/// Innermost named type of a (possibly wrapped) type
pub fn named_type(ty: &Type) -> &str {
    match &ty.base {
        BaseType::Named(name) => name.as_str(),
        BaseType::List(inner) => named_type(inner),
    }
}

fn has_directive(directives: &[Positioned<ConstDirective>], name: &str) -> bool {
    directives.iter().any(|directive| directive.node.name.node.as_str() == name)
}

fn parse_key_selection(type_name: &str, selection: &str) -> Result<Vec<String>> {
    if selection.contains(['{', '}', '(', ')', '@', '.']) {
        return Err(SubgraphError::UnsupportedKey {
            type_name: type_name.to_string(),
            fields: selection.to_string(),
        });
    }
    Ok(selection.split_whitespace().map(str::to_string).collect())
}
