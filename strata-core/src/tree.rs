//! Tree - Hierarchical namespace of scopes and resources
//!
//! Scopes and resources live in arenas and are addressed by opaque handles.
//! Every entry stores only its parent's handle, which is enough to compute
//! the fully qualified path (`root/scope/.../logical_id`). Paths are the
//! stable identity of a resource: they key the state record and seed
//! physical names, so they only depend on the declared names.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::resource::{Resource, is_valid_logical_id};
use crate::schema::{SchemaRegistry, TypeError};
use crate::value::Value;

/// Path separator in fully qualified resource paths
pub const PATH_SEPARATOR: &str = "/";

/// Handle to a scope in a [`ConstructTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(usize);

/// Handle to a resource node in a [`ConstructTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

/// Errors raised while declaring constructs
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeclarationError {
    #[error("Invalid logical ID '{0}': use ASCII letters, digits, '-' or '_'")]
    InvalidLogicalId(String),

    #[error("Duplicate logical ID '{logical_id}' in scope '{scope}'")]
    DuplicateLogicalId { scope: String, logical_id: String },

    #[error("Resource '{path}' is missing required attribute '{attribute}'")]
    MissingRequiredAttribute { path: String, attribute: String },

    #[error("Resource '{path}' has an invalid attribute: {error}")]
    InvalidAttribute { path: String, error: TypeError },

    #[error("Resource '{path}' of type '{resource_type}' has no attribute '{attribute}'")]
    UnknownOutput {
        path: String,
        resource_type: String,
        attribute: String,
    },

    #[error("{block} settings must be literal values, found a reference in '{attribute}'")]
    DeferredSetting { block: String, attribute: String },

    #[error("Unknown scope handle")]
    UnknownScope,

    #[error("Unknown or removed resource handle")]
    UnknownNode,
}

#[derive(Debug, Clone)]
struct ScopeEntry {
    name: String,
    parent: Option<ScopeId>,
    children: Vec<ScopeId>,
    nodes: Vec<NodeId>,
}

#[derive(Debug, Clone)]
struct NodeEntry {
    scope: ScopeId,
    resource: Resource,
}

/// Backend block recorded on the tree and copied into the document
#[derive(Debug, Clone, PartialEq)]
pub struct BackendSettings {
    pub backend_type: String,
    pub attributes: BTreeMap<String, Value>,
}

/// Rooted tree of scopes holding resource nodes
#[derive(Debug, Clone)]
pub struct ConstructTree {
    scopes: Vec<ScopeEntry>,
    /// Removed nodes leave a hole so handles are never reused
    nodes: Vec<Option<NodeEntry>>,
    schemas: SchemaRegistry,
    providers: BTreeMap<String, BTreeMap<String, Value>>,
    backend: Option<BackendSettings>,
}

impl ConstructTree {
    /// Create a tree whose root scope is named `root_name`
    pub fn new(root_name: impl Into<String>) -> Self {
        Self {
            scopes: vec![ScopeEntry {
                name: root_name.into(),
                parent: None,
                children: Vec::new(),
                nodes: Vec::new(),
            }],
            nodes: Vec::new(),
            schemas: SchemaRegistry::new(),
            providers: BTreeMap::new(),
            backend: None,
        }
    }

    pub fn with_schemas(mut self, schemas: SchemaRegistry) -> Self {
        self.schemas = schemas;
        self
    }

    pub fn root(&self) -> ScopeId {
        ScopeId(0)
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    /// Add a child scope under `parent`
    pub fn add_scope(
        &mut self,
        parent: ScopeId,
        name: impl Into<String>,
    ) -> Result<ScopeId, DeclarationError> {
        let name = name.into();
        self.check_name_available(parent, &name)?;

        let id = ScopeId(self.scopes.len());
        self.scopes.push(ScopeEntry {
            name,
            parent: Some(parent),
            children: Vec::new(),
            nodes: Vec::new(),
        });
        self.scopes[parent.0].children.push(id);
        Ok(id)
    }

    /// Add a resource node to `scope`
    ///
    /// The logical ID must be unique in the scope and, when a schema is
    /// registered for the resource type, every required attribute must be
    /// present and literal values must match their declared types.
    pub fn add_node(
        &mut self,
        scope: ScopeId,
        resource: Resource,
    ) -> Result<NodeId, DeclarationError> {
        self.check_name_available(scope, &resource.logical_id)?;

        if let Some(schema) = self.schemas.get(&resource.resource_type)
            && let Err(errors) = schema.validate(&resource.attributes)
        {
            let path = self.child_path(scope, &resource.logical_id);
            // Report the first error; attributes are checked in name order
            return Err(match errors.into_iter().next() {
                Some(TypeError::MissingRequired { name }) => {
                    DeclarationError::MissingRequiredAttribute {
                        path,
                        attribute: name,
                    }
                }
                Some(error) => DeclarationError::InvalidAttribute { path, error },
                None => DeclarationError::InvalidAttribute {
                    path,
                    error: TypeError::ValidationFailed {
                        message: "schema validation failed".to_string(),
                    },
                },
            });
        }

        let id = NodeId(self.nodes.len());
        log::debug!(
            "Declared {} '{}'",
            resource.resource_type,
            self.child_path(scope, &resource.logical_id)
        );
        self.nodes.push(Some(NodeEntry { scope, resource }));
        self.scopes[scope.0].nodes.push(id);
        Ok(id)
    }

    /// Declare a resource in `scope`
    pub fn declare<I, K>(
        &mut self,
        scope: ScopeId,
        logical_id: impl Into<String>,
        resource_type: impl Into<String>,
        attributes: I,
    ) -> Result<NodeId, DeclarationError>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let resource = Resource::new(resource_type, logical_id).with_attributes(attributes);
        self.add_node(scope, resource)
    }

    /// Remove a node before synthesis. Its handle stays invalid afterwards.
    pub fn remove_node(&mut self, node: NodeId) -> Result<Resource, DeclarationError> {
        let entry = self
            .nodes
            .get_mut(node.0)
            .and_then(Option::take)
            .ok_or(DeclarationError::UnknownNode)?;
        self.scopes[entry.scope.0].nodes.retain(|n| *n != node);
        Ok(entry.resource)
    }

    pub fn resource(&self, node: NodeId) -> Option<&Resource> {
        self.entry(node).map(|entry| &entry.resource)
    }

    /// Fully qualified path of a node
    pub fn path(&self, node: NodeId) -> Option<String> {
        let entry = self.entry(node)?;
        Some(self.child_path(entry.scope, &entry.resource.logical_id))
    }

    /// Fully qualified path of a scope
    pub fn scope_path(&self, scope: ScopeId) -> String {
        let mut names = Vec::new();
        let mut current = Some(scope);
        while let Some(id) = current {
            let entry = &self.scopes[id.0];
            names.push(entry.name.as_str());
            current = entry.parent;
        }
        names.reverse();
        names.join(PATH_SEPARATOR)
    }

    /// Deferred reference to an attribute of `node`
    ///
    /// When a schema is registered for the node's type, the attribute must be
    /// one of its inputs or outputs.
    pub fn output_ref(&self, node: NodeId, attribute: &str) -> Result<Value, DeclarationError> {
        let entry = self.entry(node).ok_or(DeclarationError::UnknownNode)?;
        let path = self.child_path(entry.scope, &entry.resource.logical_id);

        if let Some(schema) = self.schemas.get(&entry.resource.resource_type)
            && !schema.is_referenceable(attribute)
        {
            return Err(DeclarationError::UnknownOutput {
                path,
                resource_type: entry.resource.resource_type.clone(),
                attribute: attribute.to_string(),
            });
        }

        Ok(Value::reference(path, attribute))
    }

    /// Find a live node by its fully qualified path
    pub fn find(&self, path: &str) -> Option<NodeId> {
        self.nodes().find_map(|(id, _)| {
            (self.path(id).as_deref() == Some(path)).then_some(id)
        })
    }

    /// Live nodes in declaration order
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Resource)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, entry)| entry.as_ref().map(|e| (NodeId(i), &e.resource)))
    }

    /// Number of live nodes
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|e| e.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register provider settings (region, default tags, ...)
    pub fn add_provider<I, K>(&mut self, name: impl Into<String>, settings: I) -> Result<(), DeclarationError>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let name = name.into();
        let settings = literal_settings(&format!("provider '{}'", name), settings)?;
        self.providers.insert(name, settings);
        Ok(())
    }

    /// Set the remote state backend block
    pub fn set_backend<I, K>(
        &mut self,
        backend_type: impl Into<String>,
        settings: I,
    ) -> Result<(), DeclarationError>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let backend_type = backend_type.into();
        let attributes = literal_settings(&format!("backend '{}'", backend_type), settings)?;
        self.backend = Some(BackendSettings {
            backend_type,
            attributes,
        });
        Ok(())
    }

    pub fn providers(&self) -> &BTreeMap<String, BTreeMap<String, Value>> {
        &self.providers
    }

    pub fn backend(&self) -> Option<&BackendSettings> {
        self.backend.as_ref()
    }

    fn entry(&self, node: NodeId) -> Option<&NodeEntry> {
        self.nodes.get(node.0).and_then(Option::as_ref)
    }

    fn child_path(&self, scope: ScopeId, name: &str) -> String {
        format!("{}{}{}", self.scope_path(scope), PATH_SEPARATOR, name)
    }

    fn check_name_available(&self, scope: ScopeId, name: &str) -> Result<(), DeclarationError> {
        let entry = self.scopes.get(scope.0).ok_or(DeclarationError::UnknownScope)?;

        if !is_valid_logical_id(name) {
            return Err(DeclarationError::InvalidLogicalId(name.to_string()));
        }

        // Scopes and resources share one namespace per scope
        let taken = entry
            .children
            .iter()
            .any(|child| self.scopes[child.0].name == name)
            || entry
                .nodes
                .iter()
                .filter_map(|node| self.entry(*node))
                .any(|node| node.resource.logical_id == name);

        if taken {
            return Err(DeclarationError::DuplicateLogicalId {
                scope: self.scope_path(scope),
                logical_id: name.to_string(),
            });
        }
        Ok(())
    }
}

fn literal_settings<I, K>(
    block: &str,
    settings: I,
) -> Result<BTreeMap<String, Value>, DeclarationError>
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    let mut map = BTreeMap::new();
    for (key, value) in settings {
        let key = key.into();
        if value.is_deferred() {
            return Err(DeclarationError::DeferredSetting {
                block: block.to_string(),
                attribute: key,
            });
        }
        map.insert(key, value);
    }
    Ok(map)
}
