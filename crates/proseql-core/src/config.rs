//! Collection and database configuration: the immutable,
//! builder-assembled description of a collection's schema, relationships,
//! constraints, indexes, computed fields, hooks, and persistence settings.
//!
//! Builders follow this workspace's `ParallelConfig`/`AivcsConfig`
//! convention: a plain struct of fields with sane `Default`s, assembled
//! through `with_*` calls ending in `build()`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::ValidationIssue;
use crate::plugin::PluginRegistry;
use crate::value::Record;

/// The validator collaborator: produces a validated record or a
/// list of field issues. Implementations plug in externally; ProseQL ships
/// a permissive [`NoopValidator`] for collections declared without a
/// schema.
pub trait Validator: Send + Sync {
    fn validate(&self, record: &Record) -> Result<Record, Vec<ValidationIssue>>;
}

/// Accepts every record unchanged. The default when a collection declares
/// no schema.
pub struct NoopValidator;

impl Validator for NoopValidator {
    fn validate(&self, record: &Record) -> Result<Record, Vec<ValidationIssue>> {
        Ok(record.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipKind {
    Ref,
    Inverse,
}

/// One declared edge: `ref` carries the foreign key on this
/// collection; `inverse` carries it on the target collection.
#[derive(Debug, Clone)]
pub struct RelationshipConfig {
    pub kind: RelationshipKind,
    pub target: String,
    pub foreign_key: String,
}

impl RelationshipConfig {
    pub fn reference(target: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        RelationshipConfig {
            kind: RelationshipKind::Ref,
            target: target.into(),
            foreign_key: foreign_key.into(),
        }
    }

    pub fn inverse(target: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        RelationshipConfig {
            kind: RelationshipKind::Inverse,
            target: target.into(),
            foreign_key: foreign_key.into(),
        }
    }
}

/// One unique constraint: a single field, or a composite tuple of fields.
#[derive(Debug, Clone)]
pub struct UniqueConstraint {
    pub name: String,
    pub fields: Vec<String>,
}

impl UniqueConstraint {
    pub fn single(field: impl Into<String>) -> Self {
        let field = field.into();
        UniqueConstraint {
            name: field.clone(),
            fields: vec![field],
        }
    }

    pub fn composite(name: impl Into<String>, fields: Vec<String>) -> Self {
        UniqueConstraint {
            name: name.into(),
            fields,
        }
    }
}

pub type ComputedFn = Arc<dyn Fn(&Record) -> Value + Send + Sync>;
pub type BeforeHook = Arc<dyn Fn(&mut Record) -> Result<(), String> + Send + Sync>;
pub type AfterHook = Arc<dyn Fn(&Record) + Send + Sync>;
pub type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Lifecycle hooks: `before*` may mutate the draft and fail the
/// mutation; `after*` are fire-and-forget observers.
#[derive(Clone, Default)]
pub struct Hooks {
    pub before_create: Option<BeforeHook>,
    pub after_create: Option<AfterHook>,
    pub before_update: Option<BeforeHook>,
    pub after_update: Option<AfterHook>,
    pub before_delete: Option<BeforeHook>,
    pub after_delete: Option<AfterHook>,
}

/// One forward migration step: `from` and `to` versions plus
/// a pure per-record transform.
#[derive(Clone)]
pub struct MigrationStep {
    pub from: u32,
    pub to: u32,
    pub transform: Arc<dyn Fn(Record) -> Record + Send + Sync>,
}

pub fn default_id_generator() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Immutable per-collection configuration.
#[derive(Clone)]
pub struct CollectionConfig {
    pub name: String,
    pub schema: Option<Arc<dyn Validator>>,
    pub relationships: HashMap<String, RelationshipConfig>,
    pub unique_fields: Vec<UniqueConstraint>,
    pub indexes: Vec<String>,
    pub search_index: Vec<String>,
    pub computed: HashMap<String, ComputedFn>,
    pub hooks: Hooks,
    pub file: Option<PathBuf>,
    pub append_only: bool,
    /// Whether the schema declares a `deletedAt` field, enabling
    /// `delete(id, soft: true)` to set a timestamp instead of removing
    /// the row.
    pub soft_delete: bool,
    pub version: Option<u32>,
    pub migrations: Vec<MigrationStep>,
    pub id_generator: Option<IdGenerator>,
    /// Name of a plugin-registered generator to resolve against the
    /// database's `PluginRegistry` at id-assignment time, checked before
    /// `id_generator`.
    pub id_generator_name: Option<String>,
}

impl CollectionConfig {
    pub fn builder(name: impl Into<String>) -> CollectionConfigBuilder {
        CollectionConfigBuilder::new(name)
    }

    pub fn foreign_key_for(&self, edge: &str) -> Option<&str> {
        self.relationships.get(edge).map(|rel| rel.foreign_key.as_str())
    }

    pub fn generate_id(&self, plugins: Option<&PluginRegistry>) -> String {
        if let Some(name) = &self.id_generator_name {
            if let Some(generator) = plugins.and_then(|registry| registry.id_generator(name)) {
                return generator();
            }
        }
        match &self.id_generator {
            Some(generator) => generator(),
            None => default_id_generator(),
        }
    }
}

pub struct CollectionConfigBuilder {
    name: String,
    schema: Option<Arc<dyn Validator>>,
    relationships: HashMap<String, RelationshipConfig>,
    unique_fields: Vec<UniqueConstraint>,
    indexes: Vec<String>,
    search_index: Vec<String>,
    computed: HashMap<String, ComputedFn>,
    hooks: Hooks,
    file: Option<PathBuf>,
    append_only: bool,
    soft_delete: bool,
    version: Option<u32>,
    migrations: Vec<MigrationStep>,
    id_generator: Option<IdGenerator>,
    id_generator_name: Option<String>,
}

impl CollectionConfigBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        CollectionConfigBuilder {
            name: name.into(),
            schema: None,
            relationships: HashMap::new(),
            unique_fields: Vec::new(),
            indexes: Vec::new(),
            search_index: Vec::new(),
            computed: HashMap::new(),
            hooks: Hooks::default(),
            file: None,
            append_only: false,
            soft_delete: false,
            version: None,
            migrations: Vec::new(),
            id_generator: None,
            id_generator_name: None,
        }
    }

    pub fn schema(mut self, validator: impl Validator + 'static) -> Self {
        self.schema = Some(Arc::new(validator));
        self
    }

    pub fn relationship(mut self, edge: impl Into<String>, config: RelationshipConfig) -> Self {
        self.relationships.insert(edge.into(), config);
        self
    }

    pub fn unique(mut self, constraint: UniqueConstraint) -> Self {
        self.unique_fields.push(constraint);
        self
    }

    pub fn index(mut self, path: impl Into<String>) -> Self {
        self.indexes.push(path.into());
        self
    }

    pub fn search_index(mut self, path: impl Into<String>) -> Self {
        self.search_index.push(path.into());
        self
    }

    pub fn computed(mut self, name: impl Into<String>, derive: ComputedFn) -> Self {
        self.computed.insert(name.into(), derive);
        self
    }

    pub fn before_create(mut self, hook: BeforeHook) -> Self {
        self.hooks.before_create = Some(hook);
        self
    }

    pub fn after_create(mut self, hook: AfterHook) -> Self {
        self.hooks.after_create = Some(hook);
        self
    }

    pub fn before_update(mut self, hook: BeforeHook) -> Self {
        self.hooks.before_update = Some(hook);
        self
    }

    pub fn after_update(mut self, hook: AfterHook) -> Self {
        self.hooks.after_update = Some(hook);
        self
    }

    pub fn before_delete(mut self, hook: BeforeHook) -> Self {
        self.hooks.before_delete = Some(hook);
        self
    }

    pub fn after_delete(mut self, hook: AfterHook) -> Self {
        self.hooks.after_delete = Some(hook);
        self
    }

    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    pub fn append_only(mut self, value: bool) -> Self {
        self.append_only = value;
        self
    }

    pub fn soft_delete(mut self, value: bool) -> Self {
        self.soft_delete = value;
        self
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    pub fn migration(mut self, step: MigrationStep) -> Self {
        self.migrations.push(step);
        self
    }

    pub fn id_generator(mut self, generator: IdGenerator) -> Self {
        self.id_generator = Some(generator);
        self
    }

    /// Resolve id generation against a plugin-registered generator named
    /// `name`, falling back to `id_generator`/the default uuid generator
    /// if no plugin with that name is registered on the database.
    pub fn named_id_generator(mut self, name: impl Into<String>) -> Self {
        self.id_generator_name = Some(name.into());
        self
    }

    pub fn build(self) -> CollectionConfig {
        CollectionConfig {
            name: self.name,
            schema: self.schema,
            relationships: self.relationships,
            unique_fields: self.unique_fields,
            indexes: self.indexes,
            search_index: self.search_index,
            computed: self.computed,
            hooks: self.hooks,
            file: self.file,
            append_only: self.append_only,
            soft_delete: self.soft_delete,
            version: self.version,
            migrations: self.migrations,
            id_generator: self.id_generator,
            id_generator_name: self.id_generator_name,
        }
    }
}

/// Database-wide configuration: the registered collections and the
/// persistence debounce window shared by every file-backed collection.
#[derive(Clone)]
pub struct DatabaseConfig {
    pub collections: HashMap<String, CollectionConfig>,
    pub persistence_debounce: Duration,
    /// Ceiling on the number of candidate rows a single `update_many` may
    /// touch before it's rejected with an `Operation` error.
    pub batch_limit: usize,
    /// Default pagination limit applied when a query specifies none.
    pub default_page_limit: usize,
}

impl DatabaseConfig {
    pub fn builder() -> DatabaseConfigBuilder {
        DatabaseConfigBuilder::new()
    }
}

pub struct DatabaseConfigBuilder {
    collections: HashMap<String, CollectionConfig>,
    persistence_debounce: Duration,
    batch_limit: usize,
    default_page_limit: usize,
}

impl DatabaseConfigBuilder {
    pub fn new() -> Self {
        DatabaseConfigBuilder {
            collections: HashMap::new(),
            persistence_debounce: Duration::from_millis(200),
            batch_limit: 10_000,
            default_page_limit: 100,
        }
    }

    pub fn collection(mut self, config: CollectionConfig) -> Self {
        self.collections.insert(config.name.clone(), config);
        self
    }

    pub fn persistence_debounce(mut self, debounce: Duration) -> Self {
        self.persistence_debounce = debounce;
        self
    }

    pub fn batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit;
        self
    }

    pub fn default_page_limit(mut self, limit: usize) -> Self {
        self.default_page_limit = limit;
        self
    }

    pub fn build(self) -> DatabaseConfig {
        DatabaseConfig {
            collections: self.collections,
            persistence_debounce: self.persistence_debounce,
            batch_limit: self.batch_limit,
            default_page_limit: self.default_page_limit,
        }
    }
}

impl Default for DatabaseConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_assembles_relationships_and_uniques() {
        let config = CollectionConfig::builder("users")
            .relationship("company", RelationshipConfig::reference("companies", "companyId"))
            .unique(UniqueConstraint::single("email"))
            .index("email")
            .search_index("bio")
            .build();

        assert_eq!(config.name, "users");
        assert_eq!(config.foreign_key_for("company"), Some("companyId"));
        assert_eq!(config.unique_fields.len(), 1);
        assert_eq!(config.indexes, vec!["email".to_string()]);
        assert_eq!(config.search_index, vec!["bio".to_string()]);
    }

    #[test]
    fn generate_id_falls_back_to_default_generator() {
        let config = CollectionConfig::builder("users").build();
        let id = config.generate_id(None);
        assert_eq!(id.len(), 36);
    }

    #[test]
    fn custom_id_generator_overrides_default() {
        let config = CollectionConfig::builder("users")
            .id_generator(Arc::new(|| "fixed-id".to_string()))
            .build();
        assert_eq!(config.generate_id(None), "fixed-id");
    }

    #[test]
    fn named_id_generator_resolves_against_plugin_registry() {
        use crate::plugin::Plugin;
        use proseql_storage::CodecRegistry;

        let config = CollectionConfig::builder("users").named_id_generator("short-id").build();

        let mut registry = PluginRegistry::new();
        let mut codecs = CodecRegistry::with_builtins();
        let mut plugin = Plugin::named("geo");
        plugin.id_generators.insert("short-id".to_string(), Arc::new(|| "abc123".to_string()));
        registry.register(plugin, &mut codecs).unwrap();

        assert_eq!(config.generate_id(Some(&registry)), "abc123");
    }

    #[test]
    fn named_id_generator_falls_back_when_plugin_not_registered() {
        let config = CollectionConfig::builder("users")
            .named_id_generator("short-id")
            .id_generator(Arc::new(|| "fixed-id".to_string()))
            .build();
        assert_eq!(config.generate_id(Some(&PluginRegistry::new())), "fixed-id");
    }
}
