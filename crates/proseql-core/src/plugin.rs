//! Plugin registry: aggregates custom filter
//! operators, codecs, id generators, and global hooks contributed by
//! plugins, validating that names don't collide across the set.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use proseql_storage::{Codec, CodecRegistry};

use crate::error::{Error, Result};
use crate::reactive::ChangeEvent;

pub type CustomOperatorFn = Arc<dyn Fn(Option<&Value>, &Value) -> bool + Send + Sync>;
pub type IdGeneratorFn = Arc<dyn Fn() -> String + Send + Sync>;
pub type GlobalHookFn = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// One plugin's contribution, registered in one call.
#[derive(Clone, Default)]
pub struct Plugin {
    pub name: String,
    pub operators: HashMap<String, CustomOperatorFn>,
    pub codecs: Vec<Arc<dyn Codec>>,
    pub id_generators: HashMap<String, IdGeneratorFn>,
    pub global_hooks: Vec<GlobalHookFn>,
}

impl Plugin {
    pub fn named(name: impl Into<String>) -> Self {
        Plugin { name: name.into(), ..Default::default() }
    }
}

/// Aggregates every registered plugin's contributions. Custom codecs are
/// registered directly into the database's [`CodecRegistry`]; operators,
/// id generators, and global hooks are held here and looked up by name.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<String>,
    operators: HashMap<String, CustomOperatorFn>,
    id_generators: HashMap<String, IdGeneratorFn>,
    global_hooks: Vec<GlobalHookFn>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin, merging its contributions. Fails if any
    /// operator or id-generator name collides with one already
    /// registered.
    pub fn register(&mut self, plugin: Plugin, codecs: &mut CodecRegistry) -> Result<()> {
        for name in plugin.operators.keys() {
            if self.operators.contains_key(name) {
                return Err(Error::Plugin(format!("operator '{name}' already registered by another plugin")));
            }
        }
        for name in plugin.id_generators.keys() {
            if self.id_generators.contains_key(name) {
                return Err(Error::Plugin(format!("id generator '{name}' already registered by another plugin")));
            }
        }

        for codec in &plugin.codecs {
            codecs.register(codec.clone());
        }
        self.operators.extend(plugin.operators.clone());
        self.id_generators.extend(plugin.id_generators.clone());
        self.global_hooks.extend(plugin.global_hooks.clone());
        self.plugins.push(plugin.name);
        Ok(())
    }

    pub fn operator(&self, name: &str) -> Option<CustomOperatorFn> {
        self.operators.get(name).cloned()
    }

    pub fn id_generator(&self, name: &str) -> Option<IdGeneratorFn> {
        self.id_generators.get(name).cloned()
    }

    /// Fan an event out to every registered global hook.
    pub fn notify(&self, event: &ChangeEvent) {
        for hook in &self.global_hooks {
            hook(event);
        }
    }

    pub fn registered_plugin_names(&self) -> &[String] {
        &self.plugins
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_operators_and_id_generators() {
        let mut registry = PluginRegistry::new();
        let mut codecs = CodecRegistry::with_builtins();
        let mut plugin = Plugin::named("geo");
        plugin.operators.insert("$near".to_string(), Arc::new(|_value, _operand| true));
        plugin.id_generators.insert("short-id".to_string(), Arc::new(|| "abc123".to_string()));
        registry.register(plugin, &mut codecs).unwrap();

        assert!(registry.operator("$near").is_some());
        assert_eq!(registry.id_generator("short-id").unwrap()(), "abc123");
        assert_eq!(registry.registered_plugin_names(), &["geo".to_string()]);
    }

    #[test]
    fn duplicate_operator_name_is_a_plugin_error() {
        let mut registry = PluginRegistry::new();
        let mut codecs = CodecRegistry::with_builtins();
        let mut first = Plugin::named("a");
        first.operators.insert("$near".to_string(), Arc::new(|_, _| true));
        registry.register(first, &mut codecs).unwrap();

        let mut second = Plugin::named("b");
        second.operators.insert("$near".to_string(), Arc::new(|_, _| false));
        let err = registry.register(second, &mut codecs).unwrap_err();
        assert!(matches!(err, Error::Plugin(_)));
    }
}
