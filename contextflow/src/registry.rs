//! Registry of context plugins.
//!
//! Plugins are registered once at startup under a `(name, platform,
//! hidden)` key and are read-only for the rest of the process.

use crate::errors::ContextError;
use crate::plugin::order::reserved_range;
use crate::plugin::{ContextKey, ContextPlugin, ContextSpec};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Platform whose plugins are visible to every other platform.
pub const DEFAULT_PLATFORM: &str = "default";

/// Registry mapping plugin keys to plugin implementations.
#[derive(Default)]
pub struct ContextRegistry {
    plugins: RwLock<HashMap<ContextKey, Arc<dyn ContextPlugin>>>,
}

impl ContextRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a plugin.
    ///
    /// # Errors
    ///
    /// Returns `DuplicatePlugin` if the key is already taken.
    pub fn register(&self, plugin: Arc<dyn ContextPlugin>) -> Result<(), ContextError> {
        let spec = plugin.spec();
        let key = spec.key();

        let mut plugins = self.plugins.write();
        if plugins.contains_key(&key) {
            return Err(ContextError::duplicate(&key.name, &key.platform, key.hidden));
        }

        debug!(
            plugin = %key.name,
            platform = %key.platform,
            order = spec.order,
            range = reserved_range(spec.order).unwrap_or("unreserved"),
            hidden = key.hidden,
            "Registered context plugin"
        );
        plugins.insert(key, plugin);
        Ok(())
    }

    /// Resolves a plugin by name for a platform.
    ///
    /// Visible plugins are preferred; hidden ones are only considered when
    /// `allow_hidden` is set. Plugins of [`DEFAULT_PLATFORM`] are found
    /// from any platform.
    ///
    /// # Errors
    ///
    /// Returns `PluginNotFound` if nothing matches.
    pub fn resolve(
        &self,
        name: &str,
        platform: &str,
        allow_hidden: bool,
    ) -> Result<Arc<dyn ContextPlugin>, ContextError> {
        let plugins = self.plugins.read();
        let visibility: &[bool] = if allow_hidden { &[false, true] } else { &[false] };

        let mut platforms = vec![platform];
        if platform != DEFAULT_PLATFORM {
            platforms.push(DEFAULT_PLATFORM);
        }

        platforms
            .into_iter()
            .flat_map(|p| visibility.iter().map(move |&hidden| (p, hidden)))
            .find_map(|(p, hidden)| {
                plugins
                    .get(&ContextKey {
                        name: name.to_string(),
                        platform: p.to_string(),
                        hidden,
                    })
                    .cloned()
            })
            .ok_or_else(|| ContextError::not_found(name, platform))
    }

    /// Returns true if `resolve` would succeed.
    #[must_use]
    pub fn contains(&self, name: &str, platform: &str, allow_hidden: bool) -> bool {
        self.resolve(name, platform, allow_hidden).is_ok()
    }

    /// Lists the specs resolvable from a platform, sorted by `(order, name)`.
    ///
    /// [`DEFAULT_PLATFORM`] plugins are included unless the platform
    /// registers its own plugin under the same name and visibility. `None`
    /// lists everything.
    #[must_use]
    pub fn list(&self, platform: Option<&str>) -> Vec<ContextSpec> {
        let plugins = self.plugins.read();
        let shadowed = |spec: &ContextSpec, platform: &str| {
            plugins.contains_key(&ContextKey {
                name: spec.name.clone(),
                platform: platform.to_string(),
                hidden: spec.hidden,
            })
        };

        let mut specs: Vec<ContextSpec> = plugins
            .values()
            .map(|plugin| plugin.spec())
            .filter(|spec| match platform {
                None => true,
                Some(p) if spec.platform == p => true,
                Some(p) => spec.platform == DEFAULT_PLATFORM && !shadowed(spec, p),
            })
            .cloned()
            .collect();
        specs.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        specs
    }

    /// Returns the number of registered plugins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.read().len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.read().is_empty()
    }
}

impl std::fmt::Debug for ContextRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextRegistry")
            .field("plugin_count", &self.len())
            .finish()
    }
}

static GLOBAL_REGISTRY: RwLock<Option<Arc<ContextRegistry>>> = RwLock::new(None);

/// Gets the process-wide context registry, creating it on first use.
pub fn get_context_registry() -> Arc<ContextRegistry> {
    if let Some(registry) = GLOBAL_REGISTRY.read().as_ref() {
        return Arc::clone(registry);
    }

    let mut write = GLOBAL_REGISTRY.write();
    Arc::clone(write.get_or_insert_with(|| Arc::new(ContextRegistry::new())))
}

/// Registers a plugin in the process-wide registry.
pub fn register_context(plugin: Arc<dyn ContextPlugin>) -> Result<(), ContextError> {
    get_context_registry().register(plugin)
}
