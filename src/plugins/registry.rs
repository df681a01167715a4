//! Plugin registry for NexusAgent
//!
//! Owns every live plugin instance, wires its bindings into the bus and drives
//! the load/unload lifecycle. Mutating operations are serialized; bindings are
//! applied to the bus in a single batch so a concurrent emit never sees a
//! half-registered plugin.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::bus::{Binding, EventBus, Payload, SubscriptionId};
use crate::error::{NexusError, Result};

use super::manifest::{scan_manifests, PluginManifest};
use super::types::{Capability, Plugin, PluginContext, PluginFactory, PluginSummary};

/// Metadata of a registered plugin.
#[derive(Clone)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub instance: Arc<dyn Plugin>,
    /// Manifest path, or a free-form label for programmatic registrations.
    pub source_locator: String,
    pub enabled: bool,
    pub load_order: u64,
    /// Config the instance was created with.
    pub config: Payload,
}

impl PluginInfo {
    fn summary(&self) -> PluginSummary {
        PluginSummary {
            name: self.name.clone(),
            version: self.version.clone(),
            description: self.description.clone(),
            enabled: self.enabled,
            load_order: self.load_order,
        }
    }
}

struct Entry {
    info: PluginInfo,
    factory: Arc<dyn PluginFactory>,
    subscriptions: Vec<SubscriptionId>,
}

#[derive(Default)]
struct Table {
    entries: HashMap<String, Entry>,
    load_counter: u64,
}

/// Central plugin registry.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use nexus_agent::bus::EventBus;
/// use nexus_agent::plugins::{Plugin, PluginRegistry};
///
/// struct Hello;
///
/// #[async_trait::async_trait]
/// impl Plugin for Hello {
///     fn name(&self) -> &str {
///         "hello"
///     }
/// }
///
/// # tokio_test::block_on(async {
/// let registry = PluginRegistry::new(Arc::new(EventBus::new()));
/// registry.add_factory("hello", |_ctx| Ok(Arc::new(Hello) as Arc<dyn Plugin>));
/// registry.register_from("hello", Default::default()).await.unwrap();
///
/// assert!(registry.get("hello").is_some());
/// registry.shutdown().await;
/// assert!(registry.get("hello").is_none());
/// # });
/// ```
pub struct PluginRegistry {
    bus: Arc<EventBus>,
    factories: RwLock<HashMap<String, Arc<dyn PluginFactory>>>,
    table: RwLock<Table>,
    ops: Mutex<()>,
}

impl PluginRegistry {
    /// Create an empty registry bound to `bus`.
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            factories: RwLock::new(HashMap::new()),
            table: RwLock::new(Table::default()),
            ops: Mutex::new(()),
        }
    }

    /// The bus plugins are wired into.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    // ========================================================================
    // Factories
    // ========================================================================

    /// Make a factory available to manifests under `key`. Replaces any previous one.
    pub fn add_factory<F>(&self, key: impl Into<String>, factory: F)
    where
        F: Fn(PluginContext) -> Result<Arc<dyn Plugin>> + Send + Sync + 'static,
    {
        self.factories
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.into(), Arc::new(factory));
    }

    fn factory(&self, key: &str) -> Result<Arc<dyn PluginFactory>> {
        self.factories
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
            .ok_or_else(|| NexusError::Plugin(format!("unknown plugin factory '{}'", key)))
    }

    /// Names of all known factories, sorted.
    pub fn factory_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .factories
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Instantiate a plugin, bind its handlers, run `on_load` and record it.
    ///
    /// A duplicate name is logged and ignored. If `on_load` fails, the
    /// bindings are removed again and the error is returned.
    pub async fn register(
        &self,
        factory: Arc<dyn PluginFactory>,
        config: Payload,
        source_locator: impl Into<String>,
    ) -> Result<()> {
        let _guard = self.ops.lock().await;
        self.register_locked(factory, config, source_locator.into())
            .await
    }

    /// [`PluginRegistry::register`] using a factory from the table.
    pub async fn register_from(&self, factory_key: &str, config: Payload) -> Result<()> {
        let factory = self.factory(factory_key)?;
        self.register(factory, config, format!("factory:{}", factory_key))
            .await
    }

    async fn register_locked(
        &self,
        factory: Arc<dyn PluginFactory>,
        config: Payload,
        source_locator: String,
    ) -> Result<()> {
        let instance = factory.create(PluginContext {
            bus: Arc::clone(&self.bus),
            config: config.clone(),
        })?;
        let name = instance.name().to_string();

        if self.contains(&name) {
            warn!(name = %name, "plugin.duplicate");
            return Ok(());
        }

        let bindings: Vec<Binding> = Arc::clone(&instance)
            .bindings()
            .into_iter()
            .map(|b| {
                debug!(plugin = %name, topic = %b.topic, priority = b.priority, "plugin.hook_registered");
                (b.topic, b.priority, b.handler)
            })
            .collect();
        let subscriptions = self.bus.subscribe_all(bindings);

        if let Err(e) = instance.on_load().await {
            self.bus.unsubscribe_all(&subscriptions);
            error!(name = %name, error = %e, "plugin.load_failed");
            return Err(e);
        }

        let mut table = self.write_table();
        table.load_counter += 1;
        let info = PluginInfo {
            name: name.clone(),
            version: instance.version().to_string(),
            description: instance.description().to_string(),
            instance,
            source_locator,
            enabled: true,
            load_order: table.load_counter,
            config,
        };
        info!(name = %info.name, version = %info.version, "plugin.registered");
        table.entries.insert(
            name,
            Entry {
                info,
                factory,
                subscriptions,
            },
        );
        Ok(())
    }

    /// Unbind, run `on_unload` and forget a plugin. Returns false if unknown.
    pub async fn unregister(&self, name: &str) -> bool {
        let _guard = self.ops.lock().await;
        self.unregister_locked(name).await.is_some()
    }

    async fn unregister_locked(&self, name: &str) -> Option<Entry> {
        let entry = self.write_table().entries.remove(name)?;
        self.bus.unsubscribe_all(&entry.subscriptions);

        if let Err(e) = entry.info.instance.on_unload().await {
            warn!(name = %name, error = %e, "plugin.unload_error");
        }
        info!(name = %name, "plugin.unregistered");
        Some(entry)
    }

    /// Recreate a plugin from its source with the config it was running with.
    ///
    /// Manifest-backed plugins re-read their manifest to pick up a changed
    /// factory key; others reuse the factory they were registered with.
    /// Unknown names are a no-op.
    pub async fn reload(&self, name: &str) -> Result<()> {
        let _guard = self.ops.lock().await;
        let Some(old) = self.unregister_locked(name).await else {
            return Ok(());
        };

        let locator = old.info.source_locator.clone();
        let manifest_path = Path::new(&locator);
        let factory = if manifest_path.is_file() {
            let manifest = PluginManifest::load(manifest_path)?;
            self.factory(&manifest.factory)?
        } else {
            old.factory
        };

        self.register_locked(factory, old.info.config, locator).await?;
        info!(name = %name, "plugin.reloaded");
        Ok(())
    }

    /// Load every manifest under `dir`.
    ///
    /// Individual failures are logged and skipped. Declared dependencies that
    /// are not registered afterwards produce a warning; load order is scan
    /// order. A missing directory is created and left empty.
    pub async fn discover(&self, dir: &Path, config: &Payload) -> Result<()> {
        let _guard = self.ops.lock().await;

        if !dir.exists() {
            warn!(path = %dir.display(), "plugin.dir_not_found");
            std::fs::create_dir_all(dir)?;
            return Ok(());
        }

        for path in scan_manifests(dir)? {
            if let Err(e) = self.load_manifest(&path, config).await {
                error!(file = %path.display(), error = %e, "plugin.load_error");
            }
        }

        self.check_dependencies();

        info!(
            total = self.len(),
            plugins = ?self.names(),
            "plugin.discovery_complete"
        );
        Ok(())
    }

    async fn load_manifest(&self, path: &Path, config: &Payload) -> Result<()> {
        let manifest = PluginManifest::load(path)?;
        if !manifest.enabled {
            info!(file = %path.display(), "plugin.disabled");
            return Ok(());
        }
        let factory = self.factory(&manifest.factory)?;
        let merged = manifest.merged_config(config);
        self.register_locked(factory, merged, path.display().to_string())
            .await
    }

    fn check_dependencies(&self) {
        let table = self.read_table();
        for entry in table.entries.values() {
            for dep in entry.info.instance.dependencies() {
                if !table.entries.contains_key(&dep) {
                    warn!(plugin = %entry.info.name, dependency = %dep, "plugin.missing_dependency");
                }
            }
        }
    }

    /// Unregister everything, most recently loaded first.
    pub async fn shutdown(&self) {
        let _guard = self.ops.lock().await;
        let mut order: Vec<(u64, String)> = self
            .read_table()
            .entries
            .values()
            .map(|e| (e.info.load_order, e.info.name.clone()))
            .collect();
        order.sort_by(|a, b| b.0.cmp(&a.0));

        for (_, name) in order {
            self.unregister_locked(&name).await;
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Live instance of a plugin.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.read_table()
            .entries
            .get(name)
            .map(|e| Arc::clone(&e.info.instance))
    }

    /// Full metadata of a plugin.
    pub fn info(&self, name: &str) -> Option<PluginInfo> {
        self.read_table().entries.get(name).map(|e| e.info.clone())
    }

    /// Whether a plugin with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.read_table().entries.contains_key(name)
    }

    /// Summaries of every plugin, in load order.
    pub fn list_plugins(&self) -> Vec<PluginSummary> {
        let mut list: Vec<PluginSummary> = self
            .read_table()
            .entries
            .values()
            .map(|e| e.info.summary())
            .collect();
        list.sort_by_key(|s| s.load_order);
        list
    }

    /// Plugin names in load order.
    pub fn names(&self) -> Vec<String> {
        self.list_plugins().into_iter().map(|s| s.name).collect()
    }

    /// Catalogue entries published by every plugin, in load order.
    pub fn capabilities(&self) -> Vec<Capability> {
        let table = self.read_table();
        let mut entries: Vec<&Entry> = table.entries.values().collect();
        entries.sort_by_key(|e| e.info.load_order);
        entries
            .into_iter()
            .flat_map(|e| e.info.instance.capabilities())
            .collect()
    }

    /// Number of registered plugins.
    pub fn len(&self) -> usize {
        self.read_table().entries.len()
    }

    /// Whether no plugin is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_table(&self) -> std::sync::RwLockReadGuard<'_, Table> {
        self.table
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_table(&self) -> std::sync::RwLockWriteGuard<'_, Table> {
        self.table
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Event;
    use crate::plugins::HandlerBinding;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    /// Test plugin whose identity and behaviour come from its config.
    struct Probe {
        name: String,
        tag: String,
        deps: Vec<String>,
        fail_load: bool,
        log: Arc<StdMutex<Vec<String>>>,
    }

    impl Probe {
        async fn on_ping(&self, _event: Event) -> Result<Option<Value>> {
            Ok(Some(json!(self.tag)))
        }
    }

    #[async_trait]
    impl Plugin for Probe {
        fn name(&self) -> &str {
            &self.name
        }

        fn version(&self) -> &str {
            "1.2.3"
        }

        fn dependencies(&self) -> Vec<String> {
            self.deps.clone()
        }

        fn bindings(self: Arc<Self>) -> Vec<HandlerBinding> {
            vec![
                HandlerBinding::method(&self, "probe.ping", 0, |p, e| async move {
                    p.on_ping(e).await
                }),
                HandlerBinding::method(&self, "probe.*", 1, |p, e| async move {
                    p.on_ping(e).await
                }),
            ]
        }

        fn capabilities(&self) -> Vec<Capability> {
            vec![Capability::new("probe.ping", "Ping", json!({}))]
        }

        async fn on_load(&self) -> Result<()> {
            self.log.lock().unwrap().push(format!("load:{}", self.name));
            if self.fail_load {
                return Err(NexusError::Plugin("refusing to load".into()));
            }
            Ok(())
        }

        async fn on_unload(&self) -> Result<()> {
            self.log.lock().unwrap().push(format!("unload:{}", self.name));
            Ok(())
        }
    }

    fn setup() -> (PluginRegistry, Arc<StdMutex<Vec<String>>>, Arc<AtomicUsize>) {
        let registry = PluginRegistry::new(Arc::new(EventBus::new()));
        let log = Arc::new(StdMutex::new(Vec::new()));
        let created = Arc::new(AtomicUsize::new(0));
        let factory_log = Arc::clone(&log);
        let counter = Arc::clone(&created);
        registry.add_factory("probe", move |ctx: PluginContext| {
            counter.fetch_add(1, Ordering::SeqCst);
            let get = |k: &str| ctx.config.get(k).and_then(Value::as_str).map(String::from);
            let plugin = Probe {
                name: get("name").unwrap_or_else(|| "probe".into()),
                tag: get("tag").unwrap_or_else(|| "v1".into()),
                deps: ctx
                    .config
                    .get("deps")
                    .and_then(Value::as_array)
                    .map(|a| a.iter().filter_map(|d| d.as_str().map(String::from)).collect())
                    .unwrap_or_default(),
                fail_load: ctx.config.get("fail").and_then(Value::as_bool).unwrap_or(false),
                log: Arc::clone(&factory_log),
            };
            Ok(Arc::new(plugin) as Arc<dyn Plugin>)
        });
        (registry, log, created)
    }

    fn cfg(value: Value) -> Payload {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_register_binds_and_records() {
        let (registry, log, _) = setup();
        registry
            .register_from("probe", cfg(json!({"name": "alpha"})))
            .await
            .unwrap();

        let info = registry.info("alpha").unwrap();
        assert_eq!(info.version, "1.2.3");
        assert_eq!(info.load_order, 1);
        assert!(info.enabled);
        assert_eq!(info.source_locator, "factory:probe");
        assert_eq!(registry.bus().subscriber_count("probe.ping"), 1);
        assert_eq!(registry.bus().subscriber_count("probe.*"), 1);
        assert_eq!(*log.lock().unwrap(), vec!["load:alpha"]);
    }

    #[tokio::test]
    async fn test_duplicate_name_keeps_first() {
        let (registry, _, _) = setup();
        registry
            .register_from("probe", cfg(json!({"name": "dup", "tag": "first"})))
            .await
            .unwrap();
        registry
            .register_from("probe", cfg(json!({"name": "dup", "tag": "second"})))
            .await
            .unwrap();

        assert_eq!(registry.len(), 1);
        let results = registry.bus().emit("probe.ping").await;
        assert_eq!(results, vec![Some(json!("first")), Some(json!("first"))]);
    }

    #[tokio::test]
    async fn test_unregister_removes_every_binding() {
        let (registry, log, _) = setup();
        registry
            .register_from("probe", cfg(json!({"name": "alpha"})))
            .await
            .unwrap();

        assert!(registry.unregister("alpha").await);
        assert!(registry.bus().registered_topics().is_empty());
        assert!(registry.bus().emit("probe.ping").await.is_empty());
        assert!(registry.get("alpha").is_none());
        assert_eq!(*log.lock().unwrap(), vec!["load:alpha", "unload:alpha"]);

        assert!(!registry.unregister("alpha").await);
    }

    #[tokio::test]
    async fn test_failed_on_load_rolls_back() {
        let (registry, _, _) = setup();
        let err = registry
            .register_from("probe", cfg(json!({"name": "broken", "fail": true})))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("refusing to load"));
        assert!(registry.is_empty());
        assert!(registry.bus().registered_topics().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_factory() {
        let (registry, _, _) = setup();
        let err = registry
            .register_from("nope", Payload::new())
            .await
            .unwrap_err();
        assert!(matches!(err, NexusError::Plugin(_)));
    }

    #[tokio::test]
    async fn test_shutdown_in_reverse_load_order() {
        let (registry, log, _) = setup();
        for name in ["a", "b", "c"] {
            registry
                .register_from("probe", cfg(json!({ "name": name })))
                .await
                .unwrap();
        }
        registry.shutdown().await;

        let log = log.lock().unwrap();
        assert_eq!(&log[3..], &["unload:c", "unload:b", "unload:a"]);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_reload_recreates_with_captured_config() {
        let (registry, _, created) = setup();
        registry
            .register_from("probe", cfg(json!({"name": "hot", "tag": "same"})))
            .await
            .unwrap();
        registry.reload("hot").await.unwrap();

        assert_eq!(created.load(Ordering::SeqCst), 2);
        let info = registry.info("hot").unwrap();
        assert_eq!(info.load_order, 2);
        assert_eq!(info.config["tag"], json!("same"));
        assert_eq!(registry.bus().subscriber_count("probe.ping"), 1);

        // unknown name is a no-op
        registry.reload("ghost").await.unwrap();
    }

    #[tokio::test]
    async fn test_discover_isolates_failures() {
        let (registry, _, _) = setup();
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(
            root.join("a.json"),
            r#"{"factory": "probe", "config": {"name": "from_a"}}"#,
        )
        .unwrap();
        std::fs::write(root.join("b.json"), "{ not json").unwrap();
        std::fs::write(root.join("c.toml"), "factory = \"unknown\"").unwrap();
        std::fs::create_dir(root.join("pkg")).unwrap();
        std::fs::write(
            root.join("pkg").join("plugin.toml"),
            "factory = \"probe\"\n[config]\nname = \"from_pkg\"\ndeps = [\"from_a\", \"absent\"]\n",
        )
        .unwrap();

        registry
            .discover(root, &cfg(json!({"tag": "shared"})))
            .await
            .unwrap();

        assert_eq!(registry.names(), vec!["from_a", "from_pkg"]);
        let info = registry.info("from_pkg").unwrap();
        assert_eq!(info.config["tag"], json!("shared"));
        assert!(info.source_locator.ends_with("plugin.toml"));
        assert_eq!(registry.capabilities().len(), 2);
    }

    #[tokio::test]
    async fn test_discover_creates_missing_dir() {
        let (registry, _, _) = setup();
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("plugins");
        registry.discover(&missing, &Payload::new()).await.unwrap();
        assert!(missing.is_dir());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_reload_rereads_manifest() {
        let (registry, _, _) = setup();
        registry.add_factory("probe_v2", |_ctx: PluginContext| {
            Ok(Arc::new(Probe {
                name: "m".into(),
                tag: "v2".into(),
                deps: vec![],
                fail_load: false,
                log: Arc::new(StdMutex::new(vec![])),
            }) as Arc<dyn Plugin>)
        });
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.json");
        std::fs::write(&path, r#"{"factory": "probe", "config": {"name": "m"}}"#).unwrap();
        registry.discover(dir.path(), &Payload::new()).await.unwrap();
        assert_eq!(
            registry.bus().emit("probe.ping").await,
            vec![Some(json!("v1")), Some(json!("v1"))]
        );

        std::fs::write(&path, r#"{"factory": "probe_v2"}"#).unwrap();
        registry.reload("m").await.unwrap();
        assert_eq!(
            registry.bus().emit("probe.ping").await,
            vec![Some(json!("v2")), Some(json!("v2"))]
        );
    }
}
