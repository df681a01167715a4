//! Shared runtime wiring for CLI commands.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use nexus_agent::bus::EventBus;
use nexus_agent::config::Config;
use nexus_agent::log_component;
use nexus_agent::orchestrator::Orchestrator;
use nexus_agent::plugins::{Plugin, PluginRegistry};
use nexus_agent::profile::MarkdownProfileStore;
use nexus_agent::providers::ProviderRouter;

/// Factory key of the built-in orchestrator plugin.
pub(crate) const ORCHESTRATOR_FACTORY: &str = "orchestrator";

/// A wired process: bus, registry and the orchestrator plugin.
pub(crate) struct Runtime {
    pub config: Config,
    pub bus: Arc<EventBus>,
    pub registry: PluginRegistry,
    pub orchestrator: Arc<Orchestrator>,
}

/// Load config from `path`.
pub(crate) fn load_config(path: &Path) -> Result<Config> {
    Config::load_from_path(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

/// Build the bus, register the orchestrator and discover plugins in `plugin_dir`.
pub(crate) async fn build_runtime(config: Config, plugin_dir: &Path) -> Result<Runtime> {
    let bus = Arc::new(EventBus::with_history_size(config.bus.history_size));

    let router = ProviderRouter::from_config(&config.providers)
        .context("Invalid provider configuration")?;
    if router.is_empty() {
        eprintln!("Warning: No completion provider configured. Set NEXUS_PROVIDERS_OPENAI_API_KEY");
        eprintln!("or add a providers.ollama section to {:?}", Config::path());
        eprintln!();
    }

    let profiles = Arc::new(MarkdownProfileStore::new(config.data_path()));
    let mut orchestrator = Orchestrator::new(
        Arc::clone(&bus),
        Arc::new(router),
        profiles,
        config.agent.clone(),
    );
    if let Some(catalog) = &config.catalog {
        orchestrator = orchestrator.with_catalog(catalog.clone());
    }
    let orchestrator = Arc::new(orchestrator);

    let registry = PluginRegistry::new(Arc::clone(&bus));
    let instance = Arc::clone(&orchestrator);
    registry.add_factory(ORCHESTRATOR_FACTORY, move |_ctx| {
        Ok(Arc::clone(&instance) as Arc<dyn Plugin>)
    });
    registry
        .register_from(ORCHESTRATOR_FACTORY, Default::default())
        .await
        .context("Failed to register the orchestrator")?;

    registry
        .discover(plugin_dir, &config.plugins.config)
        .await
        .with_context(|| format!("Failed to scan plugin directory {}", plugin_dir.display()))?;

    let published = registry.capabilities();
    log_component!(info, "cli", "runtime.ready", plugins = registry.len(), capabilities = published.len());
    orchestrator.extend_catalog(published);

    Ok(Runtime {
        config,
        bus,
        registry,
        orchestrator,
    })
}
