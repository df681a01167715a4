//! Plugins command handler.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};

use super::common::{build_runtime, load_config};

/// Discover plugins and print the registry and the bus topics.
///
/// With `reload`, the named plugin is recreated from its factory first;
/// this requires `plugins.hot_reload`.
pub(crate) async fn cmd_plugins(config_path: &Path, dir: Option<PathBuf>, reload: Option<String>) -> Result<()> {
    let config = load_config(config_path)?;
    if reload.is_some() && !config.plugins.hot_reload {
        bail!("Plugin reload is disabled (plugins.hot_reload = false)");
    }
    let plugin_dir = dir.unwrap_or_else(|| config.plugins_path());
    println!("Plugin directory: {}", plugin_dir.display());

    let runtime = build_runtime(config, &plugin_dir).await?;

    if let Some(name) = reload {
        if !runtime.registry.contains(&name) {
            runtime.registry.shutdown().await;
            bail!("Plugin '{}' is not registered", name);
        }
        runtime.registry.reload(&name).await?;
        println!("Reloaded: {}", name);
    }

    println!();
    println!("Registered plugins:");
    for plugin in runtime.registry.list_plugins() {
        let description = if plugin.description.is_empty() {
            "--"
        } else {
            plugin.description.as_str()
        };
        println!(
            "  {:>2}. {:<20} {:<10} {}",
            plugin.load_order, plugin.name, plugin.version, description
        );
    }

    println!();
    println!("Known factories: {}", runtime.registry.factory_keys().join(", "));
    println!("Subscribed topics: {}", runtime.bus.registered_topics().join(", "));
    println!(
        "Planner capabilities: {}",
        runtime.orchestrator.catalog().events().join(", ")
    );

    runtime.registry.shutdown().await;
    Ok(())
}
