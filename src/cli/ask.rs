//! Ask command handler.

use std::path::Path;

use anyhow::{anyhow, Result};
use serde_json::json;

use nexus_agent::bus::Event;
use nexus_agent::orchestrator::{TaskResult, TASK_EXECUTE};

use super::common::{build_runtime, load_config};

/// Send one instruction through `task.execute` and print the reply.
pub(crate) async fn cmd_ask(config_path: &Path, instruction: String, channel: String, json_output: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let plugin_dir = config.plugins_path();
    let runtime = build_runtime(config, &plugin_dir).await?;

    let event = Event::new(TASK_EXECUTE)
        .with_field("instruction", json!(instruction))
        .with_field("channel", json!(channel))
        .with_source("cli");
    let results = runtime.bus.emit(event).await;
    runtime.registry.shutdown().await;

    let value = results
        .into_iter()
        .flatten()
        .next()
        .ok_or_else(|| anyhow!("No handler answered {}", TASK_EXECUTE))?;
    let result: TaskResult = serde_json::from_value(value)?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", result.response);
    }

    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}
