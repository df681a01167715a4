//! Plugin contract types

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bus::{handler_fn, Event, EventBus, EventHandler, Payload};
use crate::error::Result;

/// A capability unit wired to the bus.
///
/// Plugins declare their handlers explicitly through [`Plugin::bindings`];
/// the registry subscribes every binding before `on_load` runs and removes
/// them again on unregister.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique plugin name (registry key).
    fn name(&self) -> &str;

    /// Semantic version string.
    fn version(&self) -> &str {
        "0.1.0"
    }

    /// One-line description.
    fn description(&self) -> &str {
        ""
    }

    /// Names of plugins this one expects to be present. Advisory only.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Handlers this plugin wants bound to the bus.
    fn bindings(self: Arc<Self>) -> Vec<HandlerBinding> {
        Vec::new()
    }

    /// Event contracts this plugin publishes for the planner catalogue.
    fn capabilities(&self) -> Vec<Capability> {
        Vec::new()
    }

    /// Called after the handlers are bound.
    async fn on_load(&self) -> Result<()> {
        Ok(())
    }

    /// Called after the handlers are unbound, before the plugin is dropped.
    async fn on_unload(&self) -> Result<()> {
        Ok(())
    }
}

/// A (topic, priority, handler) triple declared by a plugin.
#[derive(Clone)]
pub struct HandlerBinding {
    pub topic: String,
    pub priority: i32,
    pub handler: Arc<dyn EventHandler>,
}

impl HandlerBinding {
    pub fn new(topic: impl Into<String>, priority: i32, handler: Arc<dyn EventHandler>) -> Self {
        Self {
            topic: topic.into(),
            priority,
            handler,
        }
    }

    /// Binds an async method of `plugin` to `topic`.
    ///
    /// # Example
    /// ```
    /// use std::sync::Arc;
    /// use nexus_agent::bus::Event;
    /// use nexus_agent::plugins::HandlerBinding;
    /// use serde_json::{json, Value};
    ///
    /// struct Weather;
    ///
    /// impl Weather {
    ///     async fn current(&self, event: Event) -> nexus_agent::Result<Option<Value>> {
    ///         Ok(Some(json!({ "city": event.str_field("city") })))
    ///     }
    /// }
    ///
    /// let plugin = Arc::new(Weather);
    /// let binding = HandlerBinding::method(&plugin, "weather.current", 0, |p, e| async move {
    ///     p.current(e).await
    /// });
    /// assert_eq!(binding.topic, "weather.current");
    /// ```
    pub fn method<P, F, Fut>(plugin: &Arc<P>, topic: impl Into<String>, priority: i32, f: F) -> Self
    where
        P: Send + Sync + 'static,
        F: Fn(Arc<P>, Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Value>>> + Send + 'static,
    {
        let topic = topic.into();
        let owner = Arc::clone(plugin);
        let name = format!("{}@{}", short_type_name::<P>(), topic);
        let handler = handler_fn(name, move |event| f(Arc::clone(&owner), event));
        Self::new(topic, priority, handler)
    }
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

/// Everything a plugin receives at construction time.
#[derive(Clone)]
pub struct PluginContext {
    pub bus: Arc<EventBus>,
    pub config: Payload,
}

/// Creates plugin instances. Discovery and reload go through factories.
pub trait PluginFactory: Send + Sync {
    fn create(&self, ctx: PluginContext) -> Result<Arc<dyn Plugin>>;
}

impl<F> PluginFactory for F
where
    F: Fn(PluginContext) -> Result<Arc<dyn Plugin>> + Send + Sync,
{
    fn create(&self, ctx: PluginContext) -> Result<Arc<dyn Plugin>> {
        self(ctx)
    }
}

/// One event contract in the planner catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    /// Topic the planner emits, e.g. `weather.current`
    pub event: String,
    /// What the capability does
    pub purpose: String,
    /// Example payload. A string is rendered verbatim, anything else as JSON.
    #[serde(default)]
    pub example: Value,
    /// Usage hints listed under the entry
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl Capability {
    pub fn new(event: impl Into<String>, purpose: impl Into<String>, example: Value) -> Self {
        Self {
            event: event.into(),
            purpose: purpose.into(),
            example,
            notes: Vec::new(),
        }
    }

    /// Append a usage hint.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

/// Public view of a registered plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginSummary {
    pub name: String,
    pub version: String,
    pub description: String,
    pub enabled: bool,
    pub load_order: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Counter {
        step: i64,
    }

    impl Counter {
        async fn add(&self, event: Event) -> Result<Option<Value>> {
            let n = event.payload.get("n").and_then(Value::as_i64).unwrap_or(0);
            Ok(Some(json!(n + self.step)))
        }
    }

    #[tokio::test]
    async fn test_method_binding_dispatches_to_instance() {
        let plugin = Arc::new(Counter { step: 10 });
        let binding = HandlerBinding::method(&plugin, "math.add", 3, |p, e| async move {
            p.add(e).await
        });
        assert_eq!(binding.priority, 3);
        assert_eq!(binding.handler.name(), "Counter@math.add");

        let event = Event::new("math.add").with_field("n", json!(5));
        let out = binding.handler.handle(&event).await.unwrap();
        assert_eq!(out, Some(json!(15)));
    }

    #[test]
    fn test_capability_deserialize_without_example() {
        let cap: Capability =
            serde_json::from_str(r#"{"event":"rss.fetch","purpose":"Lee un feed"}"#).unwrap();
        assert_eq!(cap.event, "rss.fetch");
        assert_eq!(cap.example, Value::Null);
        assert!(cap.notes.is_empty());
    }
}
