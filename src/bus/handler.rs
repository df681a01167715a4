//! Handler and middleware contracts for the event bus

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::event::Event;
use crate::error::Result;

/// Something that reacts to events delivered by the bus.
///
/// Returning `Ok(None)` means "handled, nothing to report". An `Err` is logged
/// by the bus and surfaces as `None` in the dispatch results.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Human-readable handler name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Handle one event.
    async fn handle(&self, event: &Event) -> Result<Option<Value>>;
}

/// Adapter turning an async closure into an [`EventHandler`].
pub struct FnHandler<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<Value>>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &Event) -> Result<Option<Value>> {
        (self.f)(event.clone()).await
    }
}

/// Wrap an async closure as a shareable handler.
///
/// # Example
/// ```
/// use nexus_agent::bus::handler_fn;
/// use serde_json::json;
///
/// let handler = handler_fn("echo", |event| async move {
///     Ok(Some(json!({ "echo": event.name })))
/// });
/// assert_eq!(handler.name(), "echo");
/// ```
pub fn handler_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Value>>> + Send + 'static,
{
    Arc::new(FnHandler {
        name: name.into(),
        f,
    })
}

/// A pre-processing stage run on every event before history and handlers.
///
/// Returning `None` cancels the dispatch.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn process(&self, event: Event) -> Option<Event>;
}

/// Adapter for synchronous middleware closures.
pub struct FnMiddleware<F>(F);

#[async_trait]
impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(Event) -> Option<Event> + Send + Sync,
{
    async fn process(&self, event: Event) -> Option<Event> {
        (self.0)(event)
    }
}

/// Wrap a synchronous closure as middleware.
pub fn middleware_fn<F>(f: F) -> Arc<dyn Middleware>
where
    F: Fn(Event) -> Option<Event> + Send + Sync + 'static,
{
    Arc::new(FnMiddleware(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Named;

    #[async_trait]
    impl EventHandler for Named {
        async fn handle(&self, _event: &Event) -> Result<Option<Value>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_handler_fn_receives_event() {
        let handler = handler_fn("len", |event| async move {
            Ok(Some(json!(event.payload.len())))
        });
        let event = Event::new("a").with_field("k", json!(1));
        assert_eq!(handler.handle(&event).await.unwrap(), Some(json!(1)));
    }

    #[test]
    fn test_default_handler_name_is_type_name() {
        assert!(Named.name().ends_with("Named"));
    }

    #[tokio::test]
    async fn test_middleware_fn_can_veto() {
        let mw = middleware_fn(|event| (event.name != "blocked").then_some(event));
        assert!(mw.process(Event::new("blocked")).await.is_none());
        assert!(mw.process(Event::new("open")).await.is_some());
    }
}
