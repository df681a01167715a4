//! Event Bus Module
//!
//! Topic-based publish/subscribe dispatch shared by every NexusAgent component.
//! Capability modules never call each other directly; they emit named events
//! and react to the events they subscribed to.
//!
//! # Dispatch pipeline
//!
//! ```text
//!  emit(event)
//!     │
//!     ▼
//! ┌────────────┐  None   ┌───────────┐
//! │ middleware │───────> │ cancelled │
//! └────────────┘         └───────────┘
//!     │ Some(event)
//!     ▼
//! ┌────────────┐   ┌──────────────────────────┐   ┌──────────────────┐
//! │  history   │──>│ exact + prefix.* + "*"   │──>│ handlers, by     │
//! │  (ring)    │   │ subscription lookup      │   │ priority, serial │
//! └────────────┘   └──────────────────────────┘   └──────────────────┘
//! ```
//!
//! # Topic matching
//!
//! For an emitted topic `a.b.c` the candidates are, in tie-break order:
//! subscriptions on `a.b.c`, then `a.*`, `a.b.*`, `a.b.c.*` (shortest prefix
//! first), then `*`. Within each pattern, registration order is kept. The
//! merged list is then stably sorted by descending priority.
//!
//! A prefix pattern `x.*` matches `x` itself as well as every topic below
//! it, but never a topic that merely starts with the same letters
//! (`browser.*` reaches `browser` and `browser.search`, not `browsers.search`).
//!
//! # Example
//!
//! ```
//! use nexus_agent::bus::{handler_fn, EventBus};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let bus = EventBus::new();
//!     bus.subscribe("weather.*", handler_fn("weather", |event| async move {
//!         Ok(Some(json!({ "topic": event.name })))
//!     }), 0);
//!
//!     let results = bus.emit("weather.current").await;
//!     assert_eq!(results, vec![Some(json!({ "topic": "weather.current" }))]);
//! }
//! ```

pub mod event;
pub mod handler;

pub use event::{Event, Payload, DEFAULT_SOURCE};
pub use handler::{handler_fn, middleware_fn, EventHandler, FnHandler, FnMiddleware, Middleware};

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, error, info};

/// Default number of events kept in the history ring.
pub const DEFAULT_HISTORY_SIZE: usize = 1000;

/// Default number of events returned by [`EventBus::get_history`].
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// The universal topic pattern.
pub const WILDCARD: &str = "*";

/// Handle returned by [`EventBus::subscribe`], usable with [`EventBus::unsubscribe_id`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Outcome of a dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// A middleware stage returned `None`; no handler ran and nothing was recorded.
    Cancelled,
    /// One entry per matched handler, in invocation order. Failed handlers yield `None`.
    Delivered(Vec<Option<Value>>),
}

impl Dispatch {
    /// Returns true if middleware cancelled the event.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Dispatch::Cancelled)
    }

    /// Flattens the outcome to the handler results (empty when cancelled).
    pub fn into_results(self) -> Vec<Option<Value>> {
        match self {
            Dispatch::Cancelled => Vec::new(),
            Dispatch::Delivered(results) => results,
        }
    }
}

struct Subscription {
    id: SubscriptionId,
    priority: i32,
    handler: Arc<dyn EventHandler>,
}

/// A (topic, priority, handler) triple used for batch subscription.
pub type Binding = (String, i32, Arc<dyn EventHandler>);

/// The central event bus.
///
/// Safe to share behind an `Arc` across tasks. The subscription table and
/// history ring each sit behind their own short-lived lock; no lock is held
/// while a handler or middleware runs.
pub struct EventBus {
    subscriptions: RwLock<HashMap<String, Vec<Subscription>>>,
    middleware: RwLock<Vec<Arc<dyn Middleware>>>,
    history: Mutex<VecDeque<Event>>,
    history_size: usize,
    next_id: AtomicU64,
}

impl EventBus {
    /// Creates a bus keeping the last [`DEFAULT_HISTORY_SIZE`] events.
    pub fn new() -> Self {
        Self::with_history_size(DEFAULT_HISTORY_SIZE)
    }

    /// Creates a bus with a custom history capacity.
    ///
    /// # Example
    /// ```
    /// use nexus_agent::bus::EventBus;
    ///
    /// let bus = EventBus::with_history_size(10);
    /// assert_eq!(bus.history_size(), 10);
    /// ```
    pub fn with_history_size(history_size: usize) -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            middleware: RwLock::new(Vec::new()),
            history: Mutex::new(VecDeque::with_capacity(history_size.min(1024))),
            history_size,
            next_id: AtomicU64::new(1),
        }
    }

    /// Maximum number of events retained in history.
    pub fn history_size(&self) -> usize {
        self.history_size
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Registers a handler on a topic pattern.
    ///
    /// Patterns are exact topics (`browser.search`), prefix wildcards
    /// (`browser.*`) or the universal pattern `*`. Higher priorities run first.
    pub fn subscribe(
        &self,
        topic: impl Into<String>,
        handler: Arc<dyn EventHandler>,
        priority: i32,
    ) -> SubscriptionId {
        let topic = topic.into();
        let id = self.allocate_id();
        debug!(topic = %topic, handler = handler.name(), priority, "event.subscribed");
        self.write_subscriptions()
            .entry(topic)
            .or_default()
            .push(Subscription {
                id,
                priority,
                handler,
            });
        id
    }

    /// Registers several handlers under a single lock acquisition.
    ///
    /// Concurrent emits observe either none or all of the bindings.
    pub fn subscribe_all(&self, bindings: Vec<Binding>) -> Vec<SubscriptionId> {
        let mut table = self.write_subscriptions();
        bindings
            .into_iter()
            .map(|(topic, priority, handler)| {
                let id = self.allocate_id();
                debug!(topic = %topic, handler = handler.name(), priority, "event.subscribed");
                table.entry(topic).or_default().push(Subscription {
                    id,
                    priority,
                    handler,
                });
                id
            })
            .collect()
    }

    /// Removes every subscription of `handler` on `topic`. No-op if absent.
    ///
    /// Handlers are compared by identity (same `Arc` allocation).
    pub fn unsubscribe(&self, topic: &str, handler: &Arc<dyn EventHandler>) {
        let target = Arc::as_ptr(handler) as *const ();
        let mut table = self.write_subscriptions();
        if let Some(subs) = table.get_mut(topic) {
            subs.retain(|s| Arc::as_ptr(&s.handler) as *const () != target);
            if subs.is_empty() {
                table.remove(topic);
            }
        }
    }

    /// Removes a single subscription by id. Returns false if it was not found.
    pub fn unsubscribe_id(&self, id: SubscriptionId) -> bool {
        self.unsubscribe_all(&[id]) == 1
    }

    /// Removes a batch of subscriptions under a single lock acquisition.
    ///
    /// Returns the number of subscriptions actually removed.
    pub fn unsubscribe_all(&self, ids: &[SubscriptionId]) -> usize {
        if ids.is_empty() {
            return 0;
        }
        let mut table = self.write_subscriptions();
        let mut removed = 0;
        table.retain(|_, subs| {
            let before = subs.len();
            subs.retain(|s| !ids.contains(&s.id));
            removed += before - subs.len();
            !subs.is_empty()
        });
        removed
    }

    /// Appends a middleware stage to the processing chain.
    pub fn add_middleware(&self, middleware: Arc<dyn Middleware>) {
        self.middleware
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(middleware);
    }

    /// All topic patterns with at least one live subscription, sorted.
    pub fn registered_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.read_subscriptions().keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Number of subscriptions registered on exactly this pattern.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.read_subscriptions().get(topic).map_or(0, Vec::len)
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Emits an event and returns the ordered handler results.
    ///
    /// An empty list means either "no handler" or "cancelled by middleware";
    /// use [`EventBus::dispatch`] to tell them apart.
    pub async fn emit(&self, event: impl Into<Event>) -> Vec<Option<Value>> {
        self.dispatch(event.into()).await.into_results()
    }

    /// Builds an event from a name, payload and source, then emits it.
    pub async fn emit_named(
        &self,
        name: impl Into<String>,
        payload: Payload,
        source: impl Into<String>,
    ) -> Vec<Option<Value>> {
        let event = Event::new(name).with_payload(payload).with_source(source);
        self.emit(event).await
    }

    /// Runs the full pipeline: middleware, history, matching, handlers.
    pub async fn dispatch(&self, event: Event) -> Dispatch {
        let Some(event) = self.apply_middleware(event).await else {
            return Dispatch::Cancelled;
        };

        self.record(&event);

        let handlers = self.matching_handlers(&event.name);
        if handlers.is_empty() {
            debug!(event_name = %event.name, "event.no_handlers");
            return Dispatch::Delivered(Vec::new());
        }

        let mut results = Vec::with_capacity(handlers.len());
        for handler in &handlers {
            let outcome = AssertUnwindSafe(handler.handle(&event))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(value)) => results.push(value),
                Ok(Err(e)) => {
                    error!(
                        event_name = %event.name,
                        handler = handler.name(),
                        error = %e,
                        "event.handler_error"
                    );
                    results.push(None);
                }
                Err(panic) => {
                    error!(
                        event_name = %event.name,
                        handler = handler.name(),
                        error = %panic_message(panic.as_ref()),
                        "event.handler_panic"
                    );
                    results.push(None);
                }
            }
        }

        info!(
            event_name = %event.name,
            handlers = handlers.len(),
            source = %event.source,
            "event.emitted"
        );
        Dispatch::Delivered(results)
    }

    async fn apply_middleware(&self, mut event: Event) -> Option<Event> {
        let chain: Vec<Arc<dyn Middleware>> = self
            .middleware
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        for stage in chain {
            let name = event.name.clone();
            match stage.process(event).await {
                Some(next) => event = next,
                None => {
                    debug!(event_name = %name, "event.cancelled");
                    return None;
                }
            }
        }
        Some(event)
    }

    /// Snapshot of the handlers matching `topic`, in invocation order.
    fn matching_handlers(&self, topic: &str) -> Vec<Arc<dyn EventHandler>> {
        let patterns = candidate_patterns(topic);
        let table = self.read_subscriptions();

        let mut matched: Vec<(i32, Arc<dyn EventHandler>)> = patterns
            .iter()
            .filter_map(|pattern| table.get(pattern))
            .flatten()
            .map(|s| (s.priority, Arc::clone(&s.handler)))
            .collect();
        drop(table);

        // sort_by_key is stable: ties keep the candidate order
        matched.sort_by_key(|(priority, _)| std::cmp::Reverse(*priority));
        matched.into_iter().map(|(_, handler)| handler).collect()
    }

    // ========================================================================
    // History
    // ========================================================================

    fn record(&self, event: &Event) {
        if self.history_size == 0 {
            return;
        }
        let mut history = self
            .history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        history.push_back(event.clone());
        while history.len() > self.history_size {
            history.pop_front();
        }
    }

    /// Returns up to `limit` most recent events, oldest first.
    ///
    /// With `Some(topic)`, only events whose name equals `topic` are returned.
    pub fn get_history(&self, topic: Option<&str>, limit: usize) -> Vec<Event> {
        let history = self
            .history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut recent: Vec<Event> = history
            .iter()
            .rev()
            .filter(|e| topic.map_or(true, |t| e.name == t))
            .take(limit)
            .cloned()
            .collect();
        recent.reverse();
        recent
    }

    /// Number of events currently held in history.
    pub fn history_len(&self) -> usize {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn allocate_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn read_subscriptions(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<String, Vec<Subscription>>> {
        self.subscriptions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_subscriptions(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Vec<Subscription>>> {
        self.subscriptions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Patterns that match `topic`, deduplicated, in tie-break order.
fn candidate_patterns(topic: &str) -> Vec<String> {
    let mut patterns = vec![topic.to_string()];
    let mut prefix = String::new();
    for part in topic.split('.') {
        if !prefix.is_empty() {
            prefix.push('.');
        }
        prefix.push_str(part);
        patterns.push(format!("{}.*", prefix));
    }
    patterns.push(WILDCARD.to_string());

    let mut seen = std::collections::HashSet::new();
    patterns.retain(|p| seen.insert(p.clone()));
    patterns
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
