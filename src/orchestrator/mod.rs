//! Orchestration engine
//!
//! The orchestrator turns a free-text instruction into bus events and a
//! reply. One call to [`Orchestrator::process_task`] runs:
//!
//! 1. the pending profile confirmation, if the channel has one
//! 2. planning: a completion over the system prompt, recent history and the
//!    instruction, retried once when the completion is empty
//! 3. tolerant plan parsing ([`parse_plan`])
//! 4. step execution on the bus, with an `http.request` → `browser.search`
//!    retry and the `scheduler.add_job` rewrite
//! 5. synthesis of the final response from the collected results and errors
//!
//! When no plan can be recovered, the raw completion is used as prose, and
//! when that is empty too a search cascade answers directly.
//!
//! Each channel's state is locked for the whole call, so two instructions on
//! the same channel run one after the other while other channels proceed.
//! A handler that synchronously routes an instruction back into the same
//! channel while its step is running will wait on that lock.

pub mod catalog;
mod conversation;
mod fallback;
pub mod plan;
pub mod prompt;
pub mod summary;
pub mod text;

pub use catalog::{CapabilityCatalog, CatalogExample};
pub use conversation::{ChannelState, ConversationStore};
pub use plan::{parse_plan, Plan, PlanStep, ProfileUpdate};
pub use summary::{result_error, summarize_results};
pub use text::{clean_response, extract_search_query, is_news_query, strip_reasoning};

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::bus::{panic_message, Event, EventBus};
use crate::config::AgentConfig;
use crate::error::Result;
use crate::plugins::{Capability, HandlerBinding, Plugin};
use crate::profile::ProfileStore;
use crate::providers::{ChatMessage, ChatOptions, LLMProvider, LLMResponse};

use prompt::{build_system_prompt, chat_id_from_channel, local_now, PromptContext};
use text::truncate_chars;

// ============================================================================
// Topics
// ============================================================================

pub const TASK_EXECUTE: &str = "task.execute";
pub const MESSAGING_INCOMING: &str = "messaging.incoming";
pub const MESSAGING_SEND: &str = "messaging.send";
pub const TELEGRAM_SEND: &str = "telegram.send";
pub const SCHEDULER_ADD_JOB: &str = "scheduler.add_job";
pub const HTTP_REQUEST: &str = "http.request";
pub const BROWSER_SEARCH: &str = "browser.search";
pub const NEWS_SEARCH: &str = "news.search";

/// Source of every event the orchestrator emits.
pub const ORCHESTRATOR_SOURCE: &str = "orchestrator";

const AFFIRMATIVE: &[&str] = &["sí", "si", "yes", "ok", "dale", "guardalo", "guárdalo", "confirmo"];
const NEGATIVE: &[&str] = &["no", "nah", "nel", "no gracias"];

const NO_PLAN_RESPONSE: &str = "No pude procesar tu consulta correctamente. Intenta reformularla.";

/// Outcome of one instruction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
    pub steps_completed: usize,
    pub steps_total: usize,
    #[serde(default)]
    pub results: Vec<Value>,
    #[serde(default)]
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskResult {
    /// Successful result with no steps.
    pub fn reply(response: impl Into<String>) -> Self {
        Self {
            success: true,
            response: response.into(),
            ..Default::default()
        }
    }

    /// Failed result.
    pub fn failure(error: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            response: response.into(),
            ..Default::default()
        }
    }
}

/// Plan, execute and answer instructions over the bus.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use async_trait::async_trait;
/// use nexus_agent::bus::EventBus;
/// use nexus_agent::config::AgentConfig;
/// use nexus_agent::orchestrator::Orchestrator;
/// use nexus_agent::profile::MemoryProfileStore;
/// use nexus_agent::providers::{ChatMessage, ChatOptions, LLMProvider, LLMResponse};
///
/// struct Greeter;
///
/// #[async_trait]
/// impl LLMProvider for Greeter {
///     fn name(&self) -> &str { "greeter" }
///     fn default_model(&self) -> &str { "g-1" }
///     async fn chat(&self, _: Vec<ChatMessage>, _: ChatOptions) -> nexus_agent::Result<LLMResponse> {
///         Ok(LLMResponse::text(r#"{"thinking": "saludo", "steps": [], "response": "¡Hola!"}"#))
///     }
/// }
///
/// #[tokio::main]
/// async fn main() {
///     let orchestrator = Orchestrator::new(
///         Arc::new(EventBus::new()),
///         Arc::new(Greeter),
///         Arc::new(MemoryProfileStore::default()),
///         AgentConfig::default(),
///     );
///     let result = orchestrator.process_task("hola", "default").await;
///     assert!(result.success);
///     assert_eq!(result.response, "¡Hola!");
/// }
/// ```
pub struct Orchestrator {
    bus: Arc<EventBus>,
    llm: Arc<dyn LLMProvider>,
    profiles: Arc<dyn ProfileStore>,
    settings: AgentConfig,
    catalog: RwLock<CapabilityCatalog>,
    conversations: ConversationStore,
}

impl Orchestrator {
    pub fn new(
        bus: Arc<EventBus>,
        llm: Arc<dyn LLMProvider>,
        profiles: Arc<dyn ProfileStore>,
        settings: AgentConfig,
    ) -> Self {
        Self {
            bus,
            llm,
            profiles,
            settings,
            catalog: RwLock::new(CapabilityCatalog::builtin()),
            conversations: ConversationStore::new(),
        }
    }

    /// Replace the planner catalogue.
    pub fn with_catalog(self, catalog: CapabilityCatalog) -> Self {
        *self.catalog.write().unwrap_or_else(|p| p.into_inner()) = catalog;
        self
    }

    /// Merge published capabilities into the catalogue.
    pub fn extend_catalog(&self, capabilities: impl IntoIterator<Item = Capability>) {
        self.catalog
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .extend(capabilities);
    }

    /// Snapshot of the current catalogue.
    pub fn catalog(&self) -> CapabilityCatalog {
        self.catalog.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn settings(&self) -> &AgentConfig {
        &self.settings
    }

    /// Conversation history of a channel.
    pub async fn history(&self, channel: &str) -> Vec<ChatMessage> {
        self.conversations.history(channel).await
    }

    /// Profile update awaiting confirmation on a channel.
    pub async fn pending_update(&self, channel: &str) -> Option<ProfileUpdate> {
        self.conversations.pending(channel).await
    }

    /// The planner system prompt for `channel`, built now.
    pub async fn system_prompt(&self, channel: &str) -> String {
        let agent_profile = self.profiles.agent_profile().await;
        let user_profile = self.profiles.user_profile().await;
        let catalog = self.catalog();
        build_system_prompt(&PromptContext {
            settings: &self.settings,
            now: local_now(&self.settings),
            channel,
            agent_profile: agent_profile.as_deref(),
            user_profile: user_profile.as_deref(),
            catalog: &catalog,
        })
    }

    // ========================================================================
    // Instruction processing
    // ========================================================================

    /// Process one instruction on `channel`.
    ///
    /// Never fails: errors become a `success = false` result with a short
    /// user-facing message.
    pub async fn process_task(&self, instruction: &str, channel: &str) -> TaskResult {
        let mut state = self.conversations.lock(channel).await;

        if let Some(result) = self.resolve_pending(&mut state, instruction).await {
            return result;
        }

        match self.plan_and_execute(&mut state, instruction, channel).await {
            Ok(result) => result,
            Err(e) => {
                error!(channel = %channel, error = %e, "orchestrator.error");
                let detail = e.to_string();
                let response = format!("Error procesando la tarea: {}", truncate_chars(&detail, 200));
                TaskResult::failure(detail, response)
            }
        }
    }

    /// Consume a pending profile confirmation.
    ///
    /// Returns `None` when the channel had nothing pending, or when the
    /// answer was neither yes nor no; the pending update is dropped either way.
    async fn resolve_pending(&self, state: &mut ChannelState, instruction: &str) -> Option<TaskResult> {
        let pending = state.pending.take()?;
        let answer = instruction.trim().to_lowercase();

        let message = if AFFIRMATIVE.contains(&answer.as_str()) {
            let updated = match self
                .profiles
                .update_field(&pending.section, &pending.field, &pending.value)
                .await
            {
                Ok(updated) => updated,
                Err(e) => {
                    warn!(field = %pending.field, error = %e, "orchestrator.profile_update_failed");
                    false
                }
            };
            if updated {
                format!("✅ Guardé **{}**: {} en tu perfil.", pending.field, pending.value)
            } else {
                format!(
                    "⚠️ No pude actualizar el campo {}. Puede que la sección '{}' no exista en el perfil.",
                    pending.field, pending.section
                )
            }
        } else if NEGATIVE.contains(&answer.as_str()) {
            "👍 Entendido, no guardé nada.".to_string()
        } else {
            debug!(field = %pending.field, "orchestrator.profile_update_discarded");
            return None;
        };

        state.push_exchange(instruction, &message, self.settings.history_limit);
        Some(TaskResult::reply(message))
    }

    async fn plan_and_execute(
        &self,
        state: &mut ChannelState,
        instruction: &str,
        channel: &str,
    ) -> Result<TaskResult> {
        let mut messages = vec![ChatMessage::system(self.system_prompt(channel).await)];
        messages.extend_from_slice(state.recent(self.settings.context_turns));
        messages.push(ChatMessage::user(instruction));

        let mut completion = self
            .complete(messages.clone(), self.settings.planner_temperature)
            .await?;
        let mut plan = parse_plan(&completion.content);

        if plan.is_none() && completion.content.trim().is_empty() {
            info!(attempt = 2, "orchestrator.llm_empty_retry");
            completion = self
                .complete(messages, self.settings.retry_temperature)
                .await?;
            plan = parse_plan(&completion.content);
        }

        let Some(mut plan) = plan else {
            return Ok(self.answer_without_plan(&completion.content, instruction).await);
        };

        let confirmation = plan.profile_update.take().map(|update| {
            let question = format!(
                "\n\n💾 Detecté info nueva: **{}** = {}. ¿Quieres que lo guarde en tu perfil? Responde 'sí' o 'no'.",
                update.field, update.value
            );
            info!(field = %update.field, value = %update.value, "orchestrator.profile_update_pending");
            state.pending = Some(update);
            question
        });

        info!(
            steps = plan.steps.len(),
            thinking = %truncate_chars(&plan.thinking, 100),
            "orchestrator.plan"
        );

        let (results, errors) = self.execute_steps(&mut plan.steps, instruction, channel).await;

        let mut response = plan.response;
        if !results.is_empty() || !errors.is_empty() {
            response = self.synthesize(instruction, &results, &errors).await?;
        }
        // The pending question survives synthesis.
        if let Some(question) = confirmation {
            response.push_str(&question);
        }

        state.push_exchange(instruction, &response, self.settings.history_limit);

        Ok(TaskResult {
            success: true,
            steps_completed: plan.steps.len(),
            steps_total: plan.steps.len(),
            results,
            response,
            error: None,
        })
    }

    /// Best-effort prose when the completion held no plan.
    async fn answer_without_plan(&self, content: &str, instruction: &str) -> TaskResult {
        let raw = content.trim();
        debug!(raw_length = raw.len(), raw_preview = %truncate_chars(raw, 200), "orchestrator.no_plan_raw");

        let mut clean = strip_reasoning(raw);
        if clean.starts_with('{') {
            if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(&clean) {
                if let Some(Value::String(text)) = obj.get("response") {
                    clean = text.clone();
                }
            }
        }
        debug!(clean_length = clean.len(), clean_preview = %truncate_chars(&clean, 200), "orchestrator.no_plan_clean");

        if clean.is_empty() && !instruction.trim().is_empty() {
            clean = self.empty_response_fallback(instruction).await;
        }
        if clean.is_empty() {
            clean = NO_PLAN_RESPONSE.to_string();
        }

        TaskResult::reply(clean_response(&clean))
    }

    async fn complete(&self, messages: Vec<ChatMessage>, temperature: f32) -> Result<LLMResponse> {
        let options = ChatOptions::new()
            .with_temperature(temperature)
            .with_max_tokens(self.settings.max_tokens);
        self.llm.chat(messages, options).await
    }

    /// Emit every step in order and sort handler results into data and errors.
    async fn execute_steps(
        &self,
        steps: &mut [PlanStep],
        instruction: &str,
        channel: &str,
    ) -> (Vec<Value>, Vec<String>) {
        let mut results = Vec::new();
        let mut errors: Vec<String> = Vec::new();

        for (i, step) in steps.iter_mut().enumerate() {
            let number = i + 1;
            if step.event == SCHEDULER_ADD_JOB {
                prepare_scheduled_job(step, channel);
            }
            info!(step = number, event_name = %step.event, description = %step.description, "orchestrator.step");

            let event = Event::new(step.event.clone())
                .with_payload(step.data.clone())
                .with_source(ORCHESTRATOR_SOURCE);

            let mut step_ok = false;
            for result in self.bus.emit(event).await.into_iter().flatten() {
                match result_error(&result) {
                    Some(err) => errors.push(format!("Step {} ({}): {}", number, step.event, err)),
                    None => {
                        results.push(result);
                        step_ok = true;
                    }
                }
            }

            if !step_ok && step.event == HTTP_REQUEST {
                let failed_url = step.data.get("url").and_then(Value::as_str).unwrap_or_default();
                info!(
                    failed_event = %step.event,
                    failed_url = %failed_url,
                    fallback_query = %instruction,
                    "orchestrator.fallback_to_search"
                );
                let marker = format!("Step {} (", number);
                for result in self.search(BROWSER_SEARCH, instruction).await {
                    if result_error(&result).is_none() {
                        results.push(result);
                        errors.retain(|e| !e.starts_with(&marker));
                        info!(engine = BROWSER_SEARCH, "orchestrator.fallback_success");
                    }
                }
            }
        }

        (results, errors)
    }

    /// Ask the model to turn results and errors into the final response.
    async fn synthesize(&self, instruction: &str, results: &[Value], errors: &[String]) -> Result<String> {
        let summary = (!results.is_empty()).then(|| summarize_results(results));
        let context = prompt::synthesis_context(
            &local_now(&self.settings),
            instruction,
            summary.as_deref(),
            errors,
        );
        let messages = vec![
            ChatMessage::system(prompt::SYNTHESIS_SYSTEM_PROMPT),
            ChatMessage::user(context),
        ];
        let response = self
            .complete(messages, self.settings.synthesis_temperature)
            .await?;
        Ok(clean_response(&strip_reasoning(&response.content)))
    }

    // ========================================================================
    // Bus entry points
    // ========================================================================

    /// Run a `task.execute` event.
    ///
    /// Reads `instruction`, `channel` (default `"system"`) and `chat_id`.
    /// With a `chat_id`, the cleaned response is forwarded on
    /// `telegram.send`. A panic while processing becomes a failed result.
    pub async fn handle_task_event(&self, event: &Event) -> TaskResult {
        let instruction = event.str_field("instruction").unwrap_or_default();
        let channel = event.str_field("channel").unwrap_or("system");
        let chat_id = event
            .payload
            .get("chat_id")
            .filter(|id| is_truthy(id))
            .cloned();

        let preview = if instruction.is_empty() {
            "(empty)".to_string()
        } else {
            truncate_chars(instruction, 80)
        };
        info!(
            instruction = %preview,
            channel = %channel,
            chat_id = ?chat_id,
            source = %event.source,
            "orchestrator.handle_task"
        );

        let result = match AssertUnwindSafe(self.process_task(instruction, channel))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(error = %message, chat_id = ?chat_id, "orchestrator.handle_task_error");
                TaskResult::failure(
                    message.clone(),
                    format!("Error procesando tarea programada: {}", truncate_chars(&message, 200)),
                )
            }
        };

        match chat_id {
            Some(chat_id) if !result.response.is_empty() => {
                info!(chat_id = %chat_id, response_len = result.response.len(), "orchestrator.scheduled_task_sending");
                let send = Event::new(TELEGRAM_SEND)
                    .with_field("chat_id", chat_id.clone())
                    .with_field("content", json!(clean_response(&result.response)))
                    .with_source(ORCHESTRATOR_SOURCE);
                for outcome in self.bus.emit(send).await.into_iter().flatten() {
                    if let Some(err) = result_error(&outcome) {
                        error!(error = %err, chat_id = %chat_id, "orchestrator.scheduled_task_send_error");
                    }
                }
            }
            Some(chat_id) => {
                warn!(
                    chat_id = %chat_id,
                    success = result.success,
                    error = ?result.error,
                    "orchestrator.scheduled_task_no_response"
                );
            }
            None => {}
        }

        result
    }

    /// Answer a `messaging.incoming` event with a `messaging.send` reply.
    ///
    /// Blank messages are ignored. The reply carries `content`, `channel`
    /// and `reply_to`, the id of the inbound `message`.
    pub async fn handle_incoming_message(&self, event: &Event) {
        let content = event.str_field("content").unwrap_or_default();
        let channel = event.str_field("channel").unwrap_or("default");
        let sender = event.str_field("sender").unwrap_or("unknown");

        if content.trim().is_empty() {
            return;
        }
        info!(sender = %sender, channel = %channel, "orchestrator.processing");

        let result = self.process_task(content, channel).await;
        if result.response.is_empty() {
            return;
        }

        let reply_to = event
            .payload
            .get("message")
            .and_then(|m| m.get("id"))
            .cloned()
            .unwrap_or(Value::Null);
        let reply = Event::new(MESSAGING_SEND)
            .with_field("content", json!(result.response))
            .with_field("channel", json!(channel))
            .with_field("reply_to", reply_to)
            .with_source(ORCHESTRATOR_SOURCE);
        self.bus.emit(reply).await;
    }
}

/// Route a scheduled job back through `task.execute` with a usable payload.
fn prepare_scheduled_job(step: &mut PlanStep, channel: &str) {
    step.data.insert("event_name".into(), json!(TASK_EXECUTE));

    let mut inner = step
        .data
        .get("event_data")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    if !inner.get("instruction").is_some_and(is_truthy) {
        let instruction = inner
            .get("query")
            .cloned()
            .unwrap_or_else(|| json!(step.description));
        inner.insert("instruction".into(), instruction);
    }

    if let Some(chat_id) = chat_id_from_channel(channel) {
        let id = chat_id
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| json!(chat_id));
        inner.insert("chat_id".into(), id);
        inner.insert("channel".into(), json!(channel));
    }

    let preview = inner
        .get("instruction")
        .and_then(Value::as_str)
        .map(|s| truncate_chars(s, 80))
        .unwrap_or_default();
    info!(
        job_id = ?step.data.get("id"),
        event_name_forced = TASK_EXECUTE,
        instruction = %preview,
        chat_id = ?inner.get("chat_id"),
        "orchestrator.scheduler_fixed"
    );
    step.data.insert("event_data".into(), Value::Object(inner));
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[async_trait]
impl Plugin for Orchestrator {
    fn name(&self) -> &str {
        "orchestrator"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn description(&self) -> &str {
        "AI-powered task orchestrator"
    }

    fn bindings(self: Arc<Self>) -> Vec<HandlerBinding> {
        vec![
            HandlerBinding::method(&self, TASK_EXECUTE, 0, |o, event| async move {
                let result = o.handle_task_event(&event).await;
                Ok(Some(serde_json::to_value(result)?))
            }),
            HandlerBinding::method(&self, MESSAGING_INCOMING, 0, |o, event| async move {
                o.handle_incoming_message(&event).await;
                Ok(None)
            }),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::handler_fn;
    use crate::profile::MemoryProfileStore;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned completions and records every request.
    struct Scripted {
        replies: Mutex<VecDeque<String>>,
        calls: Mutex<Vec<(Vec<ChatMessage>, Option<f32>)>>,
    }

    impl Scripted {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(Vec<ChatMessage>, Option<f32>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LLMProvider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn default_model(&self) -> &str {
            "scripted-1"
        }

        async fn chat(&self, messages: Vec<ChatMessage>, options: ChatOptions) -> Result<LLMResponse> {
            self.calls.lock().unwrap().push((messages, options.temperature));
            let reply = self.replies.lock().unwrap().pop_front().unwrap_or_default();
            Ok(LLMResponse::text(reply))
        }
    }

    fn orchestrator(llm: Arc<Scripted>, profile: &str) -> (Arc<EventBus>, Orchestrator) {
        let bus = Arc::new(EventBus::new());
        let store = Arc::new(MemoryProfileStore::new("", profile));
        let orch = Orchestrator::new(Arc::clone(&bus), llm, store, AgentConfig::default());
        (bus, orch)
    }

    #[tokio::test]
    async fn test_direct_response_without_steps() {
        let llm = Scripted::new(&[r#"{"thinking": "Es un saludo", "steps": [], "response": "¡Hola! ¿En qué te puedo ayudar?"}"#]);
        let (_bus, orch) = orchestrator(Arc::clone(&llm), "");

        let result = orch.process_task("hola", "default").await;
        assert!(result.success);
        assert_eq!(result.steps_total, 0);
        assert_eq!(result.response, "¡Hola! ¿En qué te puedo ayudar?");
        assert_eq!(orch.history("default").await.len(), 2);

        let calls = llm.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, Some(0.3));
        assert_eq!(calls[0].0.last().unwrap().content, "hola");
    }

    #[tokio::test]
    async fn test_empty_completion_retries_with_other_temperature() {
        let llm = Scripted::new(&["   ", r#"{"steps": [], "response": "segundo intento"}"#]);
        let (_bus, orch) = orchestrator(Arc::clone(&llm), "");

        let result = orch.process_task("hola", "default").await;
        assert_eq!(result.response, "segundo intento");
        let temps: Vec<Option<f32>> = llm.calls().into_iter().map(|c| c.1).collect();
        assert_eq!(temps, vec![Some(0.3), Some(0.5)]);
    }

    #[tokio::test]
    async fn test_plain_text_completion_used_as_response() {
        let llm = Scripted::new(&["<think>pienso</think>## Respuesta\nTexto libre"]);
        let (_bus, orch) = orchestrator(Arc::clone(&llm), "");

        let result = orch.process_task("algo", "default").await;
        assert!(result.success);
        assert_eq!(result.response, "Respuesta\nTexto libre");
        assert_eq!(llm.calls().len(), 1);
        assert!(orch.history("default").await.is_empty());
    }

    #[tokio::test]
    async fn test_nothing_found_gives_generic_reply() {
        let llm = Scripted::new(&["", ""]);
        let (_bus, orch) = orchestrator(llm, "");
        let result = orch.process_task("¿cuál es la capital de Francia?", "default").await;
        assert!(result.success);
        assert_eq!(result.response, NO_PLAN_RESPONSE);
    }

    #[tokio::test]
    async fn test_provider_error_becomes_failure() {
        struct Broken;

        #[async_trait]
        impl LLMProvider for Broken {
            fn name(&self) -> &str {
                "broken"
            }
            fn default_model(&self) -> &str {
                "x"
            }
            async fn chat(&self, _: Vec<ChatMessage>, _: ChatOptions) -> Result<LLMResponse> {
                Err(crate::error::NexusError::Provider("connection refused".into()))
            }
        }

        let orch = Orchestrator::new(
            Arc::new(EventBus::new()),
            Arc::new(Broken),
            Arc::new(MemoryProfileStore::default()),
            AgentConfig::default(),
        );
        let result = orch.process_task("hola", "default").await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Provider error: connection refused"));
        assert!(result.response.starts_with("Error procesando la tarea: "));
    }

    #[tokio::test]
    async fn test_long_provider_error_is_truncated_for_the_user() {
        struct Gateway;

        #[async_trait]
        impl LLMProvider for Gateway {
            fn name(&self) -> &str {
                "gateway"
            }
            fn default_model(&self) -> &str {
                "x"
            }
            async fn chat(&self, _: Vec<ChatMessage>, _: ChatOptions) -> Result<LLMResponse> {
                let body = format!("<html><body>{}</body></html>", "Bad Gateway ".repeat(800));
                Err(crate::error::NexusError::Provider(format!("HTTP 502: {}", body)))
            }
        }

        let orch = Orchestrator::new(
            Arc::new(EventBus::new()),
            Arc::new(Gateway),
            Arc::new(MemoryProfileStore::default()),
            AgentConfig::default(),
        );
        let result = orch.process_task("hola", "default").await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().len() > 9000);

        let prefix = "Error procesando la tarea: ";
        assert!(result.response.starts_with(prefix));
        assert_eq!(result.response.chars().count(), prefix.chars().count() + 200);
        assert!(!result.response.contains("</html>"));
    }

    #[tokio::test]
    async fn test_task_event_panic_becomes_failure_and_is_still_sent() {
        struct Exploding;

        #[async_trait]
        impl LLMProvider for Exploding {
            fn name(&self) -> &str {
                "exploding"
            }
            fn default_model(&self) -> &str {
                "x"
            }
            async fn chat(&self, _: Vec<ChatMessage>, _: ChatOptions) -> Result<LLMResponse> {
                if !self.name().is_empty() {
                    panic!("{}", "z".repeat(500));
                }
                Ok(LLMResponse::text(""))
            }
        }

        let bus = Arc::new(EventBus::new());
        let orch = Orchestrator::new(
            Arc::clone(&bus),
            Arc::new(Exploding),
            Arc::new(MemoryProfileStore::default()),
            AgentConfig::default(),
        );
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&sent);
        bus.subscribe(
            TELEGRAM_SEND,
            handler_fn("telegram", move |event| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().unwrap().push(event.payload.clone());
                    Ok(None)
                }
            }),
            0,
        );

        let event = Event::new(TASK_EXECUTE)
            .with_field("instruction", json!("resumen diario"))
            .with_field("chat_id", json!(7))
            .with_source("scheduler");
        let result = orch.handle_task_event(&event).await;

        let prefix = "Error procesando tarea programada: ";
        assert!(!result.success);
        assert_eq!(result.error.as_deref().map(str::len), Some(500));
        assert!(result.response.starts_with(prefix));
        assert_eq!(result.response.chars().count(), prefix.chars().count() + 200);

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["chat_id"], json!(7));
        assert_eq!(sent[0]["content"], json!(result.response));
    }

    #[tokio::test]
    async fn test_profile_question_survives_synthesis() {
        let llm = Scripted::new(&[
            r#"{"steps": [{"event": "weather.current", "data": {"city": "Rosario"}}], "response": "...", "profile_update": {"field": "City", "value": "Rosario"}}"#,
            "En Rosario hay 22°C.",
        ]);
        let (bus, orch) = orchestrator(llm, "## Personal\n- **City**: \n");
        bus.subscribe(
            "weather.current",
            handler_fn("weather", |_| async { Ok(Some(json!({"summary_text": "22°C"}))) }),
            0,
        );

        let result = orch.process_task("¿clima en Rosario? vivo ahí", "default").await;
        assert!(result.response.starts_with("En Rosario hay 22°C."));
        assert!(result.response.contains("¿Quieres que lo guarde en tu perfil?"));
        assert!(orch.pending_update("default").await.is_some());
    }

    #[tokio::test]
    async fn test_scheduler_step_is_rewritten() {
        let llm = Scripted::new(&[
            r#"{"steps": [{"event": "scheduler.add_job", "data": {"id": "daily", "event_name": "news.search", "event_data": {"query": "tendencias tech"}}, "description": "Programar"}], "response": "Listo"}"#,
            "Programado para las 18:00.",
        ]);
        let (bus, orch) = orchestrator(llm, "");
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        bus.subscribe(
            SCHEDULER_ADD_JOB,
            handler_fn("scheduler", move |event| {
                let sink = Arc::clone(&sink);
                async move {
                    *sink.lock().unwrap() = Some(event.payload.clone());
                    Ok(Some(json!({"job_id": "daily"})))
                }
            }),
            0,
        );

        let result = orch.process_task("resumen diario a las 18", "telegram:1714121336").await;
        assert_eq!(result.response, "Programado para las 18:00.");

        let payload = seen.lock().unwrap().clone().unwrap();
        assert_eq!(payload["event_name"], json!("task.execute"));
        assert_eq!(payload["event_data"]["instruction"], json!("tendencias tech"));
        assert_eq!(payload["event_data"]["chat_id"], json!(1714121336));
        assert_eq!(payload["event_data"]["channel"], json!("telegram:1714121336"));
    }

    #[test]
    fn test_prepare_scheduled_job_uses_description() {
        let mut step = PlanStep {
            event: SCHEDULER_ADD_JOB.into(),
            data: serde_json::Map::new(),
            description: "Recordar tomar agua".into(),
        };
        prepare_scheduled_job(&mut step, "default");
        assert_eq!(step.data["event_data"]["instruction"], json!("Recordar tomar agua"));
        assert!(step.data["event_data"].get("chat_id").is_none());
    }

    #[tokio::test]
    async fn test_step_errors_reach_synthesis() {
        let llm = Scripted::new(&[
            r#"{"steps": [{"event": "weather.current", "data": {"city": "X"}}], "response": "..."}"#,
            "No encontré el clima, pero suele hacer calor.",
        ]);
        let (bus, orch) = orchestrator(Arc::clone(&llm), "");
        bus.subscribe(
            "weather.current",
            handler_fn("weather", |_| async { Ok(Some(json!({"error": "city not found"}))) }),
            0,
        );

        let result = orch.process_task("clima en X", "default").await;
        assert!(result.results.is_empty());
        assert_eq!(result.response, "No encontré el clima, pero suele hacer calor.");

        let synthesis = &llm.calls()[1].0;
        assert_eq!(synthesis[0].content, prompt::SYNTHESIS_SYSTEM_PROMPT);
        assert!(synthesis[1].content.contains("Errores en pasos:\nStep 1 (weather.current): city not found"));
        assert!(!synthesis[1].content.contains("Datos obtenidos"));
    }

    #[tokio::test]
    async fn test_profile_confirmation_yes() {
        let llm = Scripted::new(&[
            r#"{"steps": [], "response": "¡Encantado Joel!", "profile_update": {"field": "Name", "value": "Joel", "section": "Personal"}}"#,
        ]);
        let (_bus, orch) = orchestrator(llm, "## Personal\n- **Name**: ");

        let first = orch.process_task("me llamo Joel", "c1").await;
        assert!(first.response.starts_with("¡Encantado Joel!\n\n💾 Detecté info nueva: **Name** = Joel."));
        assert!(orch.pending_update("c1").await.is_some());

        let second = orch.process_task("  Sí ", "c1").await;
        assert_eq!(second.response, "✅ Guardé **Name**: Joel en tu perfil.");
        assert!(orch.pending_update("c1").await.is_none());
        assert!(orch.system_prompt("c1").await.contains("- **Name**: Joel"));
        assert_eq!(orch.history("c1").await.len(), 4);
    }

    #[tokio::test]
    async fn test_profile_confirmation_missing_section() {
        let llm = Scripted::new(&[
            r#"{"steps": [], "response": "ok", "profile_update": {"field": "Pet", "value": "Gato", "section": "Hogar"}}"#,
        ]);
        let (_bus, orch) = orchestrator(llm, "## Personal\n- **Name**: Joel");
        orch.process_task("tengo un gato", "c1").await;
        let answer = orch.process_task("dale", "c1").await;
        assert_eq!(
            answer.response,
            "⚠️ No pude actualizar el campo Pet. Puede que la sección 'Hogar' no exista en el perfil."
        );
    }

    #[tokio::test]
    async fn test_pending_is_per_channel() {
        let llm = Scripted::new(&[
            r#"{"steps": [], "response": "ok", "profile_update": {"field": "Name", "value": "Ana"}}"#,
            r#"{"steps": [], "response": "otro canal"}"#,
        ]);
        let (_bus, orch) = orchestrator(llm, "");
        orch.process_task("soy Ana", "a").await;
        let other = orch.process_task("no", "b").await;
        assert_eq!(other.response, "otro canal");
        assert!(orch.pending_update("a").await.is_some());
    }

    #[tokio::test]
    async fn test_task_event_forwards_to_chat() {
        let llm = Scripted::new(&[r####"{"steps": [], "response": "### Resumen\nTodo bien"}"####]);
        let (bus, orch) = orchestrator(llm, "");
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&sent);
        bus.subscribe(
            TELEGRAM_SEND,
            handler_fn("telegram", move |event| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().unwrap().push(event.payload.clone());
                    Ok(None)
                }
            }),
            0,
        );

        let event = Event::new(TASK_EXECUTE)
            .with_field("instruction", json!("resumen"))
            .with_field("chat_id", json!(99))
            .with_source("scheduler");
        let result = orch.handle_task_event(&event).await;
        assert_eq!(result.response, "### Resumen\nTodo bien");

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["chat_id"], json!(99));
        assert_eq!(sent[0]["content"], json!("Resumen\nTodo bien"));
        assert_eq!(orch.history("system").await.len(), 2);
    }

    #[tokio::test]
    async fn test_incoming_message_replies() {
        let llm = Scripted::new(&[r#"{"steps": [], "response": "¡Hola!"}"#]);
        let (bus, orch) = orchestrator(llm, "");
        let orch = Arc::new(orch);
        bus.subscribe_all(
            Arc::clone(&orch)
                .bindings()
                .into_iter()
                .map(|b| (b.topic, b.priority, b.handler))
                .collect(),
        );
        let replies = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&replies);
        bus.subscribe(
            MESSAGING_SEND,
            handler_fn("sink", move |event| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().unwrap().push(event);
                    Ok(None)
                }
            }),
            0,
        );

        bus.emit(Event::new(MESSAGING_INCOMING).with_field("content", json!("   "))).await;
        assert!(replies.lock().unwrap().is_empty());

        bus.emit(
            Event::new(MESSAGING_INCOMING)
                .with_field("content", json!("hola"))
                .with_field("channel", json!("webhook:7"))
                .with_field("message", json!({"id": "m-1"})),
        )
        .await;

        let replies = replies.lock().unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].source, ORCHESTRATOR_SOURCE);
        assert_eq!(replies[0].payload["content"], json!("¡Hola!"));
        assert_eq!(replies[0].payload["channel"], json!("webhook:7"));
        assert_eq!(replies[0].payload["reply_to"], json!("m-1"));
    }

    #[test]
    fn test_plugin_identity() {
        let (_bus, orch) = orchestrator(Scripted::new(&[]), "");
        assert_eq!(orch.name(), "orchestrator");
        assert_eq!(orch.version(), "1.0.0");
        let topics: Vec<String> = Arc::new(orch).bindings().into_iter().map(|b| b.topic).collect();
        assert_eq!(topics, vec![TASK_EXECUTE, MESSAGING_INCOMING]);
    }
}
