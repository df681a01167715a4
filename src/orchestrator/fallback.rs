//! Search cascade used when the planner produced nothing usable.

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::bus::Event;
use crate::providers::ChatMessage;

use super::prompt::FALLBACK_SYSTEM_PROMPT;
use super::summary::{result_error, summarize_results};
use super::text::{clean_response, extract_search_query, is_news_query, strip_reasoning, truncate_chars};
use super::{Orchestrator, BROWSER_SEARCH, NEWS_SEARCH, ORCHESTRATOR_SOURCE};

/// Article count reported by a news search result.
fn articles_count(result: &Value) -> u64 {
    result
        .get("articles_count")
        .and_then(|c| c.as_u64().or_else(|| c.as_f64().map(|f| f.max(0.0) as u64)))
        .unwrap_or(0)
}

impl Orchestrator {
    /// Answer `instruction` from a direct search when planning failed.
    ///
    /// News-like instructions try `news.search` first and only accept a
    /// result with a positive `articles_count`. Otherwise, or when news
    /// finds nothing, the first non-error `browser.search` result is used.
    /// The accepted result is summarised by the model. Returns an empty
    /// string when nothing was found or the summary call failed.
    pub(super) async fn empty_response_fallback(&self, instruction: &str) -> String {
        let query = extract_search_query(instruction, self.settings.query_term_limit);
        info!(
            instruction = %truncate_chars(instruction, 80),
            extracted_query = %query,
            "orchestrator.empty_response_fallback"
        );

        let mut found = None;

        if is_news_query(instruction) {
            info!(step = NEWS_SEARCH, query = %query, "orchestrator.fallback_trying");
            for result in self.search(NEWS_SEARCH, &query).await {
                if !result.is_object() {
                    continue;
                }
                let count = articles_count(&result);
                if count > 0 {
                    info!(articles = count, "orchestrator.fallback_news_ok");
                    found = Some(result);
                    break;
                }
                info!(articles = count, "orchestrator.fallback_news_empty");
            }
        }

        if found.is_none() {
            info!(step = BROWSER_SEARCH, query = %query, "orchestrator.fallback_trying");
            found = self
                .search(BROWSER_SEARCH, &query)
                .await
                .into_iter()
                .find(|r| result_error(r).is_none());
            if found.is_some() {
                info!("orchestrator.fallback_browser_ok");
            }
        }

        let Some(data) = found else {
            return String::new();
        };

        let messages = vec![
            ChatMessage::system(FALLBACK_SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "Tarea: {}\n\nDatos:\n{}",
                instruction,
                summarize_results(&[data])
            )),
        ];
        match self
            .complete(messages, self.settings.synthesis_temperature)
            .await
        {
            Ok(response) => {
                let clean = clean_response(&strip_reasoning(&response.content));
                info!(response_len = clean.len(), "orchestrator.fallback_summary_ok");
                clean
            }
            Err(e) => {
                warn!(error = %e, "orchestrator.fallback_summary_error");
                String::new()
            }
        }
    }

    /// Non-null results of a `{query}` search on `topic`.
    pub(super) async fn search(&self, topic: &str, query: &str) -> Vec<Value> {
        let event = Event::new(topic)
            .with_field("query", json!(query))
            .with_source(ORCHESTRATOR_SOURCE);
        self.bus.emit(event).await.into_iter().flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_articles_count() {
        assert_eq!(articles_count(&json!({"articles_count": 4})), 4);
        assert_eq!(articles_count(&json!({"articles_count": 2.0})), 2);
        assert_eq!(articles_count(&json!({"articles_count": "3"})), 0);
        assert_eq!(articles_count(&json!({})), 0);
    }
}
