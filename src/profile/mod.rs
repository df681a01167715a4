//! Profile module - agent identity and user profile documents
//!
//! Two Markdown documents describe the installation: the agent profile
//! (who the agent is) and the user profile (what the agent knows about its
//! user). Both are injected into the planner prompt. The user profile is
//! organised in `## Section` headings holding `- **Field**: value` lines,
//! and single fields can be rewritten in place after the user confirms.
//!
//! # Example
//!
//! ```
//! use nexus_agent::profile::{MemoryProfileStore, ProfileStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = MemoryProfileStore::new("", "## Personal\n- **Name**: \n");
//!     assert!(store.update_field("Personal", "Name", "Joel").await.unwrap());
//!     assert_eq!(store.user_profile().await.unwrap(), "## Personal\n- **Name**: Joel\n");
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{NexusError, Result};

/// File name of the agent identity document.
pub const AGENT_PROFILE_FILE: &str = "agent_profile.md";

/// File name of the user profile document.
pub const USER_PROFILE_FILE: &str = "user_profile.md";

/// Profile persistence capability used by the orchestrator.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Agent identity text. `None` when there is no document.
    async fn agent_profile(&self) -> Option<String>;

    /// User profile text. `None` when there is no document.
    async fn user_profile(&self) -> Option<String>;

    /// Rewrite `- **field**: ...` under `## section` in the user profile.
    ///
    /// Returns `Ok(false)` when the document, section or field is missing;
    /// nothing is written in that case.
    async fn update_field(&self, section: &str, field: &str, value: &str) -> Result<bool>;
}

/// Replace a labeled field inside a named section.
///
/// Section headings match case-insensitively; the field label must match
/// exactly. Every matching line of the section is replaced. Returns `None`
/// when nothing matched.
pub fn update_markdown_field(content: &str, section: &str, field: &str, value: &str) -> Option<String> {
    let heading = format!("## {}", section.to_lowercase());
    let prefix = format!("- **{}**:", field);
    let mut in_section = false;
    let mut updated = false;

    let lines: Vec<String> = content
        .split('\n')
        .map(|line| {
            if line.starts_with("## ") {
                in_section = line.trim().to_lowercase() == heading;
            }
            if in_section && line.starts_with(&prefix) {
                updated = true;
                format!("- **{}**: {}", field, value)
            } else {
                line.to_string()
            }
        })
        .collect();

    updated.then(|| lines.join("\n"))
}

// ============================================================================
// Markdown files
// ============================================================================

/// Profile documents stored as Markdown files in a data directory.
pub struct MarkdownProfileStore {
    dir: PathBuf,
}

impl MarkdownProfileStore {
    /// Store rooted at `dir`. The directory does not need to exist yet.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the documents.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Overwrite the user profile document, creating the directory if needed.
    pub async fn save_user_profile(&self, content: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.dir.join(USER_PROFILE_FILE), content).await?;
        Ok(())
    }

    async fn read(&self, file: &str) -> Option<String> {
        let path = self.dir.join(file);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Some(content),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "profile.unreadable");
                None
            }
        }
    }
}

#[async_trait]
impl ProfileStore for MarkdownProfileStore {
    async fn agent_profile(&self) -> Option<String> {
        self.read(AGENT_PROFILE_FILE).await
    }

    async fn user_profile(&self) -> Option<String> {
        self.read(USER_PROFILE_FILE).await
    }

    async fn update_field(&self, section: &str, field: &str, value: &str) -> Result<bool> {
        let path = self.dir.join(USER_PROFILE_FILE);
        if !path.is_file() {
            return Ok(false);
        }
        let content = tokio::fs::read_to_string(&path).await?;
        let Some(updated) = update_markdown_field(&content, section, field, value) else {
            return Ok(false);
        };
        tokio::fs::write(&path, updated).await.map_err(|e| {
            NexusError::Profile(format!("cannot write {}: {}", path.display(), e))
        })?;
        info!(section = %section, field = %field, "profile.field_updated");
        Ok(true)
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Profile documents held in memory. Empty strings count as missing.
#[derive(Default)]
pub struct MemoryProfileStore {
    agent: RwLock<String>,
    user: RwLock<String>,
}

impl MemoryProfileStore {
    pub fn new(agent: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            agent: RwLock::new(agent.into()),
            user: RwLock::new(user.into()),
        }
    }

    fn snapshot(lock: &RwLock<String>) -> Option<String> {
        let text = lock.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        (!text.is_empty()).then(|| text.clone())
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn agent_profile(&self) -> Option<String> {
        Self::snapshot(&self.agent)
    }

    async fn user_profile(&self) -> Option<String> {
        Self::snapshot(&self.user)
    }

    async fn update_field(&self, section: &str, field: &str, value: &str) -> Result<bool> {
        let mut user = self.user.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        match update_markdown_field(&user, section, field, value) {
            Some(updated) => {
                *user = updated;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
