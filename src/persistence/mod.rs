//! Chat persistence: store UI message histories by chat id.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};

use crate::error::BraidError;
use crate::ui::{UiFinishEvent, UiFinishHook, UiMessage};
use crate::util::lock;

/// Storage for chat histories.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Messages of a chat, or `None` if it was never saved.
    async fn load_chat(&self, chat_id: &str) -> Result<Option<Vec<UiMessage>>, BraidError>;

    /// Replace the stored messages of a chat.
    async fn save_chat(&self, chat_id: &str, messages: &[UiMessage]) -> Result<(), BraidError>;

    /// Delete a chat. Deleting an unknown chat is not an error.
    async fn delete_chat(&self, chat_id: &str) -> Result<(), BraidError>;
}

/// Process-local store, mostly for tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryChatStore {
    chats: Arc<Mutex<HashMap<String, Vec<UiMessage>>>>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn load_chat(&self, chat_id: &str) -> Result<Option<Vec<UiMessage>>, BraidError> {
        Ok(lock(&self.chats).get(chat_id).cloned())
    }

    async fn save_chat(&self, chat_id: &str, messages: &[UiMessage]) -> Result<(), BraidError> {
        lock(&self.chats).insert(chat_id.to_string(), messages.to_vec());
        Ok(())
    }

    async fn delete_chat(&self, chat_id: &str) -> Result<(), BraidError> {
        lock(&self.chats).remove(chat_id);
        Ok(())
    }
}

/// One JSON file per chat under a base directory.
///
/// # Example
/// ```no_run
/// use braid::persistence::{ChatStore, FileChatStore};
/// use braid::ui::UiMessage;
///
/// # async fn example() -> Result<(), braid::error::BraidError> {
/// let store = FileChatStore::new_default();
/// store.save_chat("support", &[UiMessage::user("Hello")]).await?;
/// let messages = store.load_chat("support").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FileChatStore {
    base_dir: PathBuf,
}

impl FileChatStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// `~/.braid/chats`.
    pub fn new_default() -> Self {
        Self::new(default_chat_dir())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn chat_path(&self, chat_id: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", normalize_label(chat_id)))
    }
}

#[async_trait]
impl ChatStore for FileChatStore {
    async fn load_chat(&self, chat_id: &str) -> Result<Option<Vec<UiMessage>>, BraidError> {
        let path = self.chat_path(chat_id);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let file: ChatFile = serde_json::from_str(&raw)?;
        if file.version != CHAT_FILE_VERSION {
            return Err(BraidError::InvalidState(format!(
                "chat file {} has unsupported version {}",
                path.display(),
                file.version
            )));
        }
        Ok(Some(file.messages))
    }

    async fn save_chat(&self, chat_id: &str, messages: &[UiMessage]) -> Result<(), BraidError> {
        let path = self.chat_path(chat_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = ChatFile {
            version: CHAT_FILE_VERSION,
            chat_id: chat_id.to_string(),
            messages: messages.to_vec(),
            saved_at: Utc::now(),
        };
        let serialized = serde_json::to_string_pretty(&file)?;
        // Atomic replace.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serialized).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::debug!(chat_id, path = %path.display(), messages = messages.len(), "saved chat");
        Ok(())
    }

    async fn delete_chat(&self, chat_id: &str) -> Result<(), BraidError> {
        match tokio::fs::remove_file(self.chat_path(chat_id)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

const CHAT_FILE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatFile {
    version: u32,
    chat_id: String,
    messages: Vec<UiMessage>,
    saved_at: DateTime<Utc>,
}

/// A UI finish hook that saves the final message list under `chat_id`.
pub fn persist_on_finish(store: Arc<dyn ChatStore>, chat_id: impl Into<String>) -> UiFinishHook {
    let chat_id = chat_id.into();
    Arc::new(move |event: UiFinishEvent| {
        let store = store.clone();
        let chat_id = chat_id.clone();
        async move { store.save_chat(&chat_id, &event.messages).await }.boxed()
    })
}

fn default_chat_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".braid").join("chats"))
        .unwrap_or_else(|| PathBuf::from(".braid").join("chats"))
}

fn normalize_label(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "default".to_string();
    }
    let out: String = trimmed
        .chars()
        .map(|ch| {
            let lower = ch.to_ascii_lowercase();
            if lower.is_ascii_alphanumeric() || lower == '-' || lower == '_' {
                lower
            } else {
                '-'
            }
        })
        .collect();
    if out.trim_matches('-').is_empty() {
        "default".to_string()
    } else {
        out
    }
}
