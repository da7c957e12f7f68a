//! File-based turn log: one JSON-lines file per conversation.
//!
//! Each line is a JSON-encoded [`Message`]. Turns are appended, never
//! rewritten, so a crash mid-turn leaves every earlier turn intact. The
//! rolling summary lives next to the log in `<conversation>.summary`.
//!
//! Storage location: `~/.aegis/conversations/`

use async_trait::async_trait;
use aegis_core::error::StoreError;
use aegis_core::message::{ConversationId, Message};
use aegis_core::store::MessageStore;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub struct FileMessageStore {
    dir: PathBuf,
    /// Serializes appends so lines from concurrent turns never interleave
    write_lock: Mutex<()>,
}

impl FileMessageStore {
    /// Store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        debug!(dir = %dir.display(), "File message store opened");
        Self {
            dir,
            write_lock: Mutex::new(()),
        }
    }

    /// Default directory: `~/.aegis/conversations`
    pub fn default_dir() -> PathBuf {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".aegis").join("conversations")
    }

    fn log_path(&self, conversation: &ConversationId) -> PathBuf {
        self.dir.join(format!("{}.jsonl", file_stem(conversation)))
    }

    fn summary_path(&self, conversation: &ConversationId) -> PathBuf {
        self.dir.join(format!("{}.summary", file_stem(conversation)))
    }

    fn ensure_dir(&self) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            StoreError::Storage(format!("Failed to create conversation directory: {e}"))
        })
    }
}

/// Conversation ids may contain characters that are not safe in file names.
fn file_stem(conversation: &ConversationId) -> String {
    conversation
        .as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn load_log(path: &Path) -> Vec<Message> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return Vec::new(),
    };

    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<Message>(line) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!(error = %e, path = %path.display(), "Skipping corrupted turn");
                None
            }
        })
        .collect()
}

#[async_trait]
impl MessageStore for FileMessageStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn append(&self, conversation: &ConversationId, message: Message) -> Result<(), StoreError> {
        let line = serde_json::to_string(&message)
            .map_err(|e| StoreError::Storage(format!("Failed to serialize turn: {e}")))?;

        let _guard = self.write_lock.lock().await;
        self.ensure_dir()?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(conversation))
            .map_err(|e| StoreError::Storage(format!("Failed to open turn log: {e}")))?;
        writeln!(file, "{line}")
            .map_err(|e| StoreError::Storage(format!("Failed to write turn: {e}")))?;
        Ok(())
    }

    async fn history(&self, conversation: &ConversationId) -> Result<Vec<Message>, StoreError> {
        Ok(load_log(&self.log_path(conversation)))
    }

    async fn summary(&self, conversation: &ConversationId) -> Result<Option<String>, StoreError> {
        match std::fs::read_to_string(self.summary_path(conversation)) {
            Ok(summary) => Ok(Some(summary)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Storage(format!("Failed to read summary: {e}"))),
        }
    }

    async fn set_summary(&self, conversation: &ConversationId, summary: String) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.ensure_dir()?;
        std::fs::write(self.summary_path(conversation), summary)
            .map_err(|e| StoreError::Storage(format!("Failed to write summary: {e}")))
    }
}
