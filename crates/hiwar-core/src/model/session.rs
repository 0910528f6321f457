use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Message, Role};

pub const MAX_TITLE_LENGTH: usize = 200;

/// Title given to sessions created without one. Replaced by a derived
/// title when the first user message arrives.
pub const DEFAULT_SESSION_TITLE: &str = "New conversation";

/// An ordered conversation. Owns its messages; no message is shared
/// across sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    #[serde(default = "Uuid::now_v7")]
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        let title = title.into();
        Self {
            id: Uuid::now_v7(),
            title: if title.trim().is_empty() {
                DEFAULT_SESSION_TITLE.to_string()
            } else {
                truncate_title(&title)
            },
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a message, deriving a title from the first user message if
    /// the session still carries the placeholder title.
    pub fn push_message(&mut self, message: Message) {
        if self.title == DEFAULT_SESSION_TITLE && message.role == Role::User {
            self.title = title_from_content(&message.content);
        }
        self.messages.push(message);
        self.touch();
    }

    /// Empty the message list in place. The session stays in the set.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.touch();
    }

    pub fn rename(&mut self, title: &str) {
        let trimmed = title.trim();
        if trimmed.is_empty() {
            return;
        }
        self.title = truncate_title(trimmed);
        self.touch();
    }

    /// Sum of provider-reported token counts. Missing counts are zero.
    pub fn total_tokens(&self) -> u64 {
        self.messages
            .iter()
            .filter_map(|m| m.token_count)
            .map(u64::from)
            .sum()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Derive a display title from message content: first line, trimmed,
/// truncated on a char boundary with an ellipsis.
pub fn title_from_content(content: &str) -> String {
    const DERIVED_TITLE_LENGTH: usize = 40;

    let first_line = content.trim().lines().next().unwrap_or("").trim();
    if first_line.is_empty() {
        return DEFAULT_SESSION_TITLE.to_string();
    }
    if first_line.chars().count() <= DERIVED_TITLE_LENGTH {
        return first_line.to_string();
    }
    let cut: String = first_line.chars().take(DERIVED_TITLE_LENGTH).collect();
    format!("{}…", cut.trim_end())
}

fn truncate_title(title: &str) -> String {
    if title.chars().count() <= MAX_TITLE_LENGTH {
        title.to_string()
    } else {
        title.chars().take(MAX_TITLE_LENGTH).collect()
    }
}
