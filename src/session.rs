use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

use serde::{Deserialize, Serialize};

/// Messages kept per session before the oldest are dropped.
pub const MAX_SESSION_MESSAGES: usize = 20;
/// Messages rendered into a prompt by default.
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    fn label(self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Assistant => "ASSISTANT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// Conversation history keyed by session id.
///
/// Implementations decide where the history lives; callers only see
/// append, read and clear.
pub trait SessionStore: Send + Sync {
    fn append(&self, session: &str, role: Role, content: &str);

    /// The most recent `limit` messages, oldest first.
    fn recent(&self, session: &str, limit: usize) -> Vec<Message>;

    fn clear(&self, session: &str);

    /// Recent messages as `ROLE: content` lines.
    fn render(&self, session: &str, limit: usize) -> String {
        self.recent(session, limit)
            .iter()
            .map(|m| format!("{}: {}", m.role.label(), m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Process-local store. Each session keeps at most `capacity` messages.
#[derive(Debug)]
pub struct InMemorySessionStore {
    capacity: usize,
    sessions: Mutex<HashMap<String, VecDeque<Message>>>,
}

impl InMemorySessionStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn with_sessions<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, VecDeque<Message>>) -> T,
    ) -> T {
        // A panic while holding the lock cannot leave a half-written
        // message behind, so a poisoned map is still usable.
        let mut guard = self
            .sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new(MAX_SESSION_MESSAGES)
    }
}

impl SessionStore for InMemorySessionStore {
    fn append(&self, session: &str, role: Role, content: &str) {
        let capacity = self.capacity;
        self.with_sessions(|sessions| {
            let history = sessions.entry(session.to_string()).or_default();
            history.push_back(Message {
                role,
                content: content.to_string(),
            });
            while history.len() > capacity {
                history.pop_front();
            }
        });
    }

    fn recent(&self, session: &str, limit: usize) -> Vec<Message> {
        self.with_sessions(|sessions| {
            sessions
                .get(session)
                .map(|history| {
                    let skip = history.len().saturating_sub(limit);
                    history.iter().skip(skip).cloned().collect()
                })
                .unwrap_or_default()
        })
    }

    fn clear(&self, session: &str) {
        self.with_sessions(|sessions| {
            sessions.remove(session);
        });
    }
}
