use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use ordis_core::types::{Message, SessionId};

use crate::compactor::jaccard_words;

/// One conversation for a `(channel, sender)` pair.
///
/// The session exclusively owns its message sequence; appends clamp
/// timestamps so they are non-decreasing in order.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub channel: String,
    pub sender: String,
    pub agent_id: String,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    messages: Vec<Message>,
}

impl Session {
    fn new(id: SessionId, channel: &str, sender: &str, agent_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id,
            channel: channel.to_string(),
            sender: sender.to_string(),
            agent_id: agent_id.to_string(),
            started_at: now,
            last_activity: now,
            messages: Vec::new(),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn append(&mut self, mut message: Message) {
        if let Some(last) = self.messages.last() {
            if message.timestamp < last.timestamp {
                message.timestamp = last.timestamp;
            }
        }
        message.session_id = Some(self.id.clone());
        self.last_activity = Utc::now();
        self.messages.push(message);
    }
}

/// Stable user statements distilled from prior sessions, deduplicated by
/// word-set similarity.
#[derive(Default)]
pub struct FactStore {
    facts: Mutex<Vec<String>>,
}

impl FactStore {
    pub fn add(&self, candidates: &[String]) -> usize {
        let mut facts = self.facts.lock().expect("fact store lock");
        let mut added = 0;
        for candidate in candidates {
            let duplicate = facts.iter().any(|f| jaccard_words(f, candidate) >= 0.7);
            if !duplicate {
                facts.push(candidate.clone());
                added += 1;
            }
        }
        added
    }

    pub fn all(&self) -> Vec<String> {
        self.facts.lock().expect("fact store lock").clone()
    }
}

/// Creates sessions on first message per `(channel, sender)` pair and
/// archives them once idle beyond the threshold. Archived sessions are
/// never mutated again; the next message for the pair opens a fresh one.
pub struct SessionManager {
    live: Mutex<HashMap<String, Arc<AsyncMutex<Session>>>>,
    archived: Mutex<Vec<Session>>,
    generations: Mutex<HashMap<String, u64>>,
    idle_threshold: Duration,
    facts: FactStore,
}

impl SessionManager {
    pub fn new(idle_threshold_secs: u64) -> Self {
        Self {
            live: Mutex::new(HashMap::new()),
            archived: Mutex::new(Vec::new()),
            generations: Mutex::new(HashMap::new()),
            idle_threshold: Duration::seconds(idle_threshold_secs as i64),
            facts: FactStore::default(),
        }
    }

    pub fn facts(&self) -> &FactStore {
        &self.facts
    }

    /// The live session for a pair, created on first use.
    pub fn session_for(
        &self,
        channel: &str,
        sender: &str,
        agent_id: &str,
    ) -> Arc<AsyncMutex<Session>> {
        let key = format!("{}:{}", channel, sender);
        let mut live = self.live.lock().expect("session map lock");
        if let Some(session) = live.get(&key) {
            return Arc::clone(session);
        }

        let generation = {
            let mut generations = self.generations.lock().expect("generation lock");
            let counter = generations.entry(key.clone()).or_insert(0);
            *counter += 1;
            *counter
        };
        let id = if generation == 1 {
            SessionId::for_pair(channel, sender)
        } else {
            SessionId::from_string(format!("{}:{}#{}", channel, sender, generation))
        };

        debug!(session = %id, "Creating session");
        let session = Arc::new(AsyncMutex::new(Session::new(id, channel, sender, agent_id)));
        live.insert(key, Arc::clone(&session));
        session
    }

    /// Move sessions idle beyond the threshold into the archive.
    /// Returns the number archived. Sessions with a turn in flight hold the
    /// session lock, so try_lock skips them until they quiesce.
    pub fn archive_idle(&self) -> usize {
        let cutoff = Utc::now() - self.idle_threshold;
        let mut live = self.live.lock().expect("session map lock");
        let mut archived = self.archived.lock().expect("archive lock");

        let mut to_remove = Vec::new();
        for (key, session) in live.iter() {
            if let Ok(guard) = session.try_lock() {
                if guard.last_activity < cutoff {
                    to_remove.push(key.clone());
                    archived.push(guard.clone());
                }
            }
        }
        for key in &to_remove {
            live.remove(key);
        }
        if !to_remove.is_empty() {
            info!(count = to_remove.len(), "Archived idle sessions");
        }
        to_remove.len()
    }

    pub fn archived_count(&self) -> usize {
        self.archived.lock().expect("archive lock").len()
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().expect("session map lock").len()
    }
}
