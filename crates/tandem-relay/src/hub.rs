use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};

pub type MemberId = u64;

/// Frames queued for one hub member's socket writer.
pub type MemberSender = mpsc::Sender<String>;

/// One bus topic: every connected server instance subscribed to it.
struct Topic {
    members: HashMap<MemberId, MemberSender>,
}

impl Topic {
    fn new() -> Self {
        Self {
            members: HashMap::new(),
        }
    }

    /// Forward a frame to every member but the sender.
    fn forward_except(&self, sender: MemberId, frame: &str) -> usize {
        let mut delivered = 0;
        for (&id, tx) in &self.members {
            if id == sender {
                continue;
            }
            match tx.try_send(frame.to_string()) {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!(member = id, error = %e, "Dropping frame for hub member"),
            }
        }
        delivered
    }
}

/// All topics on this hub. Topics exist only while they have members.
pub struct HubState {
    topics: HashMap<String, Topic>,
    max_topics: usize,
    next_id: MemberId,
}

impl HubState {
    pub fn new(max_topics: usize) -> Self {
        Self {
            topics: HashMap::new(),
            max_topics,
            next_id: 1,
        }
    }

    /// Join a topic, creating it if needed. Returns the member id.
    pub fn join(&mut self, topic: &str, tx: MemberSender) -> Result<MemberId, String> {
        if !self.topics.contains_key(topic) && self.topics.len() >= self.max_topics {
            return Err("Maximum topic limit reached".to_string());
        }
        let id = self.next_id;
        self.next_id += 1;
        self.topics
            .entry(topic.to_string())
            .or_insert_with(Topic::new)
            .members
            .insert(id, tx);
        Ok(id)
    }

    /// Remove a member. Returns true if the topic was destroyed.
    pub fn leave(&mut self, topic: &str, member: MemberId) -> bool {
        if let Some(t) = self.topics.get_mut(topic) {
            t.members.remove(&member);
            if t.members.is_empty() {
                self.topics.remove(topic);
                return true;
            }
        }
        false
    }

    pub fn fan_out(&self, topic: &str, sender: MemberId, frame: &str) -> usize {
        self.topics
            .get(topic)
            .map_or(0, |t| t.forward_except(sender, frame))
    }

    pub fn topic_exists(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    pub fn member_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, |t| t.members.len())
    }
}

pub type SharedHubState = Arc<RwLock<HubState>>;
