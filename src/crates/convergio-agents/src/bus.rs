//! Typed inter-agent message bus
//!
//! One bus per process. It owns the global message history (append order,
//! read newest-first), a FIFO pending queue per attached agent, topic
//! subscriptions and a bounded-priority queue. One mutex guards all of it;
//! subscriber callbacks are invoked after the lock is dropped so a handler
//! may call back into the bus without deadlocking.
//!
//! Delivery rules:
//! - direct send enqueues one copy on the recipient's queue,
//! - broadcast (recipient id 0) enqueues a copy on every attached queue
//!   except the sender's,
//! - a recipient with no queue is a silent drop, logged at WARN.

use chrono::{DateTime, Utc};
use convergio_core::AgentId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

/// Kind of message flowing through the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    UserInput,
    AgentThought,
    AgentAction,
    AgentResponse,
    TaskDelegate,
    TaskReport,
    Convergence,
    Error,
}

/// One message, as stored in history and pending queues
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,
    pub msg_type: MessageType,
    pub sender: AgentId,
    /// `BROADCAST` (id 0) addresses every active agent except the sender
    pub recipient: AgentId,
    pub content: String,
    pub metadata: Option<Value>,
    /// Older message this one responds to; threads are the transitive closure
    pub parent_id: Option<u64>,
    pub tokens_used: u64,
    pub timestamp: DateTime<Utc>,
}

/// Everything needed to create a message except the bus-assigned id
#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub msg_type: MessageType,
    pub sender: AgentId,
    pub recipient: AgentId,
    pub content: String,
    pub metadata: Option<Value>,
    pub parent_id: Option<u64>,
    pub tokens_used: u64,
}

impl MessageDraft {
    pub fn new(
        msg_type: MessageType,
        sender: AgentId,
        recipient: AgentId,
        content: impl Into<String>,
    ) -> Self {
        Self {
            msg_type,
            sender,
            recipient,
            content: content.into(),
            metadata: None,
            parent_id: None,
            tokens_used: 0,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_parent(mut self, parent_id: u64) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.tokens_used = tokens;
        self
    }
}

/// Topic subscription callback
pub type TopicHandler = Arc<dyn Fn(&Message) + Send + Sync>;

struct PriorityEntry {
    priority: u8,
    seq: u64,
    message: Message,
}

impl PartialEq for PriorityEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for PriorityEntry {}

impl PartialOrd for PriorityEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PriorityEntry {
    // Higher priority first; FIFO (lower sequence first) within a priority.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct BusState {
    history: Vec<Message>,
    queues: HashMap<AgentId, VecDeque<Message>>,
    subscriptions: HashMap<String, Vec<(AgentId, TopicHandler)>>,
    priority_queue: BinaryHeap<PriorityEntry>,
    next_id: u64,
    next_seq: u64,
}

/// The process-wide message bus
#[derive(Default)]
pub struct MessageBus {
    state: Mutex<BusState>,
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MessageBus")
            .field("history_len", &state.history.len())
            .field("queues", &state.queues.len())
            .finish()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pending queue for an agent; idempotent
    pub fn attach(&self, agent: AgentId) {
        self.state.lock().queues.entry(agent).or_default();
    }

    /// Drop an agent's queue, discarding undelivered messages
    pub fn detach(&self, agent: AgentId) {
        self.state.lock().queues.remove(&agent);
    }

    /// Create and deliver a message; returns the stored copy
    pub fn send(&self, draft: MessageDraft) -> Message {
        let (message, dropped) = {
            let mut state = self.state.lock();
            state.next_id += 1;
            let message = Message {
                id: state.next_id,
                msg_type: draft.msg_type,
                sender: draft.sender,
                recipient: draft.recipient,
                content: draft.content,
                metadata: draft.metadata,
                parent_id: draft.parent_id,
                tokens_used: draft.tokens_used,
                timestamp: Utc::now(),
            };
            state.history.push(message.clone());

            let mut dropped = false;
            if message.recipient.is_broadcast() {
                let sender = message.sender;
                let copy = message.clone();
                for (agent, queue) in state.queues.iter_mut() {
                    if *agent != sender {
                        queue.push_back(copy.clone());
                    }
                }
            } else if let Some(queue) = state.queues.get_mut(&message.recipient) {
                queue.push_back(message.clone());
            } else {
                dropped = true;
            }
            (message, dropped)
        };

        if dropped {
            warn!(
                category = "agent",
                recipient = %message.recipient,
                id = message.id,
                "dropping message for unknown recipient"
            );
        } else {
            debug!(category = "agent", id = message.id, "message delivered");
        }
        message
    }

    /// Async variant of [`send`](Self::send)
    ///
    /// Delivery order follows call order; there is no background queue to
    /// reorder behind the caller's back.
    pub async fn send_async(&self, draft: MessageDraft) -> Message {
        self.send(draft)
    }

    /// Reply to a message: recipient is the original sender, thread linked
    ///
    /// Returns `None` when the parent id is unknown.
    pub fn reply(
        &self,
        parent_id: u64,
        sender: AgentId,
        msg_type: MessageType,
        content: impl Into<String>,
    ) -> Option<Message> {
        let original_sender = {
            let state = self.state.lock();
            state.history.iter().find(|m| m.id == parent_id)?.sender
        };
        Some(self.send(
            MessageDraft::new(msg_type, sender, original_sender, content).with_parent(parent_id),
        ))
    }

    /// Drain an agent's pending queue in FIFO order
    pub fn get_pending(&self, agent: AgentId) -> Vec<Message> {
        let mut state = self.state.lock();
        match state.queues.get_mut(&agent) {
            Some(queue) => queue.drain(..).collect(),
            None => Vec::new(),
        }
    }

    /// Most recent messages, newest first
    pub fn get_history(&self, limit: usize) -> Vec<Message> {
        let state = self.state.lock();
        state.history.iter().rev().take(limit).cloned().collect()
    }

    /// Most recent messages of one type, newest first
    pub fn get_by_type(&self, msg_type: MessageType, limit: usize) -> Vec<Message> {
        let state = self.state.lock();
        state
            .history
            .iter()
            .rev()
            .filter(|m| m.msg_type == msg_type)
            .take(limit)
            .cloned()
            .collect()
    }

    /// The whole thread containing a message, oldest first
    ///
    /// A thread is every message sharing the same root under the transitive
    /// `parent_id` closure.
    pub fn get_thread(&self, id: u64) -> Vec<Message> {
        let state = self.state.lock();
        let by_id: HashMap<u64, &Message> = state.history.iter().map(|m| (m.id, m)).collect();

        let root_of = |mut id: u64| -> u64 {
            let mut hops = 0;
            while let Some(parent) = by_id.get(&id).and_then(|m| m.parent_id) {
                // parent_id always references an older message, but guard
                // against corrupted chains anyway
                if parent >= id || hops > by_id.len() {
                    break;
                }
                id = parent;
                hops += 1;
            }
            id
        };

        let Some(_) = by_id.get(&id) else {
            return Vec::new();
        };
        let root = root_of(id);
        state
            .history
            .iter()
            .filter(|m| root_of(m.id) == root)
            .cloned()
            .collect()
    }

    /// Subscribe a handler to a topic
    pub fn subscribe(&self, topic: impl Into<String>, subscriber: AgentId, handler: TopicHandler) {
        self.state
            .lock()
            .subscriptions
            .entry(topic.into())
            .or_default()
            .push((subscriber, handler));
    }

    /// Remove a subscriber from a topic
    pub fn unsubscribe(&self, topic: &str, subscriber: AgentId) {
        let mut state = self.state.lock();
        if let Some(subs) = state.subscriptions.get_mut(topic) {
            subs.retain(|(agent, _)| *agent != subscriber);
        }
    }

    /// Publish a message to a topic's subscribers
    ///
    /// Handlers run after the bus lock is released; a handler may publish or
    /// send without deadlocking. Returns the number of handlers invoked.
    pub fn publish(&self, topic: &str, message: &Message) -> usize {
        let handlers: Vec<TopicHandler> = {
            let state = self.state.lock();
            state
                .subscriptions
                .get(topic)
                .map(|subs| subs.iter().map(|(_, h)| h.clone()).collect())
                .unwrap_or_default()
        };
        for handler in &handlers {
            handler(message);
        }
        handlers.len()
    }

    /// Enqueue onto the priority queue (0 = lowest, 255 = highest)
    pub fn enqueue_priority(&self, message: Message, priority: u8) {
        let mut state = self.state.lock();
        state.next_seq += 1;
        let seq = state.next_seq;
        state.priority_queue.push(PriorityEntry {
            priority,
            seq,
            message,
        });
    }

    /// Pop the highest-priority message; FIFO within equal priority
    pub fn dequeue_priority(&self) -> Option<Message> {
        self.state.lock().priority_queue.pop().map(|e| e.message)
    }

    /// Current priority-queue depth
    pub fn queue_depth(&self) -> usize {
        self.state.lock().priority_queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn draft(sender: u64, recipient: u64, content: &str) -> MessageDraft {
        MessageDraft::new(
            MessageType::AgentThought,
            AgentId(sender),
            AgentId(recipient),
            content,
        )
    }

    #[test]
    fn test_direct_send_and_drain_fifo() {
        let bus = MessageBus::new();
        bus.attach(AgentId(2));
        bus.send(draft(1, 2, "first"));
        bus.send(draft(1, 2, "second"));

        let pending = bus.get_pending(AgentId(2));
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].content, "first");
        assert_eq!(pending[1].content, "second");
        // Drained
        assert!(bus.get_pending(AgentId(2)).is_empty());
    }

    #[test]
    fn test_broadcast_excludes_sender() {
        let bus = MessageBus::new();
        for id in 1..=3 {
            bus.attach(AgentId(id));
        }
        bus.send(draft(1, 0, "to everyone"));

        assert!(bus.get_pending(AgentId(1)).is_empty());
        assert_eq!(bus.get_pending(AgentId(2)).len(), 1);
        assert_eq!(bus.get_pending(AgentId(3)).len(), 1);
        // One history entry, not one per copy
        assert_eq!(bus.get_history(10).len(), 1);
    }

    #[test]
    fn test_unknown_recipient_is_dropped_but_recorded() {
        let bus = MessageBus::new();
        let msg = bus.send(draft(1, 99, "nobody home"));
        assert_eq!(msg.id, 1);
        assert_eq!(bus.get_history(10).len(), 1);
    }

    #[test]
    fn test_history_newest_first_and_by_type() {
        let bus = MessageBus::new();
        bus.attach(AgentId(2));
        bus.send(draft(1, 2, "a"));
        bus.send(MessageDraft::new(
            MessageType::AgentResponse,
            AgentId(2),
            AgentId(1),
            "b",
        ));

        let history = bus.get_history(10);
        assert_eq!(history[0].content, "b");
        assert_eq!(history[1].content, "a");

        let responses = bus.get_by_type(MessageType::AgentResponse, 10);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].content, "b");
    }

    #[test]
    fn test_reply_links_thread() {
        let bus = MessageBus::new();
        bus.attach(AgentId(1));
        bus.attach(AgentId(2));
        let first = bus.send(draft(1, 2, "question"));
        let reply = bus
            .reply(first.id, AgentId(2), MessageType::AgentResponse, "answer")
            .unwrap();
        assert_eq!(reply.recipient, AgentId(1));
        assert_eq!(reply.parent_id, Some(first.id));

        let reply2 = bus
            .reply(reply.id, AgentId(1), MessageType::AgentThought, "follow-up")
            .unwrap();

        let thread = bus.get_thread(reply2.id);
        let contents: Vec<&str> = thread.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["question", "answer", "follow-up"]);

        // Unrelated messages stay out of the thread
        bus.send(draft(1, 2, "noise"));
        assert_eq!(bus.get_thread(first.id).len(), 3);

        assert!(bus.reply(999, AgentId(1), MessageType::Error, "?").is_none());
    }

    #[test]
    fn test_publish_invokes_handlers_outside_lock() {
        let bus = Arc::new(MessageBus::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let bus_clone = bus.clone();
        let calls_clone = calls.clone();
        bus.subscribe(
            "alerts",
            AgentId(2),
            Arc::new(move |_msg| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                // Reentrancy: would deadlock if invoked under the bus lock
                let _ = bus_clone.get_history(1);
            }),
        );

        let msg = bus.send(draft(1, 99, "alert body"));
        assert_eq!(bus.publish("alerts", &msg), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        bus.unsubscribe("alerts", AgentId(2));
        assert_eq!(bus.publish("alerts", &msg), 0);
    }

    #[test]
    fn test_priority_queue_order_and_fifo_ties() {
        let bus = MessageBus::new();
        let m = |content: &str| Message {
            id: 0,
            msg_type: MessageType::TaskDelegate,
            sender: AgentId(1),
            recipient: AgentId(2),
            content: content.to_string(),
            metadata: None,
            parent_id: None,
            tokens_used: 0,
            timestamp: Utc::now(),
        };

        bus.enqueue_priority(m("low"), 10);
        bus.enqueue_priority(m("high"), 200);
        bus.enqueue_priority(m("mid-a"), 50);
        bus.enqueue_priority(m("mid-b"), 50);
        assert_eq!(bus.queue_depth(), 4);

        let order: Vec<String> = std::iter::from_fn(|| bus.dequeue_priority())
            .map(|m| m.content)
            .collect();
        assert_eq!(order, vec!["high", "mid-a", "mid-b", "low"]);
        assert_eq!(bus.queue_depth(), 0);
    }

    #[tokio::test]
    async fn test_send_async_preserves_order() {
        let bus = MessageBus::new();
        bus.attach(AgentId(2));
        for i in 0..5 {
            bus.send_async(draft(1, 2, &format!("m{i}"))).await;
        }
        let pending = bus.get_pending(AgentId(2));
        let contents: Vec<&str> = pending.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m0", "m1", "m2", "m3", "m4"]);
    }
}
