use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use ordis_core::error::{OrdisError, Result};
use ordis_core::event::EventBus;
use ordis_core::types::{ChannelMessage, RoutedMessage, RuntimeEvent, SessionId};
use ordis_eventlog::{EventLog, EventLogEntry};

/// Source of channel → agent bindings. Resolved per message, so a reloading
/// implementation makes config changes take effect without a restart.
pub trait BindingSource: Send + Sync + 'static {
    fn resolve(&self, message: &ChannelMessage) -> Option<String>;
}

impl<F> BindingSource for F
where
    F: Fn(&ChannelMessage) -> Option<String> + Send + Sync + 'static,
{
    fn resolve(&self, message: &ChannelMessage) -> Option<String> {
        self(message)
    }
}

/// Consumer of routed messages; the turn engine sits behind this seam.
pub trait MessageProcessor: Send + Sync + 'static {
    fn process(&self, message: RoutedMessage) -> BoxFuture<'static, ()>;
}

impl<F> MessageProcessor for F
where
    F: Fn(RoutedMessage) -> BoxFuture<'static, ()> + Send + Sync + 'static,
{
    fn process(&self, message: RoutedMessage) -> BoxFuture<'static, ()> {
        self(message)
    }
}

/// Routes channel messages to agents through a bounded FIFO queue.
///
/// One drainer is active at a time, so messages for a `(channel, sender)`
/// pair are processed in arrival order. On overflow the oldest queued
/// message is dropped in favor of the new one (back-pressure prefers
/// recency for interactive use), and every drop is recorded.
pub struct ChannelRouter {
    bindings: Arc<dyn BindingSource>,
    processor: Arc<dyn MessageProcessor>,
    queue: Mutex<VecDeque<RoutedMessage>>,
    capacity: usize,
    draining: AtomicBool,
    event_log: Arc<EventLog>,
    bus: Arc<EventBus>,
}

impl ChannelRouter {
    pub fn new(
        bindings: Arc<dyn BindingSource>,
        processor: Arc<dyn MessageProcessor>,
        event_log: Arc<EventLog>,
        bus: Arc<EventBus>,
        capacity: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            bindings,
            processor,
            queue: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            draining: AtomicBool::new(false),
            event_log,
            bus,
        })
    }

    /// Resolve the message to an agent, enqueue it, and make sure a drainer
    /// is running.
    pub fn dispatch(self: &Arc<Self>, message: ChannelMessage) -> Result<()> {
        // Bindings are re-resolved on every message.
        let agent_id = self.bindings.resolve(&message).ok_or_else(|| {
            let err = OrdisError::Channel {
                channel: message.channel.clone(),
                message: format!("no agent bound for sender '{}'", message.sender),
            };
            self.record_system(serde_json::json!({
                "unroutable": {"channel": message.channel, "sender": message.sender},
            }));
            err
        })?;

        let routed = RoutedMessage {
            session_id: SessionId::for_pair(&message.channel, &message.sender),
            agent_id,
            received_at: Utc::now(),
            message,
        };

        {
            let mut queue = self.queue.lock().expect("router queue lock");
            if queue.len() >= self.capacity {
                if let Some(dropped) = queue.pop_front() {
                    warn!(
                        channel = %dropped.message.channel,
                        sender = %dropped.message.sender,
                        "Queue full, dropping oldest message"
                    );
                    self.bus.publish(RuntimeEvent::MessageDropped {
                        channel: dropped.message.channel.clone(),
                        sender: dropped.message.sender.clone(),
                    });
                    self.record_system(serde_json::json!({
                        "dropped": {
                            "channel": dropped.message.channel,
                            "sender": dropped.message.sender,
                            "received_at": dropped.received_at.to_rfc3339(),
                        },
                    }));
                }
            }
            queue.push_back(routed);
        }

        self.ensure_drainer();
        Ok(())
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().expect("router queue lock").len()
    }

    /// Spawn the drain loop unless one is already active. The flag prevents
    /// re-entrancy; the post-drain re-check closes the race where a message
    /// lands just as the previous drainer exits.
    fn ensure_drainer(self: &Arc<Self>) {
        if self.draining.swap(true, Ordering::SeqCst) {
            return;
        }
        let router = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                loop {
                    let next = router.queue.lock().expect("router queue lock").pop_front();
                    let Some(routed) = next else { break };
                    debug!(
                        channel = %routed.message.channel,
                        agent = %routed.agent_id,
                        "Processing routed message"
                    );
                    router.processor.process(routed).await;
                }

                router.draining.store(false, Ordering::SeqCst);
                let refill = !router.queue.lock().expect("router queue lock").is_empty();
                if refill && !router.draining.swap(true, Ordering::SeqCst) {
                    continue;
                }
                break;
            }
        });
        info!("Router drainer started");
    }

    fn record_system(&self, detail: serde_json::Value) {
        if let Err(e) = self.event_log.insert(EventLogEntry::system("router", detail)) {
            warn!(error = %e, "Failed to record router event");
        }
    }
}
