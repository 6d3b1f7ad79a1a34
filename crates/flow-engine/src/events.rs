//! Event Emitter (§4.J): best-effort, non-blocking progress events streamed
//! out of a run. A slow or absent subscriber must never stall execution.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted { run_id: String },
    RunCompleted { run_id: String, output: Value },
    RunFailed { run_id: String, error: String },
    StepStarted { run_id: String, step_id: String },
    StepCompleted { run_id: String, step_id: String, port: String, output: Value },
    StepFailed { run_id: String, step_id: String, error: String },
    ToolCall { run_id: String, step_id: String, tool: String, input: Value },
    ToolResult { run_id: String, step_id: String, tool: String, output: Value },
    PartialText { run_id: String, step_id: String, text: String },
    Thinking { run_id: String, step_id: String, text: String },
    Progress { run_id: String, message: String },
}

impl RunEvent {
    pub fn run_id(&self) -> &str {
        match self {
            RunEvent::RunStarted { run_id }
            | RunEvent::RunCompleted { run_id, .. }
            | RunEvent::RunFailed { run_id, .. }
            | RunEvent::StepStarted { run_id, .. }
            | RunEvent::StepCompleted { run_id, .. }
            | RunEvent::StepFailed { run_id, .. }
            | RunEvent::ToolCall { run_id, .. }
            | RunEvent::ToolResult { run_id, .. }
            | RunEvent::PartialText { run_id, .. }
            | RunEvent::Thinking { run_id, .. }
            | RunEvent::Progress { run_id, .. } => run_id,
        }
    }
}

/// A sink events are pushed into. Implementors must not block or panic on a
/// full/closed channel — emission is always best-effort.
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: RunEvent);
    fn close(&self);
}

/// Bounded single-channel sink: drops the event rather than blocking the
/// caller when the receiver is slow or gone.
pub struct ChannelEventEmitter {
    sender: broadcast::Sender<RunEvent>,
}

impl ChannelEventEmitter {
    pub fn new(capacity: usize) -> (Self, broadcast::Receiver<RunEvent>) {
        let (sender, receiver) = broadcast::channel(capacity);
        (Self { sender }, receiver)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }
}

impl EventEmitter for ChannelEventEmitter {
    fn emit(&self, event: RunEvent) {
        // broadcast::Sender::send only errors when there are no receivers;
        // dropping the event in that case is the whole point of best-effort emission.
        let _ = self.sender.send(event);
    }

    fn close(&self) {
        // Dropping the sender's clones happens naturally once the emitter is
        // dropped; there is nothing else to tear down for a broadcast channel.
    }
}

/// Drops every event. The default when a caller doesn't care about progress streaming.
pub struct NullEventEmitter;

impl EventEmitter for NullEventEmitter {
    fn emit(&self, _event: RunEvent) {}
    fn close(&self) {}
}

/// Fans a single emit out to every child emitter.
pub struct CompositeEventEmitter {
    children: Vec<Arc<dyn EventEmitter>>,
}

impl CompositeEventEmitter {
    pub fn new(children: Vec<Arc<dyn EventEmitter>>) -> Self {
        Self { children }
    }
}

impl EventEmitter for CompositeEventEmitter {
    fn emit(&self, event: RunEvent) {
        for child in &self.children {
            child.emit(event.clone());
        }
    }

    fn close(&self) {
        for child in &self.children {
            child.close();
        }
    }
}

/// Publish/subscribe broadcaster keyed by Run ID: any number of subscribers
/// may attach to the same run, each gets every event emitted for it, and a
/// subscription built with a cancellation token stops yielding events (and
/// drops its receiver, unsubscribing) once that token fires.
///
/// One `EventEmitter` instance serves every run; the per-run channel is
/// created lazily on first emit or first subscribe and is never pruned
/// automatically — callers that want to bound memory should call
/// `close_run` once a run's lifecycle is known complete.
pub struct RunKeyedBroadcaster {
    channels: Mutex<HashMap<String, broadcast::Sender<RunEvent>>>,
    capacity: usize,
}

impl RunKeyedBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    fn sender_for(&self, run_id: &str) -> broadcast::Sender<RunEvent> {
        let mut channels = self.channels.lock();
        channels
            .entry(run_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Subscribes to `run_id`'s events. The subscription stops yielding
    /// events once `cancel` fires; dropping it unsubscribes the underlying
    /// broadcast receiver.
    pub fn subscribe(&self, run_id: &str, cancel: CancellationToken) -> RunSubscription {
        RunSubscription {
            receiver: self.sender_for(run_id).subscribe(),
            cancel,
        }
    }

    /// Drops `run_id`'s channel. Existing subscriptions keep their own
    /// receiver and continue to drain any events already queued.
    pub fn close_run(&self, run_id: &str) {
        self.channels.lock().remove(run_id);
    }
}

impl EventEmitter for RunKeyedBroadcaster {
    fn emit(&self, event: RunEvent) {
        let sender = self.sender_for(event.run_id());
        let _ = sender.send(event);
    }

    fn close(&self) {
        self.channels.lock().clear();
    }
}

/// A subscription to one run's events, auto-unsubscribing on cancellation.
pub struct RunSubscription {
    receiver: broadcast::Receiver<RunEvent>,
    cancel: CancellationToken,
}

impl RunSubscription {
    /// Waits for the next event, or `None` once `cancel` fires or the
    /// channel is closed.
    pub async fn recv(&mut self) -> Option<RunEvent> {
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            result = self.receiver.recv() => result.ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_emitter_delivers_to_subscriber() {
        let (emitter, mut rx) = ChannelEventEmitter::new(8);
        emitter.emit(RunEvent::RunStarted { run_id: "r1".to_string() });
        let event = rx.try_recv().unwrap();
        matches!(event, RunEvent::RunStarted { .. });
    }

    #[test]
    fn channel_emitter_does_not_panic_with_no_subscribers() {
        let (emitter, _rx) = ChannelEventEmitter::new(8);
        drop(_rx);
        emitter.emit(RunEvent::Progress { run_id: "r1".to_string(), message: "ok".to_string() });
    }

    #[test]
    fn composite_emitter_fans_out_to_all_children() {
        let (e1, mut rx1) = ChannelEventEmitter::new(8);
        let (e2, mut rx2) = ChannelEventEmitter::new(8);
        let composite = CompositeEventEmitter::new(vec![Arc::new(e1), Arc::new(e2)]);
        composite.emit(RunEvent::Progress { run_id: "r1".to_string(), message: "go".to_string() });
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn run_keyed_broadcaster_delivers_to_every_subscriber_of_that_run() {
        let broadcaster = RunKeyedBroadcaster::new(8);
        let mut sub_a = broadcaster.subscribe("r1", CancellationToken::new());
        let mut sub_b = broadcaster.subscribe("r1", CancellationToken::new());
        let mut other_run = broadcaster.subscribe("r2", CancellationToken::new());

        broadcaster.emit(RunEvent::RunStarted { run_id: "r1".to_string() });

        assert!(matches!(sub_a.recv().await, Some(RunEvent::RunStarted { .. })));
        assert!(matches!(sub_b.recv().await, Some(RunEvent::RunStarted { .. })));
        assert!(other_run.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn run_keyed_broadcaster_unsubscribes_once_cancelled() {
        let broadcaster = RunKeyedBroadcaster::new(8);
        let cancel = CancellationToken::new();
        let mut sub = broadcaster.subscribe("r1", cancel.clone());

        cancel.cancel();
        assert_eq!(sub.recv().await, None);
    }
}
