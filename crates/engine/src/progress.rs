//! Progress events
//!
//! The orchestrator reports every phase boundary to a [`ProgressSink`].
//! Rendering is left entirely to the consumer; the CLI drains a
//! [`ChannelProgressSink`] into a spinner.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::orchestrator::ResetPhase;

/// A phase-boundary notification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub phase: ResetPhase,
    pub detail: String,
    /// Estimated duration of the step that just started
    pub estimate: Option<Duration>,
}

impl ProgressEvent {
    pub fn new(phase: ResetPhase, detail: impl Into<String>) -> Self {
        Self {
            phase,
            detail: detail.into(),
            estimate: None,
        }
    }

    pub fn with_estimate(mut self, estimate: Duration) -> Self {
        self.estimate = Some(estimate);
        self
    }
}

/// Receiver of phase-boundary events
pub trait ProgressSink: Send + Sync {
    fn on_phase(&self, phase: ResetPhase, detail: &str);

    /// Full event including the duration estimate
    fn on_event(&self, event: &ProgressEvent) {
        self.on_phase(event.phase, &event.detail);
    }
}

/// Forwards events into an unbounded tokio channel
#[derive(Debug, Clone)]
pub struct ChannelProgressSink {
    sender: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelProgressSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ProgressSink for ChannelProgressSink {
    fn on_phase(&self, phase: ResetPhase, detail: &str) {
        self.on_event(&ProgressEvent::new(phase, detail));
    }

    fn on_event(&self, event: &ProgressEvent) {
        // A dropped receiver only means nobody is rendering any more
        let _ = self.sender.send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_delivers_events_in_order() {
        let (sink, mut receiver) = ChannelProgressSink::new();

        sink.on_phase(ResetPhase::Validating, "checking connection");
        sink.on_event(
            &ProgressEvent::new(ResetPhase::Dropping, "3 batches").with_estimate(Duration::from_secs(2)),
        );
        drop(sink);

        let first = receiver.recv().await.unwrap();
        assert_eq!(first.phase, ResetPhase::Validating);
        assert_eq!(first.estimate, None);

        let second = receiver.recv().await.unwrap();
        assert_eq!(second.detail, "3 batches");
        assert_eq!(second.estimate, Some(Duration::from_secs(2)));

        assert!(receiver.recv().await.is_none());
    }

    #[test]
    fn test_send_after_receiver_dropped_is_ignored() {
        let (sink, receiver) = ChannelProgressSink::new();
        drop(receiver);
        sink.on_phase(ResetPhase::Succeeded, "done");
    }
}
