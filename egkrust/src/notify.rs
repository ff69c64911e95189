//! Progress notifications
//!
//! A [`NotificationSink`] receives what a user interface needs while a card
//! is read: progress messages, error reports naming the failing step, and
//! the finished record.

use tokio::sync::mpsc;
use tracing::{info, trace, warn};

use egkrust_types::EgkCardData;

/// Receiver of session notifications
///
/// Called from the task running the read; implementations must not block.
pub trait NotificationSink: Send + Sync {
    /// Progress message
    fn log(&self, message: &str);

    /// Fatal or non-fatal failure of a step
    fn error(&self, message: &str);

    /// Emitted once when a read reaches `Done`
    fn card_data_read(&self, data: &EgkCardData);
}

/// Sink that forwards notifications to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn log(&self, message: &str) {
        info!("{}", message);
    }

    fn error(&self, message: &str) {
        warn!("{}", message);
    }

    fn card_data_read(&self, data: &EgkCardData) {
        info!("Card data read: {}", data);
    }
}

/// Notification as delivered by [`ChannelSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Log(String),
    Error(String),
    CardDataRead(EgkCardData),
}

/// Sink that sends notifications over a channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver for its events
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            trace!("Session event dropped, receiver closed");
        }
    }
}

impl NotificationSink for ChannelSink {
    fn log(&self, message: &str) {
        self.send(SessionEvent::Log(message.to_string()));
    }

    fn error(&self, message: &str) {
        self.send(SessionEvent::Error(message.to_string()));
    }

    fn card_data_read(&self, data: &EgkCardData) {
        self.send(SessionEvent::CardDataRead(data.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_channel_sink_order() {
        let (sink, mut rx) = ChannelSink::new();
        let mut data = EgkCardData::new();
        data.surname = Some("Mustermann".into());

        sink.log("Step 1/10: reset card terminal");
        sink.error("ReadEfAtr failed (continuing)");
        sink.card_data_read(&data);

        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::Log("Step 1/10: reset card terminal".into())
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::Error("ReadEfAtr failed (continuing)".into())
        );
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::CardDataRead(data));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_channel_sink_closed_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.log("nobody listening");
    }
}
