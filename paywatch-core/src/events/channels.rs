//! Event channel factories and handles.

use super::types::{ListenerEvent, WebhookEvent};
use tokio::sync::mpsc;

/// Default buffer size for event channels.
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

pub type ListenerEventSender = mpsc::Sender<ListenerEvent>;
pub type ListenerEventReceiver = mpsc::Receiver<ListenerEvent>;

pub type WebhookEventSender = mpsc::Sender<WebhookEvent>;
pub type WebhookEventReceiver = mpsc::Receiver<WebhookEvent>;

/// Create a listener dispatch channel.
///
/// The receiver sees `None` once both tracks have dropped their senders.
pub fn listener_event_channel(buffer: usize) -> (ListenerEventSender, ListenerEventReceiver) {
    mpsc::channel(buffer.max(1))
}

/// Create a new WebhookEvent channel.
///
/// One channel is shared by every network; clone the sender per producer.
pub fn webhook_event_channel() -> (WebhookEventSender, WebhookEventReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}
