//! Events passed between the long-lived loops.
//!
//! # Event Flow
//!
//! 1. The listener's confirmed and realtime tracks dispatch logs to handlers and
//!    push a `ListenerEvent` per log to the listener's dispatch loop
//! 2. The matching engine, the catch-up worker and the order cleaner emit
//!    `WebhookEvent` -> `WebhookSender`

pub mod channels;
pub mod types;

pub use channels::{
    DEFAULT_CHANNEL_BUFFER, ListenerEventReceiver, ListenerEventSender, WebhookEventReceiver,
    WebhookEventSender, listener_event_channel, webhook_event_channel,
};

pub use types::{HandlerKind, ListenerEvent, TransferOutcome, WebhookEvent};
