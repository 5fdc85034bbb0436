//! Platform events: streaming subscriber with a durable replay offset, and
//! a publisher.

pub mod publisher;
pub mod replay;
pub mod subscriber;

pub use publisher::PlatformEventPublisher;
pub use subscriber::PlatformEventSubscriber;

/// Streaming channel for an event object.
pub fn event_channel(event_object: &str) -> String {
    format!("/event/{}", event_object)
}
