pub mod broker;
pub mod event;
pub mod publisher;
#[cfg(test)]
mod tests;

pub use broker::{create_message_broker, EventCallback, MessageBroker, MessageBrokerTrait};
pub use event::{EventMessage, EventType};
pub use publisher::EventPublisher;
