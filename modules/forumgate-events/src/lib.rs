//! At-least-once topic/subscription event bus.
//!
//! Publishers append opaque JSON payloads to a topic; every subscription on
//! that topic gets its own delivery with an attempt counter. Handlers settle
//! each delivery with an [`Ack`]; retryable failures are redelivered until
//! the subscription's retry budget is spent, then dead-lettered.
//!
//! Zero knowledge of forum posts or classification.

pub mod bus;
pub mod dispatch;
pub mod memory;
pub mod store;

pub use bus::{publish_json, Delivery, DeliverySource, EventBus, Settlement, Subscription};
pub use dispatch::{
    run_subscription, run_until_idle, settle, subscribe_all, Ack, DeliveryHandler,
};
pub use memory::MemoryEventBus;
pub use store::PgEventBus;
