//! The Delivery Engine: orchestrates the Queue Store, Stream Transport,
//! and Broadcast Transport behind a single hybrid send policy, plus the
//! three background activities that keep a trade's outbox moving without
//! the application's involvement.

mod background;
mod engine;

pub use engine::DeliveryEngine;
